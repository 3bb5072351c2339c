mod batch;
mod build;
mod doctor;
mod install;
mod modify;
mod plan;

use std::path::Path;

use anyhow::{Context as _, Result};
use clap::ValueEnum;
use tokio::runtime::Runtime;
use tracing::debug;

use wharf_lib::actions::Context;
use wharf_lib::lockfile::split_key;
use wharf_lib::manifest::DepType;


pub use batch::{cmd_batch, cmd_each};
pub use build::cmd_build;
pub use doctor::cmd_doctor;
pub use install::{cmd_dedupe, cmd_install};
pub use modify::{cmd_add, cmd_greenkeep, cmd_remove, cmd_upgrade};
pub use plan::cmd_plan;

/// Manifest section targeted by `wharf add`.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum DepSection {
  Dependencies,
  Dev,
  Peer,
  Optional,
}

impl From<DepSection> for DepType {
  fn from(section: DepSection) -> Self {
    match section {
      DepSection::Dependencies => DepType::Dependencies,
      DepSection::Dev => DepType::DevDependencies,
      DepSection::Peer => DepType::PeerDependencies,
      DepSection::Optional => DepType::OptionalDependencies,
    }
  }
}

fn load_context(cwd: &Path) -> Result<Context> {
  let ctx = Context::discover(cwd).with_context(|| format!("Failed to load workspace from {}", cwd.display()))?;
  debug!(root = %ctx.workspace.root.display(), projects = ctx.workspace.projects.len(), "using workspace");
  Ok(ctx)
}

fn runtime() -> Result<Runtime> {
  Runtime::new().context("Failed to create async runtime")
}

/// Split `name@range` into its parts; a bare name has no range.
fn split_package(package: &str) -> (&str, Option<&str>) {
  let (name, range) = split_key(package);
  (name, Some(range).filter(|r| !r.is_empty()))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn package_specs() {
    assert_eq!(split_package("lodash"), ("lodash", None));
    assert_eq!(split_package("lodash@^4.17.0"), ("lodash", Some("^4.17.0")));
    assert_eq!(split_package("@scope/pkg@~1.2.0"), ("@scope/pkg", Some("~1.2.0")));
    assert_eq!(split_package("@scope/pkg"), ("@scope/pkg", None));
  }
}
