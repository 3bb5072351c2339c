//! Implementation of the manifest-editing commands: `add`, `remove`,
//! `upgrade` and `greenkeep`.

use std::path::Path;

use anyhow::{Context, Result};

use wharf_lib::actions::{add, greenkeep, remove, upgrade};

use super::{DepSection, load_context, runtime, split_package};
use crate::output::{emit, install_lines};

pub fn cmd_add(cwd: &Path, project: &Path, package: &str, section: DepSection) -> Result<()> {
  let ctx = load_context(cwd)?;
  let (name, range) = split_package(package);

  let rt = runtime()?;
  let report = rt
    .block_on(add(&ctx, project, name, range, section.into()))
    .with_context(|| format!("Failed to add {}", package))?;

  emit(&install_lines(&format!("Added {}", name), &report));
  Ok(())
}

pub fn cmd_remove(cwd: &Path, project: &Path, name: &str) -> Result<()> {
  let ctx = load_context(cwd)?;
  let rt = runtime()?;
  let report = rt
    .block_on(remove(&ctx, project, name))
    .with_context(|| format!("Failed to remove {}", name))?;

  emit(&install_lines(&format!("Removed {}", name), &report));
  Ok(())
}

pub fn cmd_upgrade(cwd: &Path, project: Option<&Path>, package: &str, from: Option<&str>) -> Result<()> {
  let ctx = load_context(cwd)?;
  let (name, range) = split_package(package);

  let rt = runtime()?;
  let report = rt
    .block_on(upgrade(&ctx, project, name, range, from))
    .with_context(|| format!("Failed to upgrade {}", package))?;

  emit(&install_lines(&format!("Upgraded {}", name), &report));
  Ok(())
}

pub fn cmd_greenkeep(cwd: &Path, package: &str) -> Result<()> {
  let ctx = load_context(cwd)?;
  let (name, range) = split_package(package);

  let rt = runtime()?;
  let report = rt
    .block_on(greenkeep(&ctx, name, range))
    .with_context(|| format!("Failed to greenkeep {}", package))?;

  emit(&install_lines(&format!("Greenkept {}", name), &report));
  Ok(())
}
