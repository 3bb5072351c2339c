//! Implementation of `wharf install` and `wharf dedupe`.

use std::path::Path;

use anyhow::{Context, Result};

use wharf_lib::actions::{InstallOptions, dedupe, install};

use super::{load_context, runtime};
use crate::output::{emit, install_lines};

/// Reconcile lockfiles for `project`'s graph (or the whole workspace), then
/// fetch and link packages unless `skip_link` is set.
pub fn cmd_install(cwd: &Path, project: Option<&Path>, frozen: bool, skip_link: bool) -> Result<()> {
  let ctx = load_context(cwd)?;
  let options = InstallOptions { frozen, skip_link };

  let rt = runtime()?;
  let report = rt.block_on(install(&ctx, project, options)).context("Install failed")?;

  emit(&install_lines("Install complete", &report));
  Ok(())
}

/// Reconcile every lockfile together without linking.
pub fn cmd_dedupe(cwd: &Path) -> Result<()> {
  let ctx = load_context(cwd)?;
  let rt = runtime()?;
  let report = rt.block_on(dedupe(&ctx)).context("Dedupe failed")?;

  emit(&install_lines("Lockfiles deduplicated", &report));
  Ok(())
}
