//! Implementation of `wharf build`.

use std::path::Path;

use anyhow::{Context, Result};

use wharf_lib::actions::build;
use wharf_lib::checksum::ChecksumCache;

use super::{load_context, runtime};
use crate::output::{build_lines, emit};

/// Build `project`'s graph (or every project), reusing the workspace
/// checksum cache.
pub fn cmd_build(cwd: &Path, project: Option<&Path>) -> Result<()> {
  let ctx = load_context(cwd)?;
  let cache = ChecksumCache::load(&ctx.workspace.root).context("Failed to load checksum cache")?;

  let rt = runtime()?;
  let report = rt.block_on(build(&ctx, project, &cache)).context("Build failed")?;
  emit(&build_lines(&report));
  Ok(())
}
