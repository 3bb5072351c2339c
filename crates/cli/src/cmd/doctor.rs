//! Implementation of `wharf doctor`.

use std::path::Path;

use anyhow::{Context, Result, bail};

use wharf_lib::actions::doctor;

use super::load_context;
use crate::output::{doctor_lines, emit, print_json};

/// Report workspace problems. Fails when any are found.
pub fn cmd_doctor(cwd: &Path, json: bool) -> Result<()> {
  let ctx = load_context(cwd)?;
  let report = doctor(&ctx).context("Doctor failed")?;

  if json {
    print_json(&report)?;
  } else {
    emit(&doctor_lines(&report));
  }

  if !report.is_healthy() {
    bail!(
      "{} cycle(s), {} policy violation(s), {} stale lockfile(s)",
      report.cycles.len(),
      report.policy.len(),
      report.stale.len()
    );
  }
  Ok(())
}
