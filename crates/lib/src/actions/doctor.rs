//! Read-only workspace health check.

use std::path::PathBuf;

use serde::Serialize;
use tracing::debug;

use super::{ActionError, Context};
use crate::graph::{Cycle, PolicyViolation, check_policy, detect_cycles};
use crate::lockfile::Lockfile;

/// A project whose lockfile lacks some of its declarations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StaleLockfile {
  pub project: String,
  pub dir: PathBuf,
  /// `name@range` keys with no lockfile entry.
  pub missing: Vec<String>,
}

/// Everything `doctor` found.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DoctorReport {
  pub cycles: Vec<Cycle>,
  pub policy: Vec<PolicyViolation>,
  pub stale: Vec<StaleLockfile>,
}

impl DoctorReport {
  pub fn is_healthy(&self) -> bool {
    self.cycles.is_empty() && self.policy.is_empty() && self.stale.is_empty()
  }
}

/// Report cycles, version policy violations and stale lockfiles.
pub fn doctor(ctx: &Context) -> Result<DoctorReport, ActionError> {
  let workspace = &ctx.workspace;
  let locals = workspace.local_names();

  let mut stale = Vec::new();
  for project in &workspace.projects {
    let lockfile = Lockfile::load(&project.dir)?;
    let mut missing: Vec<String> = project
      .manifest
      .flatten()
      .into_iter()
      .filter(|entry| !locals.contains(&entry.name))
      .map(|entry| entry.key())
      .filter(|key| !lockfile.contains(key))
      .collect();
    missing.sort();
    missing.dedup();
    if !missing.is_empty() {
      debug!(project = project.name(), missing = missing.len(), "stale lockfile");
      stale.push(StaleLockfile {
        project: project.name().to_string(),
        dir: project.dir.clone(),
        missing,
      });
    }
  }

  Ok(DoctorReport {
    cycles: detect_cycles(&workspace.projects),
    policy: check_policy(&workspace.projects, &workspace.config.version_policy),
    stale,
  })
}
