//! Distributing project jobs.
//!
//! - [`plan_groups`] splits a job list across CI nodes.
//! - [`group_by_depsets`] batches jobs whose dependency sets are compatible,
//!   so one installed dependency tree serves the whole batch.
//! - [`ClusterScheduler`] runs those batches through a pool of worker
//!   processes on one machine.

mod cluster;
mod depsets;
mod plan;

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use cluster::{
  ClusterError, ClusterReport, ClusterScheduler, GroupInstaller, JobFailure, JobLauncher, ScriptLauncher,
};
pub use depsets::{DepsetJob, group_by_depsets, is_compatible_subset};
pub use plan::plan_groups;

/// One scheduled unit of work: run `action` for the project in `dir`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Job {
  pub dir: PathBuf,
  pub action: String,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub args: Vec<String>,
}

impl Job {
  pub fn new(dir: impl Into<PathBuf>, action: &str) -> Self {
    Self {
      dir: dir.into(),
      action: action.to_string(),
      args: Vec::new(),
    }
  }

  pub fn with_args(mut self, args: Vec<String>) -> Self {
    self.args = args;
    self
  }
}

impl fmt::Display for Job {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} ({})", self.action, self.dir.display())
  }
}

/// Jobs sharing one dependency installation, base job first.
pub type WorkGroup = Vec<Job>;
