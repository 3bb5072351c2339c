//! User-facing operations.
//!
//! Each action validates the workspace graph before touching anything, then
//! drives the lower layers: reconciliation, materialization, checksums and the
//! job scheduler. Actions never print; callers render the returned reports.

mod batch;
mod build;
mod doctor;
mod install;
mod modify;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::checksum::ChecksumError;
use crate::graph::{self, GraphError};
use crate::lockfile::LockfileError;
use crate::manifest::ManifestError;
use crate::materialize::MaterializeError;
use crate::reconcile::ReconcileError;
use crate::registry::{DEFAULT_REGISTRY, RegistryClient, RegistryConfig, RegistryError};
use crate::scheduler::ClusterError;
use crate::workspace::{Workspace, WorkspaceError};

pub use batch::{WorkspaceInstaller, batch, each, each_jobs, plan};
pub use build::{BuildReport, build};
pub use doctor::{DoctorReport, StaleLockfile, doctor};
pub use install::{InstallOptions, InstallReport, dedupe, install, update_lockfiles};
pub use modify::{add, greenkeep, remove, upgrade};

/// Broad failure categories, used for exit codes and messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  Validation,
  Graph,
  Reconciliation,
  Materialization,
  Job,
  Io,
}

/// Errors returned by actions.
#[derive(Debug, Error)]
pub enum ActionError {
  #[error(transparent)]
  Workspace(#[from] WorkspaceError),

  #[error(transparent)]
  Manifest(#[from] ManifestError),

  #[error(transparent)]
  Graph(#[from] GraphError),

  #[error(transparent)]
  Lockfile(#[from] LockfileError),

  #[error(transparent)]
  Registry(#[from] RegistryError),

  #[error(transparent)]
  Reconcile(#[from] ReconcileError),

  #[error(transparent)]
  Materialize(#[from] MaterializeError),

  #[error(transparent)]
  Checksum(#[from] ChecksumError),

  #[error(transparent)]
  Cluster(#[from] ClusterError),

  /// A project lacks the script an action needs.
  #[error("'{project}' has no '{script}' script")]
  MissingScript { project: String, script: String },

  /// A build script exited unsuccessfully.
  #[error("build of '{project}' failed: {detail}")]
  BuildFailed { project: String, detail: String },
}

impl ActionError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      ActionError::Workspace(WorkspaceError::Read { .. })
      | ActionError::Lockfile(LockfileError::Read { .. } | LockfileError::Write { .. }) => ErrorKind::Io,
      ActionError::Workspace(_) | ActionError::Manifest(_) | ActionError::MissingScript { .. } => {
        ErrorKind::Validation
      }
      ActionError::Graph(_) => ErrorKind::Graph,
      ActionError::Reconcile(ReconcileError::InvalidIntent { .. }) => ErrorKind::Validation,
      ActionError::Lockfile(_) | ActionError::Registry(_) | ActionError::Reconcile(_) => ErrorKind::Reconciliation,
      ActionError::Materialize(_) => ErrorKind::Materialization,
      ActionError::Checksum(_) => ErrorKind::Io,
      ActionError::Cluster(_) | ActionError::BuildFailed { .. } => ErrorKind::Job,
    }
  }
}

/// A loaded workspace plus the registry client its actions share.
///
/// Registry settings are per project: every version set loads the `.npmrc`
/// chain of its own directory and hands it to the shared client.
pub struct Context {
  pub workspace: Workspace,
  defaults: RegistryConfig,
  client: Arc<RegistryClient>,
}

impl Context {
  /// Build a context, reading the default registry settings from the workspace root.
  pub fn new(workspace: Workspace) -> Result<Self, ActionError> {
    let fallback = workspace.config.registry.as_deref().unwrap_or(DEFAULT_REGISTRY);
    let defaults = RegistryConfig::load(&workspace.root, fallback)?;
    Ok(Self {
      workspace,
      defaults,
      client: Arc::new(RegistryClient::new()),
    })
  }

  /// Discover the workspace containing `start`.
  pub fn discover(start: &Path) -> Result<Self, ActionError> {
    Self::new(Workspace::discover(start)?)
  }

  /// Registry used for projects whose `.npmrc` chain sets none.
  pub fn registry(&self) -> &str {
    &self.defaults.registry
  }

  pub fn client(&self) -> &Arc<RegistryClient> {
    &self.client
  }
}

/// Reject a workspace with cycles or version policy violations.
pub fn validate(workspace: &Workspace) -> Result<(), ActionError> {
  graph::ensure_acyclic(&workspace.projects)?;
  graph::enforce_policy(&workspace.projects, &workspace.config.version_policy)?;
  Ok(())
}

/// Project directories an action covers, dependencies first.
///
/// With a target, its dependency graph; otherwise every project.
pub fn scope(workspace: &Workspace, target: Option<&Path>) -> Result<Vec<PathBuf>, ActionError> {
  let projects = match target {
    Some(reference) => {
      let project = workspace.resolve_project(reference)?;
      graph::build_graph(&workspace.projects, &project.dir)?
    }
    None => graph::topological_order(&workspace.projects),
  };
  Ok(projects.into_iter().map(|p| p.dir.clone()).collect())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::manifest::{DepType, PackageManifest};
  use crate::workspace::testutil::write_workspace;
  use tempfile::TempDir;

  fn workspace(manifests: &[PackageManifest]) -> (TempDir, Workspace) {
    let temp = TempDir::new().unwrap();
    write_workspace(temp.path(), manifests);
    let workspace = Workspace::load(temp.path()).unwrap();
    (temp, workspace)
  }

  mod scoping {
    use super::*;

    #[test]
    fn target_scope_is_its_graph() {
      let (_temp, ws) = workspace(&[
        PackageManifest::new("a", "1.0.0").with_dep(DepType::Dependencies, "b", "^1.0.0"),
        PackageManifest::new("b", "1.0.0"),
        PackageManifest::new("c", "1.0.0"),
      ]);
      let dirs = scope(&ws, Some(Path::new("a"))).unwrap();
      let names: Vec<&str> = dirs.iter().filter_map(|d| d.file_name()?.to_str()).collect();
      assert_eq!(names, vec!["b", "a"]);
      assert_eq!(scope(&ws, None).unwrap().len(), 3);
    }

    #[test]
    fn unknown_target_is_validation_error() {
      let (_temp, ws) = workspace(&[PackageManifest::new("a", "1.0.0")]);
      let err = scope(&ws, Some(Path::new("missing"))).unwrap_err();
      assert_eq!(err.kind(), ErrorKind::Validation);
    }
  }

  mod validation {
    use super::*;

    #[test]
    fn cycle_is_graph_error() {
      let (_temp, ws) = workspace(&[
        PackageManifest::new("a", "1.0.0").with_dep(DepType::Dependencies, "b", "^1.0.0"),
        PackageManifest::new("b", "1.0.0").with_dep(DepType::Dependencies, "a", "^1.0.0"),
      ]);
      let err = validate(&ws).unwrap_err();
      assert_eq!(err.kind(), ErrorKind::Graph);
      assert!(err.to_string().contains("a -> b -> a"));
    }

    #[test]
    fn acyclic_workspace_passes() {
      let (_temp, ws) = workspace(&[PackageManifest::new("a", "1.0.0")]);
      assert!(validate(&ws).is_ok());
    }
  }
}
