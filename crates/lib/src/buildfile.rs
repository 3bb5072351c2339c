//! Keeping build descriptions in step with the workspace graph.
//!
//! The build description format belongs to an external build system, so
//! editing it is delegated to a [`BuildFileEditor`]. This module only decides
//! which workspace labels a project's dependency list should hold.

use std::path::Path;

use tracing::info;

use crate::graph::direct_dependencies;
use crate::util::fs::relative_path;
use crate::workspace::Project;

/// Name of the dependency list inside a build description.
pub const DEPS_LIST: &str = "deps";

/// Prefix of labels that refer to workspace projects.
const WORKSPACE_LABEL_PREFIX: &str = "//";

/// Edits list-valued attributes of a project's build description.
pub trait BuildFileEditor {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Items of `list` in the build description of `project`.
  fn list_items(&self, project: &Path, list: &str) -> Result<Vec<String>, Self::Error>;

  /// Append `item` to `list`.
  fn add_item(&mut self, project: &Path, list: &str, item: &str) -> Result<(), Self::Error>;

  /// Remove `item` from `list`.
  fn remove_item(&mut self, project: &Path, list: &str, item: &str) -> Result<(), Self::Error>;
}

/// Changes applied by [`sync_build_deps`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildDepsSync {
  pub added: Vec<String>,
  pub removed: Vec<String>,
}

impl BuildDepsSync {
  pub fn is_empty(&self) -> bool {
    self.added.is_empty() && self.removed.is_empty()
  }
}

/// Build label of a workspace project: `//` followed by its root-relative path.
pub fn workspace_label(root: &Path, dir: &Path) -> String {
  format!(
    "{}{}",
    WORKSPACE_LABEL_PREFIX,
    relative_path(root, dir).to_string_lossy().replace('\\', "/")
  )
}

/// Labels `project`'s dependency list should contain for its workspace dependencies.
pub fn desired_labels(root: &Path, projects: &[Project], project: &Project) -> Vec<String> {
  let mut labels: Vec<String> = direct_dependencies(projects, project)
    .into_iter()
    .map(|dep| workspace_label(root, &dep.dir))
    .collect();
  labels.sort();
  labels
}

/// Add missing workspace labels to `project`'s dependency list and drop stale ones.
///
/// Items that are not workspace labels are left alone.
pub fn sync_build_deps<E: BuildFileEditor>(
  editor: &mut E,
  root: &Path,
  projects: &[Project],
  project: &Project,
) -> Result<BuildDepsSync, E::Error> {
  let desired = desired_labels(root, projects, project);
  let current = editor.list_items(&project.dir, DEPS_LIST)?;
  let mut sync = BuildDepsSync::default();

  for item in &current {
    if item.starts_with(WORKSPACE_LABEL_PREFIX) && !desired.contains(item) {
      editor.remove_item(&project.dir, DEPS_LIST, item)?;
      sync.removed.push(item.clone());
    }
  }
  for label in desired {
    if !current.contains(&label) {
      editor.add_item(&project.dir, DEPS_LIST, &label)?;
      sync.added.push(label);
    }
  }

  if !sync.is_empty() {
    info!(
      project = project.name(),
      added = sync.added.len(),
      removed = sync.removed.len(),
      "build dependencies synced"
    );
  }
  Ok(sync)
}
