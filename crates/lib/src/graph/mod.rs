//! Workspace dependency graph.
//!
//! Edges are derived, never stored: project A depends on project B when A
//! declares a range on B's name (in `dependencies` or `devDependencies`) that
//! B's version satisfies. Names with no satisfying project are external and
//! left to the lockfile.
//!
//! [`build_graph`] returns the projects reachable from a target in an order
//! where every project comes after all of its workspace dependencies.

mod cycles;
mod policy;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, trace};

use crate::range;
use crate::workspace::Project;

pub use cycles::{Cycle, detect_cycles, ensure_acyclic};
pub use policy::{PolicyViolation, check_policy, enforce_policy};

/// Errors raised by graph validation.
#[derive(Debug, Error)]
pub enum GraphError {
  /// The target directory is not a workspace project.
  #[error("'{dir}' is not a workspace project")]
  UnknownProject { dir: PathBuf },

  /// Projects depend on each other in a loop.
  #[error("dependency cycle detected: {chains}")]
  Cycle { chains: String },

  /// External packages are declared with conflicting ranges.
  #[error("version policy violated: {details}")]
  PolicyMismatch { details: String },
}

/// Find the workspace project satisfying a declaration, if any.
pub fn local_dependency<'a>(projects: &'a [Project], name: &str, range: &str) -> Option<&'a Project> {
  projects
    .iter()
    .find(|p| p.name() == name && range::satisfies(p.version(), range))
}

/// Direct workspace dependencies of `project`, in declaration order.
pub fn direct_dependencies<'a>(projects: &'a [Project], project: &Project) -> Vec<&'a Project> {
  let mut deps: Vec<&Project> = Vec::new();
  for (name, range) in project.manifest.local_candidates() {
    if let Some(dep) = local_dependency(projects, name, range)
      && dep.dir != project.dir
      && !deps.iter().any(|d| d.dir == dep.dir)
    {
      deps.push(dep);
    }
  }
  deps
}

/// Dependency-ordered projects reachable from `target`, ending with `target`.
///
/// Each project appears once. A project never precedes one of its own
/// dependencies unless they form a cycle, which [`detect_cycles`] reports.
pub fn build_graph<'a>(projects: &'a [Project], target: &Path) -> Result<Vec<&'a Project>, GraphError> {
  let root = projects
    .iter()
    .find(|p| p.dir == target)
    .ok_or_else(|| GraphError::UnknownProject {
      dir: target.to_path_buf(),
    })?;

  let mut ordered = Vec::new();
  let mut placed = HashSet::new();
  let mut visiting = HashSet::new();
  visit(projects, root, &mut ordered, &mut placed, &mut visiting);

  debug!(
    target = %target.display(),
    projects = ordered.len(),
    "workspace graph built"
  );
  Ok(ordered)
}

fn visit<'a>(
  projects: &'a [Project],
  project: &'a Project,
  ordered: &mut Vec<&'a Project>,
  placed: &mut HashSet<PathBuf>,
  visiting: &mut HashSet<PathBuf>,
) {
  if placed.contains(&project.dir) || !visiting.insert(project.dir.clone()) {
    return;
  }
  for dep in direct_dependencies(projects, project) {
    trace!(from = project.name(), to = dep.name(), "graph edge");
    visit(projects, dep, ordered, placed, visiting);
  }
  visiting.remove(&project.dir);
  placed.insert(project.dir.clone());
  ordered.push(project);
}

/// Every project in dependency order.
pub fn topological_order(projects: &[Project]) -> Vec<&Project> {
  let mut ordered = Vec::new();
  let mut placed = HashSet::new();
  let mut visiting = HashSet::new();
  for project in projects {
    visit(projects, project, &mut ordered, &mut placed, &mut visiting);
  }
  ordered
}

/// Projects that depend on `dir`, directly or transitively.
pub fn dependents<'a>(projects: &'a [Project], dir: &Path) -> Vec<&'a Project> {
  let mut found: Vec<&Project> = Vec::new();
  let mut frontier = vec![dir.to_path_buf()];
  while let Some(current) = frontier.pop() {
    for project in projects {
      if project.dir == dir || found.iter().any(|f| f.dir == project.dir) {
        continue;
      }
      if direct_dependencies(projects, project).iter().any(|d| d.dir == current) {
        found.push(project);
        frontier.push(project.dir.clone());
      }
    }
  }
  found
}
