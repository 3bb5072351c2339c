//! Workspace discovery and loading.
//!
//! A workspace is a directory holding `wharf.json`, which enumerates member
//! project directories relative to the root. A member entry ending in `/*`
//! expands to every child directory containing a `package.json`.
//!
//! ```json
//! {
//!   "projects": ["packages/*", "tools/lint"],
//!   "registry": "https://registry.yarnpkg.com",
//!   "versionPolicy": { "lockAll": true, "exceptions": ["typescript"] },
//!   "workers": 8
//! }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::manifest::{MANIFEST_FILENAME, ManifestError, PackageManifest};
use crate::platform::paths::cache_dir;

/// Workspace root configuration file.
pub const WORKSPACE_FILENAME: &str = "wharf.json";

/// Errors that can occur while loading a workspace.
#[derive(Debug, Error)]
pub enum WorkspaceError {
  /// No `wharf.json` in `start` or any of its ancestors.
  #[error("no wharf.json found in '{start}' or any parent directory")]
  NotFound { start: PathBuf },

  /// Failed to read the workspace config.
  #[error("failed to read '{path}': {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  /// The workspace config is malformed.
  #[error("failed to parse '{path}': {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  /// A member project failed to load.
  #[error(transparent)]
  Manifest(#[from] ManifestError),

  /// Two member directories declare the same package name.
  #[error("package '{name}' is declared by both '{first}' and '{second}'")]
  DuplicateName {
    name: String,
    first: PathBuf,
    second: PathBuf,
  },

  /// A path does not belong to any member project.
  #[error("'{path}' is not inside a workspace project")]
  NotAProject { path: PathBuf },
}

/// Contents of `wharf.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkspaceConfig {
  /// Member project directories, relative to the workspace root.
  pub projects: Vec<String>,
  /// Default registry for projects without an `.npmrc` override.
  pub registry: Option<String>,
  pub version_policy: VersionPolicy,
  /// Worker count for cluster runs. Defaults to the number of cores.
  pub workers: Option<usize>,
  /// Shared package cache location, relative to the root when not absolute.
  pub cache_dir: Option<PathBuf>,
}

/// Workspace-wide external version policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VersionPolicy {
  /// Require every external package to be declared with one range everywhere.
  pub lock_all: bool,
  /// With `lock_all`, packages exempt from the rule. Without it, the packages
  /// the rule applies to.
  pub exceptions: Vec<String>,
}

impl VersionPolicy {
  /// Whether `name` must use a single range across the workspace.
  pub fn applies_to(&self, name: &str) -> bool {
    let listed = self.exceptions.iter().any(|e| e == name);
    if self.lock_all { !listed } else { listed }
  }
}

/// One member package.
#[derive(Debug, Clone, PartialEq)]
pub struct Project {
  /// Absolute project directory; the unique key.
  pub dir: PathBuf,
  pub manifest: PackageManifest,
}

impl Project {
  pub fn name(&self) -> &str {
    &self.manifest.name
  }

  pub fn version(&self) -> &str {
    &self.manifest.version
  }
}

/// A workspace-local package as seen by reconciliation and linking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalPackage {
  pub version: String,
  pub dir: PathBuf,
}

/// A loaded workspace.
#[derive(Debug, Clone)]
pub struct Workspace {
  pub root: PathBuf,
  pub config: WorkspaceConfig,
  pub projects: Vec<Project>,
}

impl Workspace {
  /// Walk up from `start` to the nearest directory containing `wharf.json`.
  pub fn find_root(start: &Path) -> Result<PathBuf, WorkspaceError> {
    let start = dunce::canonicalize(start).unwrap_or_else(|_| start.to_path_buf());
    let root = start
      .ancestors()
      .find(|dir| dir.join(WORKSPACE_FILENAME).is_file())
      .map(Path::to_path_buf);
    root.ok_or(WorkspaceError::NotFound { start })
  }

  /// Discover and load the workspace containing `start`.
  pub fn discover(start: &Path) -> Result<Self, WorkspaceError> {
    let root = Self::find_root(start)?;
    Self::load(&root)
  }

  /// Load the workspace rooted at `root`, reading every member manifest.
  pub fn load(root: &Path) -> Result<Self, WorkspaceError> {
    let root = dunce::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    let path = root.join(WORKSPACE_FILENAME);
    let content = fs::read_to_string(&path).map_err(|source| WorkspaceError::Read {
      path: path.clone(),
      source,
    })?;
    let config: WorkspaceConfig =
      serde_json::from_str(&content).map_err(|source| WorkspaceError::Parse { path, source })?;

    let mut projects = Vec::new();
    let mut seen: BTreeMap<String, PathBuf> = BTreeMap::new();
    for dir in expand_members(&root, &config.projects)? {
      let manifest = PackageManifest::load(&dir)?;
      if let Some(first) = seen.get(&manifest.name) {
        return Err(WorkspaceError::DuplicateName {
          name: manifest.name.clone(),
          first: first.clone(),
          second: dir,
        });
      }
      seen.insert(manifest.name.clone(), dir.clone());
      projects.push(Project { dir, manifest });
    }

    info!(root = %root.display(), projects = projects.len(), "workspace loaded");
    Ok(Self { root, config, projects })
  }

  /// Find a project by directory.
  pub fn project(&self, dir: &Path) -> Option<&Project> {
    self.projects.iter().find(|p| p.dir == dir)
  }

  /// Find a project by package name.
  pub fn project_named(&self, name: &str) -> Option<&Project> {
    self.projects.iter().find(|p| p.name() == name)
  }

  /// Resolve a user-supplied project reference: a package name, or a path
  /// (absolute or relative to the root) at or below a project directory.
  pub fn resolve_project(&self, reference: &Path) -> Result<&Project, WorkspaceError> {
    if let Some(project) = reference.to_str().and_then(|name| self.project_named(name)) {
      return Ok(project);
    }
    let absolute = if reference.is_absolute() {
      reference.to_path_buf()
    } else {
      self.root.join(reference)
    };
    let absolute = dunce::canonicalize(&absolute).unwrap_or(absolute);
    self
      .projects
      .iter()
      .filter(|p| absolute.starts_with(&p.dir))
      .max_by_key(|p| p.dir.components().count())
      .ok_or(WorkspaceError::NotAProject { path: absolute })
  }

  /// Names of all member packages.
  pub fn local_names(&self) -> HashSet<String> {
    self.projects.iter().map(|p| p.name().to_string()).collect()
  }

  /// Member packages keyed by name.
  pub fn locals(&self) -> BTreeMap<String, LocalPackage> {
    self
      .projects
      .iter()
      .map(|p| {
        let local = LocalPackage {
          version: p.version().to_string(),
          dir: p.dir.clone(),
        };
        (p.name().to_string(), local)
      })
      .collect()
  }

  /// Shared package cache directory.
  pub fn cache_dir(&self) -> PathBuf {
    match &self.config.cache_dir {
      Some(dir) if dir.is_absolute() => dir.clone(),
      Some(dir) => self.root.join(dir),
      None => cache_dir(),
    }
  }
}

fn expand_members(root: &Path, members: &[String]) -> Result<Vec<PathBuf>, WorkspaceError> {
  let mut dirs = Vec::new();
  for member in members {
    match member.strip_suffix("/*") {
      Some(parent) => {
        let parent = root.join(parent);
        let entries = fs::read_dir(&parent).map_err(|source| WorkspaceError::Read {
          path: parent.clone(),
          source,
        })?;
        let mut children: Vec<PathBuf> = entries
          .filter_map(Result::ok)
          .map(|entry| entry.path())
          .filter(|path| path.join(MANIFEST_FILENAME).is_file())
          .collect();
        children.sort();
        dirs.extend(children);
      }
      None => dirs.push(root.join(member)),
    }
  }
  dirs.dedup();
  debug!(count = dirs.len(), "expanded workspace members");
  Ok(dirs)
}


#[cfg(test)]
mod tests {
  use super::testutil::write_workspace;
  use super::*;
  use crate::manifest::DepType;
  use tempfile::TempDir;

  fn sample(root: &Path) {
    write_workspace(
      root,
      &[
        PackageManifest::new("a", "1.0.0").with_dep(DepType::Dependencies, "b", "^1.0.0"),
        PackageManifest::new("b", "1.0.3"),
      ],
    );
  }

  mod loading {
    use super::*;

    #[test]
    fn loads_members() {
      let temp = TempDir::new().unwrap();
      sample(temp.path());

      let workspace = Workspace::load(temp.path()).unwrap();
      assert_eq!(workspace.projects.len(), 2);
      assert_eq!(workspace.projects[0].name(), "a");
      assert_eq!(workspace.locals().get("b").unwrap().version, "1.0.3");
    }

    #[test]
    fn glob_members_expand_to_manifests() {
      let temp = TempDir::new().unwrap();
      sample(temp.path());
      fs::create_dir_all(temp.path().join("packages/not-a-package")).unwrap();
      fs::write(temp.path().join(WORKSPACE_FILENAME), r#"{"projects": ["packages/*"]}"#).unwrap();

      let workspace = Workspace::load(temp.path()).unwrap();
      let names: Vec<&str> = workspace.projects.iter().map(|p| p.name()).collect();
      assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn duplicate_names_are_rejected() {
      let temp = TempDir::new().unwrap();
      sample(temp.path());
      let dup = temp.path().join("packages/b2");
      fs::create_dir_all(&dup).unwrap();
      fs::write(dup.join("package.json"), r#"{"name": "b", "version": "2.0.0"}"#).unwrap();
      fs::write(temp.path().join(WORKSPACE_FILENAME), r#"{"projects": ["packages/*"]}"#).unwrap();

      let result = Workspace::load(temp.path());
      assert!(matches!(result, Err(WorkspaceError::DuplicateName { .. })));
    }

    #[test]
    fn missing_member_manifest_fails() {
      let temp = TempDir::new().unwrap();
      fs::write(temp.path().join(WORKSPACE_FILENAME), r#"{"projects": ["nope"]}"#).unwrap();
      let result = Workspace::load(temp.path());
      assert!(matches!(result, Err(WorkspaceError::Manifest(_))));
    }
  }

  mod discovery {
    use super::*;

    #[test]
    fn finds_root_from_nested_dir() {
      let temp = TempDir::new().unwrap();
      sample(temp.path());
      let nested = temp.path().join("packages/a/src");
      fs::create_dir_all(&nested).unwrap();

      let root = Workspace::find_root(&nested).unwrap();
      assert_eq!(root, dunce::canonicalize(temp.path()).unwrap());
    }

    #[test]
    fn resolves_project_by_name_or_path() {
      let temp = TempDir::new().unwrap();
      sample(temp.path());
      let workspace = Workspace::load(temp.path()).unwrap();

      assert_eq!(workspace.resolve_project(Path::new("b")).unwrap().name(), "b");
      assert_eq!(workspace.resolve_project(Path::new("packages/a")).unwrap().name(), "a");
      assert!(workspace.resolve_project(Path::new("elsewhere")).is_err());
    }
  }

  #[test]
  fn version_policy_scopes() {
    let lock_all = VersionPolicy {
      lock_all: true,
      exceptions: vec!["typescript".to_string()],
    };
    assert!(lock_all.applies_to("react"));
    assert!(!lock_all.applies_to("typescript"));

    let listed = VersionPolicy {
      lock_all: false,
      exceptions: vec!["react".to_string()],
    };
    assert!(listed.applies_to("react"));
    assert!(!listed.applies_to("lodash"));
  }
}
