//! Populating `node_modules` with links.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::{BIN_DIR_NAME, DEPS_DIR_NAME, MaterializeError, cache_entry, real_name};
use crate::lockfile::{LockEntry, make_key, split_key};
use crate::manifest::{DepType, PackageManifest};
use crate::range;
use crate::reconcile::VersionSet;
use crate::util::fs::replace_link;
use crate::workspace::LocalPackage;

/// What linking one project did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkReport {
  /// Dependency links created or re-pointed.
  pub linked: usize,
  /// Dependency links that were already correct.
  pub unchanged: usize,
  /// Executables exposed in `node_modules/.bin`.
  pub bins: usize,
}

/// Link the dependencies of every set, one blocking task per set.
pub async fn materialize(
  sets: &[VersionSet],
  locals: &BTreeMap<String, LocalPackage>,
  cache_dir: &Path,
) -> Result<Vec<LinkReport>, MaterializeError> {
  let locals = Arc::new(locals.clone());
  let mut join_set = JoinSet::new();
  for (position, set) in sets.iter().cloned().enumerate() {
    let locals = Arc::clone(&locals);
    let cache_dir = cache_dir.to_path_buf();
    join_set.spawn_blocking(move || (position, link_set(&set, &locals, &cache_dir)));
  }

  let mut reports = vec![LinkReport::default(); sets.len()];
  while let Some(joined) = join_set.join_next().await {
    let (position, report) = joined?;
    reports[position] = report?;
  }
  Ok(reports)
}

/// Link one project's declared dependencies and their transitive closure.
pub fn link_set(
  set: &VersionSet,
  locals: &BTreeMap<String, LocalPackage>,
  cache_dir: &Path,
) -> Result<LinkReport, MaterializeError> {
  let deps_dir = set.dir.join(DEPS_DIR_NAME);
  let bin_dir = deps_dir.join(BIN_DIR_NAME);
  let mut report = LinkReport::default();

  for (name, range) in set.manifest.depset() {
    let Some(target) = direct_target(set, locals, cache_dir, &name, &range)? else {
      continue;
    };
    let link = deps_dir.join(&name);
    if replace_link(&target, &link).map_err(io_err(&link))? {
      report.linked += 1;
    } else {
      report.unchanged += 1;
    }
    report.bins += link_bins(&target, &bin_dir)?;
  }

  link_nested(set, cache_dir)?;

  info!(
    project = %set.dir.display(),
    linked = report.linked,
    unchanged = report.unchanged,
    "dependencies linked"
  );
  Ok(report)
}

/// Where a declared dependency should point, or `None` when it may be absent.
fn direct_target(
  set: &VersionSet,
  locals: &BTreeMap<String, LocalPackage>,
  cache_dir: &Path,
  name: &str,
  range: &str,
) -> Result<Option<PathBuf>, MaterializeError> {
  if let Some(local) = locals.get(name)
    && (!range::is_valid(range) || range::satisfies(&local.version, range))
  {
    return Ok(Some(local.dir.clone()));
  }

  let key = make_key(name, range);
  match set.lockfile.get(&key) {
    Some(entry) => Ok(Some(entry_target(&set.dir, cache_dir, &key, entry))),
    None => match set.manifest.declared(name) {
      Some((DepType::OptionalDependencies | DepType::PeerDependencies, _)) => {
        debug!(project = %set.dir.display(), key = %key, "optional dependency not installed");
        Ok(None)
      }
      _ => Err(MaterializeError::Unlocked {
        dir: set.dir.clone(),
        key,
      }),
    },
  }
}

/// Directory a lockfile entry lives in.
fn entry_target(project_dir: &Path, cache_dir: &Path, key: &str, entry: &LockEntry) -> PathBuf {
  match entry.resolved.strip_prefix("file:") {
    Some(relative) => project_dir.join(relative),
    None => {
      let (name, range) = split_key(key);
      cache_entry(cache_dir, real_name(name, range), &entry.version)
    }
  }
}

/// Give every cached package its own `node_modules` with its resolved dependencies.
fn link_nested(set: &VersionSet, cache_dir: &Path) -> Result<(), MaterializeError> {
  for (key, entry) in set.lockfile.iter() {
    if entry.is_local() {
      continue;
    }
    let package_dir = entry_target(&set.dir, cache_dir, key, entry);
    if !package_dir.is_dir() {
      warn!(key = %key, dir = %package_dir.display(), "package missing from cache");
      continue;
    }

    for (dep, dep_range) in entry.all_dependencies() {
      let dep_key = make_key(dep, dep_range);
      let Some(dep_entry) = set.lockfile.get(&dep_key) else {
        continue;
      };
      let target = entry_target(&set.dir, cache_dir, &dep_key, dep_entry);
      let link = package_dir.join(DEPS_DIR_NAME).join(dep);
      // Sets sharing a cache entry link into it concurrently.
      replace_link(&target, &link).map_err(io_err(&link))?;
    }
  }
  Ok(())
}

/// Mirror a package's declared executables into `bin_dir`.
fn link_bins(package_dir: &Path, bin_dir: &Path) -> Result<usize, MaterializeError> {
  let manifest = match PackageManifest::load(package_dir) {
    Ok(manifest) => manifest,
    Err(e) => {
      debug!(dir = %package_dir.display(), error = %e, "no readable manifest, skipping executables");
      return Ok(0);
    }
  };

  for (command, file) in &manifest.bin {
    let link = bin_dir.join(command);
    replace_link(&package_dir.join(file), &link).map_err(io_err(&link))?;
  }
  Ok(manifest.bin.len())
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> MaterializeError {
  let path = path.to_path_buf();
  move |source| MaterializeError::Io { path, source }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
  use super::*;
  use crate::lockfile::Lockfile;
  use crate::registry::RegistryConfig;
  use std::fs;
  use tempfile::TempDir;

  struct Fixture {
    temp: TempDir,
    set: VersionSet,
    locals: BTreeMap<String, LocalPackage>,
  }

  impl Fixture {
    fn cache(&self) -> PathBuf {
      self.temp.path().join("cache")
    }

    fn root(&self) -> &Path {
      self.temp.path()
    }
  }

  fn write_package(dir: &Path, json: &str) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join("package.json"), json).unwrap();
  }

  fn fixture() -> Fixture {
    let temp = TempDir::new().unwrap();
    let root = temp.path();

    write_package(
      &root.join("b"),
      r#"{"name": "b", "version": "1.0.3", "bin": {"b-cli": "cli.js"}}"#,
    );
    write_package(&root.join("cache/has-1.0.3"), r#"{"name": "has", "version": "1.0.3"}"#);
    write_package(
      &root.join("cache/function-bind-1.1.2"),
      r#"{"name": "function-bind", "version": "1.1.2"}"#,
    );

    let manifest = PackageManifest::new("a", "1.0.0")
      .with_dep(DepType::Dependencies, "b", "^1.0.0")
      .with_dep(DepType::Dependencies, "has", "1.0.3")
      .with_dep(DepType::OptionalDependencies, "fsevents", "^2.0.0");
    let mut lockfile = Lockfile::new();
    lockfile.insert(
      "has@1.0.3".to_string(),
      Arc::new(LockEntry {
        version: "1.0.3".to_string(),
        resolved: "https://r/has/-/has-1.0.3.tgz#abc".to_string(),
        dependencies: [("function-bind".to_string(), "^1.1.1".to_string())].into(),
        ..Default::default()
      }),
    );
    lockfile.insert(
      "function-bind@^1.1.1".to_string(),
      Arc::new(LockEntry {
        version: "1.1.2".to_string(),
        resolved: "https://r/function-bind/-/function-bind-1.1.2.tgz#def".to_string(),
        ..Default::default()
      }),
    );

    let set = VersionSet {
      dir: root.join("a"),
      manifest,
      lockfile,
      registry: RegistryConfig::default(),
    };
    let locals = BTreeMap::from([(
      "b".to_string(),
      LocalPackage {
        version: "1.0.3".to_string(),
        dir: root.join("b"),
      },
    )]);
    Fixture { temp, set, locals }
  }

  mod direct {
    use super::*;

    #[test]
    fn links_locals_and_cache_entries() {
      let f = fixture();
      let report = link_set(&f.set, &f.locals, &f.cache()).unwrap();

      let modules = f.root().join("a/node_modules");
      assert_eq!(fs::read_link(modules.join("b")).unwrap(), f.root().join("b"));
      assert_eq!(fs::read_link(modules.join("has")).unwrap(), f.cache().join("has-1.0.3"));
      assert!(!modules.join("fsevents").exists());
      assert_eq!(report.linked, 2);
    }

    #[test]
    fn relinking_is_idempotent() {
      let f = fixture();
      link_set(&f.set, &f.locals, &f.cache()).unwrap();
      let again = link_set(&f.set, &f.locals, &f.cache()).unwrap();
      assert_eq!(again.linked, 0);
      assert_eq!(again.unchanged, 2);
    }

    #[test]
    fn repoints_stale_links() {
      let f = fixture();
      let stale = f.root().join("a/node_modules/has");
      fs::create_dir_all(&stale).unwrap();
      fs::write(stale.join("old.js"), "").unwrap();

      link_set(&f.set, &f.locals, &f.cache()).unwrap();
      assert_eq!(fs::read_link(&stale).unwrap(), f.cache().join("has-1.0.3"));
    }

    #[test]
    fn unlocked_dependency_fails() {
      let mut f = fixture();
      f.set.manifest.dependencies.insert("lodash".to_string(), "^4.0.0".to_string());
      let err = link_set(&f.set, &f.locals, &f.cache()).unwrap_err();
      assert!(matches!(err, MaterializeError::Unlocked { ref key, .. } if key == "lodash@^4.0.0"));
    }

    #[test]
    fn scoped_names_get_parent_directory() {
      let mut f = fixture();
      write_package(&f.cache().join("@scope+util-2.0.0"), r#"{"name": "@scope/util"}"#);
      f.set.manifest.dependencies.insert("@scope/util".to_string(), "^2.0.0".to_string());
      f.set.lockfile.insert(
        "@scope/util@^2.0.0".to_string(),
        Arc::new(LockEntry {
          version: "2.0.0".to_string(),
          resolved: "https://r/@scope/util/-/util-2.0.0.tgz".to_string(),
          ..Default::default()
        }),
      );

      link_set(&f.set, &f.locals, &f.cache()).unwrap();
      let link = f.root().join("a/node_modules/@scope/util");
      assert_eq!(fs::read_link(link).unwrap(), f.cache().join("@scope+util-2.0.0"));
    }
  }

  mod transitive {
    use super::*;

    #[test]
    fn cached_packages_see_their_dependencies() {
      let f = fixture();
      link_set(&f.set, &f.locals, &f.cache()).unwrap();
      let nested = f.cache().join("has-1.0.3/node_modules/function-bind");
      assert_eq!(fs::read_link(nested).unwrap(), f.cache().join("function-bind-1.1.2"));
    }

    #[tokio::test]
    async fn sets_sharing_cache_entries_link_concurrently() {
      let f = fixture();
      let sets: Vec<VersionSet> = (0..8)
        .map(|i| VersionSet {
          dir: f.root().join(format!("a{}", i)),
          ..f.set.clone()
        })
        .collect();

      let reports = materialize(&sets, &f.locals, &f.cache()).await.unwrap();
      assert_eq!(reports.len(), 8);
      let nested = f.cache().join("has-1.0.3/node_modules/function-bind");
      assert_eq!(fs::read_link(nested).unwrap(), f.cache().join("function-bind-1.1.2"));
    }
  }

  mod executables {
    use super::*;

    #[test]
    fn declared_bins_are_linked() {
      let f = fixture();
      let report = link_set(&f.set, &f.locals, &f.cache()).unwrap();
      let bin = f.root().join("a/node_modules/.bin/b-cli");
      assert_eq!(fs::read_link(bin).unwrap(), f.root().join("b/cli.js"));
      assert_eq!(report.bins, 1);
    }
  }

  #[tokio::test]
  async fn materializes_every_set() {
    let f = fixture();
    let reports = materialize(std::slice::from_ref(&f.set), &f.locals, &f.cache()).await.unwrap();
    assert_eq!(reports.len(), 1);
    assert!(f.root().join("a/node_modules/has").exists());
  }
}
