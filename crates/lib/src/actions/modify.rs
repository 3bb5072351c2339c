//! Manifest mutations followed by an install.

use std::path::Path;

use super::install::{InstallOptions, InstallReport, run_install};
use super::{ActionError, Context, scope};
use crate::manifest::DepType;
use crate::reconcile::Intent;

/// Declare `name` in `target`'s `dep_type` section and install.
///
/// Without a range, the newest published version (or the workspace
/// package's own version) is pinned as `^<version>`.
pub async fn add(
  ctx: &Context,
  target: &Path,
  name: &str,
  range: Option<&str>,
  dep_type: DepType,
) -> Result<InstallReport, ActionError> {
  let project = ctx.workspace.resolve_project(target)?.dir.clone();
  let intent = Intent::Add {
    name: name.to_string(),
    range: range.map(str::to_string),
    dep_type,
  };
  let dirs = scope(&ctx.workspace, Some(&project))?;
  run_install(ctx, dirs, &intent, Some(vec![project]), InstallOptions::default()).await
}

/// Drop `name` from every section of `target` and install.
pub async fn remove(ctx: &Context, target: &Path, name: &str) -> Result<InstallReport, ActionError> {
  let project = ctx.workspace.resolve_project(target)?.dir.clone();
  let intent = Intent::Remove { name: name.to_string() };
  let dirs = scope(&ctx.workspace, Some(&project))?;
  run_install(ctx, dirs, &intent, Some(vec![project]), InstallOptions::default()).await
}

/// Move `name` to `range` in `target` (or every project), optionally only
/// where the declared range intersects `from`.
pub async fn upgrade(
  ctx: &Context,
  target: Option<&Path>,
  name: &str,
  range: Option<&str>,
  from: Option<&str>,
) -> Result<InstallReport, ActionError> {
  let intent = Intent::Upgrade {
    name: name.to_string(),
    range: range.map(str::to_string),
    from: from.map(str::to_string),
  };
  let (dirs, intent_dirs) = match target {
    Some(reference) => {
      let project = ctx.workspace.resolve_project(reference)?.dir.clone();
      (scope(&ctx.workspace, Some(&project))?, Some(vec![project]))
    }
    None => (scope(&ctx.workspace, None)?, None),
  };
  run_install(ctx, dirs, &intent, intent_dirs, InstallOptions::default()).await
}

/// Move `name` to `range` (newest when absent) in every project declaring it,
/// updating lockfiles only.
pub async fn greenkeep(ctx: &Context, name: &str, range: Option<&str>) -> Result<InstallReport, ActionError> {
  let intent = Intent::Upgrade {
    name: name.to_string(),
    range: range.map(str::to_string),
    from: None,
  };
  let options = InstallOptions {
    frozen: false,
    skip_link: true,
  };
  run_install(ctx, scope(&ctx.workspace, None)?, &intent, None, options).await
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::actions::update_lockfiles;
  use crate::manifest::PackageManifest;
  use crate::registry::testutil::{FAKE_REGISTRY, FakeResolver};
  use crate::workspace::Workspace;
  use crate::workspace::testutil::write_workspace;
  use std::path::PathBuf;
  use std::sync::Arc;
  use tempfile::TempDir;

  fn setup(manifests: &[PackageManifest]) -> (TempDir, Workspace) {
    let temp = TempDir::new().unwrap();
    write_workspace(temp.path(), manifests);
    let workspace = Workspace::load(temp.path()).unwrap();
    (temp, workspace)
  }

  fn resolver() -> Arc<FakeResolver> {
    Arc::new(
      FakeResolver::new()
        .publish("react", "17.0.2", &[])
        .publish("react", "18.2.0", &[]),
    )
  }

  fn dir(ws: &Workspace, name: &str) -> PathBuf {
    ws.project_named(name).unwrap().dir.clone()
  }

  #[tokio::test]
  async fn add_touches_only_the_target() {
    let (_temp, ws) = setup(&[
      PackageManifest::new("a", "1.0.0").with_dep(DepType::Dependencies, "b", "^1.0.0"),
      PackageManifest::new("b", "1.0.0"),
    ]);
    let intent = Intent::Add {
      name: "react".to_string(),
      range: None,
      dep_type: DepType::DevDependencies,
    };
    let dirs = scope(&ws, Some(Path::new("a"))).unwrap();
    let sets = update_lockfiles(&ws, &dirs, &intent, Some(vec![dir(&ws, "a")]), false, resolver(), FAKE_REGISTRY)
      .await
      .unwrap();

    let a = sets.iter().find(|s| s.manifest.name == "a").unwrap();
    let b = sets.iter().find(|s| s.manifest.name == "b").unwrap();
    assert_eq!(a.manifest.dev_dependencies.get("react").unwrap(), "^18.2.0");
    assert!(b.manifest.dev_dependencies.is_empty());
  }

  #[tokio::test]
  async fn workspace_wide_upgrade_respects_from() {
    let (_temp, ws) = setup(&[
      PackageManifest::new("a", "1.0.0").with_dep(DepType::Dependencies, "react", "^17.0.0"),
      PackageManifest::new("b", "1.0.0").with_dep(DepType::Dependencies, "react", "~16.0.0"),
    ]);
    let intent = Intent::Upgrade {
      name: "react".to_string(),
      range: Some("^18.0.0".to_string()),
      from: Some("^17.0.0".to_string()),
    };
    let dirs = scope(&ws, None).unwrap();
    let resolver = Arc::new(
      FakeResolver::new()
        .publish("react", "16.0.1", &[])
        .publish("react", "17.0.2", &[])
        .publish("react", "18.2.0", &[]),
    );
    let sets = update_lockfiles(&ws, &dirs, &intent, None, false, resolver, FAKE_REGISTRY)
      .await
      .unwrap();

    let a = sets.iter().find(|s| s.manifest.name == "a").unwrap();
    let b = sets.iter().find(|s| s.manifest.name == "b").unwrap();
    assert_eq!(a.manifest.dependencies.get("react").unwrap(), "^18.0.0");
    assert_eq!(b.manifest.dependencies.get("react").unwrap(), "~16.0.0");
  }

  #[tokio::test]
  async fn invalid_name_mutates_nothing() {
    let (temp, ws) = setup(&[PackageManifest::new("a", "1.0.0")]);
    let ctx = Context::new(ws).unwrap();
    let before = std::fs::read_to_string(temp.path().join("packages/a/package.json")).unwrap();

    let err = remove(&ctx, Path::new("a"), "not valid").await.unwrap_err();
    assert_eq!(err.kind(), crate::actions::ErrorKind::Validation);
    let after = std::fs::read_to_string(temp.path().join("packages/a/package.json")).unwrap();
    assert_eq!(before, after);
    assert!(!temp.path().join("packages/a/yarn.lock").exists());
  }
}
