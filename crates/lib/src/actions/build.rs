//! Checksum-aware builds in dependency order.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::{ActionError, Context, scope, validate};
use crate::checksum::ChecksumCache;
use crate::graph::{dependents, direct_dependencies};
use crate::util::cmd::run_script;
use crate::workspace::Project;

/// Script run for each project.
const BUILD_SCRIPT: &str = "build";

/// Projects built and skipped, in graph order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
  pub built: Vec<PathBuf>,
  pub skipped: Vec<PathBuf>,
}

/// Build `target`'s graph (or every project), dependencies first.
///
/// A project is skipped when its contents still match the checksum cache and
/// none of its workspace dependencies changed in this run. A project whose
/// digest changes invalidates every project depending on it. Projects without
/// a build script only have their digest tracked. The cache is saved even
/// when a build fails.
pub async fn build(ctx: &Context, target: Option<&Path>, cache: &ChecksumCache) -> Result<BuildReport, ActionError> {
  validate(&ctx.workspace)?;
  let dirs = scope(&ctx.workspace, target)?;

  let mut report = BuildReport::default();
  let result = build_all(ctx, &dirs, cache, &mut report).await;
  cache.save().await?;
  result?;

  info!(built = report.built.len(), skipped = report.skipped.len(), "build complete");
  Ok(report)
}

async fn build_all(
  ctx: &Context,
  dirs: &[PathBuf],
  cache: &ChecksumCache,
  report: &mut BuildReport,
) -> Result<(), ActionError> {
  let projects = &ctx.workspace.projects;
  let mut changed: HashSet<PathBuf> = HashSet::new();

  for dir in dirs {
    let Some(project) = ctx.workspace.project(dir) else {
      continue;
    };
    let upstream_changed = direct_dependencies(projects, project)
      .iter()
      .any(|dep| changed.contains(&dep.dir));
    if !upstream_changed && cache.is_cached(dir).await? {
      debug!(project = project.name(), "build is up to date");
      report.skipped.push(dir.clone());
      continue;
    }

    run_build(project).await?;
    if cache.update(dir).await? {
      for dependent in dependents(projects, dir) {
        cache.invalidate(&dependent.dir).await;
      }
      changed.insert(dir.clone());
    }
    report.built.push(dir.clone());
  }
  Ok(())
}

async fn run_build(project: &Project) -> Result<(), ActionError> {
  let Some(script) = project.manifest.scripts.get(BUILD_SCRIPT) else {
    debug!(project = project.name(), "no build script, tracking digest only");
    return Ok(());
  };

  info!(project = project.name(), "building");
  let failed = |detail: String| ActionError::BuildFailed {
    project: project.name().to_string(),
    detail,
  };
  match run_script(script, &[], &project.dir).await {
    Ok(Some(0)) => Ok(()),
    Ok(Some(code)) => Err(failed(format!("exited with code {}", code))),
    Ok(None) => Err(failed("terminated by signal".to_string())),
    Err(e) => Err(failed(e.to_string())),
  }
}
