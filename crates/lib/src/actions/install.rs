//! Installing dependencies: reconcile, persist, download, link.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use super::{ActionError, Context, scope, validate};
use crate::materialize::{self, DownloadReport, LinkReport, collect_targets, download};
use crate::reconcile::{Intent, ReconcileOptions, VersionSet, reconcile};
use crate::registry::Resolver;
use crate::workspace::Workspace;

/// Install settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstallOptions {
  /// Fail instead of changing any lockfile.
  pub frozen: bool,
  /// Only reconcile lockfiles; skip downloading and linking.
  pub skip_link: bool,
}

/// What an install did.
#[derive(Debug, Clone, Default)]
pub struct InstallReport {
  /// Projects covered, dependencies first.
  pub projects: Vec<PathBuf>,
  /// Projects whose manifest or lockfile was rewritten.
  pub written: Vec<PathBuf>,
  pub download: DownloadReport,
  pub links: Vec<LinkReport>,
}

impl InstallReport {
  /// Dependency links created or re-pointed across all projects.
  pub fn linked(&self) -> usize {
    self.links.iter().map(|l| l.linked).sum()
  }
}

/// Reconcile the version sets of `dirs` under `intent`.
///
/// `intent_dirs` limits which manifests the intent touches. Nothing is
/// written.
pub async fn update_lockfiles<R: Resolver + 'static>(
  workspace: &Workspace,
  dirs: &[PathBuf],
  intent: &Intent,
  intent_dirs: Option<Vec<PathBuf>>,
  frozen: bool,
  resolver: Arc<R>,
  registry: &str,
) -> Result<Vec<VersionSet>, ActionError> {
  let sets = dirs
    .iter()
    .map(|dir| VersionSet::load(dir, registry))
    .collect::<Result<Vec<_>, _>>()?;

  let mut options = ReconcileOptions::for_locals(workspace.locals());
  options.frozen = frozen;
  if let Some(intent_dirs) = intent_dirs {
    options = options.with_intent_dirs(intent_dirs);
  }
  Ok(reconcile(sets, intent, &options, resolver).await?)
}

/// Persist every set, returning the directories that changed on disk.
pub(crate) fn save_all(sets: &[VersionSet]) -> Result<Vec<PathBuf>, ActionError> {
  let mut written = Vec::new();
  for set in sets {
    if set.save()? {
      info!(project = %set.dir.display(), "updated manifest and lockfile");
      written.push(set.dir.clone());
    }
  }
  Ok(written)
}

/// Reconcile, persist and materialize `dirs`.
pub(crate) async fn run_install(
  ctx: &Context,
  dirs: Vec<PathBuf>,
  intent: &Intent,
  intent_dirs: Option<Vec<PathBuf>>,
  options: InstallOptions,
) -> Result<InstallReport, ActionError> {
  let workspace = &ctx.workspace;
  validate(workspace)?;

  let sets = update_lockfiles(
    workspace,
    &dirs,
    intent,
    intent_dirs,
    options.frozen,
    Arc::clone(ctx.client()),
    ctx.registry(),
  )
  .await?;
  let written = if options.frozen { Vec::new() } else { save_all(&sets)? };

  let mut report = InstallReport {
    projects: dirs,
    written,
    ..Default::default()
  };
  if options.skip_link {
    return Ok(report);
  }

  let cache_dir = workspace.cache_dir();
  let targets = collect_targets(sets.iter().map(|s| (&s.lockfile, &s.registry)));
  report.download = download(ctx.client(), &cache_dir, targets).await?;
  report.links = materialize::materialize(&sets, &workspace.locals(), &cache_dir).await?;

  info!(
    projects = report.projects.len(),
    fetched = report.download.fetched,
    linked = report.linked(),
    "install complete"
  );
  Ok(report)
}

/// Install the graph of `target`, or every project.
pub async fn install(
  ctx: &Context,
  target: Option<&Path>,
  options: InstallOptions,
) -> Result<InstallReport, ActionError> {
  let dirs = scope(&ctx.workspace, target)?;
  run_install(ctx, dirs, &Intent::None, None, options).await
}

/// Install exactly the projects in `dirs` plus their dependency graphs.
pub(crate) async fn install_dirs(ctx: &Context, dirs: &[PathBuf]) -> Result<InstallReport, ActionError> {
  let mut seen = HashSet::new();
  let mut covered = Vec::new();
  for dir in dirs {
    for dep in scope(&ctx.workspace, Some(dir))? {
      if seen.insert(dep.clone()) {
        covered.push(dep);
      }
    }
  }
  run_install(ctx, covered, &Intent::None, None, InstallOptions::default()).await
}

/// Reconcile every project together so shared packages collapse onto the
/// newest version satisfying all ranges. Lockfiles only.
pub async fn dedupe(ctx: &Context) -> Result<InstallReport, ActionError> {
  let dirs = scope(&ctx.workspace, None)?;
  let options = InstallOptions {
    frozen: false,
    skip_link: true,
  };
  run_install(ctx, dirs, &Intent::None, None, options).await
}
