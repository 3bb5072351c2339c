//! Fanning project scripts out to CI nodes and local worker pools.

use std::path::PathBuf;

use tracing::info;

use super::install::install_dirs;
use super::{ActionError, Context};
use crate::graph::topological_order;
use crate::platform::available_cores;
use crate::scheduler::{
  ClusterError, ClusterReport, ClusterScheduler, DepsetJob, GroupInstaller, Job, ScriptLauncher, group_by_depsets,
  plan_groups,
};
use crate::workspace::Workspace;

/// Workspace-local state directory; job logs go to its `logs` child.
const STATE_DIR_NAME: &str = ".wharf";

/// One job per project defining `scripts.<action>`, in dependency order.
pub fn each_jobs(workspace: &Workspace, action: &str, args: &[String]) -> Vec<Job> {
  topological_order(&workspace.projects)
    .into_iter()
    .filter(|p| p.manifest.scripts.contains_key(action))
    .map(|p| Job::new(p.dir.clone(), action).with_args(args.to_vec()))
    .collect()
}

/// Split the jobs for `actions` across `node_count` CI nodes.
pub fn plan(workspace: &Workspace, actions: &[String], node_count: usize) -> Vec<Vec<Job>> {
  let jobs = actions
    .iter()
    .flat_map(|action| each_jobs(workspace, action, &[]))
    .collect();
  plan_groups(jobs, node_count)
}

/// Installs every project of a group through the regular install pipeline.
pub struct WorkspaceInstaller<'a> {
  ctx: &'a Context,
}

impl<'a> WorkspaceInstaller<'a> {
  pub fn new(ctx: &'a Context) -> Self {
    Self { ctx }
  }
}

impl GroupInstaller for WorkspaceInstaller<'_> {
  async fn install(&self, group: &[Job]) -> Result<(), ClusterError> {
    let mut dirs: Vec<PathBuf> = Vec::new();
    for job in group {
      if !dirs.contains(&job.dir) {
        dirs.push(job.dir.clone());
      }
    }
    install_dirs(self.ctx, &dirs)
      .await
      .map(|_| ())
      .map_err(|e| ClusterError::Install {
        dir: dirs.first().cloned().unwrap_or_default(),
        message: e.to_string(),
      })
  }
}

/// Run `jobs` on a local worker pool, batching projects whose dependency
/// sets are compatible so each batch installs once.
///
/// Every job must name a workspace project defining the job's script. Job
/// failures are collected in the report, never returned as errors.
pub async fn batch(ctx: &Context, jobs: Vec<Job>, workers: Option<usize>) -> Result<ClusterReport, ActionError> {
  let workspace = &ctx.workspace;
  let mut with_depsets = Vec::with_capacity(jobs.len());
  for job in jobs {
    let project = workspace.resolve_project(&job.dir)?;
    if !project.manifest.scripts.contains_key(&job.action) {
      return Err(ActionError::MissingScript {
        project: project.name().to_string(),
        script: job.action,
      });
    }
    let job = Job {
      dir: project.dir.clone(),
      ..job
    };
    with_depsets.push(DepsetJob {
      job,
      depset: project.manifest.depset(),
    });
  }

  let groups = group_by_depsets(with_depsets);
  let workers = workers.or(workspace.config.workers).unwrap_or_else(available_cores);
  info!(groups = groups.len(), workers, "scheduling jobs");

  let log_dir = workspace.root.join(STATE_DIR_NAME).join("logs");
  let scheduler = ClusterScheduler::new(ScriptLauncher, &log_dir).with_workers(workers);
  Ok(scheduler.run(groups, &WorkspaceInstaller::new(ctx)).await?)
}

/// Run `action` in every project that defines it.
pub async fn each(
  ctx: &Context,
  action: &str,
  args: &[String],
  workers: Option<usize>,
) -> Result<ClusterReport, ActionError> {
  let jobs = each_jobs(&ctx.workspace, action, args);
  batch(ctx, jobs, workers).await
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::manifest::{DepType, PackageManifest};
  use crate::workspace::testutil::write_workspace;
  use tempfile::TempDir;

  fn context(manifests: &[PackageManifest]) -> (TempDir, Context) {
    let temp = TempDir::new().unwrap();
    write_workspace(temp.path(), manifests);
    let mut workspace = Workspace::load(temp.path()).unwrap();
    workspace.config.cache_dir = Some(temp.path().join("cache"));
    let ctx = Context::new(workspace).unwrap();
    (temp, ctx)
  }

  fn project_names(jobs: &[Job]) -> Vec<String> {
    jobs
      .iter()
      .filter_map(|j| j.dir.file_name())
      .map(|n| n.to_string_lossy().to_string())
      .collect()
  }

  mod planning {
    use super::*;

    #[test]
    fn only_projects_with_the_script() {
      let (_temp, ctx) = context(&[
        PackageManifest::new("a", "1.0.0")
          .with_dep(DepType::Dependencies, "b", "^1.0.0")
          .with_script("test", "true"),
        PackageManifest::new("b", "1.0.0").with_script("test", "true"),
        PackageManifest::new("c", "1.0.0").with_script("lint", "true"),
      ]);
      let jobs = each_jobs(&ctx.workspace, "test", &["--ci".to_string()]);
      assert_eq!(project_names(&jobs), vec!["b", "a"]);
      assert!(jobs.iter().all(|j| j.args == vec!["--ci"]));
    }

    #[test]
    fn plan_spreads_over_nodes() {
      let (_temp, ctx) = context(&[
        PackageManifest::new("a", "1.0.0")
          .with_script("test", "true")
          .with_script("lint", "true"),
        PackageManifest::new("b", "1.0.0").with_script("test", "true"),
      ]);
      let actions = vec!["test".to_string(), "lint".to_string()];
      let nodes = plan(&ctx.workspace, &actions, 3);
      assert_eq!(nodes.len(), 3);
      assert!(nodes.iter().all(|n| !n.is_empty()));
    }
  }

  #[cfg(unix)]
  mod running {
    use super::*;

    #[tokio::test]
    async fn failures_are_reported_not_raised() {
      let (temp, ctx) = context(&[
        PackageManifest::new("good", "1.0.0").with_script("test", "true"),
        PackageManifest::new("bad", "1.0.0").with_script("test", "echo broken; exit 1"),
      ]);
      let report = each(&ctx, "test", &[], Some(2)).await.unwrap();

      assert_eq!(report.total(), 2);
      assert_eq!(project_names(&report.passed), vec!["good"]);
      assert_eq!(report.failed.len(), 1);
      assert!(report.failed[0].detail.contains("broken"));
      assert!(temp.path().join(STATE_DIR_NAME).join("logs").is_dir());
    }

    #[tokio::test]
    async fn missing_script_fails_fast() {
      let (temp, ctx) = context(&[PackageManifest::new("a", "1.0.0")]);
      let job = Job::new(temp.path().join("packages/a"), "test");
      let err = batch(&ctx, vec![job], Some(1)).await.unwrap_err();
      assert!(matches!(err, ActionError::MissingScript { .. }));
    }
  }
}
