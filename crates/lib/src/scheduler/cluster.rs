//! Running work groups through a pool of worker processes.
//!
//! # Protocol
//!
//! For each group the scheduler installs dependencies once, then drains the
//! group's [`JobQueue`] through at most `workers` concurrent workers:
//!
//! 1. A worker is spawned and handed exactly one job over a oneshot channel.
//! 2. The worker launches the job as a child process whose output goes to a
//!    per-job log, waits for it to exit, and reports on the completion channel.
//! 3. On completion the scheduler records the outcome (attaching the log to
//!    failures) and spawns a replacement worker if jobs remain.
//! 4. When the group is drained every remaining worker is killed.
//!
//! A failing job never stops the run. Failures from all groups end up in one
//! [`ClusterReport`].

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use thiserror::Error;
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{Job, WorkGroup};
use crate::manifest::PackageManifest;
use crate::platform::available_cores;
use crate::util::cmd::script_command;

/// Longest log excerpt attached to a failure.
const MAX_LOG_EXCERPT: usize = 16 * 1024;

/// Errors that stop the scheduler itself (job failures never do).
#[derive(Debug, Error)]
pub enum ClusterError {
  #[error("failed to create log directory '{path}': {source}")]
  LogDir {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  /// Installing a group's dependencies failed.
  #[error("failed to install dependencies for '{dir}': {message}")]
  Install { dir: PathBuf, message: String },
}

/// Starts a job as a child process.
pub trait JobLauncher: Send + Sync + 'static {
  /// Spawn `job`, sending its output to `log`.
  fn launch(&self, job: &Job, log: &Path) -> io::Result<Child>;
}

/// Installs the dependency tree a group shares.
pub trait GroupInstaller: Send + Sync {
  /// Prepare `group[0]`'s dependencies so every job of `group` can run.
  fn install(&self, group: &[Job]) -> impl Future<Output = Result<(), ClusterError>> + Send;
}

/// Runs `scripts.<action>` from the project's manifest.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptLauncher;

impl JobLauncher for ScriptLauncher {
  fn launch(&self, job: &Job, log: &Path) -> io::Result<Child> {
    let manifest = PackageManifest::load(&job.dir).map_err(io::Error::other)?;
    let script = manifest.scripts.get(&job.action).ok_or_else(|| {
      io::Error::new(
        io::ErrorKind::NotFound,
        format!("'{}' has no '{}' script", manifest.name, job.action),
      )
    })?;

    let file = File::create(log)?;
    let mut command = script_command(script, &job.args, &job.dir);
    command
      .stdin(Stdio::null())
      .stdout(Stdio::from(file.try_clone()?))
      .stderr(Stdio::from(file))
      .kill_on_drop(true);
    command.spawn()
  }
}

/// A job that did not pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
  pub job: Job,
  /// Exit status and captured log output.
  pub detail: String,
}

/// Outcome of a scheduler run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterReport {
  pub passed: Vec<Job>,
  pub failed: Vec<JobFailure>,
}

impl ClusterReport {
  pub fn is_success(&self) -> bool {
    self.failed.is_empty()
  }

  pub fn total(&self) -> usize {
    self.passed.len() + self.failed.len()
  }
}

/// Pending jobs of the current group.
#[derive(Debug, Default)]
struct JobQueue {
  jobs: VecDeque<Job>,
}

impl JobQueue {
  fn new(group: WorkGroup) -> Self {
    Self { jobs: group.into() }
  }

  fn next(&mut self) -> Option<Job> {
    self.jobs.pop_front()
  }

  fn len(&self) -> usize {
    self.jobs.len()
  }

  fn is_empty(&self) -> bool {
    self.jobs.is_empty()
  }
}

/// Scheduler side of one worker.
struct WorkerHandle {
  job_tx: Option<oneshot::Sender<Job>>,
  kill_tx: Option<oneshot::Sender<()>>,
  task: JoinHandle<()>,
}

impl WorkerHandle {
  fn assign(&mut self, job: Job) -> Result<(), Job> {
    match self.job_tx.take() {
      Some(tx) => tx.send(job),
      None => Err(job),
    }
  }

  async fn kill(mut self) {
    if let Some(kill) = self.kill_tx.take() {
      let _ = kill.send(());
    }
    let _ = self.task.await;
  }
}

enum Outcome {
  Passed,
  Failed(String),
}

struct Completion {
  worker: usize,
  job: Job,
  /// Absent when the job never started.
  log: Option<PathBuf>,
  outcome: Outcome,
}

/// Runs work groups on a bounded pool of worker processes.
pub struct ClusterScheduler<L: JobLauncher> {
  launcher: Arc<L>,
  log_dir: PathBuf,
  workers: usize,
}

impl<L: JobLauncher> ClusterScheduler<L> {
  /// A scheduler using one worker per available core.
  pub fn new(launcher: L, log_dir: &Path) -> Self {
    Self {
      launcher: Arc::new(launcher),
      log_dir: log_dir.to_path_buf(),
      workers: available_cores(),
    }
  }

  /// Override the worker count (at least one).
  pub fn with_workers(mut self, workers: usize) -> Self {
    self.workers = workers.max(1);
    self
  }

  /// Run every group, never stopping at a failed job or group.
  pub async fn run<I: GroupInstaller>(
    &self,
    groups: Vec<WorkGroup>,
    installer: &I,
  ) -> Result<ClusterReport, ClusterError> {
    tokio::fs::create_dir_all(&self.log_dir)
      .await
      .map_err(|source| ClusterError::LogDir {
        path: self.log_dir.clone(),
        source,
      })?;

    let mut report = ClusterReport::default();
    let mut next_id = 0;
    for (index, group) in groups.into_iter().enumerate() {
      if group.is_empty() {
        continue;
      }
      info!(group = index, jobs = group.len(), base = %group[0], "starting group");

      if let Err(e) = installer.install(&group).await {
        error!(group = index, error = %e, "install failed, failing group");
        let detail = e.to_string();
        report.failed.extend(group.into_iter().map(|job| JobFailure {
          job,
          detail: detail.clone(),
        }));
        continue;
      }

      self.run_group(group, &mut next_id, &mut report).await;
    }

    info!(passed = report.passed.len(), failed = report.failed.len(), "all groups finished");
    Ok(report)
  }

  /// Drain one group. Worker ids come from `next_id`, unique across the run.
  async fn run_group(&self, group: WorkGroup, next_id: &mut usize, report: &mut ClusterReport) {
    let mut queue = JobQueue::new(group);
    let concurrency = self.workers.min(queue.len());
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Completion>();
    let mut workers: HashMap<usize, WorkerHandle> = HashMap::new();

    for _ in 0..concurrency {
      self.start_worker(&mut queue, &mut workers, next_id, &done_tx);
    }

    while !workers.is_empty() {
      let Some(completion) = done_rx.recv().await else {
        break;
      };
      if let Some(handle) = workers.remove(&completion.worker) {
        let _ = handle.task.await;
      }
      record(completion, report).await;

      if !queue.is_empty() {
        self.start_worker(&mut queue, &mut workers, next_id, &done_tx);
      }
    }

    for (id, handle) in workers.drain() {
      debug!(worker = id, "terminating worker");
      handle.kill().await;
    }
  }

  /// Spawn a worker and hand it the next job.
  fn start_worker(
    &self,
    queue: &mut JobQueue,
    workers: &mut HashMap<usize, WorkerHandle>,
    next_id: &mut usize,
    done_tx: &mpsc::UnboundedSender<Completion>,
  ) {
    let Some(job) = queue.next() else {
      return;
    };
    let id = *next_id;
    *next_id += 1;

    let (job_tx, job_rx) = oneshot::channel();
    let (kill_tx, kill_rx) = oneshot::channel();
    let launcher = Arc::clone(&self.launcher);
    let log_dir = self.log_dir.clone();
    let run = worker(id, job_rx, kill_rx, launcher, log_dir, done_tx.clone());
    let task = tokio::spawn(supervise(id, job.clone(), run, done_tx.clone()));

    let mut handle = WorkerHandle {
      job_tx: Some(job_tx),
      kill_tx: Some(kill_tx),
      task,
    };
    if let Err(job) = handle.assign(job) {
      warn!(worker = id, job = %job, "worker unavailable, job requeued");
      queue.jobs.push_front(job);
    }
    workers.insert(id, handle);
  }
}

/// Run a worker, reporting its job as failed if the worker panics.
///
/// Without this the group would wait forever for a completion that never comes.
async fn supervise(
  id: usize,
  job: Job,
  run: impl Future<Output = ()> + Send + 'static,
  done_tx: mpsc::UnboundedSender<Completion>,
) {
  if let Err(e) = tokio::spawn(run).await
    && e.is_panic()
  {
    error!(worker = id, job = %job, "worker panicked");
    let _ = done_tx.send(Completion {
      worker: id,
      job,
      log: None,
      outcome: Outcome::Failed("worker panicked".to_string()),
    });
  }
}

async fn worker<L: JobLauncher>(
  id: usize,
  job_rx: oneshot::Receiver<Job>,
  mut kill_rx: oneshot::Receiver<()>,
  launcher: Arc<L>,
  log_dir: PathBuf,
  done_tx: mpsc::UnboundedSender<Completion>,
) {
  let job = tokio::select! {
    job = job_rx => match job {
      Ok(job) => job,
      Err(_) => return,
    },
    _ = &mut kill_rx => return,
  };

  let log = log_path(&log_dir, id, &job);
  if let Err(e) = tokio::fs::remove_file(&log).await
    && e.kind() != io::ErrorKind::NotFound
  {
    warn!(log = %log.display(), error = %e, "could not clear old log");
  }
  debug!(worker = id, job = %job, log = %log.display(), "job started");
  let (outcome, log) = match launcher.launch(&job, &log) {
    Err(e) => (Outcome::Failed(format!("failed to start: {}", e)), None),
    Ok(mut child) => {
      let outcome = tokio::select! {
        status = child.wait() => match status {
          Ok(status) if status.success() => Outcome::Passed,
          Ok(status) => Outcome::Failed(match status.code() {
            Some(code) => format!("exited with code {}", code),
            None => "terminated by signal".to_string(),
          }),
          Err(e) => Outcome::Failed(format!("failed to wait for job: {}", e)),
        },
        _ = &mut kill_rx => {
          let _ = child.kill().await;
          return;
        }
      };
      (outcome, Some(log))
    }
  };

  let _ = done_tx.send(Completion {
    worker: id,
    job,
    log,
    outcome,
  });
}

async fn record(completion: Completion, report: &mut ClusterReport) {
  match completion.outcome {
    Outcome::Passed => {
      debug!(job = %completion.job, "job passed");
      report.passed.push(completion.job);
    }
    Outcome::Failed(status) => {
      let mut detail = status;
      if let Some(path) = &completion.log
        && let Ok(log) = tokio::fs::read_to_string(path).await
      {
        let log = log.trim_end();
        if !log.is_empty() {
          let start = log.len().saturating_sub(MAX_LOG_EXCERPT);
          let start = (start..log.len()).find(|&i| log.is_char_boundary(i)).unwrap_or(log.len());
          detail.push('\n');
          detail.push_str(&log[start..]);
        }
      }
      warn!(job = %completion.job, "job failed");
      report.failed.push(JobFailure {
        job: completion.job,
        detail,
      });
    }
  }
}

/// Log file for `job` on worker `id`: the project path and action flattened
/// into one file name, prefixed with the worker id so names never collide.
fn log_path(log_dir: &Path, id: usize, job: &Job) -> PathBuf {
  let flat: String = format!("{}-{}", job.dir.display(), job.action)
    .chars()
    .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
    .collect();
  log_dir.join(format!("{}-{}.log", id, flat.trim_start_matches('_')))
}
