//! Implementation of `wharf batch` and `wharf each`.

use std::fs;
use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result, bail};

use wharf_lib::actions::{batch, each};
use wharf_lib::scheduler::{ClusterReport, Job};

use super::{load_context, runtime};
use crate::output::{cluster_lines, emit};

/// Run the jobs listed in `file`: a job array, or a plan (array of job
/// arrays) when `node` picks one of its entries.
pub fn cmd_batch(cwd: &Path, file: &Path, node: Option<usize>, workers: Option<usize>) -> Result<()> {
  let content = fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))?;
  let jobs: Vec<Job> = match node {
    Some(index) => {
      let nodes: Vec<Vec<Job>> =
        serde_json::from_str(&content).with_context(|| format!("Failed to parse plan {}", file.display()))?;
      let count = nodes.len();
      match nodes.into_iter().nth(index) {
        Some(jobs) => jobs,
        None => bail!("plan has {} node(s), no node {}", count, index),
      }
    }
    None => serde_json::from_str(&content).with_context(|| format!("Failed to parse jobs {}", file.display()))?,
  };

  let ctx = load_context(cwd)?;
  let rt = runtime()?;
  let started = Instant::now();
  let report = rt.block_on(batch(&ctx, jobs, workers)).context("Batch failed")?;
  summarize(&report, started)
}

/// Run `action` in every project defining it.
pub fn cmd_each(cwd: &Path, action: &str, args: &[String], workers: Option<usize>) -> Result<()> {
  let ctx = load_context(cwd)?;
  let rt = runtime()?;
  let started = Instant::now();
  let report = rt
    .block_on(each(&ctx, action, args, workers))
    .with_context(|| format!("Failed to run '{}'", action))?;
  summarize(&report, started)
}

fn summarize(report: &ClusterReport, started: Instant) -> Result<()> {
  emit(&cluster_lines(report, started.elapsed()));
  if !report.is_success() {
    bail!("{} of {} jobs failed", report.failed.len(), report.total());
  }
  Ok(())
}
