//! Implementation of `wharf plan`.
//!
//! Prints one job list per CI node. Job directories are relative to the
//! workspace root so a plan produced on one machine runs on another through
//! `wharf batch --node <i>`.

use std::path::Path;

use anyhow::Result;

use wharf_lib::actions::plan;
use wharf_lib::scheduler::Job;
use wharf_lib::util::fs::relative_path;

use super::load_context;
use crate::output::{emit, plan_lines, print_json};

pub fn cmd_plan(cwd: &Path, actions: &[String], nodes: usize, json: bool) -> Result<()> {
  let ctx = load_context(cwd)?;
  let root = &ctx.workspace.root;

  let planned: Vec<Vec<Job>> = plan(&ctx.workspace, actions, nodes)
    .into_iter()
    .map(|node| {
      node
        .into_iter()
        .map(|job| Job {
          dir: relative_path(root, &job.dir),
          ..job
        })
        .collect()
    })
    .collect();

  if json {
    return print_json(&planned);
  }
  emit(&plan_lines(&planned));
  Ok(())
}
