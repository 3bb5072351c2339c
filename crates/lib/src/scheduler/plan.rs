//! Splitting jobs across execution nodes.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::debug;

use super::Job;

/// Assign `jobs` to `node_count` nodes.
///
/// Jobs of one project stay together. Projects are placed largest first on
/// whichever node holds the fewest jobs; afterwards every empty node takes
/// one job from the busiest node holding more than one. Each node's list is
/// sorted so reruns produce the same plan.
pub fn plan_groups(jobs: Vec<Job>, node_count: usize) -> Vec<Vec<Job>> {
  if node_count == 0 {
    return Vec::new();
  }

  let mut by_project: BTreeMap<PathBuf, Vec<Job>> = BTreeMap::new();
  for job in jobs {
    by_project.entry(job.dir.clone()).or_default().push(job);
  }
  let mut projects: Vec<Vec<Job>> = by_project.into_values().collect();
  // Stable: equal sizes keep directory order.
  projects.sort_by_key(|group| Reverse(group.len()));

  let mut nodes: Vec<Vec<Job>> = vec![Vec::new(); node_count];
  for group in projects {
    let lightest = (0..node_count).min_by_key(|&i| (nodes[i].len(), i)).unwrap_or(0);
    nodes[lightest].extend(group);
  }
  for node in &mut nodes {
    node.sort();
  }

  while let Some(empty) = nodes.iter().position(Vec::is_empty) {
    let donor = (0..node_count)
      .filter(|&i| nodes[i].len() > 1)
      .max_by_key(|&i| (nodes[i].len(), Reverse(i)));
    let Some(donor) = donor else {
      break;
    };
    if let Some(job) = nodes[donor].pop() {
      debug!(from = donor, to = empty, job = %job, "rebalanced job onto empty node");
      nodes[empty].push(job);
    }
  }
  nodes
}
