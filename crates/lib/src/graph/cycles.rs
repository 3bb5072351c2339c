//! Cycle detection among workspace projects.

use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::Path;

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::Serialize;
use tracing::warn;

use super::{GraphError, local_dependency};
use crate::workspace::Project;

/// A closed dependency loop among workspace projects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cycle {
  /// Every project caught in the loop, sorted by name.
  pub members: Vec<String>,
  /// One concrete loop, first name repeated at the end (`a -> b -> a`).
  pub chain: Vec<String>,
}

impl std::fmt::Display for Cycle {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.chain.join(" -> "))
  }
}

/// Find every dependency cycle among `projects`.
///
/// Each strongly connected component with more than one project, or a project
/// depending on itself, is one cycle. Results are sorted by member names.
pub fn detect_cycles(projects: &[Project]) -> Vec<Cycle> {
  let mut graph: DiGraph<usize, ()> = DiGraph::new();
  let nodes: Vec<NodeIndex> = (0..projects.len()).map(|i| graph.add_node(i)).collect();
  let index_of: HashMap<&Path, usize> =
    projects.iter().enumerate().map(|(i, p)| (p.dir.as_path(), i)).collect();

  for (i, project) in projects.iter().enumerate() {
    for (name, range) in project.manifest.local_candidates() {
      if let Some(dep) = local_dependency(projects, name, range)
        && let Some(&j) = index_of.get(dep.dir.as_path())
      {
        graph.update_edge(nodes[i], nodes[j], ());
      }
    }
  }

  let mut seen: BTreeSet<Vec<String>> = BTreeSet::new();
  let mut cycles = Vec::new();
  for component in tarjan_scc(&graph) {
    let self_loop = component.len() == 1 && graph.contains_edge(component[0], component[0]);
    if component.len() < 2 && !self_loop {
      continue;
    }

    let mut members: Vec<String> = component
      .iter()
      .map(|&n| projects[graph[n]].name().to_string())
      .collect();
    members.sort();
    if !seen.insert(members.clone()) {
      continue;
    }

    let chain = loop_through(&graph, &component, projects);
    cycles.push(Cycle { members, chain });
  }

  cycles.sort_by(|a, b| a.members.cmp(&b.members));
  for cycle in &cycles {
    warn!(chain = %cycle, "dependency cycle");
  }
  cycles
}

/// Fail with [`GraphError::Cycle`] when any cycle exists.
pub fn ensure_acyclic(projects: &[Project]) -> Result<(), GraphError> {
  let cycles = detect_cycles(projects);
  if cycles.is_empty() {
    return Ok(());
  }
  let chains = cycles.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ");
  Err(GraphError::Cycle { chains })
}

/// Shortest loop inside `component` starting at its alphabetically first member.
fn loop_through(graph: &DiGraph<usize, ()>, component: &[NodeIndex], projects: &[Project]) -> Vec<String> {
  let name = |n: NodeIndex| projects[graph[n]].name().to_string();
  let Some(&start) = component.iter().min_by_key(|&&n| name(n)) else {
    return Vec::new();
  };

  let mut parent: HashMap<NodeIndex, NodeIndex> = HashMap::new();
  let mut queue = VecDeque::from([start]);
  let mut closing = None;
  while let Some(node) = queue.pop_front() {
    let mut next: Vec<NodeIndex> = graph.neighbors(node).filter(|n| component.contains(n)).collect();
    next.sort_by_key(|&n| name(n));
    for neighbor in next {
      if neighbor == start {
        closing = Some(node);
        break;
      }
      if let Entry::Vacant(entry) = parent.entry(neighbor) {
        entry.insert(node);
        queue.push_back(neighbor);
      }
    }
    if closing.is_some() {
      break;
    }
  }

  let mut path = vec![start];
  let mut cursor = closing;
  while let Some(node) = cursor
    && node != start
  {
    path.push(node);
    cursor = parent.get(&node).copied();
  }
  path[1..].reverse();
  path.push(start);
  path.into_iter().map(name).collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::graph::testutil::project;

  #[test]
  fn acyclic_set_has_no_cycles() {
    let projects = vec![
      project("a", "1.0.0", &[("b", "^1.0.0")]),
      project("b", "1.0.0", &[("c", "^1.0.0")]),
      project("c", "1.0.0", &[]),
    ];
    assert!(detect_cycles(&projects).is_empty());
    assert!(ensure_acyclic(&projects).is_ok());
  }

  #[test]
  fn mutual_dependency_is_one_cycle() {
    let projects = vec![
      project("a", "1.0.0", &[("b", "^1.0.0")]),
      project("b", "1.0.0", &[("a", "^1.0.0")]),
    ];
    let cycles = detect_cycles(&projects);
    assert_eq!(cycles.len(), 1);
    assert_eq!(cycles[0].members, vec!["a", "b"]);
    assert_eq!(cycles[0].chain, vec!["a", "b", "a"]);
  }

  #[test]
  fn three_way_cycle_contains_all() {
    let projects = vec![
      project("a", "1.0.0", &[("b", "^1.0.0")]),
      project("b", "1.0.0", &[("c", "^1.0.0")]),
      project("c", "1.0.0", &[("a", "^1.0.0")]),
      project("d", "1.0.0", &[("a", "^1.0.0")]),
    ];
    let cycles = detect_cycles(&projects);
    assert_eq!(cycles.len(), 1);
    assert_eq!(cycles[0].members, vec!["a", "b", "c"]);
    assert_eq!(cycles[0].to_string(), "a -> b -> c -> a");
  }

  #[test]
  fn self_dependency_is_a_cycle() {
    let projects = vec![project("a", "1.0.0", &[("a", "^1.0.0")])];
    let cycles = detect_cycles(&projects);
    assert_eq!(cycles.len(), 1);
    assert_eq!(cycles[0].chain, vec!["a", "a"]);
  }

  #[test]
  fn unsatisfied_range_breaks_the_loop() {
    let projects = vec![
      project("a", "1.0.0", &[("b", "^1.0.0")]),
      project("b", "1.0.0", &[("a", "^2.0.0")]),
    ];
    assert!(detect_cycles(&projects).is_empty());
  }

  #[test]
  fn error_lists_chain() {
    let projects = vec![
      project("a", "1.0.0", &[("b", "^1.0.0")]),
      project("b", "1.0.0", &[("a", "^1.0.0")]),
    ];
    let err = ensure_acyclic(&projects).unwrap_err();
    assert!(err.to_string().contains("a -> b -> a"));
  }
}
