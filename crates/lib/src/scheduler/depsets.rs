//! Batching jobs that can share one dependency installation.

use std::cmp::Reverse;

use tracing::debug;

use super::{Job, WorkGroup};
use crate::manifest::DependencyMap;
use crate::range;

/// A job together with the depset of its project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepsetJob {
  pub job: Job,
  pub depset: DependencyMap,
}

/// Whether an installation made for `base` also serves `candidate`.
///
/// Every candidate name must be present in the base. Two semver ranges must
/// intersect; anything else (tags, aliases, URLs) must match exactly.
pub fn is_compatible_subset(candidate: &DependencyMap, base: &DependencyMap) -> bool {
  candidate.iter().all(|(name, range)| match base.get(name) {
    None => false,
    Some(base_range) if range::is_valid(range) && range::is_valid(base_range) => {
      range::intersects(range, base_range)
    }
    Some(base_range) => base_range == range,
  })
}

/// Partition `jobs` into groups, each led by the job with the largest depset.
///
/// The first remaining job (by descending depset size) becomes a group's base
/// and pulls in every remaining job compatible with it; the rest is grouped
/// the same way.
pub fn group_by_depsets(mut jobs: Vec<DepsetJob>) -> Vec<WorkGroup> {
  jobs.sort_by_key(|j| Reverse(j.depset.len()));

  let mut groups = Vec::new();
  let mut remaining = jobs.into_iter();
  while let Some(base) = remaining.next() {
    let (members, rest): (Vec<DepsetJob>, Vec<DepsetJob>) =
      remaining.partition(|candidate| is_compatible_subset(&candidate.depset, &base.depset));

    let mut group = Vec::with_capacity(members.len() + 1);
    group.push(base.job);
    group.extend(members.into_iter().map(|m| m.job));
    debug!(base = %group[0], size = group.len(), "depset group formed");
    groups.push(group);

    remaining = rest.into_iter();
  }
  groups
}

#[cfg(test)]
mod tests {
  use super::*;
  use proptest::prelude::*;

  fn depset(entries: &[(&str, &str)]) -> DependencyMap {
    entries.iter().map(|(n, r)| (n.to_string(), r.to_string())).collect()
  }

  fn job(dir: &str, entries: &[(&str, &str)]) -> DepsetJob {
    DepsetJob {
      job: Job::new(dir, "test"),
      depset: depset(entries),
    }
  }

  mod subset {
    use super::*;

    #[test]
    fn intersecting_ranges_are_compatible() {
      let base = depset(&[("react", "^18.0.0"), ("lodash", "^4.17.0")]);
      assert!(is_compatible_subset(&depset(&[("react", "^18.2.0")]), &base));
      assert!(is_compatible_subset(&depset(&[]), &base));
    }

    #[test]
    fn disjoint_or_missing_are_not() {
      let base = depset(&[("react", "^18.0.0")]);
      assert!(!is_compatible_subset(&depset(&[("react", "^17.0.0")]), &base));
      assert!(!is_compatible_subset(&depset(&[("vue", "^3.0.0")]), &base));
    }

    #[test]
    fn non_semver_needs_exact_match() {
      let base = depset(&[("x", "npm:y@^1.0.0"), ("z", "latest")]);
      assert!(is_compatible_subset(&depset(&[("x", "npm:y@^1.0.0")]), &base));
      assert!(!is_compatible_subset(&depset(&[("z", "^1.0.0")]), &base));
    }
  }

  mod grouping {
    use super::*;

    #[test]
    fn largest_depset_leads() {
      let groups = group_by_depsets(vec![
        job("/ws/small", &[("react", "^18.0.0")]),
        job("/ws/big", &[("react", "^18.0.0"), ("lodash", "^4.0.0")]),
        job("/ws/other", &[("react", "^17.0.0")]),
      ]);

      assert_eq!(groups.len(), 2);
      assert_eq!(groups[0][0].dir.to_str(), Some("/ws/big"));
      assert_eq!(groups[0][1].dir.to_str(), Some("/ws/small"));
      assert_eq!(groups[1][0].dir.to_str(), Some("/ws/other"));
    }
  }

  fn arb_depset() -> impl Strategy<Value = DependencyMap> {
    let names = prop::sample::select(vec!["a", "b", "c", "d"]);
    let ranges = prop::sample::select(vec!["^1.0.0", "^2.0.0", "~1.2.0", "latest", "*"]);
    prop::collection::btree_map(names.prop_map(String::from), ranges.prop_map(String::from), 0..4)
  }

  proptest! {
    #[test]
    fn partitions_exactly(depsets in prop::collection::vec(arb_depset(), 0..12)) {
      let jobs: Vec<DepsetJob> = depsets
        .into_iter()
        .enumerate()
        .map(|(i, depset)| DepsetJob { job: Job::new(format!("/ws/p{}", i), "test"), depset })
        .collect();
      let mut expected: Vec<Job> = jobs.iter().map(|j| j.job.clone()).collect();

      let mut grouped: Vec<Job> = group_by_depsets(jobs).into_iter().flatten().collect();
      grouped.sort();
      expected.sort();
      prop_assert_eq!(grouped, expected);
    }

    #[test]
    fn subset_is_reflexive(depset in arb_depset()) {
      prop_assert!(is_compatible_subset(&depset, &depset));
    }
  }
}
