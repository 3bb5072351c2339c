//! Workspace version policy.
//!
//! With `versionPolicy.lockAll`, every external package must be declared with
//! the same range by every project that uses it, apart from the listed
//! exceptions. Without it, only the listed packages are held to that rule.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::Serialize;

use super::GraphError;
use crate::manifest::DepType;
use crate::workspace::{Project, VersionPolicy};

/// An external package declared with more than one range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyViolation {
  pub name: String,
  /// Range -> names of the projects declaring it.
  pub ranges: BTreeMap<String, BTreeSet<String>>,
}

impl std::fmt::Display for PolicyViolation {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let ranges: Vec<String> = self
      .ranges
      .iter()
      .map(|(range, projects)| {
        let projects: Vec<&str> = projects.iter().map(String::as_str).collect();
        format!("{} ({})", range, projects.join(", "))
      })
      .collect();
    write!(f, "{}: {}", self.name, ranges.join(" vs "))
  }
}

/// Collect every policy violation across `projects`.
pub fn check_policy(projects: &[Project], policy: &VersionPolicy) -> Vec<PolicyViolation> {
  let locals: HashSet<&str> = projects.iter().map(|p| p.name()).collect();
  let mut declared: BTreeMap<String, BTreeMap<String, BTreeSet<String>>> = BTreeMap::new();

  for project in projects {
    for dep_type in [
      DepType::Dependencies,
      DepType::DevDependencies,
      DepType::OptionalDependencies,
    ] {
      for (name, range) in project.manifest.section(dep_type) {
        if locals.contains(name.as_str()) || !policy.applies_to(name) {
          continue;
        }
        declared
          .entry(name.clone())
          .or_default()
          .entry(range.clone())
          .or_default()
          .insert(project.name().to_string());
      }
    }
  }

  declared
    .into_iter()
    .filter(|(_, ranges)| ranges.len() > 1)
    .map(|(name, ranges)| PolicyViolation { name, ranges })
    .collect()
}

/// Fail with [`GraphError::PolicyMismatch`] when the policy is violated.
pub fn enforce_policy(projects: &[Project], policy: &VersionPolicy) -> Result<(), GraphError> {
  let violations = check_policy(projects, policy);
  if violations.is_empty() {
    return Ok(());
  }
  let details = violations.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ");
  Err(GraphError::PolicyMismatch { details })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::graph::testutil::project;

  fn lock_all() -> VersionPolicy {
    VersionPolicy {
      lock_all: true,
      exceptions: Vec::new(),
    }
  }

  #[test]
  fn consistent_ranges_pass() {
    let projects = vec![
      project("a", "1.0.0", &[("react", "^18.0.0")]),
      project("b", "1.0.0", &[("react", "^18.0.0")]),
    ];
    assert!(check_policy(&projects, &lock_all()).is_empty());
  }

  #[test]
  fn conflicting_ranges_are_reported() {
    let projects = vec![
      project("a", "1.0.0", &[("react", "^18.0.0")]),
      project("b", "1.0.0", &[("react", "^17.0.0")]),
    ];
    let violations = check_policy(&projects, &lock_all());
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].to_string(), "react: ^17.0.0 (b) vs ^18.0.0 (a)");
    assert!(matches!(
      enforce_policy(&projects, &lock_all()),
      Err(GraphError::PolicyMismatch { .. })
    ));
  }

  #[test]
  fn exceptions_and_locals_are_skipped() {
    let projects = vec![
      project("a", "1.0.0", &[("typescript", "^5.0.0"), ("c", "^1.0.0")]),
      project("b", "1.0.0", &[("typescript", "^4.0.0"), ("c", "1.0.0")]),
      project("c", "1.0.0", &[]),
    ];
    let policy = VersionPolicy {
      lock_all: true,
      exceptions: vec!["typescript".to_string()],
    };
    assert!(check_policy(&projects, &policy).is_empty());
  }

  #[test]
  fn default_policy_checks_nothing() {
    let projects = vec![
      project("a", "1.0.0", &[("react", "^18.0.0")]),
      project("b", "1.0.0", &[("react", "^17.0.0")]),
    ];
    assert!(check_policy(&projects, &VersionPolicy::default()).is_empty());
  }
}
