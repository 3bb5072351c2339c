use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Package name -> version range.
pub type DependencyMap = BTreeMap<String, String>;

/// A dependency section of a manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DepType {
  Dependencies,
  DevDependencies,
  PeerDependencies,
  OptionalDependencies,
  Resolutions,
}

impl DepType {
  pub const ALL: [DepType; 5] = [
    DepType::Dependencies,
    DepType::DevDependencies,
    DepType::PeerDependencies,
    DepType::OptionalDependencies,
    DepType::Resolutions,
  ];

  /// Sections that contribute to a project's depset, in precedence order.
  pub const INSTALLABLE: [DepType; 4] = [
    DepType::Dependencies,
    DepType::DevDependencies,
    DepType::OptionalDependencies,
    DepType::PeerDependencies,
  ];

  /// JSON key of the section.
  pub fn key(&self) -> &'static str {
    match self {
      DepType::Dependencies => "dependencies",
      DepType::DevDependencies => "devDependencies",
      DepType::PeerDependencies => "peerDependencies",
      DepType::OptionalDependencies => "optionalDependencies",
      DepType::Resolutions => "resolutions",
    }
  }
}

impl fmt::Display for DepType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.key())
  }
}

impl FromStr for DepType {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    DepType::ALL
      .into_iter()
      .find(|t| t.key() == s)
      .ok_or_else(|| format!("unknown dependency type '{}'", s))
  }
}

/// One flattened manifest declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepEntry {
  pub name: String,
  pub range: String,
  pub dep_type: DepType,
}

impl DepEntry {
  /// The lockfile key for this declaration (`name@range`).
  pub fn key(&self) -> String {
    format!("{}@{}", self.name, self.range)
  }
}

/// Package name targeted by a `resolutions` key.
///
/// The trailing path segment names the package; a scoped package keeps its
/// `@scope/` prefix. `**/a/@s/b` -> `@s/b`, `webpack/terser` -> `terser`.
pub fn effective_resolution_name(key: &str) -> String {
  let segments: Vec<&str> = key.split('/').collect();
  match segments.as_slice() {
    [.., scope, name] if scope.starts_with('@') => format!("{}/{}", scope, name),
    [.., name] => name.to_string(),
    [] => key.to_string(),
  }
}
