//! Workspace-wide index of resolved packages.
//!
//! Built once every version set has finished its own resolution passes, the
//! index lets a version resolved for one project be reused by its siblings.
//! Candidates for a name are ordered non-alias first, then newest version
//! first, so picking the first eligible candidate converges the workspace on
//! the newest version each range admits.

use std::collections::HashMap;
use std::sync::Arc;

use semver::Version;
use tracing::warn;

use crate::lockfile::{LockEntry, Lockfile, split_key};
use crate::range::{self, Range};
use crate::registry::is_served_by;

/// One lockfile entry visible to the whole workspace.
#[derive(Debug, Clone)]
pub struct IndexEntry {
  pub key: String,
  pub range: String,
  pub entry: Arc<LockEntry>,
  pub is_alias: bool,
  version: Option<Version>,
}

/// Name -> sorted candidates.
#[derive(Debug, Default)]
pub struct GlobalIndex {
  by_name: HashMap<String, Vec<IndexEntry>>,
}

impl GlobalIndex {
  /// Index every registry entry of `lockfiles`. Workspace (`file:`) entries are skipped.
  pub fn build<'a>(lockfiles: impl IntoIterator<Item = &'a Lockfile>) -> Self {
    let mut by_name: HashMap<String, Vec<IndexEntry>> = HashMap::new();
    for lockfile in lockfiles {
      for (key, entry) in lockfile.iter() {
        if entry.is_local() {
          continue;
        }
        let (name, range) = split_key(key);
        by_name.entry(name.to_string()).or_default().push(IndexEntry {
          key: key.clone(),
          range: range.to_string(),
          entry: Arc::clone(entry),
          is_alias: range::is_alias(range),
          version: Version::parse(&entry.version).ok(),
        });
      }
    }

    for candidates in by_name.values_mut() {
      candidates.sort_by(|a, b| {
        a.is_alias
          .cmp(&b.is_alias)
          .then_with(|| b.version.cmp(&a.version))
          .then_with(|| a.key.cmp(&b.key))
      });
    }
    Self { by_name }
  }

  /// All candidates for `name`, in preference order.
  pub fn candidates(&self, name: &str) -> &[IndexEntry] {
    self.by_name.get(name).map(Vec::as_slice).unwrap_or(&[])
  }

  /// Pick the entry `name@range` should use.
  ///
  /// Aliases and non-semver ranges only reuse an entry recorded under the
  /// exact same range. Semver ranges take any non-alias entry whose version
  /// satisfies them. Among eligible entries, the first one served from
  /// `registry` wins; when none is, the first eligible entry is used anyway.
  pub fn pick(&self, name: &str, range: &str, registry: &str) -> Option<&IndexEntry> {
    let semver_range = if range::is_alias(range) {
      None
    } else {
      Range::parse(range).ok()
    };

    let mut eligible = self.candidates(name).iter().filter(|c| match &semver_range {
      Some(req) => !c.is_alias && c.version.as_ref().is_some_and(|v| req.matches(v)),
      None => c.range == range,
    });

    let first = eligible.next()?;
    if is_served_by(registry, &first.entry.resolved) {
      return Some(first);
    }
    if let Some(matching) = eligible.find(|c| is_served_by(registry, &c.entry.resolved)) {
      return Some(matching);
    }
    warn!(
      name,
      range,
      registry,
      resolved = %first.entry.resolved,
      "no candidate from the configured registry, using best available"
    );
    Some(first)
  }
}
