//! Scratch resolution of entries missing from a lockfile.
//!
//! Only what is genuinely absent is resolved: the requested keys and, level by
//! level, any dependency key of a newly resolved package that the lockfile
//! does not hold yet. Each level is resolved concurrently.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::ReconcileError;
use crate::lockfile::{LockEntry, Lockfile, make_key};
use crate::registry::{RegistryConfig, Resolver};

/// One `name@range` to resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub name: String,
  pub range: String,
  /// Optional requests that fail to resolve are skipped.
  pub optional: bool,
}

impl Request {
  pub fn new(name: &str, range: &str, optional: bool) -> Self {
    Self {
      name: name.to_string(),
      range: range.to_string(),
      optional,
    }
  }

  pub fn key(&self) -> String {
    make_key(&self.name, &self.range)
  }
}

/// Dependency keys referenced by entries but absent as keys.
pub fn dangling(lockfile: &Lockfile) -> Vec<Request> {
  let mut seen = HashSet::new();
  let mut missing = Vec::new();
  for (_, entry) in lockfile.iter() {
    let required = entry.dependencies.iter().map(|d| (d, false));
    let optional = entry.optional_dependencies.iter().map(|d| (d, true));
    for ((name, range), optional) in required.chain(optional) {
      let key = make_key(name, range);
      if !lockfile.contains(&key) && seen.insert(key) {
        missing.push(Request::new(name, range, optional));
      }
    }
  }
  missing
}

/// Resolve `requests` and their missing transitive dependencies into `lockfile`.
///
/// Keys already present are never re-resolved. Returns the entries resolved
/// for the top-level requests, in request order.
pub async fn resolve_into<R: Resolver + 'static>(
  resolver: &Arc<R>,
  registry: &Arc<RegistryConfig>,
  lockfile: &mut Lockfile,
  requests: Vec<Request>,
) -> Result<Vec<(Request, Arc<LockEntry>)>, ReconcileError> {
  let mut queued: HashSet<String> = HashSet::new();
  let mut pending: Vec<Request> = requests
    .iter()
    .filter(|r| !lockfile.contains(&r.key()) && queued.insert(r.key()))
    .cloned()
    .collect();
  if pending.is_empty() {
    return Ok(Vec::new());
  }
  debug!(count = pending.len(), "scratch resolving missing entries");

  while !pending.is_empty() {
    let mut join_set = JoinSet::new();
    for request in pending.drain(..) {
      let resolver = Arc::clone(resolver);
      let registry = Arc::clone(registry);
      join_set.spawn(async move {
        let result = resolver.resolve(&registry, &request.name, &request.range).await;
        (request, result)
      });
    }

    let mut next = Vec::new();
    while let Some(joined) = join_set.join_next().await {
      let (request, result) = joined?;
      let package = match result {
        Ok(package) => package,
        Err(e) if request.optional => {
          warn!(key = %request.key(), error = %e, "skipping optional dependency");
          continue;
        }
        Err(source) => {
          return Err(ReconcileError::Registry {
            key: request.key(),
            source,
          });
        }
      };

      let entry = Arc::new(package.to_entry());
      let required = entry.dependencies.iter().map(|d| (d, false));
      let optional = entry.optional_dependencies.iter().map(|d| (d, true));
      for ((name, range), optional) in required.chain(optional) {
        let key = make_key(name, range);
        if !lockfile.contains(&key) && queued.insert(key) {
          next.push(Request::new(name, range, optional));
        }
      }
      lockfile.insert(request.key(), entry);
    }
    pending = next;
  }

  Ok(
    requests
      .into_iter()
      .filter_map(|r| lockfile.get(&r.key()).cloned().map(|e| (r, e)))
      .collect(),
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::registry::testutil::{FAKE_REGISTRY, FakeResolver};

  fn config() -> Arc<RegistryConfig> {
    Arc::new(RegistryConfig::with_registry(FAKE_REGISTRY))
  }

  fn registry() -> Arc<FakeResolver> {
    Arc::new(
      FakeResolver::new()
        .publish("has", "1.0.3", &[("function-bind", "^1.1.1")])
        .publish("function-bind", "1.1.1", &[])
        .publish("function-bind", "1.1.2", &[]),
    )
  }

  #[tokio::test]
  async fn resolves_request_and_closure() {
    let resolver = registry();
    let mut lockfile = Lockfile::new();

    let resolved = resolve_into(&resolver, &config(), &mut lockfile, vec![Request::new("has", "1.0.3", false)])
      .await
      .unwrap();

    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].1.version, "1.0.3");
    assert_eq!(lockfile.get("function-bind@^1.1.1").unwrap().version, "1.1.2");
    assert_eq!(resolver.call_count(), 2);
  }

  #[tokio::test]
  async fn present_keys_are_not_resolved_again() {
    let resolver = registry();
    let mut lockfile = Lockfile::new();
    lockfile.insert(
      "function-bind@^1.1.1".to_string(),
      Arc::new(LockEntry {
        version: "1.1.1".to_string(),
        ..Default::default()
      }),
    );

    resolve_into(&resolver, &config(), &mut lockfile, vec![Request::new("has", "1.0.3", false)])
      .await
      .unwrap();
    assert_eq!(resolver.call_count(), 1);
    assert_eq!(lockfile.get("function-bind@^1.1.1").unwrap().version, "1.1.1");
  }

  #[tokio::test]
  async fn failures_surface_with_key() {
    let resolver = registry();
    let mut lockfile = Lockfile::new();
    let err = resolve_into(&resolver, &config(), &mut lockfile, vec![Request::new("nope", "^1.0.0", false)])
      .await
      .unwrap_err();
    assert!(matches!(err, ReconcileError::Registry { ref key, .. } if key == "nope@^1.0.0"));
  }

  #[tokio::test]
  async fn optional_failures_are_skipped() {
    let resolver = registry();
    let mut lockfile = Lockfile::new();
    let resolved = resolve_into(&resolver, &config(), &mut lockfile, vec![Request::new("fsevents", "^2.0.0", true)])
      .await
      .unwrap();
    assert!(resolved.is_empty());
    assert!(lockfile.is_empty());
  }

  #[test]
  fn finds_dangling_dependency_keys() {
    let mut lockfile = Lockfile::new();
    lockfile.insert(
      "has@1.0.3".to_string(),
      Arc::new(LockEntry {
        version: "1.0.3".to_string(),
        dependencies: [("function-bind".to_string(), "^1.1.1".to_string())].into(),
        ..Default::default()
      }),
    );
    let missing = dangling(&lockfile);
    assert_eq!(missing, vec![Request::new("function-bind", "^1.1.1", false)]);
  }
}
