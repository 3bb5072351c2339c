//! Package registry access.
//!
//! Reconciliation only needs one question answered: "which concrete package
//! does `name@range` resolve to?". [`Resolver`] is that seam. The production
//! implementation is [`RegistryClient`], which speaks the npm registry HTTP
//! protocol; tests substitute an in-memory resolver.

mod client;
mod config;

use std::collections::BTreeMap;
use std::future::Future;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::lockfile::LockEntry;

pub use client::{Packument, RegistryClient};
pub use config::{DEFAULT_REGISTRY, RegistryConfig, is_served_by, npmrc_path};

/// Errors that can occur while talking to a registry.
#[derive(Debug, Error)]
pub enum RegistryError {
  /// The HTTP request failed.
  #[error("request to '{url}' failed: {source}")]
  Request {
    url: String,
    #[source]
    source: reqwest::Error,
  },

  /// The registry answered with a non-success status.
  #[error("request to '{url}' returned HTTP {status}")]
  Status { url: String, status: u16 },

  /// No published version satisfies the range.
  #[error("no version of '{name}' satisfies '{range}'")]
  NoMatch { name: String, range: String },

  /// The range is neither semver, a dist-tag nor an `npm:` alias.
  #[error("unsupported range '{range}' for '{name}'")]
  UnsupportedRange { name: String, range: String },

  /// Downloaded content does not match its recorded integrity.
  #[error("integrity check failed for '{url}'")]
  Integrity { url: String },

  /// Failed to read an `.npmrc`.
  #[error("failed to read '{path}': {source}")]
  Config {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

impl RegistryError {
  /// Whether retrying the same request might succeed.
  pub fn is_transient(&self) -> bool {
    match self {
      RegistryError::Request { .. } | RegistryError::Integrity { .. } => true,
      RegistryError::Status { status, .. } => *status >= 500 || *status == 429,
      _ => false,
    }
  }
}

/// A concrete package chosen for a `name@range` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPackage {
  /// Real package name (differs from the requested one for aliases).
  pub name: String,
  pub version: String,
  /// Tarball URL with `#<shasum>` appended.
  pub resolved: String,
  pub integrity: Option<String>,
  pub dependencies: BTreeMap<String, String>,
  pub optional_dependencies: BTreeMap<String, String>,
}

impl ResolvedPackage {
  /// Convert into a lockfile entry.
  pub fn to_entry(&self) -> LockEntry {
    LockEntry {
      version: self.version.clone(),
      resolved: self.resolved.clone(),
      integrity: self.integrity.clone(),
      dependencies: self.dependencies.clone(),
      optional_dependencies: self.optional_dependencies.clone(),
      extra: BTreeMap::new(),
    }
  }
}

/// Resolves `name@range` requests to concrete packages.
pub trait Resolver: Send + Sync {
  /// Pick the package `range` selects for `name`, asking the registry
  /// `config` assigns to it.
  ///
  /// `range` may be a semver range, a dist-tag (`latest`, empty for latest),
  /// or an alias (`npm:real-name@^1.0.0`).
  fn resolve(
    &self,
    config: &RegistryConfig,
    name: &str,
    range: &str,
  ) -> impl Future<Output = Result<ResolvedPackage, RegistryError>> + Send;
}

#[cfg(test)]
pub(crate) mod testutil {
  //! In-memory resolver for reconciliation tests.

  use std::collections::BTreeMap;
  use std::sync::Mutex;

  use super::*;
  use crate::range::{self, Range};

  pub const FAKE_REGISTRY: &str = "https://registry.test";

  /// A fake registry holding published versions and their dependencies.
  #[derive(Default)]
  pub struct FakeResolver {
    packages: BTreeMap<String, Vec<(String, BTreeMap<String, String>)>>,
    pub calls: Mutex<Vec<String>>,
  }

  impl FakeResolver {
    pub fn new() -> Self {
      Self::default()
    }

    pub fn publish(mut self, name: &str, version: &str, deps: &[(&str, &str)]) -> Self {
      let deps = deps.iter().map(|(n, r)| (n.to_string(), r.to_string())).collect();
      self
        .packages
        .entry(name.to_string())
        .or_default()
        .push((version.to_string(), deps));
      self
    }

    pub fn call_count(&self) -> usize {
      self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }
  }

  impl Resolver for FakeResolver {
    async fn resolve(&self, config: &RegistryConfig, name: &str, range: &str) -> Result<ResolvedPackage, RegistryError> {
      if let Ok(mut calls) = self.calls.lock() {
        calls.push(format!("{}@{}", name, range));
      }
      let no_match = || RegistryError::NoMatch {
        name: name.to_string(),
        range: range.to_string(),
      };
      let versions = self.packages.get(name).ok_or_else(no_match)?;
      let parsed: Vec<(semver::Version, &BTreeMap<String, String>)> = versions
        .iter()
        .filter_map(|(v, deps)| semver::Version::parse(v).ok().map(|v| (v, deps)))
        .collect();

      let chosen = if range::is_unpinned(range) {
        parsed.iter().max_by(|a, b| a.0.cmp(&b.0))
      } else {
        let req = Range::parse(range).map_err(|_| no_match())?;
        parsed.iter().filter(|(v, _)| req.matches(v)).max_by(|a, b| a.0.cmp(&b.0))
      };
      let (version, deps) = chosen.ok_or_else(no_match)?;

      Ok(ResolvedPackage {
        name: name.to_string(),
        version: version.to_string(),
        resolved: format!("{}/{}/-/{}-{}.tgz#0000", config.registry_for(name), name, name, version),
        integrity: None,
        dependencies: (*deps).clone(),
        optional_dependencies: BTreeMap::new(),
      })
    }
  }
}
