//! Dependency materialization.
//!
//! Two phases, run after reconciliation:
//!
//! 1. [`download`]: every distinct registry package referenced by any
//!    lockfile is fetched once and extracted into the shared cache.
//! 2. [`materialize`]: each project's `node_modules` is populated with links,
//!    workspace packages pointing at their source directory and external
//!    packages pointing at their cache entry.
//!
//! # Cache Layout
//!
//! ```text
//! <cache>/
//! ├── has-1.0.3/
//! │   ├── package.json
//! │   ├── .wharf-complete
//! │   └── node_modules/function-bind -> ../../function-bind-1.1.2
//! └── @babel+core-7.24.0/
//! ```
//!
//! An entry only counts as present once its completion marker exists, so an
//! interrupted extraction is redone on the next run.

mod download;
mod link;

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::registry::RegistryError;

pub use download::{CACHE_COMPLETE_MARKER, CacheTarget, DownloadReport, collect_targets, download};
pub use link::{LinkReport, link_set, materialize};

/// Per-project dependency directory.
pub const DEPS_DIR_NAME: &str = "node_modules";

/// Executable directory inside [`DEPS_DIR_NAME`].
pub const BIN_DIR_NAME: &str = ".bin";

/// Errors that can occur while fetching or linking dependencies.
#[derive(Debug, Error)]
pub enum MaterializeError {
  /// Fetching a package failed (after the automatic retry).
  #[error("failed to fetch '{name}@{version}': {source}")]
  Fetch {
    name: String,
    version: String,
    #[source]
    source: RegistryError,
  },

  /// A tarball could not be unpacked.
  #[error("failed to extract '{url}': {source}")]
  Extract {
    url: String,
    #[source]
    source: io::Error,
  },

  /// A tarball entry would land outside its cache entry.
  #[error("archive '{url}' contains unsafe path '{path}'")]
  UnsafePath { url: String, path: PathBuf },

  /// A declared dependency has no lockfile entry.
  #[error("'{key}' is declared by '{dir}' but missing from its lockfile")]
  Unlocked { dir: PathBuf, key: String },

  /// A filesystem operation failed.
  #[error("I/O error at '{path}': {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  /// A background task panicked or was cancelled.
  #[error("materialization task failed: {0}")]
  Task(#[from] tokio::task::JoinError),
}

/// Stable directory name of a package inside the shared cache.
///
/// Scoped names keep their `@` and replace the `/` so every entry is a
/// direct child of the cache directory.
pub fn cache_entry_name(name: &str, version: &str) -> String {
  format!("{}-{}", name.replace('/', "+"), version)
}

/// Path of a package's cache entry.
pub fn cache_entry(cache_dir: &Path, name: &str, version: &str) -> PathBuf {
  cache_dir.join(cache_entry_name(name, version))
}

/// Real package name behind a lockfile key, following `npm:` aliases.
pub(crate) fn real_name<'a>(name: &'a str, range: &'a str) -> &'a str {
  match range.strip_prefix("npm:") {
    Some(target) => crate::lockfile::split_key(target).0,
    None => name,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn entry_names_are_flat() {
    assert_eq!(cache_entry_name("has", "1.0.3"), "has-1.0.3");
    assert_eq!(cache_entry_name("@babel/core", "7.24.0"), "@babel+core-7.24.0");
  }

  #[test]
  fn aliases_use_target_name() {
    assert_eq!(real_name("my-has", "npm:has@^1.0.0"), "has");
    assert_eq!(real_name("my-core", "npm:@babel/core@^7.0.0"), "@babel/core");
    assert_eq!(real_name("has", "^1.0.0"), "has");
  }
}
