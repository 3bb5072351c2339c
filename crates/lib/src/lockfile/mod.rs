//! Lockfile management (`yarn.lock`, v1 format).
//!
//! The lockfile pins every declared `name@range` to a resolved version and
//! download locator. It sits next to the project manifest and must stay
//! byte-compatible with the format other package managers read and write.
//!
//! # Lockfile Format
//!
//! ```text
//! # THIS IS AN AUTOGENERATED FILE. DO NOT EDIT THIS FILE DIRECTLY.
//! # yarn lockfile v1
//!
//!
//! has@1.0.3, has@^1.0.0:
//!   version "1.0.3"
//!   resolved "https://registry.yarnpkg.com/has/-/has-1.0.3.tgz#722d7cbfc1f6aa8241f16dd814e011e1f41e8796"
//!   dependencies:
//!     function-bind "^1.1.1"
//! ```
//!
//! Several keys share one block when they resolve to the same entry. In memory
//! that sharing is an [`Arc`]: keys pointing at the same allocation are
//! written as one block, so [`Lockfile::normalize_identities`] must run before
//! saving whenever entries were assembled from different sources.

mod parse;
mod stringify;

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::util::fs::atomic_write;

pub use parse::parse;
pub use stringify::stringify;

/// Per-project lockfile.
pub const LOCKFILE_FILENAME: &str = "yarn.lock";

/// Errors that can occur when working with lockfiles.
#[derive(Debug, Error)]
pub enum LockfileError {
  /// Failed to read the lockfile.
  #[error("failed to read lockfile '{path}': {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  /// The lockfile text is malformed.
  #[error("failed to parse lockfile '{path}' at line {line}: {message}")]
  Parse { path: PathBuf, line: usize, message: String },

  /// Failed to write the lockfile.
  #[error("failed to write lockfile '{path}': {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// One resolved package.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockEntry {
  pub version: String,
  /// Download locator: a tarball URL, usually with `#<sha1>` appended, or a
  /// `file:` path for workspace packages.
  pub resolved: String,
  /// Subresource integrity string (`sha512-...`).
  pub integrity: Option<String>,
  pub dependencies: BTreeMap<String, String>,
  pub optional_dependencies: BTreeMap<String, String>,
  /// Other scalar fields, preserved as read.
  pub extra: BTreeMap<String, String>,
}

impl LockEntry {
  /// Every (name, range) this entry depends on, optional ones included.
  pub fn all_dependencies(&self) -> impl DoubleEndedIterator<Item = (&String, &String)> {
    self.dependencies.iter().chain(self.optional_dependencies.iter())
  }

  /// Whether this entry points at a workspace package.
  pub fn is_local(&self) -> bool {
    self.resolved.starts_with("file:")
  }

  /// Tarball URL without the `#hash` suffix.
  pub fn tarball_url(&self) -> &str {
    self.resolved.split('#').next().unwrap_or(&self.resolved)
  }
}

/// Split a lockfile key (`name@range`) into its name and range.
///
/// The separator is the first `@` after position zero so scoped names keep
/// their leading `@`.
pub fn split_key(key: &str) -> (&str, &str) {
  match key.char_indices().skip(1).find(|&(_, c)| c == '@') {
    Some((i, _)) => (&key[..i], &key[i + 1..]),
    None => (key, ""),
  }
}

/// Build a lockfile key.
pub fn make_key(name: &str, range: &str) -> String {
  format!("{}@{}", name, range)
}

/// A parsed lockfile.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Lockfile {
  entries: BTreeMap<String, Arc<LockEntry>>,
}

impl Lockfile {
  /// Create an empty lockfile.
  pub fn new() -> Self {
    Self::default()
  }

  /// Path of the lockfile inside a project directory.
  pub fn path_in(dir: &Path) -> PathBuf {
    dir.join(LOCKFILE_FILENAME)
  }

  /// Load the lockfile of the project in `dir`.
  ///
  /// A missing lockfile is an empty one.
  pub fn load(dir: &Path) -> Result<Self, LockfileError> {
    let path = Self::path_in(dir);
    let content = match fs::read_to_string(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::new()),
      Err(source) => return Err(LockfileError::Read { path, source }),
    };
    parse(&content).map_err(|(line, message)| LockfileError::Parse { path, line, message })
  }

  /// Write the lockfile into `dir` if its text changed.
  ///
  /// An empty lockfile is not created where none existed. Returns whether a
  /// write happened.
  pub fn save(&self, dir: &Path) -> Result<bool, LockfileError> {
    let path = Self::path_in(dir);
    let existing = fs::read_to_string(&path).ok();
    if existing.is_none() && self.is_empty() {
      return Ok(false);
    }
    let content = stringify(self);
    if existing.as_deref() == Some(content.as_str()) {
      return Ok(false);
    }
    atomic_write(&path, content.as_bytes()).map_err(|source| LockfileError::Write {
      path: path.clone(),
      source,
    })?;
    debug!(path = %path.display(), entries = self.len(), "lockfile written");
    Ok(true)
  }

  pub fn get(&self, key: &str) -> Option<&Arc<LockEntry>> {
    self.entries.get(key)
  }

  pub fn contains(&self, key: &str) -> bool {
    self.entries.contains_key(key)
  }

  pub fn insert(&mut self, key: String, entry: Arc<LockEntry>) {
    self.entries.insert(key, entry);
  }

  pub fn remove(&mut self, key: &str) -> Option<Arc<LockEntry>> {
    self.entries.remove(key)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Keys in sorted order.
  pub fn keys(&self) -> impl Iterator<Item = &String> {
    self.entries.keys()
  }

  /// Entries in key order.
  pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<LockEntry>)> {
    self.entries.iter()
  }

  /// Make every key resolving to the same `{name, version}` share one entry.
  ///
  /// The canonical entry is the one under the smallest key. Returns the
  /// number of keys that were repointed.
  pub fn normalize_identities(&mut self) -> usize {
    let mut canonical: HashMap<(String, String), Arc<LockEntry>> = HashMap::new();
    let mut repointed = 0;
    for (key, entry) in self.entries.iter_mut() {
      let (name, _) = split_key(key);
      let identity = (name.to_string(), entry.version.clone());
      match canonical.get(&identity) {
        Some(shared) if !Arc::ptr_eq(shared, entry) => {
          *entry = Arc::clone(shared);
          repointed += 1;
        }
        Some(_) => {}
        None => {
          canonical.insert(identity, Arc::clone(entry));
        }
      }
    }
    repointed
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  pub(super) const SAMPLE: &str = r#"# THIS IS AN AUTOGENERATED FILE. DO NOT EDIT THIS FILE DIRECTLY.
# yarn lockfile v1


"@babel/code-frame@^7.0.0", "@babel/code-frame@^7.10.4":
  version "7.12.13"
  resolved "https://registry.yarnpkg.com/@babel/code-frame/-/code-frame-7.12.13.tgz#dcfc826beef65e75c50e21d3837d7d95798dd658"
  integrity sha512-HV1Cm0Q3ZrpCR93tkWOYiuYIgLxZXZFVG2VgK+MBWjUqZTundupbfx2aXarXuw5Ko5aMcjtJgbSs4vUGBS5v6g==
  dependencies:
    "@babel/highlight" "^7.12.13"

function-bind@^1.1.1:
  version "1.1.1"
  resolved "https://registry.yarnpkg.com/function-bind/-/function-bind-1.1.1.tgz#a56899d3ea3c9bab874bb9773b7c5ede92f4895d"
  integrity sha512-yIovAzMX49sF8Yl58fSCWJ5svSLuaibPxXQJFLmBObTuCr0Mf1KiPopGM9NiFjiYBCbfaa2Fh6breQ6ANVTI0A==

has@1.0.3:
  version "1.0.3"
  resolved "https://registry.yarnpkg.com/has/-/has-1.0.3.tgz#722d7cbfc1f6aa8241f16dd814e011e1f41e8796"
  integrity sha512-f2dvO0VU6Oej7RkWJGrehjbzMAjFp5/VKPp5tTpWIV4JHHZK1/BxbFRtf/siA2SWTe09caDmVtYYzWEIbBS4zg==
  dependencies:
    function-bind "^1.1.1"
"#;

  fn entry(version: &str) -> Arc<LockEntry> {
    Arc::new(LockEntry {
      version: version.to_string(),
      resolved: format!("https://registry.example/x-{}.tgz", version),
      ..Default::default()
    })
  }

  mod keys {
    use super::*;

    #[test]
    fn splits_plain_and_scoped() {
      assert_eq!(split_key("has@1.0.3"), ("has", "1.0.3"));
      assert_eq!(split_key("@babel/core@^7.0.0"), ("@babel/core", "^7.0.0"));
      assert_eq!(split_key("alias@npm:real@^1.0.0"), ("alias", "npm:real@^1.0.0"));
      assert_eq!(split_key("bare"), ("bare", ""));
    }
  }

  mod identities {
    use super::*;

    #[test]
    fn collapses_same_name_and_version() {
      let mut lockfile = Lockfile::new();
      lockfile.insert("x@^1.0.0".to_string(), entry("1.2.0"));
      lockfile.insert("x@~1.2.0".to_string(), entry("1.2.0"));
      lockfile.insert("x@^2.0.0".to_string(), entry("2.0.0"));

      assert_eq!(lockfile.normalize_identities(), 1);
      assert!(Arc::ptr_eq(
        lockfile.get("x@^1.0.0").unwrap(),
        lockfile.get("x@~1.2.0").unwrap()
      ));
      assert_eq!(lockfile.normalize_identities(), 0);
    }

    #[test]
    fn different_names_stay_apart() {
      let mut lockfile = Lockfile::new();
      lockfile.insert("x@^1.0.0".to_string(), entry("1.0.0"));
      lockfile.insert("y@^1.0.0".to_string(), entry("1.0.0"));
      assert_eq!(lockfile.normalize_identities(), 0);
    }
  }

  mod persistence {
    use super::*;

    #[test]
    fn missing_file_is_empty() {
      let temp = TempDir::new().unwrap();
      let lockfile = Lockfile::load(temp.path()).unwrap();
      assert!(lockfile.is_empty());
      assert!(!lockfile.save(temp.path()).unwrap());
      assert!(!Lockfile::path_in(temp.path()).exists());
    }

    #[test]
    fn unchanged_lockfile_is_not_rewritten() {
      let temp = TempDir::new().unwrap();
      fs::write(Lockfile::path_in(temp.path()), SAMPLE).unwrap();

      let lockfile = Lockfile::load(temp.path()).unwrap();
      assert_eq!(lockfile.len(), 4);
      assert!(!lockfile.save(temp.path()).unwrap());
    }

    #[test]
    fn malformed_lockfile_reports_line() {
      let temp = TempDir::new().unwrap();
      fs::write(Lockfile::path_in(temp.path()), "has@1.0.3:\n  version\n").unwrap();
      match Lockfile::load(temp.path()) {
        Err(LockfileError::Parse { line, .. }) => assert_eq!(line, 2),
        other => panic!("expected parse error, got {:?}", other),
      }
    }
  }
}
