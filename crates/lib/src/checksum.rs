//! Build checksum cache.
//!
//! Maps project directories to the digest of their sources at the time of
//! the last successful build, so unchanged projects can skip rebuilding.
//!
//! # Storage Layout
//!
//! ```text
//! <workspace root>/.wharf-checksums.json
//! {
//!   "version": 1,
//!   "entries": { "packages/a": "9f86d0...", "packages/b": "2c26b4..." }
//! }
//! ```
//!
//! Keys are paths relative to the workspace root. The map lives in memory
//! behind an async mutex; [`ChecksumCache::save`] serializes under that lock,
//! so concurrent builders never interleave writes.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::materialize::DEPS_DIR_NAME;
use crate::util::fs::{atomic_write, relative_path};
use crate::util::hash::{ContentHash, DirHashError, hash_directory, hash_file};

/// Current cache file format version.
const CHECKSUM_FILE_VERSION: u32 = 1;

/// Cache file, stored at the workspace root.
const CHECKSUM_FILENAME: &str = ".wharf-checksums.json";

/// Errors that can occur when working with the checksum cache.
#[derive(Debug, Error)]
pub enum ChecksumError {
  #[error("failed to hash '{path}': {source}")]
  Hash {
    path: PathBuf,
    #[source]
    source: DirHashError,
  },

  #[error("failed to read checksum cache '{path}': {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to write checksum cache '{path}': {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("hashing task failed: {0}")]
  Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ChecksumFile {
  version: u32,
  entries: BTreeMap<String, String>,
}

/// Path -> digest map persisted at the workspace root.
#[derive(Debug)]
pub struct ChecksumCache {
  root: PathBuf,
  entries: Mutex<BTreeMap<String, String>>,
}

impl ChecksumCache {
  /// An empty cache for the workspace at `root`.
  pub fn new(root: &Path) -> Self {
    Self {
      root: root.to_path_buf(),
      entries: Mutex::new(BTreeMap::new()),
    }
  }

  /// Load the cache of the workspace at `root`.
  ///
  /// A missing file yields an empty cache. An unreadable or outdated file is
  /// discarded with a warning, since losing it only costs rebuilds.
  pub fn load(root: &Path) -> Result<Self, ChecksumError> {
    let path = root.join(CHECKSUM_FILENAME);
    let content = match std::fs::read_to_string(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::new(root)),
      Err(source) => return Err(ChecksumError::Read { path, source }),
    };

    let entries = match serde_json::from_str::<ChecksumFile>(&content) {
      Ok(file) if file.version == CHECKSUM_FILE_VERSION => file.entries,
      Ok(file) => {
        warn!(path = %path.display(), version = file.version, "unsupported checksum cache version, starting fresh");
        BTreeMap::new()
      }
      Err(e) => {
        warn!(path = %path.display(), error = %e, "corrupt checksum cache, starting fresh");
        BTreeMap::new()
      }
    };
    debug!(path = %path.display(), entries = entries.len(), "loaded checksum cache");
    Ok(Self {
      root: root.to_path_buf(),
      entries: Mutex::new(entries),
    })
  }

  /// Whether `path` still hashes to its stored digest.
  pub async fn is_cached(&self, path: &Path) -> Result<bool, ChecksumError> {
    let key = self.key(path);
    let Some(stored) = self.entries.lock().await.get(&key).cloned() else {
      return Ok(false);
    };
    let current = digest(path).await?;
    Ok(current.0 == stored)
  }

  /// Record the current digest of `path`. Returns whether it differs from the stored one.
  pub async fn update(&self, path: &Path) -> Result<bool, ChecksumError> {
    let current = digest(path).await?;
    let previous = self.entries.lock().await.insert(self.key(path), current.0.clone());
    Ok(previous.as_deref() != Some(current.0.as_str()))
  }

  /// Forget `path`, forcing its next build.
  pub async fn invalidate(&self, path: &Path) -> bool {
    let removed = self.entries.lock().await.remove(&self.key(path)).is_some();
    if removed {
      debug!(path = %path.display(), "invalidated checksum");
    }
    removed
  }

  /// Number of stored digests.
  pub async fn len(&self) -> usize {
    self.entries.lock().await.len()
  }

  /// Write the cache atomically.
  pub async fn save(&self) -> Result<(), ChecksumError> {
    let path = self.root.join(CHECKSUM_FILENAME);
    let entries = self.entries.lock().await;
    let file = ChecksumFile {
      version: CHECKSUM_FILE_VERSION,
      entries: entries.clone(),
    };
    let mut content = serde_json::to_string_pretty(&file).map_err(|e| ChecksumError::Write {
      path: path.clone(),
      source: io::Error::other(e),
    })?;
    content.push('\n');
    atomic_write(&path, content.as_bytes()).map_err(|source| ChecksumError::Write { path, source })
  }

  fn key(&self, path: &Path) -> String {
    relative_path(&self.root, path).to_string_lossy().replace('\\', "/")
  }
}

/// Digest of a directory (excluding its `node_modules`) or a file.
pub async fn digest(path: &Path) -> Result<ContentHash, ChecksumError> {
  let path = path.to_path_buf();
  tokio::task::spawn_blocking(move || {
    let result = if path.is_dir() {
      hash_directory(&path, &[DEPS_DIR_NAME])
    } else {
      hash_file(&path)
    };
    result.map_err(|source| ChecksumError::Hash { path, source })
  })
  .await?
}
