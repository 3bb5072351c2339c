//! Fetching registry tarballs into the shared cache.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use flate2::read::GzDecoder;
use tar::Archive;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::{MaterializeError, cache_entry, cache_entry_name, real_name};
use crate::lockfile::{Lockfile, split_key};
use crate::registry::{RegistryClient, RegistryConfig, RegistryError};
use crate::util::fs::{exists_no_follow, remove_path};
use crate::util::hash::verify_integrity;

/// Marker written into a cache entry once extraction completed.
pub const CACHE_COMPLETE_MARKER: &str = ".wharf-complete";

/// Downloads allowed in flight at once.
const MAX_CONCURRENT_DOWNLOADS: usize = 16;

/// One distinct package to place in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheTarget {
  pub name: String,
  pub version: String,
  /// Tarball URL without the `#shasum` fragment.
  pub url: String,
  pub integrity: Option<String>,
  /// Settings of the first project referencing the package; supplies its credentials.
  pub registry: Arc<RegistryConfig>,
}

/// Outcome of a [`download`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadReport {
  pub fetched: usize,
  pub cached: usize,
}

/// Every distinct registry package referenced by `lockfiles`, ordered by cache name.
///
/// Each lockfile comes with the registry settings of its project. Workspace
/// (`file:`) entries are never downloaded.
pub fn collect_targets<'a>(
  lockfiles: impl IntoIterator<Item = (&'a Lockfile, &'a RegistryConfig)>,
) -> Vec<CacheTarget> {
  let mut targets: BTreeMap<String, CacheTarget> = BTreeMap::new();
  for (lockfile, registry) in lockfiles {
    let registry = Arc::new(registry.clone());
    for (key, entry) in lockfile.iter() {
      if entry.is_local() || entry.resolved.is_empty() {
        continue;
      }
      let (name, range) = split_key(key);
      let name = real_name(name, range);
      targets
        .entry(cache_entry_name(name, &entry.version))
        .or_insert_with(|| CacheTarget {
          name: name.to_string(),
          version: entry.version.clone(),
          url: entry.tarball_url().to_string(),
          integrity: entry.integrity.clone(),
          registry: Arc::clone(&registry),
        });
    }
  }
  targets.into_values().collect()
}

/// Fetch and extract every target missing from `cache_dir`.
///
/// Each target is fetched at most once; a transient failure is retried once
/// before it is surfaced.
pub async fn download(
  client: &Arc<RegistryClient>,
  cache_dir: &Path,
  targets: Vec<CacheTarget>,
) -> Result<DownloadReport, MaterializeError> {
  tokio::fs::create_dir_all(cache_dir)
    .await
    .map_err(|source| MaterializeError::Io {
      path: cache_dir.to_path_buf(),
      source,
    })?;

  let mut report = DownloadReport::default();
  let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_DOWNLOADS));
  let mut join_set = JoinSet::new();

  for target in targets {
    let entry = cache_entry(cache_dir, &target.name, &target.version);
    if entry.join(CACHE_COMPLETE_MARKER).exists() {
      debug!(package = %target.name, version = %target.version, "already cached");
      report.cached += 1;
      continue;
    }

    let client = Arc::clone(client);
    let semaphore = Arc::clone(&semaphore);
    let cache_dir = cache_dir.to_path_buf();
    join_set.spawn(async move {
      let _permit = semaphore.acquire_owned().await;
      let bytes = fetch_with_retry(&client, &target)
        .await
        .map_err(|source| MaterializeError::Fetch {
          name: target.name.clone(),
          version: target.version.clone(),
          source,
        })?;
      tokio::task::spawn_blocking(move || install_entry(&bytes, &target.url, &cache_dir, &entry)).await?
    });
  }

  while let Some(joined) = join_set.join_next().await {
    joined??;
    report.fetched += 1;
  }

  info!(fetched = report.fetched, cached = report.cached, "download complete");
  Ok(report)
}

async fn fetch_with_retry(client: &RegistryClient, target: &CacheTarget) -> Result<Vec<u8>, RegistryError> {
  match fetch_verified(client, target).await {
    Err(e) if e.is_transient() => {
      warn!(url = %target.url, error = %e, "fetch failed, retrying once");
      fetch_verified(client, target).await
    }
    result => result,
  }
}

async fn fetch_verified(client: &RegistryClient, target: &CacheTarget) -> Result<Vec<u8>, RegistryError> {
  let bytes = client.fetch_bytes(&target.registry, &target.url).await?;
  if let Some(integrity) = &target.integrity {
    match verify_integrity(&bytes, integrity) {
      Some(true) => {}
      Some(false) => {
        return Err(RegistryError::Integrity {
          url: target.url.clone(),
        });
      }
      None => debug!(url = %target.url, integrity = %integrity, "no supported integrity algorithm"),
    }
  }
  Ok(bytes)
}

/// Unpack into a staging directory, mark it complete, then move it into place.
fn install_entry(bytes: &[u8], url: &str, cache_dir: &Path, entry: &Path) -> Result<(), MaterializeError> {
  let io_err = |path: &Path| {
    let path = path.to_path_buf();
    move |source| MaterializeError::Io { path, source }
  };

  let staging = tempfile::Builder::new()
    .prefix(".staging-")
    .tempdir_in(cache_dir)
    .map_err(io_err(cache_dir))?;
  unpack(bytes, url, staging.path())?;
  fs::write(staging.path().join(CACHE_COMPLETE_MARKER), b"").map_err(io_err(staging.path()))?;

  if exists_no_follow(entry) {
    if entry.join(CACHE_COMPLETE_MARKER).exists() {
      return Ok(());
    }
    remove_path(entry).map_err(io_err(entry))?;
  }
  if let Err(source) = fs::rename(staging.path(), entry) {
    // Another process may have finished the same entry first.
    if !entry.join(CACHE_COMPLETE_MARKER).exists() {
      return Err(MaterializeError::Io {
        path: entry.to_path_buf(),
        source,
      });
    }
  }
  debug!(entry = %entry.display(), "cache entry installed");
  Ok(())
}

/// Extract a gzipped tarball, dropping the top-level directory npm packs into.
///
/// Entries go through [`tar::Entry::unpack_in`], which refuses to write
/// through symlinks or `..` outside the scratch directory. The contents of
/// each top-level directory are then merged into `dest`.
fn unpack(bytes: &[u8], url: &str, dest: &Path) -> Result<(), MaterializeError> {
  let extract_err = |source| MaterializeError::Extract {
    url: url.to_string(),
    source,
  };
  let unsafe_path = |path: PathBuf| MaterializeError::UnsafePath {
    url: url.to_string(),
    path,
  };

  let scratch = tempfile::Builder::new()
    .prefix(".unpack-")
    .tempdir_in(dest)
    .map_err(extract_err)?;
  let mut archive = Archive::new(GzDecoder::new(bytes));
  for entry in archive.entries().map_err(extract_err)? {
    let mut entry = entry.map_err(extract_err)?;
    let path = entry.path().map_err(extract_err)?.into_owned();
    if strip_top_level(&path).is_none() {
      return Err(unsafe_path(path));
    }
    match entry.unpack_in(scratch.path()) {
      Ok(true) => {}
      Ok(false) => return Err(unsafe_path(path)),
      Err(source) => return Err(extract_err(source)),
    }
  }

  for top in fs::read_dir(scratch.path()).map_err(extract_err)? {
    let top = top.map_err(extract_err)?;
    if top.file_type().map_err(extract_err)?.is_dir() {
      merge_into(&top.path(), dest).map_err(extract_err)?;
    }
  }
  Ok(())
}

/// Move the children of `src` into `dst`, merging directories present in both.
fn merge_into(src: &Path, dst: &Path) -> io::Result<()> {
  for child in fs::read_dir(src)? {
    let child = child?;
    let target = dst.join(child.file_name());
    let is_dir = child.file_type()?.is_dir();
    if exists_no_follow(&target) {
      if is_dir && fs::symlink_metadata(&target)?.is_dir() {
        merge_into(&child.path(), &target)?;
        continue;
      }
      remove_path(&target)?;
    }
    fs::rename(child.path(), &target)?;
  }
  Ok(())
}

/// Drop the first component. `None` when the rest could escape the destination.
fn strip_top_level(path: &Path) -> Option<PathBuf> {
  let mut components = path.components();
  components.next();
  let rest = components.as_path();
  rest
    .components()
    .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
    .then(|| rest.to_path_buf())
}
