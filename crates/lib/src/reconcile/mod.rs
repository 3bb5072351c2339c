//! Lockfile reconciliation.
//!
//! Takes every project's `{manifest, lockfile}` pair, applies an optional
//! mutation, and produces pairs that agree with each other and with the
//! manifests.
//!
//! # Algorithm Overview
//!
//! Per version set, concurrently:
//! 1. Apply the [`Intent`] to the in-memory manifest
//! 2. Flatten the manifest's declarations (all sections plus `resolutions`)
//! 3. Resolve declarations missing from the lockfile, normalizing unpinned
//!    manifest ranges to `^<resolved>`
//! 4. Resolve dependency keys that lockfile entries reference but lack
//!
//! Then, once every set has settled:
//! 5. Index every lockfile entry workspace-wide ([`GlobalIndex`])
//! 6. Rebuild each lockfile from its declarations by walking the index
//! 7. Collapse keys resolving to the same `{name, version}` onto one entry
//! 8. In frozen mode, fail if any lockfile's key set would change
//!
//! Nothing is written here; [`VersionSet::save`] persists a result.

mod index;
mod intent;
mod scratch;

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::lockfile::{LockEntry, Lockfile, LockfileError, make_key, split_key};
use crate::manifest::{DepType, ManifestError, PackageManifest, effective_resolution_name};
use crate::range;
use crate::registry::{RegistryConfig, RegistryError, Resolver};
use crate::util::fs::relative_path;
use crate::workspace::LocalPackage;

pub use index::{GlobalIndex, IndexEntry};
pub use intent::Intent;
pub use scratch::Request;

/// Errors that can occur during reconciliation.
#[derive(Debug, Error)]
pub enum ReconcileError {
  #[error(transparent)]
  Manifest(#[from] ManifestError),

  #[error(transparent)]
  Lockfile(#[from] LockfileError),

  /// A missing entry could not be resolved.
  #[error("failed to resolve '{key}': {source}")]
  Registry {
    key: String,
    #[source]
    source: RegistryError,
  },

  /// The requested mutation is malformed.
  #[error("invalid request: {message}")]
  InvalidIntent { message: String },

  /// Frozen mode would have changed a lockfile.
  #[error("lockfile '{dir}' needs changes but is frozen (added: {added:?}, removed: {removed:?})")]
  FrozenDrift {
    dir: PathBuf,
    added: Vec<String>,
    removed: Vec<String>,
  },

  /// A reconciliation task panicked or was cancelled.
  #[error("reconciliation task failed: {0}")]
  Task(#[from] tokio::task::JoinError),
}

/// A project's manifest and lockfile, reconciled together.
#[derive(Debug, Clone)]
pub struct VersionSet {
  pub dir: PathBuf,
  pub manifest: PackageManifest,
  pub lockfile: Lockfile,
  /// Registry settings for the project directory.
  pub registry: RegistryConfig,
}

impl VersionSet {
  /// Read the manifest, lockfile and registry settings of `dir`.
  pub fn load(dir: &Path, fallback_registry: &str) -> Result<Self, ReconcileError> {
    let registry = RegistryConfig::load(dir, fallback_registry).map_err(|source| ReconcileError::Registry {
      key: dir.display().to_string(),
      source,
    })?;
    Ok(Self {
      dir: dir.to_path_buf(),
      manifest: PackageManifest::load(dir)?,
      lockfile: Lockfile::load(dir)?,
      registry,
    })
  }

  /// Persist manifest and lockfile, skipping files whose content is unchanged.
  ///
  /// Returns whether anything was written.
  pub fn save(&self) -> Result<bool, ReconcileError> {
    let manifest_written = self.manifest.save(&self.dir)?;
    let lockfile_written = self.lockfile.save(&self.dir)?;
    Ok(manifest_written || lockfile_written)
  }
}

/// Settings shared by every version set of one reconciliation.
#[derive(Debug, Clone, Default)]
pub struct ReconcileOptions {
  /// Names never resolved through the registry (workspace packages).
  pub ignore: HashSet<String>,
  /// Workspace packages, recorded as `file:` entries where declared.
  pub locals: BTreeMap<String, LocalPackage>,
  /// Fail instead of changing any lockfile's key set.
  pub frozen: bool,
  /// Directories whose manifests receive the intent. `None` means all.
  pub intent_dirs: Option<HashSet<PathBuf>>,
}

impl ReconcileOptions {
  /// Options ignoring and linking every workspace package.
  pub fn for_locals(locals: BTreeMap<String, LocalPackage>) -> Self {
    Self {
      ignore: locals.keys().cloned().collect(),
      locals,
      frozen: false,
      intent_dirs: None,
    }
  }

  /// Restrict the intent to the manifests in `dirs`.
  pub fn with_intent_dirs(mut self, dirs: impl IntoIterator<Item = PathBuf>) -> Self {
    self.intent_dirs = Some(dirs.into_iter().collect());
    self
  }

  fn intent_applies(&self, dir: &Path) -> bool {
    self.intent_dirs.as_ref().is_none_or(|dirs| dirs.contains(dir))
  }
}

/// Reconcile `sets` under `intent`.
pub async fn reconcile<R: Resolver + 'static>(
  sets: Vec<VersionSet>,
  intent: &Intent,
  options: &ReconcileOptions,
  resolver: Arc<R>,
) -> Result<Vec<VersionSet>, ReconcileError> {
  intent.validate()?;
  if options.frozen && *intent != Intent::None {
    return Err(ReconcileError::InvalidIntent {
      message: "lockfiles are frozen; manifests cannot be changed".to_string(),
    });
  }

  let original_keys: Vec<BTreeSet<String>> = sets.iter().map(|s| s.lockfile.keys().cloned().collect()).collect();

  // Steps 1-4, one task per set.
  let options = Arc::new(options.clone());
  let mut join_set = JoinSet::new();
  for (position, set) in sets.into_iter().enumerate() {
    let intent = intent.clone();
    let options = Arc::clone(&options);
    let resolver = Arc::clone(&resolver);
    join_set.spawn(async move {
      let updated = update_set(set, &intent, &options, &resolver).await;
      (position, updated)
    });
  }

  let mut updated: Vec<Option<VersionSet>> = (0..original_keys.len()).map(|_| None).collect();
  while let Some(joined) = join_set.join_next().await {
    let (position, result) = joined?;
    updated[position] = Some(result?);
  }
  let mut sets: Vec<VersionSet> = updated.into_iter().flatten().collect();

  // Steps 5-7.
  let index = GlobalIndex::build(sets.iter().map(|s| &s.lockfile));
  let mut unresolved = Vec::with_capacity(sets.len());
  for set in &mut sets {
    let (mut lockfile, missing) = rebuild(set, &index, &options);
    let collapsed = lockfile.normalize_identities();
    if collapsed > 0 {
      debug!(dir = %set.dir.display(), collapsed, "shared duplicate lockfile entries");
    }
    set.lockfile = lockfile;
    unresolved.push(missing);
  }

  // Step 8.
  if options.frozen {
    for ((set, before), missing) in sets.iter().zip(&original_keys).zip(unresolved) {
      let after: BTreeSet<String> = set.lockfile.keys().cloned().collect();
      let mut added: BTreeSet<String> = after.difference(before).cloned().collect();
      added.extend(missing);
      let removed: Vec<String> = before.difference(&after).cloned().collect();
      if !added.is_empty() || !removed.is_empty() {
        return Err(ReconcileError::FrozenDrift {
          dir: set.dir.clone(),
          added: added.into_iter().collect(),
          removed,
        });
      }
    }
  }

  info!(sets = sets.len(), "reconciliation complete");
  Ok(sets)
}

/// Steps 1-4 for one set.
async fn update_set<R: Resolver + 'static>(
  mut set: VersionSet,
  intent: &Intent,
  options: &ReconcileOptions,
  resolver: &Arc<R>,
) -> Result<VersionSet, ReconcileError> {
  if options.intent_applies(&set.dir)
    && intent.apply(&mut set.manifest, &options.locals)
    && let Intent::Upgrade { name, .. } = intent
  {
    let stale: Vec<String> = set
      .lockfile
      .keys()
      .filter(|key| split_key(key).0 == name)
      .cloned()
      .collect();
    for key in stale {
      set.lockfile.remove(&key);
    }
  }
  if options.frozen {
    return Ok(set);
  }

  let registry = Arc::new(set.registry.clone());
  let mut seen = HashSet::new();
  let missing: Vec<Request> = set
    .manifest
    .flatten()
    .into_iter()
    .filter(|entry| !options.ignore.contains(&entry.name))
    .filter(|entry| !set.lockfile.contains(&entry.key()) && seen.insert(entry.key()))
    .map(|entry| Request::new(&entry.name, &entry.range, entry.dep_type == DepType::OptionalDependencies))
    .collect();

  if !missing.is_empty() {
    debug!(dir = %set.dir.display(), count = missing.len(), "resolving missing declarations");
    let resolved = scratch::resolve_into(resolver, &registry, &mut set.lockfile, missing).await?;
    for (request, entry) in resolved {
      if range::is_unpinned(&request.range) {
        pin_range(&mut set, &request, &entry);
      }
    }
  }

  let dangling = scratch::dangling(&set.lockfile);
  if !dangling.is_empty() {
    debug!(dir = %set.dir.display(), count = dangling.len(), "resolving missing transitive entries");
    scratch::resolve_into(resolver, &registry, &mut set.lockfile, dangling).await?;
  }

  Ok(set)
}

/// Rewrite an unpinned declaration to `^<version>` and re-key its entry.
fn pin_range(set: &mut VersionSet, request: &Request, entry: &Arc<LockEntry>) {
  let pinned = format!("^{}", entry.version);
  for dep_type in DepType::ALL {
    for (key, range) in set.manifest.section_mut(dep_type).iter_mut() {
      let name = match dep_type {
        DepType::Resolutions => effective_resolution_name(key),
        _ => key.clone(),
      };
      if name == request.name && *range == request.range {
        *range = pinned.clone();
      }
    }
  }
  set.lockfile.remove(&request.key());
  let pinned_key = make_key(&request.name, &pinned);
  if !set.lockfile.contains(&pinned_key) {
    set.lockfile.insert(pinned_key, Arc::clone(entry));
  }
  info!(name = %request.name, range = %pinned, "pinned unpinned range");
}

/// Step 6: populate a fresh lockfile from the set's declarations.
///
/// Also returns the required keys no entry could be found for. Optional
/// dependencies without an entry are skipped, as they are during resolution.
fn rebuild(set: &VersionSet, index: &GlobalIndex, options: &ReconcileOptions) -> (Lockfile, Vec<String>) {
  let mut lockfile = Lockfile::new();
  let mut missing = Vec::new();
  let mut skipped = HashSet::new();
  let mut stack: Vec<(String, String, bool)> = Vec::new();

  for entry in set.manifest.flatten() {
    if options.ignore.contains(&entry.name) {
      if let Some(local) = local_entry(set, &entry.name, &entry.range, options) {
        lockfile.insert(entry.key(), local);
      }
      continue;
    }
    let optional = entry.dep_type == DepType::OptionalDependencies;
    stack.push((entry.name, entry.range, optional));
  }
  stack.reverse();

  while let Some((name, range, optional)) = stack.pop() {
    let key = make_key(&name, &range);
    if lockfile.contains(&key) || missing.contains(&key) || skipped.contains(&key) {
      continue;
    }
    let registry = set.registry.registry_for(&name);
    let entry = match index.pick(&name, &range, registry) {
      Some(candidate) => Arc::clone(&candidate.entry),
      None => match set.lockfile.get(&key) {
        Some(own) => Arc::clone(own),
        None if optional => {
          debug!(dir = %set.dir.display(), key = %key, "optional dependency left unlocked");
          skipped.insert(key);
          continue;
        }
        None => {
          if !options.frozen {
            warn!(dir = %set.dir.display(), key = %key, "no resolution available");
          }
          missing.push(key);
          continue;
        }
      },
    };
    let required = entry.dependencies.iter().map(|dep| (dep, false));
    let optional = entry.optional_dependencies.iter().map(|dep| (dep, true));
    let mut deps: Vec<_> = required.chain(optional).collect();
    deps.reverse();
    for ((dep, dep_range), optional) in deps {
      stack.push((dep.clone(), dep_range.clone(), optional));
    }
    lockfile.insert(key, entry);
  }
  (lockfile, missing)
}

/// A `file:` entry for a declared workspace package, when the local version satisfies.
fn local_entry(set: &VersionSet, name: &str, range: &str, options: &ReconcileOptions) -> Option<Arc<LockEntry>> {
  let local = options.locals.get(name)?;
  if range::is_valid(range) && !range::satisfies(&local.version, range) {
    warn!(
      project = %set.manifest.name,
      dependency = name,
      range,
      local = %local.version,
      "workspace package does not satisfy declared range"
    );
    return None;
  }
  let relative = relative_path(&set.dir, &local.dir);
  Some(Arc::new(LockEntry {
    version: local.version.clone(),
    resolved: format!("file:{}", relative.to_string_lossy().replace('\\', "/")),
    ..Default::default()
  }))
}
