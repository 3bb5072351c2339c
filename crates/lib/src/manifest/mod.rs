//! Package manifests (`package.json`).
//!
//! A manifest is read fresh for every operation. The typed view exposes the
//! dependency sections, `bin` and `scripts`; everything else is kept in the
//! original JSON object so a write-back only touches what changed and keeps
//! unrelated keys in their original order.
//!
//! # Write-back format
//!
//! Pretty-printed JSON, 2-space indent, trailing newline. A dependency section
//! whose contents did not change is written back exactly as it was read; a
//! changed section is written sorted by package name.

mod types;

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::util::fs::atomic_write;

pub use types::{DepEntry, DepType, DependencyMap, effective_resolution_name};

/// Per-project manifest file.
pub const MANIFEST_FILENAME: &str = "package.json";

/// Errors that can occur when reading or writing manifests.
#[derive(Debug, Error)]
pub enum ManifestError {
  /// Failed to read the manifest file.
  #[error("failed to read manifest '{path}': {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  /// The manifest is not valid JSON.
  #[error("failed to parse manifest '{path}': {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  /// The manifest is JSON but violates the expected shape.
  #[error("invalid manifest '{path}': {message}")]
  Invalid { path: PathBuf, message: String },

  /// Failed to write the manifest file.
  #[error("failed to write manifest '{path}': {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// A parsed `package.json`.
#[derive(Debug, Clone, PartialEq)]
pub struct PackageManifest {
  pub name: String,
  pub version: String,
  pub dependencies: DependencyMap,
  pub dev_dependencies: DependencyMap,
  pub peer_dependencies: DependencyMap,
  pub optional_dependencies: DependencyMap,
  pub resolutions: DependencyMap,
  /// Executables, normalized to command name -> relative file path.
  pub bin: BTreeMap<String, String>,
  pub scripts: BTreeMap<String, String>,
  raw: Map<String, Value>,
}

impl PackageManifest {
  /// Create a minimal manifest, mostly useful for tests and scratch projects.
  pub fn new(name: &str, version: &str) -> Self {
    let mut raw = Map::new();
    raw.insert("name".to_string(), Value::String(name.to_string()));
    raw.insert("version".to_string(), Value::String(version.to_string()));
    Self {
      name: name.to_string(),
      version: version.to_string(),
      dependencies: DependencyMap::new(),
      dev_dependencies: DependencyMap::new(),
      peer_dependencies: DependencyMap::new(),
      optional_dependencies: DependencyMap::new(),
      resolutions: DependencyMap::new(),
      bin: BTreeMap::new(),
      scripts: BTreeMap::new(),
      raw,
    }
  }

  /// Builder-style helper to declare a dependency.
  pub fn with_dep(mut self, dep_type: DepType, name: &str, range: &str) -> Self {
    self.section_mut(dep_type).insert(name.to_string(), range.to_string());
    self
  }

  /// Builder-style helper to declare a script.
  pub fn with_script(mut self, name: &str, command: &str) -> Self {
    self.scripts.insert(name.to_string(), command.to_string());
    self
  }

  /// Path of the manifest inside a project directory.
  pub fn path_in(dir: &Path) -> PathBuf {
    dir.join(MANIFEST_FILENAME)
  }

  /// Load the manifest of the project in `dir`.
  pub fn load(dir: &Path) -> Result<Self, ManifestError> {
    let path = Self::path_in(dir);
    let content = fs::read_to_string(&path).map_err(|source| ManifestError::Read {
      path: path.clone(),
      source,
    })?;
    Self::parse(&content, &path)
  }

  /// Parse manifest JSON. `path` is only used for error messages.
  pub fn parse(content: &str, path: &Path) -> Result<Self, ManifestError> {
    let value: Value = serde_json::from_str(content).map_err(|source| ManifestError::Parse {
      path: path.to_path_buf(),
      source,
    })?;
    let invalid = |message: String| ManifestError::Invalid {
      path: path.to_path_buf(),
      message,
    };

    let Value::Object(raw) = value else {
      return Err(invalid("top level must be an object".to_string()));
    };

    let name = match raw.get("name") {
      Some(Value::String(name)) if !name.is_empty() => name.clone(),
      _ => return Err(invalid("missing \"name\"".to_string())),
    };
    let version = match raw.get("version") {
      Some(Value::String(version)) => version.clone(),
      None => "0.0.0".to_string(),
      Some(_) => return Err(invalid("\"version\" must be a string".to_string())),
    };

    let mut manifest = Self::new(&name, &version);
    manifest.raw = raw;

    for dep_type in DepType::ALL {
      let section = read_string_map(&manifest.raw, dep_type.key()).map_err(invalid)?;
      *manifest.section_mut(dep_type) = section;
    }
    manifest.scripts = read_string_map(&manifest.raw, "scripts").map_err(invalid)?;
    manifest.bin = read_bin(&manifest.raw, &name).map_err(invalid)?;

    Ok(manifest)
  }

  /// Get one dependency section.
  pub fn section(&self, dep_type: DepType) -> &DependencyMap {
    match dep_type {
      DepType::Dependencies => &self.dependencies,
      DepType::DevDependencies => &self.dev_dependencies,
      DepType::PeerDependencies => &self.peer_dependencies,
      DepType::OptionalDependencies => &self.optional_dependencies,
      DepType::Resolutions => &self.resolutions,
    }
  }

  /// Get one dependency section for mutation.
  pub fn section_mut(&mut self, dep_type: DepType) -> &mut DependencyMap {
    match dep_type {
      DepType::Dependencies => &mut self.dependencies,
      DepType::DevDependencies => &mut self.dev_dependencies,
      DepType::PeerDependencies => &mut self.peer_dependencies,
      DepType::OptionalDependencies => &mut self.optional_dependencies,
      DepType::Resolutions => &mut self.resolutions,
    }
  }

  /// Every declared (name, range, type) across all sections, including
  /// `resolutions` under their effective package name.
  pub fn flatten(&self) -> Vec<DepEntry> {
    let mut entries = Vec::new();
    for dep_type in DepType::ALL {
      for (key, range) in self.section(dep_type) {
        let name = match dep_type {
          DepType::Resolutions => effective_resolution_name(key),
          _ => key.clone(),
        };
        entries.push(DepEntry {
          name,
          range: range.clone(),
          dep_type,
        });
      }
    }
    entries
  }

  /// Ranges declared in `dependencies` and `devDependencies`, the edges the
  /// workspace graph follows.
  pub fn local_candidates(&self) -> impl Iterator<Item = (&String, &String)> {
    self.dependencies.iter().chain(self.dev_dependencies.iter())
  }

  /// The depset: union of all installable sections (resolutions excluded).
  ///
  /// When a name appears in several sections the first of
  /// dependencies, devDependencies, optionalDependencies, peerDependencies wins.
  pub fn depset(&self) -> DependencyMap {
    let mut depset = DependencyMap::new();
    for dep_type in DepType::INSTALLABLE {
      for (name, range) in self.section(dep_type) {
        depset.entry(name.clone()).or_insert_with(|| range.clone());
      }
    }
    depset
  }

  /// Find the section declaring `name`, if any.
  pub fn declared(&self, name: &str) -> Option<(DepType, &String)> {
    DepType::INSTALLABLE
      .into_iter()
      .find_map(|dep_type| self.section(dep_type).get(name).map(|range| (dep_type, range)))
  }

  /// Serialize for write-back.
  ///
  /// Sections, `scripts` and `bin` are written back only when they differ
  /// from what was read, so untouched fields keep their original form.
  pub fn to_json_string(&self) -> String {
    let mut raw = self.raw.clone();
    for dep_type in DepType::ALL {
      sync_string_map(&mut raw, dep_type.key(), self.section(dep_type));
    }
    sync_string_map(&mut raw, "scripts", &self.scripts);
    if read_bin(&raw, &self.name).ok().as_ref() != Some(&self.bin) {
      sync_string_map(&mut raw, "bin", &self.bin);
    }

    let mut out = serde_json::to_string_pretty(&Value::Object(raw)).unwrap_or_default();
    out.push('\n');
    out
  }

  /// Write the manifest into `dir` if its serialized form changed.
  ///
  /// Returns whether a write happened.
  pub fn save(&self, dir: &Path) -> Result<bool, ManifestError> {
    let path = Self::path_in(dir);
    let content = self.to_json_string();
    if fs::read_to_string(&path).ok().as_deref() == Some(content.as_str()) {
      return Ok(false);
    }
    atomic_write(&path, content.as_bytes()).map_err(|source| ManifestError::Write {
      path: path.clone(),
      source,
    })?;
    debug!(path = %path.display(), "manifest written");
    Ok(true)
  }
}

fn read_string_map(raw: &Map<String, Value>, key: &str) -> Result<BTreeMap<String, String>, String> {
  match raw.get(key) {
    None | Some(Value::Null) => Ok(BTreeMap::new()),
    Some(Value::Object(object)) => object
      .iter()
      .map(|(name, value)| match value {
        Value::String(s) => Ok((name.clone(), s.clone())),
        _ => Err(format!("\"{}.{}\" must be a string", key, name)),
      })
      .collect(),
    Some(_) => Err(format!("\"{}\" must be an object", key)),
  }
}

/// Replace `raw[key]` with `map` unless it already holds the same entries.
fn sync_string_map(raw: &mut Map<String, Value>, key: &str, map: &BTreeMap<String, String>) {
  let unchanged = read_string_map(raw, key).is_ok_and(|old| &old == map);
  if unchanged || (map.is_empty() && !raw.contains_key(key)) {
    return;
  }
  let object: Map<String, Value> = map
    .iter()
    .map(|(name, value)| (name.clone(), Value::String(value.clone())))
    .collect();
  raw.insert(key.to_string(), Value::Object(object));
}

/// `bin` in either its string or its object form.
fn read_bin(raw: &Map<String, Value>, package: &str) -> Result<BTreeMap<String, String>, String> {
  match raw.get("bin") {
    Some(Value::String(file)) => Ok(BTreeMap::from([(bin_name(package), file.clone())])),
    _ => read_string_map(raw, "bin"),
  }
}

/// Command name for a string-form `bin`: the package name without its scope.
fn bin_name(package: &str) -> String {
  package.rsplit('/').next().unwrap_or(package).to_string()
}
