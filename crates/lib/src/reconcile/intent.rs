//! Manifest mutations requested alongside a reconciliation.

use std::collections::BTreeMap;

use super::ReconcileError;
use crate::manifest::{DepType, PackageManifest};
use crate::range;
use crate::workspace::LocalPackage;

/// What to change before reconciling.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Intent {
  /// Only bring lockfiles in line with manifests.
  #[default]
  None,
  /// Declare `name` in `dep_type`. Without a range, the newest version is used.
  Add {
    name: String,
    range: Option<String>,
    dep_type: DepType,
  },
  /// Drop `name` from every dependency section.
  Remove { name: String },
  /// Move `name` to `range` (newest version when absent), optionally only
  /// where the current range intersects `from`.
  Upgrade {
    name: String,
    range: Option<String>,
    from: Option<String>,
  },
}

impl Intent {
  /// Package the intent targets, if any.
  pub fn target(&self) -> Option<&str> {
    match self {
      Intent::None => None,
      Intent::Add { name, .. } | Intent::Remove { name } | Intent::Upgrade { name, .. } => Some(name),
    }
  }

  /// Reject malformed arguments before anything is touched.
  pub fn validate(&self) -> Result<(), ReconcileError> {
    let invalid = |message: String| Err(ReconcileError::InvalidIntent { message });

    if let Some(name) = self.target()
      && !is_valid_name(name)
    {
      return invalid(format!("'{}' is not a valid package name", name));
    }
    match self {
      Intent::Add {
        dep_type: DepType::Resolutions,
        ..
      } => invalid("use a dependency section, not resolutions".to_string()),
      Intent::Add { range: Some(r), .. } | Intent::Upgrade { range: Some(r), .. } if r.trim().is_empty() => {
        invalid("range must not be empty".to_string())
      }
      Intent::Upgrade { from: Some(f), .. } if !range::is_valid(f) => {
        invalid(format!("'{}' is not a valid semver range", f))
      }
      _ => Ok(()),
    }
  }

  /// Apply the intent to `manifest`. Returns whether the manifest changed.
  ///
  /// Workspace packages added or upgraded without a range get `^<version>`
  /// of the local package.
  pub fn apply(&self, manifest: &mut PackageManifest, locals: &BTreeMap<String, LocalPackage>) -> bool {
    let default_range = |name: &str, range: &Option<String>| match (range, locals.get(name)) {
      (Some(range), _) => range.clone(),
      (None, Some(local)) => format!("^{}", local.version),
      (None, None) => String::new(),
    };

    match self {
      Intent::None => false,
      Intent::Add { name, range, dep_type } => {
        if name == &manifest.name {
          return false;
        }
        let range = default_range(name, range);
        let mut changed = false;
        for other in DepType::INSTALLABLE {
          if other != *dep_type {
            changed |= manifest.section_mut(other).remove(name).is_some();
          }
        }
        let previous = manifest.section_mut(*dep_type).insert(name.clone(), range.clone());
        changed || previous.as_deref() != Some(range.as_str())
      }
      Intent::Remove { name } => {
        let mut changed = false;
        for dep_type in DepType::INSTALLABLE {
          changed |= manifest.section_mut(dep_type).remove(name).is_some();
        }
        changed
      }
      Intent::Upgrade { name, range, from } => {
        let target = default_range(name, range);
        let mut changed = false;
        for dep_type in DepType::INSTALLABLE {
          let Some(current) = manifest.section_mut(dep_type).get_mut(name) else {
            continue;
          };
          if let Some(from) = from
            && !guard_allows(current, from)
          {
            continue;
          }
          if *current != target || target.is_empty() {
            *current = target.clone();
            changed = true;
          }
        }
        changed
      }
    }
  }
}

/// Whether the `from` guard admits a declared range.
fn guard_allows(current: &str, from: &str) -> bool {
  if range::is_valid(current) {
    range::intersects(current, from)
  } else {
    current == from
  }
}

/// npm package name rules that matter here: lowercase-insensitive, no spaces,
/// optional `@scope/` prefix.
fn is_valid_name(name: &str) -> bool {
  let bare = match name.strip_prefix('@') {
    Some(scoped) => match scoped.split_once('/') {
      Some((scope, rest)) if !scope.is_empty() => rest,
      _ => return false,
    },
    None => name,
  };
  !bare.is_empty()
    && !bare.starts_with('.')
    && !bare.starts_with('_')
    && bare
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~'))
}
