//! npm-style version ranges on top of the `semver` crate.
//!
//! Manifests declare ranges in npm syntax (`^1.2.0`, `1.x`, `>=1 <2`,
//! `1.2.3 - 2.0.0`, `a || b`). The `semver` crate implements Cargo's flavour,
//! which differs in two ways that matter here: a bare version means `^` in
//! Cargo but `=` in npm, and alternatives (`||`) are not supported. [`Range`]
//! translates each `||` alternative into a [`VersionReq`].

use semver::{Comparator, Op, Version, VersionReq};
use thiserror::Error;

/// Errors produced while parsing a range.
#[derive(Debug, Error)]
pub enum RangeError {
  /// The range is not valid npm semver syntax.
  #[error("invalid version range '{range}': {message}")]
  Invalid { range: String, message: String },
}

/// A parsed npm range: a union of comparator sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Range {
  alternatives: Vec<VersionReq>,
}

impl Range {
  /// Parse an npm range.
  pub fn parse(input: &str) -> Result<Self, RangeError> {
    let invalid = |message: String| RangeError::Invalid {
      range: input.to_string(),
      message,
    };

    let mut alternatives = Vec::new();
    for alternative in input.split("||") {
      let translated = translate_set(alternative.trim()).map_err(invalid)?;
      let req = VersionReq::parse(&translated).map_err(|e| invalid(e.to_string()))?;
      alternatives.push(req);
    }

    Ok(Self { alternatives })
  }

  /// Whether `version` satisfies any alternative.
  pub fn matches(&self, version: &Version) -> bool {
    self.alternatives.iter().any(|req| req.matches(version))
  }

  /// Whether some version satisfies both ranges.
  ///
  /// Every comparator set describes a contiguous interval, so two sets
  /// overlap exactly when the larger of their lower bounds lies in both.
  /// Checking every lower bound from either side is therefore enough.
  pub fn intersects(&self, other: &Range) -> bool {
    self
      .alternatives
      .iter()
      .chain(other.alternatives.iter())
      .map(lower_bound)
      .any(|candidate| self.matches(&candidate) && other.matches(&candidate))
  }

  /// Pick the highest version that satisfies this range.
  pub fn max_satisfying<'a, I>(&self, versions: I) -> Option<&'a Version>
  where
    I: IntoIterator<Item = &'a Version>,
  {
    versions.into_iter().filter(|v| self.matches(v)).max()
  }
}

/// Whether `range` is valid npm semver syntax.
pub fn is_valid(range: &str) -> bool {
  Range::parse(range).is_ok()
}

/// Whether `version` satisfies `range`. Unparseable input never satisfies.
pub fn satisfies(version: &str, range: &str) -> bool {
  match (Version::parse(version.trim_start_matches('v')), Range::parse(range)) {
    (Ok(version), Ok(range)) => range.matches(&version),
    _ => false,
  }
}

/// Whether both ranges admit a common version. Invalid ranges never intersect.
pub fn intersects(a: &str, b: &str) -> bool {
  match (Range::parse(a), Range::parse(b)) {
    (Ok(a), Ok(b)) => a.intersects(&b),
    _ => false,
  }
}

/// Whether `range` is a package alias (`npm:real-name@^1.0.0`).
pub fn is_alias(range: &str) -> bool {
  range.starts_with("npm:")
}

/// Whether `range` leaves the version open (empty, or a dist-tag such as `latest`).
///
/// Unpinned manifest ranges are rewritten to `^<resolved>` once resolved.
pub fn is_unpinned(range: &str) -> bool {
  range.is_empty() || (!is_valid(range) && !range.contains(':') && !range.contains('/'))
}

fn translate_set(set: &str) -> Result<String, String> {
  if set.is_empty() {
    return Ok("*".to_string());
  }

  if let Some((low, high)) = set.split_once(" - ") {
    let low = translate_token(&format!(">={}", low.trim()))?;
    let high = translate_token(&format!("<={}", high.trim()))?;
    return Ok(format!("{}, {}", low, high));
  }

  // Join operators written apart from their version ("> = 1.0", ">= 1.0").
  let mut tokens: Vec<String> = Vec::new();
  let mut pending_op = String::new();
  for raw in set.split_whitespace() {
    if raw.chars().all(|c| matches!(c, '<' | '>' | '=' | '~' | '^')) {
      pending_op.push_str(raw);
      continue;
    }
    tokens.push(format!("{}{}", pending_op, raw));
    pending_op.clear();
  }
  if !pending_op.is_empty() {
    return Err(format!("dangling operator '{}'", pending_op));
  }

  let translated = tokens
    .iter()
    .map(|token| translate_token(token))
    .collect::<Result<Vec<_>, _>>()?;
  Ok(translated.join(", "))
}

fn translate_token(token: &str) -> Result<String, String> {
  let op_len = token
    .find(|c: char| !matches!(c, '<' | '>' | '=' | '~' | '^'))
    .unwrap_or(token.len());
  let (op, rest) = token.split_at(op_len);
  let rest = rest.trim_start_matches(['v', 'V']);
  let rest = rest.split('+').next().unwrap_or(rest);

  if rest.is_empty() {
    return Err(format!("missing version after '{}'", op));
  }

  // Truncate at the first wildcard component: "1.2.x" behaves like "1.2".
  let mut parts: Vec<&str> = Vec::new();
  for part in rest.splitn(3, '.') {
    if matches!(part, "x" | "X" | "*") {
      break;
    }
    parts.push(part);
  }
  if parts.is_empty() {
    return Ok("*".to_string());
  }
  let version = parts.join(".");

  let op = match op {
    "" | "=" | "==" => "=",
    "~>" => "~",
    other => other,
  };
  Ok(format!("{}{}", op, version))
}

/// Smallest version admitted by the comparator set, ignoring upper bounds.
fn lower_bound(req: &VersionReq) -> Version {
  req
    .comparators
    .iter()
    .filter_map(comparator_lower_bound)
    .max()
    .unwrap_or_else(|| Version::new(0, 0, 0))
}

fn comparator_lower_bound(comparator: &Comparator) -> Option<Version> {
  let major = comparator.major;
  let minor = comparator.minor.unwrap_or(0);
  let patch = comparator.patch.unwrap_or(0);

  let mut version = match comparator.op {
    Op::Less | Op::LessEq => return None,
    Op::Greater => match (comparator.minor, comparator.patch) {
      (Some(_), Some(_)) if !comparator.pre.is_empty() => Version::new(major, minor, patch),
      (Some(_), Some(_)) => Version::new(major, minor, patch + 1),
      (Some(_), None) => Version::new(major, minor + 1, 0),
      _ => Version::new(major + 1, 0, 0),
    },
    _ => {
      let mut v = Version::new(major, minor, patch);
      v.pre = comparator.pre.clone();
      v
    }
  };
  if comparator.op == Op::Greater {
    version.pre = semver::Prerelease::EMPTY;
  }
  Some(version)
}
