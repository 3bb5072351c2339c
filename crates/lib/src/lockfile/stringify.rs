//! Lockfile writer.
//!
//! Output order is fully determined by the data: blocks are ordered by their
//! smallest key, keys within a block are sorted, fields follow a fixed
//! priority list and then the alphabet. Keys sharing an [`Arc`] entry are
//! written as one block.

use std::sync::Arc;

use super::{LockEntry, Lockfile};

const HEADER: &str = "# THIS IS AN AUTOGENERATED FILE. DO NOT EDIT THIS FILE DIRECTLY.\n# yarn lockfile v1\n";

const FIELD_PRIORITY: [&str; 7] = ["name", "version", "uid", "resolved", "integrity", "registry", "dependencies"];

enum Field<'a> {
  Scalar(&'a str),
  Map(Vec<(&'a String, &'a String)>),
}

/// Serialize a lockfile.
pub fn stringify(lockfile: &Lockfile) -> String {
  let mut written: Vec<&Arc<LockEntry>> = Vec::new();
  let mut blocks = Vec::new();

  for (_, entry) in lockfile.iter() {
    if written.iter().any(|w| Arc::ptr_eq(w, entry)) {
      continue;
    }
    written.push(entry);

    let keys: Vec<String> = lockfile
      .iter()
      .filter(|(_, other)| Arc::ptr_eq(other, entry))
      .map(|(k, _)| maybe_wrap(k))
      .collect();

    blocks.push(format!("{}:\n{}\n", keys.join(", "), stringify_entry(entry)));
  }

  format!("{}\n\n{}", HEADER, blocks.join("\n"))
}

fn stringify_entry(entry: &LockEntry) -> String {
  let mut fields: Vec<(&str, Field)> = vec![
    ("version", Field::Scalar(&entry.version)),
    ("resolved", Field::Scalar(&entry.resolved)),
  ];
  if let Some(integrity) = &entry.integrity {
    fields.push(("integrity", Field::Scalar(integrity)));
  }
  if !entry.dependencies.is_empty() {
    fields.push(("dependencies", Field::Map(entry.dependencies.iter().collect())));
  }
  if !entry.optional_dependencies.is_empty() {
    fields.push((
      "optionalDependencies",
      Field::Map(entry.optional_dependencies.iter().collect()),
    ));
  }
  for (name, value) in &entry.extra {
    fields.push((name.as_str(), Field::Scalar(value)));
  }
  fields.sort_by(|(a, _), (b, _)| field_rank(a).cmp(&field_rank(b)).then_with(|| a.cmp(b)));

  let mut lines = Vec::new();
  for (name, field) in fields {
    match field {
      Field::Scalar(value) => lines.push(format!("  {} {}", maybe_wrap(name), maybe_wrap(value))),
      Field::Map(items) => {
        lines.push(format!("  {}:", maybe_wrap(name)));
        for (dep, range) in items {
          lines.push(format!("    {} {}", maybe_wrap(dep), maybe_wrap(range)));
        }
      }
    }
  }
  lines.join("\n")
}

fn field_rank(name: &str) -> usize {
  FIELD_PRIORITY
    .iter()
    .position(|p| *p == name)
    .unwrap_or(FIELD_PRIORITY.len())
}

/// Quote a string when a bare word would be ambiguous to the reader.
fn maybe_wrap(value: &str) -> String {
  if needs_quotes(value) {
    serde_json::to_string(value).unwrap_or_else(|_| format!("\"{}\"", value))
  } else {
    value.to_string()
  }
}

fn needs_quotes(value: &str) -> bool {
  value.starts_with("true")
    || value.starts_with("false")
    || value
      .chars()
      .any(|c| matches!(c, ':' | '\\' | '"' | ',' | '[' | ']') || c.is_whitespace())
    || !value.starts_with(|c: char| c.is_ascii_alphabetic())
}
