//! Lockfile reader.
//!
//! Line-oriented: zero-indent lines open a block with one or more keys, two
//! spaces introduce a field (`name value` or `name:` for a nested map), four
//! spaces introduce a nested map item. Comments and blank lines are ignored.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::{LockEntry, Lockfile};

/// Parse lockfile text. Errors carry the 1-based line number and a message.
pub fn parse(text: &str) -> Result<Lockfile, (usize, String)> {
  let mut lockfile = Lockfile::new();
  let mut block: Option<(Vec<String>, LockEntry)> = None;
  let mut nested: Option<String> = None;

  for (index, raw) in text.lines().enumerate() {
    let line_no = index + 1;
    let fail = |message: &str| (line_no, message.to_string());

    let trimmed = raw.trim_end();
    if trimmed.is_empty() || trimmed.trim_start().starts_with('#') {
      continue;
    }
    let indent = trimmed.len() - trimmed.trim_start().len();
    let content = trimmed.trim_start();

    match indent {
      0 => {
        finish_block(&mut lockfile, block.take());
        nested = None;
        let header = content.strip_suffix(':').ok_or_else(|| fail("block header must end with ':'"))?;
        let keys = parse_keys(header).map_err(|m| fail(&m))?;
        block = Some((keys, LockEntry::default()));
      }
      2 => {
        let Some((_, entry)) = block.as_mut() else {
          return Err(fail("field outside of a block"));
        };
        let (name, rest) = read_token(content).map_err(|m| fail(&m))?;
        let rest = rest.trim_start();
        if rest.is_empty() && content.ends_with(':') && !name.is_empty() {
          let name = name.trim_end_matches(':').to_string();
          if !matches!(name.as_str(), "dependencies" | "optionalDependencies") {
            return Err(fail(&format!("unsupported nested field '{}'", name)));
          }
          nested = Some(name);
          continue;
        }
        nested = None;
        if rest.is_empty() {
          return Err(fail(&format!("field '{}' has no value", name)));
        }
        let (value, _) = read_token(rest).map_err(|m| fail(&m))?;
        match name.as_str() {
          "version" => entry.version = value,
          "resolved" => entry.resolved = value,
          "integrity" => entry.integrity = Some(value),
          _ => {
            entry.extra.insert(name, value);
          }
        }
      }
      4 => {
        let (Some((_, entry)), Some(section)) = (block.as_mut(), nested.as_deref()) else {
          return Err(fail("nested item outside of a map"));
        };
        let (name, rest) = read_token(content).map_err(|m| fail(&m))?;
        let (range, _) = read_token(rest.trim_start()).map_err(|m| fail(&m))?;
        let target: &mut BTreeMap<String, String> = match section {
          "optionalDependencies" => &mut entry.optional_dependencies,
          _ => &mut entry.dependencies,
        };
        target.insert(name, range);
      }
      _ => return Err(fail(&format!("unexpected indentation of {} spaces", indent))),
    }
  }

  finish_block(&mut lockfile, block);
  Ok(lockfile)
}

fn finish_block(lockfile: &mut Lockfile, block: Option<(Vec<String>, LockEntry)>) {
  if let Some((keys, entry)) = block {
    let shared = Arc::new(entry);
    for key in keys {
      lockfile.insert(key, Arc::clone(&shared));
    }
  }
}

/// Split a block header into its keys.
fn parse_keys(header: &str) -> Result<Vec<String>, String> {
  let mut keys = Vec::new();
  let mut rest = header.trim();
  while !rest.is_empty() {
    let (key, after) = if rest.starts_with('"') {
      read_quoted(rest)?
    } else {
      let end = rest.find(',').unwrap_or(rest.len());
      (rest[..end].trim().to_string(), &rest[end..])
    };
    if key.is_empty() {
      return Err("empty key in block header".to_string());
    }
    keys.push(key);
    rest = after.trim_start();
    if let Some(stripped) = rest.strip_prefix(',') {
      rest = stripped.trim_start();
    } else if !rest.is_empty() {
      return Err(format!("unexpected text after key: '{}'", rest));
    }
  }
  if keys.is_empty() {
    return Err("block header has no keys".to_string());
  }
  Ok(keys)
}

/// Read one token (quoted string or bare word) and return it with the rest.
fn read_token(input: &str) -> Result<(String, &str), String> {
  if input.starts_with('"') {
    return read_quoted(input);
  }
  let end = input.find(char::is_whitespace).unwrap_or(input.len());
  if end == 0 {
    return Err("expected a value".to_string());
  }
  Ok((input[..end].to_string(), &input[end..]))
}

/// Read a JSON-style quoted string from the start of `input`.
fn read_quoted(input: &str) -> Result<(String, &str), String> {
  let mut escaped = false;
  for (i, c) in input.char_indices().skip(1) {
    match c {
      _ if escaped => escaped = false,
      '\\' => escaped = true,
      '"' => {
        let literal = &input[..=i];
        let value: String = serde_json::from_str(literal).map_err(|e| format!("bad string {}: {}", literal, e))?;
        return Ok((value, &input[i + 1..]));
      }
      _ => {}
    }
  }
  Err("unterminated string".to_string())
}
