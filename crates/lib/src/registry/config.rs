//! Per-directory registry configuration (`.npmrc`).
//!
//! Every `.npmrc` from the filesystem root down to the project directory is
//! read, with files closer to the project overriding their ancestors. Values
//! may reference environment variables as `${NAME}`.
//!
//! Recognized keys:
//! - `registry=<url>`: default registry
//! - `@scope:registry=<url>`: registry for one scope
//! - `//host/path/:_authToken=<token>`: bearer token for URLs under that prefix

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use reqwest::Url;
use tracing::trace;

use super::RegistryError;
const NPMRC_FILENAME: &str = ".npmrc";

/// Registry used when no `.npmrc` or workspace config names one.
pub const DEFAULT_REGISTRY: &str = "https://registry.yarnpkg.com";

/// Merged registry settings for one directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
  pub registry: String,
  pub scopes: BTreeMap<String, String>,
  /// `//host/path/` prefix -> token.
  pub tokens: BTreeMap<String, String>,
}

impl Default for RegistryConfig {
  fn default() -> Self {
    Self::with_registry(DEFAULT_REGISTRY)
  }
}

impl RegistryConfig {
  pub fn with_registry(registry: &str) -> Self {
    Self {
      registry: trim_registry(registry),
      scopes: BTreeMap::new(),
      tokens: BTreeMap::new(),
    }
  }

  /// Load the configuration that applies to `dir`.
  ///
  /// `fallback` is the registry used when no `.npmrc` sets one.
  pub fn load(dir: &Path, fallback: &str) -> Result<Self, RegistryError> {
    let mut config = Self::with_registry(fallback);
    let mut chain: Vec<&Path> = dir.ancestors().collect();
    chain.reverse();
    for ancestor in chain {
      let path = npmrc_path(ancestor);
      match fs::read_to_string(&path) {
        Ok(content) => {
          trace!(path = %path.display(), "applying npmrc");
          config.apply(&content);
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(source) => return Err(RegistryError::Config { path, source }),
      }
    }
    Ok(config)
  }

  /// Apply one `.npmrc` file on top of the current settings.
  pub fn apply(&mut self, content: &str) {
    for line in content.lines() {
      let line = line.trim();
      if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
        continue;
      }
      let Some((key, value)) = line.split_once('=') else {
        continue;
      };
      let key = key.trim();
      let value = substitute_env(value.trim().trim_matches('"'));

      if key == "registry" {
        self.registry = trim_registry(&value);
      } else if let Some(scope) = key.strip_suffix(":registry")
        && scope.starts_with('@')
      {
        self.scopes.insert(scope.to_string(), trim_registry(&value));
      } else if let Some(prefix) = key.strip_suffix(":_authToken")
        && prefix.starts_with("//")
      {
        self.tokens.insert(prefix.to_string(), value);
      }
    }
  }

  /// Registry serving `name`, honoring scope overrides.
  pub fn registry_for(&self, name: &str) -> &str {
    if name.starts_with('@')
      && let Some((scope, _)) = name.split_once('/')
      && let Some(registry) = self.scopes.get(scope)
    {
      return registry;
    }
    &self.registry
  }

  /// Token for requests to `url`: the one with the longest matching prefix.
  ///
  /// A prefix matches when host and port are equal and its path segments
  /// lead the URL's path.
  pub fn token_for(&self, url: &str) -> Option<&str> {
    let target = Url::parse(url).ok()?;
    self
      .tokens
      .iter()
      .filter(|(prefix, _)| prefix_covers(prefix, &target))
      .max_by_key(|(prefix, _)| prefix.len())
      .map(|(_, token)| token.as_str())
  }
}

/// Whether a resolved locator was served from `registry`.
pub fn is_served_by(registry: &str, resolved: &str) -> bool {
  resolved
    .strip_prefix(registry)
    .is_some_and(|rest| rest.is_empty() || rest.starts_with('/') || rest.starts_with('#'))
}

/// Whether the `//host[:port]/path/` token prefix applies to `target`.
fn prefix_covers(prefix: &str, target: &Url) -> bool {
  let Ok(scope) = Url::parse(&format!("https:{}", prefix)) else {
    return false;
  };
  if scope.host_str() != target.host_str() || scope.port() != target.port() {
    return false;
  }
  let segments = |url: &Url| -> Vec<String> {
    url
      .path()
      .split('/')
      .filter(|segment| !segment.is_empty())
      .map(str::to_string)
      .collect()
  };
  segments(target).starts_with(&segments(&scope))
}

fn trim_registry(url: &str) -> String {
  url.trim_end_matches('/').to_string()
}

/// Replace `${NAME}` with the value of the environment variable (empty if unset).
fn substitute_env(value: &str) -> String {
  let mut out = String::with_capacity(value.len());
  let mut rest = value;
  while let Some(start) = rest.find("${") {
    out.push_str(&rest[..start]);
    match rest[start + 2..].find('}') {
      Some(end) => {
        let name = &rest[start + 2..start + 2 + end];
        out.push_str(&std::env::var(name).unwrap_or_default());
        rest = &rest[start + 3 + end..];
      }
      None => {
        out.push_str(&rest[start..]);
        rest = "";
      }
    }
  }
  out.push_str(rest);
  out
}

/// Path of the `.npmrc` inside `dir`.
pub fn npmrc_path(dir: &Path) -> PathBuf {
  dir.join(NPMRC_FILENAME)
}

#[cfg(test)]
mod tests {
  use super::*;
  use serial_test::serial;
  use tempfile::TempDir;

  #[test]
  fn defaults_to_public_registry() {
    let config = RegistryConfig::default();
    assert_eq!(config.registry_for("has"), "https://registry.yarnpkg.com");
  }

  #[test]
  fn child_overrides_parent() {
    let temp = TempDir::new().unwrap();
    let child = temp.path().join("packages/web");
    fs::create_dir_all(&child).unwrap();
    fs::write(
      npmrc_path(temp.path()),
      "registry=https://parent.example/\n@acme:registry=https://acme.example\n",
    )
    .unwrap();
    fs::write(npmrc_path(&child), "registry=https://child.example\n").unwrap();

    let config = RegistryConfig::load(&child, DEFAULT_REGISTRY).unwrap();
    assert_eq!(config.registry, "https://child.example");
    assert_eq!(config.registry_for("@acme/ui"), "https://acme.example");
    assert_eq!(config.registry_for("@other/ui"), "https://child.example");
  }

  #[test]
  #[serial]
  fn substitutes_environment_variables() {
    temp_env::with_var("WHARF_TEST_TOKEN", Some("s3cret"), || {
      let mut config = RegistryConfig::default();
      config.apply("//npm.acme.example/:_authToken=${WHARF_TEST_TOKEN}\n; comment\n");
      assert_eq!(config.token_for("https://npm.acme.example/@acme%2fui"), Some("s3cret"));
      assert_eq!(config.token_for("https://registry.yarnpkg.com/has"), None);
    });
  }

  #[test]
  #[serial]
  fn unset_variable_becomes_empty() {
    temp_env::with_var_unset("WHARF_TEST_MISSING", || {
      assert_eq!(substitute_env("a${WHARF_TEST_MISSING}b"), "ab");
    });
  }

  #[test]
  fn longest_token_prefix_wins() {
    let mut config = RegistryConfig::default();
    config.apply("//host/:_authToken=short\n//host/private/:_authToken=long\n");
    assert_eq!(config.token_for("https://host/private/pkg"), Some("long"));
    assert_eq!(config.token_for("https://host/public/pkg"), Some("short"));
  }

  #[test]
  fn registry_origin_check() {
    let registry = RegistryConfig::default().registry;
    assert!(is_served_by(&registry, "https://registry.yarnpkg.com/has/-/has-1.0.3.tgz#abc"));
    assert!(!is_served_by(&registry, "https://registry.npmjs.org/has/-/has-1.0.3.tgz#abc"));
    assert!(!is_served_by(&registry, "https://registry.yarnpkg.com.evil/has/-/has-1.0.3.tgz"));
  }

  #[test]
  fn token_requires_exact_host() {
    let mut config = RegistryConfig::default();
    config.apply("//npm.acme.example/:_authToken=s3cret\n//localhost:4873/:_authToken=local\n");
    assert_eq!(config.token_for("https://npm.acme.example/x.tgz"), Some("s3cret"));
    assert_eq!(config.token_for("https://npm.acme.example.attacker.io/x.tgz"), None);
    assert_eq!(config.token_for("https://evil.example/npm.acme.example/x.tgz"), None);
    assert_eq!(config.token_for("http://localhost:4873/has"), Some("local"));
    assert_eq!(config.token_for("http://localhost:4874/has"), None);
  }

  #[test]
  fn token_path_matches_whole_segments() {
    let mut config = RegistryConfig::default();
    config.apply("//host/private/:_authToken=t\n");
    assert_eq!(config.token_for("https://host/private/pkg"), Some("t"));
    assert_eq!(config.token_for("https://host/private-other/pkg"), None);
  }
}
