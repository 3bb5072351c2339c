//! HTTP client for npm-compatible registries.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{RegistryConfig, RegistryError, ResolvedPackage, Resolver};
use crate::lockfile::split_key;
use crate::range::{self, Range};

/// Abbreviated package metadata document.
const CORGI_ACCEPT: &str = "application/vnd.npm.install-v1+json; q=1.0, application/json; q=0.8, */*";

/// Package metadata as served by the registry.
#[derive(Debug, Clone, Deserialize)]
pub struct Packument {
  pub name: String,
  #[serde(rename = "dist-tags", default)]
  pub dist_tags: BTreeMap<String, String>,
  #[serde(default)]
  pub versions: BTreeMap<String, VersionManifest>,
}

/// One published version.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionManifest {
  pub version: String,
  #[serde(default)]
  pub dependencies: BTreeMap<String, String>,
  #[serde(default)]
  pub optional_dependencies: BTreeMap<String, String>,
  pub dist: Dist,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Dist {
  pub tarball: String,
  #[serde(default)]
  pub shasum: Option<String>,
  #[serde(default)]
  pub integrity: Option<String>,
}

impl Packument {
  /// Choose the version `range` selects.
  ///
  /// Dist-tags resolve through `dist-tags`; semver ranges prefer the `latest`
  /// tag when it satisfies, then the highest satisfying version.
  pub fn select(&self, range: &str) -> Result<&VersionManifest, RegistryError> {
    let no_match = || RegistryError::NoMatch {
      name: self.name.clone(),
      range: range.to_string(),
    };

    if range::is_unpinned(range) {
      let tag = if range.is_empty() { "latest" } else { range };
      return self
        .dist_tags
        .get(tag)
        .and_then(|version| self.versions.get(version))
        .ok_or_else(no_match);
    }

    let req = Range::parse(range).map_err(|_| RegistryError::UnsupportedRange {
      name: self.name.clone(),
      range: range.to_string(),
    })?;

    if let Some(latest) = self.dist_tags.get("latest")
      && range::satisfies(latest, range)
      && let Some(manifest) = self.versions.get(latest)
    {
      return Ok(manifest);
    }

    let parsed: Vec<(semver::Version, &VersionManifest)> = self
      .versions
      .iter()
      .filter_map(|(v, m)| semver::Version::parse(v).ok().map(|v| (v, m)))
      .collect();
    let best = req.max_satisfying(parsed.iter().map(|(v, _)| v)).ok_or_else(no_match)?;
    parsed
      .iter()
      .find(|(v, _)| v == best)
      .map(|(_, m)| *m)
      .ok_or_else(no_match)
  }
}

/// Registry client with an in-process metadata cache.
///
/// The client holds no registry settings of its own: every call names the
/// [`RegistryConfig`] of the project it is made for, so projects with their
/// own `.npmrc` reach their own registry with their own credentials. One
/// connection pool and one metadata cache, keyed by document URL, serve them all.
#[derive(Default)]
pub struct RegistryClient {
  http: reqwest::Client,
  packuments: Mutex<HashMap<String, Arc<Packument>>>,
}

impl RegistryClient {
  pub fn new() -> Self {
    Self::default()
  }

  /// Fetch (or reuse) the metadata document for `name`.
  pub async fn packument(&self, config: &RegistryConfig, name: &str) -> Result<Arc<Packument>, RegistryError> {
    let url = format!("{}/{}", config.registry_for(name), name.replace('/', "%2f"));
    if let Some(cached) = self.packuments.lock().await.get(&url) {
      return Ok(Arc::clone(cached));
    }

    debug!(url = %url, "fetching packument");
    let response = self.get(config, &url, Some(CORGI_ACCEPT)).await?;
    let packument: Packument = response
      .json()
      .await
      .map_err(|source| RegistryError::Request { url: url.clone(), source })?;
    let packument = Arc::new(packument);

    self.packuments.lock().await.insert(url, Arc::clone(&packument));
    Ok(packument)
  }

  /// Download a tarball (or any other registry resource) into memory.
  pub async fn fetch_bytes(&self, config: &RegistryConfig, url: &str) -> Result<Vec<u8>, RegistryError> {
    let response = self.get(config, url, None).await?;
    let bytes = response.bytes().await.map_err(|source| RegistryError::Request {
      url: url.to_string(),
      source,
    })?;
    info!(url = %url, size = bytes.len(), "download complete");
    Ok(bytes.to_vec())
  }

  async fn get(
    &self,
    config: &RegistryConfig,
    url: &str,
    accept: Option<&str>,
  ) -> Result<reqwest::Response, RegistryError> {
    let mut request = self.http.get(url);
    if let Some(accept) = accept {
      request = request.header(ACCEPT, accept);
    }
    if let Some(token) = config.token_for(url) {
      request = request.header(AUTHORIZATION, format!("Bearer {}", token));
    }

    let response = request.send().await.map_err(|source| RegistryError::Request {
      url: url.to_string(),
      source,
    })?;
    if !response.status().is_success() {
      return Err(RegistryError::Status {
        url: url.to_string(),
        status: response.status().as_u16(),
      });
    }
    Ok(response)
  }

  async fn resolve_published(
    &self,
    config: &RegistryConfig,
    name: &str,
    range: &str,
  ) -> Result<ResolvedPackage, RegistryError> {
    let packument = self.packument(config, name).await?;
    let manifest = packument.select(range)?;
    let resolved = match &manifest.dist.shasum {
      Some(shasum) => format!("{}#{}", manifest.dist.tarball, shasum),
      None => manifest.dist.tarball.clone(),
    };
    debug!(name, range, version = %manifest.version, "resolved");
    Ok(ResolvedPackage {
      name: name.to_string(),
      version: manifest.version.clone(),
      resolved,
      integrity: manifest.dist.integrity.clone(),
      dependencies: manifest.dependencies.clone(),
      optional_dependencies: manifest.optional_dependencies.clone(),
    })
  }
}

impl Resolver for RegistryClient {
  async fn resolve(&self, config: &RegistryConfig, name: &str, range: &str) -> Result<ResolvedPackage, RegistryError> {
    if let Some(target) = range.strip_prefix("npm:") {
      let (real_name, real_range) = split_key(target);
      return self.resolve_published(config, real_name, real_range).await;
    }
    if range.contains(':') || (range.contains('/') && !range::is_valid(range)) {
      return Err(RegistryError::UnsupportedRange {
        name: name.to_string(),
        range: range.to_string(),
      });
    }
    self.resolve_published(config, name, range).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use mockito::Server;

  fn packument_json(base: &str) -> String {
    serde_json::json!({
      "name": "has",
      "dist-tags": { "latest": "1.0.3" },
      "versions": {
        "1.0.1": {
          "version": "1.0.1",
          "dependencies": { "function-bind": "^1.0.2" },
          "dist": { "tarball": format!("{}/has/-/has-1.0.1.tgz", base), "shasum": "aaa" }
        },
        "1.0.3": {
          "version": "1.0.3",
          "dependencies": { "function-bind": "^1.1.1" },
          "dist": {
            "tarball": format!("{}/has/-/has-1.0.3.tgz", base),
            "shasum": "722d7cbfc1f6aa8241f16dd814e011e1f41e8796",
            "integrity": "sha512-abc"
          }
        },
        "2.0.0-beta.1": {
          "version": "2.0.0-beta.1",
          "dist": { "tarball": format!("{}/has/-/has-2.0.0-beta.1.tgz", base), "shasum": "bbb" }
        }
      }
    })
    .to_string()
  }

  fn config_for(server: &Server) -> RegistryConfig {
    RegistryConfig::with_registry(&server.url())
  }

  mod resolving {
    use super::*;

    #[tokio::test]
    async fn exact_version() {
      let mut server = Server::new_async().await;
      let mock = server
        .mock("GET", "/has")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(packument_json(&server.url()))
        .expect(1)
        .create_async()
        .await;
      let client = RegistryClient::new();
      let config = config_for(&server);

      let pkg = client.resolve(&config, "has", "1.0.3").await.unwrap();
      assert_eq!(pkg.version, "1.0.3");
      assert_eq!(
        pkg.resolved,
        format!(
          "{}/has/-/has-1.0.3.tgz#722d7cbfc1f6aa8241f16dd814e011e1f41e8796",
          server.url()
        )
      );
      assert_eq!(pkg.integrity.as_deref(), Some("sha512-abc"));

      // Second request is served from the in-process cache.
      let older = client.resolve(&config, "has", "~1.0.0 <1.0.2").await.unwrap();
      assert_eq!(older.version, "1.0.1");
      mock.assert_async().await;
    }

    #[tokio::test]
    async fn dist_tag_and_empty_range() {
      let mut server = Server::new_async().await;
      server
        .mock("GET", "/has")
        .with_status(200)
        .with_body(packument_json(&server.url()))
        .create_async()
        .await;
      let client = RegistryClient::new();
      let config = config_for(&server);

      assert_eq!(client.resolve(&config, "has", "latest").await.unwrap().version, "1.0.3");
      assert_eq!(client.resolve(&config, "has", "").await.unwrap().version, "1.0.3");
      assert!(matches!(
        client.resolve(&config, "has", "next").await,
        Err(RegistryError::NoMatch { .. })
      ));
    }

    #[tokio::test]
    async fn alias_resolves_real_package() {
      let mut server = Server::new_async().await;
      server
        .mock("GET", "/has")
        .with_status(200)
        .with_body(packument_json(&server.url()))
        .create_async()
        .await;
      let client = RegistryClient::new();
      let config = config_for(&server);

      let pkg = client.resolve(&config, "my-has", "npm:has@^1.0.0").await.unwrap();
      assert_eq!(pkg.name, "has");
      assert_eq!(pkg.version, "1.0.3");
    }

    #[tokio::test]
    async fn git_ranges_are_unsupported() {
      let server = Server::new_async().await;
      let client = RegistryClient::new();
      let config = config_for(&server);
      assert!(matches!(
        client.resolve(&config, "x", "github:user/repo").await,
        Err(RegistryError::UnsupportedRange { .. })
      ));
    }
  }

  mod http {
    use super::*;

    #[tokio::test]
    async fn scoped_names_are_escaped_and_authenticated() {
      let mut server = Server::new_async().await;
      let body = serde_json::json!({
        "name": "@acme/ui",
        "dist-tags": { "latest": "3.1.0" },
        "versions": {
          "3.1.0": { "version": "3.1.0", "dist": { "tarball": "https://files/ui-3.1.0.tgz" } }
        }
      });
      let mock = server
        .mock("GET", "/@acme%2fui")
        .match_header("authorization", "Bearer tok")
        .with_status(200)
        .with_body(body.to_string())
        .create_async()
        .await;

      let host = server.host_with_port();
      let mut config = RegistryConfig::with_registry(&server.url());
      config.apply(&format!("//{}/:_authToken=tok\n", host));
      let client = RegistryClient::new();

      let pkg = client.resolve(&config, "@acme/ui", "^3.0.0").await.unwrap();
      assert_eq!(pkg.resolved, "https://files/ui-3.1.0.tgz");
      mock.assert_async().await;
    }

    #[tokio::test]
    async fn each_config_reaches_its_own_registry() {
      let mut public = Server::new_async().await;
      let mut private = Server::new_async().await;
      let public_mock = public
        .mock("GET", "/has")
        .with_status(200)
        .with_body(packument_json(&public.url()))
        .expect(1)
        .create_async()
        .await;
      let private_mock = private
        .mock("GET", "/has")
        .match_header("authorization", "Bearer inner")
        .with_status(200)
        .with_body(packument_json(&private.url()))
        .expect(1)
        .create_async()
        .await;

      let client = RegistryClient::new();
      let outer = config_for(&public);
      let mut inner = config_for(&private);
      inner.apply(&format!("//{}/:_authToken=inner\n", private.host_with_port()));

      let from_public = client.resolve(&outer, "has", "^1.0.0").await.unwrap();
      let from_private = client.resolve(&inner, "has", "^1.0.0").await.unwrap();
      assert!(from_public.resolved.starts_with(&public.url()));
      assert!(from_private.resolved.starts_with(&private.url()));
      public_mock.assert_async().await;
      private_mock.assert_async().await;
    }

    #[tokio::test]
    async fn missing_package_is_status_error() {
      let mut server = Server::new_async().await;
      server.mock("GET", "/nope").with_status(404).create_async().await;
      let client = RegistryClient::new();
      let config = config_for(&server);

      match client.resolve(&config, "nope", "^1.0.0").await {
        Err(RegistryError::Status { status, .. }) => assert_eq!(status, 404),
        other => panic!("expected status error, got {:?}", other),
      }
    }

    #[tokio::test]
    async fn fetches_bytes() {
      let mut server = Server::new_async().await;
      server
        .mock("GET", "/has/-/has-1.0.3.tgz")
        .with_status(200)
        .with_body(b"tarball")
        .create_async()
        .await;
      let client = RegistryClient::new();
      let config = config_for(&server);

      let url = format!("{}/has/-/has-1.0.3.tgz", server.url());
      assert_eq!(client.fetch_bytes(&config, &url).await.unwrap(), b"tarball");
    }
  }

  #[test]
  fn prefers_latest_when_it_satisfies() {
    let packument: Packument = serde_json::from_str(&packument_json("https://r")).unwrap();
    assert_eq!(packument.select("^1.0.0").unwrap().version, "1.0.3");
    assert_eq!(packument.select(">=1.0.0").unwrap().version, "1.0.3");
    assert_eq!(packument.select("2.0.0-beta.1").unwrap().version, "2.0.0-beta.1");
  }
}
