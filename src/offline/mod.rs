//! Offline fallback cache at the transport boundary.
//!
//! Same-origin `GET` requests that are not API calls go through
//! [`OfflineCache::handle`]:
//! - precached assets are served cache-first
//! - everything else goes to the network and successful answers are stored
//! - when the network fails, navigations get the offline page, images get
//!   the placeholder and anything else gets a synthesized 503
//!
//! Entries are partitioned by a cache generation. [`OfflineCache::activate`]
//! deletes every generation but the current one.

mod store;
mod transport;

pub use store::OfflineStore;
pub use transport::{HttpTransport, Transport};

use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::OfflineConfig;
use crate::error::ClientError;

/// A response as kept in the offline store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl StoredResponse {
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  /// Minimal answer when neither network nor store can help.
  pub fn offline_error() -> Self {
    Self {
      status: 503,
      headers: vec![("content-type".to_string(), "text/plain".to_string())],
      body: b"Offline".to_vec(),
    }
  }
}

/// What a request is for, which decides its fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
  Navigation,
  Image,
  Other,
}

impl Destination {
  /// Guess from the URL path: no extension or `.html` is a page, common
  /// image extensions are images.
  pub fn infer(url: &Url) -> Self {
    let last = url.path().rsplit('/').next().unwrap_or_default();
    let ext = match last.rsplit_once('.') {
      Some((_, ext)) => ext.to_ascii_lowercase(),
      None => return Destination::Navigation,
    };
    match ext.as_str() {
      "html" | "htm" => Destination::Navigation,
      "png" | "jpg" | "jpeg" | "gif" | "webp" | "svg" | "ico" | "avif" => Destination::Image,
      _ => Destination::Other,
    }
  }
}

#[derive(Debug, Clone)]
pub struct OfflineRequest {
  pub url: Url,
  pub method: Method,
  pub destination: Destination,
}

impl OfflineRequest {
  pub fn get(url: Url) -> Self {
    let destination = Destination::infer(&url);
    Self {
      url,
      method: Method::GET,
      destination,
    }
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  /// Store key: the URL without its fragment.
  fn cache_url(&self) -> String {
    let mut url = self.url.clone();
    url.set_fragment(None);
    url.to_string()
  }
}

/// Where a handled response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServedFrom {
  /// Outside the cache's scope, straight from the network
  Passthrough,
  Cache,
  Network,
  OfflinePage,
  Placeholder,
  Synthesized,
}

#[derive(Debug, Clone)]
pub struct OfflineResponse {
  pub response: StoredResponse,
  pub served_from: ServedFrom,
}

/// Generation id derived from the crate version and the precache list.
pub fn default_generation(precache: &[String]) -> String {
  let mut hasher = Sha256::new();
  hasher.update(env!("CARGO_PKG_VERSION").as_bytes());
  for path in precache {
    hasher.update(b"\n");
    hasher.update(path.as_bytes());
  }
  let digest = hex::encode(hasher.finalize());
  format!("lifeline-{}", &digest[..12])
}

pub struct OfflineCache {
  store: Arc<OfflineStore>,
  transport: Arc<dyn Transport>,
  origin: Url,
  generation: String,
  precache: Vec<Url>,
  offline_page: Url,
  placeholder_image: Url,
  api_prefix: String,
}

impl OfflineCache {
  pub fn new(
    store: Arc<OfflineStore>,
    transport: Arc<dyn Transport>,
    base_url: &str,
    config: &OfflineConfig,
  ) -> Result<Self> {
    let origin =
      Url::parse(base_url).map_err(|e| eyre!("Invalid base URL '{}': {}", base_url, e))?;
    let resolve = |path: &str| {
      origin
        .join(path)
        .map_err(|e| eyre!("Invalid offline asset path '{}': {}", path, e))
    };

    let precache = config
      .precache
      .iter()
      .map(|p| resolve(p))
      .collect::<Result<Vec<_>>>()?;
    let offline_page = resolve(&config.offline_page)?;
    let placeholder_image = resolve(&config.placeholder_image)?;
    let generation = config
      .generation
      .clone()
      .unwrap_or_else(|| default_generation(&config.precache));

    Ok(Self {
      store,
      transport,
      generation,
      precache,
      offline_page,
      placeholder_image,
      api_prefix: config.api_prefix.clone(),
      origin,
    })
  }

  pub fn generation(&self) -> &str {
    &self.generation
  }

  pub fn store(&self) -> &OfflineStore {
    &self.store
  }

  pub fn precache_urls(&self) -> impl Iterator<Item = &Url> {
    self.precache.iter()
  }

  /// Fetch every precache asset and store them under the current generation.
  ///
  /// Nothing is stored unless every asset was fetched successfully.
  pub async fn install(&self) -> Result<usize> {
    let mut entries = Vec::with_capacity(self.precache.len());
    for url in &self.precache {
      let request = OfflineRequest::get(url.clone());
      let response = self
        .transport
        .fetch(&request)
        .await
        .map_err(|e| eyre!("Failed to precache {}: {}", url, e))?;
      if !response.is_success() {
        return Err(eyre!(
          "Failed to precache {}: status {}",
          url,
          response.status
        ));
      }
      entries.push((request.cache_url(), response));
    }

    self.store.put_all(&self.generation, &entries)?;
    info!(generation = %self.generation, assets = entries.len(), "Offline cache installed");
    Ok(entries.len())
  }

  /// Delete every generation but the current one. Returns entries removed.
  pub fn activate(&self) -> Result<usize> {
    let removed = self.store.delete_except(&self.generation)?;
    info!(generation = %self.generation, removed, "Offline cache activated");
    Ok(removed)
  }

  /// Whether the request is one the offline cache may store and serve.
  pub fn in_scope(&self, request: &OfflineRequest) -> bool {
    request.method == Method::GET
      && request.url.origin() == self.origin.origin()
      && !request.url.path().starts_with(&self.api_prefix)
  }

  fn is_precached(&self, request: &OfflineRequest) -> bool {
    self
      .precache
      .iter()
      .any(|u| u.as_str() == request.cache_url())
  }

  fn lookup(&self, url: &str) -> Option<StoredResponse> {
    match self.store.get(&self.generation, url) {
      Ok(hit) => hit,
      Err(e) => {
        warn!(url, error = %e, "Offline store read failed");
        None
      }
    }
  }

  /// Intercept one request.
  ///
  /// In-scope requests always produce a response. Only out-of-scope requests
  /// that fail on the network return an error.
  pub async fn handle(&self, request: &OfflineRequest) -> Result<OfflineResponse, ClientError> {
    if !self.in_scope(request) {
      let response = self.transport.fetch(request).await?;
      return Ok(OfflineResponse {
        response,
        served_from: ServedFrom::Passthrough,
      });
    }

    let key = request.cache_url();
    if self.is_precached(request) {
      if let Some(hit) = self.lookup(&key) {
        debug!(url = %key, "Serving precached asset");
        return Ok(OfflineResponse {
          response: hit,
          served_from: ServedFrom::Cache,
        });
      }
    }

    match self.transport.fetch(request).await {
      Ok(response) => {
        if response.is_success() {
          if let Err(e) = self.store.put(&self.generation, &key, &response) {
            warn!(url = %key, error = %e, "Failed to store response offline");
          }
        }
        Ok(OfflineResponse {
          response,
          served_from: ServedFrom::Network,
        })
      }
      Err(err) => {
        debug!(url = %key, error = %err, "Network failed, using offline fallback");
        Ok(self.fallback(request, &key))
      }
    }
  }

  fn fallback(&self, request: &OfflineRequest, key: &str) -> OfflineResponse {
    if let Some(hit) = self.lookup(key) {
      return OfflineResponse {
        response: hit,
        served_from: ServedFrom::Cache,
      };
    }

    let designated = match request.destination {
      Destination::Navigation => Some((&self.offline_page, ServedFrom::OfflinePage)),
      Destination::Image => Some((&self.placeholder_image, ServedFrom::Placeholder)),
      Destination::Other => None,
    };
    if let Some((url, served_from)) = designated {
      if let Some(hit) = self.lookup(url.as_str()) {
        return OfflineResponse {
          response: hit,
          served_from,
        };
      }
    }

    OfflineResponse {
      response: StoredResponse::offline_error(),
      served_from: ServedFrom::Synthesized,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use futures::future::BoxFuture;
  use futures::FutureExt;
  use std::collections::HashMap;
  use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

  /// Serves fixed bodies by path and can be switched off.
  struct FakeNetwork {
    pages: HashMap<String, StoredResponse>,
    online: AtomicBool,
    hits: AtomicUsize,
  }

  impl FakeNetwork {
    fn new() -> Arc<Self> {
      let mut pages = HashMap::new();
      for (path, body) in [
        ("/", "home"),
        ("/offline.html", "you are offline"),
        ("/images/placeholder.png", "png"),
        ("/manifest.json", "{}"),
        ("/products/shoe", "shoe page"),
        ("/api/categories", "[]"),
      ] {
        pages.insert(
          path.to_string(),
          StoredResponse {
            status: 200,
            headers: vec![],
            body: body.as_bytes().to_vec(),
          },
        );
      }
      Arc::new(Self {
        pages,
        online: AtomicBool::new(true),
        hits: AtomicUsize::new(0),
      })
    }

    fn go_offline(&self) {
      self.online.store(false, Ordering::SeqCst);
    }
  }

  impl Transport for FakeNetwork {
    fn fetch(&self, request: &OfflineRequest) -> BoxFuture<'static, Result<StoredResponse, ClientError>> {
      self.hits.fetch_add(1, Ordering::SeqCst);
      let result = if !self.online.load(Ordering::SeqCst) {
        Err(ClientError::ConnectionRefused {
          url: request.url.to_string(),
        })
      } else {
        Ok(self.pages.get(request.url.path()).cloned().unwrap_or(StoredResponse {
          status: 404,
          headers: vec![],
          body: vec![],
        }))
      };
      async move { result }.boxed()
    }
  }

  fn cache_with(network: Arc<FakeNetwork>, store: Arc<OfflineStore>, generation: &str) -> OfflineCache {
    let config = OfflineConfig {
      generation: Some(generation.to_string()),
      ..OfflineConfig::default()
    };
    OfflineCache::new(store, network, "http://shop.local", &config).unwrap()
  }

  fn request(path: &str) -> OfflineRequest {
    OfflineRequest::get(Url::parse("http://shop.local").unwrap().join(path).unwrap())
  }

  #[tokio::test]
  async fn test_install_stores_every_precache_url() {
    let store = Arc::new(OfflineStore::open_in_memory().unwrap());
    let cache = cache_with(FakeNetwork::new(), store.clone(), "v1");

    assert_eq!(cache.install().await.unwrap(), 4);
    let stored = store.urls("v1").unwrap();
    for url in cache.precache_urls() {
      assert!(stored.contains(&url.to_string()), "missing {}", url);
    }
  }

  #[tokio::test]
  async fn test_activate_removes_old_generation() {
    let store = Arc::new(OfflineStore::open_in_memory().unwrap());
    let network = FakeNetwork::new();
    cache_with(network.clone(), store.clone(), "v1")
      .install()
      .await
      .unwrap();

    let next = cache_with(network, store.clone(), "v2");
    next.install().await.unwrap();
    assert_eq!(next.activate().unwrap(), 4);

    assert!(store.urls("v1").unwrap().is_empty());
    assert_eq!(store.generations().unwrap(), vec!["v2".to_string()]);
  }

  #[tokio::test]
  async fn test_install_fails_without_storing_on_missing_asset() {
    let store = Arc::new(OfflineStore::open_in_memory().unwrap());
    let config = OfflineConfig {
      generation: Some("v1".into()),
      precache: vec!["/".into(), "/missing.css".into()],
      ..OfflineConfig::default()
    };
    let cache = OfflineCache::new(store.clone(), FakeNetwork::new(), "http://shop.local", &config).unwrap();

    assert!(cache.install().await.is_err());
    assert!(store.urls("v1").unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_precached_asset_is_cache_first() {
    let store = Arc::new(OfflineStore::open_in_memory().unwrap());
    let network = FakeNetwork::new();
    let cache = cache_with(network.clone(), store, "v1");
    cache.install().await.unwrap();
    let before = network.hits.load(Ordering::SeqCst);

    let served = cache.handle(&request("/manifest.json")).await.unwrap();
    assert_eq!(served.served_from, ServedFrom::Cache);
    assert_eq!(network.hits.load(Ordering::SeqCst), before);
  }

  #[tokio::test]
  async fn test_runtime_entry_stored_then_served_offline() {
    let store = Arc::new(OfflineStore::open_in_memory().unwrap());
    let network = FakeNetwork::new();
    let cache = cache_with(network.clone(), store, "v1");

    let first = cache.handle(&request("/products/shoe")).await.unwrap();
    assert_eq!(first.served_from, ServedFrom::Network);

    network.go_offline();
    let second = cache.handle(&request("/products/shoe")).await.unwrap();
    assert_eq!(second.served_from, ServedFrom::Cache);
    assert_eq!(second.response.body, b"shoe page");
  }

  #[tokio::test]
  async fn test_fallbacks_when_offline() {
    let store = Arc::new(OfflineStore::open_in_memory().unwrap());
    let network = FakeNetwork::new();
    let cache = cache_with(network.clone(), store, "v1");
    cache.install().await.unwrap();
    network.go_offline();

    let page = cache.handle(&request("/checkout")).await.unwrap();
    assert_eq!(page.served_from, ServedFrom::OfflinePage);
    assert_eq!(page.response.body, b"you are offline");

    let image = cache.handle(&request("/images/shoe.jpg")).await.unwrap();
    assert_eq!(image.served_from, ServedFrom::Placeholder);

    let script = cache.handle(&request("/app.js")).await.unwrap();
    assert_eq!(script.served_from, ServedFrom::Synthesized);
    assert_eq!(script.response.status, 503);
  }

  #[tokio::test]
  async fn test_api_and_foreign_requests_are_never_stored() {
    let store = Arc::new(OfflineStore::open_in_memory().unwrap());
    let cache = cache_with(FakeNetwork::new(), store.clone(), "v1");

    let api = cache.handle(&request("/api/categories")).await.unwrap();
    assert_eq!(api.served_from, ServedFrom::Passthrough);

    let foreign = OfflineRequest::get(Url::parse("http://cdn.example.com/lib.js").unwrap());
    assert!(!cache.in_scope(&foreign));

    let mut post = request("/products/shoe");
    post.method = Method::POST;
    assert!(!cache.in_scope(&post));

    assert!(store.urls("v1").unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_error_status_is_not_stored() {
    let store = Arc::new(OfflineStore::open_in_memory().unwrap());
    let cache = cache_with(FakeNetwork::new(), store.clone(), "v1");

    let missing = cache.handle(&request("/nope")).await.unwrap();
    assert_eq!(missing.response.status, 404);
    assert!(store.urls("v1").unwrap().is_empty());
  }

  #[test]
  fn test_destination_inference() {
    let url = |p: &str| Url::parse("http://shop.local").unwrap().join(p).unwrap();
    assert_eq!(Destination::infer(&url("/")), Destination::Navigation);
    assert_eq!(Destination::infer(&url("/products/shoe")), Destination::Navigation);
    assert_eq!(Destination::infer(&url("/a/b.PNG")), Destination::Image);
    assert_eq!(Destination::infer(&url("/app.js")), Destination::Other);
  }

  #[test]
  fn test_default_generation_tracks_precache_list() {
    let a = default_generation(&["/".to_string()]);
    let b = default_generation(&["/".to_string(), "/offline.html".to_string()]);
    assert_ne!(a, b);
    assert!(a.starts_with("lifeline-"));
    assert_eq!(a, default_generation(&["/".to_string()]));
  }
}
