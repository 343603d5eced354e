//! Cache layer that orchestrates caching logic with network fetching.

use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::key::CacheKey;
use super::store::ResponseCache;
use crate::error::ClientError;

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  pub data: T,
  pub source: CacheSource,
}

impl<T> CacheResult<T> {
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
    }
  }

  pub fn from_cache(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
    }
  }

  pub fn offline(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
    }
  }
}

/// Indicates where returned data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Live cache entry, no network access
  Cache,
  /// Network failed, serving an expired entry
  Offline,
}

/// Cache layer that sits between resource services and the network.
#[derive(Clone)]
pub struct CacheLayer {
  store: Arc<ResponseCache>,
  /// Serve expired entries when the network fails
  offline_fallback: bool,
}

impl CacheLayer {
  pub fn new(store: Arc<ResponseCache>) -> Self {
    Self {
      store,
      offline_fallback: false,
    }
  }

  pub fn with_offline_fallback(mut self, enabled: bool) -> Self {
    self.offline_fallback = enabled;
    self
  }

  pub fn store(&self) -> &ResponseCache {
    &self.store
  }

  /// Return the cached value for `key` without touching the network.
  pub fn peek(&self, key: &CacheKey) -> Option<Value> {
    self.store.get(&key.to_string())
  }

  /// Fetch with a cache-first strategy.
  ///
  /// 1. Live cache entry - return immediately
  /// 2. Otherwise run the fetcher
  /// 3. Store successful results only, with `ttl` when given
  /// 4. On failure, serve an expired entry if offline fallback is on
  pub async fn fetch<F, Fut>(
    &self,
    key: &CacheKey,
    ttl: Option<Duration>,
    fetcher: F,
  ) -> Result<CacheResult<Value>, ClientError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Value, ClientError>>,
  {
    let rendered = key.to_string();

    if let Some(cached) = self.store.get(&rendered) {
      debug!(key = %rendered, "Cache hit");
      return Ok(CacheResult::from_cache(cached));
    }

    match fetcher().await {
      Ok(data) => {
        match ttl {
          Some(ttl) => self.store.set_with_ttl(&rendered, data.clone(), ttl),
          None => self.store.set(&rendered, data.clone()),
        }
        Ok(CacheResult::from_network(data))
      }
      Err(err) => {
        if self.offline_fallback && err.is_network_failure() {
          if let Some(stale) = self.store.get_stale(&rendered) {
            debug!(key = %rendered, error = %err, "Serving expired entry while offline");
            return Ok(CacheResult::offline(stale));
          }
        }
        Err(err)
      }
    }
  }

  /// Drop everything; used after writes to any resource collection.
  pub fn invalidate_all(&self) {
    self.store.clear();
  }

  /// Drop every cached read of one resource kind.
  pub fn invalidate_kind(&self, kind: &str) -> usize {
    self.store.clear_prefix(&CacheKey::kind_prefix(kind))
  }
}
