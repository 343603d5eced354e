//! In-memory response store with manual invalidation.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct CacheEntry {
  value: Value,
  /// None means the entry lives until cleared
  expires_at: Option<Instant>,
}

impl CacheEntry {
  fn is_expired(&self, now: Instant) -> bool {
    self.expires_at.is_some_and(|at| now >= at)
  }
}

/// Process-wide response cache.
///
/// Entries have no expiry unless stored with [`ResponseCache::set_with_ttl`].
/// Nothing is evicted implicitly; callers clear after writes.
#[derive(Debug, Default)]
pub struct ResponseCache {
  entries: Mutex<HashMap<String, CacheEntry>>,
}

impl ResponseCache {
  pub fn new() -> Self {
    Self::default()
  }

  /// Get a live entry.
  pub fn get(&self, key: &str) -> Option<Value> {
    let entries = self
      .entries
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    entries
      .get(key)
      .filter(|entry| !entry.is_expired(Instant::now()))
      .map(|entry| entry.value.clone())
  }

  /// Get an entry even if its expiry has passed (offline mode).
  pub fn get_stale(&self, key: &str) -> Option<Value> {
    let entries = self
      .entries
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    entries.get(key).map(|entry| entry.value.clone())
  }

  pub fn set(&self, key: &str, value: Value) {
    self.insert(key, value, None);
  }

  pub fn set_with_ttl(&self, key: &str, value: Value, ttl: Duration) {
    self.insert(key, value, Some(Instant::now() + ttl));
  }

  fn insert(&self, key: &str, value: Value, expires_at: Option<Instant>) {
    let mut entries = self
      .entries
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    entries.insert(key.to_string(), CacheEntry { value, expires_at });
  }

  /// Drop every entry.
  pub fn clear(&self) {
    let mut entries = self
      .entries
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    entries.clear();
  }

  /// Drop every entry whose key starts with `prefix`. Returns how many went.
  pub fn clear_prefix(&self, prefix: &str) -> usize {
    let mut entries = self
      .entries
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    let before = entries.len();
    entries.retain(|key, _| !key.starts_with(prefix));
    before - entries.len()
  }

  pub fn len(&self) -> usize {
    self
      .entries
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
      .len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}
