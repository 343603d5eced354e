//! The explicitly constructed client context.
//!
//! Everything that is process-wide state in a browser client (response cache,
//! throttle windows, session, connectivity) lives here and is handed to
//! whoever needs it.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

use crate::cache::{CacheLayer, ResponseCache};
use crate::config::Config;
use crate::connectivity::{ConnectivityBus, StatusAggregator};
use crate::health::HealthProber;
use crate::offline::{HttpTransport, OfflineCache, OfflineStore};
use crate::service::{ResourceService, ResourceServiceParts};
use crate::session::{HttpTokenRefresher, SessionStore, TokenMonitor};
use crate::throttle::RequestThrottle;

pub struct ClientContext {
  pub config: Config,
  pub client: reqwest::Client,
  pub cache: Arc<ResponseCache>,
  pub throttle: Arc<RequestThrottle>,
  pub session: TokenMonitor,
  pub bus: ConnectivityBus,
  pub prober: Arc<HealthProber>,
  pub status: StatusAggregator,
}

impl ClientContext {
  pub fn new(config: Config, session_store: Option<SessionStore>) -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("lifeline/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    let threshold = chrono::Duration::milliseconds(config.session.warning_threshold_ms as i64);
    let backoff = chrono::Duration::milliseconds(config.session.refresh_retry_ms as i64);
    let refresher = Arc::new(HttpTokenRefresher::new(client.clone(), &config.api));
    let bus = ConnectivityBus::new();
    let mut builder = TokenMonitor::builder(refresher, threshold)
      .retry_backoff(backoff)
      .bus(bus.clone());
    if let Some(store) = session_store {
      builder = builder.store(store);
    }
    let session = builder.build();
    if session.load_persisted() {
      info!("Resumed persisted session");
    }

    let prober = Arc::new(HealthProber::new(client.clone(), &config.api));
    let status = StatusAggregator::new(prober.clone());

    Ok(Self {
      client,
      cache: Arc::new(ResponseCache::new()),
      throttle: Arc::new(RequestThrottle::new()),
      session,
      bus,
      prober,
      status,
      config,
    })
  }

  /// Resource access sharing this context's cache, throttle and session.
  pub fn resources(&self) -> ResourceService {
    let cache = CacheLayer::new(self.cache.clone())
      .with_offline_fallback(self.config.features.enable_offline_mode);
    ResourceService::new(ResourceServiceParts {
      client: self.client.clone(),
      api: self.config.api.clone(),
      cache,
      throttle: self.throttle.clone(),
      window: self.config.throttle.window(),
      session: self.session.clone(),
      bus: self.bus.clone(),
      dedup: self.config.features.enable_request_dedup,
    })
  }

  /// Offline cache over `store`, fetching through this context's HTTP client.
  pub fn offline(&self, store: Arc<OfflineStore>) -> Result<OfflineCache> {
    let transport = Arc::new(
      HttpTransport::new(self.client.clone(), self.config.api.request_timeout())
        .with_bus(self.bus.clone()),
    );
    OfflineCache::new(
      store,
      transport,
      self.config.api.base(),
      &self.config.offline,
    )
  }

  /// Feed bus events into the status aggregator until the bus closes.
  pub fn spawn_status_listener(&self) -> JoinHandle<()> {
    let events = self.bus.subscribe();
    tokio::spawn(self.status.clone().run(events))
  }

  pub fn tick_interval(&self) -> Duration {
    Duration::from_millis(self.config.session.tick_ms.max(1))
  }

  pub fn probe_interval(&self) -> Duration {
    Duration::from_millis(self.config.health.probe_interval_ms.max(1))
  }

  /// Drop all cached responses and throttle windows.
  pub fn teardown(&self) {
    self.cache.clear();
    self.throttle.reset_all();
  }

  /// Sign out; cached responses may hold the previous user's data.
  pub fn logout(&self) {
    self.session.logout();
    self.teardown();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::session::SessionToken;
  use serde_json::json;

  #[tokio::test]
  async fn test_logout_clears_cache_and_session() {
    let ctx = ClientContext::new(Config::default(), None).unwrap();
    ctx.session.login(SessionToken::expiring_in("t", chrono::Duration::hours(1)));
    ctx.cache.set("categories:{}", json!([1]));

    ctx.logout();

    assert!(!ctx.session.is_authenticated());
    assert!(ctx.cache.is_empty());
  }

  #[tokio::test]
  async fn test_resumes_persisted_session() {
    let dir = std::env::temp_dir().join(format!("lifeline-ctx-{}", std::process::id()));
    let store = SessionStore::new(dir.join("session.json"));
    store
      .save(&SessionToken::expiring_in("saved", chrono::Duration::hours(1)))
      .unwrap();

    let ctx = ClientContext::new(Config::default(), Some(SessionStore::new(store.path()))).unwrap();
    assert_eq!(ctx.session.token().as_deref(), Some("saved"));

    store.clear().unwrap();
    let _ = std::fs::remove_dir_all(dir);
  }
}
