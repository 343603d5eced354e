use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, RwLock};
use tokio::sync::watch;
use tracing::{info, warn};

use super::{SessionSnapshot, SessionState, SessionStore, SessionToken, TokenRefresher};
use crate::coalesce::Coalescer;
use crate::connectivity::ConnectivityBus;
use crate::error::ClientError;

struct Held {
  token: Option<SessionToken>,
  /// Bumped on login/logout so a refresh started for an older session
  /// cannot resurrect it
  epoch: u64,
  last_error: Option<String>,
  last_failed_at: Option<DateTime<Utc>>,
}

struct Inner {
  held: RwLock<Held>,
  refresher: Arc<dyn TokenRefresher>,
  store: Option<SessionStore>,
  warning_threshold: Duration,
  retry_backoff: Duration,
  bus: Option<ConnectivityBus>,
  /// Keyed by session epoch, so a refresh for an ended session is never
  /// joined by the next one
  refreshes: Coalescer<u64, Result<SessionToken, ClientError>>,
  tx: watch::Sender<SessionSnapshot>,
}

/// Tracks the session token and keeps it renewed.
///
/// Cloning is cheap and every clone observes the same session. Concurrent
/// [`TokenMonitor::refresh`] calls share a single request to the refresher.
#[derive(Clone)]
pub struct TokenMonitor {
  inner: Arc<Inner>,
}

/// Configures a [`TokenMonitor`] before it is shared.
pub struct TokenMonitorBuilder {
  refresher: Arc<dyn TokenRefresher>,
  warning_threshold: Duration,
  retry_backoff: Duration,
  store: Option<SessionStore>,
  bus: Option<ConnectivityBus>,
}

impl TokenMonitorBuilder {
  /// Persist the session to `store` on every change.
  pub fn store(mut self, store: SessionStore) -> Self {
    self.store = Some(store);
    self
  }

  /// Minimum spacing between automatic refresh attempts after a failure.
  pub fn retry_backoff(mut self, backoff: Duration) -> Self {
    self.retry_backoff = backoff;
    self
  }

  /// Report the outcome of every refresh request on `bus`.
  pub fn bus(mut self, bus: ConnectivityBus) -> Self {
    self.bus = Some(bus);
    self
  }

  pub fn build(self) -> TokenMonitor {
    let (tx, _) = watch::channel(SessionSnapshot::unauthenticated());
    TokenMonitor {
      inner: Arc::new(Inner {
        held: RwLock::new(Held {
          token: None,
          epoch: 0,
          last_error: None,
          last_failed_at: None,
        }),
        refresher: self.refresher,
        store: self.store,
        warning_threshold: self.warning_threshold,
        retry_backoff: self.retry_backoff,
        bus: self.bus,
        refreshes: Coalescer::new(),
        tx,
      }),
    }
  }
}

impl TokenMonitor {
  pub fn new(refresher: Arc<dyn TokenRefresher>, warning_threshold: Duration) -> Self {
    Self::builder(refresher, warning_threshold).build()
  }

  pub fn builder(refresher: Arc<dyn TokenRefresher>, warning_threshold: Duration) -> TokenMonitorBuilder {
    TokenMonitorBuilder {
      refresher,
      warning_threshold,
      retry_backoff: Duration::seconds(5),
      store: None,
      bus: None,
    }
  }

  /// Resume a session saved by an earlier run. Expired sessions are dropped.
  pub fn load_persisted(&self) -> bool {
    let Some(store) = &self.inner.store else {
      return false;
    };
    let token = match store.load() {
      Ok(Some(token)) => token,
      Ok(None) => return false,
      Err(e) => {
        warn!(error = %e, "Ignoring unreadable persisted session");
        return false;
      }
    };

    if token.expires_at <= Utc::now() {
      info!("Persisted session already expired, discarding");
      if let Err(e) = store.clear() {
        warn!(error = %e, "Failed to remove expired session file");
      }
      return false;
    }

    self.install(token, false);
    true
  }

  /// Start a session with a freshly issued token.
  pub fn login(&self, token: SessionToken) {
    self.install(token, true);
  }

  fn install(&self, token: SessionToken, persist: bool) {
    {
      let mut held = self.write();
      held.epoch += 1;
      held.token = Some(token.clone());
      held.last_error = None;
      held.last_failed_at = None;
    }
    if persist {
      self.persist(&token);
    }
    let snapshot = self.tick();
    info!(state = snapshot.state.label(), "Session started");
  }

  /// End the session. Also used for terminal refresh failures.
  pub fn logout(&self) {
    {
      let mut held = self.write();
      held.epoch += 1;
      held.token = None;
      held.last_failed_at = None;
    }
    if let Some(store) = &self.inner.store {
      if let Err(e) = store.clear() {
        warn!(error = %e, "Failed to remove session file");
      }
    }
    self.publish(SessionSnapshot::unauthenticated());
    info!("Session ended");
  }

  /// Bearer token for outbound calls, if any.
  pub fn token(&self) -> Option<String> {
    self.read().token.as_ref().map(|t| t.token.clone())
  }

  /// Whether a session exists, even one waiting for renewal.
  pub fn is_authenticated(&self) -> bool {
    self.read().token.is_some()
  }

  pub fn remaining_ttl(&self) -> Option<Duration> {
    self
      .read()
      .token
      .as_ref()
      .map(|t| t.remaining(Utc::now()).max(Duration::zero()))
  }

  pub fn state(&self) -> SessionState {
    self.snapshot_at(Utc::now()).state
  }

  pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
    self.inner.tx.subscribe()
  }

  fn snapshot_at(&self, now: DateTime<Utc>) -> SessionSnapshot {
    let held = self.read();
    match &held.token {
      None => SessionSnapshot {
        last_error: held.last_error.clone(),
        ..SessionSnapshot::unauthenticated()
      },
      Some(token) => {
        let remaining = token.remaining(now);
        SessionSnapshot {
          state: SessionState::classify(remaining, self.inner.warning_threshold),
          expires_at: Some(token.expires_at),
          remaining: Some(remaining.max(Duration::zero())),
          last_error: held.last_error.clone(),
        }
      }
    }
  }

  /// Recompute the remaining lifetime and republish it.
  pub fn tick(&self) -> SessionSnapshot {
    let snapshot = self.snapshot_at(Utc::now());
    self.publish(snapshot.clone());
    snapshot
  }

  /// Whether the scheduler should start a refresh on this tick.
  pub fn wants_auto_refresh(&self) -> bool {
    let now = Utc::now();
    let snapshot = self.snapshot_at(now);
    if !snapshot.state.needs_refresh() {
      return false;
    }
    let held = self.read();
    held
      .last_failed_at
      .map_or(true, |at| now - at >= self.inner.retry_backoff)
  }

  /// Renew the token now, joining a refresh already in flight if there is one.
  pub async fn refresh(&self) -> Result<SessionToken, ClientError> {
    let (current, epoch) = {
      let held = self.read();
      match &held.token {
        Some(token) => (token.clone(), held.epoch),
        None => {
          return Err(ClientError::RefreshFailed {
            retryable: false,
            reason: "no active session".to_string(),
          })
        }
      }
    };

    let monitor = self.clone();
    self
      .inner
      .refreshes
      .run(epoch, move || async move { monitor.run_refresh(current, epoch).await })
      .await
      .unwrap_or_else(|e| {
        Err(ClientError::RefreshFailed {
          retryable: true,
          reason: e.to_string(),
        })
      })
  }

  async fn run_refresh(&self, current: SessionToken, epoch: u64) -> Result<SessionToken, ClientError> {
    let outcome = self.inner.refresher.refresh(current).await;
    if let Some(bus) = &self.inner.bus {
      match &outcome {
        Err(err) if err.is_network_failure() => bus.failure(err),
        _ => bus.success(),
      }
    }

    let mut persist = None;
    {
      let mut held = self.write();
      if held.epoch != epoch {
        // Logged out or replaced while the request was in flight; the token
        // belongs to a session that no longer exists
        return Err(ClientError::RefreshFailed {
          retryable: false,
          reason: "session ended during refresh".to_string(),
        });
      }
      match &outcome {
        Ok(token) => {
          held.token = Some(token.clone());
          held.last_error = None;
          held.last_failed_at = None;
          persist = Some(token.clone());
        }
        Err(err) => {
          held.last_error = Some(err.to_string());
          held.last_failed_at = Some(Utc::now());
        }
      }
    }

    match &outcome {
      Ok(_) => {
        if let Some(token) = persist {
          self.persist(&token);
        }
        let snapshot = self.tick();
        info!(state = snapshot.state.label(), "Session refreshed");
      }
      Err(err) if err.is_retryable() => {
        warn!(error = %err, "Session refresh failed, will retry");
        self.tick();
      }
      Err(err) => {
        warn!(error = %err, "Session refresh rejected, signing out");
        self.logout();
        self.write().last_error = Some(err.to_string());
        self.tick();
      }
    }
    outcome
  }

  fn persist(&self, token: &SessionToken) {
    if let Some(store) = &self.inner.store {
      if let Err(e) = store.save(token) {
        warn!(error = %e, "Failed to persist session");
      }
    }
  }

  fn publish(&self, snapshot: SessionSnapshot) {
    self.inner.tx.send_if_modified(|current| {
      if current.state != snapshot.state {
        info!(from = current.state.label(), to = snapshot.state.label(), "Session state changed");
      }
      if *current == snapshot {
        return false;
      }
      *current = snapshot;
      true
    });
  }

  fn read(&self) -> std::sync::RwLockReadGuard<'_, Held> {
    self
      .inner
      .held
      .read()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  fn write(&self) -> std::sync::RwLockWriteGuard<'_, Held> {
    self
      .inner
      .held
      .write()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}
