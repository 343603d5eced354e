//! Connectivity signal and the user-facing status derived from it.

use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

use crate::error::ClientError;
use crate::health::{HealthProber, ProbeResult};

/// Outcome of a network call, broadcast to whoever renders connectivity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectivityEvent {
  NetworkFailure { message: String },
  RequestSucceeded,
}

/// Process-wide broadcast of [`ConnectivityEvent`]s.
#[derive(Debug, Clone)]
pub struct ConnectivityBus {
  tx: broadcast::Sender<ConnectivityEvent>,
}

impl Default for ConnectivityBus {
  fn default() -> Self {
    Self::new()
  }
}

impl ConnectivityBus {
  pub fn new() -> Self {
    let (tx, _) = broadcast::channel(64);
    Self { tx }
  }

  pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
    self.tx.subscribe()
  }

  pub fn emit(&self, event: ConnectivityEvent) {
    // No subscribers is fine
    let _ = self.tx.send(event);
  }

  pub fn success(&self) {
    self.emit(ConnectivityEvent::RequestSucceeded);
  }

  pub fn failure(&self, err: &ClientError) {
    self.emit(ConnectivityEvent::NetworkFailure {
      message: err.to_string(),
    });
  }
}

/// What the status banner should show.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectivityStatus {
  /// Nothing observed yet
  #[default]
  Unknown,
  Online,
  Unreachable { message: String },
}

impl ConnectivityStatus {
  pub fn shows_banner(&self) -> bool {
    matches!(self, ConnectivityStatus::Unreachable { .. })
  }

  pub fn banner_text(&self) -> Option<&str> {
    match self {
      ConnectivityStatus::Unreachable { message } => Some(message),
      _ => None,
    }
  }
}

/// Folds probe results and bus events into one [`ConnectivityStatus`].
///
/// The banner goes up on a failed probe or a network failure and comes down
/// on any success, wherever it was observed.
#[derive(Clone)]
pub struct StatusAggregator {
  prober: Arc<HealthProber>,
  tx: Arc<watch::Sender<ConnectivityStatus>>,
  last_probe: Arc<Mutex<Option<ProbeResult>>>,
}

impl StatusAggregator {
  pub fn new(prober: Arc<HealthProber>) -> Self {
    let (tx, _) = watch::channel(ConnectivityStatus::Unknown);
    Self {
      prober,
      tx: Arc::new(tx),
      last_probe: Arc::new(Mutex::new(None)),
    }
  }

  pub fn status(&self) -> ConnectivityStatus {
    self.tx.borrow().clone()
  }

  pub fn subscribe(&self) -> watch::Receiver<ConnectivityStatus> {
    self.tx.subscribe()
  }

  /// The most recent probe applied, if any.
  pub fn last_probe(&self) -> Option<ProbeResult> {
    self
      .last_probe
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
      .clone()
  }

  pub fn apply_probe(&self, result: &ProbeResult) {
    *self
      .last_probe
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(result.clone());
    let next = if result.available {
      ConnectivityStatus::Online
    } else {
      let cause = result.failure.clone().unwrap_or_else(|| ClientError::Unreachable {
        base_url: self.prober.base_url().to_string(),
      });
      ConnectivityStatus::Unreachable {
        message: cause.user_message(self.prober.base_url()),
      }
    };
    self.publish(next);
  }

  pub fn apply_event(&self, event: &ConnectivityEvent) {
    let next = match event {
      ConnectivityEvent::RequestSucceeded => ConnectivityStatus::Online,
      ConnectivityEvent::NetworkFailure { message } => {
        debug!(message, "Network failure observed");
        ConnectivityStatus::Unreachable {
          message: ClientError::Unreachable {
            base_url: self.prober.base_url().to_string(),
          }
          .user_message(self.prober.base_url()),
        }
      }
    };
    self.publish(next);
  }

  fn publish(&self, next: ConnectivityStatus) {
    self.tx.send_if_modified(|current| {
      if *current == next {
        return false;
      }
      info!(from = ?current, to = ?next, "Connectivity changed");
      *current = next;
      true
    });
  }

  /// The manual "retry connection" action: run the whole probe sequence again.
  ///
  /// Returns the remediation text when the backend is still unreachable.
  pub async fn retry(&self) -> Result<(), String> {
    let result = self.prober.probe().await;
    self.apply_probe(&result);
    match self.status() {
      ConnectivityStatus::Unreachable { message } => Err(message),
      _ => Ok(()),
    }
  }

  /// Consume bus events until the bus closes.
  pub async fn run(self, mut events: broadcast::Receiver<ConnectivityEvent>) {
    loop {
      match events.recv().await {
        Ok(event) => self.apply_event(&event),
        Err(broadcast::error::RecvError::Lagged(skipped)) => {
          debug!(skipped, "Connectivity listener lagged");
        }
        Err(broadcast::error::RecvError::Closed) => break,
      }
    }
  }
}
