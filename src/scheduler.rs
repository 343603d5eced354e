//! Background timers: the session tick and the periodic health probe.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::connectivity::StatusAggregator;
use crate::session::TokenMonitor;

pub struct Scheduler {
  pub session: TokenMonitor,
  pub status: StatusAggregator,
  pub tick: Duration,
  pub probe_every: Duration,
}

impl Scheduler {
  /// Start both timers on one task. Abort the handle to stop them.
  ///
  /// The first probe runs immediately. Refreshes and probes run on their own
  /// tasks so a slow backend never delays the session tick.
  pub fn spawn(self) -> JoinHandle<()> {
    tokio::spawn(async move {
      let mut tick = tokio::time::interval(self.tick);
      tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
      let mut probe = tokio::time::interval(self.probe_every);
      probe.set_missed_tick_behavior(MissedTickBehavior::Skip);

      loop {
        tokio::select! {
          _ = tick.tick() => self.on_tick(),
          _ = probe.tick() => {
            let status = self.status.clone();
            tokio::spawn(async move {
              if let Err(message) = status.retry().await {
                debug!(%message, "Scheduled probe found backend unreachable");
              }
            });
          }
        }
      }
    })
  }

  fn on_tick(&self) {
    if !self.session.is_authenticated() {
      return;
    }
    self.session.tick();
    if self.session.wants_auto_refresh() {
      let session = self.session.clone();
      tokio::spawn(async move {
        if let Err(e) = session.refresh().await {
          warn!(error = %e, "Automatic session refresh failed");
        }
      });
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::ApiConfig;
  use crate::connectivity::ConnectivityStatus;
  use crate::health::HealthProber;
  use crate::session::{HttpTokenRefresher, SessionToken};
  use serde_json::json;
  use std::sync::Arc;
  use wiremock::matchers::{method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  #[tokio::test]
  async fn test_scheduler_probes_and_refreshes_expiring_session() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/health"))
      .respond_with(ResponseTemplate::new(200))
      .mount(&server)
      .await;
    Mock::given(method("POST"))
      .and(path("/api/auth/refresh"))
      .respond_with(
        ResponseTemplate::new(200).set_body_json(json!({"token": "renewed", "expiresIn": 3600})),
      )
      .mount(&server)
      .await;

    let api = ApiConfig {
      base_url: server.uri(),
      ..ApiConfig::default()
    };
    let client = reqwest::Client::new();
    let session = TokenMonitor::new(
      Arc::new(HttpTokenRefresher::new(client.clone(), &api)),
      chrono::Duration::minutes(5),
    );
    session.login(SessionToken::expiring_in("old", chrono::Duration::seconds(60)));
    let status = StatusAggregator::new(Arc::new(HealthProber::new(client, &api)));

    let handle = Scheduler {
      session: session.clone(),
      status: status.clone(),
      tick: Duration::from_millis(20),
      probe_every: Duration::from_secs(60),
    }
    .spawn();

    let mut renewed = false;
    for _ in 0..100 {
      if session.token().as_deref() == Some("renewed") && status.status() == ConnectivityStatus::Online
      {
        renewed = true;
        break;
      }
      tokio::time::sleep(Duration::from_millis(20)).await;
    }
    handle.abort();

    assert!(renewed);
  }

  #[tokio::test]
  async fn test_tick_skips_signed_out_session() {
    let api = ApiConfig::default();
    let client = reqwest::Client::new();
    let session = TokenMonitor::new(
      Arc::new(HttpTokenRefresher::new(client.clone(), &api)),
      chrono::Duration::minutes(5),
    );
    let snapshots = session.subscribe();
    let scheduler = Scheduler {
      session,
      status: StatusAggregator::new(Arc::new(HealthProber::new(client, &api))),
      tick: Duration::from_millis(10),
      probe_every: Duration::from_secs(60),
    };

    scheduler.on_tick();
    assert!(!snapshots.has_changed().unwrap());
  }
}
