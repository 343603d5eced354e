//! Backend reachability probing.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::ApiConfig;
use crate::error::ClientError;

/// Outcome of one probe cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
  pub available: bool,
  /// Full URL of the endpoint that answered
  pub endpoint: Option<String>,
  pub error: Option<String>,
  /// Classified failure of the last endpoint tried
  pub failure: Option<ClientError>,
  pub checked_at: DateTime<Utc>,
}

/// Tries the configured health endpoints in priority order.
///
/// Probes never fail: every outcome, timeouts and refused connections
/// included, comes back as a [`ProbeResult`]. Concurrent probes are
/// independent of each other.
#[derive(Debug, Clone)]
pub struct HealthProber {
  client: reqwest::Client,
  base_url: String,
  endpoints: Vec<String>,
  timeout: Duration,
}

impl HealthProber {
  pub fn new(client: reqwest::Client, api: &ApiConfig) -> Self {
    Self {
      client,
      base_url: api.base().to_string(),
      endpoints: api.health_endpoints.clone(),
      timeout: api.health_check_timeout(),
    }
  }

  pub fn base_url(&self) -> &str {
    &self.base_url
  }

  pub async fn probe(&self) -> ProbeResult {
    let mut last_failure = None;

    for path in &self.endpoints {
      let url = format!("{}{}", self.base_url, path);
      match self.probe_one(&url).await {
        Ok(()) => {
          debug!(endpoint = %url, "Health endpoint answered");
          return ProbeResult {
            available: true,
            endpoint: Some(url),
            error: None,
            failure: None,
            checked_at: Utc::now(),
          };
        }
        Err(failure) => {
          match &failure {
            ClientError::Timeout { .. } => {
              debug!(endpoint = %url, timeout_ms = self.timeout.as_millis() as u64, "Health probe timed out")
            }
            ClientError::ConnectionRefused { .. } => {
              debug!(endpoint = %url, "Health probe connection refused")
            }
            other => debug!(endpoint = %url, error = %other, "Health probe failed"),
          }
          last_failure = Some(failure);
        }
      }
    }

    warn!(base_url = %self.base_url, "No health endpoint answered");
    info!(
      cause = last_failure.as_ref().map(|f| f.to_string()).unwrap_or_default(),
      "Backend marked unavailable"
    );
    ProbeResult {
      available: false,
      endpoint: None,
      error: Some(format!(
        "Backend server at {} is not reachable. Make sure the API server is running.",
        self.base_url
      )),
      failure: last_failure,
      checked_at: Utc::now(),
    }
  }

  async fn probe_one(&self, url: &str) -> Result<(), ClientError> {
    let response = self
      .client
      .get(url)
      .timeout(self.timeout)
      .send()
      .await
      .map_err(|e| ClientError::from_transport(url, self.timeout, &e))?;

    let status = response.status();
    if status.is_success() {
      Ok(())
    } else {
      Err(ClientError::from_status(url, status))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use wiremock::matchers::{method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn prober(base_url: &str, timeout_ms: u64) -> HealthProber {
    let api = ApiConfig {
      base_url: base_url.to_string(),
      health_check_timeout_ms: timeout_ms,
      ..ApiConfig::default()
    };
    HealthProber::new(reqwest::Client::new(), &api)
  }

  #[tokio::test]
  async fn test_first_healthy_endpoint_wins() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/health"))
      .respond_with(ResponseTemplate::new(200))
      .expect(1)
      .mount(&server)
      .await;
    // Lower-priority endpoints must not be touched
    Mock::given(method("GET"))
      .and(path("/health"))
      .respond_with(ResponseTemplate::new(200))
      .expect(0)
      .mount(&server)
      .await;

    let result = prober(&server.uri(), 1000).probe().await;
    assert!(result.available);
    assert_eq!(result.endpoint, Some(format!("{}/api/health", server.uri())));
    assert!(result.error.is_none());
  }

  #[tokio::test]
  async fn test_falls_through_to_later_endpoint() {
    let server = MockServer::start().await;
    Mock::given(path("/api/health"))
      .respond_with(ResponseTemplate::new(404))
      .mount(&server)
      .await;
    Mock::given(path("/api/health-check"))
      .respond_with(ResponseTemplate::new(503))
      .mount(&server)
      .await;
    Mock::given(path("/health"))
      .respond_with(ResponseTemplate::new(204))
      .mount(&server)
      .await;

    let result = prober(&server.uri(), 1000).probe().await;
    assert!(result.available);
    assert_eq!(result.endpoint, Some(format!("{}/health", server.uri())));
  }

  #[tokio::test]
  async fn test_repeated_probes_are_stable() {
    let server = MockServer::start().await;
    Mock::given(path("/api/health-check"))
      .respond_with(ResponseTemplate::new(200))
      .mount(&server)
      .await;

    let prober = prober(&server.uri(), 1000);
    let first = prober.probe().await;
    for _ in 0..3 {
      let again = prober.probe().await;
      assert!(again.available);
      assert_eq!(again.endpoint, first.endpoint);
    }
  }

  #[tokio::test]
  async fn test_all_endpoints_time_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
      .expect(4)
      .mount(&server)
      .await;

    let result = prober(&server.uri(), 50).probe().await;
    assert!(!result.available);
    assert!(result.endpoint.is_none());
    assert!(result.error.unwrap().contains(&server.uri()));
    assert!(matches!(result.failure, Some(ClientError::Timeout { .. })));
  }

  #[tokio::test]
  async fn test_connection_refused_is_distinguished() {
    // Bind and drop a listener to get a port nobody listens on
    let port = std::net::TcpListener::bind("127.0.0.1:0")
      .unwrap()
      .local_addr()
      .unwrap()
      .port();
    let base = format!("http://127.0.0.1:{}", port);

    let result = prober(&base, 1000).probe().await;
    assert!(!result.available);
    assert!(result.error.unwrap().contains(&base));
    assert!(matches!(
      result.failure,
      Some(ClientError::ConnectionRefused { .. })
    ));
  }
}
