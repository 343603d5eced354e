use futures::future::BoxFuture;
use futures::FutureExt;
use std::time::Duration;

use super::{OfflineRequest, StoredResponse};
use crate::connectivity::ConnectivityBus;
use crate::error::ClientError;

/// The network beneath the offline cache.
///
/// A non-success status is still a response; only failures to get any
/// answer at all are errors.
pub trait Transport: Send + Sync {
  fn fetch(&self, request: &OfflineRequest) -> BoxFuture<'static, Result<StoredResponse, ClientError>>;
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  timeout: Duration,
  bus: Option<ConnectivityBus>,
}

impl HttpTransport {
  pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
    Self {
      client,
      timeout,
      bus: None,
    }
  }

  /// Report whether each fetch reached the backend.
  pub fn with_bus(mut self, bus: ConnectivityBus) -> Self {
    self.bus = Some(bus);
    self
  }
}

fn report(bus: Option<&ConnectivityBus>, url: &str, outcome: &Result<StoredResponse, ClientError>) {
  let Some(bus) = bus else { return };
  match outcome {
    Err(err) if err.is_network_failure() => bus.failure(err),
    Err(_) => bus.success(),
    Ok(response) if response.status >= 500 => bus.failure(&ClientError::ServerError {
      url: url.to_string(),
      status: response.status,
    }),
    Ok(_) => bus.success(),
  }
}

impl Transport for HttpTransport {
  fn fetch(&self, request: &OfflineRequest) -> BoxFuture<'static, Result<StoredResponse, ClientError>> {
    let builder = self
      .client
      .request(request.method.clone(), request.url.clone())
      .timeout(self.timeout);
    let url = request.url.to_string();
    let timeout = self.timeout;
    let bus = self.bus.clone();

    async move {
      let outcome = fetch(builder, &url, timeout).await;
      report(bus.as_ref(), &url, &outcome);
      outcome
    }
    .boxed()
  }
}

async fn fetch(
  builder: reqwest::RequestBuilder,
  url: &str,
  timeout: Duration,
) -> Result<StoredResponse, ClientError> {
  let response = builder
    .send()
    .await
    .map_err(|e| ClientError::from_transport(url, timeout, &e))?;

  let status = response.status().as_u16();
  let headers = response
    .headers()
    .iter()
    .filter_map(|(name, value)| {
      value
        .to_str()
        .ok()
        .map(|v| (name.as_str().to_string(), v.to_string()))
    })
    .collect();
  let body = response
    .bytes()
    .await
    .map_err(|e| ClientError::from_transport(url, timeout, &e))?
    .to_vec();

  Ok(StoredResponse {
    status,
    headers,
    body,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::connectivity::ConnectivityEvent;
  use url::Url;
  use wiremock::matchers::{method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn transport(bus: &ConnectivityBus) -> HttpTransport {
    HttpTransport::new(reqwest::Client::new(), Duration::from_millis(500)).with_bus(bus.clone())
  }

  #[tokio::test]
  async fn test_answered_fetch_reports_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/missing.png"))
      .respond_with(ResponseTemplate::new(404))
      .mount(&server)
      .await;

    let bus = ConnectivityBus::new();
    let mut events = bus.subscribe();
    let url = Url::parse(&format!("{}/missing.png", server.uri())).unwrap();

    let response = transport(&bus).fetch(&OfflineRequest::get(url)).await.unwrap();
    assert_eq!(response.status, 404);
    assert_eq!(events.recv().await.unwrap(), ConnectivityEvent::RequestSucceeded);
  }

  #[tokio::test]
  async fn test_unreachable_fetch_reports_failure() {
    let bus = ConnectivityBus::new();
    let mut events = bus.subscribe();
    let url = Url::parse("http://127.0.0.1:1/index.html").unwrap();

    let err = transport(&bus).fetch(&OfflineRequest::get(url)).await.unwrap_err();
    assert!(err.is_network_failure());
    assert!(matches!(
      events.recv().await.unwrap(),
      ConnectivityEvent::NetworkFailure { .. }
    ));
  }
}
