use chrono::{DateTime, Duration, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Deserialize;

use super::SessionToken;
use crate::config::ApiConfig;
use crate::error::ClientError;

/// Renews a session token. The issuance protocol itself lives elsewhere.
pub trait TokenRefresher: Send + Sync {
  fn refresh(&self, current: SessionToken) -> BoxFuture<'static, Result<SessionToken, ClientError>>;
}

/// Refresh endpoint answer; either an absolute expiry or a lifetime in seconds.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
  #[serde(alias = "access_token")]
  token: String,
  #[serde(default)]
  expires_at: Option<DateTime<Utc>>,
  #[serde(default, alias = "expires_in")]
  expires_in: Option<i64>,
}

/// Refreshes via `POST {base}{refresh_path}` with the current bearer token.
#[derive(Debug, Clone)]
pub struct HttpTokenRefresher {
  client: reqwest::Client,
  url: String,
  timeout: std::time::Duration,
}

impl HttpTokenRefresher {
  pub fn new(client: reqwest::Client, api: &ApiConfig) -> Self {
    Self {
      client,
      url: format!("{}{}", api.base(), api.refresh_path),
      timeout: api.request_timeout(),
    }
  }
}

fn retryable(reason: impl Into<String>) -> ClientError {
  ClientError::RefreshFailed {
    retryable: true,
    reason: reason.into(),
  }
}

fn terminal(reason: impl Into<String>) -> ClientError {
  ClientError::RefreshFailed {
    retryable: false,
    reason: reason.into(),
  }
}

impl TokenRefresher for HttpTokenRefresher {
  fn refresh(&self, current: SessionToken) -> BoxFuture<'static, Result<SessionToken, ClientError>> {
    let client = self.client.clone();
    let url = self.url.clone();
    let timeout = self.timeout;

    async move {
      let response = client
        .post(&url)
        .bearer_auth(&current.token)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| ClientError::from_transport(&url, timeout, &e))?;

      let status = response.status();
      if matches!(status.as_u16(), 400 | 401 | 403) {
        return Err(terminal(format!("refresh rejected with status {}", status)));
      }
      if status.is_server_error() {
        return Err(ClientError::from_status(&url, status));
      }
      if !status.is_success() {
        return Err(retryable(ClientError::from_status(&url, status).to_string()));
      }

      let body: RefreshResponse = response
        .json()
        .await
        .map_err(|e| retryable(format!("invalid refresh response: {}", e)))?;

      let expires_at = match (body.expires_at, body.expires_in) {
        (Some(at), _) => at,
        (None, Some(secs)) => Duration::try_seconds(secs)
          .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
          .ok_or_else(|| retryable(format!("refresh lifetime of {}s is out of range", secs)))?,
        (None, None) => return Err(retryable("refresh response carried no expiry")),
      };
      if expires_at <= Utc::now() {
        return Err(retryable("refresh returned an already expired token"));
      }

      Ok(SessionToken::new(body.token, expires_at))
    }
    .boxed()
  }
}
