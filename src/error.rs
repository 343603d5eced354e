//! Error taxonomy shared by every component that talks to the backend.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
  /// No health endpoint answered
  #[error("backend unreachable at {base_url}")]
  Unreachable { base_url: String },

  #[error("request to {url} timed out after {}ms", .after.as_millis())]
  Timeout { url: String, after: Duration },

  #[error("authentication required for {url}")]
  AuthRequired { url: String },

  #[error("server error {status} from {url}")]
  ServerError { url: String, status: u16 },

  #[error("not found: {url}")]
  NotFound { url: String },

  /// Rejected locally, never sent
  #[error("request class '{key}' throttled")]
  Throttled { key: String },

  #[error("session refresh failed: {reason}")]
  RefreshFailed { retryable: bool, reason: String },

  #[error("connection to {url} refused")]
  ConnectionRefused { url: String },

  #[error("network error for {url}: {reason}")]
  Network { url: String, reason: String },

  /// Any other non-success status
  #[error("unexpected status {status} from {url}")]
  Status { url: String, status: u16 },

  #[error("failed to decode response from {url}: {reason}")]
  Decode { url: String, reason: String },
}

impl ClientError {
  /// Classify a reqwest failure that happened before a status was received.
  pub fn from_transport(url: &str, timeout: Duration, err: &reqwest::Error) -> Self {
    if err.is_timeout() {
      return ClientError::Timeout {
        url: url.to_string(),
        after: timeout,
      };
    }
    if err.is_connect() {
      return ClientError::ConnectionRefused {
        url: url.to_string(),
      };
    }
    ClientError::Network {
      url: url.to_string(),
      reason: err.to_string(),
    }
  }

  /// Classify a non-success HTTP status.
  pub fn from_status(url: &str, status: reqwest::StatusCode) -> Self {
    let url = url.to_string();
    match status.as_u16() {
      401 => ClientError::AuthRequired { url },
      404 => ClientError::NotFound { url },
      s if s >= 500 => ClientError::ServerError { url, status: s },
      s => ClientError::Status { url, status: s },
    }
  }

  /// Whether the failure came from the network path rather than from a
  /// well-formed backend answer or a local decision.
  pub fn is_network_failure(&self) -> bool {
    matches!(
      self,
      ClientError::Unreachable { .. }
        | ClientError::Timeout { .. }
        | ClientError::ConnectionRefused { .. }
        | ClientError::Network { .. }
        | ClientError::ServerError { .. }
    )
  }

  /// Whether replaying the same request may succeed.
  pub fn is_retryable(&self) -> bool {
    match self {
      ClientError::Timeout { .. }
      | ClientError::ConnectionRefused { .. }
      | ClientError::Network { .. }
      | ClientError::ServerError { .. } => true,
      ClientError::RefreshFailed { retryable, .. } => *retryable,
      _ => false,
    }
  }

  /// Remediation text for the manual "retry connection" action.
  pub fn user_message(&self, base_url: &str) -> String {
    match self {
      ClientError::Unreachable { .. } | ClientError::ConnectionRefused { .. } => format!(
        "Cannot reach the server at {}. Check that the backend is running and the URL is correct.",
        base_url
      ),
      ClientError::Timeout { .. } => format!(
        "The server at {} is not responding. It may be overloaded or the network is slow.",
        base_url
      ),
      ClientError::NotFound { .. } => format!(
        "The server at {} is up but has no health route. Check the API version and route configuration.",
        base_url
      ),
      ClientError::ServerError { status, .. } => format!(
        "The server at {} reported an internal error ({}). Try again shortly.",
        base_url, status
      ),
      ClientError::AuthRequired { .. } | ClientError::RefreshFailed { .. } => {
        "Your session has expired. Please sign in again.".to_string()
      }
      ClientError::Status { status, .. } => format!(
        "The server at {} rejected the request ({}). Check the allowed origins and proxy configuration.",
        base_url, status
      ),
      ClientError::Network { reason, .. } => {
        format!("Network error talking to {}: {}", base_url, reason)
      }
      ClientError::Throttled { .. } => "Too many requests. Please wait a moment.".to_string(),
      ClientError::Decode { .. } => {
        format!("The server at {} returned an unexpected response.", base_url)
      }
    }
  }
}
