//! Session token lifecycle: expiry tracking, proactive and on-demand renewal.

mod monitor;
mod refresher;
mod store;

pub use monitor::{TokenMonitor, TokenMonitorBuilder};
pub use refresher::{HttpTokenRefresher, TokenRefresher};
pub use store::SessionStore;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The active credential of a client.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionToken {
  pub token: String,
  pub expires_at: DateTime<Utc>,
}

impl SessionToken {
  pub fn new(token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
    Self {
      token: token.into(),
      expires_at,
    }
  }

  /// Token valid for `ttl` from now.
  pub fn expiring_in(token: impl Into<String>, ttl: Duration) -> Self {
    Self::new(token, Utc::now() + ttl)
  }

  pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
    self.expires_at - now
  }
}

impl fmt::Debug for SessionToken {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SessionToken")
      .field("token", &"<redacted>")
      .field("expires_at", &self.expires_at)
      .finish()
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
  Unauthenticated,
  Valid,
  ExpiringSoon,
  Expired,
}

impl SessionState {
  /// State of a held token given its remaining lifetime.
  pub fn classify(remaining: Duration, warning_threshold: Duration) -> Self {
    if remaining <= Duration::zero() {
      SessionState::Expired
    } else if remaining < warning_threshold {
      SessionState::ExpiringSoon
    } else {
      SessionState::Valid
    }
  }

  pub fn needs_refresh(&self) -> bool {
    matches!(self, SessionState::ExpiringSoon | SessionState::Expired)
  }

  pub fn label(&self) -> &'static str {
    match self {
      SessionState::Unauthenticated => "signed out",
      SessionState::Valid => "valid",
      SessionState::ExpiringSoon => "expiring soon",
      SessionState::Expired => "expired",
    }
  }
}

/// What readers of the session see, republished on every tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
  pub state: SessionState,
  pub expires_at: Option<DateTime<Utc>>,
  /// Remaining lifetime, clamped at zero
  pub remaining: Option<Duration>,
  pub last_error: Option<String>,
}

impl SessionSnapshot {
  pub fn unauthenticated() -> Self {
    Self {
      state: SessionState::Unauthenticated,
      expires_at: None,
      remaining: None,
      last_error: None,
    }
  }

  pub fn has_token(&self) -> bool {
    self.state != SessionState::Unauthenticated
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn threshold() -> Duration {
    Duration::milliseconds(300_000)
  }

  #[test]
  fn test_classify_boundaries() {
    assert_eq!(
      SessionState::classify(Duration::milliseconds(300_000), threshold()),
      SessionState::Valid
    );
    assert_eq!(
      SessionState::classify(Duration::milliseconds(299_999), threshold()),
      SessionState::ExpiringSoon
    );
    assert_eq!(
      SessionState::classify(Duration::milliseconds(250_000), threshold()),
      SessionState::ExpiringSoon
    );
    assert_eq!(
      SessionState::classify(Duration::zero(), threshold()),
      SessionState::Expired
    );
    assert_eq!(
      SessionState::classify(Duration::seconds(-5), threshold()),
      SessionState::Expired
    );
  }

  #[test]
  fn test_token_debug_is_redacted() {
    let token = SessionToken::expiring_in("secret-value", Duration::hours(1));
    let rendered = format!("{:?}", token);
    assert!(!rendered.contains("secret-value"));
  }

  #[test]
  fn test_token_serializes_camel_case() {
    let token = SessionToken::new(
      "abc",
      DateTime::parse_from_rfc3339("2030-01-01T00:00:00Z")
        .unwrap()
        .with_timezone(&Utc),
    );
    let json = serde_json::to_value(&token).unwrap();
    assert_eq!(json["token"], "abc");
    assert_eq!(json["expiresAt"], "2030-01-01T00:00:00Z");
  }
}
