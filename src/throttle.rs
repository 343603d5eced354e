//! Per-key sliding-window request throttle.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Admission window for one request class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleWindow {
  pub interval: Duration,
  pub max_requests: usize,
}

impl Default for ThrottleWindow {
  fn default() -> Self {
    Self {
      interval: Duration::from_millis(2000),
      max_requests: 1,
    }
  }
}

/// Rate limiter keyed by request class.
///
/// Every key keeps the instants of its admitted requests. Old instants are
/// pruned when the key is checked again, so there is no background sweep.
#[derive(Debug, Default)]
pub struct RequestThrottle {
  windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RequestThrottle {
  pub fn new() -> Self {
    Self::default()
  }

  /// Decide whether a request for `key` may go out now, recording it if so.
  pub fn admit(&self, key: &str, window: ThrottleWindow) -> bool {
    let now = Instant::now();
    let mut windows = self
      .windows
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    let history = windows.entry(key.to_string()).or_default();

    // Instants are pushed in order, so the stale ones sit at the front
    while let Some(&oldest) = history.front() {
      if now.duration_since(oldest) >= window.interval {
        history.pop_front();
      } else {
        break;
      }
    }

    if history.len() >= window.max_requests {
      debug!(key, in_window = history.len(), "Throttle rejected request");
      return false;
    }

    history.push_back(now);
    true
  }

  /// Forget the history of one request class.
  pub fn reset(&self, key: &str) {
    let mut windows = self
      .windows
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    windows.remove(key);
  }

  /// Forget everything. Called on logout and hard refresh.
  pub fn reset_all(&self) {
    let mut windows = self
      .windows
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    windows.clear();
  }

  #[cfg(test)]
  fn recorded(&self, key: &str) -> usize {
    self
      .windows
      .lock()
      .unwrap()
      .get(key)
      .map(VecDeque::len)
      .unwrap_or(0)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tokio::time::advance;

  fn window(ms: u64, max: usize) -> ThrottleWindow {
    ThrottleWindow {
      interval: Duration::from_millis(ms),
      max_requests: max,
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_default_window_admits_one() {
    let throttle = RequestThrottle::new();
    assert!(throttle.admit("categories", ThrottleWindow::default()));
    assert!(!throttle.admit("categories", ThrottleWindow::default()));

    advance(Duration::from_millis(2000)).await;
    assert!(throttle.admit("categories", ThrottleWindow::default()));
  }

  #[tokio::test(start_paused = true)]
  async fn test_max_plus_one_yields_max_admissions() {
    for max in [1usize, 2, 5] {
      let throttle = RequestThrottle::new();
      let w = window(1000, max);

      let admitted = (0..=max).filter(|_| throttle.admit("k", w)).count();
      assert_eq!(admitted, max);
      // Rejections are never recorded
      assert_eq!(throttle.recorded("k"), max);

      advance(Duration::from_millis(1000)).await;
      assert!(throttle.admit("k", w));
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_burst_straddling_boundary_rejected() {
    let throttle = RequestThrottle::new();
    let w = window(1000, 2);

    assert!(throttle.admit("k", w));
    advance(Duration::from_millis(900)).await;
    assert!(throttle.admit("k", w));

    // A fixed bucket would have reset at t=1000
    advance(Duration::from_millis(200)).await;
    assert!(throttle.admit("k", w));
    assert!(!throttle.admit("k", w));

    advance(Duration::from_millis(700)).await;
    assert!(!throttle.admit("k", w));

    // The t=900 entry leaves the window at t=1900
    advance(Duration::from_millis(100)).await;
    assert!(throttle.admit("k", w));
  }

  #[tokio::test(start_paused = true)]
  async fn test_keys_are_independent() {
    let throttle = RequestThrottle::new();
    let w = ThrottleWindow::default();
    assert!(throttle.admit("a", w));
    assert!(throttle.admit("b", w));
    assert!(!throttle.admit("a", w));
  }

  #[tokio::test(start_paused = true)]
  async fn test_reset_and_reset_all() {
    let throttle = RequestThrottle::new();
    let w = ThrottleWindow::default();
    assert!(throttle.admit("a", w));
    assert!(throttle.admit("b", w));

    throttle.reset("a");
    assert!(throttle.admit("a", w));
    assert!(!throttle.admit("b", w));

    throttle.reset_all();
    assert!(throttle.admit("a", w));
    assert!(throttle.admit("b", w));
  }
}
