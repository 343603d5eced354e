//! Single-flight execution: concurrent callers with the same key share one
//! underlying operation and all receive its result.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoalesceError {
  /// The operation panicked or its task was dropped before finishing
  #[error("in-flight operation aborted: {0}")]
  Aborted(String),
}

type Pending<T> = Shared<BoxFuture<'static, Result<T, CoalesceError>>>;
type Registry<K, T> = Arc<Mutex<HashMap<K, (u64, Pending<T>)>>>;

/// Registry of in-flight operations keyed by `K`.
///
/// The first caller for a key spawns the operation and stores a shared handle
/// to it; later callers attach to that handle instead of starting their own.
/// The operation runs on its own task and retires its own entry when it
/// finishes, so it completes and unregisters even if every caller stops
/// waiting.
pub struct Coalescer<K, T: Clone> {
  in_flight: Registry<K, T>,
  next_id: AtomicU64,
}

impl<K, T> Default for Coalescer<K, T>
where
  T: Clone,
{
  fn default() -> Self {
    Self {
      in_flight: Arc::new(Mutex::new(HashMap::new())),
      next_id: AtomicU64::new(0),
    }
  }
}

/// Removes the entry it was created for when dropped, including when the
/// operation panics or its task is dropped. A newer entry under the same key
/// is left alone.
struct Retire<K: Eq + Hash, T: Clone> {
  in_flight: Registry<K, T>,
  key: K,
  id: u64,
}

impl<K: Eq + Hash, T: Clone> Drop for Retire<K, T> {
  fn drop(&mut self) {
    let mut in_flight = self
      .in_flight
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    if in_flight.get(&self.key).is_some_and(|(id, _)| *id == self.id) {
      in_flight.remove(&self.key);
    }
  }
}

impl<K, T> Coalescer<K, T>
where
  K: Eq + Hash + Clone + Send + 'static,
  T: Clone + Send + Sync + 'static,
{
  pub fn new() -> Self {
    Self::default()
  }

  /// Run `start` unless an operation for `key` is already in flight, in which
  /// case wait for that one instead. `start` is only invoked by the leader.
  pub async fn run<F, Fut>(&self, key: K, start: F) -> Result<T, CoalesceError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T> + Send + 'static,
  {
    let (pending, leader) = {
      let mut in_flight = self
        .in_flight
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
      match in_flight.get(&key) {
        Some((_, existing)) => (existing.clone(), None),
        None => {
          let id = self.next_id.fetch_add(1, Ordering::Relaxed);
          let (tx, rx) = oneshot::channel();
          let pending: Pending<T> = async move {
            rx.await
              .map_err(|_| CoalesceError::Aborted("operation ended without a result".to_string()))
          }
          .boxed()
          .shared();
          in_flight.insert(key.clone(), (id, pending.clone()));
          let retire = Retire {
            in_flight: self.in_flight.clone(),
            key,
            id,
          };
          (pending, Some((tx, retire)))
        }
      }
    };

    if let Some((tx, retire)) = leader {
      let operation = start();
      tokio::spawn(async move {
        let value = operation.await;
        // Unregister before publishing so a caller arriving after the result
        // starts a fresh operation
        drop(retire);
        let _ = tx.send(value);
      });
    }

    pending.await
  }

  /// Whether an operation for `key` is currently in flight.
  pub fn is_pending(&self, key: &K) -> bool {
    self
      .in_flight
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
      .contains_key(key)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicUsize;
  use std::time::Duration;

  #[tokio::test]
  async fn test_concurrent_callers_share_one_run() {
    let coalescer: Arc<Coalescer<&'static str, u32>> = Arc::new(Coalescer::new());
    let runs = Arc::new(AtomicUsize::new(0));

    let calls = (0..5).map(|_| {
      let coalescer = coalescer.clone();
      let runs = runs.clone();
      async move {
        coalescer
          .run("refresh", move || async move {
            runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            42
          })
          .await
      }
    });

    let results = futures::future::join_all(calls).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(results.iter().all(|r| r == &Ok(42)));
    assert!(!coalescer.is_pending(&"refresh"));
  }

  #[tokio::test]
  async fn test_sequential_callers_each_run() {
    let coalescer: Coalescer<u8, usize> = Coalescer::new();
    let runs = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
      let runs = runs.clone();
      coalescer
        .run(1, move || async move { runs.fetch_add(1, Ordering::SeqCst) })
        .await
        .unwrap();
    }
    assert_eq!(runs.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn test_distinct_keys_do_not_share() {
    let coalescer: Arc<Coalescer<u8, u8>> = Arc::new(Coalescer::new());
    let (a, b) = tokio::join!(
      coalescer.run(1, || async { 1 }),
      coalescer.run(2, || async { 2 })
    );
    assert_eq!(a, Ok(1));
    assert_eq!(b, Ok(2));
  }

  #[tokio::test]
  async fn test_panicking_operation_reports_aborted() {
    let coalescer: Coalescer<u8, u8> = Coalescer::new();
    let result = coalescer
      .run(1, || async {
        let fail = true;
        if fail {
          panic!("boom");
        }
        1
      })
      .await;
    assert!(matches!(result, Err(CoalesceError::Aborted(_))));
    assert!(!coalescer.is_pending(&1));
  }

  #[tokio::test]
  async fn test_abandoned_operation_retires_itself() {
    let coalescer: Coalescer<u8, usize> = Coalescer::new();
    let runs = Arc::new(AtomicUsize::new(0));

    let slow = {
      let runs = runs.clone();
      move || async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        runs.fetch_add(1, Ordering::SeqCst) + 1
      }
    };
    // The only caller gives up before the operation finishes
    let gave_up = tokio::time::timeout(Duration::from_millis(10), coalescer.run(1, slow)).await;
    assert!(gave_up.is_err());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(!coalescer.is_pending(&1));

    let again = {
      let runs = runs.clone();
      move || async move { runs.fetch_add(1, Ordering::SeqCst) + 1 }
    };
    assert_eq!(coalescer.run(1, again).await, Ok(2));
    assert_eq!(runs.load(Ordering::SeqCst), 2);
  }
}
