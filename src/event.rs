use crossterm::event::{self, Event as CrosstermEvent, KeyEvent};
use lifeline::connectivity::ConnectivityStatus;
use lifeline::session::SessionSnapshot;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Console events
#[derive(Debug)]
pub enum Event {
  /// Terminal key press
  Key(KeyEvent),
  /// Periodic tick for redraws
  Tick,
  Status(ConnectivityStatus),
  Session(SessionSnapshot),
  /// One-line message for the footer
  Notice(String),
}

/// Merges terminal input, a tick timer and background updates into one stream
pub struct EventHandler {
  tx: mpsc::UnboundedSender<Event>,
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  pub fn new(tick_rate: Duration) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    // crossterm polling blocks, keep it off the async workers
    let input_tx = tx.clone();
    tokio::task::spawn_blocking(move || loop {
      if event::poll(tick_rate).unwrap_or(false) {
        if let Ok(CrosstermEvent::Key(key)) = event::read() {
          if input_tx.send(Event::Key(key)).is_err() {
            break;
          }
        }
      } else if input_tx.send(Event::Tick).is_err() {
        break;
      }
    });

    Self { tx, rx }
  }

  pub fn sender(&self) -> mpsc::UnboundedSender<Event> {
    self.tx.clone()
  }

  /// Forward every change of a watch channel as an event.
  pub fn forward<T, F>(&self, mut updates: watch::Receiver<T>, wrap: F)
  where
    T: Clone + Send + Sync + 'static,
    F: Fn(T) -> Event + Send + 'static,
  {
    let tx = self.tx.clone();
    tokio::spawn(async move {
      while updates.changed().await.is_ok() {
        let value = updates.borrow_and_update().clone();
        if tx.send(wrap(value)).is_err() {
          break;
        }
      }
    });
  }

  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}
