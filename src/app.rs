use crate::event::{Event, EventHandler};
use crate::ui;
use color_eyre::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal::{
  disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use lifeline::connectivity::ConnectivityStatus;
use lifeline::health::ProbeResult;
use lifeline::scheduler::Scheduler;
use lifeline::session::SessionSnapshot;
use lifeline::ClientContext;
use ratatui::prelude::*;
use std::io::stdout;
use std::time::Duration;
use tokio::sync::mpsc;

/// Connectivity console state
pub struct App {
  ctx: ClientContext,

  status: ConnectivityStatus,
  session: SessionSnapshot,
  last_probe: Option<ProbeResult>,

  /// Last message shown in the footer
  notice: Option<String>,

  /// Event sender for async tasks
  event_tx: mpsc::UnboundedSender<Event>,

  should_quit: bool,
}

impl App {
  pub fn new(ctx: ClientContext) -> Self {
    let (tx, _rx) = mpsc::unbounded_channel();
    Self {
      status: ctx.status.status(),
      session: ctx.session.tick(),
      last_probe: None,
      notice: None,
      event_tx: tx,
      should_quit: false,
      ctx,
    }
  }

  pub async fn run(&mut self) -> Result<()> {
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let mut events = EventHandler::new(Duration::from_millis(250));
    self.event_tx = events.sender();
    events.forward(self.ctx.status.subscribe(), Event::Status);
    events.forward(self.ctx.session.subscribe(), Event::Session);

    let listener = self.ctx.spawn_status_listener();
    let scheduler = Scheduler {
      session: self.ctx.session.clone(),
      status: self.ctx.status.clone(),
      tick: self.ctx.tick_interval(),
      probe_every: self.ctx.probe_interval(),
    }
    .spawn();

    while !self.should_quit {
      terminal.draw(|frame| ui::draw(frame, self))?;

      if let Some(event) = events.next().await {
        self.handle_event(event);
      }
    }

    scheduler.abort();
    listener.abort();

    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    Ok(())
  }

  fn handle_event(&mut self, event: Event) {
    match event {
      Event::Key(key) => self.handle_key(key),
      Event::Tick => self.last_probe = self.ctx.status.last_probe(),
      Event::Status(status) => self.status = status,
      Event::Session(snapshot) => self.session = snapshot,
      Event::Notice(msg) => self.notice = Some(msg),
    }
  }

  fn handle_key(&mut self, key: KeyEvent) {
    match key.code {
      KeyCode::Char('q') | KeyCode::Esc => self.should_quit = true,
      KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
        self.should_quit = true;
      }
      KeyCode::Char('r') => self.retry_connection(),
      KeyCode::Char('f') => self.refresh_session(),
      _ => {}
    }
  }

  fn retry_connection(&mut self) {
    self.notice = Some("Probing backend...".to_string());
    let status = self.ctx.status.clone();
    let tx = self.event_tx.clone();
    tokio::spawn(async move {
      let msg = match status.retry().await {
        Ok(()) => "Backend reachable".to_string(),
        Err(_) => "Backend still unreachable".to_string(),
      };
      let _ = tx.send(Event::Notice(msg));
    });
  }

  fn refresh_session(&mut self) {
    if !self.ctx.session.is_authenticated() {
      self.notice = Some("No active session".to_string());
      return;
    }
    self.notice = Some("Refreshing session...".to_string());
    let session = self.ctx.session.clone();
    let tx = self.event_tx.clone();
    tokio::spawn(async move {
      let msg = match session.refresh().await {
        Ok(_) => "Session refreshed".to_string(),
        Err(e) => format!("Refresh failed: {}", e),
      };
      let _ = tx.send(Event::Notice(msg));
    });
  }

  // Accessors for UI

  pub fn base_url(&self) -> &str {
    self.ctx.config.api.base()
  }

  pub fn status(&self) -> &ConnectivityStatus {
    &self.status
  }

  pub fn session(&self) -> &SessionSnapshot {
    &self.session
  }

  pub fn last_probe(&self) -> Option<&ProbeResult> {
    self.last_probe.as_ref()
  }

  pub fn notice(&self) -> Option<&str> {
    self.notice.as_deref()
  }
}
