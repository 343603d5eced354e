mod header;

use crate::app::App;
use chrono::{Local, TimeDelta};
use lifeline::session::SessionState;
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};

/// Main draw function
pub fn draw(frame: &mut Frame, app: &App) {
  let banner_height = if app.status().shows_banner() { 4 } else { 0 };
  let chunks = Layout::default()
    .direction(Direction::Vertical)
    .constraints([
      Constraint::Length(1),             // Header
      Constraint::Length(banner_height), // Unreachable banner
      Constraint::Min(1),                // Details
      Constraint::Length(1),             // Status bar
    ])
    .split(frame.area());

  header::draw_header(frame, chunks[0], app.base_url(), app.status());
  if let Some(text) = app.status().banner_text() {
    draw_banner(frame, chunks[1], text);
  }
  draw_details(frame, chunks[2], app);
  draw_status_bar(frame, chunks[3], app);
}

fn draw_banner(frame: &mut Frame, area: Rect, text: &str) {
  let banner = Paragraph::new(text.to_string())
    .style(Style::default().fg(Color::White).bg(Color::Red))
    .wrap(Wrap { trim: true })
    .block(
      Block::default()
        .borders(Borders::ALL)
        .title(" Backend unreachable - press r to retry "),
    );
  frame.render_widget(banner, area);
}

fn draw_details(frame: &mut Frame, area: Rect, app: &App) {
  let dim = Style::default().fg(Color::DarkGray);
  let mut lines = Vec::new();

  lines.push(Line::from(vec![
    Span::styled("Last probe   ", dim),
    match app.last_probe() {
      Some(probe) if probe.available => Span::styled(
        format!(
          "ok via {} at {}",
          probe.endpoint.as_deref().unwrap_or("?"),
          probe.checked_at.with_timezone(&Local).format("%H:%M:%S")
        ),
        Style::default().fg(Color::Green),
      ),
      Some(probe) => Span::styled(
        format!(
          "failed at {}",
          probe.checked_at.with_timezone(&Local).format("%H:%M:%S")
        ),
        Style::default().fg(Color::Red),
      ),
      None => Span::styled("pending", dim),
    },
  ]));

  let session = app.session();
  lines.push(Line::from(vec![
    Span::styled("Session      ", dim),
    Span::styled(session.state.label(), session_style(session.state)),
  ]));
  if let Some(remaining) = session.remaining {
    lines.push(Line::from(vec![
      Span::styled("Expires in   ", dim),
      Span::raw(format_remaining(remaining)),
    ]));
  }
  if let Some(err) = &session.last_error {
    lines.push(Line::from(vec![
      Span::styled("Last error   ", dim),
      Span::styled(err.clone(), Style::default().fg(Color::Yellow)),
    ]));
  }

  let details = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title(" Status "));
  frame.render_widget(details, area);
}

fn draw_status_bar(frame: &mut Frame, area: Rect, app: &App) {
  let content = app.notice().unwrap_or(" r:retry  f:refresh session  q:quit");
  let paragraph = Paragraph::new(content.to_string()).style(Style::default().fg(Color::DarkGray));
  frame.render_widget(paragraph, area);
}

fn session_style(state: SessionState) -> Style {
  match state {
    SessionState::Valid => Style::default().fg(Color::Green),
    SessionState::ExpiringSoon => Style::default().fg(Color::Yellow),
    SessionState::Expired => Style::default().fg(Color::Red),
    SessionState::Unauthenticated => Style::default().fg(Color::DarkGray),
  }
}

/// `1h 02m 03s`, dropping leading zero units
fn format_remaining(remaining: TimeDelta) -> String {
  let secs = remaining.num_seconds().max(0);
  let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
  if h > 0 {
    format!("{}h {:02}m {:02}s", h, m, s)
  } else if m > 0 {
    format!("{}m {:02}s", m, s)
  } else {
    format!("{}s", s)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_format_remaining() {
    assert_eq!(format_remaining(TimeDelta::seconds(3723)), "1h 02m 03s");
    assert_eq!(format_remaining(TimeDelta::seconds(250)), "4m 10s");
    assert_eq!(format_remaining(TimeDelta::seconds(-5)), "0s");
  }
}
