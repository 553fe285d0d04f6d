use anyhow::Result;
use chrono::Utc;
use crossterm::event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind};
use futures_util::StreamExt;
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
    Frame,
};
use tokio::sync::{broadcast::error::RecvError, mpsc};
use tokio::time::Duration;

use super::{is_ctrl, is_quit, tail_scroll, Screen};
use crate::core::agent::{chat_entries, system_entries};
use crate::core::{Action, ActionError, ActionKind, ConnectionState, LogLevel};
use crate::sync::{ActionDispatcher, AgentView, AgentWatch, Reconciler, SyncEvent};
use crate::utils::display::{
    connection_color, initials, relative_time, status_color, status_label,
};

/// What a key press asks the screen to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Quit,
    Dispatch(Action),
    Refresh,
    Redraw,
    Nothing,
}

/// Editable state of the agent screen, kept apart from the terminal
#[derive(Debug, Default)]
pub struct AgentPanel {
    pub input: String,
    pub show_system: bool,
    pub status_message: String,
    // Message text awaiting the bridge's answer
    pending_message: Option<String>,
}

impl AgentPanel {
    pub fn handle_key(&mut self, key: &KeyEvent) -> Intent {
        if is_quit(key) {
            return Intent::Quit;
        }
        if is_ctrl(key, 's') {
            return Intent::Dispatch(Action::Start);
        }
        if is_ctrl(key, 'x') {
            return Intent::Dispatch(Action::Stop);
        }
        if is_ctrl(key, 'a') {
            return Intent::Dispatch(Action::Approve);
        }
        if is_ctrl(key, 'r') {
            return Intent::Refresh;
        }

        match key.code {
            KeyCode::Tab => {
                self.show_system = !self.show_system;
                Intent::Redraw
            }
            KeyCode::Enter => {
                if self.input.trim().is_empty() || self.pending_message.is_some() {
                    return Intent::Nothing;
                }
                self.pending_message = Some(self.input.clone());
                Intent::Dispatch(Action::SendMessage(self.input.trim().to_string()))
            }
            KeyCode::Backspace => {
                self.input.pop();
                Intent::Redraw
            }
            KeyCode::Char(c) => {
                self.input.push(c);
                Intent::Redraw
            }
            _ => Intent::Nothing,
        }
    }

    /// Record an action's outcome. A sent message leaves the input only if
    /// the user has not edited it since.
    pub fn action_finished(&mut self, kind: ActionKind, result: &Result<(), ActionError>) {
        if kind == ActionKind::SendMessage {
            if let Some(sent) = self.pending_message.take() {
                if result.is_ok() && self.input == sent {
                    self.input.clear();
                }
            }
        }
        self.status_message = match result {
            Ok(()) => format!("{} done", kind),
            Err(e) => e.to_string(),
        };
    }
}

pub struct AgentTui {
    screen: Screen,
    watch: AgentWatch,
    reconciler: Reconciler,
    dispatcher: ActionDispatcher,
    panel: AgentPanel,
    view: AgentView,
}

impl AgentTui {
    pub fn new(watch: AgentWatch, reconciler: Reconciler, dispatcher: ActionDispatcher) -> Result<Self> {
        Ok(Self {
            screen: Screen::enter()?,
            watch,
            reconciler,
            dispatcher,
            panel: AgentPanel {
                status_message: "Loading…".to_string(),
                ..AgentPanel::default()
            },
            view: AgentView::default(),
        })
    }

    pub async fn run(mut self) -> Result<()> {
        let agent_id = self.watch.agent_id().to_string();
        let mut event_stream = EventStream::new();
        let mut sync_events = self.reconciler.subscribe();
        let mut connection = self.watch.watch_connection();
        let mut polling = self.watch.watch_polling();
        let mut clock = tokio::time::interval(Duration::from_secs(1));
        let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel();

        self.view = self.watch.view().await;
        self.draw()?;

        loop {
            tokio::select! {
                biased;
                maybe_event = event_stream.next() => match maybe_event {
                    Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                        match self.panel.handle_key(&key) {
                            Intent::Quit => break,
                            Intent::Dispatch(action) => {
                                let kind = action.kind();
                                self.panel.status_message = format!("Sending {}…", kind);
                                let dispatcher = self.dispatcher.clone();
                                let agent_id = agent_id.clone();
                                let outcome_tx = outcome_tx.clone();
                                tokio::spawn(async move {
                                    let result = dispatcher.dispatch(&agent_id, action).await;
                                    let _ = outcome_tx.send((kind, result));
                                });
                            }
                            Intent::Refresh => {
                                self.panel.status_message = "Refreshing…".to_string();
                                let reconciler = self.reconciler.clone();
                                let agent_id = agent_id.clone();
                                tokio::spawn(async move {
                                    let _ = reconciler.refresh(&agent_id).await;
                                });
                            }
                            Intent::Redraw | Intent::Nothing => {}
                        }
                        self.draw()?;
                    }
                    Some(Ok(Event::Resize(width, height))) => {
                        tracing::debug!("Terminal resized to {}x{}", width, height);
                        self.draw()?;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => tracing::warn!("Event stream error: {:?}", e),
                    None => break,
                },
                Some((kind, result)) = outcome_rx.recv() => {
                    self.panel.action_finished(kind, &result);
                    self.view = self.watch.view().await;
                    self.draw()?;
                }
                event = sync_events.recv() => {
                    match event {
                        Ok(SyncEvent::Listing { .. }) => continue,
                        Ok(_) | Err(RecvError::Lagged(_)) => {}
                        Err(RecvError::Closed) => break,
                    }
                    self.view = self.watch.view().await;
                    if !self.view.stale && self.panel.status_message.starts_with("Loading") {
                        self.panel.status_message.clear();
                    }
                    self.draw()?;
                }
                Ok(()) = connection.changed() => self.draw()?,
                Ok(()) = polling.changed() => self.draw()?,
                _ = clock.tick() => self.draw()?,
            }
        }

        drop(self.screen);
        self.watch.deactivate().await;
        Ok(())
    }

    fn draw(&mut self) -> Result<()> {
        let view = &self.view;
        let panel = &self.panel;
        let agent_id = self.watch.agent_id();
        let connection = self.watch.connection_state();
        let polling = self.watch.is_polling();
        let dispatcher = &self.dispatcher;

        self.screen.terminal().draw(|f| {
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints([
                    Constraint::Length(3), // Header
                    Constraint::Length(4), // Details
                    Constraint::Min(5),    // Conversation
                    Constraint::Length(3), // Input
                    Constraint::Length(1), // Footer
                ])
                .split(f.area());

            draw_header(f, chunks[0], agent_id, view, connection, polling);
            draw_details(f, chunks[1], view);

            if panel.show_system {
                let columns = Layout::default()
                    .direction(Direction::Horizontal)
                    .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
                    .split(chunks[2]);
                draw_conversation(f, columns[0], view);
                draw_system_events(f, columns[1], view);
            } else {
                draw_conversation(f, chunks[2], view);
            }

            let sending = dispatcher.is_in_flight(agent_id, ActionKind::SendMessage);
            draw_input(f, chunks[3], &panel.input, sending);
            draw_controls(f, chunks[4], agent_id, view, dispatcher, &panel.status_message);
        })?;
        Ok(())
    }
}

fn draw_header(
    f: &mut Frame,
    area: Rect,
    agent_id: &str,
    view: &AgentView,
    connection: ConnectionState,
    polling: bool,
) {
    let mut spans = Vec::new();
    match &view.snapshot {
        Some(agent) => {
            spans.push(Span::styled(
                format!("[{}] ", initials(agent.display_name())),
                Style::default().fg(Color::Cyan),
            ));
            spans.push(Span::styled(
                agent.display_name().to_string(),
                Style::default().add_modifier(Modifier::BOLD),
            ));
            spans.push(Span::styled(
                format!(" ({})  ", agent.id),
                Style::default().fg(Color::Gray),
            ));
            spans.push(Span::styled(
                status_label(agent.status),
                Style::default()
                    .fg(status_color(agent.status))
                    .add_modifier(Modifier::BOLD),
            ));
        }
        None => spans.push(Span::raw(format!("Agent {}", agent_id))),
    }

    spans.push(Span::raw("  "));
    spans.push(Span::styled(
        format!("live: {}", connection),
        Style::default().fg(connection_color(connection)),
    ));
    if polling {
        spans.push(Span::styled("  polling", Style::default().fg(Color::Cyan)));
    }
    if view.stale {
        spans.push(Span::styled(
            "  stale",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        ));
    }

    let header = Paragraph::new(Line::from(spans)).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Blue)),
    );
    f.render_widget(header, area);
}

fn draw_details(f: &mut Frame, area: Rect, view: &AgentView) {
    let label = Style::default()
        .fg(Color::Yellow)
        .add_modifier(Modifier::BOLD);
    let mut lines = Vec::new();

    if let Some(agent) = &view.snapshot {
        lines.push(Line::from(vec![
            Span::styled("Task: ", label),
            Span::raw(agent.current_task.as_deref().unwrap_or("idle").to_string()),
            Span::styled("   Last active: ", label),
            Span::raw(relative_time(agent.last_active, Utc::now())),
        ]));
        if !agent.meta.is_empty() {
            let meta = agent
                .meta
                .iter()
                .map(|(key, value)| match value {
                    serde_json::Value::String(text) => format!("{}={}", key, text),
                    other => format!("{}={}", key, other),
                })
                .collect::<Vec<_>>()
                .join("  ");
            lines.push(Line::from(vec![Span::styled("Meta: ", label), Span::raw(meta)]));
        }
    }

    let details = Paragraph::new(lines)
        .block(Block::default().borders(Borders::LEFT | Borders::RIGHT))
        .wrap(Wrap { trim: true });
    f.render_widget(details, area);
}

fn draw_conversation(f: &mut Frame, area: Rect, view: &AgentView) {
    let block = Block::default()
        .title("Conversation")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Green));

    let lines: Vec<Line> = chat_entries(&view.transcript)
        .map(|entry| {
            let (who, color) = match entry.level {
                LogLevel::User => ("You", Color::Cyan),
                _ => ("Agent", Color::Magenta),
            };
            Line::from(vec![
                Span::styled(
                    format!("{} ", entry.timestamp.format("%H:%M")),
                    Style::default().fg(Color::DarkGray),
                ),
                Span::styled(
                    format!("{}: ", who),
                    Style::default().fg(color).add_modifier(Modifier::BOLD),
                ),
                Span::raw(entry.chat_text().to_string()),
            ])
        })
        .collect();

    if lines.is_empty() {
        let empty = Paragraph::new("No messages yet")
            .style(Style::default().fg(Color::Gray))
            .alignment(Alignment::Center)
            .block(block);
        f.render_widget(empty, area);
        return;
    }

    let scroll = tail_scroll(lines.len(), area.height);
    let conversation = Paragraph::new(lines)
        .block(block)
        .wrap(Wrap { trim: false })
        .scroll((scroll, 0));
    f.render_widget(conversation, area);
}

fn draw_system_events(f: &mut Frame, area: Rect, view: &AgentView) {
    let block = Block::default()
        .title("System events")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Blue));

    let lines: Vec<Line> = system_entries(&view.transcript)
        .map(|entry| {
            let level_color = match entry.level {
                LogLevel::Error => Color::Red,
                LogLevel::Warning => Color::Yellow,
                LogLevel::Info => Color::Cyan,
                _ => Color::Gray,
            };
            Line::from(vec![
                Span::styled(
                    format!("[{}] ", entry.timestamp.format("%H:%M:%S")),
                    Style::default().fg(Color::Gray),
                ),
                Span::styled(
                    format!("{:<7} ", entry.level.as_str()),
                    Style::default().fg(level_color).add_modifier(Modifier::BOLD),
                ),
                Span::raw(entry.message.clone()),
            ])
        })
        .collect();

    let scroll = tail_scroll(lines.len(), area.height);
    let events = Paragraph::new(lines)
        .block(block)
        .wrap(Wrap { trim: true })
        .scroll((scroll, 0));
    f.render_widget(events, area);
}

fn draw_input(f: &mut Frame, area: Rect, input: &str, sending: bool) {
    let (title, color) = if sending {
        ("Message (sending…)", Color::DarkGray)
    } else {
        ("Message", Color::White)
    };
    let input = Paragraph::new(format!("> {}", input))
        .style(Style::default().fg(color))
        .block(Block::default().title(title).borders(Borders::ALL));
    f.render_widget(input, area);
}

fn draw_controls(
    f: &mut Frame,
    area: Rect,
    agent_id: &str,
    view: &AgentView,
    dispatcher: &ActionDispatcher,
    status_message: &str,
) {
    let available = view
        .snapshot
        .as_ref()
        .map(|agent| agent.status.available_actions())
        .unwrap_or(&[]);

    let mut spans = Vec::new();
    for (kind, keys) in [
        (ActionKind::Start, "^S start"),
        (ActionKind::Stop, "^X stop"),
        (ActionKind::Approve, "^A approve"),
    ] {
        let style = if dispatcher.is_in_flight(agent_id, kind) || !available.contains(&kind) {
            Style::default().fg(Color::DarkGray)
        } else {
            Style::default().fg(Color::White).add_modifier(Modifier::BOLD)
        };
        spans.push(Span::styled(keys, style));
        spans.push(Span::raw(" | "));
    }
    spans.push(Span::styled(
        "^R refresh | Tab events | Esc quit",
        Style::default().fg(Color::Gray),
    ));
    if !status_message.is_empty() {
        spans.push(Span::raw("   "));
        spans.push(Span::styled(
            status_message.to_string(),
            Style::default().fg(Color::Yellow),
        ));
    }

    f.render_widget(Paragraph::new(Line::from(spans)), area);
}
