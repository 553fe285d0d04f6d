use anyhow::Result;
use crossterm::event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind};
use futures_util::StreamExt;
use ratatui::{
    layout::{Constraint, Direction as LayoutDirection, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
    Frame,
};
use tokio::sync::mpsc;

use super::{is_ctrl, is_quit, tail_scroll, Screen};
use crate::core::{ExecutionResult, ShellKind};
use crate::sync::{CommandRunner, Direction, PendingCommand};
use crate::utils::display::shorten_cwd;

/// Key handling for the shell prompt, without a terminal attached
pub struct ShellPrompt {
    pub runner: CommandRunner,
    pub input: String,
}

pub enum PromptAction {
    Quit,
    Run(PendingCommand),
    Redraw,
}

impl ShellPrompt {
    pub fn new(runner: CommandRunner) -> Self {
        Self {
            runner,
            input: String::new(),
        }
    }

    pub fn handle_key(&mut self, key: &KeyEvent) -> PromptAction {
        if is_quit(key) {
            return PromptAction::Quit;
        }
        if is_ctrl(key, 'l') {
            self.runner.clear();
            return PromptAction::Redraw;
        }

        match key.code {
            KeyCode::Enter => match self.runner.begin(&self.input) {
                Some(pending) => {
                    self.input.clear();
                    PromptAction::Run(pending)
                }
                None => PromptAction::Redraw,
            },
            KeyCode::Up => {
                self.input = self.runner.recall(Direction::Up);
                PromptAction::Redraw
            }
            KeyCode::Down => {
                self.input = self.runner.recall(Direction::Down);
                PromptAction::Redraw
            }
            KeyCode::Backspace => {
                self.input.pop();
                PromptAction::Redraw
            }
            KeyCode::Char(c) => {
                self.input.push(c);
                PromptAction::Redraw
            }
            _ => PromptAction::Redraw,
        }
    }
}

pub struct ShellTui {
    screen: Screen,
    prompt: ShellPrompt,
}

impl ShellTui {
    pub fn new(runner: CommandRunner) -> Result<Self> {
        Ok(Self {
            screen: Screen::enter()?,
            prompt: ShellPrompt::new(runner),
        })
    }

    pub async fn run(mut self) -> Result<()> {
        let mut event_stream = EventStream::new();
        let (result_tx, mut result_rx) = mpsc::unbounded_channel::<ExecutionResult>();
        self.draw()?;

        loop {
            tokio::select! {
                biased;
                maybe_event = event_stream.next() => match maybe_event {
                    Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                        match self.prompt.handle_key(&key) {
                            PromptAction::Quit => break,
                            PromptAction::Run(pending) => {
                                tracing::info!("Running: {}", pending.command());
                                let result_tx = result_tx.clone();
                                tokio::spawn(async move {
                                    let _ = result_tx.send(pending.execute().await);
                                });
                            }
                            PromptAction::Redraw => {}
                        }
                        self.draw()?;
                    }
                    Some(Ok(Event::Resize(..))) => self.draw()?,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => tracing::warn!("Event stream error: {:?}", e),
                    None => break,
                },
                Some(result) = result_rx.recv() => {
                    self.prompt.runner.settle(result);
                    self.draw()?;
                }
            }
        }
        Ok(())
    }

    fn draw(&mut self) -> Result<()> {
        let prompt = &self.prompt;
        self.screen.terminal().draw(|f| {
            let chunks = Layout::default()
                .direction(LayoutDirection::Vertical)
                .constraints([
                    Constraint::Length(1), // cwd
                    Constraint::Min(3),    // Output
                    Constraint::Length(3), // Input
                    Constraint::Length(1), // Footer
                ])
                .split(f.area());

            let title = match prompt.runner.shell() {
                ShellKind::Terminal => "Terminal",
                ShellKind::Git => "Git",
            };
            let header = Line::from(vec![
                Span::styled(
                    format!("{} ", title),
                    Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
                ),
                Span::styled(
                    shorten_cwd(prompt.runner.cwd()),
                    Style::default().fg(Color::Gray),
                ),
            ]);
            f.render_widget(Paragraph::new(header), chunks[0]);

            draw_results(f, chunks[1], prompt.runner.results());

            let (label, color) = if prompt.runner.is_running() {
                ("Running…", Color::DarkGray)
            } else {
                ("Command", Color::White)
            };
            let input = Paragraph::new(format!("$ {}", prompt.input))
                .style(Style::default().fg(color))
                .block(Block::default().title(label).borders(Borders::ALL));
            f.render_widget(input, chunks[2]);

            let footer = Paragraph::new("Enter run | ↑/↓ history | ^L clear | Esc quit")
                .style(Style::default().fg(Color::Gray));
            f.render_widget(footer, chunks[3]);
        })?;
        Ok(())
    }
}

fn draw_results(f: &mut Frame, area: Rect, results: &[ExecutionResult]) {
    let mut lines = Vec::new();
    for result in results {
        lines.push(Line::from(vec![
            Span::styled("$ ", Style::default().fg(Color::Green)),
            Span::styled(
                result.command.clone(),
                Style::default().add_modifier(Modifier::BOLD),
            ),
        ]));
        lines.extend(result.stdout.lines().map(|line| Line::raw(line.to_string())));
        lines.extend(
            result
                .stderr
                .lines()
                .map(|line| Line::styled(line.to_string(), Style::default().fg(Color::Red))),
        );
        if !result.succeeded() {
            lines.push(Line::styled(
                format!("exit {}", result.exit_code),
                Style::default().fg(Color::Yellow),
            ));
        }
    }

    let scroll = tail_scroll(lines.len(), area.height);
    let output = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL))
        .wrap(Wrap { trim: false })
        .scroll((scroll, 0));
    f.render_widget(output, area);
}
