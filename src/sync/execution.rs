use std::sync::Arc;

use super::history::{CommandHistory, Direction};
use crate::client::AgentRemote;
use crate::core::{ExecutionResult, ShellKind};

const FALLBACK_REASON: &str = "Request failed";

/// A command accepted by [`CommandRunner::begin`] that has not settled yet.
/// It carries everything needed to execute, so the runner stays free for
/// rendering while the request is in flight.
pub struct PendingCommand {
    remote: Arc<dyn AgentRemote>,
    shell: ShellKind,
    command: String,
    cwd: String,
}

impl PendingCommand {
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Run against the bridge. Never fails: a failed request becomes a
    /// result with exit code 1 and the reason on stderr.
    pub async fn execute(self) -> ExecutionResult {
        let cwd = match self.shell {
            ShellKind::Terminal if !self.cwd.is_empty() => Some(self.cwd.as_str()),
            _ => None,
        };
        // The git endpoint takes the subcommand alone
        let sent = match self.shell {
            ShellKind::Git => self
                .command
                .strip_prefix("git ")
                .map(str::trim_start)
                .unwrap_or(&self.command),
            ShellKind::Terminal => &self.command,
        };

        tracing::debug!("Running {} command: {}", self.shell, sent);
        match self.remote.run_command(self.shell, sent, cwd).await {
            Ok(output) => ExecutionResult {
                command: self.command,
                stdout: output.stdout,
                stderr: output.stderr,
                exit_code: output.exit_code,
                cwd: output.cwd.unwrap_or(self.cwd),
            },
            Err(e) => {
                tracing::warn!("{} command failed: {}", self.shell, e);
                let reason = e.reason().unwrap_or(FALLBACK_REASON).to_string();
                ExecutionResult::failed(self.command, reason, self.cwd)
            }
        }
    }
}

/// One shell session: the remote working directory, the local result stream
/// and the command history. At most one command runs at a time.
pub struct CommandRunner {
    remote: Arc<dyn AgentRemote>,
    shell: ShellKind,
    cwd: String,
    results: Vec<ExecutionResult>,
    history: CommandHistory,
    history_position: Option<usize>,
    running: bool,
}

impl CommandRunner {
    pub fn new(remote: Arc<dyn AgentRemote>, shell: ShellKind) -> Self {
        Self {
            remote,
            shell,
            cwd: String::new(),
            results: Vec::new(),
            history: CommandHistory::new(),
            history_position: None,
            running: false,
        }
    }

    pub fn shell(&self) -> ShellKind {
        self.shell
    }

    /// Working directory reported by the last command; empty until then
    pub fn cwd(&self) -> &str {
        &self.cwd
    }

    pub fn results(&self) -> &[ExecutionResult] {
        &self.results
    }

    pub fn history(&self) -> &CommandHistory {
        &self.history
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Accept `command` for execution. Returns `None` for blank input or
    /// while another command is still running.
    pub fn begin(&mut self, command: &str) -> Option<PendingCommand> {
        let command = command.trim();
        if command.is_empty() || self.running {
            return None;
        }
        self.history.push(command);
        self.history_position = None;
        self.running = true;

        Some(PendingCommand {
            remote: self.remote.clone(),
            shell: self.shell,
            command: command.to_string(),
            cwd: self.cwd.clone(),
        })
    }

    /// Append the result of the pending command and adopt its directory
    pub fn settle(&mut self, result: ExecutionResult) -> &ExecutionResult {
        self.running = false;
        if self.shell == ShellKind::Terminal {
            self.cwd = result.cwd.clone();
        }
        self.results.push(result);
        &self.results[self.results.len() - 1]
    }

    /// Begin, execute and settle in one step
    pub async fn run(&mut self, command: &str) -> Option<&ExecutionResult> {
        let pending = self.begin(command)?;
        let result = pending.execute().await;
        Some(self.settle(result))
    }

    /// Step through history, returning the text to put in the prompt
    pub fn recall(&mut self, direction: Direction) -> String {
        let (text, position) = self.history.navigate(direction, self.history_position);
        self.history_position = position;
        text
    }

    pub fn clear(&mut self) {
        self.results.clear();
    }
}
