use serde::{Deserialize, Serialize};
use std::fmt;

/// Which remote shell a command is sent to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShellKind {
    Terminal,
    Git,
}

impl ShellKind {
    pub fn endpoint(&self) -> &'static str {
        match self {
            ShellKind::Terminal => "/ide/terminal/run",
            ShellKind::Git => "/ide/git/run",
        }
    }
}

impl fmt::Display for ShellKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShellKind::Terminal => f.write_str("terminal"),
            ShellKind::Git => f.write_str("git"),
        }
    }
}

/// Raw output of a remote command as reported by the bridge.
/// The git endpoint does not report a working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub cwd: Option<String>,
}

/// One settled command in a shell session's local output stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub cwd: String,
}

impl ExecutionResult {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }

    /// Result recorded when the remote call itself failed
    pub fn failed(command: String, reason: String, cwd: String) -> Self {
        Self {
            command,
            stdout: String::new(),
            stderr: reason,
            exit_code: 1,
            cwd,
        }
    }
}
