use async_trait::async_trait;

use crate::core::{Action, Agent, CommandOutput, LogEntry, RemoteError, ShellKind};

/// The bridge operations the sync layer depends on.
///
/// `BridgeClient` implements this over HTTP; tests substitute in-memory fakes
/// to control ordering and latency of responses.
#[async_trait]
pub trait AgentRemote: Send + Sync {
    async fn list_agents(&self, all: bool) -> Result<Vec<Agent>, RemoteError>;

    async fn fetch_agent(&self, agent_id: &str) -> Result<Agent, RemoteError>;

    async fn fetch_logs(&self, agent_id: &str) -> Result<Vec<LogEntry>, RemoteError>;

    async fn perform(&self, agent_id: &str, action: &Action) -> Result<(), RemoteError>;

    async fn run_command(
        &self,
        shell: ShellKind,
        command: &str,
        cwd: Option<&str>,
    ) -> Result<CommandOutput, RemoteError>;
}
