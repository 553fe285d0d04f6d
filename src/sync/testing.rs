//! In-memory bridge used by the sync layer's unit tests

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::client::AgentRemote;
use crate::core::{
    Action, Agent, AgentStatus, CommandOutput, LogEntry, LogLevel, RemoteError, ShellKind,
};

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_740_000_000 + secs, 0).unwrap()
}

pub fn agent(id: &str, status: AgentStatus, last_active_secs: i64) -> Agent {
    Agent {
        id: id.to_string(),
        name: format!("Agent {}", id),
        status,
        last_active: at(last_active_secs),
        current_task: None,
        workspace: None,
        meta: BTreeMap::new(),
    }
}

pub fn entries(count: usize) -> Vec<LogEntry> {
    (0..count)
        .map(|i| LogEntry {
            timestamp: at(i as i64),
            level: if i % 2 == 0 {
                LogLevel::User
            } else {
                LogLevel::Agent
            },
            message: format!("message {}", i),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandCall {
    pub shell: ShellKind,
    pub command: String,
    pub cwd: Option<String>,
}

#[derive(Default)]
struct FakeState {
    agents: HashMap<String, Agent>,
    logs: HashMap<String, Vec<LogEntry>>,
    failing: bool,
    delay: Duration,
    agent_fetches: HashMap<String, usize>,
    actions: Vec<(String, Action)>,
    command_output: Option<Result<CommandOutput, RemoteError>>,
    commands: Vec<CommandCall>,
}

/// Bridge double. Actions change the fake agent the way the real bridge
/// eventually would, so a refresh after an action sees its effect.
#[derive(Default)]
pub struct FakeRemote {
    state: Mutex<FakeState>,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn set_agent(&self, agent: Agent) {
        self.state().agents.insert(agent.id.clone(), agent);
    }

    pub fn set_status(&self, agent_id: &str, status: AgentStatus) {
        if let Some(agent) = self.state().agents.get_mut(agent_id) {
            agent.status = status;
        }
    }

    pub fn set_logs(&self, agent_id: &str, logs: Vec<LogEntry>) {
        self.state().logs.insert(agent_id.to_string(), logs);
    }

    pub fn set_failing(&self, failing: bool) {
        self.state().failing = failing;
    }

    pub fn set_delay(&self, delay: Duration) {
        self.state().delay = delay;
    }

    pub fn set_command_output(&self, output: Result<CommandOutput, RemoteError>) {
        self.state().command_output = Some(output);
    }

    pub fn agent_fetches(&self, agent_id: &str) -> usize {
        self.state()
            .agent_fetches
            .get(agent_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn actions(&self) -> Vec<(String, Action)> {
        self.state().actions.clone()
    }

    pub fn commands(&self) -> Vec<CommandCall> {
        self.state().commands.clone()
    }

    async fn pause(&self) {
        let delay = self.state().delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn not_found() -> RemoteError {
        RemoteError::Http {
            status: 404,
            detail: Some("Agent not found".to_string()),
        }
    }
}

#[async_trait]
impl AgentRemote for FakeRemote {
    async fn list_agents(&self, all: bool) -> Result<Vec<Agent>, RemoteError> {
        self.pause().await;
        let state = self.state();
        if state.failing {
            return Err(RemoteError::Network("connection refused".to_string()));
        }
        let mut agents: Vec<Agent> = state
            .agents
            .values()
            .filter(|agent| all || agent.status.is_active())
            .cloned()
            .collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(agents)
    }

    async fn fetch_agent(&self, agent_id: &str) -> Result<Agent, RemoteError> {
        *self
            .state()
            .agent_fetches
            .entry(agent_id.to_string())
            .or_default() += 1;
        // Read state before the delay so a slow response carries old data
        let result = {
            let state = self.state();
            if state.failing {
                Err(RemoteError::Network("connection refused".to_string()))
            } else {
                state.agents.get(agent_id).cloned().ok_or_else(Self::not_found)
            }
        };
        self.pause().await;
        result
    }

    async fn fetch_logs(&self, agent_id: &str) -> Result<Vec<LogEntry>, RemoteError> {
        let result = {
            let state = self.state();
            if state.failing {
                Err(RemoteError::Network("connection refused".to_string()))
            } else {
                Ok(state.logs.get(agent_id).cloned().unwrap_or_default())
            }
        };
        self.pause().await;
        result
    }

    async fn perform(&self, agent_id: &str, action: &Action) -> Result<(), RemoteError> {
        self.pause().await;
        let mut state = self.state();
        if state.failing {
            return Err(Self::not_found());
        }
        state.actions.push((agent_id.to_string(), action.clone()));

        match action {
            Action::Start => {
                if let Some(agent) = state.agents.get_mut(agent_id) {
                    agent.status = AgentStatus::Starting;
                }
            }
            Action::Stop => {
                if let Some(agent) = state.agents.get_mut(agent_id) {
                    agent.status = AgentStatus::Stopped;
                }
            }
            Action::Approve => {
                if let Some(agent) = state.agents.get_mut(agent_id) {
                    agent.status = AgentStatus::Running;
                }
            }
            Action::SendMessage(text) => {
                let log = state.logs.entry(agent_id.to_string()).or_default();
                let next = log.len() as i64;
                log.push(LogEntry {
                    timestamp: at(next),
                    level: LogLevel::User,
                    message: format!("[You]: {}", text),
                });
            }
        }
        Ok(())
    }

    async fn run_command(
        &self,
        shell: ShellKind,
        command: &str,
        cwd: Option<&str>,
    ) -> Result<CommandOutput, RemoteError> {
        self.pause().await;
        let mut state = self.state();
        state.commands.push(CommandCall {
            shell,
            command: command.to_string(),
            cwd: cwd.map(str::to_string),
        });
        state.command_output.clone().unwrap_or_else(|| {
            Ok(CommandOutput {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: 0,
                cwd: cwd.map(str::to_string),
            })
        })
    }
}
