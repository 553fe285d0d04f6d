use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

/// Externally visible lifecycle of a remote agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Stopped,
    Starting,
    Running,
    WaitingApproval,
    Error,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Stopped => "stopped",
            AgentStatus::Starting => "starting",
            AgentStatus::Running => "running",
            AgentStatus::WaitingApproval => "waiting_approval",
            AgentStatus::Error => "error",
        }
    }

    /// Running and starting agents count as active on the dashboard
    pub fn is_active(&self) -> bool {
        matches!(self, AgentStatus::Running | AgentStatus::Starting)
    }

    /// Controls that make sense for an agent in this status
    pub fn available_actions(&self) -> &'static [ActionKind] {
        match self {
            AgentStatus::Stopped | AgentStatus::Error => &[ActionKind::Start],
            AgentStatus::Running => &[ActionKind::Stop, ActionKind::SendMessage],
            AgentStatus::WaitingApproval => &[ActionKind::Approve, ActionKind::SendMessage],
            AgentStatus::Starting => &[ActionKind::SendMessage],
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The class of a state-changing action, used for in-flight tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Start,
    Stop,
    Approve,
    SendMessage,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Start => "start",
            ActionKind::Stop => "stop",
            ActionKind::Approve => "approve",
            ActionKind::SendMessage => "message",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state-changing command issued against one agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
    Approve,
    SendMessage(String),
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Start => ActionKind::Start,
            Action::Stop => ActionKind::Stop,
            Action::Approve => ActionKind::Approve,
            Action::SendMessage(_) => ActionKind::SendMessage,
        }
    }

    /// Status the client may show right after the remote accepted the action.
    /// The next refresh always overrides it.
    pub fn optimistic_status(&self) -> Option<AgentStatus> {
        match self {
            Action::Start => Some(AgentStatus::Starting),
            Action::Stop => Some(AgentStatus::Stopped),
            Action::Approve | Action::SendMessage(_) => None,
        }
    }
}

/// Snapshot of a remote agent as returned by a fetch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub status: AgentStatus,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub last_active: DateTime<Utc>,
    #[serde(default)]
    pub current_task: Option<String>,
    #[serde(default)]
    pub workspace: Option<String>,
    #[serde(default)]
    pub meta: BTreeMap<String, serde_json::Value>,
}

impl Agent {
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LogLevel {
    User,
    Agent,
    System,
    Info,
    Warning,
    Error,
    Other(String),
}

impl LogLevel {
    pub fn as_str(&self) -> &str {
        match self {
            LogLevel::User => "user",
            LogLevel::Agent => "agent",
            LogLevel::System => "system",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Other(level) => level,
        }
    }

    pub fn is_chat(&self) -> bool {
        matches!(self, LogLevel::User | LogLevel::Agent)
    }
}

impl From<String> for LogLevel {
    fn from(level: String) -> Self {
        match level.to_lowercase().as_str() {
            "user" => LogLevel::User,
            "agent" => LogLevel::Agent,
            "system" => LogLevel::System,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warning,
            "error" => LogLevel::Error,
            _ => LogLevel::Other(level),
        }
    }
}

impl From<LogLevel> for String {
    fn from(level: LogLevel) -> Self {
        level.as_str().to_string()
    }
}

/// One line of an agent's append-only transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    /// Message text without the `[You]:` / `[Agent]:` prefix the backend adds
    pub fn chat_text(&self) -> &str {
        static PREFIX: OnceLock<Regex> = OnceLock::new();
        let prefix = PREFIX
            .get_or_init(|| Regex::new(r"(?i)^\[(you|agent)\]:\s*").expect("static regex is valid"));
        match prefix.find(&self.message) {
            Some(m) => &self.message[m.end()..],
            None => &self.message,
        }
    }
}

/// Chat entries (user and agent levels) in transcript order
pub fn chat_entries(entries: &[LogEntry]) -> impl Iterator<Item = &LogEntry> {
    entries.iter().filter(|entry| entry.level.is_chat())
}

/// Everything that is not chat: system, info, warnings, errors
pub fn system_entries(entries: &[LogEntry]) -> impl Iterator<Item = &LogEntry> {
    entries.iter().filter(|entry| !entry.level.is_chat())
}

// The bridge serializes Python datetimes, which are usually naive local
// timestamps without an offset. Those are read as UTC.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", raw)))
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    None
}
