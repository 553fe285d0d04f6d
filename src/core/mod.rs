pub mod agent;
pub mod config;
pub mod envelope;
pub mod error;
pub mod execution;
pub mod ide;
pub mod session;
pub mod websocket;

pub use agent::{Action, ActionKind, Agent, AgentStatus, LogEntry, LogLevel};
pub use config::{ApplyPolicy, Config, ReconnectConfig, SyncConfig};
pub use error::{ActionError, FetchError, ParseError, RemoteError, TransportError};
pub use execution::{CommandOutput, ExecutionResult, ShellKind};
pub use session::{Credential, CredentialStore, SessionContext};
pub use websocket::{ConnectionState, Invalidation};
