pub mod http;
pub mod realtime;
pub mod remote;

pub use http::BridgeClient;
pub use realtime::{RealtimeChannel, RealtimeFeed};
pub use remote::AgentRemote;
