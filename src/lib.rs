// bridgeview library
// Live view and control of remote coding agents behind a mobile bridge

pub mod cli;
pub mod client;
pub mod core;
pub mod sync;
pub mod tui;
pub mod utils;

// Re-export commonly used types
pub use client::{AgentRemote, BridgeClient, RealtimeChannel};
pub use core::{Config, SessionContext};
pub use sync::{ActionDispatcher, AgentWatch, CommandRunner, Reconciler};

// Error handling
pub use anyhow::{Error, Result};
