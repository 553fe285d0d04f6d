//! Keeps the local view of remote agents in step with the bridge.

pub mod dispatcher;
pub mod execution;
pub mod history;
pub mod poller;
pub mod reconciler;
pub mod watch;

#[cfg(test)]
pub(crate) mod testing;

pub use dispatcher::ActionDispatcher;
pub use execution::{CommandRunner, PendingCommand};
pub use history::{CommandHistory, Direction, HISTORY_CAPACITY};
pub use poller::PollingDriver;
pub use reconciler::{AgentView, ListingView, Reconciler, SyncEvent};
pub use watch::{AgentWatch, ListingWatch};
