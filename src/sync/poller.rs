use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::reconciler::Reconciler;
use crate::core::AgentStatus;

/// Periodic refresh of one running agent.
///
/// The first tick fires one interval after start. A tick only fetches while
/// the held status is `running`; otherwise the driver ends itself. Refreshes
/// are spawned, so a slow one does not delay the next tick.
pub struct PollingDriver {
    agent_id: String,
    task: JoinHandle<()>,
}

impl PollingDriver {
    pub fn start(reconciler: Reconciler, agent_id: &str, interval: Duration) -> Self {
        let id = agent_id.to_string();
        tracing::debug!("Polling {} every {}ms", id, interval.as_millis());
        let task = tokio::spawn(poll(reconciler, id.clone(), interval));
        Self { agent_id: id, task }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn stop(&self) {
        if !self.task.is_finished() {
            tracing::debug!("Stopped polling {}", self.agent_id);
        }
        self.task.abort();
    }
}

impl Drop for PollingDriver {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn poll(reconciler: Reconciler, agent_id: String, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let status = reconciler.status(&agent_id).await;
        if status != Some(AgentStatus::Running) {
            tracing::debug!(
                "Agent {} is {}, polling ends",
                agent_id,
                status.map(|s| s.as_str()).unwrap_or("gone")
            );
            break;
        }

        let reconciler = reconciler.clone();
        let agent_id = agent_id.clone();
        tokio::spawn(async move {
            // Already logged by the reconciler
            let _ = reconciler.refresh(&agent_id).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ApplyPolicy;
    use crate::sync::testing::{agent, FakeRemote};

    #[tokio::test(start_paused = true)]
    async fn test_polls_while_running_then_stops() {
        let remote = FakeRemote::new();
        remote.set_agent(agent("a1", AgentStatus::Running, 10));
        let reconciler = Reconciler::new(remote.clone(), ApplyPolicy::LastCompleted);
        reconciler.observe("a1");
        reconciler.refresh("a1").await.unwrap();
        assert_eq!(remote.agent_fetches("a1"), 1);

        let driver = PollingDriver::start(reconciler.clone(), "a1", Duration::from_secs(3));
        tokio::time::sleep(Duration::from_millis(2999)).await;
        assert_eq!(remote.agent_fetches("a1"), 1);

        // Checks run just after a tick so its refresh has completed
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(remote.agent_fetches("a1"), 2);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(remote.agent_fetches("a1"), 3);

        // The next poll sees the agent stopped; the one after never fetches
        remote.set_status("a1", AgentStatus::Stopped);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(remote.agent_fetches("a1"), 4);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(remote.agent_fetches("a1"), 4);
        assert!(!driver.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_fetches_unless_running() {
        let remote = FakeRemote::new();
        remote.set_agent(agent("a1", AgentStatus::Starting, 10));
        let reconciler = Reconciler::new(remote.clone(), ApplyPolicy::LastCompleted);
        reconciler.observe("a1");
        reconciler.refresh("a1").await.unwrap();

        let driver = PollingDriver::start(reconciler, "a1", Duration::from_secs(3));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(remote.agent_fetches("a1"), 1);
        assert!(!driver.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_the_driver_stops_polling() {
        let remote = FakeRemote::new();
        remote.set_agent(agent("a1", AgentStatus::Running, 10));
        let reconciler = Reconciler::new(remote.clone(), ApplyPolicy::LastCompleted);
        reconciler.observe("a1");
        reconciler.refresh("a1").await.unwrap();

        let driver = PollingDriver::start(reconciler, "a1", Duration::from_secs(3));
        tokio::time::sleep(Duration::from_millis(3001)).await;
        assert_eq!(remote.agent_fetches("a1"), 2);

        drop(driver);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(remote.agent_fetches("a1"), 2);
    }
}
