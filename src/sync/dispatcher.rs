use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Mutex as LaneLock;

use super::reconciler::Reconciler;
use crate::core::{Action, ActionError, ActionKind};

type InFlight = HashMap<(String, ActionKind), usize>;

/// Issues state-changing actions against agents.
///
/// Actions on one agent run one after another; a successful action is
/// followed by a forced refresh before `dispatch` returns.
#[derive(Clone)]
pub struct ActionDispatcher {
    reconciler: Reconciler,
    lanes: Arc<Mutex<HashMap<String, Arc<LaneLock<()>>>>>,
    in_flight: Arc<Mutex<InFlight>>,
}

// Poisoning only happens if a holder panicked; the maps stay usable
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct FlightGuard {
    in_flight: Arc<Mutex<InFlight>>,
    key: (String, ActionKind),
}

impl FlightGuard {
    fn enter(in_flight: &Arc<Mutex<InFlight>>, agent_id: &str, kind: ActionKind) -> Self {
        let key = (agent_id.to_string(), kind);
        *lock(in_flight).entry(key.clone()).or_default() += 1;
        Self {
            in_flight: in_flight.clone(),
            key,
        }
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        let mut in_flight = lock(&self.in_flight);
        if let Some(count) = in_flight.get_mut(&self.key) {
            *count -= 1;
            if *count == 0 {
                in_flight.remove(&self.key);
            }
        }
    }
}

impl ActionDispatcher {
    pub fn new(reconciler: Reconciler) -> Self {
        Self {
            reconciler,
            lanes: Arc::new(Mutex::new(HashMap::new())),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Whether an action of this kind is queued or running for the agent
    pub fn is_in_flight(&self, agent_id: &str, kind: ActionKind) -> bool {
        lock(&self.in_flight).contains_key(&(agent_id.to_string(), kind))
    }

    fn lane(&self, agent_id: &str) -> Arc<LaneLock<()>> {
        lock(&self.lanes)
            .entry(agent_id.to_string())
            .or_insert_with(|| Arc::new(LaneLock::new(())))
            .clone()
    }

    pub async fn dispatch(&self, agent_id: &str, action: Action) -> Result<(), ActionError> {
        if let Action::SendMessage(text) = &action {
            if text.trim().is_empty() {
                return Err(ActionError::EmptyInput);
            }
        }
        let kind = action.kind();
        let _flight = FlightGuard::enter(&self.in_flight, agent_id, kind);

        let lane = self.lane(agent_id);
        let _turn = lane.lock().await;

        tracing::info!("Sending {} to agent {}", kind, agent_id);
        if let Err(e) = self.reconciler.remote().perform(agent_id, &action).await {
            let err = ActionError::remote(kind, e);
            tracing::warn!("Agent {}: {}", agent_id, err);
            return Err(err);
        }

        if let Some(status) = action.optimistic_status() {
            self.reconciler.apply_hint(agent_id, status);
        }
        // The action itself succeeded; a failed refresh only leaves the view stale
        if let Err(e) = self.reconciler.refresh(agent_id).await {
            tracing::warn!("Refresh after {} failed: {}", kind, e);
        }
        Ok(())
    }

    /// Send the draft as a chat message, clearing it only once the bridge
    /// accepted it
    pub async fn send_message(&self, agent_id: &str, draft: &mut String) -> Result<(), ActionError> {
        let text = draft.trim().to_string();
        self.dispatch(agent_id, Action::SendMessage(text)).await?;
        draft.clear();
        Ok(())
    }
}
