use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::client::AgentRemote;
use crate::core::{Agent, AgentStatus, ApplyPolicy, FetchError, LogEntry};

/// Change notifications published by the reconciler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Snapshot { agent_id: String, status: AgentStatus },
    Transcript { agent_id: String, entries: usize },
    Stale { agent_id: String, stale: bool },
    Listing { agents: usize, stale: bool },
}

/// Everything held for one observed agent
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentView {
    pub snapshot: Option<Agent>,
    pub transcript: Vec<LogEntry>,
    /// The last refresh failed; the data shown is from an earlier one
    pub stale: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingView {
    pub agents: Vec<Agent>,
    pub stale: bool,
}

enum SyncCommand {
    Observe {
        agent_id: String,
    },
    Release {
        agent_id: String,
    },
    BeginFetch {
        agent_id: String,
        response_tx: oneshot::Sender<Option<u64>>,
    },
    ApplyRefresh {
        agent_id: String,
        seq: u64,
        snapshot: Option<Agent>,
        transcript: Option<Vec<LogEntry>>,
        failed: bool,
    },
    ApplyHint {
        agent_id: String,
        status: AgentStatus,
    },
    BeginListing {
        response_tx: oneshot::Sender<u64>,
    },
    ApplyListing {
        seq: u64,
        agents: Option<Vec<Agent>>,
    },
    GetView {
        agent_id: String,
        response_tx: oneshot::Sender<Option<AgentView>>,
    },
    GetListing {
        response_tx: oneshot::Sender<ListingView>,
    },
}

/// Handle to the reconciler actor.
///
/// The actor owns the local copy of every observed agent. Fetches run on the
/// caller's task; only their results pass through the actor, so overlapping
/// refreshes are allowed and arbitrated by the configured [`ApplyPolicy`].
#[derive(Clone)]
pub struct Reconciler {
    command_tx: mpsc::UnboundedSender<SyncCommand>,
    events_tx: broadcast::Sender<SyncEvent>,
    remote: Arc<dyn AgentRemote>,
}

struct AgentSlot {
    watchers: usize,
    view: AgentView,
    applied_snapshot_seq: u64,
    applied_transcript_seq: u64,
}

struct ReconcilerActor {
    policy: ApplyPolicy,
    agents: HashMap<String, AgentSlot>,
    listing: ListingView,
    applied_listing_seq: u64,
    next_seq: u64,
    command_rx: mpsc::UnboundedReceiver<SyncCommand>,
    events_tx: broadcast::Sender<SyncEvent>,
}

impl Reconciler {
    pub fn new(remote: Arc<dyn AgentRemote>, policy: ApplyPolicy) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(256);

        let actor = ReconcilerActor {
            policy,
            agents: HashMap::new(),
            listing: ListingView::default(),
            applied_listing_seq: 0,
            next_seq: 0,
            command_rx,
            events_tx: events_tx.clone(),
        };
        tokio::spawn(actor.run());

        Self {
            command_tx,
            events_tx,
            remote,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events_tx.subscribe()
    }

    pub fn remote(&self) -> &Arc<dyn AgentRemote> {
        &self.remote
    }

    fn send(&self, command: SyncCommand) {
        if self.command_tx.send(command).is_err() {
            tracing::warn!("Reconciler actor is not running");
        }
    }

    /// Start holding state for `agent_id`. Calls nest; each needs a release.
    pub fn observe(&self, agent_id: &str) {
        self.send(SyncCommand::Observe {
            agent_id: agent_id.to_string(),
        });
    }

    pub fn release(&self, agent_id: &str) {
        self.send(SyncCommand::Release {
            agent_id: agent_id.to_string(),
        });
    }

    /// Show `status` until the next refresh replaces it
    pub fn apply_hint(&self, agent_id: &str, status: AgentStatus) {
        self.send(SyncCommand::ApplyHint {
            agent_id: agent_id.to_string(),
            status,
        });
    }

    /// Fetch the agent and its transcript and merge them into the held view.
    ///
    /// Unobserved agents are not fetched. On failure the previous data is
    /// kept and the view is marked stale.
    pub async fn refresh(&self, agent_id: &str) -> Result<(), FetchError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(SyncCommand::BeginFetch {
            agent_id: agent_id.to_string(),
            response_tx,
        });
        let Some(seq) = response_rx.await.unwrap_or(None) else {
            tracing::debug!("Skipping refresh of unobserved agent {}", agent_id);
            return Ok(());
        };

        let (agent, logs) = tokio::join!(
            self.remote.fetch_agent(agent_id),
            self.remote.fetch_logs(agent_id)
        );

        let mut failure = None;
        let snapshot = match agent {
            Ok(agent) => Some(agent),
            Err(e) => {
                failure = Some(e);
                None
            }
        };
        let transcript = match logs {
            Ok(entries) => Some(entries),
            Err(e) => {
                failure.get_or_insert(e);
                None
            }
        };

        self.send(SyncCommand::ApplyRefresh {
            agent_id: agent_id.to_string(),
            seq,
            snapshot,
            transcript,
            failed: failure.is_some(),
        });

        match failure {
            Some(source) => {
                let err = FetchError {
                    target: agent_id.to_string(),
                    source,
                };
                tracing::warn!("{}", err);
                Err(err)
            }
            None => Ok(()),
        }
    }

    /// Refetch the dashboard listing
    pub async fn refresh_listing(&self, all: bool) -> Result<(), FetchError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(SyncCommand::BeginListing { response_tx });
        let seq = response_rx.await.unwrap_or(0);

        match self.remote.list_agents(all).await {
            Ok(agents) => {
                self.send(SyncCommand::ApplyListing {
                    seq,
                    agents: Some(agents),
                });
                Ok(())
            }
            Err(source) => {
                self.send(SyncCommand::ApplyListing { seq, agents: None });
                let err = FetchError {
                    target: "agent listing".to_string(),
                    source,
                };
                tracing::warn!("{}", err);
                Err(err)
            }
        }
    }

    pub async fn view(&self, agent_id: &str) -> Option<AgentView> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(SyncCommand::GetView {
            agent_id: agent_id.to_string(),
            response_tx,
        });
        response_rx.await.unwrap_or(None)
    }

    pub async fn snapshot(&self, agent_id: &str) -> Option<Agent> {
        self.view(agent_id).await.and_then(|view| view.snapshot)
    }

    pub async fn log(&self, agent_id: &str) -> Vec<LogEntry> {
        self.view(agent_id)
            .await
            .map(|view| view.transcript)
            .unwrap_or_default()
    }

    pub async fn status(&self, agent_id: &str) -> Option<AgentStatus> {
        self.snapshot(agent_id).await.map(|agent| agent.status)
    }

    pub async fn listing(&self) -> ListingView {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(SyncCommand::GetListing { response_tx });
        response_rx.await.unwrap_or_default()
    }
}

impl ReconcilerActor {
    async fn run(mut self) {
        while let Some(command) = self.command_rx.recv().await {
            self.handle_command(command);
        }
        tracing::debug!("Reconciler shutting down");
    }

    fn publish(&self, event: SyncEvent) {
        // No subscribers is fine
        let _ = self.events_tx.send(event);
    }

    fn handle_command(&mut self, command: SyncCommand) {
        match command {
            SyncCommand::Observe { agent_id } => {
                let slot = self.agents.entry(agent_id).or_insert_with(|| AgentSlot {
                    watchers: 0,
                    view: AgentView::default(),
                    applied_snapshot_seq: 0,
                    applied_transcript_seq: 0,
                });
                slot.watchers += 1;
            }
            SyncCommand::Release { agent_id } => {
                if let Some(slot) = self.agents.get_mut(&agent_id) {
                    slot.watchers = slot.watchers.saturating_sub(1);
                    if slot.watchers == 0 {
                        self.agents.remove(&agent_id);
                        tracing::debug!("Released agent {}", agent_id);
                    }
                }
            }
            SyncCommand::BeginFetch {
                agent_id,
                response_tx,
            } => {
                let seq = if self.agents.contains_key(&agent_id) {
                    self.next_seq += 1;
                    Some(self.next_seq)
                } else {
                    None
                };
                let _ = response_tx.send(seq);
            }
            SyncCommand::ApplyRefresh {
                agent_id,
                seq,
                snapshot,
                transcript,
                failed,
            } => self.apply_refresh(agent_id, seq, snapshot, transcript, failed),
            SyncCommand::ApplyHint { agent_id, status } => {
                let Some(slot) = self.agents.get_mut(&agent_id) else {
                    return;
                };
                let Some(agent) = slot.view.snapshot.as_mut() else {
                    return;
                };
                if agent.status != status {
                    agent.status = status;
                    self.publish(SyncEvent::Snapshot { agent_id, status });
                }
            }
            SyncCommand::BeginListing { response_tx } => {
                self.next_seq += 1;
                let _ = response_tx.send(self.next_seq);
            }
            SyncCommand::ApplyListing { seq, agents } => {
                if self.policy == ApplyPolicy::IssueOrder && seq < self.applied_listing_seq {
                    tracing::debug!("Dropping out-of-order listing #{}", seq);
                    return;
                }
                self.applied_listing_seq = seq;
                match agents {
                    Some(agents) => {
                        self.listing.agents = agents;
                        self.listing.stale = false;
                    }
                    None => self.listing.stale = true,
                }
                self.publish(SyncEvent::Listing {
                    agents: self.listing.agents.len(),
                    stale: self.listing.stale,
                });
            }
            SyncCommand::GetView {
                agent_id,
                response_tx,
            } => {
                let view = self.agents.get(&agent_id).map(|slot| slot.view.clone());
                let _ = response_tx.send(view);
            }
            SyncCommand::GetListing { response_tx } => {
                let _ = response_tx.send(self.listing.clone());
            }
        }
    }

    fn apply_refresh(
        &mut self,
        agent_id: String,
        seq: u64,
        snapshot: Option<Agent>,
        transcript: Option<Vec<LogEntry>>,
        failed: bool,
    ) {
        let issue_order = self.policy == ApplyPolicy::IssueOrder;
        let Some(slot) = self.agents.get_mut(&agent_id) else {
            tracing::debug!("Discarding refresh #{} for unobserved agent {}", seq, agent_id);
            return;
        };
        let mut events = Vec::new();

        if let Some(agent) = snapshot {
            let held = slot.view.snapshot.as_ref();
            if issue_order && seq < slot.applied_snapshot_seq {
                tracing::debug!("Dropping out-of-order snapshot #{} of {}", seq, agent_id);
            } else if held.is_some_and(|held| agent.last_active < held.last_active) {
                tracing::debug!("Dropping snapshot of {} older than the one held", agent_id);
            } else {
                slot.applied_snapshot_seq = seq;
                let status = agent.status;
                if held != Some(&agent) {
                    slot.view.snapshot = Some(agent);
                    events.push(SyncEvent::Snapshot {
                        agent_id: agent_id.clone(),
                        status,
                    });
                }
            }
        }

        if let Some(entries) = transcript {
            if issue_order && seq < slot.applied_transcript_seq {
                tracing::debug!("Dropping out-of-order transcript #{} of {}", seq, agent_id);
            } else if entries.len() < slot.view.transcript.len() {
                tracing::debug!(
                    "Dropping transcript of {} with {} entries, {} already held",
                    agent_id,
                    entries.len(),
                    slot.view.transcript.len()
                );
            } else {
                slot.applied_transcript_seq = seq;
                if entries != slot.view.transcript {
                    events.push(SyncEvent::Transcript {
                        agent_id: agent_id.clone(),
                        entries: entries.len(),
                    });
                    slot.view.transcript = entries;
                }
            }
        }

        if slot.view.stale != failed {
            slot.view.stale = failed;
            events.push(SyncEvent::Stale {
                agent_id: agent_id.clone(),
                stale: failed,
            });
        }

        for event in events {
            self.publish(event);
        }
    }
}
