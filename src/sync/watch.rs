use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use super::poller::PollingDriver;
use super::reconciler::{AgentView, ListingView, Reconciler, SyncEvent};
use crate::client::RealtimeChannel;
use crate::core::{AgentStatus, ConnectionState};

/// An open view of one agent.
///
/// While active, push invalidations that concern the agent trigger a
/// refresh and a poller runs whenever the agent is `running`. Deactivating
/// (or dropping) the watch stops the poller, closes the channel and releases
/// the agent in the reconciler.
pub struct AgentWatch {
    agent_id: String,
    reconciler: Reconciler,
    connection: watch::Receiver<ConnectionState>,
    polling: watch::Receiver<bool>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl AgentWatch {
    pub fn activate(
        reconciler: Reconciler,
        channel: RealtimeChannel,
        agent_id: &str,
        poll_interval: Duration,
    ) -> Self {
        let agent_id = agent_id.to_string();
        reconciler.observe(&agent_id);

        let connection = channel.watch_state();
        let (polling_tx, polling) = watch::channel(false);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let supervisor = Supervisor {
            agent_id: agent_id.clone(),
            reconciler: reconciler.clone(),
            connection: channel.watch_state(),
            channel,
            poll_interval,
            poller: None,
            polling_tx,
        };
        let task = tokio::spawn(supervisor.run(shutdown_rx));
        tracing::info!("Watching agent {}", agent_id);

        Self {
            agent_id,
            reconciler,
            connection,
            polling,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.clone()
    }

    pub fn is_polling(&self) -> bool {
        *self.polling.borrow()
    }

    pub fn watch_polling(&self) -> watch::Receiver<bool> {
        self.polling.clone()
    }

    pub async fn view(&self) -> AgentView {
        self.reconciler
            .view(&self.agent_id)
            .await
            .unwrap_or_default()
    }

    pub async fn deactivate(mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for AgentWatch {
    fn drop(&mut self) {
        // The supervisor cleans up on its own once signalled
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
    }
}

struct Supervisor {
    agent_id: String,
    reconciler: Reconciler,
    channel: RealtimeChannel,
    connection: watch::Receiver<ConnectionState>,
    poll_interval: Duration,
    poller: Option<PollingDriver>,
    polling_tx: watch::Sender<bool>,
}

impl Supervisor {
    async fn run(mut self, mut shutdown_rx: oneshot::Receiver<()>) {
        let mut events = self.reconciler.subscribe();
        self.spawn_refresh();

        let mut transport_open = true;
        let mut dropped = false;
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,
                Ok(()) = self.connection.changed() => {
                    let state = *self.connection.borrow_and_update();
                    match state {
                        ConnectionState::Closed => dropped = true,
                        // Pushes sent while the socket was down are lost
                        ConnectionState::Open if dropped => {
                            dropped = false;
                            tracing::info!("Realtime channel reopened; refreshing {}", self.agent_id);
                            self.spawn_refresh();
                        }
                        _ => {}
                    }
                },
                signal = self.channel.next_invalidation(), if transport_open => match signal {
                    Some(signal) if signal.concerns(&self.agent_id) => {
                        tracing::debug!("Invalidation for {}: {:?}", self.agent_id, signal.event);
                        self.spawn_refresh();
                    }
                    Some(_) => {}
                    None => {
                        tracing::info!("Realtime channel ended; {} is kept fresh by polling only", self.agent_id);
                        transport_open = false;
                    }
                },
                event = events.recv() => match event {
                    Ok(SyncEvent::Snapshot { agent_id, status }) if agent_id == self.agent_id => {
                        self.update_poller(status);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!("Watch of {} skipped {} sync events", self.agent_id, skipped);
                        if let Some(status) = self.reconciler.status(&self.agent_id).await {
                            self.update_poller(status);
                        }
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }

        self.stop_poller();
        self.channel.close().await;
        self.reconciler.release(&self.agent_id);
        tracing::info!("Stopped watching agent {}", self.agent_id);
    }

    fn spawn_refresh(&self) {
        let reconciler = self.reconciler.clone();
        let agent_id = self.agent_id.clone();
        tokio::spawn(async move {
            let _ = reconciler.refresh(&agent_id).await;
        });
    }

    fn update_poller(&mut self, status: AgentStatus) {
        let active = self.poller.as_ref().is_some_and(PollingDriver::is_active);
        if status == AgentStatus::Running {
            if !active {
                self.poller = Some(PollingDriver::start(
                    self.reconciler.clone(),
                    &self.agent_id,
                    self.poll_interval,
                ));
                self.polling_tx.send_replace(true);
            }
        } else {
            self.stop_poller();
        }
    }

    fn stop_poller(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.stop();
        }
        self.polling_tx.send_replace(false);
    }
}

/// Keeps the dashboard listing current: one fetch on activation and one on
/// every push message, whatever agent it names.
pub struct ListingWatch {
    reconciler: Reconciler,
    connection: watch::Receiver<ConnectionState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ListingWatch {
    pub fn activate(reconciler: Reconciler, mut channel: RealtimeChannel, all: bool) -> Self {
        let connection = channel.watch_state();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let task = {
            let reconciler = reconciler.clone();
            let mut state = channel.watch_state();
            tokio::spawn(async move {
                let _ = reconciler.refresh_listing(all).await;
                let mut dropped = false;
                loop {
                    tokio::select! {
                        _ = &mut shutdown_rx => break,
                        Ok(()) = state.changed() => {
                            let current = *state.borrow_and_update();
                            match current {
                                ConnectionState::Closed => dropped = true,
                                ConnectionState::Open if dropped => {
                                    dropped = false;
                                    let _ = reconciler.refresh_listing(all).await;
                                }
                                _ => {}
                            }
                        },
                        signal = channel.next_invalidation() => match signal {
                            Some(_) => {
                                let reconciler = reconciler.clone();
                                tokio::spawn(async move {
                                    let _ = reconciler.refresh_listing(all).await;
                                });
                            }
                            None => {
                                // Nothing more will arrive; wait for shutdown
                                let _ = (&mut shutdown_rx).await;
                                break;
                            }
                        },
                    }
                }
                channel.close().await;
            })
        };

        Self {
            reconciler,
            connection,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.clone()
    }

    pub async fn listing(&self) -> ListingView {
        self.reconciler.listing().await
    }

    pub async fn deactivate(mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ListingWatch {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
    }
}
