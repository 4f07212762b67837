//! Agent presence heartbeat service
//!
//! Staff users (agents and admins) advertise a presence status to the server. The
//! chosen status is persisted locally and restored on the next start. While active,
//! a heartbeat is sent immediately and then on a fixed interval. Going offline halts
//! the interval; choosing a status again resumes it.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use supportdesk_shared::{PresenceStatus, UserRole};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::{ClientError, ClientResult};
use crate::rest::PresenceApi;

// =============================================================================
// Persistence
// =============================================================================

/// Durable storage for the last chosen presence status
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Returns `None` when nothing (valid) has been stored yet
    async fn load(&self) -> ClientResult<Option<PresenceStatus>>;

    async fn save(&self, status: PresenceStatus) -> ClientResult<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedPresence {
    presence_status: String,
}

/// JSON file store: `{"presence_status": "online|busy|away"}`
#[derive(Debug, Clone)]
pub struct FilePresenceStore {
    path: PathBuf,
}

impl FilePresenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PresenceStore for FilePresenceStore {
    async fn load(&self) -> ClientResult<Option<PresenceStatus>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ClientError::Storage(e.to_string())),
        };

        let persisted: PersistedPresence = match serde_json::from_str(&contents) {
            Ok(persisted) => persisted,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Unreadable presence file");
                return Ok(None);
            }
        };

        match persisted.presence_status.parse::<PresenceStatus>() {
            Ok(status) => Ok(Some(status)),
            Err(_) => {
                tracing::warn!(
                    path = %self.path.display(),
                    value = %persisted.presence_status,
                    "Ignoring invalid persisted presence status"
                );
                Ok(None)
            }
        }
    }

    async fn save(&self, status: PresenceStatus) -> ClientResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ClientError::Storage(e.to_string()))?;
        }
        let body = serde_json::to_string(&PersistedPresence {
            presence_status: status.as_str().to_string(),
        })
        .map_err(|e| ClientError::Storage(e.to_string()))?;
        tokio::fs::write(&self.path, body)
            .await
            .map_err(|e| ClientError::Storage(e.to_string()))
    }
}

/// Process-local store
#[derive(Debug, Default)]
pub struct MemoryPresenceStore {
    status: Mutex<Option<PresenceStatus>>,
}

#[async_trait]
impl PresenceStore for MemoryPresenceStore {
    async fn load(&self) -> ClientResult<Option<PresenceStatus>> {
        self.status
            .lock()
            .map(|guard| *guard)
            .map_err(|_| ClientError::Storage("presence store lock poisoned".to_string()))
    }

    async fn save(&self, status: PresenceStatus) -> ClientResult<()> {
        let mut guard = self
            .status
            .lock()
            .map_err(|_| ClientError::Storage("presence store lock poisoned".to_string()))?;
        *guard = Some(status);
        Ok(())
    }
}

/// Stored status, or `online` on first use
pub async fn restore_status(store: &dyn PresenceStore) -> PresenceStatus {
    match store.load().await {
        Ok(Some(status)) => status,
        Ok(None) => PresenceStatus::default(),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to load presence status, defaulting to online");
            PresenceStatus::default()
        }
    }
}

// =============================================================================
// Heartbeat Service
// =============================================================================

#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    pub agent_id: String,
    pub role: UserRole,
    pub enabled: bool,
    pub interval: Duration,
}

/// Invoked with every failed heartbeat
pub type HeartbeatErrorCallback = Arc<dyn Fn(&ClientError) + Send + Sync>;

enum PresenceCommand {
    SetStatus(PresenceStatus, oneshot::Sender<ClientResult<()>>),
    GoOffline(oneshot::Sender<ClientResult<()>>),
    Shutdown,
}

/// Handle to a running heartbeat task
pub struct HeartbeatService {
    commands: mpsc::UnboundedSender<PresenceCommand>,
    status: watch::Receiver<PresenceStatus>,
    active: watch::Receiver<bool>,
    task: Option<JoinHandle<()>>,
}

impl HeartbeatService {
    /// Restore the stored status and start heartbeating, or return `None` if
    /// disabled or the role is not staff
    pub async fn start(
        config: HeartbeatConfig,
        api: Arc<dyn PresenceApi>,
        store: Arc<dyn PresenceStore>,
        on_error: Option<HeartbeatErrorCallback>,
    ) -> Option<Self> {
        if !config.enabled || !config.role.sends_heartbeats() {
            tracing::debug!(role = ?config.role, enabled = config.enabled, "Presence heartbeat inactive");
            return None;
        }

        let initial = restore_status(store.as_ref()).await;
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(initial);
        let (active_tx, active) = watch::channel(true);

        tracing::info!(agent_id = %config.agent_id, status = %initial, "Starting presence heartbeat");

        let worker = HeartbeatWorker {
            config,
            api,
            store,
            on_error,
            status: status_tx,
            active: active_tx,
        };
        let task = tokio::spawn(worker.run(command_rx));

        Some(Self {
            commands,
            status,
            active,
            task: Some(task),
        })
    }

    /// Persist a new status and send a heartbeat right away
    ///
    /// Resumes the interval if the agent had gone offline.
    pub async fn set_status(&self, status: PresenceStatus) -> ClientResult<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(PresenceCommand::SetStatus(status, reply))
            .map_err(|_| ClientError::ServiceUnavailable("presence task stopped".to_string()))?;
        rx.await
            .map_err(|_| ClientError::ServiceUnavailable("presence task stopped".to_string()))?
    }

    /// Tell the server the agent is offline and halt the interval
    pub async fn go_offline(&self) -> ClientResult<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(PresenceCommand::GoOffline(reply))
            .map_err(|_| ClientError::ServiceUnavailable("presence task stopped".to_string()))?;
        rx.await
            .map_err(|_| ClientError::ServiceUnavailable("presence task stopped".to_string()))?
    }

    pub fn current_status(&self) -> PresenceStatus {
        *self.status.borrow()
    }

    /// Whether heartbeats are currently being sent
    pub fn is_active(&self) -> bool {
        *self.active.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PresenceStatus> {
        self.status.clone()
    }

    pub async fn shutdown(mut self) {
        let _ = self.commands.send(PresenceCommand::Shutdown);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for HeartbeatService {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct HeartbeatWorker {
    config: HeartbeatConfig,
    api: Arc<dyn PresenceApi>,
    store: Arc<dyn PresenceStore>,
    on_error: Option<HeartbeatErrorCallback>,
    status: watch::Sender<PresenceStatus>,
    active: watch::Sender<bool>,
}

impl HeartbeatWorker {
    async fn run(self, mut commands: mpsc::UnboundedReceiver<PresenceCommand>) {
        // First tick completes immediately: the activation heartbeat
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let active = *self.active.borrow();
            tokio::select! {
                biased;

                _ = ticker.tick(), if active => {
                    self.beat().await;
                }
                command = commands.recv() => match command {
                    Some(PresenceCommand::SetStatus(status, reply)) => {
                        let persisted = self.store.save(status).await;
                        if let Err(ref e) = persisted {
                            tracing::warn!(error = %e, "Failed to persist presence status");
                        }
                        self.status.send_replace(status);
                        self.active.send_replace(true);
                        ticker.reset();
                        self.beat().await;
                        let _ = reply.send(persisted);
                    }
                    Some(PresenceCommand::GoOffline(reply)) => {
                        self.active.send_replace(false);
                        let result = self.api.set_offline(&self.config.agent_id).await;
                        match &result {
                            Ok(()) => tracing::info!(agent_id = %self.config.agent_id, "Agent went offline"),
                            Err(e) => tracing::warn!(agent_id = %self.config.agent_id, error = %e, "Set-offline call failed"),
                        }
                        let _ = reply.send(result);
                    }
                    Some(PresenceCommand::Shutdown) | None => break,
                },
            }
        }

        tracing::debug!(agent_id = %self.config.agent_id, "Presence heartbeat stopped");
    }

    async fn beat(&self) {
        let status = *self.status.borrow();
        match self.api.heartbeat(&self.config.agent_id, status).await {
            Ok(()) => {
                tracing::debug!(agent_id = %self.config.agent_id, status = %status, "Heartbeat sent");
            }
            Err(e) => {
                tracing::warn!(
                    agent_id = %self.config.agent_id,
                    status = %status,
                    error = %e,
                    "Heartbeat failed"
                );
                if let Some(callback) = &self.on_error {
                    callback(&e);
                }
            }
        }
    }
}
