//! Container lifecycle tracking
//!
//! The [`LifecycleTracker`] turns engine observations into history entries,
//! publishes the resulting status changes, and finalizes containers that
//! stopped. Finalization happens at most once per container: a per-container
//! lock serializes attempts and a container already in a terminal status is
//! skipped.
//!
//! Finalizing a container:
//! 1. append a system `Finalizing` entry
//! 2. run the [`Finalizer`] (by default, capture logs to disk)
//! 3. append the terminal entry: `Killed`, `Complete` or `Failed`
//!
//! A failing finalizer is recorded as a `Failed` entry carrying the error.

use crate::container::{Container, ContainerHistory, ContainerStatus};
use crate::engine::ContainerEngine;
use crate::errors::{Result, StoreError};
use crate::events::{EngineEvent, EngineEventReceiver, LifecycleBus, LifecycleEvent};
use crate::store::{ContainerStore, StatusChange};
use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Message recorded when a tracked service disappears from the swarm
pub const SERVICE_MISSING_MESSAGE: &str = "Not found on swarm.";

/// Side effects run when a container stops
#[async_trait]
pub trait Finalizer: Send + Sync {
    /// Returns the paths of any files written
    async fn finalize(&self, container: &Container) -> anyhow::Result<Vec<String>>;
}

/// Writes the container's stdout and stderr under `<log_dir>/<database id>/`
pub struct LogCaptureFinalizer {
    engine: Arc<dyn ContainerEngine>,
    log_dir: PathBuf,
}

impl LogCaptureFinalizer {
    pub fn new(engine: Arc<dyn ContainerEngine>, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            engine,
            log_dir: log_dir.into(),
        }
    }
}

#[async_trait]
impl Finalizer for LogCaptureFinalizer {
    async fn finalize(&self, container: &Container) -> anyhow::Result<Vec<String>> {
        let Some(external_id) = container.external_id() else {
            debug!(database_id = container.database_id, "No engine id; nothing to capture");
            return Ok(Vec::new());
        };

        let logs = if container.swarm {
            self.engine.service_logs(external_id).await
        } else {
            self.engine.container_logs(external_id).await
        }
        .with_context(|| format!("Failed to fetch logs for {}", external_id))?;

        let dir = self.log_dir.join(container.database_id.to_string());
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;

        let mut paths = Vec::new();
        for (name, content) in [("stdout.log", &logs.stdout), ("stderr.log", &logs.stderr)] {
            if content.is_empty() {
                continue;
            }
            let path = dir.join(name);
            tokio::fs::write(&path, content)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            paths.push(path.display().to_string());
        }
        debug!(database_id = container.database_id, files = paths.len(), "Captured logs");
        Ok(paths)
    }
}

/// Records engine observations and drives containers to a terminal status
pub struct LifecycleTracker {
    store: Arc<ContainerStore>,
    engine: Arc<dyn ContainerEngine>,
    finalizer: Arc<dyn Finalizer>,
    bus: LifecycleBus,
    finalize_locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl LifecycleTracker {
    pub fn new(
        store: Arc<ContainerStore>,
        engine: Arc<dyn ContainerEngine>,
        finalizer: Arc<dyn Finalizer>,
        bus: LifecycleBus,
    ) -> Self {
        Self {
            store,
            engine,
            finalizer,
            bus,
            finalize_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<ContainerStore> {
        &self.store
    }

    pub fn bus(&self) -> &LifecycleBus {
        &self.bus
    }

    /// Append an entry and publish the status change it caused, if any
    pub async fn record(
        &self,
        database_id: i64,
        entry: ContainerHistory,
    ) -> Result<Option<StatusChange>> {
        let status = entry.status.clone();
        let change = self.store.append_history(database_id, entry).await?;
        match change {
            None => debug!(database_id, status = %status, "Duplicate history entry ignored"),
            Some(change) if change.changed() => {
                info!(
                    database_id,
                    from = %change.before,
                    to = %change.after,
                    "Container status changed"
                );
                self.bus.publish(LifecycleEvent::StatusChanged {
                    database_id,
                    from: change.before,
                    to: change.after,
                    at: Utc::now(),
                });
            }
            Some(_) => {}
        }
        Ok(change)
    }

    /// Record one engine event. Returns the database id of a container that
    /// now needs finalizing.
    #[instrument(skip_all)]
    pub async fn handle_event(&self, event: EngineEvent) -> Result<Option<i64>> {
        match event {
            EngineEvent::Container(event) => {
                let Some(database_id) = self.store.find_by_external_id(&event.id) else {
                    debug!(container_id = %event.id, status = %event.status, "Event for unknown container");
                    return Ok(None);
                };
                let entry = ContainerHistory::from_container_event(&event);
                let exited = entry.signals_exit();
                let added = self.record(database_id, entry).await?.is_some();
                Ok((added && exited).then_some(database_id))
            }
            EngineEvent::ServiceTask { database_id, task } => {
                let entry = ContainerHistory::from_service_task(&task);
                let exited = entry.signals_exit();
                let Some(_) = self.record(database_id, entry).await? else {
                    return Ok(None);
                };

                let (task_id, node_id, container_id) =
                    (task.task_id.clone(), task.node_id.clone(), task.container_id.clone());
                self.store
                    .update(database_id, move |c| {
                        c.task_id = Some(task_id);
                        c.node_id = Some(node_id);
                        if container_id.is_some() {
                            c.container_id = container_id;
                        }
                    })
                    .await?;
                self.bus.publish(LifecycleEvent::ServiceTaskChanged {
                    database_id,
                    task_id: task.task_id,
                    status: task.status,
                    at: Utc::now(),
                });
                Ok(exited.then_some(database_id))
            }
            EngineEvent::ServiceMissing { database_id } => {
                let killed = self
                    .store
                    .get(database_id)
                    .await
                    .is_some_and(|c| c.was_killed());
                if killed {
                    debug!(database_id, "Killed service is gone from the swarm");
                    return Ok(Some(database_id));
                }
                warn!(database_id, "Service is no longer on the swarm");
                self.record(
                    database_id,
                    ContainerHistory::from_system(
                        ContainerStatus::Failed.as_str(),
                        Some(SERVICE_MISSING_MESSAGE),
                    ),
                )
                .await?;
                Ok(None)
            }
        }
    }

    /// Record an event and finalize inline when it ended the container
    pub async fn process(&self, event: EngineEvent) -> Result<Option<ContainerStatus>> {
        match self.handle_event(event).await? {
            Some(database_id) => self.finalize(database_id).await,
            None => Ok(None),
        }
    }

    fn finalize_lock(&self, database_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        self.finalize_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(database_id)
            .or_default()
            .clone()
    }

    /// Finalize a container unless it already reached a terminal status.
    /// Returns the terminal status it was given.
    #[instrument(skip(self))]
    pub async fn finalize(&self, database_id: i64) -> Result<Option<ContainerStatus>> {
        let lock = self.finalize_lock(database_id);
        let _guard = lock.lock().await;

        let container = self
            .store
            .get(database_id)
            .await
            .ok_or(StoreError::NotFound { id: database_id })?;
        if container.is_finalized() {
            debug!(status = %container.status, "Already finalized");
            return Ok(None);
        }

        self.record(
            database_id,
            ContainerHistory::from_system(ContainerStatus::Finalizing.as_str(), None),
        )
        .await?;

        let paths = match self.finalizer.finalize(&container).await {
            Ok(paths) => paths,
            Err(e) => {
                let message = format!("Finalization failed: {:#}", e);
                warn!("{}", message);
                self.record(
                    database_id,
                    ContainerHistory::from_system(ContainerStatus::Failed.as_str(), Some(&message)),
                )
                .await?;
                return Ok(Some(ContainerStatus::Failed));
            }
        };

        let container = self
            .store
            .update(database_id, move |c| {
                c.log_paths.extend(paths);
                c.clone()
            })
            .await?;
        let terminal = container.terminal_status();
        let message = match (terminal, container.exit_code()) {
            (ContainerStatus::Failed, Some(code)) if !code.is_empty() => {
                Some(format!("Exit code {}", code))
            }
            _ => None,
        };
        self.record(
            database_id,
            ContainerHistory::from_system(terminal.as_str(), message.as_deref()),
        )
        .await?;
        info!(status = %terminal, "Finalized container");
        Ok(Some(terminal))
    }

    /// Kill a container at a user's request.
    ///
    /// A plain container only gets the kill request recorded; its exit event
    /// finalizes it as `Killed`. A swarm service leaves no exit to observe
    /// once removed, so it is finalized here first while its logs can still
    /// be read. Returns the status after the request.
    #[instrument(skip(self))]
    pub async fn kill(&self, database_id: i64, username: &str) -> Result<ContainerStatus> {
        let container = self
            .store
            .get(database_id)
            .await
            .ok_or(StoreError::NotFound { id: database_id })?;
        if container.is_finalized() {
            info!(status = %container.status, "Container already finished; nothing to kill");
            return Ok(container.status);
        }
        if matches!(
            container.status,
            ContainerStatus::Finalizing | ContainerStatus::Waiting
        ) {
            info!(status = %container.status, "Container already exited; nothing to kill");
            return Ok(container.status);
        }

        let request =
            ContainerHistory::from_user_action(ContainerStatus::Killed.as_str(), username);
        match (container.swarm, container.external_id()) {
            (false, Some(container_id)) => {
                self.engine.kill_container(container_id).await?;
                self.record(database_id, request).await?;
                Ok(self
                    .store
                    .get(database_id)
                    .await
                    .map(|c| c.status)
                    .unwrap_or(container.status))
            }
            (true, Some(service_id)) => {
                self.engine.ping().await?;
                self.record(database_id, request).await?;
                let status = self.finalize(database_id).await?;
                self.engine.remove_service(service_id).await?;
                Ok(status.unwrap_or(ContainerStatus::Killed))
            }
            (_, None) => {
                debug!("No engine id; finalizing without an engine call");
                self.record(database_id, request).await?;
                Ok(self
                    .finalize(database_id)
                    .await?
                    .unwrap_or(ContainerStatus::Killed))
            }
        }
    }

    /// Finalize every container left in `Waiting` by orphan recovery
    pub async fn refinalize_waiting(&self) -> Vec<(i64, Result<Option<ContainerStatus>>)> {
        let mut results = Vec::new();
        for container in self.store.list_by_status(ContainerStatus::Waiting).await {
            let id = container.database_id;
            let result = self.finalize(id).await;
            if let Err(e) = &result {
                warn!(database_id = id, "Re-finalization failed: {}", e);
            }
            results.push((id, result));
        }
        results
    }

    /// Consume engine events until every sender is dropped. Finalization
    /// runs as its own task so slow side effects do not hold up the channel.
    pub async fn run(self: Arc<Self>, mut events: EngineEventReceiver) {
        let mut handles: Vec<JoinHandle<()>> = Vec::new();
        while let Some(event) = events.recv().await {
            match self.handle_event(event).await {
                Ok(Some(database_id)) => {
                    let tracker = Arc::clone(&self);
                    handles.push(tokio::spawn(async move {
                        if let Err(e) = tracker.finalize(database_id).await {
                            warn!(database_id, "Finalization error: {}", e);
                        }
                    }));
                }
                Ok(None) => {}
                Err(e) => warn!("Failed to record engine event: {}", e),
            }
            handles.retain(|h| !h.is_finished());
        }

        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Task join error: {}", e);
            }
        }
        debug!("Engine event channel closed");
    }
}
