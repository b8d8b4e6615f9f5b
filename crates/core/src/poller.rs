//! Background engine poller
//!
//! On every tick the poller asks the engine what happened since the last
//! check and forwards it to the lifecycle tracker over the engine event
//! channel. Outside swarm mode that is the container event window
//! `[last check (or epoch), now]`; in swarm mode it is the most recent task
//! of every service that has not finished yet.
//!
//! Failures are tracked explicitly. A failure is logged when its kind
//! differs from the previous one, and recovery is logged once on the next
//! successful poll, so an engine that stays down does not flood the log.

use crate::config::ServerConfigStore;
use crate::engine::ContainerEngine;
use crate::errors::{BerthError, EngineError, Result};
use crate::events::{EngineEvent, EngineEventSender};
use crate::store::ContainerStore;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

/// Broad classes of poll failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    NotConfigured,
    EngineUnavailable,
    Engine,
    Persistence,
    Other,
}

impl FailureKind {
    pub fn of(error: &BerthError) -> Self {
        match error {
            BerthError::Engine(EngineError::NotConfigured) => FailureKind::NotConfigured,
            BerthError::Engine(EngineError::Unavailable { .. }) => FailureKind::EngineUnavailable,
            BerthError::Engine(_) => FailureKind::Engine,
            BerthError::Store(_) | BerthError::Config(_) => FailureKind::Persistence,
            _ => FailureKind::Other,
        }
    }
}

/// An outstanding failure
#[derive(Debug, Clone, PartialEq)]
pub struct FailureState {
    pub kind: FailureKind,
    pub first_seen: DateTime<Utc>,
    pub attempts: u32,
}

/// Remembers the current failure between polls
#[derive(Debug, Default)]
pub struct FailureTracker {
    current: Option<FailureState>,
}

impl FailureTracker {
    pub fn current(&self) -> Option<&FailureState> {
        self.current.as_ref()
    }

    /// Count a failure. Returns true when it starts a new kind of failure
    /// and should be logged.
    pub fn record_failure(&mut self, kind: FailureKind, now: DateTime<Utc>) -> bool {
        match &mut self.current {
            Some(state) if state.kind == kind => {
                state.attempts += 1;
                false
            }
            _ => {
                self.current = Some(FailureState {
                    kind,
                    first_seen: now,
                    attempts: 1,
                });
                true
            }
        }
    }

    /// Clear the failure state. Returns the failure that just ended, if any.
    pub fn record_success(&mut self) -> Option<FailureState> {
        self.current.take()
    }
}

/// Periodically feeds engine observations into the lifecycle tracker
pub struct EventPoller {
    engine: Arc<dyn ContainerEngine>,
    store: Arc<ContainerStore>,
    servers: ServerConfigStore,
    sender: EngineEventSender,
    interval: Duration,
    failures: FailureTracker,
}

impl EventPoller {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        store: Arc<ContainerStore>,
        servers: ServerConfigStore,
        sender: EngineEventSender,
        interval: Duration,
    ) -> Self {
        Self {
            engine,
            store,
            servers,
            sender,
            interval,
            failures: FailureTracker::default(),
        }
    }

    pub fn failures(&self) -> &FailureTracker {
        &self.failures
    }

    /// Poll once and forward what was found. Returns the number of events sent.
    #[instrument(skip(self))]
    pub async fn poll_once(&mut self) -> Result<usize> {
        let server = self
            .servers
            .load()
            .map_err(|e| BerthError::Internal {
                message: format!("{:#}", e),
            })?
            .ok_or(EngineError::NotConfigured)?;

        if server.swarm_mode {
            self.poll_services().await
        } else {
            self.poll_events(server.last_event_check_time).await
        }
    }

    async fn poll_events(&mut self, last_check: Option<DateTime<Utc>>) -> Result<usize> {
        let since = last_check.unwrap_or_default();
        let now = Utc::now();
        let events = self.engine.container_events(since, now).await?;
        debug!(since = %since, until = %now, count = events.len(), "Polled container events");

        let mut sent = 0;
        for event in events {
            self.send(EngineEvent::Container(event)).await?;
            sent += 1;
        }

        self.servers
            .set_last_event_check_time(now)
            .map_err(|e| BerthError::Internal {
                message: format!("{:#}", e),
            })?;
        Ok(sent)
    }

    async fn poll_services(&mut self) -> Result<usize> {
        let mut sent = 0;
        for container in self.store.non_finalized_services().await {
            let Some(service_id) = container.service_id.as_deref() else {
                continue;
            };
            let database_id = container.database_id;
            match self.engine.service_tasks(service_id).await {
                Ok(tasks) => {
                    let Some(task) = tasks.into_iter().next() else {
                        debug!(service_id, "Service has no tasks yet");
                        continue;
                    };
                    self.send(EngineEvent::ServiceTask { database_id, task }).await?;
                    sent += 1;
                }
                Err(BerthError::Engine(EngineError::ServiceNotFound { .. })) => {
                    self.send(EngineEvent::ServiceMissing { database_id }).await?;
                    sent += 1;
                }
                Err(BerthError::Engine(e)) if e.is_unavailable() => return Err(e.into()),
                Err(e) => warn!(service_id, "Failed to read service tasks: {}", e),
            }
        }
        Ok(sent)
    }

    async fn send(&self, event: EngineEvent) -> Result<()> {
        self.sender
            .send(event)
            .await
            .map_err(|_| BerthError::Internal {
                message: "Engine event channel closed".to_string(),
            })
    }

    /// Poll once and update the failure state, logging on transitions
    pub async fn tick(&mut self) {
        match self.poll_once().await {
            Ok(sent) => {
                if let Some(ended) = self.failures.record_success() {
                    info!(
                        attempts = ended.attempts,
                        since = %ended.first_seen,
                        "Engine polling recovered"
                    );
                }
                if sent > 0 {
                    debug!(sent, "Forwarded engine events");
                }
            }
            Err(e) => {
                if self.failures.record_failure(FailureKind::of(&e), Utc::now()) {
                    warn!("Engine polling failed: {}", e);
                } else {
                    debug!("Engine polling still failing: {}", e);
                }
            }
        }
    }

    /// Poll on every interval until `shutdown` resolves or the tracker
    /// stops listening
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    if self.sender.is_closed() {
                        break;
                    }
                    self.tick().await;
                }
            }
        }
        debug!("Poller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::engine::mock::{MockEngine, MockEngineConfig};
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_failure_logged_once_per_kind() {
        let mut failures = FailureTracker::default();
        let now = Utc::now();
        assert!(failures.record_failure(FailureKind::EngineUnavailable, now));
        assert!(!failures.record_failure(FailureKind::EngineUnavailable, now));
        assert!(!failures.record_failure(FailureKind::EngineUnavailable, now));
        assert_eq!(failures.current().unwrap().attempts, 3);

        assert!(failures.record_failure(FailureKind::NotConfigured, now));
        assert_eq!(failures.current().unwrap().attempts, 1);

        let ended = failures.record_success().unwrap();
        assert_eq!(ended.kind, FailureKind::NotConfigured);
        assert!(failures.record_success().is_none());
    }

    #[test]
    fn test_failure_kinds() {
        assert_eq!(
            FailureKind::of(&EngineError::NotConfigured.into()),
            FailureKind::NotConfigured
        );
        assert_eq!(
            FailureKind::of(&EngineError::CLIError("x".into()).into()),
            FailureKind::Engine
        );
    }

    #[tokio::test]
    async fn test_poll_without_server_is_not_configured() {
        let dir = tempfile::TempDir::new().unwrap();
        let (tx, _rx) = crate::events::engine_channel();
        let mut poller = EventPoller::new(
            Arc::new(MockEngine::new()),
            Arc::new(ContainerStore::in_memory()),
            ServerConfigStore::new(dir.path().join("server.json")),
            tx,
            Duration::from_secs(1),
        );
        assert!(matches!(
            poller.poll_once().await,
            Err(BerthError::Engine(EngineError::NotConfigured))
        ));
        poller.tick().await;
        poller.tick().await;
        assert_eq!(poller.failures().current().unwrap().attempts, 2);
    }

    #[tokio::test]
    async fn test_event_window_advances() {
        let dir = tempfile::TempDir::new().unwrap();
        let servers = ServerConfigStore::new(dir.path().join("server.json"));
        servers
            .save(&ServerConfig {
                host: "unix:///var/run/docker.sock".into(),
                ..Default::default()
            })
            .unwrap();

        let engine = MockEngine::with_config(MockEngineConfig::default());
        let (tx, mut rx) = crate::events::engine_channel();
        let mut poller = EventPoller::new(
            Arc::new(engine.clone()),
            Arc::new(ContainerStore::in_memory()),
            servers.clone(),
            tx,
            Duration::from_secs(1),
        );

        let old = (Utc::now() - ChronoDuration::hours(1)).timestamp();
        engine.push_event(crate::container::ContainerEvent {
            status: "start".into(),
            id: "c1".into(),
            time: old,
            time_nano: old * 1_000_000_000,
            attributes: Default::default(),
        });

        assert_eq!(poller.poll_once().await.unwrap(), 1);
        assert!(matches!(rx.recv().await, Some(EngineEvent::Container(_))));
        let checked = servers.load().unwrap().unwrap().last_event_check_time;
        assert!(checked.is_some());

        // the next window starts after the old event
        assert_eq!(poller.poll_once().await.unwrap(), 0);
    }
}
