//! Launch, poll and finalize against the mock engine
//!
//! These tests wire the launcher, poller and lifecycle tracker together the
//! way the watcher does, with the mock engine standing in for docker.

mod common;

use berth_core::config::{ServerConfig, ServerConfigStore};
use berth_core::container::ContainerStatus;
use berth_core::engine::mock::{MockCall, MockEngine};
use berth_core::events::{engine_channel, LifecycleBus, LifecycleEvent};
use berth_core::launcher::{ContainerLauncher, StaticCredentials};
use berth_core::lifecycle::{LifecycleTracker, LogCaptureFinalizer};
use berth_core::poller::EventPoller;
use berth_core::store::ContainerStore;
use chrono::{Duration as ChronoDuration, Utc};
use common::{container_event, echo_command, service_task};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Harness {
    dir: TempDir,
    engine: Arc<MockEngine>,
    store: Arc<ContainerStore>,
    servers: ServerConfigStore,
}

impl Harness {
    fn new(swarm_mode: bool) -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(ContainerStore::open(dir.path().join("containers")).unwrap());
        let servers = ServerConfigStore::new(dir.path().join("server.json"));
        servers
            .save(&ServerConfig {
                name: "default".to_string(),
                host: "unix:///var/run/docker.sock".to_string(),
                swarm_mode,
                ..Default::default()
            })
            .unwrap();
        Self {
            dir,
            engine: Arc::new(MockEngine::new()),
            store,
            servers,
        }
    }

    fn launcher(&self, swarm: bool) -> ContainerLauncher {
        ContainerLauncher::new(
            self.engine.clone(),
            self.store.clone(),
            Arc::new(StaticCredentials::new("https://site.example", Some("tok".into()))),
            self.dir.path().join("build"),
        )
        .with_swarm(swarm)
    }

    fn tracker(&self) -> Arc<LifecycleTracker> {
        Arc::new(LifecycleTracker::new(
            self.store.clone(),
            self.engine.clone(),
            Arc::new(LogCaptureFinalizer::new(
                self.engine.clone(),
                self.dir.path().join("logs"),
            )),
            LifecycleBus::default(),
        ))
    }
}

#[tokio::test]
async fn test_container_runs_to_completion() {
    let harness = Harness::new(false);
    let container = harness.launcher(false).launch(echo_command(), "alice").await.unwrap();
    let container_id = container.container_id.clone().unwrap();
    assert_eq!(container.status, ContainerStatus::Created);
    assert_eq!(container.environment["BERTH_PASS"], "********");

    harness.engine.set_logs(&container_id, "hello\n", "");
    harness.engine.push_event(container_event(&container_id, "start", None));
    harness.engine.push_event(container_event(&container_id, "die", Some("0")));

    let tracker = harness.tracker();
    let mut changes = tracker.bus().subscribe();
    let (sender, receiver) = engine_channel();
    let consumer = tokio::spawn(tracker.clone().run(receiver));

    let mut poller = EventPoller::new(
        harness.engine.clone(),
        harness.store.clone(),
        harness.servers.clone(),
        sender,
        Duration::from_secs(1),
    );
    assert_eq!(poller.poll_once().await.unwrap(), 2);
    drop(poller);
    consumer.await.unwrap();

    let finished = harness.store.get(container.database_id).await.unwrap();
    assert_eq!(finished.status, ContainerStatus::Complete);
    assert_eq!(finished.exit_code(), Some("0"));
    assert_eq!(finished.log_paths.len(), 1);
    let stdout = std::fs::read_to_string(&finished.log_paths[0]).unwrap();
    assert_eq!(stdout, "hello\n");
    assert!(harness
        .servers
        .load()
        .unwrap()
        .unwrap()
        .last_event_check_time
        .is_some());

    let mut seen = Vec::new();
    while let Ok(LifecycleEvent::StatusChanged { to, .. }) = changes.try_recv() {
        seen.push(to);
    }
    assert_eq!(
        seen,
        vec![
            ContainerStatus::Running,
            ContainerStatus::Finalizing,
            ContainerStatus::Complete
        ]
    );
}

#[tokio::test]
async fn test_second_poll_window_skips_old_events() {
    let harness = Harness::new(false);
    let container = harness.launcher(false).launch(echo_command(), "alice").await.unwrap();
    let container_id = container.container_id.clone().unwrap();
    harness.engine.push_event(container_event(&container_id, "start", None));

    let (sender, mut receiver) = engine_channel();
    let mut poller = EventPoller::new(
        harness.engine.clone(),
        harness.store.clone(),
        harness.servers.clone(),
        sender,
        Duration::from_secs(1),
    );
    assert_eq!(poller.poll_once().await.unwrap(), 1);
    assert!(receiver.try_recv().is_ok());

    // Move the window past the queued event
    let mut server = harness.servers.load().unwrap().unwrap();
    server.last_event_check_time = Some(Utc::now() + ChronoDuration::seconds(5));
    harness.servers.save(&server).unwrap();
    assert_eq!(poller.poll_once().await.unwrap(), 0);
}

#[tokio::test]
async fn test_swarm_service_lifecycle() {
    let harness = Harness::new(true);
    let container = harness.launcher(true).launch(echo_command(), "bob").await.unwrap();
    let service_id = container.service_id.clone().unwrap();
    assert!(container.swarm);
    assert!(!harness
        .engine
        .calls()
        .iter()
        .any(|c| matches!(c, MockCall::StartContainer(_))));

    let tracker = harness.tracker();
    let (sender, receiver) = engine_channel();
    let consumer = tokio::spawn(tracker.clone().run(receiver));
    let mut poller = EventPoller::new(
        harness.engine.clone(),
        harness.store.clone(),
        harness.servers.clone(),
        sender,
        Duration::from_secs(1),
    );

    // No tasks yet
    assert_eq!(poller.poll_once().await.unwrap(), 0);

    let started = Utc::now();
    harness
        .engine
        .set_tasks(&service_id, vec![service_task(&service_id, "running", started, None)]);
    assert_eq!(poller.poll_once().await.unwrap(), 1);

    harness.engine.set_tasks(
        &service_id,
        vec![service_task(
            &service_id,
            "complete",
            started + ChronoDuration::seconds(3),
            Some(0),
        )],
    );
    assert_eq!(poller.poll_once().await.unwrap(), 1);
    drop(poller);
    consumer.await.unwrap();

    let finished = harness.store.get(container.database_id).await.unwrap();
    assert_eq!(finished.status, ContainerStatus::Complete);
    assert_eq!(finished.task_id.as_deref(), Some(format!("{}-task", service_id).as_str()));
    assert_eq!(finished.node_id.as_deref(), Some("node-1"));
    assert!(harness.store.non_finalized_services().await.is_empty());
}

#[tokio::test]
async fn test_removed_service_fails_container() {
    let harness = Harness::new(true);
    let container = harness.launcher(true).launch(echo_command(), "bob").await.unwrap();
    harness
        .engine
        .drop_service(container.service_id.as_deref().unwrap());

    let tracker = harness.tracker();
    let (sender, receiver) = engine_channel();
    let consumer = tokio::spawn(tracker.clone().run(receiver));
    let mut poller = EventPoller::new(
        harness.engine.clone(),
        harness.store.clone(),
        harness.servers.clone(),
        sender,
        Duration::from_secs(1),
    );
    assert_eq!(poller.poll_once().await.unwrap(), 1);
    drop(poller);
    consumer.await.unwrap();

    let failed = harness.store.get(container.database_id).await.unwrap();
    assert_eq!(failed.status, ContainerStatus::Failed);
    assert_eq!(
        failed.history().last().unwrap().message.as_deref(),
        Some(berth_core::lifecycle::SERVICE_MISSING_MESSAGE)
    );
}

#[tokio::test]
async fn test_killed_container_is_finalized_by_its_exit() {
    let harness = Harness::new(false);
    let container = harness.launcher(false).launch(echo_command(), "alice").await.unwrap();
    let container_id = container.container_id.clone().unwrap();
    harness.engine.set_logs(&container_id, "partial\n", "Terminated\n");
    let tracker = harness.tracker();

    // The request is recorded; the container is still running
    assert_eq!(
        tracker.kill(container.database_id, "alice").await.unwrap(),
        ContainerStatus::Created
    );
    assert!(harness
        .engine
        .calls()
        .contains(&MockCall::Kill(container_id.clone())));

    let exit = berth_core::events::EngineEvent::Container(container_event(
        &container_id,
        "die",
        Some("137"),
    ));
    assert_eq!(
        tracker.process(exit).await.unwrap(),
        Some(ContainerStatus::Killed)
    );

    let killed = harness.store.get(container.database_id).await.unwrap();
    assert_eq!(killed.status, ContainerStatus::Killed);
    assert_eq!(killed.log_paths.len(), 2);
    let finalizing = killed
        .history()
        .iter()
        .filter(|h| h.status == "Finalizing")
        .count();
    assert_eq!(finalizing, 1);
    assert!(harness
        .engine
        .calls()
        .contains(&MockCall::Logs(container_id)));
}
