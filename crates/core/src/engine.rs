//! Container engine integration
//!
//! [`ContainerEngine`] is the boundary to the external engine. [`CliEngine`]
//! drives the `docker` CLI against the configured server; [`mock::MockEngine`]
//! is an in-memory engine for tests.

use crate::config::ServerConfig;
use crate::container::{millis_to_datetime, ContainerEvent, ServiceTask};
use crate::errors::{BerthError, EngineError, Result};
use crate::resolved::ResolvedCommand;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::process::Command;
use tracing::{debug, instrument};

/// An image available on the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSummary {
    pub id: String,
    pub repository: String,
    pub tag: String,
    pub size: String,
    pub created: String,
}

/// Captured output of a finished container
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerLogs {
    pub stdout: String,
    pub stderr: String,
}

/// Operations the lifecycle needs from a container engine
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Health check for engine availability
    async fn ping(&self) -> Result<()>;

    /// Create (but do not start) a container; returns its id
    async fn create_container(&self, command: &ResolvedCommand) -> Result<String>;

    async fn start_container(&self, container_id: &str) -> Result<()>;

    /// Create a swarm service that runs once; returns the service id
    async fn create_service(&self, command: &ResolvedCommand) -> Result<String>;

    /// Tasks of a swarm service, most recent first
    async fn service_tasks(&self, service_id: &str) -> Result<Vec<ServiceTask>>;

    async fn list_images(&self) -> Result<Vec<ImageSummary>>;

    /// Container events with `since <= time <= until`
    async fn container_events(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<ContainerEvent>>;

    async fn kill_container(&self, container_id: &str) -> Result<()>;

    async fn remove_service(&self, service_id: &str) -> Result<()>;

    async fn container_logs(&self, container_id: &str) -> Result<ContainerLogs>;

    async fn service_logs(&self, service_id: &str) -> Result<ContainerLogs>;
}

/// Docker CLI engine for one configured server
#[derive(Debug, Clone)]
pub struct CliEngine {
    binary: String,
    server: Option<ServerConfig>,
}

impl CliEngine {
    pub fn new(server: Option<ServerConfig>) -> Self {
        Self {
            binary: "docker".to_string(),
            server,
        }
    }

    /// Use a different docker-compatible binary
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Connection flags for the configured server: `-H` plus TLS material
    pub(crate) fn connection_args(&self) -> std::result::Result<Vec<String>, EngineError> {
        let server = self.server.as_ref().ok_or(EngineError::NotConfigured)?;
        if server.host.trim().is_empty() {
            return Err(EngineError::NotConfigured);
        }

        let mut args = vec!["-H".to_string(), server.host.clone()];
        if let Some(cert_path) = server.cert_path.as_deref().filter(|p| !p.is_empty()) {
            let cert_dir = Path::new(cert_path);
            args.push("--tlsverify".to_string());
            for (flag, file) in [
                ("--tlscacert", "ca.pem"),
                ("--tlscert", "cert.pem"),
                ("--tlskey", "key.pem"),
            ] {
                args.push(flag.to_string());
                args.push(cert_dir.join(file).display().to_string());
            }
        }
        Ok(args)
    }

    /// Run the CLI with `args` and return stdout
    async fn run(&self, args: Vec<String>) -> Result<String> {
        let mut full_args = self.connection_args()?;
        full_args.extend(args);
        let binary = self.binary.clone();

        tokio::task::spawn_blocking(move || -> std::result::Result<String, EngineError> {
            debug!("Running {} {}", binary, full_args.join(" "));
            let output = Command::new(&binary).args(&full_args).output().map_err(|e| {
                EngineError::Unavailable {
                    message: format!("Failed to run {}: {}", binary, e),
                }
            })?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(classify_failure(stderr.trim()));
            }

            String::from_utf8(output.stdout)
                .map_err(|e| EngineError::CLIError(format!("Invalid UTF-8 in engine output: {}", e)))
        })
        .await
        .map_err(|e| EngineError::CLIError(format!("Task join error: {}", e)))?
        .map_err(Into::into)
    }

    /// Flags shared by `create` and `service create`
    fn launch_args(command: &ResolvedCommand, service: bool) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(dir) = command.working_directory() {
            args.push("--workdir".to_string());
            args.push(dir.to_string());
        }
        for (key, value) in command.environment() {
            args.push("--env".to_string());
            args.push(format!("{}={}", key, value));
        }
        for mount in command.mounts() {
            let Some(source) = mount.bind_source() else {
                continue;
            };
            let mut spec = format!("type=bind,source={},target={}", source, mount.container_path);
            if !mount.writable {
                spec.push_str(",readonly");
            }
            args.push("--mount".to_string());
            args.push(spec);
        }
        for (container_port, host_port) in command.ports() {
            if host_port.is_empty() {
                continue;
            }
            args.push("--publish".to_string());
            args.push(format!("{}:{}", host_port, container_port));
        }

        if service {
            if let Some(reserve) = command.reserve_memory() {
                args.push("--reserve-memory".to_string());
                args.push(format!("{}m", reserve));
            }
            if let Some(limit) = command.limit_memory() {
                args.push("--limit-memory".to_string());
                args.push(format!("{}m", limit));
            }
            if let Some(cpu) = command.limit_cpu() {
                args.push("--limit-cpu".to_string());
                args.push(cpu.to_string());
            }
        } else {
            if let Some(reserve) = command.reserve_memory() {
                args.push("--memory-reservation".to_string());
                args.push(format!("{}m", reserve));
            }
            if let Some(limit) = command.limit_memory() {
                args.push("--memory".to_string());
                args.push(format!("{}m", limit));
            }
            if let Some(cpu) = command.limit_cpu() {
                args.push("--cpus".to_string());
                args.push(cpu.to_string());
            }
        }
        args
    }

    /// The image and command-line words that end a create invocation
    fn command_words(command: &ResolvedCommand) -> Result<Vec<String>> {
        let mut words = vec![command.image().to_string()];
        if !command.command_line().trim().is_empty() {
            let split = shell_words::split(command.command_line()).map_err(|e| {
                EngineError::CLIError(format!(
                    "Cannot split command line \"{}\": {}",
                    command.command_line(),
                    e
                ))
            })?;
            words.extend(split);
        }
        Ok(words)
    }
}

fn classify_failure(stderr: &str) -> EngineError {
    let lower = stderr.to_lowercase();
    if lower.contains("cannot connect to the docker daemon")
        || lower.contains("error during connect")
        || lower.contains("connection refused")
    {
        EngineError::Unavailable {
            message: stderr.to_string(),
        }
    } else if lower.contains("no such service") {
        EngineError::ServiceNotFound {
            id: stderr.rsplit(' ').next().unwrap_or_default().to_string(),
        }
    } else if lower.contains("no such container") {
        EngineError::ContainerNotFound {
            id: stderr.rsplit(' ').next().unwrap_or_default().to_string(),
        }
    } else {
        EngineError::CLIError(stderr.to_string())
    }
}

fn json_lines(stdout: &str) -> Result<Vec<Value>> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|line| {
            serde_json::from_str::<Value>(line).map_err(|e| -> BerthError {
                EngineError::CLIError(format!("Failed to parse engine JSON: {}", e)).into()
            })
        })
        .collect()
}

fn string_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Parse one element of `docker inspect <task>` output
pub fn parse_task_inspect(value: &Value) -> Option<ServiceTask> {
    let status = value.get("Status")?;
    let container_status = status.get("ContainerStatus");
    let message = status
        .get("Err")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .or_else(|| status.get("Message").and_then(Value::as_str))
        .map(str::to_string);

    Some(ServiceTask {
        service_id: value.get("ServiceID")?.as_str()?.to_string(),
        task_id: value.get("ID")?.as_str()?.to_string(),
        node_id: string_field(value, "NodeID"),
        status: status.get("State")?.as_str()?.to_string(),
        status_time: status
            .get("Timestamp")
            .and_then(Value::as_str)
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
            .and_then(|t| millis_to_datetime(t.timestamp_millis())),
        container_id: container_status
            .and_then(|c| c.get("ContainerID"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        message,
        exit_code: container_status
            .and_then(|c| c.get("ExitCode"))
            .and_then(Value::as_i64),
    })
}

/// Parse one line of `docker images --format '{{json .}}'` output
pub fn parse_image_line(value: &Value) -> ImageSummary {
    ImageSummary {
        id: string_field(value, "ID"),
        repository: string_field(value, "Repository"),
        tag: string_field(value, "Tag"),
        size: string_field(value, "Size"),
        created: string_field(value, "CreatedSince"),
    }
}

#[async_trait]
impl ContainerEngine for CliEngine {
    #[instrument(skip(self))]
    async fn ping(&self) -> Result<()> {
        debug!("Pinging container engine");
        self.run(vec!["version".into(), "--format".into(), "json".into()])
            .await
            .map(|_| ())
    }

    #[instrument(skip_all, fields(image = %command.image()))]
    async fn create_container(&self, command: &ResolvedCommand) -> Result<String> {
        let mut args = vec!["create".to_string()];
        args.extend(Self::launch_args(command, false));
        args.extend(Self::command_words(command)?);
        let id = self.run(args).await?.trim().to_string();
        debug!(container_id = %id, "Created container");
        Ok(id)
    }

    #[instrument(skip(self))]
    async fn start_container(&self, container_id: &str) -> Result<()> {
        self.run(vec!["start".into(), container_id.to_string()])
            .await
            .map(|_| ())
    }

    #[instrument(skip_all, fields(image = %command.image()))]
    async fn create_service(&self, command: &ResolvedCommand) -> Result<String> {
        let mut args = vec![
            "service".to_string(),
            "create".to_string(),
            "--detach".to_string(),
            "--quiet".to_string(),
            "--restart-condition".to_string(),
            "none".to_string(),
        ];
        args.extend(Self::launch_args(command, true));
        args.extend(Self::command_words(command)?);
        let id = self.run(args).await?.trim().to_string();
        debug!(service_id = %id, "Created service");
        Ok(id)
    }

    #[instrument(skip(self))]
    async fn service_tasks(&self, service_id: &str) -> Result<Vec<ServiceTask>> {
        let ids = self
            .run(vec![
                "service".into(),
                "ps".into(),
                "--quiet".into(),
                "--no-trunc".into(),
                service_id.to_string(),
            ])
            .await
            .map_err(|e| match e {
                BerthError::Engine(EngineError::ServiceNotFound { .. }) => {
                    EngineError::ServiceNotFound {
                        id: service_id.to_string(),
                    }
                    .into()
                }
                other => other,
            })?;
        let task_ids: Vec<String> = ids.split_whitespace().map(str::to_string).collect();
        if task_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut args = vec!["inspect".to_string()];
        args.extend(task_ids);
        let stdout = self.run(args).await?;
        let parsed: Value = serde_json::from_str(stdout.trim()).map_err(|e| {
            EngineError::CLIError(format!("Failed to parse task inspect output: {}", e))
        })?;
        let mut tasks: Vec<ServiceTask> = parsed
            .as_array()
            .map(|items| items.iter().filter_map(parse_task_inspect).collect())
            .unwrap_or_default();
        tasks.sort_by(|a, b| b.status_time.cmp(&a.status_time));
        Ok(tasks)
    }

    #[instrument(skip(self))]
    async fn list_images(&self) -> Result<Vec<ImageSummary>> {
        let stdout = self
            .run(vec!["images".into(), "--format".into(), "{{json .}}".into()])
            .await?;
        Ok(json_lines(&stdout)?.iter().map(parse_image_line).collect())
    }

    #[instrument(skip(self))]
    async fn container_events(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<ContainerEvent>> {
        let stdout = self
            .run(vec![
                "events".into(),
                "--since".into(),
                since.timestamp().to_string(),
                "--until".into(),
                until.timestamp().to_string(),
                "--filter".into(),
                "type=container".into(),
                "--format".into(),
                "{{json .}}".into(),
            ])
            .await?;
        let events: Vec<ContainerEvent> = json_lines(&stdout)?
            .iter()
            .filter_map(ContainerEvent::from_engine_json)
            .collect();
        debug!(count = events.len(), "Fetched container events");
        Ok(events)
    }

    #[instrument(skip(self))]
    async fn kill_container(&self, container_id: &str) -> Result<()> {
        self.run(vec!["kill".into(), container_id.to_string()])
            .await
            .map(|_| ())
    }

    #[instrument(skip(self))]
    async fn remove_service(&self, service_id: &str) -> Result<()> {
        self.run(vec!["service".into(), "rm".into(), service_id.to_string()])
            .await
            .map(|_| ())
    }

    #[instrument(skip(self))]
    async fn container_logs(&self, container_id: &str) -> Result<ContainerLogs> {
        self.capture_logs(vec!["logs".into(), container_id.to_string()])
            .await
    }

    #[instrument(skip(self))]
    async fn service_logs(&self, service_id: &str) -> Result<ContainerLogs> {
        self.capture_logs(vec!["service".into(), "logs".into(), service_id.to_string()])
            .await
    }
}

impl CliEngine {
    /// `logs` writes the container's stdout and stderr to the matching streams
    async fn capture_logs(&self, args: Vec<String>) -> Result<ContainerLogs> {
        let mut full_args = self.connection_args()?;
        full_args.extend(args);
        let binary = self.binary.clone();

        tokio::task::spawn_blocking(move || -> std::result::Result<ContainerLogs, EngineError> {
            let output = Command::new(&binary).args(&full_args).output().map_err(|e| {
                EngineError::Unavailable {
                    message: format!("Failed to run {}: {}", binary, e),
                }
            })?;
            if !output.status.success() {
                return Err(classify_failure(String::from_utf8_lossy(&output.stderr).trim()));
            }
            Ok(ContainerLogs {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        })
        .await
        .map_err(|e| EngineError::CLIError(format!("Task join error: {}", e)))?
        .map_err(Into::into)
    }
}

pub mod mock {
    //! In-memory engine for tests
    //!
    //! Containers and services are recorded rather than run. Tests feed
    //! events and task states in and inspect the recorded calls.

    use super::{ContainerEngine, ContainerLogs, ImageSummary};
    use crate::container::{ContainerEvent, ServiceTask};
    use crate::errors::{EngineError, Result};
    use crate::resolved::ResolvedCommand;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
    use tracing::debug;

    fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Behavior switches for [`MockEngine`]
    #[derive(Debug, Clone, Default)]
    pub struct MockEngineConfig {
        /// Every call fails with `NotConfigured`
        pub not_configured: bool,
        /// Every call fails with `Unavailable`
        pub daemon_unavailable: bool,
        /// Container and service creation fail with a CLI error
        pub fail_create: bool,
        /// `start_container` fails with a CLI error
        pub fail_start: bool,
        /// Log fetches fail with a CLI error
        pub fail_logs: bool,
    }

    /// One recorded engine call
    #[derive(Debug, Clone, PartialEq)]
    pub enum MockCall {
        CreateContainer { image: String, command_line: String },
        StartContainer(String),
        CreateService { image: String },
        Kill(String),
        RemoveService(String),
        Logs(String),
        Events,
        Tasks(String),
    }

    #[derive(Debug, Default)]
    struct MockState {
        next_id: u64,
        created: HashMap<String, ResolvedCommand>,
        events: Vec<ContainerEvent>,
        tasks: HashMap<String, Vec<ServiceTask>>,
        logs: HashMap<String, ContainerLogs>,
        images: Vec<ImageSummary>,
    }

    #[derive(Debug, Clone, Default)]
    pub struct MockEngine {
        config: Arc<Mutex<MockEngineConfig>>,
        state: Arc<Mutex<MockState>>,
        calls: Arc<Mutex<Vec<MockCall>>>,
    }

    impl MockEngine {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_config(config: MockEngineConfig) -> Self {
            Self {
                config: Arc::new(Mutex::new(config)),
                ..Self::default()
            }
        }

        pub fn update_config<F>(&self, f: F)
        where
            F: FnOnce(&mut MockEngineConfig),
        {
            f(&mut lock(&self.config));
        }

        /// Queue an event for `container_events`
        pub fn push_event(&self, event: ContainerEvent) {
            lock(&self.state).events.push(event);
        }

        /// Replace the task list of a service
        pub fn set_tasks(&self, service_id: &str, tasks: Vec<ServiceTask>) {
            lock(&self.state)
                .tasks
                .insert(service_id.to_string(), tasks);
        }

        /// Forget a service, as if it was removed from the swarm
        pub fn drop_service(&self, service_id: &str) {
            lock(&self.state).tasks.remove(service_id);
        }

        pub fn set_logs(&self, id: &str, stdout: &str, stderr: &str) {
            lock(&self.state).logs.insert(
                id.to_string(),
                ContainerLogs {
                    stdout: stdout.to_string(),
                    stderr: stderr.to_string(),
                },
            );
        }

        pub fn add_image(&self, image: ImageSummary) {
            lock(&self.state).images.push(image);
        }

        /// The command a created container or service was launched with
        pub fn created(&self, id: &str) -> Option<ResolvedCommand> {
            lock(&self.state).created.get(id).cloned()
        }

        pub fn calls(&self) -> Vec<MockCall> {
            lock(&self.calls).clone()
        }

        fn record(&self, call: MockCall) {
            lock(&self.calls).push(call);
        }

        fn check_available(&self) -> Result<()> {
            let config = lock(&self.config);
            if config.not_configured {
                return Err(EngineError::NotConfigured.into());
            }
            if config.daemon_unavailable {
                return Err(EngineError::Unavailable {
                    message: "mock engine unavailable".to_string(),
                }
                .into());
            }
            Ok(())
        }

        fn check_create(&self) -> Result<()> {
            if lock(&self.config).fail_create {
                return Err(EngineError::CLIError("mock create failure".to_string()).into());
            }
            Ok(())
        }

        fn register(&self, prefix: &str, command: &ResolvedCommand) -> String {
            let mut state = lock(&self.state);
            state.next_id += 1;
            let id = format!("{}-{}", prefix, state.next_id);
            state.created.insert(id.clone(), command.clone());
            id
        }
    }

    #[async_trait]
    impl ContainerEngine for MockEngine {
        async fn ping(&self) -> Result<()> {
            self.check_available()
        }

        async fn create_container(&self, command: &ResolvedCommand) -> Result<String> {
            self.check_available()?;
            self.record(MockCall::CreateContainer {
                image: command.image().to_string(),
                command_line: command.command_line().to_string(),
            });
            self.check_create()?;
            let id = self.register("mock-container", command);
            debug!(container_id = %id, "MockEngine created container");
            Ok(id)
        }

        async fn start_container(&self, container_id: &str) -> Result<()> {
            self.check_available()?;
            self.record(MockCall::StartContainer(container_id.to_string()));
            if lock(&self.config).fail_start {
                return Err(EngineError::CLIError("mock start failure".to_string()).into());
            }
            if !lock(&self.state).created.contains_key(container_id) {
                return Err(EngineError::ContainerNotFound {
                    id: container_id.to_string(),
                }
                .into());
            }
            Ok(())
        }

        async fn create_service(&self, command: &ResolvedCommand) -> Result<String> {
            self.check_available()?;
            self.record(MockCall::CreateService {
                image: command.image().to_string(),
            });
            self.check_create()?;
            let id = self.register("mock-service", command);
            lock(&self.state).tasks.insert(id.clone(), Vec::new());
            Ok(id)
        }

        async fn service_tasks(&self, service_id: &str) -> Result<Vec<ServiceTask>> {
            self.check_available()?;
            self.record(MockCall::Tasks(service_id.to_string()));
            lock(&self.state)
                .tasks
                .get(service_id)
                .cloned()
                .ok_or_else(|| {
                    EngineError::ServiceNotFound {
                        id: service_id.to_string(),
                    }
                    .into()
                })
        }

        async fn list_images(&self) -> Result<Vec<ImageSummary>> {
            self.check_available()?;
            Ok(lock(&self.state).images.clone())
        }

        async fn container_events(
            &self,
            since: DateTime<Utc>,
            until: DateTime<Utc>,
        ) -> Result<Vec<ContainerEvent>> {
            self.check_available()?;
            self.record(MockCall::Events);
            let (since, until) = (since.timestamp(), until.timestamp());
            Ok(lock(&self.state)
                .events
                .iter()
                .filter(|e| e.time >= since && e.time <= until)
                .cloned()
                .collect())
        }

        async fn kill_container(&self, container_id: &str) -> Result<()> {
            self.check_available()?;
            self.record(MockCall::Kill(container_id.to_string()));
            Ok(())
        }

        async fn remove_service(&self, service_id: &str) -> Result<()> {
            self.check_available()?;
            self.record(MockCall::RemoveService(service_id.to_string()));
            Ok(())
        }

        async fn container_logs(&self, container_id: &str) -> Result<ContainerLogs> {
            self.check_available()?;
            self.record(MockCall::Logs(container_id.to_string()));
            if lock(&self.config).fail_logs {
                return Err(EngineError::CLIError("mock log failure".to_string()).into());
            }
            Ok(lock(&self.state)
                .logs
                .get(container_id)
                .cloned()
                .unwrap_or_default())
        }

        async fn service_logs(&self, service_id: &str) -> Result<ContainerLogs> {
            self.container_logs(service_id).await
        }
    }
}
