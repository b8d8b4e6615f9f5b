//! Container records and their history
//!
//! A [`Container`] is created at launch and afterwards only changes by
//! appending [`ContainerHistory`] entries. Its coarse [`ContainerStatus`] is
//! a projection of that history ([`derive_status`]), re-derived after every
//! append and cached on the record.

use crate::resolved::{ResolvedCommand, ResolvedInput, ResolvedMount, ResolvedOutput};
use chrono::{DateTime, TimeZone, Utc};
use indexmap::IndexMap;
use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

static TASK_NOT_STARTED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(new|allocated|pending|assigned|accepted|preparing|ready|starting)$")
        .expect("Valid regex pattern")
});
static TASK_RUNNING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^running$").expect("Valid regex pattern"));
static TASK_EXITED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(complete|shutdown|failed|rejected)$").expect("Valid regex pattern")
});
static EVENT_CREATED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^create$").expect("Valid regex pattern"));
static EVENT_RUNNING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(start|restart|unpause)$").expect("Valid regex pattern"));
static EVENT_EXITED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(kill|die|oom)$").expect("Valid regex pattern"));

/// Who produced a history entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    /// A container event reported by the engine
    Event,
    /// This system (launcher, finalizer, recovery)
    System,
    /// A user action
    User,
    /// A swarm service task update
    Service,
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntityType::Event => "event",
            EntityType::System => "system",
            EntityType::User => "user",
            EntityType::Service => "service",
        })
    }
}

/// Coarse lifecycle status of a container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ContainerStatus {
    #[default]
    Created,
    Starting,
    Running,
    /// Left mid-finalization by a previous process; eligible for another try
    Waiting,
    Finalizing,
    Complete,
    Failed,
    Killed,
}

impl ContainerStatus {
    pub const ALL: [ContainerStatus; 8] = [
        ContainerStatus::Created,
        ContainerStatus::Starting,
        ContainerStatus::Running,
        ContainerStatus::Waiting,
        ContainerStatus::Finalizing,
        ContainerStatus::Complete,
        ContainerStatus::Failed,
        ContainerStatus::Killed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerStatus::Created => "Created",
            ContainerStatus::Starting => "Starting",
            ContainerStatus::Running => "Running",
            ContainerStatus::Waiting => "Waiting",
            ContainerStatus::Finalizing => "Finalizing",
            ContainerStatus::Complete => "Complete",
            ContainerStatus::Failed => "Failed",
            ContainerStatus::Killed => "Killed",
        }
    }

    /// The status named exactly by `name`, if any
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == name)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ContainerStatus::Complete | ContainerStatus::Failed | ContainerStatus::Killed
        )
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ContainerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown container status '{}'", s))
    }
}

/// Where a swarm task is in its life
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    NotStarted,
    Running,
    Exited,
    Unknown,
}

impl TaskPhase {
    pub fn classify(status: &str) -> Self {
        if TASK_NOT_STARTED.is_match(status) {
            TaskPhase::NotStarted
        } else if TASK_RUNNING.is_match(status) {
            TaskPhase::Running
        } else if TASK_EXITED.is_match(status) {
            TaskPhase::Exited
        } else {
            TaskPhase::Unknown
        }
    }
}

/// One task of a swarm service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceTask {
    pub service_id: String,
    pub task_id: String,
    pub node_id: String,
    pub status: String,
    pub status_time: Option<DateTime<Utc>>,
    pub container_id: Option<String>,
    pub message: Option<String>,
    pub exit_code: Option<i64>,
}

impl ServiceTask {
    pub fn phase(&self) -> TaskPhase {
        TaskPhase::classify(&self.status)
    }

    pub fn is_exited(&self) -> bool {
        self.phase() == TaskPhase::Exited
    }
}

/// A container event reported by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerEvent {
    pub status: String,
    /// Engine container id
    pub id: String,
    /// Seconds since the epoch
    pub time: i64,
    pub time_nano: i64,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl ContainerEvent {
    /// Parse one line of `docker events --format '{{json .}}'` output.
    /// Returns `None` for non-container events.
    pub fn from_engine_json(value: &Value) -> Option<Self> {
        let kind = value.get("Type").and_then(Value::as_str).unwrap_or("container");
        if kind != "container" {
            return None;
        }
        let status = value
            .get("status")
            .or_else(|| value.get("Action"))
            .and_then(Value::as_str)?
            .to_string();
        let id = value
            .get("id")
            .or_else(|| value.get("Actor").and_then(|a| a.get("ID")))
            .and_then(Value::as_str)?
            .to_string();
        let time = value.get("time").and_then(Value::as_i64).unwrap_or(0);
        let time_nano = value
            .get("timeNano")
            .and_then(Value::as_i64)
            .unwrap_or(time.saturating_mul(1_000_000_000));
        let attributes = value
            .get("Actor")
            .and_then(|a| a.get("Attributes"))
            .and_then(Value::as_object)
            .map(|attrs| {
                attrs
                    .iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        Some(Self {
            status,
            id,
            time,
            time_nano,
            attributes,
        })
    }

    /// `die` is the only event carrying an exit status
    pub fn is_exit_status(&self) -> bool {
        self.status == "die"
    }

    /// The `exitCode` attribute; an exit-status event without one yields ""
    pub fn exit_code(&self) -> Option<String> {
        match self.attributes.get("exitCode") {
            Some(code) => Some(code.clone()),
            None if self.is_exit_status() => Some(String::new()),
            None => None,
        }
    }
}

/// One immutable observation about a container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerHistory {
    pub status: String,
    pub entity_type: EntityType,
    pub entity_id: Option<String>,
    pub time_recorded: DateTime<Utc>,
    pub external_timestamp: Option<String>,
    pub message: Option<String>,
    pub exit_code: Option<String>,
}

impl ContainerHistory {
    pub fn from_container_event(event: &ContainerEvent) -> Self {
        Self {
            status: event.status.clone(),
            entity_type: EntityType::Event,
            entity_id: None,
            time_recorded: Utc::now(),
            external_timestamp: Some(event.time_nano.to_string()),
            message: None,
            exit_code: event.exit_code(),
        }
    }

    pub fn from_system(status: impl Into<String>, message: Option<&str>) -> Self {
        Self {
            status: status.into(),
            entity_type: EntityType::System,
            entity_id: None,
            time_recorded: Utc::now(),
            external_timestamp: None,
            message: message.map(str::to_string),
            exit_code: None,
        }
    }

    pub fn from_user_action(status: impl Into<String>, username: &str) -> Self {
        Self {
            status: status.into(),
            entity_type: EntityType::User,
            entity_id: Some(username.to_string()),
            time_recorded: Utc::now(),
            external_timestamp: None,
            message: None,
            exit_code: None,
        }
    }

    pub fn from_service_task(task: &ServiceTask) -> Self {
        Self {
            status: task.status.clone(),
            entity_type: EntityType::Service,
            entity_id: None,
            time_recorded: Utc::now(),
            external_timestamp: task.status_time.map(|t| t.timestamp_millis().to_string()),
            message: task.message.clone(),
            exit_code: task.exit_code.map(|c| c.to_string()),
        }
    }

    /// Whether both entries record the same upstream notification.
    /// Entries without an external timestamp never match.
    pub fn same_event(&self, other: &ContainerHistory) -> bool {
        match (&self.external_timestamp, &other.external_timestamp) {
            (Some(a), Some(b)) => a == b && self.status == other.status,
            _ => false,
        }
    }

    /// The coarse status this entry implies, if it implies one
    pub fn projected_status(&self) -> Option<ContainerStatus> {
        match self.entity_type {
            EntityType::Event => {
                if EVENT_CREATED.is_match(&self.status) {
                    Some(ContainerStatus::Created)
                } else if EVENT_RUNNING.is_match(&self.status) {
                    Some(ContainerStatus::Running)
                } else if EVENT_EXITED.is_match(&self.status) {
                    Some(ContainerStatus::Finalizing)
                } else {
                    None
                }
            }
            EntityType::Service => match TaskPhase::classify(&self.status) {
                TaskPhase::NotStarted => Some(ContainerStatus::Starting),
                TaskPhase::Running => Some(ContainerStatus::Running),
                TaskPhase::Exited => Some(ContainerStatus::Finalizing),
                TaskPhase::Unknown => None,
            },
            EntityType::System => ContainerStatus::from_name(&self.status),
            // A user entry records a request; the engine's exit report moves the status
            EntityType::User => None,
        }
    }

    /// Whether this entry reports that the container stopped
    pub fn signals_exit(&self) -> bool {
        match self.entity_type {
            EntityType::Event => EVENT_EXITED.is_match(&self.status),
            EntityType::Service => TaskPhase::classify(&self.status) == TaskPhase::Exited,
            _ => false,
        }
    }
}

/// Fold a history into the current coarse status and when it was reached.
///
/// Engine entries (event and service) stop counting once a terminal status
/// has been reached.
pub fn derive_status(
    history: &[ContainerHistory],
) -> Option<(ContainerStatus, DateTime<Utc>)> {
    let mut current: Option<(ContainerStatus, DateTime<Utc>)> = None;
    for entry in history {
        let terminal = current.map(|(s, _)| s.is_terminal()).unwrap_or(false);
        if terminal && matches!(entry.entity_type, EntityType::Event | EntityType::Service) {
            continue;
        }
        if let Some(status) = entry.projected_status() {
            current = Some((status, entry.time_recorded));
        }
    }
    current
}

/// A launched container or swarm service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub database_id: i64,
    pub command_id: i64,
    pub wrapper_id: Option<i64>,
    pub container_id: Option<String>,
    pub service_id: Option<String>,
    pub task_id: Option<String>,
    pub node_id: Option<String>,
    pub user_id: String,
    pub project: Option<String>,
    pub docker_image: String,
    pub command_line: String,
    pub working_directory: Option<String>,
    pub environment: IndexMap<String, String>,
    pub mounts: Vec<ResolvedMount>,
    pub inputs: Vec<ResolvedInput>,
    pub outputs: Vec<ResolvedOutput>,
    pub swarm: bool,
    pub status: ContainerStatus,
    pub status_time: DateTime<Utc>,
    #[serde(default)]
    pub log_paths: Vec<String>,
    history: Vec<ContainerHistory>,
    #[serde(skip)]
    exit_code: OnceCell<String>,
}

impl Container {
    /// A record for a command about to be launched; the store assigns the id
    pub fn from_resolved(resolved: &ResolvedCommand, user: &str) -> Self {
        Self {
            database_id: 0,
            command_id: resolved.command_id(),
            wrapper_id: None,
            container_id: None,
            service_id: None,
            task_id: None,
            node_id: None,
            user_id: user.to_string(),
            project: None,
            docker_image: resolved.image().to_string(),
            command_line: resolved.command_line().to_string(),
            working_directory: resolved.working_directory().map(str::to_string),
            environment: resolved.environment().clone(),
            mounts: resolved.mounts().to_vec(),
            inputs: resolved.inputs().to_vec(),
            outputs: resolved.outputs().to_vec(),
            swarm: false,
            status: ContainerStatus::Created,
            status_time: Utc::now(),
            log_paths: Vec::new(),
            history: Vec::new(),
            exit_code: OnceCell::new(),
        }
    }

    pub fn history(&self) -> &[ContainerHistory] {
        &self.history
    }

    /// The engine-side id: the container id, or the service id in swarm mode
    pub fn external_id(&self) -> Option<&str> {
        if self.swarm {
            self.service_id.as_deref().or(self.container_id.as_deref())
        } else {
            self.container_id.as_deref()
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.status.is_terminal()
    }

    /// Append an entry unless it duplicates one already recorded, then
    /// re-derive the cached status. Returns whether the entry was added.
    pub fn append_history(&mut self, entry: ContainerHistory) -> bool {
        if self.history.iter().any(|h| h.same_event(&entry)) {
            return false;
        }
        self.history.push(entry);
        if let Some((status, time)) = derive_status(&self.history) {
            self.status = status;
            self.status_time = time;
        }
        true
    }

    /// The first non-null exit code in append order; cached once found
    pub fn exit_code(&self) -> Option<&str> {
        if let Some(code) = self.exit_code.get() {
            return Some(code.as_str());
        }
        let found = self.history.iter().find_map(|h| h.exit_code.clone())?;
        Some(self.exit_code.get_or_init(|| found).as_str())
    }

    /// Whether a kill was observed or requested
    pub fn was_killed(&self) -> bool {
        self.history.iter().any(|h| match h.entity_type {
            EntityType::Event => h.status == "kill",
            EntityType::User => h.status == ContainerStatus::Killed.as_str(),
            _ => false,
        })
    }

    /// Whether the last service task update reported completion
    pub fn task_completed(&self) -> bool {
        self.history
            .iter()
            .rev()
            .find(|h| h.entity_type == EntityType::Service)
            .map(|h| h.status.eq_ignore_ascii_case("complete"))
            .unwrap_or(false)
    }

    /// The terminal status a finished container settles in
    pub fn terminal_status(&self) -> ContainerStatus {
        if self.was_killed() {
            ContainerStatus::Killed
        } else if self.exit_code() == Some("0") || self.task_completed() {
            ContainerStatus::Complete
        } else {
            ContainerStatus::Failed
        }
    }

    /// Whether orphan recovery has already touched this container
    pub fn was_recovered(&self) -> bool {
        self.history.iter().any(|h| {
            h.entity_type == EntityType::System && h.status == ContainerStatus::Waiting.as_str()
        })
    }
}

/// Milliseconds since the epoch to a UTC timestamp
pub fn millis_to_datetime(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(status: &str, nano: i64, exit_code: Option<&str>) -> ContainerEvent {
        let mut attributes = HashMap::new();
        if let Some(code) = exit_code {
            attributes.insert("exitCode".to_string(), code.to_string());
        }
        ContainerEvent {
            status: status.to_string(),
            id: "abc".to_string(),
            time: nano / 1_000_000_000,
            time_nano: nano,
            attributes,
        }
    }

    fn container() -> Container {
        let resolved: ResolvedCommand = serde_json::from_value(json!({
            "command-id": 1,
            "command-name": "echo",
            "image": "busybox",
            "working-directory": null,
            "command-line": "echo hi",
            "environment": {},
            "ports": {},
            "mounts": [],
            "inputs": [],
            "outputs": []
        }))
        .unwrap();
        let mut container = Container::from_resolved(&resolved, "admin");
        container.container_id = Some("abc".to_string());
        container
    }

    #[test]
    fn test_task_phase_classification() {
        for s in ["new", "pending", "assigned", "ready", "starting", "PREPARING"] {
            assert_eq!(TaskPhase::classify(s), TaskPhase::NotStarted, "{s}");
        }
        assert_eq!(TaskPhase::classify("running"), TaskPhase::Running);
        for s in ["complete", "shutdown", "failed", "rejected"] {
            assert_eq!(TaskPhase::classify(s), TaskPhase::Exited, "{s}");
        }
        assert_eq!(TaskPhase::classify("orphaned"), TaskPhase::Unknown);
    }

    #[test]
    fn test_event_exit_code() {
        assert_eq!(event("die", 1, Some("137")).exit_code().as_deref(), Some("137"));
        assert_eq!(event("die", 1, None).exit_code().as_deref(), Some(""));
        assert_eq!(event("start", 1, None).exit_code(), None);
    }

    #[test]
    fn test_from_engine_json() {
        let line = json!({
            "status": "die",
            "id": "abc123",
            "Type": "container",
            "Action": "die",
            "Actor": {"ID": "abc123", "Attributes": {"exitCode": "2", "image": "busybox"}},
            "time": 1700000000,
            "timeNano": 1700000000123456789i64
        });
        let parsed = ContainerEvent::from_engine_json(&line).unwrap();
        assert_eq!(parsed.id, "abc123");
        assert_eq!(parsed.exit_code().as_deref(), Some("2"));
        assert_eq!(parsed.time_nano, 1700000000123456789);

        let network = json!({"Type": "network", "Action": "connect", "Actor": {"ID": "n"}});
        assert!(ContainerEvent::from_engine_json(&network).is_none());
    }

    #[test]
    fn test_history_dedup_on_status_and_timestamp() {
        let mut c = container();
        assert!(c.append_history(ContainerHistory::from_container_event(&event("start", 10, None))));
        assert!(!c.append_history(ContainerHistory::from_container_event(&event("start", 10, None))));
        assert!(c.append_history(ContainerHistory::from_container_event(&event("die", 10, Some("0")))));
        assert!(c.append_history(ContainerHistory::from_system("Finalizing", None)));
        assert!(c.append_history(ContainerHistory::from_system("Finalizing", None)));
        assert_eq!(c.history().len(), 4);
    }

    #[test]
    fn test_status_projection() {
        let mut c = container();
        c.append_history(ContainerHistory::from_system("Created", None));
        assert_eq!(c.status, ContainerStatus::Created);
        c.append_history(ContainerHistory::from_container_event(&event("start", 1, None)));
        assert_eq!(c.status, ContainerStatus::Running);
        c.append_history(ContainerHistory::from_container_event(&event("exec_start: sh", 2, None)));
        assert_eq!(c.status, ContainerStatus::Running);
        c.append_history(ContainerHistory::from_container_event(&event("die", 3, Some("1"))));
        assert_eq!(c.status, ContainerStatus::Finalizing);
        c.append_history(ContainerHistory::from_system("Failed", None));
        assert_eq!(c.status, ContainerStatus::Failed);
        assert!(c.is_finalized());

        // late engine entries are kept but do not reopen a finished container
        c.append_history(ContainerHistory::from_container_event(&event("start", 4, None)));
        assert_eq!(c.status, ContainerStatus::Failed);
        assert_eq!(c.history().len(), 6);
    }

    #[test]
    fn test_service_task_projection() {
        let task = |status: &str, millis: i64| ServiceTask {
            service_id: "svc".into(),
            task_id: "t1".into(),
            node_id: "n1".into(),
            status: status.into(),
            status_time: millis_to_datetime(millis),
            container_id: None,
            message: None,
            exit_code: None,
        };
        let mut c = container();
        c.swarm = true;
        c.append_history(ContainerHistory::from_service_task(&task("pending", 1)));
        assert_eq!(c.status, ContainerStatus::Starting);
        c.append_history(ContainerHistory::from_service_task(&task("running", 2)));
        assert_eq!(c.status, ContainerStatus::Running);
        let done = ContainerHistory::from_service_task(&task("complete", 3));
        assert!(done.signals_exit());
        assert_eq!(done.external_timestamp.as_deref(), Some("3"));
        c.append_history(done);
        assert_eq!(c.status, ContainerStatus::Finalizing);
        assert!(c.task_completed());
        assert_eq!(c.terminal_status(), ContainerStatus::Complete);
    }

    #[test]
    fn test_exit_code_first_non_null() {
        let mut c = container();
        assert_eq!(c.exit_code(), None);
        c.append_history(ContainerHistory::from_container_event(&event("start", 1, None)));
        c.append_history(ContainerHistory::from_container_event(&event("die", 2, Some("3"))));
        c.append_history(ContainerHistory::from_container_event(&event("die", 3, Some("0"))));
        assert_eq!(c.exit_code(), Some("3"));
        assert_eq!(c.terminal_status(), ContainerStatus::Failed);
    }

    #[test]
    fn test_killed_wins() {
        let mut c = container();
        c.append_history(ContainerHistory::from_container_event(&event("kill", 1, None)));
        c.append_history(ContainerHistory::from_container_event(&event("die", 2, Some("0"))));
        assert_eq!(c.terminal_status(), ContainerStatus::Killed);

        let mut c = container();
        c.append_history(ContainerHistory::from_container_event(&event("start", 1, None)));
        c.append_history(ContainerHistory::from_user_action("Killed", "admin"));
        assert_eq!(c.status, ContainerStatus::Running);
        assert!(c.was_killed());
        c.append_history(ContainerHistory::from_container_event(&event("die", 2, Some("137"))));
        assert_eq!(c.status, ContainerStatus::Finalizing);
        assert_eq!(c.terminal_status(), ContainerStatus::Killed);
    }

    #[test]
    fn test_serialized_record_round_trips_history() {
        let mut c = container();
        c.append_history(ContainerHistory::from_container_event(&event("die", 2, Some("0"))));
        assert_eq!(c.exit_code(), Some("0"));
        let text = serde_json::to_string(&c).unwrap();
        let back: Container = serde_json::from_str(&text).unwrap();
        assert_eq!(back.history().len(), 1);
        assert_eq!(back.exit_code(), Some("0"));
        assert_eq!(back.status, ContainerStatus::Finalizing);
    }
}
