//! Shared test helpers for core integration tests.

#![allow(dead_code)]

use berth_core::command::{Command, CommandLoader};
use berth_core::container::{ContainerEvent, ServiceTask};
use berth_core::resolved::ResolvedCommand;
use berth_core::resolver::CommandResolver;
use berth_core::site::DirectorySiteLookup;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

pub fn fixture(relative: &str) -> PathBuf {
    PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/../../fixtures")).join(relative)
}

pub fn load_command(name: &str) -> Command {
    CommandLoader::load_from_path(&fixture(&format!("commands/{}", name))).unwrap()
}

/// Resolver backed by the site objects under `fixtures/site`
pub fn site_resolver() -> CommandResolver {
    CommandResolver::new(Arc::new(DirectorySiteLookup::new(fixture("site"))))
}

pub fn values(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// The echo command resolved with its defaults
pub fn echo_command() -> ResolvedCommand {
    site_resolver()
        .resolve(&load_command("echo.json"), &HashMap::new())
        .unwrap()
}

/// A container event stamped with the current time
pub fn container_event(id: &str, status: &str, exit_code: Option<&str>) -> ContainerEvent {
    let now = Utc::now();
    let mut attributes = HashMap::new();
    if let Some(code) = exit_code {
        attributes.insert("exitCode".to_string(), code.to_string());
    }
    ContainerEvent {
        status: status.to_string(),
        id: id.to_string(),
        time: now.timestamp(),
        time_nano: now.timestamp_nanos_opt().unwrap_or_default(),
        attributes,
    }
}

pub fn service_task(
    service_id: &str,
    status: &str,
    at: DateTime<Utc>,
    exit_code: Option<i64>,
) -> ServiceTask {
    ServiceTask {
        service_id: service_id.to_string(),
        task_id: format!("{}-task", service_id),
        node_id: "node-1".to_string(),
        status: status.to_string(),
        status_time: Some(at),
        container_id: Some(format!("{}-ctr", service_id)),
        message: None,
        exit_code,
    }
}
