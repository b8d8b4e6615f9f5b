//! Command implementations
//!
//! This module contains implementations for all CLI subcommands, plus the
//! [`Context`] they share: loaded settings and the stores under the data
//! directory.

pub mod containers;
pub mod images;
pub mod launch;
pub mod recover;
pub mod resolve;
pub mod server;
pub mod watch;

use crate::cli::InputArgs;
use anyhow::{Context as _, Result};
use berth_core::command::{Command, CommandLoader};
use berth_core::config::{ServerConfig, ServerConfigStore, Settings, SettingsLoader};
use berth_core::engine::CliEngine;
use berth_core::site::{DirectorySiteLookup, NoSiteLookup, SiteLookup};
use berth_core::store::ContainerStore;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Settings and stores shared by every subcommand
pub struct Context {
    pub settings: Settings,
    pub servers: ServerConfigStore,
}

impl Context {
    pub fn load(config: Option<&Path>) -> Result<Self> {
        let settings = SettingsLoader::load(config)?;
        debug!(data_dir = %settings.data_dir.display(), "Loaded settings");
        let servers = ServerConfigStore::new(settings.server_config_path());
        Ok(Self { settings, servers })
    }

    pub fn open_store(&self) -> Result<Arc<ContainerStore>> {
        Ok(Arc::new(ContainerStore::open(self.settings.containers_dir())?))
    }

    pub fn server(&self) -> Result<Option<ServerConfig>> {
        self.servers.load()
    }

    /// Engine for the configured server; calls fail with `NotConfigured`
    /// when there is none
    pub fn engine(&self) -> Result<(CliEngine, Option<ServerConfig>)> {
        let server = self.server()?;
        Ok((CliEngine::new(server.clone()), server))
    }

    pub fn site_lookup(&self) -> Arc<dyn SiteLookup> {
        match &self.settings.site_data_dir {
            Some(dir) => Arc::new(DirectorySiteLookup::new(dir)),
            None => Arc::new(NoSiteLookup),
        }
    }
}

/// Load the command definition and collect its input values. Values given
/// with `--input` win over the inputs file.
pub fn load_inputs(args: &InputArgs) -> Result<(Command, HashMap<String, String>)> {
    let command = CommandLoader::load_from_path(&args.command_file)?;

    let mut values = HashMap::new();
    if let Some(path) = &args.inputs_file {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read inputs file: {}", path.display()))?;
        let parsed: HashMap<String, serde_json::Value> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse inputs file: {}", path.display()))?;
        for (name, value) in parsed {
            let value = match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            values.insert(name, value);
        }
    }
    for pair in &args.inputs {
        let (name, value) = parse_input_pair(pair)?;
        values.insert(name, value);
    }
    Ok((command, values))
}

fn parse_input_pair(pair: &str) -> Result<(String, String)> {
    let (name, value) = pair
        .split_once('=')
        .with_context(|| format!("Invalid input '{}': expected NAME=VALUE", pair))?;
    let name = name.trim();
    if name.is_empty() {
        anyhow::bail!("Invalid input '{}': name must not be empty", pair);
    }
    Ok((name.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_input_pair() {
        assert_eq!(
            parse_input_pair("session=S1").unwrap(),
            ("session".to_string(), "S1".to_string())
        );
        assert_eq!(
            parse_input_pair("expr=a=b").unwrap(),
            ("expr".to_string(), "a=b".to_string())
        );
        assert!(parse_input_pair("novalue").is_err());
        assert!(parse_input_pair("=x").is_err());
    }
}
