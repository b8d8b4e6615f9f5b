//! Resolved commands
//!
//! The output of resolution: every input has its final value and every
//! template is substituted. A [`ResolvedCommand`] is only changed afterwards
//! by the launcher, through [`ResolvedCommand::add_environment_variables`]
//! and [`ResolvedCommand::rewrite_mount_host_path`].

use crate::command::InputType;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

const MASK: &str = "********";

/// An input with its final value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ResolvedInput {
    pub name: String,
    #[serde(rename = "type")]
    pub input_type: InputType,
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub sensitive: bool,
}

impl ResolvedInput {
    /// The value as it may appear in logs
    pub fn display_value(&self) -> &str {
        match (&self.value, self.sensitive) {
            (None, _) => "null",
            (Some(_), true) => MASK,
            (Some(v), false) => v,
        }
    }
}

/// A mount with its host directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ResolvedMount {
    pub name: String,
    pub container_path: String,
    pub writable: bool,
    /// Directory on the site's filesystem
    pub host_path: Option<String>,
    /// The same directory as seen from the engine host, set at launch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_host_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_input: Option<String>,
}

impl ResolvedMount {
    /// The path to bind on the engine host
    pub fn bind_source(&self) -> Option<&str> {
        self.engine_host_path
            .as_deref()
            .or(self.host_path.as_deref())
    }
}

/// An output with its path template substituted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ResolvedOutput {
    pub name: String,
    pub mount: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub glob: Option<String>,
    pub required: bool,
}

/// A fully substituted, launchable command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ResolvedCommand {
    pub(crate) command_id: i64,
    pub(crate) command_name: String,
    pub(crate) image: String,
    pub(crate) working_directory: Option<String>,
    pub(crate) command_line: String,
    pub(crate) environment: IndexMap<String, String>,
    pub(crate) ports: IndexMap<String, String>,
    pub(crate) mounts: Vec<ResolvedMount>,
    pub(crate) inputs: Vec<ResolvedInput>,
    pub(crate) outputs: Vec<ResolvedOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) reserve_memory: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) limit_memory: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) limit_cpu: Option<f64>,
}

impl ResolvedCommand {
    pub fn command_id(&self) -> i64 {
        self.command_id
    }

    pub fn command_name(&self) -> &str {
        &self.command_name
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn working_directory(&self) -> Option<&str> {
        self.working_directory.as_deref()
    }

    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    pub fn environment(&self) -> &IndexMap<String, String> {
        &self.environment
    }

    pub fn ports(&self) -> &IndexMap<String, String> {
        &self.ports
    }

    pub fn mounts(&self) -> &[ResolvedMount] {
        &self.mounts
    }

    pub fn mount(&self, name: &str) -> Option<&ResolvedMount> {
        self.mounts.iter().find(|m| m.name == name)
    }

    pub fn inputs(&self) -> &[ResolvedInput] {
        &self.inputs
    }

    pub fn input(&self, name: &str) -> Option<&ResolvedInput> {
        self.inputs.iter().find(|i| i.name == name)
    }

    /// Shorthand for the value of a named input
    pub fn input_value(&self, name: &str) -> Option<&str> {
        self.input(name).and_then(|i| i.value.as_deref())
    }

    pub fn outputs(&self) -> &[ResolvedOutput] {
        &self.outputs
    }

    pub fn reserve_memory(&self) -> Option<u64> {
        self.reserve_memory
    }

    pub fn limit_memory(&self) -> Option<u64> {
        self.limit_memory
    }

    pub fn limit_cpu(&self) -> Option<f64> {
        self.limit_cpu
    }

    /// Add (or overwrite) environment variables
    pub fn add_environment_variables<I, K, V>(&mut self, variables: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in variables {
            self.environment.insert(key.into(), value.into());
        }
    }

    /// Point a mount at a host directory and record how the engine host sees it.
    /// Returns false when no mount has that name.
    pub fn rewrite_mount_host_path(
        &mut self,
        mount_name: &str,
        host_path: impl Into<String>,
        engine_host_path: impl Into<String>,
    ) -> bool {
        match self.mounts.iter_mut().find(|m| m.name == mount_name) {
            Some(mount) => {
                mount.host_path = Some(host_path.into());
                mount.engine_host_path = Some(engine_host_path.into());
                true
            }
            None => false,
        }
    }
}
