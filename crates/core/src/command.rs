//! Command definitions
//!
//! A command is the declarative description of a launchable unit of work:
//! an image, a command-line template, typed inputs, mounts, environment and
//! port templates, and outputs. Definitions are read from JSON (parsed as
//! JSON5 so comments and trailing commas are accepted) with kebab-case keys:
//!
//! ```json
//! {
//!   "name": "dcm2niix",
//!   "image": "xnat/dcm2niix:latest",
//!   "command-line": "dcm2niix #FLAGS# -o /output /input",
//!   "mounts": [
//!     {"name": "in", "path": "/input", "source-input": "scan", "resource": "DICOM"},
//!     {"name": "out", "path": "/output", "writable": true}
//!   ],
//!   "inputs": [
//!     {"name": "session", "type": "session", "required": true},
//!     {"name": "scan", "type": "scan", "parent": "session", "matcher": "@.scan-type in ['T1']"}
//!   ]
//! }
//! ```

use crate::errors::{BerthError, CommandError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, instrument};

/// The type tag of a command input; selects how its value is derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    #[default]
    String,
    Boolean,
    Number,
    File,
    Resource,
    Project,
    Subject,
    Session,
    Scan,
    Assessor,
    Config,
}

impl InputType {
    /// All input types, in declaration order
    pub const ALL: [InputType; 11] = [
        InputType::String,
        InputType::Boolean,
        InputType::Number,
        InputType::File,
        InputType::Resource,
        InputType::Project,
        InputType::Subject,
        InputType::Session,
        InputType::Scan,
        InputType::Assessor,
        InputType::Config,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InputType::String => "string",
            InputType::Boolean => "boolean",
            InputType::Number => "number",
            InputType::File => "file",
            InputType::Resource => "resource",
            InputType::Project => "project",
            InputType::Subject => "subject",
            InputType::Session => "session",
            InputType::Scan => "scan",
            InputType::Assessor => "assessor",
            InputType::Config => "config",
        }
    }

    /// Site data objects (project, subject, session, scan, assessor)
    pub fn is_site_object(&self) -> bool {
        matches!(
            self,
            InputType::Project
                | InputType::Subject
                | InputType::Session
                | InputType::Scan
                | InputType::Assessor
        )
    }
}

impl fmt::Display for InputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InputType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lowered = s.to_ascii_lowercase();
        InputType::ALL
            .into_iter()
            .find(|t| t.as_str() == lowered)
            .ok_or_else(|| format!("unknown input type '{}'", s))
    }
}

/// A named, typed input of a command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case", default)]
pub struct CommandInput {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub input_type: InputType,
    pub required: bool,
    /// Another input that must resolve before this one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Path expression evaluated against the parent's resolved value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_property: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    /// Filter expression candidates must satisfy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matcher: Option<String>,
    /// Placeholder token substituted with the resolved value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replacement_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_line_flag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_line_separator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub true_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub false_value: Option<String>,
    /// Mask the resolved value in logs
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub sensitive: bool,
}

impl CommandInput {
    /// Create an input with a name and type and everything else unset
    pub fn new(name: impl Into<String>, input_type: InputType) -> Self {
        Self {
            name: name.into(),
            input_type,
            ..Default::default()
        }
    }
}

/// A host-directory-to-container-path binding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case", default)]
pub struct CommandMount {
    pub name: String,
    /// Path inside the container
    pub path: String,
    pub writable: bool,
    /// Input whose resolved value provides the host directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_input: Option<String>,
    /// Label of the resource to mount when the source has several
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
}

/// A file or directory the command produces inside one of its mounts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case", default)]
pub struct CommandOutput {
    pub name: String,
    pub mount: String,
    /// Path relative to the mount; may contain placeholders
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub glob: Option<String>,
    pub required: bool,
}

/// A complete command definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case", default)]
pub struct Command {
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    pub command_line: String,
    pub environment_variables: IndexMap<String, String>,
    /// Container port to host port template
    pub ports: IndexMap<String, String>,
    pub mounts: Vec<CommandMount>,
    pub inputs: Vec<CommandInput>,
    pub outputs: Vec<CommandOutput>,
    /// Memory reservation in MiB
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reserve_memory: Option<u64>,
    /// Memory limit in MiB
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_memory: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_cpu: Option<f64>,
}

impl Command {
    pub fn input(&self, name: &str) -> Option<&CommandInput> {
        self.inputs.iter().find(|i| i.name == name)
    }

    pub fn mount(&self, name: &str) -> Option<&CommandMount> {
        self.mounts.iter().find(|m| m.name == name)
    }

    /// The definition as JSON, the document `^...^` template substrings are evaluated against
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Structural checks that do not need input values.
    ///
    /// Parent references and cycles are checked again at resolution time,
    /// where they are reported as resolution errors naming the inputs.
    pub fn validate(&self) -> std::result::Result<(), CommandError> {
        let mut errors = Vec::new();

        if self.image.trim().is_empty() {
            errors.push("image must not be empty".to_string());
        }

        let mut input_names = HashSet::new();
        for input in &self.inputs {
            if input.name.trim().is_empty() {
                errors.push("inputs must have a name".to_string());
            } else if !input_names.insert(input.name.as_str()) {
                errors.push(format!("duplicate input name \"{}\"", input.name));
            }
            if input.parent.as_deref() == Some(input.name.as_str()) {
                errors.push(format!("input \"{}\" cannot be its own parent", input.name));
            }
        }

        let mut mount_names = HashSet::new();
        for mount in &self.mounts {
            if !mount_names.insert(mount.name.as_str()) {
                errors.push(format!("duplicate mount name \"{}\"", mount.name));
            }
            if mount.path.trim().is_empty() {
                errors.push(format!("mount \"{}\" has no container path", mount.name));
            }
            if let Some(source) = &mount.source_input {
                if !input_names.contains(source.as_str()) {
                    errors.push(format!(
                        "mount \"{}\" names source input \"{}\", which is not declared",
                        mount.name, source
                    ));
                }
            }
        }

        let mut output_names = HashSet::new();
        for output in &self.outputs {
            if !output_names.insert(output.name.as_str()) {
                errors.push(format!("duplicate output name \"{}\"", output.name));
            }
            if !mount_names.contains(output.mount.as_str()) {
                errors.push(format!(
                    "output \"{}\" refers to mount \"{}\", which is not declared",
                    output.name, output.mount
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(CommandError::Validation { errors })
        }
    }
}

/// Loads command definitions from disk
pub struct CommandLoader;

impl CommandLoader {
    /// Load and validate a command definition file
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn load_from_path(path: &Path) -> Result<Command> {
        debug!("Loading command definition from {}", path.display());

        if !path.exists() {
            return Err(BerthError::Command(CommandError::NotFound {
                path: path.display().to_string(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            debug!("Failed to read command definition: {}", e);
            BerthError::Command(CommandError::Io(e))
        })?;

        let command = Self::parse_str(&content)?;
        debug!(
            command = %command.name,
            inputs = command.inputs.len(),
            mounts = command.mounts.len(),
            "Loaded command definition"
        );
        Ok(command)
    }

    /// Parse and validate a command definition from text
    pub fn parse_str(content: &str) -> Result<Command> {
        let raw_value: serde_json::Value = json5::from_str(content).map_err(|e| {
            BerthError::Command(CommandError::Parsing {
                message: format!("JSON parsing error: {}", e),
            })
        })?;

        if !raw_value.is_object() {
            return Err(BerthError::Command(CommandError::Parsing {
                message: "a command definition must be a JSON object".to_string(),
            }));
        }

        let command: Command = serde_json::from_value(raw_value).map_err(|e| {
            BerthError::Command(CommandError::Parsing {
                message: format!("Deserialization error: {}", e),
            })
        })?;

        command.validate()?;
        Ok(command)
    }
}
