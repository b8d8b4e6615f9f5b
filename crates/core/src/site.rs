//! Site data objects
//!
//! Projects, subjects, sessions, scans and assessors are opaque JSON
//! documents to this crate. Inputs of those types either carry the document
//! inline or name it by identifier, in which case it is fetched through a
//! [`SiteLookup`].

use crate::command::InputType;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::debug;

/// Fetches a site object by type and identifier
pub trait SiteLookup: Send + Sync {
    /// `Ok(None)` when no object with that identifier exists
    fn lookup(&self, object_type: InputType, id: &str) -> Result<Option<Value>>;
}

/// Lookup for callers that always pass objects inline
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSiteLookup;

impl SiteLookup for NoSiteLookup {
    fn lookup(&self, _object_type: InputType, _id: &str) -> Result<Option<Value>> {
        Ok(None)
    }
}

/// Reads `<root>/<type>/<id>.json`
#[derive(Debug, Clone)]
pub struct DirectorySiteLookup {
    root: PathBuf,
}

impl DirectorySiteLookup {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl SiteLookup for DirectorySiteLookup {
    fn lookup(&self, object_type: InputType, id: &str) -> Result<Option<Value>> {
        if id.contains('/') || id.contains("..") {
            return Ok(None);
        }
        let path = self
            .root
            .join(object_type.as_str())
            .join(format!("{}.json", id));
        if !path.exists() {
            debug!(path = %path.display(), "No site object file");
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read site object {}", path.display()))?;
        let value = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse site object {}", path.display()))?;
        Ok(Some(value))
    }
}

/// In-memory lookup table
#[derive(Debug, Default, Clone)]
pub struct StaticSiteLookup {
    objects: HashMap<(InputType, String), Value>,
}

impl StaticSiteLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(mut self, object_type: InputType, id: &str, value: Value) -> Self {
        self.objects.insert((object_type, id.to_string()), value);
        self
    }
}

impl SiteLookup for StaticSiteLookup {
    fn lookup(&self, object_type: InputType, id: &str) -> Result<Option<Value>> {
        Ok(self.objects.get(&(object_type, id.to_string())).cloned())
    }
}

/// One entry of an object's `resources` list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ResourceDescriptor {
    pub label: Option<String>,
    pub directory: Option<String>,
}
