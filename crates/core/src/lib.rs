//! Core library for berth
//!
//! This crate contains the command model, input resolution, template
//! substitution, the container engine boundary, container lifecycle
//! tracking, logging, configuration, and error handling.

pub mod command;
pub mod config;
pub mod container;
pub mod engine;
pub mod errors;
pub mod events;
pub mod launcher;
pub mod lifecycle;
pub mod listener;
pub mod logging;
pub mod mount;
pub mod path_expr;
pub mod poller;
pub mod recovery;
pub mod resolved;
pub mod resolver;
pub mod site;
pub mod store;
pub mod template;

// Re-export IndexMap for use by dependent crates (preserves insertion order for ordered maps)
pub use indexmap::IndexMap;

/// Get the version of the core library
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
