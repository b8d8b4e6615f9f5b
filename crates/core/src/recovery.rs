//! Orphan recovery
//!
//! Runs once at startup, before any new engine events are processed. A
//! container still `Finalizing` was interrupted by a previous process: the
//! first time it is found it is marked `Waiting` so the watcher finalizes it
//! again; if it was already recovered once it is marked `Failed`.

use crate::container::{ContainerHistory, ContainerStatus};
use crate::store::ContainerStore;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Message recorded on containers sent back for another finalization
pub const RETRY_MESSAGE: &str = "Finalization was interrupted; will retry.";

/// Message recorded on containers that were interrupted twice
pub const GAVE_UP_MESSAGE: &str = "Finalization was interrupted after a previous recovery.";

/// What recovery did
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryReport {
    /// Marked `Waiting`
    pub retried: Vec<i64>,
    /// Marked `Failed`
    pub failed: Vec<i64>,
    /// Could not be updated; see the log
    pub errors: Vec<i64>,
}

impl RecoveryReport {
    pub fn is_empty(&self) -> bool {
        self.retried.is_empty() && self.failed.is_empty() && self.errors.is_empty()
    }
}

pub struct OrphanRecovery {
    store: Arc<ContainerStore>,
}

impl OrphanRecovery {
    pub fn new(store: Arc<ContainerStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self))]
    pub async fn run(&self) -> RecoveryReport {
        let mut report = RecoveryReport::default();
        let orphans = self.store.list_by_status(ContainerStatus::Finalizing).await;
        if orphans.is_empty() {
            return report;
        }
        info!(count = orphans.len(), "Recovering interrupted finalizations");

        for container in orphans {
            let id = container.database_id;
            let (status, message) = if container.was_recovered() {
                (ContainerStatus::Failed, GAVE_UP_MESSAGE)
            } else {
                (ContainerStatus::Waiting, RETRY_MESSAGE)
            };
            let entry = ContainerHistory::from_system(status.as_str(), Some(message));
            match self.store.append_history(id, entry).await {
                Ok(_) => {
                    info!(database_id = id, status = %status, "Recovered container");
                    match status {
                        ContainerStatus::Waiting => report.retried.push(id),
                        _ => report.failed.push(id),
                    }
                }
                Err(e) => {
                    warn!(database_id = id, "Recovery failed: {}", e);
                    report.errors.push(id);
                }
            }
        }
        report
    }
}
