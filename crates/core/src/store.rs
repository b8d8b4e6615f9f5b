//! Container store
//!
//! An arena of container records keyed by database id. Each record sits
//! behind its own async mutex, so writers to one container are serialized
//! while different containers proceed independently. Every mutation is
//! persisted as `<dir>/<id>.json` before it becomes visible in memory, so a
//! failed write changes nothing.

use crate::container::{Container, ContainerHistory, ContainerStatus};
use crate::errors::{Result, StoreError};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

type Record = Arc<Mutex<Container>>;

/// What an accepted history entry did to the container's status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub before: ContainerStatus,
    pub after: ContainerStatus,
}

impl StatusChange {
    pub fn changed(&self) -> bool {
        self.before != self.after
    }
}

pub struct ContainerStore {
    dir: Option<PathBuf>,
    records: RwLock<BTreeMap<i64, Record>>,
    /// Engine container/service id to database id
    external_ids: RwLock<HashMap<String, i64>>,
    next_id: AtomicI64,
}

impl ContainerStore {
    /// A store that keeps nothing on disk
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            records: RwLock::new(BTreeMap::new()),
            external_ids: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Open (or create) a store directory and load every record in it
    #[instrument(skip_all, fields(dir = %dir.as_ref().display()))]
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.display().to_string(),
            source,
        })?;

        let mut records = BTreeMap::new();
        let mut external_ids = HashMap::new();
        let entries = std::fs::read_dir(&dir).map_err(|source| StoreError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        for entry in entries {
            let path = entry
                .map_err(|source| StoreError::Io {
                    path: dir.display().to_string(),
                    source,
                })?
                .path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = std::fs::read_to_string(&path).map_err(|source| StoreError::Io {
                path: path.display().to_string(),
                source,
            })?;
            let container: Container = match serde_json::from_str(&content) {
                Ok(container) => container,
                Err(e) => {
                    warn!(path = %path.display(), "Skipping unreadable container record: {}", e);
                    continue;
                }
            };
            index_external_ids(&mut external_ids, &container);
            records.insert(container.database_id, Arc::new(Mutex::new(container)));
        }

        let next_id = records.keys().next_back().map(|id| id + 1).unwrap_or(1);
        debug!(count = records.len(), "Loaded container store");
        Ok(Self {
            dir: Some(dir),
            records: RwLock::new(records),
            external_ids: RwLock::new(external_ids),
            next_id: AtomicI64::new(next_id),
        })
    }

    fn record(&self, id: i64) -> Option<Record> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    fn all_records(&self) -> Vec<Record> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    fn persist(&self, container: &Container) -> Result<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        let path = dir.join(format!("{}.json", container.database_id));
        let temp_path = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(container).map_err(StoreError::from)?;
        std::fs::write(&temp_path, content).map_err(|source| StoreError::Io {
            path: temp_path.display().to_string(),
            source,
        })?;
        std::fs::rename(&temp_path, &path).map_err(|source| StoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(())
    }

    fn reindex(&self, container: &Container) {
        let mut ids = self
            .external_ids
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        index_external_ids(&mut ids, container);
    }

    /// Assign a database id, persist and index a new record
    pub fn insert(&self, mut container: Container) -> Result<i64> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        container.database_id = id;
        self.persist(&container)?;
        self.reindex(&container);
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(Mutex::new(container)));
        debug!(database_id = id, "Inserted container record");
        Ok(id)
    }

    /// A snapshot of one record
    pub async fn get(&self, id: i64) -> Option<Container> {
        let record = self.record(id)?;
        let guard = record.lock().await;
        Some(guard.clone())
    }

    /// Database id for an engine container or service id
    pub fn find_by_external_id(&self, external_id: &str) -> Option<i64> {
        self.external_ids
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(external_id)
            .copied()
    }

    /// Mutate one record under its lock and persist the result
    pub async fn update<F, R>(&self, id: i64, f: F) -> Result<R>
    where
        F: FnOnce(&mut Container) -> R,
    {
        let record = self.record(id).ok_or(StoreError::NotFound { id })?;
        let mut guard = record.lock().await;
        // Mutate a copy so a failed write leaves the record as it was on disk
        let mut next = guard.clone();
        let result = f(&mut next);
        self.persist(&next)?;
        self.reindex(&next);
        *guard = next;
        Ok(result)
    }

    /// Append a history entry. `Ok(None)` when it duplicates an existing entry.
    pub async fn append_history(
        &self,
        id: i64,
        entry: ContainerHistory,
    ) -> Result<Option<StatusChange>> {
        let record = self.record(id).ok_or(StoreError::NotFound { id })?;
        let mut guard = record.lock().await;
        let before = guard.status;
        let mut next = guard.clone();
        if !next.append_history(entry) {
            return Ok(None);
        }
        // Not committed unless written, so a redelivered event is not a duplicate
        self.persist(&next)?;
        let after = next.status;
        *guard = next;
        Ok(Some(StatusChange { before, after }))
    }

    /// Snapshots of every record, by database id
    pub async fn list(&self) -> Vec<Container> {
        let mut containers = Vec::new();
        for record in self.all_records() {
            containers.push(record.lock().await.clone());
        }
        containers
    }

    pub async fn list_by_status(&self, status: ContainerStatus) -> Vec<Container> {
        self.list()
            .await
            .into_iter()
            .filter(|c| c.status == status)
            .collect()
    }

    /// Swarm services that have not reached a terminal status
    pub async fn non_finalized_services(&self) -> Vec<Container> {
        self.list()
            .await
            .into_iter()
            .filter(|c| c.swarm && c.service_id.is_some() && !c.is_finalized())
            .collect()
    }
}

fn index_external_ids(ids: &mut HashMap<String, i64>, container: &Container) {
    for external in [&container.container_id, &container.service_id]
        .into_iter()
        .flatten()
    {
        ids.insert(external.clone(), container.database_id);
    }
}
