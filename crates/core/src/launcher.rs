//! Container launcher
//!
//! Takes a [`ResolvedCommand`], finishes it for the engine and submits it:
//!
//! 1. issue a token for the launching user and inject `BERTH_HOST`,
//!    `BERTH_USER` and `BERTH_PASS`
//! 2. give every mount without a host path a fresh build directory
//! 3. translate every host path into the engine host's view
//! 4. create the container (or swarm service) and persist its record
//! 5. start it
//!
//! Nothing is retried. A container that was created but failed to start is
//! kept, with a `Failed` entry explaining why.

use crate::config::PathTranslation;
use crate::container::{Container, ContainerHistory, ContainerStatus};
use crate::engine::ContainerEngine;
use crate::errors::{BerthError, Result, StoreError};
use crate::resolved::ResolvedCommand;
use crate::store::ContainerStore;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

pub const ENV_HOST: &str = "BERTH_HOST";
pub const ENV_USER: &str = "BERTH_USER";
pub const ENV_PASS: &str = "BERTH_PASS";

const MASK: &str = "********";

/// Issues the credentials a container uses to call back into the site
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// A short-lived token for `username`
    async fn issue_token(&self, username: &str) -> anyhow::Result<String>;

    /// Base URL of the site
    fn site_url(&self) -> &str;
}

/// Credentials from settings. Without a configured token a random one is
/// issued per launch.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    site_url: String,
    token: Option<String>,
}

impl StaticCredentials {
    pub fn new(site_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            site_url: site_url.into(),
            token,
        }
    }
}

#[async_trait]
impl CredentialSource for StaticCredentials {
    async fn issue_token(&self, _username: &str) -> anyhow::Result<String> {
        Ok(self
            .token
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string()))
    }

    fn site_url(&self) -> &str {
        &self.site_url
    }
}

/// Maps a site path to the same directory as seen by the engine host
pub trait PathTranslator: Send + Sync {
    fn translate(&self, path: &str) -> String;
}

/// Swaps one path prefix for another; paths outside the prefix are kept
#[derive(Debug, Clone, Default)]
pub struct PrefixTranslator {
    translation: Option<PathTranslation>,
}

impl PrefixTranslator {
    pub fn new(translation: Option<PathTranslation>) -> Self {
        Self { translation }
    }
}

impl PathTranslator for PrefixTranslator {
    fn translate(&self, path: &str) -> String {
        let Some(t) = &self.translation else {
            return path.to_string();
        };
        if t.site_prefix.is_empty() {
            return path.to_string();
        }
        match path.strip_prefix(t.site_prefix.as_str()) {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => {
                format!("{}{}", t.engine_prefix.trim_end_matches('/'), rest)
            }
            _ => path.to_string(),
        }
    }
}

pub struct ContainerLauncher {
    engine: Arc<dyn ContainerEngine>,
    store: Arc<ContainerStore>,
    credentials: Arc<dyn CredentialSource>,
    translator: Arc<dyn PathTranslator>,
    build_path: PathBuf,
    swarm: bool,
}

impl ContainerLauncher {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        store: Arc<ContainerStore>,
        credentials: Arc<dyn CredentialSource>,
        build_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            engine,
            store,
            credentials,
            translator: Arc::new(PrefixTranslator::default()),
            build_path: build_path.into(),
            swarm: false,
        }
    }

    pub fn with_translator(mut self, translator: Arc<dyn PathTranslator>) -> Self {
        self.translator = translator;
        self
    }

    /// Launch as swarm services instead of plain containers
    pub fn with_swarm(mut self, swarm: bool) -> Self {
        self.swarm = swarm;
        self
    }

    /// Inject credentials and assign host paths; the command is ready for
    /// the engine afterwards
    pub async fn prepare(&self, command: &mut ResolvedCommand, username: &str) -> Result<()> {
        let token = self
            .credentials
            .issue_token(username)
            .await
            .map_err(|e| BerthError::Launch {
                message: format!("Failed to issue a token for {}: {:#}", username, e),
            })?;
        command.add_environment_variables([
            (ENV_HOST, self.credentials.site_url().to_string()),
            (ENV_USER, username.to_string()),
            (ENV_PASS, token),
        ]);

        let mounts: Vec<(String, Option<String>)> = command
            .mounts()
            .iter()
            .map(|m| (m.name.clone(), m.host_path.clone()))
            .collect();
        for (name, host_path) in mounts {
            let host_path = match host_path {
                Some(path) => path,
                None => self.build_directory().await?,
            };
            let engine_path = self.translator.translate(&host_path);
            debug!(mount = %name, host = %host_path, engine = %engine_path, "Mount host path");
            command.rewrite_mount_host_path(&name, host_path, engine_path);
        }
        Ok(())
    }

    async fn build_directory(&self) -> Result<String> {
        let dir = self.build_path.join(Uuid::new_v4().to_string());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| StoreError::Io {
                path: dir.display().to_string(),
                source,
            })?;
        Ok(dir.display().to_string())
    }

    /// Launch a resolved command for `username`. Returns the persisted record.
    #[instrument(skip_all, fields(command = %command.command_name(), user = %username))]
    pub async fn launch(&self, mut command: ResolvedCommand, username: &str) -> Result<Container> {
        self.prepare(&mut command, username).await?;

        // An unreachable engine stores nothing
        self.engine.ping().await?;

        // The record exists before the engine object, so nothing is created untracked
        let mut container = Container::from_resolved(&command, username);
        container.swarm = self.swarm;
        if let Some(pass) = container.environment.get_mut(ENV_PASS) {
            *pass = MASK.to_string();
        }
        container.append_history(ContainerHistory::from_system(
            ContainerStatus::Created.as_str(),
            None,
        ));
        let database_id = self.store.insert(container)?;

        let created = if self.swarm {
            self.engine.create_service(&command).await
        } else {
            self.engine.create_container(&command).await
        };
        let external_id = match created {
            Ok(id) => id,
            Err(e) => {
                warn!(database_id, "Failed to create container: {}", e);
                self.fail(database_id, format!("Failed to create: {}", e))
                    .await?;
                return Err(e);
            }
        };
        let swarm = self.swarm;
        let id = external_id.clone();
        self.store
            .update(database_id, move |c| {
                if swarm {
                    c.service_id = Some(id);
                } else {
                    c.container_id = Some(id);
                }
            })
            .await?;
        info!(database_id, external_id = %external_id, swarm = self.swarm, "Created container");

        if !self.swarm {
            if let Err(e) = self.engine.start_container(&external_id).await {
                warn!(database_id, "Failed to start container: {}", e);
                self.fail(database_id, format!("Failed to start: {}", e))
                    .await?;
                return Err(e);
            }
            debug!(database_id, "Started container");
        }

        self.store
            .get(database_id)
            .await
            .ok_or_else(|| StoreError::NotFound { id: database_id }.into())
    }

    async fn fail(&self, database_id: i64, message: String) -> Result<()> {
        self.store
            .append_history(
                database_id,
                ContainerHistory::from_system(ContainerStatus::Failed.as_str(), Some(&message)),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::{MockCall, MockEngine, MockEngineConfig};
    use serde_json::json;
    use tempfile::TempDir;

    fn command() -> ResolvedCommand {
        serde_json::from_value(json!({
            "command-id": 4, "command-name": "recon", "image": "recon:1",
            "working-directory": null, "command-line": "recon /input /output",
            "environment": {"MODE": "fast"}, "ports": {},
            "mounts": [
                {"name": "in", "container-path": "/input", "writable": false,
                 "host-path": "/data/site/proj/s1", "source-input": "session"},
                {"name": "out", "container-path": "/output", "writable": true, "host-path": null}
            ],
            "inputs": [], "outputs": []
        }))
        .unwrap()
    }

    fn translator() -> Arc<dyn PathTranslator> {
        Arc::new(PrefixTranslator::new(Some(PathTranslation {
            site_prefix: "/data/site".into(),
            engine_prefix: "/mnt/site/".into(),
        })))
    }

    #[test]
    fn test_prefix_translation() {
        let t = translator();
        assert_eq!(t.translate("/data/site/a/b"), "/mnt/site/a/b");
        assert_eq!(t.translate("/data/site"), "/mnt/site");
        assert_eq!(t.translate("/data/sitex/a"), "/data/sitex/a");
        assert_eq!(PrefixTranslator::default().translate("/x"), "/x");
    }

    #[tokio::test]
    async fn test_launch_container() {
        let build = TempDir::new().unwrap();
        let engine = MockEngine::new();
        let store = Arc::new(ContainerStore::in_memory());
        let launcher = ContainerLauncher::new(
            Arc::new(engine.clone()),
            store.clone(),
            Arc::new(StaticCredentials::new("https://site", Some("tok".into()))),
            build.path(),
        )
        .with_translator(translator());

        let container = launcher.launch(command(), "alice").await.unwrap();
        assert_eq!(container.status, ContainerStatus::Created);
        assert_eq!(container.user_id, "alice");
        assert_eq!(container.environment["BERTH_HOST"], "https://site");
        assert_eq!(container.environment["BERTH_PASS"], MASK);

        let id = container.container_id.clone().unwrap();
        assert_eq!(store.find_by_external_id(&id), Some(container.database_id));
        assert!(engine.calls().contains(&MockCall::StartContainer(id.clone())));

        let submitted = engine.created(&id).unwrap();
        assert_eq!(submitted.environment()["BERTH_PASS"], "tok");
        assert_eq!(submitted.environment()["BERTH_USER"], "alice");
        let input = submitted.mount("in").unwrap();
        assert_eq!(input.bind_source(), Some("/mnt/site/proj/s1"));
        let output = submitted.mount("out").unwrap();
        let host = PathBuf::from(output.host_path.as_deref().unwrap());
        assert!(host.starts_with(build.path()));
        assert!(host.is_dir());
    }

    #[tokio::test]
    async fn test_start_failure_is_recorded() {
        let build = TempDir::new().unwrap();
        let engine = MockEngine::with_config(MockEngineConfig {
            fail_start: true,
            ..Default::default()
        });
        let store = Arc::new(ContainerStore::in_memory());
        let launcher = ContainerLauncher::new(
            Arc::new(engine),
            store.clone(),
            Arc::new(StaticCredentials::new("https://site", None)),
            build.path(),
        );

        assert!(launcher.launch(command(), "alice").await.is_err());
        let records = store.list().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, ContainerStatus::Failed);
    }

    #[tokio::test]
    async fn test_create_failure_is_recorded() {
        let build = TempDir::new().unwrap();
        let engine = MockEngine::with_config(MockEngineConfig {
            fail_create: true,
            ..Default::default()
        });
        let store = Arc::new(ContainerStore::in_memory());
        let launcher = ContainerLauncher::new(
            Arc::new(engine.clone()),
            store.clone(),
            Arc::new(StaticCredentials::new("https://site", None)),
            build.path(),
        );

        assert!(launcher.launch(command(), "alice").await.is_err());
        let records = store.list().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, ContainerStatus::Failed);
        assert!(records[0].container_id.is_none());
        assert!(records[0]
            .history()
            .last()
            .and_then(|h| h.message.as_deref())
            .is_some_and(|m| m.starts_with("Failed to create")));
        assert!(!engine
            .calls()
            .iter()
            .any(|c| matches!(c, MockCall::StartContainer(_))));
    }

    #[tokio::test]
    async fn test_launch_service() {
        let build = TempDir::new().unwrap();
        let engine = MockEngine::new();
        let launcher = ContainerLauncher::new(
            Arc::new(engine.clone()),
            Arc::new(ContainerStore::in_memory()),
            Arc::new(StaticCredentials::new("https://site", None)),
            build.path(),
        )
        .with_swarm(true);

        let container = launcher.launch(command(), "bob").await.unwrap();
        assert!(container.swarm);
        assert!(container.service_id.is_some());
        assert!(container.container_id.is_none());
        assert!(!engine
            .calls()
            .iter()
            .any(|c| matches!(c, MockCall::StartContainer(_))));
    }

    #[tokio::test]
    async fn test_unconfigured_engine_creates_nothing() {
        let build = TempDir::new().unwrap();
        let store = Arc::new(ContainerStore::in_memory());
        let launcher = ContainerLauncher::new(
            Arc::new(MockEngine::with_config(MockEngineConfig {
                not_configured: true,
                ..Default::default()
            })),
            store.clone(),
            Arc::new(StaticCredentials::new("https://site", None)),
            build.path(),
        );
        assert!(matches!(
            launcher.launch(command(), "alice").await,
            Err(BerthError::Engine(crate::errors::EngineError::NotConfigured))
        ));
        assert!(store.list().await.is_empty());
    }
}
