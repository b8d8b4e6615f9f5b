//! Container record commands: list, show and kill

use super::Context;
use crate::cli::OutputFormat;
use anyhow::Result;
use berth_core::container::{Container, ContainerStatus};
use berth_core::errors::StoreError;
use berth_core::events::LifecycleBus;
use berth_core::lifecycle::{LifecycleTracker, LogCaptureFinalizer};
use std::sync::Arc;
use tracing::instrument;

pub async fn list(
    ctx: &Context,
    status: Option<ContainerStatus>,
    output: OutputFormat,
) -> Result<()> {
    let store = ctx.open_store()?;
    let containers = match status {
        Some(status) => store.list_by_status(status).await,
        None => store.list().await,
    };

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&containers)?),
        OutputFormat::Text => {
            for container in &containers {
                println!("{}", summary_line(container));
            }
        }
    }
    Ok(())
}

fn summary_line(container: &Container) -> String {
    format!(
        "{}\t{}\t{}\t{}\t{}",
        container.database_id,
        container.status,
        container.docker_image,
        container.external_id().unwrap_or("-"),
        container.status_time.to_rfc3339()
    )
}

pub async fn show(ctx: &Context, id: i64, output: OutputFormat) -> Result<()> {
    let store = ctx.open_store()?;
    let container = store.get(id).await.ok_or(StoreError::NotFound { id })?;

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&container)?),
        OutputFormat::Text => {
            println!("{}", summary_line(&container));
            for entry in container.history() {
                println!(
                    "  {}\t{}\t{}\t{}",
                    entry.time_recorded.to_rfc3339(),
                    entry.entity_type,
                    entry.status,
                    entry.message.as_deref().unwrap_or("")
                );
            }
        }
    }
    Ok(())
}

#[instrument(skip(ctx))]
pub async fn kill(ctx: &Context, id: i64, user: Option<String>) -> Result<()> {
    let store = ctx.open_store()?;
    let (engine, _) = ctx.engine()?;
    let engine = Arc::new(engine);
    let tracker = LifecycleTracker::new(
        store,
        engine.clone(),
        Arc::new(LogCaptureFinalizer::new(engine, ctx.settings.log_dir.clone())),
        LifecycleBus::default(),
    );

    let user = user.unwrap_or_else(|| ctx.settings.user.clone());
    let status = tracker.kill(id, &user).await?;
    if status.is_terminal() {
        println!("{}: {}", id, status);
    } else {
        println!("{}: kill requested ({})", id, status);
    }
    Ok(())
}
