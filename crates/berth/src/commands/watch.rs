//! Watch command implementation
//!
//! Recovers interrupted finalizations, re-finalizes what recovery sent back,
//! then polls the engine (and optionally streams its events) until Ctrl-C.

use super::Context;
use anyhow::Result;
use berth_core::events::{engine_channel, LifecycleBus, LifecycleEvent};
use berth_core::lifecycle::{LifecycleTracker, LogCaptureFinalizer};
use berth_core::listener::EventListener;
use berth_core::poller::EventPoller;
use berth_core::recovery::OrphanRecovery;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, instrument, warn};

#[instrument(skip(ctx))]
pub async fn execute(ctx: &Context, listen: bool, once: bool) -> Result<()> {
    let store = ctx.open_store()?;

    let report = OrphanRecovery::new(store.clone()).run().await;
    if !report.is_empty() {
        info!(
            retried = report.retried.len(),
            failed = report.failed.len(),
            errors = report.errors.len(),
            "Orphan recovery finished"
        );
    }

    let (cli_engine, _) = ctx.engine()?;
    let engine = Arc::new(cli_engine.clone());
    let bus = LifecycleBus::default();
    let tracker = Arc::new(LifecycleTracker::new(
        store.clone(),
        engine.clone(),
        Arc::new(LogCaptureFinalizer::new(
            engine.clone(),
            ctx.settings.log_dir.clone(),
        )),
        bus.clone(),
    ));
    for (id, result) in tracker.refinalize_waiting().await {
        if let Ok(Some(status)) = result {
            info!(database_id = id, status = %status, "Re-finalized container");
        }
    }

    let printer = tokio::spawn(print_changes(bus.subscribe()));
    let (sender, receiver) = engine_channel();
    let consumer = tokio::spawn(Arc::clone(&tracker).run(receiver));

    let mut poller = EventPoller::new(
        engine,
        store,
        ctx.servers.clone(),
        sender.clone(),
        ctx.settings.poll_interval(),
    );

    if once {
        poller.tick().await;
        drop(poller);
    } else {
        let listener = listen.then(|| {
            let listener = EventListener::new(cli_engine, sender.clone());
            tokio::spawn(async move {
                match listener.run().await {
                    Ok(count) => debug!(count, "Event stream ended"),
                    Err(e) => warn!("Event listener stopped: {}", e),
                }
            })
        });

        info!(interval = ?ctx.settings.poll_interval(), "Watching containers; press Ctrl-C to stop");
        poller
            .run(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                }
            })
            .await;

        if let Some(handle) = listener {
            handle.abort();
            let _ = handle.await;
        }
    }

    // Closing the channel lets the tracker drain and finish its finalizations
    drop(sender);
    if let Err(e) = consumer.await {
        warn!("Task join error: {}", e);
    }
    drop(tracker);
    drop(bus);
    if let Err(e) = printer.await {
        warn!("Task join error: {}", e);
    }
    Ok(())
}

async fn print_changes(mut events: tokio::sync::broadcast::Receiver<LifecycleEvent>) {
    loop {
        match events.recv().await {
            Ok(LifecycleEvent::StatusChanged {
                database_id,
                from,
                to,
                ..
            }) => println!("{}: {} -> {}", database_id, from, to),
            Ok(LifecycleEvent::ServiceTaskChanged {
                database_id,
                task_id,
                status,
                ..
            }) => println!("{}: task {} {}", database_id, task_id, status),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Missed lifecycle events"),
            Err(RecvError::Closed) => break,
        }
    }
}
