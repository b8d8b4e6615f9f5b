//! Push-style engine event listener
//!
//! Streams `docker events` from the configured server and forwards each
//! container event into the engine event channel. It runs alongside the
//! poller; events both of them deliver are deduplicated by the history.

use crate::container::ContainerEvent;
use crate::engine::CliEngine;
use crate::errors::{BerthError, EngineError, Result};
use crate::events::{EngineEvent, EngineEventSender};
use serde_json::Value;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

/// Parse one line of streamed event JSON; `None` for anything that is not
/// a container event
pub fn parse_event_line(line: &str) -> Option<ContainerEvent> {
    let value: Value = serde_json::from_str(line.trim()).ok()?;
    ContainerEvent::from_engine_json(&value)
}

pub struct EventListener {
    engine: CliEngine,
    sender: EngineEventSender,
}

impl EventListener {
    pub fn new(engine: CliEngine, sender: EngineEventSender) -> Self {
        Self { engine, sender }
    }

    /// Stream events until the engine closes the stream or the receiving
    /// side goes away. Returns the number of events forwarded.
    #[instrument(skip(self))]
    pub async fn run(self) -> Result<usize> {
        let mut args = self.engine.connection_args()?;
        args.extend(
            ["events", "--filter", "type=container", "--format", "{{json .}}"]
                .map(String::from),
        );

        let mut child = Command::new(self.engine.binary())
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::Unavailable {
                message: format!("Failed to run {}: {}", self.engine.binary(), e),
            })?;

        let stdout = child.stdout.take().ok_or_else(|| BerthError::Internal {
            message: "Failed to capture event stream".to_string(),
        })?;
        info!("Listening for engine events");

        let mut lines = BufReader::new(stdout).lines();
        let mut forwarded = 0;
        let mut receiver_gone = false;
        while let Ok(Some(line)) = lines.next_line().await {
            let Some(event) = parse_event_line(&line) else {
                debug!("Skipping event line: {}", line);
                continue;
            };
            if self.sender.send(EngineEvent::Container(event)).await.is_err() {
                debug!("Event channel closed; stopping listener");
                receiver_gone = true;
                break;
            }
            forwarded += 1;
        }

        if receiver_gone {
            if let Err(e) = child.start_kill() {
                debug!("Event stream already exited: {}", e);
            }
        }
        match child.wait().await {
            Ok(status) if !status.success() && !receiver_gone => {
                warn!("Event stream exited with {}", status);
                Err(EngineError::Unavailable {
                    message: format!("Event stream exited with {}", status),
                }
                .into())
            }
            Ok(_) => Ok(forwarded),
            Err(e) => Err(BerthError::Internal {
                message: format!("Failed to wait for event stream: {}", e),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_event_line() {
        let line = r#"{"status":"die","id":"abc","Type":"container","Action":"die","Actor":{"ID":"abc","Attributes":{"exitCode":"0"}},"time":10,"timeNano":10000000001}"#;
        let event = parse_event_line(line).unwrap();
        assert_eq!(event.status, "die");
        assert_eq!(event.exit_code().as_deref(), Some("0"));

        assert!(parse_event_line("not json").is_none());
        assert!(parse_event_line(r#"{"Type":"volume","Action":"mount","Actor":{"ID":"v"}}"#).is_none());
    }

    #[tokio::test]
    async fn test_listener_requires_server() {
        let (tx, _rx) = crate::events::engine_channel();
        let result = EventListener::new(CliEngine::new(None), tx).run().await;
        assert!(matches!(
            result,
            Err(BerthError::Engine(EngineError::NotConfigured))
        ));
    }
}
