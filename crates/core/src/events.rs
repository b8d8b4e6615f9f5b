//! Lifecycle event bus
//!
//! Two channel kinds carry events through the system:
//!
//! - [`EngineEvent`]s flow from the poller and listener into the lifecycle
//!   tracker over one `mpsc` channel, so the tracker sees them in order.
//! - [`LifecycleEvent`]s fan out from the tracker to any number of
//!   subscribers over a `broadcast` channel ([`LifecycleBus`]).

use crate::container::{ContainerEvent, ContainerStatus, ServiceTask};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};

/// Something the engine reported about a container or service
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Container(ContainerEvent),
    ServiceTask {
        database_id: i64,
        task: ServiceTask,
    },
    /// A tracked service no longer exists on the swarm
    ServiceMissing { database_id: i64 },
}

pub type EngineEventSender = mpsc::Sender<EngineEvent>;
pub type EngineEventReceiver = mpsc::Receiver<EngineEvent>;

/// Buffer size of the engine event channel
pub const ENGINE_CHANNEL_CAPACITY: usize = 256;

pub fn engine_channel() -> (EngineEventSender, EngineEventReceiver) {
    mpsc::channel(ENGINE_CHANNEL_CAPACITY)
}

/// A change the lifecycle tracker made
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum LifecycleEvent {
    #[serde(rename_all = "camelCase")]
    StatusChanged {
        database_id: i64,
        from: ContainerStatus,
        to: ContainerStatus,
        at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    ServiceTaskChanged {
        database_id: i64,
        task_id: String,
        status: String,
        at: DateTime<Utc>,
    },
}

impl LifecycleEvent {
    pub fn database_id(&self) -> i64 {
        match self {
            LifecycleEvent::StatusChanged { database_id, .. }
            | LifecycleEvent::ServiceTaskChanged { database_id, .. } => *database_id,
        }
    }
}

const DEFAULT_CAPACITY: usize = 1024;

/// Fan-out bus for [`LifecycleEvent`]s.
///
/// Slow receivers that fall more than the capacity behind observe
/// `RecvError::Lagged` and lose the oldest events.
#[derive(Debug, Clone)]
pub struct LifecycleBus {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl LifecycleBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to current subscribers; dropped when there are none
    pub fn publish(&self, event: LifecycleEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }
}

impl Default for LifecycleBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_subscriber_sees_every_event() {
        let bus = LifecycleBus::default();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        let event = LifecycleEvent::StatusChanged {
            database_id: 3,
            from: ContainerStatus::Running,
            to: ContainerStatus::Finalizing,
            at: Utc::now(),
        };
        bus.publish(event.clone());

        assert_eq!(first.recv().await.unwrap(), event);
        assert_eq!(second.recv().await.unwrap().database_id(), 3);
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        LifecycleBus::new(4).publish(LifecycleEvent::ServiceTaskChanged {
            database_id: 1,
            task_id: "t".to_string(),
            status: "running".to_string(),
            at: Utc::now(),
        });
    }

    #[test]
    fn test_serialized_shape() {
        let event = LifecycleEvent::StatusChanged {
            database_id: 9,
            from: ContainerStatus::Finalizing,
            to: ContainerStatus::Complete,
            at: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "statusChanged");
        assert_eq!(json["databaseId"], 9);
        assert_eq!(json["to"], "Complete");
    }
}
