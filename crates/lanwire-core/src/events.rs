// SPDX-License-Identifier: AGPL-3.0
// Lanwire - Engine event bus
//
// Single producer, any number of subscribers. Each subscriber has its
// own cursor; a slow subscriber lags and drops the oldest events rather
// than blocking the producer. Terminal completed/failed outcomes are
// recorded in history before broadcast, so they survive a lagging
// subscriber.

use crate::types::{PendingTransfer, TransferProgress};
use serde::Serialize;
use tokio::sync::broadcast;

/// Events emitted by the engine, consumed by frontends and the
/// history recorder
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EngineEvent {
    /// A new transfer announcement awaits a user decision
    #[serde(rename_all = "camelCase")]
    TransferRequest { transfer: PendingTransfer },
    /// Progress update for an in-flight transfer
    #[serde(rename_all = "camelCase")]
    TransferProgress { progress: TransferProgress },
    /// Transfer reached `completed`
    #[serde(rename_all = "camelCase")]
    TransferComplete { transfer_id: String },
    /// Transfer reached `failed`
    #[serde(rename_all = "camelCase")]
    TransferFailed { transfer_id: String, error: String },
    /// A transient failure is being retried; status is unchanged
    #[serde(rename_all = "camelCase")]
    TransferRetry {
        transfer_id: String,
        attempt: u32,
        max_attempts: u32,
        error: String,
    },
    /// The receiver socket is listening
    #[serde(rename_all = "camelCase")]
    ServerStarted { port: u16 },
    /// The receiver socket closed
    ServerStopped,
    /// The listening port was rebound at runtime
    #[serde(rename_all = "camelCase")]
    PortChanged { old_port: u16, new_port: u16 },
}

/// Broadcast channel wrapper shared by every engine component
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    /// Emit an event; delivery failure (no subscribers) is not an error
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_reach_every_subscriber() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.emit(EngineEvent::ServerStarted { port: 53317 });

        for rx in [&mut a, &mut b] {
            match rx.recv().await.unwrap() {
                EngineEvent::ServerStarted { port } => assert_eq!(port, 53317),
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[test]
    fn emit_without_subscribers_is_a_noop() {
        let bus = EventBus::new();
        bus.emit(EngineEvent::ServerStopped);
    }

    #[test]
    fn event_json_is_tagged_camel_case() {
        let event = EngineEvent::TransferFailed {
            transfer_id: "t1".into(),
            error: "boom".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"transferFailed\""));
        assert!(json.contains("\"transferId\":\"t1\""));
    }
}
