//! In-process topic bus standing in for an external broker.
//!
//! Producers only see [`MessagePublisher`]; the consumer side forwards
//! every message on one topic into the [`Ingress`].

use std::num::NonZeroUsize;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::instrument;

use crate::ingress::{BroadcastRequest, Ingress};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[must_use]
pub struct BusMessage {
    pub topic: String,
    pub payload: Value,
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    #[error("No consumer is attached to the bus")]
    NoSubscribers,
}

pub trait MessagePublisher: Send + Sync {
    fn publish(&self, topic: &str, payload: Value) -> Result<(), BusError>;
}

#[derive(Debug, Clone)]
#[must_use]
pub struct InProcessBus {
    tx: broadcast::Sender<BusMessage>,
}

impl InProcessBus {
    pub fn new(capacity: NonZeroUsize) -> Self {
        let (tx, _) = broadcast::channel(capacity.get());
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.tx.subscribe()
    }
}

impl MessagePublisher for InProcessBus {
    fn publish(&self, topic: &str, payload: Value) -> Result<(), BusError> {
        let message = BusMessage {
            topic: topic.to_owned(),
            payload,
        };
        self.tx
            .send(message)
            .map(|recv_count| tracing::trace!(topic, recv_count, "Published to bus"))
            .map_err(|_| BusError::NoSubscribers)
    }
}

/// Subscribes immediately, then forwards each message on `topic` to the ingress
/// as a broadcast to all connections. Ends when the bus closes.
pub fn spawn_consumer(bus: &InProcessBus, topic: String, ingress: Arc<Ingress>) -> JoinHandle<()> {
    let rx = bus.subscribe();
    tokio::spawn(consume(rx, topic, ingress))
}

#[instrument(name = "bus_consumer", skip(rx, ingress))]
async fn consume(mut rx: broadcast::Receiver<BusMessage>, topic: String, ingress: Arc<Ingress>) {
    loop {
        match rx.recv().await {
            Ok(message) if message.topic == topic => {
                let request = BroadcastRequest::to_all(message.payload);
                let _ = ingress
                    .accept(request)
                    .await
                    .inspect(|report| tracing::debug!(?report, "Forwarded bus message"))
                    .inspect_err(|error| tracing::error!(?error, "Failed to forward bus message"));
            }
            Ok(message) => tracing::trace!(topic = %message.topic, "Ignoring message for other topic"),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Bus consumer lagged, messages were dropped");
            }
            Err(RecvError::Closed) => {
                tracing::info!("Bus closed, stopping consumer");
                break;
            }
        }
    }
}
