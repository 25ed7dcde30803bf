use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tracing::instrument;

use super::registry::{ConnectionRegistry, ConnectionSender, RegistryError};
use super::{BroadcastMessage, Frame, TargetSelector};

#[derive(Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[must_use]
pub struct DispatchReport {
    pub attempted: usize,
    pub failed: usize,
}

#[cfg(test)]
impl DispatchReport {
    pub(crate) const fn delivered(&self) -> usize {
        self.attempted - self.failed
    }
}

/// Why a single connection could not take a frame. Never leaves the dispatcher.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFailure {
    #[error("Connection queue is closed")]
    Closed,

    #[error("Connection did not accept the frame within {0:?}")]
    TimedOut(Duration),
}

#[derive(thiserror::Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Failed to encode broadcast message")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
#[must_use]
pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
    send_timeout: Duration,
}

impl Dispatcher {
    pub const fn new(registry: Arc<ConnectionRegistry>, send_timeout: Duration) -> Self {
        Self {
            registry,
            send_timeout,
        }
    }

    #[cfg(test)]
    pub(crate) const fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Offers `message` to every connection `selector` resolves to, in parallel.
    ///
    /// Connections that fail to take the frame are unregistered once every
    /// target has been attempted. Only an unavailable registry fails the call.
    #[instrument(skip_all, fields(event = message.event(), message.id = %message.id(), ?selector), err(Debug))]
    pub async fn dispatch(
        &self,
        message: &BroadcastMessage,
        selector: &TargetSelector,
    ) -> Result<DispatchReport, DispatchError> {
        let frame = message.to_frame()?;
        let targets = self.registry.resolve_targets(selector).await?;

        let deliveries = targets.iter().map(|target| {
            let frame = frame.clone();
            async move { (target.id, self.deliver(&target.sender, frame).await) }
        });
        let outcomes = join_all(deliveries).await;

        let mut report = DispatchReport {
            attempted: outcomes.len(),
            failed: 0,
        };
        for (id, outcome) in outcomes {
            if let Err(failure) = outcome {
                tracing::warn!(%id, %failure, "Delivery failed, dropping connection");
                self.registry.unregister(id).await;
                report.failed += 1;
            }
        }

        tracing::debug!(?report, "Dispatch complete");
        Ok(report)
    }

    async fn deliver(&self, sender: &ConnectionSender, frame: Frame) -> Result<(), DeliveryFailure> {
        match tokio::time::timeout(self.send_timeout, sender.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_closed)) => Err(DeliveryFailure::Closed),
            Err(_elapsed) => Err(DeliveryFailure::TimedOut(self.send_timeout)),
        }
    }
}
