//! Boundary where broadcast requests enter, from HTTP callers or the bus.

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::instrument;

use crate::hub::dispatcher::{DispatchError, DispatchReport, Dispatcher};
use crate::hub::{BROADCAST_EVENT, BroadcastMessage, TargetSelector};

#[derive(Deserialize, Clone, Debug, Default)]
#[must_use]
pub struct BroadcastRequest {
    pub payload: Option<Value>,
    #[serde(default)]
    pub target: TargetSelector,
    /// Defaults to [`BROADCAST_EVENT`].
    pub event: Option<String>,
}

impl BroadcastRequest {
    pub fn to_all(payload: Value) -> Self {
        Self {
            payload: Some(payload),
            target: TargetSelector::All,
            event: None,
        }
    }

    pub fn with_target(mut self, target: TargetSelector) -> Self {
        self.target = target;
        self
    }
}

#[derive(thiserror::Error, Debug)]
pub enum IngressError {
    #[error("Broadcast request carries no payload")]
    MissingPayload,

    #[error("Broadcast payload is not valid JSON: {0}")]
    MalformedPayload(String),

    #[error("Broadcast names both a group and a connection")]
    ConflictingTargets,

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Validates requests and hands them to the dispatcher one at a time.
///
/// Submissions are serialized so every client observes broadcasts in the
/// same relative order; delivery within one dispatch still runs in parallel.
#[derive(Debug)]
#[must_use]
pub struct Ingress {
    dispatcher: Dispatcher,
    submission: Mutex<()>,
}

impl Ingress {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            submission: Mutex::new(()),
        }
    }

    /// Completes once delivery has been attempted on every resolved target.
    #[instrument(skip_all, fields(target = ?request.target), err(Debug))]
    pub async fn accept(&self, request: BroadcastRequest) -> Result<DispatchReport, IngressError> {
        let payload = match request.payload {
            None | Some(Value::Null) => return Err(IngressError::MissingPayload),
            Some(payload) => payload,
        };
        let event = request.event.unwrap_or_else(|| BROADCAST_EVENT.to_owned());
        let message = BroadcastMessage::new(event, payload);

        let _submission = self.submission.lock().await;
        let report = self.dispatcher.dispatch(&message, &request.target).await?;

        tracing::info!(
            attempted = report.attempted,
            failed = report.failed,
            "Broadcast accepted"
        );
        Ok(report)
    }
}
