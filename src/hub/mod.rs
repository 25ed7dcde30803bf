//! Real-time fan-out to connected WebSocket clients.
//!
//! [`registry::ConnectionRegistry`] owns every live connection and its group
//! memberships, [`dispatcher::Dispatcher`] pushes one [`BroadcastMessage`] to
//! whichever connections a [`TargetSelector`] resolves to.

use std::fmt;

use axum::extract::ws::Utf8Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub mod dispatcher;
pub mod protocol;
pub mod registry;

/// Event name used for payloads submitted through the ingress.
pub const BROADCAST_EVENT: &str = "broadcast";

/// Event sent to a client right after it is registered.
pub const CONNECTED_EVENT: &str = "connected";

/// Serialized outbound WebSocket text frame, shared between all recipients.
pub type Frame = Utf8Bytes;

/// Identifier of one live connection. Never reused within a registry.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for ConnectionId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum TargetSelector {
    #[default]
    All,
    Group(String),
    Single(ConnectionId),
}

/// A named event with an arbitrary JSON payload.
///
/// The `id` travels with the frame so that clients can drop duplicates.
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
#[must_use]
pub struct BroadcastMessage {
    id: Uuid,
    event: String,
    payload: Value,
    sent_at: DateTime<Utc>,
}

impl BroadcastMessage {
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            event: event.into(),
            payload,
            sent_at: Utc::now(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn to_frame(&self) -> Result<Frame, serde_json::Error> {
        serde_json::to_string(self).map(Frame::from)
    }
}
