use serde::{Deserialize, Serialize};

/// Frames a client may send over its hub connection.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Join { group: String },
    Leave { group: String },
}
