//! Diagnostic side-channel wire contract
//!
//! The managed server emits discrete, independently-decodable units as
//! newline-delimited JSON. The encoding is an opaque, versionless contract
//! owned by the server's own protocol: unknown `type` values decode to
//! [`TracePayload::Other`] and are ignored, never rejected, and unknown
//! fields are skipped.

use serde::{Deserialize, Serialize};

use crate::errors::SharedError;

/// One decoded diagnostic unit.
///
/// `mutex` carries the fencing token of the process instance that emitted
/// the unit; the router discards units whose token is not current.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TraceMessage {
    pub mutex: String,
    pub channel: String,
    #[serde(flatten)]
    pub payload: TracePayload,
}

impl TraceMessage {
    /// Decode a single newline-delimited JSON unit.
    pub fn decode(line: &str) -> Result<Self, SharedError> {
        serde_json::from_str(line).map_err(|e| SharedError::MalformedTraceUnit {
            message: e.to_string(),
        })
    }
}

/// Payload variants the supervisor acts on.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TracePayload {
    /// The server could not bind its main port.
    BindError { address: String },

    /// A worker thread reported itself hung, with an optional stack trace.
    WatchdogBark {
        thread: String,
        #[serde(default)]
        stack: Option<String>,
    },

    /// A server resource began or finished starting.
    ResourceEvent(ResourceEvent),

    /// Periodic liveness signal from the side channel.
    Heartbeat,

    /// Any unrecognized unit type. Ignored.
    #[serde(other)]
    Other,
}

/// Resource startup progress. The server starts resources sequentially,
/// so at most one is in flight at a time.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ResourceEvent {
    Starting { resource: String },
    Started { resource: String },
}
