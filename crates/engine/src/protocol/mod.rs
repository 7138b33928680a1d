//! Wire protocol with the workflow server: one JSON document per text frame.

mod connection;
mod messages;

pub use connection::{
    Connection, ConnectionState, ConnectionStats, LoopbackHandle, LoopbackTransport, Outbox,
    Transport, TransportError, TransportEvent,
};
pub use messages::{
    classify, decode_inbound, parse_inbound_text, resolve_timeout_ms, Handshake, InboundMessage,
    OutboundMessage, RequirementsFulfilled, WorkflowRef, DEFAULT_TIMEOUT_MS,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid json: {0}")]
    Json(#[source] serde_json::Error),
    #[error("invalid payload at {path}: {source}")]
    Payload {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("entity id is empty")]
    EmptyId,
}
