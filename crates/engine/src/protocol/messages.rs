use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::ProtocolError;
use crate::registry::EntityId;

pub const DEFAULT_TIMEOUT_MS: u64 = 20_000;

/// Server message after decoding. Tagged by which top-level key is present,
/// checked in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// New activity; carries the entity payload (the object under `activity`).
    Activity(Value),
    ActivityStarted { id: EntityId },
    /// New stage; carries the entity payload (the object under `stage`).
    Stage(Value),
    StageEntered { id: EntityId },
    RequirementsFulfilled(RequirementsFulfilled),
    Unknown(Value),
}

impl InboundMessage {
    pub const fn name(&self) -> &'static str {
        match self {
            InboundMessage::Activity(_) => "activity",
            InboundMessage::ActivityStarted { .. } => "activityStarted",
            InboundMessage::Stage(_) => "stage",
            InboundMessage::StageEntered { .. } => "stageEntered",
            InboundMessage::RequirementsFulfilled(_) => "requirementsFulfilled",
            InboundMessage::Unknown(_) => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RequirementsFulfilled {
    pub workflow: WorkflowRef,
    #[serde(default)]
    pub requirements: Vec<String>,
}

/// Workflow reference as the server sends it: either a bare id or an object.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum WorkflowRef {
    Id(String),
    Described {
        id: String,
        #[serde(default)]
        name: Option<String>,
    },
}

impl WorkflowRef {
    pub fn id(&self) -> &str {
        match self {
            WorkflowRef::Id(id) | WorkflowRef::Described { id, .. } => id,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            WorkflowRef::Id(_) => None,
            WorkflowRef::Described { name, .. } => name.as_deref(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct IdRef {
    id: WireId,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireId {
    Text(String),
    Number(serde_json::Number),
}

impl From<WireId> for EntityId {
    fn from(value: WireId) -> Self {
        match value {
            WireId::Text(text) => EntityId::new(text),
            WireId::Number(number) => EntityId::new(number.to_string()),
        }
    }
}

/// Parses one inbound text frame.
///
/// Text that is not JSON gets one more attempt after stripping padding
/// (whitespace, BOM, NUL). A JSON string whose contents are themselves JSON
/// is unwrapped once.
pub fn parse_inbound_text(text: &str) -> Result<Value, ProtocolError> {
    let value = match serde_json::from_str::<Value>(text) {
        Ok(value) => value,
        Err(first) => {
            let cleaned = text.trim_matches(|c: char| c.is_whitespace() || c == '\u{feff}' || c == '\0');
            serde_json::from_str::<Value>(cleaned).map_err(|_| ProtocolError::Json(first))?
        }
    };

    match value {
        Value::String(inner) => match serde_json::from_str::<Value>(&inner) {
            Ok(unwrapped) => Ok(unwrapped),
            Err(_) => Ok(Value::String(inner)),
        },
        other => Ok(other),
    }
}

/// Parses and classifies one frame. Returns `None` for undecodable text,
/// which is dropped.
pub fn decode_inbound(text: &str) -> Option<InboundMessage> {
    match parse_inbound_text(text) {
        Ok(value) => Some(classify(value)),
        Err(err) => {
            debug!(error = %err, bytes = text.len(), "inbound_dropped_undecodable");
            None
        }
    }
}

/// Maps a parsed document onto [`InboundMessage`] by key presence.
pub fn classify(value: Value) -> InboundMessage {
    let Value::Object(mut fields) = value else {
        return InboundMessage::Unknown(value);
    };

    if let Some(payload) = fields.remove("activity") {
        return entity_payload("activity", payload, InboundMessage::Activity);
    }
    if let Some(body) = fields.get("activityStarted") {
        return match decode_id(body) {
            Ok(id) => InboundMessage::ActivityStarted { id },
            Err(err) => unknown_after(err, "activityStarted", fields),
        };
    }
    if let Some(payload) = fields.remove("stage") {
        return entity_payload("stage", payload, InboundMessage::Stage);
    }
    if let Some(body) = fields.get("stageEntered") {
        return match decode_id(body) {
            Ok(id) => InboundMessage::StageEntered { id },
            Err(err) => unknown_after(err, "stageEntered", fields),
        };
    }
    if let Some(body) = fields.get("requirementsFulfilled") {
        return match decode_typed::<RequirementsFulfilled>(body) {
            Ok(requirements) => InboundMessage::RequirementsFulfilled(requirements),
            Err(err) => unknown_after(err, "requirementsFulfilled", fields),
        };
    }

    InboundMessage::Unknown(Value::Object(fields))
}

fn entity_payload(key: &str, payload: Value, wrap: fn(Value) -> InboundMessage) -> InboundMessage {
    if payload.is_object() {
        return wrap(payload);
    }
    warn!(key, "inbound_payload_not_object");
    let mut fields = serde_json::Map::new();
    fields.insert(key.to_string(), payload);
    InboundMessage::Unknown(Value::Object(fields))
}

fn unknown_after(
    err: ProtocolError,
    key: &str,
    fields: serde_json::Map<String, Value>,
) -> InboundMessage {
    warn!(key, error = %err, "inbound_payload_rejected");
    InboundMessage::Unknown(Value::Object(fields))
}

fn decode_id(body: &Value) -> Result<EntityId, ProtocolError> {
    let id_ref = decode_typed::<IdRef>(body)?;
    let id = EntityId::from(id_ref.id);
    if id.as_str().is_empty() {
        return Err(ProtocolError::EmptyId);
    }
    Ok(id)
}

fn decode_typed<T>(body: &Value) -> Result<T, ProtocolError>
where
    T: for<'de> Deserialize<'de>,
{
    serde_path_to_error::deserialize(body).map_err(|err| ProtocolError::Payload {
        path: err.path().to_string(),
        source: err.into_inner(),
    })
}

/// Sent once when the connection opens.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub timeout: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub included: Option<bool>,
    pub workflow_names: Option<String>,
}

impl Handshake {
    pub fn new(
        timeout_seconds: Option<f64>,
        included: Option<bool>,
        workflow_names: Option<String>,
    ) -> Self {
        Self {
            timeout: resolve_timeout_ms(timeout_seconds),
            included,
            workflow_names,
        }
    }
}

/// Seconds to milliseconds; zero, negative, NaN or missing fall back to
/// [`DEFAULT_TIMEOUT_MS`].
pub fn resolve_timeout_ms(timeout_seconds: Option<f64>) -> u64 {
    match timeout_seconds {
        Some(seconds) if seconds.is_finite() && seconds > 0.0 => {
            let millis = (seconds * 1000.0).round();
            if millis >= 1.0 {
                millis.min(u64::MAX as f64) as u64
            } else {
                DEFAULT_TIMEOUT_MS
            }
        }
        _ => DEFAULT_TIMEOUT_MS,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    /// The player consumed this entity.
    Consumed { id: EntityId },
}

impl OutboundMessage {
    pub fn consumed(id: EntityId) -> Self {
        OutboundMessage::Consumed { id }
    }

    pub fn id(&self) -> &EntityId {
        match self {
            OutboundMessage::Consumed { id } => id,
        }
    }

    pub fn to_text(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Json)
    }
}
