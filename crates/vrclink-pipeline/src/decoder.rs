//! Pipeline frame envelope.
//!
//! Each text frame is `{"type": "...", "content": "..."}` where `content` is
//! itself a JSON document serialized to a string.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::PipelineError;

/// A decoded frame: the event tag and its parsed payload.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEvent {
    pub event_type: String,
    pub payload: Value,
}

#[derive(Debug, Deserialize, Serialize)]
struct Envelope {
    #[serde(rename = "type")]
    event_type: String,
    content: String,
}

/// Decode a raw text frame.
pub fn decode(raw: &str) -> Result<DecodedEvent, PipelineError> {
    let envelope: Envelope = serde_json::from_str(raw)
        .map_err(|e| PipelineError::MalformedEvent(format!("bad envelope: {e}")))?;

    let payload = serde_json::from_str(&envelope.content).map_err(|e| {
        PipelineError::MalformedEvent(format!(
            "bad content for {}: {e}",
            envelope.event_type
        ))
    })?;

    Ok(DecodedEvent {
        event_type: envelope.event_type,
        payload,
    })
}

/// Encode an event the way the server frames it.
pub fn encode(event_type: &str, payload: &Value) -> String {
    let envelope = Envelope {
        event_type: event_type.to_string(),
        content: payload.to_string(),
    };
    // A struct of two strings always serializes.
    serde_json::to_string(&envelope).unwrap_or_default()
}
