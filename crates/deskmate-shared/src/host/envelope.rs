//! Wire envelope shared with the host window.
//!
//! The host posts either a JSON string or a structured object. A valid
//! envelope carries exactly one of the frame, request, response or event
//! shapes; anything else is somebody else's traffic.

use serde_json::{json, Map, Value};
use thiserror::Error;

pub const FRAME_FIELD: &str = "MessageFrameID";
pub const REQUEST_FIELD: &str = "hosted_request";
pub const RESPONSE_FIELD: &str = "response";
pub const EVENT_FIELD: &str = "event";
pub const DATA_FIELD: &str = "data";
pub const EVENT_ID_FIELD: &str = "_id";
pub const OUTBOUND_FRAME_FIELD: &str = "frameID";

/// Inbound message after shape validation
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// Host assigns the frame-correlation token
    Frame { frame_id: String },
    /// Host asks the embedded app for something
    Request { name: String },
    /// Reply to one of our requests
    Response { name: String, data: Value },
    /// Host-initiated notification that must be acknowledged
    Event { name: String, data: Value, id: Value },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    #[error("payload is not JSON")]
    NotJson,

    #[error("payload is not an object")]
    NotObject,

    #[error("payload carries no envelope field")]
    Empty,

    #[error("payload carries more than one envelope field")]
    Ambiguous,

    #[error("field {0} has the wrong type")]
    BadField(&'static str),
}

impl Envelope {
    /// Validate raw message data into an envelope
    pub fn parse(data: &Value) -> Result<Self, EnvelopeError> {
        match data {
            Value::String(raw) => {
                let decoded: Value =
                    serde_json::from_str(raw).map_err(|_| EnvelopeError::NotJson)?;
                match decoded {
                    Value::Object(map) => Self::from_object(&map),
                    _ => Err(EnvelopeError::NotObject),
                }
            }
            Value::Object(map) => Self::from_object(map),
            _ => Err(EnvelopeError::NotObject),
        }
    }

    fn from_object(map: &Map<String, Value>) -> Result<Self, EnvelopeError> {
        let present = [FRAME_FIELD, REQUEST_FIELD, RESPONSE_FIELD, EVENT_FIELD]
            .iter()
            .filter(|field| map.contains_key(**field))
            .count();
        match present {
            0 => return Err(EnvelopeError::Empty),
            1 => {}
            _ => return Err(EnvelopeError::Ambiguous),
        }

        if let Some(frame) = map.get(FRAME_FIELD) {
            let frame_id = scalar_text(frame).ok_or(EnvelopeError::BadField(FRAME_FIELD))?;
            return Ok(Envelope::Frame { frame_id });
        }

        if let Some(request) = map.get(REQUEST_FIELD) {
            let name = non_blank_str(request).ok_or(EnvelopeError::BadField(REQUEST_FIELD))?;
            return Ok(Envelope::Request { name });
        }

        let data = map.get(DATA_FIELD).cloned().unwrap_or(Value::Null);

        if let Some(response) = map.get(RESPONSE_FIELD) {
            let name = non_blank_str(response).ok_or(EnvelopeError::BadField(RESPONSE_FIELD))?;
            return Ok(Envelope::Response { name, data });
        }

        let event = map.get(EVENT_FIELD).ok_or(EnvelopeError::Empty)?;
        let name = non_blank_str(event).ok_or(EnvelopeError::BadField(EVENT_FIELD))?;
        let id = map.get(EVENT_ID_FIELD).cloned().unwrap_or(Value::Null);
        Ok(Envelope::Event { name, data, id })
    }

    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Frame { .. } => "frame",
            Envelope::Request { .. } => "request",
            Envelope::Response { .. } => "response",
            Envelope::Event { .. } => "event",
        }
    }
}

fn non_blank_str(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(_) => non_blank_str(value),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Where an outbound message may be delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Any origin. Only legal before an origin is trusted.
    Wildcard,
    Origin(String),
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Wildcard => write!(f, "*"),
            Target::Origin(origin) => write!(f, "{}", origin),
        }
    }
}

/// Message the embedded app sends to the host
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Ready,
    Request {
        name: String,
        frame_id: Option<String>,
    },
    EventAck {
        name: String,
        id: Value,
        frame_id: Option<String>,
    },
}

impl Outbound {
    pub fn to_value(&self) -> Value {
        match self {
            Outbound::Ready => json!({ "message": "ready" }),
            Outbound::Request { name, frame_id } => {
                let mut value = json!({ REQUEST_FIELD: name });
                attach_frame(&mut value, frame_id);
                value
            }
            Outbound::EventAck { name, id, frame_id } => {
                let mut value = json!({
                    EVENT_FIELD: name,
                    EVENT_ID_FIELD: id,
                    "success": true,
                });
                attach_frame(&mut value, frame_id);
                value
            }
        }
    }
}

fn attach_frame(value: &mut Value, frame_id: &Option<String>) {
    if let (Some(frame_id), Some(map)) = (frame_id, value.as_object_mut()) {
        map.insert(OUTBOUND_FRAME_FIELD.to_string(), Value::String(frame_id.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_and_object_forms_agree() {
        let object = json!({ "MessageFrameID": "frame-1" });
        let string = Value::String(object.to_string());
        assert_eq!(Envelope::parse(&object), Envelope::parse(&string));
        assert_eq!(
            Envelope::parse(&object),
            Ok(Envelope::Frame {
                frame_id: "frame-1".into()
            })
        );
    }

    #[test]
    fn test_numeric_frame_id_is_text() {
        let env = Envelope::parse(&json!({ "MessageFrameID": 42 })).unwrap();
        assert_eq!(env, Envelope::Frame { frame_id: "42".into() });
    }

    #[test]
    fn test_rejects_foreign_traffic() {
        assert_eq!(
            Envelope::parse(&json!("not json at all")),
            Err(EnvelopeError::NotJson)
        );
        assert_eq!(Envelope::parse(&json!([1, 2])), Err(EnvelopeError::NotObject));
        assert_eq!(
            Envelope::parse(&json!({ "type": "webpackOk" })),
            Err(EnvelopeError::Empty)
        );
        assert_eq!(
            Envelope::parse(&json!({ "MessageFrameID": "x", "event": "onLoad" })),
            Err(EnvelopeError::Ambiguous)
        );
        assert_eq!(
            Envelope::parse(&json!({ "response": "" })),
            Err(EnvelopeError::BadField(RESPONSE_FIELD))
        );
    }

    #[test]
    fn test_event_keeps_correlation_id() {
        let env = Envelope::parse(&json!({
            "event": "beforeSave",
            "_id": 17,
            "data": { "id": 5 }
        }))
        .unwrap();
        assert_eq!(
            env,
            Envelope::Event {
                name: "beforeSave".into(),
                data: json!({ "id": 5 }),
                id: json!(17),
            }
        );
    }

    #[test]
    fn test_ack_echoes_event_and_id() {
        let ack = Outbound::EventAck {
            name: "onLoad".into(),
            id: json!("abc"),
            frame_id: Some("f1".into()),
        };
        assert_eq!(
            ack.to_value(),
            json!({ "event": "onLoad", "_id": "abc", "success": true, "frameID": "f1" })
        );
    }
}
