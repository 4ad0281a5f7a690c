//! JSON message codec.
//!
//! Request frame:
//!
//! ```text
//! {"message": {"transmission_id": [7], "op": "set_wave_m", "parameters": {"wavelength": [780.0]}}}
//! ```
//!
//! Reply frame:
//!
//! ```text
//! {"message": {"transmission_id": [7], "op": "set_wave_m_reply", "parameters": {"status": [0]}}}
//! ```
//!
//! Both directions are pure transforms. Decoding validates only the fields the
//! link relies on (`transmission_id` and `parameters.status`); every other
//! parameter passes through untouched.

use super::status::Status;
use crate::error::DecodeError;
use serde_json::{json, Map, Value};

/// Frame terminator appended to every encoded request.
pub const FRAME_TERMINATOR: u8 = b'\n';

/// An outbound request.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Transmission id the reply must echo
    pub correlation_id: u64,
    /// Operation name, e.g. `poll_wave_m`
    pub operation: String,
    /// Operation parameters
    pub parameters: Map<String, Value>,
}

impl Request {
    /// Request with no parameters.
    pub fn new(correlation_id: u64, operation: impl Into<String>) -> Self {
        Self {
            correlation_id,
            operation: operation.into(),
            parameters: Map::new(),
        }
    }

    /// Add one parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Replace the parameter mapping.
    pub fn with_params(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }
}

/// A decoded reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// Transmission id echoed by the controller
    pub correlation_id: u64,
    /// Raw status, also present as `parameters["status"]`
    pub status: Status,
    /// Full parameter mapping as received
    pub parameters: Map<String, Value>,
}

impl Reply {
    /// Numeric parameter, accepting the controller's one-element list form.
    pub fn number(&self, key: &str) -> Option<f64> {
        number_param(&self.parameters, key)
    }
}

/// Numeric parameter read from a bare number or a one-element list.
pub fn number_param(parameters: &Map<String, Value>, key: &str) -> Option<f64> {
    match parameters.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::Array(items) if items.len() == 1 => items[0].as_f64(),
        _ => None,
    }
}

/// Encode a request into one wire frame, terminator included.
///
/// An empty parameter mapping is omitted, as the controller expects for
/// parameterless operations.
pub fn encode(request: &Request) -> Vec<u8> {
    let mut message = Map::new();
    message.insert("transmission_id".into(), json!([request.correlation_id]));
    message.insert("op".into(), Value::String(request.operation.clone()));
    if !request.parameters.is_empty() {
        message.insert("parameters".into(), Value::Object(request.parameters.clone()));
    }
    let mut frame = json!({ "message": message }).to_string().into_bytes();
    frame.push(FRAME_TERMINATOR);
    frame
}

/// Decode one complete frame into a reply.
///
/// # Errors
///
/// - [`DecodeError::Malformed`] if the bytes are not JSON
/// - [`DecodeError::MissingField`] if `message`, `message.transmission_id`,
///   `message.parameters` or `message.parameters.status` is absent
/// - [`DecodeError::InvalidCorrelationId`] if the id is not a non-negative integer
/// - [`DecodeError::UnknownStatus`] if the status is neither an integer nor a string
pub fn decode(frame: &[u8]) -> Result<Reply, DecodeError> {
    let root: Value = serde_json::from_slice(frame)?;
    let message = message_object(&root)?;
    let correlation_id = correlation_id(message)?;

    let parameters = message
        .get("parameters")
        .and_then(Value::as_object)
        .ok_or(DecodeError::MissingField("message.parameters"))?;
    let raw_status = parameters
        .get("status")
        .ok_or(DecodeError::MissingField("message.parameters.status"))?;
    let status =
        Status::from_json(raw_status).ok_or_else(|| DecodeError::UnknownStatus(raw_status.clone()))?;

    Ok(Reply {
        correlation_id,
        status,
        parameters: parameters.clone(),
    })
}

/// Decode one complete frame into a request.
///
/// Controller-side counterpart of [`decode`], used by the mock controller.
pub fn decode_request(frame: &[u8]) -> Result<Request, DecodeError> {
    let root: Value = serde_json::from_slice(frame)?;
    let message = message_object(&root)?;
    let correlation_id = correlation_id(message)?;

    let operation = message
        .get("op")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingField("message.op"))?;
    let parameters = match message.get("parameters") {
        None => Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(_) => return Err(DecodeError::MissingField("message.parameters")),
    };

    Ok(Request {
        correlation_id,
        operation: operation.to_string(),
        parameters,
    })
}

fn message_object(root: &Value) -> Result<&Map<String, Value>, DecodeError> {
    root.get("message")
        .and_then(Value::as_object)
        .ok_or(DecodeError::MissingField("message"))
}

fn correlation_id(message: &Map<String, Value>) -> Result<u64, DecodeError> {
    let raw = message
        .get("transmission_id")
        .ok_or(DecodeError::MissingField("message.transmission_id"))?;
    let id = match raw {
        Value::Array(items) if items.len() == 1 => items[0].as_u64(),
        other => other.as_u64(),
    };
    id.ok_or_else(|| DecodeError::InvalidCorrelationId(raw.clone()))
}
