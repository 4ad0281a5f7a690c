//! Reply status domains.
//!
//! On the wire a status is an integer or a string, either bare or wrapped in
//! a one-element list (`[0]`, `"ok"`, `["ok"]`). [`Status`] is that raw value.
//! Each operation then classifies it into its own closed enum so every branch
//! is handled explicitly; codes a firmware revision adds later land in the
//! `Unrecognized` variant instead of falling through.
//!
//! Symbolic names are accepted alongside the numeric codes so simulators and
//! newer firmware that report text statuses classify the same way.

use serde_json::Value;
use std::fmt;

/// Raw status value as carried by a reply.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Status {
    /// Integer status code
    Code(i64),
    /// Symbolic status
    Text(String),
}

impl Status {
    /// Interpret a JSON value as a status.
    ///
    /// Returns `None` for anything outside the status domain: floats, booleans,
    /// objects, `null`, or lists that do not hold exactly one code or string.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Status::Code),
            Value::String(s) => Some(Status::Text(s.clone())),
            Value::Array(items) if items.len() == 1 => match &items[0] {
                Value::Array(_) => None,
                inner => Status::from_json(inner),
            },
            _ => None,
        }
    }

    /// Wire representation, using the controller's one-element list convention
    /// for codes.
    pub fn to_json(&self) -> Value {
        match self {
            Status::Code(code) => Value::Array(vec![Value::from(*code)]),
            Status::Text(text) => Value::String(text.clone()),
        }
    }

    fn is_text(&self, names: &[&str]) -> bool {
        match self {
            Status::Text(t) => names.iter().any(|n| t.eq_ignore_ascii_case(n)),
            Status::Code(_) => false,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Code(code) => write!(f, "{}", code),
            Status::Text(text) => write!(f, "{}", text),
        }
    }
}

impl From<&str> for Status {
    fn from(value: &str) -> Self {
        Status::Text(value.to_string())
    }
}

impl From<i64> for Status {
    fn from(value: i64) -> Self {
        Status::Code(value)
    }
}

/// Outcome of the `start_link` handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeStatus {
    /// Link accepted (`"ok"`)
    Ok,
    /// Link refused (`"failed"`)
    Failed,
    /// Anything else
    Unrecognized(Status),
}

impl From<&Status> for HandshakeStatus {
    fn from(status: &Status) -> Self {
        if status.is_text(&["ok"]) {
            HandshakeStatus::Ok
        } else if status.is_text(&["failed", "fail"]) {
            HandshakeStatus::Failed
        } else {
            HandshakeStatus::Unrecognized(status.clone())
        }
    }
}

/// Immediate answer to a wavelength setpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetWaveStatus {
    /// Setpoint accepted, tuning started (`0`)
    Accepted,
    /// Controller has no link to the wavemeter (`1`)
    NoWavemeterLink,
    /// Setpoint outside the tunable range (`2`)
    OutOfRange,
    /// Anything else
    Unrecognized(Status),
}

impl From<&Status> for SetWaveStatus {
    fn from(status: &Status) -> Self {
        match status {
            Status::Code(0) => SetWaveStatus::Accepted,
            Status::Code(1) => SetWaveStatus::NoWavemeterLink,
            Status::Code(2) => SetWaveStatus::OutOfRange,
            s if s.is_text(&["accepted", "ok"]) => SetWaveStatus::Accepted,
            s if s.is_text(&["no-link", "no_link"]) => SetWaveStatus::NoWavemeterLink,
            s if s.is_text(&["out-of-range", "out_of_range"]) => SetWaveStatus::OutOfRange,
            other => SetWaveStatus::Unrecognized(other.clone()),
        }
    }
}

/// Tuning state reported by a wavelength poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    /// No tuning in progress (`0`)
    Idle,
    /// Controller has no link to the wavemeter (`1`)
    NoLink,
    /// Tuning in progress (`2`)
    Tuning,
    /// Target reached and being maintained (`3`)
    AtTarget,
    /// Anything else
    Unrecognized(Status),
}

impl From<&Status> for PollStatus {
    fn from(status: &Status) -> Self {
        match status {
            Status::Code(0) => PollStatus::Idle,
            Status::Code(1) => PollStatus::NoLink,
            Status::Code(2) => PollStatus::Tuning,
            Status::Code(3) => PollStatus::AtTarget,
            s if s.is_text(&["idle"]) => PollStatus::Idle,
            s if s.is_text(&["no-link", "no_link"]) => PollStatus::NoLink,
            s if s.is_text(&["tuning", "tuning-in-progress"]) => PollStatus::Tuning,
            s if s.is_text(&["at-target", "at_target", "maintaining"]) => PollStatus::AtTarget,
            other => PollStatus::Unrecognized(other.clone()),
        }
    }
}

impl PollStatus {
    /// True when the reply carries a meaningful current wavelength.
    pub fn reports_wavelength(&self) -> bool {
        matches!(self, PollStatus::Idle | PollStatus::Tuning | PollStatus::AtTarget)
    }
}

/// Result of the one-shot beam alignment routine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlignmentStatus {
    /// Alignment completed (`0`)
    Succeeded,
    /// Alignment ran and failed (`1`)
    Failed,
    /// Anything else
    Unrecognized(Status),
}

impl From<&Status> for AlignmentStatus {
    fn from(status: &Status) -> Self {
        match status {
            Status::Code(0) => AlignmentStatus::Succeeded,
            Status::Code(1) => AlignmentStatus::Failed,
            s if s.is_text(&["ok", "success", "succeeded"]) => AlignmentStatus::Succeeded,
            s if s.is_text(&["failed", "fail"]) => AlignmentStatus::Failed,
            other => AlignmentStatus::Unrecognized(other.clone()),
        }
    }
}
