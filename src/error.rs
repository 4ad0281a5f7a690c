//! Error types for the laser link.
//!
//! This module defines the primary error type, `LinkError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the failures that can occur while talking to a laser controller, from an unreachable
//! endpoint to a desynchronized request/reply stream.
//!
//! ## Error Hierarchy
//!
//! - **`Connect`**: the transport could not be established, or the link handshake was
//!   absent or negative. The raw handshake reply is kept for diagnostics.
//! - **`Timeout`**: no reply frame arrived within the bound of a single call. The link
//!   stays up; the caller decides whether to retry.
//! - **`ProtocolMismatch`**: a reply carried the wrong correlation id, or the frame could
//!   not be decoded. Treat the link as desynchronized: close and reopen it.
//! - **`Transport`**: the underlying byte stream failed. The session drops the link.
//! - **`NotLinked`**: an operational request was attempted without an established link.
//! - **`Config` / `Configuration`**: loading or validating settings failed.
//!
//! A device explicitly refusing a setpoint, or a tuning run that does not converge in
//! time, are *not* errors; see [`crate::tuning::TuningOutcome`].

use crate::protocol::Reply;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type LinkResult<T> = std::result::Result<T, LinkError>;

/// Primary error type for laser link operations.
#[derive(Error, Debug)]
pub enum LinkError {
    /// Link establishment failed.
    ///
    /// Raised by [`crate::session::LinkSession::open`] when the endpoint is unreachable,
    /// the handshake times out or cannot be decoded, or the controller answers with a
    /// status other than the success sentinel. The transport is always closed before
    /// this error is returned.
    #[error("Failed to establish link to {endpoint}: {reason}")]
    Connect {
        /// Endpoint the session tried to reach (`host:port` or a transport label)
        endpoint: String,
        /// Human-readable cause
        reason: String,
        /// Raw handshake reply, when one was received
        reply: Option<Box<Reply>>,
    },

    /// No reply frame arrived in time.
    #[error("No reply to '{operation}' within {timeout:?}")]
    Timeout {
        /// Operation name of the request that went unanswered
        operation: String,
        /// Bound that elapsed
        timeout: Duration,
    },

    /// The reply stream no longer matches the request stream.
    #[error("Protocol mismatch: {0}")]
    ProtocolMismatch(#[from] ProtocolViolation),

    /// Underlying stream I/O failed.
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// An operational request was attempted before the handshake succeeded
    /// or after the link was closed.
    #[error("Link not established")]
    NotLinked,

    /// A wavelength setpoint lies outside the configured tuning range.
    #[error("Wavelength {value_nm} nm out of tuning range ({min_nm}-{max_nm} nm)")]
    OutOfRange {
        /// Requested wavelength in nanometers
        value_nm: f64,
        /// Lower bound in nanometers
        min_nm: f64,
        /// Upper bound in nanometers
        max_nm: f64,
    },

    /// Configuration file or environment could not be parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration values parsed but failed semantic validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),
}

impl LinkError {
    /// True for link-establishment failures.
    pub fn is_connect_error(&self) -> bool {
        matches!(self, LinkError::Connect { .. })
    }

    /// True when a call went unanswered.
    pub fn is_timeout(&self) -> bool {
        matches!(self, LinkError::Timeout { .. })
    }

    /// True when the reply stream is desynchronized or undecodable.
    pub fn is_protocol_mismatch(&self) -> bool {
        matches!(self, LinkError::ProtocolMismatch(_))
    }

    /// True when the link can no longer carry requests.
    ///
    /// Transport failures drop the link; timeouts and protocol mismatches do not.
    pub fn is_link_lost(&self) -> bool {
        matches!(self, LinkError::Transport(_) | LinkError::NotLinked)
    }
}

impl From<figment::Error> for LinkError {
    fn from(value: figment::Error) -> Self {
        LinkError::Config(Box::new(value))
    }
}

/// Ways a reply can violate the request/reply contract.
#[derive(Error, Debug)]
pub enum ProtocolViolation {
    /// The reply answers a different request than the one outstanding.
    #[error("expected transmission id {expected}, received {received}")]
    CorrelationMismatch {
        /// Id of the request just sent
        expected: u64,
        /// Id carried by the reply
        received: u64,
    },

    /// The frame could not be decoded into a reply.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The peer sent more bytes than fit in one frame.
    #[error("frame exceeds {limit} bytes without a complete message")]
    FrameTooLarge {
        /// Configured frame size limit
        limit: usize,
    },
}

/// Failure to decode one frame into a message.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The frame is not well-formed JSON.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A required field is absent or has the wrong JSON type.
    #[error("missing field '{0}'")]
    MissingField(&'static str),

    /// The transmission id is not a non-negative integer.
    #[error("invalid transmission id: {0}")]
    InvalidCorrelationId(serde_json::Value),

    /// The status lies outside the device status domain.
    #[error("status outside the device domain: {0}")]
    UnknownStatus(serde_json::Value),
}
