//! Correlated request/reply client.
//!
//! [`CorrelationClient`] owns one transport and turns it into a strict
//! call/response channel: every request gets a fresh transmission id, exactly
//! one frame is read back, and the reply must echo that id. `call` takes
//! `&mut self`, so at most one request is ever outstanding.
//!
//! A request that times out is remembered as abandoned. If its reply turns up
//! later, it is discarded while reading the answer to a newer request, so one
//! slow reply does not leave the stream a frame behind. Any other foreign id
//! is a protocol mismatch.
//!
//! Every exchange, successful or not, lands in a bounded [`DiagnosticLog`].
//! The most recently received reply stays available through
//! [`DiagnosticLog::last_reply`], including one rejected for carrying the
//! wrong id.

use crate::error::{LinkError, LinkResult, ProtocolViolation};
use crate::protocol::{decode, encode, write_frame, FrameReader, Reply, Request};
use crate::transport::{self, DynTransport};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::time::{Duration, SystemTime};
use tracing::{debug, instrument, warn};

/// First transmission id issued on a fresh client.
pub const FIRST_CORRELATION_ID: u64 = 1;

/// Abandoned request ids remembered for discarding late replies.
const MAX_ABANDONED: usize = 32;

// =============================================================================
// Diagnostic Log
// =============================================================================

/// One request and what came back for it.
#[derive(Debug, Clone)]
pub struct Exchange {
    /// Transmission id of the request
    pub correlation_id: u64,
    /// Operation name of the request
    pub operation: String,
    /// Reply frame, if one was received and decoded
    pub reply: Option<Reply>,
    /// Failure description, if the exchange failed
    pub error: Option<String>,
    /// Wall-clock time the exchange completed
    pub at: SystemTime,
}

/// Bounded history of recent exchanges.
#[derive(Debug, Clone)]
pub struct DiagnosticLog {
    entries: VecDeque<Exchange>,
    capacity: usize,
    last_reply: Option<Reply>,
}

impl DiagnosticLog {
    /// Empty log keeping at most `capacity` exchanges.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            last_reply: None,
        }
    }

    /// Append an exchange, evicting the oldest when full.
    pub fn record(&mut self, exchange: Exchange) {
        if let Some(reply) = &exchange.reply {
            self.last_reply = Some(reply.clone());
        }
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(exchange);
    }

    fn note_reply(&mut self, reply: &Reply) {
        self.last_reply = Some(reply.clone());
    }

    /// Most recently received reply, even if later exchanges failed or it was
    /// evicted from the history.
    pub fn last_reply(&self) -> Option<&Reply> {
        self.last_reply.as_ref()
    }

    /// Most recent exchange.
    pub fn last(&self) -> Option<&Exchange> {
        self.entries.back()
    }

    /// Exchanges, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Exchange> {
        self.entries.iter()
    }

    /// Number of exchanges held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of exchanges held.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for DiagnosticLog {
    fn default() -> Self {
        Self::new(16)
    }
}

// =============================================================================
// Correlation Client
// =============================================================================

/// Call/response channel over one transport.
pub struct CorrelationClient {
    transport: DynTransport,
    reader: FrameReader,
    next_id: u64,
    abandoned: VecDeque<u64>,
    log: DiagnosticLog,
}

impl CorrelationClient {
    /// Wrap a connected transport.
    pub fn new(transport: DynTransport, max_frame_len: usize, diagnostics_capacity: usize) -> Self {
        Self {
            transport,
            reader: FrameReader::new(max_frame_len),
            next_id: FIRST_CORRELATION_ID,
            abandoned: VecDeque::new(),
            log: DiagnosticLog::new(diagnostics_capacity),
        }
    }

    /// Id the next request will carry.
    pub fn next_correlation_id(&self) -> u64 {
        self.next_id
    }

    /// Exchange history.
    pub fn log(&self) -> &DiagnosticLog {
        &self.log
    }

    /// Send one request and wait for its reply.
    ///
    /// # Errors
    ///
    /// - [`LinkError::Timeout`] if no reply arrives within `timeout`
    /// - [`LinkError::ProtocolMismatch`] if the frame does not decode or
    ///   echoes an id that is neither this request's nor an abandoned one
    /// - [`LinkError::Transport`] if the stream fails or the peer hangs up
    #[instrument(level = "debug", skip(self, parameters))]
    pub async fn call(
        &mut self,
        operation: &str,
        parameters: Map<String, Value>,
        timeout: Duration,
    ) -> LinkResult<Reply> {
        let correlation_id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);

        let request = Request::new(correlation_id, operation).with_params(parameters);
        let (received, result) = match self.exchange(&request, timeout).await {
            Ok(reply) if reply.correlation_id == correlation_id => (Some(reply.clone()), Ok(reply)),
            Ok(reply) => {
                warn!(
                    correlation_id,
                    received = reply.correlation_id,
                    operation,
                    "Reply carries a foreign transmission id"
                );
                let err = ProtocolViolation::CorrelationMismatch {
                    expected: correlation_id,
                    received: reply.correlation_id,
                };
                (Some(reply), Err(err.into()))
            }
            Err(e) => {
                if e.is_timeout() {
                    self.abandon(correlation_id);
                }
                (None, Err(e))
            }
        };

        self.log.record(Exchange {
            correlation_id,
            operation: operation.to_string(),
            reply: received,
            error: result.as_ref().err().map(ToString::to_string),
            at: SystemTime::now(),
        });
        result
    }

    async fn exchange(&mut self, request: &Request, timeout: Duration) -> LinkResult<Reply> {
        let frame = encode(request);
        write_frame(&mut self.transport, &frame).await?;
        debug!(
            correlation_id = request.correlation_id,
            operation = %request.operation,
            bytes = frame.len(),
            "Request sent"
        );

        tokio::time::timeout(timeout, self.read_reply())
            .await
            .map_err(|_| LinkError::Timeout {
                operation: request.operation.clone(),
                timeout,
            })?
    }

    /// Read frames until one is not a late reply to an abandoned request.
    async fn read_reply(&mut self) -> LinkResult<Reply> {
        loop {
            let frame = self.reader.read_frame(&mut self.transport).await?;
            let reply = decode(&frame).map_err(ProtocolViolation::from)?;

            if let Some(pos) = self.abandoned.iter().position(|id| *id == reply.correlation_id) {
                self.abandoned.remove(pos);
                warn!(
                    correlation_id = reply.correlation_id,
                    status = %reply.status,
                    "Discarded late reply to an abandoned request"
                );
                self.log.note_reply(&reply);
                continue;
            }

            debug!(
                correlation_id = reply.correlation_id,
                status = %reply.status,
                "Reply received"
            );
            return Ok(reply);
        }
    }

    fn abandon(&mut self, correlation_id: u64) {
        if self.abandoned.len() == MAX_ABANDONED {
            self.abandoned.pop_front();
        }
        self.abandoned.push_back(correlation_id);
    }

    /// Shut the transport down and hand back the exchange history.
    pub async fn close(self) -> DiagnosticLog {
        transport::close(self.transport).await;
        self.log
    }
}

impl std::fmt::Debug for CorrelationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationClient")
            .field("next_id", &self.next_id)
            .field("abandoned", &self.abandoned)
            .field("buffered", &self.reader.buffered())
            .field("log_len", &self.log.len())
            .finish()
    }
}
