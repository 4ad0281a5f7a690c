//! Mock Laser Controller
//!
//! A scripted fake of the tunable-laser controller for tests and demos. It
//! speaks the same JSON wire protocol as the real device, over an in-memory
//! duplex stream ([`MockController::spawn`]) or a TCP listener
//! ([`MockController::serve_tcp`]).
//!
//! # Behavior
//!
//! - handshake answers with a configurable status (default `"ok"`)
//! - setpoint answers with a configurable status (default `[0]`) and restarts
//!   the poll script
//! - polls walk through a scripted list of [`PollStep`]s; the last step repeats
//!   (default: at target, reporting the setpoint)
//! - beam alignment answers with a configurable status (default `[0]`)
//! - [`Fault`]s can be injected on the n-th request of an operation
//!
//! Every received request is recorded for later inspection.
//!
//! # Example
//!
//! ```rust,ignore
//! let controller = MockController::new().poll_sequence(vec![
//!     PollStep::new(Status::from("tuning"), Reading::Fixed(779.4)),
//!     PollStep::new(Status::from("at-target"), Reading::Fixed(780.02)),
//! ]);
//! let session = LinkSession::open_with_transport(controller.spawn(), "mock", &config).await?;
//! assert_eq!(controller.count("poll_wave_m"), 0);
//! ```

use crate::config::OperationNames;
use crate::protocol::{decode_request, encode, number_param, FrameReader, Request, Status};
use crate::transport::DynTransport;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::debug;

const DUPLEX_CAPACITY: usize = 8 * 1024;

// =============================================================================
// Script Types
// =============================================================================

/// Wavelength reported alongside a poll status.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    /// The last setpoint received
    AtSetpoint,
    /// The last setpoint plus an offset (nm)
    Offset(f64),
    /// A fixed value (nm)
    Fixed(f64),
    /// No `current_wavelength` parameter at all
    Absent,
}

/// One scripted poll reply.
#[derive(Debug, Clone, PartialEq)]
pub struct PollStep {
    /// Status returned by the poll
    pub status: Status,
    /// Wavelength returned by the poll
    pub reading: Reading,
}

impl PollStep {
    /// Build a step.
    pub fn new(status: Status, reading: Reading) -> Self {
        Self { status, reading }
    }

    /// Tuning in progress (`[2]`) at `current_nm`.
    pub fn tuning(current_nm: f64) -> Self {
        Self::new(Status::Code(2), Reading::Fixed(current_nm))
    }

    /// At target (`[3]`) at `current_nm`.
    pub fn at_target(current_nm: f64) -> Self {
        Self::new(Status::Code(3), Reading::Fixed(current_nm))
    }
}

/// Misbehavior injected on a specific request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Reply with a transmission id one past the request's
    WrongId,
    /// Reply with bytes that are not JSON
    Garbage,
    /// Swallow the request and never reply
    Silence,
    /// Drop the connection without replying
    Hangup,
    /// Reply normally, but only after the given delay
    Late(Duration),
}

#[derive(Debug, Clone)]
struct Script {
    operations: OperationNames,
    handshake: Status,
    set_wave: Status,
    polls: Vec<PollStep>,
    alignment: Status,
    faults: HashMap<(String, usize), Fault>,
}

#[derive(Debug, Default)]
struct State {
    requests: Vec<Request>,
    counts: HashMap<String, usize>,
    setpoint_nm: f64,
    poll_index: usize,
}

enum Action {
    Reply(Vec<u8>),
    Delayed(Duration, Vec<u8>),
    Silence,
    Hangup,
}

// =============================================================================
// MockController
// =============================================================================

/// Scripted fake controller.
///
/// Clones share the request record, so a test can keep one clone for
/// inspection while another serves connections.
#[derive(Debug, Clone)]
pub struct MockController {
    script: Script,
    state: Arc<Mutex<State>>,
}

impl MockController {
    /// Controller that links, accepts every setpoint and is immediately at target.
    pub fn new() -> Self {
        Self {
            script: Script {
                operations: OperationNames::default(),
                handshake: Status::from("ok"),
                set_wave: Status::Code(0),
                polls: vec![PollStep::new(Status::Code(3), Reading::AtSetpoint)],
                alignment: Status::Code(0),
                faults: HashMap::new(),
            },
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Use non-default operation names.
    pub fn with_operations(mut self, operations: OperationNames) -> Self {
        self.script.operations = operations;
        self
    }

    /// Status returned to the handshake.
    pub fn handshake_status(mut self, status: Status) -> Self {
        self.script.handshake = status;
        self
    }

    /// Status returned to every setpoint.
    pub fn set_wave_status(mut self, status: Status) -> Self {
        self.script.set_wave = status;
        self
    }

    /// Poll script, restarted by every setpoint. The last step repeats.
    pub fn poll_sequence(mut self, steps: Vec<PollStep>) -> Self {
        if !steps.is_empty() {
            self.script.polls = steps;
        }
        self
    }

    /// Report tuning for `polls` polls, closing in on the setpoint, then at target.
    pub fn converge_after(self, polls: usize) -> Self {
        let mut steps: Vec<PollStep> = (0..polls)
            .map(|i| PollStep::new(Status::Code(2), Reading::Offset(-((polls - i) as f64) * 0.5)))
            .collect();
        steps.push(PollStep::new(Status::Code(3), Reading::AtSetpoint));
        self.poll_sequence(steps)
    }

    /// Status returned to beam alignment.
    pub fn alignment_status(mut self, status: Status) -> Self {
        self.script.alignment = status;
        self
    }

    /// Misbehave on the `occurrence`-th (1-based) request for `operation`.
    pub fn fault_on(mut self, operation: &str, occurrence: usize, fault: Fault) -> Self {
        self.script
            .faults
            .insert((operation.to_string(), occurrence), fault);
        self
    }

    // =========================================================================
    // Serving
    // =========================================================================

    /// Serve one in-memory connection; returns the client end.
    pub fn spawn(&self) -> DynTransport {
        let (client, device) = tokio::io::duplex(DUPLEX_CAPACITY);
        let controller = self.clone();
        tokio::spawn(async move { controller.serve(device).await });
        Box::new(client)
    }

    /// Accept TCP connections until the listener fails, serving each one.
    pub fn serve_tcp(&self, listener: TcpListener) -> JoinHandle<()> {
        let controller = self.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        debug!(%peer, "Mock controller accepted connection");
                        let connection = controller.clone();
                        tokio::spawn(async move { connection.serve(stream).await });
                    }
                    Err(e) => {
                        debug!(error = %e, "Mock controller listener stopped");
                        break;
                    }
                }
            }
        })
    }

    /// Serve a single stream until the peer hangs up or a fault ends it.
    pub async fn serve<S>(self, mut stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut reader = FrameReader::default();
        loop {
            let frame = match reader.read_frame(&mut stream).await {
                Ok(frame) => frame,
                Err(e) if e.is_link_lost() => break,
                Err(e) => {
                    debug!(error = %e, "Mock controller skipped unreadable frame");
                    continue;
                }
            };
            let request = match decode_request(&frame) {
                Ok(request) => request,
                Err(e) => {
                    debug!(error = %e, "Mock controller ignored undecodable request");
                    continue;
                }
            };

            match self.respond(&request) {
                Action::Reply(bytes) => {
                    if stream.write_all(&bytes).await.is_err() || stream.flush().await.is_err() {
                        break;
                    }
                }
                Action::Delayed(delay, bytes) => {
                    tokio::time::sleep(delay).await;
                    if stream.write_all(&bytes).await.is_err() || stream.flush().await.is_err() {
                        break;
                    }
                }
                Action::Silence => {}
                Action::Hangup => break,
            }
        }
        let _ = stream.shutdown().await;
    }

    fn respond(&self, request: &Request) -> Action {
        let mut state = self.lock();
        state.requests.push(request.clone());
        let occurrence = {
            let count = state.counts.entry(request.operation.clone()).or_insert(0);
            *count += 1;
            *count
        };

        let mut reply_id = request.correlation_id;
        let mut delay = None;
        match self
            .script
            .faults
            .get(&(request.operation.clone(), occurrence))
        {
            Some(Fault::Silence) => return Action::Silence,
            Some(Fault::Hangup) => return Action::Hangup,
            Some(Fault::Garbage) => return Action::Reply(b"%% not json %%\n".to_vec()),
            Some(Fault::WrongId) => reply_id = reply_id.wrapping_add(1),
            Some(Fault::Late(after)) => delay = Some(*after),
            None => {}
        }

        let ops = &self.script.operations;
        let mut parameters = Map::new();
        if request.operation == ops.start_link {
            parameters.insert("status".into(), self.script.handshake.to_json());
            if let Some(ip) = request.parameters.get("ip_address") {
                parameters.insert("ip_address".into(), ip.clone());
            }
        } else if request.operation == ops.set_wave {
            if let Some(nm) = number_param(&request.parameters, "wavelength") {
                state.setpoint_nm = nm;
            }
            state.poll_index = 0;
            parameters.insert("status".into(), self.script.set_wave.to_json());
        } else if request.operation == ops.poll_wave {
            let last = self.script.polls.len().saturating_sub(1);
            let step = &self.script.polls[state.poll_index.min(last)];
            state.poll_index += 1;
            parameters.insert("status".into(), step.status.to_json());
            let current = match step.reading {
                Reading::AtSetpoint => Some(state.setpoint_nm),
                Reading::Offset(offset) => Some(state.setpoint_nm + offset),
                Reading::Fixed(nm) => Some(nm),
                Reading::Absent => None,
            };
            if let Some(nm) = current {
                parameters.insert("current_wavelength".into(), json!([nm]));
            }
        } else if request.operation == ops.beam_alignment {
            parameters.insert("status".into(), self.script.alignment.to_json());
        } else {
            parameters.insert("status".into(), Value::from("unknown-operation"));
        }

        let reply = Request::new(reply_id, format!("{}_reply", request.operation))
            .with_params(parameters);
        match delay {
            Some(after) => Action::Delayed(after, encode(&reply)),
            None => Action::Reply(encode(&reply)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// All requests received so far, in arrival order.
    pub fn requests(&self) -> Vec<Request> {
        self.lock().requests.clone()
    }

    /// Number of requests received for `operation`.
    pub fn count(&self, operation: &str) -> usize {
        self.lock().counts.get(operation).copied().unwrap_or(0)
    }

    /// Last wavelength setpoint received (nm).
    pub fn setpoint_nm(&self) -> f64 {
        self.lock().setpoint_nm
    }
}

impl Default for MockController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::CorrelationClient;

    fn params(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn answers_reference_sequence() {
        let controller = MockController::new().converge_after(2);
        let mut client = CorrelationClient::new(controller.spawn(), 4096, 8);
        let timeout = Duration::from_secs(1);

        let reply = client
            .call("start_link", params(&[("ip_address", json!("10.0.0.9"))]), timeout)
            .await
            .unwrap();
        assert_eq!(reply.status, Status::from("ok"));

        let reply = client
            .call("set_wave_m", params(&[("wavelength", json!([780.0]))]), timeout)
            .await
            .unwrap();
        assert_eq!(reply.status, Status::Code(0));

        let mut statuses = Vec::new();
        for _ in 0..4 {
            let reply = client.call("poll_wave_m", Map::new(), timeout).await.unwrap();
            statuses.push((reply.status.clone(), reply.number("current_wavelength")));
        }
        assert_eq!(
            statuses,
            vec![
                (Status::Code(2), Some(779.0)),
                (Status::Code(2), Some(779.5)),
                (Status::Code(3), Some(780.0)),
                (Status::Code(3), Some(780.0)),
            ]
        );
        assert_eq!(controller.count("poll_wave_m"), 4);
        assert_eq!(controller.setpoint_nm(), 780.0);
    }

    #[tokio::test]
    async fn wrong_id_fault_applies_once() {
        let controller = MockController::new().fault_on("poll_wave_m", 1, Fault::WrongId);
        let mut client = CorrelationClient::new(controller.spawn(), 4096, 8);
        let timeout = Duration::from_secs(1);

        let err = client.call("poll_wave_m", Map::new(), timeout).await.unwrap_err();
        assert!(err.is_protocol_mismatch());
        assert!(client.call("poll_wave_m", Map::new(), timeout).await.is_ok());
    }

    #[tokio::test]
    async fn hangup_fault_drops_connection() {
        let controller = MockController::new().fault_on("start_link", 1, Fault::Hangup);
        let mut client = CorrelationClient::new(controller.spawn(), 4096, 8);

        let err = client
            .call("start_link", Map::new(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_link_lost());
    }
}
