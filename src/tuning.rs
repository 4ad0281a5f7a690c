//! Wavelength tuning state machine.
//!
//! Tuning is a multi-second operation on the controller: the target is set
//! once, then the tuning state is polled until the controller reports it is
//! holding the target, the poll budget runs out, or the caller cancels.
//!
//! ```text
//!            set_wave accepted               poll: at target
//!   Idle ─────────────────────────▶ Tuning ─────────────────────▶ Converged
//!     │                              │ │ │
//!     │ set_wave refused             │ │ └── budget spent ──────▶ TimedOut
//!     └──────────▶ Rejected          │ └──── token cancelled ───▶ Cancelled
//!                                    └────── link lost ─────────▶ Aborted
//! ```
//!
//! The worst-case wall clock of [`TuningController::tune_to`] is
//! `poll_budget × poll_interval` plus the reply latency of each poll.
//! Cancellation is observed only between polls, never while a reply is
//! awaited, so the request/reply stream stays in step.

use crate::config::{PollFailurePolicy, TuningConfig};
use crate::error::LinkResult;
use crate::protocol::{AlignmentStatus, PollStatus, SetWaveStatus, Status};
use crate::quantity::Quantity;
use crate::session::LinkSession;
use serde_json::{json, Map};
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// How a tuning run ended.
///
/// Refusal and non-convergence are outcomes, not errors: the link is healthy
/// and the caller decides what to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum TuningOutcome {
    /// The controller reached and holds the target; carries its reading.
    Converged(Quantity),
    /// The poll budget ran out; carries the last reported wavelength (zero if none).
    TimedOut(Quantity),
    /// The controller refused the setpoint, or a strict poll saw an unexpected status.
    Rejected(Status),
    /// The cancellation token fired between polls; carries the last reported wavelength.
    Cancelled(Quantity),
    /// The link failed and polling could not continue.
    Aborted {
        /// Last reported wavelength, if any poll succeeded
        last_known: Option<Quantity>,
        /// Description of the failure
        reason: String,
    },
}

impl TuningOutcome {
    /// True for [`TuningOutcome::Converged`].
    pub fn is_converged(&self) -> bool {
        matches!(self, TuningOutcome::Converged(_))
    }

    /// Wavelength carried by the outcome, if any.
    pub fn wavelength(&self) -> Option<Quantity> {
        match self {
            TuningOutcome::Converged(q) | TuningOutcome::TimedOut(q) | TuningOutcome::Cancelled(q) => {
                Some(*q)
            }
            TuningOutcome::Aborted { last_known, .. } => *last_known,
            TuningOutcome::Rejected(_) => None,
        }
    }
}

impl fmt::Display for TuningOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TuningOutcome::Converged(q) => write!(f, "converged at {}", q),
            TuningOutcome::TimedOut(q) => write!(f, "timed out, last reading {}", q),
            TuningOutcome::Rejected(status) => write!(f, "rejected with status {}", status),
            TuningOutcome::Cancelled(q) => write!(f, "cancelled, last reading {}", q),
            TuningOutcome::Aborted { reason, .. } => write!(f, "aborted: {}", reason),
        }
    }
}

/// One poll result.
#[derive(Debug, Clone, PartialEq)]
pub struct WavelengthReading {
    /// Raw status from the reply
    pub status: Status,
    /// Classified tuning state
    pub state: PollStatus,
    /// Reported wavelength, when the state carries one
    pub wavelength: Option<Quantity>,
}

/// Drives tuning, read-out and alignment over an established session.
pub struct TuningController<'a> {
    session: &'a mut LinkSession,
    config: &'a TuningConfig,
}

impl<'a> TuningController<'a> {
    /// Borrow a session for tuning.
    pub fn new(session: &'a mut LinkSession, config: &'a TuningConfig) -> Self {
        Self { session, config }
    }

    /// Tune with the configured poll interval and budget.
    pub async fn tune(&mut self, target: Quantity, cancel: &CancellationToken) -> TuningOutcome {
        let (interval, budget) = (self.config.poll_interval, self.config.poll_budget);
        self.tune_to(target, interval, budget, cancel).await
    }

    /// Set `target` and poll until it converges, up to `poll_budget` polls
    /// spaced `poll_interval` apart.
    ///
    /// Exactly `poll_budget` polls are issued when the run times out. Failed
    /// polls (no reply, undecodable reply, unexpected status under
    /// [`PollFailurePolicy::Tolerate`]) use up budget and are logged.
    #[instrument(skip(self, cancel), fields(target_nm = target.to_nanometers()))]
    pub async fn tune_to(
        &mut self,
        target: Quantity,
        poll_interval: Duration,
        poll_budget: u32,
        cancel: &CancellationToken,
    ) -> TuningOutcome {
        let target_nm = target.to_nanometers();
        let set_wave = self.session.operations().set_wave.clone();

        let mut parameters = Map::new();
        parameters.insert("wavelength".to_string(), json!([target_nm]));
        let reply = match self
            .session
            .call(&set_wave, parameters, self.config.reply_timeout)
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                warn!(target_nm, error = %e, "Setpoint request failed");
                return TuningOutcome::Aborted {
                    last_known: None,
                    reason: e.to_string(),
                };
            }
        };

        if SetWaveStatus::from(&reply.status) != SetWaveStatus::Accepted {
            info!(target_nm, status = %reply.status, "Setpoint rejected");
            return TuningOutcome::Rejected(reply.status);
        }
        debug!(target_nm, "Setpoint accepted, polling");

        let mut last_known: Option<Quantity> = None;
        for attempt in 1..=poll_budget {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(target_nm, attempt, "Tuning cancelled");
                    return TuningOutcome::Cancelled(last_known.unwrap_or_default());
                }
                _ = tokio::time::sleep(poll_interval) => {}
            }

            let reading = match self.poll().await {
                Ok(reading) => reading,
                Err(e) if e.is_timeout() || e.is_protocol_mismatch() => {
                    warn!(target_nm, attempt, error = %e, "Poll failed");
                    continue;
                }
                Err(e) => {
                    warn!(target_nm, attempt, error = %e, "Link lost while tuning");
                    return TuningOutcome::Aborted {
                        last_known,
                        reason: e.to_string(),
                    };
                }
            };

            match reading.state {
                PollStatus::AtTarget => {
                    let current = reading.wavelength.or(last_known).unwrap_or(target);
                    let current_nm = current.to_nanometers();
                    if current.distance_nm(target) > self.config.tolerance_nm {
                        warn!(
                            target_nm,
                            current_nm,
                            tolerance_nm = self.config.tolerance_nm,
                            "Converged outside tolerance"
                        );
                    }
                    info!(target_nm, current_nm, attempt, "Tuning converged");
                    return TuningOutcome::Converged(current);
                }
                PollStatus::Idle | PollStatus::Tuning => {
                    if let Some(current) = reading.wavelength {
                        debug!(target_nm, current_nm = current.to_nanometers(), attempt, "Tuning");
                        last_known = Some(current);
                    }
                }
                PollStatus::NoLink | PollStatus::Unrecognized(_) => {
                    match self.config.poll_failure_policy {
                        PollFailurePolicy::Tolerate => {
                            warn!(target_nm, attempt, status = %reading.status, "Poll failed");
                        }
                        PollFailurePolicy::Strict => {
                            info!(target_nm, attempt, status = %reading.status, "Poll status rejected");
                            return TuningOutcome::Rejected(reading.status);
                        }
                    }
                }
            }
        }

        info!(target_nm, poll_budget, "Tuning budget exhausted");
        TuningOutcome::TimedOut(last_known.unwrap_or_default())
    }

    /// Issue a single poll and report the current wavelength.
    pub async fn read_wavelength(&mut self) -> LinkResult<WavelengthReading> {
        self.poll().await
    }

    /// Run the controller's one-shot beam alignment in `mode`.
    #[instrument(skip(self), err)]
    pub async fn beam_alignment(&mut self, mode: u32) -> LinkResult<AlignmentStatus> {
        let operation = self.session.operations().beam_alignment.clone();
        let mut parameters = Map::new();
        parameters.insert("mode".to_string(), json!([mode]));

        let reply = self
            .session
            .call(&operation, parameters, self.config.reply_timeout)
            .await?;
        let status = AlignmentStatus::from(&reply.status);
        info!(mode, status = %reply.status, "Beam alignment finished");
        Ok(status)
    }

    async fn poll(&mut self) -> LinkResult<WavelengthReading> {
        let operation = self.session.operations().poll_wave.clone();
        let reply = self
            .session
            .call(&operation, Map::new(), self.config.reply_timeout)
            .await?;

        let state = PollStatus::from(&reply.status);
        let wavelength = if state.reports_wavelength() {
            reply.number("current_wavelength").map(Quantity::nanometers)
        } else {
            None
        };
        Ok(WavelengthReading {
            status: reply.status,
            state,
            wavelength,
        })
    }
}
