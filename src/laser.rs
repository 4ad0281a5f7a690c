//! Tunable laser driver.
//!
//! [`TunableLaser`] bundles a [`LinkSession`] with its tuning settings and
//! serialises callers through an async mutex, so it can be shared across tasks
//! (`Arc<TunableLaser>`) while the wire still sees one request at a time.
//!
//! # Example Usage
//!
//! ```no_run
//! use tunelink::capabilities::WavelengthTunable;
//! use tunelink::config::Config;
//! use tunelink::laser::TunableLaser;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let laser = TunableLaser::connect(&Config::default()).await?;
//!
//!     laser.set_wavelength(780.0).await?;
//!     println!("Wavelength: {:.3} nm", laser.get_wavelength().await?);
//!
//!     laser.close().await;
//!     Ok(())
//! }
//! ```

use crate::capabilities::WavelengthTunable;
use crate::client::DiagnosticLog;
use crate::config::{Config, TuningConfig};
use crate::error::{LinkError, LinkResult};
use crate::protocol::AlignmentStatus;
use crate::quantity::Quantity;
use crate::session::LinkSession;
use crate::transport::DynTransport;
use crate::tuning::{TuningController, TuningOutcome, WavelengthReading};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Driver for a tunable laser behind a JSON-over-TCP controller
///
/// Implements the [`WavelengthTunable`] capability trait.
pub struct TunableLaser {
    /// Link protected by Mutex for exclusive access
    session: Mutex<LinkSession>,
    /// Tuning loop settings
    tuning: TuningConfig,
}

impl TunableLaser {
    /// Connect to the controller named in `config` and perform the handshake.
    ///
    /// # Errors
    /// Returns [`LinkError::Connect`] if the controller is unreachable or
    /// refuses the link
    pub async fn connect(config: &Config) -> LinkResult<Self> {
        let session = LinkSession::open(&config.link).await?;
        Ok(Self::from_session(session, config.tuning.clone()))
    }

    /// Handshake over an already connected transport.
    pub async fn with_transport(
        transport: DynTransport,
        endpoint: impl Into<String>,
        config: &Config,
    ) -> LinkResult<Self> {
        let session = LinkSession::open_with_transport(transport, endpoint, &config.link).await?;
        Ok(Self::from_session(session, config.tuning.clone()))
    }

    /// Wrap an established session.
    pub fn from_session(session: LinkSession, tuning: TuningConfig) -> Self {
        Self {
            session: Mutex::new(session),
            tuning,
        }
    }

    /// Tuning settings in use.
    pub fn tuning_config(&self) -> &TuningConfig {
        &self.tuning
    }

    /// Tune to `target` with the configured interval and budget.
    ///
    /// # Errors
    /// Returns [`LinkError::OutOfRange`] without contacting the controller if
    /// the target lies outside the configured range. Every other failure is
    /// reported through the returned [`TuningOutcome`].
    pub async fn tune(&self, target: Quantity, cancel: &CancellationToken) -> LinkResult<TuningOutcome> {
        self.check_range(target.to_nanometers())?;
        let mut session = self.session.lock().await;
        Ok(TuningController::new(&mut session, &self.tuning)
            .tune(target, cancel)
            .await)
    }

    /// Poll the controller once.
    pub async fn read_wavelength(&self) -> LinkResult<WavelengthReading> {
        let mut session = self.session.lock().await;
        TuningController::new(&mut session, &self.tuning)
            .read_wavelength()
            .await
    }

    /// Run beam alignment in `mode` at the current wavelength.
    pub async fn beam_alignment(&self, mode: u32) -> LinkResult<AlignmentStatus> {
        let mut session = self.session.lock().await;
        TuningController::new(&mut session, &self.tuning)
            .beam_alignment(mode)
            .await
    }

    /// Tune to the alignment wavelength, then run the configured alignment mode.
    ///
    /// Alignment still runs if tuning did not converge; the shortfall is
    /// logged as a warning.
    pub async fn one_shot(&self, cancel: &CancellationToken) -> LinkResult<AlignmentStatus> {
        self.one_shot_in_mode(self.tuning.alignment_mode, cancel).await
    }

    /// [`one_shot`](Self::one_shot) with an explicit alignment mode.
    pub async fn one_shot_in_mode(
        &self,
        mode: u32,
        cancel: &CancellationToken,
    ) -> LinkResult<AlignmentStatus> {
        let target = Quantity::nanometers(self.tuning.alignment_wavelength_nm);
        let outcome = self.tune(target, cancel).await?;
        if !outcome.is_converged() {
            warn!(target_nm = target.to_nanometers(), %outcome, "Alignment wavelength not reached");
        }
        let status = self.beam_alignment(mode).await?;
        info!(mode, ?status, "One-shot alignment complete");
        Ok(status)
    }

    /// True while the controller link is up.
    pub async fn is_established(&self) -> bool {
        self.session.lock().await.is_established()
    }

    /// Snapshot of recent exchanges.
    pub async fn diagnostics(&self) -> DiagnosticLog {
        self.session.lock().await.diagnostics().clone()
    }

    /// Close the link. Safe to call repeatedly.
    pub async fn close(&self) {
        self.session.lock().await.close().await;
    }

    fn check_range(&self, wavelength_nm: f64) -> LinkResult<()> {
        let (min_nm, max_nm) = self.tuning.wavelength_range();
        if !(min_nm..=max_nm).contains(&wavelength_nm) {
            return Err(LinkError::OutOfRange {
                value_nm: wavelength_nm,
                min_nm,
                max_nm,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl WavelengthTunable for TunableLaser {
    async fn set_wavelength(&self, wavelength_nm: f64) -> Result<()> {
        let outcome = self
            .tune(Quantity::nanometers(wavelength_nm), &CancellationToken::new())
            .await?;
        match outcome {
            TuningOutcome::Converged(_) => Ok(()),
            other => Err(anyhow!("Tuning to {} nm {}", wavelength_nm, other)),
        }
    }

    async fn get_wavelength(&self) -> Result<f64> {
        let reading = self.read_wavelength().await?;
        reading
            .wavelength
            .map(Quantity::to_nanometers)
            .ok_or_else(|| anyhow!("Controller reported no wavelength (status {})", reading.status))
    }

    fn wavelength_range(&self) -> (f64, f64) {
        self.tuning.wavelength_range()
    }
}
