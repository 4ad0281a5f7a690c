//! Hardware capability traits.
//!
//! Code that only needs to move a wavelength depends on [`WavelengthTunable`]
//! rather than on a concrete driver, so scans and tests can swap devices.
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors

use anyhow::Result;
use async_trait::async_trait;

/// Capability: Wavelength Tuning
///
/// Devices with tunable wavelength output (lasers, monochromators, OPOs).
///
/// # Contract
/// - Wavelength is in nanometers (nm)
/// - `set_wavelength()` returns once the device holds the new wavelength
/// - Implementations validate the wavelength against their range before
///   talking to the device
#[async_trait]
pub trait WavelengthTunable: Send + Sync {
    /// Set output wavelength
    ///
    /// # Returns
    /// - Ok(()) once the device reports it holds the target
    /// - Err if the value is out of range, the device refused it, or tuning
    ///   did not converge
    async fn set_wavelength(&self, wavelength_nm: f64) -> Result<()>;

    /// Get current wavelength in nanometers
    async fn get_wavelength(&self) -> Result<f64>;

    /// Get wavelength tuning range as `(min_nm, max_nm)`
    ///
    /// Defaults to a typical NIR range. Override for specific devices.
    fn wavelength_range(&self) -> (f64, f64) {
        (700.0, 1000.0)
    }
}
