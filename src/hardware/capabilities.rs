//! Hardware Capabilities
//!
//! This module defines the two capability traits the scan engine drives:
//!
//! - [`Positioner`]: a two-axis (azimuth, elevation) antenna positioner
//! - [`NetworkAnalyzer`]: an instrument returning complex S-parameters per frequency
//!
//! The engine only ever talks to these traits, so a scan can run against real
//! drivers or the simulated devices in [`crate::hardware::mock`] unchanged.
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Returns a typed error so the engine can classify failures
//! - Takes `&self`; drivers use interior mutability for state
//!
//! # Example
//!
//! ```rust,ignore
//! struct TurntableDriver {
//!     port: Mutex<SerialPort>,
//! }
//!
//! #[async_trait]
//! impl Positioner for TurntableDriver {
//!     async fn move_to(&self, azimuth: f64, elevation: f64) -> Result<(), PositionerError> {
//!         let mut port = self.port.lock().await;
//!         port.write_all(format!("A{azimuth:.2}E{elevation:.2}\r").as_bytes()).await
//!             .map_err(|e| PositionerError::CommunicationLost(e.to_string()))?;
//!         // Poll status until the controller reports idle...
//!         Ok(())
//!     }
//!     // ...
//! }
//! ```

use async_trait::async_trait;
use num_complex::Complex64;

use crate::error::{InstrumentError, PositionerError};
use crate::experiment::Polarization;

/// Capability: Two-Axis Positioning
///
/// Antenna positioners holding the antenna under test.
///
/// # Contract
/// - Angles are in degrees
/// - `move_to` returns only once the positioner reports arrival
///   (or fails); the caller verifies the reported position
/// - `stop` may be called concurrently with an in-flight `move_to`, which then
///   returns [`PositionerError::Halted`]
///
/// # Thread Safety
/// - All methods are async and require `&self` (immutable reference)
/// - Interior mutability (Mutex/RwLock) should be used for state
#[async_trait]
pub trait Positioner: Send + Sync {
    /// Move to an absolute (azimuth, elevation) and wait for arrival
    ///
    /// # Returns
    /// - Ok(()) once the positioner reports arrival
    /// - Err(OutOfRange) if the target is outside the travel limits
    /// - Err(Timeout / StallDetected) if motion did not complete
    /// - Err(Halted) if `stop` interrupted the move
    async fn move_to(&self, azimuth: f64, elevation: f64) -> Result<(), PositionerError>;

    /// Current (azimuth, elevation) as reported by the controller
    async fn current_position(&self) -> Result<(f64, f64), PositionerError>;

    /// Halt any motion immediately
    async fn stop(&self) -> Result<(), PositionerError>;

    /// Move relative to the current position
    ///
    /// # Default Implementation
    /// Reads the current position and issues an absolute move.
    async fn move_by(&self, d_azimuth: f64, d_elevation: f64) -> Result<(), PositionerError> {
        let (azimuth, elevation) = self.current_position().await?;
        self.move_to(azimuth + d_azimuth, elevation + d_elevation).await
    }

    /// Redefine the current physical position as (0°, 0°)
    ///
    /// Later moves and position reports are in the new reference frame.
    ///
    /// # Default Implementation
    /// Returns [`PositionerError::Unsupported`]; controllers without a zero
    /// command keep their factory reference.
    async fn set_zero(&self) -> Result<(), PositionerError> {
        Err(PositionerError::Unsupported("set_zero"))
    }
}

/// Capability: Vector Network Analysis
///
/// Instruments measuring complex S-parameters at a list of frequencies.
///
/// # Contract
/// - `measure` returns exactly one value per requested frequency, in order
/// - The polarization selects the port pair (and switch setting) to measure
#[async_trait]
pub trait NetworkAnalyzer: Send + Sync {
    /// Run one sweep and return the complex value at every frequency
    ///
    /// # Arguments
    /// * `frequencies` - Frequencies in Hz, strictly increasing
    /// * `polarization` - Polarization (and S-parameter) to measure
    async fn measure(
        &self,
        frequencies: &[f64],
        polarization: &Polarization,
    ) -> Result<Vec<Complex64>, InstrumentError>;

    /// Abort any sweep in progress
    ///
    /// # Default Implementation
    /// Does nothing; instruments without an abort command simply finish the sweep.
    async fn stop(&self) -> Result<(), InstrumentError> {
        Ok(())
    }
}
