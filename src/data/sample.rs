//! A single complex measurement.

use chrono::{DateTime, Utc};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// One complex S-parameter value at a grid point, frequency and polarization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementSample {
    /// Raster index of the grid point
    pub point_index: usize,
    /// Target azimuth in degrees
    pub azimuth: f64,
    /// Target elevation in degrees
    pub elevation: f64,
    /// Frequency in Hz
    pub frequency: f64,
    /// Polarization label
    pub polarization: String,
    /// Averaged complex value; NaN when `valid` is false
    pub value: Complex64,
    /// False when the analyzer delivered a non-finite value
    pub valid: bool,
    /// When the last sweep contributing to this value finished
    pub captured_at: DateTime<Utc>,
}

impl MeasurementSample {
    /// Magnitude in dB (`20 log10 |value|`).
    pub fn magnitude_db(&self) -> f64 {
        20.0 * self.value.norm().log10()
    }

    /// Phase in degrees, in (-180, 180].
    pub fn phase_deg(&self) -> f64 {
        self.value.arg().to_degrees()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(value: Complex64) -> MeasurementSample {
        MeasurementSample {
            point_index: 0,
            azimuth: 0.0,
            elevation: 0.0,
            frequency: 1e9,
            polarization: "H".into(),
            value,
            valid: true,
            captured_at: Utc::now(),
        }
    }

    #[test]
    fn magnitude_and_phase() {
        let s = sample(Complex64::new(0.0, 0.1));
        assert!((s.magnitude_db() - -20.0).abs() < 1e-9);
        assert!((s.phase_deg() - 90.0).abs() < 1e-9);

        let unity = sample(Complex64::new(-1.0, 0.0));
        assert!(unity.magnitude_db().abs() < 1e-12);
        assert!((unity.phase_deg() - 180.0).abs() < 1e-9);
    }
}
