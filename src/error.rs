//! Custom error types for the application.
//!
//! This module defines the error taxonomy shared by the plan validator, the
//! hardware capability traits and the scan engine. Using the `thiserror` crate,
//! it provides a centralized and consistent way to describe what went wrong,
//! from a malformed plan to a positioner that stopped answering.
//!
//! ## Error Hierarchy
//!
//! - **`PlanError`**: a plan failed validation. Always reported before any hardware
//!   is commanded.
//! - **`PositionerError`**: returned by [`Positioner`](crate::hardware::Positioner)
//!   drivers. Handled per-point by the fault policy.
//! - **`InstrumentError`**: returned by
//!   [`NetworkAnalyzer`](crate::hardware::NetworkAnalyzer) drivers. Handled per-point
//!   by the fault policy.
//! - **`ScanError`**: the application-level error returned by engine and session
//!   calls. Wraps the above with `#[from]` so `?` works across layers.
//!
//! Point-level and session-level faults are *not* errors of the engine API: they
//! are recorded as [`FaultDescriptor`](crate::experiment::FaultDescriptor)s in the
//! dataset and progress stream, and the session still ends with a usable dataset.

use thiserror::Error;

use crate::experiment::SessionState;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, ScanError>;

/// Positioner axis, used to qualify positioner errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    /// Azimuth (rotation about the vertical axis).
    Azimuth,
    /// Elevation (tilt).
    Elevation,
}

impl std::fmt::Display for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Axis::Azimuth => write!(f, "azimuth"),
            Axis::Elevation => write!(f, "elevation"),
        }
    }
}

/// Errors reported by a positioner driver.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PositionerError {
    #[error("positioner timed out before reporting arrival")]
    Timeout,

    #[error("{axis} target {angle_deg}° is outside the travel range")]
    OutOfRange { axis: Axis, angle_deg: f64 },

    #[error("positioner communication lost: {0}")]
    CommunicationLost(String),

    #[error("stall detected on {axis} axis")]
    StallDetected { axis: Axis },

    #[error("motion halted by stop command")]
    Halted,

    #[error("positioner does not support {0}")]
    Unsupported(&'static str),
}

/// Errors reported by a network analyzer driver.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InstrumentError {
    #[error("analyzer communication lost: {0}")]
    CommunicationLost(String),

    #[error("analyzer timed out waiting for sweep")]
    Timeout,

    #[error("malformed analyzer response: {0}")]
    MalformedResponse(String),
}

/// Reasons a scan plan is rejected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlanError {
    #[error("{axis} range has non-finite bounds or step")]
    NonFiniteRange { axis: Axis },

    #[error("{axis} step must be nonzero")]
    ZeroStep { axis: Axis },

    #[error("{axis} step {step}° points away from stop {stop}° (start {start}°)")]
    StepDirection {
        axis: Axis,
        start: f64,
        stop: f64,
        step: f64,
    },

    #[error("{axis} step {step}° does not evenly divide the span {span}°")]
    UnevenStep { axis: Axis, span: f64, step: f64 },

    #[error("frequency list is empty")]
    EmptyFrequencies,

    #[error("frequency {0} Hz is not a positive finite value")]
    NonPositiveFrequency(f64),

    #[error("frequencies must be strictly increasing ({previous} Hz followed by {next} Hz)")]
    NonIncreasingFrequencies { previous: f64, next: f64 },

    #[error("cannot parse frequency '{0}'")]
    FrequencyParse(String),

    #[error("linear sweep needs at least one point")]
    EmptySweep,

    #[error("polarization list is empty")]
    EmptyPolarizations,

    #[error("duplicate polarization label '{0}'")]
    DuplicatePolarization(String),

    #[error("polarization '{label}' has invalid S-parameter ports S{out_port}{in_port}")]
    InvalidPorts {
        label: String,
        out_port: u8,
        in_port: u8,
    },

    #[error("averages must be at least 1")]
    ZeroAverages,

    #[error("plan has more than {limit} positions on the {axis} axis")]
    TooManyAxisPoints { axis: Axis, limit: usize },

    #[error("plan has more than {limit} grid points")]
    TooManyPoints { limit: usize },
}

/// Application-level error for engine, session and configuration calls.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Invalid plan: {0}")]
    InvalidPlan(#[from] PlanError),

    #[error("Cannot {operation}: session is {state}")]
    InvalidTransition {
        operation: &'static str,
        state: SessionState,
    },

    #[error("Sample already recorded at az {azimuth}°, el {elevation}°, {frequency} Hz, {polarization}")]
    DuplicateSample {
        azimuth: f64,
        elevation: f64,
        frequency: f64,
        polarization: String,
    },

    #[error("No grid point at az {azimuth}°, el {elevation}° in this plan")]
    UnknownGridPoint { azimuth: f64, elevation: f64 },

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Scan task failed: {0}")]
    Join(String),

    #[error("Positioner error: {0}")]
    Positioner(#[from] PositionerError),

    #[error("Instrument error: {0}")]
    Instrument(#[from] InstrumentError),
}

impl From<figment::Error> for ScanError {
    fn from(err: figment::Error) -> Self {
        ScanError::Config(Box::new(err))
    }
}

impl PositionerError {
    /// True for errors that indicate the channel to the device is gone.
    pub fn is_communication_lost(&self) -> bool {
        matches!(self, PositionerError::CommunicationLost(_))
    }
}

impl InstrumentError {
    /// True for errors that indicate the channel to the device is gone.
    pub fn is_communication_lost(&self) -> bool {
        matches!(self, InstrumentError::CommunicationLost(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_error_converts_into_invalid_plan() {
        let err: ScanError = PlanError::ZeroStep {
            axis: Axis::Azimuth,
        }
        .into();
        assert!(matches!(err, ScanError::InvalidPlan(PlanError::ZeroStep { .. })));
        assert_eq!(err.to_string(), "Invalid plan: azimuth step must be nonzero");
    }

    #[test]
    fn communication_lost_is_detected_per_device() {
        assert!(PositionerError::CommunicationLost("port closed".into()).is_communication_lost());
        assert!(!PositionerError::Timeout.is_communication_lost());
        assert!(InstrumentError::CommunicationLost("gpib".into()).is_communication_lost());
        assert!(!InstrumentError::MalformedResponse("short".into()).is_communication_lost());
    }

    #[test]
    fn transition_error_names_state() {
        let err = ScanError::InvalidTransition {
            operation: "resume",
            state: SessionState::Completed,
        };
        assert_eq!(err.to_string(), "Cannot resume: session is Completed");
    }
}
