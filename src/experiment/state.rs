//! Scan session lifecycle and fault descriptors.
//!
//! # State Machine
//!
//! ```text
//! Idle ──start──> Running ──grid exhausted──> Completed
//!                   │   ▲
//!            pause()│   │resume()
//!                   ▼   │
//!                  Paused
//!
//! Running/Paused ──cancel()──────────────────> Aborted
//! Running        ──communication lost /
//!                  repeated point faults─────> Faulted
//! ```
//!
//! `Completed`, `Aborted` and `Faulted` are terminal. Every transition into
//! `Aborted` or `Faulted` carries a [`FaultDescriptor`] explaining the cause.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::plan::GridPoint;

/// Scan session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Session created, loop not started
    Idle,
    /// Acquisition loop executing
    Running,
    /// Stopped between points, can be resumed
    Paused,
    /// Every grid point processed
    Completed,
    /// Cancelled by the operator
    Aborted,
    /// Ended by a session-level fault
    Faulted,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::Running => write!(f, "Running"),
            SessionState::Paused => write!(f, "Paused"),
            SessionState::Completed => write!(f, "Completed"),
            SessionState::Aborted => write!(f, "Aborted"),
            SessionState::Faulted => write!(f, "Faulted"),
        }
    }
}

impl SessionState {
    /// True once the session can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Aborted | SessionState::Faulted
        )
    }

    /// Check if the state allows pausing.
    pub fn can_pause(&self) -> bool {
        matches!(self, SessionState::Running | SessionState::Paused)
    }

    /// Check if the state allows cancelling.
    pub fn can_cancel(&self) -> bool {
        matches!(self, SessionState::Running | SessionState::Paused)
    }
}

/// What caused a point-level or session-level fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultCause {
    /// Positioner failed to reach the point
    Positioning,
    /// Analyzer failed to deliver a sweep
    Measurement,
    /// A device stopped answering
    CommunicationLost,
    /// A delivered sample was non-finite
    InvalidSample,
    /// Too many consecutive faulted points
    RepeatedFaults,
    /// Operator cancelled the session
    Cancelled,
}

impl std::fmt::Display for FaultCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            FaultCause::Positioning => "positioning",
            FaultCause::Measurement => "measurement",
            FaultCause::CommunicationLost => "communication lost",
            FaultCause::InvalidSample => "invalid sample",
            FaultCause::RepeatedFaults => "repeated faults",
            FaultCause::Cancelled => "cancelled",
        };
        f.write_str(text)
    }
}

/// Description of a fault, carried in progress reports and the dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultDescriptor {
    /// Fault category
    pub cause: FaultCause,
    /// Human-readable detail (usually the driver error)
    pub message: String,
    /// Raster index of the affected point
    pub point_index: Option<usize>,
    /// Target azimuth of the affected point
    pub azimuth: Option<f64>,
    /// Target elevation of the affected point
    pub elevation: Option<f64>,
    /// Polarization being measured, for measurement faults
    pub polarization: Option<String>,
    /// Driver calls made before giving up
    pub attempts: u32,
    /// When the fault was recorded
    pub timestamp: DateTime<Utc>,
}

impl FaultDescriptor {
    /// Create a descriptor with no location.
    pub fn new(cause: FaultCause, message: impl Into<String>) -> Self {
        Self {
            cause,
            message: message.into(),
            point_index: None,
            azimuth: None,
            elevation: None,
            polarization: None,
            attempts: 0,
            timestamp: Utc::now(),
        }
    }

    /// Attach the grid point the fault happened at.
    pub fn at_point(mut self, point: &GridPoint) -> Self {
        self.point_index = Some(point.index);
        self.azimuth = Some(point.azimuth);
        self.elevation = Some(point.elevation);
        self
    }

    /// Attach the polarization being measured.
    pub fn with_polarization(mut self, label: &str) -> Self {
        self.polarization = Some(label.to_string());
        self
    }

    /// Record how many driver calls were made.
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}

impl std::fmt::Display for FaultDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.cause, self.message)?;
        if let (Some(index), Some(az), Some(el)) = (self.point_index, self.azimuth, self.elevation)
        {
            write!(f, " at point {} (az {}°, el {}°)", index, az, el)?;
        }
        if let Some(pol) = &self.polarization {
            write!(f, " [{}]", pol)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        assert!(SessionState::Running.can_pause());
        assert!(SessionState::Paused.can_pause());
        assert!(!SessionState::Idle.can_pause());
        assert!(!SessionState::Completed.can_pause());

        assert!(SessionState::Paused.can_cancel());
        assert!(!SessionState::Faulted.can_cancel());

        for state in [
            SessionState::Completed,
            SessionState::Aborted,
            SessionState::Faulted,
        ] {
            assert!(state.is_terminal());
        }
        assert!(!SessionState::Paused.is_terminal());
    }

    #[test]
    fn test_descriptor_display() {
        let point = GridPoint {
            index: 3,
            azimuth_index: 3,
            elevation_index: 0,
            azimuth: 270.0,
            elevation: 0.0,
        };
        let fault = FaultDescriptor::new(FaultCause::Measurement, "analyzer timed out")
            .at_point(&point)
            .with_polarization("H")
            .with_attempts(3);

        assert_eq!(fault.attempts, 3);
        assert_eq!(
            fault.to_string(),
            "measurement: analyzer timed out at point 3 (az 270°, el 0°) [H]"
        );
    }

    #[test]
    fn test_descriptor_serializes() {
        let fault = FaultDescriptor::new(FaultCause::CommunicationLost, "port closed");
        let json = serde_json::to_value(&fault).unwrap();
        assert_eq!(json["cause"], "communication_lost");
        assert_eq!(json["message"], "port closed");
        assert!(json["point_index"].is_null());
    }
}
