//! Progress snapshots and events published by a running session.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use super::state::{FaultDescriptor, SessionState};

/// Snapshot of a session's progress.
///
/// Reports are replaced wholesale at publish points (session start, each
/// committed point, state changes). Reading the report never changes it, so
/// repeated reads without an intervening publish return identical values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    /// Session the report belongs to
    pub session_id: Uuid,
    /// Session state at publish time
    pub state: SessionState,
    /// Grid points processed so far (including faulted ones)
    pub completed_points: usize,
    /// Grid points in the plan
    pub total_points: usize,
    /// Points that ended with a point-level fault
    pub faulted_points: usize,
    /// Last position reported by the positioner (azimuth, elevation)
    pub current_angle: Option<(f64, f64)>,
    /// Time spent in the acquisition loop at publish time
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
    /// Remaining time extrapolated from the mean point duration
    #[serde(with = "humantime_serde")]
    pub estimated_remaining: Option<Duration>,
    /// Fraction of the current cut (pass of the inner axis) completed, 0.0 to 1.0
    pub cut_progress: f64,
    /// Most recent fault, point-level or terminal
    pub last_fault: Option<FaultDescriptor>,
}

impl ProgressReport {
    /// Report for a session that has not processed any point.
    pub fn new(session_id: Uuid, total_points: usize) -> Self {
        Self {
            session_id,
            state: SessionState::Idle,
            completed_points: 0,
            total_points,
            faulted_points: 0,
            current_angle: None,
            elapsed: Duration::ZERO,
            estimated_remaining: None,
            cut_progress: 0.0,
            last_fault: None,
        }
    }

    /// Fraction of the grid processed, 0.0 to 1.0.
    pub fn fraction_complete(&self) -> f64 {
        if self.total_points == 0 {
            return 0.0;
        }
        self.completed_points as f64 / self.total_points as f64
    }

    /// Event form of this report.
    pub fn event(&self) -> ProgressEvent {
        ProgressEvent {
            session_id: self.session_id,
            state: self.state,
            completed_points: self.completed_points,
            total_points: self.total_points,
            current_angle: self.current_angle,
            last_fault: self.last_fault.clone(),
        }
    }
}

/// Event broadcast to subscribers at every publish point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Session the event belongs to
    pub session_id: Uuid,
    /// Session state at publish time
    pub state: SessionState,
    /// Grid points processed so far
    pub completed_points: usize,
    /// Grid points in the plan
    pub total_points: usize,
    /// Last position reported by the positioner
    pub current_angle: Option<(f64, f64)>,
    /// Most recent fault
    pub last_fault: Option<FaultDescriptor>,
}
