//! Per-class retry rules applied to driver failures during a scan.
//!
//! Every failed driver call is classified into a [`FailureClass`]. The class
//! selects a [`RetryPolicy`] that bounds how many times the call is repeated,
//! how long the engine waits between attempts, and what happens once the
//! retries are spent.
//!
//! # Example
//!
//! ```rust
//! use chamber_daq::experiment::{ExhaustionAction, FailureClass, FaultPolicy};
//! use std::time::Duration;
//!
//! let policy = FaultPolicy::default();
//! let rule = policy.rule(FailureClass::Positioning);
//! assert_eq!(rule.retries, 3);
//! assert_eq!(rule.delay_for(2), Duration::from_millis(200));
//! assert_eq!(
//!     policy.rule(FailureClass::CommunicationLost).on_exhaustion,
//!     ExhaustionAction::AbortSession
//! );
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::state::FaultCause;
use crate::error::{InstrumentError, PositionerError};

/// Category of a failed driver call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Move did not complete or did not arrive within tolerance
    Positioning,
    /// Analyzer sweep failed or returned a malformed response
    Measurement,
    /// Either device stopped answering
    CommunicationLost,
}

impl FailureClass {
    /// Classify a positioner error.
    pub fn of_positioner(err: &PositionerError) -> Self {
        if err.is_communication_lost() {
            FailureClass::CommunicationLost
        } else {
            FailureClass::Positioning
        }
    }

    /// Classify an analyzer error.
    pub fn of_instrument(err: &InstrumentError) -> Self {
        if err.is_communication_lost() {
            FailureClass::CommunicationLost
        } else {
            FailureClass::Measurement
        }
    }
}

impl From<FailureClass> for FaultCause {
    fn from(class: FailureClass) -> Self {
        match class {
            FailureClass::Positioning => FaultCause::Positioning,
            FailureClass::Measurement => FaultCause::Measurement,
            FailureClass::CommunicationLost => FaultCause::CommunicationLost,
        }
    }
}

/// What the engine does when a class runs out of retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionAction {
    /// Record a faulted point and continue with the next one
    SkipPoint,
    /// Stop all hardware and end the session as `Faulted`
    AbortSession,
}

/// Retry rule for one failure class.
///
/// The first call is not a retry: a rule with `retries: 3` allows up to four
/// calls. The wait before retry `n` (1-based) is `n × backoff`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first failed call. Zero disables retrying.
    pub retries: u32,

    /// Base delay of the linear backoff.
    #[serde(with = "humantime_serde")]
    pub backoff: Duration,

    /// Action taken once retries are exhausted.
    pub on_exhaustion: ExhaustionAction,
}

impl RetryPolicy {
    /// Rule that retries `retries` times with linear backoff, then skips the point.
    pub fn skip_after(retries: u32, backoff: Duration) -> Self {
        Self {
            retries,
            backoff,
            on_exhaustion: ExhaustionAction::SkipPoint,
        }
    }

    /// Rule that retries `retries` times, then aborts the session.
    pub fn abort_after(retries: u32, backoff: Duration) -> Self {
        Self {
            retries,
            backoff,
            on_exhaustion: ExhaustionAction::AbortSession,
        }
    }

    /// Wait before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.backoff.saturating_mul(retry)
    }
}

/// Complete fault policy of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultPolicy {
    /// Rule for positioning failures
    pub positioning: RetryPolicy,
    /// Rule for measurement failures
    pub measurement: RetryPolicy,
    /// Rule for lost communication
    pub communication_lost: RetryPolicy,
    /// End the session as `Faulted` after this many faulted points in a row.
    /// `None` never escalates.
    pub max_consecutive_faulted_points: Option<u32>,
}

impl Default for FaultPolicy {
    /// Three positioning retries and two measurement retries with 100 ms linear
    /// backoff, skipping the point when spent. Lost communication aborts at once.
    fn default() -> Self {
        Self {
            positioning: RetryPolicy::skip_after(3, Duration::from_millis(100)),
            measurement: RetryPolicy::skip_after(2, Duration::from_millis(100)),
            communication_lost: RetryPolicy::abort_after(0, Duration::ZERO),
            max_consecutive_faulted_points: None,
        }
    }
}

impl FaultPolicy {
    /// Rule applied to a failure class.
    pub fn rule(&self, class: FailureClass) -> &RetryPolicy {
        match class {
            FailureClass::Positioning => &self.positioning,
            FailureClass::Measurement => &self.measurement,
            FailureClass::CommunicationLost => &self.communication_lost,
        }
    }

    /// Policy without backoff delays, for simulations and tests.
    pub fn without_backoff(mut self) -> Self {
        self.positioning.backoff = Duration::ZERO;
        self.measurement.backoff = Duration::ZERO;
        self.communication_lost.backoff = Duration::ZERO;
        self
    }

    /// Escalate to a session fault after `limit` consecutive faulted points.
    pub fn with_escalation(mut self, limit: u32) -> Self {
        self.max_consecutive_faulted_points = Some(limit);
        self
    }
}
