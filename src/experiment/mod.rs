//! Scan planning and execution.
//!
//! - [`plan`]: plan definitions, validation and lazy grid generation
//! - [`state`]: session lifecycle and fault descriptors
//! - [`fault_policy`]: per-class retry rules
//! - [`progress`]: progress reports and events
//! - [`run_engine`]: the engine that drives hardware through a plan

pub mod fault_policy;
pub mod plan;
pub mod progress;
pub mod run_engine;
pub mod state;

pub use fault_policy::{ExhaustionAction, FailureClass, FaultPolicy, RetryPolicy};
pub use plan::{
    AngleRange, AxisGrid, FrequencySpec, FrequencyValue, GridIter, GridPoint, PlanDefinition,
    Polarization, PolarizationDefinition, RasterOrder, SParameter, ScanPlan, MAX_AXIS_POINTS,
    MAX_GRID_POINTS,
};
pub use progress::{ProgressEvent, ProgressReport};
pub use run_engine::{EngineSettings, ScanEngine, ScanHardware, ScanOutcome, ScanSession};
pub use state::{FaultCause, FaultDescriptor, SessionState};
