//! Chamber hardware abstractions.
//!
//! - [`capabilities`]: the `Positioner` and `NetworkAnalyzer` traits
//! - [`mock`]: simulated devices for tests and dry runs
//! - [`jog`]: manual positioner moves outside a scan

pub mod capabilities;
pub mod jog;
pub mod mock;

pub use capabilities::{NetworkAnalyzer, Positioner};
pub use mock::{Corruption, MotionProfile, SimulatedAnalyzer, SimulatedPositioner};
