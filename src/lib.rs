//! # Chamber DAQ Core Library
//!
//! This crate is the core library of the `chamber-daq` application. It measures
//! antenna radiation patterns in an anechoic chamber: a two-axis positioner is
//! stepped through an azimuth/elevation grid while a network analyzer captures
//! complex S-parameters at every point, and the results are assembled into an
//! indexable pattern dataset.
//!
//! ## Crate Structure
//!
//! - **`config`**: Figment-based loading of the chamber configuration (TOML file plus
//!   `CHAMBER_` environment overrides). See `config::ChamberConfig`.
//! - **`data`**: `MeasurementSample` and the `PatternDataset` accumulator with its
//!   lookup, completeness and cut views.
//! - **`error`**: The `thiserror` error taxonomy (`PlanError`, `PositionerError`,
//!   `InstrumentError`, `ScanError`).
//! - **`experiment`**: Scan plans, the fault policy, and the `ScanEngine` that runs a
//!   plan as a pausable, cancellable `ScanSession`.
//! - **`hardware`**: The `Positioner` and `NetworkAnalyzer` capability traits,
//!   simulated devices, and manual jog helpers.
//! - **`logging`**: `tracing-subscriber` setup.
//! - **`units`**: Frequency parsing (`"2.4 GHz"`) and formatting.

pub mod config;
pub mod data;
pub mod error;
pub mod experiment;
pub mod hardware;
pub mod logging;
pub mod units;

pub use error::{AppResult, ScanError};
pub use experiment::{ScanEngine, ScanSession};
