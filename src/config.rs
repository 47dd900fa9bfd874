//! Chamber configuration using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (base configuration, see `config/chamber.toml`)
//! 2. environment variables prefixed with `CHAMBER_`, nested keys separated
//!    by `__` (e.g. `CHAMBER_APPLICATION__LOG_LEVEL=debug`,
//!    `CHAMBER_ENGINE__ARRIVAL_TOLERANCE_DEG=0.05`)
//!
//! Every section except `scan` has defaults.
//!
//! # Example
//! ```no_run
//! use chamber_daq::config::ChamberConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ChamberConfig::load_from("config/chamber.toml")?;
//! config.validate()?;
//! let plan = config.plan()?;
//! println!("{}: {} grid points", config.application.name, plan.total_points());
//! # Ok(())
//! # }
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{AppResult, ScanError};
use crate::experiment::{
    AngleRange, EngineSettings, FaultPolicy, FrequencySpec, PlanDefinition, ScanHardware,
    ScanPlan,
};
use crate::hardware::{SimulatedAnalyzer, SimulatedPositioner};
use crate::logging::{parse_log_level, OutputFormat};

/// Top-level chamber configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChamberConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// The scan to run
    pub scan: PlanDefinition,
    /// Engine settings
    #[serde(default)]
    pub engine: EngineSettings,
    /// Retry rules for driver failures
    #[serde(default)]
    pub fault_policy: FaultPolicy,
    /// Simulated hardware used by the CLI
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format
    pub log_format: OutputFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "chamber-daq".to_string(),
            log_level: "info".to_string(),
            log_format: OutputFormat::default(),
        }
    }
}

/// Parameters of the simulated positioner and analyzer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Positioner slew rate in degrees per second
    pub slew_rate_deg_per_sec: f64,
    /// Analyzer time per sweep
    #[serde(with = "humantime_serde")]
    pub sweep_latency: Duration,
    /// Shape analyzer responses with a dipole pattern
    pub dipole_pattern: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            slew_rate_deg_per_sec: 90.0,
            sweep_latency: Duration::from_millis(20),
            dipole_pattern: true,
        }
    }
}

impl SimulationConfig {
    /// Build the simulated devices.
    pub fn build(&self) -> ScanHardware {
        let positioner = Arc::new(SimulatedPositioner::new().with_slew_rate(self.slew_rate_deg_per_sec));
        let mut analyzer = SimulatedAnalyzer::new().with_latency(self.sweep_latency);
        if self.dipole_pattern {
            analyzer = analyzer.with_pattern(Arc::clone(&positioner));
        }
        ScanHardware::new(positioner, Arc::new(analyzer))
    }
}

impl ChamberConfig {
    /// Load configuration from a TOML file and `CHAMBER_` environment variables
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("CHAMBER_").split("__"))
            .extract()?;
        Ok(config)
    }

    /// Validate settings that serde cannot check.
    ///
    /// The scan itself is validated by [`ChamberConfig::plan`].
    pub fn validate(&self) -> AppResult<()> {
        parse_log_level(&self.application.log_level).map_err(ScanError::Configuration)?;

        let tolerance = self.engine.arrival_tolerance_deg;
        if !(tolerance.is_finite() && tolerance > 0.0) {
            return Err(ScanError::Configuration(format!(
                "Invalid arrival_tolerance_deg {}. Must be a positive number of degrees",
                tolerance
            )));
        }
        if self.engine.event_capacity == 0 {
            return Err(ScanError::Configuration(
                "event_capacity must be at least 1".to_string(),
            ));
        }

        let slew = self.simulation.slew_rate_deg_per_sec;
        if !(slew.is_finite() && slew > 0.0) {
            return Err(ScanError::Configuration(format!(
                "Invalid slew_rate_deg_per_sec {}. Must be positive",
                slew
            )));
        }

        Ok(())
    }

    /// Validate the scan section into a plan.
    pub fn plan(&self) -> AppResult<ScanPlan> {
        Ok(ScanPlan::new(self.scan.clone())?)
    }

    /// Four-point azimuth cut at 1 and 2 GHz with default settings.
    pub fn simulated_default() -> Self {
        Self {
            application: ApplicationConfig::default(),
            scan: PlanDefinition::new(
                AngleRange::new(0.0, 270.0, 90.0),
                AngleRange::fixed(0.0),
                FrequencySpec::list([1e9, 2e9]),
            ),
            engine: EngineSettings::default(),
            fault_policy: FaultPolicy::default(),
            simulation: SimulationConfig::default(),
        }
    }
}
