//! Mock Hardware Implementations
//!
//! Provides simulated chamber hardware for testing without a positioner or
//! analyzer attached. All mock devices use async-safe operations
//! (tokio::time::sleep, not std::thread::sleep).
//!
//! # Available Mocks
//!
//! - `SimulatedPositioner` - two-axis positioner with travel limits and timed moves
//! - `SimulatedAnalyzer` - network analyzer returning deterministic S-parameters
//!
//! Both devices accept scripted failures so fault handling can be exercised:
//! a queue consumed by the next calls, or an error pinned to a specific call
//! number (1-based).

use async_trait::async_trait;
use num_complex::Complex64;
use std::collections::{HashMap, VecDeque};
use std::f64::consts::PI;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::time::{sleep, Duration};
use tracing::debug;

use crate::error::{Axis, InstrumentError, PositionerError};
use crate::experiment::Polarization;
use crate::hardware::capabilities::{NetworkAnalyzer, Positioner};

// =============================================================================
// SimulatedPositioner - Two-Axis Positioner
// =============================================================================

/// How long a simulated move takes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotionProfile {
    /// Moves complete immediately
    Instant,
    /// Every move takes the same time
    Fixed(Duration),
    /// Both axes slew simultaneously at this rate (degrees/second)
    SlewRate(f64),
}

impl MotionProfile {
    fn duration_for(&self, travel_deg: f64) -> Duration {
        match *self {
            MotionProfile::Instant => Duration::ZERO,
            MotionProfile::Fixed(duration) => duration,
            MotionProfile::SlewRate(rate) if rate > 0.0 && rate.is_finite() => {
                Duration::from_secs_f64(travel_deg / rate)
            }
            MotionProfile::SlewRate(_) => Duration::ZERO,
        }
    }
}

/// Simulated azimuth/elevation positioner
///
/// Simulates a positioner with:
/// - Travel limits (default azimuth ±360°, elevation ±90°)
/// - Configurable move timing
/// - An optional arrival offset to emulate a positioner that stops short
/// - `stop()` interrupting an in-flight move with [`PositionerError::Halted`]
///
/// # Example
///
/// ```rust,ignore
/// let positioner = SimulatedPositioner::new().with_slew_rate(90.0);
/// positioner.move_to(90.0, 0.0).await?; // Takes ~1 second
/// assert_eq!(positioner.current_position().await?, (90.0, 0.0));
/// ```
pub struct SimulatedPositioner {
    position: RwLock<(f64, f64)>,
    motion: MotionProfile,
    azimuth_limits: (f64, f64),
    elevation_limits: (f64, f64),
    arrival_offset: RwLock<(f64, f64)>,
    queued_failures: Mutex<VecDeque<PositionerError>>,
    scheduled_failures: Mutex<HashMap<usize, PositionerError>>,
    targets: Mutex<Vec<(f64, f64)>>,
    move_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    halt: Notify,
}

impl SimulatedPositioner {
    /// Create a positioner at (0°, 0°) with instant moves
    pub fn new() -> Self {
        Self {
            position: RwLock::new((0.0, 0.0)),
            motion: MotionProfile::Instant,
            azimuth_limits: (-360.0, 360.0),
            elevation_limits: (-90.0, 90.0),
            arrival_offset: RwLock::new((0.0, 0.0)),
            queued_failures: Mutex::new(VecDeque::new()),
            scheduled_failures: Mutex::new(HashMap::new()),
            targets: Mutex::new(Vec::new()),
            move_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            halt: Notify::new(),
        }
    }

    /// Start at the given position
    pub fn with_position(mut self, azimuth: f64, elevation: f64) -> Self {
        self.position = RwLock::new((azimuth, elevation));
        self
    }

    /// Slew both axes at `deg_per_sec`
    pub fn with_slew_rate(mut self, deg_per_sec: f64) -> Self {
        self.motion = MotionProfile::SlewRate(deg_per_sec);
        self
    }

    /// Make every move take `duration`
    pub fn with_move_time(mut self, duration: Duration) -> Self {
        self.motion = MotionProfile::Fixed(duration);
        self
    }

    /// Override the travel limits (min, max) in degrees
    pub fn with_limits(mut self, azimuth: (f64, f64), elevation: (f64, f64)) -> Self {
        self.azimuth_limits = azimuth;
        self.elevation_limits = elevation;
        self
    }

    /// Land every move `(d_azimuth, d_elevation)` away from its target
    pub fn with_arrival_offset(mut self, d_azimuth: f64, d_elevation: f64) -> Self {
        self.arrival_offset = RwLock::new((d_azimuth, d_elevation));
        self
    }

    /// Change the arrival offset at runtime
    pub async fn set_arrival_offset(&self, d_azimuth: f64, d_elevation: f64) {
        *self.arrival_offset.write().await = (d_azimuth, d_elevation);
    }

    /// Fail the next `move_to` calls with these errors, in order
    pub async fn queue_failures<I: IntoIterator<Item = PositionerError>>(&self, errors: I) {
        self.queued_failures.lock().await.extend(errors);
    }

    /// Fail the `call`-th `move_to` (1-based) with `error`
    pub async fn fail_on_call(&self, call: usize, error: PositionerError) {
        self.scheduled_failures.lock().await.insert(call, error);
    }

    /// Number of `move_to` calls so far
    pub fn move_count(&self) -> usize {
        self.move_calls.load(Ordering::SeqCst)
    }

    /// Number of `stop` calls so far
    pub fn stop_count(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    /// Every `move_to` target in call order
    pub async fn targets(&self) -> Vec<(f64, f64)> {
        self.targets.lock().await.clone()
    }

    fn check_limits(&self, azimuth: f64, elevation: f64) -> Result<(), PositionerError> {
        let (az_min, az_max) = self.azimuth_limits;
        if !(az_min..=az_max).contains(&azimuth) {
            return Err(PositionerError::OutOfRange {
                axis: Axis::Azimuth,
                angle_deg: azimuth,
            });
        }
        let (el_min, el_max) = self.elevation_limits;
        if !(el_min..=el_max).contains(&elevation) {
            return Err(PositionerError::OutOfRange {
                axis: Axis::Elevation,
                angle_deg: elevation,
            });
        }
        Ok(())
    }
}

impl Default for SimulatedPositioner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Positioner for SimulatedPositioner {
    async fn move_to(&self, azimuth: f64, elevation: f64) -> Result<(), PositionerError> {
        // Registered before any await so a stop issued from here on halts this move
        let halted = self.halt.notified();
        tokio::pin!(halted);
        halted.as_mut().enable();

        let call = self.move_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.targets.lock().await.push((azimuth, elevation));

        if let Some(err) = self.scheduled_failures.lock().await.remove(&call) {
            debug!(call, error = %err, "SimulatedPositioner: scripted failure");
            return Err(err);
        }
        if let Some(err) = self.queued_failures.lock().await.pop_front() {
            debug!(call, error = %err, "SimulatedPositioner: queued failure");
            return Err(err);
        }
        self.check_limits(azimuth, elevation)?;

        let (current_az, current_el) = *self.position.read().await;
        let travel = (azimuth - current_az).abs().max((elevation - current_el).abs());
        let duration = self.motion.duration_for(travel);
        debug!(
            "SimulatedPositioner: Moving from ({:.2}°, {:.2}°) to ({:.2}°, {:.2}°) ({:?})",
            current_az, current_el, azimuth, elevation, duration
        );

        if !duration.is_zero() {
            tokio::select! {
                _ = sleep(duration) => {}
                _ = &mut halted => {
                    debug!("SimulatedPositioner: Move halted");
                    return Err(PositionerError::Halted);
                }
            }
        }

        let (d_az, d_el) = *self.arrival_offset.read().await;
        *self.position.write().await = (azimuth + d_az, elevation + d_el);
        Ok(())
    }

    async fn current_position(&self) -> Result<(f64, f64), PositionerError> {
        Ok(*self.position.read().await)
    }

    async fn stop(&self) -> Result<(), PositionerError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.halt.notify_waiters();
        debug!("SimulatedPositioner: Stop");
        Ok(())
    }

    async fn set_zero(&self) -> Result<(), PositionerError> {
        let mut position = self.position.write().await;
        debug!(
            "SimulatedPositioner: Zero set at ({:.2}°, {:.2}°)",
            position.0, position.1
        );
        *position = (0.0, 0.0);
        Ok(())
    }
}

// =============================================================================
// SimulatedAnalyzer - Network Analyzer
// =============================================================================

/// Corruption applied to one analyzer response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corruption {
    /// Replace the value at this frequency index with NaN
    NonFinite {
        /// Frequency index to corrupt
        index: usize,
    },
    /// Drop the last value of the response
    Truncated,
}

/// Simulated network analyzer with deterministic responses
///
/// Without a coupled positioner the response at frequency `f` for port pair
/// `Sij` is `f / 1 GHz + j·(10i + j) / 100`, so tests can predict every sample.
/// With [`SimulatedAnalyzer::with_pattern`] the magnitude follows a dipole
/// pattern `|cos(el)·cos(az)|` at the positioner's current angle.
///
/// # Example
///
/// ```rust,ignore
/// let analyzer = SimulatedAnalyzer::new();
/// let values = analyzer.measure(&[1e9], &polarization).await?;
/// assert_eq!(values[0], Complex64::new(1.0, 0.21));
/// ```
pub struct SimulatedAnalyzer {
    latency: Duration,
    pattern_source: Option<Arc<SimulatedPositioner>>,
    queued_failures: Mutex<VecDeque<InstrumentError>>,
    scheduled_failures: Mutex<HashMap<usize, InstrumentError>>,
    corruptions: Mutex<HashMap<usize, Corruption>>,
    measured: Mutex<Vec<String>>,
    measure_calls: AtomicUsize,
    stop_calls: AtomicUsize,
}

impl SimulatedAnalyzer {
    /// Create an analyzer with zero sweep latency
    pub fn new() -> Self {
        Self {
            latency: Duration::ZERO,
            pattern_source: None,
            queued_failures: Mutex::new(VecDeque::new()),
            scheduled_failures: Mutex::new(HashMap::new()),
            corruptions: Mutex::new(HashMap::new()),
            measured: Mutex::new(Vec::new()),
            measure_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
        }
    }

    /// Take `latency` per sweep
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Shape responses with a dipole pattern at the positioner's angle
    pub fn with_pattern(mut self, positioner: Arc<SimulatedPositioner>) -> Self {
        self.pattern_source = Some(positioner);
        self
    }

    /// Fail the next `measure` calls with these errors, in order
    pub async fn queue_failures<I: IntoIterator<Item = InstrumentError>>(&self, errors: I) {
        self.queued_failures.lock().await.extend(errors);
    }

    /// Fail the `call`-th `measure` (1-based) with `error`
    pub async fn fail_on_call(&self, call: usize, error: InstrumentError) {
        self.scheduled_failures.lock().await.insert(call, error);
    }

    /// Corrupt the response of the `call`-th `measure` (1-based)
    pub async fn corrupt_call(&self, call: usize, corruption: Corruption) {
        self.corruptions.lock().await.insert(call, corruption);
    }

    /// Number of `measure` calls so far
    pub fn measure_count(&self) -> usize {
        self.measure_calls.load(Ordering::SeqCst)
    }

    /// Number of `stop` calls so far
    pub fn stop_count(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    /// Polarization label of every `measure` call in call order
    pub async fn measured_polarizations(&self) -> Vec<String> {
        self.measured.lock().await.clone()
    }

    /// Value returned for `frequency` and `polarization` without pattern shaping
    pub fn synthetic_response(frequency: f64, polarization: &Polarization) -> Complex64 {
        let ports = polarization.sparameter();
        let code = f64::from(ports.out_port) * 10.0 + f64::from(ports.in_port);
        Complex64::new(frequency / 1e9, code / 100.0)
    }

    fn pattern_response(frequency: f64, azimuth: f64, elevation: f64) -> Complex64 {
        let gain = (elevation.to_radians().cos() * azimuth.to_radians().cos())
            .abs()
            .max(1e-3);
        // 1 ns of cable delay
        let phase = -2.0 * PI * frequency * 1e-9;
        Complex64::from_polar(gain, phase)
    }
}

impl Default for SimulatedAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NetworkAnalyzer for SimulatedAnalyzer {
    async fn measure(
        &self,
        frequencies: &[f64],
        polarization: &Polarization,
    ) -> Result<Vec<Complex64>, InstrumentError> {
        let call = self.measure_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.measured
            .lock()
            .await
            .push(polarization.label().to_string());

        if let Some(err) = self.scheduled_failures.lock().await.remove(&call) {
            debug!(call, error = %err, "SimulatedAnalyzer: scripted failure");
            return Err(err);
        }
        if let Some(err) = self.queued_failures.lock().await.pop_front() {
            debug!(call, error = %err, "SimulatedAnalyzer: queued failure");
            return Err(err);
        }

        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }

        let mut values: Vec<Complex64> = match &self.pattern_source {
            Some(positioner) => {
                let (azimuth, elevation) = positioner.current_position().await.map_err(|e| {
                    InstrumentError::MalformedResponse(format!("pattern source: {}", e))
                })?;
                frequencies
                    .iter()
                    .map(|&f| Self::pattern_response(f, azimuth, elevation))
                    .collect()
            }
            None => frequencies
                .iter()
                .map(|&f| Self::synthetic_response(f, polarization))
                .collect(),
        };

        match self.corruptions.lock().await.remove(&call) {
            Some(Corruption::NonFinite { index }) => {
                if let Some(value) = values.get_mut(index) {
                    *value = Complex64::new(f64::NAN, f64::NAN);
                }
            }
            Some(Corruption::Truncated) => {
                values.pop();
            }
            None => {}
        }

        debug!(
            call,
            polarization = polarization.label(),
            points = values.len(),
            "SimulatedAnalyzer: Sweep complete"
        );
        Ok(values)
    }

    async fn stop(&self) -> Result<(), InstrumentError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        debug!("SimulatedAnalyzer: Stop");
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
