//! Scan plans: the validated description of an angular/frequency acquisition.
//!
//! A [`PlanDefinition`] is what a configuration file or operator UI produces. It is
//! plain data and may be invalid. [`ScanPlan::new`] validates every field and
//! returns an immutable [`ScanPlan`]; an invalid definition never yields a plan, so
//! the engine can never start executing one partially.
//!
//! # Grid order
//!
//! Grid points are generated lazily in a fixed raster order chosen by
//! [`RasterOrder`]. With the default [`RasterOrder::ElevationInner`] the outer loop
//! walks azimuth and the inner loop walks elevation:
//!
//! ```text
//! index 0: (az0, el0)   index 1: (az0, el1)   ...   index E: (az1, el0) ...
//! ```
//!
//! so `grid_point(i)` is well defined and a session can resume from any index.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Axis, PlanError};
use crate::units::parse_frequency;

/// Steps may deviate from an integer division of the span by this many steps.
const STEP_TOLERANCE: f64 = 1e-6;

/// Largest number of positions on one axis.
pub const MAX_AXIS_POINTS: usize = 100_000;

/// Largest number of (azimuth, elevation) grid points in one plan.
pub const MAX_GRID_POINTS: usize = 10_000_000;

/// Relative tolerance used when matching a frequency to the plan's list.
const FREQUENCY_TOLERANCE: f64 = 1e-9;

/// Angular range `(start, stop, step)` in degrees, both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AngleRange {
    /// First angle in degrees
    pub start: f64,
    /// Last angle in degrees (inclusive)
    pub stop: f64,
    /// Increment in degrees; sign must point from start toward stop
    pub step: f64,
}

impl AngleRange {
    /// Create a range from start, stop and step.
    pub fn new(start: f64, stop: f64, step: f64) -> Self {
        Self { start, stop, step }
    }

    /// A range holding a single angle (a single-axis cut on the other axis).
    pub fn fixed(angle: f64) -> Self {
        Self {
            start: angle,
            stop: angle,
            step: 1.0,
        }
    }

    /// Validate the range and return the number of angles it produces.
    fn count(&self, axis: Axis) -> Result<usize, PlanError> {
        if !(self.start.is_finite() && self.stop.is_finite() && self.step.is_finite()) {
            return Err(PlanError::NonFiniteRange { axis });
        }
        if self.step == 0.0 {
            return Err(PlanError::ZeroStep { axis });
        }

        let span = self.stop - self.start;
        if span != 0.0 && span.signum() != self.step.signum() {
            return Err(PlanError::StepDirection {
                axis,
                start: self.start,
                stop: self.stop,
                step: self.step,
            });
        }

        let steps = span / self.step;
        if !steps.is_finite() || steps >= MAX_AXIS_POINTS as f64 {
            return Err(PlanError::TooManyAxisPoints {
                axis,
                limit: MAX_AXIS_POINTS,
            });
        }
        let whole = steps.round();
        if (steps - whole).abs() > STEP_TOLERANCE {
            return Err(PlanError::UnevenStep {
                axis,
                span,
                step: self.step,
            });
        }

        (whole as usize)
            .checked_add(1)
            .ok_or(PlanError::TooManyAxisPoints {
                axis,
                limit: MAX_AXIS_POINTS,
            })
    }
}

/// One validated axis of the grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AxisGrid {
    range: AngleRange,
    count: usize,
}

impl AxisGrid {
    /// Angle at `index` (no bounds check).
    fn angle(&self, index: usize) -> f64 {
        self.range.start + self.range.step * index as f64
    }

    /// Index of `angle` on this axis, if it falls on a grid line.
    fn index_of(&self, angle: f64) -> Option<usize> {
        if !angle.is_finite() {
            return None;
        }
        let steps = (angle - self.range.start) / self.range.step;
        let whole = steps.round();
        if (steps - whole).abs() > STEP_TOLERANCE || whole < 0.0 {
            return None;
        }
        let index = whole as usize;
        (index < self.count).then_some(index)
    }

    /// The range this axis was built from.
    pub fn range(&self) -> AngleRange {
        self.range
    }

    /// Number of angles on this axis.
    pub fn count(&self) -> usize {
        self.count
    }

    /// All angles on this axis in ascending index order.
    pub fn angles(&self) -> Vec<f64> {
        (0..self.count).map(|i| self.angle(i)).collect()
    }
}

/// Order in which the two axes are rastered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RasterOrder {
    /// Outer loop azimuth, inner loop elevation
    #[default]
    ElevationInner,
    /// Outer loop elevation, inner loop azimuth (conical cuts)
    AzimuthInner,
}

/// A frequency as written in a plan: Hz or an SI string such as `"2.4 GHz"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FrequencyValue {
    /// Frequency in Hz
    Hz(f64),
    /// Frequency string with optional SI prefix
    Text(String),
}

impl FrequencyValue {
    fn resolve(&self) -> Result<f64, PlanError> {
        match self {
            FrequencyValue::Hz(hz) => Ok(*hz),
            FrequencyValue::Text(text) => parse_frequency(text),
        }
    }
}

impl From<f64> for FrequencyValue {
    fn from(hz: f64) -> Self {
        FrequencyValue::Hz(hz)
    }
}

/// Frequency list of a plan: explicit points or a linear sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FrequencySpec {
    /// Explicit list of frequencies
    List(Vec<FrequencyValue>),
    /// Linear sweep from start to stop (inclusive) with `points` samples
    Sweep {
        /// First frequency
        start: FrequencyValue,
        /// Last frequency
        stop: FrequencyValue,
        /// Number of points
        points: usize,
    },
}

impl FrequencySpec {
    /// Explicit list of frequencies in Hz.
    pub fn list<I: IntoIterator<Item = f64>>(frequencies: I) -> Self {
        FrequencySpec::List(frequencies.into_iter().map(FrequencyValue::Hz).collect())
    }

    /// Linear sweep in Hz.
    pub fn sweep(start: f64, stop: f64, points: usize) -> Self {
        FrequencySpec::Sweep {
            start: start.into(),
            stop: stop.into(),
            points,
        }
    }

    fn resolve(&self) -> Result<Vec<f64>, PlanError> {
        let frequencies = match self {
            FrequencySpec::List(values) => values
                .iter()
                .map(FrequencyValue::resolve)
                .collect::<Result<Vec<_>, _>>()?,
            FrequencySpec::Sweep {
                start,
                stop,
                points,
            } => {
                let start = start.resolve()?;
                let stop = stop.resolve()?;
                match *points {
                    0 => return Err(PlanError::EmptySweep),
                    1 => vec![start],
                    n => {
                        let step = (stop - start) / (n - 1) as f64;
                        (0..n).map(|i| start + step * i as f64).collect()
                    }
                }
            }
        };

        if frequencies.is_empty() {
            return Err(PlanError::EmptyFrequencies);
        }
        for &f in &frequencies {
            if !(f.is_finite() && f > 0.0) {
                return Err(PlanError::NonPositiveFrequency(f));
            }
        }
        for pair in frequencies.windows(2) {
            if pair[1] <= pair[0] {
                return Err(PlanError::NonIncreasingFrequencies {
                    previous: pair[0],
                    next: pair[1],
                });
            }
        }
        Ok(frequencies)
    }
}

/// S-parameter port pair, e.g. `S21` (out port 2, in port 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SParameter {
    /// Receiving port
    pub out_port: u8,
    /// Driven port
    pub in_port: u8,
}

impl SParameter {
    /// `S21`, the transmission parameter the chamber measures by default.
    pub const S21: SParameter = SParameter {
        out_port: 2,
        in_port: 1,
    };

    /// Create a port pair.
    pub fn new(out_port: u8, in_port: u8) -> Self {
        Self { out_port, in_port }
    }
}

impl Default for SParameter {
    fn default() -> Self {
        Self::S21
    }
}

impl fmt::Display for SParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}{}", self.out_port, self.in_port)
    }
}

impl FromStr for SParameter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .trim()
            .strip_prefix(['S', 's'])
            .ok_or_else(|| format!("S-parameter '{}' must start with 'S'", s))?;
        let mut chars = digits.chars();
        match (chars.next(), chars.next(), chars.next()) {
            (Some(out_port), Some(in_port), None) => {
                let out_port = out_port
                    .to_digit(10)
                    .ok_or_else(|| format!("invalid port in '{}'", s))?;
                let in_port = in_port
                    .to_digit(10)
                    .ok_or_else(|| format!("invalid port in '{}'", s))?;
                Ok(SParameter::new(out_port as u8, in_port as u8))
            }
            _ => Err(format!("S-parameter '{}' must have two port digits", s)),
        }
    }
}

impl TryFrom<String> for SParameter {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SParameter> for String {
    fn from(value: SParameter) -> Self {
        value.to_string()
    }
}

/// Polarization entry of a plan definition.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PolarizationDefinition {
    /// Label; defaults to "Polarization N" when omitted or blank
    #[serde(default)]
    pub label: Option<String>,
    /// Port pair measured for this polarization
    #[serde(default)]
    pub sparameter: SParameter,
}

impl PolarizationDefinition {
    /// Labelled polarization measuring S21.
    pub fn new(label: &str) -> Self {
        Self {
            label: Some(label.to_string()),
            sparameter: SParameter::S21,
        }
    }

    /// Override the measured port pair.
    pub fn with_sparameter(mut self, sparameter: SParameter) -> Self {
        self.sparameter = sparameter;
        self
    }
}

/// A validated polarization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Polarization {
    label: String,
    sparameter: SParameter,
}

impl Polarization {
    /// Operator-facing label, unique within a plan.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Port pair measured for this polarization.
    pub fn sparameter(&self) -> SParameter {
        self.sparameter
    }
}

impl fmt::Display for Polarization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label, self.sparameter)
    }
}

fn default_averages() -> u32 {
    1
}

/// Unvalidated plan, as loaded from configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanDefinition {
    /// Azimuth sweep
    pub azimuth: AngleRange,
    /// Elevation sweep
    pub elevation: AngleRange,
    /// Frequencies measured at every grid point
    pub frequencies: FrequencySpec,
    /// Polarizations measured at every grid point
    pub polarizations: Vec<PolarizationDefinition>,
    /// Minimum wait after arrival before measuring
    #[serde(with = "humantime_serde", default)]
    pub settle_time: Duration,
    /// Number of sweeps averaged per polarization
    #[serde(default = "default_averages")]
    pub averages: u32,
    /// Raster order of the angular grid
    #[serde(default)]
    pub raster_order: RasterOrder,
}

impl PlanDefinition {
    /// Definition with one S21 polarization, no settle time and no averaging.
    pub fn new(azimuth: AngleRange, elevation: AngleRange, frequencies: FrequencySpec) -> Self {
        Self {
            azimuth,
            elevation,
            frequencies,
            polarizations: vec![PolarizationDefinition::default()],
            settle_time: Duration::ZERO,
            averages: 1,
            raster_order: RasterOrder::default(),
        }
    }

    /// Replace the polarization list.
    pub fn with_polarizations(mut self, polarizations: Vec<PolarizationDefinition>) -> Self {
        self.polarizations = polarizations;
        self
    }

    /// Set the settle time.
    pub fn with_settle_time(mut self, settle_time: Duration) -> Self {
        self.settle_time = settle_time;
        self
    }

    /// Set the number of averages.
    pub fn with_averages(mut self, averages: u32) -> Self {
        self.averages = averages;
        self
    }

    /// Set the raster order.
    pub fn with_raster_order(mut self, raster_order: RasterOrder) -> Self {
        self.raster_order = raster_order;
        self
    }

    /// Validate into a [`ScanPlan`].
    pub fn validate(self) -> Result<ScanPlan, PlanError> {
        ScanPlan::new(self)
    }
}

/// One (azimuth, elevation) position of the grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridPoint {
    /// Position in raster order
    pub index: usize,
    /// Index on the azimuth axis
    pub azimuth_index: usize,
    /// Index on the elevation axis
    pub elevation_index: usize,
    /// Azimuth in degrees
    pub azimuth: f64,
    /// Elevation in degrees
    pub elevation: f64,
}

/// Validated, immutable scan plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanPlan {
    azimuth: AxisGrid,
    elevation: AxisGrid,
    frequencies: Vec<f64>,
    polarizations: Vec<Polarization>,
    #[serde(with = "humantime_serde")]
    settle_time: Duration,
    averages: u32,
    raster_order: RasterOrder,
}

impl ScanPlan {
    /// Validate a definition. Fails on the first invalid field.
    pub fn new(definition: PlanDefinition) -> Result<Self, PlanError> {
        let azimuth = AxisGrid {
            count: definition.azimuth.count(Axis::Azimuth)?,
            range: definition.azimuth,
        };
        let elevation = AxisGrid {
            count: definition.elevation.count(Axis::Elevation)?,
            range: definition.elevation,
        };

        match azimuth.count.checked_mul(elevation.count) {
            Some(total) if total <= MAX_GRID_POINTS => {}
            _ => {
                return Err(PlanError::TooManyPoints {
                    limit: MAX_GRID_POINTS,
                })
            }
        }

        let frequencies = definition.frequencies.resolve()?;

        if definition.polarizations.is_empty() {
            return Err(PlanError::EmptyPolarizations);
        }
        let mut polarizations: Vec<Polarization> =
            Vec::with_capacity(definition.polarizations.len());
        for (i, pol) in definition.polarizations.into_iter().enumerate() {
            let label = match pol.label {
                Some(label) if !label.trim().is_empty() => label.trim().to_string(),
                _ => format!("Polarization {}", i + 1),
            };
            if pol.sparameter.out_port == 0 || pol.sparameter.in_port == 0 {
                return Err(PlanError::InvalidPorts {
                    label,
                    out_port: pol.sparameter.out_port,
                    in_port: pol.sparameter.in_port,
                });
            }
            if polarizations.iter().any(|p| p.label == label) {
                return Err(PlanError::DuplicatePolarization(label));
            }
            polarizations.push(Polarization {
                label,
                sparameter: pol.sparameter,
            });
        }

        if definition.averages == 0 {
            return Err(PlanError::ZeroAverages);
        }

        Ok(Self {
            azimuth,
            elevation,
            frequencies,
            polarizations,
            settle_time: definition.settle_time,
            averages: definition.averages,
            raster_order: definition.raster_order,
        })
    }

    /// Azimuth axis.
    pub fn azimuth(&self) -> &AxisGrid {
        &self.azimuth
    }

    /// Elevation axis.
    pub fn elevation(&self) -> &AxisGrid {
        &self.elevation
    }

    /// Number of azimuth positions.
    pub fn azimuth_count(&self) -> usize {
        self.azimuth.count
    }

    /// Number of elevation positions.
    pub fn elevation_count(&self) -> usize {
        self.elevation.count
    }

    /// Azimuth angles in index order.
    pub fn azimuths(&self) -> Vec<f64> {
        self.azimuth.angles()
    }

    /// Elevation angles in index order.
    pub fn elevations(&self) -> Vec<f64> {
        self.elevation.angles()
    }

    /// Frequencies in Hz, strictly increasing.
    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    /// Polarizations in measurement order.
    pub fn polarizations(&self) -> &[Polarization] {
        &self.polarizations
    }

    /// Minimum post-move wait.
    pub fn settle_time(&self) -> Duration {
        self.settle_time
    }

    /// Sweeps averaged per polarization.
    pub fn averages(&self) -> u32 {
        self.averages
    }

    /// Raster order of the grid.
    pub fn raster_order(&self) -> RasterOrder {
        self.raster_order
    }

    /// Number of grid points (`azimuth_count × elevation_count`).
    pub fn total_points(&self) -> usize {
        self.azimuth.count * self.elevation.count
    }

    /// Number of samples a fully successful scan records.
    pub fn samples_per_point(&self) -> usize {
        self.frequencies.len() * self.polarizations.len()
    }

    /// Number of points in one cut (one pass of the inner axis).
    pub fn cut_len(&self) -> usize {
        match self.raster_order {
            RasterOrder::ElevationInner => self.elevation.count,
            RasterOrder::AzimuthInner => self.azimuth.count,
        }
    }

    /// Grid point at raster `index`, or `None` past the end.
    pub fn grid_point(&self, index: usize) -> Option<GridPoint> {
        if index >= self.total_points() {
            return None;
        }
        let (azimuth_index, elevation_index) = match self.raster_order {
            RasterOrder::ElevationInner => (index / self.elevation.count, index % self.elevation.count),
            RasterOrder::AzimuthInner => (index % self.azimuth.count, index / self.azimuth.count),
        };
        Some(GridPoint {
            index,
            azimuth_index,
            elevation_index,
            azimuth: self.azimuth.angle(azimuth_index),
            elevation: self.elevation.angle(elevation_index),
        })
    }

    /// Raster index of the grid point at (`azimuth`, `elevation`).
    pub fn point_index(&self, azimuth: f64, elevation: f64) -> Option<usize> {
        let az = self.azimuth.index_of(azimuth)?;
        let el = self.elevation.index_of(elevation)?;
        Some(match self.raster_order {
            RasterOrder::ElevationInner => az * self.elevation.count + el,
            RasterOrder::AzimuthInner => el * self.azimuth.count + az,
        })
    }

    /// Position of `frequency` in the plan's list.
    pub fn frequency_index(&self, frequency: f64) -> Option<usize> {
        self.frequencies
            .iter()
            .position(|&f| (f - frequency).abs() <= f.abs() * FREQUENCY_TOLERANCE)
    }

    /// Position of the polarization labelled `label`.
    pub fn polarization_index(&self, label: &str) -> Option<usize> {
        self.polarizations.iter().position(|p| p.label == label)
    }

    /// Lazy iterator over all grid points in raster order.
    pub fn grid(&self) -> GridIter<'_> {
        self.grid_from(0)
    }

    /// Lazy iterator starting at raster index `cursor` (for resume).
    pub fn grid_from(&self, cursor: usize) -> GridIter<'_> {
        GridIter { plan: self, next: cursor }
    }
}

/// Iterator over grid points in raster order.
#[derive(Debug, Clone)]
pub struct GridIter<'a> {
    plan: &'a ScanPlan,
    next: usize,
}

impl Iterator for GridIter<'_> {
    type Item = GridPoint;

    fn next(&mut self) -> Option<Self::Item> {
        let point = self.plan.grid_point(self.next)?;
        self.next += 1;
        Some(point)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.plan.total_points().saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for GridIter<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn definition() -> PlanDefinition {
        PlanDefinition::new(
            AngleRange::new(0.0, 270.0, 90.0),
            AngleRange::new(-10.0, 10.0, 10.0),
            FrequencySpec::list([1e9, 2e9]),
        )
    }

    #[test]
    fn counts_grid_points() {
        let plan = ScanPlan::new(definition()).unwrap();
        assert_eq!(plan.azimuth().count(), 4);
        assert_eq!(plan.elevation().count(), 3);
        assert_eq!(plan.total_points(), 12);
        assert_eq!(plan.grid().len(), 12);
    }

    #[test]
    fn grid_visits_each_pair_once_elevation_inner() {
        let plan = ScanPlan::new(definition()).unwrap();
        let points: Vec<GridPoint> = plan.grid().collect();

        let unique: HashSet<(usize, usize)> = points
            .iter()
            .map(|p| (p.azimuth_index, p.elevation_index))
            .collect();
        assert_eq!(unique.len(), 12);

        assert_eq!((points[0].azimuth, points[0].elevation), (0.0, -10.0));
        assert_eq!((points[1].azimuth, points[1].elevation), (0.0, 0.0));
        assert_eq!((points[3].azimuth, points[3].elevation), (90.0, -10.0));
        assert_eq!((points[11].azimuth, points[11].elevation), (270.0, 10.0));
    }

    #[test]
    fn grid_azimuth_inner_order() {
        let plan = ScanPlan::new(definition().with_raster_order(RasterOrder::AzimuthInner)).unwrap();
        let points: Vec<(f64, f64)> = plan.grid().map(|p| (p.azimuth, p.elevation)).collect();
        assert_eq!(points[0], (0.0, -10.0));
        assert_eq!(points[1], (90.0, -10.0));
        assert_eq!(points[4], (0.0, 0.0));
        assert_eq!(plan.cut_len(), 4);
    }

    #[test]
    fn rejects_oversized_axes() {
        let def = PlanDefinition::new(
            AngleRange::new(0.0, 1e20, 1.0),
            AngleRange::fixed(0.0),
            FrequencySpec::list([1e9]),
        );
        assert!(matches!(
            ScanPlan::new(def),
            Err(PlanError::TooManyAxisPoints { axis: Axis::Azimuth, .. })
        ));

        let def = PlanDefinition::new(
            AngleRange::fixed(0.0),
            AngleRange::new(0.0, 1e300, 1e-300),
            FrequencySpec::list([1e9]),
        );
        assert!(matches!(
            ScanPlan::new(def),
            Err(PlanError::TooManyAxisPoints { axis: Axis::Elevation, .. })
        ));
    }

    #[test]
    fn rejects_oversized_grid() {
        // Each axis is within its limit, the product is not
        let def = PlanDefinition::new(
            AngleRange::new(0.0, 9_999.0, 1.0),
            AngleRange::new(0.0, 9_999.0, 1.0),
            FrequencySpec::list([1e9]),
        );
        assert!(matches!(
            ScanPlan::new(def),
            Err(PlanError::TooManyPoints { limit: MAX_GRID_POINTS })
        ));
    }

    #[test]
    fn non_finite_angles_are_off_grid() {
        let plan = ScanPlan::new(definition()).unwrap();
        assert_eq!(plan.point_index(f64::NAN, f64::NAN), None);
        assert_eq!(plan.point_index(f64::NAN, 0.0), None);
        assert_eq!(plan.point_index(0.0, f64::INFINITY), None);
        assert_eq!(plan.point_index(f64::NEG_INFINITY, 0.0), None);
        assert_eq!(plan.point_index(0.0, 0.0), Some(1));
    }

    #[test]
    fn point_index_inverts_grid_point() {
        for order in [RasterOrder::ElevationInner, RasterOrder::AzimuthInner] {
            let plan = ScanPlan::new(definition().with_raster_order(order)).unwrap();
            for point in plan.grid() {
                assert_eq!(
                    plan.point_index(point.azimuth, point.elevation),
                    Some(point.index)
                );
            }
            assert_eq!(plan.point_index(45.0, 0.0), None);
            assert_eq!(plan.point_index(360.0, 0.0), None);
        }
    }

    #[test]
    fn resume_iterator_starts_at_cursor() {
        let plan = ScanPlan::new(definition()).unwrap();
        let rest: Vec<usize> = plan.grid_from(10).map(|p| p.index).collect();
        assert_eq!(rest, vec![10, 11]);
        assert_eq!(plan.grid_from(12).count(), 0);
    }

    #[test]
    fn descending_and_fractional_steps() {
        let plan = ScanPlan::new(PlanDefinition::new(
            AngleRange::new(180.0, -180.0, -0.1),
            AngleRange::fixed(0.0),
            FrequencySpec::list([1e9]),
        ))
        .unwrap();
        assert_eq!(plan.azimuth().count(), 3601);
        assert_eq!(plan.elevation().count(), 1);
    }

    #[test]
    fn rejects_zero_step() {
        let mut def = definition();
        def.azimuth.step = 0.0;
        assert_eq!(
            ScanPlan::new(def).unwrap_err(),
            PlanError::ZeroStep { axis: Axis::Azimuth }
        );
    }

    #[test]
    fn rejects_uneven_step() {
        let mut def = definition();
        def.elevation = AngleRange::new(0.0, 10.0, 3.0);
        assert!(matches!(
            ScanPlan::new(def),
            Err(PlanError::UnevenStep { axis: Axis::Elevation, .. })
        ));
    }

    #[test]
    fn rejects_step_pointing_away() {
        let mut def = definition();
        def.azimuth = AngleRange::new(0.0, 90.0, -10.0);
        assert!(matches!(
            ScanPlan::new(def),
            Err(PlanError::StepDirection { .. })
        ));
    }

    #[test]
    fn rejects_bad_frequencies() {
        let mut def = definition();
        def.frequencies = FrequencySpec::list([]);
        assert_eq!(ScanPlan::new(def).unwrap_err(), PlanError::EmptyFrequencies);

        let mut def = definition();
        def.frequencies = FrequencySpec::list([2e9, 1e9]);
        assert!(matches!(
            ScanPlan::new(def),
            Err(PlanError::NonIncreasingFrequencies { .. })
        ));

        let mut def = definition();
        def.frequencies = FrequencySpec::list([1e9, 1e9]);
        assert!(matches!(
            ScanPlan::new(def),
            Err(PlanError::NonIncreasingFrequencies { .. })
        ));

        let mut def = definition();
        def.frequencies = FrequencySpec::list([-1e9]);
        assert!(matches!(
            ScanPlan::new(def),
            Err(PlanError::NonPositiveFrequency(_))
        ));

        let mut def = definition();
        def.frequencies = FrequencySpec::sweep(1e9, 2e9, 0);
        assert_eq!(ScanPlan::new(def).unwrap_err(), PlanError::EmptySweep);
    }

    #[test]
    fn resolves_sweeps_and_si_strings() {
        let mut def = definition();
        def.frequencies = FrequencySpec::Sweep {
            start: FrequencyValue::Text("1 GHz".into()),
            stop: FrequencyValue::Text("2GHz".into()),
            points: 5,
        };
        let plan = ScanPlan::new(def).unwrap();
        assert_eq!(plan.frequencies(), &[1e9, 1.25e9, 1.5e9, 1.75e9, 2e9]);
        assert_eq!(plan.frequency_index(1.5e9), Some(2));
        assert_eq!(plan.frequency_index(1.6e9), None);
    }

    #[test]
    fn polarization_labels_and_ports() {
        let def = definition().with_polarizations(vec![
            PolarizationDefinition::default(),
            PolarizationDefinition {
                label: Some("  ".into()),
                sparameter: SParameter::new(1, 2),
            },
        ]);
        let plan = ScanPlan::new(def).unwrap();
        assert_eq!(plan.polarizations()[0].label(), "Polarization 1");
        assert_eq!(plan.polarizations()[1].label(), "Polarization 2");
        assert_eq!(plan.polarizations()[1].sparameter().to_string(), "S12");
        assert_eq!(plan.polarization_index("Polarization 2"), Some(1));
        assert_eq!(plan.samples_per_point(), 4);
    }

    #[test]
    fn rejects_bad_polarizations() {
        let def = definition().with_polarizations(vec![]);
        assert_eq!(ScanPlan::new(def).unwrap_err(), PlanError::EmptyPolarizations);

        let def = definition().with_polarizations(vec![
            PolarizationDefinition::new("H"),
            PolarizationDefinition::new("H"),
        ]);
        assert_eq!(
            ScanPlan::new(def).unwrap_err(),
            PlanError::DuplicatePolarization("H".into())
        );

        let def = definition().with_polarizations(vec![
            PolarizationDefinition::new("V").with_sparameter(SParameter::new(0, 1))
        ]);
        assert!(matches!(
            ScanPlan::new(def),
            Err(PlanError::InvalidPorts { .. })
        ));
    }

    #[test]
    fn rejects_zero_averages() {
        let def = definition().with_averages(0);
        assert_eq!(ScanPlan::new(def).unwrap_err(), PlanError::ZeroAverages);
    }

    #[test]
    fn sparameter_parsing() {
        assert_eq!("S21".parse::<SParameter>().unwrap(), SParameter::S21);
        assert_eq!("s12".parse::<SParameter>().unwrap(), SParameter::new(1, 2));
        assert!("S2".parse::<SParameter>().is_err());
        assert!("X21".parse::<SParameter>().is_err());
        assert!("S2x".parse::<SParameter>().is_err());
    }

    #[test]
    fn definition_deserializes_from_toml_shapes() {
        let json = serde_json::json!({
            "azimuth": { "start": 0.0, "stop": 350.0, "step": 10.0 },
            "elevation": { "start": 0.0, "stop": 0.0, "step": 1.0 },
            "frequencies": { "start": "1 GHz", "stop": "3 GHz", "points": 3 },
            "polarizations": [ { "label": "H", "sparameter": "S21" }, { "label": "V" } ],
            "settle_time": "250ms",
            "averages": 4,
            "raster_order": "azimuth_inner"
        });
        let def: PlanDefinition = serde_json::from_value(json).unwrap();
        assert_eq!(def.settle_time, Duration::from_millis(250));
        assert_eq!(def.raster_order, RasterOrder::AzimuthInner);

        let plan = def.validate().unwrap();
        assert_eq!(plan.total_points(), 36);
        assert_eq!(plan.frequencies(), &[1e9, 2e9, 3e9]);
        assert_eq!(plan.averages(), 4);
    }
}
