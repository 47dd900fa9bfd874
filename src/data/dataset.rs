//! Accumulated measurements of one scan session.
//!
//! The dataset is keyed by (grid point, frequency, polarization). Samples are
//! committed a whole point at a time with [`PatternDataset::commit_point`], so
//! readers never observe a half-measured point. Every key is written at most
//! once; replacing a point goes through [`PatternDataset::remeasure_point`].

use chrono::{DateTime, Utc};
use num_complex::Complex64;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use super::sample::MeasurementSample;
use crate::error::{AppResult, ScanError};
use crate::experiment::{FaultDescriptor, GridPoint, ScanPlan, SessionState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SampleKey {
    point: usize,
    frequency: usize,
    polarization: usize,
}

/// One value produced while measuring a point, before it is committed.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRecord {
    /// Index into the plan's frequency list
    pub frequency_index: usize,
    /// Index into the plan's polarization list
    pub polarization_index: usize,
    /// Averaged complex value
    pub value: Complex64,
    /// False when any contributing value was non-finite
    pub valid: bool,
    /// Completion time of the last contributing sweep
    pub captured_at: DateTime<Utc>,
}

/// Everything measured at one grid point.
#[derive(Debug, Clone, PartialEq)]
pub struct PointRecord {
    /// The grid point
    pub point: GridPoint,
    /// Samples measured at the point; may be partial when `fault` is set
    pub samples: Vec<SampleRecord>,
    /// Point-level fault, if the point could not be fully measured
    pub fault: Option<FaultDescriptor>,
}

/// Session-level information about a dataset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetMetadata {
    /// Session that produced the data
    pub session_id: Uuid,
    /// When the dataset was created
    pub started_at: DateTime<Utc>,
    /// When the session reached a terminal state
    pub finished_at: Option<DateTime<Utc>>,
    /// Last session state recorded in the dataset
    pub state: SessionState,
}

/// Measurements of a scan, indexed by grid point, frequency and polarization.
#[derive(Debug, Clone)]
pub struct PatternDataset {
    metadata: DatasetMetadata,
    plan: Arc<ScanPlan>,
    samples: Vec<MeasurementSample>,
    index: HashMap<SampleKey, usize>,
    processed: BTreeSet<usize>,
    faults: BTreeMap<usize, FaultDescriptor>,
}

impl PatternDataset {
    /// Empty dataset for `plan`.
    pub fn new(session_id: Uuid, plan: Arc<ScanPlan>) -> Self {
        Self {
            metadata: DatasetMetadata {
                session_id,
                started_at: Utc::now(),
                finished_at: None,
                state: SessionState::Idle,
            },
            plan,
            samples: Vec::new(),
            index: HashMap::new(),
            processed: BTreeSet::new(),
            faults: BTreeMap::new(),
        }
    }

    /// Session metadata.
    pub fn metadata(&self) -> &DatasetMetadata {
        &self.metadata
    }

    /// Plan the dataset was acquired with.
    pub fn plan(&self) -> &ScanPlan {
        &self.plan
    }

    /// Number of samples stored.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True when no sample has been stored.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of grid points committed, faulted ones included.
    pub fn points_processed(&self) -> usize {
        self.processed.len()
    }

    /// True if the point at raster `index` has been committed.
    pub fn is_processed(&self, index: usize) -> bool {
        self.processed.contains(&index)
    }

    /// Commit every sample of a point at once.
    ///
    /// Fails without storing anything if the point is outside the plan, if a
    /// sample index is out of range, or if any key is already present.
    pub fn commit_point(&mut self, record: PointRecord) -> AppResult<()> {
        let point = self.checked_point(&record.point)?;

        let mut keys = HashSet::with_capacity(record.samples.len());
        for sample in &record.samples {
            let key = self.checked_key(point, sample)?;
            if self.index.contains_key(&key) || !keys.insert(key) {
                return Err(self.duplicate(key));
            }
        }

        for sample in record.samples {
            let key = SampleKey {
                point: point.index,
                frequency: sample.frequency_index,
                polarization: sample.polarization_index,
            };
            let stored = MeasurementSample {
                point_index: point.index,
                azimuth: point.azimuth,
                elevation: point.elevation,
                frequency: self.plan.frequencies()[sample.frequency_index],
                polarization: self.plan.polarizations()[sample.polarization_index]
                    .label()
                    .to_string(),
                value: sample.value,
                valid: sample.valid,
                captured_at: sample.captured_at,
            };
            self.index.insert(key, self.samples.len());
            self.samples.push(stored);
        }

        self.processed.insert(point.index);
        if let Some(fault) = record.fault {
            self.faults.insert(point.index, fault);
        }
        Ok(())
    }

    /// Replace everything recorded at a point with a fresh measurement.
    ///
    /// Earlier samples and any fault of the point are discarded; the new samples
    /// are appended at the end of the acquisition order.
    pub fn remeasure_point(&mut self, record: PointRecord) -> AppResult<()> {
        let point = self.checked_point(&record.point)?;
        let mut keys = HashSet::with_capacity(record.samples.len());
        for sample in &record.samples {
            let key = self.checked_key(point, sample)?;
            if !keys.insert(key) {
                return Err(self.duplicate(key));
            }
        }

        self.samples.retain(|s| s.point_index != point.index);
        self.index = self
            .samples
            .iter()
            .enumerate()
            .filter_map(|(i, s)| {
                Some((
                    SampleKey {
                        point: s.point_index,
                        frequency: self.plan.frequency_index(s.frequency)?,
                        polarization: self.plan.polarization_index(&s.polarization)?,
                    },
                    i,
                ))
            })
            .collect();
        self.processed.remove(&point.index);
        self.faults.remove(&point.index);

        self.commit_point(record)
    }

    /// Sample at (`azimuth`, `elevation`, `frequency`, `polarization`), if recorded.
    pub fn get(
        &self,
        azimuth: f64,
        elevation: f64,
        frequency: f64,
        polarization: &str,
    ) -> Option<&MeasurementSample> {
        let key = SampleKey {
            point: self.plan.point_index(azimuth, elevation)?,
            frequency: self.plan.frequency_index(frequency)?,
            polarization: self.plan.polarization_index(polarization)?,
        };
        self.index.get(&key).map(|&i| &self.samples[i])
    }

    /// True if every (frequency, polarization) pair at the point holds a valid sample.
    pub fn is_point_complete(&self, azimuth: f64, elevation: f64) -> bool {
        self.plan
            .point_index(azimuth, elevation)
            .is_some_and(|index| self.is_index_complete(index))
    }

    fn is_index_complete(&self, point: usize) -> bool {
        (0..self.plan.frequencies().len()).all(|frequency| {
            (0..self.plan.polarizations().len()).all(|polarization| {
                self.index
                    .get(&SampleKey {
                        point,
                        frequency,
                        polarization,
                    })
                    .is_some_and(|&i| self.samples[i].valid)
            })
        })
    }

    /// Every stored sample in acquisition order.
    pub fn export_grid(&self) -> &[MeasurementSample] {
        &self.samples
    }

    /// Magnitude (dB) against azimuth at a fixed elevation, frequency and
    /// polarization. Missing and invalid samples are skipped.
    pub fn azimuth_cut(&self, frequency: f64, elevation: f64, polarization: &str) -> Vec<(f64, f64)> {
        self.plan
            .azimuth()
            .angles()
            .into_iter()
            .filter_map(|azimuth| {
                self.get(azimuth, elevation, frequency, polarization)
                    .filter(|s| s.valid)
                    .map(|s| (azimuth, s.magnitude_db()))
            })
            .collect()
    }

    /// Magnitude (dB) against elevation at a fixed azimuth.
    pub fn elevation_cut(&self, frequency: f64, azimuth: f64, polarization: &str) -> Vec<(f64, f64)> {
        self.plan
            .elevation()
            .angles()
            .into_iter()
            .filter_map(|elevation| {
                self.get(azimuth, elevation, frequency, polarization)
                    .filter(|s| s.valid)
                    .map(|s| (elevation, s.magnitude_db()))
            })
            .collect()
    }

    /// Magnitude (dB) against frequency at one grid point.
    pub fn frequency_response(
        &self,
        azimuth: f64,
        elevation: f64,
        polarization: &str,
    ) -> Vec<(f64, f64)> {
        self.plan
            .frequencies()
            .iter()
            .filter_map(|&frequency| {
                self.get(azimuth, elevation, frequency, polarization)
                    .filter(|s| s.valid)
                    .map(|s| (frequency, s.magnitude_db()))
            })
            .collect()
    }

    /// Faults of all faulted points in raster order.
    pub fn faulted_points(&self) -> Vec<&FaultDescriptor> {
        self.faults.values().collect()
    }

    /// Fault recorded for the point at (`azimuth`, `elevation`).
    pub fn point_fault(&self, azimuth: f64, elevation: f64) -> Option<&FaultDescriptor> {
        let index = self.plan.point_index(azimuth, elevation)?;
        self.faults.get(&index)
    }

    pub(crate) fn set_state(&mut self, state: SessionState) {
        self.metadata.state = state;
        if state.is_terminal() {
            self.metadata.finished_at = Some(Utc::now());
        }
    }

    fn checked_point(&self, point: &GridPoint) -> AppResult<GridPoint> {
        self.plan
            .grid_point(point.index)
            .filter(|p| p.azimuth_index == point.azimuth_index && p.elevation_index == point.elevation_index)
            .ok_or(ScanError::UnknownGridPoint {
                azimuth: point.azimuth,
                elevation: point.elevation,
            })
    }

    fn checked_key(&self, point: GridPoint, sample: &SampleRecord) -> AppResult<SampleKey> {
        if sample.frequency_index >= self.plan.frequencies().len()
            || sample.polarization_index >= self.plan.polarizations().len()
        {
            return Err(ScanError::UnknownGridPoint {
                azimuth: point.azimuth,
                elevation: point.elevation,
            });
        }
        Ok(SampleKey {
            point: point.index,
            frequency: sample.frequency_index,
            polarization: sample.polarization_index,
        })
    }

    fn duplicate(&self, key: SampleKey) -> ScanError {
        let point = self.plan.grid_point(key.point);
        ScanError::DuplicateSample {
            azimuth: point.map_or(f64::NAN, |p| p.azimuth),
            elevation: point.map_or(f64::NAN, |p| p.elevation),
            frequency: self.plan.frequencies()[key.frequency],
            polarization: self.plan.polarizations()[key.polarization].label().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::{
        AngleRange, FaultCause, FrequencySpec, PlanDefinition, PolarizationDefinition,
    };

    fn plan() -> Arc<ScanPlan> {
        let def = PlanDefinition::new(
            AngleRange::new(0.0, 90.0, 90.0),
            AngleRange::new(0.0, 10.0, 10.0),
            FrequencySpec::list([1e9, 2e9]),
        )
        .with_polarizations(vec![
            PolarizationDefinition::new("H"),
            PolarizationDefinition::new("V"),
        ]);
        Arc::new(ScanPlan::new(def).unwrap())
    }

    fn full_record(plan: &ScanPlan, index: usize, value: f64) -> PointRecord {
        let point = plan.grid_point(index).unwrap();
        let mut samples = Vec::new();
        for polarization_index in 0..2 {
            for frequency_index in 0..2 {
                samples.push(SampleRecord {
                    frequency_index,
                    polarization_index,
                    value: Complex64::new(value, 0.0),
                    valid: true,
                    captured_at: Utc::now(),
                });
            }
        }
        PointRecord {
            point,
            samples,
            fault: None,
        }
    }

    #[test]
    fn commit_and_lookup() {
        let plan = plan();
        let mut data = PatternDataset::new(Uuid::new_v4(), plan.clone());
        assert!(data.is_empty());

        data.commit_point(full_record(&plan, 1, 0.5)).unwrap();
        assert_eq!(data.len(), 4);
        assert_eq!(data.points_processed(), 1);

        let sample = data.get(0.0, 10.0, 2e9, "V").unwrap();
        assert_eq!(sample.value, Complex64::new(0.5, 0.0));
        assert_eq!(sample.frequency, 2e9);
        assert!(data.is_point_complete(0.0, 10.0));
        assert!(!data.is_point_complete(0.0, 0.0));
        assert!(data.get(0.0, 0.0, 1e9, "H").is_none());
        assert!(data.get(0.0, 10.0, 1e9, "X").is_none());
    }

    #[test]
    fn rejects_duplicates_without_partial_writes() {
        let plan = plan();
        let mut data = PatternDataset::new(Uuid::new_v4(), plan.clone());
        data.commit_point(full_record(&plan, 0, 1.0)).unwrap();

        let err = data.commit_point(full_record(&plan, 0, 2.0)).unwrap_err();
        assert!(matches!(err, ScanError::DuplicateSample { .. }));
        assert_eq!(data.len(), 4);
        assert_eq!(data.get(0.0, 0.0, 1e9, "H").unwrap().value.re, 1.0);

        let mut twice = full_record(&plan, 2, 1.0);
        twice.samples.push(twice.samples[0].clone());
        assert!(data.commit_point(twice).is_err());
        assert_eq!(data.len(), 4);
        assert!(!data.is_processed(2));
    }

    #[test]
    fn rejects_points_outside_plan() {
        let plan = plan();
        let mut data = PatternDataset::new(Uuid::new_v4(), plan.clone());
        let mut record = full_record(&plan, 0, 1.0);
        record.point.index = 99;
        assert!(matches!(
            data.commit_point(record),
            Err(ScanError::UnknownGridPoint { .. })
        ));
    }

    #[test]
    fn invalid_sample_keeps_point_incomplete() {
        let plan = plan();
        let mut data = PatternDataset::new(Uuid::new_v4(), plan.clone());
        let mut record = full_record(&plan, 3, 1.0);
        record.samples[1].valid = false;
        record.samples[1].value = Complex64::new(f64::NAN, f64::NAN);
        data.commit_point(record).unwrap();

        assert_eq!(data.len(), 4);
        assert!(!data.is_point_complete(90.0, 10.0));
        assert_eq!(data.frequency_response(90.0, 10.0, "H"), vec![(1e9, 0.0)]);
    }

    #[test]
    fn faulted_point_is_recorded() {
        let plan = plan();
        let mut data = PatternDataset::new(Uuid::new_v4(), plan.clone());
        let point = plan.grid_point(2).unwrap();
        data.commit_point(PointRecord {
            point,
            samples: Vec::new(),
            fault: Some(FaultDescriptor::new(FaultCause::Positioning, "stall").at_point(&point)),
        })
        .unwrap();

        assert!(data.is_processed(2));
        assert!(!data.is_point_complete(90.0, 0.0));
        assert_eq!(data.faulted_points().len(), 1);
        assert_eq!(
            data.point_fault(90.0, 0.0).map(|f| f.cause),
            Some(FaultCause::Positioning)
        );
    }

    #[test]
    fn remeasure_replaces_point() {
        let plan = plan();
        let mut data = PatternDataset::new(Uuid::new_v4(), plan.clone());
        data.commit_point(full_record(&plan, 0, 1.0)).unwrap();
        data.commit_point(full_record(&plan, 1, 1.0)).unwrap();

        data.remeasure_point(full_record(&plan, 0, 0.1)).unwrap();
        assert_eq!(data.len(), 8);
        assert_eq!(data.get(0.0, 0.0, 1e9, "H").unwrap().value.re, 0.1);
        assert_eq!(data.get(0.0, 10.0, 1e9, "H").unwrap().value.re, 1.0);
        assert_eq!(data.export_grid().last().map(|s| s.point_index), Some(0));
    }

    #[test]
    fn rejected_remeasure_keeps_existing_point() {
        let plan = plan();
        let mut data = PatternDataset::new(Uuid::new_v4(), plan.clone());
        data.commit_point(full_record(&plan, 0, 1.0)).unwrap();

        let mut twice = full_record(&plan, 0, 0.1);
        twice.samples.push(twice.samples[0].clone());
        let err = data.remeasure_point(twice).unwrap_err();
        assert!(matches!(err, ScanError::DuplicateSample { .. }));

        assert_eq!(data.len(), 4);
        assert!(data.is_processed(0));
        assert!(data.is_point_complete(0.0, 0.0));
        assert_eq!(data.get(0.0, 0.0, 2e9, "V").unwrap().value.re, 1.0);
    }

    #[test]
    fn azimuth_cut_skips_missing_points() {
        let plan = plan();
        let mut data = PatternDataset::new(Uuid::new_v4(), plan.clone());
        data.commit_point(full_record(&plan, 0, 1.0)).unwrap();
        data.commit_point(full_record(&plan, 2, 0.1)).unwrap();

        let cut = data.azimuth_cut(1e9, 0.0, "H");
        assert_eq!(cut.len(), 2);
        assert_eq!(cut[0], (0.0, 0.0));
        assert_eq!(cut[1].0, 90.0);
        assert!((cut[1].1 - -20.0).abs() < 1e-9);

        assert_eq!(data.elevation_cut(1e9, 0.0, "H"), vec![(0.0, 0.0)]);
    }
}
