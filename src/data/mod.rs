//! Measurement samples and the pattern dataset.
pub mod dataset;
pub mod sample;

pub use dataset::{DatasetMetadata, PatternDataset, PointRecord, SampleRecord};
pub use sample::MeasurementSample;
