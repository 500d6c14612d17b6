//! Fetch, compress and persist device series
//!
//! Every job owns its own encoder state; jobs share nothing but the sample
//! source and the record store.

use crate::compression::{decompress, Compressed, CompressionMetadata, CompressorConfig, Encoder};
use crate::storage::{CompressedRecord, CompressionStore, SampleSource};
use crate::{IdealemError, Result, Sample, TimeRange};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A compressed series and the time span it covers
#[derive(Debug, Clone, PartialEq)]
pub struct CompressionOutput {
    pub compressed: Compressed,
    pub time_range: TimeRange,
}

/// Compress a time-ordered series.
///
/// Returns `Ok(None)` when the series is shorter than `min_block_size`.
pub fn compress_samples(
    samples: &[Sample],
    config: &CompressorConfig,
) -> Result<Option<CompressionOutput>> {
    if let Some(pos) = samples
        .windows(2)
        .position(|pair| pair[0].timestamp > pair[1].timestamp)
    {
        return Err(IdealemError::InvalidInput(format!(
            "samples out of order at index {}",
            pos + 1
        )));
    }

    let encoder = Encoder::new(config.clone())?;
    let values: Vec<f64> = samples.iter().map(|s| s.value).collect();
    let Some(compressed) = encoder.compress(&values) else {
        return Ok(None);
    };
    let time_range = TimeRange::of_samples(samples)
        .ok_or_else(|| IdealemError::Internal("compressed an empty series".into()))?;

    Ok(Some(CompressionOutput {
        compressed,
        time_range,
    }))
}

/// Rebuild samples from a stored record.
///
/// Timestamps are spread evenly over the record's time range.
pub fn decompress_record(record: &CompressedRecord) -> Result<Vec<Sample>> {
    let values = decompress(record.encoded_stream.tokens(), &record.metadata)?;
    let timestamps = record.time_range.interpolate(values.len())?;

    Ok(timestamps
        .into_iter()
        .zip(values)
        .map(|(timestamp, value)| Sample::new(timestamp, value))
        .collect())
}

/// Result of one device job
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Record written
    Stored {
        device_id: String,
        record_id: Uuid,
        metadata: CompressionMetadata,
    },
    /// Too few samples to compress
    Skipped { device_id: String, samples: usize },
    /// Fetch, compression or storage failed
    Failed { device_id: String, error: String },
}

impl JobOutcome {
    pub fn device_id(&self) -> &str {
        match self {
            JobOutcome::Stored { device_id, .. }
            | JobOutcome::Skipped { device_id, .. }
            | JobOutcome::Failed { device_id, .. } => device_id,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, JobOutcome::Failed { .. })
    }
}

/// Compress and store one device's series
pub fn compress_device(
    device_id: &str,
    source: &dyn SampleSource,
    store: &CompressionStore,
    config: &CompressorConfig,
) -> Result<JobOutcome> {
    let samples = source.fetch(device_id)?;
    let Some(output) = compress_samples(&samples, config)? else {
        debug!("Skipping {}: only {} samples", device_id, samples.len());
        return Ok(JobOutcome::Skipped {
            device_id: device_id.to_string(),
            samples: samples.len(),
        });
    };

    let record = CompressedRecord::new(device_id, output.compressed, output.time_range)?;
    store.save(&record)?;

    Ok(JobOutcome::Stored {
        device_id: device_id.to_string(),
        record_id: record.id,
        metadata: record.metadata,
    })
}

/// Run one blocking job per device and collect outcomes in input order
pub async fn run_jobs(
    devices: Vec<String>,
    source: Arc<dyn SampleSource>,
    store: Arc<CompressionStore>,
    config: CompressorConfig,
) -> Vec<JobOutcome> {
    let config = Arc::new(config);
    let handles: Vec<_> = devices
        .into_iter()
        .map(|device_id| {
            let source = Arc::clone(&source);
            let store = Arc::clone(&store);
            let config = Arc::clone(&config);
            let task = tokio::task::spawn_blocking({
                let device_id = device_id.clone();
                move || compress_device(&device_id, source.as_ref(), &store, &config)
            });
            (device_id, task)
        })
        .collect();

    let mut outcomes = Vec::with_capacity(handles.len());
    for (device_id, task) in handles {
        let outcome = match task.await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                warn!("Compression job for {} failed: {}", device_id, e);
                JobOutcome::Failed {
                    device_id,
                    error: e.to_string(),
                }
            }
            Err(e) => {
                warn!("Compression job for {} panicked: {}", device_id, e);
                JobOutcome::Failed {
                    device_id,
                    error: e.to_string(),
                }
            }
        };
        outcomes.push(outcome);
    }

    let stored = outcomes
        .iter()
        .filter(|o| matches!(o, JobOutcome::Stored { .. }))
        .count();
    info!("Finished {} jobs: {} stored", outcomes.len(), stored);
    outcomes
}
