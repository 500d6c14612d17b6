//! Core types for IDEALEM

use crate::{IdealemError, Result};
use chrono::{DateTime, Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp of a sample; sensor feeds carry no zone information
pub type Timestamp = NaiveDateTime;

/// ISO-8601 layout used for every timestamp the crate prints
const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// A single sensor reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Time of the reading
    pub timestamp: Timestamp,
    /// Measured value
    pub value: f64,
}

impl Sample {
    /// Create a new sample
    pub fn new(timestamp: Timestamp, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Parse an ISO-8601 timestamp (`T` or space separated, optional offset)
pub fn parse_timestamp(text: &str) -> Result<Timestamp> {
    let text = text.trim().trim_matches('"');
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Ok(ts.naive_utc());
    }
    NaiveDateTime::parse_from_str(text, ISO_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f"))
        .map_err(|e| IdealemError::Timestamp(format!("cannot parse {:?}: {}", text, e)))
}

/// Render a timestamp the way it was stored (`2024-01-01T00:30:00`)
pub fn format_timestamp(ts: &Timestamp) -> String {
    ts.format(ISO_FORMAT).to_string()
}

/// Closed time interval covered by a compressed span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// First timestamp (inclusive)
    pub start: Timestamp,
    /// Last timestamp (inclusive)
    pub end: Timestamp,
}

impl TimeRange {
    /// Create a new time range
    pub fn new(start: Timestamp, end: Timestamp) -> Result<Self> {
        if start > end {
            return Err(IdealemError::Timestamp(format!(
                "range start {} is after end {}",
                format_timestamp(&start),
                format_timestamp(&end)
            )));
        }
        Ok(Self { start, end })
    }

    /// Range spanned by a batch of samples (min/max timestamp)
    pub fn of_samples(samples: &[Sample]) -> Option<Self> {
        let start = samples.iter().map(|s| s.timestamp).min()?;
        let end = samples.iter().map(|s| s.timestamp).max()?;
        Some(Self { start, end })
    }

    /// Parse a range literal such as `[2024-01-01 00:00:00, 2024-01-01 01:00:00]`.
    ///
    /// Both `[a, b]` and `[a, b)` are accepted; bounds must be present.
    pub fn parse(text: &str) -> Result<Self> {
        let inner = text
            .trim()
            .strip_prefix(['[', '('])
            .and_then(|s| s.strip_suffix([']', ')']))
            .ok_or_else(|| IdealemError::Timestamp(format!("not a range literal: {:?}", text)))?;

        let (start, end) = inner
            .split_once(',')
            .ok_or_else(|| IdealemError::Timestamp(format!("range needs two bounds: {:?}", text)))?;
        if start.trim().is_empty() || end.trim().is_empty() {
            return Err(IdealemError::Timestamp(format!("unbounded range: {:?}", text)));
        }

        Self::new(parse_timestamp(start)?, parse_timestamp(end)?)
    }

    /// Check if a timestamp is within the range
    pub fn contains(&self, ts: Timestamp) -> bool {
        ts >= self.start && ts <= self.end
    }

    /// Length of the range
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Produce `n` evenly spaced timestamps from `start` to `end` inclusive.
    ///
    /// Reconstructed timestamps are interpolated, not the original ones:
    /// uniform sampling is assumed across the range.
    pub fn interpolate(&self, n: usize) -> Result<Vec<Timestamp>> {
        match n {
            0 => Ok(Vec::new()),
            1 => Ok(vec![self.start]),
            _ => {
                let span = self
                    .duration()
                    .num_nanoseconds()
                    .ok_or_else(|| IdealemError::Timestamp("time range too wide to interpolate".into()))?
                    as i128;
                let steps = (n - 1) as i128;

                Ok((0..n)
                    .map(|i| {
                        let offset = span * i as i128 / steps;
                        self.start + Duration::nanoseconds(offset as i64)
                    })
                    .collect())
            }
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}]",
            format_timestamp(&self.start),
            format_timestamp(&self.end)
        )
    }
}

/// Regenerate `n` presentation timestamps between two ISO-8601 bounds
pub fn generate_timestamps(start: &str, end: &str, n: usize) -> Result<Vec<String>> {
    let range = TimeRange::new(parse_timestamp(start)?, parse_timestamp(end)?)?;
    Ok(range.interpolate(n)?.iter().map(format_timestamp).collect())
}
