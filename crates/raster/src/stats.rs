//! Per-raster value statistics: an exact whole-file path and a streaming
//! path (Welford summary plus t-digest quantile sketch) for rasters too
//! large to hold in memory.

use std::cmp::Ordering;

use tdigest::TDigest;

use crate::{Error, Result};

/// Summary over the valid pixels of a raster.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub stdev: f64,
    pub percentiles: Vec<f64>,
}

/// Quantile positions for the standard 99-step percentile vector (0.01..0.99).
pub fn percentile_steps() -> Vec<f64> {
    (1..100).map(|p| p as f64 / 100.0).collect()
}

fn interpolated_quantiles(sorted: &[f64], quantiles: &[f64]) -> Result<Vec<f64>> {
    if quantiles.iter().any(|&q| !(0.0..=1.0).contains(&q)) {
        return Err(Error::InvalidArgument("Quantile values must be between 0 and 1".to_string()));
    }

    let len = sorted.len() as f64;
    let mut results = Vec::with_capacity(quantiles.len());

    for &q in quantiles {
        let pos = q * (len - 1.0);
        let lower = pos.floor() as usize;
        let upper = pos.ceil() as usize;

        let value = if lower == upper {
            sorted[lower]
        } else {
            let weight = pos - lower as f64;
            sorted[lower] * (1.0 - weight) + sorted[upper] * weight
        };

        results.push(value);
    }

    Ok(results)
}

/// Exact statistics over an in-memory value set, sorting once and reusing the
/// ordering for all quantiles. Returns `None` when no values are present.
///
/// The standard deviation is the population form, matching the streaming
/// summary.
pub fn exact_stats(mut values: Vec<f64>, quantiles: &[f64]) -> Result<Option<ValueStats>> {
    if values.is_empty() {
        return Ok(None);
    }

    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

    let count = values.len() as f64;
    let sum: f64 = values.iter().sum();
    let mean = sum / count;
    let variance = values.iter().map(|v| (mean - v) * (mean - v)).sum::<f64>() / count;
    let percentiles = interpolated_quantiles(&values, quantiles)?;

    Ok(Some(ValueStats {
        min: values[0],
        max: values[values.len() - 1],
        mean,
        stdev: variance.sqrt(),
        percentiles,
    }))
}

const SKETCH_SIZE: usize = 100;

/// Single-pass accumulator over value chunks.
///
/// Count, min, max and mean are exact; the standard deviation uses Welford's
/// update and stays within 1e-6 relative of the two-pass result; quantiles
/// come from the t-digest sketch with its documented accuracy.
pub struct StreamingStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
    sketch: TDigest,
}

impl Default for StreamingStats {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamingStats {
    pub fn new() -> Self {
        StreamingStats {
            count: 0,
            mean: 0.0,
            m2: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            sketch: TDigest::new_with_size(SKETCH_SIZE),
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn update(&mut self, values: &[f64]) {
        if values.is_empty() {
            return;
        }

        for &value in values {
            self.count += 1;
            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            self.m2 += delta * (value - self.mean);

            if value < self.min {
                self.min = value;
            }
            if value > self.max {
                self.max = value;
            }
        }

        let sketch = std::mem::replace(&mut self.sketch, TDigest::new_with_size(SKETCH_SIZE));
        self.sketch = sketch.merge_unsorted(values.to_vec());
    }

    /// Finish the accumulation. `None` when no value was ever seen.
    pub fn finish(self, quantiles: &[f64]) -> Option<ValueStats> {
        if self.count == 0 {
            return None;
        }

        let percentiles = quantiles.iter().map(|&q| self.sketch.estimate_quantile(q)).collect();

        Some(ValueStats {
            min: self.min,
            max: self.max,
            mean: self.mean,
            stdev: (self.m2 / self.count as f64).sqrt(),
            percentiles,
        })
    }
}
