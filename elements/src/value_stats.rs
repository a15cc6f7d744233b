// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use serde::{Deserialize, Serialize};
use statistical;

/// Summary of a set of values, e.g. the measured-minus-expected pixel
/// differences of one verification run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DescriptiveStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Sample standard deviation; zero for a single value.
    pub stddev: f64,
    pub rms: f64,
    pub median: Option<f64>,
    pub median_absolute_deviation: Option<f64>,
}

#[derive(Debug, Default)]
pub struct ValueStatsAccumulator {
    values: Vec<f64>,
}

impl ValueStatsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_value(&mut self, value: f64) {
        self.values.push(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns None when no values have been added.
    pub fn stats(&self) -> Option<DescriptiveStats> {
        if self.values.is_empty() {
            return None;
        }
        let values = self.values.as_slice();
        let mean = statistical::mean(values);
        let stddev = if values.len() > 1 {
            statistical::standard_deviation(values, Some(mean))
        } else {
            0.0
        };
        let rms =
            (values.iter().map(|v| v * v).sum::<f64>() / values.len() as f64).sqrt();
        let median = statistical::median(values);
        let deviations: Vec<f64> = values.iter().map(|v| (v - median).abs()).collect();
        Some(DescriptiveStats{
            count: values.len(),
            min: *values.iter().min_by(|a, b| a.total_cmp(b))?,
            max: *values.iter().max_by(|a, b| a.total_cmp(b))?,
            mean,
            stddev,
            rms,
            median: Some(median),
            median_absolute_deviation: Some(statistical::median(&deviations)),
        })
    }
}

// mod tests.
