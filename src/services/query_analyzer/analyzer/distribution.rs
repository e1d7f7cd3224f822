//! Summary statistics over execution-time samples

use serde::Serialize;

/// min / max / mean / population standard deviation of a sample set
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct PerformanceDistribution {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
    pub count: usize,
}

impl PerformanceDistribution {
    /// The all-zero distribution of an empty sample set
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Standard deviation relative to the mean, 0 when the mean is 0
    pub fn coefficient_of_variation(&self) -> f64 {
        if self.mean == 0.0 { 0.0 } else { self.std_dev / self.mean }
    }

    /// Spread stays within `max_cv` of the mean
    pub fn is_stable(&self, max_cv: f64) -> bool {
        self.std_dev <= self.mean * max_cv
    }

    pub fn report(&self) -> String {
        format!(
            "count={} min={:.2}ms max={:.2}ms mean={:.2}ms std_dev={:.2}ms cv={:.2}%",
            self.count,
            self.min,
            self.max,
            self.mean,
            self.std_dev,
            self.coefficient_of_variation() * 100.0
        )
    }
}

pub fn distribution(samples: &[f64]) -> PerformanceDistribution {
    if samples.is_empty() {
        return PerformanceDistribution::empty();
    }

    let count = samples.len();
    let mean = samples.iter().sum::<f64>() / count as f64;
    let variance = samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / count as f64;

    PerformanceDistribution {
        min: samples.iter().copied().fold(f64::INFINITY, f64::min),
        max: samples.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        mean,
        std_dev: variance.sqrt(),
        count,
    }
}

/// Samples above `mean + threshold_sigma * std_dev`, in input order
pub fn detect_anomalies(samples: &[f64], threshold_sigma: f64) -> Vec<f64> {
    let stats = distribution(samples);
    let limit = stats.mean + threshold_sigma * stats.std_dev;
    samples.iter().copied().filter(|s| *s > limit).collect()
}
