use rand::Rng;
use std::ops::RangeInclusive;
use std::time::Duration;

use crate::types::Metrics;

/// Facts about a finished request that a metrics source may draw on.
#[derive(Debug, Clone)]
pub struct CompletionReport {
    pub inputs: usize,
    pub outputs: usize,
    /// Wall time of the transport call.
    pub elapsed: Duration,
    /// Metrics the backend sent along with the archive, if any.
    pub reported: Option<Metrics>,
}

/// Produces the aggregate metrics shown for a successful batch.
pub trait MetricsSource: Send + Sync {
    fn metrics(&self, report: &CompletionReport) -> Metrics;
}

impl<F> MetricsSource for F
where
    F: Fn(&CompletionReport) -> Metrics + Send + Sync,
{
    fn metrics(&self, report: &CompletionReport) -> Metrics {
        self(report)
    }
}

/// Illustrative figures drawn from fixed ranges.
///
/// This is what the demo backend produced; it says nothing about the real
/// output and must be replaced by [`ReportedMetrics`] or a real source in
/// production.
#[derive(Debug, Clone)]
pub struct PlaceholderMetrics {
    pub psnr: RangeInclusive<f64>,
    pub ssim: RangeInclusive<f64>,
    pub confidence: RangeInclusive<f64>,
    pub processing_time: RangeInclusive<f64>,
}

impl Default for PlaceholderMetrics {
    fn default() -> Self {
        Self {
            psnr: 25.0..=35.0,
            ssim: 0.8..=1.0,
            confidence: 0.7..=1.0,
            processing_time: 1.0..=3.0,
        }
    }
}

impl MetricsSource for PlaceholderMetrics {
    fn metrics(&self, _report: &CompletionReport) -> Metrics {
        let mut rng = rand::rng();
        Metrics {
            psnr: rng.random_range(self.psnr.clone()),
            ssim: rng.random_range(self.ssim.clone()),
            confidence: rng.random_range(self.confidence.clone()),
            processing_time: rng.random_range(self.processing_time.clone()),
        }
    }
}

/// Prefers metrics reported by the backend, falling back to another source.
#[derive(Debug, Clone, Default)]
pub struct ReportedMetrics<F = PlaceholderMetrics> {
    fallback: F,
}

impl<F: MetricsSource> ReportedMetrics<F> {
    pub fn with_fallback(fallback: F) -> Self {
        Self { fallback }
    }
}

impl<F: MetricsSource> MetricsSource for ReportedMetrics<F> {
    fn metrics(&self, report: &CompletionReport) -> Metrics {
        match report.reported {
            Some(metrics) => metrics,
            None => self.fallback.metrics(report),
        }
    }
}
