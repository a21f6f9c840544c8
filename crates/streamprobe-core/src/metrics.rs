//! Run metrics aggregation and SLO checks.
//!
//! Aggregation is a pure function of one run's events and its time bounds,
//! so it can be re-run at any point (including mid-run) and yields identical
//! results for an unchanged event set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::run::Run;
use crate::types::{Event, Outcome};

/// Aggregated metrics of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RunMetrics {
    /// Total events considered.
    pub total_events: u64,
    /// Successful events.
    pub successful_events: u64,
    /// Error events.
    pub error_events: u64,
    /// Timeout events.
    pub timeout_events: u64,
    /// P50 latency of successful events in milliseconds.
    pub latency_p50_ms: f64,
    /// P95 latency of successful events in milliseconds.
    pub latency_p95_ms: f64,
    /// P99 latency of successful events in milliseconds.
    pub latency_p99_ms: f64,
    /// Successful events per second of elapsed run time.
    pub throughput: f64,
    /// Failed (error or timeout) events over total events.
    pub error_rate: f64,
    /// Elapsed seconds used for throughput.
    pub elapsed_seconds: f64,
}

impl RunMetrics {
    /// Returns success rate (0.0 to 1.0).
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.total_events > 0 {
            self.successful_events as f64 / self.total_events as f64
        } else {
            0.0
        }
    }
}

/// Aggregates a run's events.
///
/// Events from other runs are ignored. Elapsed time spans the run's start to
/// its end, or to `now` while the run is still active.
#[must_use]
pub fn aggregate(run: &Run, events: &[Event], now: DateTime<Utc>) -> RunMetrics {
    let elapsed_seconds = match (run.started_at, run.ended_at) {
        (Some(start), Some(end)) => seconds_between(start, end),
        (Some(start), None) => seconds_between(start, now),
        _ => 0.0,
    };
    aggregate_events(run, events, elapsed_seconds)
}

fn aggregate_events(run: &Run, events: &[Event], elapsed_seconds: f64) -> RunMetrics {
    let mut latencies = Vec::new();
    let mut metrics = RunMetrics {
        elapsed_seconds,
        ..Default::default()
    };

    for event in events.iter().filter(|e| e.run_id == run.id) {
        metrics.total_events += 1;
        match event.outcome {
            Outcome::Success => {
                metrics.successful_events += 1;
                latencies.push(event.latency_ms);
            }
            Outcome::Error => metrics.error_events += 1,
            Outcome::Timeout => metrics.timeout_events += 1,
        }
    }

    latencies.sort_by(f64::total_cmp);
    metrics.latency_p50_ms = percentile(&latencies, 50);
    metrics.latency_p95_ms = percentile(&latencies, 95);
    metrics.latency_p99_ms = percentile(&latencies, 99);

    metrics.throughput = if elapsed_seconds > 0.0 {
        metrics.successful_events as f64 / elapsed_seconds
    } else {
        0.0
    };
    metrics.error_rate = if metrics.total_events > 0 {
        (metrics.error_events + metrics.timeout_events) as f64 / metrics.total_events as f64
    } else {
        0.0
    };
    metrics
}

fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start)
        .to_std()
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Computes a nearest-rank percentile from a sorted slice.
#[must_use]
pub fn percentile(sorted: &[f64], p: usize) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (sorted.len() * p.min(100)).div_ceil(100).max(1);
    sorted[rank - 1]
}

/// SLO targets of a scenario. Unset targets are not checked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SloThresholds {
    /// Maximum p50 latency.
    #[serde(default)]
    pub max_p50_latency_ms: Option<f64>,
    /// Maximum p95 latency.
    #[serde(default)]
    pub max_p95_latency_ms: Option<f64>,
    /// Maximum p99 latency.
    #[serde(default)]
    pub max_p99_latency_ms: Option<f64>,
    /// Maximum error rate.
    #[serde(default)]
    pub max_error_rate: Option<f64>,
    /// Minimum throughput in successful events per second.
    #[serde(default)]
    pub min_throughput: Option<f64>,
}

impl SloThresholds {
    /// Returns true if no target is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.max_p50_latency_ms.is_none()
            && self.max_p95_latency_ms.is_none()
            && self.max_p99_latency_ms.is_none()
            && self.max_error_rate.is_none()
            && self.min_throughput.is_none()
    }
}

/// Metric checked by an SLO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SloMetric {
    /// P50 latency.
    LatencyP50,
    /// P95 latency.
    LatencyP95,
    /// P99 latency.
    LatencyP99,
    /// Error rate.
    ErrorRate,
    /// Throughput.
    Throughput,
}

/// Result of one SLO target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SloCheck {
    /// Checked metric.
    pub metric: SloMetric,
    /// Target value.
    pub target: f64,
    /// Observed value.
    pub actual: f64,
    /// Whether the target was met.
    pub passed: bool,
    /// Headroom to the target; negative when violated.
    pub margin: f64,
}

/// Per-metric SLO results and overall status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SloReport {
    /// Individual checks, in a fixed metric order.
    pub checks: Vec<SloCheck>,
    /// True if every check passed.
    pub passed: bool,
}

impl SloReport {
    /// Returns the failed checks.
    pub fn failures(&self) -> impl Iterator<Item = &SloCheck> {
        self.checks.iter().filter(|c| !c.passed)
    }
}

/// Compares aggregated metrics to SLO targets.
#[must_use]
pub fn check_slo(metrics: &RunMetrics, thresholds: &SloThresholds) -> SloReport {
    let upper = [
        (SloMetric::LatencyP50, thresholds.max_p50_latency_ms, metrics.latency_p50_ms),
        (SloMetric::LatencyP95, thresholds.max_p95_latency_ms, metrics.latency_p95_ms),
        (SloMetric::LatencyP99, thresholds.max_p99_latency_ms, metrics.latency_p99_ms),
        (SloMetric::ErrorRate, thresholds.max_error_rate, metrics.error_rate),
    ];

    let mut checks: Vec<SloCheck> = upper
        .into_iter()
        .filter_map(|(metric, target, actual)| {
            target.map(|target| SloCheck {
                metric,
                target,
                actual,
                passed: actual <= target,
                margin: target - actual,
            })
        })
        .collect();

    if let Some(target) = thresholds.min_throughput {
        checks.push(SloCheck {
            metric: SloMetric::Throughput,
            target,
            actual: metrics.throughput,
            passed: metrics.throughput >= target,
            margin: metrics.throughput - target,
        });
    }

    let passed = checks.iter().all(|c| c.passed);
    SloReport { checks, passed }
}
