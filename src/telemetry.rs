//! Latency and throughput telemetry
//!
//! The pipeline reports through the narrow `TelemetrySink` contract and
//! never sees aggregation details. `LatencyRecorder` is the default
//! sink: one HDR histogram per stage plus the pipeline-wide counters,
//! with nanosecond samples and percentile snapshots.

use hdrhistogram::Histogram;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Receives latency samples and counter increments from the pipeline
///
/// Implementations own aggregation and reporting format. Calls sit on
/// the worker hot path and must not block beyond short internal locks.
pub trait TelemetrySink: Send + Sync {
    /// Record one latency sample, in nanoseconds, for a named stage
    fn record_latency(&self, stage: &str, nanos: u64);

    /// Increment a named counter by one
    fn increment_counter(&self, counter: &str);
}

/// Stage histogram order; `total` is submission to execution
const STAGES: [&str; 5] = ["validation", "pricing", "risk", "execution", "total"];

// 30 seconds in nanoseconds; anything slower saturates the top bucket
const HIGHEST_TRACKABLE_NANOS: u64 = 30_000_000_000;
const SIGNIFICANT_FIGURES: u8 = 2;

fn stage_index(stage: &str) -> Option<usize> {
    STAGES.iter().position(|name| *name == stage)
}

fn stage_histogram() -> Histogram<u64> {
    Histogram::new_with_bounds(1, HIGHEST_TRACKABLE_NANOS, SIGNIFICANT_FIGURES).unwrap_or_else(
        |_| {
            // Unbounded auto-resize fallback if the fixed bounds are rejected
            Histogram::new(SIGNIFICANT_FIGURES)
                .unwrap_or_else(|_| Histogram::new(1).expect("sigfig 1 is always valid"))
        },
    )
}

/// Default telemetry sink with per-stage HDR histograms
pub struct LatencyRecorder {
    histograms: RwLock<[Histogram<u64>; 5]>,
    received: AtomicU64,
    processed: AtomicU64,
    rejected: AtomicU64,
    errors: AtomicU64,
    duplicates: AtomicU64,
}

impl Default for LatencyRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl LatencyRecorder {
    /// Create a recorder with empty histograms and zeroed counters
    #[must_use]
    pub fn new() -> Self {
        Self {
            histograms: RwLock::new([
                stage_histogram(),
                stage_histogram(),
                stage_histogram(),
                stage_histogram(),
                stage_histogram(),
            ]),
            received: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
        }
    }

    /// Counter accessor used by tests and reporting
    #[must_use]
    pub fn counter(&self, name: &str) -> u64 {
        match name {
            "received" => self.received.load(Ordering::Relaxed),
            "processed" => self.processed.load(Ordering::Relaxed),
            "rejected" => self.rejected.load(Ordering::Relaxed),
            "errors" => self.errors.load(Ordering::Relaxed),
            "duplicates" => self.duplicates.load(Ordering::Relaxed),
            _ => 0,
        }
    }

    /// Clear all histograms and counters, typically after warmup
    pub fn reset(&self) {
        for histogram in self.histograms.write().iter_mut() {
            histogram.reset();
        }
        self.received.store(0, Ordering::Relaxed);
        self.processed.store(0, Ordering::Relaxed);
        self.rejected.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.duplicates.store(0, Ordering::Relaxed);
    }

    /// Point-in-time copy of every stage and counter
    #[must_use]
    pub fn snapshot(&self) -> TelemetrySnapshot {
        let histograms = self.histograms.read();
        let stages = STAGES
            .iter()
            .zip(histograms.iter())
            .map(|(name, histogram)| StageLatency {
                stage: name,
                count: histogram.len(),
                min_ns: if histogram.is_empty() {
                    0
                } else {
                    histogram.min()
                },
                mean_ns: histogram.mean(),
                p50_ns: histogram.value_at_quantile(0.50),
                p99_ns: histogram.value_at_quantile(0.99),
                max_ns: histogram.max(),
            })
            .collect();

        TelemetrySnapshot {
            stages,
            received: self.received.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
        }
    }
}

impl TelemetrySink for LatencyRecorder {
    fn record_latency(&self, stage: &str, nanos: u64) {
        let Some(index) = stage_index(stage) else {
            debug!(stage, "latency sample for unknown stage dropped");
            return;
        };
        self.histograms.write()[index].saturating_record(nanos.max(1));
    }

    fn increment_counter(&self, counter: &str) {
        let counter = match counter {
            "received" => &self.received,
            "processed" => &self.processed,
            "rejected" => &self.rejected,
            "errors" => &self.errors,
            "duplicates" => &self.duplicates,
            other => {
                debug!(counter = other, "unknown counter increment dropped");
                return;
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Latency summary for one stage
#[derive(Debug, Clone)]
pub struct StageLatency {
    /// Stage name
    pub stage: &'static str,
    /// Samples recorded
    pub count: u64,
    /// Fastest sample in nanoseconds
    pub min_ns: u64,
    /// Mean in nanoseconds
    pub mean_ns: f64,
    /// Median in nanoseconds
    pub p50_ns: u64,
    /// 99th percentile in nanoseconds
    pub p99_ns: u64,
    /// Slowest sample in nanoseconds
    pub max_ns: u64,
}

/// Point-in-time view of the recorder
#[derive(Debug, Clone)]
pub struct TelemetrySnapshot {
    /// Per-stage latency summaries, pipeline order then `total`
    pub stages: Vec<StageLatency>,
    /// Submissions admitted into the intake
    pub received: u64,
    /// Records that passed a stage
    pub processed: u64,
    /// Rejections, at admission or inside a stage
    pub rejected: u64,
    /// Stage faults caught at the stage boundary
    pub errors: u64,
    /// Duplicate deliveries detected
    pub duplicates: u64,
}

impl TelemetrySnapshot {
    /// Human-readable report, one stage per line plus counters
    #[must_use]
    pub fn format_report(&self) -> String {
        let mut out = String::from("=== Latency Metrics ===\n");
        for stage in &self.stages {
            if stage.count == 0 {
                continue;
            }
            out.push_str(&format!(
                "{} latency (us): min={:.2}, mean={:.2}, p99={:.2}, max={:.2} ({} samples)\n",
                stage.stage,
                stage.min_ns as f64 / 1000.0,
                stage.mean_ns / 1000.0,
                stage.p99_ns as f64 / 1000.0,
                stage.max_ns as f64 / 1000.0,
                stage.count,
            ));
        }
        out.push_str("\n=== Throughput Metrics ===\n");
        out.push_str(&format!("received: {}\n", self.received));
        out.push_str(&format!("processed: {}\n", self.processed));
        out.push_str(&format!("rejected: {}\n", self.rejected));
        out.push_str(&format!("errors: {}\n", self.errors));
        out.push_str(&format!("duplicates: {}\n", self.duplicates));
        out
    }
}
