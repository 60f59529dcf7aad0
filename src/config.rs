//! Pipeline configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Intake ring capacity, rounded up to the next power of two
    pub buffer_capacity: usize,

    /// Capacity of each inter-stage work queue
    pub queue_capacity: usize,

    /// Worker threads per stage
    pub workers_per_stage: usize,

    /// Spin iterations before a ring claim or consume reports failure
    pub claim_spin_limit: u32,

    /// Recent trade ids remembered per stage for duplicate detection
    pub dedup_window: usize,

    /// Pre-allocated trade record slots
    pub arena_capacity: usize,

    /// Largest notional value (price times quantity) the risk stage accepts
    pub max_notional: f64,

    /// Admission circuit breaker settings
    pub breaker: BreakerConfig,

    /// Audit log settings
    pub audit: AuditConfig,
}

/// Circuit breaker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures before the breaker opens
    pub failure_threshold: u64,

    /// Milliseconds the breaker stays open before probing
    pub reset_timeout_ms: u64,
}

/// Audit log settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Pending events held before the sink starts dropping
    pub queue_capacity: usize,

    /// Directory audit files are written into
    pub directory: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 1024,
            queue_capacity: 16_384,
            workers_per_stage: 4,
            claim_spin_limit: 1000,
            dedup_window: 65_536,
            arena_capacity: 4096,
            max_notional: 10_000_000.0,
            breaker: BreakerConfig::default(),
            audit: AuditConfig::default(),
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 10,
            reset_timeout_ms: 5000,
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100_000,
            directory: PathBuf::from("audit_logs"),
        }
    }
}
