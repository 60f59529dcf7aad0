//! # Low-Latency Trade Processing Pipeline
//!
//! A multi-stage trade pipeline built for predictable latency under load:
//! - Lock-free sequence-gated ring buffer at intake
//! - Bounded work queues between stages with prompt shutdown wake-up
//! - Circuit-breaker admission control ahead of any allocation
//! - Pre-allocated record arena, records recycled in place
//! - Per-stage worker pools that contain panics at the stage boundary
//!
//! ## Core Design Principles
//!
//! 1. **Bounded Everything**: every buffer, queue and wait has a hard limit
//! 2. **No Lost Sequences**: a rejected submission never burns a ring slot
//! 3. **Exactly-Once Hand-Off**: each record is owned by one stage at a time
//! 4. **Fail Fast at the Edge**: the breaker rejects before work is queued
//! 5. **Observable by Default**: latency histograms, counters and an audit trail

#![warn(missing_docs)]
#![allow(unsafe_code)] // Allow unsafe for the lock-free ring and record arena

pub mod arena;
pub mod audit;
pub mod breaker;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod queue;
pub mod ring;
pub mod stage;
pub mod telemetry;
pub mod trade;
pub mod worker;

// Re-exports for convenience
pub use crate::arena::{RecordArena, RecordHandle};
pub use crate::audit::{AuditEvent, AuditLog, AuditSink, MemoryAuditSink, NullAuditSink};
pub use crate::breaker::{BreakerState, CircuitBreaker};
pub use crate::config::{AuditConfig, BreakerConfig, PipelineConfig};
pub use crate::error::{PipelineError, PipelineResult};
pub use crate::pipeline::PipelineCoordinator;
pub use crate::queue::BoundedWorkQueue;
pub use crate::ring::SequenceGatedBuffer;
pub use crate::stage::{
    ExecutionStage, PricingStage, RiskStage, Stage, StageKind, StageOutcome, ValidationStage,
};
pub use crate::telemetry::{LatencyRecorder, TelemetrySink, TelemetrySnapshot};
pub use crate::trade::{OrderType, TradeIntent, TradeRecord, TradeStatus};
pub use crate::worker::{StageServices, StageWorkerPool, WorkSource};
