//! Pipeline coordinator
//!
//! Owns the full processing chain: the admission circuit breaker, the
//! intake ring, one worker pool per stage with bounded queues between
//! them, the record arena and the shared telemetry and audit sinks.
//!
//! Admission is two-gated. The circuit breaker rejects while open, then
//! the intake ring rejects when full; neither gate consumes a ring
//! sequence for a trade that is turned away. Accepted records flow
//! validation to execution and reach exactly one terminal status.

use crate::arena::{RecordArena, RecordHandle};
use crate::audit::{AuditSink, NullAuditSink};
use crate::breaker::CircuitBreaker;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::queue::BoundedWorkQueue;
use crate::ring::SequenceGatedBuffer;
use crate::stage::{ExecutionStage, PricingStage, RiskStage, Stage, ValidationStage};
use crate::telemetry::{LatencyRecorder, TelemetrySink};
use crate::trade::{TradeIntent, TradeRecord};
use crate::worker::{StageServices, StageWorkerPool, WorkSource};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// The trade-processing pipeline
pub struct PipelineCoordinator {
    config: PipelineConfig,
    intake: Arc<SequenceGatedBuffer<RecordHandle>>,
    pools: Vec<StageWorkerPool>,
    arena: Arc<RecordArena>,
    breaker: Arc<CircuitBreaker>,
    telemetry: Arc<LatencyRecorder>,
    audit: Arc<dyn AuditSink>,
    next_trade_id: AtomicU64,
    in_flight: Arc<AtomicU64>,
    accepting: AtomicBool,
    stopped: AtomicBool,
    started: AtomicBool,
}

impl PipelineCoordinator {
    /// Build a pipeline with the standard four stages and no audit trail
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        Self::with_audit(config, Arc::new(NullAuditSink))
    }

    /// Build a pipeline with the standard four stages
    #[must_use]
    pub fn with_audit(config: PipelineConfig, audit: Arc<dyn AuditSink>) -> Self {
        let stages: Vec<Arc<dyn Stage>> = vec![
            Arc::new(ValidationStage),
            Arc::new(PricingStage),
            Arc::new(RiskStage::new(config.max_notional)),
            Arc::new(ExecutionStage),
        ];
        Self::with_stages(config, stages, audit)
    }

    /// Build a pipeline over caller-provided stages, wired in order
    ///
    /// The first stage reads from the intake ring; every later stage
    /// reads from a bounded queue fed by its predecessor. Workers are
    /// not started until [`start`](Self::start).
    ///
    /// # Panics
    ///
    /// Panics when `stages` is empty.
    #[must_use]
    pub fn with_stages(
        config: PipelineConfig,
        stages: Vec<Arc<dyn Stage>>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        assert!(!stages.is_empty(), "pipeline needs at least one stage");

        let intake = Arc::new(SequenceGatedBuffer::new(
            config.buffer_capacity,
            config.claim_spin_limit,
        ));
        let arena = RecordArena::new(config.arena_capacity);
        let breaker = Arc::new(CircuitBreaker::new(
            config.breaker.failure_threshold,
            config.breaker.reset_timeout_ms,
        ));
        let telemetry = Arc::new(LatencyRecorder::new());
        let in_flight = Arc::new(AtomicU64::new(0));
        let services = StageServices {
            breaker: Arc::clone(&breaker),
            telemetry: Arc::clone(&telemetry) as Arc<dyn TelemetrySink>,
            audit: Arc::clone(&audit),
            in_flight: Arc::clone(&in_flight),
        };

        let stage_count = stages.len();
        let mut pools = Vec::with_capacity(stage_count);
        let mut source = WorkSource::Ring(Arc::clone(&intake));
        for (index, stage) in stages.into_iter().enumerate() {
            let pool = StageWorkerPool::new(
                stage,
                source.clone(),
                config.workers_per_stage,
                config.dedup_window,
                services.clone(),
            );
            // Every stage but the last feeds a queue to its successor
            if index + 1 < stage_count {
                let queue = Arc::new(BoundedWorkQueue::new(config.queue_capacity));
                pool.set_downstream(Arc::clone(&queue));
                source = WorkSource::Queue(queue);
            }
            pools.push(pool);
        }

        Self {
            config,
            intake,
            pools,
            arena,
            breaker,
            telemetry,
            audit,
            next_trade_id: AtomicU64::new(0),
            in_flight,
            accepting: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            started: AtomicBool::new(false),
        }
    }

    /// Start every stage's worker threads, idempotent
    pub fn start(&self) -> anyhow::Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        for pool in &self.pools {
            pool.start()?;
        }
        info!(
            stages = self.pools.len(),
            workers_per_stage = self.config.workers_per_stage,
            buffer_capacity = self.intake.capacity(),
            "trade pipeline started"
        );
        Ok(())
    }

    /// Submit a trade for processing
    ///
    /// Checks the circuit breaker before touching the intake ring, so a
    /// rejected submission never consumes a ring sequence. Returns the
    /// assigned trade id on admission.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Shutdown`] after shutdown began,
    /// [`PipelineError::AdmissionDenied`] while the breaker is open and
    /// [`PipelineError::CapacityExceeded`] when the intake ring is full.
    pub fn submit(&self, intent: TradeIntent) -> PipelineResult<u64> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(PipelineError::Shutdown);
        }
        let trade_id = self.next_trade_id.fetch_add(1, Ordering::Relaxed) + 1;

        if !self.breaker.allow() {
            self.telemetry.increment_counter("rejected");
            let record = TradeRecord::new(trade_id, intent);
            self.audit
                .log_event(&record, "REJECTED", "circuit breaker open");
            return Err(PipelineError::AdmissionDenied);
        }

        let mut handle = self.arena.acquire_or_heap();
        handle.reset_for(trade_id, &intent);
        self.telemetry.increment_counter("received");
        self.audit.log_event(&handle, "RECEIVED", "accepted");

        self.in_flight.fetch_add(1, Ordering::AcqRel);
        match self.intake.try_push_with(handle, |record, sequence| {
            record.sequence = sequence;
        }) {
            Ok(_sequence) => Ok(trade_id),
            Err(mut returned) => {
                self.in_flight.fetch_sub(1, Ordering::AcqRel);
                self.telemetry.increment_counter("rejected");
                returned.reject("system at capacity");
                self.audit.log_event(&returned, "REJECTED", "buffer full");
                Err(PipelineError::CapacityExceeded)
            }
        }
    }

    /// Drain and stop the pipeline
    ///
    /// New submissions are refused immediately. In-flight records get up
    /// to `grace` to reach a terminal status; whatever remains afterwards
    /// is abandoned. Pools stop back to front so a worker blocked on a
    /// full downstream queue is released by that queue's shutdown rather
    /// than wedging the drain. Idempotent.
    pub fn shutdown(&self, grace: Duration) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.accepting.store(false, Ordering::Release);

        let deadline = Instant::now() + grace;
        while self.in_flight.load(Ordering::Acquire) > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        let remaining = self.in_flight.load(Ordering::Acquire);
        if remaining > 0 {
            warn!(remaining, "shutdown grace expired, abandoning in-flight records");
        }

        for pool in self.pools.iter().rev() {
            pool.stop();
        }
        self.audit.shutdown();
        info!(
            processed = self.telemetry.counter("processed"),
            rejected = self.telemetry.counter("rejected"),
            errors = self.telemetry.counter("errors"),
            "trade pipeline stopped"
        );
    }

    /// Latency histograms and throughput counters
    #[must_use]
    pub fn telemetry(&self) -> &LatencyRecorder {
        &self.telemetry
    }

    /// The admission circuit breaker
    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// The audit sink the pipeline writes to
    #[must_use]
    pub fn audit(&self) -> &dyn AuditSink {
        self.audit.as_ref()
    }

    /// The record arena backing admissions
    #[must_use]
    pub fn arena(&self) -> &RecordArena {
        &self.arena
    }

    /// Records admitted but not yet terminal
    #[must_use]
    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Records currently waiting in the intake ring
    #[must_use]
    pub fn intake_depth(&self) -> usize {
        self.intake.len()
    }

    /// Effective configuration
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}

impl Drop for PipelineCoordinator {
    fn drop(&mut self) {
        // Last-resort cleanup for pipelines dropped without shutdown
        self.shutdown(Duration::ZERO);
    }
}
