//! Stage worker pools
//!
//! Each stage runs a pool of worker threads that pull records from the
//! stage's input (the intake ring for validation, a bounded queue for
//! everything after), apply the stage logic and forward survivors
//! downstream. Workers never die with their stage: panics are caught at
//! the stage boundary and treated as processing faults.
//!
//! Shutdown is drain-based. A pool first marks its workers as draining,
//! then closes its own input so blocked takes wake up, then joins the
//! threads. The coordinator stops pools back to front, so by the time a
//! pool is joined its downstream queue is already closed and a worker
//! blocked forwarding into it returns immediately.

use crate::arena::RecordHandle;
use crate::audit::AuditSink;
use crate::breaker::CircuitBreaker;
use crate::queue::BoundedWorkQueue;
use crate::ring::SequenceGatedBuffer;
use crate::stage::{Stage, StageOutcome};
use crate::telemetry::TelemetrySink;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::any::Any;
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::{error, warn};

const WORKER_RUNNING: u8 = 0;
const WORKER_DRAINING: u8 = 1;
const WORKER_STOPPED: u8 = 2;

/// Where a pool's workers pull records from
#[derive(Clone)]
pub enum WorkSource {
    /// The lock-free intake ring, polled without blocking
    Ring(Arc<SequenceGatedBuffer<RecordHandle>>),
    /// A bounded inter-stage queue with blocking takes
    Queue(Arc<BoundedWorkQueue<RecordHandle>>),
}

/// Services every stage pool shares with the rest of the pipeline
#[derive(Clone)]
pub struct StageServices {
    /// Admission circuit breaker, fed by stage outcomes
    pub breaker: Arc<CircuitBreaker>,
    /// Latency and counter sink
    pub telemetry: Arc<dyn TelemetrySink>,
    /// Audit trail sink
    pub audit: Arc<dyn AuditSink>,
    /// Records admitted but not yet terminal, shared gauge
    pub in_flight: Arc<AtomicU64>,
}

/// Sliding window of recently seen trade ids for one stage
///
/// Bounded: once `window` ids are tracked, the oldest is forgotten per
/// new insertion. A forgotten id seen again reads as fresh, which is the
/// accepted trade-off for constant memory; a fresh id never reads as a
/// duplicate.
struct DedupWindow {
    window: usize,
    inner: Mutex<DedupInner>,
}

struct DedupInner {
    seen: FxHashSet<u64>,
    order: VecDeque<u64>,
}

impl DedupWindow {
    fn new(window: usize) -> Self {
        Self {
            window,
            inner: Mutex::new(DedupInner {
                seen: FxHashSet::default(),
                order: VecDeque::with_capacity(window.min(4096)),
            }),
        }
    }

    /// Returns true on first sighting, false for a duplicate
    fn check_and_insert(&self, trade_id: u64) -> bool {
        if self.window == 0 {
            return true;
        }
        let mut inner = self.inner.lock();
        if !inner.seen.insert(trade_id) {
            return false;
        }
        inner.order.push_back(trade_id);
        if inner.order.len() > self.window
            && let Some(oldest) = inner.order.pop_front()
        {
            inner.seen.remove(&oldest);
        }
        true
    }
}

/// A pool of identical workers for one pipeline stage
pub struct StageWorkerPool {
    stage: Arc<dyn Stage>,
    source: WorkSource,
    downstream: Mutex<Option<Arc<BoundedWorkQueue<RecordHandle>>>>,
    services: StageServices,
    dedup: Arc<DedupWindow>,
    workers: usize,
    states: Mutex<Vec<Arc<AtomicU8>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl StageWorkerPool {
    /// Create a pool without starting any threads
    #[must_use]
    pub fn new(
        stage: Arc<dyn Stage>,
        source: WorkSource,
        workers: usize,
        dedup_window: usize,
        services: StageServices,
    ) -> Self {
        Self {
            stage,
            source,
            downstream: Mutex::new(None),
            services,
            dedup: Arc::new(DedupWindow::new(dedup_window)),
            workers: workers.max(1),
            states: Mutex::new(Vec::new()),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Queue surviving records are forwarded to, must be set before
    /// `start` for every stage except the terminal one
    pub fn set_downstream(&self, queue: Arc<BoundedWorkQueue<RecordHandle>>) {
        *self.downstream.lock() = Some(queue);
    }

    /// Spawn the pool's worker threads
    pub fn start(&self) -> anyhow::Result<()> {
        let downstream = self.downstream.lock().clone();
        let mut states = self.states.lock();
        let mut handles = self.handles.lock();
        for index in 0..self.workers {
            let state = Arc::new(AtomicU8::new(WORKER_RUNNING));
            let worker = Worker {
                stage: Arc::clone(&self.stage),
                source: self.source.clone(),
                downstream: downstream.clone(),
                services: self.services.clone(),
                dedup: Arc::clone(&self.dedup),
                state: Arc::clone(&state),
            };
            let name = format!("{}-{index}", self.stage.kind().name());
            let handle = std::thread::Builder::new()
                .name(name)
                .spawn(move || worker.run())?;
            states.push(state);
            handles.push(handle);
        }
        Ok(())
    }

    /// Drain and stop the pool
    ///
    /// Marks workers as draining, closes the pool's input so blocked
    /// takes wake, and joins every thread. Idempotent. Callers stop
    /// pools back to front: a worker blocked forwarding into a full
    /// downstream queue is released by that queue's shutdown instead of
    /// wedging the join.
    pub fn stop(&self) {
        for state in self.states.lock().iter() {
            state.store(WORKER_DRAINING, Ordering::Release);
        }
        if let WorkSource::Queue(queue) = &self.source {
            queue.shutdown();
        }
        let handles: Vec<JoinHandle<()>> = self.handles.lock().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                error!(stage = self.stage.kind().name(), "stage worker panicked");
            }
        }
    }

    /// Number of worker threads this pool runs
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers
    }

    /// Whether every started worker has exited
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.states
            .lock()
            .iter()
            .all(|state| state.load(Ordering::Acquire) == WORKER_STOPPED)
    }
}

/// State owned by one worker thread
struct Worker {
    stage: Arc<dyn Stage>,
    source: WorkSource,
    downstream: Option<Arc<BoundedWorkQueue<RecordHandle>>>,
    services: StageServices,
    dedup: Arc<DedupWindow>,
    state: Arc<AtomicU8>,
}

impl Worker {
    fn run(self) {
        while let Some(record) = self.next() {
            self.process_one(record);
        }
        self.state.store(WORKER_STOPPED, Ordering::Release);
    }

    /// Next record from the source, or `None` once the source is closed
    /// (queue) or drained while the worker is draining (ring)
    fn next(&self) -> Option<RecordHandle> {
        match &self.source {
            WorkSource::Ring(ring) => loop {
                if let Some(record) = ring.try_pop() {
                    return Some(record);
                }
                if self.state.load(Ordering::Acquire) != WORKER_RUNNING {
                    return None;
                }
                std::thread::yield_now();
            },
            WorkSource::Queue(queue) => queue.take(),
        }
    }

    fn process_one(&self, mut record: RecordHandle) {
        let kind = self.stage.kind();
        if !self.dedup.check_and_insert(record.trade_id) {
            error!(
                trade_id = record.trade_id,
                stage = kind.name(),
                "duplicate delivery suppressed"
            );
            self.services.telemetry.increment_counter("duplicates");
            self.services.audit.log_event(&record, "DUPLICATE", kind.name());
            self.finish(record);
            return;
        }

        let start = Instant::now();
        let result = catch_unwind(AssertUnwindSafe(|| self.stage.process(&mut record)));
        let elapsed = u64::try_from(start.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.services.telemetry.record_latency(kind.name(), elapsed);

        match result {
            Ok(Ok(StageOutcome::Forward)) => {
                self.services.breaker.record_success();
                if !record.advance(kind.target_status()) {
                    warn!(
                        trade_id = record.trade_id,
                        status = ?record.status,
                        stage = kind.name(),
                        "status transition out of order"
                    );
                }
                self.services
                    .audit
                    .log_event(&record, kind.audit_label(), "SUCCESS");
                self.forward(record);
            }
            Ok(Ok(StageOutcome::Reject(reason))) => {
                self.services.telemetry.increment_counter("rejected");
                self.services.audit.log_event(
                    &record,
                    kind.audit_label(),
                    &format!("FAILED: {reason}"),
                );
                record.reject(reason);
                self.finish(record);
            }
            Ok(Err(fault)) => {
                self.services.telemetry.increment_counter("errors");
                self.services.breaker.record_failure();
                error!(
                    trade_id = record.trade_id,
                    stage = kind.name(),
                    %fault,
                    "stage fault"
                );
                self.services.audit.log_event(
                    &record,
                    kind.audit_label(),
                    &format!("ERROR: {fault}"),
                );
                record.reject(fault.to_string());
                self.finish(record);
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                self.services.telemetry.increment_counter("errors");
                self.services.breaker.record_failure();
                error!(
                    trade_id = record.trade_id,
                    stage = kind.name(),
                    message,
                    "stage panicked"
                );
                self.services.audit.log_event(
                    &record,
                    kind.audit_label(),
                    &format!("PANIC: {message}"),
                );
                record.reject(format!("processing fault in {}: {message}", kind.name()));
                self.finish(record);
            }
        }
    }

    /// Hand the record to the next stage, or close it out when this is
    /// the terminal stage
    fn forward(&self, record: RecordHandle) {
        match &self.downstream {
            Some(queue) => {
                if let Err(returned) = queue.put(record) {
                    // Downstream closed during forced shutdown
                    warn!(
                        trade_id = returned.trade_id,
                        "downstream queue closed, abandoning record"
                    );
                    self.finish(returned);
                }
            }
            None => {
                let total = u64::try_from(record.origin.elapsed().as_nanos())
                    .unwrap_or(u64::MAX);
                self.services.telemetry.record_latency("total", total);
                self.services.telemetry.increment_counter("processed");
                self.finish(record);
            }
        }
    }

    /// Terminal bookkeeping: the handle goes back to the arena and the
    /// record leaves the in-flight gauge
    fn finish(&self, record: RecordHandle) {
        drop(record);
        self.services.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "opaque panic payload".to_string())
}
