//! End-to-end pipeline scenarios
//!
//! Tests cover:
//! - A valid trade reaching execution through all four stages
//! - Backpressure rejection when the intake ring is full
//! - Circuit breaker opening on consecutive faults and recovering
//! - Concurrent submission with exactly-once terminal outcomes
//! - Risk limit rejection and drain-based shutdown

use crate::utils::{init_test_env, market_intent, small_config, wait_until};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use trade_pipeline::{
    BreakerState, MemoryAuditSink, PipelineConfig, PipelineCoordinator, PipelineError, Stage,
    StageKind, StageOutcome, TradeRecord,
};

/// Stage that faults until told otherwise
struct FlakyStage {
    healthy: Arc<AtomicBool>,
}

impl Stage for FlakyStage {
    fn kind(&self) -> StageKind {
        StageKind::Validation
    }

    fn process(&self, _record: &mut TradeRecord) -> Result<StageOutcome, PipelineError> {
        if self.healthy.load(Ordering::Acquire) {
            Ok(StageOutcome::Forward)
        } else {
            Err(PipelineError::ProcessingFault {
                stage: "validation".to_string(),
                message: "downstream dependency unavailable".to_string(),
            })
        }
    }
}

#[cfg(test)]
mod pipeline_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_trade_executes_end_to_end() {
        init_test_env();
        let audit = Arc::new(MemoryAuditSink::new());
        let pipeline = PipelineCoordinator::with_audit(small_config(), audit.clone());
        pipeline.start().unwrap();

        let trade_id = pipeline.submit(market_intent()).unwrap();
        wait_until(Duration::from_secs(5), || pipeline.in_flight() == 0);
        pipeline.shutdown(Duration::from_secs(1));

        let events: Vec<String> = audit
            .events_for(trade_id)
            .iter()
            .map(|event| event.event.clone())
            .collect();
        assert_eq!(
            events,
            ["RECEIVED", "VALIDATION", "PRICING", "RISK", "EXECUTION"]
        );

        let snapshot = pipeline.telemetry().snapshot();
        assert_eq!(snapshot.received, 1);
        assert_eq!(snapshot.processed, 1);
        assert_eq!(snapshot.rejected, 0);
        assert_eq!(snapshot.errors, 0);
        assert_eq!(pipeline.breaker().state(), BreakerState::Closed);
    }

    #[test]
    fn test_backpressure_rejects_when_intake_is_full() {
        init_test_env();
        let config = PipelineConfig {
            buffer_capacity: 8,
            ..small_config()
        };
        // Never started: workers stay paused and the ring cannot drain
        let pipeline = PipelineCoordinator::new(config);

        let outcomes: Vec<_> = (0..20).map(|_| pipeline.submit(market_intent())).collect();
        let accepted = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
        let rejected = outcomes
            .iter()
            .filter(|outcome| matches!(outcome, Err(PipelineError::CapacityExceeded)))
            .count();

        assert_eq!(accepted, 8);
        assert_eq!(rejected, 12);
        assert_eq!(pipeline.intake_depth(), 8);
        assert_eq!(
            PipelineError::CapacityExceeded.to_string(),
            "system at capacity"
        );
    }

    #[test]
    fn test_breaker_opens_after_consecutive_faults() {
        init_test_env();
        let audit = Arc::new(MemoryAuditSink::new());
        let healthy = Arc::new(AtomicBool::new(false));
        let pipeline = PipelineCoordinator::with_stages(
            small_config(),
            vec![Arc::new(FlakyStage {
                healthy: healthy.clone(),
            })],
            audit.clone(),
        );
        pipeline.start().unwrap();

        let threshold = pipeline.config().breaker.failure_threshold;
        for _ in 0..threshold {
            pipeline.submit(market_intent()).unwrap();
        }
        wait_until(Duration::from_secs(5), || pipeline.in_flight() == 0);
        assert_eq!(pipeline.breaker().state(), BreakerState::Open);

        let refused = pipeline.submit(market_intent());
        assert_eq!(refused, Err(PipelineError::AdmissionDenied));
        assert_eq!(
            refused.unwrap_err().to_string(),
            "circuit breaker open"
        );

        // The refused submission was turned away before any stage ran
        let stage_events = audit
            .events()
            .iter()
            .filter(|event| event.event == "VALIDATION")
            .count();
        assert_eq!(stage_events as u64, threshold);
        assert_eq!(pipeline.telemetry().snapshot().errors, threshold);
        pipeline.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn test_breaker_recovers_through_a_successful_probe() {
        init_test_env();
        let healthy = Arc::new(AtomicBool::new(false));
        let config = PipelineConfig {
            breaker: trade_pipeline::BreakerConfig {
                failure_threshold: 3,
                reset_timeout_ms: 100,
            },
            ..small_config()
        };
        let pipeline = PipelineCoordinator::with_stages(
            config,
            vec![Arc::new(FlakyStage {
                healthy: healthy.clone(),
            })],
            Arc::new(MemoryAuditSink::new()),
        );
        pipeline.start().unwrap();

        for _ in 0..3 {
            pipeline.submit(market_intent()).unwrap();
        }
        wait_until(Duration::from_secs(5), || pipeline.in_flight() == 0);
        assert_eq!(pipeline.breaker().state(), BreakerState::Open);
        assert_eq!(
            pipeline.submit(market_intent()),
            Err(PipelineError::AdmissionDenied)
        );

        // Heal the stage and wait out the reset timeout
        healthy.store(true, Ordering::Release);
        thread::sleep(Duration::from_millis(150));

        let probe = pipeline.submit(market_intent());
        assert!(probe.is_ok(), "probe submission should be admitted");
        wait_until(Duration::from_secs(5), || pipeline.in_flight() == 0);
        wait_until(Duration::from_secs(5), || {
            pipeline.breaker().state() == BreakerState::Closed
        });

        assert!(pipeline.submit(market_intent()).is_ok());
        wait_until(Duration::from_secs(5), || pipeline.in_flight() == 0);
        pipeline.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn test_concurrent_submitters_resolve_exactly_once() {
        init_test_env();
        let audit = Arc::new(MemoryAuditSink::new());
        let config = PipelineConfig {
            buffer_capacity: 1024,
            queue_capacity: 1024,
            workers_per_stage: 2,
            arena_capacity: 1024,
            ..PipelineConfig::default()
        };
        let pipeline = Arc::new(PipelineCoordinator::with_audit(config, audit.clone()));
        pipeline.start().unwrap();

        let threads = 4;
        let per_thread = 200;
        let submitters: Vec<_> = (0..threads)
            .map(|_| {
                let pipeline = Arc::clone(&pipeline);
                thread::spawn(move || {
                    let mut ids = Vec::with_capacity(per_thread);
                    for _ in 0..per_thread {
                        match pipeline.submit(market_intent()) {
                            Ok(id) => ids.push(id),
                            Err(PipelineError::CapacityExceeded) => {
                                thread::yield_now();
                            }
                            Err(other) => panic!("unexpected error: {other}"),
                        }
                    }
                    ids
                })
            })
            .collect();

        let mut accepted: Vec<u64> = Vec::new();
        for submitter in submitters {
            accepted.extend(submitter.join().unwrap());
        }
        wait_until(Duration::from_secs(10), || pipeline.in_flight() == 0);
        pipeline.shutdown(Duration::from_secs(1));

        let snapshot = pipeline.telemetry().snapshot();
        assert_eq!(snapshot.processed, accepted.len() as u64);
        assert_eq!(snapshot.duplicates, 0);

        // Every accepted trade executed exactly once
        let executed: Vec<u64> = audit
            .events()
            .iter()
            .filter(|event| event.event == "EXECUTION")
            .map(|event| event.trade_id)
            .collect();
        let unique: std::collections::HashSet<u64> = executed.iter().copied().collect();
        assert_eq!(executed.len(), accepted.len());
        assert_eq!(unique.len(), accepted.len());
    }

    #[test]
    fn test_risk_limit_rejects_oversized_notional() {
        init_test_env();
        let audit = Arc::new(MemoryAuditSink::new());
        let config = PipelineConfig {
            // AAPL test intent carries a 15_050 notional
            max_notional: 10_000.0,
            ..small_config()
        };
        let pipeline = PipelineCoordinator::with_audit(config, audit.clone());
        pipeline.start().unwrap();

        let trade_id = pipeline.submit(market_intent()).unwrap();
        wait_until(Duration::from_secs(5), || pipeline.in_flight() == 0);
        pipeline.shutdown(Duration::from_secs(1));

        let events = audit.events_for(trade_id);
        let names: Vec<&str> = events.iter().map(|event| event.event.as_str()).collect();
        assert_eq!(names, ["RECEIVED", "VALIDATION", "PRICING", "RISK"]);
        assert!(events[3].details.starts_with("FAILED:"));

        let snapshot = pipeline.telemetry().snapshot();
        assert_eq!(snapshot.rejected, 1);
        assert_eq!(snapshot.processed, 0);
        assert_eq!(snapshot.errors, 0);
    }

    #[test]
    fn test_shutdown_drains_in_flight_records() {
        init_test_env();
        let config = PipelineConfig {
            buffer_capacity: 64,
            queue_capacity: 64,
            arena_capacity: 64,
            ..small_config()
        };
        let pipeline = PipelineCoordinator::new(config);
        pipeline.start().unwrap();

        let mut accepted = 0u64;
        for _ in 0..50 {
            if pipeline.submit(market_intent()).is_ok() {
                accepted += 1;
            }
        }
        // No explicit drain wait: shutdown's grace period does it
        pipeline.shutdown(Duration::from_secs(5));

        assert_eq!(pipeline.in_flight(), 0);
        assert_eq!(pipeline.telemetry().snapshot().processed, accepted);
    }
}
