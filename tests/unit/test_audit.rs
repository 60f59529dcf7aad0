//! Audit trail written through a live pipeline
//!
//! Tests cover:
//! - Pipe-delimited lines for every admission and stage event
//! - Rejected submissions appearing in the trail
//! - Flush-on-shutdown semantics of the file sink

use crate::utils::{init_test_env, market_intent, small_config, wait_until};
use std::sync::Arc;
use std::time::Duration;
use trade_pipeline::{AuditConfig, AuditLog, PipelineConfig, PipelineCoordinator};

fn audited_config(directory: &std::path::Path) -> PipelineConfig {
    PipelineConfig {
        audit: AuditConfig {
            queue_capacity: 1024,
            directory: directory.to_path_buf(),
        },
        ..small_config()
    }
}

#[cfg(test)]
mod audit_tests {
    use super::*;

    #[test]
    fn test_pipeline_writes_pipe_delimited_trail() {
        init_test_env();
        let dir = tempfile::tempdir().unwrap();
        let config = audited_config(dir.path());
        let log = Arc::new(AuditLog::new(&config.audit).unwrap());
        let path = log.path().to_path_buf();

        let pipeline = PipelineCoordinator::with_audit(config, log);
        pipeline.start().unwrap();
        for _ in 0..3 {
            pipeline.submit(market_intent()).unwrap();
        }
        wait_until(Duration::from_secs(5), || pipeline.in_flight() == 0);
        pipeline.shutdown(Duration::from_secs(1));

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        // RECEIVED plus four stage events per trade
        assert_eq!(lines.len(), 15);
        for line in &lines {
            assert_eq!(line.split('|').count(), 9, "malformed line: {line}");
        }
        assert!(lines[0].contains("|RECEIVED|accepted"));
        assert!(lines.iter().any(|line| line.contains("|AAPL|150.5000|100|")));
        let executions = lines
            .iter()
            .filter(|line| line.contains("|EXECUTION|SUCCESS"))
            .count();
        assert_eq!(executions, 3);
    }

    #[test]
    fn test_rejected_submissions_appear_in_the_trail() {
        init_test_env();
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            buffer_capacity: 8,
            ..audited_config(dir.path())
        };
        let log = Arc::new(AuditLog::new(&config.audit).unwrap());
        let path = log.path().to_path_buf();

        // Workers stay paused so the ninth submission overflows the ring
        let pipeline = PipelineCoordinator::with_audit(config, log);
        for _ in 0..9 {
            let _ = pipeline.submit(market_intent());
        }
        pipeline.shutdown(Duration::ZERO);

        let contents = std::fs::read_to_string(&path).unwrap();
        let received = contents
            .lines()
            .filter(|line| line.contains("|RECEIVED|"))
            .count();
        let rejected: Vec<&str> = contents
            .lines()
            .filter(|line| line.contains("|REJECTED|"))
            .collect();
        assert_eq!(received, 9);
        assert_eq!(rejected.len(), 1);
        assert!(rejected[0].contains("buffer full"));
    }
}
