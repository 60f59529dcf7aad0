//! Property-based tests for pipeline invariants
//!
//! Uses Proptest to verify that the lock-free structures and the trade
//! lifecycle hold their invariants under randomized inputs:
//!
//! - The ring buffer is observationally a bounded FIFO queue
//! - Accepted pushes never exceed capacity and sequences stay dense
//! - The trade lifecycle never skips a stage and terminals are sticky

use proptest::prelude::*;
use std::collections::VecDeque;
use trade_pipeline::{OrderType, SequenceGatedBuffer, TradeIntent, TradeRecord, TradeStatus};

fn arb_status() -> impl Strategy<Value = TradeStatus> {
    prop_oneof![
        Just(TradeStatus::Received),
        Just(TradeStatus::Validated),
        Just(TradeStatus::Priced),
        Just(TradeStatus::RiskChecked),
        Just(TradeStatus::Executed),
        Just(TradeStatus::Rejected),
        Just(TradeStatus::Cancelled),
    ]
}

/// Position of a status along the happy path, if it is on it
fn pipeline_rank(status: TradeStatus) -> Option<u8> {
    match status {
        TradeStatus::Received => Some(0),
        TradeStatus::Validated => Some(1),
        TradeStatus::Priced => Some(2),
        TradeStatus::RiskChecked => Some(3),
        TradeStatus::Executed => Some(4),
        TradeStatus::Rejected | TradeStatus::Cancelled => None,
    }
}

fn test_intent() -> TradeIntent {
    TradeIntent {
        symbol: "AAPL".to_string(),
        price: 150.50,
        quantity: 100,
        venue: "NYSE".to_string(),
        order_type: OrderType::Market,
        counterparty: "CP1".to_string(),
        trader: "TRADER1".to_string(),
        account: "ACC1".to_string(),
    }
}

proptest! {
    #[test]
    fn ring_behaves_like_a_bounded_fifo(
        ops in prop::collection::vec(any::<bool>(), 1..200),
        capacity_pow in 0u32..5,
    ) {
        let capacity = 1usize << capacity_pow;
        let ring = SequenceGatedBuffer::new(capacity, 10);
        let mut model: VecDeque<u64> = VecDeque::new();
        let mut next = 0u64;

        for push in ops {
            if push {
                match ring.try_push(next) {
                    Ok(_) => model.push_back(next),
                    Err(returned) => {
                        prop_assert_eq!(returned, next);
                        prop_assert_eq!(model.len(), capacity);
                    }
                }
                next += 1;
            } else {
                prop_assert_eq!(ring.try_pop(), model.pop_front());
            }
            prop_assert_eq!(ring.len(), model.len());
        }

        while let Some(expected) = model.pop_front() {
            prop_assert_eq!(ring.try_pop(), Some(expected));
        }
        prop_assert!(ring.is_empty());
    }

    #[test]
    fn accepted_pushes_never_exceed_capacity(
        capacity_pow in 0u32..6,
        attempts in 1usize..100,
    ) {
        let capacity = 1usize << capacity_pow;
        let ring = SequenceGatedBuffer::new(capacity, 5);
        let mut accepted = 0usize;
        for item in 0..attempts {
            if ring.try_push(item as u64).is_ok() {
                accepted += 1;
            }
        }
        prop_assert_eq!(accepted, attempts.min(capacity));
        prop_assert_eq!(ring.len(), accepted);
    }

    #[test]
    fn sequences_stay_dense_in_claim_order(count in 1usize..64) {
        let ring = SequenceGatedBuffer::new(64, 10);
        for item in 0..count {
            prop_assert_eq!(ring.try_push(item as u64).ok(), Some(item as u64));
        }
        for item in 0..count {
            prop_assert_eq!(ring.try_pop(), Some(item as u64));
        }
    }

    #[test]
    fn lifecycle_never_skips_a_stage(targets in prop::collection::vec(arb_status(), 1..24)) {
        let mut record = TradeRecord::new(1, test_intent());
        for target in targets {
            let before = record.status;
            let advanced = record.advance(target);
            if advanced {
                match (pipeline_rank(before), pipeline_rank(target)) {
                    (Some(from), Some(to)) => prop_assert_eq!(to, from + 1),
                    (Some(_), None) => {} // terminal exit is allowed anywhere
                    (None, _) => prop_assert!(false, "advanced out of a terminal state"),
                }
            } else {
                // A refused transition leaves the record untouched
                prop_assert_eq!(record.status, before);
            }
            if before.is_terminal() {
                prop_assert_eq!(record.status, before);
            }
        }
    }

    #[test]
    fn rejection_reason_is_first_writer_wins(reasons in prop::collection::vec("[a-z]{1,12}", 2..6)) {
        let mut record = TradeRecord::new(1, test_intent());
        for reason in &reasons {
            record.reject(reason.clone());
        }
        prop_assert_eq!(record.status, TradeStatus::Rejected);
        prop_assert_eq!(record.rejection_reason.as_deref(), Some(reasons[0].as_str()));
    }
}
