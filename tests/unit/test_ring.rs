//! Sequence-gated ring buffer behavior under contention
//!
//! Tests cover:
//! - Explicit claim/consume sequence discipline
//! - Single-winner claims when sequences are contested
//! - Dense sequence assignment under concurrent producers
//! - Exactly-once delivery across producer and consumer threads

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;
use trade_pipeline::SequenceGatedBuffer;

#[cfg(test)]
mod ring_tests {
    use super::*;

    #[test]
    fn test_claim_and_consume_follow_sequence_discipline() {
        let ring = SequenceGatedBuffer::new(4, 100);

        // Nothing published yet anywhere
        assert_eq!(ring.try_consume(0), None);

        ring.try_claim(0, "alpha").unwrap();
        ring.try_claim(1, "beta").unwrap();

        // Sequence 2 has no publication, 0 and 1 do
        assert_eq!(ring.try_consume(2), None);
        assert_eq!(ring.try_consume(0), Some("alpha"));
        assert_eq!(ring.try_consume(1), Some("beta"));
        assert_eq!(ring.try_consume(0), None);
    }

    #[test]
    fn test_contested_claim_admits_exactly_one_winner() {
        let ring = Arc::new(SequenceGatedBuffer::new(8, 10_000));
        let start = Arc::new(Barrier::new(4));

        let claimers: Vec<_> = (0..4)
            .map(|worker| {
                let ring = Arc::clone(&ring);
                let start = Arc::clone(&start);
                thread::spawn(move || {
                    start.wait();
                    ring.try_claim(0, worker).is_ok()
                })
            })
            .collect();

        let wins: usize = claimers
            .into_iter()
            .map(|claimer| usize::from(claimer.join().unwrap()))
            .sum();
        assert_eq!(wins, 1);
        assert!(ring.try_consume(0).is_some());
    }

    #[test]
    fn test_concurrent_pushes_assign_dense_sequences() {
        let ring = Arc::new(SequenceGatedBuffer::new(256, 100_000));
        let start = Arc::new(Barrier::new(4));

        let producers: Vec<_> = (0..4u64)
            .map(|worker| {
                let ring = Arc::clone(&ring);
                let start = Arc::clone(&start);
                thread::spawn(move || {
                    start.wait();
                    let mut claimed = Vec::with_capacity(64);
                    for item in 0..64u64 {
                        let value = worker * 1000 + item;
                        let sequence = ring.try_push(value).ok();
                        claimed.push(sequence.unwrap());
                    }
                    claimed
                })
            })
            .collect();

        let mut sequences: Vec<u64> = Vec::new();
        for producer in producers {
            sequences.extend(producer.join().unwrap());
        }
        sequences.sort_unstable();
        let expected: Vec<u64> = (0..256).collect();
        assert_eq!(sequences, expected);
    }

    #[test]
    fn test_mpmc_delivery_is_exactly_once() {
        let ring = Arc::new(SequenceGatedBuffer::new(64, 1_000_000));
        let producers = 3u64;
        let consumers = 3;
        let per_producer = 5_000u64;

        let producer_handles: Vec<_> = (0..producers)
            .map(|producer| {
                let ring = Arc::clone(&ring);
                thread::spawn(move || {
                    for item in 0..per_producer {
                        let mut value = producer * per_producer + item;
                        loop {
                            match ring.try_push(value) {
                                Ok(_) => break,
                                Err(returned) => {
                                    value = returned;
                                    thread::yield_now();
                                }
                            }
                        }
                    }
                })
            })
            .collect();

        let consumer_handles: Vec<_> = (0..consumers)
            .map(|_| {
                let ring = Arc::clone(&ring);
                thread::spawn(move || {
                    let mut seen = Vec::new();
                    loop {
                        match ring.try_pop() {
                            Some(u64::MAX) => break,
                            Some(value) => seen.push(value),
                            None => thread::yield_now(),
                        }
                    }
                    seen
                })
            })
            .collect();

        for producer in producer_handles {
            producer.join().unwrap();
        }
        // One poison per consumer; FIFO puts them after every real value
        for _ in 0..consumers {
            loop {
                if ring.try_push(u64::MAX).is_ok() {
                    break;
                }
                thread::yield_now();
            }
        }

        let mut delivered: Vec<u64> = Vec::new();
        for consumer in consumer_handles {
            delivered.extend(consumer.join().unwrap());
        }

        let total = producers * per_producer;
        assert_eq!(delivered.len() as u64, total);
        let unique: HashSet<u64> = delivered.iter().copied().collect();
        assert_eq!(unique.len() as u64, total);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_rejected_push_leaves_the_ring_consistent() {
        let ring = SequenceGatedBuffer::new(4, 10);
        for item in 0..4u64 {
            ring.try_push(item).unwrap();
        }
        assert!(ring.try_push(99).is_err());
        assert_eq!(ring.len(), 4);

        // The rejection left no hole: drain order is untouched
        for item in 0..4u64 {
            assert_eq!(ring.try_pop(), Some(item));
        }
        assert_eq!(ring.try_pop(), None);
        assert_eq!(ring.try_push(5).ok(), Some(4));
    }
}
