//! Sequence-gated ring buffer for the pipeline intake
//!
//! Fixed-capacity MPMC ring where every slot is guarded by a stamp word
//! combining a sequence number with a 2-bit claim/publish phase. Producers
//! and consumers coordinate purely through stamp comparisons and memory
//! fences; there are no locks anywhere on the path.
//!
//! # Design
//! - Capacity is rounded up to the next power of two so slot lookup is a
//!   mask, not a modulo.
//! - A claim succeeds only when the slot is free for that exact sequence,
//!   meaning it was consumed `capacity` sequences earlier. A consume
//!   succeeds only when the slot is published for that exact sequence.
//!   Consuming releases the slot by advancing its stamp `capacity` ahead.
//! - Both transitions are compare-and-swap, so at most one producer wins a
//!   claim and at most one consumer wins a consume for any sequence.
//! - Waits are bounded spins with a fence per iteration. A claim that
//!   exhausts its budget reports the buffer full; it is never retried
//!   internally, keeping worst-case submission latency finite.

use crossbeam::utils::CachePadded;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, Ordering, fence};

// Slot stamp layout: sequence in the upper 62 bits, phase in the lower 2.
// Phases advance FREE -> CLAIMED -> PUBLISHED -> CONSUMING, then back to
// FREE with the sequence moved one lap forward.
const PHASE_BITS: u32 = 2;
const PHASE_FREE: u64 = 0;
const PHASE_CLAIMED: u64 = 1;
const PHASE_PUBLISHED: u64 = 2;
const PHASE_CONSUMING: u64 = 3;

#[inline(always)]
const fn stamp(sequence: u64, phase: u64) -> u64 {
    (sequence << PHASE_BITS) | phase
}

/// One buffer position: stamp word plus the payload cell it guards
struct Slot<T> {
    stamp: AtomicU64,
    cell: UnsafeCell<MaybeUninit<T>>,
}

/// Lock-free sequence-gated MPMC ring buffer
///
/// Two call surfaces share the same slots:
/// - `try_claim` / `try_consume` operate on caller-supplied sequences and
///   are the raw gating contract.
/// - `try_push` / `try_pop` manage producer and consumer cursors
///   internally. The producer cursor advances only when a claim succeeds,
///   so a rejected push never leaves a sequence hole for consumers to
///   wait on.
pub struct SequenceGatedBuffer<T> {
    slots: Box<[Slot<T>]>,
    mask: u64,
    capacity: u64,
    spin_limit: u32,
    /// Next sequence to claim
    head: CachePadded<AtomicU64>,
    /// Next sequence to consume
    tail: CachePadded<AtomicU64>,
}

// SAFETY: slots are only ever accessed by the single claim or consume
// winner for their current sequence, established via CAS on the stamp.
unsafe impl<T: Send> Send for SequenceGatedBuffer<T> {}
unsafe impl<T: Send> Sync for SequenceGatedBuffer<T> {}

impl<T> SequenceGatedBuffer<T> {
    /// Create a buffer with at least `capacity` slots
    ///
    /// Capacity is normalized to the next power of two and is never
    /// below one. `spin_limit` bounds every claim and consume wait.
    #[must_use]
    pub fn new(capacity: usize, spin_limit: u32) -> Self {
        let capacity = capacity.max(1).next_power_of_two() as u64;
        let slots = (0..capacity)
            .map(|i| Slot {
                stamp: AtomicU64::new(stamp(i, PHASE_FREE)),
                cell: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            slots,
            mask: capacity - 1,
            capacity,
            spin_limit,
            head: CachePadded::new(AtomicU64::new(0)),
            tail: CachePadded::new(AtomicU64::new(0)),
        }
    }

    /// Buffer capacity after power-of-two normalization
    #[must_use]
    #[inline]
    pub const fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// Published-but-unconsumed slots, approximate under concurrency
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        head.saturating_sub(tail) as usize
    }

    /// Whether no slots are outstanding
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline(always)]
    fn slot(&self, sequence: u64) -> &Slot<T> {
        // SAFETY: mask keeps the index inside the slot array
        unsafe { self.slots.get_unchecked((sequence & self.mask) as usize) }
    }

    /// Claim the slot for `sequence` and publish `item` into it
    ///
    /// Succeeds only if the slot is free for exactly this sequence.
    /// Spins up to the configured budget with a fence per iteration, then
    /// gives the item back; the caller treats that as buffer full.
    pub fn try_claim(&self, sequence: u64, item: T) -> Result<(), T> {
        let slot = self.slot(sequence);
        let free = stamp(sequence, PHASE_FREE);
        let claimed = stamp(sequence, PHASE_CLAIMED);

        for _ in 0..self.spin_limit {
            if slot
                .stamp
                .compare_exchange_weak(free, claimed, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                // SAFETY: the CAS made us the unique owner of this slot
                // until we publish; the cell holds no live value.
                unsafe { (*slot.cell.get()).write(item) };
                slot.stamp
                    .store(stamp(sequence, PHASE_PUBLISHED), Ordering::Release);
                return Ok(());
            }
            fence(Ordering::Acquire);
            std::hint::spin_loop();
        }
        Err(item)
    }

    /// Consume the item published for `sequence`
    ///
    /// Succeeds only if the slot is published for exactly this sequence.
    /// On success the slot is released for `sequence + capacity`. Returns
    /// `None` once the spin budget is exhausted.
    pub fn try_consume(&self, sequence: u64) -> Option<T> {
        let slot = self.slot(sequence);
        let published = stamp(sequence, PHASE_PUBLISHED);
        let consuming = stamp(sequence, PHASE_CONSUMING);

        for _ in 0..self.spin_limit {
            if slot
                .stamp
                .compare_exchange_weak(
                    published,
                    consuming,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                // SAFETY: the CAS made us the unique reader; the cell was
                // initialized when the slot was published.
                let item = unsafe { (*slot.cell.get()).assume_init_read() };
                slot.stamp.store(
                    stamp(sequence.wrapping_add(self.capacity), PHASE_FREE),
                    Ordering::Release,
                );
                return Some(item);
            }
            fence(Ordering::Acquire);
            std::hint::spin_loop();
        }
        None
    }

    /// Claim the next producer sequence and publish `item`
    ///
    /// `before_publish` runs after the sequence is assigned and before the
    /// item becomes visible, so the caller can stamp the sequence into the
    /// payload. Returns the claimed sequence, or the item back when the
    /// buffer stays full for the whole spin budget. The producer cursor
    /// only advances on success.
    pub fn try_push_with(
        &self,
        mut item: T,
        before_publish: impl FnOnce(&mut T, u64),
    ) -> Result<u64, T> {
        let mut spins = 0;
        loop {
            let sequence = self.head.load(Ordering::Relaxed);
            let slot = self.slot(sequence);
            let observed = slot.stamp.load(Ordering::Acquire);
            let free = stamp(sequence, PHASE_FREE);

            if observed == free {
                if self
                    .head
                    .compare_exchange_weak(
                        sequence,
                        sequence + 1,
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    )
                    .is_err()
                {
                    continue;
                }
                // Winning the cursor makes this sequence ours; the slot
                // claim cannot be contested.
                if slot
                    .stamp
                    .compare_exchange(
                        free,
                        stamp(sequence, PHASE_CLAIMED),
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_err()
                {
                    continue;
                }
                before_publish(&mut item, sequence);
                // SAFETY: unique owner until publish, cell is vacant
                unsafe { (*slot.cell.get()).write(item) };
                slot.stamp
                    .store(stamp(sequence, PHASE_PUBLISHED), Ordering::Release);
                return Ok(sequence);
            }

            if observed < free {
                // Slot still carries the previous lap: buffer is full
                spins += 1;
                if spins >= self.spin_limit {
                    return Err(item);
                }
                fence(Ordering::Acquire);
                std::hint::spin_loop();
            }
            // observed > free means the cursor read was stale; reload
        }
    }

    /// Claim the next producer sequence and publish `item`
    pub fn try_push(&self, item: T) -> Result<u64, T> {
        self.try_push_with(item, |_, _| {})
    }

    /// Consume the next published item in sequence order
    ///
    /// Multiple consumers may race; each sequence is delivered to exactly
    /// one of them. Returns `None` when nothing is published within the
    /// spin budget.
    pub fn try_pop(&self) -> Option<T> {
        let mut spins = 0;
        loop {
            let sequence = self.tail.load(Ordering::Relaxed);
            let slot = self.slot(sequence);
            let observed = slot.stamp.load(Ordering::Acquire);
            let published = stamp(sequence, PHASE_PUBLISHED);

            if observed == published {
                if self
                    .tail
                    .compare_exchange_weak(
                        sequence,
                        sequence + 1,
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    )
                    .is_err()
                {
                    continue;
                }
                if slot
                    .stamp
                    .compare_exchange(
                        published,
                        stamp(sequence, PHASE_CONSUMING),
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_err()
                {
                    continue;
                }
                // SAFETY: unique reader, cell was initialized at publish
                let item = unsafe { (*slot.cell.get()).assume_init_read() };
                slot.stamp.store(
                    stamp(sequence.wrapping_add(self.capacity), PHASE_FREE),
                    Ordering::Release,
                );
                return Some(item);
            }

            if observed < published {
                // Not yet published: the buffer is empty at this cursor
                spins += 1;
                if spins >= self.spin_limit {
                    return None;
                }
                fence(Ordering::Acquire);
                std::hint::spin_loop();
            }
            // observed > published means a stale cursor read; reload
        }
    }
}

impl<T> Drop for SequenceGatedBuffer<T> {
    fn drop(&mut self) {
        // Only published slots hold live values; claimed-but-unpublished
        // slots were never written past initialization.
        for slot in &*self.slots {
            let observed = slot.stamp.load(Ordering::Relaxed);
            if observed & ((1 << PHASE_BITS) - 1) == PHASE_PUBLISHED {
                // SAFETY: published cells are initialized and unaliased
                // once drop has exclusive access.
                unsafe { (*slot.cell.get()).assume_init_drop() };
            }
        }
    }
}
