//! Pre-allocated arena of trade record slots
//!
//! Records are reused in place instead of heap-allocated per submission:
//! a slot keeps its string buffers between uses, so steady-state
//! submission does not allocate. The free list is a lock-free stack of
//! slot indices guarded by a generation tag against ABA.
//!
//! Exhaustion is not an error: `acquire_or_heap` falls back to a heap
//! allocation and counts it, so capacity tuning is observable.

use crate::trade::TradeRecord;
use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

// Free list head packs a 32-bit generation tag above a 32-bit slot
// index. The tag increments on every push and pop so a stale head value
// never CASes successfully.
const TAG_BITS: u32 = 32;
const INDEX_MASK: u64 = 0xFFFF_FFFF;
const NIL: u32 = u32::MAX;

#[inline(always)]
const fn pack(generation: u32, index: u32) -> u64 {
    ((generation as u64) << TAG_BITS) | (index as u64)
}

#[inline(always)]
#[allow(clippy::cast_possible_truncation)]
const fn unpack_index(head: u64) -> u32 {
    (head & INDEX_MASK) as u32
}

#[inline(always)]
#[allow(clippy::cast_possible_truncation)]
const fn unpack_generation(head: u64) -> u32 {
    (head >> TAG_BITS) as u32
}

/// Fixed-size arena of recycled trade records
pub struct RecordArena {
    slots: Box<[UnsafeCell<TradeRecord>]>,
    /// Per-slot link to the next free index, `NIL` at the end
    links: Box<[AtomicU32]>,
    /// Tagged head of the free stack
    free_head: AtomicU64,
    available: AtomicUsize,
    heap_fallbacks: AtomicU64,
}

// SAFETY: a slot is reachable through exactly one live handle between
// acquire and release; the free list hands out each index at most once.
unsafe impl Send for RecordArena {}
unsafe impl Sync for RecordArena {}

impl RecordArena {
    /// Create an arena with `capacity` pre-initialized record slots
    #[must_use]
    pub fn new(capacity: usize) -> Arc<Self> {
        let capacity = capacity.min(NIL as usize);
        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(TradeRecord::default()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let links = (0..capacity)
            .map(|i| {
                #[allow(clippy::cast_possible_truncation)]
                let next = if i + 1 < capacity { (i + 1) as u32 } else { NIL };
                AtomicU32::new(next)
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let head = if capacity == 0 { NIL } else { 0 };

        Arc::new(Self {
            slots,
            links,
            free_head: AtomicU64::new(pack(0, head)),
            available: AtomicUsize::new(capacity),
            heap_fallbacks: AtomicU64::new(0),
        })
    }

    /// Total slot count
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Slots currently on the free list
    #[must_use]
    pub fn available(&self) -> usize {
        self.available.load(Ordering::Relaxed)
    }

    /// Heap allocations taken because the arena was exhausted
    #[must_use]
    pub fn heap_fallbacks(&self) -> u64 {
        self.heap_fallbacks.load(Ordering::Relaxed)
    }

    /// Acquire a recycled slot, or `None` when the arena is exhausted
    ///
    /// The returned record keeps whatever contents its previous user
    /// left; callers repopulate it via `TradeRecord::reset_for`.
    pub fn acquire(self: &Arc<Self>) -> Option<RecordHandle> {
        let index = self.pop_free()?;
        // SAFETY: pop_free hands out each index exclusively until the
        // matching release, so no other reference to this slot exists.
        let ptr = unsafe { NonNull::new_unchecked(self.slots[index as usize].get()) };
        Some(RecordHandle {
            ptr,
            index,
            arena: Some(Arc::clone(self)),
        })
    }

    /// Acquire a slot, falling back to the heap when exhausted
    pub fn acquire_or_heap(self: &Arc<Self>) -> RecordHandle {
        if let Some(handle) = self.acquire() {
            return handle;
        }
        self.heap_fallbacks.fetch_add(1, Ordering::Relaxed);
        RecordHandle::heap(TradeRecord::default())
    }

    fn pop_free(&self) -> Option<u32> {
        let mut head = self.free_head.load(Ordering::Acquire);
        loop {
            let index = unpack_index(head);
            if index == NIL {
                return None;
            }
            let next = self.links[index as usize].load(Ordering::Relaxed);
            let new_head = pack(unpack_generation(head).wrapping_add(1), next);
            match self.free_head.compare_exchange_weak(
                head,
                new_head,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.available.fetch_sub(1, Ordering::Relaxed);
                    return Some(index);
                }
                Err(current) => head = current,
            }
        }
    }

    fn release(&self, index: u32) {
        let mut head = self.free_head.load(Ordering::Acquire);
        loop {
            self.links[index as usize].store(unpack_index(head), Ordering::Relaxed);
            let new_head = pack(unpack_generation(head).wrapping_add(1), index);
            match self.free_head.compare_exchange_weak(
                head,
                new_head,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.available.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Err(current) => head = current,
            }
        }
    }
}

/// Owning handle to a trade record, arena-backed or heap-backed
///
/// Dereferences to the record. Dropping the handle returns an arena slot
/// to the free list; heap-backed records are freed normally.
pub struct RecordHandle {
    ptr: NonNull<TradeRecord>,
    index: u32,
    /// `None` marks a heap-backed record
    arena: Option<Arc<RecordArena>>,
}

// SAFETY: the handle is the sole owner of the record it points at.
unsafe impl Send for RecordHandle {}

impl RecordHandle {
    /// Wrap a heap-allocated record
    #[must_use]
    pub fn heap(record: TradeRecord) -> Self {
        // SAFETY: Box::into_raw never returns null
        let ptr = unsafe { NonNull::new_unchecked(Box::into_raw(Box::new(record))) };
        Self {
            ptr,
            index: 0,
            arena: None,
        }
    }

    /// Whether this record lives in the arena
    #[must_use]
    pub const fn is_pooled(&self) -> bool {
        self.arena.is_some()
    }
}

impl Deref for RecordHandle {
    type Target = TradeRecord;

    #[inline]
    fn deref(&self) -> &TradeRecord {
        // SAFETY: exclusive ownership between acquire and drop
        unsafe { self.ptr.as_ref() }
    }
}

impl DerefMut for RecordHandle {
    #[inline]
    fn deref_mut(&mut self) -> &mut TradeRecord {
        // SAFETY: exclusive ownership between acquire and drop
        unsafe { self.ptr.as_mut() }
    }
}

impl std::fmt::Debug for RecordHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordHandle")
            .field("trade_id", &self.trade_id)
            .field("pooled", &self.is_pooled())
            .finish()
    }
}

impl Drop for RecordHandle {
    fn drop(&mut self) {
        match self.arena.take() {
            Some(arena) => arena.release(self.index),
            None => {
                // SAFETY: heap handles own the allocation from `heap`
                unsafe { drop(Box::from_raw(self.ptr.as_ptr())) };
            }
        }
    }
}
