//! Bounded blocking work queue between pipeline stages
//!
//! FIFO multi-producer/multi-consumer channel with a hard capacity.
//! Producers on the hot path use the non-blocking `offer`; stage workers
//! forwarding admitted records use the blocking `put`. Consumers block in
//! `take` until work arrives or the queue shuts down. Shutdown wakes every
//! blocked caller immediately rather than leaving them to poll.

use crossbeam::channel::{Receiver, Sender, bounded};
use crossbeam::select;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Blocking bounded MPMC queue with prompt shutdown wake-up
pub struct BoundedWorkQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    /// Dropped on shutdown, which disconnects every cloned receiver and
    /// wakes all blocked `take` and `put` calls
    shutdown_tx: Mutex<Option<Sender<()>>>,
    shutdown_rx: Receiver<()>,
    shut_down: AtomicBool,
    capacity: usize,
}

impl<T> BoundedWorkQueue<T> {
    /// Create a queue holding at most `capacity` items
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        let (shutdown_tx, shutdown_rx) = bounded(0);
        Self {
            tx,
            rx,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            shutdown_rx,
            shut_down: AtomicBool::new(false),
            capacity,
        }
    }

    /// Maximum number of queued items
    #[must_use]
    #[inline]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Items currently queued
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether the queue holds no items
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Whether `shutdown` has been called
    #[must_use]
    #[inline]
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Enqueue without blocking
    ///
    /// Returns the item back when the queue is full or shut down.
    pub fn offer(&self, item: T) -> Result<(), T> {
        if self.is_shut_down() {
            return Err(item);
        }
        self.tx.try_send(item).map_err(|err| err.into_inner())
    }

    /// Enqueue, blocking while the queue is full
    ///
    /// Returns the item back only when the queue shuts down before space
    /// opens up.
    pub fn put(&self, item: T) -> Result<(), T> {
        if self.is_shut_down() {
            return Err(item);
        }
        select! {
            send(self.tx, item) -> res => res.map_err(|err| err.into_inner()),
            recv(self.shutdown_rx) -> _ => Err(item),
        }
    }

    /// Dequeue, blocking until an item arrives or the queue shuts down
    ///
    /// `None` is the shutdown sentinel; a worker seeing it exits its loop.
    /// After shutdown, remaining items are not handed out; draining stops
    /// as soon as the signal lands.
    pub fn take(&self) -> Option<T> {
        if self.is_shut_down() {
            return None;
        }
        select! {
            recv(self.rx) -> item => item.ok(),
            recv(self.shutdown_rx) -> _ => None,
        }
    }

    /// Dequeue, giving up after `timeout` if nothing arrives
    ///
    /// Shares `take`'s shutdown sentinel: `None` on timeout or shutdown.
    pub fn take_timeout(&self, timeout: Duration) -> Option<T> {
        if self.is_shut_down() {
            return None;
        }
        select! {
            recv(self.rx) -> item => item.ok(),
            recv(self.shutdown_rx) -> _ => None,
            default(timeout) => None,
        }
    }

    /// Shut the queue down and wake every blocked caller
    ///
    /// Idempotent. Items still queued are dropped with the queue.
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::Release);
        self.shutdown_tx.lock().take();
    }
}
