//! Audit trail for trade events
//!
//! Every admission decision, stage outcome and fault produces an audit
//! event. The default sink (`AuditLog`) is asynchronous and best-effort:
//! events go through a bounded queue to a dedicated writer thread that
//! appends pipe-delimited lines to a timestamped file. Under sustained
//! overload events are dropped and counted, never blocking the pipeline.

use crate::config::AuditConfig;
use crate::trade::TradeRecord;
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use crossbeam::channel::{Receiver, Sender, TrySendError, bounded};
use crossbeam::select;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use tracing::{error, warn};

/// Receives audit events from the pipeline
///
/// Implementations must not block the caller: drop and count under
/// overload instead.
pub trait AuditSink: Send + Sync {
    /// Record one event for a trade
    fn log_event(&self, trade: &TradeRecord, event: &str, details: &str);

    /// Events dropped because the sink could not keep up
    fn dropped_events(&self) -> u64 {
        0
    }

    /// Flush buffered events and release writer resources, idempotent
    fn shutdown(&self) {}
}

/// One audited trade event
#[derive(Debug, Clone, serde::Serialize)]
pub struct AuditEvent {
    /// Event capture time
    pub timestamp: DateTime<Utc>,
    /// Trade identifier
    pub trade_id: u64,
    /// Instrument symbol
    pub symbol: String,
    /// Trade price
    pub price: f64,
    /// Trade quantity
    pub quantity: u32,
    /// Submitting trader
    pub trader: String,
    /// Trading account
    pub account: String,
    /// Event name, e.g. `VALIDATION` or `REJECTED`
    pub event: String,
    /// Free-form details
    pub details: String,
}

impl AuditEvent {
    fn capture(trade: &TradeRecord, event: &str, details: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            trade_id: trade.trade_id,
            symbol: trade.symbol.clone(),
            price: trade.price,
            quantity: trade.quantity,
            trader: trade.trader.clone(),
            account: trade.account.clone(),
            event: event.to_string(),
            details: details.to_string(),
        }
    }

    /// Pipe-delimited line as written to the audit file
    #[must_use]
    pub fn format_line(&self) -> String {
        format!(
            "{}|{}|{}|{:.4}|{}|{}|{}|{}|{}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.trade_id,
            self.symbol,
            self.price,
            self.quantity,
            self.trader,
            self.account,
            self.event,
            self.details,
        )
    }
}

/// File-backed asynchronous audit sink
pub struct AuditLog {
    tx: Sender<AuditEvent>,
    /// Dropped on shutdown to stop the writer thread
    stop_tx: Mutex<Option<Sender<()>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
    dropped: AtomicU64,
    overflow_warned: AtomicBool,
    path: PathBuf,
}

impl AuditLog {
    /// Open a new audit file under the configured directory and start
    /// the writer thread
    pub fn new(config: &AuditConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.directory).with_context(|| {
            format!("creating audit directory {}", config.directory.display())
        })?;
        let stamp = Utc::now()
            .to_rfc3339_opts(SecondsFormat::Millis, true)
            .replace(':', "_");
        let path = config.directory.join(format!("audit_{stamp}.log"));
        let file = File::create(&path)
            .with_context(|| format!("creating audit file {}", path.display()))?;

        let (tx, rx) = bounded(config.queue_capacity.max(1));
        let (stop_tx, stop_rx) = bounded(0);
        let writer_path = path.clone();
        let writer = std::thread::Builder::new()
            .name("audit-logger".to_string())
            .spawn(move || write_loop(&rx, &stop_rx, file, &writer_path))
            .context("spawning audit writer thread")?;

        Ok(Self {
            tx,
            stop_tx: Mutex::new(Some(stop_tx)),
            writer: Mutex::new(Some(writer)),
            dropped: AtomicU64::new(0),
            overflow_warned: AtomicBool::new(false),
            path,
        })
    }

    /// Path of the audit file this sink writes
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

fn write_loop(
    rx: &Receiver<AuditEvent>,
    stop_rx: &Receiver<()>,
    file: File,
    path: &std::path::Path,
) {
    let mut out = BufWriter::new(file);
    let write_line = |out: &mut BufWriter<File>, event: &AuditEvent| {
        if writeln!(out, "{}", event.format_line()).is_err() {
            error!(path = %path.display(), "failed to write audit event");
        }
    };

    loop {
        select! {
            recv(rx) -> event => match event {
                Ok(event) => write_line(&mut out, &event),
                Err(_) => break,
            },
            recv(stop_rx) -> _ => {
                // Drain whatever is already queued, then stop
                while let Ok(event) = rx.try_recv() {
                    write_line(&mut out, &event);
                }
                break;
            }
        }
        if rx.is_empty() {
            let _ = out.flush();
        }
    }
    let _ = out.flush();
}

impl AuditSink for AuditLog {
    fn log_event(&self, trade: &TradeRecord, event: &str, details: &str) {
        let event = AuditEvent::capture(trade, event, details);
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                if !self.overflow_warned.swap(true, Ordering::Relaxed) {
                    warn!("audit queue full, events are being dropped");
                }
            }
        }
    }

    fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn shutdown(&self) {
        self.stop_tx.lock().take();
        if let Some(writer) = self.writer.lock().take()
            && writer.join().is_err()
        {
            error!("audit writer thread panicked");
        }
    }
}

impl Drop for AuditLog {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Capturing sink for tests and introspection
#[derive(Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    /// Create an empty capture sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every captured event, in arrival order
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    /// Events captured for one trade
    #[must_use]
    pub fn events_for(&self, trade_id: u64) -> Vec<AuditEvent> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.trade_id == trade_id)
            .cloned()
            .collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn log_event(&self, trade: &TradeRecord, event: &str, details: &str) {
        self.events
            .lock()
            .push(AuditEvent::capture(trade, event, details));
    }
}

/// Sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn log_event(&self, _trade: &TradeRecord, _event: &str, _details: &str) {}
}
