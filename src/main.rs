//! Trade Pipeline Demo Driver
//!
//! Stands up the full pipeline, pushes a configurable load through it and
//! prints the latency and throughput report. A warm-up batch runs first so
//! allocator and cache effects stay out of the measured numbers.

use anyhow::{Context, Result};
use clap::Parser;
use rand::Rng;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use trade_pipeline::{
    AuditLog, AuditSink, NullAuditSink, OrderType, PipelineConfig, PipelineCoordinator,
    PipelineError, TradeIntent,
};
use tracing::{info, warn};

const SYMBOLS: [(&str, f64); 4] = [
    ("AAPL", 150.50),
    ("GOOGL", 2750.00),
    ("MSFT", 380.00),
    ("AMZN", 145.00),
];

/// Trade pipeline demo CLI
#[derive(Parser)]
#[clap(name = "trade-pipeline")]
#[clap(about = "Low-latency multi-stage trade processing pipeline")]
struct Cli {
    /// Trades to submit in the measured run
    #[clap(long, default_value = "20000")]
    trades: u64,

    /// Warm-up submissions excluded from the report
    #[clap(long, default_value = "1000")]
    warmup: u64,

    /// Intake ring capacity, rounded up to a power of two
    #[clap(long)]
    capacity: Option<usize>,

    /// Worker threads per stage
    #[clap(long)]
    workers: Option<usize>,

    /// JSON config file, overridden by the flags above
    #[clap(long)]
    config: Option<PathBuf>,

    /// Skip the file audit trail
    #[clap(long)]
    no_audit: bool,
}

fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => PipelineConfig::default(),
    };
    if let Some(capacity) = cli.capacity {
        config.buffer_capacity = capacity;
    }
    if let Some(workers) = cli.workers {
        config.workers_per_stage = workers;
    }
    Ok(config)
}

fn intent_for(index: u64, rng: &mut impl Rng) -> TradeIntent {
    let (symbol, base_price) = SYMBOLS[(index % SYMBOLS.len() as u64) as usize];
    TradeIntent {
        symbol: symbol.to_string(),
        price: base_price * rng.gen_range(0.95..1.05),
        quantity: rng.gen_range(1..=500),
        venue: if index % 2 == 0 { "NYSE" } else { "NASDAQ" }.to_string(),
        order_type: OrderType::Market,
        counterparty: format!("CPTY{}", index % 4 + 1),
        trader: format!("TRADER{}", index % 8 + 1),
        account: format!("ACC{}", index % 32 + 1),
    }
}

fn drain(pipeline: &PipelineCoordinator, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while pipeline.in_flight() > 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("trade_pipeline=info".parse()?),
        )
        .with_target(false)
        .with_thread_ids(true)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let mut audit_path = None;
    let audit: Arc<dyn AuditSink> = if cli.no_audit {
        Arc::new(NullAuditSink)
    } else {
        let log = AuditLog::new(&config.audit)?;
        audit_path = Some(log.path().to_path_buf());
        Arc::new(log)
    };

    info!("🚀 Starting trade pipeline");
    info!("├─ Intake ring: {} slots", config.buffer_capacity);
    info!("├─ Queue capacity: {}", config.queue_capacity);
    info!("├─ Workers per stage: {}", config.workers_per_stage);
    info!("├─ Record arena: {} slots", config.arena_capacity);
    match &audit_path {
        Some(path) => info!("└─ Audit trail: {}", path.display()),
        None => info!("└─ Audit trail: disabled"),
    }

    let pipeline = PipelineCoordinator::with_audit(config, audit);
    pipeline.start()?;
    let mut rng = rand::thread_rng();

    // Warm-up: fill caches and fault in the arena before measuring
    for index in 0..cli.warmup {
        let _ = pipeline.submit(intent_for(index, &mut rng));
    }
    drain(&pipeline, Duration::from_secs(10));
    pipeline.telemetry().reset();
    info!("Warm-up complete ({} trades)", cli.warmup);

    let started = Instant::now();
    let mut accepted: u64 = 0;
    let mut capacity_rejects: u64 = 0;
    let mut breaker_rejects: u64 = 0;
    for index in 0..cli.trades {
        match pipeline.submit(intent_for(index, &mut rng)) {
            Ok(_) => accepted += 1,
            Err(PipelineError::CapacityExceeded) => capacity_rejects += 1,
            Err(PipelineError::AdmissionDenied) => breaker_rejects += 1,
            Err(other) => {
                warn!("unexpected submit failure: {other}");
                break;
            }
        }
    }
    let submit_elapsed = started.elapsed();
    drain(&pipeline, Duration::from_secs(10));
    let total_elapsed = started.elapsed();

    pipeline.shutdown(Duration::from_secs(5));

    println!("{}", pipeline.telemetry().snapshot().format_report());

    let throughput = accepted as f64 / total_elapsed.as_secs_f64();
    info!("✅ Run complete");
    info!("├─ Submitted: {}", cli.trades);
    info!("├─ Accepted: {accepted}");
    info!("├─ Rejected (capacity): {capacity_rejects}");
    info!("├─ Rejected (breaker): {breaker_rejects}");
    info!(
        "├─ Submit time: {:.1} ms, end-to-end: {:.1} ms",
        submit_elapsed.as_secs_f64() * 1000.0,
        total_elapsed.as_secs_f64() * 1000.0
    );
    info!("├─ Throughput: {throughput:.0} trades/sec");
    info!("├─ Arena heap fallbacks: {}", pipeline.arena().heap_fallbacks());
    info!("├─ Audit events dropped: {}", pipeline.audit().dropped_events());
    info!("└─ Breaker state: {:?}", pipeline.breaker().state());

    Ok(())
}
