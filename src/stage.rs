//! Pipeline stage contract and the built-in stages
//!
//! A stage holds the business logic for one hop of the pipeline:
//! validate, price, risk-check or execute. Stages are shared across the
//! workers of their pool, so they take `&self` and keep any state in
//! atomics. Outcomes are explicit:
//!
//! - `Forward`: the record advances to the stage's target status
//! - `Reject`: a business decision, the record terminates as `Rejected`
//! - `Err`: an infrastructure fault, counted against the circuit breaker

use crate::error::PipelineError;
use crate::trade::{TradeRecord, TradeStatus};
use tracing::debug;

/// Default notional limit applied by [`RiskStage`]
pub const DEFAULT_MAX_NOTIONAL: f64 = 10_000_000.0;

/// The four fixed pipeline stages, in processing order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    /// Field and sanity checks
    Validation,
    /// Notional enrichment
    Pricing,
    /// Exposure limits
    Risk,
    /// Simulated fill
    Execution,
}

impl StageKind {
    /// Lowercase name used for latency histograms and logging
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Pricing => "pricing",
            Self::Risk => "risk",
            Self::Execution => "execution",
        }
    }

    /// Uppercase label used for audit events
    #[must_use]
    pub const fn audit_label(self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION",
            Self::Pricing => "PRICING",
            Self::Risk => "RISK",
            Self::Execution => "EXECUTION",
        }
    }

    /// Status a record reaches when this stage forwards it
    #[must_use]
    pub const fn target_status(self) -> TradeStatus {
        match self {
            Self::Validation => TradeStatus::Validated,
            Self::Pricing => TradeStatus::Priced,
            Self::Risk => TradeStatus::RiskChecked,
            Self::Execution => TradeStatus::Executed,
        }
    }
}

/// Result of a successful `process` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// Record passes to the next stage
    Forward,
    /// Record is terminally rejected for a business reason
    Reject(String),
}

/// Business logic for one pipeline stage
///
/// `process` returns `Err` only for infrastructure faults. Business
/// rejections are `Ok(Reject)` and do not trip the circuit breaker.
pub trait Stage: Send + Sync {
    /// Which of the four stages this implements
    fn kind(&self) -> StageKind;

    /// Apply the stage's logic to one record
    fn process(&self, record: &mut TradeRecord) -> Result<StageOutcome, PipelineError>;
}

/// Checks that a record carries the fields every downstream stage needs
#[derive(Debug, Default, Clone, Copy)]
pub struct ValidationStage;

impl Stage for ValidationStage {
    fn kind(&self) -> StageKind {
        StageKind::Validation
    }

    fn process(&self, record: &mut TradeRecord) -> Result<StageOutcome, PipelineError> {
        if record.symbol.is_empty() {
            return Ok(StageOutcome::Reject("missing symbol".to_string()));
        }
        if !record.price.is_finite() || record.price <= 0.0 {
            return Ok(StageOutcome::Reject("invalid price".to_string()));
        }
        if record.quantity == 0 {
            return Ok(StageOutcome::Reject("invalid quantity".to_string()));
        }
        if record.trader.is_empty() {
            return Ok(StageOutcome::Reject("missing trader".to_string()));
        }
        if record.account.is_empty() {
            return Ok(StageOutcome::Reject("missing account".to_string()));
        }
        Ok(StageOutcome::Forward)
    }
}

/// Enriches the record with its notional value
#[derive(Debug, Default, Clone, Copy)]
pub struct PricingStage;

impl Stage for PricingStage {
    fn kind(&self) -> StageKind {
        StageKind::Pricing
    }

    fn process(&self, record: &mut TradeRecord) -> Result<StageOutcome, PipelineError> {
        let notional = record.notional();
        debug!(
            trade_id = record.trade_id,
            symbol = %record.symbol,
            notional,
            "priced trade"
        );
        Ok(StageOutcome::Forward)
    }
}

/// Rejects trades whose notional exceeds the configured limit
#[derive(Debug, Clone, Copy)]
pub struct RiskStage {
    max_notional: f64,
}

impl RiskStage {
    /// Create a risk stage with the given notional limit
    #[must_use]
    pub const fn new(max_notional: f64) -> Self {
        Self { max_notional }
    }
}

impl Default for RiskStage {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_NOTIONAL)
    }
}

impl Stage for RiskStage {
    fn kind(&self) -> StageKind {
        StageKind::Risk
    }

    fn process(&self, record: &mut TradeRecord) -> Result<StageOutcome, PipelineError> {
        let notional = record.notional();
        if notional > self.max_notional {
            return Ok(StageOutcome::Reject(format!(
                "notional {notional:.2} exceeds limit {:.2}",
                self.max_notional
            )));
        }
        Ok(StageOutcome::Forward)
    }
}

/// Terminal stage, simulates the fill
#[derive(Debug, Default, Clone, Copy)]
pub struct ExecutionStage;

impl Stage for ExecutionStage {
    fn kind(&self) -> StageKind {
        StageKind::Execution
    }

    fn process(&self, record: &mut TradeRecord) -> Result<StageOutcome, PipelineError> {
        debug!(
            trade_id = record.trade_id,
            symbol = %record.symbol,
            price = record.price,
            quantity = record.quantity,
            "executed trade"
        );
        Ok(StageOutcome::Forward)
    }
}
