//! Trade record model and lifecycle
//!
//! A trade record is an immutable payload (what was submitted) plus a
//! mutable processing state (where it is in the pipeline). Records move
//! through the stages by ownership transfer; exactly one stage holds a
//! record at any time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Order types supported by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    /// Execute at current market price
    Market,
    /// Execute at specified price or better
    Limit,
    /// Becomes market order at stop price
    Stop,
    /// Becomes limit order at stop price
    StopLimit,
}

/// Trade lifecycle states
///
/// States advance strictly along the pipeline order. `Rejected` and
/// `Cancelled` are terminal and reachable from any non-terminal state;
/// `Executed` is the terminal success state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeStatus {
    /// Accepted at submission, not yet validated
    Received,
    /// Passed structural validation
    Validated,
    /// Price enrichment complete
    Priced,
    /// Passed the exposure gate
    RiskChecked,
    /// Fully executed (terminal)
    Executed,
    /// Terminally rejected with a reason
    Rejected,
    /// Cancelled before completion (terminal)
    Cancelled,
}

impl TradeStatus {
    /// Whether this state ends the record's journey through the pipeline
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Executed | Self::Rejected | Self::Cancelled)
    }

    /// Whether a transition to `next` respects the pipeline order
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Received => matches!(
                next,
                Self::Validated | Self::Rejected | Self::Cancelled
            ),
            Self::Validated => {
                matches!(next, Self::Priced | Self::Rejected | Self::Cancelled)
            }
            Self::Priced => matches!(
                next,
                Self::RiskChecked | Self::Rejected | Self::Cancelled
            ),
            Self::RiskChecked => {
                matches!(next, Self::Executed | Self::Rejected | Self::Cancelled)
            }
            // Terminal states never transition
            Self::Executed | Self::Rejected | Self::Cancelled => false,
        }
    }
}

/// Submission payload for a new trade
///
/// Carries only what the caller provides; ids, sequence numbers and
/// timestamps are assigned by the pipeline at admission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeIntent {
    /// Instrument symbol
    pub symbol: String,
    /// Trade price, must be positive
    pub price: f64,
    /// Trade quantity, must be positive
    pub quantity: u32,
    /// Execution venue
    pub venue: String,
    /// Order type
    pub order_type: OrderType,
    /// Counterparty identifier
    pub counterparty: String,
    /// Submitting trader
    pub trader: String,
    /// Trading account
    pub account: String,
}

/// A trade moving through the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Process-local monotonic identifier
    pub trade_id: u64,
    /// Instrument symbol
    pub symbol: String,
    /// Trade price
    pub price: f64,
    /// Trade quantity
    pub quantity: u32,
    /// Execution venue
    pub venue: String,
    /// Order type
    pub order_type: OrderType,
    /// Counterparty identifier
    pub counterparty: String,
    /// Submitting trader
    pub trader: String,
    /// Trading account
    pub account: String,
    /// Wall-clock submission time
    pub received_at: DateTime<Utc>,
    /// Monotonic submission instant, used for end-to-end latency
    #[serde(skip, default = "Instant::now")]
    pub origin: Instant,
    /// Pipeline sequence assigned at intake claim (0 until admitted)
    pub sequence: u64,
    /// Current lifecycle state
    pub status: TradeStatus,
    /// Reason the record was rejected, when terminal via `Rejected`
    pub rejection_reason: Option<String>,
}

impl TradeRecord {
    /// Create a fresh record from a submission
    #[must_use]
    pub fn new(trade_id: u64, intent: TradeIntent) -> Self {
        Self {
            trade_id,
            symbol: intent.symbol,
            price: intent.price,
            quantity: intent.quantity,
            venue: intent.venue,
            order_type: intent.order_type,
            counterparty: intent.counterparty,
            trader: intent.trader,
            account: intent.account,
            received_at: Utc::now(),
            origin: Instant::now(),
            sequence: 0,
            status: TradeStatus::Received,
            rejection_reason: None,
        }
    }

    /// Repopulate a recycled record in place, keeping string capacity
    pub fn reset_for(&mut self, trade_id: u64, intent: &TradeIntent) {
        self.trade_id = trade_id;
        self.symbol.clear();
        self.symbol.push_str(&intent.symbol);
        self.price = intent.price;
        self.quantity = intent.quantity;
        self.venue.clear();
        self.venue.push_str(&intent.venue);
        self.order_type = intent.order_type;
        self.counterparty.clear();
        self.counterparty.push_str(&intent.counterparty);
        self.trader.clear();
        self.trader.push_str(&intent.trader);
        self.account.clear();
        self.account.push_str(&intent.account);
        self.received_at = Utc::now();
        self.origin = Instant::now();
        self.sequence = 0;
        self.status = TradeStatus::Received;
        self.rejection_reason = None;
    }

    /// Advance the lifecycle state, enforcing pipeline order
    ///
    /// Returns false without changing state when the transition would
    /// violate monotonicity.
    pub fn advance(&mut self, next: TradeStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }

    /// Terminally reject the record with a reason
    ///
    /// A record that already reached a terminal state keeps it; the
    /// first terminal outcome wins.
    pub fn reject(&mut self, reason: impl Into<String>) {
        if !self.status.is_terminal() {
            self.status = TradeStatus::Rejected;
            self.rejection_reason = Some(reason.into());
        }
    }

    /// Whether the record reached a terminal state
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Notional value, price times quantity
    #[must_use]
    pub fn notional(&self) -> f64 {
        self.price * f64::from(self.quantity)
    }
}

impl Default for TradeRecord {
    fn default() -> Self {
        Self {
            trade_id: 0,
            symbol: String::new(),
            price: 0.0,
            quantity: 0,
            venue: String::new(),
            order_type: OrderType::Market,
            counterparty: String::new(),
            trader: String::new(),
            account: String::new(),
            received_at: Utc::now(),
            origin: Instant::now(),
            sequence: 0,
            status: TradeStatus::Received,
            rejection_reason: None,
        }
    }
}
