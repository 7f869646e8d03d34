use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Order lifecycle states.
///
/// `PENDING → SUBMITTED → {FILLED | PARTIALLY_FILLED} → CONFIRMED`, with
/// failure paths `PENDING → FAILED`, `SUBMITTED → CANCELLED` and
/// `FAILED → DEAD_LETTER` once retries are exhausted. CONFIRMED, CANCELLED
/// and DEAD_LETTER are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    Pending,
    Submitted,
    PartiallyFilled,
    Filled,
    Confirmed,
    Cancelled,
    Failed,
    DeadLetter,
}

impl OrderState {
    /// Whether `self → to` is a legal transition.
    pub fn can_transition_to(self, to: OrderState) -> bool {
        use OrderState::*;
        matches!(
            (self, to),
            (Pending, Submitted)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Submitted, Filled)
                | (Submitted, PartiallyFilled)
                | (Submitted, Cancelled)
                | (Submitted, Failed)
                | (PartiallyFilled, Filled)
                | (PartiallyFilled, Confirmed)
                | (Filled, Confirmed)
                | (Failed, DeadLetter)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderState::Confirmed | OrderState::Cancelled | OrderState::DeadLetter
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderState::Pending => "PENDING",
            OrderState::Submitted => "SUBMITTED",
            OrderState::PartiallyFilled => "PARTIALLY_FILLED",
            OrderState::Filled => "FILLED",
            OrderState::Confirmed => "CONFIRMED",
            OrderState::Cancelled => "CANCELLED",
            OrderState::Failed => "FAILED",
            OrderState::DeadLetter => "DEAD_LETTER",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(OrderState::Pending),
            "SUBMITTED" => Some(OrderState::Submitted),
            "PARTIALLY_FILLED" => Some(OrderState::PartiallyFilled),
            "FILLED" => Some(OrderState::Filled),
            "CONFIRMED" => Some(OrderState::Confirmed),
            "CANCELLED" => Some(OrderState::Cancelled),
            "FAILED" => Some(OrderState::Failed),
            "DEAD_LETTER" => Some(OrderState::DeadLetter),
            _ => None,
        }
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Limit,
    Market,
    Fok,
    Gtc,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Limit => write!(f, "LIMIT"),
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Fok => write!(f, "FOK"),
            OrderType::Gtc => write!(f, "GTC"),
        }
    }
}

/// One attempted exchange order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: Uuid,
    /// Caller-supplied token guaranteeing at-most-one effective submission.
    pub idempotency_key: String,
    pub market_id: String,
    pub token_id: String,
    pub side: super::Side,
    pub size: Decimal,
    pub price: Option<Decimal>,
    pub order_type: OrderType,
    pub state: OrderState,
    pub filled_size: Decimal,
    pub remaining_size: Decimal,
    pub avg_fill_price: Option<Decimal>,
    pub exchange_order_id: Option<String>,
    /// Set when this order re-submits the unfilled remainder of another.
    pub parent_order_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub filled_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub error_message: Option<String>,
}

impl Order {
    pub fn new(
        idempotency_key: String,
        market_id: String,
        token_id: String,
        side: super::Side,
        size: Decimal,
        price: Option<Decimal>,
        order_type: OrderType,
        max_retries: u32,
    ) -> Self {
        Self {
            order_id: Uuid::new_v4(),
            idempotency_key,
            market_id,
            token_id,
            side,
            size,
            price,
            order_type,
            state: OrderState::Pending,
            filled_size: Decimal::ZERO,
            remaining_size: size,
            avg_fill_price: None,
            exchange_order_id: None,
            parent_order_id: None,
            created_at: Utc::now(),
            submitted_at: None,
            filled_at: None,
            confirmed_at: None,
            retry_count: 0,
            max_retries,
            error_message: None,
        }
    }

    /// Record fill quantity, keeping `filled + remaining == size` and the
    /// volume-weighted average fill price.
    pub fn record_fill(&mut self, fill_size: Decimal, fill_price: Decimal) {
        let fill = fill_size.min(self.remaining_size);
        if fill <= Decimal::ZERO {
            return;
        }

        let prev_notional = self.avg_fill_price.unwrap_or(Decimal::ZERO) * self.filled_size;
        self.filled_size += fill;
        self.remaining_size = self.size - self.filled_size;
        self.avg_fill_price = Some((prev_notional + fill_price * fill) / self.filled_size);
        self.filled_at = Some(Utc::now());
    }

    pub fn fill_ratio(&self) -> Decimal {
        if self.size.is_zero() {
            Decimal::ZERO
        } else {
            self.filled_size / self.size
        }
    }

    pub fn is_fully_filled(&self) -> bool {
        self.remaining_size <= Decimal::ZERO
    }
}

/// Immutable audit record of one state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderTransition {
    pub order_id: Uuid,
    pub from_state: OrderState,
    pub to_state: OrderState,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    pub metadata: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
