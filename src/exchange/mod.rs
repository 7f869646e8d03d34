pub mod auth;
pub mod clob;

pub use clob::ClobClient;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{OrderType, Side};

/// Exchange failure taxonomy. Transient errors are retried with backoff;
/// terminal errors fail the order immediately.
#[derive(Debug, Clone, Error)]
pub enum ExchangeError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("insufficient balance: {0}")]
    InsufficientBalance(String),

    #[error("invalid market: {0}")]
    InvalidMarket(String),

    #[error("price out of bounds: {0}")]
    PriceOutOfBounds(String),

    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("unexpected response: {0}")]
    Unexpected(String),
}

impl ExchangeError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ExchangeError::Connection(_)
                | ExchangeError::Timeout(_)
                | ExchangeError::RateLimited(_)
        )
    }
}

/// One price level of the book.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub size: Decimal,
}

/// Order book snapshot for a single token. Bids sorted best (highest)
/// first, asks best (lowest) first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBook {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }

    pub fn mid(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => Some((b + a) / Decimal::TWO),
            _ => None,
        }
    }

    /// Volume-weighted fill price for `size` shares, walking the book.
    /// None when the visible depth cannot fill the size.
    pub fn vwap_for(&self, side: Side, size: Decimal) -> Option<Decimal> {
        let levels = match side {
            Side::Buy => &self.asks,
            Side::Sell => &self.bids,
        };
        let mut remaining = size;
        let mut notional = Decimal::ZERO;
        for level in levels {
            let take = level.size.min(remaining);
            notional += take * level.price;
            remaining -= take;
            if remaining <= Decimal::ZERO {
                return Some(notional / size);
            }
        }
        None
    }

    /// Estimated slippage of filling `size` at market, as a fraction of mid.
    /// None when the book is empty or too thin; callers fail closed.
    pub fn estimated_slippage(&self, side: Side, size: Decimal) -> Option<Decimal> {
        let mid = self.mid()?;
        if mid.is_zero() {
            return None;
        }
        let vwap = self.vwap_for(side, size)?;
        Some(((vwap - mid) / mid).abs())
    }
}

/// Outbound order submission.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitRequest {
    /// Our order_id, passed through as the exchange client order id.
    pub client_order_id: Uuid,
    pub token_id: String,
    pub side: Side,
    pub size: Decimal,
    pub price: Option<Decimal>,
    pub order_type: OrderType,
}

/// Exchange acknowledgement of an accepted order.
#[derive(Debug, Clone)]
pub struct SubmitAck {
    pub exchange_order_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FillState {
    Open,
    Filled,
    Cancelled,
}

/// Cumulative fill status for a submitted order, from either the streaming
/// or the polling confirmation path.
#[derive(Debug, Clone)]
pub struct FillStatus {
    pub exchange_order_id: String,
    pub state: FillState,
    /// Cumulative matched size.
    pub filled_size: Decimal,
    pub avg_price: Decimal,
    /// Monotonic per-order sequence; duplicates are dropped downstream.
    pub fill_sequence: u64,
}

/// Internal fill event; both confirmation paths funnel into this shape and
/// are deduplicated by (order_id, fill_sequence).
#[derive(Debug, Clone)]
pub struct FillEvent {
    pub order_id: Uuid,
    pub fill_sequence: u64,
    /// Cumulative matched size as reported by the exchange.
    pub filled_size: Decimal,
    pub avg_price: Decimal,
    pub state: FillState,
}

/// Capability the execution core needs from the exchange.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn submit_order(&self, req: &SubmitRequest) -> Result<SubmitAck, ExchangeError>;
    async fn cancel_order(&self, exchange_order_id: &str) -> Result<(), ExchangeError>;
    async fn fetch_order_book(&self, token_id: &str) -> Result<OrderBook, ExchangeError>;
    async fn poll_fill(&self, exchange_order_id: &str) -> Result<FillStatus, ExchangeError>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn book() -> OrderBook {
        OrderBook {
            bids: vec![
                BookLevel { price: Decimal::new(54, 2), size: Decimal::from(500) },
                BookLevel { price: Decimal::new(53, 2), size: Decimal::from(1000) },
            ],
            asks: vec![
                BookLevel { price: Decimal::new(56, 2), size: Decimal::from(300) },
                BookLevel { price: Decimal::new(58, 2), size: Decimal::from(700) },
            ],
        }
    }

    #[test]
    fn mid_is_average_of_best_levels() {
        assert_eq!(book().mid(), Some(Decimal::new(55, 2)));
    }

    #[test]
    fn vwap_walks_levels() {
        // Buy 500: 300 @ 0.56 + 200 @ 0.58 = 284 / 500 = 0.568
        let vwap = book().vwap_for(Side::Buy, Decimal::from(500)).unwrap();
        assert_eq!(vwap, Decimal::new(568, 3));
    }

    #[test]
    fn vwap_fails_when_depth_insufficient() {
        assert!(book().vwap_for(Side::Buy, Decimal::from(5_000)).is_none());
    }

    #[test]
    fn slippage_is_relative_to_mid() {
        // vwap 0.568 vs mid 0.55 -> 0.018/0.55
        let slip = book()
            .estimated_slippage(Side::Buy, Decimal::from(500))
            .unwrap();
        assert_eq!(slip.round_dp(4), Decimal::new(327, 4));
    }

    #[test]
    fn transient_classification() {
        assert!(ExchangeError::Timeout("t".into()).is_transient());
        assert!(ExchangeError::RateLimited("r".into()).is_transient());
        assert!(!ExchangeError::InsufficientBalance("b".into()).is_transient());
        assert!(!ExchangeError::InvalidMarket("m".into()).is_transient());
    }
}
