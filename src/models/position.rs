use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::Outcome;

/// Prediction-market prices are probabilities; the exchange never quotes
/// outside [0.01, 0.99].
pub const MIN_PRICE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);
pub const MAX_PRICE: Decimal = Decimal::from_parts(99, 0, 0, false, 2);

pub fn clamp_price(price: Decimal) -> Decimal {
    price.clamp(MIN_PRICE, MAX_PRICE)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    Open,
    Closing,
    Closed,
    Archived,
}

impl PositionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PositionStatus::Open => "OPEN",
            PositionStatus::Closing => "CLOSING",
            PositionStatus::Closed => "CLOSED",
            PositionStatus::Archived => "ARCHIVED",
        }
    }
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloseReason {
    StopLoss,
    TakeProfit,
    Manual,
    WhaleExit,
    PreResolution,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::StopLoss => "STOP_LOSS",
            CloseReason::TakeProfit => "TAKE_PROFIT",
            CloseReason::Manual => "MANUAL",
            CloseReason::WhaleExit => "WHALE_EXIT",
            CloseReason::PreResolution => "PRE_RESOLUTION",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateType {
    PriceUpdate,
    SizeIncrease,
    SizeDecrease,
    PartialClose,
    FullClose,
    StopLossHit,
    TakeProfitHit,
    ManualAdjustment,
}

impl UpdateType {
    pub fn as_str(self) -> &'static str {
        match self {
            UpdateType::PriceUpdate => "PRICE_UPDATE",
            UpdateType::SizeIncrease => "SIZE_INCREASE",
            UpdateType::SizeDecrease => "SIZE_DECREASE",
            UpdateType::PartialClose => "PARTIAL_CLOSE",
            UpdateType::FullClose => "FULL_CLOSE",
            UpdateType::StopLossHit => "STOP_LOSS_HIT",
            UpdateType::TakeProfitHit => "TAKE_PROFIT_HIT",
            UpdateType::ManualAdjustment => "MANUAL_ADJUSTMENT",
        }
    }
}

/// One market exposure copied from a whale.
///
/// Derived fields (`market_value`, `unrealized_pnl`, the high-water marks)
/// are recomputed inside the mutators and never written independently;
/// `total_pnl` and `pnl_percentage` are methods so they cannot drift.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub position_id: Uuid,
    pub whale_address: String,
    pub market_id: String,
    pub token_id: String,
    pub side: Outcome,
    /// Market category, used for concentration checks.
    pub category: Option<String>,
    pub entry_size: Decimal,
    pub entry_price: Decimal,
    /// USD committed at entry: entry_size * entry_price.
    pub entry_amount: Decimal,
    pub current_size: Decimal,
    pub current_price: Decimal,
    pub market_value: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    /// Worst total P&L observed (always <= 0).
    pub max_drawdown: Decimal,
    /// Best total P&L observed (always >= 0).
    pub max_profit: Decimal,
    pub stop_loss_price: Option<Decimal>,
    pub take_profit_price: Option<Decimal>,
    pub kelly_fraction: Decimal,
    pub edge: Decimal,
    pub win_rate: Decimal,
    pub resolution_at: Option<DateTime<Utc>>,
    pub status: PositionStatus,
    pub opened_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub close_reason: Option<CloseReason>,
}

impl Position {
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        whale_address: String,
        market_id: String,
        token_id: String,
        side: Outcome,
        entry_size: Decimal,
        entry_price: Decimal,
        kelly_fraction: Decimal,
        edge: Decimal,
        win_rate: Decimal,
    ) -> Self {
        let entry_price = clamp_price(entry_price);
        let now = Utc::now();
        let mut pos = Self {
            position_id: Uuid::new_v4(),
            whale_address,
            market_id,
            token_id,
            side,
            category: None,
            entry_size,
            entry_price,
            entry_amount: entry_size * entry_price,
            current_size: entry_size,
            current_price: entry_price,
            market_value: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            max_drawdown: Decimal::ZERO,
            max_profit: Decimal::ZERO,
            stop_loss_price: None,
            take_profit_price: None,
            kelly_fraction,
            edge,
            win_rate,
            resolution_at: None,
            status: PositionStatus::Open,
            opened_at: now,
            last_updated_at: now,
            closed_at: None,
            close_reason: None,
        };
        pos.recompute();
        pos
    }

    /// Total P&L is always derived, never stored.
    pub fn total_pnl(&self) -> Decimal {
        self.unrealized_pnl + self.realized_pnl
    }

    pub fn pnl_percentage(&self) -> Decimal {
        if self.entry_amount.is_zero() {
            Decimal::ZERO
        } else {
            self.total_pnl() / self.entry_amount * Decimal::ONE_HUNDRED
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.status, PositionStatus::Open | PositionStatus::Closing)
    }

    /// Per-share P&L for the held side: YES exposure gains as the price
    /// rises, NO exposure gains as it falls.
    fn signed_delta(&self, price: Decimal) -> Decimal {
        match self.side {
            Outcome::Yes => price - self.entry_price,
            Outcome::No => self.entry_price - price,
        }
    }

    fn recompute(&mut self) {
        self.market_value = self.current_size * self.current_price;
        self.unrealized_pnl = self.signed_delta(self.current_price) * self.current_size;
        let total = self.total_pnl();
        if total > self.max_profit {
            self.max_profit = total;
        }
        if total < self.max_drawdown {
            self.max_drawdown = total;
        }
        self.last_updated_at = Utc::now();
    }

    /// Apply a price tick.
    pub fn update_price(&mut self, price: Decimal) {
        self.current_price = clamp_price(price);
        self.recompute();
    }

    /// Add to the position; entry price becomes the volume-weighted average.
    pub fn increase(&mut self, size: Decimal, price: Decimal) {
        let price = clamp_price(price);
        let new_size = self.current_size + size;
        self.entry_price =
            (self.entry_price * self.current_size + price * size) / new_size;
        self.entry_size += size;
        self.entry_amount = self.entry_size * self.entry_price;
        self.current_size = new_size;
        self.current_price = price;
        self.recompute();
    }

    /// Reduce the position, realizing P&L on the closed portion.
    /// Returns the size actually closed.
    pub fn reduce(&mut self, size: Decimal, price: Decimal) -> Decimal {
        let price = clamp_price(price);
        let closed = size.min(self.current_size);
        if closed <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        self.realized_pnl += self.signed_delta(price) * closed;
        self.current_size -= closed;
        self.current_price = price;
        self.recompute();
        closed
    }

    /// Close out the full remaining size.
    pub fn close(&mut self, price: Decimal, reason: CloseReason) {
        let remaining = self.current_size;
        if remaining > Decimal::ZERO {
            self.reduce(remaining, price);
        }
        self.unrealized_pnl = Decimal::ZERO;
        self.market_value = Decimal::ZERO;
        self.status = PositionStatus::Closed;
        self.close_reason = Some(reason);
        self.closed_at = Some(Utc::now());
        self.last_updated_at = Utc::now();
    }

    /// Snapshot of the mutable fields, used to build PositionUpdate records.
    pub fn snapshot(&self) -> PositionSnapshot {
        PositionSnapshot {
            size: self.current_size,
            price: self.current_price,
            market_value: self.market_value,
            unrealized_pnl: self.unrealized_pnl,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub size: Decimal,
    pub price: Decimal,
    pub market_value: Decimal,
    pub unrealized_pnl: Decimal,
}

/// Immutable before/after record of one position mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub position_id: Uuid,
    pub update_type: UpdateType,
    pub old: PositionSnapshot,
    pub new: PositionSnapshot,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    pub metadata: serde_json::Value,
}

impl PositionUpdate {
    pub fn record(
        position_id: Uuid,
        update_type: UpdateType,
        old: PositionSnapshot,
        new: PositionSnapshot,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            position_id,
            update_type,
            old,
            new,
            timestamp: Utc::now(),
            reason: reason.into(),
            metadata: serde_json::Value::Null,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn yes_position(size: i64, entry_cents: i64) -> Position {
        Position::open(
            "0xwhale".into(),
            "market-1".into(),
            "token-1".into(),
            Outcome::Yes,
            Decimal::from(size),
            Decimal::new(entry_cents, 2),
            Decimal::new(5, 2),
            Decimal::new(5, 2),
            Decimal::new(65, 2),
        )
    }

    #[test]
    fn entry_amount_is_size_times_price() {
        let pos = yes_position(1000, 55);
        assert_eq!(pos.entry_amount, Decimal::from(550));
        assert_eq!(pos.market_value, Decimal::from(550));
        assert_eq!(pos.unrealized_pnl, Decimal::ZERO);
    }

    #[test]
    fn price_update_recomputes_derived_fields() {
        let mut pos = yes_position(1000, 55);
        pos.update_price(Decimal::new(60, 2));
        assert_eq!(pos.unrealized_pnl, Decimal::from(50)); // (0.60-0.55)*1000
        assert_eq!(pos.market_value, Decimal::from(600));
        assert_eq!(pos.total_pnl(), Decimal::from(50));
        // 50 / 550 * 100
        assert_eq!(
            pos.pnl_percentage().round_dp(2),
            Decimal::new(909, 2)
        );
    }

    #[test]
    fn no_side_pnl_is_sign_flipped() {
        let mut pos = yes_position(1000, 55);
        pos.side = Outcome::No;
        pos.update_price(Decimal::new(50, 2));
        assert_eq!(pos.unrealized_pnl, Decimal::from(50)); // (0.55-0.50)*1000
    }

    #[test]
    fn prices_are_clamped_to_valid_probability_range() {
        let mut pos = yes_position(100, 55);
        pos.update_price(Decimal::new(5, 3)); // 0.005
        assert_eq!(pos.current_price, MIN_PRICE);
        pos.update_price(Decimal::ONE);
        assert_eq!(pos.current_price, MAX_PRICE);
    }

    #[test]
    fn high_water_marks_track_extremes() {
        let mut pos = yes_position(1000, 55);
        pos.update_price(Decimal::new(70, 2));
        assert_eq!(pos.max_profit, Decimal::from(150));
        pos.update_price(Decimal::new(45, 2));
        assert_eq!(pos.max_drawdown, Decimal::from(-100));
        // Peaks survive reversion
        pos.update_price(Decimal::new(55, 2));
        assert_eq!(pos.max_profit, Decimal::from(150));
        assert_eq!(pos.max_drawdown, Decimal::from(-100));
    }

    #[test]
    fn reduce_realizes_pnl_and_keeps_total_consistent() {
        let mut pos = yes_position(1000, 50);
        let closed = pos.reduce(Decimal::from(400), Decimal::new(60, 2));
        assert_eq!(closed, Decimal::from(400));
        assert_eq!(pos.realized_pnl, Decimal::from(40)); // (0.60-0.50)*400
        assert_eq!(pos.current_size, Decimal::from(600));
        assert_eq!(pos.unrealized_pnl, Decimal::from(60)); // (0.60-0.50)*600
        assert_eq!(pos.total_pnl(), pos.unrealized_pnl + pos.realized_pnl);
    }

    #[test]
    fn full_close_zeroes_unrealized_and_stamps_reason() {
        let mut pos = yes_position(1000, 50);
        pos.close(Decimal::new(40, 2), CloseReason::StopLoss);
        assert_eq!(pos.status, PositionStatus::Closed);
        assert_eq!(pos.current_size, Decimal::ZERO);
        assert_eq!(pos.unrealized_pnl, Decimal::ZERO);
        assert_eq!(pos.realized_pnl, Decimal::from(-100)); // (0.40-0.50)*1000
        assert_eq!(pos.close_reason, Some(CloseReason::StopLoss));
        assert!(pos.closed_at.is_some());
    }

    #[test]
    fn increase_uses_weighted_average_entry() {
        let mut pos = yes_position(100, 50);
        pos.increase(Decimal::from(100), Decimal::new(60, 2));
        assert_eq!(pos.entry_price, Decimal::new(55, 2));
        assert_eq!(pos.entry_size, Decimal::from(200));
        assert_eq!(pos.entry_amount, Decimal::from(110));
    }

    #[test]
    fn pnl_percentage_is_zero_without_entry_amount() {
        let mut pos = yes_position(100, 50);
        pos.entry_amount = Decimal::ZERO;
        assert_eq!(pos.pnl_percentage(), Decimal::ZERO);
    }
}
