use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::{Side, WhaleStats};

/// A whale trade that passed all three filter gates, enriched with the
/// figures the sizer and risk gate need.
#[derive(Debug, Clone)]
pub struct TradeIntent {
    /// Whale's wallet address.
    pub wallet: String,
    pub market_id: String,
    pub token_id: String,
    pub side: Side,
    /// Whale's entry price, used as our limit target.
    pub price: Decimal,
    /// Whale's notional (size * price) in USD.
    pub whale_notional: Decimal,
    /// Snapshot of the whale's scored stats at signal time.
    pub whale: WhaleStats,
    /// Blended win probability: 0.7 whale-implied + 0.3 market-implied.
    pub win_probability: Decimal,
    /// Expected edge over fair odds.
    pub edge: Decimal,
    /// Estimated slippage from walking the order book to the whale's size.
    pub estimated_slippage: Decimal,
    /// Correlation of this market with the existing open book.
    pub portfolio_correlation: Decimal,
    /// Market category, for concentration accounting.
    pub category: Option<String>,
    pub resolution_at: Option<DateTime<Utc>>,
}
