use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::time::{interval, Duration};

use crate::exchange::ExchangeClient;
use crate::execution::copy_engine::CopyEngine;

/// Closed positions older than this are dropped from the in-memory ledger.
/// Their history survives in the audit trail and the database mirror.
const ARCHIVE_RETENTION_DAYS: i64 = 7;

/// Background price monitor. Each tick pulls the order book for every token
/// with an open position, marks the position at the best bid, and lets the
/// engine dispatch whatever exits that triggers. Also handles the slow
/// housekeeping: trading-day rollover, quarantine refresh, and archiving.
pub async fn run_position_monitor(
    engine: Arc<CopyEngine>,
    exchange: Arc<dyn ExchangeClient>,
    interval_secs: u64,
) {
    let mut ticker = interval(Duration::from_secs(interval_secs));
    tracing::info!(interval_secs, "Position monitor started");

    loop {
        ticker.tick().await;

        engine.risk().roll_trading_day(Utc::now()).await;

        if engine.is_paused() {
            tracing::debug!("Trading paused, skipping position monitor tick");
            continue;
        }

        let open = engine.ledger().open_positions().await;
        if open.is_empty() {
            continue;
        }

        let tokens: HashSet<String> = open.iter().map(|p| p.token_id.clone()).collect();
        tracing::debug!(
            positions = open.len(),
            tokens = tokens.len(),
            "Marking open positions"
        );

        for token_id in tokens {
            let book = match exchange.fetch_order_book(&token_id).await {
                Ok(book) => book,
                Err(e) => {
                    tracing::warn!(token_id = %token_id, error = %e, "Order book fetch failed");
                    metrics::counter!("book_fetch_failures_total").increment(1);
                    continue;
                }
            };

            // For a position we hold, the exit price is the best bid.
            let Some(price) = book.best_bid() else {
                tracing::warn!(token_id = %token_id, "Empty bid side, skipping mark");
                continue;
            };
            if price <= Decimal::ZERO {
                continue;
            }

            engine.apply_price_tick(&token_id, price).await;
        }

        engine.refresh_quarantine().await;

        let archived = engine
            .ledger()
            .archive_closed(chrono::Duration::days(ARCHIVE_RETENTION_DAYS))
            .await;
        if archived > 0 {
            tracing::info!(archived, "Archived closed positions");
        }
    }
}
