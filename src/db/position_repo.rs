use sqlx::PgPool;

use crate::models::Position;

/// Write-through mirror of a position row; the in-memory ledger is
/// authoritative.
pub async fn upsert_position(pool: &PgPool, pos: &Position) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO positions (
            position_id, whale_address, market_id, token_id, side, category,
            entry_size, entry_price, entry_amount, current_size, current_price,
            market_value, unrealized_pnl, realized_pnl, max_drawdown, max_profit,
            stop_loss_price, take_profit_price, kelly_fraction, edge, win_rate,
            resolution_at, status, opened_at, last_updated_at, closed_at,
            close_reason
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27)
        ON CONFLICT (position_id) DO UPDATE SET
            category = EXCLUDED.category,
            entry_size = EXCLUDED.entry_size,
            entry_price = EXCLUDED.entry_price,
            entry_amount = EXCLUDED.entry_amount,
            current_size = EXCLUDED.current_size,
            current_price = EXCLUDED.current_price,
            market_value = EXCLUDED.market_value,
            unrealized_pnl = EXCLUDED.unrealized_pnl,
            realized_pnl = EXCLUDED.realized_pnl,
            max_drawdown = EXCLUDED.max_drawdown,
            max_profit = EXCLUDED.max_profit,
            stop_loss_price = EXCLUDED.stop_loss_price,
            take_profit_price = EXCLUDED.take_profit_price,
            resolution_at = EXCLUDED.resolution_at,
            status = EXCLUDED.status,
            last_updated_at = EXCLUDED.last_updated_at,
            closed_at = EXCLUDED.closed_at,
            close_reason = EXCLUDED.close_reason
        "#,
    )
    .bind(pos.position_id)
    .bind(&pos.whale_address)
    .bind(&pos.market_id)
    .bind(&pos.token_id)
    .bind(pos.side.to_string())
    .bind(&pos.category)
    .bind(pos.entry_size)
    .bind(pos.entry_price)
    .bind(pos.entry_amount)
    .bind(pos.current_size)
    .bind(pos.current_price)
    .bind(pos.market_value)
    .bind(pos.unrealized_pnl)
    .bind(pos.realized_pnl)
    .bind(pos.max_drawdown)
    .bind(pos.max_profit)
    .bind(pos.stop_loss_price)
    .bind(pos.take_profit_price)
    .bind(pos.kelly_fraction)
    .bind(pos.edge)
    .bind(pos.win_rate)
    .bind(pos.resolution_at)
    .bind(pos.status.as_str())
    .bind(pos.opened_at)
    .bind(pos.last_updated_at)
    .bind(pos.closed_at)
    .bind(pos.close_reason.map(|r| r.as_str()))
    .execute(pool)
    .await?;

    Ok(())
}
