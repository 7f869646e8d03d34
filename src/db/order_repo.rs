use sqlx::PgPool;

use crate::models::Order;

/// Write-through mirror of an order row. The in-memory store is
/// authoritative; the UNIQUE constraint on idempotency_key backstops
/// duplicate submission across restarts.
pub async fn upsert(pool: &PgPool, order: &Order) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO orders (
            order_id, idempotency_key, market_id, token_id, side, size, price,
            order_type, state, filled_size, remaining_size, avg_fill_price,
            exchange_order_id, parent_order_id, created_at, submitted_at,
            filled_at, confirmed_at, retry_count, max_retries, error_message
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                $15, $16, $17, $18, $19, $20, $21)
        ON CONFLICT (order_id) DO UPDATE SET
            state = EXCLUDED.state,
            filled_size = EXCLUDED.filled_size,
            remaining_size = EXCLUDED.remaining_size,
            avg_fill_price = EXCLUDED.avg_fill_price,
            exchange_order_id = EXCLUDED.exchange_order_id,
            submitted_at = EXCLUDED.submitted_at,
            filled_at = EXCLUDED.filled_at,
            confirmed_at = EXCLUDED.confirmed_at,
            retry_count = EXCLUDED.retry_count,
            error_message = EXCLUDED.error_message
        "#,
    )
    .bind(order.order_id)
    .bind(&order.idempotency_key)
    .bind(&order.market_id)
    .bind(&order.token_id)
    .bind(order.side.to_string())
    .bind(order.size)
    .bind(order.price)
    .bind(order.order_type.to_string())
    .bind(order.state.as_str())
    .bind(order.filled_size)
    .bind(order.remaining_size)
    .bind(order.avg_fill_price)
    .bind(&order.exchange_order_id)
    .bind(order.parent_order_id)
    .bind(order.created_at)
    .bind(order.submitted_at)
    .bind(order.filled_at)
    .bind(order.confirmed_at)
    .bind(order.retry_count as i32)
    .bind(order.max_retries as i32)
    .bind(&order.error_message)
    .execute(pool)
    .await?;

    Ok(())
}
