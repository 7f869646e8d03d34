use sqlx::PgPool;

use crate::models::{OrderTransition, PositionUpdate};

/// Append one order transition. Audit rows are insert-only.
pub async fn insert_transition(pool: &PgPool, t: &OrderTransition) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO order_transitions (order_id, from_state, to_state, timestamp, reason, metadata)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(t.order_id)
    .bind(t.from_state.as_str())
    .bind(t.to_state.as_str())
    .bind(t.timestamp)
    .bind(&t.reason)
    .bind(&t.metadata)
    .execute(pool)
    .await?;

    Ok(())
}

/// Append one position update with its before/after snapshots.
pub async fn insert_position_update(pool: &PgPool, u: &PositionUpdate) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO position_updates (
            position_id, update_type, old_size, old_price, old_market_value,
            old_unrealized_pnl, new_size, new_price, new_market_value,
            new_unrealized_pnl, timestamp, reason, metadata
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        "#,
    )
    .bind(u.position_id)
    .bind(u.update_type.as_str())
    .bind(u.old.size)
    .bind(u.old.price)
    .bind(u.old.market_value)
    .bind(u.old.unrealized_pnl)
    .bind(u.new.size)
    .bind(u.new.price)
    .bind(u.new.market_value)
    .bind(u.new.unrealized_pnl)
    .bind(u.timestamp)
    .bind(&u.reason)
    .bind(&u.metadata)
    .execute(pool)
    .await?;

    Ok(())
}
