mod common;

use chrono::Utc;
use rust_decimal::Decimal;

use polycopy::models::{PositionStatus, Side, WhaleTradeEvent};

fn buy_event() -> WhaleTradeEvent {
    WhaleTradeEvent {
        wallet: "0xwhale".into(),
        market_id: "market-1".into(),
        asset_id: "token-1".into(),
        side: Side::Buy,
        size: Decimal::from(10_000),
        price: Decimal::new(55, 2),
        notional: Decimal::from(5_500),
        timestamp: Utc::now(),
    }
}

#[tokio::test(start_paused = true)]
async fn take_profit_lifecycle_settles_with_a_gain() {
    let (engine, audit) = common::build_engine().await;
    engine.process_event(buy_event()).await;

    let pos = engine.ledger().open_positions().await.remove(0);
    let target = pos.take_profit_price.unwrap();

    engine
        .apply_price_tick("token-1", target + Decimal::new(1, 2))
        .await;

    assert!(engine.ledger().open_positions().await.is_empty());
    let closed = engine.ledger().get(pos.position_id).await.unwrap();
    assert_eq!(closed.status, PositionStatus::Closed);
    assert!(closed.realized_pnl > Decimal::ZERO);

    let risk = engine.risk().snapshot().await;
    assert_eq!(risk.open_exposure, Decimal::ZERO);
    assert!(risk.daily_pnl > Decimal::ZERO);
    assert_eq!(risk.consecutive_losses, 0);

    // Entry and exit orders both left a full audit chain.
    assert!(audit.transition_count().await >= 6);
}

#[tokio::test(start_paused = true)]
async fn repeated_whale_sells_close_only_once() {
    let (engine, _) = common::build_engine().await;
    engine.process_event(buy_event()).await;

    let mut sell = buy_event();
    sell.side = Side::Sell;
    sell.timestamp = Utc::now() + chrono::Duration::seconds(1);
    engine.process_event(sell.clone()).await;
    engine.process_event(sell).await;

    let summary = engine.ledger().performance_summary().await;
    assert_eq!(summary.closed_positions, 1);
    assert_eq!(summary.open_positions, 0);

    // One entry order plus one exit order; the second sell found nothing
    // open to mirror.
    assert_eq!(engine.executor().all_orders().await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn closed_positions_are_archived_after_retention() {
    let (engine, _) = common::build_engine().await;
    engine.process_event(buy_event()).await;

    let mut sell = buy_event();
    sell.side = Side::Sell;
    engine.process_event(sell).await;

    // Inside the retention window nothing is archived.
    assert_eq!(
        engine.ledger().archive_closed(chrono::Duration::days(7)).await,
        0
    );
    assert_eq!(
        engine.ledger().archive_closed(chrono::Duration::zero()).await,
        1
    );
}

#[tokio::test(start_paused = true)]
async fn paused_engine_drops_events() {
    let (engine, _) = common::build_engine().await;
    engine.set_paused(true);
    engine.process_event(buy_event()).await;

    assert!(engine.ledger().open_positions().await.is_empty());
    assert!(engine.executor().all_orders().await.is_empty());

    engine.set_paused(false);
    engine.process_event(buy_event()).await;
    assert_eq!(engine.ledger().open_positions().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn fill_poller_reconciliation_is_a_no_op_for_settled_orders() {
    let (engine, _) = common::build_engine().await;
    engine.process_event(buy_event()).await;

    assert!(engine.executor().in_flight().await.is_empty());

    // Reconciling a settled order must not change its state.
    let order = engine.executor().all_orders().await.remove(0);
    engine
        .executor()
        .reconcile(order.order_id, std::time::Duration::from_secs(300))
        .await
        .unwrap();
    let after = engine.executor().get(order.order_id).await.unwrap();
    assert_eq!(after.state, order.state);
}
