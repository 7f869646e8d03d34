use std::sync::Arc;
use std::time::Duration as StdDuration;

use tokio::time::{interval, Duration};

use crate::execution::copy_engine::CopyEngine;

/// Maximum age of a submitted order before auto-cancellation (5 minutes).
const ORDER_STALE_SECS: u64 = 300;

/// Run the fill poller loop. The executor drives fills inline for orders it
/// submitted in this process; the poller is the safety net that picks up
/// in-flight orders after a restart, confirms late fills, detects exchange
/// cancellations, and auto-cancels stale orders.
pub async fn run_order_fill_poller(engine: Arc<CopyEngine>, poll_interval_secs: u64) {
    let mut ticker = interval(Duration::from_secs(poll_interval_secs));
    let stale_after = StdDuration::from_secs(ORDER_STALE_SECS);
    tracing::info!(
        interval_secs = poll_interval_secs,
        "Order fill poller started"
    );

    loop {
        ticker.tick().await;

        let in_flight = engine.executor().in_flight().await;
        if in_flight.is_empty() {
            continue;
        }
        tracing::debug!(count = in_flight.len(), "Reconciling in-flight orders");

        for order in in_flight {
            if let Err(e) = engine
                .executor()
                .reconcile(order.order_id, stale_after)
                .await
            {
                tracing::warn!(
                    order_id = %order.order_id,
                    error = %e,
                    "Order reconciliation failed"
                );
            }
        }
    }
}
