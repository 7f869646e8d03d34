use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::timeout;
use uuid::Uuid;

use crate::audit::AuditTrail;
use crate::db::order_repo;
use crate::exchange::{ExchangeClient, FillEvent, FillState, SubmitRequest};
use crate::execution::retry::RetryPolicy;
use crate::models::{Order, OrderState, OrderTransition, OrderType, Side};

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub retry: RetryPolicy,
    /// How long a submitted order may sit before the fill deadline fires.
    pub fill_deadline: Duration,
    pub poll_interval: Duration,
    /// Fill ratio at the deadline above which the remainder is cancelled
    /// and the order confirmed as-is.
    pub accept_partial_ratio: Decimal,
    /// How many times an unfilled remainder may be re-submitted as a child.
    pub max_resubmissions: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            fill_deadline: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
            accept_partial_ratio: Decimal::new(8, 1),
            max_resubmissions: 2,
        }
    }
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("illegal order transition {from} -> {to}")]
    IllegalTransition { from: OrderState, to: OrderState },

    #[error("unknown order {0}")]
    UnknownOrder(Uuid),
}

/// New order to execute. The idempotency key makes resubmission safe: the
/// same key always maps to the same order.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub idempotency_key: String,
    pub market_id: String,
    pub token_id: String,
    pub side: Side,
    pub size: Decimal,
    pub price: Option<Decimal>,
    pub order_type: OrderType,
}

/// Final outcome of driving one request, including any child orders spawned
/// for unfilled remainders.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub orders: Vec<Order>,
    pub total_filled: Decimal,
    pub avg_fill_price: Option<Decimal>,
    /// True when the idempotency key matched an existing chain and nothing
    /// new was sent to the exchange.
    pub duplicate: bool,
}

impl ExecutionReport {
    fn from_chain(orders: Vec<Order>) -> Self {
        let mut total = Decimal::ZERO;
        let mut notional = Decimal::ZERO;
        for order in &orders {
            if let Some(avg) = order.avg_fill_price {
                total += order.filled_size;
                notional += order.filled_size * avg;
            }
        }
        let avg = if total.is_zero() {
            None
        } else {
            Some(notional / total)
        };
        Self {
            orders,
            total_filled: total,
            avg_fill_price: avg,
            duplicate: false,
        }
    }

    pub fn confirmed(&self) -> bool {
        self.orders
            .iter()
            .any(|o| o.state == OrderState::Confirmed)
    }

    pub fn final_state(&self) -> OrderState {
        self.orders
            .last()
            .map(|o| o.state)
            .unwrap_or(OrderState::Pending)
    }
}

#[derive(Default)]
struct OrderStore {
    by_id: HashMap<Uuid, Order>,
    /// Idempotency key -> order chain (root first).
    by_key: HashMap<String, Vec<Uuid>>,
    /// (order_id, fill_sequence) pairs already applied.
    seen_fills: HashSet<(Uuid, u64)>,
}

/// Drives orders through the exchange: idempotent submission, bounded
/// retries on transient failures, fill confirmation with a hard deadline,
/// and remainder resubmission for under-filled orders. Every state change
/// is written to the audit trail before the in-memory state moves.
#[derive(Clone)]
pub struct OrderExecutor {
    exchange: Arc<dyn ExchangeClient>,
    audit: AuditTrail,
    pool: Option<PgPool>,
    config: ExecutorConfig,
    store: Arc<Mutex<OrderStore>>,
}

impl OrderExecutor {
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        audit: AuditTrail,
        pool: Option<PgPool>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            exchange,
            audit,
            pool,
            config,
            store: Arc::new(Mutex::new(OrderStore::default())),
        }
    }

    /// Submit a request and drive it to a terminal state. Calling again
    /// with the same idempotency key returns the existing chain without
    /// touching the exchange.
    pub async fn submit(&self, request: OrderRequest) -> Result<ExecutionReport, ExecutorError> {
        let root = {
            let mut store = self.store.lock().await;
            if let Some(chain) = store.by_key.get(&request.idempotency_key) {
                tracing::info!(
                    key = %request.idempotency_key,
                    "Duplicate submission ignored, returning existing order chain"
                );
                let orders = chain
                    .iter()
                    .filter_map(|id| store.by_id.get(id).cloned())
                    .collect();
                let mut report = ExecutionReport::from_chain(orders);
                report.duplicate = true;
                return Ok(report);
            }

            let order = Order::new(
                request.idempotency_key.clone(),
                request.market_id.clone(),
                request.token_id.clone(),
                request.side,
                request.size,
                request.price,
                request.order_type,
                self.config.retry.max_retries,
            );
            store
                .by_key
                .insert(request.idempotency_key.clone(), vec![order.order_id]);
            store.by_id.insert(order.order_id, order.clone());
            order
        };
        self.mirror(&root).await;

        let mut chain = Vec::new();
        let mut current = root;
        let mut resubmissions = 0u32;

        loop {
            let driven = self.drive(current).await?;
            let spawn_child = driven.state == OrderState::Confirmed
                && !driven.is_fully_filled()
                && driven.fill_ratio() < self.config.accept_partial_ratio
                && driven.filled_size > Decimal::ZERO
                && resubmissions < self.config.max_resubmissions;

            if spawn_child {
                resubmissions += 1;
                let child = self.spawn_child(&driven, resubmissions).await;
                chain.push(driven);
                current = child;
                continue;
            }

            chain.push(driven);
            break;
        }

        Ok(ExecutionReport::from_chain(chain))
    }

    /// Drive one order: submit with retries, then wait out the fill window.
    async fn drive(&self, mut order: Order) -> Result<Order, ExecutorError> {
        match self.submit_with_retries(&mut order).await {
            Ok(()) => {}
            Err(reason) => {
                self.transition(&mut order, OrderState::Failed, &reason).await?;
                if order.retry_count >= order.max_retries {
                    self.transition(&mut order, OrderState::DeadLetter, "retry budget exhausted")
                        .await?;
                    metrics::counter!("orders_dead_letter_total").increment(1);
                }
                return Ok(order);
            }
        }

        self.await_fill(&mut order).await?;
        Ok(order)
    }

    async fn submit_with_retries(&self, order: &mut Order) -> Result<(), String> {
        let request = SubmitRequest {
            client_order_id: order.order_id,
            token_id: order.token_id.clone(),
            side: order.side,
            size: order.size,
            price: order.price,
            order_type: order.order_type,
        };

        loop {
            let attempt = timeout(
                self.config.retry.attempt_timeout,
                self.exchange.submit_order(&request),
            )
            .await;

            let error = match attempt {
                Ok(Ok(ack)) => {
                    order.exchange_order_id = Some(ack.exchange_order_id);
                    order.submitted_at = Some(Utc::now());
                    self.transition(order, OrderState::Submitted, "accepted by exchange")
                        .await
                        .map_err(|e| e.to_string())?;
                    return Ok(());
                }
                Ok(Err(e)) => e,
                Err(_) => crate::exchange::ExchangeError::Timeout(format!(
                    "submit attempt exceeded {:?}",
                    self.config.retry.attempt_timeout
                )),
            };

            if self.config.retry.should_retry(&error, order.retry_count) {
                order.retry_count += 1;
                let delay = self.config.retry.backoff(order.retry_count);
                tracing::warn!(
                    order_id = %order.order_id,
                    attempt = order.retry_count,
                    delay = ?delay,
                    error = %error,
                    "Transient submit failure, backing off"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            order.error_message = Some(error.to_string());
            return Err(error.to_string());
        }
    }

    /// Poll for fills until the order completes or the deadline passes.
    /// At the deadline: fully/mostly filled orders confirm (cancelling any
    /// remainder), under-filled orders confirm what matched, and untouched
    /// orders cancel outright.
    async fn await_fill(&self, order: &mut Order) -> Result<(), ExecutorError> {
        let deadline = tokio::time::Instant::now() + self.config.fill_deadline;
        let exchange_id = match &order.exchange_order_id {
            Some(id) => id.clone(),
            None => return Ok(()),
        };

        loop {
            tokio::time::sleep(self.config.poll_interval).await;

            match self.exchange.poll_fill(&exchange_id).await {
                Ok(status) => {
                    let event = FillEvent {
                        order_id: order.order_id,
                        fill_sequence: status.fill_sequence,
                        filled_size: status.filled_size,
                        avg_price: status.avg_price,
                        state: status.state,
                    };
                    self.apply_fill_to(order, event).await?;
                    if order.state == OrderState::Filled {
                        order.confirmed_at = Some(Utc::now());
                        self.transition(order, OrderState::Confirmed, "fully filled")
                            .await?;
                        metrics::counter!("orders_confirmed_total").increment(1);
                        return Ok(());
                    }
                    if status.state == FillState::Cancelled {
                        // Whatever matched before the cancel is real exposure
                        // and must settle; only an untouched order cancels.
                        if order.filled_size > Decimal::ZERO {
                            order.confirmed_at = Some(Utc::now());
                            self.transition(
                                order,
                                OrderState::Confirmed,
                                "cancelled on exchange with partial fill",
                            )
                            .await?;
                            metrics::counter!("orders_confirmed_total").increment(1);
                        } else {
                            self.transition(order, OrderState::Cancelled, "cancelled on exchange")
                                .await?;
                        }
                        return Ok(());
                    }
                }
                Err(e) => {
                    tracing::warn!(order_id = %order.order_id, error = %e, "Fill poll failed");
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return self.resolve_deadline(order, &exchange_id).await;
            }
        }
    }

    async fn resolve_deadline(
        &self,
        order: &mut Order,
        exchange_id: &str,
    ) -> Result<(), ExecutorError> {
        if let Err(e) = self.exchange.cancel_order(exchange_id).await {
            tracing::warn!(order_id = %order.order_id, error = %e, "Cancel at fill deadline failed");
        }

        if order.filled_size > Decimal::ZERO {
            // Confirm whatever matched. A remainder below the acceptance
            // ratio is re-submitted as a child order by the caller.
            order.confirmed_at = Some(Utc::now());
            self.transition(
                order,
                OrderState::Confirmed,
                "fill deadline reached, remainder cancelled",
            )
            .await?;
            metrics::counter!("orders_confirmed_total").increment(1);
        } else {
            self.transition(order, OrderState::Cancelled, "no fill within deadline")
                .await?;
        }
        Ok(())
    }

    async fn spawn_child(&self, parent: &Order, generation: u32) -> Order {
        let mut child = Order::new(
            format!("{}:resubmit-{generation}", parent.idempotency_key),
            parent.market_id.clone(),
            parent.token_id.clone(),
            parent.side,
            parent.remaining_size,
            parent.price,
            parent.order_type,
            self.config.retry.max_retries,
        );
        child.parent_order_id = Some(parent.order_id);

        tracing::info!(
            parent = %parent.order_id,
            child = %child.order_id,
            size = %child.size,
            "Re-submitting unfilled remainder as child order"
        );

        let mut store = self.store.lock().await;
        if let Some(chain) = store.by_key.get_mut(&parent.idempotency_key) {
            chain.push(child.order_id);
        }
        store.by_id.insert(child.order_id, child.clone());
        drop(store);
        self.mirror(&child).await;
        child
    }

    /// Apply a fill event from the streaming or polling path. Events are
    /// deduplicated by (order_id, fill_sequence); sizes are cumulative so a
    /// replay converges rather than double counting.
    pub async fn apply_fill(&self, event: FillEvent) -> Result<(), ExecutorError> {
        let mut order = {
            let store = self.store.lock().await;
            store
                .by_id
                .get(&event.order_id)
                .cloned()
                .ok_or(ExecutorError::UnknownOrder(event.order_id))?
        };
        self.apply_fill_to(&mut order, event).await
    }

    async fn apply_fill_to(&self, order: &mut Order, event: FillEvent) -> Result<(), ExecutorError> {
        {
            let mut store = self.store.lock().await;
            if !store.seen_fills.insert((event.order_id, event.fill_sequence)) {
                return Ok(());
            }
        }

        let delta = event.filled_size - order.filled_size;
        if delta > Decimal::ZERO {
            order.record_fill(delta, event.avg_price);
            // The exchange reports the authoritative cumulative average.
            order.avg_fill_price = Some(event.avg_price);
        }

        if order.is_fully_filled() {
            if order.state.can_transition_to(OrderState::Filled) {
                self.transition(order, OrderState::Filled, "cumulative fill complete")
                    .await?;
            }
        } else if delta > Decimal::ZERO && order.state == OrderState::Submitted {
            self.transition(order, OrderState::PartiallyFilled, "partial fill")
                .await?;
        } else {
            self.persist(order).await;
        }
        Ok(())
    }

    /// Audit-first state change: the transition is on the trail before the
    /// in-memory order moves.
    async fn transition(
        &self,
        order: &mut Order,
        to: OrderState,
        reason: &str,
    ) -> Result<(), ExecutorError> {
        let from = order.state;
        if !from.can_transition_to(to) {
            return Err(ExecutorError::IllegalTransition { from, to });
        }

        self.audit
            .record_transition(OrderTransition {
                order_id: order.order_id,
                from_state: from,
                to_state: to,
                timestamp: Utc::now(),
                reason: reason.to_string(),
                metadata: serde_json::json!({
                    "filled_size": order.filled_size.to_string(),
                    "remaining_size": order.remaining_size.to_string(),
                    "retry_count": order.retry_count,
                }),
            })
            .await;

        order.state = to;
        tracing::debug!(order_id = %order.order_id, %from, %to, reason, "Order transition");
        self.persist(order).await;
        Ok(())
    }

    async fn persist(&self, order: &Order) {
        {
            let mut store = self.store.lock().await;
            store.by_id.insert(order.order_id, order.clone());
        }
        self.mirror(order).await;
    }

    async fn mirror(&self, order: &Order) {
        if let Some(pool) = &self.pool {
            if let Err(e) = order_repo::upsert(pool, order).await {
                tracing::error!(order_id = %order.order_id, error = %e, "Failed to mirror order");
            }
        }
    }

    pub async fn get(&self, order_id: Uuid) -> Option<Order> {
        self.store.lock().await.by_id.get(&order_id).cloned()
    }

    pub async fn all_orders(&self) -> Vec<Order> {
        let store = self.store.lock().await;
        let mut orders: Vec<Order> = store.by_id.values().cloned().collect();
        orders.sort_by_key(|o| o.created_at);
        orders
    }

    /// Orders submitted to the exchange but not yet finalized.
    pub async fn in_flight(&self) -> Vec<Order> {
        self.store
            .lock()
            .await
            .by_id
            .values()
            .filter(|o| {
                matches!(
                    o.state,
                    OrderState::Submitted | OrderState::PartiallyFilled
                )
            })
            .cloned()
            .collect()
    }

    /// One reconciliation pass over an in-flight order, used by the fill
    /// poller: apply the latest exchange status and finalize orders that
    /// completed, were cancelled, or went stale.
    pub async fn reconcile(
        &self,
        order_id: Uuid,
        stale_after: Duration,
    ) -> Result<(), ExecutorError> {
        let mut order = self
            .get(order_id)
            .await
            .ok_or(ExecutorError::UnknownOrder(order_id))?;
        if !matches!(
            order.state,
            OrderState::Submitted | OrderState::PartiallyFilled
        ) {
            return Ok(());
        }
        let Some(exchange_id) = order.exchange_order_id.clone() else {
            return Ok(());
        };

        match self.exchange.poll_fill(&exchange_id).await {
            Ok(status) => {
                let cancelled = status.state == FillState::Cancelled;
                let event = FillEvent {
                    order_id: order.order_id,
                    fill_sequence: status.fill_sequence,
                    filled_size: status.filled_size,
                    avg_price: status.avg_price,
                    state: status.state,
                };
                self.apply_fill_to(&mut order, event).await?;

                if order.state == OrderState::Filled {
                    order.confirmed_at = Some(Utc::now());
                    self.transition(&mut order, OrderState::Confirmed, "fully filled")
                        .await?;
                    metrics::counter!("orders_confirmed_total").increment(1);
                    return Ok(());
                }
                if cancelled {
                    if order.state == OrderState::PartiallyFilled {
                        order.confirmed_at = Some(Utc::now());
                        self.transition(
                            &mut order,
                            OrderState::Confirmed,
                            "cancelled on exchange with partial fill",
                        )
                        .await?;
                    } else {
                        self.transition(&mut order, OrderState::Cancelled, "cancelled on exchange")
                            .await?;
                    }
                    return Ok(());
                }
            }
            Err(e) => {
                tracing::warn!(order_id = %order.order_id, error = %e, "Reconcile poll failed");
            }
        }

        let stale = order
            .submitted_at
            .map(|t| {
                Utc::now() - t
                    > chrono::Duration::from_std(stale_after).unwrap_or(chrono::Duration::zero())
            })
            .unwrap_or(false);
        if stale {
            tracing::warn!(order_id = %order.order_id, "Order stale, cancelling");
            self.resolve_deadline(&mut order, &exchange_id).await?;
        }
        Ok(())
    }

    pub async fn dead_letters(&self) -> Vec<Order> {
        self.store
            .lock()
            .await
            .by_id
            .values()
            .filter(|o| o.state == OrderState::DeadLetter)
            .cloned()
            .collect()
    }

    /// Re-derive in-flight order states from the audit trail after a
    /// restart. Returns the orders still awaiting action.
    pub async fn recover(&self) -> Vec<Order> {
        let mut store = self.store.lock().await;
        let mut pending = Vec::new();
        for order in store.by_id.values_mut() {
            if let Some(state) = self.audit.latest_order_state(order.order_id).await {
                if order.state != state {
                    tracing::info!(
                        order_id = %order.order_id,
                        recorded = %state,
                        held = %order.state,
                        "Adopting audited order state on recovery"
                    );
                    order.state = state;
                }
            }
            if !order.state.is_terminal() {
                pending.push(order.clone());
            }
        }
        pending
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
