use std::sync::Arc;

use sqlx::PgPool;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::db::audit_repo;
use crate::models::{OrderState, OrderTransition, PositionUpdate};

/// Append-only transition/update log for orders and positions.
///
/// The in-memory log is the source of truth for replay; when a pool is
/// configured every record is mirrored into `order_transitions` /
/// `position_updates`. Records are never updated or deleted.
#[derive(Clone)]
pub struct AuditTrail {
    transitions: Arc<Mutex<Vec<OrderTransition>>>,
    updates: Arc<Mutex<Vec<PositionUpdate>>>,
    pool: Option<PgPool>,
}

impl AuditTrail {
    pub fn new(pool: Option<PgPool>) -> Self {
        Self {
            transitions: Arc::new(Mutex::new(Vec::new())),
            updates: Arc::new(Mutex::new(Vec::new())),
            pool,
        }
    }

    /// Append an order transition. The record is in the log before the
    /// caller proceeds, so a crash after this point is replayable.
    pub async fn record_transition(&self, transition: OrderTransition) {
        self.transitions.lock().await.push(transition.clone());

        if let Some(pool) = &self.pool {
            if let Err(e) = audit_repo::insert_transition(pool, &transition).await {
                tracing::error!(
                    error = %e,
                    order_id = %transition.order_id,
                    "Failed to mirror order transition to database"
                );
            }
        }
    }

    pub async fn record_position_update(&self, update: PositionUpdate) {
        self.updates.lock().await.push(update.clone());

        if let Some(pool) = &self.pool {
            if let Err(e) = audit_repo::insert_position_update(pool, &update).await {
                tracing::error!(
                    error = %e,
                    position_id = %update.position_id,
                    "Failed to mirror position update to database"
                );
            }
        }
    }

    pub async fn transitions_for(&self, order_id: Uuid) -> Vec<OrderTransition> {
        self.transitions
            .lock()
            .await
            .iter()
            .filter(|t| t.order_id == order_id)
            .cloned()
            .collect()
    }

    pub async fn updates_for(&self, position_id: Uuid) -> Vec<PositionUpdate> {
        self.updates
            .lock()
            .await
            .iter()
            .filter(|u| u.position_id == position_id)
            .cloned()
            .collect()
    }

    /// Latest recorded state of an order, used by crash recovery to
    /// re-derive where the state machine left off.
    pub async fn latest_order_state(&self, order_id: Uuid) -> Option<OrderState> {
        self.transitions
            .lock()
            .await
            .iter()
            .rev()
            .find(|t| t.order_id == order_id)
            .map(|t| t.to_state)
    }

    pub async fn transition_count(&self) -> usize {
        self.transitions.lock().await.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn transition(order_id: Uuid, from: OrderState, to: OrderState) -> OrderTransition {
        OrderTransition {
            order_id,
            from_state: from,
            to_state: to,
            timestamp: Utc::now(),
            reason: "test".into(),
            metadata: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn latest_state_follows_append_order() {
        let audit = AuditTrail::new(None);
        let id = Uuid::new_v4();

        audit
            .record_transition(transition(id, OrderState::Pending, OrderState::Submitted))
            .await;
        audit
            .record_transition(transition(id, OrderState::Submitted, OrderState::Filled))
            .await;
        audit
            .record_transition(transition(id, OrderState::Filled, OrderState::Confirmed))
            .await;

        assert_eq!(
            audit.latest_order_state(id).await,
            Some(OrderState::Confirmed)
        );
        assert_eq!(audit.transitions_for(id).await.len(), 3);
    }

    #[tokio::test]
    async fn transitions_are_scoped_per_order() {
        let audit = AuditTrail::new(None);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        audit
            .record_transition(transition(a, OrderState::Pending, OrderState::Submitted))
            .await;
        audit
            .record_transition(transition(b, OrderState::Pending, OrderState::Failed))
            .await;

        assert_eq!(audit.transitions_for(a).await.len(), 1);
        assert_eq!(audit.latest_order_state(b).await, Some(OrderState::Failed));
        assert_eq!(audit.latest_order_state(Uuid::new_v4()).await, None);
    }
}
