use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::audit::AuditTrail;
use crate::db::position_repo;
use crate::models::position::PositionSnapshot;
use crate::models::{CloseReason, Outcome, Position, PositionStatus, PositionUpdate, UpdateType};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("position not found: {0}")]
    NotFound(Uuid),

    #[error("position {0} is not open")]
    NotOpen(Uuid),
}

/// Exit trigger kinds, evaluated in the order configured by `ExitPolicy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitTrigger {
    StopLoss,
    TakeProfit,
    TimeBased,
    WhaleMirror,
}

/// Which exits fire first is policy, not law: the default order is
/// stop-loss, take-profit, time-based, whale-mirror.
#[derive(Debug, Clone)]
pub struct ExitPolicy {
    pub priority: Vec<ExitTrigger>,
    /// Close positions this close to market resolution.
    pub pre_resolution_window: Duration,
}

impl Default for ExitPolicy {
    fn default() -> Self {
        Self {
            priority: vec![
                ExitTrigger::StopLoss,
                ExitTrigger::TakeProfit,
                ExitTrigger::TimeBased,
                ExitTrigger::WhaleMirror,
            ],
            pre_resolution_window: Duration::hours(24),
        }
    }
}

/// A position whose exit condition fired; the caller routes a closing order
/// through the executor.
#[derive(Debug, Clone)]
pub struct TriggeredExit {
    pub position_id: Uuid,
    pub token_id: String,
    pub size: Decimal,
    pub price: Decimal,
    pub reason: CloseReason,
}

/// Read-only snapshot of the open book, consumed by the portfolio gate and
/// the sizer.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PortfolioView {
    pub nav: Decimal,
    pub total_exposure: Decimal,
    pub open_count: i64,
    pub category_exposure: HashMap<String, Decimal>,
    pub per_whale_exposure: HashMap<String, Decimal>,
    pub open_tokens: Vec<String>,
}

impl PortfolioView {
    /// Correlation proxy of a candidate trade with the open book: 1.0 for a
    /// token already held, otherwise the share of open exposure in the same
    /// category. A richer estimator can replace this input wholesale.
    pub fn correlation_with(&self, token_id: &str, category: Option<&str>) -> Decimal {
        if self.open_tokens.iter().any(|t| t == token_id) {
            return Decimal::ONE;
        }
        let (Some(cat), false) = (category, self.total_exposure.is_zero()) else {
            return Decimal::ZERO;
        };
        self.category_exposure
            .get(cat)
            .map(|e| e / self.total_exposure)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn exposure_in_category(&self, category: &str) -> Decimal {
        self.category_exposure
            .get(category)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }
}

/// Aggregate performance figures for the monitoring surface.
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceSummary {
    pub open_positions: i64,
    pub closing_positions: i64,
    pub closed_positions: i64,
    pub total_exposure: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub total_pnl: Decimal,
    pub winning_closed: i64,
    pub losing_closed: i64,
}

/// Authoritative record of open and closed positions.
///
/// All mutation funnels through this type so derived P&L fields are always
/// recomputed and every change produces an immutable PositionUpdate in the
/// audit trail. When a pool is configured, rows mirror into `positions`.
#[derive(Clone)]
pub struct PositionLedger {
    positions: Arc<Mutex<HashMap<Uuid, Position>>>,
    audit: AuditTrail,
    pool: Option<PgPool>,
    policy: ExitPolicy,
}

impl PositionLedger {
    pub fn new(audit: AuditTrail, pool: Option<PgPool>, policy: ExitPolicy) -> Self {
        Self {
            positions: Arc::new(Mutex::new(HashMap::new())),
            audit,
            pool,
            policy,
        }
    }

    async fn mirror(&self, pos: &Position) {
        if let Some(pool) = &self.pool {
            if let Err(e) = position_repo::upsert_position(pool, pos).await {
                tracing::error!(
                    error = %e,
                    position_id = %pos.position_id,
                    "Failed to mirror position to database"
                );
            }
        }
    }

    async fn record_update(
        &self,
        position_id: Uuid,
        update_type: UpdateType,
        old: PositionSnapshot,
        new: PositionSnapshot,
        reason: &str,
    ) {
        self.audit
            .record_position_update(PositionUpdate::record(
                position_id,
                update_type,
                old,
                new,
                reason,
            ))
            .await;
    }

    /// Open a new position from a confirmed fill, or add to the existing
    /// open position for the same whale and token.
    #[allow(clippy::too_many_arguments)]
    pub async fn open_position(
        &self,
        whale_address: &str,
        market_id: &str,
        token_id: &str,
        side: Outcome,
        size: Decimal,
        fill_price: Decimal,
        kelly_fraction: Decimal,
        edge: Decimal,
        win_rate: Decimal,
    ) -> Position {
        let mut positions = self.positions.lock().await;

        let existing = positions.values_mut().find(|p| {
            p.status == PositionStatus::Open
                && p.token_id == token_id
                && p.whale_address == whale_address
        });

        let pos = match existing {
            Some(pos) => {
                let old = pos.snapshot();
                pos.increase(size, fill_price);
                let (id, new) = (pos.position_id, pos.snapshot());
                let pos = pos.clone();
                drop(positions);
                self.record_update(id, UpdateType::SizeIncrease, old, new, "added to position")
                    .await;
                pos
            }
            None => {
                let pos = Position::open(
                    whale_address.to_string(),
                    market_id.to_string(),
                    token_id.to_string(),
                    side,
                    size,
                    fill_price,
                    kelly_fraction,
                    edge,
                    win_rate,
                );
                positions.insert(pos.position_id, pos.clone());
                drop(positions);
                self.record_update(
                    pos.position_id,
                    UpdateType::SizeIncrease,
                    PositionSnapshot {
                        size: Decimal::ZERO,
                        price: pos.entry_price,
                        market_value: Decimal::ZERO,
                        unrealized_pnl: Decimal::ZERO,
                    },
                    pos.snapshot(),
                    "position opened",
                )
                .await;
                pos
            }
        };

        self.mirror(&pos).await;
        pos
    }

    /// Attach stop-loss / take-profit levels and lifecycle metadata.
    pub async fn configure_position(
        &self,
        position_id: Uuid,
        stop_loss_price: Option<Decimal>,
        take_profit_price: Option<Decimal>,
        category: Option<String>,
        resolution_at: Option<DateTime<Utc>>,
    ) -> Result<(), LedgerError> {
        let mut positions = self.positions.lock().await;
        let pos = positions
            .get_mut(&position_id)
            .ok_or(LedgerError::NotFound(position_id))?;
        pos.stop_loss_price = stop_loss_price;
        pos.take_profit_price = take_profit_price;
        pos.category = category;
        pos.resolution_at = resolution_at;
        let pos = pos.clone();
        drop(positions);
        self.mirror(&pos).await;
        Ok(())
    }

    /// Apply a price tick to every open position on `token_id`, then return
    /// any exits whose trigger fired. Positions already CLOSING are not
    /// re-triggered.
    pub async fn apply_price(&self, token_id: &str, price: Decimal) -> Vec<TriggeredExit> {
        let now = Utc::now();
        let mut fired = Vec::new();
        let mut updates = Vec::new();
        let mut mirrors = Vec::new();

        {
            let mut positions = self.positions.lock().await;
            for pos in positions.values_mut() {
                if pos.token_id != token_id || pos.status != PositionStatus::Open {
                    continue;
                }
                let old = pos.snapshot();
                pos.update_price(price);
                updates.push((pos.position_id, old, pos.snapshot()));

                if let Some(reason) = self.evaluate_triggers(pos, now) {
                    pos.status = PositionStatus::Closing;
                    pos.close_reason = Some(reason);
                    fired.push(TriggeredExit {
                        position_id: pos.position_id,
                        token_id: pos.token_id.clone(),
                        size: pos.current_size,
                        price: pos.current_price,
                        reason,
                    });
                }
                mirrors.push(pos.clone());
            }
        }

        for (id, old, new) in updates {
            self.record_update(id, UpdateType::PriceUpdate, old, new, "price tick")
                .await;
        }
        for exit in &fired {
            let update_type = match exit.reason {
                CloseReason::StopLoss => UpdateType::StopLossHit,
                CloseReason::TakeProfit => UpdateType::TakeProfitHit,
                _ => UpdateType::ManualAdjustment,
            };
            let snap = PositionSnapshot {
                size: exit.size,
                price: exit.price,
                market_value: exit.size * exit.price,
                unrealized_pnl: Decimal::ZERO,
            };
            self.record_update(
                exit.position_id,
                update_type,
                snap,
                snap,
                exit.reason.as_str(),
            )
            .await;
        }
        for pos in &mirrors {
            self.mirror(pos).await;
        }

        fired
    }

    /// First matching trigger in policy order wins; triggers are mutually
    /// exclusive per evaluation cycle.
    fn evaluate_triggers(&self, pos: &Position, now: DateTime<Utc>) -> Option<CloseReason> {
        for trigger in &self.policy.priority {
            match trigger {
                ExitTrigger::StopLoss => {
                    if let Some(stop) = pos.stop_loss_price {
                        if pos.current_price <= stop {
                            return Some(CloseReason::StopLoss);
                        }
                    }
                }
                ExitTrigger::TakeProfit => {
                    if let Some(target) = pos.take_profit_price {
                        if pos.current_price >= target {
                            return Some(CloseReason::TakeProfit);
                        }
                    }
                }
                ExitTrigger::TimeBased => {
                    if let Some(resolution) = pos.resolution_at {
                        if resolution - now <= self.policy.pre_resolution_window {
                            return Some(CloseReason::PreResolution);
                        }
                    }
                }
                // Mirror exits arrive as events, not price evaluations.
                ExitTrigger::WhaleMirror => {}
            }
        }
        None
    }

    /// The source whale closed: mark matching open positions CLOSING and
    /// return the exits to execute. Honors the configured policy: if
    /// whale-mirroring is not in the priority list, nothing fires.
    pub async fn whale_exit(&self, wallet: &str, token_id: &str) -> Vec<TriggeredExit> {
        if !self.policy.priority.contains(&ExitTrigger::WhaleMirror) {
            return Vec::new();
        }

        let mut fired = Vec::new();
        {
            let mut positions = self.positions.lock().await;
            for pos in positions.values_mut() {
                if pos.status != PositionStatus::Open
                    || pos.whale_address != wallet
                    || pos.token_id != token_id
                {
                    continue;
                }
                pos.status = PositionStatus::Closing;
                pos.close_reason = Some(CloseReason::WhaleExit);
                fired.push(TriggeredExit {
                    position_id: pos.position_id,
                    token_id: pos.token_id.clone(),
                    size: pos.current_size,
                    price: pos.current_price,
                    reason: CloseReason::WhaleExit,
                });
            }
        }
        for exit in &fired {
            tracing::info!(
                position_id = %exit.position_id,
                wallet,
                "Whale exited, mirroring close"
            );
        }
        fired
    }

    /// Finalize a full closure from a confirmed closing fill.
    pub async fn close_position(
        &self,
        position_id: Uuid,
        fill_price: Decimal,
        reason: CloseReason,
    ) -> Result<Position, LedgerError> {
        let mut positions = self.positions.lock().await;
        let pos = positions
            .get_mut(&position_id)
            .ok_or(LedgerError::NotFound(position_id))?;
        if !pos.is_open() {
            return Err(LedgerError::NotOpen(position_id));
        }

        let old = pos.snapshot();
        pos.close(fill_price, reason);
        let pos = pos.clone();
        drop(positions);

        self.record_update(
            position_id,
            UpdateType::FullClose,
            old,
            pos.snapshot(),
            reason.as_str(),
        )
        .await;
        self.mirror(&pos).await;

        tracing::info!(
            position_id = %position_id,
            reason = %reason,
            realized_pnl = %pos.realized_pnl,
            "Position closed"
        );
        Ok(pos)
    }

    /// Reduce an open position from a partial closing fill.
    pub async fn reduce_position(
        &self,
        position_id: Uuid,
        size: Decimal,
        fill_price: Decimal,
    ) -> Result<Position, LedgerError> {
        let mut positions = self.positions.lock().await;
        let pos = positions
            .get_mut(&position_id)
            .ok_or(LedgerError::NotFound(position_id))?;
        if !pos.is_open() {
            return Err(LedgerError::NotOpen(position_id));
        }

        let old = pos.snapshot();
        pos.reduce(size, fill_price);
        let pos = pos.clone();
        drop(positions);

        self.record_update(
            position_id,
            UpdateType::PartialClose,
            old,
            pos.snapshot(),
            "partial close",
        )
        .await;
        self.mirror(&pos).await;
        Ok(pos)
    }

    /// Archive closed positions older than `retention`.
    pub async fn archive_closed(&self, retention: Duration) -> usize {
        let cutoff = Utc::now() - retention;
        let mut archived = 0;
        let mut positions = self.positions.lock().await;
        for pos in positions.values_mut() {
            if pos.status == PositionStatus::Closed
                && pos.closed_at.map(|t| t < cutoff).unwrap_or(false)
            {
                pos.status = PositionStatus::Archived;
                archived += 1;
            }
        }
        archived
    }

    // --- Query surface ----------------------------------------------------

    pub async fn get(&self, position_id: Uuid) -> Option<Position> {
        self.positions.lock().await.get(&position_id).cloned()
    }

    pub async fn open_positions(&self) -> Vec<Position> {
        self.positions
            .lock()
            .await
            .values()
            .filter(|p| p.is_open())
            .cloned()
            .collect()
    }

    pub async fn all_positions(&self) -> Vec<Position> {
        self.positions.lock().await.values().cloned().collect()
    }

    pub async fn positions_for_whale(&self, wallet: &str) -> Vec<Position> {
        self.positions
            .lock()
            .await
            .values()
            .filter(|p| p.whale_address == wallet)
            .cloned()
            .collect()
    }

    /// Open positions whose stop or target is already breached; the
    /// "requiring action" monitoring view.
    pub async fn positions_requiring_action(&self) -> Vec<Position> {
        self.positions
            .lock()
            .await
            .values()
            .filter(|p| {
                p.status == PositionStatus::Open
                    && (p.stop_loss_price.map(|s| p.current_price <= s).unwrap_or(false)
                        || p
                            .take_profit_price
                            .map(|t| p.current_price >= t)
                            .unwrap_or(false))
            })
            .cloned()
            .collect()
    }

    /// Snapshot for the portfolio gate and sizer. `bankroll` is starting
    /// capital; NAV adds realized and unrealized P&L.
    pub async fn portfolio_view(&self, bankroll: Decimal) -> PortfolioView {
        let positions = self.positions.lock().await;
        let mut view = PortfolioView {
            nav: bankroll,
            ..Default::default()
        };

        for pos in positions.values() {
            view.nav += pos.realized_pnl;
            if !pos.is_open() {
                continue;
            }
            view.nav += pos.unrealized_pnl;
            view.total_exposure += pos.market_value;
            view.open_count += 1;
            view.open_tokens.push(pos.token_id.clone());
            if let Some(cat) = &pos.category {
                *view.category_exposure.entry(cat.clone()).or_default() += pos.market_value;
            }
            *view
                .per_whale_exposure
                .entry(pos.whale_address.clone())
                .or_default() += pos.market_value;
        }
        view
    }

    pub async fn performance_summary(&self) -> PerformanceSummary {
        let positions = self.positions.lock().await;
        let mut summary = PerformanceSummary {
            open_positions: 0,
            closing_positions: 0,
            closed_positions: 0,
            total_exposure: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            total_pnl: Decimal::ZERO,
            winning_closed: 0,
            losing_closed: 0,
        };
        for pos in positions.values() {
            summary.realized_pnl += pos.realized_pnl;
            summary.unrealized_pnl += pos.unrealized_pnl;
            match pos.status {
                PositionStatus::Open => {
                    summary.open_positions += 1;
                    summary.total_exposure += pos.market_value;
                }
                PositionStatus::Closing => summary.closing_positions += 1,
                PositionStatus::Closed | PositionStatus::Archived => {
                    summary.closed_positions += 1;
                    if pos.realized_pnl > Decimal::ZERO {
                        summary.winning_closed += 1;
                    } else if pos.realized_pnl < Decimal::ZERO {
                        summary.losing_closed += 1;
                    }
                }
            }
        }
        summary.total_pnl = summary.realized_pnl + summary.unrealized_pnl;
        summary
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> PositionLedger {
        PositionLedger::new(AuditTrail::new(None), None, ExitPolicy::default())
    }

    async fn open_test_position(ledger: &PositionLedger, entry_cents: i64) -> Position {
        let pos = ledger
            .open_position(
                "0xwhale",
                "market-1",
                "token-1",
                Outcome::Yes,
                Decimal::from(1000),
                Decimal::new(entry_cents, 2),
                Decimal::new(5, 2),
                Decimal::new(5, 2),
                Decimal::new(65, 2),
            )
            .await;
        ledger
            .configure_position(
                pos.position_id,
                Some(Decimal::new(40, 2)),
                Some(Decimal::new(70, 2)),
                Some("politics".into()),
                None,
            )
            .await
            .unwrap();
        pos
    }

    #[tokio::test]
    async fn stop_loss_fires_when_price_crosses_stop() {
        let ledger = ledger();
        open_test_position(&ledger, 55).await;

        let fired = ledger.apply_price("token-1", Decimal::new(39, 2)).await;
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].reason, CloseReason::StopLoss);
    }

    #[tokio::test]
    async fn take_profit_fires_when_price_crosses_target() {
        let ledger = ledger();
        open_test_position(&ledger, 55).await;

        let fired = ledger.apply_price("token-1", Decimal::new(71, 2)).await;
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].reason, CloseReason::TakeProfit);
    }

    #[tokio::test]
    async fn no_trigger_inside_bounds() {
        let ledger = ledger();
        open_test_position(&ledger, 55).await;

        let fired = ledger.apply_price("token-1", Decimal::new(55, 2)).await;
        assert!(fired.is_empty());
    }

    #[tokio::test]
    async fn closing_position_is_not_retriggered() {
        let ledger = ledger();
        open_test_position(&ledger, 55).await;

        let first = ledger.apply_price("token-1", Decimal::new(39, 2)).await;
        assert_eq!(first.len(), 1);
        // Same breach again: the position is CLOSING now.
        let second = ledger.apply_price("token-1", Decimal::new(38, 2)).await;
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn stop_loss_wins_over_take_profit_in_default_priority() {
        let ledger = ledger();
        let pos = open_test_position(&ledger, 55).await;
        // Degenerate config where both conditions hold at once.
        ledger
            .configure_position(
                pos.position_id,
                Some(Decimal::new(60, 2)),
                Some(Decimal::new(50, 2)),
                None,
                None,
            )
            .await
            .unwrap();

        let fired = ledger.apply_price("token-1", Decimal::new(55, 2)).await;
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].reason, CloseReason::StopLoss);
    }

    #[tokio::test]
    async fn pre_resolution_exit_fires_inside_window() {
        let ledger = ledger();
        let pos = open_test_position(&ledger, 55).await;
        ledger
            .configure_position(
                pos.position_id,
                None,
                None,
                None,
                Some(Utc::now() + Duration::hours(2)),
            )
            .await
            .unwrap();

        let fired = ledger.apply_price("token-1", Decimal::new(55, 2)).await;
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].reason, CloseReason::PreResolution);
    }

    #[tokio::test]
    async fn whale_exit_mirrors_close() {
        let ledger = ledger();
        open_test_position(&ledger, 55).await;

        let fired = ledger.whale_exit("0xwhale", "token-1").await;
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].reason, CloseReason::WhaleExit);

        // Already closing: a second whale exit is a no-op.
        assert!(ledger.whale_exit("0xwhale", "token-1").await.is_empty());
    }

    #[tokio::test]
    async fn whale_mirror_respects_policy() {
        let policy = ExitPolicy {
            priority: vec![ExitTrigger::StopLoss, ExitTrigger::TakeProfit],
            ..Default::default()
        };
        let ledger = PositionLedger::new(AuditTrail::new(None), None, policy);
        open_test_position(&ledger, 55).await;

        assert!(ledger.whale_exit("0xwhale", "token-1").await.is_empty());
    }

    #[tokio::test]
    async fn close_finalizes_pnl_and_audit() {
        let ledger = ledger();
        let pos = open_test_position(&ledger, 50).await;

        let closed = ledger
            .close_position(pos.position_id, Decimal::new(60, 2), CloseReason::Manual)
            .await
            .unwrap();
        assert_eq!(closed.status, PositionStatus::Closed);
        assert_eq!(closed.realized_pnl, Decimal::from(100));
        assert_eq!(closed.unrealized_pnl, Decimal::ZERO);

        // Double close is rejected.
        let again = ledger
            .close_position(pos.position_id, Decimal::new(60, 2), CloseReason::Manual)
            .await;
        assert!(matches!(again, Err(LedgerError::NotOpen(_))));
    }

    #[tokio::test]
    async fn portfolio_view_aggregates_open_exposure() {
        let ledger = ledger();
        open_test_position(&ledger, 50).await;

        let view = ledger.portfolio_view(Decimal::from(10_000)).await;
        assert_eq!(view.open_count, 1);
        assert_eq!(view.total_exposure, Decimal::from(500));
        assert_eq!(view.nav, Decimal::from(10_000));
        assert_eq!(
            view.correlation_with("token-1", None),
            Decimal::ONE
        );
        assert_eq!(
            view.correlation_with("token-other", Some("politics")),
            Decimal::ONE
        );
        assert_eq!(
            view.correlation_with("token-other", Some("sports")),
            Decimal::ZERO
        );
    }

    #[tokio::test]
    async fn same_whale_same_token_increases_existing_position() {
        let ledger = ledger();
        open_test_position(&ledger, 50).await;
        let pos = ledger
            .open_position(
                "0xwhale",
                "market-1",
                "token-1",
                Outcome::Yes,
                Decimal::from(1000),
                Decimal::new(60, 2),
                Decimal::new(5, 2),
                Decimal::new(5, 2),
                Decimal::new(65, 2),
            )
            .await;
        assert_eq!(pos.entry_size, Decimal::from(2000));
        assert_eq!(pos.entry_price, Decimal::new(55, 2));
        assert_eq!(ledger.open_positions().await.len(), 1);
    }
}
