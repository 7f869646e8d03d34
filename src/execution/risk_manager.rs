use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::models::WhaleStats;

/// Portfolio-level risk limits.
#[derive(Debug, Clone)]
pub struct RiskLimits {
    /// Absolute daily loss in USD that trips the circuit breaker.
    pub max_daily_loss: Decimal,
    /// Daily loss as a fraction of NAV that trips the circuit breaker.
    pub max_daily_loss_pct: Decimal,
    /// Portfolio drawdown beyond which new sizes are halved.
    pub scale_down_drawdown: Decimal,
    /// Consecutive losing trades before a cooldown pause.
    pub max_consecutive_losses: u32,
    pub cooldown: Duration,
    /// Hard ceiling on a single position's notional.
    pub max_position_notional: Decimal,
    /// Hard ceiling on exposure to one market.
    pub max_market_exposure: Decimal,
    /// Hard ceiling on exposure copied from one whale.
    pub max_whale_exposure: Decimal,
    /// Total portfolio allocation ceiling (fraction of NAV).
    pub max_total_allocation_pct: Decimal,
    // Quarantine thresholds
    pub quarantine_score_floor: Decimal,
    pub quarantine_drawdown: Decimal,
    pub quarantine_score_drop: Decimal,
    pub quarantine_release_score: Decimal,
    pub quarantine_clean_days: i64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_daily_loss: Decimal::from(500),
            max_daily_loss_pct: Decimal::new(5, 2), // 5% of NAV
            scale_down_drawdown: Decimal::new(10, 2),
            max_consecutive_losses: 4,
            cooldown: Duration::hours(4),
            max_position_notional: Decimal::from(2_000),
            max_market_exposure: Decimal::from(3_000),
            max_whale_exposure: Decimal::from(4_000),
            max_total_allocation_pct: Decimal::new(80, 2),
            quarantine_score_floor: Decimal::from(50),
            quarantine_drawdown: Decimal::new(10, 2),
            quarantine_score_drop: Decimal::from(25),
            quarantine_release_score: Decimal::from(60),
            quarantine_clean_days: 7,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QuarantineEntry {
    pub since: DateTime<Utc>,
    pub reason: String,
}

/// The single authoritative risk snapshot. Mutated only through
/// `RiskManager` methods (single-writer); readers get clones.
#[derive(Debug, Clone, Serialize)]
pub struct RiskState {
    pub trading_day: NaiveDate,
    /// Today's realized + unrealized P&L.
    pub daily_pnl: Decimal,
    pub portfolio_peak: Decimal,
    pub open_exposure: Decimal,
    pub whale_exposure: HashMap<String, Decimal>,
    pub market_exposure: HashMap<String, Decimal>,
    pub breaker_tripped: bool,
    pub breaker_reason: Option<String>,
    pub consecutive_losses: u32,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub quarantined: HashMap<String, QuarantineEntry>,
}

impl RiskState {
    fn new(today: NaiveDate) -> Self {
        Self {
            trading_day: today,
            daily_pnl: Decimal::ZERO,
            portfolio_peak: Decimal::ZERO,
            open_exposure: Decimal::ZERO,
            whale_exposure: HashMap::new(),
            market_exposure: HashMap::new(),
            breaker_tripped: false,
            breaker_reason: None,
            consecutive_losses: 0,
            cooldown_until: None,
            quarantined: HashMap::new(),
        }
    }

    /// Drawdown from the portfolio peak, as a fraction.
    pub fn drawdown(&self, nav: Decimal) -> Decimal {
        if self.portfolio_peak <= Decimal::ZERO || nav >= self.portfolio_peak {
            Decimal::ZERO
        } else {
            (self.portfolio_peak - nav) / self.portfolio_peak
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RiskViolation {
    #[error("circuit breaker tripped: {reason}")]
    CircuitBreaker { reason: String },

    #[error("cooldown active until {until} after {losses} consecutive losses")]
    CooldownActive {
        until: DateTime<Utc>,
        losses: u32,
    },

    #[error("whale {0} is quarantined")]
    WhaleQuarantined(String),

    #[error("position notional {notional} exceeds per-position limit {limit}")]
    PositionTooLarge { notional: Decimal, limit: Decimal },

    #[error("market exposure {projected} would exceed limit {limit}")]
    MarketExposureExceeded { projected: Decimal, limit: Decimal },

    #[error("whale exposure {projected} would exceed limit {limit}")]
    WhaleExposureExceeded { projected: Decimal, limit: Decimal },

    #[error("total allocation {projected} would exceed {limit} ({pct}% of NAV)")]
    AllocationExceeded {
        projected: Decimal,
        limit: Decimal,
        pct: Decimal,
    },
}

/// A sized intent awaiting the risk gate.
#[derive(Debug, Clone)]
pub struct RiskRequest {
    pub whale_address: String,
    pub market_id: String,
    pub notional: Decimal,
}

/// Gate verdict: the notional to execute, possibly scaled down under
/// portfolio drawdown.
#[derive(Debug, Clone, Copy)]
pub struct RiskApproval {
    pub notional: Decimal,
    pub scaled_down: bool,
}

/// Deterministic gate over one RiskState snapshot. Free function so the
/// checks are trivially testable and provably side-effect free.
pub fn check_request(
    request: &RiskRequest,
    state: &RiskState,
    limits: &RiskLimits,
    nav: Decimal,
    now: DateTime<Utc>,
) -> Result<RiskApproval, RiskViolation> {
    if state.breaker_tripped {
        return Err(RiskViolation::CircuitBreaker {
            reason: state
                .breaker_reason
                .clone()
                .unwrap_or_else(|| "unspecified".into()),
        });
    }

    if let Some(until) = state.cooldown_until {
        if now < until {
            return Err(RiskViolation::CooldownActive {
                until,
                losses: state.consecutive_losses,
            });
        }
    }

    if state.quarantined.contains_key(&request.whale_address) {
        return Err(RiskViolation::WhaleQuarantined(
            request.whale_address.clone(),
        ));
    }

    // Drawdown scale-down applies before the hard ceilings so a halved
    // order is judged at the size that would actually execute.
    let drawdown = state.drawdown(nav);
    let (notional, scaled_down) = if drawdown > limits.scale_down_drawdown {
        (request.notional * Decimal::new(5, 1), true)
    } else {
        (request.notional, false)
    };

    if notional > limits.max_position_notional {
        return Err(RiskViolation::PositionTooLarge {
            notional,
            limit: limits.max_position_notional,
        });
    }

    let market = state
        .market_exposure
        .get(&request.market_id)
        .copied()
        .unwrap_or(Decimal::ZERO);
    if market + notional > limits.max_market_exposure {
        return Err(RiskViolation::MarketExposureExceeded {
            projected: market + notional,
            limit: limits.max_market_exposure,
        });
    }

    let whale = state
        .whale_exposure
        .get(&request.whale_address)
        .copied()
        .unwrap_or(Decimal::ZERO);
    if whale + notional > limits.max_whale_exposure {
        return Err(RiskViolation::WhaleExposureExceeded {
            projected: whale + notional,
            limit: limits.max_whale_exposure,
        });
    }

    let limit = nav * limits.max_total_allocation_pct;
    if state.open_exposure + notional > limit {
        return Err(RiskViolation::AllocationExceeded {
            projected: state.open_exposure + notional,
            limit,
            pct: limits.max_total_allocation_pct * Decimal::ONE_HUNDRED,
        });
    }

    Ok(RiskApproval {
        notional,
        scaled_down,
    })
}

/// Owns the RiskState under single-writer discipline and holds veto
/// authority over every approved intent.
#[derive(Clone)]
pub struct RiskManager {
    state: Arc<RwLock<RiskState>>,
    limits: RiskLimits,
}

impl RiskManager {
    pub fn new(limits: RiskLimits) -> Self {
        Self {
            state: Arc::new(RwLock::new(RiskState::new(Utc::now().date_naive()))),
            limits,
        }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    pub async fn snapshot(&self) -> RiskState {
        self.state.read().await.clone()
    }

    pub async fn is_quarantined(&self, whale: &str) -> bool {
        self.state.read().await.quarantined.contains_key(whale)
    }

    /// Gate a sized intent against the latest committed snapshot.
    pub async fn approve(
        &self,
        request: &RiskRequest,
        nav: Decimal,
    ) -> Result<RiskApproval, RiskViolation> {
        let now = Utc::now();
        self.roll_trading_day(now).await;
        let state = self.state.read().await;
        check_request(request, &state, &self.limits, nav, now)
    }

    /// Reset daily counters (and an auto-tripped breaker) at the trading
    /// day boundary.
    pub async fn roll_trading_day(&self, now: DateTime<Utc>) {
        let today = now.date_naive();
        let mut state = self.state.write().await;
        if state.trading_day != today {
            tracing::info!(day = %today, "Trading day rolled, resetting daily risk counters");
            state.trading_day = today;
            state.daily_pnl = Decimal::ZERO;
            state.breaker_tripped = false;
            state.breaker_reason = None;
            state.consecutive_losses = 0;
            state.cooldown_until = None;
        }
    }

    /// Account for a confirmed entry fill.
    pub async fn record_fill(&self, whale: &str, market_id: &str, notional: Decimal) {
        let mut state = self.state.write().await;
        state.open_exposure += notional;
        *state
            .whale_exposure
            .entry(whale.to_string())
            .or_default() += notional;
        *state
            .market_exposure
            .entry(market_id.to_string())
            .or_default() += notional;
    }

    /// Account for a closed position: release exposure, fold realized P&L
    /// into the daily number, and maintain the loss streak.
    pub async fn record_close(
        &self,
        whale: &str,
        market_id: &str,
        released_notional: Decimal,
        realized_pnl: Decimal,
        now: DateTime<Utc>,
    ) {
        let mut state = self.state.write().await;
        state.open_exposure = (state.open_exposure - released_notional).max(Decimal::ZERO);
        if let Some(e) = state.whale_exposure.get_mut(whale) {
            *e = (*e - released_notional).max(Decimal::ZERO);
        }
        if let Some(e) = state.market_exposure.get_mut(market_id) {
            *e = (*e - released_notional).max(Decimal::ZERO);
        }
        state.daily_pnl += realized_pnl;

        if realized_pnl < Decimal::ZERO {
            state.consecutive_losses += 1;
            if state.consecutive_losses >= self.limits.max_consecutive_losses {
                let until = now + self.limits.cooldown;
                state.cooldown_until = Some(until);
                tracing::warn!(
                    losses = state.consecutive_losses,
                    until = %until,
                    "Consecutive-loss cooldown engaged"
                );
            }
        } else if realized_pnl > Decimal::ZERO {
            state.consecutive_losses = 0;
        }
    }

    /// Mark-to-market update from the monitor: current NAV and today's
    /// realized+unrealized P&L. Trips the daily-loss breaker when the loss
    /// crosses either the absolute or the percentage threshold.
    pub async fn observe_portfolio(&self, nav: Decimal, daily_pnl: Decimal) {
        let mut state = self.state.write().await;
        if nav > state.portfolio_peak {
            state.portfolio_peak = nav;
        }
        state.daily_pnl = daily_pnl;

        if state.breaker_tripped {
            return;
        }
        let pct_limit = nav * self.limits.max_daily_loss_pct;
        let threshold = self.limits.max_daily_loss.min(pct_limit.max(Decimal::ZERO));
        if daily_pnl <= -threshold && threshold > Decimal::ZERO {
            state.breaker_tripped = true;
            state.breaker_reason = Some(format!(
                "daily loss {daily_pnl} breached threshold -{threshold}"
            ));
            tracing::error!(
                daily_pnl = %daily_pnl,
                threshold = %threshold,
                "CIRCUIT BREAKER TRIPPED, halting new trading"
            );
        }
    }

    /// Manual operator trip/reset.
    pub async fn trip_breaker(&self, reason: &str) {
        let mut state = self.state.write().await;
        state.breaker_tripped = true;
        state.breaker_reason = Some(reason.to_string());
    }

    pub async fn reset_breaker(&self) {
        let mut state = self.state.write().await;
        state.breaker_tripped = false;
        state.breaker_reason = None;
        tracing::info!("Circuit breaker manually reset");
    }

    /// Re-evaluate a whale's quarantine membership from its latest scored
    /// stats. Enter on score collapse, excessive drawdown, or a >= 25-point
    /// score drop within a week; release only after the score recovers and
    /// a clean week.
    pub async fn evaluate_quarantine(&self, stats: &WhaleStats, now: DateTime<Utc>) {
        let mut state = self.state.write().await;
        let addr = stats.address.clone();

        if state.quarantined.contains_key(&addr) {
            let clean_since = now - Duration::days(self.limits.quarantine_clean_days);
            let clean = stats
                .last_loss_at
                .map(|t| t < clean_since)
                .unwrap_or(true);
            if stats.quality_score > self.limits.quarantine_release_score && clean {
                state.quarantined.remove(&addr);
                tracing::info!(whale = %addr, score = %stats.quality_score, "Whale released from quarantine");
            }
            return;
        }

        let week_drop = stats.score_drop_within(Duration::days(7), now);
        let reason = if stats.quality_score < self.limits.quarantine_score_floor {
            Some(format!("score {} below floor", stats.quality_score))
        } else if stats.drawdown > self.limits.quarantine_drawdown {
            Some(format!("drawdown {} too deep", stats.drawdown))
        } else if week_drop >= self.limits.quarantine_score_drop {
            Some(format!("score fell {week_drop} points within a week"))
        } else {
            None
        };

        if let Some(reason) = reason {
            tracing::warn!(whale = %addr, reason = %reason, "Whale quarantined");
            state.quarantined.insert(
                addr,
                QuarantineEntry {
                    since: now,
                    reason,
                },
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
