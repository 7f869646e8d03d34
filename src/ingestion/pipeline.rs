use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::exchange::OrderBook;
use crate::ledger::PortfolioView;
use crate::models::{MarketInfo, Side, TradeIntent, WhaleStats, WhaleTradeEvent};

/// Thresholds for the three filter gates.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    /// Stage 1: minimum whale quality score (0..100).
    pub min_quality_score: Decimal,
    /// Stage 1: maximum current whale drawdown (fraction).
    pub max_whale_drawdown: Decimal,
    /// Stage 2: minimum trade notional in USD.
    pub min_notional: Decimal,
    /// Stage 2: maximum estimated slippage (fraction of mid).
    pub max_slippage: Decimal,
    /// Stage 2: maximum days until market resolution.
    pub max_days_to_resolution: i64,
    /// Stage 2: minimum estimated edge (fraction).
    pub min_edge: Decimal,
    /// Stage 3: maximum correlation with the open book.
    pub max_correlation: Decimal,
    /// Stage 3: projected total exposure ceiling (fraction of NAV).
    pub max_total_exposure_pct: Decimal,
    /// Stage 3: projected per-category exposure ceiling (fraction of NAV).
    pub max_category_exposure_pct: Decimal,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_quality_score: Decimal::from(75),
            max_whale_drawdown: Decimal::new(25, 2),
            min_notional: Decimal::from(5_000),
            max_slippage: Decimal::new(1, 2),
            max_days_to_resolution: 90,
            min_edge: Decimal::new(3, 2),
            max_correlation: Decimal::new(4, 1),
            max_total_exposure_pct: Decimal::new(95, 2),
            max_category_exposure_pct: Decimal::new(30, 2),
        }
    }
}

/// Typed rejection from one of the gates. Rejections are first-class
/// outcomes: logged and counted, never retried.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FilterRejection {
    // Stage 1: whale gate (missing data fails closed)
    #[error("whale not scored yet: {0}")]
    WhaleUnknown(String),

    #[error("whale quarantined: {0}")]
    WhaleQuarantined(String),

    #[error("whale score too low: {score} < {min}")]
    ScoreTooLow { score: Decimal, min: Decimal },

    #[error("whale momentum negative: 30d Sharpe {sharpe_30d} <= 90d Sharpe {sharpe_90d}")]
    NegativeMomentum {
        sharpe_30d: Decimal,
        sharpe_90d: Decimal,
    },

    #[error("Whale in trouble: drawdown {drawdown} >= {max}")]
    WhaleInTrouble { drawdown: Decimal, max: Decimal },

    // Stage 2: trade gate
    #[error("notional too small: {notional} < {min}")]
    NotionalTooSmall { notional: Decimal, min: Decimal },

    #[error("order book too thin to estimate slippage for size {size}")]
    BookTooThin { size: Decimal },

    #[error("estimated slippage too high: {estimated} > {max}")]
    SlippageTooHigh { estimated: Decimal, max: Decimal },

    #[error("market resolution time unknown")]
    ResolutionUnknown,

    #[error("resolution too far out: {days} days > {max}")]
    ResolutionTooFar { days: i64, max: i64 },

    #[error("edge too small: {edge} < {min}")]
    EdgeTooSmall { edge: Decimal, min: Decimal },

    // Stage 3: portfolio gate
    #[error("correlation with open book too high: {correlation} >= {max}")]
    CorrelationTooHigh {
        correlation: Decimal,
        max: Decimal,
    },

    #[error("projected exposure {projected} exceeds {limit} ({pct}% of NAV)")]
    ExposureTooHigh {
        projected: Decimal,
        limit: Decimal,
        pct: Decimal,
    },

    #[error("projected {category} exposure {projected} exceeds {limit}")]
    CategoryExposureTooHigh {
        category: String,
        projected: Decimal,
        limit: Decimal,
    },
}

impl FilterRejection {
    /// Which gate produced the rejection, for metrics labels.
    pub fn stage(&self) -> &'static str {
        use FilterRejection::*;
        match self {
            WhaleUnknown(_) | WhaleQuarantined(_) | ScoreTooLow { .. }
            | NegativeMomentum { .. } | WhaleInTrouble { .. } => "whale",
            NotionalTooSmall { .. } | BookTooThin { .. } | SlippageTooHigh { .. }
            | ResolutionUnknown | ResolutionTooFar { .. } | EdgeTooSmall { .. } => "trade",
            CorrelationTooHigh { .. } | ExposureTooHigh { .. }
            | CategoryExposureTooHigh { .. } => "portfolio",
        }
    }
}

/// Everything the gates evaluate, captured as one immutable snapshot so a
/// decision is deterministic and side-effect free.
pub struct FilterContext<'a> {
    pub event: &'a WhaleTradeEvent,
    pub whale: Option<&'a WhaleStats>,
    pub quarantined: bool,
    pub book: &'a OrderBook,
    pub market: Option<&'a MarketInfo>,
    pub portfolio: &'a PortfolioView,
    /// Worst-case notional of the copy trade, used for exposure projection.
    pub proposed_notional: Decimal,
    pub config: &'a FilterConfig,
    pub now: DateTime<Utc>,
}

/// Run all three gates in order. Short-circuits on the first failing check;
/// an approved event comes back enriched as a TradeIntent.
pub fn evaluate(ctx: &FilterContext<'_>) -> Result<TradeIntent, FilterRejection> {
    let whale = stage_whale(ctx)?;
    let (edge, win_probability, slippage) = stage_trade(ctx, whale)?;
    let correlation = stage_portfolio(ctx)?;

    Ok(TradeIntent {
        wallet: ctx.event.wallet.clone(),
        market_id: ctx.event.market_id.clone(),
        token_id: ctx.event.asset_id.clone(),
        side: ctx.event.side,
        price: ctx.event.price,
        whale_notional: ctx.event.notional,
        whale: whale.clone(),
        win_probability,
        edge,
        estimated_slippage: slippage,
        portfolio_correlation: correlation,
        category: ctx.market.and_then(|m| m.category.clone()),
        resolution_at: ctx.market.and_then(|m| m.resolution_at),
    })
}

/// Stage 1: is this whale still worth copying right now?
fn stage_whale<'a>(ctx: &FilterContext<'a>) -> Result<&'a WhaleStats, FilterRejection> {
    let whale = ctx
        .whale
        .ok_or_else(|| FilterRejection::WhaleUnknown(ctx.event.wallet.clone()))?;

    if ctx.quarantined {
        return Err(FilterRejection::WhaleQuarantined(whale.address.clone()));
    }

    if whale.quality_score < ctx.config.min_quality_score {
        return Err(FilterRejection::ScoreTooLow {
            score: whale.quality_score,
            min: ctx.config.min_quality_score,
        });
    }

    if !whale.has_positive_momentum() {
        return Err(FilterRejection::NegativeMomentum {
            sharpe_30d: whale.sharpe_30d,
            sharpe_90d: whale.sharpe_90d,
        });
    }

    if whale.drawdown >= ctx.config.max_whale_drawdown {
        return Err(FilterRejection::WhaleInTrouble {
            drawdown: whale.drawdown,
            max: ctx.config.max_whale_drawdown,
        });
    }

    Ok(whale)
}

/// Stage 2: is this particular trade worth copying?
fn stage_trade(
    ctx: &FilterContext<'_>,
    whale: &WhaleStats,
) -> Result<(Decimal, Decimal, Decimal), FilterRejection> {
    let event = ctx.event;

    if event.notional < ctx.config.min_notional {
        return Err(FilterRejection::NotionalTooSmall {
            notional: event.notional,
            min: ctx.config.min_notional,
        });
    }

    let slippage = ctx
        .book
        .estimated_slippage(event.side, event.size)
        .ok_or(FilterRejection::BookTooThin { size: event.size })?;
    if slippage > ctx.config.max_slippage {
        return Err(FilterRejection::SlippageTooHigh {
            estimated: slippage,
            max: ctx.config.max_slippage,
        });
    }

    let resolution_at = ctx
        .market
        .and_then(|m| m.resolution_at)
        .ok_or(FilterRejection::ResolutionUnknown)?;
    let days = (resolution_at - ctx.now).num_days();
    if days > ctx.config.max_days_to_resolution {
        return Err(FilterRejection::ResolutionTooFar {
            days,
            max: ctx.config.max_days_to_resolution,
        });
    }

    // Blend: 70% whale-implied win rate, 30% market-implied probability.
    let win_probability =
        Decimal::new(7, 1) * whale.win_rate + Decimal::new(3, 1) * event.price;
    let edge = match event.side {
        Side::Buy => win_probability - event.price,
        Side::Sell => event.price - win_probability,
    };
    if edge < ctx.config.min_edge {
        return Err(FilterRejection::EdgeTooSmall {
            edge,
            min: ctx.config.min_edge,
        });
    }

    Ok((edge, win_probability, slippage))
}

/// Stage 3: does this trade fit the current book?
fn stage_portfolio(ctx: &FilterContext<'_>) -> Result<Decimal, FilterRejection> {
    let portfolio = ctx.portfolio;
    let category = ctx.market.and_then(|m| m.category.as_deref());

    let correlation = portfolio.correlation_with(&ctx.event.asset_id, category);
    if correlation >= ctx.config.max_correlation {
        return Err(FilterRejection::CorrelationTooHigh {
            correlation,
            max: ctx.config.max_correlation,
        });
    }

    let projected = portfolio.total_exposure + ctx.proposed_notional;
    let limit = portfolio.nav * ctx.config.max_total_exposure_pct;
    if projected >= limit {
        return Err(FilterRejection::ExposureTooHigh {
            projected,
            limit,
            pct: ctx.config.max_total_exposure_pct * Decimal::ONE_HUNDRED,
        });
    }

    if let Some(cat) = category {
        let projected = portfolio.exposure_in_category(cat) + ctx.proposed_notional;
        let limit = portfolio.nav * ctx.config.max_category_exposure_pct;
        if projected >= limit {
            return Err(FilterRejection::CategoryExposureTooHigh {
                category: cat.to_string(),
                projected,
                limit,
            });
        }
    }

    Ok(correlation)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::BookLevel;
    use chrono::Duration;

    fn whale(score: i64, drawdown_pct: i64) -> WhaleStats {
        WhaleStats {
            address: "0xA".into(),
            quality_score: Decimal::from(score),
            sharpe_30d: Decimal::new(15, 1),
            sharpe_90d: Decimal::new(10, 1),
            drawdown: Decimal::new(drawdown_pct, 2),
            win_rate: Decimal::new(65, 2),
            last_scored_at: Utc::now(),
            score_history: Vec::new(),
            last_loss_at: None,
        }
    }

    fn event() -> WhaleTradeEvent {
        WhaleTradeEvent {
            wallet: "0xA".into(),
            market_id: "M1".into(),
            asset_id: "T1".into(),
            side: Side::Buy,
            size: Decimal::from(10_000),
            price: Decimal::new(55, 2),
            notional: Decimal::from(5_500),
            timestamp: Utc::now(),
        }
    }

    fn deep_book() -> OrderBook {
        OrderBook {
            bids: vec![BookLevel {
                price: Decimal::new(548, 3),
                size: Decimal::from(100_000),
            }],
            asks: vec![BookLevel {
                price: Decimal::new(552, 3),
                size: Decimal::from(100_000),
            }],
        }
    }

    fn market() -> MarketInfo {
        MarketInfo {
            market_id: "M1".into(),
            category: Some("politics".into()),
            resolution_at: Some(Utc::now() + Duration::days(30)),
        }
    }

    fn portfolio() -> PortfolioView {
        PortfolioView {
            nav: Decimal::from(10_000),
            ..Default::default()
        }
    }

    fn ctx<'a>(
        event: &'a WhaleTradeEvent,
        whale: Option<&'a WhaleStats>,
        book: &'a OrderBook,
        market: Option<&'a MarketInfo>,
        portfolio: &'a PortfolioView,
        config: &'a FilterConfig,
    ) -> FilterContext<'a> {
        FilterContext {
            event,
            whale,
            quarantined: false,
            book,
            market,
            portfolio,
            proposed_notional: Decimal::from(800),
            config,
            now: Utc::now(),
        }
    }

    #[test]
    fn quality_signal_passes_all_gates() {
        let (e, w, b, m, p, c) = (
            event(),
            whale(90, 5),
            deep_book(),
            market(),
            portfolio(),
            FilterConfig::default(),
        );
        let intent = evaluate(&ctx(&e, Some(&w), &b, Some(&m), &p, &c)).unwrap();
        // p = 0.7*0.65 + 0.3*0.55 = 0.62; edge = 0.62 - 0.55 = 0.07
        assert_eq!(intent.win_probability, Decimal::new(62, 2));
        assert_eq!(intent.edge, Decimal::new(7, 2));
        assert_eq!(intent.category.as_deref(), Some("politics"));
    }

    #[test]
    fn missing_whale_data_fails_closed() {
        let (e, b, m, p, c) = (
            event(),
            deep_book(),
            market(),
            portfolio(),
            FilterConfig::default(),
        );
        let result = evaluate(&ctx(&e, None, &b, Some(&m), &p, &c));
        assert!(matches!(result, Err(FilterRejection::WhaleUnknown(_))));
    }

    #[test]
    fn whale_in_trouble_rejected_at_stage_one() {
        let (e, w, b, m, p, c) = (
            event(),
            whale(90, 30),
            deep_book(),
            market(),
            portfolio(),
            FilterConfig::default(),
        );
        let result = evaluate(&ctx(&e, Some(&w), &b, Some(&m), &p, &c));
        let err = result.unwrap_err();
        assert!(matches!(err, FilterRejection::WhaleInTrouble { .. }));
        assert!(err.to_string().starts_with("Whale in trouble"));
        assert_eq!(err.stage(), "whale");
    }

    #[test]
    fn low_score_rejected() {
        let (e, w, b, m, p, c) = (
            event(),
            whale(60, 5),
            deep_book(),
            market(),
            portfolio(),
            FilterConfig::default(),
        );
        assert!(matches!(
            evaluate(&ctx(&e, Some(&w), &b, Some(&m), &p, &c)),
            Err(FilterRejection::ScoreTooLow { .. })
        ));
    }

    #[test]
    fn negative_momentum_rejected() {
        let (e, mut w, b, m, p, c) = (
            event(),
            whale(90, 5),
            deep_book(),
            market(),
            portfolio(),
            FilterConfig::default(),
        );
        w.sharpe_30d = Decimal::new(5, 1);
        assert!(matches!(
            evaluate(&ctx(&e, Some(&w), &b, Some(&m), &p, &c)),
            Err(FilterRejection::NegativeMomentum { .. })
        ));
    }

    #[test]
    fn quarantined_whale_rejected() {
        let (e, w, b, m, p, c) = (
            event(),
            whale(90, 5),
            deep_book(),
            market(),
            portfolio(),
            FilterConfig::default(),
        );
        let mut context = ctx(&e, Some(&w), &b, Some(&m), &p, &c);
        context.quarantined = true;
        assert!(matches!(
            evaluate(&context),
            Err(FilterRejection::WhaleQuarantined(_))
        ));
    }

    #[test]
    fn small_notional_rejected() {
        let (mut e, w, b, m, p, c) = (
            event(),
            whale(90, 5),
            deep_book(),
            market(),
            portfolio(),
            FilterConfig::default(),
        );
        e.notional = Decimal::from(1_000);
        assert!(matches!(
            evaluate(&ctx(&e, Some(&w), &b, Some(&m), &p, &c)),
            Err(FilterRejection::NotionalTooSmall { .. })
        ));
    }

    #[test]
    fn thin_book_rejected() {
        let (e, w, m, p, c) = (
            event(),
            whale(90, 5),
            market(),
            portfolio(),
            FilterConfig::default(),
        );
        let thin = OrderBook {
            bids: vec![BookLevel {
                price: Decimal::new(54, 2),
                size: Decimal::from(10),
            }],
            asks: vec![BookLevel {
                price: Decimal::new(56, 2),
                size: Decimal::from(10),
            }],
        };
        assert!(matches!(
            evaluate(&ctx(&e, Some(&w), &thin, Some(&m), &p, &c)),
            Err(FilterRejection::BookTooThin { .. })
        ));
    }

    #[test]
    fn distant_resolution_rejected() {
        let (e, w, b, mut m, p, c) = (
            event(),
            whale(90, 5),
            deep_book(),
            market(),
            portfolio(),
            FilterConfig::default(),
        );
        m.resolution_at = Some(Utc::now() + Duration::days(180));
        assert!(matches!(
            evaluate(&ctx(&e, Some(&w), &b, Some(&m), &p, &c)),
            Err(FilterRejection::ResolutionTooFar { .. })
        ));
    }

    #[test]
    fn unknown_resolution_fails_closed() {
        let (e, w, b, mut m, p, c) = (
            event(),
            whale(90, 5),
            deep_book(),
            market(),
            portfolio(),
            FilterConfig::default(),
        );
        m.resolution_at = None;
        assert!(matches!(
            evaluate(&ctx(&e, Some(&w), &b, Some(&m), &p, &c)),
            Err(FilterRejection::ResolutionUnknown)
        ));
    }

    #[test]
    fn weak_edge_rejected() {
        let (mut e, mut w, b, m, p, c) = (
            event(),
            whale(90, 5),
            deep_book(),
            market(),
            portfolio(),
            FilterConfig::default(),
        );
        // p = 0.7*0.50 + 0.3*0.55 = 0.515; edge = -0.035
        w.win_rate = Decimal::new(50, 2);
        e.notional = Decimal::from(6_000);
        assert!(matches!(
            evaluate(&ctx(&e, Some(&w), &b, Some(&m), &p, &c)),
            Err(FilterRejection::EdgeTooSmall { .. })
        ));
    }

    #[test]
    fn crowded_book_rejected_by_correlation() {
        let (e, w, b, m, mut p, c) = (
            event(),
            whale(90, 5),
            deep_book(),
            market(),
            portfolio(),
            FilterConfig::default(),
        );
        p.total_exposure = Decimal::from(1_000);
        p.category_exposure
            .insert("politics".into(), Decimal::from(500));
        // correlation = 500/1000 = 0.5 >= 0.4
        assert!(matches!(
            evaluate(&ctx(&e, Some(&w), &b, Some(&m), &p, &c)),
            Err(FilterRejection::CorrelationTooHigh { .. })
        ));
    }

    #[test]
    fn exposure_ceiling_rejected() {
        let (e, w, b, m, mut p, c) = (
            event(),
            whale(90, 5),
            deep_book(),
            market(),
            portfolio(),
            FilterConfig::default(),
        );
        p.total_exposure = Decimal::from(9_400);
        // projected 9400+800 = 10200 >= 9500
        assert!(matches!(
            evaluate(&ctx(&e, Some(&w), &b, Some(&m), &p, &c)),
            Err(FilterRejection::ExposureTooHigh { .. })
        ));
    }

    #[test]
    fn category_concentration_rejected() {
        let (e, w, b, m, mut p, c) = (
            event(),
            whale(90, 5),
            deep_book(),
            market(),
            portfolio(),
            FilterConfig::default(),
        );
        p.total_exposure = Decimal::from(8_000);
        p.category_exposure
            .insert("politics".into(), Decimal::from(2_500));
        // correlation 2500/8000 = 0.3125 passes; category 2500+800 >= 3000 fails
        assert!(matches!(
            evaluate(&ctx(&e, Some(&w), &b, Some(&m), &p, &c)),
            Err(FilterRejection::CategoryExposureTooHigh { .. })
        ));
    }
}
