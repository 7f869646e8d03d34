use std::collections::HashMap;

use rust_decimal::Decimal;

/// EWMA decay for squared returns (RiskMetrics lambda).
const EWMA_LAMBDA: Decimal = Decimal::from_parts(94, 0, 0, false, 2);

/// Sizing knobs. `fraction_cap` is the hard ceiling on the final fraction
/// of NAV committed to a single trade.
#[derive(Debug, Clone)]
pub struct SizerConfig {
    /// Safety multiplier on raw Kelly (half-Kelly by default).
    pub kelly_multiplier: Decimal,
    pub fraction_cap: Decimal,
}

impl Default for SizerConfig {
    fn default() -> Self {
        Self {
            kelly_multiplier: Decimal::new(5, 1), // 0.5
            fraction_cap: Decimal::new(8, 2),     // 0.08
        }
    }
}

/// Inputs to one sizing decision, all taken from the same snapshot.
#[derive(Debug, Clone)]
pub struct SizingInputs {
    /// Blended win probability (0.7 whale + 0.3 market).
    pub win_probability: Decimal,
    /// Entry price (a probability in (0, 1)).
    pub price: Decimal,
    /// Whale quality score, 0..100.
    pub quality_score: Decimal,
    /// EWMA of squared returns for this token.
    pub market_vol: Decimal,
    /// Correlation of this market with the open book.
    pub portfolio_correlation: Decimal,
    /// Current portfolio drawdown from peak (fraction).
    pub portfolio_drawdown: Decimal,
}

/// Result of sizing: fraction of NAV, USD notional, and share count.
#[derive(Debug, Clone, Copy)]
pub struct SizeDecision {
    pub fraction: Decimal,
    pub kelly_fraction: Decimal,
    pub notional: Decimal,
    pub shares: Decimal,
}

impl SizeDecision {
    pub fn zero() -> Self {
        Self {
            fraction: Decimal::ZERO,
            kelly_fraction: Decimal::ZERO,
            notional: Decimal::ZERO,
            shares: Decimal::ZERO,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.fraction <= Decimal::ZERO
    }
}

fn clamp(value: Decimal, lo: Decimal, hi: Decimal) -> Decimal {
    value.max(lo).min(hi)
}

/// Raw Kelly fraction: f = (p*b - q) / b with q = 1 - p, floored at zero.
pub fn kelly_fraction(win_probability: Decimal, payout_multiple: Decimal) -> Decimal {
    if payout_multiple <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let q = Decimal::ONE - win_probability;
    let f = (win_probability * payout_multiple - q) / payout_multiple;
    f.max(Decimal::ZERO)
}

/// Adjusted-Kelly sizing: raw Kelly discounted by whale confidence, market
/// volatility, portfolio correlation and portfolio drawdown, halved, and
/// hard-capped. Returns a zero decision whenever raw Kelly is non-positive.
pub fn size_position(
    config: &SizerConfig,
    inputs: &SizingInputs,
    nav: Decimal,
) -> SizeDecision {
    // A binary share is only priceable strictly inside (0, 1); anything
    // else has no payout multiple and sizes to zero.
    if inputs.price <= Decimal::ZERO || inputs.price >= Decimal::ONE {
        return SizeDecision::zero();
    }

    // Payout multiple for a binary share bought at `price`: win pays 1.
    let b = (Decimal::ONE - inputs.price) / inputs.price;
    let f_kelly = kelly_fraction(inputs.win_probability, b);

    if f_kelly <= Decimal::ZERO {
        return SizeDecision::zero();
    }

    let k_conf = Decimal::new(4, 1)
        + Decimal::new(6, 1) * (inputs.quality_score / Decimal::ONE_HUNDRED);
    let k_vol = clamp(
        Decimal::ONE / (Decimal::ONE + Decimal::from(5) * inputs.market_vol),
        Decimal::new(5, 1),
        Decimal::new(12, 1),
    );
    let k_corr = clamp(
        Decimal::ONE - inputs.portfolio_correlation * inputs.portfolio_correlation,
        Decimal::new(3, 1),
        Decimal::ONE,
    );
    let k_dd = clamp(
        Decimal::ONE - inputs.portfolio_drawdown * Decimal::from(3),
        Decimal::new(2, 1),
        Decimal::ONE,
    );

    let fraction = clamp(
        config.kelly_multiplier * f_kelly * k_conf * k_vol * k_corr * k_dd,
        Decimal::ZERO,
        config.fraction_cap,
    );

    let notional = nav * fraction;
    let shares = notional / inputs.price;

    SizeDecision {
        fraction,
        kelly_fraction: f_kelly,
        notional,
        shares,
    }
}

/// Per-token EWMA of squared returns, fed by the price feed.
#[derive(Debug, Default)]
pub struct EwmaVolatility {
    state: HashMap<String, (Decimal, Decimal)>, // (last_price, ewma_var)
}

impl EwmaVolatility {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, token_id: &str, price: Decimal) {
        match self.state.get_mut(token_id) {
            Some((last, var)) => {
                if !last.is_zero() {
                    let ret = (price - *last) / *last;
                    *var = EWMA_LAMBDA * *var
                        + (Decimal::ONE - EWMA_LAMBDA) * ret * ret;
                }
                *last = price;
            }
            None => {
                self.state
                    .insert(token_id.to_string(), (price, Decimal::ZERO));
            }
        }
    }

    pub fn variance(&self, token_id: &str) -> Decimal {
        self.state
            .get(token_id)
            .map(|(_, var)| *var)
            .unwrap_or(Decimal::ZERO)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
