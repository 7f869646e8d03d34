use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// One point of a whale's scored history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScorePoint {
    pub at: DateTime<Utc>,
    pub score: Decimal,
}

/// Scored whale snapshot, produced by the external discovery/scoring
/// collaborator and consumed by the filter pipeline and risk gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhaleStats {
    pub address: String,
    /// Composite quality score, 0..100.
    pub quality_score: Decimal,
    pub sharpe_30d: Decimal,
    pub sharpe_90d: Decimal,
    /// Current drawdown as a fraction (0.25 = 25%).
    pub drawdown: Decimal,
    /// Historical win rate as a fraction.
    pub win_rate: Decimal,
    pub last_scored_at: DateTime<Utc>,
    /// Recent score history, newest last; feeds the quarantine
    /// falling-score rule.
    pub score_history: Vec<ScorePoint>,
    /// When this whale last closed a losing copied trade.
    pub last_loss_at: Option<DateTime<Utc>>,
}

impl WhaleStats {
    /// Largest score drop from any point inside `window` to the current
    /// score. Zero when history is empty or scores only rose.
    pub fn score_drop_within(&self, window: Duration, now: DateTime<Utc>) -> Decimal {
        let cutoff = now - window;
        self.score_history
            .iter()
            .filter(|p| p.at >= cutoff)
            .map(|p| p.score - self.quality_score)
            .max()
            .unwrap_or(Decimal::ZERO)
            .max(Decimal::ZERO)
    }

    /// 30-day Sharpe above 90-day Sharpe means recent performance is
    /// improving.
    pub fn has_positive_momentum(&self) -> bool {
        self.sharpe_30d > self.sharpe_90d
    }
}

/// In-memory registry of scored whales, fed by the external scoring
/// collaborator. Read by the pipeline, written only by the ingest path.
#[derive(Clone, Default)]
pub struct WhaleDirectory {
    inner: Arc<RwLock<HashMap<String, WhaleStats>>>,
}

impl WhaleDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, stats: WhaleStats) {
        let mut map = self.inner.write().await;
        match map.get_mut(&stats.address) {
            Some(existing) => {
                // Carry the score history forward and append the new point.
                let mut history = std::mem::take(&mut existing.score_history);
                history.push(ScorePoint {
                    at: stats.last_scored_at,
                    score: stats.quality_score,
                });
                let mut merged = stats;
                merged.score_history = history;
                *existing = merged;
            }
            None => {
                let mut stats = stats;
                stats.score_history.push(ScorePoint {
                    at: stats.last_scored_at,
                    score: stats.quality_score,
                });
                map.insert(stats.address.clone(), stats);
            }
        }
    }

    pub async fn get(&self, address: &str) -> Option<WhaleStats> {
        self.inner.read().await.get(address).cloned()
    }

    pub async fn record_loss(&self, address: &str, at: DateTime<Utc>) {
        if let Some(stats) = self.inner.write().await.get_mut(address) {
            stats.last_loss_at = Some(at);
        }
    }

    pub async fn all(&self) -> Vec<WhaleStats> {
        self.inner.read().await.values().cloned().collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
