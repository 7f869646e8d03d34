use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Market metadata the pipeline and ledger need: concentration category and
/// scheduled resolution time. Supplied by the market-discovery collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketInfo {
    pub market_id: String,
    pub category: Option<String>,
    pub resolution_at: Option<DateTime<Utc>>,
}

/// In-memory market metadata registry.
#[derive(Clone, Default)]
pub struct MarketCatalog {
    inner: Arc<RwLock<HashMap<String, MarketInfo>>>,
}

impl MarketCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, info: MarketInfo) {
        self.inner
            .write()
            .await
            .insert(info.market_id.clone(), info);
    }

    pub async fn get(&self, market_id: &str) -> Option<MarketInfo> {
        self.inner.read().await.get(market_id).cloned()
    }
}
