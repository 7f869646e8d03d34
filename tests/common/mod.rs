use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use chrono::Utc;
use metrics_exporter_prometheus::PrometheusHandle;
use rust_decimal::Decimal;
use uuid::Uuid;

use polycopy::audit::AuditTrail;
use polycopy::config::AppConfig;
use polycopy::exchange::{
    BookLevel, ExchangeClient, ExchangeError, FillState, FillStatus, OrderBook, SubmitAck,
    SubmitRequest,
};
use polycopy::execution::copy_engine::{CopyEngine, CopyEngineConfig};
use polycopy::execution::order_executor::{ExecutorConfig, OrderExecutor};
use polycopy::execution::risk_manager::RiskManager;
use polycopy::ledger::{ExitPolicy, PositionLedger};
use polycopy::models::{MarketCatalog, MarketInfo, WhaleDirectory, WhaleStats};

/// Exchange stub that fills every order completely at its limit price and
/// serves a deep static book.
pub struct FillingExchange {
    orders: Mutex<HashMap<String, (Decimal, Decimal)>>,
}

#[allow(dead_code)]
impl FillingExchange {
    pub fn new() -> Self {
        Self {
            orders: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl ExchangeClient for FillingExchange {
    async fn submit_order(&self, req: &SubmitRequest) -> Result<SubmitAck, ExchangeError> {
        let id = Uuid::new_v4().to_string();
        self.orders.lock().unwrap().insert(
            id.clone(),
            (req.size, req.price.unwrap_or(Decimal::new(50, 2))),
        );
        Ok(SubmitAck {
            exchange_order_id: id,
        })
    }

    async fn cancel_order(&self, _exchange_order_id: &str) -> Result<(), ExchangeError> {
        Ok(())
    }

    async fn fetch_order_book(&self, _token_id: &str) -> Result<OrderBook, ExchangeError> {
        Ok(OrderBook {
            bids: vec![BookLevel {
                price: Decimal::new(548, 3),
                size: Decimal::from(100_000),
            }],
            asks: vec![BookLevel {
                price: Decimal::new(552, 3),
                size: Decimal::from(100_000),
            }],
        })
    }

    async fn poll_fill(&self, exchange_order_id: &str) -> Result<FillStatus, ExchangeError> {
        let (size, price) = self
            .orders
            .lock()
            .unwrap()
            .get(exchange_order_id)
            .copied()
            .ok_or_else(|| ExchangeError::Unexpected("unknown order".into()))?;
        Ok(FillStatus {
            exchange_order_id: exchange_order_id.to_string(),
            state: FillState::Filled,
            filled_size: size,
            avg_price: price,
            fill_sequence: 1,
        })
    }
}

/// A fully wired engine over the filling exchange, with one scored whale
/// (`0xwhale`) and one catalogued market (`market-1`). The returned audit
/// trail is the one every component records into.
#[allow(dead_code)]
pub async fn build_engine() -> (Arc<CopyEngine>, AuditTrail) {
    let exchange: Arc<dyn ExchangeClient> = Arc::new(FillingExchange::new());
    let audit = AuditTrail::new(None);
    let executor = OrderExecutor::new(
        exchange.clone(),
        audit.clone(),
        None,
        ExecutorConfig::default(),
    );
    let risk = RiskManager::new(Default::default());
    let ledger = PositionLedger::new(audit.clone(), None, ExitPolicy::default());
    let whales = WhaleDirectory::new();
    let markets = MarketCatalog::new();

    whales
        .upsert(WhaleStats {
            address: "0xwhale".into(),
            quality_score: Decimal::from(90),
            sharpe_30d: Decimal::new(15, 1),
            sharpe_90d: Decimal::new(10, 1),
            drawdown: Decimal::new(5, 2),
            win_rate: Decimal::new(65, 2),
            last_scored_at: Utc::now(),
            score_history: Vec::new(),
            last_loss_at: None,
        })
        .await;
    markets
        .upsert(MarketInfo {
            market_id: "market-1".into(),
            category: Some("politics".into()),
            resolution_at: Some(Utc::now() + chrono::Duration::days(30)),
        })
        .await;

    let engine = Arc::new(CopyEngine::new(
        CopyEngineConfig::default(),
        exchange,
        executor,
        risk,
        ledger,
        whales,
        markets,
    ));
    (engine, audit)
}

#[allow(dead_code)]
pub fn test_config() -> AppConfig {
    AppConfig {
        database_url: None,
        host: "127.0.0.1".into(),
        port: 0,
        api_token: None,
        clob_api_key: None,
        clob_api_secret: None,
        clob_passphrase: None,
        ws_url: "wss://localhost".into(),
        ws_subscribe_token_ids: vec![],
        bankroll: Decimal::from(10_000),
        monitor_interval_secs: 15,
        fill_poll_interval_secs: 30,
    }
}

/// The Prometheus recorder is process-global; install it once per test
/// binary.
#[allow(dead_code)]
pub fn metrics_handle() -> PrometheusHandle {
    static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
    HANDLE.get_or_init(polycopy::metrics::init_metrics).clone()
}
