use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use polycopy::api::router::create_router;
use polycopy::audit::AuditTrail;
use polycopy::config::AppConfig;
use polycopy::db;
use polycopy::exchange::auth::ClobAuth;
use polycopy::exchange::{ClobClient, ExchangeClient};
use polycopy::execution::copy_engine::{CopyEngine, CopyEngineConfig};
use polycopy::execution::order_executor::{ExecutorConfig, OrderExecutor};
use polycopy::execution::risk_manager::{RiskLimits, RiskManager};
use polycopy::ingestion::ws_listener::run_ws_listener;
use polycopy::ledger::{ExitPolicy, PositionLedger};
use polycopy::metrics::init_metrics;
use polycopy::models::{MarketCatalog, WhaleDirectory, WhaleTradeEvent};
use polycopy::services::order_fill_poller::run_order_fill_poller;
use polycopy::services::position_monitor::run_position_monitor;
use polycopy::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    let addr = format!("{}:{}", config.host, config.port);
    let metrics_handle = init_metrics();

    // Database is optional: without one the ledger and audit trail are
    // in-memory only and state does not survive a restart.
    let pool = match &config.database_url {
        Some(url) => {
            tracing::info!("Connecting to database...");
            let pool = db::init_pool(url).await?;
            tracing::info!("Database connected");
            Some(pool)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, running without persistence");
            None
        }
    };

    let auth = if config.has_clob_auth() {
        ClobAuth::new(
            config.clob_api_key.clone().unwrap_or_default(),
            config.clob_api_secret.clone().unwrap_or_default(),
            config.clob_passphrase.clone().unwrap_or_default(),
        )
    } else {
        tracing::warn!("No exchange API credentials, order submission will be rejected upstream");
        ClobAuth::new(String::new(), String::new(), String::new())
    };
    let exchange: Arc<dyn ExchangeClient> = Arc::new(ClobClient::new(reqwest::Client::new(), auth));

    // --- Execution layer ---
    let audit = AuditTrail::new(pool.clone());
    let executor = OrderExecutor::new(
        exchange.clone(),
        audit.clone(),
        pool.clone(),
        ExecutorConfig::default(),
    );
    let risk = RiskManager::new(RiskLimits::default());
    let ledger = PositionLedger::new(audit.clone(), pool.clone(), ExitPolicy::default());
    let whales = WhaleDirectory::default();
    let markets = MarketCatalog::default();

    let engine_config = CopyEngineConfig {
        bankroll: config.bankroll,
        ..CopyEngineConfig::default()
    };
    tracing::info!(bankroll = %config.bankroll, "Building copy engine");
    let engine = Arc::new(CopyEngine::new(
        engine_config,
        exchange.clone(),
        executor,
        risk,
        ledger,
        whales,
        markets,
    ));

    // --- Ingestion: WS trade feed into the engine channel ---
    let (event_tx, event_rx) = mpsc::channel::<WhaleTradeEvent>(1000);
    let (_token_tx, token_rx) = watch::channel(config.ws_subscribe_token_ids.clone());

    if config.ws_subscribe_token_ids.is_empty() {
        tracing::warn!("WS_SUBSCRIBE_TOKEN_IDS is empty, WebSocket listener will not start");
    } else {
        tracing::info!(
            token_count = config.ws_subscribe_token_ids.len(),
            "Starting WebSocket listener"
        );
        let ws_url = config.ws_url.clone();
        tokio::spawn(async move {
            run_ws_listener(ws_url, token_rx, event_tx).await;
        });
    }

    tokio::spawn(engine.clone().run(event_rx));

    // --- Background services ---
    tokio::spawn(run_position_monitor(
        engine.clone(),
        exchange.clone(),
        config.monitor_interval_secs,
    ));
    tokio::spawn(run_order_fill_poller(
        engine.clone(),
        config.fill_poll_interval_secs,
    ));

    // --- API server ---
    let state = AppState {
        engine,
        audit,
        config,
        metrics_handle,
        db: pool,
    };
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {addr}");
    axum::serve(listener, router).await?;

    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();
}
