use rust_decimal::Decimal;
use std::env;

const DEFAULT_WS_URL: &str = "wss://ws-subscriptions-clob.polymarket.com/ws/market";

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Optional: without it the ledger and audit trail run in-memory only.
    pub database_url: Option<String>,
    pub host: String,
    pub port: u16,
    pub api_token: Option<String>,

    // Exchange API credentials (required for order submission)
    pub clob_api_key: Option<String>,
    pub clob_api_secret: Option<String>,
    pub clob_passphrase: Option<String>,

    // WebSocket
    pub ws_url: String,
    pub ws_subscribe_token_ids: Vec<String>,

    // Execution
    pub bankroll: Decimal,
    pub monitor_interval_secs: u64,
    pub fill_poll_interval_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let token_ids_raw = env::var("WS_SUBSCRIBE_TOKEN_IDS").unwrap_or_default();
        let ws_subscribe_token_ids: Vec<String> = token_ids_raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            database_url: env::var("DATABASE_URL").ok(),
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".into())
                .parse()?,
            api_token: env::var("API_TOKEN").ok().filter(|t| !t.is_empty()),

            clob_api_key: env::var("CLOB_API_KEY").ok(),
            clob_api_secret: env::var("CLOB_API_SECRET").ok(),
            clob_passphrase: env::var("CLOB_PASSPHRASE").ok(),

            ws_url: env::var("CLOB_WS_URL").unwrap_or_else(|_| DEFAULT_WS_URL.into()),
            ws_subscribe_token_ids,

            bankroll: env::var("BANKROLL")
                .unwrap_or_else(|_| "10000".into())
                .parse()
                .unwrap_or(Decimal::from(10_000)),
            monitor_interval_secs: env::var("MONITOR_INTERVAL_SECS")
                .unwrap_or_else(|_| "15".into())
                .parse()
                .unwrap_or(15),
            fill_poll_interval_secs: env::var("FILL_POLL_INTERVAL_SECS")
                .unwrap_or_else(|_| "30".into())
                .parse()
                .unwrap_or(30),
        })
    }

    /// Returns true if all exchange API credentials are configured.
    pub fn has_clob_auth(&self) -> bool {
        self.clob_api_key.is_some()
            && self.clob_api_secret.is_some()
            && self.clob_passphrase.is_some()
    }
}
