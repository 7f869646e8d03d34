pub mod api;
pub mod audit;
pub mod config;
pub mod db;
pub mod errors;
pub mod exchange;
pub mod execution;
pub mod ingestion;
pub mod ledger;
pub mod metrics;
pub mod models;
pub mod services;

use std::sync::Arc;

use crate::audit::AuditTrail;
use crate::config::AppConfig;
use crate::execution::copy_engine::CopyEngine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<CopyEngine>,
    pub audit: AuditTrail,
    pub config: AppConfig,
    pub metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
    pub db: Option<sqlx::PgPool>,
}
