use reqwest::{Client, RequestBuilder, StatusCode};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;

use super::auth::ClobAuth;
use super::{
    BookLevel, ExchangeClient, ExchangeError, FillState, FillStatus, OrderBook, SubmitAck,
    SubmitRequest,
};

const CLOB_API_BASE: &str = "https://clob.polymarket.com";

/// Authenticated REST client for the CLOB, implementing the exchange
/// capability used by the executor and the pipeline.
#[derive(Debug, Clone)]
pub struct ClobClient {
    http: Client,
    auth: ClobAuth,
    base_url: String,
}

impl ClobClient {
    pub fn new(http: Client, auth: ClobAuth) -> Self {
        Self {
            http,
            auth,
            base_url: CLOB_API_BASE.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn signed(
        &self,
        method: &str,
        path: &str,
        body: &str,
    ) -> Result<RequestBuilder, ExchangeError> {
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let signature = self
            .auth
            .sign(&timestamp, method, path, body)
            .map_err(|e| ExchangeError::Unexpected(e.to_string()))?;

        let url = format!("{}{}", self.base_url, path);
        let req = match method {
            "POST" => self.http.post(&url),
            "DELETE" => self.http.delete(&url),
            _ => self.http.get(&url),
        };

        Ok(req
            .header("POLY-API-KEY", &self.auth.api_key)
            .header("POLY-SIGNATURE", signature)
            .header("POLY-TIMESTAMP", &timestamp)
            .header("POLY-PASSPHRASE", &self.auth.passphrase))
    }
}

fn map_transport_error(e: reqwest::Error) -> ExchangeError {
    if e.is_timeout() {
        ExchangeError::Timeout(e.to_string())
    } else if e.is_connect() {
        ExchangeError::Connection(e.to_string())
    } else {
        ExchangeError::Unexpected(e.to_string())
    }
}

/// Map an HTTP error status plus response body onto the error taxonomy.
/// Rate limits and server-side failures are transient; 4xx rejections are
/// terminal and classified from the exchange's error text.
fn map_status_error(status: StatusCode, body: &str) -> ExchangeError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return ExchangeError::RateLimited(body.to_string());
    }
    if status.is_server_error() {
        return ExchangeError::Connection(format!("{status}: {body}"));
    }

    let lower = body.to_lowercase();
    if lower.contains("insufficient") {
        ExchangeError::InsufficientBalance(body.to_string())
    } else if lower.contains("market") && (lower.contains("invalid") || lower.contains("closed")) {
        ExchangeError::InvalidMarket(body.to_string())
    } else if lower.contains("price") {
        ExchangeError::PriceOutOfBounds(body.to_string())
    } else {
        ExchangeError::Rejected(format!("{status}: {body}"))
    }
}

async fn check_response(resp: reqwest::Response) -> Result<reqwest::Response, ExchangeError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(map_status_error(status, &body))
}

// --- API wire types -------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ApiBookLevel {
    price: String,
    size: String,
}

#[derive(Debug, Deserialize)]
struct ApiOrderBook {
    #[serde(default)]
    bids: Vec<ApiBookLevel>,
    #[serde(default)]
    asks: Vec<ApiBookLevel>,
}

#[derive(Debug, Deserialize)]
struct ApiSubmitResponse {
    #[serde(default)]
    success: bool,
    #[serde(rename = "orderID", default)]
    order_id: String,
    #[serde(rename = "errorMsg", default)]
    error_msg: String,
}

#[derive(Debug, Deserialize)]
struct ApiOrderStatus {
    status: String,
    #[serde(default)]
    size_matched: String,
    #[serde(default)]
    price: String,
}

fn parse_levels(levels: Vec<ApiBookLevel>) -> Vec<BookLevel> {
    levels
        .into_iter()
        .filter_map(|l| {
            Some(BookLevel {
                price: Decimal::from_str(&l.price).ok()?,
                size: Decimal::from_str(&l.size).ok()?,
            })
        })
        .collect()
}

#[async_trait::async_trait]
impl ExchangeClient for ClobClient {
    async fn submit_order(&self, req: &SubmitRequest) -> Result<SubmitAck, ExchangeError> {
        let body = serde_json::to_string(&serde_json::json!({
            "clientOrderId": req.client_order_id,
            "tokenID": req.token_id,
            "side": req.side.to_string(),
            "size": req.size,
            "price": req.price,
            "orderType": req.order_type.to_string(),
        }))
        .map_err(|e| ExchangeError::Unexpected(e.to_string()))?;

        let resp = self
            .signed("POST", "/order", &body)?
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(map_transport_error)?;
        let resp = check_response(resp).await?;

        let ack: ApiSubmitResponse = resp
            .json()
            .await
            .map_err(|e| ExchangeError::Unexpected(e.to_string()))?;

        if !ack.success {
            return Err(map_status_error(StatusCode::BAD_REQUEST, &ack.error_msg));
        }
        Ok(SubmitAck {
            exchange_order_id: ack.order_id,
        })
    }

    async fn cancel_order(&self, exchange_order_id: &str) -> Result<(), ExchangeError> {
        let path = format!("/order/{exchange_order_id}");
        let resp = self
            .signed("DELETE", &path, "")?
            .send()
            .await
            .map_err(map_transport_error)?;
        check_response(resp).await?;
        Ok(())
    }

    async fn fetch_order_book(&self, token_id: &str) -> Result<OrderBook, ExchangeError> {
        let path = format!("/book?token_id={token_id}");
        let resp = self
            .signed("GET", &path, "")?
            .send()
            .await
            .map_err(map_transport_error)?;
        let resp = check_response(resp).await?;

        let book: ApiOrderBook = resp
            .json()
            .await
            .map_err(|e| ExchangeError::Unexpected(e.to_string()))?;

        Ok(OrderBook {
            bids: parse_levels(book.bids),
            asks: parse_levels(book.asks),
        })
    }

    async fn poll_fill(&self, exchange_order_id: &str) -> Result<FillStatus, ExchangeError> {
        let path = format!("/order/{exchange_order_id}");
        let resp = self
            .signed("GET", &path, "")?
            .send()
            .await
            .map_err(map_transport_error)?;
        let resp = check_response(resp).await?;

        let status: ApiOrderStatus = resp
            .json()
            .await
            .map_err(|e| ExchangeError::Unexpected(e.to_string()))?;

        let filled_size = Decimal::from_str(&status.size_matched).unwrap_or(Decimal::ZERO);
        let avg_price = Decimal::from_str(&status.price).unwrap_or(Decimal::ZERO);
        let state = match status.status.as_str() {
            "matched" => FillState::Filled,
            "canceled" | "cancelled" | "unmatched" => FillState::Cancelled,
            _ => FillState::Open,
        };

        // The REST path reports cumulative size only; derive a monotonic
        // sequence from it so both confirmation paths dedup identically.
        let fill_sequence = (filled_size * Decimal::from(1_000_000))
            .to_u64()
            .unwrap_or(0);

        Ok(FillStatus {
            exchange_order_id: exchange_order_id.to_string(),
            state,
            filled_size,
            avg_price,
            fill_sequence,
        })
    }
}
