use chrono::{DateTime, Utc};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, sleep};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::models::{Side, WhaleTradeEvent};

const PING_INTERVAL: Duration = Duration::from_secs(25);
const BASE_RECONNECT_DELAY: Duration = Duration::from_secs(2);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Run the WebSocket listener loop with dynamic token subscription updates.
///
/// `token_rx` emits updated token ID lists from the market-metadata feed;
/// on change the listener re-subscribes on the live connection. Converted
/// trades flow into the engine channel as WhaleTradeEvents.
pub async fn run_ws_listener(
    ws_url: String,
    mut token_rx: watch::Receiver<Vec<String>>,
    tx: mpsc::Sender<WhaleTradeEvent>,
) {
    let mut attempt: u32 = 0;

    loop {
        match connect_async(&ws_url).await {
            Ok((stream, _response)) => {
                tracing::info!(url = %ws_url, "Trade feed connected");
                attempt = 0;
                drive_session(stream, &mut token_rx, &tx).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Trade feed connection failed");
            }
        }

        // Exponential backoff with cap
        let delay = (BASE_RECONNECT_DELAY * 2u32.saturating_pow(attempt)).min(MAX_RECONNECT_DELAY);
        attempt = attempt.saturating_add(1);
        tracing::info!(delay_secs = delay.as_secs(), attempt, "Reconnecting trade feed...");
        sleep(delay).await;
    }
}

/// Pump one connection until it drops: answer pings, forward trade frames,
/// re-subscribe when the token universe changes.
async fn drive_session(
    stream: WsStream,
    token_rx: &mut watch::Receiver<Vec<String>>,
    tx: &mpsc::Sender<WhaleTradeEvent>,
) {
    let (mut write, mut read) = stream.split();

    let tokens = token_rx.borrow().clone();
    if let Err(e) = subscribe(&mut write, &tokens).await {
        tracing::error!(error = %e, "Failed to subscribe to market channel");
        return;
    }
    tracing::info!(token_count = tokens.len(), "Subscribed to market channel");

    let mut ping_timer = interval(PING_INTERVAL);
    ping_timer.tick().await; // consume the first immediate tick

    loop {
        tokio::select! {
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => forward_trades(text.as_ref(), tx).await,
                    Some(Ok(Message::Ping(data))) => {
                        if write.send(Message::Pong(data)).await.is_err() {
                            return;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::warn!("Trade feed closed by server");
                        return;
                    }
                    Some(Ok(_)) => {} // Binary, Pong, Frame: ignore
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "Trade feed read error");
                        return;
                    }
                }
            }
            _ = ping_timer.tick() => {
                if write.send(Message::Ping(vec![].into())).await.is_err() {
                    return;
                }
            }
            changed = token_rx.changed() => {
                if changed.is_err() {
                    tracing::warn!("Token watch channel closed");
                    return;
                }
                let tokens = token_rx.borrow().clone();
                tracing::info!(token_count = tokens.len(), "Token universe changed, resubscribing");
                if let Err(e) = subscribe(&mut write, &tokens).await {
                    tracing::error!(error = %e, "Failed to resubscribe");
                    return;
                }
            }
        }
    }
}

async fn subscribe(write: &mut WsSink, tokens: &[String]) -> Result<(), WsError> {
    let payload = serde_json::json!({
        "type": "market",
        "assets_ids": tokens,
    })
    .to_string();
    write.send(Message::Text(payload.into())).await
}

async fn forward_trades(text: &str, tx: &mpsc::Sender<WhaleTradeEvent>) {
    for trade in decode_frame(text) {
        match trade.into_event() {
            Some(event) => {
                tracing::info!(%event, "Trade detected");
                if tx.send(event).await.is_err() {
                    tracing::error!("Trade channel closed, dropping event");
                }
            }
            None => {
                tracing::debug!(raw = %text, "Trade frame missing wallet or side");
            }
        }
    }
}

/// One execution off the market channel. The feed quotes size and price as
/// decimal strings; serde accepts numeric forms too.
#[derive(Debug, Deserialize)]
struct RawTrade {
    side: String,
    size: Decimal,
    price: Decimal,
    #[serde(default)]
    market: Option<String>,
    #[serde(default)]
    asset_id: Option<String>,
    #[serde(default)]
    maker_address: Option<String>,
    #[serde(default)]
    taker_address: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
}

impl RawTrade {
    /// Attributes the trade to the aggressor when known, else the resting
    /// side. A trade with no wallet at all cannot be copied.
    fn into_event(self) -> Option<WhaleTradeEvent> {
        let wallet = self.taker_address.or(self.maker_address)?;
        let side = Side::from_api_str(&self.side)?;
        let notional = self.size * self.price;
        Some(WhaleTradeEvent {
            wallet,
            market_id: self.market.unwrap_or_else(|| "unknown".into()),
            asset_id: self.asset_id.unwrap_or_else(|| "unknown".into()),
            side,
            size: self.size,
            price: self.price,
            notional,
            timestamp: parse_event_time(self.timestamp.as_deref()),
        })
    }
}

/// Epoch seconds as a string on the live channel, ISO 8601 on replays.
/// Unparseable or absent timestamps fall back to arrival time.
fn parse_event_time(raw: Option<&str>) -> DateTime<Utc> {
    raw.and_then(|t| {
        t.parse::<i64>()
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .or_else(|| {
                DateTime::parse_from_rfc3339(t)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc))
            })
    })
    .unwrap_or_else(Utc::now)
}

/// The market channel emits a bare trade array, a single trade object, or
/// an event envelope carrying the trades under `data`. Acks and heartbeats
/// lack the required trade fields and decode to nothing.
fn decode_frame(text: &str) -> Vec<RawTrade> {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => return Vec::new(),
    };

    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Array(items)) => items,
            Some(trade @ Value::Object(_)) => vec![trade],
            None => vec![Value::Object(map)],
            Some(_) => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_trade_array() {
        let text = r#"[{"market":"M1","asset_id":"T1","side":"BUY","size":"100","price":"0.55","taker_address":"0xabc","timestamp":"1700000000"}]"#;
        let trades = decode_frame(text);
        assert_eq!(trades.len(), 1);

        let event = trades.into_iter().next().unwrap().into_event().unwrap();
        assert_eq!(event.wallet, "0xabc");
        assert_eq!(event.side, Side::Buy);
        assert_eq!(event.notional, Decimal::from(55));
        assert_eq!(
            event.timestamp,
            DateTime::from_timestamp(1_700_000_000, 0).unwrap()
        );
    }

    #[test]
    fn decodes_data_envelope() {
        let text = r#"{"event_type":"trade","data":[{"market":"M1","asset_id":"T1","side":"SELL","size":"10","price":"0.40","maker_address":"0xdef"}]}"#;
        let trades = decode_frame(text);
        assert_eq!(trades.len(), 1);

        let event = trades.into_iter().next().unwrap().into_event().unwrap();
        assert_eq!(event.side, Side::Sell);
        assert_eq!(event.wallet, "0xdef");
    }

    #[test]
    fn decodes_numeric_size() {
        let text = r#"{"side":"BUY","size":100,"price":"0.55","taker_address":"0xabc"}"#;
        let trades = decode_frame(text);
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].size, Decimal::from(100));
    }

    #[test]
    fn acks_and_heartbeats_decode_to_nothing() {
        assert!(decode_frame(r#"{"type":"subscribed"}"#).is_empty());
        assert!(decode_frame(r#"{"event_type":"heartbeat","data":{}}"#).is_empty());
        assert!(decode_frame("pong").is_empty());
    }

    #[test]
    fn trade_without_wallet_is_dropped() {
        let text = r#"[{"market":"M1","asset_id":"T1","side":"BUY","size":"1","price":"0.5"}]"#;
        let trades = decode_frame(text);
        assert!(trades.into_iter().next().unwrap().into_event().is_none());
    }
}
