//! Realtime change feed
//!
//! Supabase realtime speaks the Phoenix channel protocol over a websocket.
//! Each listener owns one socket, joins one table topic and keeps it alive
//! with heartbeats, reconnecting whenever the socket drops.

use super::remote::{ChangeCallback, ChangeEvent, ChangeKind};
use crate::config::{REALTIME_HEARTBEAT_SECS, REALTIME_RECONNECT_SECS};
use crate::error::{AppError, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Websocket endpoint for a project URL
pub fn websocket_url(base_url: &str, anon_key: &str) -> Result<String> {
    let base = base_url.trim_end_matches('/');
    let host = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        return Err(AppError::Realtime(format!("Unsupported URL scheme: {}", base_url)));
    };

    Ok(format!(
        "{}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
        host, anon_key
    ))
}

pub fn topic(table: &str) -> String {
    format!("realtime:public:{}", table)
}

/// `phx_join` asking for row changes of the given kinds on one table
pub fn join_message(table: &str, kinds: &[ChangeKind], message_ref: u64) -> Value {
    let changes: Vec<Value> = kinds
        .iter()
        .map(|kind| {
            json!({
                "event": kind.as_str(),
                "schema": "public",
                "table": table,
            })
        })
        .collect();

    json!({
        "topic": topic(table),
        "event": "phx_join",
        "payload": {
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": changes,
            }
        },
        "ref": message_ref.to_string(),
    })
}

pub fn heartbeat_message(message_ref: u64) -> Value {
    json!({
        "topic": "phoenix",
        "event": "heartbeat",
        "payload": {},
        "ref": message_ref.to_string(),
    })
}

/// Extract a row change for `table` from a raw frame. Replies, heartbeats and
/// presence traffic yield `None`.
pub fn parse_change(text: &str, table: &str) -> Option<ChangeEvent> {
    let frame: Value = serde_json::from_str(text).ok()?;
    if frame.get("event")?.as_str()? != "postgres_changes" {
        return None;
    }

    let data = frame.get("payload")?.get("data")?;
    let changed_table = data.get("table")?.as_str()?;
    if changed_table != table {
        return None;
    }

    let kind = ChangeKind::parse(data.get("type")?.as_str()?)?;
    Some(ChangeEvent {
        table: changed_table.to_string(),
        kind,
    })
}

/// Listen forever, reconnecting after a pause whenever the socket ends
pub async fn listen(url: String, table: String, kinds: Vec<ChangeKind>, callback: ChangeCallback) {
    loop {
        if let Err(e) = run_session(&url, &table, &kinds, &callback).await {
            tracing::warn!("Realtime channel for {} dropped: {}", table, e);
        }
        tokio::time::sleep(Duration::from_secs(REALTIME_RECONNECT_SECS)).await;
        tracing::debug!("Reconnecting realtime channel for {}", table);
    }
}

async fn run_session(
    url: &str,
    table: &str,
    kinds: &[ChangeKind],
    callback: &ChangeCallback,
) -> Result<()> {
    let (socket, _) = connect_async(url)
        .await
        .map_err(|e| AppError::Realtime(format!("connect failed: {}", e)))?;
    let (mut write, mut read) = socket.split();

    let mut message_ref = 1;
    write
        .send(Message::Text(join_message(table, kinds, message_ref).to_string()))
        .await
        .map_err(|e| AppError::Realtime(e.to_string()))?;
    tracing::info!("Joined realtime topic {}", topic(table));

    let mut heartbeat = tokio::time::interval(Duration::from_secs(REALTIME_HEARTBEAT_SECS));
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                message_ref += 1;
                write
                    .send(Message::Text(heartbeat_message(message_ref).to_string()))
                    .await
                    .map_err(|e| AppError::Realtime(e.to_string()))?;
            }
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Some(event) = parse_change(&text, table) {
                        tracing::debug!("Realtime {} on {}", event.kind.as_str(), event.table);
                        callback(event);
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    write
                        .send(Message::Pong(payload))
                        .await
                        .map_err(|e| AppError::Realtime(e.to_string()))?;
                }
                Some(Ok(Message::Close(_))) | None => {
                    return Err(AppError::Realtime("socket closed".to_string()));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(AppError::Realtime(e.to_string())),
            }
        }
    }
}
