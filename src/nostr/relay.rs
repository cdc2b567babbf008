//! Relay client used as the ref-state oracle.
//!
//! One WebSocket connection is opened per query or publish and closed
//! afterwards. The wire exchange is plain NIP-01 framing: `REQ` with a
//! kind/author/`#d` filter answered by `EVENT` frames and an `EOSE`, and
//! `EVENT` publishes answered by an `OK` frame. The transport sits behind
//! [`RelayTransport`] so the remote-state logic can be exercised against an
//! in-memory relay in tests.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::errors::HelperError;
use crate::nostr::event::{Event, STATE_KIND};

/// Subscription id used for the single query this helper ever issues.
const SUB_ID: &str = "repo-state";

/// How long to wait for the full query response before giving up.
const QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// How long to wait for the relay to acknowledge a publish. A silent relay
/// is tolerated (logged, treated as best-effort success); a rejection is not.
const ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Query/publish seam between the remote state and the relay wire.
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Fetch the state event for `(author, project)`, if any. At most one
    /// event may exist; more is a relay error.
    async fn query_state(
        &self,
        author_pubkey: &str,
        project: &str,
    ) -> Result<Option<Event>, HelperError>;

    /// Publish a signed event.
    async fn publish(&self, event: &Event) -> Result<(), HelperError>;
}

/// The production transport: NIP-01 over a WebSocket relay.
pub struct WsRelay {
    url: String,
}

impl WsRelay {
    pub fn new(url: impl Into<String>) -> WsRelay {
        WsRelay { url: url.into() }
    }

    fn relay_err(&self, what: &str, err: impl std::fmt::Display) -> HelperError {
        HelperError::Relay(format!("{what} [{}]: {err}", self.url))
    }
}

#[async_trait]
impl RelayTransport for WsRelay {
    async fn query_state(
        &self,
        author_pubkey: &str,
        project: &str,
    ) -> Result<Option<Event>, HelperError> {
        let (mut ws, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| self.relay_err("cannot connect to relay", e))?;

        let filter = json!({
            "kinds": [STATE_KIND],
            "authors": [author_pubkey],
            "#d": [project],
        });
        ws.send(Message::Text(json!(["REQ", SUB_ID, filter]).to_string()))
            .await
            .map_err(|e| self.relay_err("cannot send query", e))?;

        let mut found: Vec<Event> = Vec::new();
        let collect = tokio::time::timeout(QUERY_TIMEOUT, async {
            while let Some(frame) = ws.next().await {
                let frame = frame.map_err(|e| self.relay_err("query failed", e))?;
                match frame {
                    Message::Text(text) => {
                        let msg: serde_json::Value = serde_json::from_str(&text)?;
                        match msg.get(0).and_then(|v| v.as_str()) {
                            Some("EVENT") => {
                                let event: Event =
                                    serde_json::from_value(msg[2].clone())?;
                                found.push(event);
                            }
                            Some("EOSE") => break,
                            Some("NOTICE") => {
                                tracing::warn!("relay notice: {}", msg[1]);
                            }
                            Some("CLOSED") => {
                                return Err(self
                                    .relay_err("subscription closed by relay", msg[2].clone()));
                            }
                            _ => tracing::debug!("ignoring relay frame {text}"),
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Ok(())
        })
        .await;

        match collect {
            Err(_elapsed) => {
                return Err(self.relay_err("query timed out", "no EOSE received"));
            }
            Ok(result) => result?,
        }

        let _ = ws
            .send(Message::Text(json!(["CLOSE", SUB_ID]).to_string()))
            .await;
        let _ = ws.close(None).await;

        if found.len() > 1 {
            return Err(HelperError::Relay(format!(
                "relay returned {} state events for one (author, project), expected at most one",
                found.len()
            )));
        }
        Ok(found.pop())
    }

    async fn publish(&self, event: &Event) -> Result<(), HelperError> {
        let (mut ws, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| self.relay_err("cannot connect to relay", e))?;

        let frame = serde_json::to_string(&json!(["EVENT", event]))?;
        ws.send(Message::Text(frame))
            .await
            .map_err(|e| self.relay_err("cannot publish event", e))?;

        // Wait for the OK frame so a rejected replacement is not silently
        // dropped; a relay that never answers only costs the ack window.
        let ack = tokio::time::timeout(ACK_TIMEOUT, async {
            while let Some(frame) = ws.next().await {
                let frame = frame.map_err(|e| self.relay_err("publish failed", e))?;
                let Message::Text(text) = frame else {
                    continue;
                };
                let msg: serde_json::Value = serde_json::from_str(&text)?;
                if msg.get(0).and_then(|v| v.as_str()) == Some("OK")
                    && msg.get(1).and_then(|v| v.as_str()) == Some(event.id.as_str())
                {
                    if msg.get(2).and_then(|v| v.as_bool()) == Some(true) {
                        return Ok(true);
                    }
                    return Err(HelperError::Relay(format!(
                        "relay rejected state event: {}",
                        msg.get(3).and_then(|v| v.as_str()).unwrap_or("(no reason)")
                    )));
                }
            }
            Ok(false)
        })
        .await;

        match ack {
            Err(_elapsed) => {
                tracing::warn!("relay [{}] did not acknowledge publish", self.url);
            }
            Ok(acked) => {
                if !acked? {
                    tracing::warn!("relay [{}] closed before acknowledging publish", self.url);
                }
            }
        }

        let _ = ws.close(None).await;
        Ok(())
    }
}
