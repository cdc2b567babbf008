//! HTTP client for a Blossom content-addressed blob server.
//!
//! Uploads carry a signed kind-24242 authorization event, base64-encoded
//! into the `Authorization: Nostr ...` header. Downloads are plain GETs of
//! `/<hex-key>`. Both require HTTP 200; anything else surfaces the response
//! body as the error. Transient transport failures and 5xx answers are
//! retried a bounded number of times; 4xx answers are not, since resending
//! the same bytes cannot fix them.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::time::Duration;

use crate::errors::HelperError;
use crate::hash::BlossomKey;
use crate::nostr::event::Event;
use crate::nostr::keys::Keys;

/// Upper bound on attempts per Blossom operation.
pub const MAX_RETRIES: usize = 3;

/// Pause between attempts, multiplied by the attempt number.
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Client for one Blossom server, sharing a pooled HTTP connection.
#[derive(Clone, Debug)]
pub struct BlossomClient {
    http: reqwest::Client,
    server: String,
}

impl BlossomClient {
    pub fn new(server: impl Into<String>) -> BlossomClient {
        let server = server.into();
        BlossomClient {
            http: reqwest::Client::new(),
            server: server.trim_end_matches('/').to_string(),
        }
    }

    /// Upload `data` to be stored under `key`, authorized by the owner key.
    pub async fn put(
        &self,
        keys: &Keys,
        key: &BlossomKey,
        data: Vec<u8>,
    ) -> Result<(), HelperError> {
        let auth = Event::upload_auth(keys, key)?;
        let header = format!("Nostr {}", BASE64.encode(auth.as_json()?));
        let url = format!("{}/upload", self.server);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let sent = self
                .http
                .put(&url)
                .header("Authorization", header.clone())
                .header("Content-Type", "application/octet-stream")
                .body(data.clone())
                .send()
                .await;

            match sent {
                Ok(response) if response.status().is_success() => {
                    tracing::debug!("stored {key} on {}", self.server);
                    return Ok(());
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    let body = response.text().await.unwrap_or_default();
                    if response_is_transient(status) && attempt < MAX_RETRIES {
                        tracing::warn!("upload of {key} got {status}, retrying");
                    } else {
                        return Err(HelperError::Blossom { status, body });
                    }
                }
                Err(e) => {
                    if attempt < MAX_RETRIES {
                        tracing::warn!("upload of {key} failed ({e}), retrying");
                    } else {
                        return Err(e.into());
                    }
                }
            }
            tokio::time::sleep(RETRY_BACKOFF * attempt as u32).await;
        }
    }

    /// Download the blob stored under `key`.
    pub async fn get(&self, key: &BlossomKey) -> Result<Vec<u8>, HelperError> {
        let url = format!("{}/{key}", self.server);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.http.get(&url).send().await {
                Ok(response) if response.status().is_success() => {
                    let body = response.bytes().await?;
                    if body.is_empty() {
                        return Err(HelperError::Blossom {
                            status: 200,
                            body: format!("empty response body for {key}"),
                        });
                    }
                    return Ok(body.to_vec());
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    let body = response.text().await.unwrap_or_default();
                    if response_is_transient(status) && attempt < MAX_RETRIES {
                        tracing::warn!("download of {key} got {status}, retrying");
                    } else {
                        return Err(HelperError::Blossom { status, body });
                    }
                }
                Err(e) => {
                    if attempt < MAX_RETRIES {
                        tracing::warn!("download of {key} failed ({e}), retrying");
                    } else {
                        return Err(e.into());
                    }
                }
            }
            tokio::time::sleep(RETRY_BACKOFF * attempt as u32).await;
        }
    }
}

/// Server-side trouble is worth another attempt; client errors are not.
fn response_is_transient(status: u16) -> bool {
    status >= 500
}
