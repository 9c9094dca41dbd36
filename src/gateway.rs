//! HTTP adapter for a local messaging-gateway service (the concrete
//! `ChannelClient`). The gateway owns the real phone-network session; this
//! client starts it, polls its status into lifecycle events, and posts
//! outgoing messages.

use crate::channel::{ChannelClient, ChannelEvent};
use crate::config;
use crate::media::MediaPayload;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct GatewayClient {
    http: Client,
    base_url: Url,
    api_token: Option<String>,
    poll_interval: Duration,
}

impl fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// Session status document served by the gateway.
#[derive(Debug, Deserialize)]
struct SessionStatus {
    status: String,
    #[serde(default)]
    qr: Option<String>,
    #[serde(default)]
    account: Option<String>,
    #[serde(default)]
    signal: Option<u8>,
}

fn map_status(status: SessionStatus) -> ChannelEvent {
    match status.status.as_str() {
        "connected" => ChannelEvent::Connected {
            account: status.account.unwrap_or_default(),
            signal: status.signal,
        },
        "pairing" | "qr" => match status.qr {
            Some(qr) => ChannelEvent::PairingAvailable(qr),
            None => ChannelEvent::Disconnected,
        },
        _ => ChannelEvent::Disconnected,
    }
}

impl GatewayClient {
    pub fn from_config(cfg: &config::Channel) -> Result<Self> {
        let base_url = Url::parse(&cfg.gateway_url).context("invalid gateway URL")?;
        Ok(Self::with_base_url(base_url, cfg.api_token.clone()))
    }

    pub fn with_base_url(base_url: Url, api_token: Option<String>) -> Self {
        let http = Client::builder()
            .user_agent("usher-bot/0.1")
            .no_proxy()
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url,
            api_token,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).context("invalid gateway URL")
    }

    pub fn build_send_request(&self, path: &str, body: &Value) -> Result<reqwest::Request> {
        let mut builder = self
            .http
            .post(self.endpoint(path)?)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(token) = &self.api_token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        builder.build().context("failed to build gateway request")
    }

    async fn execute_send(&self, path: &str, body: Value) -> Result<()> {
        let request = self.build_send_request(path, &body)?;
        debug!(url = %request.url(), "sending gateway request");
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach gateway")?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("gateway error {}: {}", status, body));
        }
        Ok(())
    }

    async fn fetch_status(&self) -> Result<SessionStatus> {
        let mut builder = self.http.get(self.endpoint("session/status")?);
        if let Some(token) = &self.api_token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        let res = builder.send().await.context("failed to reach gateway")?;
        if !res.status().is_success() {
            return Err(anyhow!("gateway status error {}", res.status()));
        }
        res.json().await.context("invalid gateway status response")
    }
}

#[async_trait]
impl ChannelClient for GatewayClient {
    async fn run_session(&self, events: mpsc::Sender<ChannelEvent>) -> Result<()> {
        // Kick the gateway into opening a session; status polling below picks
        // up the outcome either way.
        if let Err(err) = self.execute_send("session/start", json!({})).await {
            warn!(?err, "gateway session start failed; polling status anyway");
        }

        let mut last: Option<ChannelEvent> = None;
        loop {
            let event = match self.fetch_status().await {
                Ok(status) => map_status(status),
                Err(err) => {
                    debug!(?err, "gateway status poll failed");
                    ChannelEvent::Disconnected
                }
            };
            if last.as_ref() != Some(&event) {
                if events.send(event.clone()).await.is_err() {
                    // Receiver gone; the session watcher has shut down.
                    return Ok(());
                }
                last = Some(event);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn send_text(&self, to: &str, body: &str) -> Result<()> {
        self.execute_send("messages/text", json!({ "to": to, "body": body }))
            .await
    }

    async fn send_media(&self, to: &str, media: &MediaPayload, caption: &str) -> Result<()> {
        self.execute_send(
            "messages/media",
            json!({
                "to": to,
                "caption": caption,
                "mime": media.mime,
                "data": BASE64.encode(&media.data),
            }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> GatewayClient {
        GatewayClient::with_base_url(
            Url::parse("http://127.0.0.1:3333/").unwrap(),
            Some("secret".into()),
        )
    }

    #[test]
    fn build_send_request_sets_headers() {
        let client = client();
        let body = json!({ "to": "919876543210", "body": "hi" });
        let request = client.build_send_request("messages/text", &body).unwrap();
        assert_eq!(request.method(), reqwest::Method::POST);
        assert_eq!(request.url().path(), "/messages/text");
        let headers = request.headers();
        assert_eq!(
            headers
                .get("Authorization")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "Bearer secret"
        );
        assert_eq!(
            headers
                .get("Content-Type")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "application/json"
        );
    }

    #[test]
    fn no_token_no_auth_header() {
        let client =
            GatewayClient::with_base_url(Url::parse("http://127.0.0.1:3333/").unwrap(), None);
        let request = client
            .build_send_request("messages/text", &json!({}))
            .unwrap();
        assert!(request.headers().get("Authorization").is_none());
    }

    #[test]
    fn status_maps_to_events() {
        let connected: SessionStatus = serde_json::from_value(json!({
            "status": "connected", "account": "919000000000", "signal": 76
        }))
        .unwrap();
        assert_eq!(
            map_status(connected),
            ChannelEvent::Connected {
                account: "919000000000".into(),
                signal: Some(76)
            }
        );

        let pairing: SessionStatus =
            serde_json::from_value(json!({ "status": "pairing", "qr": "QR-BLOB" })).unwrap();
        assert_eq!(
            map_status(pairing),
            ChannelEvent::PairingAvailable("QR-BLOB".into())
        );

        let down: SessionStatus = serde_json::from_value(json!({ "status": "down" })).unwrap();
        assert_eq!(map_status(down), ChannelEvent::Disconnected);

        // Pairing claimed but no artifact attached yet.
        let no_qr: SessionStatus = serde_json::from_value(json!({ "status": "pairing" })).unwrap();
        assert_eq!(map_status(no_qr), ChannelEvent::Disconnected);
    }
}
