use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;

/// Raw media bytes plus their MIME type, ready to hand to the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPayload {
    pub mime: String,
    pub data: Vec<u8>,
}

impl MediaPayload {
    pub fn jpeg(data: Vec<u8>) -> Self {
        Self {
            mime: "image/jpeg".into(),
            data,
        }
    }
}

/// Capability for resolving a remote image reference into bytes.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<MediaPayload>;
}

/// reqwest-backed fetcher used in production.
pub struct HttpFetcher {
    http: Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        let http = Client::builder()
            .user_agent("usher-bot/0.1")
            .build()
            .expect("reqwest client");
        Self { http }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<MediaPayload> {
        let res = self
            .http
            .get(url)
            .send()
            .await
            .context("failed to reach image host")?;
        if !res.status().is_success() {
            return Err(anyhow!("image fetch {} for {}", res.status(), url));
        }
        let mime = res
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/jpeg")
            .to_string();
        let data = res.bytes().await.context("failed to read image body")?;
        Ok(MediaPayload {
            mime,
            data: data.to_vec(),
        })
    }
}

/// Whether a reference looks like a retrievable resource (scheme-qualified).
pub fn is_fetchable(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

static DRIVE_QUERY_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[?&]id=([A-Za-z0-9_-]+)").expect("valid regex"));
static DRIVE_PATH_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/d/([A-Za-z0-9_-]+)").expect("valid regex"));

/// Rewrite Google Drive share links (`…?id=<id>` or `…/d/<id>/…`) into the
/// direct thumbnail form that serves raw image bytes. Other URLs pass
/// through unchanged.
pub fn direct_drive_link(url: &str) -> String {
    let file_id = DRIVE_QUERY_ID
        .captures(url)
        .or_else(|| DRIVE_PATH_ID.captures(url))
        .map(|c| c[1].to_string());
    match file_id {
        Some(id) => format!("https://drive.google.com/thumbnail?id={id}&sz=w4000"),
        None => url.to_string(),
    }
}
