//! Interface to the external face-recognition capability. The engine only
//! consumes the identity label; the model itself lives in a separate
//! service.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Url};
use serde::Deserialize;
use std::fmt;

/// Outcome of a recognition call: either no match, or a matched identity
/// label to look up in the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recognition {
    pub matched: bool,
    pub name: Option<String>,
}

impl Recognition {
    pub fn no_match() -> Self {
        Self {
            matched: false,
            name: None,
        }
    }
}

#[async_trait]
pub trait Recognizer: Send + Sync {
    async fn recognize(&self, image: &[u8]) -> Result<Recognition>;
}

/// Wire document returned by the face service.
#[derive(Debug, Deserialize)]
struct RecognizeResponse {
    #[serde(rename = "match", default)]
    matched: bool,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

fn from_response(res: RecognizeResponse) -> Recognition {
    let matched = res.matched || res.status.as_deref() == Some("matched");
    match res.name {
        Some(name) if matched && !name.trim().is_empty() => Recognition {
            matched: true,
            name: Some(name.trim().to_string()),
        },
        _ => Recognition::no_match(),
    }
}

pub struct HttpRecognizer {
    http: Client,
    base_url: Url,
}

impl fmt::Debug for HttpRecognizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRecognizer")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpRecognizer {
    pub fn new(service_url: &str) -> Result<Self> {
        let base_url = Url::parse(service_url).context("invalid recognizer URL")?;
        Ok(Self::with_base_url(base_url))
    }

    pub fn with_base_url(base_url: Url) -> Self {
        let http = Client::builder()
            .user_agent("usher-bot/0.1")
            .no_proxy()
            .build()
            .expect("reqwest client");
        Self { http, base_url }
    }
}

#[async_trait]
impl Recognizer for HttpRecognizer {
    async fn recognize(&self, image: &[u8]) -> Result<Recognition> {
        let endpoint = self
            .base_url
            .join("recognize")
            .context("invalid recognizer URL")?;
        let part = Part::bytes(image.to_vec())
            .file_name("capture.jpg")
            .mime_str("image/jpeg")
            .context("invalid capture mime")?;
        let form = Form::new().part("image", part);
        let res = self
            .http
            .post(endpoint)
            .multipart(form)
            .send()
            .await
            .context("failed to reach recognizer")?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("recognizer error {}: {}", status, body));
        }
        let payload: RecognizeResponse =
            res.json().await.context("invalid recognizer response")?;
        Ok(from_response(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Recognition {
        from_response(serde_json::from_str(json).unwrap())
    }

    #[test]
    fn match_flag_with_name() {
        let rec = parse(r#"{"match": true, "name": "Alice", "distance": 0.42}"#);
        assert!(rec.matched);
        assert_eq!(rec.name.as_deref(), Some("Alice"));
    }

    #[test]
    fn status_matched_variant() {
        let rec = parse(r#"{"status": "matched", "name": " Bob "}"#);
        assert!(rec.matched);
        assert_eq!(rec.name.as_deref(), Some("Bob"));
    }

    #[test]
    fn no_match_without_name() {
        assert_eq!(parse(r#"{"match": true}"#), Recognition::no_match());
        assert_eq!(parse(r#"{"match": false}"#), Recognition::no_match());
        assert_eq!(
            parse(r#"{"match": false, "name": "Alice"}"#),
            Recognition::no_match()
        );
        assert_eq!(parse(r#"{"status": "unknown"}"#), Recognition::no_match());
    }
}
