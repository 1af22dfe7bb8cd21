//! OpenRouter adapter (lead classification).
//!
//! Talks to the OpenAI-compatible `chat/completions` endpoint and returns the
//! first choice's content verbatim; verdict parsing lives in the core crate.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::RETRY_AFTER, StatusCode};
use serde_json::json;
use tglead_core::{errors::Error, ports::ClassifierEndpoint, Result};
use tracing::debug;

const REFERER: &str = "https://github.com/telegram-scraper";
const TITLE: &str = "Telegram User Validator";
const TEMPERATURE: f64 = 0.1;
const MAX_TOKENS: u32 = 100;

#[derive(Clone, Debug)]
pub struct OpenRouterClassifier {
    api_key: String,
    model: String,
    endpoint: String,
    http: reqwest::Client,
}

impl OpenRouterClassifier {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("openrouter http client: {e}")))?;
        Ok(Self {
            api_key: api_key.into(),
            model: model.into(),
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            http,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl ClassifierEndpoint for OpenRouterClassifier {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", REFERER)
            .header("X-Title", TITLE)
            .json(&request_body(&self.model, prompt))
            .send()
            .await
            .map_err(map_send_error)?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = retry_after(resp.headers());
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(status, retry_after, &body));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| Error::transport(format!("openrouter read error: {e}")))?;
        debug!(model = %self.model, bytes = body.len(), "openrouter response");
        Ok(extract_content(&body))
    }
}

fn request_body(model: &str, prompt: &str) -> serde_json::Value {
    json!({
        "model": model,
        "messages": [{ "role": "user", "content": prompt }],
        "temperature": TEMPERATURE,
        "max_tokens": MAX_TOKENS,
    })
}

fn map_send_error(e: reqwest::Error) -> Error {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        Error::transport(format!("openrouter request error: {e}"))
    } else {
        Error::External(format!("openrouter request error: {e}"))
    }
}

fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// 429 and 5xx are transient; every other non-success status is permanent.
fn status_error(status: StatusCode, retry_after: Option<Duration>, body: &str) -> Error {
    let message = format!(
        "openrouter returned {status}: {}",
        body.chars().take(200).collect::<String>()
    );
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Error::Transport {
            message,
            retry_after,
        }
    } else {
        Error::External(message)
    }
}

/// `choices[0].message.content`, or the raw body when the shape is unexpected
/// (the caller treats unparseable output as a malformed verdict).
fn extract_content(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/choices/0/message/content")
                .and_then(|c| c.as_str())
                .map(|s| s.trim().to_string())
        })
        .unwrap_or_else(|| body.to_string())
}

#[cfg(test)]
mod tests {
    use reqwest::header::{HeaderMap, HeaderValue};

    use super::*;

    #[test]
    fn body_carries_fixed_sampling_settings() {
        let b = request_body("openai/gpt-4o-mini", "hi");
        assert_eq!(b["model"], "openai/gpt-4o-mini");
        assert_eq!(b["messages"][0]["role"], "user");
        assert_eq!(b["messages"][0]["content"], "hi");
        assert_eq!(b["temperature"], 0.1);
        assert_eq!(b["max_tokens"], 100);
    }

    #[test]
    fn extracts_first_choice() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":" {\"valid\": true} "}}]}"#;
        assert_eq!(extract_content(body), r#"{"valid": true}"#);
        assert_eq!(extract_content(r#"{"error":"x"}"#), r#"{"error":"x"}"#);
        assert_eq!(extract_content("not json"), "not json");
    }

    #[test]
    fn status_mapping() {
        let e = status_error(StatusCode::TOO_MANY_REQUESTS, Some(Duration::from_secs(3)), "");
        assert!(e.is_retryable());
        assert!(matches!(
            e,
            Error::Transport { retry_after: Some(d), .. } if d == Duration::from_secs(3)
        ));
        assert!(status_error(StatusCode::BAD_GATEWAY, None, "").is_retryable());
        assert!(!status_error(StatusCode::UNAUTHORIZED, None, "bad key").is_retryable());
    }

    #[test]
    fn parses_retry_after_seconds() {
        let mut h = HeaderMap::new();
        assert_eq!(retry_after(&h), None);
        h.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(retry_after(&h), Some(Duration::from_secs(7)));
        h.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(retry_after(&h), None);
    }

    #[test]
    fn endpoint_joins_base_url() {
        let c = OpenRouterClassifier::new("k", "m", "https://openrouter.ai/api/v1/", Duration::from_secs(5))
            .unwrap();
        assert_eq!(c.endpoint, "https://openrouter.ai/api/v1/chat/completions");
        assert_eq!(c.model(), "m");
    }
}
