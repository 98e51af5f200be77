use std::thread::sleep;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use reqwest::blocking::{Client, RequestBuilder};
use serde_json::Value;
use tracing::debug;

use crate::config::SiteConfig;

/// Longest error text carried in a user-facing outcome.
pub const MAX_MESSAGE_CHARS: usize = 200;

/// Status and raw body of one REST call. Non-2xx statuses are replies, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestReply {
    pub status: u16,
    pub body: String,
}

impl RestReply {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn json_body(status: u16, body: &Value) -> Self {
        Self::new(status, body.to_string())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }

    /// The `message` field WordPress puts on REST errors.
    pub fn error_message(&self) -> Option<String> {
        self.json()?
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

/// Blocking REST seam between the site clients and the network.
pub trait RestTransport {
    fn get(&mut self, url: &str, query: &[(&str, String)]) -> Result<RestReply>;
    fn post_json(&mut self, url: &str, body: &Value) -> Result<RestReply>;
    fn request_count(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_ms: u64,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl TransportConfig {
    pub fn from_config(config: &SiteConfig) -> Self {
        Self {
            user_agent: config.user_agent(),
            timeout_ms: config.timeout_ms(),
            rate_limit_ms: config.rate_limit_ms(),
            username: config.username(),
            password: config.app_password(),
        }
    }
}

/// reqwest backed transport: basic auth with an application password, one
/// attempt per call and a fixed delay between calls.
pub struct BlockingTransport {
    client: Client,
    config: TransportConfig,
    last_request_at: Option<Instant>,
    request_count: usize,
}

impl BlockingTransport {
    pub fn new(config: TransportConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build WordPress HTTP client")?;
        Ok(Self {
            client,
            config,
            last_request_at: None,
            request_count: 0,
        })
    }

    fn prepare(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header("User-Agent", self.config.user_agent.clone());
        match (&self.config.username, &self.config.password) {
            (Some(username), Some(password)) => request.basic_auth(username, Some(password)),
            _ => request,
        }
    }

    fn send(&mut self, method: &str, url: &str, request: RequestBuilder) -> Result<RestReply> {
        self.apply_rate_limit();
        debug!(method, url, "rest request");
        let response = request
            .send()
            .with_context(|| format!("failed to call {url}"))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .with_context(|| format!("failed to read response body from {url}"))?;
        debug!(method, url, status, "rest response");
        Ok(RestReply { status, body })
    }

    fn apply_rate_limit(&mut self) {
        let delay = Duration::from_millis(self.config.rate_limit_ms);
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }
}

impl RestTransport for BlockingTransport {
    fn get(&mut self, url: &str, query: &[(&str, String)]) -> Result<RestReply> {
        let request = self.prepare(self.client.get(url).query(query));
        self.send("GET", url, request)
    }

    fn post_json(&mut self, url: &str, body: &Value) -> Result<RestReply> {
        let request = self.prepare(self.client.post(url).json(body));
        self.send("POST", url, request)
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

/// Cuts `value` to at most `max_chars` characters, appending `...` when cut.
pub fn truncate_chars(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", &value[..end]),
        None => value.to_string(),
    }
}

/// Flattens an error chain into a bounded single-line message.
pub fn error_text(error: &anyhow::Error) -> String {
    truncate_chars(&format!("{error:#}"), MAX_MESSAGE_CHARS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reply_reads_wordpress_error_message() {
        let reply = RestReply::json_body(
            403,
            &json!({"code": "rest_forbidden", "message": "Sorry, you are not allowed."}),
        );
        assert!(!reply.is_success());
        assert_eq!(
            reply.error_message().as_deref(),
            Some("Sorry, you are not allowed.")
        );
        assert_eq!(RestReply::new(500, "<html>").error_message(), None);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("ééééé", 3), "ééé...");
        assert_eq!(truncate_chars(&"x".repeat(250), 200).len(), 203);
    }

    #[test]
    fn error_text_includes_context_chain() {
        let error = anyhow::anyhow!("connection refused").context("failed to call https://a");
        assert_eq!(
            error_text(&error),
            "failed to call https://a: connection refused"
        );
    }
}
