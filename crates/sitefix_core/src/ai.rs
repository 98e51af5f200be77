//! Fix and alt-text suggestions from the Anthropic messages API.

use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use reqwest::blocking::Client;
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::SiteConfig;
use crate::crawl::{BrokenUrlRecord, ImageAltRecord};
use crate::session::{Decision, DecisionAction};
use crate::transport::truncate_chars;

pub const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const MAX_BATCH: usize = 10;
const BATCH_MAX_TOKENS: u32 = 2000;
const SINGLE_SEARCH_USES: u32 = 3;
const BATCH_SEARCH_USES: u32 = 10;
const RAW_NOTE_CHARS: usize = 150;
const ERROR_NOTE_CHARS: usize = 100;
const MISSING_POSITION_NOTE: &str = "Could not analyze this URL.";
const UNPARSED_NOTE: &str = "Could not parse response.";
const UNPARSED_BATCH_NOTE: &str = "Could not parse AI response.";
const NO_EXPLANATION: &str = "No explanation provided.";
const IMAGE_LOAD_NOTE: &str = "Could not load image. The image may be inaccessible, blocked, or in an unsupported format. Try entering alt text manually.";

static FENCED_JSON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*(.*?)```").expect("fenced json regex must compile")
});

#[derive(Debug, Error)]
pub enum AiError {
    #[error("AI rate limit reached")]
    RateLimited,
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("{0}")]
    Transport(String),
    #[error("batch of {0} exceeds the limit of 10")]
    BatchTooLarge(usize),
}

impl AiError {
    fn is_rate_limit(&self) -> bool {
        match self {
            Self::RateLimited => true,
            Self::Http { status, message } => {
                *status == 429 || message.to_lowercase().contains("rate")
            }
            Self::Transport(message) => {
                message.contains("429") || message.to_lowercase().contains("rate")
            }
            Self::BatchTooLarge(_) => false,
        }
    }
}

/// Seam over the messages endpoint: takes a request body, returns the
/// response body.
pub trait MessagesApi {
    fn create_message(&mut self, request: &Value) -> Result<Value, AiError>;
}

pub struct AnthropicClient {
    client: Client,
    api_key: String,
}

impl AnthropicClient {
    pub fn new(api_key: &str, timeout_ms: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .context("failed to build AI HTTP client")?;
        Ok(Self {
            client,
            api_key: api_key.trim().to_string(),
        })
    }

    /// `None` when no API key is configured.
    pub fn from_config(config: &SiteConfig) -> Result<Option<Self>> {
        match config.ai_api_key() {
            Some(key) => Ok(Some(Self::new(&key, config.timeout_ms())?)),
            None => Ok(None),
        }
    }
}

impl MessagesApi for AnthropicClient {
    fn create_message(&mut self, request: &Value) -> Result<Value, AiError> {
        debug!(url = MESSAGES_URL, "sending messages request");
        let response = self
            .client
            .post(MESSAGES_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(request)
            .send()
            .map_err(|error| AiError::Transport(error.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|error| AiError::Transport(error.to_string()))?;
        if status == 429 {
            return Err(AiError::RateLimited);
        }
        let parsed: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
        if !(200..300).contains(&status) {
            let error = parsed.get("error");
            let kind = error
                .and_then(|error| error.get("type"))
                .and_then(Value::as_str)
                .unwrap_or("error");
            let message = error
                .and_then(|error| error.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| truncate_chars(&body, ERROR_NOTE_CHARS));
            return Err(AiError::Http {
                status,
                message: format!("{kind}: {message}"),
            });
        }
        Ok(parsed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkSuggestion {
    pub url: String,
    pub action: DecisionAction,
    pub replacement_url: Option<String>,
    pub notes: String,
}

impl LinkSuggestion {
    fn remove(url: &str, notes: impl Into<String>) -> Self {
        Self {
            url: url.to_string(),
            action: DecisionAction::Remove,
            replacement_url: None,
            notes: notes.into(),
        }
    }

    fn from_json(url: &str, value: &Value) -> Self {
        let replacement_url = value
            .get("url")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|url| !url.is_empty() && *url != "null")
            .map(str::to_string);
        let action = match value.get("action").and_then(Value::as_str) {
            Some(action) if action.eq_ignore_ascii_case("replace") => DecisionAction::Replace,
            _ => DecisionAction::Remove,
        };
        Self {
            url: url.to_string(),
            action,
            replacement_url,
            notes: value
                .get("notes")
                .and_then(Value::as_str)
                .unwrap_or(NO_EXPLANATION)
                .to_string(),
        }
    }

    /// A replace without a usable URL degrades to remove.
    pub fn to_decision(&self) -> Decision {
        let decision = match (self.action, &self.replacement_url) {
            (DecisionAction::Replace, Some(url)) => Decision::replace(url.clone()),
            _ => Decision::remove(),
        };
        decision.with_notes(self.notes.clone()).from_ai()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AltTextSuggestion {
    pub image_url: String,
    pub alt_text: String,
    pub notes: String,
}

/// Outcome of a chunked bulk run. `rate_limited` means the run stopped early.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkSuggestions {
    pub suggestions: Vec<LinkSuggestion>,
    pub rate_limited: bool,
}

pub struct AiSuggester<M: MessagesApi> {
    api: M,
    model: String,
    max_tokens: u32,
}

impl<M: MessagesApi> AiSuggester<M> {
    pub fn new(api: M, model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            api,
            model: model.into(),
            max_tokens,
        }
    }

    pub fn from_config(api: M, config: &SiteConfig) -> Self {
        Self::new(api, config.ai_model(), config.ai_max_tokens())
    }

    pub fn api(&self) -> &M {
        &self.api
    }

    pub fn suggest_link_fix(&mut self, record: &BrokenUrlRecord, domain: &str) -> LinkSuggestion {
        let request = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "tools": [web_search_tool(SINGLE_SEARCH_USES)],
            "messages": [{"role": "user", "content": link_prompt(record, domain)}],
        });
        let text = match self.api.create_message(&request) {
            Ok(response) => response_text(&response),
            Err(error) => {
                warn!(url = %record.url, error = %error, "AI suggestion failed");
                return LinkSuggestion::remove(&record.url, error_note(&error));
            }
        };
        match extract_json(&text, JsonShape::Object) {
            Some(value) => LinkSuggestion::from_json(&record.url, &value),
            None => LinkSuggestion::remove(&record.url, raw_note(&text)),
        }
    }

    /// One request for up to [`MAX_BATCH`] records; answers map back by position.
    pub fn suggest_link_fixes_batch(
        &mut self,
        records: &[BrokenUrlRecord],
        domain: &str,
    ) -> Result<Vec<LinkSuggestion>, AiError> {
        if records.len() > MAX_BATCH {
            return Err(AiError::BatchTooLarge(records.len()));
        }
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let request = json!({
            "model": self.model,
            "max_tokens": BATCH_MAX_TOKENS,
            "tools": [web_search_tool(BATCH_SEARCH_USES)],
            "messages": [{"role": "user", "content": batch_prompt(records, domain)}],
        });
        let text = match self.api.create_message(&request) {
            Ok(response) => response_text(&response),
            Err(error) if error.is_rate_limit() => return Err(AiError::RateLimited),
            Err(error) => {
                warn!(count = records.len(), error = %error, "AI batch failed");
                let note = error_note(&error);
                return Ok(records
                    .iter()
                    .map(|record| LinkSuggestion::remove(&record.url, note.clone()))
                    .collect());
            }
        };
        let Some(Value::Array(answers)) = extract_json(&text, JsonShape::ObjectArray) else {
            return Ok(records
                .iter()
                .map(|record| LinkSuggestion::remove(&record.url, UNPARSED_BATCH_NOTE))
                .collect());
        };
        Ok(records
            .iter()
            .enumerate()
            .map(|(position, record)| match answers.get(position) {
                Some(answer) => LinkSuggestion::from_json(&record.url, answer),
                None => LinkSuggestion::remove(&record.url, MISSING_POSITION_NOTE),
            })
            .collect())
    }

    /// Runs batches of [`MAX_BATCH`] in order, stopping at the first rate limit.
    pub fn suggest_link_fixes(&mut self, records: &[BrokenUrlRecord], domain: &str) -> BulkSuggestions {
        let mut bulk = BulkSuggestions::default();
        for chunk in records.chunks(MAX_BATCH) {
            match self.suggest_link_fixes_batch(chunk, domain) {
                Ok(suggestions) => bulk.suggestions.extend(suggestions),
                Err(_) => {
                    bulk.rate_limited = true;
                    break;
                }
            }
        }
        bulk
    }

    pub fn suggest_alt_text(&mut self, image: &ImageAltRecord, domain: &str) -> AltTextSuggestion {
        let prompt = alt_text_prompt(image, domain);
        let content = if image.image_url.starts_with("http://") || image.image_url.starts_with("https://") {
            json!([
                {"type": "image", "source": {"type": "url", "url": image.image_url}},
                {"type": "text", "text": prompt},
            ])
        } else {
            Value::String(prompt)
        };
        let request = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": [{"role": "user", "content": content}],
        });
        let suggestion = |alt_text: String, notes: String| AltTextSuggestion {
            image_url: image.image_url.clone(),
            alt_text,
            notes,
        };
        let text = match self.api.create_message(&request) {
            Ok(response) => response_text(&response),
            Err(error) => {
                warn!(image = %image.image_url, error = %error, "AI alt text failed");
                let message = error.to_string();
                if message.contains("Could not process image") || message.contains("invalid_request_error") {
                    return suggestion(String::new(), IMAGE_LOAD_NOTE.to_string());
                }
                return suggestion(String::new(), error_note(&error));
            }
        };
        match extract_json(&text, JsonShape::Object) {
            Some(value) => suggestion(
                value
                    .get("alt_text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .trim()
                    .to_string(),
                value
                    .get("notes")
                    .and_then(Value::as_str)
                    .unwrap_or(NO_EXPLANATION)
                    .to_string(),
            ),
            None => suggestion(String::new(), raw_note(&text)),
        }
    }
}

fn web_search_tool(max_uses: u32) -> Value {
    json!({"type": "web_search_20250305", "name": "web_search", "max_uses": max_uses})
}

/// Concatenated text blocks; tool-use blocks are ignored.
fn response_text(response: &Value) -> String {
    response
        .get("content")
        .and_then(Value::as_array)
        .map(|blocks| {
            blocks
                .iter()
                .filter_map(|block| block.get("text").and_then(Value::as_str))
                .collect::<String>()
        })
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy)]
enum JsonShape {
    Object,
    /// Non-empty array of objects, so `[1]` style citations are passed over.
    ObjectArray,
}

impl JsonShape {
    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::Object => value.is_object(),
            Self::ObjectArray => value
                .as_array()
                .is_some_and(|items| !items.is_empty() && items.iter().all(Value::is_object)),
        }
    }

    fn opener(self) -> char {
        match self {
            Self::Object => '{',
            Self::ObjectArray => '[',
        }
    }
}

/// Whole reply, then fenced blocks, then the first complete value found at
/// any opening bracket.
fn extract_json(text: &str, shape: JsonShape) -> Option<Value> {
    let parse = |candidate: &str| {
        serde_json::from_str::<Value>(candidate.trim())
            .ok()
            .filter(|value| shape.accepts(value))
    };
    if let Some(value) = parse(text) {
        return Some(value);
    }
    if let Some(value) = FENCED_JSON
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .find_map(|inner| parse(inner.as_str()))
    {
        return Some(value);
    }
    text.match_indices(shape.opener()).find_map(|(start, _)| {
        serde_json::Deserializer::from_str(&text[start..])
            .into_iter::<Value>()
            .next()?
            .ok()
            .filter(|value| shape.accepts(value))
    })
}

fn raw_note(text: &str) -> String {
    if text.is_empty() {
        UNPARSED_NOTE.to_string()
    } else {
        text.chars().take(RAW_NOTE_CHARS).collect()
    }
}

fn error_note(error: &AiError) -> String {
    let message: String = error.to_string().chars().take(ERROR_NOTE_CHARS).collect();
    format!("Error: {message}")
}

fn quoted_list(values: &[String], limit: usize) -> String {
    let mut text = values
        .iter()
        .take(limit)
        .map(|value| format!("\"{value}\""))
        .collect::<Vec<_>>()
        .join(", ");
    if values.len() > limit {
        text.push_str(&format!(" (+{} more)", values.len() - limit));
    }
    text
}

fn link_kind(record: &BrokenUrlRecord) -> &'static str {
    if record.is_internal { "internal" } else { "external" }
}

fn status_label(record: &BrokenUrlRecord) -> String {
    record
        .status_code
        .map(|code| code.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn link_prompt(record: &BrokenUrlRecord, domain: &str) -> String {
    format!(
        r#"You are helping fix broken links on {domain}.

BROKEN URL: {url}
STATUS: {status} {status_text}
TYPE: {kind}
ANCHOR TEXTS USED: {anchors}
APPEARS ON: {count} page(s)

Your task:
1. If INTERNAL, search {domain} for the same content at a different URL
2. If EXTERNAL, check whether the content moved to a new URL
3. Recommend REMOVE (delete the link, keep the anchor text) or REPLACE (with a specific URL)

Rules:
- Only suggest REPLACE when you found a real working URL
- Default to REMOVE when no good replacement exists
- Keep notes to 1-2 sentences

Respond in JSON:
{{"action": "remove" or "replace", "url": "replacement URL or null", "notes": "brief explanation"}}

Only output the JSON."#,
        url = record.url,
        status = status_label(record),
        status_text = record.status_text,
        kind = link_kind(record),
        anchors = quoted_list(&record.anchor_texts, 5),
        count = record.occurrence_count,
    )
}

fn batch_prompt(records: &[BrokenUrlRecord], domain: &str) -> String {
    let lines = records
        .iter()
        .enumerate()
        .map(|(position, record)| {
            let anchors = if record.anchor_texts.is_empty() {
                "none".to_string()
            } else {
                quoted_list(&record.anchor_texts[..record.anchor_texts.len().min(3)], 3)
            };
            format!(
                "{}. {} (status: {}, type: {}, anchors: {anchors}, affects: {} pages)",
                position + 1,
                record.url,
                status_label(record),
                link_kind(record),
                record.occurrence_count,
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        r#"You are helping fix broken links on {domain}.

Here are {count} broken URLs to analyze:

{lines}

For each URL decide:
- REMOVE: delete the link but keep the anchor text (no good replacement exists)
- REPLACE: point the link at a working URL (only when you found a real replacement)

Use web search to check whether content moved to new URLs.

Respond with a JSON array, one object per URL in the same order:
[
  {{"index": 1, "action": "remove" or "replace", "url": "replacement URL or null", "notes": "one sentence"}},
  ...
]

Only output the JSON array."#,
        count = records.len(),
    )
}

fn alt_text_prompt(image: &ImageAltRecord, domain: &str) -> String {
    let pages = image
        .sources
        .iter()
        .take(3)
        .map(|url| format!("- {url}"))
        .collect::<Vec<_>>()
        .join("\n");
    let current = if image.current_alt.is_empty() {
        "(empty)"
    } else {
        image.current_alt.as_str()
    };
    format!(
        r#"You are helping improve image alt text for SEO on {domain}.

IMAGE URL: {url}
CURRENT ALT TEXT: {current}
ISSUE: {issue} (needs descriptive alt text)
APPEARS ON PAGES:
{pages}

Your task:
1. Look at the image
2. Use the page URLs as context
3. Write descriptive, SEO-friendly alt text

Guidelines:
- Concise but descriptive, 10-125 characters
- Describe what is actually in the image
- Work relevant keywords in naturally
- Do not start with "Image of" or "Picture of"

Respond in JSON:
{{"alt_text": "suggested alt text", "notes": "what you see in the image"}}

Only output the JSON."#,
        url = image.image_url,
        issue = image.alt_status.as_str(),
    )
}
