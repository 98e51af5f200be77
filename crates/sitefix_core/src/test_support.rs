use std::collections::{BTreeMap, BTreeSet};

use anyhow::bail;
use serde_json::{Value, json};

use crate::transport::{RestReply, RestTransport};
use crate::wordpress::WordPressClient;

pub const SITE: &str = "https://example.com";

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub method: &'static str,
    pub url: String,
    pub body: Option<Value>,
}

/// In-memory WordPress: canned GET/POST routes plus a posts/pages store that
/// answers `wp/v2/{posts|pages}/{id}` reads and writes.
#[derive(Debug, Default)]
pub struct MockTransport {
    pub get_routes: BTreeMap<String, RestReply>,
    pub post_routes: BTreeMap<String, RestReply>,
    pub posts: BTreeMap<u64, String>,
    pub pages: BTreeMap<u64, String>,
    pub meta: BTreeMap<u64, Value>,
    pub unreachable: BTreeSet<String>,
    pub requests: Vec<RecordedRequest>,
    request_count: usize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// `route` is the full URL, with `?k=v&...` in the order the client sends it.
    pub fn on_get(&mut self, route: &str, status: u16, body: Value) -> &mut Self {
        self.get_routes
            .insert(route.to_string(), RestReply::json_body(status, &body));
        self
    }

    pub fn on_get_text(&mut self, route: &str, status: u16, body: &str) -> &mut Self {
        self.get_routes
            .insert(route.to_string(), RestReply::new(status, body));
        self
    }

    pub fn on_post(&mut self, route: &str, status: u16, body: Value) -> &mut Self {
        self.post_routes
            .insert(route.to_string(), RestReply::json_body(status, &body));
        self
    }

    /// Marks a plugin namespace as installed.
    pub fn with_namespace(&mut self, namespace: &str) -> &mut Self {
        self.on_get(
            &format!("{SITE}/wp-json/{namespace}/"),
            200,
            json!({"namespace": namespace}),
        )
    }

    pub fn content_posts(&self) -> Vec<&RecordedRequest> {
        self.requests
            .iter()
            .filter(|request| {
                request.method == "POST"
                    && request
                        .body
                        .as_ref()
                        .is_some_and(|body| body.get("content").is_some())
            })
            .collect()
    }

    pub fn posted_to(&self, url: &str) -> Vec<&Value> {
        self.requests
            .iter()
            .filter(|request| request.method == "POST" && request.url == url)
            .filter_map(|request| request.body.as_ref())
            .collect()
    }

    fn store_route(url: &str) -> Option<(&'static str, u64)> {
        let tail = url.split("/wp-json/wp/v2/").nth(1)?;
        let (kind, id) = tail.split_once('/')?;
        let id = id.parse::<u64>().ok()?;
        match kind {
            "posts" => Some(("posts", id)),
            "pages" => Some(("pages", id)),
            _ => None,
        }
    }

    fn store(&mut self, kind: &str) -> &mut BTreeMap<u64, String> {
        if kind == "posts" {
            &mut self.posts
        } else {
            &mut self.pages
        }
    }

    fn stored_reply(&mut self, kind: &str, id: u64) -> Option<RestReply> {
        let content = self.store(kind).get(&id)?.clone();
        let meta = self.meta.get(&id).cloned().unwrap_or_else(|| json!({}));
        Some(RestReply::json_body(
            200,
            &json!({
                "id": id,
                "link": format!("{SITE}/{kind}/{id}/"),
                "title": {"raw": format!("Item {id}"), "rendered": format!("Item {id}")},
                "content": {"raw": content, "rendered": content},
                "meta": meta,
            }),
        ))
    }
}

fn route_key(url: &str, query: &[(&str, String)]) -> String {
    if query.is_empty() {
        return url.to_string();
    }
    let pairs: Vec<String> = query
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect();
    format!("{url}?{}", pairs.join("&"))
}

fn not_found() -> RestReply {
    RestReply::json_body(
        404,
        &json!({"code": "rest_no_route", "message": "No route was found matching the URL and request method."}),
    )
}

impl RestTransport for MockTransport {
    fn get(&mut self, url: &str, query: &[(&str, String)]) -> anyhow::Result<RestReply> {
        self.request_count += 1;
        let key = route_key(url, query);
        self.requests.push(RecordedRequest {
            method: "GET",
            url: key.clone(),
            body: None,
        });
        if self.unreachable.contains(url) {
            bail!("connection refused: {url}");
        }
        if let Some(reply) = self.get_routes.get(&key).or_else(|| self.get_routes.get(url)) {
            return Ok(reply.clone());
        }
        if let Some((kind, id)) = Self::store_route(url)
            && let Some(reply) = self.stored_reply(kind, id)
        {
            return Ok(reply);
        }
        Ok(not_found())
    }

    fn post_json(&mut self, url: &str, body: &Value) -> anyhow::Result<RestReply> {
        self.request_count += 1;
        self.requests.push(RecordedRequest {
            method: "POST",
            url: url.to_string(),
            body: Some(body.clone()),
        });
        if self.unreachable.contains(url) {
            bail!("connection refused: {url}");
        }
        if let Some(reply) = self.post_routes.get(url) {
            return Ok(reply.clone());
        }
        if let Some((kind, id)) = Self::store_route(url)
            && self.store(kind).contains_key(&id)
        {
            if let Some(content) = body.get("content").and_then(Value::as_str) {
                self.store(kind).insert(id, content.to_string());
            }
            if let Some(Value::Object(updates)) = body.get("meta") {
                let entry = self.meta.entry(id).or_insert_with(|| json!({}));
                if let Value::Object(existing) = entry {
                    for (key, value) in updates {
                        existing.insert(key.clone(), value.clone());
                    }
                }
            }
            return self
                .stored_reply(kind, id)
                .ok_or_else(|| anyhow::anyhow!("stored item vanished"));
        }
        Ok(not_found())
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

pub fn client(mock: MockTransport) -> WordPressClient<MockTransport> {
    WordPressClient::new(mock, SITE)
}
