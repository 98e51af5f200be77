//! WordPress REST client: post lookup, raw content reads, and content and meta writes.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::rewrite::{self, Rewrite};
use crate::transport::{RestReply, RestTransport, error_text};

static SHORTLINK_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)rel=['"]shortlink['"][^>]+href=['"][^'"]*\?p=(\d+)"#)
        .expect("shortlink regex must compile")
});
static BODY_POST_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"postid-(\d+)").expect("postid regex must compile"));
static BODY_PAGE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"page-id-(\d+)").expect("page-id regex must compile"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PostType {
    Posts,
    Pages,
}

impl PostType {
    pub const ALL: [PostType; 2] = [PostType::Posts, PostType::Pages];

    pub fn route(self) -> &'static str {
        match self {
            Self::Posts => "wp/v2/posts",
            Self::Pages => "wp/v2/pages",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupStrategy {
    PostSlug,
    PageSlug,
    Shortlink,
    BodyClass,
}

impl LookupStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PostSlug => "post_slug",
            Self::PageSlug => "page_slug",
            Self::Shortlink => "shortlink",
            Self::BodyClass => "body_class",
        }
    }
}

/// Result of resolving a public URL to a post id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostLookup {
    Found {
        post_id: u64,
        strategy: LookupStrategy,
    },
    NotFound,
    Failed(String),
}

impl PostLookup {
    pub fn post_id(&self) -> Option<u64> {
        match self {
            Self::Found { post_id, .. } => Some(*post_id),
            Self::NotFound | Self::Failed(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub message: String,
    pub user: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostRecord {
    pub id: u64,
    pub post_type: PostType,
    pub title: String,
    pub link: String,
    pub content: String,
}

/// Outcome of one rewrite against a live post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RewriteOutcome {
    pub success: bool,
    pub message: String,
    pub matches: usize,
    pub dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

impl RewriteOutcome {
    fn failed(message: impl Into<String>, dry_run: bool) -> Self {
        Self {
            success: false,
            message: message.into(),
            matches: 0,
            dry_run,
            preview: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RenderedField {
    #[serde(default)]
    raw: Option<String>,
    #[serde(default)]
    rendered: Option<String>,
}

impl RenderedField {
    fn text(self) -> String {
        self.raw.or(self.rendered).unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct PostPayload {
    id: u64,
    #[serde(default)]
    link: String,
    title: Option<RenderedField>,
    content: Option<RenderedField>,
}

#[derive(Debug, Deserialize)]
struct SlugHit {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct CurrentUser {
    name: Option<String>,
    slug: Option<String>,
}

enum RewriteKind<'a> {
    RemoveLink { url: &'a str, keep_anchor_text: bool },
    ReplaceLink { old_url: &'a str, new_url: &'a str },
    AltText { img_src: &'a str, new_alt: &'a str },
}

pub struct WordPressClient<T: RestTransport> {
    transport: T,
    site_url: String,
}

impl<T: RestTransport> WordPressClient<T> {
    pub fn new(transport: T, site_url: &str) -> Self {
        Self {
            transport,
            site_url: site_url.trim().trim_end_matches('/').to_string(),
        }
    }

    pub fn site_url(&self) -> &str {
        &self.site_url
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn request_count(&self) -> usize {
        self.transport.request_count()
    }

    /// `route` is relative to `/wp-json/`, e.g. `wp/v2/posts/12`.
    pub fn api_url(&self, route: &str) -> String {
        format!("{}/wp-json/{}", self.site_url, route.trim_start_matches('/'))
    }

    pub fn get(&mut self, route: &str, query: &[(&str, String)]) -> Result<RestReply> {
        let url = self.api_url(route);
        self.transport.get(&url, query)
    }

    pub fn post(&mut self, route: &str, body: &Value) -> Result<RestReply> {
        let url = self.api_url(route);
        self.transport.post_json(&url, body)
    }

    pub fn test_connection(&mut self) -> ConnectionStatus {
        match self.get("wp/v2/users/me", &[]) {
            Ok(reply) if reply.status == 200 => {
                let user = serde_json::from_str::<CurrentUser>(&reply.body)
                    .ok()
                    .and_then(|user| user.name.or(user.slug))
                    .unwrap_or_else(|| "unknown user".to_string());
                ConnectionStatus {
                    connected: true,
                    message: format!("Connected as {user}"),
                    user: Some(user),
                }
            }
            Ok(reply) if reply.status == 401 => ConnectionStatus {
                connected: false,
                message: "Authentication failed. Check username and application password."
                    .to_string(),
                user: None,
            },
            Ok(reply) => ConnectionStatus {
                connected: false,
                message: format!("Connection failed: HTTP {}", reply.status),
                user: None,
            },
            Err(error) => {
                warn!("connection test failed: {error:#}");
                ConnectionStatus {
                    connected: false,
                    message: format!("Could not connect to {}", self.site_url),
                    user: None,
                }
            }
        }
    }

    /// Slug lookup on posts, then pages, then id markers scraped from the
    /// rendered page. The first strategy that yields an id wins.
    pub fn find_post_id_by_url(&mut self, page_url: &str) -> PostLookup {
        let mut last_error = None;

        if let Some(slug) = slug_from_url(page_url) {
            for (post_type, strategy) in [
                (PostType::Posts, LookupStrategy::PostSlug),
                (PostType::Pages, LookupStrategy::PageSlug),
            ] {
                match self.find_by_slug(&slug, post_type) {
                    Ok(Some(post_id)) => return PostLookup::Found { post_id, strategy },
                    Ok(None) => {}
                    Err(error) => last_error = Some(error_text(&error)),
                }
            }
        }

        match self.transport.get(page_url, &[]) {
            Ok(reply) if reply.is_success() => {
                if let Some((post_id, strategy)) = scrape_post_id(&reply.body) {
                    return PostLookup::Found { post_id, strategy };
                }
            }
            Ok(reply) => debug!(page_url, status = reply.status, "page fetch did not succeed"),
            Err(error) => last_error = Some(error_text(&error)),
        }

        match last_error {
            Some(message) => PostLookup::Failed(message),
            None => PostLookup::NotFound,
        }
    }

    pub fn batch_find_post_ids(&mut self, urls: &[String]) -> BTreeMap<String, PostLookup> {
        urls.iter()
            .map(|url| (url.clone(), self.find_post_id_by_url(url)))
            .collect()
    }

    fn find_by_slug(&mut self, slug: &str, post_type: PostType) -> Result<Option<u64>> {
        let reply = self.get(
            post_type.route(),
            &[("slug", slug.to_string()), ("status", "any".to_string())],
        )?;
        if reply.status != 200 {
            return Ok(None);
        }
        let hits: Vec<SlugHit> = serde_json::from_str(&reply.body).unwrap_or_default();
        Ok(hits.first().map(|hit| hit.id))
    }

    /// Fetches a post with `context=edit`, trying posts then pages.
    pub fn get_post(&mut self, post_id: u64) -> Result<Option<PostRecord>> {
        for post_type in PostType::ALL {
            let reply = self.get(
                &format!("{}/{post_id}", post_type.route()),
                &[("context", "edit".to_string())],
            )?;
            if reply.status != 200 {
                continue;
            }
            let Ok(payload) = serde_json::from_str::<PostPayload>(&reply.body) else {
                continue;
            };
            return Ok(Some(PostRecord {
                id: payload.id,
                post_type,
                title: payload.title.map(RenderedField::text).unwrap_or_default(),
                link: payload.link,
                content: payload.content.map(RenderedField::text).unwrap_or_default(),
            }));
        }
        Ok(None)
    }

    pub fn get_post_content(&mut self, post_id: u64) -> Result<Option<String>> {
        Ok(self.get_post(post_id)?.map(|post| post.content))
    }

    pub fn remove_link(
        &mut self,
        post_id: u64,
        url: &str,
        keep_anchor_text: bool,
        dry_run: bool,
    ) -> RewriteOutcome {
        self.rewrite_post(
            post_id,
            RewriteKind::RemoveLink {
                url,
                keep_anchor_text,
            },
            dry_run,
        )
    }

    pub fn replace_link(
        &mut self,
        post_id: u64,
        old_url: &str,
        new_url: &str,
        dry_run: bool,
    ) -> RewriteOutcome {
        self.rewrite_post(post_id, RewriteKind::ReplaceLink { old_url, new_url }, dry_run)
    }

    pub fn update_alt_text(
        &mut self,
        post_id: u64,
        img_src: &str,
        new_alt: &str,
        dry_run: bool,
    ) -> RewriteOutcome {
        self.rewrite_post(post_id, RewriteKind::AltText { img_src, new_alt }, dry_run)
    }

    fn rewrite_post(&mut self, post_id: u64, kind: RewriteKind<'_>, dry_run: bool) -> RewriteOutcome {
        let content = match self.get_post_content(post_id) {
            Ok(Some(content)) => content,
            Ok(None) => return RewriteOutcome::failed("Could not retrieve post content", dry_run),
            Err(error) => return RewriteOutcome::failed(error_text(&error), dry_run),
        };

        let (rewrite, verb) = match kind {
            RewriteKind::RemoveLink {
                url,
                keep_anchor_text,
            } => match rewrite::remove_links(&content, url, keep_anchor_text) {
                Ok(rewrite) if rewrite.matches == 0 => {
                    return RewriteOutcome::failed("Link not found in content", dry_run);
                }
                Ok(rewrite) => (rewrite, ("Would remove", "Removed", "link(s)")),
                Err(error) => return RewriteOutcome::failed(error_text(&error), dry_run),
            },
            RewriteKind::ReplaceLink { old_url, new_url } => {
                let rewrite = rewrite::replace_literal(&content, old_url, new_url);
                if rewrite.matches == 0 {
                    return RewriteOutcome::failed("URL not found in content", dry_run);
                }
                (rewrite, ("Would replace", "Replaced", "occurrence(s)"))
            }
            RewriteKind::AltText { img_src, new_alt } => {
                let rewrite = rewrite::set_alt_text(&content, img_src, new_alt);
                if rewrite.matches == 0 {
                    return RewriteOutcome::failed("Image not found in content", dry_run);
                }
                if rewrite.content == content {
                    return RewriteOutcome::failed(
                        "No changes made (alt text may already be set)",
                        dry_run,
                    );
                }
                (rewrite, ("Would update", "Updated", "image(s)"))
            }
        };

        let Rewrite {
            content: new_content,
            matches,
        } = rewrite;
        let (planned, done, unit) = verb;

        if dry_run {
            return RewriteOutcome {
                success: true,
                message: format!("{planned} {matches} {unit}"),
                matches,
                dry_run,
                preview: Some(rewrite::preview(&content, &new_content)),
            };
        }

        match self.update_post_content(post_id, &new_content) {
            Ok(reply) if reply.status == 200 => RewriteOutcome {
                success: true,
                message: format!("{done} {matches} {unit}"),
                matches,
                dry_run,
                preview: None,
            },
            Ok(reply) => RewriteOutcome {
                success: false,
                message: format!(
                    "Failed to save post {post_id}: {}",
                    reply
                        .error_message()
                        .unwrap_or_else(|| format!("HTTP {}", reply.status))
                ),
                matches,
                dry_run,
                preview: None,
            },
            Err(error) => RewriteOutcome {
                success: false,
                message: error_text(&error),
                matches,
                dry_run,
                preview: None,
            },
        }
    }

    /// Writes the full body to posts, retrying on pages when that is not a 200.
    pub fn update_post_content(&mut self, post_id: u64, content: &str) -> Result<RestReply> {
        let body = json!({ "content": content });
        let reply = self.post(&format!("{}/{post_id}", PostType::Posts.route()), &body)?;
        if reply.status == 200 {
            return Ok(reply);
        }
        self.post(&format!("{}/{post_id}", PostType::Pages.route()), &body)
    }

    /// Writes registered meta keys, falling back to pages when posts answers 404.
    pub fn update_post_meta(&mut self, post_id: u64, meta: &Value) -> Result<RestReply> {
        let body = json!({ "meta": meta });
        let reply = self.post(&format!("{}/{post_id}", PostType::Posts.route()), &body)?;
        if reply.status != 404 {
            return Ok(reply);
        }
        self.post(&format!("{}/{post_id}", PostType::Pages.route()), &body)
    }

    /// Reads the `meta` object of a post or page, `None` when neither exists.
    pub fn get_post_meta(&mut self, post_id: u64) -> Result<Option<Value>> {
        for post_type in PostType::ALL {
            let reply = self.get(
                &format!("{}/{post_id}", post_type.route()),
                &[("context", "edit".to_string())],
            )?;
            if reply.status == 404 {
                continue;
            }
            if !reply.is_success() {
                anyhow::bail!(
                    "{}",
                    reply
                        .error_message()
                        .unwrap_or_else(|| format!("HTTP {}", reply.status))
                );
            }
            let meta = reply
                .json()
                .and_then(|payload| payload.get("meta").cloned())
                .unwrap_or_else(|| json!({}));
            return Ok(Some(meta));
        }
        Ok(None)
    }
}

/// Last non-empty path segment, used as the WordPress slug.
pub fn slug_from_url(page_url: &str) -> Option<String> {
    let parsed = Url::parse(page_url).ok()?;
    parsed
        .path_segments()?
        .rev()
        .find(|segment| !segment.is_empty())
        .map(str::to_string)
}

fn scrape_post_id(html: &str) -> Option<(u64, LookupStrategy)> {
    let candidates = [
        (&*SHORTLINK_ID, LookupStrategy::Shortlink),
        (&*BODY_POST_ID, LookupStrategy::BodyClass),
        (&*BODY_PAGE_ID, LookupStrategy::BodyClass),
    ];
    candidates.into_iter().find_map(|(regex, strategy)| {
        regex
            .captures(html)
            .and_then(|caps| caps.get(1))
            .and_then(|id| id.as_str().parse::<u64>().ok())
            .map(|id| (id, strategy))
    })
}
