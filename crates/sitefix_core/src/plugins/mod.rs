//! SEO plugin detection and per-capability handler selection.
//!
//! Each known plugin is probed once per connection by GETting the root of its
//! REST namespace. Any status other than 404 counts as installed, since an
//! auth-protected namespace still answers 401/403.

pub mod rank_math;
pub mod redirection;
pub mod yoast;

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::seo::FixOutcome;
use crate::transport::{RestReply, RestTransport, error_text};
use crate::wordpress::WordPressClient;

/// Plugin-neutral meta field name to current value.
pub type SeoMeta = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Redirects,
    MetaTags,
    Sitemaps,
    Schema,
}

impl Capability {
    pub fn label(self) -> &'static str {
        match self {
            Self::Redirects => "redirects",
            Self::MetaTags => "meta tags",
            Self::Sitemaps => "sitemaps",
            Self::Schema => "schema",
        }
    }

    /// Remediation shown when no detected plugin provides this capability.
    pub fn install_hint(self) -> Option<&'static str> {
        match self {
            Self::Redirects => {
                Some("Install Rank Math or Redirection plugin to enable automatic redirects")
            }
            Self::MetaTags => Some("Install Rank Math or Yoast SEO to enable meta tag updates"),
            Self::Sitemaps | Self::Schema => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginSlug {
    RankMath,
    Yoast,
    Redirection,
    Aioseo,
    Seopress,
}

impl PluginSlug {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RankMath => "rank_math",
            Self::Yoast => "yoast",
            Self::Redirection => "redirection",
            Self::Aioseo => "aioseo",
            Self::Seopress => "seopress",
        }
    }
}

pub struct PluginDef {
    pub slug: PluginSlug,
    pub name: &'static str,
    /// REST namespace, e.g. `rankmath/v1`.
    pub namespace: &'static str,
    pub capabilities: &'static [Capability],
    pub premium_route: Option<&'static str>,
    pub premium_capabilities: &'static [Capability],
}

pub const PLUGIN_TABLE: &[PluginDef] = &[
    PluginDef {
        slug: PluginSlug::RankMath,
        name: "Rank Math",
        namespace: "rankmath/v1",
        capabilities: &[
            Capability::Redirects,
            Capability::MetaTags,
            Capability::Sitemaps,
            Capability::Schema,
        ],
        premium_route: None,
        premium_capabilities: &[],
    },
    PluginDef {
        slug: PluginSlug::Yoast,
        name: "Yoast SEO",
        namespace: "yoast/v1",
        capabilities: &[Capability::MetaTags, Capability::Sitemaps, Capability::Schema],
        premium_route: Some("yoast/v1/redirects"),
        premium_capabilities: &[Capability::Redirects],
    },
    PluginDef {
        slug: PluginSlug::Redirection,
        name: "Redirection",
        namespace: "redirection/v1",
        capabilities: &[Capability::Redirects],
        premium_route: None,
        premium_capabilities: &[],
    },
    PluginDef {
        slug: PluginSlug::Aioseo,
        name: "All in One SEO",
        namespace: "aioseo/v1",
        capabilities: &[Capability::MetaTags, Capability::Sitemaps, Capability::Schema],
        premium_route: Some("aioseo/v1/redirects"),
        premium_capabilities: &[Capability::Redirects],
    },
    PluginDef {
        slug: PluginSlug::Seopress,
        name: "SEOPress",
        namespace: "seopress/v1",
        capabilities: &[Capability::MetaTags, Capability::Sitemaps],
        premium_route: None,
        premium_capabilities: &[],
    },
];

pub const REDIRECT_PRIORITY: &[PluginSlug] = &[
    PluginSlug::RankMath,
    PluginSlug::Redirection,
    PluginSlug::Yoast,
    PluginSlug::Aioseo,
];

pub const META_PRIORITY: &[PluginSlug] = &[
    PluginSlug::RankMath,
    PluginSlug::Yoast,
    PluginSlug::Aioseo,
    PluginSlug::Seopress,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectedPlugin {
    pub name: String,
    pub slug: PluginSlug,
    pub is_premium: bool,
    pub capabilities: BTreeSet<Capability>,
    pub api_base: String,
}

impl DetectedPlugin {
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Present(u16),
    Absent,
    Unreachable(String),
}

impl ProbeOutcome {
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }
}

pub fn probe<T: RestTransport>(client: &mut WordPressClient<T>, route: &str) -> ProbeOutcome {
    match client.get(route, &[]) {
        Ok(reply) if reply.status == 404 => ProbeOutcome::Absent,
        Ok(reply) => ProbeOutcome::Present(reply.status),
        Err(error) => ProbeOutcome::Unreachable(error_text(&error)),
    }
}

/// First plugin in `priority` order that was detected and declares `capability`.
pub fn select_handler<'a>(
    plugins: &'a [DetectedPlugin],
    priority: &[PluginSlug],
    capability: Capability,
) -> Option<&'a DetectedPlugin> {
    priority.iter().find_map(|slug| {
        plugins
            .iter()
            .find(|plugin| plugin.slug == *slug && plugin.supports(capability))
    })
}

pub fn priority_for(capability: Capability) -> &'static [PluginSlug] {
    match capability {
        Capability::Redirects => REDIRECT_PRIORITY,
        Capability::MetaTags | Capability::Sitemaps | Capability::Schema => META_PRIORITY,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginSummary {
    pub plugins: Vec<DetectedPlugin>,
    pub redirect_handler: Option<String>,
    pub meta_handler: Option<String>,
    pub recommendations: Vec<String>,
}

impl PluginSummary {
    pub fn from_plugins(plugins: &[DetectedPlugin]) -> Self {
        let redirect = select_handler(plugins, REDIRECT_PRIORITY, Capability::Redirects);
        let meta = select_handler(plugins, META_PRIORITY, Capability::MetaTags);
        let mut recommendations = Vec::new();
        for (handler, capability) in [
            (redirect, Capability::Redirects),
            (meta, Capability::MetaTags),
        ] {
            if handler.is_none()
                && let Some(hint) = capability.install_hint()
            {
                recommendations.push(hint.to_string());
            }
        }
        Self {
            plugins: plugins.to_vec(),
            redirect_handler: redirect.map(|plugin| plugin.name.clone()),
            meta_handler: meta.map(|plugin| plugin.name.clone()),
            recommendations,
        }
    }

    pub fn missing_capabilities_message(&self) -> Option<String> {
        match (self.redirect_handler.is_some(), self.meta_handler.is_some()) {
            (true, true) => None,
            (false, true) => Some(
                "Install Rank Math or Redirection plugin to enable automatic redirect creation for broken links."
                    .to_string(),
            ),
            (true, false) => {
                Some("Install Rank Math or Yoast SEO to enable automatic meta tag updates.".to_string())
            }
            (false, false) => Some(
                "Install Rank Math to enable both redirect creation and meta tag updates, or install individual plugins (Redirection for redirects, Yoast for meta tags)."
                    .to_string(),
            ),
        }
    }
}

/// Detection cache for one connected site.
#[derive(Debug, Default)]
pub struct PluginResolver {
    detected: Option<Vec<DetectedPlugin>>,
}

impl PluginResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Probes every known plugin unless a cached result exists and `force` is false.
    pub fn detect_all<T: RestTransport>(
        &mut self,
        client: &mut WordPressClient<T>,
        force: bool,
    ) -> &[DetectedPlugin] {
        if force || self.detected.is_none() {
            let detected = detect_plugins(client);
            info!(count = detected.len(), "detected SEO plugins");
            self.detected = Some(detected);
        }
        self.detected.as_deref().unwrap_or(&[])
    }

    pub fn cached(&self) -> Option<&[DetectedPlugin]> {
        self.detected.as_deref()
    }

    pub fn invalidate(&mut self) {
        self.detected = None;
    }

    pub fn handler_for<T: RestTransport>(
        &mut self,
        client: &mut WordPressClient<T>,
        capability: Capability,
    ) -> Option<DetectedPlugin> {
        let plugins = self.detect_all(client, false);
        select_handler(plugins, priority_for(capability), capability).cloned()
    }

    pub fn redirect_handler<T: RestTransport>(
        &mut self,
        client: &mut WordPressClient<T>,
    ) -> Option<DetectedPlugin> {
        self.handler_for(client, Capability::Redirects)
    }

    pub fn meta_handler<T: RestTransport>(
        &mut self,
        client: &mut WordPressClient<T>,
    ) -> Option<DetectedPlugin> {
        self.handler_for(client, Capability::MetaTags)
    }

    pub fn summary<T: RestTransport>(&mut self, client: &mut WordPressClient<T>) -> PluginSummary {
        PluginSummary::from_plugins(self.detect_all(client, false))
    }
}

fn detect_plugins<T: RestTransport>(client: &mut WordPressClient<T>) -> Vec<DetectedPlugin> {
    let mut detected = Vec::new();
    for entry in PLUGIN_TABLE {
        let outcome = probe(client, &format!("{}/", entry.namespace));
        debug!(plugin = entry.slug.as_str(), ?outcome, "plugin probe");
        if !outcome.is_present() {
            continue;
        }
        let mut capabilities: BTreeSet<Capability> = entry.capabilities.iter().copied().collect();
        let is_premium = entry
            .premium_route
            .is_some_and(|route| probe(client, route).is_present());
        if is_premium {
            capabilities.extend(entry.premium_capabilities.iter().copied());
        }
        detected.push(DetectedPlugin {
            name: entry.name.to_string(),
            slug: entry.slug,
            is_premium,
            capabilities,
            api_base: format!("/wp-json/{}", entry.namespace),
        });
    }
    detected
}

/// One redirect rule as reported by a plugin, normalized across layouts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RedirectEntry {
    pub id: Option<u64>,
    pub source: String,
    pub target: String,
    pub redirect_type: Option<u16>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RedirectListing {
    pub redirects: Vec<RedirectEntry>,
    pub total: usize,
}

/// Normalizes a plugin REST reply: 2xx yields the JSON body (`Null` when
/// empty), everything else one error string.
pub(crate) fn interpret(
    reply: Result<RestReply>,
    not_found: &str,
) -> std::result::Result<Value, String> {
    let reply = reply.map_err(|error| error_text(&error))?;
    match reply.status {
        200 | 201 => Ok(reply.json().unwrap_or(Value::Null)),
        204 => Ok(Value::Null),
        401 => Err("Authentication failed".to_string()),
        403 => Err("Permission denied".to_string()),
        404 => Err(not_found.to_string()),
        status => Err(reply
            .error_message()
            .unwrap_or_else(|| format!("HTTP {status}"))),
    }
}

/// Path part of a redirect source: the site origin is stripped and a leading
/// `/` forced.
pub fn source_path(site_url: &str, source: &str) -> String {
    let trimmed = source.trim();
    let path = trimmed.strip_prefix(site_url).unwrap_or(trimmed);
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

/// Posts plugin meta keys through the core posts/pages endpoint.
pub(crate) fn write_meta<T: RestTransport>(
    client: &mut WordPressClient<T>,
    post_id: u64,
    fields: Map<String, Value>,
) -> FixOutcome {
    if fields.is_empty() {
        return FixOutcome::failed("No meta data provided to update", "empty_update");
    }
    match client.update_post_meta(post_id, &Value::Object(fields)) {
        Ok(reply) if matches!(reply.status, 200 | 201) => {
            FixOutcome::succeeded(format!("Updated meta for post #{post_id}"))
        }
        Ok(reply) => {
            let error = reply
                .error_message()
                .unwrap_or_else(|| format!("HTTP {}", reply.status));
            FixOutcome::failed(format!("Failed to update meta: {error}"), error)
        }
        Err(error) => {
            let error = error_text(&error);
            FixOutcome::failed(format!("Error updating meta: {error}"), error)
        }
    }
}

/// Reads `(field, meta_key)` pairs from a post's meta, missing keys as "".
pub(crate) fn read_meta<T: RestTransport>(
    client: &mut WordPressClient<T>,
    post_id: u64,
    keys: &[(&str, &str)],
) -> std::result::Result<SeoMeta, String> {
    let meta = match client.get_post_meta(post_id) {
        Ok(Some(meta)) => meta,
        Ok(None) => return Err(format!("Could not fetch post #{post_id}")),
        Err(error) => return Err(error_text(&error)),
    };
    Ok(keys
        .iter()
        .map(|(field, key)| ((*field).to_string(), meta_text(&meta, key)))
        .collect())
}

fn meta_text(meta: &Value, key: &str) -> String {
    match meta.get(key) {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

pub(crate) fn json_u64(value: &Value, key: &str) -> Option<u64> {
    match value.get(key)? {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn json_str(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

pub(crate) fn json_code(value: &Value, key: &str) -> Option<u16> {
    json_u64(value, key).and_then(|code| u16::try_from(code).ok())
}
