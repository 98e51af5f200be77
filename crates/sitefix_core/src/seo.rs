//! Plugin-neutral redirect and meta operations.
//!
//! Every call resolves its handler through the session's [`PluginResolver`]
//! and dispatches to exactly one backend.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::plugins::{
    Capability, DetectedPlugin, PluginResolver, PluginSlug, RedirectListing, SeoMeta,
    rank_math, redirection, yoast,
};
use crate::transport::RestTransport;
use crate::wordpress::WordPressClient;

pub const DEFAULT_REDIRECT_TYPE: u16 = 301;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FixError {
    #[error("no installed SEO plugin supports {}: {hint}", .capability.label())]
    NoCapablePlugin {
        capability: Capability,
        hint: String,
    },
}

impl FixError {
    fn missing(capability: Capability) -> Self {
        let hint = match capability {
            Capability::Redirects => "No SEO plugin installed that supports redirects. Install Rank Math or Redirection plugin to enable this feature.",
            Capability::MetaTags => "No SEO plugin installed that supports meta tags. Install Rank Math or Yoast SEO to enable this feature.",
            Capability::Sitemaps | Capability::Schema => "No SEO plugin installed that supports this feature.",
        };
        Self::NoCapablePlugin {
            capability,
            hint: hint.to_string(),
        }
    }

    fn unsupported(capability: Capability, plugin: &DetectedPlugin) -> Self {
        Self::NoCapablePlugin {
            capability,
            hint: format!(
                "{} provides {} but is not a supported handler. Install Rank Math, Redirection or Yoast SEO.",
                plugin.name,
                capability.label()
            ),
        }
    }
}

/// Backends the fix service can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SeoBackend {
    RankMath,
    Redirection,
    Yoast { premium: bool },
}

impl SeoBackend {
    pub fn from_plugin(plugin: &DetectedPlugin) -> Option<Self> {
        match plugin.slug {
            PluginSlug::RankMath => Some(Self::RankMath),
            PluginSlug::Redirection => Some(Self::Redirection),
            PluginSlug::Yoast => Some(Self::Yoast {
                premium: plugin.is_premium,
            }),
            PluginSlug::Aioseo | PluginSlug::Seopress => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FixOutcome {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub handler: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_id: Option<u64>,
}

impl FixOutcome {
    pub fn succeeded(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn failed(message: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            error: Some(error.into()),
            ..Self::default()
        }
    }

    fn handled_by(mut self, plugin: &DetectedPlugin) -> Self {
        self.handler = Some(plugin.name.clone());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectRequest {
    pub source: String,
    pub target: String,
    #[serde(default = "default_redirect_type")]
    pub redirect_type: u16,
}

fn default_redirect_type() -> u16 {
    DEFAULT_REDIRECT_TYPE
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkRedirectItem {
    pub source: String,
    pub target: String,
    pub outcome: FixOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkRedirectReport {
    pub success: bool,
    pub created: usize,
    pub failed: usize,
    pub handler: Option<String>,
    pub items: Vec<BulkRedirectItem>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RobotsDirectives {
    #[serde(default)]
    pub noindex: bool,
    #[serde(default)]
    pub nofollow: bool,
}

/// Requested meta changes. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub focus_keyword: Option<String>,
    pub canonical: Option<String>,
    pub og_title: Option<String>,
    pub og_description: Option<String>,
    pub twitter_title: Option<String>,
    pub twitter_description: Option<String>,
    pub robots: Option<RobotsDirectives>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapabilityStatus {
    pub capability: Capability,
    pub available: bool,
    pub handler: Option<String>,
    pub status_text: String,
}

pub struct SeoService<'a, T: RestTransport> {
    client: &'a mut WordPressClient<T>,
    plugins: &'a mut PluginResolver,
}

impl<'a, T: RestTransport> SeoService<'a, T> {
    pub fn new(client: &'a mut WordPressClient<T>, plugins: &'a mut PluginResolver) -> Self {
        Self { client, plugins }
    }

    fn backend(&mut self, capability: Capability) -> Result<(SeoBackend, DetectedPlugin), FixError> {
        let plugin = self
            .plugins
            .handler_for(self.client, capability)
            .ok_or_else(|| FixError::missing(capability))?;
        let backend = SeoBackend::from_plugin(&plugin)
            .ok_or_else(|| FixError::unsupported(capability, &plugin))?;
        Ok((backend, plugin))
    }

    pub fn create_redirect(
        &mut self,
        source: &str,
        target: &str,
        redirect_type: u16,
    ) -> Result<FixOutcome, FixError> {
        let (backend, plugin) = self.backend(Capability::Redirects)?;
        let outcome = self.dispatch_redirect(backend, source, target, redirect_type);
        if outcome.success {
            info!(source, target, handler = %plugin.name, "created redirect");
        } else {
            warn!(source, target, handler = %plugin.name, message = %outcome.message, "redirect failed");
        }
        Ok(outcome.handled_by(&plugin))
    }

    fn dispatch_redirect(
        &mut self,
        backend: SeoBackend,
        source: &str,
        target: &str,
        redirect_type: u16,
    ) -> FixOutcome {
        match backend {
            SeoBackend::RankMath => {
                rank_math::create_redirect(self.client, source, target, redirect_type)
            }
            SeoBackend::Redirection => {
                redirection::create_redirect(self.client, source, target, redirect_type)
            }
            SeoBackend::Yoast { premium } => {
                yoast::create_redirect(self.client, premium, source, target, redirect_type)
            }
        }
    }

    /// Sequential and non-atomic: earlier creations stay when a later one fails.
    pub fn bulk_create_redirects(
        &mut self,
        requests: &[RedirectRequest],
    ) -> Result<BulkRedirectReport, FixError> {
        let (backend, plugin) = self.backend(Capability::Redirects)?;
        let mut report = BulkRedirectReport {
            handler: Some(plugin.name.clone()),
            ..BulkRedirectReport::default()
        };
        for request in requests {
            let source = request.source.trim();
            let target = request.target.trim();
            let outcome = if source.is_empty() || target.is_empty() {
                let error = format!("Invalid redirect: source={source:?} target={target:?}");
                FixOutcome::failed(error.clone(), error)
            } else {
                self.dispatch_redirect(backend, source, target, request.redirect_type)
            };
            if outcome.success {
                report.created += 1;
            } else {
                report.failed += 1;
                let error = outcome.error.clone().unwrap_or_else(|| outcome.message.clone());
                if error.starts_with("Invalid redirect") {
                    report.errors.push(error);
                } else {
                    report.errors.push(format!("{source}: {error}"));
                }
            }
            report.items.push(BulkRedirectItem {
                source: source.to_string(),
                target: target.to_string(),
                outcome: outcome.handled_by(&plugin),
            });
        }
        report.success = report.failed == 0;
        info!(
            created = report.created,
            failed = report.failed,
            handler = %plugin.name,
            "bulk redirect run finished"
        );
        Ok(report)
    }

    pub fn list_redirects(
        &mut self,
        page: u32,
        per_page: u32,
    ) -> Result<Result<RedirectListing, String>, FixError> {
        let (backend, _) = self.backend(Capability::Redirects)?;
        Ok(match backend {
            SeoBackend::RankMath => rank_math::list_redirects(self.client, page, per_page),
            SeoBackend::Redirection => redirection::list_redirects(self.client, page, per_page),
            SeoBackend::Yoast { premium } => {
                yoast::list_redirects(self.client, premium, page, per_page)
            }
        })
    }

    pub fn update_meta(&mut self, post_id: u64, update: &MetaUpdate) -> Result<FixOutcome, FixError> {
        let (backend, plugin) = self.backend(Capability::MetaTags)?;
        let outcome = match backend {
            SeoBackend::RankMath => rank_math::update_meta(self.client, post_id, update),
            SeoBackend::Yoast { .. } => yoast::update_meta(self.client, post_id, update),
            SeoBackend::Redirection => return Err(FixError::unsupported(Capability::MetaTags, &plugin)),
        };
        if outcome.success {
            info!(post_id, handler = %plugin.name, "updated meta");
        } else {
            warn!(post_id, handler = %plugin.name, message = %outcome.message, "meta update failed");
        }
        Ok(outcome.handled_by(&plugin))
    }

    pub fn get_meta(&mut self, post_id: u64) -> Result<Result<SeoMeta, String>, FixError> {
        let (backend, plugin) = self.backend(Capability::MetaTags)?;
        Ok(match backend {
            SeoBackend::RankMath => rank_math::get_meta(self.client, post_id),
            SeoBackend::Yoast { .. } => yoast::get_meta(self.client, post_id),
            SeoBackend::Redirection => {
                return Err(FixError::unsupported(Capability::MetaTags, &plugin));
            }
        })
    }

    pub fn capability_status(&mut self) -> Vec<CapabilityStatus> {
        let summary = self.plugins.summary(self.client);
        let rows = [
            (
                Capability::Redirects,
                summary.redirect_handler,
                "Install Rank Math or Redirection plugin",
            ),
            (
                Capability::MetaTags,
                summary.meta_handler,
                "Install Rank Math or Yoast SEO",
            ),
        ];
        rows.into_iter()
            .map(|(capability, handler, install)| CapabilityStatus {
                capability,
                available: handler.is_some(),
                status_text: handler
                    .as_ref()
                    .map(|name| format!("Using {name}"))
                    .unwrap_or_else(|| install.to_string()),
                handler,
            })
            .collect()
    }

    pub fn missing_capabilities_message(&mut self) -> Option<String> {
        self.plugins.summary(self.client).missing_capabilities_message()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockTransport, SITE, client};
    use serde_json::json;

    fn service_fixture(namespaces: &[&str]) -> (WordPressClient<MockTransport>, PluginResolver) {
        let mut mock = MockTransport::new();
        for namespace in namespaces {
            mock.with_namespace(namespace);
        }
        (client(mock), PluginResolver::new())
    }

    #[test]
    fn no_plugin_is_a_typed_error() {
        let (mut wp, mut resolver) = service_fixture(&[]);
        let mut service = SeoService::new(&mut wp, &mut resolver);
        let error = service
            .create_redirect("/a", "/b", 301)
            .expect_err("must fail");
        assert!(matches!(
            &error,
            FixError::NoCapablePlugin { capability: Capability::Redirects, hint }
                if hint.contains("Rank Math or Redirection")
        ));
        assert!(matches!(
            service.update_meta(1, &MetaUpdate::default()),
            Err(FixError::NoCapablePlugin {
                capability: Capability::MetaTags,
                ..
            })
        ));
    }

    #[test]
    fn rank_math_wins_redirects_over_redirection() {
        let (mut wp, mut resolver) = service_fixture(&["redirection/v1", "rankmath/v1"]);
        wp.transport_mut().on_post(
            &format!("{SITE}/wp-json/rankmath/v1/redirections"),
            200,
            json!({"id": 1}),
        );
        let mut service = SeoService::new(&mut wp, &mut resolver);
        let outcome = service.create_redirect("/a", "/b", 301).expect("handler");
        assert!(outcome.success);
        assert_eq!(outcome.handler.as_deref(), Some("Rank Math"));
        assert!(
            wp.transport()
                .posted_to(&format!("{SITE}/wp-json/redirection/v1/redirect"))
                .is_empty()
        );
    }

    #[test]
    fn aioseo_redirects_are_reported_unsupported() {
        let (mut wp, mut resolver) = service_fixture(&["aioseo/v1"]);
        wp.transport_mut()
            .on_get(&format!("{SITE}/wp-json/aioseo/v1/redirects"), 200, json!([]));
        let mut service = SeoService::new(&mut wp, &mut resolver);
        let error = service.create_redirect("/a", "/b", 301).expect_err("unsupported");
        assert!(error.to_string().contains("All in One SEO"));
    }

    #[test]
    fn bulk_continues_past_invalid_and_failed_items() {
        let (mut wp, mut resolver) = service_fixture(&["redirection/v1"]);
        wp.transport_mut().on_post(
            &format!("{SITE}/wp-json/redirection/v1/redirect"),
            200,
            json!({"id": 5}),
        );
        let requests = vec![
            RedirectRequest {
                source: "/one".to_string(),
                target: "/uno".to_string(),
                redirect_type: 301,
            },
            RedirectRequest {
                source: "  ".to_string(),
                target: "/nowhere".to_string(),
                redirect_type: 301,
            },
            RedirectRequest {
                source: "/two".to_string(),
                target: "/dos".to_string(),
                redirect_type: 302,
            },
        ];
        let mut service = SeoService::new(&mut wp, &mut resolver);
        let report = service.bulk_create_redirects(&requests).expect("handler");
        assert!(!report.success);
        assert_eq!(report.created, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.items.len(), 3);
        assert!(report.errors[0].starts_with("Invalid redirect"));
        assert_eq!(report.handler.as_deref(), Some("Redirection"));
    }

    #[test]
    fn meta_routes_to_yoast_when_rank_math_absent() {
        let (mut wp, mut resolver) = service_fixture(&["yoast/v1", "redirection/v1"]);
        wp.transport_mut().posts.insert(12, String::new());
        let mut service = SeoService::new(&mut wp, &mut resolver);
        let update = MetaUpdate {
            title: Some("New title".to_string()),
            ..MetaUpdate::default()
        };
        let outcome = service.update_meta(12, &update).expect("handler");
        assert!(outcome.success, "{}", outcome.message);
        assert_eq!(outcome.handler.as_deref(), Some("Yoast SEO"));
        let meta = service.get_meta(12).expect("handler").expect("meta");
        assert_eq!(meta["title"], "New title");
        assert!(service.missing_capabilities_message().is_none());
    }

    #[test]
    fn capability_status_names_handlers() {
        let (mut wp, mut resolver) = service_fixture(&["redirection/v1"]);
        let mut service = SeoService::new(&mut wp, &mut resolver);
        let status = service.capability_status();
        assert_eq!(status[0].status_text, "Using Redirection");
        assert!(!status[1].available);
        assert_eq!(status[1].status_text, "Install Rank Math or Yoast SEO");
    }
}
