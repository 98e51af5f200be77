//! Sequential application of decided fixes, one CMS rewrite per source page.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{info, warn};

use crate::crawl::{BrokenUrlRecord, ImageAltRecord, RedirectChainRecord};
use crate::session::{DecisionAction, SessionContext, is_archive_url};
use crate::transport::RestTransport;
use crate::wordpress::{PostLookup, RewriteOutcome, WordPressClient};

pub const ARCHIVE_SKIP_MESSAGE: &str = "Archive/category page - fix individual posts instead";
pub const POST_ID_NOT_FOUND: &str = "Post ID not found";

#[derive(Debug, Clone)]
pub struct ApplyOptions {
    pub dry_run: bool,
    /// Unwraps removed links instead of deleting the whole element.
    pub keep_anchor_text: bool,
    /// Restricts the run to these source pages when set.
    pub only_pages: Option<BTreeSet<String>>,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            keep_anchor_text: true,
            only_pages: None,
        }
    }
}

impl ApplyOptions {
    fn includes(&self, source_url: &str) -> bool {
        self.only_pages
            .as_ref()
            .is_none_or(|pages| pages.contains(source_url))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FixAction {
    Remove,
    Replace,
    AltText,
}

impl FixAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Remove => "remove",
            Self::Replace => "replace",
            Self::AltText => "alt_text",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyStatus {
    Success,
    Skipped,
    Failed,
}

impl ApplyStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplyItem {
    pub source_url: String,
    pub target_url: String,
    pub action: FixAction,
    /// New URL for replacements, new alt text for image fixes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replacement: Option<String>,
    pub post_id: Option<u64>,
    pub status: ApplyStatus,
    pub matches: usize,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub dry_run: bool,
    pub items: Vec<ApplyItem>,
    pub success: usize,
    pub skipped: usize,
    pub failed: usize,
    pub total_matches: usize,
    /// Set when the caller stopped the run before every fix was attempted.
    pub interrupted: bool,
}

impl ApplyReport {
    fn push(&mut self, item: ApplyItem) {
        match item.status {
            ApplyStatus::Success => {
                self.success += 1;
                self.total_matches += item.matches;
            }
            ApplyStatus::Skipped => self.skipped += 1,
            ApplyStatus::Failed => self.failed += 1,
        }
        self.items.push(item);
    }
}

/// Returned by the per-item callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyFlow {
    Continue,
    Stop,
}

struct PlannedFix {
    source_url: String,
    target_url: String,
    action: FixAction,
    replacement: Option<String>,
    known_post_id: Option<u64>,
}

/// Applies every non-skip decision for `records` to each of its source pages.
pub fn apply_link_fixes<T: RestTransport>(
    client: &mut WordPressClient<T>,
    session: &mut SessionContext,
    records: &[BrokenUrlRecord],
    options: &ApplyOptions,
    on_item: &mut dyn FnMut(&ApplyItem) -> ApplyFlow,
) -> ApplyReport {
    let mut fixes = Vec::new();
    for record in records {
        let Some(decision) = session.decisions.get(&record.url) else {
            continue;
        };
        let (action, replacement) = match decision.action {
            DecisionAction::Skip => continue,
            DecisionAction::Remove => (FixAction::Remove, None),
            DecisionAction::Replace => match decision.replacement() {
                Some(url) => (FixAction::Replace, Some(url.to_string())),
                None => continue,
            },
        };
        for source in &record.source_pages {
            if !options.includes(source) {
                continue;
            }
            fixes.push(PlannedFix {
                source_url: source.clone(),
                target_url: record.url.clone(),
                action,
                replacement: replacement.clone(),
                known_post_id: record.source_post_ids.get(source).copied(),
            });
        }
    }
    run_fixes(client, session, fixes, options, on_item)
}

/// Points content links at the end of their redirect chain. Records decided
/// as skip are left alone.
pub fn apply_redirect_chain_fixes<T: RestTransport>(
    client: &mut WordPressClient<T>,
    session: &mut SessionContext,
    records: &[RedirectChainRecord],
    options: &ApplyOptions,
    on_item: &mut dyn FnMut(&ApplyItem) -> ApplyFlow,
) -> ApplyReport {
    let mut fixes = Vec::new();
    for record in records {
        let skipped = session
            .decisions
            .get(&record.address)
            .is_some_and(|decision| decision.action == DecisionAction::Skip);
        if skipped || record.final_address.is_empty() || record.final_address == record.address {
            continue;
        }
        for source in &record.sources {
            if !options.includes(source) {
                continue;
            }
            fixes.push(PlannedFix {
                source_url: source.clone(),
                target_url: record.address.clone(),
                action: FixAction::Replace,
                replacement: Some(record.final_address.clone()),
                known_post_id: record.source_post_ids.get(source).copied(),
            });
        }
    }
    run_fixes(client, session, fixes, options, on_item)
}

/// Writes the chosen alt text, keyed by image URL, into every page using the image.
pub fn apply_alt_text_fixes<T: RestTransport>(
    client: &mut WordPressClient<T>,
    session: &mut SessionContext,
    images: &[ImageAltRecord],
    alt_texts: &BTreeMap<String, String>,
    options: &ApplyOptions,
    on_item: &mut dyn FnMut(&ApplyItem) -> ApplyFlow,
) -> ApplyReport {
    let mut fixes = Vec::new();
    for image in images {
        let Some(new_alt) = alt_texts
            .get(&image.image_url)
            .map(|alt| alt.trim())
            .filter(|alt| !alt.is_empty())
        else {
            continue;
        };
        for source in &image.sources {
            if !options.includes(source) {
                continue;
            }
            fixes.push(PlannedFix {
                source_url: source.clone(),
                target_url: image.image_url.clone(),
                action: FixAction::AltText,
                replacement: Some(new_alt.to_string()),
                known_post_id: image.source_post_ids.get(source).copied(),
            });
        }
    }
    run_fixes(client, session, fixes, options, on_item)
}

fn run_fixes<T: RestTransport>(
    client: &mut WordPressClient<T>,
    session: &mut SessionContext,
    fixes: Vec<PlannedFix>,
    options: &ApplyOptions,
    on_item: &mut dyn FnMut(&ApplyItem) -> ApplyFlow,
) -> ApplyReport {
    let mut report = ApplyReport {
        dry_run: options.dry_run,
        ..ApplyReport::default()
    };
    let total = fixes.len();

    for (position, fix) in fixes.into_iter().enumerate() {
        let item = apply_one(client, session, fix, options);
        match item.status {
            ApplyStatus::Success => info!(
                source = %item.source_url,
                target = %item.target_url,
                action = item.action.as_str(),
                matches = item.matches,
                dry_run = options.dry_run,
                "applied fix"
            ),
            ApplyStatus::Skipped | ApplyStatus::Failed => warn!(
                source = %item.source_url,
                target = %item.target_url,
                status = item.status.as_str(),
                message = %item.message,
                "fix not applied"
            ),
        }
        let flow = on_item(&item);
        report.push(item);
        if flow == ApplyFlow::Stop && position + 1 < total {
            report.interrupted = true;
            break;
        }
    }
    report
}

fn apply_one<T: RestTransport>(
    client: &mut WordPressClient<T>,
    session: &mut SessionContext,
    fix: PlannedFix,
    options: &ApplyOptions,
) -> ApplyItem {
    let mut item = ApplyItem {
        source_url: fix.source_url,
        target_url: fix.target_url,
        action: fix.action,
        replacement: fix.replacement,
        post_id: None,
        status: ApplyStatus::Failed,
        matches: 0,
        message: String::new(),
        preview: None,
    };

    let post_id = match resolve_post_id(client, session, &item.source_url, fix.known_post_id) {
        Ok(post_id) => post_id,
        Err((status, message)) => {
            item.status = status;
            item.message = message;
            return item;
        }
    };
    item.post_id = Some(post_id);

    let replacement = item.replacement.as_deref().unwrap_or_default();
    let outcome: RewriteOutcome = match item.action {
        FixAction::Remove => {
            client.remove_link(post_id, &item.target_url, options.keep_anchor_text, options.dry_run)
        }
        FixAction::Replace => {
            client.replace_link(post_id, &item.target_url, replacement, options.dry_run)
        }
        FixAction::AltText => {
            client.update_alt_text(post_id, &item.target_url, replacement, options.dry_run)
        }
    };
    item.status = if outcome.success {
        ApplyStatus::Success
    } else {
        ApplyStatus::Failed
    };
    item.matches = outcome.matches;
    item.message = outcome.message;
    item.preview = outcome.preview;
    item
}

fn resolve_post_id<T: RestTransport>(
    client: &mut WordPressClient<T>,
    session: &mut SessionContext,
    source_url: &str,
    known_post_id: Option<u64>,
) -> Result<u64, (ApplyStatus, String)> {
    if let Some(post_id) = known_post_id.or_else(|| session.post_ids.get(source_url)) {
        return Ok(post_id);
    }
    match client.find_post_id_by_url(source_url) {
        PostLookup::Found { post_id, .. } => {
            session.post_ids.insert(source_url, post_id);
            Ok(post_id)
        }
        PostLookup::NotFound if is_archive_url(source_url) => {
            Err((ApplyStatus::Skipped, ARCHIVE_SKIP_MESSAGE.to_string()))
        }
        PostLookup::NotFound => Err((ApplyStatus::Skipped, POST_ID_NOT_FOUND.to_string())),
        PostLookup::Failed(message) => Err((ApplyStatus::Failed, message)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawl::AltStatus;
    use crate::session::Decision;
    use crate::test_support::{MockTransport, SITE, client};
    use serde_json::json;

    fn record(url: &str, sources: &[(&str, Option<u64>)]) -> BrokenUrlRecord {
        BrokenUrlRecord {
            url: url.to_string(),
            status_code: Some(404),
            status_text: "Not Found".to_string(),
            is_internal: true,
            anchor_texts: vec!["here".to_string()],
            occurrence_count: sources.len(),
            source_pages: sources.iter().map(|(url, _)| url.to_string()).collect(),
            source_post_ids: sources
                .iter()
                .filter_map(|(url, id)| id.map(|id| (url.to_string(), id)))
                .collect(),
        }
    }

    fn keep_going(_: &ApplyItem) -> ApplyFlow {
        ApplyFlow::Continue
    }

    #[test]
    fn removes_across_pages_and_resolves_ids_by_slug() {
        let dead = "https://example.com/dead";
        let mut mock = MockTransport::new();
        mock.posts
            .insert(1, format!(r#"<p>See <a href="{dead}">this</a>.</p>"#));
        mock.posts
            .insert(2, format!(r#"<p><a href="{dead}">one</a> <a href="{dead}">two</a></p>"#));
        mock.on_get(
            &format!("{SITE}/wp-json/wp/v2/posts?slug=second&status=any"),
            200,
            json!([{"id": 2}]),
        );
        let mut wp = client(mock);
        let mut session = SessionContext::new();
        session.decisions.record(dead, Decision::remove()).expect("record");

        let records = [record(
            dead,
            &[
                ("https://example.com/first/", Some(1)),
                ("https://example.com/second/", None),
            ],
        )];
        let report = apply_link_fixes(
            &mut wp,
            &mut session,
            &records,
            &ApplyOptions {
                keep_anchor_text: true,
                ..ApplyOptions::default()
            },
            &mut keep_going,
        );
        assert_eq!(report.success, 2);
        assert_eq!(report.total_matches, 3);
        assert_eq!(session.post_ids.get("https://example.com/second/"), Some(2));
        assert_eq!(wp.transport().posts[&2], "<p>one two</p>");
        assert_eq!(wp.transport().content_posts().len(), 2);
    }

    #[test]
    fn default_options_keep_anchor_text() {
        let options = ApplyOptions::default();
        assert!(options.keep_anchor_text);
        assert!(!options.dry_run);

        let mut mock = MockTransport::new();
        mock.posts.insert(
            1,
            r#"<p>See <a href="https://example.com/dead">our guide</a>.</p>"#.to_string(),
        );
        let mut wp = client(mock);
        let mut session = SessionContext::new();
        session
            .decisions
            .record("https://example.com/dead", Decision::remove())
            .expect("record");
        let records = [record("https://example.com/dead", &[("https://example.com/a/", Some(1))])];
        let report = apply_link_fixes(&mut wp, &mut session, &records, &options, &mut keep_going);
        assert_eq!(report.success, 1);
        assert_eq!(wp.transport().posts[&1], "<p>See our guide.</p>");
    }

    #[test]
    fn unresolved_archive_pages_are_skipped() {
        let mut wp = client(MockTransport::new());
        let mut session = SessionContext::new();
        session
            .decisions
            .record("https://example.com/dead", Decision::replace("https://example.com/live"))
            .expect("record");
        let records = [record(
            "https://example.com/dead",
            &[
                ("https://example.com/category/news/", None),
                ("https://example.com/plain/", None),
            ],
        )];
        let report = apply_link_fixes(
            &mut wp,
            &mut session,
            &records,
            &ApplyOptions::default(),
            &mut keep_going,
        );
        assert_eq!(report.skipped, 2);
        assert_eq!(report.items[0].message, ARCHIVE_SKIP_MESSAGE);
        assert_eq!(report.items[1].message, POST_ID_NOT_FOUND);
        assert!(wp.transport().content_posts().is_empty());
    }

    #[test]
    fn dry_run_never_writes_and_stop_interrupts() {
        let mut mock = MockTransport::new();
        mock.posts
            .insert(1, r#"<a href="https://example.com/dead">x</a>"#.to_string());
        mock.posts
            .insert(2, r#"<a href="https://example.com/dead">y</a>"#.to_string());
        let mut wp = client(mock);
        let mut session = SessionContext::new();
        session
            .decisions
            .record("https://example.com/dead", Decision::remove())
            .expect("record");
        let records = [record(
            "https://example.com/dead",
            &[
                ("https://example.com/a/", Some(1)),
                ("https://example.com/b/", Some(2)),
            ],
        )];
        let mut seen = 0;
        let report = apply_link_fixes(
            &mut wp,
            &mut session,
            &records,
            &ApplyOptions {
                dry_run: true,
                ..ApplyOptions::default()
            },
            &mut |_item| {
                seen += 1;
                ApplyFlow::Stop
            },
        );
        assert_eq!(seen, 1);
        assert!(report.interrupted);
        assert_eq!(report.items.len(), 1);
        assert!(report.items[0].preview.is_some());
        assert!(wp.transport().content_posts().is_empty());
    }

    #[test]
    fn skip_and_undecided_records_are_not_applied() {
        let mut wp = client(MockTransport::new());
        let mut session = SessionContext::new();
        session
            .decisions
            .record("https://example.com/skip", Decision::skip())
            .expect("record");
        let records = [
            record("https://example.com/skip", &[("https://example.com/a/", Some(1))]),
            record("https://example.com/undecided", &[("https://example.com/a/", Some(1))]),
        ];
        let report = apply_link_fixes(
            &mut wp,
            &mut session,
            &records,
            &ApplyOptions::default(),
            &mut keep_going,
        );
        assert!(report.items.is_empty());
        assert_eq!(wp.request_count(), 0);
    }

    #[test]
    fn redirect_chains_replace_with_final_address() {
        let mut mock = MockTransport::new();
        mock.posts.insert(
            4,
            r#"<a href="https://example.com/old">a</a> https://example.com/old"#.to_string(),
        );
        let mut wp = client(mock);
        let mut session = SessionContext::new();
        session.post_ids.insert("https://example.com/p/", 4);
        let records = [RedirectChainRecord {
            address: "https://example.com/old".to_string(),
            final_address: "https://example.com/new".to_string(),
            is_internal: true,
            is_temp_redirect: false,
            hops: 1,
            anchors: vec![],
            sources: vec!["https://example.com/p/".to_string()],
            source_post_ids: BTreeMap::new(),
            count: 1,
        }];
        let report = apply_redirect_chain_fixes(
            &mut wp,
            &mut session,
            &records,
            &ApplyOptions::default(),
            &mut keep_going,
        );
        assert_eq!(report.success, 1);
        assert_eq!(report.items[0].matches, 2);
        assert_eq!(
            wp.transport().posts[&4],
            r#"<a href="https://example.com/new">a</a> https://example.com/new"#
        );
    }

    #[test]
    fn alt_text_fixes_only_touch_planned_images() {
        let mut mock = MockTransport::new();
        mock.pages
            .insert(6, r#"<img src="https://example.com/up/a.png" alt="">"#.to_string());
        let mut wp = client(mock);
        let mut session = SessionContext::new();
        let image = |url: &str| ImageAltRecord {
            image_url: url.to_string(),
            current_alt: String::new(),
            alt_status: AltStatus::Missing,
            img_type: "Image".to_string(),
            sources: vec!["https://example.com/about/".to_string()],
            source_post_ids: BTreeMap::from([("https://example.com/about/".to_string(), 6)]),
            count: 1,
        };
        let images = [
            image("https://example.com/up/a.png"),
            image("https://example.com/up/b.png"),
        ];
        let alt_texts = BTreeMap::from([(
            "https://example.com/up/a.png".to_string(),
            "Team photo".to_string(),
        )]);
        let report = apply_alt_text_fixes(
            &mut wp,
            &mut session,
            &images,
            &alt_texts,
            &ApplyOptions::default(),
            &mut keep_going,
        );
        assert_eq!(report.items.len(), 1);
        assert_eq!(report.success, 1, "{:?}", report.items);
        assert_eq!(
            wp.transport().pages[&6],
            r#"<img src="https://example.com/up/a.png" alt="Team photo">"#
        );
    }
}
