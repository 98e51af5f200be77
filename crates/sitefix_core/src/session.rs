//! Per-session state: fix decisions keyed by URL and the page URL to post id cache.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::crawl::parse_post_id_table;
use crate::csv::CsvTable;
use crate::plugins::PluginResolver;

const ARCHIVE_MARKERS: &[&str] = &["/category/", "/tag/", "/author/", "/page/", "/archive/"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Remove,
    Replace,
    Skip,
}

impl DecisionAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Remove => "remove",
            Self::Replace => "replace",
            Self::Skip => "skip",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "remove" => Some(Self::Remove),
            "replace" => Some(Self::Replace),
            "skip" | "" => Some(Self::Skip),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOrigin {
    #[default]
    Human,
    Ai,
}

/// What to do with every occurrence of one URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub action: DecisionAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement_url: Option<String>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub origin: DecisionOrigin,
}

impl Decision {
    pub fn remove() -> Self {
        Self {
            action: DecisionAction::Remove,
            replacement_url: None,
            notes: String::new(),
            origin: DecisionOrigin::Human,
        }
    }

    pub fn replace(replacement_url: impl Into<String>) -> Self {
        Self {
            action: DecisionAction::Replace,
            replacement_url: Some(replacement_url.into()),
            ..Self::remove()
        }
    }

    pub fn skip() -> Self {
        Self {
            action: DecisionAction::Skip,
            ..Self::remove()
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    pub fn from_ai(mut self) -> Self {
        self.origin = DecisionOrigin::Ai;
        self
    }

    /// Replacement target, when the action is `Replace` and one is set.
    pub fn replacement(&self) -> Option<&str> {
        match self.action {
            DecisionAction::Replace => self
                .replacement_url
                .as_deref()
                .map(str::trim)
                .filter(|url| !url.is_empty()),
            _ => None,
        }
    }
}

/// Decisions keyed by the URL they apply to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionBook {
    decisions: BTreeMap<String, Decision>,
}

impl DecisionBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, url: &str, decision: Decision) -> Result<()> {
        if decision.action == DecisionAction::Replace && decision.replacement().is_none() {
            bail!("replace decision for {url} has no replacement URL");
        }
        self.decisions.insert(url.to_string(), decision);
        Ok(())
    }

    pub fn get(&self, url: &str) -> Option<&Decision> {
        self.decisions.get(url)
    }

    pub fn remove(&mut self, url: &str) -> Option<Decision> {
        self.decisions.remove(url)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Decision)> {
        self.decisions.iter()
    }

    pub fn len(&self) -> usize {
        self.decisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
    }

    pub fn count(&self, action: DecisionAction) -> usize {
        self.decisions
            .values()
            .filter(|decision| decision.action == action)
            .count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnmatchedUrl {
    pub url: String,
    pub is_archive: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UnmatchedSummary {
    pub total: usize,
    pub archive: usize,
    pub other: usize,
}

impl UnmatchedSummary {
    pub fn from_unmatched(unmatched: &[UnmatchedUrl]) -> Self {
        let archive = unmatched.iter().filter(|entry| entry.is_archive).count();
        Self {
            total: unmatched.len(),
            archive,
            other: unmatched.len() - archive,
        }
    }
}

pub fn is_archive_url(url: &str) -> bool {
    let lower = url.to_lowercase();
    ARCHIVE_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Page URL to post id, filled from post-id exports and successful lookups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostIdCache {
    ids: BTreeMap<String, u64>,
}

impl PostIdCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, url: &str) -> Option<u64> {
        self.ids.get(url.trim()).copied()
    }

    pub fn insert(&mut self, url: &str, post_id: u64) {
        self.ids.insert(url.trim().to_string(), post_id);
    }

    pub fn extend(&mut self, ids: impl IntoIterator<Item = (String, u64)>) {
        for (url, post_id) in ids {
            self.insert(&url, post_id);
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    /// Loads a post-id export and returns how many ids it contributed.
    pub fn load_csv(&mut self, path: &Path) -> Result<usize> {
        let ids = parse_post_id_table(&CsvTable::read(path)?);
        let loaded = ids.len();
        self.extend(ids);
        Ok(loaded)
    }

    /// Counts sources with a known id and lists the rest, flagging archives.
    pub fn match_post_ids<'a>(
        &self,
        sources: impl IntoIterator<Item = &'a str>,
    ) -> (usize, Vec<UnmatchedUrl>) {
        let mut matched = 0usize;
        let mut unmatched = Vec::new();
        for url in sources {
            if self.get(url).is_some() {
                matched += 1;
            } else {
                unmatched.push(UnmatchedUrl {
                    url: url.to_string(),
                    is_archive: is_archive_url(url),
                });
            }
        }
        (matched, unmatched)
    }
}

/// Everything one user session accumulates between commands.
#[derive(Debug, Default)]
pub struct SessionContext {
    pub plugins: PluginResolver,
    pub post_ids: PostIdCache,
    pub decisions: DecisionBook,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops state tied to the connected site. Decisions are about URLs and
    /// survive a reconnect.
    pub fn disconnect(&mut self) {
        self.plugins.invalidate();
        self.post_ids.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_without_url_is_rejected() {
        let mut book = DecisionBook::new();
        let mut blank = Decision::replace("  ");
        let error = book
            .record("https://example.com/dead", blank.clone())
            .expect_err("blank replacement");
        assert!(error.to_string().contains("no replacement URL"));

        blank.replacement_url = None;
        assert!(book.record("https://example.com/dead", blank).is_err());
        assert!(book.is_empty());

        book.record("https://example.com/dead", Decision::replace("https://example.com/new"))
            .expect("valid replace");
        book.record("https://example.com/gone", Decision::remove().from_ai())
            .expect("remove");
        assert_eq!(book.count(DecisionAction::Replace), 1);
        assert_eq!(
            book.get("https://example.com/gone").map(|d| d.origin),
            Some(DecisionOrigin::Ai)
        );
    }

    #[test]
    fn parses_actions_loosely() {
        assert_eq!(DecisionAction::parse(" Replace "), Some(DecisionAction::Replace));
        assert_eq!(DecisionAction::parse(""), Some(DecisionAction::Skip));
        assert_eq!(DecisionAction::parse("delete"), None);
    }

    #[test]
    fn unmatched_sources_are_split_by_archive_markers() {
        let mut cache = PostIdCache::new();
        cache.insert("https://example.com/a/", 1);
        let sources = [
            "https://example.com/a/",
            "https://example.com/category/news/",
            "https://example.com/page/2/",
            "https://example.com/b/",
        ];
        let (matched, unmatched) = cache.match_post_ids(sources);
        assert_eq!(matched, 1);
        assert_eq!(
            UnmatchedSummary::from_unmatched(&unmatched),
            UnmatchedSummary {
                total: 3,
                archive: 2,
                other: 1
            }
        );
    }

    #[test]
    fn loads_post_id_exports() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ids.csv");
        std::fs::write(
            &path,
            "Address,post_id 1\nhttps://example.com/a/,7\nhttps://example.com/b/,8.0\n",
        )
        .expect("write csv");
        let mut session = SessionContext::new();
        assert_eq!(session.post_ids.load_csv(&path).expect("load"), 2);
        assert_eq!(session.post_ids.get("https://example.com/b/"), Some(8));

        session
            .decisions
            .record("https://example.com/x", Decision::skip())
            .expect("skip");
        session.disconnect();
        assert!(session.post_ids.is_empty());
        assert_eq!(session.decisions.len(), 1);
    }
}
