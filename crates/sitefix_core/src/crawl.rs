//! Crawl export ingestion: report detection, row parsing and grouping into
//! one record per broken URL, redirect pair or image.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Result, bail};
use regex::Regex;
use reqwest::Url;
use serde::Serialize;
use tracing::info;

use crate::csv::{CsvTable, cell};

static FILENAME_ALT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?:IMG_\d+|DSC[_\d]+|DCIM|Photo\d*|Image[-_]?\d*|pic\d+|screenshot|screen[-_]?shot|\d{6,}|[A-F0-9]{8}-[A-F0-9]{4}|\d+[-_]\d+)",
    )
    .expect("filename alt regex must compile")
});

const EXCLUDED_IMAGE_PATTERNS: &[&str] = &[
    "logo",
    "icon",
    "favicon",
    "sprite",
    "placeholder",
    "avatar",
    "gravatar.com",
    "badge",
    "button",
    "social",
    "facebook",
    "twitter",
    "linkedin",
    "instagram",
    "youtube",
    "pinterest",
    "background",
    "bg-",
    "-bg.",
];

const EXCLUDED_PAGE_PATTERNS: &[&str] = &[
    "/page/",
    "/category/",
    "/tag/",
    "/author/",
    "?listing-page=",
    "?paged=",
    "/wp-admin/",
];

const SHORT_ALT_ALLOWED: &[&str] = &["logo", "icon", "menu", "back", "next"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    PostIds,
    RedirectChains,
    BrokenLinks,
    ImageAltText,
}

impl ReportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PostIds => "post_ids",
            Self::RedirectChains => "redirect_chains",
            Self::BrokenLinks => "broken_links",
            Self::ImageAltText => "image_alt_text",
        }
    }
}

/// Classifies an export by its headers (and, where headers are ambiguous,
/// by its status code and type values).
pub fn detect_report_kind(table: &CsvTable) -> ReportKind {
    let columns = table.lower_headers();
    let has = |name: &str| columns.iter().any(|column| column == name);

    let has_post_id = columns.iter().any(|column| {
        column.starts_with("post_id") || column.starts_with("postid") || column == "post-id"
    });
    if has("address") && has_post_id && !has("destination") && !has("final address") {
        return ReportKind::PostIds;
    }

    let chain_indicators = ["final address", "number of redirects", "chain type", "loop"]
        .iter()
        .filter(|indicator| has(indicator))
        .count();
    if chain_indicators >= 2 {
        return ReportKind::RedirectChains;
    }

    if has("status code") && has("source") && has("destination") {
        let status_index = table.column("status code");
        let codes: Vec<f64> = table
            .rows
            .iter()
            .filter_map(|row| cell(row, status_index).parse::<f64>().ok())
            .collect();
        if !codes.is_empty() && codes.iter().sum::<f64>() / codes.len() as f64 >= 400.0 {
            return ReportKind::BrokenLinks;
        }
    }

    if has("type") && has("alt text") && has("source") && has("destination") {
        let type_index = table.column("type");
        let has_image_rows = table
            .rows
            .iter()
            .any(|row| cell(row, type_index).eq_ignore_ascii_case("image"));
        if has_image_rows {
            return ReportKind::ImageAltText;
        }
    }

    ReportKind::BrokenLinks
}

/// Most common host among `urls`, lower-cased with `www.` stripped.
pub fn detect_domain<'a>(urls: impl IntoIterator<Item = &'a str>) -> Option<String> {
    let mut order: Vec<String> = Vec::new();
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for url in urls {
        let host = host_of(url);
        if host.is_empty() {
            continue;
        }
        let count = counts.entry(host.clone()).or_insert(0);
        if *count == 0 {
            order.push(host);
        }
        *count += 1;
    }
    let mut best: Option<(&String, usize)> = None;
    for host in &order {
        let count = counts.get(host).copied().unwrap_or(0);
        if best.is_none_or(|(_, top)| count > top) {
            best = Some((host, count));
        }
    }
    best.map(|(host, _)| host.clone())
}

/// Either host containing the other counts as internal. Relative URLs and a
/// missing domain are internal.
pub fn is_internal(url: &str, domain: Option<&str>) -> bool {
    let Some(domain) = domain.filter(|domain| !domain.is_empty()) else {
        return true;
    };
    let host = host_of(url);
    domain.contains(host.as_str()) || host.contains(domain)
}

fn host_of(url: &str) -> String {
    Url::parse(url.trim())
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_ascii_lowercase))
        .map(|host| host.trim_start_matches("www.").to_string())
        .unwrap_or_default()
}

/// Whole numbers only. Spreadsheet exports may add a `.0` fraction, which is
/// accepted; any other fraction or sign is rejected.
pub fn parse_post_id(value: &str) -> Option<u64> {
    let value = value.trim();
    let whole = match value.split_once('.') {
        Some((whole, fraction)) if !fraction.is_empty() && fraction.bytes().all(|b| b == b'0') => {
            whole
        }
        Some(_) => return None,
        None => value,
    };
    if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    whole.parse::<u64>().ok()
}

/// Report column carrying a post id: `post_id`, `Post ID`, `postid` or `id`.
pub fn post_id_column(table: &CsvTable) -> Option<usize> {
    table.column_where(|header| {
        let squashed: String = header.chars().filter(|ch| *ch != '_' && *ch != ' ').collect();
        squashed == "postid" || squashed == "id"
    })
}

fn require_columns(table: &CsvTable, required: &[&str]) -> Result<()> {
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|name| !table.headers.iter().any(|header| header == name))
        .collect();
    if !missing.is_empty() {
        bail!("Missing columns: {}", missing.join(", "));
    }
    Ok(())
}

fn push_unique(values: &mut Vec<String>, value: &str) {
    if !value.is_empty() && !values.iter().any(|existing| existing == value) {
        values.push(value.to_string());
    }
}

fn truthy(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokenLinkRow {
    pub source: String,
    pub destination: String,
    pub status_code: Option<u16>,
    pub status_text: String,
    pub anchor: String,
    pub post_id: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokenLinksReport {
    pub rows: Vec<BrokenLinkRow>,
    pub non_content_filtered: usize,
    pub valid_post_ids: usize,
    pub has_post_id_column: bool,
}

/// Rows whose `Link Position` is present and not `Content` are dropped, so
/// navigation and footer links are never rewritten.
pub fn parse_broken_links(table: &CsvTable) -> Result<BrokenLinksReport> {
    require_columns(table, &["Source", "Destination", "Status Code"])?;
    let source = table.column("Source");
    let destination = table.column("Destination");
    let status_code = table.column("Status Code");
    let status = table.column("Status");
    let anchor = table.column("Anchor");
    let position = table
        .headers
        .iter()
        .position(|header| header == "Link Position");
    let post_id = post_id_column(table);

    let mut report = BrokenLinksReport {
        has_post_id_column: post_id.is_some(),
        ..BrokenLinksReport::default()
    };
    for row in &table.rows {
        if position.is_some() && cell(row, position) != "Content" {
            report.non_content_filtered += 1;
            continue;
        }
        let parsed = BrokenLinkRow {
            source: cell(row, source).to_string(),
            destination: cell(row, destination).to_string(),
            status_code: cell(row, status_code).parse::<f64>().ok().map(|code| code as u16),
            status_text: cell(row, status).to_string(),
            anchor: cell(row, anchor).to_string(),
            post_id: parse_post_id(cell(row, post_id)),
        };
        if parsed.destination.is_empty() {
            continue;
        }
        if parsed.post_id.is_some() {
            report.valid_post_ids += 1;
        }
        report.rows.push(parsed);
    }
    Ok(report)
}

/// One broken destination with everything known about where it is linked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrokenUrlRecord {
    pub url: String,
    pub status_code: Option<u16>,
    pub status_text: String,
    pub is_internal: bool,
    pub anchor_texts: Vec<String>,
    pub occurrence_count: usize,
    pub source_pages: Vec<String>,
    pub source_post_ids: BTreeMap<String, u64>,
}

/// Groups rows on the destination URL, keeping first-seen order.
pub fn group_by_broken_url(rows: &[BrokenLinkRow], domain: Option<&str>) -> Vec<BrokenUrlRecord> {
    let mut index: BTreeMap<String, usize> = BTreeMap::new();
    let mut records: Vec<BrokenUrlRecord> = Vec::new();
    for row in rows {
        let slot = *index.entry(row.destination.clone()).or_insert_with(|| {
            records.push(BrokenUrlRecord {
                url: row.destination.clone(),
                status_code: row.status_code,
                status_text: row.status_text.clone(),
                is_internal: is_internal(&row.destination, domain),
                anchor_texts: Vec::new(),
                occurrence_count: 0,
                source_pages: Vec::new(),
                source_post_ids: BTreeMap::new(),
            });
            records.len() - 1
        });
        let record = &mut records[slot];
        record.occurrence_count += 1;
        push_unique(&mut record.anchor_texts, &row.anchor);
        push_unique(&mut record.source_pages, &row.source);
        if let Some(post_id) = row.post_id {
            record.source_post_ids.insert(row.source.clone(), post_id);
        }
    }
    records
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectChainRow {
    pub source: String,
    pub address: String,
    pub final_address: String,
    pub link_position: String,
    pub is_loop: bool,
    pub is_temp: bool,
    pub hops: u32,
    pub anchor: String,
    pub post_id: Option<u64>,
}

pub fn parse_redirect_chains(table: &CsvTable) -> Result<Vec<RedirectChainRow>> {
    require_columns(table, &["Source", "Address", "Final Address"])?;
    let source = table.column("Source");
    let address = table.column("Address");
    let final_address = table.column("Final Address");
    let hops = table.column("Number of Redirects");
    let is_loop = table.column("Loop");
    let position = table.column("Link Position");
    let temp = table.column("Temp Redirect in Chain");
    let anchor = table.column("Anchor Text");
    let post_id = post_id_column(table);

    Ok(table
        .rows
        .iter()
        .map(|row| RedirectChainRow {
            source: cell(row, source).to_string(),
            address: cell(row, address).to_string(),
            final_address: cell(row, final_address).to_string(),
            link_position: if position.is_some() {
                cell(row, position).to_string()
            } else {
                "Content".to_string()
            },
            is_loop: truthy(cell(row, is_loop)),
            is_temp: truthy(cell(row, temp)),
            hops: cell(row, hops)
                .parse::<f64>()
                .ok()
                .map(|value| value as u32)
                .unwrap_or(1),
            anchor: cell(row, anchor).to_string(),
            post_id: parse_post_id(cell(row, post_id)),
        })
        .filter(|row| !row.address.is_empty())
        .collect())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RedirectChainRecord {
    pub address: String,
    pub final_address: String,
    pub is_internal: bool,
    pub is_temp_redirect: bool,
    pub hops: u32,
    pub anchors: Vec<String>,
    pub sources: Vec<String>,
    pub source_post_ids: BTreeMap<String, u64>,
    pub count: usize,
}

/// Non-content redirecting link, consolidated by address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SitewideLink {
    pub address: String,
    pub final_address: String,
    pub position: String,
    pub sources: Vec<String>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RedirectLoop {
    pub address: String,
    pub final_address: String,
    pub sources: Vec<String>,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RedirectChainGroups {
    pub redirects: Vec<RedirectChainRecord>,
    pub sitewide: Vec<SitewideLink>,
    pub loops: Vec<RedirectLoop>,
}

/// Groups content rows on the (address, final address) pair. Loops and
/// non-content rows are set aside, consolidated by address.
pub fn group_redirect_chains(rows: &[RedirectChainRow], domain: Option<&str>) -> RedirectChainGroups {
    let mut groups = RedirectChainGroups::default();
    let mut pair_index: BTreeMap<(String, String), usize> = BTreeMap::new();
    let mut sitewide_index: BTreeMap<String, usize> = BTreeMap::new();
    let mut loop_index: BTreeMap<String, usize> = BTreeMap::new();

    for row in rows {
        if row.is_loop {
            let slot = *loop_index.entry(row.address.clone()).or_insert_with(|| {
                groups.loops.push(RedirectLoop {
                    address: row.address.clone(),
                    final_address: row.final_address.clone(),
                    sources: Vec::new(),
                    count: 0,
                });
                groups.loops.len() - 1
            });
            let entry = &mut groups.loops[slot];
            entry.sources.push(row.source.clone());
            entry.count += 1;
            continue;
        }

        if !row.link_position.is_empty() && !row.link_position.eq_ignore_ascii_case("content") {
            let slot = *sitewide_index.entry(row.address.clone()).or_insert_with(|| {
                groups.sitewide.push(SitewideLink {
                    address: row.address.clone(),
                    final_address: row.final_address.clone(),
                    position: row.link_position.clone(),
                    sources: Vec::new(),
                    count: 0,
                });
                groups.sitewide.len() - 1
            });
            let entry = &mut groups.sitewide[slot];
            entry.sources.push(row.source.clone());
            entry.count += 1;
            continue;
        }

        let key = (row.address.clone(), row.final_address.clone());
        let slot = *pair_index.entry(key).or_insert_with(|| {
            groups.redirects.push(RedirectChainRecord {
                address: row.address.clone(),
                final_address: row.final_address.clone(),
                is_internal: is_internal(&row.address, domain),
                is_temp_redirect: row.is_temp,
                hops: row.hops,
                anchors: Vec::new(),
                sources: Vec::new(),
                source_post_ids: BTreeMap::new(),
                count: 0,
            });
            groups.redirects.len() - 1
        });
        let record = &mut groups.redirects[slot];
        record.count += 1;
        record.is_temp_redirect |= row.is_temp;
        push_unique(&mut record.anchors, &row.anchor);
        push_unique(&mut record.sources, &row.source);
        if let Some(post_id) = row.post_id {
            record.source_post_ids.insert(row.source.clone(), post_id);
        }
    }
    groups
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRow {
    pub source: String,
    pub image_url: String,
    pub alt_text: String,
    pub img_type: String,
    pub post_id: Option<u64>,
}

pub fn parse_image_alt_text(table: &CsvTable) -> Result<(Vec<ImageRow>, usize)> {
    require_columns(table, &["Source", "Destination", "Alt Text"])?;
    let source = table.column("Source");
    let destination = table.column("Destination");
    let alt = table.column("Alt Text");
    let img_type = table.column("Type");
    let position = table.column("Link Position");
    let post_id = post_id_column(table);

    let mut filtered = 0usize;
    let mut rows = Vec::new();
    for row in &table.rows {
        let link_position = cell(row, position);
        if position.is_some() && !link_position.is_empty() && !link_position.eq_ignore_ascii_case("content") {
            filtered += 1;
            continue;
        }
        let image_type = cell(row, img_type);
        rows.push(ImageRow {
            source: cell(row, source).to_string(),
            image_url: cell(row, destination).to_string(),
            alt_text: cell(row, alt).to_string(),
            img_type: if image_type.is_empty() {
                "Image".to_string()
            } else {
                image_type.to_string()
            },
            post_id: parse_post_id(cell(row, post_id)),
        });
    }
    Ok((rows, filtered))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AltStatus {
    Ok,
    Missing,
    Filename,
    TooShort,
}

impl AltStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Missing => "missing",
            Self::Filename => "filename",
            Self::TooShort => "too_short",
        }
    }

    pub fn needs_fix(self) -> bool {
        self != Self::Ok
    }
}

pub fn classify_alt_text(alt_text: &str) -> AltStatus {
    let alt = alt_text.trim();
    if alt.is_empty() {
        return AltStatus::Missing;
    }
    if FILENAME_ALT.is_match(alt) {
        return AltStatus::Filename;
    }
    if alt.chars().count() < 5 && !SHORT_ALT_ALLOWED.contains(&alt.to_lowercase().as_str()) {
        return AltStatus::TooShort;
    }
    AltStatus::Ok
}

/// Logos, icons, social badges and backgrounds are decorative.
pub fn is_excluded_image(image_url: &str) -> bool {
    let lower = image_url.to_lowercase();
    EXCLUDED_IMAGE_PATTERNS
        .iter()
        .any(|pattern| lower.contains(pattern))
}

/// Homepages, archives, paging and admin URLs are not fixable single posts.
pub fn is_excluded_page(source_url: &str) -> bool {
    let path = match Url::parse(source_url.trim()) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => source_url.split(['?', '#']).next().unwrap_or("").to_string(),
    };
    if matches!(path.as_str(), "" | "/" | "/index.html" | "/index.php") {
        return true;
    }
    let lower = source_url.to_lowercase();
    EXCLUDED_PAGE_PATTERNS
        .iter()
        .any(|pattern| lower.contains(pattern))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageAltRecord {
    pub image_url: String,
    pub current_alt: String,
    pub alt_status: AltStatus,
    pub img_type: String,
    pub sources: Vec<String>,
    pub source_post_ids: BTreeMap<String, u64>,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImageAltGroups {
    pub images: Vec<ImageAltRecord>,
    pub excluded: usize,
}

/// Groups images needing alt text by image URL. Rows on excluded pages, with
/// excluded images, or with acceptable alt text are counted as excluded.
pub fn group_images_for_alt_text(rows: &[ImageRow]) -> ImageAltGroups {
    let mut groups = ImageAltGroups::default();
    let mut index: BTreeMap<String, usize> = BTreeMap::new();
    for row in rows {
        let status = classify_alt_text(&row.alt_text);
        if is_excluded_page(&row.source) || is_excluded_image(&row.image_url) || !status.needs_fix() {
            groups.excluded += 1;
            continue;
        }
        let slot = *index.entry(row.image_url.clone()).or_insert_with(|| {
            groups.images.push(ImageAltRecord {
                image_url: row.image_url.clone(),
                current_alt: row.alt_text.clone(),
                alt_status: status,
                img_type: row.img_type.clone(),
                sources: Vec::new(),
                source_post_ids: BTreeMap::new(),
                count: 0,
            });
            groups.images.len() - 1
        });
        let record = &mut groups.images[slot];
        record.count += 1;
        push_unique(&mut record.sources, &row.source);
        if let Some(post_id) = row.post_id {
            record.source_post_ids.insert(row.source.clone(), post_id);
        }
    }
    groups
}

/// Reads a custom-extraction export mapping page URLs to post ids.
pub fn parse_post_id_table(table: &CsvTable) -> BTreeMap<String, u64> {
    let url_column = table
        .column_where(|header| matches!(header, "address" | "url" | "source" | "page url" | "page"))
        .unwrap_or(0);
    let id_column = table.column_where(|header| {
        matches!(header, "post_id" | "postid" | "post-id" | "id" | "page_id" | "pageid")
            || ["post_id", "postid", "post-id", "page_id", "pageid"]
                .iter()
                .any(|prefix| header.starts_with(prefix))
    });
    let Some(id_column) = id_column else {
        return BTreeMap::new();
    };
    table
        .rows
        .iter()
        .filter_map(|row| {
            let url = cell(row, Some(url_column));
            let post_id = parse_post_id(cell(row, Some(id_column)))?;
            (!url.is_empty()).then(|| (url.to_string(), post_id))
        })
        .collect()
}

/// A parsed and grouped export, whatever its kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CrawlReport {
    BrokenLinks {
        domain: Option<String>,
        records: Vec<BrokenUrlRecord>,
        non_content_filtered: usize,
    },
    RedirectChains {
        domain: Option<String>,
        groups: RedirectChainGroups,
    },
    ImageAltText {
        domain: Option<String>,
        groups: ImageAltGroups,
        non_content_filtered: usize,
    },
    PostIds {
        post_ids: BTreeMap<String, u64>,
    },
}

impl CrawlReport {
    pub fn kind(&self) -> ReportKind {
        match self {
            Self::BrokenLinks { .. } => ReportKind::BrokenLinks,
            Self::RedirectChains { .. } => ReportKind::RedirectChains,
            Self::ImageAltText { .. } => ReportKind::ImageAltText,
            Self::PostIds { .. } => ReportKind::PostIds,
        }
    }
}

pub fn ingest(table: &CsvTable) -> Result<CrawlReport> {
    let kind = detect_report_kind(table);
    info!(kind = kind.as_str(), rows = table.rows.len(), "ingesting crawl export");
    Ok(match kind {
        ReportKind::BrokenLinks => {
            let report = parse_broken_links(table)?;
            let domain = detect_domain(report.rows.iter().map(|row| row.source.as_str()));
            CrawlReport::BrokenLinks {
                records: group_by_broken_url(&report.rows, domain.as_deref()),
                domain,
                non_content_filtered: report.non_content_filtered,
            }
        }
        ReportKind::RedirectChains => {
            let rows = parse_redirect_chains(table)?;
            let domain = detect_domain(rows.iter().map(|row| row.source.as_str()));
            CrawlReport::RedirectChains {
                groups: group_redirect_chains(&rows, domain.as_deref()),
                domain,
            }
        }
        ReportKind::ImageAltText => {
            let (rows, non_content_filtered) = parse_image_alt_text(table)?;
            let domain = detect_domain(rows.iter().map(|row| row.source.as_str()));
            CrawlReport::ImageAltText {
                groups: group_images_for_alt_text(&rows),
                domain,
                non_content_filtered,
            }
        }
        ReportKind::PostIds => CrawlReport::PostIds {
            post_ids: parse_post_id_table(table),
        },
    })
}

pub fn ingest_file(path: &Path) -> Result<CrawlReport> {
    ingest(&CsvTable::read(path)?)
}
