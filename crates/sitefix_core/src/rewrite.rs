//! Regex rewrites over raw post bodies (HTML and shortcodes).
//!
//! Markup is matched textually, never parsed. Nested or malformed anchors can be
//! mis-scoped, and [`replace_literal`] rewrites a URL wherever it appears,
//! attribute values included. Both are accepted limitations of the engine.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::{Captures, Regex};
use similar::TextDiff;

static IMG_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<img\b[^>]*>").expect("img tag regex must compile"));

static SRC_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)\ssrc\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
        .expect("src attribute regex must compile")
});

static QUOTED_ALT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)(\salt\s*=\s*)(?:"[^"]*"|'[^']*')"#)
        .expect("quoted alt regex must compile")
});

static UNQUOTED_ALT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)(\salt\s*=\s*)[^\s"'>]+"#).expect("unquoted alt regex must compile")
});

/// Body after a rewrite plus the number of elements (or literal occurrences) it touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewrite {
    pub content: String,
    pub matches: usize,
}

impl Rewrite {
    fn untouched(content: &str) -> Self {
        Self {
            content: content.to_string(),
            matches: 0,
        }
    }
}

/// Matches `<a ... href=URL ...>inner</a>` where the href equals `url` exactly.
/// Group 1 is the inner markup.
pub fn anchor_pattern(url: &str) -> Result<Regex> {
    let target = url_alternatives(url);
    let pattern = format!(
        r#"(?is)<a(?:\s[^>]*?)?\shref\s*=\s*(?:"{target}"[^>]*|'{target}'[^>]*|{target}(?:\s[^>]*)?)>(.*?)</a\s*>"#
    );
    Regex::new(&pattern).with_context(|| format!("failed to build anchor pattern for {url}"))
}

pub fn count_anchors(content: &str, url: &str) -> Result<usize> {
    Ok(anchor_pattern(url)?.find_iter(content).count())
}

/// Unwraps (or deletes, when `keep_anchor_text` is false) every anchor pointing at `url`.
pub fn remove_links(content: &str, url: &str, keep_anchor_text: bool) -> Result<Rewrite> {
    if url.trim().is_empty() {
        return Ok(Rewrite::untouched(content));
    }
    let regex = anchor_pattern(url)?;
    let matches = regex.find_iter(content).count();
    if matches == 0 {
        return Ok(Rewrite::untouched(content));
    }
    let rewritten = regex.replace_all(content, |caps: &Captures| {
        if keep_anchor_text {
            caps.get(1)
                .map(|inner| inner.as_str().to_string())
                .unwrap_or_default()
        } else {
            String::new()
        }
    });
    Ok(Rewrite {
        content: rewritten.into_owned(),
        matches,
    })
}

/// Verbatim substring replacement of every occurrence of `old_url`.
pub fn replace_literal(content: &str, old_url: &str, new_url: &str) -> Rewrite {
    if old_url.is_empty() {
        return Rewrite::untouched(content);
    }
    let matches = content.matches(old_url).count();
    if matches == 0 {
        return Rewrite::untouched(content);
    }
    Rewrite {
        content: content.replace(old_url, new_url),
        matches,
    }
}

/// Sets the alt attribute of every `<img>` whose src equals `img_src`.
///
/// An existing quoted alt keeps its position and only its value changes, an
/// unquoted `alt=value` is normalized to a quoted one, and a tag without alt gets
/// one injected right after its src attribute. `matches` counts the tags found,
/// including ones that already carried the requested value.
pub fn set_alt_text(content: &str, img_src: &str, new_alt: &str) -> Rewrite {
    if img_src.trim().is_empty() {
        return Rewrite::untouched(content);
    }
    let safe_alt = escape_attribute(new_alt);
    let mut matches = 0usize;
    let rewritten = IMG_TAG.replace_all(content, |caps: &Captures| {
        let tag = &caps[0];
        let Some(src) = SRC_ATTR.captures(tag) else {
            return tag.to_string();
        };
        let value = src
            .get(1)
            .or_else(|| src.get(2))
            .or_else(|| src.get(3))
            .map(|value| value.as_str())
            .unwrap_or("");
        if !same_url(value, img_src) {
            return tag.to_string();
        }
        matches += 1;
        let src_end = src.get(0).map(|attr| attr.end()).unwrap_or(tag.len() - 1);
        with_alt(tag, src_end, &safe_alt)
    });
    Rewrite {
        content: rewritten.into_owned(),
        matches,
    }
}

fn with_alt(tag: &str, src_end: usize, safe_alt: &str) -> String {
    let existing = QUOTED_ALT
        .captures(tag)
        .or_else(|| UNQUOTED_ALT.captures(tag));
    if let Some(caps) = existing
        && let (Some(whole), Some(prefix)) = (caps.get(0), caps.get(1))
    {
        return format!(
            "{}{}\"{}\"{}",
            &tag[..whole.start()],
            prefix.as_str(),
            safe_alt,
            &tag[whole.end()..]
        );
    }
    format!(
        "{} alt=\"{}\"{}",
        &tag[..src_end],
        safe_alt,
        &tag[src_end..]
    )
}

/// Entity-escapes a value for a double quoted attribute.
pub fn escape_attribute(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Unified line diff between the fetched body and the rewritten one.
pub fn preview(before: &str, after: &str) -> String {
    TextDiff::from_lines(before, after)
        .unified_diff()
        .context_radius(1)
        .header("current", "proposed")
        .to_string()
}

// Crawlers report decoded URLs while editors store `&amp;` in attributes.
fn url_alternatives(url: &str) -> String {
    let plain = regex::escape(url);
    if url.contains('&') && !url.contains("&amp;") {
        let encoded = regex::escape(&url.replace('&', "&amp;"));
        format!("(?:{plain}|{encoded})")
    } else {
        format!("(?:{plain})")
    }
}

fn same_url(attribute_value: &str, target: &str) -> bool {
    attribute_value == target || attribute_value.replace("&amp;", "&") == target
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEAD: &str = "https://example.com/dead";

    #[test]
    fn remove_links_keeps_anchor_text_and_counts_matches() {
        let body = format!(
            "<p>See <a href=\"{DEAD}\">the guide</a> and <A class='x' HREF='{DEAD}' target=_blank>this\npage</A>.</p>"
        );
        let rewrite = remove_links(&body, DEAD, true).expect("rewrite");
        assert_eq!(rewrite.matches, 2);
        assert_eq!(rewrite.content, "<p>See the guide and this\npage.</p>");
    }

    #[test]
    fn remove_links_can_drop_the_whole_element() {
        let body = format!("<p>Before <a href=\"{DEAD}\"><strong>gone</strong></a> after</p>");
        let rewrite = remove_links(&body, DEAD, false).expect("rewrite");
        assert_eq!(rewrite.matches, 1);
        assert_eq!(rewrite.content, "<p>Before  after</p>");
    }

    #[test]
    fn remove_links_requires_an_exact_href() {
        let body = format!(
            "<a href=\"{DEAD}-page\">longer</a> <a data-href=\"{DEAD}\" href=\"/ok\">data</a> <a href={DEAD}>bare</a>"
        );
        let rewrite = remove_links(&body, DEAD, true).expect("rewrite");
        assert_eq!(rewrite.matches, 1);
        assert!(rewrite.content.contains(&format!("<a href=\"{DEAD}-page\">longer</a>")));
        assert!(rewrite.content.contains("href=\"/ok\">data</a>"));
        assert!(rewrite.content.ends_with(" bare"));
    }

    #[test]
    fn remove_links_is_idempotent() {
        let body = format!("<a href=\"{DEAD}\">one</a> <a href=\"{DEAD}\">two</a>");
        let first = remove_links(&body, DEAD, true).expect("first");
        assert_eq!(first.matches, 2);
        assert_eq!(count_anchors(&first.content, DEAD).expect("count"), 0);
        let second = remove_links(&first.content, DEAD, true).expect("second");
        assert_eq!(second.matches, 0);
        assert_eq!(second.content, first.content);
    }

    #[test]
    fn remove_links_matches_entity_encoded_query_strings() {
        let url = "https://example.com/p?a=1&b=2";
        let body = "<a href=\"https://example.com/p?a=1&amp;b=2\">q</a>";
        let rewrite = remove_links(body, url, true).expect("rewrite");
        assert_eq!(rewrite.matches, 1);
        assert_eq!(rewrite.content, "q");
    }

    #[test]
    fn replace_literal_replaces_every_textual_occurrence() {
        let old = "https://old.example.com/x";
        let body = format!(
            "<a href=\"{old}\">{old}</a> [embed]{old}[/embed] <img data-orig=\"{old}\">"
        );
        let expected = body.matches(old).count();
        let rewrite = replace_literal(&body, old, "https://new.example.com/x");
        assert_eq!(expected, 4);
        assert_eq!(rewrite.matches, expected);
        assert!(!rewrite.content.contains(old));
        assert_eq!(rewrite.content.matches("https://new.example.com/x").count(), 4);
    }

    #[test]
    fn replace_literal_reports_zero_when_missing() {
        let rewrite = replace_literal("<p>nothing</p>", "https://a.example", "https://b.example");
        assert_eq!(rewrite.matches, 0);
        assert_eq!(rewrite.content, "<p>nothing</p>");
        assert_eq!(replace_literal("abc", "", "x").matches, 0);
    }

    #[test]
    fn set_alt_text_replaces_only_the_existing_value() {
        let body = r#"<img src="/a.png" alt="IMG_0042" class="wide" width="300">"#;
        let rewrite = set_alt_text(body, "/a.png", "Red bicycle");
        assert_eq!(rewrite.matches, 1);
        assert_eq!(
            rewrite.content,
            r#"<img src="/a.png" alt="Red bicycle" class="wide" width="300">"#
        );
    }

    #[test]
    fn set_alt_text_injects_one_attribute_after_src() {
        let body = r#"<img class="x" src='/a.png' width="10" />"#;
        let rewrite = set_alt_text(body, "/a.png", "Chart");
        assert_eq!(rewrite.matches, 1);
        assert_eq!(
            rewrite.content,
            r#"<img class="x" src='/a.png' alt="Chart" width="10" />"#
        );
        assert_eq!(rewrite.content.matches("alt=").count(), 1);
    }

    #[test]
    fn set_alt_text_normalizes_unquoted_alt_and_escapes_value() {
        let body = "<img src=/a.png alt=photo1>";
        let rewrite = set_alt_text(body, "/a.png", "Tom's \"big\" day");
        assert_eq!(
            rewrite.content,
            "<img src=/a.png alt=\"Tom&#39;s &quot;big&quot; day\">"
        );
    }

    #[test]
    fn set_alt_text_ignores_other_images() {
        let body = r#"<img src="/b.png"><img src="/a.png.webp"><img data-src="/a.png">"#;
        let rewrite = set_alt_text(body, "/a.png", "x");
        assert_eq!(rewrite.matches, 0);
        assert_eq!(rewrite.content, body);
    }

    #[test]
    fn set_alt_text_counts_tags_already_carrying_the_value() {
        let body = r#"<img src="/a.png" alt="Done">"#;
        let rewrite = set_alt_text(body, "/a.png", "Done");
        assert_eq!(rewrite.matches, 1);
        assert_eq!(rewrite.content, body);
    }

    #[test]
    fn preview_shows_removed_and_added_lines() {
        let diff = preview("<p>a</p>\n<p>b</p>\n", "<p>a</p>\n<p>c</p>\n");
        assert!(diff.contains("--- current"));
        assert!(diff.contains("-<p>b</p>"));
        assert!(diff.contains("+<p>c</p>"));
    }
}
