use serde_json::{Map, Value, json};

use super::{
    RedirectEntry, RedirectListing, SeoMeta, interpret, json_code, json_str, json_u64, read_meta,
    source_path, write_meta,
};
use crate::seo::{FixOutcome, MetaUpdate};
use crate::transport::RestTransport;
use crate::wordpress::WordPressClient;

const NOT_FOUND: &str = "Endpoint not found - is Rank Math installed?";
const MAX_PER_PAGE: u32 = 100;

pub fn create_redirect<T: RestTransport>(
    client: &mut WordPressClient<T>,
    source: &str,
    target: &str,
    redirect_type: u16,
) -> FixOutcome {
    let path = source_path(client.site_url(), source);
    let body = json!({
        "url_to_redirect": path,
        "redirection_url": target,
        "redirection_type": redirect_type.to_string(),
        "status": "active",
    });
    match interpret(client.post("rankmath/v1/redirections", &body), NOT_FOUND) {
        Ok(data) => {
            let mut outcome =
                FixOutcome::succeeded(format!("Created {redirect_type} redirect: {path} -> {target}"));
            outcome.redirect_id = json_u64(&data, "id");
            outcome
        }
        Err(error) => FixOutcome::failed(format!("Failed to create redirect: {error}"), error),
    }
}

pub fn list_redirects<T: RestTransport>(
    client: &mut WordPressClient<T>,
    page: u32,
    per_page: u32,
) -> Result<RedirectListing, String> {
    let data = interpret(
        client.get(
            "rankmath/v1/redirections",
            &[
                ("page", page.max(1).to_string()),
                ("per_page", per_page.clamp(1, MAX_PER_PAGE).to_string()),
            ],
        ),
        NOT_FOUND,
    )?;
    let redirects: Vec<RedirectEntry> = data
        .as_array()
        .map(|items| items.iter().map(entry).collect())
        .unwrap_or_default();
    let total = redirects.len();
    Ok(RedirectListing { redirects, total })
}

fn entry(item: &Value) -> RedirectEntry {
    let source = item
        .get("sources")
        .and_then(Value::as_array)
        .and_then(|sources| sources.first())
        .map(|first| json_str(first, "pattern"))
        .unwrap_or_else(|| json_str(item, "url_to_redirect"));
    RedirectEntry {
        id: json_u64(item, "id"),
        source,
        target: json_str(item, "url_to"),
        redirect_type: json_code(item, "header_code"),
    }
}

/// Maps an update onto Rank Math's post meta keys. Robots flags become one
/// comma separated `rank_math_robots` value.
pub fn meta_fields(update: &MetaUpdate) -> Map<String, Value> {
    let mut fields = Map::new();
    let pairs = [
        ("rank_math_title", &update.title),
        ("rank_math_description", &update.description),
        ("rank_math_focus_keyword", &update.focus_keyword),
        ("rank_math_canonical_url", &update.canonical),
        ("rank_math_facebook_title", &update.og_title),
        ("rank_math_facebook_description", &update.og_description),
        ("rank_math_twitter_title", &update.twitter_title),
        ("rank_math_twitter_description", &update.twitter_description),
    ];
    for (key, value) in pairs {
        if let Some(value) = value {
            fields.insert(key.to_string(), Value::String(value.clone()));
        }
    }
    if let Some(robots) = &update.robots {
        let mut parts = Vec::new();
        if robots.noindex {
            parts.push("noindex");
        }
        if robots.nofollow {
            parts.push("nofollow");
        }
        if !parts.is_empty() {
            fields.insert(
                "rank_math_robots".to_string(),
                Value::String(parts.join(",")),
            );
        }
    }
    fields
}

pub fn update_meta<T: RestTransport>(
    client: &mut WordPressClient<T>,
    post_id: u64,
    update: &MetaUpdate,
) -> FixOutcome {
    write_meta(client, post_id, meta_fields(update))
}

pub fn get_meta<T: RestTransport>(
    client: &mut WordPressClient<T>,
    post_id: u64,
) -> Result<SeoMeta, String> {
    read_meta(
        client,
        post_id,
        &[
            ("title", "rank_math_title"),
            ("description", "rank_math_description"),
            ("focus_keyword", "rank_math_focus_keyword"),
            ("canonical", "rank_math_canonical_url"),
            ("og_title", "rank_math_facebook_title"),
            ("og_description", "rank_math_facebook_description"),
            ("robots", "rank_math_robots"),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seo::RobotsDirectives;
    use crate::test_support::{MockTransport, SITE, client};

    #[test]
    fn create_redirect_posts_rank_math_layout() {
        let mut mock = MockTransport::new();
        mock.on_post(
            &format!("{SITE}/wp-json/rankmath/v1/redirections"),
            200,
            json!({"id": 15}),
        );
        let mut wp = client(mock);
        let outcome = create_redirect(&mut wp, "https://example.com/old/", "https://example.com/new/", 301);
        assert!(outcome.success);
        assert_eq!(outcome.redirect_id, Some(15));

        let bodies = wp
            .transport()
            .posted_to(&format!("{SITE}/wp-json/rankmath/v1/redirections"));
        assert_eq!(
            bodies[0],
            &json!({
                "url_to_redirect": "/old/",
                "redirection_url": "https://example.com/new/",
                "redirection_type": "301",
                "status": "active",
            })
        );
    }

    #[test]
    fn missing_endpoint_names_the_plugin() {
        let mut wp = client(MockTransport::new());
        let outcome = create_redirect(&mut wp, "/a", "/b", 302);
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some(NOT_FOUND));
    }

    #[test]
    fn robots_flags_join_into_one_key() {
        let update = MetaUpdate {
            title: Some("T".to_string()),
            robots: Some(RobotsDirectives {
                noindex: true,
                nofollow: true,
            }),
            ..MetaUpdate::default()
        };
        let fields = meta_fields(&update);
        assert_eq!(fields["rank_math_title"], json!("T"));
        assert_eq!(fields["rank_math_robots"], json!("noindex,nofollow"));
        assert_eq!(fields.len(), 2);
    }

    #[test]
    fn social_and_canonical_fields_map_to_rank_math_keys() {
        let update = MetaUpdate {
            canonical: Some("https://example.com/c".to_string()),
            og_title: Some("OG".to_string()),
            og_description: Some("OG desc".to_string()),
            twitter_title: Some("TW".to_string()),
            twitter_description: Some("TW desc".to_string()),
            ..MetaUpdate::default()
        };
        let fields = meta_fields(&update);
        assert_eq!(fields["rank_math_canonical_url"], json!("https://example.com/c"));
        assert_eq!(fields["rank_math_facebook_title"], json!("OG"));
        assert_eq!(fields["rank_math_facebook_description"], json!("OG desc"));
        assert_eq!(fields["rank_math_twitter_title"], json!("TW"));
        assert_eq!(fields["rank_math_twitter_description"], json!("TW desc"));
        assert_eq!(fields.len(), 5);

        let mut mock = MockTransport::new();
        mock.posts.insert(11, String::new());
        let mut wp = client(mock);
        assert!(update_meta(&mut wp, 11, &update).success);
        let meta = get_meta(&mut wp, 11).expect("meta");
        assert_eq!(meta["canonical"], "https://example.com/c");
        assert_eq!(meta["og_title"], "OG");
    }

    #[test]
    fn list_redirects_normalizes_sources() {
        let mut mock = MockTransport::new();
        mock.on_get(
            &format!("{SITE}/wp-json/rankmath/v1/redirections?page=1&per_page=100"),
            200,
            json!([{"id": 3, "sources": [{"pattern": "/old", "comparison": "exact"}], "url_to": "/new", "header_code": "301"}]),
        );
        let listing = list_redirects(&mut client(mock), 1, 500).expect("list");
        assert_eq!(listing.total, 1);
        assert_eq!(
            listing.redirects[0],
            RedirectEntry {
                id: Some(3),
                source: "/old".to_string(),
                target: "/new".to_string(),
                redirect_type: Some(301),
            }
        );
    }

    #[test]
    fn meta_round_trips_through_post_meta() {
        let mut mock = MockTransport::new();
        mock.posts.insert(10, "<p>x</p>".to_string());
        let mut wp = client(mock);
        let update = MetaUpdate {
            description: Some("Fresh description".to_string()),
            ..MetaUpdate::default()
        };
        let outcome = update_meta(&mut wp, 10, &update);
        assert!(outcome.success, "{}", outcome.message);
        let meta = get_meta(&mut wp, 10).expect("meta");
        assert_eq!(meta["description"], "Fresh description");
        assert_eq!(meta["title"], "");
    }
}
