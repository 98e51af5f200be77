use serde_json::{Map, Value, json};

use super::{
    RedirectEntry, RedirectListing, SeoMeta, interpret, json_code, json_str, json_u64, read_meta,
    source_path, write_meta,
};
use crate::seo::{FixOutcome, MetaUpdate};
use crate::transport::RestTransport;
use crate::wordpress::WordPressClient;

const NOT_FOUND: &str = "Endpoint not found";
const PREMIUM_REQUIRED: &str = "Redirects require Yoast SEO Premium";

pub fn create_redirect<T: RestTransport>(
    client: &mut WordPressClient<T>,
    is_premium: bool,
    source: &str,
    target: &str,
    redirect_type: u16,
) -> FixOutcome {
    if !is_premium {
        return FixOutcome::failed(PREMIUM_REQUIRED, "premium_required");
    }
    let path = source_path(client.site_url(), source);
    let body = json!({
        "origin": path,
        "target": target,
        "type": redirect_type,
        "format": "plain",
    });
    match interpret(client.post("yoast/v1/redirects", &body), NOT_FOUND) {
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
    is_premium: bool,
    page: u32,
    per_page: u32,
) -> Result<RedirectListing, String> {
    if !is_premium {
        return Err(PREMIUM_REQUIRED.to_string());
    }
    let data = interpret(
        client.get(
            "yoast/v1/redirects",
            &[
                ("page", page.max(1).to_string()),
                ("per_page", per_page.max(1).to_string()),
            ],
        ),
        NOT_FOUND,
    )?;
    let items = match &data {
        Value::Array(items) => items.as_slice(),
        other => other
            .get("redirects")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]),
    };
    let redirects: Vec<RedirectEntry> = items.iter().map(entry).collect();
    let total = redirects.len();
    Ok(RedirectListing { redirects, total })
}

fn entry(item: &Value) -> RedirectEntry {
    RedirectEntry {
        id: json_u64(item, "id"),
        source: json_str(item, "origin"),
        target: json_str(item, "target"),
        redirect_type: json_code(item, "type"),
    }
}

/// Yoast keeps one meta key per field, robots flags included.
pub fn meta_fields(update: &MetaUpdate) -> Map<String, Value> {
    let mut fields = Map::new();
    let pairs = [
        ("_yoast_wpseo_title", &update.title),
        ("_yoast_wpseo_metadesc", &update.description),
        ("_yoast_wpseo_focuskw", &update.focus_keyword),
        ("_yoast_wpseo_opengraph-title", &update.og_title),
        ("_yoast_wpseo_opengraph-description", &update.og_description),
        ("_yoast_wpseo_twitter-title", &update.twitter_title),
        ("_yoast_wpseo_twitter-description", &update.twitter_description),
        ("_yoast_wpseo_canonical", &update.canonical),
    ];
    for (key, value) in pairs {
        if let Some(value) = value {
            fields.insert(key.to_string(), Value::String(value.clone()));
        }
    }
    if let Some(robots) = &update.robots {
        if robots.noindex {
            fields.insert(
                "_yoast_wpseo_meta-robots-noindex".to_string(),
                Value::String("1".to_string()),
            );
        }
        if robots.nofollow {
            fields.insert(
                "_yoast_wpseo_meta-robots-nofollow".to_string(),
                Value::String("1".to_string()),
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
            ("title", "_yoast_wpseo_title"),
            ("description", "_yoast_wpseo_metadesc"),
            ("focus_keyword", "_yoast_wpseo_focuskw"),
            ("canonical", "_yoast_wpseo_canonical"),
            ("og_title", "_yoast_wpseo_opengraph-title"),
            ("og_description", "_yoast_wpseo_opengraph-description"),
        ],
    )
}
