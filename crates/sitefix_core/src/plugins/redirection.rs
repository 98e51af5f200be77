use serde_json::{Value, json};

use super::{RedirectEntry, RedirectListing, interpret, json_code, json_str, json_u64, source_path};
use crate::seo::FixOutcome;
use crate::transport::RestTransport;
use crate::wordpress::WordPressClient;

const NOT_FOUND: &str = "Endpoint not found - is Redirection plugin installed?";
const MAX_PER_PAGE: u32 = 200;
const DEFAULT_GROUP_ID: u64 = 1;

/// The plugin answers some failures with HTTP 200 and an `error` object.
fn body_error(data: &Value) -> Option<String> {
    let error = data.get("error")?;
    if error.is_null() || error == &Value::Bool(false) {
        return None;
    }
    Some(
        error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Unknown error")
            .to_string(),
    )
}

pub fn create_redirect<T: RestTransport>(
    client: &mut WordPressClient<T>,
    source: &str,
    target: &str,
    redirect_type: u16,
) -> FixOutcome {
    let path = source_path(client.site_url(), source);
    let body = json!({
        "url": path,
        "action_data": { "url": target },
        "action_type": "url",
        "action_code": redirect_type,
        "match_type": "url",
        "group_id": DEFAULT_GROUP_ID,
        "enabled": true,
    });
    let result = interpret(client.post("redirection/v1/redirect", &body), NOT_FOUND)
        .and_then(|data| match body_error(&data) {
            Some(error) => Err(error),
            None => Ok(data),
        });
    match result {
        Ok(data) => {
            let item = data.get("item").unwrap_or(&data);
            let mut outcome =
                FixOutcome::succeeded(format!("Created {redirect_type} redirect: {path} -> {target}"));
            outcome.redirect_id = json_u64(item, "id");
            outcome
        }
        Err(error) => FixOutcome::failed(format!("Failed to create redirect: {error}"), error),
    }
}

/// Pages are zero-based in this plugin's API.
pub fn list_redirects<T: RestTransport>(
    client: &mut WordPressClient<T>,
    page: u32,
    per_page: u32,
) -> Result<RedirectListing, String> {
    let data = interpret(
        client.get(
            "redirection/v1/redirect",
            &[
                ("page", page.to_string()),
                ("per_page", per_page.clamp(1, MAX_PER_PAGE).to_string()),
                ("orderby", "id".to_string()),
                ("direction", "desc".to_string()),
            ],
        ),
        NOT_FOUND,
    )?;
    let items = match &data {
        Value::Array(items) => items.as_slice(),
        other => other
            .get("items")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]),
    };
    let redirects: Vec<RedirectEntry> = items.iter().map(entry).collect();
    let total = json_u64(&data, "total")
        .and_then(|total| usize::try_from(total).ok())
        .unwrap_or(redirects.len());
    Ok(RedirectListing { redirects, total })
}

fn entry(item: &Value) -> RedirectEntry {
    let target = item
        .get("action_data")
        .map(|data| json_str(data, "url"))
        .unwrap_or_default();
    RedirectEntry {
        id: json_u64(item, "id"),
        source: json_str(item, "url"),
        target,
        redirect_type: json_code(item, "action_code"),
    }
}
