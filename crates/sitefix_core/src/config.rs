use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use toml::Value;

pub const CONFIG_RELATIVE_PATH: &str = ".sitefix/config.toml";
pub const DEFAULT_USER_AGENT: &str = "sitefix/0.1";
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_RATE_LIMIT_MS: u64 = 300;
pub const DEFAULT_AI_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_AI_MAX_TOKENS: u32 = 500;

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SiteConfig {
    #[serde(default)]
    pub wordpress: WordPressSection,
    #[serde(default)]
    pub ai: AiSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WordPressSection {
    pub site_url: Option<String>,
    pub username: Option<String>,
    pub user_agent: Option<String>,
    pub timeout_ms: Option<u64>,
    pub rate_limit_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct AiSection {
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
}

/// Where a resolved setting came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSource {
    Env,
    Config,
    Default,
    Missing,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Env => "env",
            Self::Config => "config",
            Self::Default => "default",
            Self::Missing => "missing",
        }
    }
}

impl SiteConfig {
    /// Site root: env WP_SITE_URL > config. Trailing slashes are dropped.
    pub fn site_url(&self) -> Option<String> {
        pick(env_override("WP_SITE_URL"), self.wordpress.site_url.as_deref())
            .map(|url| url.trim_end_matches('/').to_string())
    }

    pub fn site_url_source(&self) -> ValueSource {
        source_of(
            env_override("WP_SITE_URL").is_some(),
            self.wordpress.site_url.is_some(),
            false,
        )
    }

    pub fn username(&self) -> Option<String> {
        pick(env_override("WP_USERNAME"), self.wordpress.username.as_deref())
    }

    /// Application password, env only. WordPress displays it in groups of four
    /// separated by spaces; the spaces are not part of the secret.
    pub fn app_password(&self) -> Option<String> {
        env_override("WP_APP_PASSWORD").map(|value| normalize_app_password(&value))
    }

    /// Resolve user agent: env SITEFIX_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        pick(
            env_override("SITEFIX_USER_AGENT"),
            self.wordpress.user_agent.as_deref(),
        )
        .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn timeout_ms(&self) -> u64 {
        env_override_u64("SITEFIX_HTTP_TIMEOUT_MS")
            .or(self.wordpress.timeout_ms)
            .unwrap_or(DEFAULT_TIMEOUT_MS)
    }

    pub fn rate_limit_ms(&self) -> u64 {
        env_override_u64("SITEFIX_RATE_LIMIT_MS")
            .or(self.wordpress.rate_limit_ms)
            .unwrap_or(DEFAULT_RATE_LIMIT_MS)
    }

    pub fn ai_api_key(&self) -> Option<String> {
        env_override("ANTHROPIC_API_KEY")
    }

    pub fn ai_model(&self) -> String {
        pick(env_override("SITEFIX_AI_MODEL"), self.ai.model.as_deref())
            .unwrap_or_else(|| DEFAULT_AI_MODEL.to_string())
    }

    pub fn ai_max_tokens(&self) -> u32 {
        self.ai.max_tokens.unwrap_or(DEFAULT_AI_MAX_TOKENS)
    }
}

pub fn resolve_config_path(project_root: &Path) -> PathBuf {
    project_root.join(CONFIG_RELATIVE_PATH)
}

/// Load and parse a SiteConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<SiteConfig> {
    if !config_path.exists() {
        return Ok(SiteConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: SiteConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

#[derive(Debug, Clone, Default)]
pub struct ConfigPatch {
    pub set_site_url: Option<String>,
    pub set_username: Option<String>,
}

/// Update selected keys under `[wordpress]` while preserving all other config sections.
/// Returns `true` when a write occurred.
pub fn patch_config(config_path: &Path, patch: &ConfigPatch) -> Result<bool> {
    if patch.set_site_url.is_none() && patch.set_username.is_none() {
        return Ok(false);
    }

    let mut root = if config_path.exists() {
        let content = fs::read_to_string(config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        toml::from_str::<Value>(&content)
            .with_context(|| format!("failed to parse {}", config_path.display()))?
    } else {
        Value::Table(Default::default())
    };
    let original = root.clone();

    let root_table = root.as_table_mut().ok_or_else(|| {
        anyhow::anyhow!(
            "top-level TOML must be a table in {}",
            config_path.display()
        )
    })?;
    let wordpress_entry = root_table
        .entry("wordpress".to_string())
        .or_insert_with(|| Value::Table(Default::default()));
    let wordpress_table = wordpress_entry.as_table_mut().ok_or_else(|| {
        anyhow::anyhow!("[wordpress] must be a table in {}", config_path.display())
    })?;

    if let Some(site_url) = &patch.set_site_url {
        let trimmed = site_url.trim().trim_end_matches('/');
        wordpress_table.insert("site_url".to_string(), Value::String(trimmed.to_string()));
    }
    if let Some(username) = &patch.set_username {
        wordpress_table.insert(
            "username".to_string(),
            Value::String(username.trim().to_string()),
        );
    }

    if root == original {
        return Ok(false);
    }

    let parent = config_path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("config path has no parent: {}", config_path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
    let rendered = toml::to_string_pretty(&root).context("failed to serialize config TOML")?;
    fs::write(config_path, rendered)
        .with_context(|| format!("failed to write {}", config_path.display()))?;
    Ok(true)
}

pub fn normalize_app_password(value: &str) -> String {
    value.chars().filter(|ch| !ch.is_whitespace()).collect()
}

fn env_override(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_override_u64(key: &str) -> Option<u64> {
    env_override(key).and_then(|value| value.parse::<u64>().ok())
}

fn pick(env_value: Option<String>, config_value: Option<&str>) -> Option<String> {
    env_value.or_else(|| {
        config_value
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    })
}

fn source_of(from_env: bool, from_config: bool, has_default: bool) -> ValueSource {
    if from_env {
        ValueSource::Env
    } else if from_config {
        ValueSource::Config
    } else if has_default {
        ValueSource::Default
    } else {
        ValueSource::Missing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config_has_no_site() {
        let config = SiteConfig::default();
        assert!(config.wordpress.site_url.is_none());
        assert!(config.ai.model.is_none());
        assert_eq!(config.ai_max_tokens(), 500);
    }

    #[test]
    fn load_config_returns_default_for_missing_file() {
        let config = load_config(Path::new("/nonexistent/config.toml")).expect("load config");
        assert_eq!(config, SiteConfig::default());
    }

    #[test]
    fn load_config_parses_sections() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(
            &config_path,
            r#"
[wordpress]
site_url = "https://blog.example.com/"
username = "editor"
user_agent = "test-agent/1.0"
timeout_ms = 5000
rate_limit_ms = 0

[ai]
model = "claude-test"
max_tokens = 900
"#,
        )
        .expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert_eq!(
            config.wordpress.site_url.as_deref(),
            Some("https://blog.example.com/")
        );
        assert_eq!(config.wordpress.username.as_deref(), Some("editor"));
        assert_eq!(config.wordpress.timeout_ms, Some(5000));
        assert_eq!(config.wordpress.rate_limit_ms, Some(0));
        assert_eq!(config.ai.model.as_deref(), Some("claude-test"));
        assert_eq!(config.ai_max_tokens(), 900);
    }

    #[test]
    fn load_config_tolerates_partial_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[export]\ndir = \"out\"\n").expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert!(config.wordpress.site_url.is_none());
    }

    #[test]
    fn load_config_returns_error_for_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[wordpress\nsite_url = \"oops\"").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }

    #[test]
    fn patch_config_preserves_other_sections() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join(".sitefix").join("config.toml");
        fs::create_dir_all(config_path.parent().expect("parent")).expect("mkdir");
        fs::write(&config_path, "[ai]\nmodel = \"keep-me\"\n").expect("write config");

        let wrote = patch_config(
            &config_path,
            &ConfigPatch {
                set_site_url: Some("https://blog.example.com/".to_string()),
                set_username: Some(" editor ".to_string()),
            },
        )
        .expect("patch");
        assert!(wrote);

        let config = load_config(&config_path).expect("load config");
        assert_eq!(
            config.wordpress.site_url.as_deref(),
            Some("https://blog.example.com")
        );
        assert_eq!(config.wordpress.username.as_deref(), Some("editor"));
        assert_eq!(config.ai.model.as_deref(), Some("keep-me"));

        let again = patch_config(
            &config_path,
            &ConfigPatch {
                set_site_url: Some("https://blog.example.com".to_string()),
                set_username: None,
            },
        )
        .expect("patch again");
        assert!(!again);
    }

    #[test]
    fn patch_config_without_changes_does_not_write() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        let wrote = patch_config(&config_path, &ConfigPatch::default()).expect("patch");
        assert!(!wrote);
        assert!(!config_path.exists());
    }

    #[test]
    fn app_password_spaces_are_stripped() {
        assert_eq!(
            normalize_app_password("abcd EFGH 1234 ijkl"),
            "abcdEFGH1234ijkl"
        );
    }

    #[test]
    fn env_value_wins_over_config_value() {
        assert_eq!(
            pick(Some("env".to_string()), Some("config")),
            Some("env".to_string())
        );
        assert_eq!(pick(None, Some("  config ")), Some("config".to_string()));
        assert_eq!(pick(None, Some("   ")), None);
        assert_eq!(source_of(false, true, true), ValueSource::Config);
        assert_eq!(source_of(false, false, false), ValueSource::Missing);
    }

    #[test]
    fn config_path_lives_under_dot_sitefix() {
        let path = resolve_config_path(Path::new("/work"));
        assert_eq!(path, PathBuf::from("/work/.sitefix/config.toml"));
    }
}
