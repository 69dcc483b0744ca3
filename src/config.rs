use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::page::DomVariant;

const ENV_FILE: &str = ".env";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub run: RunConfiguration,
    #[serde(default)]
    pub comment_service: CommentServiceConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub timings: TimingsConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Everything the operator chooses for one run. Sent with `start`, validated
/// once, then treated as read-only until the run ends.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RunConfiguration {
    pub scroll_delay_ms: u64,
    pub comment_delay_ms: u64,
    pub max_posts: u32,
    pub duplicate_window_hours: u64,
    pub max_load_attempts: u32,

    pub time_filter: bool,
    pub min_post_age_hours: f64,
    pub skip_company_pages: bool,
    pub skip_friend_activity: bool,
    pub skip_promoted: bool,

    pub blacklist_enabled: bool,
    pub blacklist: Vec<String>,
    pub target_list_enabled: bool,
    pub target_list: Option<String>,

    /// Company page to comment as. `None` keeps the personal profile.
    pub identity_profile: Option<String>,
    pub manual_approval: bool,
    pub authenticity_boost: bool,
    pub comment_style: String,

    pub like_post: bool,
    pub like_own_comment: bool,
    /// http(s) URL or `data:` URI of an image to attach to every comment.
    pub attach_image: Option<String>,
}

impl Default for RunConfiguration {
    fn default() -> Self {
        Self {
            scroll_delay_ms: 1500,
            comment_delay_ms: 30_000,
            max_posts: 10,
            duplicate_window_hours: 24,
            max_load_attempts: 3,
            time_filter: false,
            min_post_age_hours: 0.0,
            skip_company_pages: false,
            skip_friend_activity: true,
            skip_promoted: true,
            blacklist_enabled: false,
            blacklist: Vec::new(),
            target_list_enabled: false,
            target_list: None,
            identity_profile: None,
            manual_approval: false,
            authenticity_boost: false,
            comment_style: "professional".to_string(),
            like_post: false,
            like_own_comment: false,
            attach_image: None,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConfigError {
    #[error("max_posts must be between 1 and {max}, got {got}")]
    MaxPosts { got: u32, max: u32 },
    #[error("comment_delay_ms must be at most {max}, got {got}")]
    CommentDelay { got: u64, max: u64 },
    #[error("scroll_delay_ms must be between 100 and {max}, got {got}")]
    ScrollDelay { got: u64, max: u64 },
    #[error("duplicate_window_hours must be at most {max}, got {got}")]
    DuplicateWindow { got: u64, max: u64 },
    #[error("min_post_age_hours must be a non-negative number")]
    MinPostAge,
    #[error("max_load_attempts must be at least 1")]
    LoadAttempts,
    #[error("identity_profile is set but empty")]
    EmptyIdentity,
    #[error("comment_style must not be empty")]
    EmptyStyle,
    #[error("attach_image must be an http(s) URL or data: URI")]
    AttachImage,
}

pub const MAX_POSTS_LIMIT: u32 = 500;
const MAX_COMMENT_DELAY_MS: u64 = 3_600_000;
const MAX_SCROLL_DELAY_MS: u64 = 60_000;
const MAX_DUPLICATE_WINDOW_HOURS: u64 = 24 * 30;

impl RunConfiguration {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_posts == 0 || self.max_posts > MAX_POSTS_LIMIT {
            return Err(ConfigError::MaxPosts { got: self.max_posts, max: MAX_POSTS_LIMIT });
        }
        if self.comment_delay_ms > MAX_COMMENT_DELAY_MS {
            return Err(ConfigError::CommentDelay {
                got: self.comment_delay_ms,
                max: MAX_COMMENT_DELAY_MS,
            });
        }
        if self.scroll_delay_ms < 100 || self.scroll_delay_ms > MAX_SCROLL_DELAY_MS {
            return Err(ConfigError::ScrollDelay {
                got: self.scroll_delay_ms,
                max: MAX_SCROLL_DELAY_MS,
            });
        }
        if self.duplicate_window_hours > MAX_DUPLICATE_WINDOW_HOURS {
            return Err(ConfigError::DuplicateWindow {
                got: self.duplicate_window_hours,
                max: MAX_DUPLICATE_WINDOW_HOURS,
            });
        }
        if !self.min_post_age_hours.is_finite() || self.min_post_age_hours < 0.0 {
            return Err(ConfigError::MinPostAge);
        }
        if self.max_load_attempts == 0 {
            return Err(ConfigError::LoadAttempts);
        }
        if self.identity_profile.as_deref().is_some_and(|p| p.trim().is_empty()) {
            return Err(ConfigError::EmptyIdentity);
        }
        if self.comment_style.trim().is_empty() {
            return Err(ConfigError::EmptyStyle);
        }
        if let Some(src) = &self.attach_image {
            let ok = src.starts_with("http://") || src.starts_with("https://") || src.starts_with("data:");
            if !ok {
                return Err(ConfigError::AttachImage);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CommentServiceConfig {
    /// Generation endpoint. Empty means use the offline generator.
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_service_timeout")]
    pub timeout_ms: u64,
    #[serde(default = "default_fallback_text")]
    pub fallback_text: String,
}

fn default_service_timeout() -> u64 { 15_000 }
fn default_fallback_text() -> String {
    "Great insights, thanks for sharing!".to_string()
}

impl Default for CommentServiceConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            timeout_ms: default_service_timeout(),
            fallback_text: default_fallback_text(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
    #[serde(default = "default_lists_path")]
    pub lists_path: PathBuf,
}

fn default_state_path() -> PathBuf { PathBuf::from("feedpilot-state.json") }
fn default_lists_path() -> PathBuf { PathBuf::from("lists.json") }

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
            lists_path: default_lists_path(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SiteConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Look target-list members up on their profile pages instead of
    /// trusting the stored names.
    #[serde(default)]
    pub resolve_profiles: bool,
}

fn default_base_url() -> String { "https://www.linkedin.com".to_string() }

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            resolve_profiles: false,
        }
    }
}

/// Poll and settle values for the submission sequencer and feed loader.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct TimingsConfig {
    pub modal_poll_ms: u64,
    pub modal_poll_attempts: u32,
    pub identity_settle_ms: u64,
    pub identity_close_ms: u64,
    pub composer_poll_ms: u64,
    pub composer_poll_attempts: u32,
    pub confirm_poll_ms: u64,
    pub confirm_poll_attempts: u32,
    pub like_settle_ms: u64,
    pub feed_growth_poll_attempts: u32,
    pub approval_timeout_s: u64,
}

impl Default for TimingsConfig {
    fn default() -> Self {
        Self {
            modal_poll_ms: 100,
            modal_poll_attempts: 15,
            identity_settle_ms: 500,
            identity_close_ms: 1000,
            composer_poll_ms: 200,
            composer_poll_attempts: 10,
            confirm_poll_ms: 300,
            confirm_poll_attempts: 10,
            like_settle_ms: 600,
            feed_growth_poll_attempts: 4,
            approval_timeout_s: 120,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SimulationConfig {
    #[serde(default)]
    pub layout: DomVariant,
    pub feed_path: Option<PathBuf>,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_acting_name")]
    pub acting_name: String,
    #[serde(default)]
    pub managed_pages: Vec<String>,
}

fn default_page_size() -> usize { 5 }
fn default_acting_name() -> String { "Operator".to_string() }

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            layout: DomVariant::default(),
            feed_path: None,
            page_size: default_page_size(),
            acting_name: default_acting_name(),
            managed_pages: Vec::new(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| "Failed to parse config TOML")?;
        Ok(config)
    }

    /// Load .env file into process environment. Real env vars take precedence.
    pub fn load_env_file() {
        let content = match std::fs::read_to_string(Path::new(ENV_FILE)) {
            Ok(c) => c,
            Err(_) => return,
        };
        for (key, value) in parse_env_lines(&content) {
            if std::env::var(&key).is_err() {
                std::env::set_var(key, value);
            }
        }
    }

    /// Bearer key for the comment service, if one is configured.
    pub fn comment_api_key() -> Option<String> {
        std::env::var("COMMENT_API_KEY")
            .ok()
            .map(|k| sanitize_key(&k))
            .filter(|k| !k.is_empty())
    }
}

/// Parse KEY=VALUE lines, skipping blanks and comments, stripping quotes and BOM.
fn parse_env_lines(content: &str) -> Vec<(String, String)> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    content
        .lines()
        .map(|line| line.trim().trim_matches('\r'))
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            let value = value.trim().trim_matches('"').trim_matches('\'');
            Some((key.trim().to_string(), value.to_string()))
        })
        .collect()
}

/// Strip carriage returns, BOM, and other invisible chars from a key value.
fn sanitize_key(raw: &str) -> String {
    raw.replace(['\r', '\u{feff}', '\u{200b}'], "")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_parses_with_sections() {
        let toml_src = r#"
            [run]
            max_posts = 3
            blacklist_enabled = true
            blacklist = ["Acme Co"]
            identity_profile = "Acme Corp"

            [comment_service]
            endpoint = "http://localhost:9000/generate"

            [simulation]
            layout = "legacy"
            page_size = 2
        "#;
        let config: Config = toml::from_str(toml_src).unwrap();
        assert_eq!(config.run.max_posts, 3);
        assert_eq!(config.run.blacklist, vec!["Acme Co".to_string()]);
        assert_eq!(config.run.duplicate_window_hours, 24);
        assert_eq!(config.comment_service.timeout_ms, 15_000);
        assert_eq!(config.simulation.layout, DomVariant::Legacy);
        assert_eq!(config.timings.modal_poll_attempts, 15);
        assert!(config.run.validate().is_ok());
    }

    #[test]
    fn test_shipped_config_loads_and_validates() {
        let root = Path::new(env!("CARGO_MANIFEST_DIR"));
        let config = Config::load(&root.join("config.toml")).unwrap();
        assert!(config.run.validate().is_ok());
        assert!(!config.site.resolve_profiles);
        assert_eq!(config.timings.feed_growth_poll_attempts, 4);
        let feed = config.simulation.feed_path.unwrap();
        assert!(root.join(feed).exists());
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.run, RunConfiguration::default());
        assert_eq!(config.site.base_url, "https://www.linkedin.com");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut run = RunConfiguration { max_posts: 0, ..Default::default() };
        assert_eq!(run.validate(), Err(ConfigError::MaxPosts { got: 0, max: MAX_POSTS_LIMIT }));

        run.max_posts = 5;
        run.min_post_age_hours = f64::NAN;
        assert_eq!(run.validate(), Err(ConfigError::MinPostAge));

        run.min_post_age_hours = 1.0;
        run.identity_profile = Some("  ".to_string());
        assert_eq!(run.validate(), Err(ConfigError::EmptyIdentity));

        run.identity_profile = None;
        run.attach_image = Some("file:///etc/passwd".to_string());
        assert_eq!(run.validate(), Err(ConfigError::AttachImage));

        run.attach_image = Some("data:image/png;base64,AAAA".to_string());
        assert!(run.validate().is_ok());
    }

    #[test]
    fn test_env_lines() {
        let parsed = parse_env_lines("\u{feff}# comment\nCOMMENT_API_KEY=\"abc\"\n\nOTHER = 'x'\r\nbroken");
        assert_eq!(
            parsed,
            vec![
                ("COMMENT_API_KEY".to_string(), "abc".to_string()),
                ("OTHER".to_string(), "x".to_string()),
            ]
        );
    }
}
