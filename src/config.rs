use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const DEFAULT_ENV_PREFIX: &str = "REELS";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub prefetch: PrefetchConfig,
    #[serde(default)]
    pub scroll: ScrollConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub ui: UIConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            timeout: default_timeout(),
        }
    }
}

fn default_base_url() -> String {
    crate::api::DEFAULT_API_BASE.to_string()
}

fn default_user_agent() -> String {
    format!("reels-tui/{}", crate::VERSION)
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedConfig {
    /// Search category the recommendation batches are drawn from.
    #[serde(default = "default_category")]
    pub category: String,
    /// Marker that identifies reels among search results.
    #[serde(default = "default_reel_marker")]
    pub reel_marker: String,
    /// Marker stripped from reel titles before the full-feature search.
    #[serde(default = "default_title_marker")]
    pub title_marker: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_random_pages")]
    pub random_pages: u32,
    #[serde(default = "default_sidebar_size")]
    pub sidebar_size: usize,
    #[serde(default = "default_full_feature")]
    pub full_feature: bool,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            category: default_category(),
            reel_marker: default_reel_marker(),
            title_marker: default_title_marker(),
            batch_size: default_batch_size(),
            random_pages: default_random_pages(),
            sidebar_size: default_sidebar_size(),
            full_feature: default_full_feature(),
        }
    }
}

fn default_category() -> String {
    "解说".into()
}

fn default_reel_marker() -> String {
    "解说".into()
}

fn default_title_marker() -> String {
    "电影解说".into()
}

fn default_batch_size() -> usize {
    20
}

fn default_random_pages() -> u32 {
    10
}

fn default_sidebar_size() -> usize {
    6
}

fn default_full_feature() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrefetchConfig {
    #[serde(default = "default_batch_head")]
    pub batch_head: usize,
    #[serde(default = "default_ahead")]
    pub ahead: usize,
    #[serde(default)]
    pub behind: usize,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            batch_head: default_batch_head(),
            ahead: default_ahead(),
            behind: 0,
        }
    }
}

fn default_batch_head() -> usize {
    2
}

fn default_ahead() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScrollConfig {
    #[serde(default = "default_settle", with = "humantime_serde")]
    pub settle: Duration,
    /// Terminal rows moved per scroll step in the mobile layout.
    #[serde(default = "default_step_rows")]
    pub step_rows: u16,
}

impl Default for ScrollConfig {
    fn default() -> Self {
        Self {
            settle: default_settle(),
            step_rows: default_step_rows(),
        }
    }
}

fn default_settle() -> Duration {
    crate::scroll::DEFAULT_SETTLE
}

fn default_step_rows() -> u16 {
    4
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CacheConfig {
    /// Caps the detail cache with oldest-first eviction. Unbounded if unset.
    #[serde(default)]
    pub max_entries: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FetchConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

fn default_workers() -> usize {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerConfig {
    #[serde(default = "default_mpv_path")]
    pub mpv_path: String,
    #[serde(default)]
    pub fullscreen: bool,
    #[serde(default)]
    pub referer: Option<String>,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            mpv_path: default_mpv_path(),
            fullscreen: false,
            referer: None,
            extra_args: Vec::new(),
        }
    }
}

fn default_mpv_path() -> String {
    "mpv".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UIConfig {
    /// Terminals at most this wide get the one-item-per-screen layout.
    #[serde(default = "default_mobile_max_width")]
    pub mobile_max_width: u16,
}

impl Default for UIConfig {
    fn default() -> Self {
        Self {
            mobile_max_width: default_mobile_max_width(),
        }
    }
}

fn default_mobile_max_width() -> u16 {
    90
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

/// Builds the effective configuration: defaults, then the YAML file
/// (explicit path or the per-user default), then `REELS_<SECTION>__<KEY>`
/// environment overrides.
pub fn load(options: LoadOptions) -> Result<Config> {
    let file = match options.config_file {
        Some(path) if !path.exists() => {
            anyhow::bail!("config file {} does not exist", path.display())
        }
        Some(path) => Some(path),
        None => default_config_path().filter(|path| path.exists()),
    };
    let mut cfg = match file {
        Some(path) => read_config_file(&path)?,
        None => Config::default(),
    };

    apply_env(
        &mut cfg,
        options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX),
    );
    normalize(&mut cfg);
    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("read config {}", path.display()))?;
    if raw.trim().is_empty() {
        return Ok(Config::default());
    }
    serde_yaml::from_str(&raw).with_context(|| format!("parse config {}", path.display()))
}

fn normalize(cfg: &mut Config) {
    if cfg.api.base_url.trim().is_empty() {
        cfg.api.base_url = default_base_url();
    }
    if cfg.api.user_agent.trim().is_empty() {
        cfg.api.user_agent = default_user_agent();
    }
    if cfg.feed.batch_size == 0 {
        cfg.feed.batch_size = default_batch_size();
    }
    if cfg.feed.random_pages == 0 {
        cfg.feed.random_pages = 1;
    }
    if cfg.fetch.workers == 0 {
        cfg.fetch.workers = default_workers();
    }
    if cfg.scroll.step_rows == 0 {
        cfg.scroll.step_rows = default_step_rows();
    }
    if cfg.player.mpv_path.trim().is_empty() {
        cfg.player.mpv_path = default_mpv_path();
    }
}

fn apply_env(cfg: &mut Config, prefix: &str) {
    let marker = format!("{}_", prefix.to_ascii_uppercase());
    // Sorted so the result does not depend on environment ordering.
    let overrides: BTreeMap<String, String> = env::vars()
        .filter_map(|(name, value)| {
            let rest = name.strip_prefix(&marker)?;
            Some((rest.to_ascii_lowercase().replace("__", "."), value))
        })
        .collect();
    for (key, value) in overrides {
        apply_env_value(cfg, &key, value);
    }
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "api.base_url" => cfg.api.base_url = value,
        "api.user_agent" => cfg.api.user_agent = value,
        "api.timeout" => parse_duration_into(&value, &mut cfg.api.timeout),
        "feed.category" => cfg.feed.category = value,
        "feed.reel_marker" => cfg.feed.reel_marker = value,
        "feed.title_marker" => cfg.feed.title_marker = value,
        "feed.batch_size" => parse_into(&value, &mut cfg.feed.batch_size),
        "feed.random_pages" => parse_into(&value, &mut cfg.feed.random_pages),
        "feed.sidebar_size" => parse_into(&value, &mut cfg.feed.sidebar_size),
        "feed.full_feature" => cfg.feed.full_feature = parse_bool(&value),
        "prefetch.batch_head" => parse_into(&value, &mut cfg.prefetch.batch_head),
        "prefetch.ahead" => parse_into(&value, &mut cfg.prefetch.ahead),
        "prefetch.behind" => parse_into(&value, &mut cfg.prefetch.behind),
        "scroll.settle" => parse_duration_into(&value, &mut cfg.scroll.settle),
        "scroll.step_rows" => parse_into(&value, &mut cfg.scroll.step_rows),
        "cache.max_entries" => {
            cfg.cache.max_entries = value.trim().parse::<usize>().ok().filter(|n| *n > 0);
        }
        "fetch.workers" => parse_into(&value, &mut cfg.fetch.workers),
        "player.mpv_path" => cfg.player.mpv_path = value,
        "player.fullscreen" => cfg.player.fullscreen = parse_bool(&value),
        "player.referer" => {
            cfg.player.referer = Some(value).filter(|v| !v.trim().is_empty());
        }
        "player.extra_args" => {
            cfg.player.extra_args = value
                .split(',')
                .map(str::trim)
                .filter(|arg| !arg.is_empty())
                .map(String::from)
                .collect();
        }
        "ui.mobile_max_width" => parse_into(&value, &mut cfg.ui.mobile_max_width),
        _ => {}
    }
}

fn parse_into<T: std::str::FromStr>(value: &str, slot: &mut T) {
    if let Ok(parsed) = value.trim().parse::<T>() {
        *slot = parsed;
    }
}

fn parse_duration_into(value: &str, slot: &mut Duration) {
    match humantime::parse_duration(value.trim()) {
        Ok(parsed) => *slot = parsed,
        Err(err) => tracing::warn!(value, error = %err, "ignoring bad duration override"),
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim(), "1" | "true" | "TRUE" | "True" | "yes" | "on")
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("reels-tui").join("config.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn isolated(prefix: &str) -> (tempfile::TempDir, LoadOptions) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "").unwrap();
        let options = LoadOptions {
            config_file: Some(path),
            env_prefix: Some(prefix.into()),
        };
        (dir, options)
    }

    #[test]
    fn load_defaults_from_empty_file() {
        let (_dir, options) = isolated("REELS_TEST_DEFAULTS");
        let cfg = load(options).unwrap();
        assert_eq!(cfg, {
            let mut expected = Config::default();
            normalize(&mut expected);
            expected
        });
        assert_eq!(cfg.prefetch.ahead, 1);
        assert_eq!(cfg.scroll.settle, Duration::from_millis(150));
        assert!(cfg.cache.max_entries.is_none());
    }

    #[test]
    fn reads_yaml_with_humantime_durations() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "api:\n  base_url: http://backend.test\nscroll:\n  settle: 200ms\ncache:\n  max_entries: 50\nprefetch:\n  ahead: 2\n",
        )
        .unwrap();
        let cfg = load(LoadOptions {
            config_file: Some(path),
            env_prefix: Some("REELS_TEST_YAML".into()),
        })
        .unwrap();
        assert_eq!(cfg.api.base_url, "http://backend.test");
        assert_eq!(cfg.scroll.settle, Duration::from_millis(200));
        assert_eq!(cfg.cache.max_entries, Some(50));
        assert_eq!(cfg.prefetch.ahead, 2);
        assert_eq!(cfg.prefetch.batch_head, 2);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempdir().unwrap();
        let result = load(LoadOptions {
            config_file: Some(dir.path().join("nope.yaml")),
            env_prefix: Some("REELS_TEST_MISSING".into()),
        });
        assert!(result.is_err());
    }

    #[test]
    fn env_overrides() {
        env::set_var("REELS_TEST_ENV_FEED__CATEGORY", "短剧");
        env::set_var("REELS_TEST_ENV_SCROLL__SETTLE", "120ms");
        env::set_var("REELS_TEST_ENV_FETCH__WORKERS", "0");
        let (_dir, options) = isolated("REELS_TEST_ENV");
        let cfg = load(options).unwrap();
        assert_eq!(cfg.feed.category, "短剧");
        assert_eq!(cfg.scroll.settle, Duration::from_millis(120));
        assert_eq!(cfg.fetch.workers, 2);
        env::remove_var("REELS_TEST_ENV_FEED__CATEGORY");
        env::remove_var("REELS_TEST_ENV_SCROLL__SETTLE");
        env::remove_var("REELS_TEST_ENV_FETCH__WORKERS");
    }
}
