use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::rate_limit::{DEFAULT_EDIT_DELAY_MS, RateLimiter};
use crate::search::{DEFAULT_MAX_PATTERN_LENGTH, DEFAULT_MAX_RESULTS, SearchOptions};

pub const DEFAULT_API_URL: &str = "https://commons.wikimedia.org/w/api.php";
pub const DEFAULT_USER_AGENT: &str = "catbatch/0.2 (category batch updates)";
pub const STATE_DIR_NAME: &str = ".catbatch";
pub const CONFIG_FILENAME: &str = "config.toml";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct CatbatchConfig {
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub batch: BatchSection,
    #[serde(default)]
    pub search: SearchSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct BatchSection {
    pub edit_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SearchSection {
    pub max_results: Option<usize>,
    pub detail_batch_size: Option<usize>,
    pub max_pattern_length: Option<usize>,
}

impl CatbatchConfig {
    /// Resolve the wiki API URL: env WIKI_API_URL > config > Commons.
    pub fn api_url(&self) -> String {
        env_override("WIKI_API_URL")
            .or_else(|| self.wiki.api_url.clone())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
    }

    /// Resolve user agent: env WIKI_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        env_override("WIKI_USER_AGENT")
            .or_else(|| self.wiki.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn rate_limiter(&self) -> RateLimiter {
        RateLimiter::from_millis(self.batch.edit_delay_ms.unwrap_or(DEFAULT_EDIT_DELAY_MS))
    }

    pub fn search_options(&self) -> SearchOptions {
        let defaults = SearchOptions::default();
        SearchOptions {
            max_results: self.search.max_results.unwrap_or(DEFAULT_MAX_RESULTS),
            detail_batch_size: self
                .search
                .detail_batch_size
                .unwrap_or(defaults.detail_batch_size),
            max_pattern_length: self
                .search
                .max_pattern_length
                .unwrap_or(DEFAULT_MAX_PATTERN_LENGTH),
        }
    }
}

/// `<cwd>/.catbatch/config.toml`.
pub fn default_config_path(cwd: &Path) -> PathBuf {
    cwd.join(STATE_DIR_NAME).join(CONFIG_FILENAME)
}

/// Load and parse the config file. Returns defaults if the file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<CatbatchConfig> {
    if !config_path.exists() {
        return Ok(CatbatchConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: CatbatchConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

fn env_override(key: &str) -> Option<String> {
    let value = env::var(key).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
