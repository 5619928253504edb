//! Runtime configuration loaded from a TOML file.
//!
//! Every field has a default so an empty (or absent) file yields a working setup.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub store: StoreSettings,
    pub indexer: IndexerSettings,
    pub runner: RunnerSettings,
    pub search: SearchSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
    /// Base URL used for loopback dispatch. Derived from `bind` when empty.
    pub loopback_url: Option<String>,
    /// Cookie header forwarded on loopback requests.
    pub loopback_cookies: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:7700".to_string(),
            loopback_url: None,
            loopback_cookies: String::new(),
        }
    }
}

impl ServerSettings {
    pub fn loopback_base(&self) -> String {
        match &self.loopback_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://{}", self.bind),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub site_id: u64,
    /// Share one index across every site of the network.
    pub network_wide: bool,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            site_id: 1,
            network_wide: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerSettings {
    pub languages: Vec<String>,
    pub default_language: String,
    pub parallel_building: bool,
    pub item_set_size: usize,
    pub batch_size: usize,
    pub doc_types: Vec<String>,
    pub taxonomies: Vec<String>,
    pub index_taxonomies: bool,
    pub index_vendors: bool,
    pub index_variations: bool,
    pub max_term_length: usize,
    pub stopwords: Vec<String>,
}

impl Default for IndexerSettings {
    fn default() -> Self {
        Self {
            languages: vec!["en".to_string()],
            default_language: "en".to_string(),
            parallel_building: true,
            item_set_size: 25,
            batch_size: 50,
            doc_types: vec!["product".to_string(), "post".to_string()],
            taxonomies: vec!["product_cat".to_string(), "product_tag".to_string()],
            index_taxonomies: true,
            index_vendors: false,
            index_variations: true,
            max_term_length: 50,
            stopwords: Vec::new(),
        }
    }
}

impl IndexerSettings {
    pub fn is_multilingual(&self) -> bool {
        self.languages.len() > 1
    }

    /// Configured languages, never empty.
    pub fn active_languages(&self) -> Vec<String> {
        if self.languages.is_empty() {
            vec![self.default_language.clone()]
        } else {
            self.languages.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Spawn the runner on the local tokio runtime.
    Spawn,
    /// POST to the process' own HTTP endpoint.
    Loopback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSettings {
    pub time_limit_secs: u64,
    pub memory_limit_mb: u64,
    pub max_items_per_invocation: Option<usize>,
    pub lock_ttl_secs: u64,
    pub healthcheck_interval_secs: u64,
    pub dispatch_poll_attempts: u32,
    pub dispatch_poll_delay_ms: u64,
    pub dispatch_attempts: usize,
    pub dispatch_mode: DispatchMode,
    pub max_item_attempts: u32,
    pub swap_lock_timeout_secs: u64,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            time_limit_secs: 20,
            memory_limit_mb: 256,
            max_items_per_invocation: None,
            lock_ttl_secs: 60,
            healthcheck_interval_secs: 60,
            dispatch_poll_attempts: 3,
            dispatch_poll_delay_ms: 200,
            dispatch_attempts: 3,
            dispatch_mode: DispatchMode::Spawn,
            max_item_attempts: 3,
            swap_lock_timeout_secs: 10,
        }
    }
}

impl RunnerSettings {
    /// The run lock is not renewed during an invocation, so the time budget has to end
    /// before the lock expires or the healthcheck could start a second invocation.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.time_limit_secs < self.lock_ttl_secs,
            "runner.time_limit_secs ({}) must be below runner.lock_ttl_secs ({})",
            self.time_limit_secs,
            self.lock_ttl_secs
        );
        Ok(())
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn healthcheck_interval(&self) -> Duration {
        Duration::from_secs(self.healthcheck_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub max_tokens: usize,
    pub min_chars: usize,
    pub match_all_tokens: bool,
    pub prefix_expansions: usize,
    pub limits: ResultLimits,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            max_tokens: 10,
            min_chars: 1,
            match_all_tokens: true,
            prefix_expansions: 25,
            limits: ResultLimits::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultLimits {
    pub products: usize,
    pub posts: usize,
    pub taxonomies: usize,
    pub vendors: usize,
}

impl Default for ResultLimits {
    fn default() -> Self {
        Self {
            products: 7,
            posts: 3,
            taxonomies: 3,
            vendors: 3,
        }
    }
}

impl Settings {
    /// Loads settings from `path`, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let settings: Settings = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        settings
            .validate()
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        self.runner.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_config_uses_defaults() {
        let settings: Settings = toml::from_str("").unwrap();
        assert_eq!(settings.indexer.languages, vec!["en"]);
        assert_eq!(settings.runner.lock_ttl_secs, 60);
        assert_eq!(settings.runner.dispatch_mode, DispatchMode::Spawn);
        assert_eq!(settings.search.limits.products, 7);
    }

    #[test]
    fn test_partial_sections() {
        let toml = r#"
[indexer]
languages = ["en", "de"]
index_vendors = true

[runner]
dispatch_mode = "loopback"
max_items_per_invocation = 2
"#;
        let settings: Settings = toml::from_str(toml).unwrap();
        assert!(settings.indexer.is_multilingual());
        assert!(settings.indexer.index_vendors);
        assert_eq!(settings.indexer.batch_size, 50);
        assert_eq!(settings.runner.dispatch_mode, DispatchMode::Loopback);
        assert_eq!(settings.runner.max_items_per_invocation, Some(2));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nbind = \"0.0.0.0:9000\"").unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.server.bind, "0.0.0.0:9000");
        assert_eq!(settings.server.loopback_base(), "http://0.0.0.0:9000");
    }

    #[test]
    fn test_time_budget_must_end_before_lock_expires() {
        // ARRANGE
        let mut equal = tempfile::NamedTempFile::new().unwrap();
        writeln!(equal, "[runner]\ntime_limit_secs = 60\nlock_ttl_secs = 60").unwrap();
        let mut below = tempfile::NamedTempFile::new().unwrap();
        writeln!(below, "[runner]\ntime_limit_secs = 59\nlock_ttl_secs = 60").unwrap();

        // ACT
        let rejected = Settings::load(Some(equal.path()));
        let accepted = Settings::load(Some(below.path()));

        // ASSERT
        let message = format!("{:#}", rejected.unwrap_err());
        assert!(message.contains("time_limit_secs"), "{}", message);
        assert_eq!(accepted.unwrap().runner.time_limit_secs, 59);
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn test_load_rejects_invalid_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[runner\nlock_ttl_secs = ").unwrap();
        assert!(Settings::load(Some(file.path())).is_err());
    }
}
