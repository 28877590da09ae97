use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::archive::ArchiveMode;
use crate::extract::PageExtractor;
use crate::site::{compile_selector, FieldChain, SiteConfig};

/// Configuration for one crawl run
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Proxy and retry settings
    pub fetch: FetchConfig,

    /// Pagination, caps and pacing
    pub crawl: CrawlConfig,

    /// Output archive settings
    pub archive: ArchiveConfig,

    /// Target site selectors
    pub site: SiteConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Proxy rewrites tried in order; an empty string is a direct connection
    pub proxies: Vec<String>,

    /// Per-attempt timeout in seconds
    pub timeout_seconds: u64,

    /// Minimum body length accepted as a real page
    pub min_body_len: usize,

    /// Passes over the whole proxy list
    pub rounds: u32,

    /// Backoff unit between rounds (milliseconds, multiplied by the round number)
    pub backoff_base_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// Ceiling for discovered listing pages
    pub max_pages: u32,

    /// Stop collecting once this many items are held (0 = unlimited)
    pub max_items: usize,

    /// Pause between listing pages (milliseconds)
    pub page_delay_ms: u64,

    /// Pause between item enrichments (milliseconds)
    pub item_delay_ms: u64,

    /// Also deduplicate by title+link hash
    pub dedup_by_content: bool,

    /// Fetch detail and player pages for each item
    pub enrich: bool,

    /// Run the site's search queries after pagination
    pub run_search: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Archive directory
    pub output_dir: PathBuf,

    /// Items per shard file
    pub shard_size: usize,

    /// Merge with the existing archive or replace it
    pub mode: ArchiveMode,

    /// Reorder by page number (stable) before sharding
    pub sort_by_page: bool,

    /// Write `titles.json`
    pub write_titles: bool,

    /// Write `report.md`
    pub write_report: bool,

    /// Items in `Home.json` (0 disables it)
    pub home_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default tracing filter directive
    pub level: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            proxies: vec![
                String::new(),
                "https://api.allorigins.win/raw?url=".to_string(),
                "https://corsproxy.io/?".to_string(),
            ],
            timeout_seconds: 20,
            min_body_len: 500,
            rounds: 3,
            backoff_base_ms: 2000,
        }
    }
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_pages: 50,
            max_items: 5000,
            page_delay_ms: 1500,
            item_delay_ms: 500,
            dedup_by_content: false,
            enrich: true,
            run_search: true,
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./archive"),
            shard_size: 500,
            mode: ArchiveMode::Incremental,
            sort_by_page: false,
            write_titles: true,
            write_report: true,
            home_size: 50,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the first default location that exists
    pub fn load() -> Result<Self> {
        let config_paths = ["catalog-crawler.toml", "config/catalog-crawler.toml"];

        for path in &config_paths {
            if Path::new(path).exists() {
                return Self::load_from(Path::new(path));
            }
        }

        Err(anyhow!("No configuration file found"))
    }

    /// Load configuration from a TOML file, then apply environment overrides
    pub fn load_from(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Config = toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        tracing::info!("📄 Loaded configuration from: {}", path.display());
        config.apply_env();
        Ok(config)
    }

    /// Defaults with environment overrides
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        if let Ok(output_dir) = std::env::var("CATALOG_CRAWLER_OUTPUT_DIR") {
            self.archive.output_dir = PathBuf::from(output_dir);
        }

        if let Ok(max_pages) = std::env::var("CATALOG_CRAWLER_MAX_PAGES") {
            self.crawl.max_pages = max_pages.parse().unwrap_or(self.crawl.max_pages);
        }

        if let Ok(max_items) = std::env::var("CATALOG_CRAWLER_MAX_ITEMS") {
            self.crawl.max_items = max_items.parse().unwrap_or(self.crawl.max_items);
        }

        if let Ok(shard_size) = std::env::var("CATALOG_CRAWLER_SHARD_SIZE") {
            self.archive.shard_size = shard_size.parse().unwrap_or(self.archive.shard_size);
        }

        if let Ok(proxies) = std::env::var("CATALOG_CRAWLER_PROXIES") {
            self.fetch.proxies = proxies.split(',').map(|p| p.trim().to_string()).collect();
        }

        if let Ok(log_level) = std::env::var("CATALOG_CRAWLER_LOG_LEVEL") {
            self.logging.level = log_level;
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let config_str = toml::to_string_pretty(self)?;
        std::fs::write(path, config_str)?;
        tracing::info!("💾 Configuration saved to: {}", path.display());
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.archive.shard_size == 0 {
            return Err(anyhow!("shard_size must be greater than 0"));
        }

        if self.fetch.rounds == 0 {
            return Err(anyhow!("rounds must be greater than 0"));
        }

        if self.fetch.proxies.is_empty() {
            return Err(anyhow!("at least one proxy route is required (use \"\" for direct)"));
        }

        if self.site.base_url.is_empty() {
            return Err(anyhow!("site.base_url must be set"));
        }

        url::Url::parse(&self.site.base_url)
            .map_err(|e| anyhow!("site.base_url '{}' is not absolute: {}", self.site.base_url, e))?;

        // Compile every selector and pattern up front
        PageExtractor::new(&self.site)?;
        let detail = &self.site.detail;
        for chain in [&detail.description, &detail.image, &detail.server_url, &detail.server_name] {
            FieldChain::compile(chain)?;
        }
        compile_selector(&detail.server_item)?;
        if let Some(embed) = &detail.embed_fallback {
            compile_selector(embed)?;
        }

        tracing::info!("✅ Configuration validation passed");
        Ok(())
    }

    /// Get runtime configuration summary
    pub fn summary(&self) -> String {
        format!(
            "Catalog Crawler Configuration:\n\
            - Site: {} ({})\n\
            - Proxy routes: {} x {} round(s)\n\
            - Page cap: {}\n\
            - Item cap: {}\n\
            - Output Directory: {}\n\
            - Archive mode: {:?}\n\
            - Shard size: {}",
            self.site.name,
            self.site.base_url,
            self.fetch.proxies.len(),
            self.fetch.rounds,
            self.crawl.max_pages,
            self.crawl.max_items,
            self.archive.output_dir.display(),
            self.archive.mode,
            self.archive.shard_size
        )
    }
}

/// Configuration builder for programmatic config creation
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_site(mut self, site: SiteConfig) -> Self {
        self.config.site = site;
        self
    }

    pub fn with_proxies(mut self, proxies: Vec<String>) -> Self {
        self.config.fetch.proxies = proxies;
        self
    }

    pub fn with_output_dir(mut self, dir: PathBuf) -> Self {
        self.config.archive.output_dir = dir;
        self
    }

    pub fn with_shard_size(mut self, shard_size: usize) -> Self {
        self.config.archive.shard_size = shard_size;
        self
    }

    pub fn with_mode(mut self, mode: ArchiveMode) -> Self {
        self.config.archive.mode = mode;
        self
    }

    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.config.crawl.max_pages = max_pages;
        self
    }

    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.config.crawl.max_items = max_items;
        self
    }

    /// Zero every delay and backoff; used for tests and local mirrors
    pub fn without_delays(mut self) -> Self {
        self.config.crawl.page_delay_ms = 0;
        self.config.crawl.item_delay_ms = 0;
        self.config.fetch.backoff_base_ms = 0;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.fetch.rounds, 3);
        assert_eq!(config.crawl.max_pages, 50);
        assert_eq!(config.archive.shard_size, 500);
        assert!(config.fetch.proxies.contains(&String::new()));
    }

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .with_shard_size(2)
            .with_max_pages(3)
            .with_mode(ArchiveMode::Snapshot)
            .without_delays()
            .build();

        assert_eq!(config.archive.shard_size, 2);
        assert_eq!(config.crawl.max_pages, 3);
        assert_eq!(config.archive.mode, ArchiveMode::Snapshot);
        assert_eq!(config.crawl.item_delay_ms, 0);
        assert_eq!(config.fetch.backoff_base_ms, 0);
    }

    #[test]
    fn test_config_validation() {
        assert!(Config::default().validate().is_ok());

        let zero_shards = ConfigBuilder::new().with_shard_size(0).build();
        assert!(zero_shards.validate().is_err());

        let no_proxies = ConfigBuilder::new().with_proxies(Vec::new()).build();
        assert!(no_proxies.validate().is_err());

        let mut bad_selector = Config::default();
        bad_selector.site.listing.card = "div[".to_string();
        assert!(bad_selector.validate().is_err());

        let mut relative_base = Config::default();
        relative_base.site.base_url = "/relative".to_string();
        assert!(relative_base.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("catalog-crawler.toml");
        std::fs::write(
            &path,
            r#"
            [archive]
            shard_size = 800
            mode = "snapshot"

            [site]
            name = "tv"
            base_url = "https://tv.example.org"
            search_queries = ["news", "sport"]

            [site.listing]
            card = "article.channel"
            "#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.archive.shard_size, 800);
        assert_eq!(config.archive.mode, ArchiveMode::Snapshot);
        assert_eq!(config.site.listing.card, "article.channel");
        assert_eq!(config.site.search_queries.len(), 2);
        assert_eq!(config.fetch.rounds, 3);
        assert!(!config.site.listing.title.is_empty());
    }

    #[test]
    fn test_save_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("saved.toml");
        let config = ConfigBuilder::new().with_shard_size(123).build();
        config.save(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.archive.shard_size, 123);
        assert_eq!(loaded.site.listing.title, config.site.listing.title);
    }
}
