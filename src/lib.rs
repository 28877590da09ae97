/// Catalog Crawler
///
/// Crawls paginated video catalog sites (movies, episodes, channel listings) through a
/// rotating set of proxy relays, enriches each item with its playback servers and
/// persists the result as sharded JSON archives with a summary index.

pub mod models;
pub mod config;
pub mod site;
pub mod fetch;
pub mod extract;
pub mod enrich;
pub mod crawler;
pub mod archive;

// Re-export main types for easy access
pub use crate::archive::{ArchiveMode, ArchiveReader, ArchiveWriter, VerifyReport, WriteSummary};
pub use crate::config::{Config, ConfigBuilder};
pub use crate::crawler::{CrawlReport, CrawlState, Crawler};
pub use crate::enrich::{DetailEnricher, Enrich};
pub use crate::extract::PageExtractor;
pub use crate::fetch::{FetchOptions, HttpTransport, ProxyFetcher, ReqwestTransport};
pub use crate::models::{ArchiveIndex, ArchiveShard, ArchiveStats, Item, ItemCollection, Server};
pub use crate::site::{FieldSource, SiteConfig};

use std::path::PathBuf;

/// Result type for crawler operations
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Error types for crawler operations
#[derive(thiserror::Error, Debug)]
pub enum CrawlError {
    #[error("All proxies exhausted for {url} after {attempts} attempts")]
    FetchExhausted { url: String, attempts: usize },

    #[error("No items found on listing page {page}")]
    ExtractionEmpty { page: u32 },

    #[error("Failed to persist {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("Invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Refusing to write an archive with no items")]
    EmptyArchive,
}

impl CrawlError {
    pub(crate) fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }
}
