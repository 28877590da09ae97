use anyhow::{anyhow, Result};
use clap::{Arg, Command};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use catalog_crawler::{ArchiveMode, ArchiveWriter, Config, CrawlError, Crawler, ReqwestTransport};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("Catalog Crawler")
        .version(env!("CARGO_PKG_VERSION"))
        .author("TigreRoll")
        .about("Crawls a paginated media catalog into a sharded JSON archive")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file (defaults to catalog-crawler.toml)")
        )
        .arg(
            Arg::new("output-dir")
                .short('o')
                .long("output-dir")
                .value_name("DIR")
                .help("Archive output directory")
        )
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .value_name("MODE")
                .help("Archive mode: incremental or snapshot")
                .value_parser(["incremental", "snapshot"])
        )
        .arg(
            Arg::new("max-pages")
                .long("max-pages")
                .value_name("NUM")
                .help("Maximum number of listing pages to visit")
                .value_parser(clap::value_parser!(u32))
        )
        .arg(
            Arg::new("max-items")
                .long("max-items")
                .value_name("NUM")
                .help("Stop after collecting this many items (0 = unlimited)")
                .value_parser(clap::value_parser!(usize))
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(clap::ArgAction::SetTrue)
        )
        .get_matches();

    let verbose = matches.get_flag("verbose");

    let loaded = match matches.get_one::<String>("config") {
        Some(path) => Config::load_from(&PathBuf::from(path)).map(|c| (c, None)),
        None => Ok(Config::load()
            .map(|c| (c, None))
            .unwrap_or_else(|e| (Config::from_env(), Some(e)))),
    };
    let (mut config, fallback_reason) = loaded?;

    // RUST_LOG wins over both the config level and --verbose
    let level = if verbose { "debug" } else { config.logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("catalog_crawler={},warn", level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Some(reason) = fallback_reason {
        warn!("Failed to load config, using defaults: {}", reason);
    }

    if let Some(dir) = matches.get_one::<String>("output-dir") {
        config.archive.output_dir = PathBuf::from(dir);
    }
    if let Some(mode) = matches.get_one::<String>("mode") {
        config.archive.mode = mode.parse::<ArchiveMode>()?;
    }
    if let Some(max_pages) = matches.get_one::<u32>("max-pages") {
        config.crawl.max_pages = *max_pages;
    }
    if let Some(max_items) = matches.get_one::<usize>("max-items") {
        config.crawl.max_items = *max_items;
    }

    config.validate()?;

    info!("🚀 Catalog Crawler starting...");
    for line in config.summary().lines() {
        info!("{}", line);
    }

    let crawler = Crawler::from_config(&config, Arc::new(ReqwestTransport::new()))?;

    let start_time = std::time::Instant::now();
    let report = match crawler.run().await {
        Ok(report) => report,
        Err(e) => {
            error!("❌ Crawl aborted: {}", e);
            return Err(e.into());
        }
    };

    info!("🎉 Crawl completed in {:.2}s", start_time.elapsed().as_secs_f64());
    info!("📄 Pages visited: {}/{}", report.pages_visited, report.pages_discovered);
    info!("❌ Pages failed: {}", report.pages_failed);
    info!("🔍 Searches run: {}", report.searches_run);
    info!("♻️ Duplicates skipped: {}", report.duplicates_skipped);
    info!("📊 Items collected: {}", report.items.len());
    if report.items_without_servers > 0 {
        warn!("⚠️ {} item(s) have no playback servers", report.items_without_servers);
    }
    if report.capped {
        info!("🛑 Item cap of {} reached", config.crawl.max_items);
    }

    let writer = ArchiveWriter::from_config(&config.archive);
    if report.items.is_empty() {
        error!("No items extracted; leaving {} untouched", writer.target_dir().display());
        return Err(anyhow!("crawl produced no items"));
    }

    match writer.write(report.items).await {
        Ok(summary) => {
            info!("✅ Archive written: {} item(s), {} shard(s)", summary.total_items, summary.shard_count);
            info!("📂 Index: {}", summary.index_path.display());
            Ok(())
        }
        Err(CrawlError::EmptyArchive) => {
            error!("No items extracted; nothing written to {}", writer.target_dir().display());
            Err(anyhow!("crawl produced no items"))
        }
        Err(e) => Err(e.into()),
    }
}
