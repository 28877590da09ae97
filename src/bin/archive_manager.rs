use anyhow::{bail, Result};
use catalog_crawler::ArchiveReader;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "archive-manager")]
#[command(about = "Archive inspection utility")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, default_value = "./archive")]
    archive_dir: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Show archive statistics from the index
    Stats,
    /// Check the index against the shard files
    Verify,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .init();

    let cli = Cli::parse();
    let reader = ArchiveReader::new(&cli.archive_dir);

    match cli.command {
        Commands::Stats => {
            let index = match reader.read_index().await? {
                Some(index) => index,
                None => {
                    info!("📭 No archive found in {}", cli.archive_dir.display());
                    return Ok(());
                }
            };

            info!("📊 Archive Statistics:");
            info!("  Last updated: {}", index.last_updated.format("%Y-%m-%d %H:%M:%S UTC"));
            info!("  Total items: {}", index.total_items);
            info!("  Shards: {} (size {})", index.total_pages, index.shard_size);
            info!("  Items with servers: {}", index.stats.items_with_servers);
            info!("  Items with images: {}", index.stats.items_with_images);
            info!("  Total servers: {}", index.stats.total_servers);
        }

        Commands::Verify => {
            let report = reader.verify().await?;
            if report.is_consistent() {
                info!(
                    "✅ Archive is consistent: {} shard(s), {} item(s)",
                    report.shards_checked, report.items_checked
                );
            } else {
                for problem in &report.problems {
                    warn!("⚠️ {}", problem);
                }
                bail!("archive has {} problem(s)", report.problems.len());
            }
        }
    }

    Ok(())
}
