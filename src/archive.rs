/// Sharded JSON archive persistence
///
/// Layout of an archive directory:
/// - `index.json`: totals, shard filenames and aggregate statistics
/// - `page<N>.json`: one shard of at most `shard_size` items
/// - `titles.json`, `Home.json`, `report.md`: optional projections of the same items
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::config::ArchiveConfig;
use crate::models::{ArchiveIndex, ArchiveShard, ArchiveStats, Item, ItemCollection, MergeOutcome};
use crate::{CrawlError, Result};

pub const INDEX_FILE: &str = "index.json";
pub const TITLES_FILE: &str = "titles.json";
pub const HOME_FILE: &str = "Home.json";
pub const REPORT_FILE: &str = "report.md";

/// Shard filename for a 1-based shard number
pub fn shard_file_name(shard: usize) -> String {
    format!("page{}.json", shard)
}

/// Split items into contiguous shards of at most `shard_size` items
pub fn shard_items(items: &[Item], shard_size: usize) -> Vec<&[Item]> {
    items.chunks(shard_size.max(1)).collect()
}

/// Whether prior archive contents survive a write
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveMode {
    /// Union with the existing archive
    #[default]
    Incremental,
    /// Replace the existing archive
    Snapshot,
}

impl FromStr for ArchiveMode {
    type Err = CrawlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "incremental" => Ok(Self::Incremental),
            "snapshot" => Ok(Self::Snapshot),
            other => Err(CrawlError::Config(format!("unknown archive mode '{}'", other))),
        }
    }
}

/// Result of a successful write
#[derive(Debug, Clone)]
pub struct WriteSummary {
    pub shard_count: usize,
    pub index_path: PathBuf,
    pub total_items: usize,
    /// Items not present in the previous archive
    pub new_items: usize,
    /// Existing items replaced by a richer record
    pub replaced_items: usize,
}

#[derive(Debug, Serialize)]
struct TitleEntry<'a> {
    id: &'a str,
    title: &'a str,
}

/// Writes an item set into an archive directory. Callers must not run two writers
/// against the same directory at once.
#[derive(Debug, Clone)]
pub struct ArchiveWriter {
    target_dir: PathBuf,
    settings: ArchiveConfig,
}

impl ArchiveWriter {
    pub fn new(target_dir: impl Into<PathBuf>, settings: ArchiveConfig) -> Self {
        Self {
            target_dir: target_dir.into(),
            settings,
        }
    }

    /// Writer targeting the configured output directory
    pub fn from_config(settings: &ArchiveConfig) -> Self {
        Self::new(settings.output_dir.clone(), settings.clone())
    }

    pub fn target_dir(&self) -> &Path {
        &self.target_dir
    }

    /// Persist `items`, merging with the existing archive in incremental mode.
    ///
    /// Fails with [`CrawlError::EmptyArchive`] (writing nothing) when the final set is
    /// empty, and with [`CrawlError::Persistence`] on any I/O error.
    pub async fn write(&self, items: Vec<Item>) -> Result<WriteSummary> {
        let mut collection = ItemCollection::new(false);
        if self.settings.mode == ArchiveMode::Incremental {
            let existing = ArchiveReader::new(&self.target_dir).load_items().await?;
            debug!("Loaded {} existing item(s) for merge", existing.len());
            for item in existing {
                collection.insert(item);
            }
        }

        let mut new_items = 0;
        let mut replaced_items = 0;
        for item in items {
            match collection.merge(item) {
                MergeOutcome::Inserted => new_items += 1,
                MergeOutcome::Replaced => replaced_items += 1,
                MergeOutcome::Kept => {}
            }
        }

        let mut items = collection.into_items();
        if items.is_empty() {
            return Err(CrawlError::EmptyArchive);
        }
        if self.settings.sort_by_page {
            // Search results (page 0) go last
            items.sort_by_key(|item| if item.page_number == 0 { u32::MAX } else { item.page_number });
        }

        fs::create_dir_all(&self.target_dir)
            .await
            .map_err(|e| CrawlError::persistence(&self.target_dir, e))?;

        let generated_at = Utc::now();
        let shards = shard_items(&items, self.settings.shard_size);
        let shard_count = shards.len();
        let mut files = Vec::with_capacity(shard_count);
        let mut shard_sizes = Vec::with_capacity(shard_count);

        for (index, chunk) in shards.iter().enumerate() {
            let file = shard_file_name(index + 1);
            let shard = ArchiveShard {
                page: index + 1,
                total_pages: shard_count,
                total_items: items.len(),
                item_count: chunk.len(),
                generated_at,
                items: chunk.to_vec(),
            };
            write_json(&self.target_dir.join(&file), &shard).await?;
            debug!("💾 Wrote {} ({} items)", file, chunk.len());
            files.push(file);
            shard_sizes.push(chunk.len());
        }

        self.remove_stale_shards(shard_count).await?;

        let index = ArchiveIndex {
            last_updated: generated_at,
            total_items: items.len(),
            total_pages: shard_count,
            shard_size: self.settings.shard_size,
            files,
            shard_items: shard_sizes,
            stats: ArchiveStats::from_items(&items),
        };
        let index_path = self.target_dir.join(INDEX_FILE);
        write_json(&index_path, &index).await?;

        self.write_projections(&items, &index, generated_at).await?;

        info!(
            "📦 Archived {} item(s) in {} shard(s) at {} ({} new, {} replaced)",
            items.len(),
            shard_count,
            self.target_dir.display(),
            new_items,
            replaced_items
        );

        Ok(WriteSummary {
            shard_count,
            index_path,
            total_items: items.len(),
            new_items,
            replaced_items,
        })
    }

    /// Delete `page<N>.json` files left over from a larger previous archive
    async fn remove_stale_shards(&self, shard_count: usize) -> Result<()> {
        for (number, path) in list_shard_files(&self.target_dir).await? {
            if number > shard_count {
                fs::remove_file(&path)
                    .await
                    .map_err(|e| CrawlError::persistence(&path, e))?;
                debug!("🗑️ Removed stale shard {}", path.display());
            }
        }
        Ok(())
    }

    /// Write enabled projections and delete disabled ones left by earlier runs
    async fn write_projections(&self, items: &[Item], index: &ArchiveIndex, generated_at: DateTime<Utc>) -> Result<()> {
        if !self.settings.write_titles {
            remove_if_present(&self.target_dir.join(TITLES_FILE)).await?;
        }
        if self.settings.home_size == 0 {
            remove_if_present(&self.target_dir.join(HOME_FILE)).await?;
        }
        if !self.settings.write_report {
            remove_if_present(&self.target_dir.join(REPORT_FILE)).await?;
        }

        if self.settings.write_titles {
            let titles: Vec<TitleEntry<'_>> = items
                .iter()
                .map(|item| TitleEntry {
                    id: &item.id,
                    title: &item.title,
                })
                .collect();
            write_json(&self.target_dir.join(TITLES_FILE), &titles).await?;
        }

        if self.settings.home_size > 0 {
            let home: Vec<Item> = items.iter().take(self.settings.home_size).cloned().collect();
            let shard = ArchiveShard {
                page: 1,
                total_pages: 1,
                total_items: items.len(),
                item_count: home.len(),
                generated_at,
                items: home,
            };
            write_json(&self.target_dir.join(HOME_FILE), &shard).await?;
        }

        if self.settings.write_report {
            let path = self.target_dir.join(REPORT_FILE);
            fs::write(&path, format_report(index))
                .await
                .map_err(|e| CrawlError::persistence(&path, e))?;
        }

        Ok(())
    }
}

/// Markdown summary of an archive index
pub fn format_report(index: &ArchiveIndex) -> String {
    let mut content = String::new();

    content.push_str("# Catalog Archive\n\n");
    content.push_str("## Summary\n");
    content.push_str(&format!("- **Total Items**: {}\n", index.total_items));
    content.push_str(&format!("- **Shards**: {}\n", index.total_pages));
    content.push_str(&format!("- **Items With Servers**: {}\n", index.stats.items_with_servers));
    content.push_str(&format!("- **Items With Images**: {}\n", index.stats.items_with_images));
    content.push_str(&format!("- **Total Servers**: {}\n", index.stats.total_servers));
    content.push('\n');

    content.push_str("## Shards\n\n");
    content.push_str("| File | Items |\n|------|-------|\n");
    for (file, count) in index.files.iter().zip(&index.shard_items) {
        content.push_str(&format!("| {} | {} |\n", file, count));
    }

    content.push_str("\n---\n");
    content.push_str(&format!(
        "*Last updated {}*\n",
        index.last_updated.format("%Y-%m-%d %H:%M:%S UTC")
    ));

    content
}

/// Problems found by [`ArchiveReader::verify`]
#[derive(Debug, Clone, Default)]
pub struct VerifyReport {
    pub shards_checked: usize,
    pub items_checked: usize,
    pub problems: Vec<String>,
}

impl VerifyReport {
    pub fn is_consistent(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Read access to an archive directory
#[derive(Debug, Clone)]
pub struct ArchiveReader {
    dir: PathBuf,
}

impl ArchiveReader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The index, or `None` when the archive has never been written
    pub async fn read_index(&self) -> Result<Option<ArchiveIndex>> {
        let path = self.dir.join(INDEX_FILE);
        if !path_exists(&path).await? {
            return Ok(None);
        }
        read_json(&path).await.map(Some)
    }

    pub async fn read_shard(&self, file: &str) -> Result<ArchiveShard> {
        read_json(&self.dir.join(file)).await
    }

    /// Every archived item in shard order.
    ///
    /// Uses the index when present, otherwise any `page<N>.json` files in numeric order.
    pub async fn load_items(&self) -> Result<Vec<Item>> {
        if !path_exists(&self.dir).await? {
            return Ok(Vec::new());
        }

        let files = match self.read_index().await? {
            Some(index) => index.files,
            None => {
                let found = list_shard_files(&self.dir).await?;
                if !found.is_empty() {
                    warn!("No {} in {}, reading {} shard file(s) directly", INDEX_FILE, self.dir.display(), found.len());
                }
                found
                    .into_iter()
                    .filter_map(|(_, path)| path.file_name().map(|n| n.to_string_lossy().into_owned()))
                    .collect()
            }
        };

        let mut items = Vec::new();
        for file in files {
            items.extend(self.read_shard(&file).await?.items);
        }
        Ok(items)
    }

    /// Check the index against the shard files it references
    pub async fn verify(&self) -> Result<VerifyReport> {
        let mut report = VerifyReport::default();
        let index = match self.read_index().await? {
            Some(index) => index,
            None => {
                report.problems.push(format!("{} is missing", INDEX_FILE));
                return Ok(report);
            }
        };

        if index.files.len() != index.total_pages {
            report.problems.push(format!(
                "index lists {} files but total_pages is {}",
                index.files.len(),
                index.total_pages
            ));
        }

        let mut all_items = Vec::new();
        for (position, file) in index.files.iter().enumerate() {
            let shard = match self.read_shard(file).await {
                Ok(shard) => shard,
                Err(e) => {
                    report.problems.push(format!("{}: {}", file, e));
                    continue;
                }
            };
            report.shards_checked += 1;

            if shard.item_count != shard.items.len() {
                report.problems.push(format!(
                    "{} declares {} items but holds {}",
                    file,
                    shard.item_count,
                    shard.items.len()
                ));
            }
            if index.shard_items.get(position) != Some(&shard.items.len()) {
                report.problems.push(format!("index count for {} does not match the shard", file));
            }
            all_items.extend(shard.items);
        }

        report.items_checked = all_items.len();
        if all_items.len() != index.total_items {
            report.problems.push(format!(
                "index total_items is {} but shards hold {}",
                index.total_items,
                all_items.len()
            ));
        }

        let mut seen = ItemCollection::new(false);
        let duplicates = all_items.iter().filter(|item| !seen.insert((*item).clone())).count();
        if duplicates > 0 {
            report.problems.push(format!("{} duplicate id(s) across shards", duplicates));
        }

        if ArchiveStats::from_items(&all_items) != index.stats {
            report.problems.push("index stats do not match shard contents".to_string());
        }

        Ok(report)
    }
}

/// `page<N>.json` files in a directory, sorted by shard number
async fn list_shard_files(dir: &Path) -> Result<Vec<(usize, PathBuf)>> {
    let pattern = Regex::new(r"^page(\d+)\.json$")?;
    let mut found = Vec::new();
    let mut entries = fs::read_dir(dir)
        .await
        .map_err(|e| CrawlError::persistence(dir, e))?;

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| CrawlError::persistence(dir, e))?
    {
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(number) = pattern
            .captures(&name)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<usize>().ok())
        {
            found.push((number, entry.path()));
        }
    }

    found.sort_by_key(|(number, _)| *number);
    Ok(found)
}

async fn path_exists(path: &Path) -> Result<bool> {
    fs::try_exists(path)
        .await
        .map_err(|e| CrawlError::persistence(path, e))
}

async fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => {
            debug!("🗑️ Removed disabled projection {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CrawlError::persistence(path, e)),
    }
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json)
        .await
        .map_err(|e| CrawlError::persistence(path, e))
}

async fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)
        .await
        .map_err(|e| CrawlError::persistence(path, e))?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Server, DEFAULT_DURATION};
    use tempfile::TempDir;

    fn item(id: u32, page: u32) -> Item {
        Item::new(
            id.to_string(),
            format!("Item {}", id),
            format!("https://www.example.com/video.php?vid={}", id),
            String::new(),
            DEFAULT_DURATION.to_string(),
            page,
        )
    }

    fn with_server(mut item: Item) -> Item {
        item.servers.push(Server {
            name: "Server 1".to_string(),
            url: format!("https://www.example.com/embed/{}", item.id),
        });
        item
    }

    fn settings(shard_size: usize, mode: ArchiveMode) -> ArchiveConfig {
        ArchiveConfig {
            shard_size,
            mode,
            ..ArchiveConfig::default()
        }
    }

    #[test]
    fn test_shard_completeness() {
        for len in 0..12usize {
            let items: Vec<Item> = (0..len as u32).map(|i| item(i, 1)).collect();
            for size in 1..6usize {
                let shards = shard_items(&items, size);
                assert_eq!(shards.iter().map(|s| s.len()).sum::<usize>(), len);
                assert_eq!(shards.len(), (len + size - 1) / size);
            }
        }
    }

    #[test]
    fn test_archive_mode_from_str() {
        assert_eq!("Snapshot".parse::<ArchiveMode>().unwrap(), ArchiveMode::Snapshot);
        assert_eq!("incremental".parse::<ArchiveMode>().unwrap(), ArchiveMode::Incremental);
        assert!("append".parse::<ArchiveMode>().is_err());
    }

    #[tokio::test]
    async fn test_write_shards_and_index() {
        let temp_dir = TempDir::new().unwrap();
        let writer = ArchiveWriter::new(temp_dir.path(), settings(2, ArchiveMode::Snapshot));
        let items = vec![with_server(item(1, 1)), item(2, 1), with_server(item(3, 2))];

        let summary = writer.write(items).await.unwrap();
        assert_eq!(summary.shard_count, 2);
        assert_eq!(summary.total_items, 3);

        let reader = ArchiveReader::new(temp_dir.path());
        let index = reader.read_index().await.unwrap().unwrap();
        assert_eq!(index.files, vec!["page1.json", "page2.json"]);
        assert_eq!(index.shard_items, vec![2, 1]);
        assert_eq!(index.stats.total_servers, 2);
        assert_eq!(index.stats.items_with_servers, 2);

        let second = reader.read_shard("page2.json").await.unwrap();
        assert_eq!(second.page, 2);
        assert_eq!(second.total_pages, 2);
        assert_eq!(second.total_items, 3);
        assert_eq!(second.item_count, 1);
        assert_eq!(second.items[0].id, "3");

        assert!(temp_dir.path().join(TITLES_FILE).exists());
        assert!(temp_dir.path().join(HOME_FILE).exists());
        let report = std::fs::read_to_string(temp_dir.path().join(REPORT_FILE)).unwrap();
        assert!(report.contains("**Total Items**: 3"));

        assert!(reader.verify().await.unwrap().is_consistent());
    }

    #[tokio::test]
    async fn test_incremental_merge_dedups_and_upgrades() {
        let temp_dir = TempDir::new().unwrap();
        let writer = ArchiveWriter::new(temp_dir.path(), settings(10, ArchiveMode::Incremental));

        writer.write(vec![item(1, 1), item(2, 1)]).await.unwrap();
        let summary = writer
            .write(vec![with_server(item(2, 1)), item(3, 2)])
            .await
            .unwrap();

        assert_eq!(summary.total_items, 3);
        assert_eq!(summary.new_items, 1);
        assert_eq!(summary.replaced_items, 1);

        let items = ArchiveReader::new(temp_dir.path()).load_items().await.unwrap();
        let ids: Vec<_> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(items[1].servers.len(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_discards_and_removes_stale_shards() {
        let temp_dir = TempDir::new().unwrap();
        let many: Vec<Item> = (1..=5).map(|i| item(i, 1)).collect();
        ArchiveWriter::new(temp_dir.path(), settings(2, ArchiveMode::Snapshot))
            .write(many)
            .await
            .unwrap();
        assert!(temp_dir.path().join("page3.json").exists());

        let summary = ArchiveWriter::new(temp_dir.path(), settings(2, ArchiveMode::Snapshot))
            .write(vec![item(9, 1)])
            .await
            .unwrap();
        assert_eq!(summary.shard_count, 1);
        assert!(!temp_dir.path().join("page2.json").exists());
        assert!(!temp_dir.path().join("page3.json").exists());

        let items = ArchiveReader::new(temp_dir.path()).load_items().await.unwrap();
        assert_eq!(items.len(), 1);
    }

    #[tokio::test]
    async fn test_disabled_projections_are_removed() {
        let temp_dir = TempDir::new().unwrap();
        ArchiveWriter::new(temp_dir.path(), settings(10, ArchiveMode::Snapshot))
            .write(vec![item(1, 1)])
            .await
            .unwrap();
        for file in [TITLES_FILE, HOME_FILE, REPORT_FILE] {
            assert!(temp_dir.path().join(file).exists(), "{} missing", file);
        }

        let mut config = settings(10, ArchiveMode::Snapshot);
        config.write_titles = false;
        config.write_report = false;
        config.home_size = 0;
        ArchiveWriter::new(temp_dir.path(), config)
            .write(vec![item(2, 1)])
            .await
            .unwrap();

        for file in [TITLES_FILE, HOME_FILE, REPORT_FILE] {
            assert!(!temp_dir.path().join(file).exists(), "{} left behind", file);
        }
        assert!(temp_dir.path().join(INDEX_FILE).exists());
    }

    #[tokio::test]
    async fn test_sort_by_page_is_stable() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = settings(10, ArchiveMode::Snapshot);
        config.sort_by_page = true;
        let writer = ArchiveWriter::new(temp_dir.path(), config);

        writer
            .write(vec![item(1, 2), item(2, 0), item(3, 1), item(4, 2), item(5, 1)])
            .await
            .unwrap();
        let items = ArchiveReader::new(temp_dir.path()).load_items().await.unwrap();
        let ids: Vec<_> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["3", "5", "1", "4", "2"]);
    }

    #[tokio::test]
    async fn test_empty_write_creates_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("archive");
        let err = ArchiveWriter::new(&target, settings(2, ArchiveMode::Incremental))
            .write(Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CrawlError::EmptyArchive));
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn test_write_failure_is_surfaced() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("not-a-dir");
        std::fs::write(&blocker, "file").unwrap();

        let err = ArchiveWriter::new(&blocker, settings(2, ArchiveMode::Snapshot))
            .write(vec![item(1, 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, CrawlError::Persistence { .. }));
    }

    #[tokio::test]
    async fn test_load_without_index_reads_shards_in_order() {
        let temp_dir = TempDir::new().unwrap();
        ArchiveWriter::new(temp_dir.path(), settings(1, ArchiveMode::Snapshot))
            .write((1..=11).map(|i| item(i, 1)).collect())
            .await
            .unwrap();
        std::fs::remove_file(temp_dir.path().join(INDEX_FILE)).unwrap();

        let items = ArchiveReader::new(temp_dir.path()).load_items().await.unwrap();
        assert_eq!(items.len(), 11);
        assert_eq!(items[9].id, "10");
        assert_eq!(items[10].id, "11");
    }

    #[tokio::test]
    async fn test_verify_detects_tampering() {
        let temp_dir = TempDir::new().unwrap();
        ArchiveWriter::new(temp_dir.path(), settings(2, ArchiveMode::Snapshot))
            .write(vec![item(1, 1), item(2, 1), item(3, 1)])
            .await
            .unwrap();

        let reader = ArchiveReader::new(temp_dir.path());
        let mut shard = reader.read_shard("page2.json").await.unwrap();
        shard.items.push(item(1, 1));
        std::fs::write(
            temp_dir.path().join("page2.json"),
            serde_json::to_string(&shard).unwrap(),
        )
        .unwrap();

        let report = reader.verify().await.unwrap();
        assert!(!report.is_consistent());
        assert!(report.problems.iter().any(|p| p.contains("duplicate")));
    }
}
