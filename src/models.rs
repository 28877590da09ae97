/// Records shared by the crawl pipeline and the on-disk archive format
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Duration stored when a listing card carries none
pub const DEFAULT_DURATION: &str = "00:00";

/// A named playback source for an item
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Server {
    pub name: String,
    pub url: String,
}

/// One extracted catalog entry (movie, episode or channel)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
    /// Stable identifier, used as the deduplication key
    pub id: String,
    /// Cleaned, length-capped title
    pub title: String,
    /// Absolute URL of the detail page
    pub link: String,
    /// Absolute thumbnail URL, empty when unknown
    pub image: String,
    /// Free-text duration, `00:00` when absent
    pub duration: String,
    /// Meta description from the detail page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Playback sources in page order
    #[serde(default)]
    pub servers: Vec<Server>,
    /// Listing page the item was found on (0 for search results)
    #[serde(default)]
    pub page_number: u32,
    pub extracted_at: DateTime<Utc>,
}

impl Item {
    /// Build a listing-only item; servers and description are filled in by enrichment
    pub fn new(id: String, title: String, link: String, image: String, duration: String, page_number: u32) -> Self {
        Self {
            id,
            title,
            link,
            image,
            duration,
            description: None,
            servers: Vec::new(),
            page_number,
            extracted_at: Utc::now(),
        }
    }

    /// Secondary identity: lowercased title plus the link without query or fragment,
    /// so mirrors of one page under tracking parameters collapse together
    pub fn content_hash(&self) -> String {
        let link = match url::Url::parse(&self.link) {
            Ok(mut parsed) => {
                parsed.set_query(None);
                parsed.set_fragment(None);
                parsed.to_string()
            }
            Err(_) => self.link.clone(),
        };
        let key = format!("{}|{}", self.title.to_lowercase(), link);
        format!("{:x}", md5::compute(key.as_bytes()))
    }

    /// Number of optional fields carrying data
    pub fn populated_fields(&self) -> usize {
        [
            !self.image.is_empty(),
            self.description.as_deref().map_or(false, |d| !d.is_empty()),
            !self.servers.is_empty(),
            !self.duration.is_empty() && self.duration != DEFAULT_DURATION,
        ]
        .iter()
        .filter(|populated| **populated)
        .count()
    }

    /// Whether `self` should replace `existing` when both share an id
    pub fn is_richer_than(&self, existing: &Item) -> bool {
        match (self.servers.is_empty(), existing.servers.is_empty()) {
            (false, true) => true,
            (true, false) => false,
            _ => self.populated_fields() > existing.populated_fields(),
        }
    }
}

/// What happened when an item was offered to an [`ItemCollection`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    Replaced,
    Kept,
}

/// Insertion-ordered item set with O(1) membership checks by id
/// and, optionally, by content hash.
#[derive(Debug, Clone, Default)]
pub struct ItemCollection {
    items: Vec<Item>,
    positions: HashMap<String, usize>,
    hashes: HashSet<String>,
    track_content: bool,
}

impl ItemCollection {
    pub fn new(track_content: bool) -> Self {
        Self {
            track_content,
            ..Self::default()
        }
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.positions.contains_key(id)
    }

    /// True when the item's id (or content hash, if tracked) has been seen
    pub fn is_duplicate(&self, item: &Item) -> bool {
        self.contains_id(&item.id) || (self.track_content && self.hashes.contains(&item.content_hash()))
    }

    /// Append the item unless it is a duplicate. Returns whether it was added.
    pub fn insert(&mut self, item: Item) -> bool {
        if self.is_duplicate(&item) {
            return false;
        }
        self.push(item);
        true
    }

    /// Insert new ids; for known ids keep the existing record unless the
    /// offered one is richer, in which case it takes the existing slot.
    pub fn merge(&mut self, item: Item) -> MergeOutcome {
        match self.positions.get(&item.id).copied() {
            Some(position) => {
                if item.is_richer_than(&self.items[position]) {
                    if self.track_content {
                        self.hashes.insert(item.content_hash());
                    }
                    self.items[position] = item;
                    MergeOutcome::Replaced
                } else {
                    MergeOutcome::Kept
                }
            }
            None => {
                if self.track_content && self.hashes.contains(&item.content_hash()) {
                    return MergeOutcome::Kept;
                }
                self.push(item);
                MergeOutcome::Inserted
            }
        }
    }

    fn push(&mut self, item: Item) {
        if self.track_content {
            self.hashes.insert(item.content_hash());
        }
        self.positions.insert(item.id.clone(), self.items.len());
        self.items.push(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn into_items(self) -> Vec<Item> {
        self.items
    }
}

/// Aggregate statistics, always recomputed from a full item set
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArchiveStats {
    pub total_servers: usize,
    pub items_with_servers: usize,
    pub items_with_images: usize,
}

impl ArchiveStats {
    pub fn from_items<'a>(items: impl IntoIterator<Item = &'a Item>) -> Self {
        items.into_iter().fold(Self::default(), |mut stats, item| {
            stats.total_servers += item.servers.len();
            if !item.servers.is_empty() {
                stats.items_with_servers += 1;
            }
            if !item.image.is_empty() {
                stats.items_with_images += 1;
            }
            stats
        })
    }
}

/// One `page<N>.json` file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveShard {
    /// 1-based shard number
    pub page: usize,
    /// Number of shards in the archive
    pub total_pages: usize,
    /// Number of items in the whole archive
    pub total_items: usize,
    /// Number of items in this shard
    pub item_count: usize,
    pub generated_at: DateTime<Utc>,
    pub items: Vec<Item>,
}

/// `index.json`, summarising every shard of an archive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveIndex {
    pub last_updated: DateTime<Utc>,
    pub total_items: usize,
    pub total_pages: usize,
    pub shard_size: usize,
    /// Shard filenames in shard order
    pub files: Vec<String>,
    /// Item count per shard, parallel to `files`
    pub shard_items: Vec<usize>,
    pub stats: ArchiveStats,
}
