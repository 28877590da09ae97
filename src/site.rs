/// Per-site selector configuration
///
/// Every field is read through an ordered list of [`FieldSource`] strategies; the first
/// strategy producing an acceptable value wins. Keeping the order in configuration makes
/// the fallback sequence explicit and testable instead of buried in code.
use scraper::{ElementRef, Selector};
use serde::{Deserialize, Serialize};

use crate::{CrawlError, Result};

/// One way of reading a value out of an element
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "from", rename_all = "snake_case")]
pub enum FieldSource {
    /// Text content of the first match. An empty selector reads the element itself.
    Text {
        #[serde(default)]
        selector: String,
    },
    /// Attribute of the first match. An empty selector reads the element itself.
    Attr {
        #[serde(default)]
        selector: String,
        attr: String,
    },
}

impl FieldSource {
    pub fn text(selector: &str) -> Self {
        Self::Text {
            selector: selector.to_string(),
        }
    }

    pub fn attr(selector: &str, attr: &str) -> Self {
        Self::Attr {
            selector: selector.to_string(),
            attr: attr.to_string(),
        }
    }
}

/// Rewrites a detail URL into the URL of its player page
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathRewrite {
    pub from: String,
    pub to: String,
}

impl PathRewrite {
    /// Replace the first occurrence of `from`; URLs without it are returned unchanged
    pub fn apply(&self, url: &str) -> String {
        if self.from.is_empty() {
            return url.to_string();
        }
        url.replacen(&self.from, &self.to, 1)
    }
}

/// Selectors for listing pages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingSelectors {
    /// Repeating card element, one per item
    pub card: String,
    pub link: Vec<FieldSource>,
    pub title: Vec<FieldSource>,
    pub image: Vec<FieldSource>,
    pub duration: Vec<FieldSource>,
    /// Elements scanned for page numbers during page-count discovery
    pub pagination: String,
}

impl Default for ListingSelectors {
    fn default() -> Self {
        Self {
            card: "div.video-item".to_string(),
            link: vec![FieldSource::attr("a", "href")],
            title: vec![
                FieldSource::text(".title"),
                FieldSource::text("h2"),
                FieldSource::text("h3"),
                FieldSource::attr("img", "alt"),
            ],
            image: vec![
                FieldSource::attr("img", "data-src"),
                FieldSource::attr("img", "data-original"),
                FieldSource::attr("img", "src"),
            ],
            duration: vec![FieldSource::text(".duration"), FieldSource::text(".time")],
            pagination: ".pagination a, a[href*='page=']".to_string(),
        }
    }
}

/// Selectors for detail and player pages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetailSelectors {
    pub description: Vec<FieldSource>,
    pub image: Vec<FieldSource>,
    /// Turns the detail URL into the player URL; `None` reads servers from the detail page
    pub player_path: Option<PathRewrite>,
    /// Repeating server-list element on the player page
    pub server_item: String,
    pub server_url: Vec<FieldSource>,
    pub server_name: Vec<FieldSource>,
    /// Single embed used as `Server 1` when the server list is missing
    pub embed_fallback: Option<String>,
}

impl Default for DetailSelectors {
    fn default() -> Self {
        Self {
            description: vec![
                FieldSource::attr("meta[name='description']", "content"),
                FieldSource::attr("meta[property='og:description']", "content"),
            ],
            image: vec![
                FieldSource::attr("meta[property='og:image']", "content"),
                FieldSource::attr("meta[name='twitter:image']", "content"),
            ],
            player_path: Some(PathRewrite {
                from: "video.php".to_string(),
                to: "play.php".to_string(),
            }),
            server_item: "ul.servers li".to_string(),
            server_url: vec![
                FieldSource::attr("", "data-url"),
                FieldSource::attr("", "data-src"),
                FieldSource::attr("a", "href"),
                FieldSource::attr("iframe", "src"),
            ],
            server_name: vec![FieldSource::text("")],
            embed_fallback: Some("iframe[src]".to_string()),
        }
    }
}

/// Everything site-specific the pipeline needs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Short name used in logs
    pub name: String,
    /// Placeholder prefix for untitled items ("Video 3", "Channel 12")
    pub kind: String,
    /// Base URL used to absolutize relative links
    pub base_url: String,
    /// Listing URL template containing `{page}`
    pub listing_url: String,
    /// Overrides the template for page 1 when the site has no `page=1` form
    pub first_page_url: Option<String>,
    /// Search URL template containing `{query}`
    pub search_url: Option<String>,
    pub search_queries: Vec<String>,
    /// Sent as `Referer` on every request
    pub referer: Option<String>,
    pub listing: ListingSelectors,
    pub detail: DetailSelectors,
    /// Regexes whose first capture group is the item id
    pub id_patterns: Vec<String>,
    pub max_items_per_page: usize,
    pub title_max_len: usize,
    pub description_max_len: usize,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            name: "catalog".to_string(),
            kind: "Video".to_string(),
            base_url: "https://www.example.com".to_string(),
            listing_url: "/videos.php?page={page}".to_string(),
            first_page_url: None,
            search_url: None,
            search_queries: Vec::new(),
            referer: None,
            listing: ListingSelectors::default(),
            detail: DetailSelectors::default(),
            id_patterns: vec![
                r"[?&](?:vid|id|v)=([A-Za-z0-9_-]+)".to_string(),
                r"/(\d{3,})(?:[/.?-]|$)".to_string(),
            ],
            max_items_per_page: 200,
            title_max_len: 60,
            description_max_len: 160,
        }
    }
}

impl SiteConfig {
    /// URL of a listing page
    pub fn page_url(&self, page: u32) -> String {
        let raw = match (&self.first_page_url, page) {
            (Some(first), 1) => first.clone(),
            _ => self.listing_url.replace("{page}", &page.to_string()),
        };
        crate::extract::url::absolutize(&self.base_url, &raw)
    }

    /// URL of a search results page, if the site supports search
    pub fn search_page_url(&self, query: &str) -> Option<String> {
        self.search_url.as_ref().map(|template| {
            let raw = template.replace("{query}", &urlencoding::encode(query));
            crate::extract::url::absolutize(&self.base_url, &raw)
        })
    }
}

/// Parse a CSS selector, mapping failures into [`CrawlError::InvalidSelector`]
pub fn compile_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| CrawlError::InvalidSelector {
        selector: selector.to_string(),
        reason: format!("{:?}", e),
    })
}

#[derive(Debug, Clone)]
struct CompiledSource {
    /// `None` reads the element itself
    selector: Option<Selector>,
    /// `None` reads text content
    attr: Option<String>,
}

impl CompiledSource {
    fn compile(source: &FieldSource) -> Result<Self> {
        let (selector, attr) = match source {
            FieldSource::Text { selector } => (selector, None),
            FieldSource::Attr { selector, attr } => (selector, Some(attr.clone())),
        };
        let selector = if selector.trim().is_empty() {
            None
        } else {
            Some(compile_selector(selector)?)
        };
        Ok(Self { selector, attr })
    }

    fn read(&self, element: ElementRef<'_>) -> Option<String> {
        let target = match &self.selector {
            Some(selector) => element.select(selector).next()?,
            None => element,
        };
        let value = match &self.attr {
            Some(attr) => target.value().attr(attr)?.trim().to_string(),
            None => target.text().collect::<Vec<_>>().join(" ").trim().to_string(),
        };
        if value.is_empty() {
            None
        } else {
            Some(value)
        }
    }
}

/// Compiled ordered fallback chain for one field
#[derive(Debug, Clone)]
pub struct FieldChain {
    sources: Vec<CompiledSource>,
}

impl FieldChain {
    pub fn compile(sources: &[FieldSource]) -> Result<Self> {
        let sources = sources
            .iter()
            .map(CompiledSource::compile)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { sources })
    }

    /// First non-empty raw value
    pub fn first(&self, element: ElementRef<'_>) -> Option<String> {
        self.resolve(element, Some)
    }

    /// First value accepted by `accept`, trying strategies in order
    pub fn resolve<T>(&self, element: ElementRef<'_>, accept: impl Fn(String) -> Option<T>) -> Option<T> {
        self.sources
            .iter()
            .filter_map(|source| source.read(element))
            .find_map(accept)
    }
}
