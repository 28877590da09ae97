/// Detail-page enrichment
///
/// Second pass over a listing item: pulls the description and a better image from the
/// detail page, then the playback servers from the player page. Best effort only; any
/// failure leaves the item as it was.
use async_trait::async_trait;
use scraper::{Html, Selector};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::extract::text::truncate_description;
use crate::extract::url::{absolutize, is_placeholder_image, is_usable_link};
use crate::fetch::ProxyFetcher;
use crate::models::{Item, Server};
use crate::site::{compile_selector, FieldChain, PathRewrite, SiteConfig};
use crate::Result;

/// Augments a listing item with detail-page data. Never fails.
#[async_trait]
pub trait Enrich: Send + Sync {
    async fn enrich(&self, item: Item) -> Item;
}

/// Fields read from a detail page
#[derive(Debug)]
struct DetailInfo {
    description: Option<String>,
    image: Option<String>,
}

/// Selector-driven enricher fetching through a [`ProxyFetcher`]
pub struct DetailEnricher {
    fetcher: Arc<ProxyFetcher>,
    base_url: String,
    description: FieldChain,
    image: FieldChain,
    player_path: Option<PathRewrite>,
    server_item: Selector,
    server_url: FieldChain,
    server_name: FieldChain,
    embed_fallback: Option<Selector>,
    description_max_len: usize,
}

impl DetailEnricher {
    pub fn new(fetcher: Arc<ProxyFetcher>, site: &SiteConfig) -> Result<Self> {
        let detail = &site.detail;
        let embed_fallback = match &detail.embed_fallback {
            Some(selector) => Some(compile_selector(selector)?),
            None => None,
        };

        Ok(Self {
            fetcher,
            base_url: site.base_url.clone(),
            description: FieldChain::compile(&detail.description)?,
            image: FieldChain::compile(&detail.image)?,
            player_path: detail.player_path.clone(),
            server_item: compile_selector(&detail.server_item)?,
            server_url: FieldChain::compile(&detail.server_url)?,
            server_name: FieldChain::compile(&detail.server_name)?,
            embed_fallback,
            description_max_len: site.description_max_len,
        })
    }

    /// Player page URL for a detail link
    pub fn player_url(&self, link: &str) -> String {
        match &self.player_path {
            Some(rewrite) => rewrite.apply(link),
            None => link.to_string(),
        }
    }

    fn parse_detail(&self, html: &str) -> DetailInfo {
        let document = Html::parse_document(html);
        let root = document.root_element();

        let description = self
            .description
            .first(root)
            .map(|d| truncate_description(&d, self.description_max_len))
            .filter(|d| !d.is_empty());
        let image = self
            .image
            .resolve(root, |src| (!is_placeholder_image(&src)).then(|| absolutize(&self.base_url, &src)));

        DetailInfo { description, image }
    }

    /// Ordered servers from a player page, falling back to a lone embed
    fn parse_servers(&self, html: &str) -> Vec<Server> {
        let document = Html::parse_document(html);
        let mut servers = Vec::new();

        for element in document.select(&self.server_item) {
            let url = match self
                .server_url
                .resolve(element, |raw| is_usable_link(&raw).then(|| absolutize(&self.base_url, &raw)))
            {
                Some(url) => url,
                None => continue,
            };
            let name = self
                .server_name
                .first(element)
                .map(|n| n.split_whitespace().collect::<Vec<_>>().join(" "))
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| format!("Server {}", servers.len() + 1));
            servers.push(Server { name, url });
        }

        if servers.is_empty() {
            if let Some(selector) = &self.embed_fallback {
                let embed = document
                    .select(selector)
                    .filter_map(|el| el.value().attr("src"))
                    .find(|src| is_usable_link(src));
                if let Some(src) = embed {
                    servers.push(Server {
                        name: "Server 1".to_string(),
                        url: absolutize(&self.base_url, src),
                    });
                }
            }
        }

        servers
    }
}

#[async_trait]
impl Enrich for DetailEnricher {
    async fn enrich(&self, mut item: Item) -> Item {
        let detail_html = match self.fetcher.fetch(&item.link).await {
            Ok(html) => {
                let info = self.parse_detail(&html);
                if let Some(description) = info.description {
                    item.description = Some(description);
                }
                if let Some(image) = info.image {
                    item.image = image;
                }
                Some(html)
            }
            Err(e) => {
                warn!("Detail page unavailable for '{}': {}", item.title, e);
                None
            }
        };

        let player_url = self.player_url(&item.link);
        let player_html = if player_url == item.link {
            detail_html
        } else {
            match self.fetcher.fetch(&player_url).await {
                Ok(html) => Some(html),
                Err(e) => {
                    warn!("Player page unavailable for '{}': {}", item.title, e);
                    None
                }
            }
        };

        if let Some(html) = player_html {
            let servers = self.parse_servers(&html);
            debug!("Found {} server(s) for '{}'", servers.len(), item.title);
            if !servers.is_empty() {
                item.servers = servers;
            }
        }

        item
    }
}
