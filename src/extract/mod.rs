/// Listing page extraction
///
/// Turns the HTML of one listing page into listing-only [`Item`]s. Extraction is a pure
/// function of the HTML and the site configuration; fetching happens elsewhere.

pub mod text;
pub mod url;

use regex::Regex;
use scraper::{Html, Selector};
use tracing::debug;

use crate::models::{Item, DEFAULT_DURATION};
use crate::site::{compile_selector, FieldChain, SiteConfig};
use crate::Result;

use self::text::clean_title;
use self::url::{absolutize, derive_id, is_placeholder_image, is_usable_link, page_number_hint};

/// Selector-driven extractor for one site's listing pages
#[derive(Debug, Clone)]
pub struct PageExtractor {
    base_url: String,
    kind: String,
    card: Selector,
    link: FieldChain,
    title: FieldChain,
    image: FieldChain,
    duration: FieldChain,
    pagination: Selector,
    id_patterns: Vec<Regex>,
    page_param: Regex,
    max_items_per_page: usize,
    title_max_len: usize,
}

impl PageExtractor {
    /// Compile the site's listing selectors
    pub fn new(site: &SiteConfig) -> Result<Self> {
        let listing = &site.listing;
        Ok(Self {
            base_url: site.base_url.clone(),
            kind: site.kind.clone(),
            card: compile_selector(&listing.card)?,
            link: FieldChain::compile(&listing.link)?,
            title: FieldChain::compile(&listing.title)?,
            image: FieldChain::compile(&listing.image)?,
            duration: FieldChain::compile(&listing.duration)?,
            pagination: compile_selector(&listing.pagination)?,
            id_patterns: url::compile_id_patterns(&site.id_patterns)?,
            page_param: url::page_param_pattern()?,
            max_items_per_page: site.max_items_per_page,
            title_max_len: site.title_max_len,
        })
    }

    /// Extract items in document order, stamping each with `page_number`.
    ///
    /// Cards without a usable link are not items and are skipped.
    pub fn extract(&self, html: &str, page_number: u32) -> Vec<Item> {
        let document = Html::parse_document(html);
        let mut items = Vec::new();

        for (index, card) in document.select(&self.card).enumerate() {
            if self.max_items_per_page > 0 && items.len() >= self.max_items_per_page {
                debug!("Reached per-page cap of {} items", self.max_items_per_page);
                break;
            }

            let position = index + 1;
            let link = match self
                .link
                .resolve(card, |href| is_usable_link(&href).then(|| absolutize(&self.base_url, &href)))
            {
                Some(link) => link,
                None => {
                    debug!("Skipping card {} on page {}: no usable link", position, page_number);
                    continue;
                }
            };

            let title = self
                .title
                .resolve(card, |raw| clean_title(&raw, self.title_max_len))
                .unwrap_or_else(|| format!("{} {}", self.kind, position));

            let image = self
                .image
                .resolve(card, |src| (!is_placeholder_image(&src)).then(|| absolutize(&self.base_url, &src)))
                .unwrap_or_default();

            let duration = self
                .duration
                .first(card)
                .map(|d| d.split_whitespace().collect::<Vec<_>>().join(" "))
                .unwrap_or_else(|| DEFAULT_DURATION.to_string());

            let id = derive_id(&link, &self.id_patterns);
            items.push(Item::new(id, title, link, image, duration, page_number));
        }

        debug!("Extracted {} items from page {}", items.len(), page_number);
        items
    }

    /// Highest page number referenced by the pagination controls, if any
    pub fn discover_page_count(&self, html: &str) -> Option<u32> {
        let document = Html::parse_document(html);
        document
            .select(&self.pagination)
            .filter_map(|el| {
                let text = el.text().collect::<String>();
                page_number_hint(el.value().attr("href"), &text, &self.page_param)
            })
            .max()
    }
}
