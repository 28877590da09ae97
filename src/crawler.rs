/// Crawl orchestration
///
/// Runs strictly one request at a time: discover the page count from page 1, walk the
/// listing pages in ascending order, then any configured search queries, enriching each
/// new item in document order with fixed pauses in between.
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{Config, CrawlConfig};
use crate::enrich::{DetailEnricher, Enrich};
use crate::extract::PageExtractor;
use crate::fetch::{FetchOptions, HttpTransport, ProxyFetcher};
use crate::models::{Item, ItemCollection};
use crate::site::SiteConfig;
use crate::{CrawlError, Result};

/// Where a batch of items comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemSource {
    Listing(u32),
    Search(String),
}

impl ItemSource {
    /// Page number stamped on extracted items
    fn page_number(&self) -> u32 {
        match self {
            ItemSource::Listing(page) => *page,
            ItemSource::Search(_) => 0,
        }
    }
}

/// Crawl progress
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlState {
    DiscoveringPageCount,
    Extracting(ItemSource),
    Enriching { source: ItemSource, position: usize },
    Done,
}

/// Outcome of one run
#[derive(Debug, Clone)]
pub struct CrawlReport {
    /// Deduplicated items in first-seen order
    pub items: Vec<Item>,
    pub pages_discovered: u32,
    pub pages_visited: u32,
    pub pages_failed: u32,
    pub searches_run: u32,
    pub duplicates_skipped: usize,
    pub items_without_servers: usize,
    /// The item cap ended the run early
    pub capped: bool,
}

/// Mutable state owned by a single run
struct RunState {
    state: CrawlState,
    collection: ItemCollection,
    report: CrawlReport,
    enrichments: usize,
}

impl RunState {
    fn new(track_content: bool) -> Self {
        Self {
            state: CrawlState::DiscoveringPageCount,
            collection: ItemCollection::new(track_content),
            report: CrawlReport {
                items: Vec::new(),
                pages_discovered: 0,
                pages_visited: 0,
                pages_failed: 0,
                searches_run: 0,
                duplicates_skipped: 0,
                items_without_servers: 0,
                capped: false,
            },
            enrichments: 0,
        }
    }

    fn transition(&mut self, state: CrawlState) {
        debug!("Crawl state: {:?} -> {:?}", self.state, state);
        self.state = state;
    }
}

/// Drives extraction and enrichment over every page of a site
pub struct Crawler {
    fetcher: Arc<ProxyFetcher>,
    extractor: PageExtractor,
    enricher: Option<Arc<dyn Enrich>>,
    site: SiteConfig,
    settings: CrawlConfig,
}

impl Crawler {
    pub fn new(
        fetcher: Arc<ProxyFetcher>,
        extractor: PageExtractor,
        enricher: Option<Arc<dyn Enrich>>,
        site: SiteConfig,
        settings: CrawlConfig,
    ) -> Self {
        Self {
            fetcher,
            extractor,
            enricher,
            site,
            settings,
        }
    }

    /// Wire fetcher, extractor and enricher from a run configuration
    pub fn from_config(config: &Config, transport: Arc<dyn HttpTransport>) -> Result<Self> {
        let options = FetchOptions::from(&config.fetch).with_referer(config.site.referer.clone());
        let fetcher = Arc::new(ProxyFetcher::new(transport, options));
        let extractor = PageExtractor::new(&config.site)?;
        let enricher: Option<Arc<dyn Enrich>> = if config.crawl.enrich {
            Some(Arc::new(DetailEnricher::new(fetcher.clone(), &config.site)?))
        } else {
            None
        };

        Ok(Self::new(
            fetcher,
            extractor,
            enricher,
            config.site.clone(),
            config.crawl.clone(),
        ))
    }

    /// Run the crawl.
    ///
    /// Only a failure to fetch the first listing page aborts the run; every later page
    /// or item failure is logged and skipped.
    pub async fn run(&self) -> Result<CrawlReport> {
        let mut run = RunState::new(self.settings.dedup_by_content);
        info!("🚀 Starting crawl of {} ({})", self.site.name, self.site.base_url);

        let first_url = self.site.page_url(1);
        let mut first_html = Some(self.fetcher.fetch(&first_url).await?);
        let total_pages = first_html
            .as_deref()
            .and_then(|html| self.extractor.discover_page_count(html))
            .unwrap_or(1)
            .clamp(1, self.settings.max_pages.max(1));
        run.report.pages_discovered = total_pages;
        info!("📚 Crawling {} listing page(s)", total_pages);

        for page in 1..=total_pages {
            if self.stop_at_cap(&mut run) {
                break;
            }

            let source = ItemSource::Listing(page);
            run.transition(CrawlState::Extracting(source.clone()));

            let html = match first_html.take() {
                Some(html) => html,
                None => {
                    pause(self.settings.page_delay_ms).await;
                    match self.fetcher.fetch(&self.site.page_url(page)).await {
                        Ok(html) => html,
                        Err(e) => {
                            warn!("⚠️ Skipping page {}: {}", page, e);
                            run.report.pages_failed += 1;
                            continue;
                        }
                    }
                }
            };

            let items = self.extractor.extract(&html, page);
            if items.is_empty() {
                let empty = CrawlError::ExtractionEmpty { page };
                if page > 1 {
                    info!("{}, treating it as the end of pagination", empty);
                    break;
                }
                warn!("{}", empty);
                continue;
            }

            run.report.pages_visited += 1;
            self.process_items(items, source, &mut run).await;
            info!("📄 Page {}/{} done, {} item(s) collected", page, total_pages, run.collection.len());
        }

        if self.settings.run_search {
            self.run_searches(&mut run).await;
        }

        run.transition(CrawlState::Done);
        run.report.items = run.collection.into_items();

        info!(
            "🎉 Crawl finished: {} item(s), {} duplicate(s) skipped, {} page(s) failed",
            run.report.items.len(),
            run.report.duplicates_skipped,
            run.report.pages_failed
        );
        Ok(run.report)
    }

    async fn run_searches(&self, run: &mut RunState) {
        for query in &self.site.search_queries {
            if self.stop_at_cap(run) {
                break;
            }
            let url = match self.site.search_page_url(query) {
                Some(url) => url,
                None => {
                    debug!("Site has no search URL, skipping {} queries", self.site.search_queries.len());
                    return;
                }
            };

            let source = ItemSource::Search(query.clone());
            run.transition(CrawlState::Extracting(source.clone()));
            pause(self.settings.page_delay_ms).await;

            let html = match self.fetcher.fetch(&url).await {
                Ok(html) => html,
                Err(e) => {
                    warn!("⚠️ Skipping search '{}': {}", query, e);
                    continue;
                }
            };

            run.report.searches_run += 1;
            let items = self.extractor.extract(&html, source.page_number());
            info!("🔍 Search '{}' returned {} item(s)", query, items.len());
            self.process_items(items, source, run).await;
        }
    }

    /// Enrich and collect the new items of one source, in order
    async fn process_items(&self, items: Vec<Item>, source: ItemSource, run: &mut RunState) {
        for (index, item) in items.into_iter().enumerate() {
            if self.stop_at_cap(run) {
                break;
            }
            if run.collection.is_duplicate(&item) {
                debug!("Duplicate item {} ('{}')", item.id, item.title);
                run.report.duplicates_skipped += 1;
                continue;
            }

            let item = match &self.enricher {
                Some(enricher) => {
                    run.transition(CrawlState::Enriching {
                        source: source.clone(),
                        position: index + 1,
                    });
                    if run.enrichments > 0 {
                        pause(self.settings.item_delay_ms).await;
                    }
                    run.enrichments += 1;
                    enricher.enrich(item).await
                }
                None => item,
            };

            if item.servers.is_empty() {
                run.report.items_without_servers += 1;
            }
            run.collection.insert(item);
        }
    }

    /// Checked only while work remains, so a run that ends exactly at the cap is not capped
    fn stop_at_cap(&self, run: &mut RunState) -> bool {
        let capped = self.settings.max_items > 0 && run.collection.len() >= self.settings.max_items;
        if capped && !run.report.capped {
            info!("🛑 Item cap of {} reached", self.settings.max_items);
            run.report.capped = true;
        }
        capped
    }
}

async fn pause(millis: u64) {
    if millis > 0 {
        tokio::time::sleep(Duration::from_millis(millis)).await;
    }
}
