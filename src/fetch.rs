/// Proxy-rotating page fetcher
///
/// Every request walks an ordered list of proxy rewrites (the empty rewrite meaning a
/// direct connection). An attempt fails on a network error, a non-2xx status or a body
/// too small to be a real page; a failed attempt moves on to the next proxy, and a failed
/// round sleeps `round * backoff_base` before starting over.
use async_trait::async_trait;
use reqwest::Client;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::FetchConfig;
use crate::{CrawlError, Result};

/// Desktop browser identity sent with every request
pub const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

/// Raw response handed back by a transport
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Minimal HTTP GET seam so the retry policy can be exercised without a network
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &str, headers: &[(String, String)], timeout: Duration) -> anyhow::Result<HttpResponse>;
}

/// reqwest-backed transport; follows redirects
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        let client = Client::builder()
            .gzip(true)
            .brotli(true)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { client }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str, headers: &[(String, String)], timeout: Duration) -> anyhow::Result<HttpResponse> {
        let mut request = self.client.get(url).timeout(timeout);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(HttpResponse { status, body })
    }
}

/// Per-call fetch settings
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Proxy rewrites tried in order; `""` is a direct connection
    pub proxies: Vec<String>,
    pub timeout: Duration,
    /// Bodies shorter than this are treated as relay error pages
    pub min_body_len: usize,
    /// Full passes over the proxy list before giving up
    pub rounds: u32,
    pub backoff_base: Duration,
    pub referer: Option<String>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self::from(&FetchConfig::default())
    }
}

impl From<&FetchConfig> for FetchOptions {
    fn from(config: &FetchConfig) -> Self {
        Self {
            proxies: config.proxies.clone(),
            timeout: Duration::from_secs(config.timeout_seconds),
            min_body_len: config.min_body_len,
            rounds: config.rounds,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            referer: None,
        }
    }
}

impl FetchOptions {
    pub fn with_referer(mut self, referer: Option<String>) -> Self {
        self.referer = referer;
        self
    }

    fn headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![
            ("User-Agent".to_string(), USER_AGENT.to_string()),
            ("Accept".to_string(), ACCEPT.to_string()),
            ("Accept-Language".to_string(), ACCEPT_LANGUAGE.to_string()),
        ];
        if let Some(referer) = &self.referer {
            headers.push(("Referer".to_string(), referer.clone()));
        }
        headers
    }
}

/// Apply a proxy rewrite to a target URL.
///
/// Templates containing `{url}` get the encoded target substituted; other non-empty
/// templates are treated as a prefix.
pub fn rewrite_url(template: &str, target: &str) -> String {
    if template.is_empty() {
        return target.to_string();
    }
    let encoded = urlencoding::encode(target);
    if template.contains("{url}") {
        template.replace("{url}", &encoded)
    } else {
        format!("{}{}", template, encoded)
    }
}

/// Fetches pages through the configured proxies, remembering the last one that worked
pub struct ProxyFetcher {
    transport: Arc<dyn HttpTransport>,
    options: FetchOptions,
    /// Index of the last proxy that returned a usable page
    cursor: AtomicUsize,
}

impl ProxyFetcher {
    pub fn new(transport: Arc<dyn HttpTransport>, options: FetchOptions) -> Self {
        info!("🌐 Fetcher ready with {} proxy route(s), {} round(s)", options.proxies.len(), options.rounds);
        Self {
            transport,
            options,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Fetch with the fetcher's own options
    pub async fn fetch(&self, url: &str) -> Result<String> {
        self.fetch_with(url, &self.options).await
    }

    /// Fetch with explicit options. Fails with [`CrawlError::FetchExhausted`] once
    /// every proxy has failed in every round.
    pub async fn fetch_with(&self, url: &str, options: &FetchOptions) -> Result<String> {
        let direct = [String::new()];
        let proxies: &[String] = if options.proxies.is_empty() {
            &direct
        } else {
            &options.proxies
        };
        let headers = options.headers();
        let rounds = options.rounds.max(1);
        let start = self.cursor.load(Ordering::Relaxed) % proxies.len();
        let mut attempts = 0;

        for round in 1..=rounds {
            for offset in 0..proxies.len() {
                let index = (start + offset) % proxies.len();
                let target = rewrite_url(&proxies[index], url);
                attempts += 1;

                match self.transport.get(&target, &headers, options.timeout).await {
                    Ok(response) if !(200..300).contains(&response.status) => {
                        debug!("Proxy {} returned HTTP {} for {}", index, response.status, url);
                    }
                    Ok(response) if response.body.len() < options.min_body_len => {
                        debug!(
                            "Proxy {} returned {} bytes for {} (minimum {})",
                            index,
                            response.body.len(),
                            url,
                            options.min_body_len
                        );
                    }
                    Ok(response) => {
                        self.cursor.store(index, Ordering::Relaxed);
                        debug!("📄 Fetched {} bytes from {} via proxy {}", response.body.len(), url, index);
                        return Ok(response.body);
                    }
                    Err(e) => {
                        debug!("Proxy {} failed for {}: {}", index, url, e);
                    }
                }
            }

            if round < rounds {
                let delay = options.backoff_base * round;
                warn!("⚠️ Round {}/{} failed for {}, retrying in {:?}", round, rounds, url, delay);
                tokio::time::sleep(delay).await;
            }
        }

        Err(CrawlError::FetchExhausted {
            url: url.to_string(),
            attempts,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves canned responses keyed by the exact requested URL
    #[derive(Default)]
    pub(crate) struct StubTransport {
        pub responses: HashMap<String, HttpResponse>,
        pub requests: Mutex<Vec<String>>,
        pub headers_seen: Mutex<Vec<Vec<(String, String)>>>,
    }

    impl StubTransport {
        pub fn with_page(mut self, url: &str, status: u16, body: &str) -> Self {
            self.responses.insert(
                url.to_string(),
                HttpResponse {
                    status,
                    body: body.to_string(),
                },
            );
            self
        }

        pub fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl HttpTransport for StubTransport {
        async fn get(&self, url: &str, headers: &[(String, String)], _timeout: Duration) -> anyhow::Result<HttpResponse> {
            self.requests.lock().unwrap().push(url.to_string());
            self.headers_seen.lock().unwrap().push(headers.to_vec());
            self.responses
                .get(url)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("connection refused: {}", url))
        }
    }

    fn options(proxies: &[&str], rounds: u32) -> FetchOptions {
        FetchOptions {
            proxies: proxies.iter().map(|p| p.to_string()).collect(),
            timeout: Duration::from_secs(1),
            min_body_len: 10,
            rounds,
            backoff_base: Duration::ZERO,
            referer: None,
        }
    }

    const TARGET: &str = "https://site.test/list?page=1";
    const GOOD_BODY: &str = "<html><body>plenty of content</body></html>";

    fn proxied(prefix: &str) -> String {
        rewrite_url(prefix, TARGET)
    }

    #[test]
    fn test_rewrite_url() {
        assert_eq!(rewrite_url("", TARGET), TARGET);
        assert_eq!(
            rewrite_url("https://relay.test/raw?url=", "https://a.test/?x=1"),
            "https://relay.test/raw?url=https%3A%2F%2Fa.test%2F%3Fx%3D1"
        );
        assert_eq!(
            rewrite_url("https://relay.test/{url}/get", "https://a.test/"),
            "https://relay.test/https%3A%2F%2Fa.test%2F/get"
        );
    }

    #[tokio::test]
    async fn test_all_proxies_fail_single_round() {
        let stub = Arc::new(
            StubTransport::default()
                .with_page(&proxied("https://p1.test/?u="), 500, GOOD_BODY)
                .with_page(&proxied("https://p2.test/?u="), 500, GOOD_BODY)
                .with_page(&proxied("https://p3.test/?u="), 500, GOOD_BODY),
        );
        let fetcher = ProxyFetcher::new(
            stub.clone(),
            options(&["https://p1.test/?u=", "https://p2.test/?u=", "https://p3.test/?u="], 1),
        );

        let err = fetcher.fetch(TARGET).await.unwrap_err();
        assert!(matches!(err, CrawlError::FetchExhausted { attempts: 3, .. }));
        assert_eq!(stub.request_count(), 3);
    }

    #[tokio::test]
    async fn test_rounds_multiply_attempts() {
        let stub = Arc::new(StubTransport::default());
        let fetcher = ProxyFetcher::new(stub.clone(), options(&["https://p1.test/?u=", "https://p2.test/?u=", ""], 3));

        let err = fetcher.fetch(TARGET).await.unwrap_err();
        assert!(matches!(err, CrawlError::FetchExhausted { attempts: 9, .. }));
        assert_eq!(stub.request_count(), 9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_grows_linearly_between_rounds() {
        let stub = Arc::new(StubTransport::default());
        let mut opts = options(&["https://p1.test/?u="], 3);
        opts.backoff_base = Duration::from_millis(100);
        let fetcher = ProxyFetcher::new(stub.clone(), opts);

        let started = tokio::time::Instant::now();
        let err = fetcher.fetch(TARGET).await.unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, CrawlError::FetchExhausted { attempts: 3, .. }));
        // 100ms after round 1, 200ms after round 2, nothing after the last
        assert!(elapsed >= Duration::from_millis(300), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(400), "elapsed {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_skips_backoff() {
        let stub = Arc::new(StubTransport::default().with_page(TARGET, 200, GOOD_BODY));
        let mut opts = options(&[""], 3);
        opts.backoff_base = Duration::from_secs(5);
        let fetcher = ProxyFetcher::new(stub, opts);

        let started = tokio::time::Instant::now();
        fetcher.fetch(TARGET).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_undersized_body_falls_through_and_cursor_sticks() {
        let stub = Arc::new(
            StubTransport::default()
                .with_page(&proxied("https://p1.test/?u="), 200, "tiny")
                .with_page(TARGET, 200, GOOD_BODY),
        );
        let fetcher = ProxyFetcher::new(stub.clone(), options(&["https://p1.test/?u=", ""], 1));

        assert_eq!(fetcher.fetch(TARGET).await.unwrap(), GOOD_BODY);
        assert_eq!(stub.request_count(), 2);

        // The direct route worked last time, so it is tried first
        assert_eq!(fetcher.fetch(TARGET).await.unwrap(), GOOD_BODY);
        let requests = stub.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[2], TARGET);
    }

    #[tokio::test]
    async fn test_headers_include_referer() {
        let stub = Arc::new(StubTransport::default().with_page(TARGET, 200, GOOD_BODY));
        let opts = options(&[""], 1).with_referer(Some("https://site.test/".to_string()));
        let fetcher = ProxyFetcher::new(stub.clone(), opts);

        fetcher.fetch(TARGET).await.unwrap();
        let headers = stub.headers_seen.lock().unwrap()[0].clone();
        let names: Vec<_> = headers.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["User-Agent", "Accept", "Accept-Language", "Referer"]);
    }

    #[tokio::test]
    async fn test_empty_proxy_list_connects_directly() {
        let stub = Arc::new(StubTransport::default().with_page(TARGET, 200, GOOD_BODY));
        let fetcher = ProxyFetcher::new(stub.clone(), options(&[], 1));
        assert!(fetcher.fetch(TARGET).await.is_ok());
    }
}
