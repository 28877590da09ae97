/// URL normalisation helpers used by extraction and enrichment
use regex::Regex;
use url::Url;

/// Resolve `raw` against `base_url`.
///
/// Handles protocol-relative (`//host/x`), root-relative (`/x`) and bare (`x`) forms.
/// Values already starting with `http://` or `https://` are returned unchanged.
pub fn absolutize(base_url: &str, raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return String::new();
    }
    if raw.starts_with("http://") || raw.starts_with("https://") {
        return raw.to_string();
    }

    let base = Url::parse(base_url).ok();
    if let Some(rest) = raw.strip_prefix("//") {
        let scheme = base.as_ref().map(|b| b.scheme()).unwrap_or("https");
        return format!("{}://{}", scheme, rest);
    }

    match base.and_then(|b| b.join(raw).ok()) {
        Some(joined) => joined.to_string(),
        None => format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            raw.trim_start_matches('/')
        ),
    }
}

/// Links that cannot point at an item page
pub fn is_usable_link(href: &str) -> bool {
    let href = href.trim();
    let lower = href.to_lowercase();
    !(href.is_empty()
        || href == "#"
        || lower.starts_with('#')
        || lower.starts_with("javascript:")
        || lower.starts_with("mailto:")
        || lower == "about:blank")
}

/// Lazy-loading stand-ins and tracking pixels count as "no image"
pub fn is_placeholder_image(src: &str) -> bool {
    let lower = src.trim().to_lowercase();
    if lower.is_empty() || lower.starts_with("data:") {
        return true;
    }
    ["1x1", "blank.gif", "pixel.gif", "spacer.gif", "loading.gif", "lazy.gif", "placeholder"]
        .iter()
        .any(|marker| lower.contains(marker))
}

/// Compile the configured id patterns
pub fn compile_id_patterns(patterns: &[String]) -> crate::Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| Regex::new(p).map_err(crate::CrawlError::from))
        .collect()
}

/// Id embedded in the link, or a token generated from the link itself.
///
/// The generated token is a digest of the link so reruns produce the same id.
pub fn derive_id(link: &str, patterns: &[Regex]) -> String {
    patterns
        .iter()
        .find_map(|re| re.captures(link).and_then(|c| c.get(1)).map(|m| m.as_str().to_string()))
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| format!("gen-{:x}", md5::compute(link.as_bytes())))
}

/// Matches `?page=N`, `&page=N` and `/page/N` in pagination hrefs
pub fn page_param_pattern() -> crate::Result<Regex> {
    Ok(Regex::new(r"(?:[?&]page=|/page/)(\d+)")?)
}

/// Page number referenced by a pagination link or label
pub fn page_number_hint(href: Option<&str>, text: &str, page_param: &Regex) -> Option<u32> {
    let text = text.trim();
    if !text.is_empty() && text.chars().all(|c| c.is_ascii_digit()) {
        if let Ok(n) = text.parse() {
            return Some(n);
        }
    }

    page_param
        .captures(href?)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://www.example.com";

    #[test]
    fn test_absolutize_forms() {
        assert_eq!(absolutize(BASE, "//cdn.example.com/a.jpg"), "https://cdn.example.com/a.jpg");
        assert_eq!(absolutize(BASE, "/video.php?vid=1"), "https://www.example.com/video.php?vid=1");
        assert_eq!(absolutize(BASE, "thumbs/a.jpg"), "https://www.example.com/thumbs/a.jpg");
        assert_eq!(absolutize(BASE, "http://other.net/x"), "http://other.net/x");

        for raw in ["//x", "/x", "x", "http://x"] {
            let resolved = absolutize(BASE, raw);
            assert!(resolved.starts_with("http"), "{} -> {}", raw, resolved);
            assert_eq!(absolutize(BASE, &resolved), resolved);
        }
    }

    #[test]
    fn test_absolutize_keeps_scheme_of_base() {
        assert_eq!(absolutize("http://plain.test", "//img.test/p.png"), "http://img.test/p.png");
        assert_eq!(absolutize(BASE, "  "), "");
    }

    #[test]
    fn test_usable_links() {
        assert!(is_usable_link("/video.php?vid=1"));
        assert!(!is_usable_link(""));
        assert!(!is_usable_link("#"));
        assert!(!is_usable_link("javascript:void(0)"));
        assert!(!is_usable_link("JavaScript:play()"));
    }

    #[test]
    fn test_placeholder_images() {
        assert!(is_placeholder_image("data:image/gif;base64,R0lGOD"));
        assert!(is_placeholder_image("/img/1x1.gif"));
        assert!(is_placeholder_image("https://x.test/static/placeholder.png"));
        assert!(!is_placeholder_image("https://x.test/thumbs/42.jpg"));
    }

    #[test]
    fn test_derive_id() {
        let patterns = compile_id_patterns(&crate::site::SiteConfig::default().id_patterns).unwrap();
        assert_eq!(derive_id("https://x.test/video.php?vid=abc_12", &patterns), "abc_12");
        assert_eq!(derive_id("https://x.test/watch/98765/slug", &patterns), "98765");

        let generated = derive_id("https://x.test/movie/slug", &patterns);
        assert!(generated.starts_with("gen-"));
        assert_eq!(generated, derive_id("https://x.test/movie/slug", &patterns));
    }

    #[test]
    fn test_page_number_hint() {
        let page_param = page_param_pattern().unwrap();
        assert_eq!(page_number_hint(None, " 7 ", &page_param), Some(7));
        assert_eq!(page_number_hint(Some("/list?cat=2&page=12"), "Next", &page_param), Some(12));
        assert_eq!(page_number_hint(Some("/movies/page/4/"), "»", &page_param), Some(4));
        assert_eq!(page_number_hint(Some("/about"), "About", &page_param), None);
    }
}
