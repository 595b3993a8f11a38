use once_cell::sync::Lazy;
use regex::Regex;

static LOC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<loc>\s*([^<]+?)\s*</loc>").expect("valid regex"));

/// Pull `<loc>` entries out of a sitemap or sitemap-index document. Handles
/// both page sitemaps and nested indexes; the caller decides whether a
/// returned URL is another sitemap to expand.
pub fn parse_sitemap(body: &str) -> Vec<String> {
    LOC_RE
        .captures_iter(body)
        .map(|cap| cap[1].trim().to_string())
        .filter(|loc| loc.starts_with("http://") || loc.starts_with("https://"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_urls_from_urlset() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
            <urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
              <url><loc>https://example.com/</loc><lastmod>2024-01-01</lastmod></url>
              <url><loc> https://example.com/about </loc></url>
            </urlset>"#;
        assert_eq!(
            parse_sitemap(xml),
            vec!["https://example.com/", "https://example.com/about"]
        );
    }

    #[test]
    fn extracts_nested_sitemap_locations() {
        let xml = r#"<sitemapindex>
              <sitemap><loc>https://example.com/sitemap-1.xml</loc></sitemap>
              <sitemap><loc>https://example.com/sitemap-2.xml</loc></sitemap>
            </sitemapindex>"#;
        assert_eq!(parse_sitemap(xml).len(), 2);
    }

    #[test]
    fn ignores_non_http_locations() {
        let xml = "<urlset><url><loc>ftp://example.com/x</loc></url></urlset>";
        assert!(parse_sitemap(xml).is_empty());
    }
}
