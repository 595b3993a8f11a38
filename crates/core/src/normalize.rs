use sha2::{Digest, Sha256};
use url::Url;

use crate::error::CrawlError;

/// Anything longer than this is refused outright.
pub const MAX_URL_LEN: usize = 500;

/// Query parameters that only identify the click, not the resource.
const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "msclkid", "mc_cid", "mc_eid", "_ga", "_gid", "ref", "referrer",
];

/// A URL in canonical form plus the registrable domain used as the unit of
/// politeness and bus partitioning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalUrl {
    pub url: Url,
    pub domain: String,
}

impl CanonicalUrl {
    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }
}

/// Hex SHA-256 of a normalized URL string; the primary key for URL records
/// and documents.
pub fn url_hash(normalized: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

fn is_tracking_param(name: &str) -> bool {
    name.starts_with("utm_") || TRACKING_PARAMS.contains(&name)
}

/// Canonicalize a raw URL string.
///
/// Lowercases scheme and host, strips default ports and fragments, resolves
/// dot segments, drops tracking parameters, alphabetizes the remaining query,
/// removes a `www.` prefix and appends a trailing slash to extensionless
/// paths. The `url` crate already handles scheme/host case, default ports,
/// dot-segment resolution and consistent percent-encoding during parsing.
pub fn canonicalize(raw: &str) -> Result<CanonicalUrl, CrawlError> {
    let raw = raw.trim();
    if raw.len() > MAX_URL_LEN {
        return Err(CrawlError::InvalidUrl(format!(
            "length {} exceeds {}",
            raw.len(),
            MAX_URL_LEN
        )));
    }

    let mut url = Url::parse(raw).map_err(|e| CrawlError::InvalidUrl(format!("{raw}: {e}")))?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(CrawlError::InvalidUrl(format!("unsupported scheme {other}")));
        }
    }

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| CrawlError::InvalidUrl(format!("{raw}: empty host")))?
        .to_string();

    if let Some(stripped) = host.strip_prefix("www.") {
        if !stripped.is_empty() {
            let stripped = stripped.to_string();
            url.set_host(Some(&stripped))
                .map_err(|e| CrawlError::InvalidUrl(format!("{raw}: {e}")))?;
        }
    }

    url.set_fragment(None);

    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if params.is_empty() {
        url.set_query(None);
    } else {
        params.sort();
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (k, v) in &params {
            serializer.append_pair(k, v);
        }
        let query = serializer.finish();
        url.set_query(Some(&query));
    }

    let path = url.path().to_string();
    if !path.ends_with('/') {
        let last_segment = path.rsplit('/').next().unwrap_or("");
        if !last_segment.contains('.') {
            url.set_path(&format!("{path}/"));
        }
    }

    if url.as_str().len() > MAX_URL_LEN {
        return Err(CrawlError::InvalidUrl(format!(
            "normalized length {} exceeds {}",
            url.as_str().len(),
            MAX_URL_LEN
        )));
    }

    let domain = url
        .host_str()
        .ok_or_else(|| CrawlError::InvalidUrl(format!("{raw}: empty host")))?
        .to_lowercase();

    Ok(CanonicalUrl { url, domain })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(raw: &str) -> String {
        canonicalize(raw).unwrap().as_str().to_string()
    }

    #[test]
    fn strips_ports_fragments_tracking_and_resolves_dots() {
        assert_eq!(
            norm("https://Ex.com:443/a/../b?utm_source=x&z=1#frag"),
            "https://ex.com/b/?z=1"
        );
    }

    #[test]
    fn idempotent() {
        for raw in [
            "https://Ex.com:443/a/../b?utm_source=x&z=1#frag",
            "http://WWW.Example.COM/news?b=2&a=1",
            "https://example.com/page.html",
        ] {
            let once = norm(raw);
            assert_eq!(norm(&once), once);
        }
    }

    #[test]
    fn alphabetizes_query_params() {
        assert_eq!(
            norm("https://example.com/s?z=1&a=2&m=3"),
            "https://example.com/s/?a=2&m=3&z=1"
        );
    }

    #[test]
    fn drops_www_prefix() {
        let canonical = canonicalize("https://www.example.com/").unwrap();
        assert_eq!(canonical.as_str(), "https://example.com/");
        assert_eq!(canonical.domain, "example.com");
    }

    #[test]
    fn keeps_dot_extension_paths_unslashed() {
        assert_eq!(
            norm("https://example.com/docs/page.html"),
            "https://example.com/docs/page.html"
        );
        assert_eq!(norm("https://example.com/docs"), "https://example.com/docs/");
    }

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(
            canonicalize("ftp://example.com/"),
            Err(CrawlError::InvalidUrl(_))
        ));
        assert!(matches!(
            canonicalize("not a url"),
            Err(CrawlError::InvalidUrl(_))
        ));
        let long = format!("https://example.com/{}", "a".repeat(600));
        assert!(matches!(
            canonicalize(&long),
            Err(CrawlError::InvalidUrl(_))
        ));
    }

    #[test]
    fn hash_is_stable() {
        let a = url_hash("https://example.com/");
        let b = url_hash("https://example.com/");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }
}
