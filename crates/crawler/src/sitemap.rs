use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use searchlight_core::{canonicalize, CrawlError, UrlRecord};
use searchlight_frontier::{Frontier, FrontierCandidate};
use searchlight_parser::parse_sitemap;
use searchlight_politeness::RobotsCache;
use searchlight_storage::CrawlStore;

/// Priority for sitemap-discovered pages, just under operator seeds.
const SITEMAP_PRIORITY: f64 = 8.0;
const MAX_SITEMAP_URLS: usize = 1000;
const MAX_BODY_BYTES: usize = 50 * 1024 * 1024;

/// Sitemap expansion: robots.txt advertises sitemaps; their `<loc>`
/// entries (one level of nesting deep) are admitted at depth 1.
pub struct SitemapExpander {
    http: reqwest::Client,
    robots: Arc<RobotsCache>,
    frontier: Arc<Frontier>,
    store: Arc<dyn CrawlStore>,
}

impl SitemapExpander {
    pub fn new(
        user_agent: &str,
        robots: Arc<RobotsCache>,
        frontier: Arc<Frontier>,
        store: Arc<dyn CrawlStore>,
    ) -> Result<Self, CrawlError> {
        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(Duration::from_secs(10))
            .read_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CrawlError::Network(format!("sitemap client: {e}")))?;
        Ok(Self {
            http,
            robots,
            frontier,
            store,
        })
    }

    async fn fetch_body(&self, url: &str) -> Result<String, CrawlError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| CrawlError::Network(format!("sitemap fetch {url}: {e}")))?;
        if !response.status().is_success() {
            return Err(CrawlError::HttpStatus(response.status().as_u16()));
        }
        if let Some(length) = response.content_length() {
            if length as usize > MAX_BODY_BYTES {
                return Err(CrawlError::BodyTooLarge {
                    size: length as usize,
                    max: MAX_BODY_BYTES,
                });
            }
        }
        response
            .text()
            .await
            .map_err(|e| CrawlError::Network(format!("sitemap body {url}: {e}")))
    }

    /// Expand every sitemap robots.txt declared for `domain`. Returns how
    /// many pages were admitted.
    pub async fn expand_domain(&self, domain: &str, scheme: &str) -> Result<usize, CrawlError> {
        let sitemaps = self.robots.sitemaps(domain, scheme).await?;
        if sitemaps.is_empty() {
            return Ok(0);
        }
        info!(domain, count = sitemaps.len(), "expanding sitemaps");

        let mut page_urls: Vec<String> = Vec::new();
        for sitemap_url in sitemaps {
            match self.fetch_body(&sitemap_url).await {
                Ok(body) => {
                    for loc in parse_sitemap(&body) {
                        if loc.ends_with(".xml") {
                            // one level of sitemap-index nesting
                            if let Ok(nested) = self.fetch_body(&loc).await {
                                page_urls.extend(
                                    parse_sitemap(&nested)
                                        .into_iter()
                                        .filter(|u| !u.ends_with(".xml")),
                                );
                            }
                        } else {
                            page_urls.push(loc);
                        }
                        if page_urls.len() >= MAX_SITEMAP_URLS {
                            break;
                        }
                    }
                }
                Err(e) => warn!(domain, sitemap = %sitemap_url, "sitemap fetch failed: {e}"),
            }
            if page_urls.len() >= MAX_SITEMAP_URLS {
                break;
            }
        }
        page_urls.truncate(MAX_SITEMAP_URLS);

        let mut admitted = 0;
        for raw in &page_urls {
            let Ok(canonical) = canonicalize(raw) else {
                continue;
            };
            if canonical.domain != domain {
                continue;
            }
            let candidate = FrontierCandidate {
                url: canonical.as_str().to_string(),
                domain: canonical.domain.clone(),
                depth: 1,
                pagerank: None,
                domain_authority: None,
            };
            if self.frontier.admit(candidate).await? {
                let record = UrlRecord::new(
                    raw,
                    canonical.as_str(),
                    &canonical.domain,
                    1,
                    SITEMAP_PRIORITY,
                    None,
                );
                self.store.insert_url(&record).await?;
                admitted += 1;
            }
        }
        debug!(domain, admitted, "sitemap expansion done");
        Ok(admitted)
    }
}
