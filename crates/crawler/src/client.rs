use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use searchlight_core::CrawlError;

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub final_url: Url,
    pub status: u16,
    pub body: String,
    pub content_type: Option<String>,
}

impl FetchedResponse {
    pub fn is_html(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|ct| ct.contains("text/html") || ct.contains("application/xhtml"))
            .unwrap_or(true)
    }
}

/// HTTP seam for the fetch worker; tests substitute a scripted stub.
#[async_trait]
pub trait FetchClient: Send + Sync + 'static {
    async fn get(&self, url: &Url) -> Result<FetchedResponse, CrawlError>;
}

/// reqwest-backed client with the crawl deadlines: 15 s wall clock,
/// bounded redirects, body capped while streaming.
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout_secs: u64,
    max_body_bytes: usize,
}

impl HttpFetcher {
    pub fn new(
        user_agent: &str,
        timeout_secs: u64,
        max_redirects: u32,
        max_body_mb: usize,
    ) -> Result<Self, CrawlError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(max_redirects as usize))
            .gzip(true)
            .build()
            .map_err(|e| CrawlError::Network(format!("fetch client: {e}")))?;
        Ok(Self {
            client,
            timeout_secs,
            max_body_bytes: max_body_mb * 1024 * 1024,
        })
    }

    fn map_error(&self, url: &Url, e: reqwest::Error) -> CrawlError {
        if e.is_timeout() {
            CrawlError::Timeout(self.timeout_secs)
        } else if e.is_redirect() {
            CrawlError::InvalidUrl(format!("redirect loop at {url}"))
        } else {
            CrawlError::Network(e.to_string())
        }
    }
}

#[async_trait]
impl FetchClient for HttpFetcher {
    async fn get(&self, url: &Url) -> Result<FetchedResponse, CrawlError> {
        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| self.map_error(url, e))?;

        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());

        let mut body: Vec<u8> = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| self.map_error(url, e))?
        {
            if body.len() + chunk.len() > self.max_body_bytes {
                return Err(CrawlError::BodyTooLarge {
                    size: body.len() + chunk.len(),
                    max: self.max_body_bytes,
                });
            }
            body.extend_from_slice(&chunk);
        }

        Ok(FetchedResponse {
            final_url,
            status,
            body: String::from_utf8_lossy(&body).into_owned(),
            content_type,
        })
    }
}
