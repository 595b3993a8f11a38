use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use searchlight_core::config::IndexingConfig;
use searchlight_core::{url_hash, CrawlError, IndexJob, StoredDocument};
use searchlight_kv::KvStore;

use crate::dedup::{Deduplicator, OnDuplicate};
use crate::search_index::{SearchIndex, SUGGEST_PREFIX};
use crate::{simhash, tokenizer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOutcome {
    Indexed,
    /// A near-duplicate with a better claim already exists; nothing written.
    DuplicateSkipped { kept_url: String },
    /// The incoming document won the duplicate resolution; the loser was
    /// removed.
    DuplicateReplaced { removed_url: String },
    /// Merge mode: the winner absorbed the loser's outbound links.
    Merged { winner_url: String },
}

/// The index-job consumer: tokenize, fingerprint, dedup, write. Processing
/// the same (url, content) twice converges on the same document, which is
/// what lets the bus be at-least-once.
pub struct Indexer {
    index: Arc<SearchIndex>,
    dedup: Deduplicator,
    kv: Arc<dyn KvStore>,
    config: IndexingConfig,
    on_duplicate: OnDuplicate,
}

fn make_snippet(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    let cut = head.rfind(char::is_whitespace).unwrap_or(head.len());
    format!("{}…", head[..cut].trim_end())
}

impl Indexer {
    pub fn new(
        index: Arc<SearchIndex>,
        dedup: Deduplicator,
        kv: Arc<dyn KvStore>,
        config: IndexingConfig,
        on_duplicate: OnDuplicate,
    ) -> Self {
        Self {
            index,
            dedup,
            kv,
            config,
            on_duplicate,
        }
    }

    async fn write_suggestion(&self, title: &str, url: &str) -> Result<(), CrawlError> {
        if title.is_empty() {
            return Ok(());
        }
        let key_title: String = title.to_lowercase().chars().take(100).collect();
        let value = serde_json::json!({ "title": title, "url": url }).to_string();
        self.kv
            .set(&format!("{SUGGEST_PREFIX}{key_title}"), &value)
            .await
    }

    pub async fn process(&self, job: &IndexJob) -> Result<IndexOutcome, CrawlError> {
        let doc_id = url_hash(&job.url);
        let body_cap = self.config.body_cap_kib * 1024;
        let mut end = job.content.len().min(body_cap);
        while end > 0 && !job.content.is_char_boundary(end) {
            end -= 1;
        }
        let content = &job.content[..end];

        let tokens = tokenizer::token_set(
            content,
            self.config.tokenize_input_kib * 1024,
            self.config.max_tokens,
        );
        let snippet = make_snippet(content, self.config.snippet_max_chars);
        let fingerprint = simhash::fingerprint(content);

        let prior = self.index.get_by_doc_id(&doc_id)?;
        let page_rank = prior.as_ref().map(|p| p.page_rank).unwrap_or(1.0);
        let inbound_link_count = prior.as_ref().map(|p| p.inbound_link_count).unwrap_or(0);

        let mut document = StoredDocument {
            doc_id: doc_id.clone(),
            url: job.url.clone(),
            title: job.title.clone().unwrap_or_default(),
            snippet,
            content: content.to_string(),
            tokens,
            outbound_links: job.outbound_links.clone(),
            domain: job.domain.clone(),
            crawl_depth: job.depth,
            page_rank,
            inbound_link_count,
            last_crawled: job.crawled_at,
            last_indexed: Utc::now(),
            content_length: content.len() as u64,
            simhash: fingerprint,
        };

        if let Some(hit) = self.dedup.find_duplicate(fingerprint, &job.url).await? {
            if let Some(existing) = self.index.get_by_doc_id(&hit.doc_id)? {
                // keep the copy with the higher rank; ties go to the
                // earlier crawl
                let new_wins = document.page_rank > existing.page_rank
                    || (document.page_rank == existing.page_rank
                        && document.last_crawled < existing.last_crawled);
                match (self.on_duplicate, new_wins) {
                    (OnDuplicate::Reject, false) => {
                        debug!(url = %job.url, kept = %existing.url, "duplicate rejected");
                        return Ok(IndexOutcome::DuplicateSkipped {
                            kept_url: existing.url,
                        });
                    }
                    (OnDuplicate::Reject, true) => {
                        info!(url = %job.url, removed = %existing.url, "duplicate replaced");
                        self.index.delete(&hit.doc_id).await?;
                        self.dedup.remove(&hit.doc_id).await?;
                        self.finish(&document).await?;
                        return Ok(IndexOutcome::DuplicateReplaced {
                            removed_url: existing.url,
                        });
                    }
                    (OnDuplicate::Merge, false) => {
                        let mut winner = existing;
                        for link in &document.outbound_links {
                            if !winner.outbound_links.contains(link) {
                                winner.outbound_links.push(link.clone());
                            }
                        }
                        self.index.upsert(&winner).await?;
                        return Ok(IndexOutcome::Merged {
                            winner_url: winner.url,
                        });
                    }
                    (OnDuplicate::Merge, true) => {
                        for link in &existing.outbound_links {
                            if !document.outbound_links.contains(link) {
                                document.outbound_links.push(link.clone());
                            }
                        }
                        self.index.delete(&hit.doc_id).await?;
                        self.dedup.remove(&hit.doc_id).await?;
                        self.finish(&document).await?;
                        return Ok(IndexOutcome::Merged {
                            winner_url: document.url,
                        });
                    }
                }
            }
        }

        self.finish(&document).await?;
        Ok(IndexOutcome::Indexed)
    }

    async fn finish(&self, document: &StoredDocument) -> Result<(), CrawlError> {
        self.index.upsert(document).await?;
        self.dedup
            .store(&document.doc_id, &document.url, document.simhash)
            .await?;
        self.write_suggestion(&document.title, &document.url).await
    }
}
