use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tantivy::query::{BooleanQuery, BoostQuery, Occur, Query, TermQuery};
use tantivy::schema::IndexRecordOption;
use tantivy::Term;
use tracing::debug;

use searchlight_core::config::QueryConfig;
use searchlight_core::{CrawlError, StoredDocument};
use searchlight_index::{tokenizer, SearchIndex, SUGGEST_PREFIX};
use searchlight_kv::KvStore;

use crate::correct::correct_query;
use crate::expand::{classify_intent, expand_tokens, extract_entities, Entity};

const MAX_QUERY_CHARS: usize = 500;
const CANDIDATE_LIMIT: usize = 200;
const DIVERSITY_WINDOW: usize = 10;
const INDEX_CALL_TIMEOUT: Duration = Duration::from_millis(1500);

const TITLE_BOOST: f32 = 3.0;
const TOKENS_BOOST: f32 = 2.0;
const CONTENT_BOOST: f32 = 1.0;
/// Synonym disjuncts run at half the main weights.
const SYNONYM_FACTOR: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Relevance,
    Date,
    PageRank,
}

impl SortOrder {
    pub fn parse(s: &str) -> Result<Self, CrawlError> {
        match s {
            "relevance" => Ok(SortOrder::Relevance),
            "date" => Ok(SortOrder::Date),
            "pagerank" => Ok(SortOrder::PageRank),
            other => Err(CrawlError::Parse(format!("unknown sort order {other}"))),
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Relevance => "relevance",
            SortOrder::Date => "date",
            SortOrder::PageRank => "pagerank",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchParams {
    pub q: String,
    pub page: usize,
    pub size: usize,
    pub sort: SortOrder,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub snippet: String,
    pub score: f64,
    pub last_crawled: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub query: String,
    pub total_results: usize,
    pub page: usize,
    pub size: usize,
    pub results: Vec<SearchHit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corrected_query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub did_you_mean: Option<String>,
    pub related_searches: Vec<String>,
    pub execution_time_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Suggestion {
    pub title: String,
    pub url: String,
}

pub struct QueryService {
    index: Arc<SearchIndex>,
    kv: Arc<dyn KvStore>,
    config: QueryConfig,
}

fn normalize(q: &str) -> String {
    let collapsed = q
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    collapsed.chars().take(MAX_QUERY_CHARS).collect()
}

struct Scored {
    score: f64,
    doc: StoredDocument,
}

impl QueryService {
    pub fn new(index: Arc<SearchIndex>, kv: Arc<dyn KvStore>, config: QueryConfig) -> Self {
        Self { index, kv, config }
    }

    fn cache_key(normalized: &str, page: usize, size: usize, sort: SortOrder) -> String {
        format!("search:{normalized}:{page}:{size}:{}", sort.as_str())
    }

    fn field_disjuncts(
        &self,
        term_text: &str,
        factor: f32,
        clauses: &mut Vec<(Occur, Box<dyn Query>)>,
    ) {
        let fields = self.index.fields();
        for (field, boost) in [
            (fields.title, TITLE_BOOST),
            (fields.tokens, TOKENS_BOOST),
            (fields.content, CONTENT_BOOST),
        ] {
            let term = Term::from_field_text(field, term_text);
            let term_query = TermQuery::new(term, IndexRecordOption::WithFreqs);
            clauses.push((
                Occur::Should,
                Box::new(BoostQuery::new(Box::new(term_query), boost * factor)),
            ));
        }
    }

    fn entity_must_clause(&self, entity_text: &str) -> Option<(Occur, Box<dyn Query>)> {
        let stemmed = tokenizer::tokenize(entity_text, 256, 4);
        let first = stemmed.first()?;
        let fields = self.index.fields();
        let any_field: Vec<Box<dyn Query>> = [fields.title, fields.tokens, fields.content]
            .into_iter()
            .map(|field| {
                Box::new(TermQuery::new(
                    Term::from_field_text(field, first),
                    IndexRecordOption::Basic,
                )) as Box<dyn Query>
            })
            .collect();
        Some((Occur::Must, Box::new(BooleanQuery::union(any_field))))
    }

    fn build_query(&self, corrected: &str, synonyms: &[String], entities: &[Entity]) -> BooleanQuery {
        let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
        for term in tokenizer::tokenize(corrected, 1024, 32) {
            self.field_disjuncts(&term, 1.0, &mut clauses);
        }
        for synonym in synonyms {
            for term in tokenizer::tokenize(synonym, 256, 4) {
                self.field_disjuncts(&term, SYNONYM_FACTOR, &mut clauses);
            }
        }
        for entity in entities {
            match entity {
                // a named language narrows the result set outright
                Entity::Language(lang) => {
                    if let Some(clause) = self.entity_must_clause(lang) {
                        clauses.push(clause);
                    }
                }
                // years and versions sharpen relevance without excluding
                Entity::Year(text) | Entity::Version(text) => {
                    let term = Term::from_field_text(self.index.fields().content, text);
                    let query = TermQuery::new(term, IndexRecordOption::WithFreqs);
                    clauses.push((
                        Occur::Should,
                        Box::new(BoostQuery::new(Box::new(query), 2.0)),
                    ));
                }
            }
        }
        BooleanQuery::new(clauses)
    }

    fn diversify(&self, ranked: Vec<Scored>) -> Vec<Scored> {
        if ranked.len() <= DIVERSITY_WINDOW {
            return ranked;
        }
        let cap = self.config.per_domain_cap;
        let mut head: Vec<Scored> = Vec::with_capacity(DIVERSITY_WINDOW);
        let mut overflow: Vec<Scored> = Vec::new();
        let mut rest: Vec<Scored> = Vec::new();
        let mut per_domain: HashMap<String, usize> = HashMap::new();
        for item in ranked {
            if head.len() < DIVERSITY_WINDOW {
                let seen = per_domain.entry(item.doc.domain.clone()).or_insert(0);
                if *seen < cap {
                    *seen += 1;
                    head.push(item);
                } else {
                    overflow.push(item);
                }
            } else {
                rest.push(item);
            }
        }
        head.extend(overflow);
        head.extend(rest);
        head
    }

    fn related_searches(corrected: &str) -> Vec<String> {
        let tokens: Vec<String> = corrected.split_whitespace().map(String::from).collect();
        let mut related = Vec::new();
        for (i, token) in tokens.iter().enumerate() {
            for synonym in expand_tokens(std::slice::from_ref(token)) {
                let mut variant = tokens.clone();
                variant[i] = synonym;
                let variant = variant.join(" ");
                if variant != corrected && !related.contains(&variant) {
                    related.push(variant);
                }
                if related.len() >= 5 {
                    return related;
                }
            }
        }
        related
    }

    fn highlight(snippet: &str, terms: &[String]) -> String {
        let mut out = snippet.to_string();
        for term in terms {
            if term.len() < 3 || term.contains(char::is_whitespace) {
                continue;
            }
            if let Ok(re) = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(term))) {
                out = re.replace_all(&out, "<em>$0</em>").into_owned();
            }
        }
        out
    }

    pub async fn search(&self, params: &SearchParams) -> Result<SearchResponse, CrawlError> {
        let started = Instant::now();
        let normalized = normalize(&params.q);
        let size = params.size.clamp(1, self.config.max_page_size);
        let page = params.page;

        if normalized.is_empty() {
            return Ok(SearchResponse {
                query: normalized,
                total_results: 0,
                page,
                size,
                results: Vec::new(),
                corrected_query: None,
                did_you_mean: None,
                related_searches: Vec::new(),
                execution_time_ms: started.elapsed().as_millis() as u64,
            });
        }

        let cache_key = Self::cache_key(&normalized, page, size, params.sort);
        if let Some(cached) = self.kv.get(&cache_key).await.unwrap_or(None) {
            if let Ok(mut response) = serde_json::from_str::<SearchResponse>(&cached) {
                response.execution_time_ms = started.elapsed().as_millis() as u64;
                return Ok(response);
            }
        }

        let (corrected, did_you_mean) = correct_query(&normalized);
        let corrected_tokens: Vec<String> =
            corrected.split_whitespace().map(String::from).collect();
        let synonyms = expand_tokens(&corrected_tokens);
        let entities = extract_entities(&corrected);
        let intent = classify_intent(&corrected);
        debug!(query = %corrected, ?intent, synonyms = synonyms.len(), "expanded query");

        let query = self.build_query(&corrected, &synonyms, &entities);
        let index = self.index.clone();
        let (total, hits) = tokio::time::timeout(
            INDEX_CALL_TIMEOUT,
            tokio::task::spawn_blocking(move || -> Result<_, CrawlError> {
                let total = index.count(&query)?;
                let hits = index.search(&query, CANDIDATE_LIMIT)?;
                Ok((total, hits))
            }),
        )
        .await
        .map_err(|_| CrawlError::Timeout(INDEX_CALL_TIMEOUT.as_secs()))?
        .map_err(|e| CrawlError::Index(format!("search task: {e}")))??;

        // text relevance times the rank signal
        let mut ranked: Vec<Scored> = hits
            .into_iter()
            .map(|(text_score, doc)| Scored {
                score: text_score as f64 * (doc.page_rank + 1.0).ln_1p(),
                doc,
            })
            .collect();
        match params.sort {
            SortOrder::Relevance => {
                ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
            }
            SortOrder::Date => {
                ranked.sort_by(|a, b| b.doc.last_crawled.cmp(&a.doc.last_crawled));
            }
            SortOrder::PageRank => {
                ranked.sort_by(|a, b| b.doc.page_rank.total_cmp(&a.doc.page_rank));
            }
        }
        let ranked = self.diversify(ranked);

        let mut highlight_terms: Vec<String> = corrected_tokens.clone();
        for term in normalized.split_whitespace() {
            if !highlight_terms.iter().any(|t| t == term) {
                highlight_terms.push(term.to_string());
            }
        }
        let results: Vec<SearchHit> = ranked
            .iter()
            .skip(page * size)
            .take(size)
            .map(|scored| SearchHit {
                url: scored.doc.url.clone(),
                title: scored.doc.title.clone(),
                snippet: Self::highlight(&scored.doc.snippet, &highlight_terms),
                score: scored.score,
                last_crawled: scored.doc.last_crawled,
            })
            .collect();

        let response = SearchResponse {
            query: normalized,
            total_results: total,
            page,
            size,
            results,
            corrected_query: did_you_mean.is_some().then(|| corrected.clone()),
            did_you_mean,
            related_searches: Self::related_searches(&corrected),
            execution_time_ms: started.elapsed().as_millis() as u64,
        };

        if let Ok(encoded) = serde_json::to_string(&response) {
            let ttl = Duration::from_secs(self.config.cache_ttl_minutes * 60);
            let _ = self.kv.set_with_ttl(&cache_key, &encoded, ttl).await;
        }
        Ok(response)
    }

    /// Up to 5 distinct title-prefix matches from the suggestion
    /// namespace.
    pub async fn suggest(&self, prefix: &str) -> Result<Vec<Suggestion>, CrawlError> {
        let prefix = normalize(prefix);
        if prefix.is_empty() {
            return Ok(Vec::new());
        }
        let hits = self
            .kv
            .scan_prefix(&format!("{SUGGEST_PREFIX}{prefix}"))
            .await?;
        let mut out: Vec<Suggestion> = Vec::new();
        for (_, raw) in hits {
            let Ok(suggestion) = serde_json::from_str::<Suggestion>(&raw) else {
                continue;
            };
            if !out.iter().any(|s| s.title == suggestion.title) {
                out.push(suggestion);
            }
            if out.len() >= 5 {
                break;
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use searchlight_core::url_hash;
    use searchlight_kv::MemoryKv;

    fn doc(url: &str, title: &str, content: &str, page_rank: f64) -> StoredDocument {
        let parsed = url::Url::parse(url).unwrap();
        StoredDocument {
            doc_id: url_hash(url),
            url: url.to_string(),
            title: title.to_string(),
            snippet: content.chars().take(200).collect(),
            content: content.to_string(),
            tokens: tokenizer::token_set(content, usize::MAX, 1000),
            outbound_links: vec![],
            domain: parsed.host_str().unwrap().to_string(),
            crawl_depth: 1,
            page_rank,
            inbound_link_count: 0,
            last_crawled: Utc::now(),
            last_indexed: Utc::now(),
            content_length: content.len() as u64,
            simhash: 0,
        }
    }

    async fn service_with(docs: Vec<StoredDocument>) -> QueryService {
        let index = Arc::new(SearchIndex::open_in_ram().unwrap());
        for d in &docs {
            index.upsert(d).await.unwrap();
        }
        QueryService::new(index, Arc::new(MemoryKv::new()), QueryConfig::default())
    }

    fn params(q: &str) -> SearchParams {
        SearchParams {
            q: q.to_string(),
            page: 0,
            size: 10,
            sort: SortOrder::Relevance,
        }
    }

    #[tokio::test]
    async fn misspelled_query_is_corrected_and_finds_the_document() {
        let service = service_with(vec![
            doc(
                "https://docs.example.com/concurrency/",
                "Concurrency Patterns",
                "a long discussion of concurrency locks threads and channels",
                1.0,
            ),
            doc(
                "https://docs.example.com/io/",
                "File IO",
                "reading and writing files buffers and streams",
                1.0,
            ),
        ])
        .await;

        let response = service.search(&params("concurency")).await.unwrap();
        assert_eq!(response.did_you_mean.as_deref(), Some("concurrency"));
        assert_eq!(response.corrected_query.as_deref(), Some("concurrency"));
        assert!(response.total_results >= 1);
        assert_eq!(
            response.results[0].url,
            "https://docs.example.com/concurrency/"
        );
    }

    #[tokio::test]
    async fn diversification_caps_one_domain_in_top_ten() {
        let mut docs = Vec::new();
        // 20 strong candidates from one domain
        for i in 0..20 {
            docs.push(doc(
                &format!("https://big.example.com/page{i}/"),
                &format!("Crawler article {i}"),
                "crawler crawler crawler frontier politeness scheduling",
                1.0,
            ));
        }
        // 10 weaker candidates from distinct domains
        for i in 0..10 {
            docs.push(doc(
                &format!("https://site{i}.org/"),
                &format!("Crawler note {i}"),
                "notes about a crawler",
                1.0,
            ));
        }
        let service = service_with(docs).await;
        let response = service.search(&params("crawler")).await.unwrap();
        assert_eq!(response.results.len(), 10);
        let from_big = response
            .results
            .iter()
            .filter(|hit| hit.url.starts_with("https://big.example.com/"))
            .count();
        assert!(from_big <= 3, "domain cap violated: {from_big}");
    }

    #[tokio::test]
    async fn pagerank_multiplier_orders_equal_text_matches() {
        let service = service_with(vec![
            doc(
                "https://low.example.com/",
                "Tokio runtime",
                "tokio runtime internals explained",
                0.01,
            ),
            doc(
                "https://high.example.com/",
                "Tokio runtime",
                "tokio runtime internals explained",
                0.9,
            ),
        ])
        .await;
        let response = service.search(&params("tokio")).await.unwrap();
        assert_eq!(response.results[0].url, "https://high.example.com/");
    }

    #[tokio::test]
    async fn date_sort_orders_by_crawl_time() {
        let mut old = doc(
            "https://old.example.com/",
            "Tokio guide",
            "tokio guide body text",
            1.0,
        );
        old.last_crawled = Utc::now() - chrono::Duration::days(30);
        let fresh = doc(
            "https://fresh.example.com/",
            "Tokio guide",
            "tokio guide body text",
            1.0,
        );
        let service = service_with(vec![old, fresh]).await;
        let mut p = params("tokio");
        p.sort = SortOrder::Date;
        let response = service.search(&p).await.unwrap();
        assert_eq!(response.results[0].url, "https://fresh.example.com/");
    }

    #[tokio::test]
    async fn caches_responses() {
        let service = service_with(vec![doc(
            "https://a.example.com/",
            "Alpha",
            "alpha body content",
            1.0,
        )])
        .await;
        let first = service.search(&params("alpha")).await.unwrap();
        // a second identical call is served from cache and identical
        // modulo timing
        let second = service.search(&params("alpha")).await.unwrap();
        assert_eq!(first.total_results, second.total_results);
        assert_eq!(first.results[0].url, second.results[0].url);
    }

    #[tokio::test]
    async fn related_searches_substitute_synonyms() {
        let service = service_with(vec![]).await;
        let response = service.search(&params("java tutorial")).await.unwrap();
        assert!(response.related_searches.contains(&"jvm tutorial".to_string()));
        assert!(response.related_searches.contains(&"java guide".to_string()));
        assert!(response.related_searches.len() <= 5);
    }

    #[tokio::test]
    async fn empty_result_page_is_a_normal_success() {
        let service = service_with(vec![]).await;
        let response = service.search(&params("anything at all")).await.unwrap();
        assert_eq!(response.total_results, 0);
        assert!(response.results.is_empty());
    }

    #[tokio::test]
    async fn suggestions_come_from_title_prefixes() {
        let service = service_with(vec![]).await;
        // seed the suggestion namespace the way the indexer does
        let kv = &service.kv;
        for (title, url) in [
            ("Rust Book", "https://a.com/"),
            ("Rust Atomics", "https://b.com/"),
            ("Python Guide", "https://c.com/"),
        ] {
            let value = serde_json::json!({ "title": title, "url": url }).to_string();
            kv.set(&format!("{SUGGEST_PREFIX}{}", title.to_lowercase()), &value)
                .await
                .unwrap();
        }
        let suggestions = service.suggest("rust").await.unwrap();
        assert_eq!(suggestions.len(), 2);
        assert!(suggestions.iter().all(|s| s.title.starts_with("Rust")));
    }

    #[test]
    fn highlight_wraps_terms() {
        let out = QueryService::highlight(
            "Concurrency in practice",
            &["concurrency".to_string()],
        );
        assert_eq!(out, "<em>Concurrency</em> in practice");
    }
}
