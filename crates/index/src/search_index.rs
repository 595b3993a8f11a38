use std::path::Path;

use chrono::{DateTime, Utc};
use tantivy::collector::{Count, TopDocs};
use tantivy::directory::MmapDirectory;
use tantivy::query::{Query, TermQuery};
use tantivy::schema::{
    Field, IndexRecordOption, Schema, TextFieldIndexing, TextOptions, Value, FAST, STORED,
    STRING,
};
use tantivy::{Index, IndexReader, IndexWriter, TantivyDocument, Term};
use tokio::sync::Mutex;

use searchlight_core::{CrawlError, StoredDocument};

use crate::tokenizer::{self, ANALYZER_NAME};

/// KV namespace for title-prefix suggestions, written at index time.
pub const SUGGEST_PREFIX: &str = "suggest:";

const WRITER_BUDGET_BYTES: usize = 50_000_000;

#[derive(Clone, Copy)]
pub struct IndexFields {
    pub doc_id: Field,
    pub url: Field,
    pub title: Field,
    pub content: Field,
    pub snippet: Field,
    pub tokens: Field,
    pub outbound: Field,
    pub domain: Field,
    pub depth: Field,
    pub pagerank: Field,
    pub inbound: Field,
    pub last_crawled: Field,
    pub last_indexed: Field,
    pub content_length: Field,
    pub simhash: Field,
}

fn build_schema() -> (Schema, IndexFields) {
    let mut builder = Schema::builder();

    let analyzed = TextOptions::default()
        .set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer(ANALYZER_NAME)
                .set_index_option(IndexRecordOption::WithFreqsAndPositions),
        )
        .set_stored();

    let fields = IndexFields {
        doc_id: builder.add_text_field("doc_id", STRING | STORED),
        url: builder.add_text_field("url", STRING | STORED),
        title: builder.add_text_field("title", analyzed.clone()),
        content: builder.add_text_field("content", analyzed),
        snippet: builder.add_text_field("snippet", STORED),
        tokens: builder.add_text_field("tokens", STRING | STORED),
        outbound: builder.add_text_field("outbound_links", STRING | STORED),
        domain: builder.add_text_field("domain", STRING | STORED),
        depth: builder.add_u64_field("crawl_depth", STORED),
        pagerank: builder.add_f64_field("pagerank", STORED | FAST),
        inbound: builder.add_u64_field("inbound_link_count", STORED),
        last_crawled: builder.add_i64_field("last_crawled", STORED | FAST),
        last_indexed: builder.add_i64_field("last_indexed", STORED),
        content_length: builder.add_u64_field("content_length", STORED),
        simhash: builder.add_u64_field("simhash", STORED),
    };
    (builder.build(), fields)
}

fn index_err(e: impl std::fmt::Display) -> CrawlError {
    CrawlError::Index(e.to_string())
}

/// The `web-pages` collection: a tantivy index with title/content analyzed
/// through the English pipeline and the remaining fields raw. One writer,
/// many searchers; upserts are delete-by-id + add in a single commit.
pub struct SearchIndex {
    fields: IndexFields,
    writer: Mutex<IndexWriter>,
    reader: IndexReader,
}

impl SearchIndex {
    pub fn open_in_dir(path: &Path) -> Result<Self, CrawlError> {
        let (schema, fields) = build_schema();
        std::fs::create_dir_all(path).map_err(index_err)?;
        let dir = MmapDirectory::open(path).map_err(index_err)?;
        let index = Index::open_or_create(dir, schema).map_err(index_err)?;
        Self::finish_open(index, fields)
    }

    /// RAM-backed index for tests and ephemeral runs.
    pub fn open_in_ram() -> Result<Self, CrawlError> {
        let (schema, fields) = build_schema();
        let index = Index::create_in_ram(schema);
        Self::finish_open(index, fields)
    }

    fn finish_open(index: Index, fields: IndexFields) -> Result<Self, CrawlError> {
        index.tokenizers().register(ANALYZER_NAME, tokenizer::analyzer());
        let writer = index.writer(WRITER_BUDGET_BYTES).map_err(index_err)?;
        let reader = index.reader().map_err(index_err)?;
        Ok(Self {
            fields,
            writer: Mutex::new(writer),
            reader,
        })
    }

    pub fn fields(&self) -> IndexFields {
        self.fields
    }

    fn to_tantivy(&self, doc: &StoredDocument) -> TantivyDocument {
        let f = &self.fields;
        let mut out = TantivyDocument::default();
        out.add_text(f.doc_id, &doc.doc_id);
        out.add_text(f.url, &doc.url);
        out.add_text(f.title, &doc.title);
        out.add_text(f.content, &doc.content);
        out.add_text(f.snippet, &doc.snippet);
        for token in &doc.tokens {
            out.add_text(f.tokens, token);
        }
        for link in &doc.outbound_links {
            out.add_text(f.outbound, link);
        }
        out.add_text(f.domain, &doc.domain);
        out.add_u64(f.depth, doc.crawl_depth as u64);
        out.add_f64(f.pagerank, doc.page_rank);
        out.add_u64(f.inbound, doc.inbound_link_count);
        out.add_i64(f.last_crawled, doc.last_crawled.timestamp());
        out.add_i64(f.last_indexed, doc.last_indexed.timestamp());
        out.add_u64(f.content_length, doc.content_length);
        out.add_u64(f.simhash, doc.simhash);
        out
    }

    fn from_tantivy(&self, doc: &TantivyDocument) -> StoredDocument {
        let f = &self.fields;
        let text = |field: Field| {
            doc.get_first(field)
                .and_then(|v| v.as_str().map(|s| s.to_string()))
                .unwrap_or_default()
        };
        let texts = |field: Field| {
            doc.get_all(field)
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect::<Vec<_>>()
        };
        let u64_of = |field: Field| doc.get_first(field).and_then(|v| v.as_u64()).unwrap_or(0);
        let i64_of = |field: Field| doc.get_first(field).and_then(|v| v.as_i64()).unwrap_or(0);
        let date_of = |field: Field| {
            DateTime::<Utc>::from_timestamp(i64_of(field), 0).unwrap_or_else(Utc::now)
        };
        StoredDocument {
            doc_id: text(f.doc_id),
            url: text(f.url),
            title: text(f.title),
            snippet: text(f.snippet),
            content: text(f.content),
            tokens: texts(f.tokens),
            outbound_links: texts(f.outbound),
            domain: text(f.domain),
            crawl_depth: u64_of(f.depth) as u32,
            page_rank: doc
                .get_first(f.pagerank)
                .and_then(|v| v.as_f64())
                .unwrap_or(1.0),
            inbound_link_count: u64_of(f.inbound),
            last_crawled: date_of(f.last_crawled),
            last_indexed: date_of(f.last_indexed),
            content_length: u64_of(f.content_length),
            simhash: u64_of(f.simhash),
        }
    }

    /// Replace (or create) the document with this doc id. Last writer wins
    /// on (url, last_indexed), which is safe because indexers are
    /// idempotent on (url, content).
    pub async fn upsert(&self, doc: &StoredDocument) -> Result<(), CrawlError> {
        let tantivy_doc = self.to_tantivy(doc);
        let mut writer = self.writer.lock().await;
        writer.delete_term(Term::from_field_text(self.fields.doc_id, &doc.doc_id));
        writer.add_document(tantivy_doc).map_err(index_err)?;
        writer.commit().map_err(index_err)?;
        drop(writer);
        self.reader.reload().map_err(index_err)?;
        Ok(())
    }

    pub async fn delete(&self, doc_id: &str) -> Result<(), CrawlError> {
        let mut writer = self.writer.lock().await;
        writer.delete_term(Term::from_field_text(self.fields.doc_id, doc_id));
        writer.commit().map_err(index_err)?;
        drop(writer);
        self.reader.reload().map_err(index_err)?;
        Ok(())
    }

    pub fn get_by_doc_id(&self, doc_id: &str) -> Result<Option<StoredDocument>, CrawlError> {
        let searcher = self.reader.searcher();
        let query = TermQuery::new(
            Term::from_field_text(self.fields.doc_id, doc_id),
            IndexRecordOption::Basic,
        );
        let hits = searcher
            .search(&query, &TopDocs::with_limit(1))
            .map_err(index_err)?;
        match hits.first() {
            Some((_, address)) => {
                let doc: TantivyDocument = searcher.doc(*address).map_err(index_err)?;
                Ok(Some(self.from_tantivy(&doc)))
            }
            None => Ok(None),
        }
    }

    /// Run an arbitrary query, returning (text score, document) pairs in
    /// score order.
    pub fn search(
        &self,
        query: &dyn Query,
        limit: usize,
    ) -> Result<Vec<(f32, StoredDocument)>, CrawlError> {
        let searcher = self.reader.searcher();
        let hits = searcher
            .search(query, &TopDocs::with_limit(limit.max(1)))
            .map_err(index_err)?;
        let mut out = Vec::with_capacity(hits.len());
        for (score, address) in hits {
            let doc: TantivyDocument = searcher.doc(address).map_err(index_err)?;
            out.push((score, self.from_tantivy(&doc)));
        }
        Ok(out)
    }

    pub fn doc_count(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    /// Total hits for a query, independent of any retrieval limit.
    pub fn count(&self, query: &dyn Query) -> Result<usize, CrawlError> {
        self.reader
            .searcher()
            .search(query, &Count)
            .map_err(index_err)
    }

    /// Join a rank-job result back onto the stored document, preserving
    /// everything else.
    pub async fn update_rank(
        &self,
        doc_id: &str,
        score: f64,
        inbound: u64,
    ) -> Result<bool, CrawlError> {
        match self.get_by_doc_id(doc_id)? {
            Some(mut doc) => {
                doc.page_rank = score;
                doc.inbound_link_count = inbound;
                self.upsert(&doc).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
