use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use searchlight_core::{CrawlError, CrawlStatus, DomainRecord, EdgeRecord, RankRecord, UrlRecord};

use crate::CrawlStore;

type UrlRow = (
    String,
    String,
    String,
    String,
    i32,
    f64,
    String,
    i32,
    Option<DateTime<Utc>>,
    Option<DateTime<Utc>>,
    Option<String>,
    Option<String>,
    DateTime<Utc>,
);

const URL_COLUMNS: &str = "url_hash, raw_url, url, domain, depth, priority, status, retry_count, \
                           last_attempt_at, next_eligible_at, source_url, error, created_at";

fn url_from_row(row: UrlRow) -> Result<UrlRecord, CrawlError> {
    let status = CrawlStatus::parse(&row.6)
        .ok_or_else(|| CrawlError::Store(format!("unknown status {}", row.6)))?;
    Ok(UrlRecord {
        url_hash: row.0,
        raw_url: row.1,
        url: row.2,
        domain: row.3,
        depth: row.4 as u32,
        priority: row.5,
        status,
        retry_count: row.7 as u32,
        last_attempt_at: row.8,
        next_eligible_at: row.9,
        source_url: row.10,
        error: row.11,
        created_at: row.12,
    })
}

fn store_err(e: sqlx::Error) -> CrawlError {
    CrawlError::Store(e.to_string())
}

/// Postgres-backed store; the production implementation of [`CrawlStore`].
#[derive(Clone)]
pub struct PgCrawlStore {
    pool: PgPool,
}

impl PgCrawlStore {
    pub async fn new(database_url: &str) -> Result<Self, CrawlError> {
        Self::with_pool_size(database_url, 20).await
    }

    pub async fn with_pool_size(
        database_url: &str,
        max_connections: u32,
    ) -> Result<Self, CrawlError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(store_err)?;
        info!(max_connections, "connected to postgres");
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<(), CrawlError> {
        sqlx::raw_sql(include_str!("../migrations/001_init.sql"))
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        info!("migrations complete");
        Ok(())
    }
}

#[async_trait]
impl CrawlStore for PgCrawlStore {
    async fn insert_url(&self, record: &UrlRecord) -> Result<bool, CrawlError> {
        let result = sqlx::query(
            r#"INSERT INTO crawl_urls (url_hash, raw_url, url, domain, depth, priority, status,
                                       retry_count, last_attempt_at, next_eligible_at, source_url,
                                       error, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
               ON CONFLICT (url_hash) DO NOTHING"#,
        )
        .bind(&record.url_hash)
        .bind(&record.raw_url)
        .bind(&record.url)
        .bind(&record.domain)
        .bind(record.depth as i32)
        .bind(record.priority)
        .bind(record.status.as_str())
        .bind(record.retry_count as i32)
        .bind(record.last_attempt_at)
        .bind(record.next_eligible_at)
        .bind(&record.source_url)
        .bind(&record.error)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_url(&self, url_hash: &str) -> Result<Option<UrlRecord>, CrawlError> {
        let sql = format!("SELECT {URL_COLUMNS} FROM crawl_urls WHERE url_hash = $1");
        let row: Option<UrlRow> = sqlx::query_as(&sql)
        .bind(url_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        row.map(url_from_row).transpose()
    }

    async fn cas_status(
        &self,
        url_hash: &str,
        from: CrawlStatus,
        to: CrawlStatus,
    ) -> Result<bool, CrawlError> {
        let result = sqlx::query(
            r#"UPDATE crawl_urls
               SET status = $3,
                   last_attempt_at = CASE WHEN $3 = 'IN_PROGRESS' THEN now()
                                          ELSE last_attempt_at END
               WHERE url_hash = $1 AND status = $2"#,
        )
        .bind(url_hash)
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn complete(&self, url_hash: &str) -> Result<(), CrawlError> {
        sqlx::query(
            r#"UPDATE crawl_urls
               SET status = 'COMPLETED', retry_count = 0, error = NULL, last_attempt_at = now()
               WHERE url_hash = $1"#,
        )
        .bind(url_hash)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn fail(&self, url_hash: &str, error: &str) -> Result<(), CrawlError> {
        sqlx::query(
            r#"UPDATE crawl_urls
               SET status = 'FAILED', retry_count = retry_count + 1, error = $2,
                   last_attempt_at = now()
               WHERE url_hash = $1"#,
        )
        .bind(url_hash)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn block(&self, url_hash: &str, reason: &str) -> Result<(), CrawlError> {
        sqlx::query(
            r#"UPDATE crawl_urls
               SET status = 'BLOCKED', error = $2, last_attempt_at = now()
               WHERE url_hash = $1"#,
        )
        .bind(url_hash)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn set_next_eligible(
        &self,
        url_hash: &str,
        at: DateTime<Utc>,
    ) -> Result<(), CrawlError> {
        sqlx::query("UPDATE crawl_urls SET next_eligible_at = $2 WHERE url_hash = $1")
            .bind(url_hash)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn counts_by_status(&self) -> Result<HashMap<CrawlStatus, u64>, CrawlError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM crawl_urls GROUP BY status")
                .fetch_all(&self.pool)
                .await
                .map_err(store_err)?;
        let mut counts = HashMap::new();
        for (status, count) in rows {
            if let Some(parsed) = CrawlStatus::parse(&status) {
                counts.insert(parsed, count as u64);
            }
        }
        Ok(counts)
    }

    async fn failed_retryable(
        &self,
        cutoff: DateTime<Utc>,
        max_retries: u32,
        limit: usize,
    ) -> Result<Vec<UrlRecord>, CrawlError> {
        let sql = format!(
            r#"SELECT {URL_COLUMNS} FROM crawl_urls
               WHERE status = 'FAILED' AND retry_count < $1
                 AND (last_attempt_at IS NULL OR last_attempt_at < $2)
               ORDER BY last_attempt_at ASC NULLS FIRST
               LIMIT $3"#
        );
        let rows: Vec<UrlRow> = sqlx::query_as(&sql)
        .bind(max_retries as i32)
        .bind(cutoff)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        rows.into_iter().map(url_from_row).collect()
    }

    async fn requeue_failed(&self, url_hash: &str, priority: f64) -> Result<bool, CrawlError> {
        let result = sqlx::query(
            r#"UPDATE crawl_urls
               SET status = 'PENDING', priority = $2, next_eligible_at = NULL
               WHERE url_hash = $1 AND status = 'FAILED'"#,
        )
        .bind(url_hash)
        .bind(priority)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn requeue_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<UrlRecord>, CrawlError> {
        let sql = format!(
            r#"UPDATE crawl_urls
               SET status = 'PENDING'
               WHERE status = 'IN_PROGRESS'
                 AND (last_attempt_at IS NULL OR last_attempt_at < $1)
               RETURNING {URL_COLUMNS}"#
        );
        let rows: Vec<UrlRow> = sqlx::query_as(&sql)
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        rows.into_iter().map(url_from_row).collect()
    }

    async fn insert_edge(&self, edge: &EdgeRecord) -> Result<bool, CrawlError> {
        let result = sqlx::query(
            r#"INSERT INTO page_links (source_url, target_url, anchor, created_at)
               VALUES ($1, $2, $3, $4)
               ON CONFLICT (source_url, target_url) DO NOTHING"#,
        )
        .bind(&edge.source_url)
        .bind(&edge.target_url)
        .bind(&edge.anchor)
        .bind(edge.first_seen)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn all_edges(&self) -> Result<Vec<EdgeRecord>, CrawlError> {
        let rows: Vec<(String, String, Option<String>, DateTime<Utc>)> = sqlx::query_as(
            "SELECT source_url, target_url, anchor, created_at FROM page_links",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(rows
            .into_iter()
            .map(|(source_url, target_url, anchor, first_seen)| EdgeRecord {
                source_url,
                target_url,
                anchor,
                first_seen,
            })
            .collect())
    }

    async fn write_ranks(&self, ranks: &[RankRecord]) -> Result<(), CrawlError> {
        // batch UNNEST upsert, one round trip for the whole rank table
        let mut urls: Vec<String> = Vec::with_capacity(ranks.len());
        let mut scores: Vec<f64> = Vec::with_capacity(ranks.len());
        let mut inbound: Vec<i64> = Vec::with_capacity(ranks.len());
        let mut outbound: Vec<i64> = Vec::with_capacity(ranks.len());
        for rank in ranks {
            urls.push(rank.url.clone());
            scores.push(rank.score);
            inbound.push(rank.inbound as i64);
            outbound.push(rank.outbound as i64);
        }
        sqlx::query(
            r#"INSERT INTO page_rank (url, score, inbound, outbound, calculated_at)
               SELECT *, now() FROM UNNEST($1::text[], $2::float8[], $3::bigint[], $4::bigint[])
               ON CONFLICT (url) DO UPDATE
               SET score = EXCLUDED.score, inbound = EXCLUDED.inbound,
                   outbound = EXCLUDED.outbound, calculated_at = EXCLUDED.calculated_at"#,
        )
        .bind(&urls)
        .bind(&scores)
        .bind(&inbound)
        .bind(&outbound)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn get_rank(&self, url: &str) -> Result<Option<RankRecord>, CrawlError> {
        let row: Option<(String, f64, i64, i64, DateTime<Utc>)> = sqlx::query_as(
            "SELECT url, score, inbound, outbound, calculated_at FROM page_rank WHERE url = $1",
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(row.map(|(url, score, inbound, outbound, calculated_at)| RankRecord {
            url,
            score,
            inbound: inbound as u64,
            outbound: outbound as u64,
            calculated_at,
        }))
    }

    async fn ensure_domain(&self, domain: &str) -> Result<DomainRecord, CrawlError> {
        let row: (String, i64, i32, bool, i64, i64, i64, Option<DateTime<Utc>>) = sqlx::query_as(
            r#"INSERT INTO domain_metadata (domain) VALUES ($1)
               ON CONFLICT (domain) DO UPDATE SET domain = EXCLUDED.domain
               RETURNING domain, crawl_delay_ms, max_concurrent, blocked, attempts, successes,
                         failures, last_crawled_at"#,
        )
        .bind(domain)
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(DomainRecord {
            domain: row.0,
            crawl_delay_ms: row.1 as u64,
            max_concurrent: row.2 as u32,
            blocked: row.3,
            attempts: row.4 as u64,
            successes: row.5 as u64,
            failures: row.6 as u64,
            last_crawled_at: row.7,
        })
    }

    async fn get_domain(&self, domain: &str) -> Result<Option<DomainRecord>, CrawlError> {
        let row: Option<(String, i64, i32, bool, i64, i64, i64, Option<DateTime<Utc>>)> =
            sqlx::query_as(
                r#"SELECT domain, crawl_delay_ms, max_concurrent, blocked, attempts, successes,
                          failures, last_crawled_at
                   FROM domain_metadata WHERE domain = $1"#,
            )
            .bind(domain)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(row.map(|row| DomainRecord {
            domain: row.0,
            crawl_delay_ms: row.1 as u64,
            max_concurrent: row.2 as u32,
            blocked: row.3,
            attempts: row.4 as u64,
            successes: row.5 as u64,
            failures: row.6 as u64,
            last_crawled_at: row.7,
        }))
    }

    async fn set_domain_blocked(&self, domain: &str, blocked: bool) -> Result<(), CrawlError> {
        sqlx::query(
            r#"INSERT INTO domain_metadata (domain, blocked) VALUES ($1, $2)
               ON CONFLICT (domain) DO UPDATE SET blocked = EXCLUDED.blocked"#,
        )
        .bind(domain)
        .bind(blocked)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn set_domain_crawl_delay(&self, domain: &str, delay_ms: u64) -> Result<(), CrawlError> {
        sqlx::query(
            r#"INSERT INTO domain_metadata (domain, crawl_delay_ms) VALUES ($1, $2)
               ON CONFLICT (domain) DO UPDATE SET crawl_delay_ms = EXCLUDED.crawl_delay_ms"#,
        )
        .bind(domain)
        .bind(delay_ms as i64)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn record_fetch_outcome(&self, domain: &str, success: bool) -> Result<(), CrawlError> {
        sqlx::query(
            r#"INSERT INTO domain_metadata (domain, attempts, successes, failures, last_crawled_at)
               VALUES ($1, 1,
                       CASE WHEN $2 THEN 1 ELSE 0 END,
                       CASE WHEN $2 THEN 0 ELSE 1 END,
                       CASE WHEN $2 THEN now() ELSE NULL END)
               ON CONFLICT (domain) DO UPDATE SET
                   attempts = domain_metadata.attempts + 1,
                   successes = domain_metadata.successes + CASE WHEN $2 THEN 1 ELSE 0 END,
                   failures = domain_metadata.failures + CASE WHEN $2 THEN 0 ELSE 1 END,
                   last_crawled_at = CASE WHEN $2 THEN now()
                                          ELSE domain_metadata.last_crawled_at END"#,
        )
        .bind(domain)
        .bind(success)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }
}
