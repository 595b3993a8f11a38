use std::sync::Arc;

use anyhow::Result;

use searchlight_core::CrawlStatus;

use crate::app::App;

pub async fn run(app: Arc<App>) -> Result<()> {
    let counts = app.store.counts_by_status().await?;
    println!("crawl urls by status:");
    for status in [
        CrawlStatus::Pending,
        CrawlStatus::InProgress,
        CrawlStatus::Completed,
        CrawlStatus::Failed,
        CrawlStatus::Blocked,
    ] {
        println!("  {:12} {}", status.as_str(), counts.get(&status).copied().unwrap_or(0));
    }
    println!("frontier size:      {}", app.frontier.len().await?);
    println!("indexed documents:  {}", app.index.doc_count());
    println!("frontier strategy:  {}", app.frontier.strategy_name().await);
    Ok(())
}
