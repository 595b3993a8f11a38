use std::sync::Arc;

use anyhow::Result;

use searchlight_query::{SearchParams, SortOrder};

use crate::app::App;

pub async fn run(app: Arc<App>, query: String, page: usize, size: usize, sort: String) -> Result<()> {
    let params = SearchParams {
        q: query,
        page,
        size,
        sort: SortOrder::parse(&sort)?,
    };
    let response = app.query.search(&params).await?;

    println!(
        "{} results for \"{}\" ({} ms)",
        response.total_results, response.query, response.execution_time_ms
    );
    if let Some(suggestion) = &response.did_you_mean {
        println!("did you mean: {suggestion}");
    }
    for (i, hit) in response.results.iter().enumerate() {
        println!(
            "{:2}. {} ({:.3})\n    {}\n    {}",
            i + 1 + response.page * response.size,
            hit.title,
            hit.score,
            hit.url,
            hit.snippet
        );
    }
    if !response.related_searches.is_empty() {
        println!("related: {}", response.related_searches.join(", "));
    }
    Ok(())
}
