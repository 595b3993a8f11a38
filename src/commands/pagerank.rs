use std::sync::Arc;

use anyhow::Result;

use crate::app::App;

pub async fn run(app: Arc<App>) -> Result<()> {
    let summary = app.rank_job.run().await?;
    println!(
        "ranked {} nodes over {} edges in {} iterations; {} documents updated",
        summary.nodes, summary.edges, summary.iterations, summary.joined_documents
    );
    Ok(())
}
