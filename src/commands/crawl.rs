use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::info;

use searchlight_crawler::seed_urls;

use crate::app::App;

/// Collect seed URLs from a file path, a comma-separated list or a single
/// `--seed` argument.
pub fn collect_seeds(seeds: Option<String>, seed: Option<String>) -> Result<Vec<String>> {
    let mut out: Vec<String> = Vec::new();
    if let Some(single) = seed {
        out.push(single);
    }
    if let Some(arg) = seeds {
        if std::path::Path::new(&arg).exists() {
            let content = std::fs::read_to_string(&arg)?;
            out.extend(
                content
                    .lines()
                    .map(|line| line.trim().to_string())
                    .filter(|line| !line.is_empty() && !line.starts_with('#')),
            );
        } else {
            out.extend(arg.split(',').map(|s| s.trim().to_string()));
        }
    }
    Ok(out)
}

pub async fn run(app: Arc<App>, seeds: Option<String>, seed: Option<String>) -> Result<()> {
    let seed_list = collect_seeds(seeds, seed)?;
    if seed_list.is_empty() {
        anyhow::bail!("no seeds provided; pass --seed or --seeds");
    }
    let admitted = seed_urls(&seed_list, &app.frontier, &app.store).await?;
    info!(
        submitted = seed_list.len(),
        admitted, "seeds loaded into frontier"
    );
    app.spawn_sitemap_expansion(&seed_list);

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let handles = app.spawn_pipeline(&shutdown_tx)?;

    info!("crawling; press Ctrl+C to stop");
    signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(());

    for handle in handles {
        let _ = handle.await;
    }
    app.seen.persist().await?;
    info!("shutdown complete");
    Ok(())
}
