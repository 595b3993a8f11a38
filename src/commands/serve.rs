use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::info;

use crate::api;
use crate::app::App;

/// Run the HTTP API and the crawl pipeline in one process.
pub async fn run(app: Arc<App>, bind: &str) -> Result<()> {
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let handles = app.spawn_pipeline(&shutdown_tx)?;

    let router = api::router(app.clone());
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(%bind, "http api listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = signal::ctrl_c().await;
        })
        .await?;

    info!("shutting down pipeline");
    let _ = shutdown_tx.send(());
    for handle in handles {
        let _ = handle.await;
    }
    app.seen.persist().await?;
    Ok(())
}
