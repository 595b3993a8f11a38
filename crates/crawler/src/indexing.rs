use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{info, warn};

use searchlight_bus::MessageBus;
use searchlight_core::{retry, CrawlError, IndexJob, TOPIC_INDEX_REQUESTS};
use searchlight_index::Indexer;

/// Consumer of the index topic, wrapping the indexer's per-job pipeline
/// with bus acking semantics.
pub struct IndexWorker {
    indexer: Arc<Indexer>,
    bus: Arc<dyn MessageBus>,
}

impl IndexWorker {
    pub fn new(indexer: Arc<Indexer>, bus: Arc<dyn MessageBus>) -> Self {
        Self { indexer, bus }
    }

    pub async fn run(
        self: Arc<Self>,
        worker_id: usize,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), CrawlError> {
        let mut consumer = self.bus.consumer(TOPIC_INDEX_REQUESTS, "index-workers").await?;
        info!(worker_id, "index worker started");
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!(worker_id, "index worker shutting down");
                    return Ok(());
                }
                msg = consumer.next(Duration::from_secs(2)) => {
                    let Some(msg) = msg? else { continue };
                    let Ok(job) = serde_json::from_str::<IndexJob>(&msg.payload) else {
                        warn!(worker_id, "unparseable index job, dropping");
                        consumer.ack(&msg).await?;
                        continue;
                    };
                    match retry::with_backoff("index-job", 3, || self.indexer.process(&job)).await {
                        Ok(_) => consumer.ack(&msg).await?,
                        Err(e) => {
                            warn!(worker_id, url = %job.url, "index job failed, nacking: {e}");
                            consumer.nack(&msg).await?;
                        }
                    }
                }
            }
        }
    }
}
