//! Message-bus seam between the scheduler and the worker fleets. The
//! contract mirrors what a partitioned broker provides: at-least-once
//! delivery, key-based routing to partitions, per-partition FIFO within a
//! consumer group, explicit acknowledgement, and a poison-message queue
//! after repeated redelivery. [`MemoryBus`] is the in-process backend used
//! by the single-binary deployment and the tests.

use std::time::Duration;

use async_trait::async_trait;

use searchlight_core::CrawlError;

mod memory;

pub use memory::MemoryBus;

#[derive(Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub partition: usize,
    pub offset: u64,
    pub key: String,
    pub payload: String,
    /// Delivery attempt, starting at 1.
    pub attempt: u32,
}

#[async_trait]
pub trait MessageBus: Send + Sync + 'static {
    /// Publish keyed payload; the key picks the partition.
    async fn publish(&self, topic: &str, key: &str, payload: String) -> Result<(), CrawlError>;

    /// Join `group` on `topic`. Every consumer of a group sees disjoint
    /// in-flight messages; partition order is preserved because a partition
    /// delivers at most one un-acked message at a time.
    async fn consumer(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<Box<dyn BusConsumer>, CrawlError>;
}

#[async_trait]
pub trait BusConsumer: Send {
    /// Next message, waiting up to `wait`. `None` on timeout.
    async fn next(&mut self, wait: Duration) -> Result<Option<Message>, CrawlError>;

    /// Commit: the message will not be redelivered.
    async fn ack(&mut self, msg: &Message) -> Result<(), CrawlError>;

    /// Give the message back for redelivery; after too many attempts it is
    /// parked on `<topic>.poison` instead.
    async fn nack(&mut self, msg: &Message) -> Result<(), CrawlError>;
}
