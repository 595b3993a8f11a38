use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Notify;
use tracing::warn;

use searchlight_core::CrawlError;

use crate::{BusConsumer, Message, MessageBus};

const DEFAULT_PARTITIONS: usize = 8;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

struct PartitionState {
    ready: VecDeque<Message>,
    /// Offset of the one message currently delivered and un-acked. FIFO per
    /// partition holds because nothing else is handed out while this is set.
    in_flight: Option<u64>,
}

struct GroupState {
    partitions: Vec<Mutex<PartitionState>>,
    notify: Notify,
}

impl GroupState {
    fn new(partitions: usize) -> Self {
        Self {
            partitions: (0..partitions)
                .map(|_| {
                    Mutex::new(PartitionState {
                        ready: VecDeque::new(),
                        in_flight: None,
                    })
                })
                .collect(),
            notify: Notify::new(),
        }
    }
}

struct TopicState {
    next_offset: AtomicU64,
    groups: DashMap<String, Arc<GroupState>>,
    /// Messages published before any group subscribed; drained into the
    /// first group so seed traffic is not lost.
    backlog: Mutex<Vec<Message>>,
}

/// In-process partitioned bus. Keys are hashed onto a fixed partition count;
/// each consumer group gets its own copy of the stream.
pub struct MemoryBus {
    topics: Arc<DashMap<String, Arc<TopicState>>>,
    partitions: usize,
    max_attempts: u32,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new(DEFAULT_PARTITIONS, DEFAULT_MAX_ATTEMPTS)
    }
}

impl MemoryBus {
    pub fn new(partitions: usize, max_attempts: u32) -> Self {
        Self {
            topics: Arc::new(DashMap::new()),
            partitions: partitions.max(1),
            max_attempts: max_attempts.max(1),
        }
    }

    fn topic(&self, name: &str) -> Arc<TopicState> {
        self.topics
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(TopicState {
                    next_offset: AtomicU64::new(0),
                    groups: DashMap::new(),
                    backlog: Mutex::new(Vec::new()),
                })
            })
            .clone()
    }

    fn partition_for(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.partitions
    }

    fn deliver(group: &GroupState, msg: Message) {
        let mut part = group.partitions[msg.partition]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        part.ready.push_back(msg);
        drop(part);
        group.notify.notify_waiters();
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, topic: &str, key: &str, payload: String) -> Result<(), CrawlError> {
        let state = self.topic(topic);
        let msg = Message {
            topic: topic.to_string(),
            partition: self.partition_for(key),
            offset: state.next_offset.fetch_add(1, Ordering::SeqCst),
            key: key.to_string(),
            payload,
            attempt: 1,
        };
        if state.groups.is_empty() {
            state
                .backlog
                .lock()
                .map_err(|_| CrawlError::Bus("backlog lock poisoned".into()))?
                .push(msg);
            return Ok(());
        }
        for group in state.groups.iter() {
            Self::deliver(group.value(), msg.clone());
        }
        Ok(())
    }

    async fn consumer(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<Box<dyn BusConsumer>, CrawlError> {
        let state = self.topic(topic);
        let first_group = state.groups.is_empty();
        let group_state = state
            .groups
            .entry(group.to_string())
            .or_insert_with(|| Arc::new(GroupState::new(self.partitions)))
            .clone();
        if first_group {
            let backlog: Vec<Message> = {
                let mut held = state
                    .backlog
                    .lock()
                    .map_err(|_| CrawlError::Bus("backlog lock poisoned".into()))?;
                std::mem::take(&mut *held)
            };
            for msg in backlog {
                Self::deliver(&group_state, msg);
            }
        }
        Ok(Box::new(MemoryConsumer {
            bus_topics: self.topics.clone(),
            group: group_state,
            partitions: self.partitions,
            max_attempts: self.max_attempts,
            sweep_from: 0,
        }))
    }
}

struct MemoryConsumer {
    bus_topics: Arc<DashMap<String, Arc<TopicState>>>,
    group: Arc<GroupState>,
    partitions: usize,
    max_attempts: u32,
    sweep_from: usize,
}

impl MemoryConsumer {
    fn try_take(&mut self) -> Option<Message> {
        for i in 0..self.partitions {
            let idx = (self.sweep_from + i) % self.partitions;
            let mut part = self.group.partitions[idx]
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if part.in_flight.is_none() {
                if let Some(msg) = part.ready.pop_front() {
                    part.in_flight = Some(msg.offset);
                    self.sweep_from = (idx + 1) % self.partitions;
                    return Some(msg);
                }
            }
        }
        None
    }

    fn clear_in_flight(&self, msg: &Message) -> bool {
        let mut part = self.group.partitions[msg.partition]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if part.in_flight == Some(msg.offset) {
            part.in_flight = None;
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl BusConsumer for MemoryConsumer {
    async fn next(&mut self, wait: Duration) -> Result<Option<Message>, CrawlError> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if let Some(msg) = self.try_take() {
                return Ok(Some(msg));
            }
            let notified = self.group.notify.notified();
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(None),
            }
        }
    }

    async fn ack(&mut self, msg: &Message) -> Result<(), CrawlError> {
        self.clear_in_flight(msg);
        self.group.notify.notify_waiters();
        Ok(())
    }

    async fn nack(&mut self, msg: &Message) -> Result<(), CrawlError> {
        let was_in_flight = self.clear_in_flight(msg);
        if !was_in_flight {
            return Ok(());
        }
        if msg.attempt >= self.max_attempts {
            warn!(
                topic = %msg.topic,
                key = %msg.key,
                attempts = msg.attempt,
                "message exhausted redeliveries, parking on poison queue"
            );
            let poison_topic = format!("{}.poison", msg.topic);
            let state = self
                .bus_topics
                .entry(poison_topic.clone())
                .or_insert_with(|| {
                    Arc::new(TopicState {
                        next_offset: AtomicU64::new(0),
                        groups: DashMap::new(),
                        backlog: Mutex::new(Vec::new()),
                    })
                })
                .clone();
            let parked = Message {
                topic: poison_topic,
                offset: state.next_offset.fetch_add(1, Ordering::SeqCst),
                attempt: 1,
                ..msg.clone()
            };
            if state.groups.is_empty() {
                state
                    .backlog
                    .lock()
                    .map_err(|_| CrawlError::Bus("backlog lock poisoned".into()))?
                    .push(parked);
            } else {
                for group in state.groups.iter() {
                    MemoryBus::deliver(group.value(), parked.clone());
                }
            }
        } else {
            let mut part = self.group.partitions[msg.partition]
                .lock()
                .map_err(|_| CrawlError::Bus("partition lock poisoned".into()))?;
            let mut redelivery = msg.clone();
            redelivery.attempt += 1;
            part.ready.push_front(redelivery);
        }
        self.group.notify.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_key_lands_in_one_partition_in_order() {
        let bus = MemoryBus::default();
        let mut consumer = bus.consumer("crawl-requests", "workers").await.unwrap();
        for i in 0..5 {
            bus.publish("crawl-requests", "example.com", format!("job-{i}"))
                .await
                .unwrap();
        }
        for i in 0..5 {
            let msg = consumer
                .next(Duration::from_millis(100))
                .await
                .unwrap()
                .expect("message");
            assert_eq!(msg.payload, format!("job-{i}"));
            consumer.ack(&msg).await.unwrap();
        }
    }

    #[tokio::test]
    async fn unacked_message_blocks_its_partition() {
        let bus = MemoryBus::new(1, 3);
        let mut consumer = bus.consumer("t", "g").await.unwrap();
        bus.publish("t", "k", "first".into()).await.unwrap();
        bus.publish("t", "k", "second".into()).await.unwrap();
        let first = consumer
            .next(Duration::from_millis(50))
            .await
            .unwrap()
            .unwrap();
        // partition has an in-flight message; nothing else is handed out
        assert!(consumer.next(Duration::from_millis(20)).await.unwrap().is_none());
        consumer.ack(&first).await.unwrap();
        let second = consumer
            .next(Duration::from_millis(50))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.payload, "second");
    }

    #[tokio::test]
    async fn nack_redelivers_with_incremented_attempt() {
        let bus = MemoryBus::new(2, 3);
        let mut consumer = bus.consumer("t", "g").await.unwrap();
        bus.publish("t", "k", "p".into()).await.unwrap();
        let msg = consumer
            .next(Duration::from_millis(50))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.attempt, 1);
        consumer.nack(&msg).await.unwrap();
        let again = consumer
            .next(Duration::from_millis(50))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.attempt, 2);
        assert_eq!(again.payload, "p");
    }

    #[tokio::test]
    async fn exhausted_message_parks_on_poison_topic() {
        let bus = MemoryBus::new(1, 2);
        let mut consumer = bus.consumer("t", "g").await.unwrap();
        bus.publish("t", "k", "bad".into()).await.unwrap();
        for _ in 0..2 {
            let msg = consumer
                .next(Duration::from_millis(50))
                .await
                .unwrap()
                .unwrap();
            consumer.nack(&msg).await.unwrap();
        }
        assert!(consumer.next(Duration::from_millis(20)).await.unwrap().is_none());
        let mut poison = bus.consumer("t.poison", "ops").await.unwrap();
        let parked = poison
            .next(Duration::from_millis(50))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(parked.payload, "bad");
    }

    #[tokio::test]
    async fn backlog_reaches_first_subscriber() {
        let bus = MemoryBus::default();
        bus.publish("t", "k", "early".into()).await.unwrap();
        let mut consumer = bus.consumer("t", "g").await.unwrap();
        let msg = consumer
            .next(Duration::from_millis(50))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.payload, "early");
    }
}
