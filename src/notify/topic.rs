use std::collections::VecDeque;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::error::AppError;
use crate::models::courier::CourierId;
use crate::models::notification::NotificationEvent;
use crate::notify::NotificationChannel;

pub const AWAITING_DELIVERY_TOPIC: &str = "awaiting-delivery";

/// In-process stand-in for the "awaiting-delivery" topic, partitioned by courier.
pub struct InMemoryTopic {
    name: String,
    partitions: DashMap<CourierId, VecDeque<NotificationEvent>>,
}

impl InMemoryTopic {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            partitions: DashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn queued(&self, courier_id: CourierId) -> usize {
        self.partitions
            .get(&courier_id)
            .map(|partition| partition.len())
            .unwrap_or(0)
    }
}

impl Default for InMemoryTopic {
    fn default() -> Self {
        Self::new(AWAITING_DELIVERY_TOPIC)
    }
}

#[async_trait]
impl NotificationChannel for InMemoryTopic {
    async fn publish(&self, event: NotificationEvent) -> Result<(), AppError> {
        debug!(
            topic = %self.name,
            courier_id = event.courier_id,
            order_id = event.order_id,
            "event enqueued"
        );
        self.partitions
            .entry(event.courier_id)
            .or_default()
            .push_back(event);
        Ok(())
    }

    async fn consume(&self, courier_id: CourierId) -> Result<Vec<NotificationEvent>, AppError> {
        let drained: Vec<NotificationEvent> = self
            .partitions
            .get_mut(&courier_id)
            .map(|mut partition| partition.drain(..).collect())
            .unwrap_or_default();
        Ok(drained)
    }
}
