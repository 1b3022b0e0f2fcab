use dashmap::DashSet;

use crate::models::assignment::OrderId;
use crate::models::courier::CourierId;
use crate::models::notification::NotificationEvent;

/// Consumer-side dedup for at-least-once delivery.
#[derive(Default)]
pub struct NotificationInbox {
    seen: DashSet<(CourierId, OrderId)>,
}

impl NotificationInbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// True the first time a `{courier_id, order_id}` pair is seen.
    pub fn accept(&self, event: &NotificationEvent) -> bool {
        self.seen.insert(event.dedup_key())
    }

    /// Keeps only first deliveries, dropping repeats within the batch too.
    pub fn accept_all(&self, events: Vec<NotificationEvent>) -> Vec<NotificationEvent> {
        events.into_iter().filter(|event| self.accept(event)).collect()
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Drops the dedup entry once the assignment is closed.
    pub fn forget(&self, courier_id: CourierId, order_id: OrderId) {
        self.seen.remove(&(courier_id, order_id));
    }
}
