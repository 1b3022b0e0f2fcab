use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::assignment::OrderId;
use crate::models::courier::CourierId;

/// "You have a new delivery" event. Consumers must tolerate re-delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub courier_id: CourierId,
    pub order_id: OrderId,
    pub enqueued_at: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn new(courier_id: CourierId, order_id: OrderId) -> Self {
        Self {
            courier_id,
            order_id,
            enqueued_at: Utc::now(),
        }
    }

    pub fn dedup_key(&self) -> (CourierId, OrderId) {
        (self.courier_id, self.order_id)
    }
}
