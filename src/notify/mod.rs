pub mod inbox;
pub mod topic;

use async_trait::async_trait;

use crate::error::AppError;
use crate::models::courier::CourierId;
use crate::models::notification::NotificationEvent;

pub use inbox::NotificationInbox;
pub use topic::{InMemoryTopic, AWAITING_DELIVERY_TOPIC};

/// Durable, at-least-once transport for delivery notifications.
///
/// Events for one courier come out in publish order; there is no ordering
/// across couriers. The same event may be delivered more than once.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Returns once the event is durably enqueued, not once it is read.
    async fn publish(&self, event: NotificationEvent) -> Result<(), AppError>;

    /// Takes everything currently queued for `courier_id`.
    async fn consume(&self, courier_id: CourierId) -> Result<Vec<NotificationEvent>, AppError>;
}
