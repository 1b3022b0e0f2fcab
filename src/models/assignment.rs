use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::courier::{CourierId, GeoPoint};

pub type OrderId = u64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentStatus {
    /// Courier claimed, notification not yet published.
    NotificationPending,
    Notified,
    /// Courier acknowledged the delivery.
    Accepted,
    Released,
    /// Not accepted in time; the order was re-matched elsewhere.
    Expired,
}

impl AssignmentStatus {
    pub fn is_outstanding(&self) -> bool {
        matches!(
            self,
            AssignmentStatus::NotificationPending
                | AssignmentStatus::Notified
                | AssignmentStatus::Accepted
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub id: Uuid,
    pub order_id: OrderId,
    pub courier_id: CourierId,
    pub pickup: GeoPoint,
    pub status: AssignmentStatus,
    /// 1 for the first match of an order, incremented on every re-match after expiry.
    pub attempt: u32,
    pub distance_km: f64,
    pub assigned_at: DateTime<Utc>,
    pub notified_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}
