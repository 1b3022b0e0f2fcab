use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::config::DispatchSettings;
use crate::models::assignment::{Assignment, OrderId};
use crate::models::courier::CourierId;
use crate::models::notification::NotificationEvent;
use crate::notify::{InMemoryTopic, NotificationChannel, NotificationInbox};
use crate::observability::metrics::Metrics;
use crate::registry::CourierRegistry;

pub struct AppState {
    pub registry: CourierRegistry,
    pub assignments: DashMap<Uuid, Assignment>,
    /// Outstanding assignment per order; the entry doubles as the order's reservation.
    pub active_by_order: DashMap<OrderId, Uuid>,
    pub active_by_courier: DashMap<CourierId, Uuid>,
    pub channel: Arc<dyn NotificationChannel>,
    pub inbox: NotificationInbox,
    /// Push feed of successfully published events for websocket consumers.
    pub notification_events_tx: broadcast::Sender<NotificationEvent>,
    pub settings: DispatchSettings,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(settings: DispatchSettings, event_buffer_size: usize) -> Self {
        Self::with_channel(
            settings,
            event_buffer_size,
            Arc::new(InMemoryTopic::default()),
        )
    }

    pub fn with_channel(
        settings: DispatchSettings,
        event_buffer_size: usize,
        channel: Arc<dyn NotificationChannel>,
    ) -> Self {
        let (notification_events_tx, _unused_rx) = broadcast::channel(event_buffer_size);

        Self {
            registry: CourierRegistry::new(),
            assignments: DashMap::new(),
            active_by_order: DashMap::new(),
            active_by_courier: DashMap::new(),
            channel,
            inbox: NotificationInbox::new(),
            notification_events_tx,
            settings,
            metrics: Metrics::new(),
        }
    }

    pub fn outstanding_for_courier(&self, courier_id: CourierId) -> Option<Assignment> {
        let assignment_id = *self.active_by_courier.get(&courier_id)?;
        self.assignments
            .get(&assignment_id)
            .map(|entry| entry.value().clone())
    }
}
