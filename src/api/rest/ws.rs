use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use futures::future;
use futures::{SinkExt, Stream, StreamExt};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};

use crate::error::AppError;
use crate::models::courier::CourierId;
use crate::models::notification::NotificationEvent;
use crate::state::AppState;

/// Push variant of the notification poll: streams the courier's delivery
/// events as they are published.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(courier_id): Path<CourierId>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, AppError> {
    state.registry.get(courier_id)?;
    Ok(ws
        .on_upgrade(move |socket| handle_socket(socket, state, courier_id))
        .into_response())
}

/// Narrows the shared broadcast to one courier's events, each
/// `{courier_id, order_id}` pair at most once. A lagged receiver skips the
/// missed events and keeps going.
pub fn courier_events(
    events: BroadcastStream<NotificationEvent>,
    courier_id: CourierId,
) -> impl Stream<Item = NotificationEvent> {
    let mut seen = HashSet::new();
    events.filter_map(move |result| {
        let event = match result {
            Ok(event) if event.courier_id == courier_id && seen.insert(event.dedup_key()) => {
                Some(event)
            }
            Ok(_) => None,
            Err(err) => {
                warn!(courier_id, error = %err, "websocket consumer lagged");
                None
            }
        };
        future::ready(event)
    })
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, courier_id: CourierId) {
    let (mut sender, mut receiver) = socket.split();
    let events = BroadcastStream::new(state.notification_events_tx.subscribe());

    info!(courier_id, "websocket client connected");

    let send_task = tokio::spawn(async move {
        let mut events = Box::pin(courier_events(events, courier_id));

        while let Some(event) = events.next().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize notification for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    info!(courier_id, "websocket client disconnected");
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use tokio::sync::broadcast;
    use tokio_stream::wrappers::BroadcastStream;

    use super::courier_events;
    use crate::models::notification::NotificationEvent;

    fn order_ids(events: Vec<NotificationEvent>) -> Vec<u64> {
        events.into_iter().map(|event| event.order_id).collect()
    }

    #[tokio::test]
    async fn other_couriers_events_are_dropped() {
        let (tx, rx) = broadcast::channel(16);
        let stream = courier_events(BroadcastStream::new(rx), 1);

        tx.send(NotificationEvent::new(2, 10)).unwrap();
        tx.send(NotificationEvent::new(1, 11)).unwrap();
        tx.send(NotificationEvent::new(3, 12)).unwrap();
        drop(tx);

        let events: Vec<_> = stream.collect().await;
        assert_eq!(order_ids(events), vec![11]);
    }

    #[tokio::test]
    async fn repeated_event_is_pushed_once() {
        let (tx, rx) = broadcast::channel(16);
        let stream = courier_events(BroadcastStream::new(rx), 1);

        tx.send(NotificationEvent::new(1, 5)).unwrap();
        tx.send(NotificationEvent::new(1, 5)).unwrap();
        tx.send(NotificationEvent::new(1, 6)).unwrap();
        drop(tx);

        let events: Vec<_> = stream.collect().await;
        assert_eq!(order_ids(events), vec![5, 6]);
    }

    #[tokio::test]
    async fn lagged_receiver_keeps_streaming() {
        let (tx, rx) = broadcast::channel(2);
        let stream = courier_events(BroadcastStream::new(rx), 1);

        for order_id in 1..=4 {
            tx.send(NotificationEvent::new(1, order_id)).unwrap();
        }
        drop(tx);

        let events: Vec<_> = stream.collect().await;
        assert_eq!(order_ids(events), vec![3, 4]);
    }
}
