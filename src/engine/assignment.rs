use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::engine::backoff::ExponentialBackoff;
use crate::engine::status::check_self_report;
use crate::error::AppError;
use crate::geo::{find_nearest_free, Candidate};
use crate::models::assignment::{Assignment, AssignmentStatus, OrderId};
use crate::models::courier::{Courier, CourierId, CourierStatus, GeoPoint};
use crate::models::notification::NotificationEvent;
use crate::state::AppState;

/// Matches `order_id` to the nearest FREE courier and notifies them.
///
/// Returns once the notification is enqueued. When publishing keeps failing the
/// assignment is still returned, in `NotificationPending`, and the sweeper
/// takes over re-publishing.
pub async fn assign(
    state: &AppState,
    order_id: OrderId,
    restaurant: GeoPoint,
) -> Result<Assignment, AppError> {
    let start = Instant::now();
    let result = assign_excluding(state, order_id, restaurant, HashSet::new(), 1).await;

    let outcome = match &result {
        Ok(_) => "success",
        Err(AppError::NoneAvailable) => "none_available",
        Err(_) => "error",
    };
    state
        .metrics
        .assignment_latency_seconds
        .with_label_values(&[outcome])
        .observe(start.elapsed().as_secs_f64());
    state
        .metrics
        .assignments_total
        .with_label_values(&[outcome])
        .inc();

    result
}

async fn assign_excluding(
    state: &AppState,
    order_id: OrderId,
    restaurant: GeoPoint,
    mut exclude: HashSet<CourierId>,
    attempt: u32,
) -> Result<Assignment, AppError> {
    let assignment_id = Uuid::new_v4();
    match state.active_by_order.entry(order_id) {
        Entry::Occupied(existing) => {
            return Err(AppError::Conflict(format!(
                "order {order_id} already has outstanding assignment {}",
                existing.get()
            )));
        }
        Entry::Vacant(slot) => {
            slot.insert(assignment_id);
        }
    }

    let nearest = |exclude: &HashSet<CourierId>| {
        find_nearest_free(&state.registry, &restaurant, exclude)
    };
    let candidate = match claim_nearest(state, &mut exclude, nearest) {
        Ok(candidate) => candidate,
        Err(err) => {
            state
                .active_by_order
                .remove_if(&order_id, |_, id| *id == assignment_id);
            warn!(order_id, error = %err, "order not assigned");
            return Err(err);
        }
    };

    let courier_id = candidate.courier.id;
    if let Err(err) = state.registry.set_pending_notification(courier_id, true) {
        warn!(courier_id, error = %err, "could not set notification flag");
    }

    let assignment = Assignment {
        id: assignment_id,
        order_id,
        courier_id,
        pickup: restaurant,
        status: AssignmentStatus::NotificationPending,
        attempt,
        distance_km: candidate.distance_km,
        assigned_at: Utc::now(),
        notified_at: None,
        closed_at: None,
    };
    state.assignments.insert(assignment_id, assignment.clone());
    state.active_by_courier.insert(courier_id, assignment_id);
    state.metrics.notifications_pending.inc();

    info!(
        order_id,
        courier_id,
        distance_km = candidate.distance_km,
        attempt,
        "order assigned"
    );

    let event = NotificationEvent::new(courier_id, order_id);
    match publish_with_retry(state, &event).await {
        Ok(()) => {
            mark_notified(state, assignment_id, event);
        }
        Err(err) => {
            warn!(
                order_id,
                courier_id,
                error = %err,
                "notification not delivered; left pending for the sweeper"
            );
        }
    }

    // The record may have been released or expired while publishing.
    Ok(state
        .assignments
        .get(&assignment_id)
        .map(|entry| entry.value().clone())
        .unwrap_or(assignment))
}

/// Claims the nearest FREE courier, moving past candidates lost to other claims.
///
/// `nearest` returns the best candidate outside `exclude` from a fresh snapshot;
/// the snapshot may already be stale when the claim is attempted.
fn claim_nearest<F>(
    state: &AppState,
    exclude: &mut HashSet<CourierId>,
    mut nearest: F,
) -> Result<Candidate, AppError>
where
    F: FnMut(&HashSet<CourierId>) -> Option<Candidate>,
{
    let settings = &state.settings;
    let deadline = Instant::now() + settings.assign_timeout;

    for attempt in 1..=settings.claim_attempts {
        if Instant::now() >= deadline {
            warn!(attempt, "assign timeout reached before a courier was claimed");
            break;
        }

        let Some(candidate) = nearest(exclude) else {
            break;
        };
        let courier_id = candidate.courier.id;

        match state.registry.compare_and_set_status(
            courier_id,
            CourierStatus::Free,
            CourierStatus::Busy,
        ) {
            Ok(courier) => {
                return Ok(Candidate {
                    courier,
                    distance_km: candidate.distance_km,
                });
            }
            Err(AppError::InvalidTransition { from, .. }) => {
                state.metrics.claim_conflicts_total.inc();
                debug!(courier_id, current = %from, attempt, "claim lost; trying next courier");
                exclude.insert(courier_id);
            }
            Err(AppError::NotFound(_)) => {
                exclude.insert(courier_id);
            }
            Err(err) => return Err(err),
        }
    }

    Err(AppError::NoneAvailable)
}

async fn publish_with_retry(state: &AppState, event: &NotificationEvent) -> Result<(), AppError> {
    let settings = &state.settings;
    let mut backoff =
        ExponentialBackoff::new(settings.publish_backoff, settings.publish_backoff_max);
    let mut last_error = String::new();

    for attempt in 1..=settings.publish_attempts {
        match state.channel.publish(event.clone()).await {
            Ok(()) => {
                state
                    .metrics
                    .notification_publish_total
                    .with_label_values(&["success"])
                    .inc();
                return Ok(());
            }
            Err(err) => {
                state
                    .metrics
                    .notification_publish_total
                    .with_label_values(&["error"])
                    .inc();
                warn!(
                    courier_id = event.courier_id,
                    order_id = event.order_id,
                    attempt,
                    error = %err,
                    "notification publish failed"
                );
                last_error = err.to_string();

                if attempt < settings.publish_attempts {
                    sleep(backoff.next_delay()).await;
                }
            }
        }
    }

    Err(AppError::Transport(last_error))
}

/// Records a successful publish. No-op if the assignment moved on meanwhile.
fn mark_notified(
    state: &AppState,
    assignment_id: Uuid,
    event: NotificationEvent,
) -> Option<Assignment> {
    let updated = {
        let mut assignment = state.assignments.get_mut(&assignment_id)?;
        if assignment.status != AssignmentStatus::NotificationPending {
            return None;
        }
        assignment.status = AssignmentStatus::Notified;
        assignment.notified_at = Some(Utc::now());
        assignment.clone()
    };

    state.metrics.notifications_pending.dec();
    if let Err(err) = state
        .registry
        .set_pending_notification(updated.courier_id, false)
    {
        warn!(courier_id = updated.courier_id, error = %err, "could not clear notification flag");
    }
    let _ = state.notification_events_tx.send(event);

    Some(updated)
}

/// Moves an outstanding assignment in one of `from` to the terminal `to`
/// and frees its order and courier slots.
fn close_assignment(
    state: &AppState,
    assignment_id: Uuid,
    from: &[AssignmentStatus],
    to: AssignmentStatus,
) -> Option<Assignment> {
    let (closed, was_pending) = {
        let mut assignment = state.assignments.get_mut(&assignment_id)?;
        if !from.contains(&assignment.status) {
            return None;
        }
        let was_pending = assignment.status == AssignmentStatus::NotificationPending;
        assignment.status = to;
        assignment.closed_at = Some(Utc::now());
        (assignment.clone(), was_pending)
    };

    if was_pending {
        state.metrics.notifications_pending.dec();
    }
    state
        .active_by_order
        .remove_if(&closed.order_id, |_, id| *id == assignment_id);
    state
        .active_by_courier
        .remove_if(&closed.courier_id, |_, id| *id == assignment_id);
    state.inbox.forget(closed.courier_id, closed.order_id);

    Some(closed)
}

const OUTSTANDING: [AssignmentStatus; 3] = [
    AssignmentStatus::NotificationPending,
    AssignmentStatus::Notified,
    AssignmentStatus::Accepted,
];

/// Ends the courier's current delivery and returns them to FREE.
pub async fn release(state: &AppState, courier_id: CourierId) -> Result<Courier, AppError> {
    let courier = state.registry.get(courier_id)?;
    if courier.status != CourierStatus::Busy {
        return Err(AppError::InvalidTransition {
            from: courier.status,
            to: CourierStatus::Free,
        });
    }

    // BUSY is only entered through a claim, and the claim's record lands just
    // after the status flips. No record yet means the claim is still in flight.
    let Some(assignment) = state.outstanding_for_courier(courier_id) else {
        warn!(courier_id, "release refused: courier has no recorded assignment yet");
        return Err(AppError::Conflict(format!(
            "courier {courier_id} has no outstanding assignment to release"
        )));
    };

    if let Some(closed) =
        close_assignment(state, assignment.id, &OUTSTANDING, AssignmentStatus::Released)
    {
        info!(order_id = closed.order_id, courier_id, "assignment released");
    }

    state.registry.set_pending_notification(courier_id, false)?;
    state
        .registry
        .compare_and_set_status(courier_id, CourierStatus::Busy, CourierStatus::Free)
}

/// Courier acknowledges the delivery it was notified about.
pub async fn accept(
    state: &AppState,
    courier_id: CourierId,
    order_id: OrderId,
) -> Result<Assignment, AppError> {
    let not_assigned =
        || AppError::NotFound(format!("order {order_id} is not assigned to courier {courier_id}"));

    let assignment_id = state
        .active_by_courier
        .get(&courier_id)
        .map(|entry| *entry.value())
        .ok_or_else(not_assigned)?;

    let mut assignment = state
        .assignments
        .get_mut(&assignment_id)
        .ok_or_else(not_assigned)?;
    if assignment.order_id != order_id {
        return Err(not_assigned());
    }

    let status = assignment.status;
    match status {
        AssignmentStatus::Notified => {
            assignment.status = AssignmentStatus::Accepted;
            info!(order_id, courier_id, "delivery accepted");
            Ok(assignment.clone())
        }
        AssignmentStatus::Accepted => Ok(assignment.clone()),
        AssignmentStatus::NotificationPending => Err(AppError::Conflict(format!(
            "order {order_id} notification has not been delivered yet"
        ))),
        AssignmentStatus::Released | AssignmentStatus::Expired => Err(not_assigned()),
    }
}

/// Status change requested by the courier themself.
///
/// Reporting FREE while BUSY completes the current delivery.
pub async fn report_status(
    state: &AppState,
    courier_id: CourierId,
    status: CourierStatus,
) -> Result<Courier, AppError> {
    let current = state.registry.get(courier_id)?;
    check_self_report(current.status, status)?;

    if current.status == CourierStatus::Busy {
        return release(state, courier_id).await;
    }

    let courier = state.registry.update_status(courier_id, status)?;
    info!(courier_id, from = %current.status, to = %status, "courier status changed");
    Ok(courier)
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub republished: usize,
    pub expired: usize,
    pub reassigned: usize,
    pub pruned: usize,
}

/// One pass of the background reconciler: re-publishes pending notifications,
/// re-matches orders whose courier never accepted and drops closed records
/// older than the retention window.
pub async fn sweep(state: &AppState) -> SweepReport {
    let mut report = SweepReport {
        pruned: prune_closed(state),
        ..SweepReport::default()
    };
    let snapshot: Vec<Assignment> = state
        .assignments
        .iter()
        .filter(|entry| {
            matches!(
                entry.status,
                AssignmentStatus::NotificationPending | AssignmentStatus::Notified
            )
        })
        .map(|entry| entry.value().clone())
        .collect();

    for assignment in snapshot {
        match assignment.status {
            AssignmentStatus::NotificationPending => {
                let event = NotificationEvent::new(assignment.courier_id, assignment.order_id);
                match state.channel.publish(event.clone()).await {
                    Ok(()) => {
                        state
                            .metrics
                            .notification_publish_total
                            .with_label_values(&["success"])
                            .inc();
                        if mark_notified(state, assignment.id, event).is_some() {
                            info!(
                                order_id = assignment.order_id,
                                courier_id = assignment.courier_id,
                                "pending notification published"
                            );
                            report.republished += 1;
                        }
                    }
                    Err(err) => {
                        state
                            .metrics
                            .notification_publish_total
                            .with_label_values(&["error"])
                            .inc();
                        warn!(
                            order_id = assignment.order_id,
                            courier_id = assignment.courier_id,
                            error = %err,
                            "notification still pending"
                        );
                    }
                }
            }
            AssignmentStatus::Notified if ack_expired(state, &assignment) => {
                if expire(state, &assignment).await {
                    report.expired += 1;
                    if reassign(state, &assignment).await {
                        report.reassigned += 1;
                    }
                }
            }
            _ => {}
        }
    }

    report
}

fn prune_closed(state: &AppState) -> usize {
    let now = Utc::now();
    let retention = state.settings.closed_retention;
    let mut pruned = 0;

    state.assignments.retain(|_, assignment| {
        let expired = match assignment.closed_at {
            Some(closed_at) if !assignment.status.is_outstanding() => (now - closed_at)
                .to_std()
                .map(|age| age >= retention)
                .unwrap_or(false),
            _ => false,
        };
        if expired {
            pruned += 1;
        }
        !expired
    });

    pruned
}

fn ack_expired(state: &AppState, assignment: &Assignment) -> bool {
    let Some(notified_at) = assignment.notified_at else {
        return false;
    };

    (Utc::now() - notified_at)
        .to_std()
        .map(|elapsed| elapsed >= state.settings.ack_timeout)
        .unwrap_or(false)
}

async fn expire(state: &AppState, assignment: &Assignment) -> bool {
    let closed = close_assignment(
        state,
        assignment.id,
        &[AssignmentStatus::Notified],
        AssignmentStatus::Expired,
    );
    if closed.is_none() {
        return false;
    }

    warn!(
        order_id = assignment.order_id,
        courier_id = assignment.courier_id,
        "assignment not accepted in time"
    );

    if let Err(err) = state.registry.compare_and_set_status(
        assignment.courier_id,
        CourierStatus::Busy,
        CourierStatus::Free,
    ) {
        warn!(courier_id = assignment.courier_id, error = %err, "expired courier not freed");
    }

    true
}

async fn reassign(state: &AppState, expired: &Assignment) -> bool {
    let exclude = HashSet::from([expired.courier_id]);
    match assign_excluding(
        state,
        expired.order_id,
        expired.pickup,
        exclude,
        expired.attempt + 1,
    )
    .await
    {
        Ok(next) => {
            info!(
                order_id = next.order_id,
                courier_id = next.courier_id,
                attempt = next.attempt,
                "order re-assigned"
            );
            true
        }
        Err(AppError::NoneAvailable) => {
            warn!(
                order_id = expired.order_id,
                "no courier for expired order; needs manual dispatch"
            );
            false
        }
        Err(err) => {
            error!(order_id = expired.order_id, error = %err, "re-assignment failed");
            false
        }
    }
}

pub async fn run_sweeper(state: Arc<AppState>) {
    info!(
        interval_ms = state.settings.sweep_interval.as_millis() as u64,
        "assignment sweeper started"
    );

    let mut ticker = interval(state.settings.sweep_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let report = sweep(&state).await;
        if report != SweepReport::default() {
            info!(
                republished = report.republished,
                expired = report.expired,
                reassigned = report.reassigned,
                pruned = report.pruned,
                "sweep finished"
            );
        }
    }
}
