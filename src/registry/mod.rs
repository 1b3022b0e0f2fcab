use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::engine::status::check_transition;
use crate::error::AppError;
use crate::models::courier::{Courier, CourierId, CourierStatus, GeoPoint};

/// Source of truth for courier status and position.
///
/// Every mutation runs under the record's shard lock, so readers never see a
/// half-applied update and a status change is visible to the next
/// [`CourierRegistry::list_by_status`].
#[derive(Default)]
pub struct CourierRegistry {
    couriers: DashMap<CourierId, Courier>,
}

impl CourierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.couriers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.couriers.is_empty()
    }

    /// Courier login: creates a FREE record.
    pub fn register(&self, id: CourierId, location: GeoPoint) -> Result<Courier, AppError> {
        match self.couriers.entry(id) {
            Entry::Occupied(_) => Err(AppError::Conflict(format!(
                "courier {id} is already registered"
            ))),
            Entry::Vacant(slot) => {
                let courier = Courier::new(id, location);
                slot.insert(courier.clone());
                Ok(courier)
            }
        }
    }

    pub fn get(&self, id: CourierId) -> Result<Courier, AppError> {
        self.couriers
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::courier_not_found(id))
    }

    pub fn list(&self) -> Vec<Courier> {
        let mut couriers: Vec<Courier> = self
            .couriers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        couriers.sort_by_key(|courier| courier.id);
        couriers
    }

    /// Point-in-time snapshot of couriers in `status`, ordered by id.
    pub fn list_by_status(&self, status: CourierStatus) -> Vec<Courier> {
        let mut couriers: Vec<Courier> = self
            .couriers
            .iter()
            .filter(|entry| entry.value().status == status)
            .map(|entry| entry.value().clone())
            .collect();
        couriers.sort_by_key(|courier| courier.id);
        couriers
    }

    pub fn update_position(&self, id: CourierId, location: GeoPoint) -> Result<Courier, AppError> {
        let mut courier = self
            .couriers
            .get_mut(&id)
            .ok_or_else(|| AppError::courier_not_found(id))?;

        courier.location = location;
        courier.updated_at = Utc::now();
        Ok(courier.clone())
    }

    pub fn update_status(&self, id: CourierId, status: CourierStatus) -> Result<Courier, AppError> {
        let mut courier = self
            .couriers
            .get_mut(&id)
            .ok_or_else(|| AppError::courier_not_found(id))?;

        check_transition(courier.status, status)?;
        courier.status = status;
        courier.updated_at = Utc::now();
        Ok(courier.clone())
    }

    /// Applies `expected -> status` only if the courier is still in `expected`.
    ///
    /// This is the single serialization point for competing claims: of two
    /// callers racing FREE -> BUSY on one courier, exactly one gets `Ok`.
    pub fn compare_and_set_status(
        &self,
        id: CourierId,
        expected: CourierStatus,
        status: CourierStatus,
    ) -> Result<Courier, AppError> {
        let mut courier = self
            .couriers
            .get_mut(&id)
            .ok_or_else(|| AppError::courier_not_found(id))?;

        if courier.status != expected {
            return Err(AppError::InvalidTransition {
                from: courier.status,
                to: status,
            });
        }

        check_transition(expected, status)?;
        courier.status = status;
        courier.updated_at = Utc::now();
        Ok(courier.clone())
    }

    pub fn set_pending_notification(&self, id: CourierId, pending: bool) -> Result<(), AppError> {
        let mut courier = self
            .couriers
            .get_mut(&id)
            .ok_or_else(|| AppError::courier_not_found(id))?;

        courier.pending_notification = pending;
        Ok(())
    }

    /// Removes a courier that holds no delivery. BUSY couriers are refused.
    pub fn remove(&self, id: CourierId) -> Result<Courier, AppError> {
        let removed = self
            .couriers
            .remove_if(&id, |_, courier| courier.status != CourierStatus::Busy);

        match removed {
            Some((_, courier)) => Ok(courier),
            None if self.couriers.contains_key(&id) => Err(AppError::Conflict(format!(
                "courier {id} is busy with a delivery"
            ))),
            None => Err(AppError::courier_not_found(id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::CourierRegistry;
    use crate::error::AppError;
    use crate::models::courier::{CourierStatus, GeoPoint};

    fn point(lat: f64, lng: f64) -> GeoPoint {
        GeoPoint::from_degrees(lat, lng).unwrap()
    }

    #[test]
    fn registered_courier_starts_free() {
        let registry = CourierRegistry::new();
        let courier = registry.register(7, point(52.52, 13.405)).unwrap();

        assert_eq!(courier.status, CourierStatus::Free);
        assert!(!courier.pending_notification);
        assert!(matches!(
            registry.register(7, point(0.0, 0.0)),
            Err(AppError::Conflict(_))
        ));
    }

    #[test]
    fn unknown_courier_is_not_found() {
        let registry = CourierRegistry::new();

        assert!(matches!(registry.get(1), Err(AppError::NotFound(_))));
        assert!(matches!(
            registry.update_position(1, point(1.0, 1.0)),
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            registry.update_status(1, CourierStatus::Offline),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn status_change_is_visible_to_next_listing() {
        let registry = CourierRegistry::new();
        registry.register(2, point(1.0, 1.0)).unwrap();
        registry.register(1, point(1.0, 1.0)).unwrap();

        let free: Vec<_> = registry
            .list_by_status(CourierStatus::Free)
            .iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(free, vec![1, 2]);

        registry.update_status(1, CourierStatus::Offline).unwrap();

        let free: Vec<_> = registry
            .list_by_status(CourierStatus::Free)
            .iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(free, vec![2]);
        assert_eq!(registry.list_by_status(CourierStatus::Offline).len(), 1);
    }

    #[test]
    fn rejected_transition_leaves_status_unchanged() {
        let registry = CourierRegistry::new();
        registry.register(1, point(1.0, 1.0)).unwrap();
        registry.update_status(1, CourierStatus::Busy).unwrap();

        let err = registry.update_status(1, CourierStatus::Offline).unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
        assert_eq!(registry.get(1).unwrap().status, CourierStatus::Busy);
    }

    #[test]
    fn compare_and_set_fails_when_status_moved() {
        let registry = CourierRegistry::new();
        registry.register(1, point(1.0, 1.0)).unwrap();

        registry
            .compare_and_set_status(1, CourierStatus::Free, CourierStatus::Busy)
            .unwrap();
        let second =
            registry.compare_and_set_status(1, CourierStatus::Free, CourierStatus::Busy);

        assert!(matches!(
            second,
            Err(AppError::InvalidTransition {
                from: CourierStatus::Busy,
                to: CourierStatus::Busy
            })
        ));
    }

    #[test]
    fn concurrent_claims_have_exactly_one_winner() {
        let registry = Arc::new(CourierRegistry::new());
        registry.register(1, point(1.0, 1.0)).unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    registry
                        .compare_and_set_status(1, CourierStatus::Free, CourierStatus::Busy)
                        .is_ok()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn busy_courier_cannot_be_removed() {
        let registry = CourierRegistry::new();
        registry.register(1, point(1.0, 1.0)).unwrap();
        registry.update_status(1, CourierStatus::Busy).unwrap();

        assert!(matches!(registry.remove(1), Err(AppError::Conflict(_))));

        registry.update_status(1, CourierStatus::Free).unwrap();
        assert_eq!(registry.remove(1).unwrap().id, 1);
        assert!(matches!(registry.remove(1), Err(AppError::NotFound(_))));
    }
}
