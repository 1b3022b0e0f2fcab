use std::collections::HashSet;

use crate::models::courier::{Courier, CourierId, CourierStatus, GeoPoint};
use crate::registry::CourierRegistry;

const EARTH_RADIUS_KM: f64 = 6_371.0;

pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat_degrees().to_radians();
    let lat2 = b.lat_degrees().to_radians();
    let delta_lat = (b.lat_degrees() - a.lat_degrees()).to_radians();
    let delta_lng = (b.lng_degrees() - a.lng_degrees()).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.sqrt().min(1.0).asin();

    EARTH_RADIUS_KM * central_angle
}

/// A FREE courier picked for a restaurant, with its distance to it.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub courier: Courier,
    pub distance_km: f64,
}

/// Nearest FREE courier to `restaurant`, skipping ids in `exclude`.
///
/// Linear scan over a snapshot of the FREE set. Ties on distance go to the
/// lowest courier id, so the result is reproducible for a given snapshot. A
/// spatial index can replace the scan without changing this signature.
pub fn find_nearest_free(
    registry: &CourierRegistry,
    restaurant: &GeoPoint,
    exclude: &HashSet<CourierId>,
) -> Option<Candidate> {
    registry
        .list_by_status(CourierStatus::Free)
        .into_iter()
        .filter(|courier| !exclude.contains(&courier.id))
        .map(|courier| {
            let distance_km = haversine_km(&courier.location, restaurant);
            Candidate {
                courier,
                distance_km,
            }
        })
        .min_by(|a, b| {
            a.distance_km
                .total_cmp(&b.distance_km)
                .then_with(|| a.courier.id.cmp(&b.courier.id))
        })
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::{find_nearest_free, haversine_km};
    use crate::models::courier::{CourierStatus, GeoPoint};
    use crate::registry::CourierRegistry;

    fn point(lat: f64, lng: f64) -> GeoPoint {
        GeoPoint::from_degrees(lat, lng).unwrap()
    }

    #[test]
    fn zero_distance_for_same_point() {
        let p = point(53.5511, 9.9937);
        let distance = haversine_km(&p, &p);
        assert!(distance < 1e-9);
    }

    #[test]
    fn london_to_paris_is_around_343_km() {
        let london = point(51.5074, -0.1278);
        let paris = point(48.8566, 2.3522);
        let distance = haversine_km(&london, &paris);
        assert!((distance - 343.0).abs() < 5.0);
    }

    #[test]
    fn distance_is_symmetric() {
        let pairs = [
            (point(55.7558, 37.6173), point(55.7520, 37.6175)),
            (point(-33.8688, 151.2093), point(40.7128, -74.0060)),
            (point(0.0, 179.9), point(0.0, -179.9)),
        ];

        for (a, b) in pairs {
            assert!((haversine_km(&a, &b) - haversine_km(&b, &a)).abs() < 1e-12);
        }
    }

    #[test]
    fn antipodal_points_do_not_produce_nan() {
        let distance = haversine_km(&point(0.0, 0.0), &point(0.0, 180.0));
        assert!(distance.is_finite());
        assert!((distance - std::f64::consts::PI * 6_371.0).abs() < 1.0);
    }

    #[test]
    fn empty_free_set_has_no_candidate() {
        let registry = CourierRegistry::new();
        registry.register(1, point(55.0, 37.0)).unwrap();
        registry.update_status(1, CourierStatus::Offline).unwrap();

        assert!(find_nearest_free(&registry, &point(55.0, 37.0), &HashSet::new()).is_none());
    }

    #[test]
    fn moscow_scenario_picks_the_courier_with_smaller_distance() {
        let registry = CourierRegistry::new();
        registry.register(1, point(55.7558, 37.6173)).unwrap();
        registry.register(2, point(55.7520, 37.6175)).unwrap();
        let restaurant = point(55.7540, 37.6170);

        // ~0.201 km vs ~0.225 km
        let d1 = haversine_km(&point(55.7558, 37.6173), &restaurant);
        let d2 = haversine_km(&point(55.7520, 37.6175), &restaurant);
        assert!(d1 < d2);

        let candidate = find_nearest_free(&registry, &restaurant, &HashSet::new()).unwrap();
        assert_eq!(candidate.courier.id, 1);
        assert_eq!(candidate.distance_km, d1);
    }

    #[test]
    fn tie_goes_to_lowest_id() {
        let registry = CourierRegistry::new();
        for id in [9, 4, 6] {
            registry.register(id, point(48.0, 11.0)).unwrap();
        }

        let candidate =
            find_nearest_free(&registry, &point(48.01, 11.01), &HashSet::new()).unwrap();
        assert_eq!(candidate.courier.id, 4);
    }

    #[test]
    fn excluded_couriers_are_skipped() {
        let registry = CourierRegistry::new();
        registry.register(1, point(48.0, 11.0)).unwrap();
        registry.register(2, point(48.5, 11.5)).unwrap();

        let exclude = HashSet::from([1]);
        let candidate = find_nearest_free(&registry, &point(48.0, 11.0), &exclude).unwrap();
        assert_eq!(candidate.courier.id, 2);
    }
}
