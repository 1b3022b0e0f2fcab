use chrono::{DateTime, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Fractional digits kept for stored coordinates (~1 cm at the equator).
pub const COORDINATE_SCALE: u32 = 7;

pub type CourierId = u64;

/// Latitude/longitude pair stored as fixed-precision decimals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoPoint {
    #[serde(with = "rust_decimal::serde::float")]
    pub lat: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub lng: Decimal,
}

impl GeoPoint {
    pub fn new(lat: Decimal, lng: Decimal) -> Self {
        Self {
            lat: lat.round_dp(COORDINATE_SCALE),
            lng: lng.round_dp(COORDINATE_SCALE),
        }
    }

    pub fn from_degrees(lat: f64, lng: f64) -> Result<Self, AppError> {
        let lat = Decimal::from_f64(lat)
            .ok_or_else(|| AppError::BadRequest(format!("latitude {lat} is not a number")))?;
        let lng = Decimal::from_f64(lng)
            .ok_or_else(|| AppError::BadRequest(format!("longitude {lng} is not a number")))?;

        let point = Self::new(lat, lng);
        point.validate()?;
        Ok(point)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.lat < Decimal::from(-90) || self.lat > Decimal::from(90) {
            return Err(AppError::BadRequest(format!(
                "latitude {} out of range [-90, 90]",
                self.lat
            )));
        }
        if self.lng < Decimal::from(-180) || self.lng > Decimal::from(180) {
            return Err(AppError::BadRequest(format!(
                "longitude {} out of range [-180, 180]",
                self.lng
            )));
        }
        Ok(())
    }

    pub fn lat_degrees(&self) -> f64 {
        self.lat.to_f64().unwrap_or_default()
    }

    pub fn lng_degrees(&self) -> f64 {
        self.lng.to_f64().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CourierStatus {
    Free,
    Busy,
    Offline,
}

impl CourierStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CourierStatus::Free => "FREE",
            CourierStatus::Busy => "BUSY",
            CourierStatus::Offline => "OFFLINE",
        }
    }
}

impl std::fmt::Display for CourierStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Courier {
    pub id: CourierId,
    pub location: GeoPoint,
    pub status: CourierStatus,
    /// Set while a claimed assignment's notification has not been published yet.
    pub pending_notification: bool,
    pub updated_at: DateTime<Utc>,
}

impl Courier {
    pub fn new(id: CourierId, location: GeoPoint) -> Self {
        Self {
            id,
            location,
            status: CourierStatus::Free,
            pending_notification: false,
            updated_at: Utc::now(),
        }
    }
}
