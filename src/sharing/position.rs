//! Typed position payload for location sharing.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{PositionError, PositionResult};

/// Default lifetime of a position update.
const DEFAULT_TTL_MINUTES: i64 = 15;

/// Rounding applied to coordinates before they are shared.
///
/// | Precision | Decimals | Approximate Radius | Geohash Length |
/// |-----------|----------|--------------------|----------------|
/// | Coarse    | 2        | ~1.1 km            | 5              |
/// | Standard  | 4        | ~11 m              | 7              |
/// | Fine      | 5        | ~1.1 m             | 8              |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PositionPrecision {
    /// Neighbourhood level.
    Coarse,
    /// Street level.
    #[default]
    Standard,
    /// Doorstep level.
    Fine,
}

impl PositionPrecision {
    /// Decimal places kept for each coordinate.
    #[must_use]
    pub const fn decimal_places(self) -> i32 {
        match self {
            Self::Coarse => 2,
            Self::Standard => 4,
            Self::Fine => 5,
        }
    }

    /// Geohash length matching the rounding.
    #[must_use]
    pub const fn geohash_len(self) -> usize {
        match self {
            Self::Coarse => 5,
            Self::Standard => 7,
            Self::Fine => 8,
        }
    }

    /// Rounds a coordinate to this precision.
    #[must_use]
    pub fn round(self, coord: f64) -> f64 {
        let multiplier = 10_f64.powi(self.decimal_places());
        (coord * multiplier).round() / multiplier
    }
}

/// A rounded position shared with the rest of a circle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionUpdate {
    /// Rounded latitude.
    pub latitude: f64,
    /// Rounded longitude.
    pub longitude: f64,
    /// Geohash of the rounded coordinates.
    pub geohash: String,
    /// Rounding that was applied.
    pub precision: PositionPrecision,
    /// When the position was taken.
    pub recorded_at: DateTime<Utc>,
    /// When receivers should stop showing it.
    pub expires_at: DateTime<Utc>,
}

impl PositionUpdate {
    /// Creates an update with [`PositionPrecision::Standard`] rounding.
    ///
    /// # Errors
    ///
    /// Returns [`PositionError::InvalidCoordinates`] if either coordinate is
    /// not finite or out of range.
    pub fn new(latitude: f64, longitude: f64) -> PositionResult<Self> {
        Self::with_precision(latitude, longitude, PositionPrecision::default())
    }

    /// Creates an update with the given rounding.
    ///
    /// # Errors
    ///
    /// Returns [`PositionError::InvalidCoordinates`] if either coordinate is
    /// not finite or out of range.
    pub fn with_precision(
        latitude: f64,
        longitude: f64,
        precision: PositionPrecision,
    ) -> PositionResult<Self> {
        let valid = latitude.is_finite()
            && longitude.is_finite()
            && (-90.0..=90.0).contains(&latitude)
            && (-180.0..=180.0).contains(&longitude);
        if !valid {
            return Err(PositionError::InvalidCoordinates {
                latitude,
                longitude,
            });
        }

        let latitude = precision.round(latitude);
        let longitude = precision.round(longitude);
        let geohash = geohash::encode(
            geohash::Coord {
                x: longitude,
                y: latitude,
            },
            precision.geohash_len(),
        )
        .unwrap_or_default();
        let recorded_at = Utc::now();

        Ok(Self {
            latitude,
            longitude,
            geohash,
            precision,
            recorded_at,
            expires_at: recorded_at + Duration::minutes(DEFAULT_TTL_MINUTES),
        })
    }

    /// Overrides how long the update stays valid.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.expires_at = self.recorded_at + ttl;
        self
    }

    /// Returns whether the update has expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Converts to the opaque payload carried by `share_state`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_payload(&self) -> PositionResult<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Parses a `state_shared` payload.
    ///
    /// # Errors
    ///
    /// Returns [`PositionError::Payload`] if the payload is not a position
    /// update, or [`PositionError::InvalidCoordinates`] if its coordinates
    /// are out of range.
    pub fn from_payload(payload: &Value) -> PositionResult<Self> {
        let update: Self = serde_json::from_value(payload.clone())?;
        if !(-90.0..=90.0).contains(&update.latitude)
            || !(-180.0..=180.0).contains(&update.longitude)
        {
            return Err(PositionError::InvalidCoordinates {
                latitude: update.latitude,
                longitude: update.longitude,
            });
        }
        Ok(update)
    }
}
