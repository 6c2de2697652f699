//! # Geographic Utilities
//!
//! Trip metrics derived from a recorded path.
//!
//! These functions are the single source of truth for trail distance and duration. The
//! recording session, the submitter and the historical list view all call into this module
//! rather than carrying their own arithmetic.
//!
//! ## Overview
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`haversine_km`] | Great-circle distance between two coordinates |
//! | [`distance_km`] | Total length of a path in kilometres |
//! | [`duration_minutes`] | Whole minutes between two instants |
//!
//! ## Example
//!
//! ```rust
//! use trail_recorder::{Coordinate, geo_utils};
//!
//! let path = vec![
//!     Coordinate::new(0.0, 0.0),
//!     Coordinate::new(0.0, 1.0),
//!     Coordinate::new(1.0, 1.0),
//! ];
//!
//! let km = geo_utils::distance_km(&path);
//! assert!((km - 222.39).abs() < 0.1);
//! ```
//!
//! ## Algorithm Notes
//!
//! Distances use the haversine formula on a sphere of radius 6371 km. Results are unrounded;
//! one-decimal display rounding lives in [`crate::history::format_distance_km`].
//!
//! Reference: [Haversine formula (Wikipedia)](https://en.wikipedia.org/wiki/Haversine_formula)

use chrono::{DateTime, Utc};

use crate::{Coordinate, TrailError};

/// Mean Earth radius used for all distance calculations.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

// =============================================================================
// Distance Functions
// =============================================================================

/// Great-circle distance between two coordinates in kilometres.
///
/// # Example
///
/// ```rust
/// use trail_recorder::{Coordinate, geo_utils};
///
/// let london = Coordinate::new(51.5074, -0.1278);
/// let paris = Coordinate::new(48.8566, 2.3522);
///
/// let km = geo_utils::haversine_km(&london, &paris);
/// assert!((km - 343.5).abs() < 1.0);
/// ```
#[inline]
pub fn haversine_km(p1: &Coordinate, p2: &Coordinate) -> f64 {
    let lat1 = p1.latitude.to_radians();
    let lat2 = p2.latitude.to_radians();
    let d_lat = (p2.latitude - p1.latitude).to_radians();
    let d_lon = (p2.longitude - p1.longitude).to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Total length of a path in kilometres.
///
/// Sums the haversine distance between consecutive coordinates. Empty and single-point
/// paths return 0.0.
pub fn distance_km(path: &[Coordinate]) -> f64 {
    if path.len() < 2 {
        return 0.0;
    }

    path.windows(2).map(|w| haversine_km(&w[0], &w[1])).sum()
}

// =============================================================================
// Duration Functions
// =============================================================================

/// Whole minutes elapsed between `start` and `end`, rounded down.
///
/// Fails with [`TrailError::InvalidInterval`] when `end` precedes `start`. The error is never
/// clamped to zero: reversed timestamps mean the record is corrupt.
///
/// # Example
///
/// ```rust
/// use chrono::{Duration, TimeZone, Utc};
/// use trail_recorder::geo_utils;
///
/// let start = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
/// let end = start + Duration::seconds(10 * 60 + 59);
/// assert_eq!(geo_utils::duration_minutes(start, end).unwrap(), 10);
/// assert!(geo_utils::duration_minutes(end, start).is_err());
/// ```
pub fn duration_minutes(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<i64, TrailError> {
    if end < start {
        return Err(TrailError::InvalidInterval {
            start_ms: start.timestamp_millis(),
            end_ms: end.timestamp_millis(),
        });
    }
    Ok((end - start).num_minutes())
}

// =============================================================================
// Unit Tests
// =============================================================================
