//! Historical trails read back from the trail API.
//!
//! Stored trails carry their own summary fields (`totalDistance`, `totalDuration`) when the
//! server computed them. List and detail views go through [`TrailSummary::from_stored`], which
//! keeps any server value as-is and fills only the missing ones from the geometry functions.
//! Each field is resolved independently.

use chrono::{DateTime, Utc};
use log::warn;
use serde::Deserialize;

use crate::{geo_utils, Bounds, Path, StoreError, TrailError};

/// A trail as returned by the list endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredTrail {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    #[serde(default)]
    pub date: String,
    pub start_time: DateTime<Utc>,
    /// Absent while the trail is still open on the server
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub path: Path,
    #[serde(default)]
    pub stops: Vec<serde_json::Value>,
    /// Server-computed distance in kilometres
    #[serde(default)]
    pub total_distance: Option<f64>,
    /// Server-computed duration in minutes
    #[serde(default)]
    pub total_duration: Option<f64>,
}

/// The list endpoint has answered with all three of these shapes.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TrailListResponse {
    Trails { trails: Vec<serde_json::Value> },
    Data { data: Vec<serde_json::Value> },
    Bare(Vec<serde_json::Value>),
}

impl TrailListResponse {
    fn into_entries(self) -> Vec<serde_json::Value> {
        match self {
            TrailListResponse::Trails { trails } => trails,
            TrailListResponse::Data { data } => data,
            TrailListResponse::Bare(entries) => entries,
        }
    }
}

/// Parse a list-endpoint body into trails.
///
/// Only an unrecognised envelope fails the page. Entries that do not match the trail shape are
/// logged and skipped so the rest of the page still renders.
pub fn parse_trail_list(body: &[u8]) -> Result<Vec<StoredTrail>, StoreError> {
    let entries = serde_json::from_slice::<TrailListResponse>(body)
        .map_err(|e| StoreError::Decode(e.to_string()))?
        .into_entries();

    let total = entries.len();
    let trails: Vec<StoredTrail> = entries
        .into_iter()
        .enumerate()
        .filter_map(|(i, entry)| match serde_json::from_value::<StoredTrail>(entry) {
            Ok(trail) => Some(trail),
            Err(e) => {
                warn!("[TrailHistory] Skipping malformed trail entry {}: {}", i, e);
                None
            }
        })
        .collect();

    if trails.len() < total {
        warn!("[TrailHistory] Kept {} of {} trail entries", trails.len(), total);
    }
    Ok(trails)
}

/// Where a summary value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum MetricSource {
    Server,
    Computed,
}

/// Display-ready metrics for one historical trail.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct TrailSummary {
    pub id: String,
    pub date: String,
    /// Start time (Unix milliseconds)
    pub start_time_ms: i64,
    pub points: u32,
    pub stops: u32,
    /// Map framing for the detail view; `None` for a trail without coordinates
    pub bounds: Option<Bounds>,
    pub distance_km: f64,
    pub distance_source: MetricSource,
    /// Minutes; fractional when the server reported it that way
    pub duration_minutes: f64,
    pub duration_source: MetricSource,
}

impl TrailSummary {
    /// Summarise a stored trail, preferring server-provided values.
    ///
    /// Fails only when the duration has to be computed and cannot be: with
    /// [`TrailError::OpenTrail`] when the trail has no end time and with
    /// [`TrailError::InvalidInterval`] when the stored timestamps are reversed.
    pub fn from_stored(trail: &StoredTrail) -> Result<Self, TrailError> {
        let (distance_km, distance_source) = match trail.total_distance {
            Some(km) => (km, MetricSource::Server),
            None => (
                geo_utils::distance_km(trail.path.coordinates()),
                MetricSource::Computed,
            ),
        };

        let (duration_minutes, duration_source) = match trail.total_duration {
            Some(minutes) => (minutes, MetricSource::Server),
            None => {
                let end_time = trail.end_time.ok_or_else(|| TrailError::OpenTrail {
                    id: trail.id.clone(),
                })?;
                let minutes = geo_utils::duration_minutes(trail.start_time, end_time)?;
                (minutes as f64, MetricSource::Computed)
            }
        };

        Ok(Self {
            id: trail.id.clone(),
            date: trail.date.clone(),
            start_time_ms: trail.start_time.timestamp_millis(),
            points: trail.path.len() as u32,
            stops: trail.stops.len() as u32,
            bounds: trail.path.bounds(),
            distance_km,
            distance_source,
            duration_minutes,
            duration_source,
        })
    }

    pub fn display_distance(&self) -> String {
        format_distance_km(self.distance_km)
    }

    pub fn display_duration(&self) -> String {
        format_duration_minutes(self.duration_minutes)
    }
}

/// Summarise a page of trails, one result per input in the same order.
pub fn summarize_trails(trails: &[StoredTrail]) -> Vec<Result<TrailSummary, TrailError>> {
    trails.iter().map(TrailSummary::from_stored).collect()
}

/// Parallel version of [`summarize_trails`] for large histories.
#[cfg(feature = "parallel")]
pub fn summarize_trails_parallel(trails: &[StoredTrail]) -> Vec<Result<TrailSummary, TrailError>> {
    use rayon::prelude::*;

    trails.par_iter().map(TrailSummary::from_stored).collect()
}

/// `"12.3 km"`
pub fn format_distance_km(km: f64) -> String {
    format!("{:.1} km", km)
}

/// `"1h 5m"`, dropping any partial minute
pub fn format_duration_minutes(minutes: f64) -> String {
    let whole = minutes.max(0.0).floor() as i64;
    format!("{}h {}m", whole / 60, whole % 60)
}
