//! Submission payload.
//!
//! A [`TrailRecord`] is built once from a [`StoppedTrack`] and serialises to the JSON shape the
//! trail API accepts:
//!
//! ```json
//! {
//!   "date": "2024-05-14",
//!   "startTime": "2024-05-14T08:30:00.000Z",
//!   "endTime": "2024-05-14T08:40:00.000Z",
//!   "path": { "coordinates": [[0.0, 0.0], [0.0, 1.0]] },
//!   "stops": [],
//!   "deviceInfo": { "userAgent": "...", "platform": "...", "pointsRecorded": 2 }
//! }
//! ```

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize, Serializer};

use crate::session::StoppedTrack;
use crate::{geo_utils, Path, TrailError};

/// Trails with fewer points than this are never persisted.
pub const MIN_TRAIL_POINTS: usize = 2;

/// Descriptive metadata about the device that recorded a trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct DeviceEnvironment {
    pub user_agent: String,
    pub platform: String,
}

impl DeviceEnvironment {
    /// Best-effort description of the running build. Mobile hosts usually override this with
    /// their own user agent.
    pub fn detect() -> Self {
        Self {
            user_agent: format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            platform: format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH),
        }
    }
}

impl Default for DeviceEnvironment {
    fn default() -> Self {
        Self::detect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub user_agent: String,
    pub platform: String,
    pub points_recorded: usize,
}

/// Immutable trail payload handed to the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrailRecord {
    date: NaiveDate,
    #[serde(serialize_with = "serialize_instant")]
    start_time: DateTime<Utc>,
    #[serde(serialize_with = "serialize_instant")]
    end_time: DateTime<Utc>,
    path: Path,
    // stop detection is not implemented; always serialised as []
    stops: Vec<serde_json::Value>,
    device_info: DeviceInfo,
}

impl TrailRecord {
    /// Build the payload for a stopped track.
    ///
    /// Fails with [`TrailError::InsufficientData`] below [`MIN_TRAIL_POINTS`] and with
    /// [`TrailError::InvalidInterval`] when the track's end precedes its start.
    pub fn build(track: &StoppedTrack, device: &DeviceEnvironment) -> Result<Self, TrailError> {
        let points = track.path().len();
        if points < MIN_TRAIL_POINTS {
            return Err(TrailError::InsufficientData { points });
        }
        geo_utils::duration_minutes(track.started_at(), track.ended_at())?;

        Ok(Self {
            date: track.started_at().date_naive(),
            start_time: track.started_at(),
            end_time: track.ended_at(),
            path: track.path().clone(),
            stops: Vec::new(),
            device_info: DeviceInfo {
                user_agent: device.user_agent.clone(),
                platform: device.platform.clone(),
                points_recorded: points,
            },
        })
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.end_time
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }

    pub fn distance_km(&self) -> f64 {
        geo_utils::distance_km(self.path.coordinates())
    }

    pub fn duration_minutes(&self) -> Result<i64, TrailError> {
        geo_utils::duration_minutes(self.start_time, self.end_time)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

// Millisecond precision with a `Z` suffix, the form JavaScript's toISOString produces.
fn serialize_instant<S: Serializer>(instant: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&instant.to_rfc3339_opts(SecondsFormat::Millis, true))
}
