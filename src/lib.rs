//! # Trail Recorder
//!
//! GPS trail recording for field-operations apps.
//!
//! This library provides:
//! - A start/stop recording session fed by the device's continuous location updates
//! - Trip metrics (haversine distance, elapsed minutes) computed from the recorded path
//! - Submission of finished trails to the trail API, with the capture preserved on failure
//! - Summaries of historical trails for list and detail views
//!
//! ## Features
//!
//! - **`http`** - Enable the HTTP client for the trail API
//! - **`parallel`** - Enable parallel summarisation with rayon
//! - **`ffi`** - Enable FFI bindings for mobile platforms (iOS/Android)
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use trail_recorder::{
//!     Fix, LocationHardware, PositionOptions, PushPositionSource, SessionStatus, TrackSession,
//!     TrailError,
//! };
//!
//! struct Gps;
//!
//! impl LocationHardware for Gps {
//!     fn engage(&self, _options: &PositionOptions) -> Result<(), TrailError> { Ok(()) }
//!     fn release(&self) {}
//! }
//!
//! let source = Arc::new(PushPositionSource::new(Gps));
//! let mut session = TrackSession::new(source.clone(), PositionOptions::default());
//!
//! session.start()?;
//! source.push_fix(Fix::new(51.5074, -0.1278));
//! source.push_fix(Fix::new(51.5080, -0.1290));
//! session.stop();
//!
//! assert_eq!(session.status(), SessionStatus::Stopped);
//! let track = session.stopped_track().unwrap();
//! println!("{:.2} km", track.distance_km());
//! # Ok::<(), TrailError>(())
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

use geo::BoundingRect;
use serde::{Deserialize, Serialize};

pub mod config;
pub mod error;
pub mod geo_utils;
pub mod history;
pub mod position;
pub mod record;
pub mod session;
pub mod store;
pub mod submit;

// HTTP module for the trail API
#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use http::TrailApiClient;

pub use config::{ApiConfig, TrackerConfig};
pub use error::{StoreError, TrailError};
pub use history::{
    format_distance_km, format_duration_minutes, parse_trail_list, summarize_trails,
    MetricSource, StoredTrail, TrailSummary,
};
#[cfg(feature = "parallel")]
pub use history::summarize_trails_parallel;
pub use position::{
    Fix, FixError, LocationHardware, PositionOptions, PositionSink, PositionSource,
    PushPositionSource, SubscriptionHandle,
};
pub use record::{DeviceEnvironment, DeviceInfo, TrailRecord, MIN_TRAIL_POINTS};
pub use session::{AdvisoryCallback, Clock, SessionStatus, StoppedTrack, SystemClock, TrackSession};
pub use store::{TrailId, TrailStore};
pub use submit::TrailSubmitter;

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!();

/// Initialize logging for Android (only used in FFI)
#[cfg(all(feature = "ffi", target_os = "android"))]
fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("TrailRecorderRust")
    );
}

#[cfg(all(feature = "ffi", not(target_os = "android")))]
fn init_logging() {
    // No-op on non-Android platforms
}

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Core Types
// ============================================================================

/// A WGS-84 position in degrees.
///
/// Serialises as a `[latitude, longitude]` pair.
///
/// # Example
/// ```
/// use trail_recorder::Coordinate;
/// let point = Coordinate::new(51.5074, -0.1278); // London
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }
}

impl From<[f64; 2]> for Coordinate {
    fn from([latitude, longitude]: [f64; 2]) -> Self {
        Self { latitude, longitude }
    }
}

impl From<Coordinate> for [f64; 2] {
    fn from(c: Coordinate) -> Self {
        [c.latitude, c.longitude]
    }
}

/// Geographic bounding box of a path.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Center point of the bounds, for framing a map view.
    pub fn center(&self) -> Coordinate {
        Coordinate::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }
}

/// Coordinates in capture order.
///
/// Only the recording session appends; everyone else reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Path {
    coordinates: Vec<Coordinate>,
}

impl Path {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, coordinate: Coordinate) {
        self.coordinates.push(coordinate);
    }

    pub fn coordinates(&self) -> &[Coordinate] {
        &self.coordinates
    }

    pub fn len(&self) -> usize {
        self.coordinates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coordinates.is_empty()
    }

    pub fn distance_km(&self) -> f64 {
        geo_utils::distance_km(&self.coordinates)
    }

    /// The path as a `geo` line string (x = longitude, y = latitude).
    pub fn to_line_string(&self) -> geo::LineString<f64> {
        self.coordinates
            .iter()
            .map(|c| geo::Coord { x: c.longitude, y: c.latitude })
            .collect()
    }

    /// Bounding box of the path, or `None` when it is empty.
    pub fn bounds(&self) -> Option<Bounds> {
        let rect = self.to_line_string().bounding_rect()?;
        Some(Bounds {
            min_lat: rect.min().y,
            max_lat: rect.max().y,
            min_lng: rect.min().x,
            max_lng: rect.max().x,
        })
    }
}

impl From<Vec<Coordinate>> for Path {
    fn from(coordinates: Vec<Coordinate>) -> Self {
        Self { coordinates }
    }
}

// ============================================================================
// FFI Exports (only when feature enabled)
// ============================================================================

#[cfg(feature = "ffi")]
mod ffi {
    use super::*;
    use chrono::DateTime;
    use log::{info, warn};
    use std::sync::Arc;

    // ========================================================================
    // Platform Location Interface (implemented in Kotlin/Swift)
    // ========================================================================

    /// Host binding for the device's location updates.
    #[uniffi::export(callback_interface)]
    pub trait PlatformLocation: Send + Sync {
        /// Whether the device has any location capability.
        fn is_available(&self) -> bool;
        /// Begin continuous updates. Return false if they could not be started.
        fn start_updates(&self, options: PositionOptions) -> bool;
        /// End continuous updates.
        fn stop_updates(&self);
    }

    struct PlatformHardware(Box<dyn PlatformLocation>);

    impl LocationHardware for PlatformHardware {
        fn is_available(&self) -> bool {
            self.0.is_available()
        }

        fn engage(&self, options: &PositionOptions) -> Result<(), TrailError> {
            if self.0.start_updates(options.clone()) {
                Ok(())
            } else {
                Err(TrailError::UnsupportedSensor)
            }
        }

        fn release(&self) {
            self.0.stop_updates();
        }
    }

    fn block_on<F: std::future::Future>(future: F) -> Result<F::Output, TrailError> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| TrailError::Config(format!("Runtime error: {}", e)))?;
        Ok(rt.block_on(future))
    }

    /// Recording controller exposed to the mobile host.
    ///
    /// The host forwards OS location callbacks with `push_position`/`push_fix_error`. A session is
    /// single-use; call `reset` after a discard or successful submit to record another trail.
    #[derive(uniffi::Object)]
    pub struct TrailRecorder {
        source: Arc<PushPositionSource<PlatformHardware>>,
        session: Mutex<TrackSession>,
        config: TrackerConfig,
    }

    impl TrailRecorder {
        fn new_session(&self) -> TrackSession {
            TrackSession::new(self.source.clone(), self.config.position.clone())
        }
    }

    #[uniffi::export]
    impl TrailRecorder {
        #[uniffi::constructor]
        pub fn new(location: Box<dyn PlatformLocation>, config: TrackerConfig) -> Arc<Self> {
            init_logging();
            let source = Arc::new(PushPositionSource::new(PlatformHardware(location)));
            let session = TrackSession::new(source.clone(), config.position.clone());
            Arc::new(Self {
                source,
                session: Mutex::new(session),
                config,
            })
        }

        pub fn start(&self) -> Result<(), TrailError> {
            lock(&self.session).start()
        }

        pub fn push_position(&self, fix: Fix) {
            self.source.push_fix(fix);
        }

        pub fn push_fix_error(&self, error: FixError) {
            self.source.push_error(error);
        }

        pub fn stop(&self) -> bool {
            lock(&self.session).stop()
        }

        pub fn discard(&self) {
            lock(&self.session).discard();
        }

        /// Replace the current session with a fresh idle one.
        pub fn reset(&self) {
            let mut session = lock(&self.session);
            session.discard();
            *session = self.new_session();
        }

        pub fn status(&self) -> SessionStatus {
            lock(&self.session).status()
        }

        pub fn points_recorded(&self) -> u32 {
            lock(&self.session).points_recorded() as u32
        }

        /// Distance of the path captured so far.
        pub fn distance_km(&self) -> f64 {
            lock(&self.session).path_snapshot().distance_km()
        }

        /// Submit the stopped trail. On failure the trail stays stopped and can be resubmitted.
        pub fn submit(&self, bearer_token: String) -> Result<String, TrailError> {
            let client = TrailApiClient::new(&self.config.api)?.with_bearer_token(&bearer_token);
            let submitter = TrailSubmitter::new(client).with_device(self.config.device.clone());

            // never hold the session lock across the request
            let track = {
                let session = lock(&self.session);
                let track = session.stopped_track().cloned();
                track.ok_or_else(|| TrailError::InvalidTransition {
                    from: session.status(),
                    action: "submit",
                })?
            };

            let id = block_on(submitter.submit(&track))?.map_err(|e| {
                warn!("[TrailRecorderRust] Submit failed: {}", e);
                e
            })?;

            if !lock(&self.session).mark_submitted(&track) {
                info!("[TrailRecorderRust] Session changed while trail {} was submitting", id);
            }
            Ok(id)
        }
    }

    #[uniffi::export]
    pub fn default_tracker_config() -> TrackerConfig {
        TrackerConfig::default()
    }

    #[uniffi::export]
    pub fn tracker_config_from_json(json: String) -> Result<TrackerConfig, TrailError> {
        TrackerConfig::from_json(&json)
    }

    #[uniffi::export]
    pub fn ffi_distance_km(coordinates: Vec<Coordinate>) -> f64 {
        geo_utils::distance_km(&coordinates)
    }

    /// Whole minutes between two Unix-millisecond instants.
    #[uniffi::export]
    pub fn ffi_duration_minutes(start_ms: i64, end_ms: i64) -> Result<i64, TrailError> {
        let invalid = TrailError::InvalidInterval { start_ms, end_ms };
        let start = DateTime::from_timestamp_millis(start_ms).ok_or_else(|| invalid.clone())?;
        let end = DateTime::from_timestamp_millis(end_ms).ok_or(invalid)?;
        geo_utils::duration_minutes(start, end)
    }

    #[uniffi::export]
    pub fn ffi_format_distance(km: f64) -> String {
        format_distance_km(km)
    }

    #[uniffi::export]
    pub fn ffi_format_duration(minutes: f64) -> String {
        format_duration_minutes(minutes)
    }

    /// Trails that cannot be summarised are logged and left out of the list.
    fn summarize_all(trails: &[StoredTrail]) -> Result<Vec<TrailSummary>, TrailError> {
        #[cfg(feature = "parallel")]
        let results = summarize_trails_parallel(trails);

        #[cfg(not(feature = "parallel"))]
        let results = summarize_trails(trails);

        Ok(results
            .into_iter()
            .zip(trails)
            .filter_map(|(result, trail)| match result {
                Ok(summary) => Some(summary),
                Err(e) => {
                    warn!("[TrailRecorderRust] Skipping trail {}: {}", trail.id, e);
                    None
                }
            })
            .collect())
    }

    /// Summarise a list-endpoint response body the host already fetched.
    #[uniffi::export]
    pub fn ffi_summarize_trails(json: String) -> Result<Vec<TrailSummary>, TrailError> {
        init_logging();
        let trails =
            parse_trail_list(json.as_bytes()).map_err(|cause| TrailError::Fetch { cause })?;
        summarize_all(&trails)
    }

    /// Fetch one page of trails and summarise them.
    #[uniffi::export]
    pub fn ffi_fetch_trail_summaries(
        api: ApiConfig,
        bearer_token: String,
        page: u32,
        limit: u32,
    ) -> Result<Vec<TrailSummary>, TrailError> {
        init_logging();
        let client = TrailApiClient::new(&api)?.with_bearer_token(&bearer_token);
        let trails = block_on(client.list_trails(page, limit))?
            .map_err(|cause| TrailError::Fetch { cause })?;
        info!("[TrailRecorderRust] Summarising {} trails", trails.len());
        summarize_all(&trails)
    }

    #[uniffi::export]
    pub fn ffi_delete_trail(api: ApiConfig, bearer_token: String, id: String) -> Result<(), TrailError> {
        init_logging();
        let client = TrailApiClient::new(&api)?.with_bearer_token(&bearer_token);
        block_on(client.delete_trail(&id))?.map_err(|cause| TrailError::Fetch { cause })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::tests::FakeHardware;
    use crate::session::tests::{t0, ManualClock};
    use crate::submit::tests::MemoryStore;
    use chrono::Duration;
    use geo::{Distance, Haversine};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    struct Harness {
        source: Arc<PushPositionSource<FakeHardware>>,
        clock: Arc<ManualClock>,
        session: TrackSession,
    }

    fn harness() -> Harness {
        let source = Arc::new(PushPositionSource::new(FakeHardware::default()));
        let clock = Arc::new(ManualClock::new(t0()));
        let session = TrackSession::new(source.clone(), PositionOptions::default())
            .with_clock(clock.clone());
        Harness { source, clock, session }
    }

    /// start at t0, three fixes, stop at t0 + 10 min
    fn record_three_points(h: &mut Harness) {
        h.session.start().unwrap();
        h.source.push_fix(Fix::new(0.0, 0.0));
        h.source.push_fix(Fix::new(0.0, 1.0));
        h.source.push_fix(Fix::new(1.0, 1.0));
        h.clock.advance(Duration::minutes(10));
        assert!(h.session.stop());
    }

    #[test]
    fn test_coordinate_serializes_as_pair() {
        let json = serde_json::to_string(&Coordinate::new(12.5, -3.25)).unwrap();
        assert_eq!(json, "[12.5,-3.25]");
        let back: Coordinate = serde_json::from_str("[1.0, 2.0]").unwrap();
        assert_eq!(back, Coordinate::new(1.0, 2.0));
    }

    #[test]
    fn test_path_to_geo() {
        let path = Path::from(vec![Coordinate::new(51.5074, -0.1278), Coordinate::new(48.8566, 2.3522)]);
        let line = path.to_line_string();
        assert_eq!(line.0.len(), 2);
        assert_eq!(line.0[0].x, -0.1278);
        assert_eq!(line.0[1].y, 48.8566);

        let points: Vec<geo::Point<f64>> = line.points().collect();
        let geo_km = Haversine::distance(points[0], points[1]) / 1000.0;
        assert!((geo_km - path.distance_km()).abs() < 0.01);
    }

    #[test]
    fn test_path_bounds() {
        assert_eq!(Path::new().bounds(), None);

        let path = Path::from(vec![
            Coordinate::new(0.0, 0.0),
            Coordinate::new(0.0, 1.0),
            Coordinate::new(1.0, 1.0),
        ]);
        let bounds = path.bounds().unwrap();
        assert_eq!(
            bounds,
            Bounds {
                min_lat: 0.0,
                max_lat: 1.0,
                min_lng: 0.0,
                max_lng: 1.0,
            }
        );
        assert_eq!(bounds.center(), Coordinate::new(0.5, 0.5));

        let single = Path::from(vec![Coordinate::new(51.5, -0.12)]).bounds().unwrap();
        assert_eq!(single.min_lat, single.max_lat);
        assert_eq!(single.min_lng, -0.12);
    }

    #[tokio::test]
    async fn test_record_and_submit_three_points() {
        let mut h = harness();
        record_three_points(&mut h);

        let track = h.session.stopped_track().unwrap().clone();
        let segments = geo_utils::haversine_km(&Coordinate::new(0.0, 0.0), &Coordinate::new(0.0, 1.0))
            + geo_utils::haversine_km(&Coordinate::new(0.0, 1.0), &Coordinate::new(1.0, 1.0));
        assert!((track.distance_km() - segments).abs() < 1e-9);
        assert!((track.distance_km() - 222.39).abs() < 0.01);
        assert_eq!(track.duration_minutes(), Ok(10));

        let store = Arc::new(MemoryStore::default());
        let submitter = TrailSubmitter::new(Arc::clone(&store));
        let id = h.session.submit(&submitter).await.unwrap();

        assert_eq!(id, "trail-1");
        assert_eq!(h.session.status(), SessionStatus::Discarded);
        let payloads = lock(&store.payloads);
        assert_eq!(payloads[0]["deviceInfo"]["pointsRecorded"], 3);
        assert_eq!(payloads[0]["startTime"], "2024-05-14T08:30:00.000Z");
        assert_eq!(payloads[0]["endTime"], "2024-05-14T08:40:00.000Z");
        assert_eq!(h.source.hardware().released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unreachable_store_keeps_session() {
        let mut h = harness();
        record_three_points(&mut h);

        let store = Arc::new(MemoryStore::default());
        store.offline.store(true, Ordering::SeqCst);
        let submitter = TrailSubmitter::new(Arc::clone(&store));

        let result = h.session.submit(&submitter).await;
        assert!(matches!(result, Err(TrailError::Submit { .. })));
        assert_eq!(h.session.status(), SessionStatus::Stopped);
        assert_eq!(h.session.points_recorded(), 3);

        store.offline.store(false, Ordering::SeqCst);
        let id = h.session.submit(&submitter).await.unwrap();
        assert_eq!(id, "trail-2");

        let payloads = lock(&store.payloads);
        assert_eq!(payloads[0], payloads[1]);
    }

    #[tokio::test]
    async fn test_detached_submit_marks_session() {
        let mut h = harness();
        record_three_points(&mut h);

        let track = h.session.stopped_track().unwrap().clone();
        let store = Arc::new(MemoryStore::default());
        let submitter = TrailSubmitter::new(Arc::clone(&store));

        let pending = submitter.submit(&track);
        // the session is free while the request is in flight
        assert_eq!(h.session.status(), SessionStatus::Stopped);
        assert_eq!(h.session.points_recorded(), 3);
        let id = pending.await.unwrap();

        assert_eq!(id, "trail-1");
        assert!(h.session.mark_submitted(&track));
        assert_eq!(h.session.status(), SessionStatus::Discarded);
    }

    #[tokio::test]
    async fn test_single_point_session_is_not_submitted() {
        let mut h = harness();
        h.session.start().unwrap();
        h.source.push_fix(Fix::new(10.0, 10.0));
        h.session.stop();

        let store = MemoryStore::default();
        let submitter = TrailSubmitter::new(store);
        let result = h.session.submit(&submitter).await;

        assert_eq!(result, Err(TrailError::InsufficientData { points: 1 }));
        assert_eq!(submitter.store().calls(), 0);
        assert_eq!(h.session.status(), SessionStatus::Stopped);
    }

    #[tokio::test]
    async fn test_submit_requires_stopped_session() {
        let mut h = harness();
        let submitter = TrailSubmitter::new(MemoryStore::default());
        assert!(matches!(
            h.session.submit(&submitter).await,
            Err(TrailError::InvalidTransition {
                from: SessionStatus::Idle,
                action: "submit",
            })
        ));

        h.session.start().unwrap();
        assert!(matches!(
            h.session.submit(&submitter).await,
            Err(TrailError::InvalidTransition {
                from: SessionStatus::Recording,
                ..
            })
        ));
    }
}
