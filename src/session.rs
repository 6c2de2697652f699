//! Trail recording session.
//!
//! A [`TrackSession`] moves through `Idle -> Recording -> Stopped` and can be discarded from
//! any state. While recording it holds the only subscription to the [`PositionSource`] and
//! appends every delivered fix to its path, unfiltered and in arrival order.
//!
//! The path buffer is shared with the subscription's sink behind a mutex. `stop()` and
//! `discard()` close that buffer before returning, so a callback still in flight on another
//! thread can never append to a stopped or discarded session.

use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use crate::position::{Fix, FixError, PositionOptions, PositionSink, PositionSource, SubscriptionHandle};
use crate::store::{TrailId, TrailStore};
use crate::submit::TrailSubmitter;
use crate::{geo_utils, lock, Path, TrailError};

/// Source of the current instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Called for every failed fix the session absorbs.
pub type AdvisoryCallback = Arc<dyn Fn(&FixError) + Send + Sync>;

/// Externally visible lifecycle state of a [`TrackSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum SessionStatus {
    Idle,
    Recording,
    Stopped,
    /// Terminal: cancelled or successfully submitted.
    Discarded,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Recording => "recording",
            SessionStatus::Stopped => "stopped",
            SessionStatus::Discarded => "discarded",
        };
        f.write_str(name)
    }
}

/// A finished recording, ready for submission.
#[derive(Debug, Clone, PartialEq)]
pub struct StoppedTrack {
    started_at: DateTime<Utc>,
    ended_at: DateTime<Utc>,
    path: Path,
    fix_errors: u32,
}

impl StoppedTrack {
    pub fn new(started_at: DateTime<Utc>, ended_at: DateTime<Utc>, path: Path) -> Self {
        Self {
            started_at,
            ended_at,
            path,
            fix_errors: 0,
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn ended_at(&self) -> DateTime<Utc> {
        self.ended_at
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of fix attempts that failed while recording.
    pub fn fix_errors(&self) -> u32 {
        self.fix_errors
    }

    pub fn distance_km(&self) -> f64 {
        geo_utils::distance_km(self.path.coordinates())
    }

    pub fn duration_minutes(&self) -> Result<i64, TrailError> {
        geo_utils::duration_minutes(self.started_at, self.ended_at)
    }
}

#[derive(Debug, Default)]
struct PathBuffer {
    open: bool,
    path: Path,
    fix_errors: u32,
}

struct PathSink {
    buffer: Arc<Mutex<PathBuffer>>,
    on_advisory: Option<AdvisoryCallback>,
}

impl PositionSink for PathSink {
    fn on_position(&self, fix: Fix) {
        let mut buffer = lock(&self.buffer);
        if !buffer.open {
            debug!("[TrackSession] Dropping fix delivered after the session closed");
            return;
        }
        buffer.path.push(fix.coordinate());
        debug!(
            "[TrackSession] Fix #{} at ({:.6}, {:.6})",
            buffer.path.len(),
            fix.latitude,
            fix.longitude
        );
    }

    fn on_error(&self, error: FixError) {
        {
            let mut buffer = lock(&self.buffer);
            if !buffer.open {
                return;
            }
            buffer.fix_errors += 1;
        }

        warn!("[TrackSession] Position fix failed: {}", error);
        if let Some(ref cb) = self.on_advisory {
            cb(&error);
        }
    }
}

struct Recording {
    started_at: DateTime<Utc>,
    handle: SubscriptionHandle,
    buffer: Arc<Mutex<PathBuffer>>,
}

impl Recording {
    /// Stop accepting fixes and hand back what was captured.
    fn close(&self) -> (Path, u32) {
        let mut buffer = lock(&self.buffer);
        buffer.open = false;
        (std::mem::take(&mut buffer.path), buffer.fix_errors)
    }
}

enum SessionState {
    Idle,
    Recording(Recording),
    Stopped(StoppedTrack),
    Discarded,
}

/// One start-to-stop recording attempt.
pub struct TrackSession {
    source: Arc<dyn PositionSource>,
    options: PositionOptions,
    clock: Arc<dyn Clock>,
    on_advisory: Option<AdvisoryCallback>,
    state: SessionState,
}

impl TrackSession {
    pub fn new(source: Arc<dyn PositionSource>, options: PositionOptions) -> Self {
        Self {
            source,
            options,
            clock: Arc::new(SystemClock),
            on_advisory: None,
            state: SessionState::Idle,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_advisory(mut self, on_advisory: AdvisoryCallback) -> Self {
        self.on_advisory = Some(on_advisory);
        self
    }

    pub fn status(&self) -> SessionStatus {
        match self.state {
            SessionState::Idle => SessionStatus::Idle,
            SessionState::Recording(_) => SessionStatus::Recording,
            SessionState::Stopped(_) => SessionStatus::Stopped,
            SessionState::Discarded => SessionStatus::Discarded,
        }
    }

    /// Begin recording. Only valid from `Idle`.
    ///
    /// On any failure the session stays `Idle` and no sensor is held.
    pub fn start(&mut self) -> Result<(), TrailError> {
        if !matches!(self.state, SessionState::Idle) {
            return Err(TrailError::InvalidTransition {
                from: self.status(),
                action: "start",
            });
        }
        if !self.source.is_supported() {
            warn!("[TrackSession] No position source available on this device");
            return Err(TrailError::UnsupportedSensor);
        }

        let started_at = self.clock.now();
        let buffer = Arc::new(Mutex::new(PathBuffer {
            open: true,
            ..Default::default()
        }));
        let sink = Arc::new(PathSink {
            buffer: Arc::clone(&buffer),
            on_advisory: self.on_advisory.clone(),
        });

        let handle = self.source.subscribe(sink, &self.options)?;
        info!("[TrackSession] Recording started at {}", started_at.to_rfc3339());

        self.state = SessionState::Recording(Recording {
            started_at,
            handle,
            buffer,
        });
        Ok(())
    }

    /// Stop recording and release the sensor.
    ///
    /// Returns false (and does nothing) unless the session is `Recording`, so repeated
    /// taps on a stop button are harmless.
    pub fn stop(&mut self) -> bool {
        let recording = match std::mem::replace(&mut self.state, SessionState::Idle) {
            SessionState::Recording(recording) => recording,
            other => {
                self.state = other;
                debug!("[TrackSession] stop() ignored while {}", self.status());
                return false;
            }
        };

        let ended_at = self.clock.now();
        let (path, fix_errors) = recording.close();
        self.source.unsubscribe(recording.handle);

        info!(
            "[TrackSession] Recording stopped: {} points, {} failed fixes",
            path.len(),
            fix_errors
        );

        self.state = SessionState::Stopped(StoppedTrack {
            started_at: recording.started_at,
            ended_at,
            path,
            fix_errors,
        });
        true
    }

    /// Abandon the session from any state, releasing the sensor if it is held.
    pub fn discard(&mut self) {
        let previous = std::mem::replace(&mut self.state, SessionState::Discarded);
        if let SessionState::Recording(recording) = previous {
            recording.close();
            self.source.unsubscribe(recording.handle);
            info!("[TrackSession] Recording discarded");
        }
    }

    /// Number of coordinates captured so far.
    pub fn points_recorded(&self) -> usize {
        match &self.state {
            SessionState::Recording(recording) => lock(&recording.buffer).path.len(),
            SessionState::Stopped(track) => track.path.len(),
            SessionState::Idle | SessionState::Discarded => 0,
        }
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        match &self.state {
            SessionState::Recording(recording) => Some(recording.started_at),
            SessionState::Stopped(track) => Some(track.started_at),
            SessionState::Idle | SessionState::Discarded => None,
        }
    }

    /// Copy of the path captured so far.
    pub fn path_snapshot(&self) -> Path {
        match &self.state {
            SessionState::Recording(recording) => lock(&recording.buffer).path.clone(),
            SessionState::Stopped(track) => track.path.clone(),
            SessionState::Idle | SessionState::Discarded => Path::new(),
        }
    }

    pub fn stopped_track(&self) -> Option<&StoppedTrack> {
        match &self.state {
            SessionState::Stopped(track) => Some(track),
            _ => None,
        }
    }

    /// Submit a stopped session.
    ///
    /// On success the session is disposed. On failure it stays `Stopped` with its path intact
    /// so the same capture can be submitted again.
    pub async fn submit<S: TrailStore>(
        &mut self,
        submitter: &TrailSubmitter<S>,
    ) -> Result<TrailId, TrailError> {
        let track = match &self.state {
            SessionState::Stopped(track) => track,
            _ => {
                return Err(TrailError::InvalidTransition {
                    from: self.status(),
                    action: "submit",
                })
            }
        };

        let id = submitter.submit(track).await?;
        self.state = SessionState::Discarded;
        Ok(id)
    }

    /// Dispose of the session after `track` was submitted without holding the session.
    ///
    /// Only applies while the session is still `Stopped` with that same track; returns false if
    /// it was discarded or replaced in the meantime.
    pub fn mark_submitted(&mut self, track: &StoppedTrack) -> bool {
        match &self.state {
            SessionState::Stopped(current) if current == track => {
                self.state = SessionState::Discarded;
                true
            }
            _ => false,
        }
    }
}

impl Drop for TrackSession {
    fn drop(&mut self) {
        if let SessionState::Recording(ref recording) = self.state {
            recording.close();
            self.source.unsubscribe(recording.handle);
            debug!("[TrackSession] Released sensor on drop");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::position::tests::FakeHardware;
    use crate::position::PushPositionSource;
    use crate::Coordinate;
    use chrono::{Duration, TimeZone};
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) struct ManualClock(Mutex<DateTime<Utc>>);

    impl ManualClock {
        pub(crate) fn new(start: DateTime<Utc>) -> Self {
            Self(Mutex::new(start))
        }

        pub(crate) fn advance(&self, by: Duration) {
            let mut now = lock(&self.0);
            *now = *now + by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *lock(&self.0)
        }
    }

    /// Keeps every sink it is handed, even after unsubscribe, to simulate in-flight callbacks.
    #[derive(Default)]
    struct LeakySource {
        sinks: Mutex<Vec<Arc<dyn PositionSink>>>,
        unsubscribed: AtomicUsize,
    }

    impl PositionSource for LeakySource {
        fn subscribe(
            &self,
            sink: Arc<dyn PositionSink>,
            _options: &PositionOptions,
        ) -> Result<SubscriptionHandle, TrailError> {
            lock(&self.sinks).push(sink);
            Ok(SubscriptionHandle::new(7))
        }

        fn unsubscribe(&self, _handle: SubscriptionHandle) {
            self.unsubscribed.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl LeakySource {
        fn late_fix(&self, fix: Fix) {
            for sink in lock(&self.sinks).iter() {
                sink.on_position(fix);
            }
        }
    }

    struct NoSensor;

    impl PositionSource for NoSensor {
        fn is_supported(&self) -> bool {
            false
        }

        fn subscribe(
            &self,
            _sink: Arc<dyn PositionSink>,
            _options: &PositionOptions,
        ) -> Result<SubscriptionHandle, TrailError> {
            Err(TrailError::UnsupportedSensor)
        }

        fn unsubscribe(&self, _handle: SubscriptionHandle) {}
    }

    pub(crate) fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 14, 8, 30, 0).unwrap()
    }

    fn push_session() -> (Arc<PushPositionSource<FakeHardware>>, Arc<ManualClock>, TrackSession) {
        let source = Arc::new(PushPositionSource::new(FakeHardware::default()));
        let clock = Arc::new(ManualClock::new(t0()));
        let session = TrackSession::new(source.clone(), PositionOptions::default())
            .with_clock(clock.clone());
        (source, clock, session)
    }

    #[test]
    fn test_start_records_and_stop_releases() {
        let (source, clock, mut session) = push_session();
        assert_eq!(session.status(), SessionStatus::Idle);
        assert_eq!(session.points_recorded(), 0);

        session.start().unwrap();
        assert_eq!(session.status(), SessionStatus::Recording);
        assert_eq!(session.started_at(), Some(t0()));
        assert_eq!(source.hardware().engaged.load(Ordering::SeqCst), 1);

        source.push_fix(Fix::new(0.0, 0.0));
        source.push_fix(Fix::new(0.0, 0.0));
        source.push_fix(Fix::new(0.0, 1.0));
        assert_eq!(session.points_recorded(), 3);

        clock.advance(Duration::minutes(4));
        assert!(session.stop());
        assert_eq!(session.status(), SessionStatus::Stopped);
        assert_eq!(source.hardware().released.load(Ordering::SeqCst), 1);

        let track = session.stopped_track().unwrap();
        // raw capture: duplicates are kept
        assert_eq!(
            track.path().coordinates(),
            &[
                Coordinate::new(0.0, 0.0),
                Coordinate::new(0.0, 0.0),
                Coordinate::new(0.0, 1.0)
            ]
        );
        assert_eq!(track.duration_minutes(), Ok(4));
    }

    #[test]
    fn test_start_while_recording_is_rejected() {
        let (source, _clock, mut session) = push_session();
        session.start().unwrap();

        assert_eq!(
            session.start(),
            Err(TrailError::InvalidTransition {
                from: SessionStatus::Recording,
                action: "start",
            })
        );
        assert_eq!(session.status(), SessionStatus::Recording);
        assert_eq!(source.hardware().engaged.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stopped_session_cannot_resume() {
        let (_source, _clock, mut session) = push_session();
        session.start().unwrap();
        session.stop();

        assert!(matches!(
            session.start(),
            Err(TrailError::InvalidTransition {
                from: SessionStatus::Stopped,
                ..
            })
        ));
    }

    #[test]
    fn test_stop_is_a_noop_outside_recording() {
        let (source, _clock, mut session) = push_session();
        assert!(!session.stop());
        assert_eq!(session.status(), SessionStatus::Idle);

        session.start().unwrap();
        source.push_fix(Fix::new(1.0, 1.0));
        assert!(session.stop());
        assert!(!session.stop());
        assert_eq!(session.status(), SessionStatus::Stopped);
        assert_eq!(session.points_recorded(), 1);
        assert_eq!(source.hardware().released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsupported_sensor_stays_idle() {
        let mut session = TrackSession::new(Arc::new(NoSensor), PositionOptions::default());
        assert_eq!(session.start(), Err(TrailError::UnsupportedSensor));
        assert_eq!(session.status(), SessionStatus::Idle);
    }

    #[test]
    fn test_busy_sensor_stays_idle() {
        let source = Arc::new(PushPositionSource::new(FakeHardware::default()));
        let mut first = TrackSession::new(source.clone(), PositionOptions::default());
        let mut second = TrackSession::new(source.clone(), PositionOptions::default());

        first.start().unwrap();
        assert_eq!(second.start(), Err(TrailError::SensorBusy));
        assert_eq!(second.status(), SessionStatus::Idle);
    }

    #[test]
    fn test_no_append_after_stop() {
        let leaky = Arc::new(LeakySource::default());
        let mut session = TrackSession::new(leaky.clone(), PositionOptions::default());
        session.start().unwrap();
        leaky.late_fix(Fix::new(1.0, 1.0));
        session.stop();

        leaky.late_fix(Fix::new(2.0, 2.0));
        assert_eq!(session.points_recorded(), 1);
        assert_eq!(leaky.unsubscribed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_no_append_after_discard() {
        let leaky = Arc::new(LeakySource::default());
        let mut session = TrackSession::new(leaky.clone(), PositionOptions::default());
        session.start().unwrap();
        leaky.late_fix(Fix::new(1.0, 1.0));
        session.discard();

        leaky.late_fix(Fix::new(2.0, 2.0));
        assert_eq!(session.status(), SessionStatus::Discarded);
        assert_eq!(session.points_recorded(), 0);
        assert!(session.path_snapshot().is_empty());
        assert_eq!(leaky.unsubscribed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_discard_is_terminal() {
        let (source, _clock, mut session) = push_session();
        session.start().unwrap();
        session.discard();
        assert_eq!(source.hardware().released.load(Ordering::SeqCst), 1);

        assert!(session.start().is_err());
        assert!(!session.stop());
        session.discard();
        assert_eq!(source.hardware().released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_releases_sensor() {
        let (source, _clock, mut session) = push_session();
        session.start().unwrap();
        drop(session);
        assert_eq!(source.hardware().released.load(Ordering::SeqCst), 1);
        assert!(!source.is_active());
    }

    #[test]
    fn test_fix_errors_are_absorbed() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_cb = Arc::clone(&seen);
        let source = Arc::new(PushPositionSource::new(FakeHardware::default()));
        let mut session = TrackSession::new(source.clone(), PositionOptions::default())
            .with_advisory(Arc::new(move |_err: &FixError| {
                seen_cb.fetch_add(1, Ordering::SeqCst);
            }));

        session.start().unwrap();
        source.push_fix(Fix::new(1.0, 1.0));
        source.push_error(FixError::Timeout);
        source.push_error(FixError::PositionUnavailable);
        source.push_fix(Fix::new(1.0, 2.0));

        assert_eq!(session.status(), SessionStatus::Recording);
        assert_eq!(seen.load(Ordering::SeqCst), 2);

        session.stop();
        let track = session.stopped_track().unwrap();
        assert_eq!(track.path().len(), 2);
        assert_eq!(track.fix_errors(), 2);
    }

    #[test]
    fn test_clock_skew_surfaces_invalid_interval() {
        let (_source, clock, mut session) = push_session();
        session.start().unwrap();
        clock.advance(Duration::minutes(-3));
        session.stop();

        let track = session.stopped_track().unwrap();
        assert!(matches!(
            track.duration_minutes(),
            Err(TrailError::InvalidInterval { .. })
        ));
    }

    #[test]
    fn test_mark_submitted_requires_same_stopped_track() {
        let (source, clock, mut session) = push_session();
        session.start().unwrap();
        source.push_fix(Fix::new(0.0, 0.0));
        source.push_fix(Fix::new(0.0, 1.0));
        clock.advance(Duration::minutes(2));
        session.stop();

        let track = session.stopped_track().unwrap().clone();
        let other = StoppedTrack::new(t0(), t0(), Path::new());
        assert!(!session.mark_submitted(&other));
        assert_eq!(session.status(), SessionStatus::Stopped);

        assert!(session.mark_submitted(&track));
        assert_eq!(session.status(), SessionStatus::Discarded);
        assert!(!session.mark_submitted(&track));
    }

    #[test]
    fn test_discard_during_detached_submit_wins() {
        let (source, _clock, mut session) = push_session();
        session.start().unwrap();
        source.push_fix(Fix::new(0.0, 0.0));
        session.stop();

        let track = session.stopped_track().unwrap().clone();
        session.discard();
        assert!(!session.mark_submitted(&track));
        assert_eq!(session.status(), SessionStatus::Discarded);
    }
}
