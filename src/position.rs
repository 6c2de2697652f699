//! Device position capture.
//!
//! [`PositionSource`] is the capability a recording session subscribes to. Platform bindings
//! implement it directly, or implement the smaller [`LocationHardware`] trait and let
//! [`PushPositionSource`] handle subscription bookkeeping while the host pushes fixes in as the
//! OS reports them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{lock, Coordinate, TrailError};

/// Settings passed to the platform when a subscription starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct PositionOptions {
    /// Trade latency and battery for precision.
    /// Default: true
    pub high_accuracy: bool,

    /// Fail an individual fix attempt that takes longer than this.
    /// Default: 5000 ms
    pub timeout_ms: u32,

    /// Reject cached fixes older than this; 0 forces a fresh fix.
    /// Default: 0
    pub max_cached_age_ms: u32,
}

impl Default for PositionOptions {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            timeout_ms: 5000,
            max_cached_age_ms: 0,
        }
    }
}

/// A single reported device position.
///
/// Accuracy is informational only; it is not kept in the recorded path.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct Fix {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy radius in meters, when the platform reports one
    pub accuracy_m: Option<f64>,
}

impl Fix {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy_m: None,
        }
    }

    pub fn with_accuracy(mut self, accuracy_m: f64) -> Self {
        self.accuracy_m = Some(accuracy_m);
        self
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }
}

/// A failed position attempt. Never terminates the subscription.
#[derive(Debug, Clone, PartialEq, Error)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum FixError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("position unavailable")]
    PositionUnavailable,
    #[error("timed out waiting for a position fix")]
    Timeout,
    #[error("{message}")]
    Other { message: String },
}

/// Identifies one live subscription on a [`PositionSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

impl SubscriptionHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Receiver side of a subscription.
pub trait PositionSink: Send + Sync {
    fn on_position(&self, fix: Fix);
    fn on_error(&self, error: FixError);
}

/// Continuous device location capability.
///
/// A subscription engages the location hardware until `unsubscribe` is called with its handle.
/// Implementations deliver fixes to the sink in capture order and report individual failures
/// through [`PositionSink::on_error`] without ending the subscription.
pub trait PositionSource: Send + Sync {
    /// Whether the platform has any location capability at all.
    fn is_supported(&self) -> bool {
        true
    }

    fn subscribe(
        &self,
        sink: Arc<dyn PositionSink>,
        options: &PositionOptions,
    ) -> Result<SubscriptionHandle, TrailError>;

    /// Release the subscription. Unknown or already-released handles are ignored.
    fn unsubscribe(&self, handle: SubscriptionHandle);
}

/// The platform half of a [`PushPositionSource`]: switches location updates on and off.
pub trait LocationHardware: Send + Sync {
    fn is_available(&self) -> bool {
        true
    }

    /// Start delivering location updates with the given options.
    fn engage(&self, options: &PositionOptions) -> Result<(), TrailError>;

    /// Stop delivering location updates.
    fn release(&self);
}

struct ActiveSubscription {
    handle: SubscriptionHandle,
    sink: Arc<dyn PositionSink>,
}

/// [`PositionSource`] for hosts whose OS delivers positions by callback.
///
/// Holds at most one subscription; the hardware is engaged on subscribe and released exactly
/// once on unsubscribe. The host forwards OS callbacks with [`push_fix`](Self::push_fix) and
/// [`push_error`](Self::push_error).
pub struct PushPositionSource<H> {
    hardware: H,
    active: Mutex<Option<ActiveSubscription>>,
    next_id: AtomicU64,
}

impl<H: LocationHardware> PushPositionSource<H> {
    pub fn new(hardware: H) -> Self {
        Self {
            hardware,
            active: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn hardware(&self) -> &H {
        &self.hardware
    }

    pub fn is_active(&self) -> bool {
        lock(&self.active).is_some()
    }

    /// Forward a fix to the current subscriber. Returns false when nobody is subscribed.
    pub fn push_fix(&self, fix: Fix) -> bool {
        match self.current_sink() {
            Some(sink) => {
                sink.on_position(fix);
                true
            }
            None => {
                debug!("[PushPositionSource] Dropping fix, no active subscription");
                false
            }
        }
    }

    /// Forward a failed fix attempt to the current subscriber.
    pub fn push_error(&self, error: FixError) -> bool {
        match self.current_sink() {
            Some(sink) => {
                sink.on_error(error);
                true
            }
            None => false,
        }
    }

    // The sink is invoked outside the lock so a callback may unsubscribe.
    fn current_sink(&self) -> Option<Arc<dyn PositionSink>> {
        lock(&self.active).as_ref().map(|sub| Arc::clone(&sub.sink))
    }
}

impl<H: LocationHardware> PositionSource for PushPositionSource<H> {
    fn is_supported(&self) -> bool {
        self.hardware.is_available()
    }

    fn subscribe(
        &self,
        sink: Arc<dyn PositionSink>,
        options: &PositionOptions,
    ) -> Result<SubscriptionHandle, TrailError> {
        // Hardware callbacks never run under the lock.
        if !self.hardware.is_available() {
            return Err(TrailError::UnsupportedSensor);
        }

        let handle = {
            let mut active = lock(&self.active);
            if active.is_some() {
                return Err(TrailError::SensorBusy);
            }
            let handle = SubscriptionHandle::new(self.next_id.fetch_add(1, Ordering::Relaxed));
            *active = Some(ActiveSubscription { handle, sink });
            handle
        };

        // engage may deliver a cached fix synchronously
        if let Err(e) = self.hardware.engage(options) {
            let mut active = lock(&self.active);
            if active.as_ref().is_some_and(|sub| sub.handle == handle) {
                active.take();
            }
            warn!("[PushPositionSource] Failed to engage location updates: {}", e);
            return Err(e);
        }

        info!(
            "[PushPositionSource] Subscription {} engaged (high_accuracy={}, timeout={}ms, max_age={}ms)",
            handle.id(),
            options.high_accuracy,
            options.timeout_ms,
            options.max_cached_age_ms
        );
        Ok(handle)
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        let released = {
            let mut active = lock(&self.active);
            match active.as_ref() {
                Some(sub) if sub.handle == handle => active.take(),
                _ => None,
            }
        };

        if released.is_some() {
            self.hardware.release();
            info!("[PushPositionSource] Subscription {} released", handle.id());
        } else {
            debug!("[PushPositionSource] Ignoring unsubscribe for stale handle {}", handle.id());
        }
    }
}
