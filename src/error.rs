//! Error types shared across the crate.
//!
//! Sensor-level failures ([`FixError`](crate::position::FixError)) never appear here: they are
//! absorbed by the session and reported as advisories. Everything in [`TrailError`] is something
//! the caller has to act on.

use thiserror::Error;

use crate::session::SessionStatus;

/// Failure reported by the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// The request never produced a response (DNS, TLS, connection reset, timeout).
    #[error("transport error: {0}")]
    Transport(String),
    /// The server answered with a non-success status.
    #[error("server returned HTTP {code}")]
    Status { code: u16 },
    /// The response body did not match the expected contract.
    #[error("could not decode response: {0}")]
    Decode(String),
}

/// Errors surfaced by the trail-recording core.
#[derive(Debug, Clone, PartialEq, Error)]
#[cfg_attr(feature = "ffi", derive(uniffi::Error))]
#[cfg_attr(feature = "ffi", uniffi(flat_error))]
pub enum TrailError {
    /// The platform exposes no position source.
    #[error("device does not support GPS tracking")]
    UnsupportedSensor,

    /// The location sensor is already held by another subscription.
    #[error("location sensor is already in use")]
    SensorBusy,

    /// The requested operation is not valid in the session's current state.
    #[error("cannot {action} a session that is {from}")]
    InvalidTransition {
        from: SessionStatus,
        action: &'static str,
    },

    /// End timestamp precedes start timestamp.
    #[error("end time {end_ms}ms precedes start time {start_ms}ms")]
    InvalidInterval { start_ms: i64, end_ms: i64 },

    /// A stored trail has no end time, so its duration cannot be derived.
    #[error("trail {id} has no end time")]
    OpenTrail { id: String },

    /// Fewer than two points were recorded.
    #[error("at least 2 GPS points are required, got {points}")]
    InsufficientData { points: usize },

    /// The external store rejected or never received the trail.
    #[error("trail submission failed: {cause}")]
    Submit { cause: StoreError },

    /// Historical trails could not be loaded or deleted.
    #[error("trail request failed: {cause}")]
    Fetch { cause: StoreError },

    #[error("invalid configuration: {0}")]
    Config(String),
}
