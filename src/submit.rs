//! Trail submission.
//!
//! Turns a [`StoppedTrack`] into a [`TrailRecord`] and hands it to a [`TrailStore`]. The track is
//! only borrowed: a failed submission leaves the capture untouched for a retry, since a GPS
//! recording cannot be redone after the fact.

use log::{info, warn};

use crate::record::{DeviceEnvironment, TrailRecord};
use crate::session::StoppedTrack;
use crate::store::{TrailId, TrailStore};
use crate::TrailError;

pub struct TrailSubmitter<S> {
    store: S,
    device: DeviceEnvironment,
}

impl<S: TrailStore> TrailSubmitter<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            device: DeviceEnvironment::detect(),
        }
    }

    pub fn with_device(mut self, device: DeviceEnvironment) -> Self {
        self.device = device;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Persist a stopped track and return the id the store assigned.
    ///
    /// Validation failures ([`TrailError::InsufficientData`], [`TrailError::InvalidInterval`])
    /// are returned before the store is contacted.
    pub async fn submit(&self, track: &StoppedTrack) -> Result<TrailId, TrailError> {
        let record = TrailRecord::build(track, &self.device)?;
        let distance_km = record.distance_km();
        let duration_min = record.duration_minutes()?;

        info!(
            "[TrailSubmitter] Submitting trail for {}: {} points, {:.2} km, {} min",
            record.date(),
            record.device_info().points_recorded,
            distance_km,
            duration_min
        );

        match self.store.create_trail(&record).await {
            Ok(id) => {
                info!("[TrailSubmitter] Trail saved as {}", id);
                Ok(id)
            }
            Err(cause) => {
                warn!("[TrailSubmitter] Save failed, keeping track for retry: {}", cause);
                Err(TrailError::Submit { cause })
            }
        }
    }
}
