//! Persistence collaborator seam.
//!
//! The trail API is an external service; the core only needs to hand it a [`TrailRecord`] and
//! get an identifier back. [`crate::http::TrailApiClient`] is the production implementation.

use std::future::Future;
use std::sync::Arc;

use crate::record::TrailRecord;
use crate::StoreError;

/// Server-assigned identifier of a persisted trail.
pub type TrailId = String;

/// Anything that can persist a finished trail.
pub trait TrailStore: Send + Sync {
    fn create_trail(
        &self,
        record: &TrailRecord,
    ) -> impl Future<Output = Result<TrailId, StoreError>> + Send;
}

impl<S: TrailStore> TrailStore for Arc<S> {
    fn create_trail(
        &self,
        record: &TrailRecord,
    ) -> impl Future<Output = Result<TrailId, StoreError>> + Send {
        (**self).create_trail(record)
    }
}
