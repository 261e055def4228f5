//! IngestionEngine processor.
//!
//! The IngestionEngine is responsible for:
//! - Fetching the current event list of a key from the carrier gateway,
//!   bounded by the fetch timeout
//! - Writing events that are not stored yet (exact tuple match), in carrier
//!   order, inside one transaction
//! - Returning exactly the events that were new
//!
//! This is the only place duplicate detection happens. Feeding the same
//! snapshot twice yields an empty delta the second time.

use crate::carriers::{CarrierGateway, FetchError};
use crate::entities::{TrackingEvent, TrackingKey};
use crate::framework::DatabaseProcessor;
use crate::utils::KeyedLocks;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Errors that can occur during ingestion.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The carrier could not be reached or answered garbage. Nothing was written.
    #[error("fetch failed: {0}")]
    FetchFailed(#[from] FetchError),

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// IngestionEngine turns carrier snapshots into history deltas.
pub struct IngestionEngine {
    db: DatabaseProcessor,
    gateway: Arc<dyn CarrierGateway>,
    locks: Arc<KeyedLocks<TrackingKey>>,
    fetch_timeout: Duration,
}

impl IngestionEngine {
    /// Create a new IngestionEngine.
    ///
    /// # Arguments
    ///
    /// * `db` - Database processor
    /// * `gateway` - Carrier gateway used for fetching
    /// * `locks` - Per-key locks shared with registration and unregistration
    /// * `fetch_timeout` - Upper bound on one carrier fetch
    pub fn new(
        db: DatabaseProcessor,
        gateway: Arc<dyn CarrierGateway>,
        locks: Arc<KeyedLocks<TrackingKey>>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            db,
            gateway,
            locks,
            fetch_timeout,
        }
    }

    /// Fetch `key` and persist the events not seen before.
    ///
    /// Returns the new events in carrier order, possibly empty.
    pub async fn ingest(&self, key: &TrackingKey) -> Result<Vec<TrackingEvent>, IngestError> {
        let fetched = self.fetch(key).await?;
        let _guard = self.locks.lock(key).await;
        Ok(self.persist_new(key, fetched).await?)
    }

    /// Like [`ingest`](Self::ingest), for a job that may be cancelled while
    /// its fetch is in flight.
    ///
    /// The cancellation flag is checked under the key lock, after the fetch.
    /// Returns `None` when the job was cancelled and the snapshot discarded.
    pub async fn ingest_unless_cancelled(
        &self,
        key: &TrackingKey,
        cancelled: &watch::Receiver<bool>,
    ) -> Result<Option<Vec<TrackingEvent>>, IngestError> {
        let fetched = self.fetch(key).await?;
        let guard = self.locks.lock(key).await;
        if *cancelled.borrow() {
            debug!(%key, "Job cancelled while fetching, discarding snapshot");
            // The key may already be released; do not leave its lock behind.
            drop(guard);
            self.locks.prune(key);
            return Ok(None);
        }
        Ok(Some(self.persist_new(key, fetched).await?))
    }

    async fn fetch(&self, key: &TrackingKey) -> Result<Vec<TrackingEvent>, FetchError> {
        let fetch = self.gateway.fetch(&key.tracking_number, key.carrier);
        let result = match tokio::time::timeout(self.fetch_timeout, fetch).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(self.fetch_timeout)),
        };

        if let Err(e) = &result {
            warn!(%key, error = %e, "Carrier fetch failed");
        }
        result
    }

    /// Insert unseen events and collect them, preserving input order.
    async fn persist_new(
        &self,
        key: &TrackingKey,
        fetched: Vec<TrackingEvent>,
    ) -> Result<Vec<TrackingEvent>, sqlx::Error> {
        if fetched.is_empty() {
            debug!(%key, "Carrier reported no events");
            return Ok(Vec::new());
        }

        let fetched_count = fetched.len();
        let mut tx = self.db.pool.begin().await?;
        let mut fresh = Vec::new();
        for event in fetched {
            if TrackingEvent::insert_if_absent_tx(&mut tx, key, &event).await? {
                fresh.push(event);
            }
        }
        tx.commit().await?;

        if fresh.is_empty() {
            debug!(%key, fetched = fetched_count, "No new tracking events");
        } else {
            info!(
                %key,
                fetched = fetched_count,
                new = fresh.len(),
                "Stored new tracking events"
            );
        }
        Ok(fresh)
    }
}
