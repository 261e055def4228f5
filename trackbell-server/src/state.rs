//! Application state shared across all request handlers.

use std::sync::Arc;
use trackbell_core::carriers::CarrierGateway;
use trackbell_core::config::SchedulerConfig;
use trackbell_core::framework::DatabaseProcessor;
use trackbell_core::messengers::Messenger;
use trackbell_core::processors::{IngestionEngine, JobRegistry, Notifier};
use trackbell_core::tracker::Tracker;
use trackbell_core::utils::KeyedLocks;

/// Application state that is shared across all request handlers.
///
/// This is cloneable and cheap to pass around (everything is behind Arc).
#[derive(Clone)]
pub struct AppState {
    pub tracker: Arc<Tracker>,
}

impl AppState {
    /// Wire the tracking pipeline.
    ///
    /// The notifier is built first so the job registry receives it at
    /// construction; the key locks are shared by ingestion and the tracker.
    pub fn new(
        db: DatabaseProcessor,
        gateway: Arc<dyn CarrierGateway>,
        messenger: Arc<dyn Messenger>,
        scheduler: SchedulerConfig,
    ) -> Self {
        let locks = Arc::new(KeyedLocks::new());
        let notifier = Arc::new(Notifier::new(db.clone(), messenger));
        let ingestion = Arc::new(IngestionEngine::new(
            db.clone(),
            gateway,
            locks.clone(),
            scheduler.fetch_timeout,
        ));
        let registry = Arc::new(JobRegistry::new(
            ingestion,
            notifier.clone(),
            scheduler.interval,
        ));
        let tracker = Tracker::new(db, locks, registry, notifier);
        Self {
            tracker: Arc::new(tracker),
        }
    }
}
