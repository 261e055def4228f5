//! Registration orchestration.
//!
//! The Tracker is the contract the chat front-end talks to. It keeps the
//! subscription table, the job registry and the event history consistent:
//! - a key has a job exactly while at least one subscription references it
//! - releasing the last subscription of a key also drops its history
//! - joining a key that is already tracked replays the stored history to the
//!   newcomer instead of waiting for the next fire
//!
//! Every write touching a key runs under that key's lock.

use crate::entities::{
    CarrierName, GetDisplayNameForKey, GetEventHistory, GetSubscriptionByDisplayName,
    InsertSubscription, ListSubscriptionsForSubscriber, SubscriberId, Subscription,
    TrackingEvent, TrackingKey,
};
use crate::framework::DatabaseProcessor;
use crate::processors::{FanoutReport, FirstFire, JobRegistry, JobStatus, Notifier, UpdateKind};
use crate::utils::KeyedLocks;
use kanau::processor::Processor;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Errors that can occur during registration.
#[derive(Debug, Error)]
pub enum RegisterError {
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),

    /// The subscriber already tracks this parcel.
    #[error("this parcel is already tracked as \"{existing_name}\"")]
    DuplicateTrackingNumber { existing_name: String },

    /// The subscriber already uses this name for another parcel.
    #[error("this name is already used for tracking number {existing_tracking_number}")]
    DuplicateDisplayName { existing_tracking_number: String },

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Errors that can occur while replaying stored history.
#[derive(Debug, Error)]
pub enum ExistingInfoError {
    #[error("no parcel named \"{0}\"")]
    NotFound(String),

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Outcome of [`Tracker::register`].
#[derive(Debug, Clone)]
pub struct Registration {
    pub key: TrackingKey,
    pub job: JobStatus,
    /// Delivery of the stored history, when the key was already tracked.
    pub snapshot: Option<FanoutReport>,
}

/// Outcome of [`Tracker::unregister`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unregistration {
    /// A subscription row was deleted.
    pub removed: bool,
    /// It was the last one: the job is gone and the history dropped.
    pub released: bool,
}

/// Outcome of [`Tracker::request_existing_info`].
#[derive(Debug, Clone)]
pub struct ExistingInfo {
    pub key: TrackingKey,
    pub events: Vec<TrackingEvent>,
    pub report: FanoutReport,
}

pub struct Tracker {
    db: DatabaseProcessor,
    locks: Arc<KeyedLocks<TrackingKey>>,
    registry: Arc<JobRegistry>,
    notifier: Arc<Notifier>,
}

impl Tracker {
    /// Create a new Tracker.
    ///
    /// `locks` must be the same set the ingestion engine uses.
    pub fn new(
        db: DatabaseProcessor,
        locks: Arc<KeyedLocks<TrackingKey>>,
        registry: Arc<JobRegistry>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            db,
            locks,
            registry,
            notifier,
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Subscribe `subscriber_id` to a parcel under `display_name`.
    ///
    /// A new key gets a job that fires immediately. A key that is already
    /// tracked keeps its schedule, and the subscriber receives the stored
    /// history right away.
    pub async fn register(
        &self,
        subscriber_id: SubscriberId,
        tracking_number: &str,
        carrier: CarrierName,
        display_name: &str,
    ) -> Result<Registration, RegisterError> {
        let tracking_number = tracking_number.trim();
        let display_name = display_name.trim();
        if tracking_number.is_empty() {
            return Err(RegisterError::InvalidInput("tracking number must not be empty"));
        }
        if display_name.is_empty() {
            return Err(RegisterError::InvalidInput("display name must not be empty"));
        }

        let key = TrackingKey::new(tracking_number, carrier);
        let guard = self.locks.lock(&key).await;

        if let Err(e) = self.insert_subscription(subscriber_id, &key, display_name).await {
            // A rejected key may have no job; keep its lock from lingering.
            drop(guard);
            self.locks.prune(&key);
            return Err(e);
        }

        let job = self.registry.ensure_job(&key, FirstFire::Immediate).await;
        drop(guard);
        info!(%key, subscriber_id, display_name, ?job, "Registered subscription");

        let snapshot = match job {
            JobStatus::Created => None,
            JobStatus::Existing => self.replay_history(subscriber_id, &key).await,
        };

        Ok(Registration { key, job, snapshot })
    }

    /// Remove one subscription. Idempotent.
    ///
    /// When no subscription references the key anymore, its history is
    /// deleted in the same transaction and its job is cancelled.
    pub async fn unregister(
        &self,
        subscriber_id: SubscriberId,
        tracking_number: &str,
        carrier: CarrierName,
    ) -> Result<Unregistration, sqlx::Error> {
        let key = TrackingKey::new(tracking_number.trim(), carrier);
        let guard = self.locks.lock(&key).await;

        let mut tx = self.db.pool.begin().await?;
        let removed = Subscription::delete_tx(&mut tx, subscriber_id, &key).await? > 0;
        let remaining = Subscription::count_for_key_tx(&mut tx, &key).await?;
        let unreferenced = remaining == 0;
        if unreferenced {
            TrackingEvent::delete_history_tx(&mut tx, &key).await?;
        }
        tx.commit().await?;

        if unreferenced {
            self.registry.cancel_job(&key).await;
        }
        drop(guard);
        if unreferenced {
            self.locks.prune(&key);
        }

        let outcome = Unregistration {
            removed,
            released: removed && unreferenced,
        };
        if removed {
            info!(%key, subscriber_id, released = outcome.released, "Removed subscription");
        }
        Ok(outcome)
    }

    /// Send a subscriber everything stored for the parcel they named
    /// `display_name`, without fetching.
    pub async fn request_existing_info(
        &self,
        subscriber_id: SubscriberId,
        display_name: &str,
    ) -> Result<ExistingInfo, ExistingInfoError> {
        let display_name = display_name.trim();
        let subscription = self
            .db
            .process(GetSubscriptionByDisplayName {
                subscriber_id,
                display_name: display_name.to_string(),
            })
            .await?
            .ok_or_else(|| ExistingInfoError::NotFound(display_name.to_string()))?;

        let key = subscription.key();
        let events = self
            .db
            .process(GetEventHistory { key: key.clone() })
            .await?;
        let report = self
            .notifier
            .notify_subscriber(subscriber_id, &key, &events, UpdateKind::Existing)
            .await?;

        Ok(ExistingInfo {
            key,
            events,
            report,
        })
    }

    pub async fn list_subscriptions(
        &self,
        subscriber_id: SubscriberId,
    ) -> Result<Vec<Subscription>, sqlx::Error> {
        self.db
            .process(ListSubscriptionsForSubscriber { subscriber_id })
            .await
    }

    /// Rebuild the jobs of every tracked key. Call once at startup.
    pub async fn rehydrate(&self) -> Result<usize, sqlx::Error> {
        self.registry.rehydrate(&self.db).await
    }

    // -- Private helpers ----------------------------------------------------

    async fn insert_subscription(
        &self,
        subscriber_id: SubscriberId,
        key: &TrackingKey,
        display_name: &str,
    ) -> Result<(), RegisterError> {
        self.check_duplicates(subscriber_id, key, display_name).await?;
        let inserted = self
            .db
            .process(InsertSubscription {
                subscriber_id,
                key: key.clone(),
                display_name: display_name.to_string(),
            })
            .await;
        match inserted {
            Ok(()) => Ok(()),
            Err(e) => Err(self.classify_insert_error(e, subscriber_id, key, display_name).await),
        }
    }

    async fn check_duplicates(
        &self,
        subscriber_id: SubscriberId,
        key: &TrackingKey,
        display_name: &str,
    ) -> Result<(), RegisterError> {
        let existing_name = self
            .db
            .process(GetDisplayNameForKey {
                subscriber_id,
                key: key.clone(),
            })
            .await?;
        if let Some(existing_name) = existing_name {
            return Err(RegisterError::DuplicateTrackingNumber { existing_name });
        }

        let named = self
            .db
            .process(GetSubscriptionByDisplayName {
                subscriber_id,
                display_name: display_name.to_string(),
            })
            .await?;
        if let Some(named) = named {
            return Err(RegisterError::DuplicateDisplayName {
                existing_tracking_number: named.tracking_number,
            });
        }
        Ok(())
    }

    /// A concurrent registration of the same subscriber under another key
    /// can still win the race for the display name; map the constraint
    /// violation back to the matching duplicate error.
    async fn classify_insert_error(
        &self,
        error: sqlx::Error,
        subscriber_id: SubscriberId,
        key: &TrackingKey,
        display_name: &str,
    ) -> RegisterError {
        let unique_violation =
            matches!(&error, sqlx::Error::Database(e) if e.is_unique_violation());
        if !unique_violation {
            return error.into();
        }
        match self.check_duplicates(subscriber_id, key, display_name).await {
            Ok(()) => error.into(),
            Err(duplicate) => duplicate,
        }
    }

    async fn replay_history(
        &self,
        subscriber_id: SubscriberId,
        key: &TrackingKey,
    ) -> Option<FanoutReport> {
        let events = self.db.process(GetEventHistory { key: key.clone() }).await;
        let report = match events {
            Ok(events) => {
                self.notifier
                    .notify_subscriber(subscriber_id, key, &events, UpdateKind::Existing)
                    .await
            }
            Err(e) => Err(e),
        };
        match report {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(%key, subscriber_id, error = %e, "Failed to replay stored history");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::IngestionEngine;
    use crate::testing::{FakeGateway, RecordingMessenger, eventually, memory_db, oca_key};
    use std::time::Duration;
    use time::macros::datetime;

    struct Fixture {
        db: DatabaseProcessor,
        gateway: Arc<FakeGateway>,
        messenger: Arc<RecordingMessenger>,
        locks: Arc<KeyedLocks<TrackingKey>>,
        tracker: Tracker,
    }

    async fn fixture() -> Fixture {
        fixture_on(memory_db().await)
    }

    fn fixture_on(db: DatabaseProcessor) -> Fixture {
        let gateway = Arc::new(FakeGateway::new());
        let messenger = Arc::new(RecordingMessenger::new());
        let locks = Arc::new(KeyedLocks::new());

        let notifier = Arc::new(Notifier::new(db.clone(), messenger.clone()));
        let ingestion = Arc::new(IngestionEngine::new(
            db.clone(),
            gateway.clone(),
            locks.clone(),
            Duration::from_secs(10),
        ));
        let registry = Arc::new(JobRegistry::new(
            ingestion,
            notifier.clone(),
            Duration::from_secs(3600),
        ));
        let tracker = Tracker::new(db.clone(), locks.clone(), registry, notifier);
        Fixture {
            db,
            gateway,
            messenger,
            locks,
            tracker,
        }
    }

    fn two_events() -> Vec<TrackingEvent> {
        vec![
            TrackingEvent::new(datetime!(2024-01-01 0:00 UTC), "Picked up", "DepotA"),
            TrackingEvent::new(datetime!(2024-01-02 0:00 UTC), "Delivered", "DepotB"),
        ]
    }

    async fn history_len(f: &Fixture, number: &str) -> usize {
        f.db
            .process(GetEventHistory {
                key: oca_key(number),
            })
            .await
            .unwrap()
            .len()
    }

    #[tokio::test]
    async fn test_first_registration_fetches_immediately() {
        let fx = fixture().await;
        let f = &fx;
        f.gateway.set_events(two_events());

        let registration = f
            .tracker
            .register(1, " 100 ", CarrierName::Oca, " Shoes ")
            .await
            .unwrap();
        assert_eq!(registration.job, JobStatus::Created);
        assert_eq!(registration.key, oca_key("100"));
        assert!(registration.snapshot.is_none());

        eventually(|| async move { f.messenger.sent_to(1).len() == 1 }).await;
        let text = &f.messenger.sent_to(1)[0];
        assert!(text.starts_with("New tracking information for your parcel: Shoes (100)"));
        assert_eq!(history_len(f, "100").await, 2);
        f.tracker.registry().shutdown().await;
    }

    #[tokio::test]
    async fn test_duplicates_are_rejected() {
        let fx = fixture().await;
        let f = &fx;
        f.tracker
            .register(1, "100", CarrierName::Oca, "Shoes")
            .await
            .unwrap();

        let err = f
            .tracker
            .register(1, "100", CarrierName::Oca, "Other")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RegisterError::DuplicateTrackingNumber { ref existing_name } if existing_name == "Shoes"
        ));

        let err = f
            .tracker
            .register(1, "200", CarrierName::Oca, "Shoes")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RegisterError::DuplicateDisplayName { ref existing_tracking_number }
                if existing_tracking_number == "100"
        ));

        // Names are per subscriber.
        f.tracker
            .register(2, "200", CarrierName::Oca, "Shoes")
            .await
            .unwrap();
        assert_eq!(f.tracker.list_subscriptions(1).await.unwrap().len(), 1);
        f.tracker.registry().shutdown().await;
    }

    #[tokio::test]
    async fn test_blank_input_is_rejected() {
        let fx = fixture().await;
        let err = fx
            .tracker
            .register(1, "   ", CarrierName::Oca, "Shoes")
            .await
            .unwrap_err();
        assert!(matches!(err, RegisterError::InvalidInput(_)));

        let err = fx
            .tracker
            .register(1, "100", CarrierName::Oca, "")
            .await
            .unwrap_err();
        assert!(matches!(err, RegisterError::InvalidInput(_)));
        assert!(fx.tracker.registry().active_keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_joining_tracked_key_replays_history_without_fetch() {
        let fx = fixture().await;
        let f = &fx;
        f.gateway.set_events(two_events());
        f.tracker
            .register(1, "100", CarrierName::Oca, "Shoes")
            .await
            .unwrap();
        eventually(|| async move { history_len(f, "100").await == 2 }).await;

        let registration = f
            .tracker
            .register(2, "100", CarrierName::Oca, "Gift")
            .await
            .unwrap();
        assert_eq!(registration.job, JobStatus::Existing);
        let report = registration.snapshot.unwrap();
        assert_eq!(report.delivered, 1);

        let sent = f.messenger.sent_to(2);
        assert_eq!(sent.len(), 1);
        assert!(sent[0].starts_with("Existing tracking information for your parcel: Gift (100)"));
        assert!(sent[0].contains("Picked up") && sent[0].contains("Delivered"));
        assert_eq!(f.gateway.calls(), 1);
        f.tracker.registry().shutdown().await;
    }

    #[tokio::test]
    async fn test_last_unregistration_releases_key() {
        let fx = fixture().await;
        let f = &fx;
        f.gateway.set_events(two_events());
        f.tracker
            .register(1, "100", CarrierName::Oca, "Shoes")
            .await
            .unwrap();
        f.tracker
            .register(2, "100", CarrierName::Oca, "Gift")
            .await
            .unwrap();
        eventually(|| async move { history_len(f, "100").await == 2 }).await;
        let key = oca_key("100");

        let first = f.tracker.unregister(1, "100", CarrierName::Oca).await.unwrap();
        assert_eq!(
            first,
            Unregistration {
                removed: true,
                released: false
            }
        );
        assert!(f.tracker.registry().snapshot(&key).await.is_some());
        assert_eq!(history_len(f, "100").await, 2);

        let last = f.tracker.unregister(2, "100", CarrierName::Oca).await.unwrap();
        assert_eq!(
            last,
            Unregistration {
                removed: true,
                released: true
            }
        );
        assert!(f.tracker.registry().snapshot(&key).await.is_none());
        assert_eq!(history_len(f, "100").await, 0);
        assert!(f.locks.is_empty());

        let again = f.tracker.unregister(2, "100", CarrierName::Oca).await.unwrap();
        assert_eq!(
            again,
            Unregistration {
                removed: false,
                released: false
            }
        );

        // A fresh registration starts over and fetches again.
        let registration = f
            .tracker
            .register(3, "100", CarrierName::Oca, "Again")
            .await
            .unwrap();
        assert_eq!(registration.job, JobStatus::Created);
        eventually(|| async move { f.gateway.calls() == 2 }).await;
        eventually(|| async move { f.messenger.sent_to(3).len() == 1 }).await;
        assert!(f.messenger.sent_to(3)[0].starts_with("New tracking information"));
        f.tracker.registry().shutdown().await;
    }

    #[tokio::test]
    async fn test_request_existing_info_by_display_name() {
        let fx = fixture().await;
        let f = &fx;
        f.gateway.set_events(two_events());
        f.tracker
            .register(1, "100", CarrierName::Oca, "Shoes")
            .await
            .unwrap();
        eventually(|| async move { history_len(f, "100").await == 2 }).await;

        let err = f.tracker.request_existing_info(1, "Hat").await.unwrap_err();
        assert!(matches!(err, ExistingInfoError::NotFound(ref name) if name == "Hat"));

        let info = f.tracker.request_existing_info(1, "Shoes").await.unwrap();
        assert_eq!(info.key, oca_key("100"));
        assert_eq!(info.events, two_events());
        assert_eq!(info.report.delivered, 1);

        let sent = f.messenger.sent_to(1);
        assert_eq!(sent.len(), 2);
        assert!(sent[1].starts_with("Existing tracking information for your parcel: Shoes (100)"));
        f.tracker.registry().shutdown().await;
    }

    #[tokio::test]
    async fn test_existing_info_before_first_fetch() {
        let fx = fixture().await;
        fx.gateway.set_failing();
        fx.tracker
            .register(1, "100", CarrierName::Oca, "Shoes")
            .await
            .unwrap();

        let info = fx.tracker.request_existing_info(1, "Shoes").await.unwrap();
        assert!(info.events.is_empty());
        assert!(fx.messenger.sent_to(1)[0].ends_with("No tracking events recorded yet."));
        fx.tracker.registry().shutdown().await;
    }

    #[tokio::test]
    async fn test_rehydrate_restores_jobs() {
        let fx = fixture().await;
        let rows = [(1, "100", "Shoes"), (2, "100", "Gift"), (2, "300", "Books")];
        for (subscriber_id, number, name) in rows {
            fx.db
                .process(InsertSubscription {
                    subscriber_id,
                    key: oca_key(number),
                    display_name: name.to_string(),
                })
                .await
                .unwrap();
        }

        assert_eq!(fx.tracker.rehydrate().await.unwrap(), 2);
        assert_eq!(
            fx.tracker.registry().active_keys().await,
            vec![oca_key("100"), oca_key("300")]
        );
        assert_eq!(fx.gateway.calls(), 0);
        fx.tracker.registry().shutdown().await;
    }

    #[tokio::test]
    async fn test_rejected_registrations_leave_no_locks() {
        let fx = fixture().await;
        fx.tracker
            .register(1, "100", CarrierName::Oca, "Shoes")
            .await
            .unwrap();

        for i in 0..50 {
            let err = fx
                .tracker
                .register(1, &format!("x{i}"), CarrierName::Oca, "Shoes")
                .await
                .unwrap_err();
            assert!(matches!(err, RegisterError::DuplicateDisplayName { .. }));
        }

        assert_eq!(fx.locks.len(), 1);
        assert_eq!(fx.tracker.registry().active_keys().await, vec![oca_key("100")]);
        fx.tracker.registry().shutdown().await;
    }

    #[tokio::test]
    async fn test_constraint_violation_maps_to_duplicate_error() {
        let fx = fixture().await;
        fx.tracker
            .register(1, "100", CarrierName::Oca, "Shoes")
            .await
            .unwrap();

        // Rows written behind the duplicate checks, as a racing writer would.
        let err = fx
            .db
            .process(InsertSubscription {
                subscriber_id: 1,
                key: oca_key("200"),
                display_name: "Shoes".to_string(),
            })
            .await
            .unwrap_err();
        let mapped = fx
            .tracker
            .classify_insert_error(err, 1, &oca_key("200"), "Shoes")
            .await;
        assert!(matches!(
            mapped,
            RegisterError::DuplicateDisplayName { ref existing_tracking_number }
                if existing_tracking_number == "100"
        ));

        let err = fx
            .db
            .process(InsertSubscription {
                subscriber_id: 1,
                key: oca_key("100"),
                display_name: "Boots".to_string(),
            })
            .await
            .unwrap_err();
        let mapped = fx
            .tracker
            .classify_insert_error(err, 1, &oca_key("100"), "Boots")
            .await;
        assert!(matches!(
            mapped,
            RegisterError::DuplicateTrackingNumber { ref existing_name } if existing_name == "Shoes"
        ));
        fx.tracker.registry().shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_registrations_race_for_one_display_name() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("trackbell.db").display());
        let db = DatabaseProcessor::connect(&url, 4).await.unwrap();
        db.migrate().await.unwrap();
        let fx = fixture_on(db);

        let (first, second) = tokio::join!(
            fx.tracker.register(1, "100", CarrierName::Oca, "Shoes"),
            fx.tracker.register(1, "200", CarrierName::Oca, "Shoes"),
        );
        let (winner, loser) = match (first, second) {
            (Ok(winner), Err(loser)) | (Err(loser), Ok(winner)) => (winner, loser),
            other => panic!("expected exactly one registration to win, got {other:?}"),
        };

        assert!(matches!(
            loser,
            RegisterError::DuplicateDisplayName { ref existing_tracking_number }
                if *existing_tracking_number == winner.key.tracking_number
        ));
        let subscriptions = fx.tracker.list_subscriptions(1).await.unwrap();
        assert_eq!(subscriptions.len(), 1);
        assert_eq!(subscriptions[0].key(), winner.key);
        assert_eq!(fx.tracker.registry().active_keys().await, vec![winner.key]);

        fx.tracker.registry().shutdown().await;
        fx.db.close().await;
    }
}
