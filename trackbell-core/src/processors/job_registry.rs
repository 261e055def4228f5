//! JobRegistry processor.
//!
//! The JobRegistry is responsible for:
//! - Keeping exactly one polling job per tracking key, however many
//!   subscribers share it
//! - Firing each job on a fixed interval: fetch, store the delta, notify
//!   subscribers when something new arrived
//! - Cancelling a job once its last subscriber is gone
//! - Recreating jobs for every tracked key at startup
//!
//! Each job is its own task, so fires of one key are strictly sequential
//! while different keys run concurrently. A fire that overruns the interval
//! collapses the ticks it missed into a single immediate fire.

use crate::entities::{ListTrackedKeys, TrackingKey};
use crate::framework::DatabaseProcessor;
use crate::processors::ingestion::{IngestError, IngestionEngine};
use crate::processors::notifier::{Notifier, UpdateKind};
use kanau::processor::Processor;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

// ---------------------------------------------------------------------------
// Public data types
// ---------------------------------------------------------------------------

/// When a newly created job fires for the first time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirstFire {
    /// Right away. Used when a subscriber registers a new key.
    Immediate,
    /// One interval from now. Used when rebuilding jobs at startup.
    AfterInterval,
}

/// Result of [`JobRegistry::ensure_job`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Created,
    Existing,
}

/// Point-in-time view of one job.
#[derive(Debug, Clone)]
pub struct JobSnapshot {
    pub key: TrackingKey,
    pub interval: Duration,
    pub next_fire_at: Instant,
    pub in_flight: bool,
    pub completed_fires: u64,
}

// ---------------------------------------------------------------------------
// Internal job bookkeeping
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct JobState {
    next_fire_at: Instant,
    in_flight: bool,
    completed_fires: u64,
}

type SharedState = Arc<StdMutex<JobState>>;

struct Job {
    cancel_tx: watch::Sender<bool>,
    state: SharedState,
    handle: JoinHandle<()>,
}

impl Job {
    fn stop(self) {
        self.cancel_tx.send_replace(true);
        // Dropping the handle detaches the task; it exits at its next
        // cancellation check without interrupting an in-flight fire.
        drop(self.handle);
    }
}

fn with_state<R>(state: &SharedState, f: impl FnOnce(&mut JobState) -> R) -> R {
    let mut guard = state.lock().unwrap_or_else(PoisonError::into_inner);
    f(&mut guard)
}

// ---------------------------------------------------------------------------
// JobRegistry
// ---------------------------------------------------------------------------

/// JobRegistry owns the polling jobs, one per tracked key.
pub struct JobRegistry {
    jobs: Mutex<HashMap<TrackingKey, Job>>,
    ingestion: Arc<IngestionEngine>,
    notifier: Arc<Notifier>,
    interval: Duration,
}

impl JobRegistry {
    /// Create a new JobRegistry.
    ///
    /// # Arguments
    ///
    /// * `ingestion` - Engine every fire runs
    /// * `notifier` - Receives the delta of every fire that found new events
    /// * `interval` - Polling interval shared by all jobs
    pub fn new(
        ingestion: Arc<IngestionEngine>,
        notifier: Arc<Notifier>,
        interval: Duration,
    ) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            ingestion,
            notifier,
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    /// Make sure a job exists for `key`.
    ///
    /// An existing job keeps its schedule untouched.
    pub async fn ensure_job(&self, key: &TrackingKey, first_fire: FirstFire) -> JobStatus {
        let mut jobs = self.jobs.lock().await;
        if jobs.contains_key(key) {
            debug!(%key, "Job already scheduled");
            return JobStatus::Existing;
        }

        let first_deadline = match first_fire {
            FirstFire::Immediate => Instant::now(),
            FirstFire::AfterInterval => Instant::now() + self.interval,
        };
        let state = Arc::new(StdMutex::new(JobState {
            next_fire_at: first_deadline,
            in_flight: false,
            completed_fires: 0,
        }));
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let handle = tokio::spawn(run_job(
            key.clone(),
            self.interval,
            self.ingestion.clone(),
            self.notifier.clone(),
            state.clone(),
            cancel_rx,
        ));
        jobs.insert(
            key.clone(),
            Job {
                cancel_tx,
                state,
                handle,
            },
        );

        info!(%key, ?first_fire, interval = ?self.interval, "Scheduled tracking job");
        JobStatus::Created
    }

    /// Stop and remove the job of `key`. Returns whether there was one.
    pub async fn cancel_job(&self, key: &TrackingKey) -> bool {
        let job = self.jobs.lock().await.remove(key);
        match job {
            Some(job) => {
                job.stop();
                info!(%key, "Cancelled tracking job");
                true
            }
            None => false,
        }
    }

    /// Create a job for every key that has at least one subscription.
    ///
    /// Jobs created here wait one full interval before their first fire.
    /// Returns how many jobs were created.
    pub async fn rehydrate(&self, db: &DatabaseProcessor) -> Result<usize, sqlx::Error> {
        let keys = db.process(ListTrackedKeys).await?;
        let mut created = 0;
        for key in &keys {
            if self.ensure_job(key, FirstFire::AfterInterval).await == JobStatus::Created {
                created += 1;
            }
        }
        info!(tracked = keys.len(), created, "Rehydrated tracking jobs");
        Ok(created)
    }

    pub async fn snapshot(&self, key: &TrackingKey) -> Option<JobSnapshot> {
        let jobs = self.jobs.lock().await;
        let job = jobs.get(key)?;
        Some(with_state(&job.state, |state| JobSnapshot {
            key: key.clone(),
            interval: self.interval,
            next_fire_at: state.next_fire_at,
            in_flight: state.in_flight,
            completed_fires: state.completed_fires,
        }))
    }

    /// Keys with a live job, sorted by their display form.
    pub async fn active_keys(&self) -> Vec<TrackingKey> {
        let mut keys: Vec<TrackingKey> = self.jobs.lock().await.keys().cloned().collect();
        keys.sort_by_cached_key(|key| key.to_string());
        keys
    }

    /// Cancel every job. Returns how many were running.
    pub async fn shutdown(&self) -> usize {
        let jobs: Vec<Job> = self.jobs.lock().await.drain().map(|(_, job)| job).collect();
        let count = jobs.len();
        for job in jobs {
            job.cancel_tx.send_replace(true);
            job.handle.abort();
        }
        info!(jobs = count, "JobRegistry shutdown complete");
        count
    }
}

// ---------------------------------------------------------------------------
// Job task
// ---------------------------------------------------------------------------

async fn run_job(
    key: TrackingKey,
    interval: Duration,
    ingestion: Arc<IngestionEngine>,
    notifier: Arc<Notifier>,
    state: SharedState,
    mut cancel_rx: watch::Receiver<bool>,
) {
    let mut deadline = with_state(&state, |state| state.next_fire_at);

    loop {
        tokio::select! {
            biased;

            // Either a cancellation or a dropped registry; both end the job.
            _ = cancel_rx.changed() => break,

            _ = tokio::time::sleep_until(deadline) => {}
        }
        if *cancel_rx.borrow() {
            break;
        }

        with_state(&state, |state| state.in_flight = true);
        fire(&key, &ingestion, &notifier, &cancel_rx).await;

        deadline = next_deadline(deadline, interval, Instant::now());
        with_state(&state, |state| {
            state.in_flight = false;
            state.completed_fires += 1;
            state.next_fire_at = deadline;
        });
    }

    debug!(%key, "Tracking job stopped");
}

async fn fire(
    key: &TrackingKey,
    ingestion: &IngestionEngine,
    notifier: &Notifier,
    cancel_rx: &watch::Receiver<bool>,
) {
    debug!(%key, "Polling carrier");
    let events = match ingestion.ingest_unless_cancelled(key, cancel_rx).await {
        Ok(Some(events)) if !events.is_empty() => events,
        Ok(_) => return,
        // Already logged by the engine; the job keeps its normal interval.
        Err(IngestError::FetchFailed(_)) => return,
        Err(e) => {
            error!(%key, error = %e, "Failed to store tracking events");
            return;
        }
    };

    if let Err(e) = notifier.notify(key, &events, UpdateKind::New).await {
        warn!(%key, error = %e, "Failed to load subscribers for fan-out");
    }
}

/// Deadline following `previous`.
///
/// Ticks that passed while a fire was running are not replayed one by one:
/// the latest missed tick on the schedule is returned, so the job fires once
/// immediately and then keeps its original phase.
pub(crate) fn next_deadline(previous: Instant, interval: Duration, now: Instant) -> Instant {
    let next = previous + interval;
    if next > now {
        return next;
    }
    let missed = now.duration_since(previous).as_nanos() / interval.as_nanos().max(1);
    u32::try_from(missed)
        .ok()
        .and_then(|missed| interval.checked_mul(missed))
        .map_or(now, |behind| previous + behind)
}
