//! Fakes and helpers shared by the unit tests.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use crate::carriers::{CarrierGateway, FetchError};
use crate::entities::{CarrierName, SubscriberId, TrackingEvent, TrackingKey};
use crate::framework::DatabaseProcessor;
use crate::messengers::{DeliveryError, Messenger};
use async_trait::async_trait;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub(crate) async fn memory_db() -> DatabaseProcessor {
    let db = DatabaseProcessor::connect_in_memory().await.unwrap();
    db.migrate().await.unwrap();
    db
}

pub(crate) fn oca_key(tracking_number: &str) -> TrackingKey {
    TrackingKey::new(tracking_number, CarrierName::Oca)
}

/// Poll `condition` until it holds, failing the test after about two seconds.
pub(crate) async fn eventually<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

/// Carrier that serves a configurable snapshot. `None` means the carrier is down.
pub(crate) struct FakeGateway {
    snapshot: Mutex<Option<Vec<TrackingEvent>>>,
    delay: Mutex<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeGateway {
    pub(crate) fn new() -> Self {
        Self {
            snapshot: Mutex::new(Some(Vec::new())),
            delay: Mutex::new(Duration::ZERO),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub(crate) fn set_events(&self, events: Vec<TrackingEvent>) {
        *self.snapshot.lock().unwrap() = Some(events);
    }

    pub(crate) fn set_failing(&self) {
        *self.snapshot.lock().unwrap() = None;
    }

    pub(crate) fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CarrierGateway for FakeGateway {
    async fn fetch(
        &self,
        _tracking_number: &str,
        _carrier: CarrierName,
    ) -> Result<Vec<TrackingEvent>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let snapshot = self.snapshot.lock().unwrap().clone();

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        snapshot.ok_or(FetchError::Status(503))
    }
}

/// Messenger that records every successful send.
#[derive(Default)]
pub(crate) struct RecordingMessenger {
    sent: Mutex<Vec<(SubscriberId, String)>>,
    failing: Mutex<HashSet<SubscriberId>>,
}

impl RecordingMessenger {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail_for(&self, recipient: SubscriberId) {
        self.failing.lock().unwrap().insert(recipient);
    }

    pub(crate) fn sent(&self) -> Vec<(SubscriberId, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn sent_to(&self, recipient: SubscriberId) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|(to, _)| *to == recipient)
            .map(|(_, text)| text)
            .collect()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send(&self, recipient: SubscriberId, text: &str) -> Result<(), DeliveryError> {
        if self.failing.lock().unwrap().contains(&recipient) {
            return Err(DeliveryError::Rejected {
                status: 403,
                description: "Forbidden: bot was blocked by the user".to_string(),
            });
        }
        self.sent.lock().unwrap().push((recipient, text.to_string()));
        Ok(())
    }
}
