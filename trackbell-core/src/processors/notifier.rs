//! Notifier processor.
//!
//! The Notifier is responsible for:
//! - Rendering an update message for each subscriber of a key, using that
//!   subscriber's own display name
//! - Delivering the messages concurrently; one recipient failing never
//!   blocks or aborts the others
//! - Logging every failed delivery with its recipient
//!
//! Recipients are resolved at delivery time, so someone who unsubscribed a
//! moment ago receives nothing.

use crate::entities::{
    GetDisplayNameForKey, GetRecipientsForKey, Recipient, SubscriberId, TrackingEvent, TrackingKey,
};
use crate::framework::DatabaseProcessor;
use crate::messengers::Messenger;
use futures_util::future::join_all;
use kanau::processor::Processor;
use std::sync::Arc;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use tracing::{debug, info, warn};

const EVENT_DATE_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]");

/// Body used when a subscriber asks for history that is still empty.
const NO_EVENTS_YET: &str = "No tracking events recorded yet.";

/// Which header an update message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    /// Events that were just ingested.
    New,
    /// Replay of the stored history on request.
    Existing,
}

impl UpdateKind {
    pub fn header(self) -> &'static str {
        match self {
            UpdateKind::New => "New tracking information for your parcel:",
            UpdateKind::Existing => "Existing tracking information for your parcel:",
        }
    }
}

/// Outcome of one fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub delivered: usize,
    pub failed: Vec<SubscriberId>,
}

/// Render the message a subscriber receives.
///
/// The header and the subscriber's name for the parcel come first, followed
/// by one block per event in the given order.
pub fn format_update(
    kind: UpdateKind,
    display_name: &str,
    tracking_number: &str,
    events: &[TrackingEvent],
) -> String {
    let mut text = format!("{} {} ({})\n\n", kind.header(), display_name, tracking_number);
    if events.is_empty() {
        text.push_str(NO_EVENTS_YET);
        return text;
    }

    for event in events {
        let date = event
            .occurred_at
            .format(EVENT_DATE_FORMAT)
            .unwrap_or_else(|_| event.occurred_at.to_string());
        text.push_str(&format!(
            "{}\n{}\n{}\n\n",
            date, event.description, event.location
        ));
    }
    text
}

/// Notifier delivers updates to the subscribers of a key.
pub struct Notifier {
    db: DatabaseProcessor,
    messenger: Arc<dyn Messenger>,
}

impl Notifier {
    /// Create a new Notifier.
    pub fn new(db: DatabaseProcessor, messenger: Arc<dyn Messenger>) -> Self {
        Self { db, messenger }
    }

    /// Deliver `events` to every current subscriber of `key`.
    ///
    /// Returns an error only when the recipients cannot be loaded; delivery
    /// failures are reported in the [`FanoutReport`].
    pub async fn notify(
        &self,
        key: &TrackingKey,
        events: &[TrackingEvent],
        kind: UpdateKind,
    ) -> Result<FanoutReport, sqlx::Error> {
        let recipients = self
            .db
            .process(GetRecipientsForKey { key: key.clone() })
            .await?;
        if recipients.is_empty() {
            debug!(%key, "No subscribers left, nothing to deliver");
            return Ok(FanoutReport::default());
        }

        let report = self.deliver(key, events, kind, recipients).await;
        info!(
            %key,
            events = events.len(),
            delivered = report.delivered,
            failed = report.failed.len(),
            "Fan-out finished"
        );
        Ok(report)
    }

    /// Deliver `events` to one subscriber only, under the name they chose
    /// for `key`. Delivers nothing if they do not subscribe to `key`.
    pub async fn notify_subscriber(
        &self,
        subscriber_id: SubscriberId,
        key: &TrackingKey,
        events: &[TrackingEvent],
        kind: UpdateKind,
    ) -> Result<FanoutReport, sqlx::Error> {
        let display_name = self
            .db
            .process(GetDisplayNameForKey {
                subscriber_id,
                key: key.clone(),
            })
            .await?;
        let Some(display_name) = display_name else {
            debug!(%key, subscriber_id, "Subscription vanished before delivery");
            return Ok(FanoutReport::default());
        };

        let recipient = Recipient {
            subscriber_id,
            display_name,
        };
        Ok(self.deliver(key, events, kind, vec![recipient]).await)
    }

    async fn deliver(
        &self,
        key: &TrackingKey,
        events: &[TrackingEvent],
        kind: UpdateKind,
        recipients: Vec<Recipient>,
    ) -> FanoutReport {
        let sends = recipients.into_iter().map(|recipient| async move {
            let text = format_update(kind, &recipient.display_name, &key.tracking_number, events);
            let result = self.messenger.send(recipient.subscriber_id, &text).await;
            (recipient.subscriber_id, result)
        });

        let mut report = FanoutReport::default();
        for (subscriber_id, result) in join_all(sends).await {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(%key, subscriber_id, error = %e, "Failed to deliver update");
                    report.failed.push(subscriber_id);
                }
            }
        }
        report
    }
}
