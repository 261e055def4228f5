use crate::entities::TrackingKey;
use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// A carrier-reported status record.
///
/// Identity is the whole tuple together with the key it belongs to; two
/// events with the same date, description and location are the same event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingEvent {
    pub occurred_at: OffsetDateTime,
    pub description: String,
    pub location: String,
}

impl TrackingEvent {
    pub fn new(
        occurred_at: OffsetDateTime,
        description: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            occurred_at,
            description: description.into(),
            location: location.into(),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TrackingEventRow {
    occurred_at: String,
    description: String,
    location: String,
}

impl TryFrom<TrackingEventRow> for TrackingEvent {
    type Error = sqlx::Error;

    fn try_from(row: TrackingEventRow) -> Result<Self, Self::Error> {
        let occurred_at = OffsetDateTime::parse(&row.occurred_at, &Rfc3339)
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        Ok(Self {
            occurred_at,
            description: row.description,
            location: row.location,
        })
    }
}

/// Timestamps are stored as RFC 3339 text so the carrier's offset survives
/// and equal instants in equal offsets compare equal in SQL.
fn encode_timestamp(ts: OffsetDateTime) -> Result<String, sqlx::Error> {
    ts.format(&Rfc3339)
        .map_err(|e| sqlx::Error::Encode(Box::new(e)))
}

#[derive(Debug, Clone)]
/// Stored history of a key, in the order the events were first seen.
pub struct GetEventHistory {
    pub key: TrackingKey,
}

impl Processor<GetEventHistory> for DatabaseProcessor {
    type Output = Vec<TrackingEvent>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetEventHistory")]
    async fn process(&self, query: GetEventHistory) -> Result<Vec<TrackingEvent>, sqlx::Error> {
        let rows = sqlx::query_as::<_, TrackingEventRow>(
            r#"
            SELECT occurred_at, description, location
            FROM tracking_events
            WHERE tracking_number = ? AND carrier = ?
            ORDER BY seq ASC
            "#,
        )
        .bind(query.key.tracking_number)
        .bind(query.key.carrier)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TrackingEvent::try_from).collect()
    }
}

impl TrackingEvent {
    /// Insert the event unless the exact tuple is already stored for the key.
    ///
    /// Returns `true` when a row was written, i.e. the event is new.
    pub async fn insert_if_absent_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        key: &TrackingKey,
        event: &TrackingEvent,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO tracking_events (tracking_number, carrier, occurred_at, description, location)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (tracking_number, carrier, occurred_at, description, location) DO NOTHING
            "#,
        )
        .bind(&key.tracking_number)
        .bind(key.carrier)
        .bind(encode_timestamp(event.occurred_at)?)
        .bind(&event.description)
        .bind(&event.location)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Drop the whole history of a key. Returns the number of rows removed.
    pub async fn delete_history_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        key: &TrackingKey,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM tracking_events
            WHERE tracking_number = ? AND carrier = ?
            "#,
        )
        .bind(&key.tracking_number)
        .bind(key.carrier)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected())
    }
}
