use crate::entities::{CarrierName, SubscriberId, TrackingKey};
use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Subscription {
    pub subscriber_id: SubscriberId,
    pub tracking_number: String,
    pub carrier: CarrierName,
    pub display_name: String,
}

impl Subscription {
    pub fn key(&self) -> TrackingKey {
        TrackingKey::new(self.tracking_number.clone(), self.carrier)
    }
}

/// A subscriber of a key together with the name they gave the parcel.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Recipient {
    pub subscriber_id: SubscriberId,
    pub display_name: String,
}

#[derive(Debug, Clone)]
/// Insert a subscription row.
///
/// Both uniqueness rules are table constraints, so a concurrent duplicate
/// surfaces as a unique-violation database error rather than a second row.
pub struct InsertSubscription {
    pub subscriber_id: SubscriberId,
    pub key: TrackingKey,
    pub display_name: String,
}

impl Processor<InsertSubscription> for DatabaseProcessor {
    type Output = ();
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:InsertSubscription")]
    async fn process(&self, insert: InsertSubscription) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (subscriber_id, tracking_number, carrier, display_name)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(insert.subscriber_id)
        .bind(insert.key.tracking_number)
        .bind(insert.key.carrier)
        .bind(insert.display_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
/// Get the display name a subscriber gave to a key, if they track it.
pub struct GetDisplayNameForKey {
    pub subscriber_id: SubscriberId,
    pub key: TrackingKey,
}

impl Processor<GetDisplayNameForKey> for DatabaseProcessor {
    type Output = Option<String>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetDisplayNameForKey")]
    async fn process(&self, query: GetDisplayNameForKey) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar(
            r#"
            SELECT display_name
            FROM subscriptions
            WHERE subscriber_id = ? AND tracking_number = ? AND carrier = ?
            "#,
        )
        .bind(query.subscriber_id)
        .bind(query.key.tracking_number)
        .bind(query.key.carrier)
        .fetch_optional(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
/// Look up a subscriber's subscription by the display name they chose.
pub struct GetSubscriptionByDisplayName {
    pub subscriber_id: SubscriberId,
    pub display_name: String,
}

impl Processor<GetSubscriptionByDisplayName> for DatabaseProcessor {
    type Output = Option<Subscription>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetSubscriptionByDisplayName")]
    async fn process(
        &self,
        query: GetSubscriptionByDisplayName,
    ) -> Result<Option<Subscription>, sqlx::Error> {
        sqlx::query_as::<_, Subscription>(
            r#"
            SELECT subscriber_id, tracking_number, carrier, display_name
            FROM subscriptions
            WHERE subscriber_id = ? AND display_name = ?
            "#,
        )
        .bind(query.subscriber_id)
        .bind(query.display_name)
        .fetch_optional(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
/// Every current subscriber of a key, in registration order.
pub struct GetRecipientsForKey {
    pub key: TrackingKey,
}

impl Processor<GetRecipientsForKey> for DatabaseProcessor {
    type Output = Vec<Recipient>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetRecipientsForKey")]
    async fn process(&self, query: GetRecipientsForKey) -> Result<Vec<Recipient>, sqlx::Error> {
        sqlx::query_as::<_, Recipient>(
            r#"
            SELECT subscriber_id, display_name
            FROM subscriptions
            WHERE tracking_number = ? AND carrier = ?
            ORDER BY rowid ASC
            "#,
        )
        .bind(query.key.tracking_number)
        .bind(query.key.carrier)
        .fetch_all(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
/// All distinct keys referenced by at least one subscription.
///
/// Used once at startup to rebuild the job registry.
pub struct ListTrackedKeys;

impl Processor<ListTrackedKeys> for DatabaseProcessor {
    type Output = Vec<TrackingKey>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ListTrackedKeys")]
    async fn process(&self, _query: ListTrackedKeys) -> Result<Vec<TrackingKey>, sqlx::Error> {
        sqlx::query_as::<_, TrackingKey>(
            r#"
            SELECT DISTINCT tracking_number, carrier
            FROM subscriptions
            ORDER BY carrier, tracking_number
            "#,
        )
        .fetch_all(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
pub struct ListSubscriptionsForSubscriber {
    pub subscriber_id: SubscriberId,
}

impl Processor<ListSubscriptionsForSubscriber> for DatabaseProcessor {
    type Output = Vec<Subscription>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ListSubscriptionsForSubscriber")]
    async fn process(
        &self,
        query: ListSubscriptionsForSubscriber,
    ) -> Result<Vec<Subscription>, sqlx::Error> {
        sqlx::query_as::<_, Subscription>(
            r#"
            SELECT subscriber_id, tracking_number, carrier, display_name
            FROM subscriptions
            WHERE subscriber_id = ?
            ORDER BY rowid ASC
            "#,
        )
        .bind(query.subscriber_id)
        .fetch_all(&self.pool)
        .await
    }
}

impl Subscription {
    /// Delete one subscriber's row for a key. Returns the number of rows removed.
    pub async fn delete_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        subscriber_id: SubscriberId,
        key: &TrackingKey,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM subscriptions
            WHERE subscriber_id = ? AND tracking_number = ? AND carrier = ?
            "#,
        )
        .bind(subscriber_id)
        .bind(&key.tracking_number)
        .bind(key.carrier)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected())
    }

    /// Number of subscriptions still referencing a key.
    pub async fn count_for_key_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        key: &TrackingKey,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM subscriptions
            WHERE tracking_number = ? AND carrier = ?
            "#,
        )
        .bind(&key.tracking_number)
        .bind(key.carrier)
        .fetch_one(&mut **tx)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{memory_db, oca_key};

    async fn subscribe(db: &DatabaseProcessor, subscriber_id: i64, number: &str, name: &str) {
        db.process(InsertSubscription {
            subscriber_id,
            key: oca_key(number),
            display_name: name.to_string(),
        })
        .await
        .unwrap();
    }

    fn is_unique_violation(err: &sqlx::Error) -> bool {
        matches!(err, sqlx::Error::Database(e) if e.is_unique_violation())
    }

    #[tokio::test]
    async fn test_same_parcel_twice_is_rejected() {
        let db = memory_db().await;
        subscribe(&db, 1, "100", "shoes").await;

        let err = db
            .process(InsertSubscription {
                subscriber_id: 1,
                key: oca_key("100"),
                display_name: "other name".to_string(),
            })
            .await
            .unwrap_err();
        assert!(is_unique_violation(&err));
    }

    #[tokio::test]
    async fn test_display_name_is_unique_per_subscriber_only() {
        let db = memory_db().await;
        subscribe(&db, 1, "100", "shoes").await;

        let err = db
            .process(InsertSubscription {
                subscriber_id: 1,
                key: oca_key("200"),
                display_name: "shoes".to_string(),
            })
            .await
            .unwrap_err();
        assert!(is_unique_violation(&err));

        // Another subscriber may reuse the name.
        subscribe(&db, 2, "200", "shoes").await;
    }

    #[tokio::test]
    async fn test_lookups() {
        let db = memory_db().await;
        subscribe(&db, 1, "100", "shoes").await;
        subscribe(&db, 2, "100", "gift").await;
        subscribe(&db, 2, "300", "books").await;

        let name = db
            .process(GetDisplayNameForKey {
                subscriber_id: 2,
                key: oca_key("100"),
            })
            .await
            .unwrap();
        assert_eq!(name.as_deref(), Some("gift"));

        let by_name = db
            .process(GetSubscriptionByDisplayName {
                subscriber_id: 2,
                display_name: "books".to_string(),
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_name.key(), oca_key("300"));

        let recipients = db
            .process(GetRecipientsForKey { key: oca_key("100") })
            .await
            .unwrap();
        assert_eq!(
            recipients,
            vec![
                Recipient {
                    subscriber_id: 1,
                    display_name: "shoes".to_string()
                },
                Recipient {
                    subscriber_id: 2,
                    display_name: "gift".to_string()
                },
            ]
        );

        let keys = db.process(ListTrackedKeys).await.unwrap();
        assert_eq!(keys, vec![oca_key("100"), oca_key("300")]);

        let mine = db
            .process(ListSubscriptionsForSubscriber { subscriber_id: 2 })
            .await
            .unwrap();
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[0].display_name, "gift");
    }

    #[tokio::test]
    async fn test_delete_only_touches_one_subscriber() {
        let db = memory_db().await;
        subscribe(&db, 1, "100", "shoes").await;
        subscribe(&db, 2, "100", "gift").await;

        let mut tx = db.pool.begin().await.unwrap();
        let removed = Subscription::delete_tx(&mut tx, 1, &oca_key("100"))
            .await
            .unwrap();
        let remaining = Subscription::count_for_key_tx(&mut tx, &oca_key("100"))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(removed, 1);
        assert_eq!(remaining, 1);
    }
}
