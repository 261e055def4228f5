pub mod subscription;
pub mod tracking_event;

pub use subscription::{
    GetDisplayNameForKey, GetRecipientsForKey, GetSubscriptionByDisplayName, InsertSubscription,
    ListSubscriptionsForSubscriber, ListTrackedKeys, Recipient, Subscription,
};
pub use tracking_event::{GetEventHistory, TrackingEvent};

use trackbell_sdk::objects::Carrier as SdkCarrier;

/// Chat identifier of a subscriber.
pub type SubscriberId = i64;

/// Carrier name for database operations.
///
/// This is the sqlx::Type version. For API/DTO use, see `trackbell_sdk::objects::Carrier`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
pub enum CarrierName {
    Oca,
}

impl From<CarrierName> for SdkCarrier {
    fn from(value: CarrierName) -> Self {
        match value {
            CarrierName::Oca => SdkCarrier::Oca,
        }
    }
}

impl From<SdkCarrier> for CarrierName {
    fn from(value: SdkCarrier) -> Self {
        match value {
            SdkCarrier::Oca => CarrierName::Oca,
        }
    }
}

impl std::fmt::Display for CarrierName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(SdkCarrier::from(*self).as_str())
    }
}

/// Identity of a tracked parcel: many subscriptions share one key, and the
/// scheduler keeps exactly one job per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, sqlx::FromRow)]
pub struct TrackingKey {
    pub tracking_number: String,
    pub carrier: CarrierName,
}

impl TrackingKey {
    pub fn new(tracking_number: impl Into<String>, carrier: CarrierName) -> Self {
        Self {
            tracking_number: tracking_number.into(),
            carrier,
        }
    }
}

impl std::fmt::Display for TrackingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.carrier, self.tracking_number)
    }
}
