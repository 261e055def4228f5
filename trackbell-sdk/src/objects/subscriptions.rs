//! Front-end API request and response types.
//!
//! A chat adapter translates its conversation flow into these calls:
//! registering a tracking number, removing it, and asking for the
//! information collected so far.

use serde::{Deserialize, Serialize};

use super::carriers::Carrier;

/// Request body for registering a tracking number for a subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterTrackingRequest {
    pub subscriber_id: i64,
    pub tracking_number: String,
    pub carrier: Carrier,
    /// Handle the subscriber uses to refer to this parcel.
    pub display_name: String,
}

/// Whether the registration started a new polling job or joined one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    /// First subscriber of the parcel; the carrier is polled right away.
    Created,
    /// The parcel was already tracked; the stored history was sent.
    Joined,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterTrackingResponse {
    pub status: RegistrationStatus,
    pub tracking_number: String,
    pub carrier: Carrier,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnregisterTrackingRequest {
    pub subscriber_id: i64,
    pub tracking_number: String,
    pub carrier: Carrier,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnregisterTrackingResponse {
    /// A subscription row was deleted.
    pub removed: bool,
    /// Nobody tracks the parcel anymore; its job and history are gone.
    pub released: bool,
}

/// Request body for re-sending the stored history of a parcel,
/// looked up by the subscriber's display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistingInfoRequest {
    pub subscriber_id: i64,
    pub display_name: String,
}

/// A single carrier event as shown to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingEventView {
    /// RFC 3339 timestamp in the carrier's local offset.
    pub date: String,
    pub description: String,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistingInfoResponse {
    pub tracking_number: String,
    pub carrier: Carrier,
    /// The message reached the subscriber.
    pub delivered: bool,
    pub events: Vec<TrackingEventView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionView {
    pub tracking_number: String,
    pub carrier: Carrier,
    pub display_name: String,
}

/// Error body returned by the API.
///
/// `existing_name` / `existing_tracking_number` carry the conflicting
/// value on duplicate registrations so the user can pick another one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub error: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_tracking_number: Option<String>,
}
