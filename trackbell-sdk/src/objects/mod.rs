pub mod carriers;
pub mod subscriptions;

pub use carriers::{Carrier, UnknownCarrier};
pub use subscriptions::{
    ApiErrorBody, ExistingInfoRequest, ExistingInfoResponse, RegisterTrackingRequest,
    RegisterTrackingResponse, RegistrationStatus, SubscriptionView, TrackingEventView,
    UnregisterTrackingRequest, UnregisterTrackingResponse,
};
