//! Front-end API.
//!
//! A chat adapter drives the tracker through these JSON endpoints.
//!
//! # Endpoints
//!
//! - `POST /subscriptions`                         – register a tracking number
//! - `POST /subscriptions/remove`                  – remove a tracking number
//! - `POST /subscriptions/existing-info`           – re-send the stored history
//! - `GET  /subscribers/{subscriber_id}/subscriptions` – list a subscriber's parcels

mod subscriptions;

use crate::state::AppState;
use axum::Router;

/// Build the front-end API router.
pub fn router() -> Router<AppState> {
    subscriptions::router()
}
