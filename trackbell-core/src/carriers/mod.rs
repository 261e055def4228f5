//! Carrier gateways.
//!
//! A gateway turns a tracking number into the ordered list of events the
//! carrier currently reports, normalized to [`TrackingEvent`]. Rendering
//! carrier-local times in the right offset is the gateway's job.

pub mod oca;

pub use oca::OcaGateway;

use crate::entities::{CarrierName, TrackingEvent};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while fetching from a carrier.
#[derive(Debug, Error)]
pub enum FetchError {
    /// HTTP request error
    #[error("HTTP request error: {0}")]
    Request(#[from] reqwest::Error),

    /// Carrier answered with a non-success status
    #[error("carrier responded with status {0}")]
    Status(u16),

    /// Carrier response parsing error
    #[error("carrier response parsing error: {0}")]
    Parse(String),

    /// No answer within the fetch timeout
    #[error("carrier did not answer within {0:?}")]
    Timeout(Duration),
}

/// Fetch abstraction over a carrier's tracking API.
#[async_trait]
pub trait CarrierGateway: Send + Sync {
    /// Fetch every event the carrier reports for a tracking number, in the
    /// carrier's order.
    async fn fetch(
        &self,
        tracking_number: &str,
        carrier: CarrierName,
    ) -> Result<Vec<TrackingEvent>, FetchError>;
}
