//! OCA tracking gateway.
//!
//! OCA exposes an ASP.NET page method that takes the tracking number in a
//! JSON body and answers with `{"d": [...]}`, one row per checkpoint, with
//! dates in the `/Date(<epoch millis>)/` notation.

use super::{CarrierGateway, FetchError};
use crate::config::OcaConfig;
use crate::entities::{CarrierName, TrackingEvent};
use async_trait::async_trait;
use std::time::Duration;
use time::{OffsetDateTime, UtcOffset};
use tracing::debug;
use url::Url;

/// OCA gateway implementation.
pub struct OcaGateway {
    endpoint: Url,
    utc_offset: UtcOffset,
    http_client: reqwest::Client,
}

impl OcaGateway {
    pub const DEFAULT_ENDPOINT: &str =
        "http://www5.oca.com.ar/ocaepakNet/Views/ConsultaTracking/TrackingConsult.aspx/GetTracking";

    /// Create a new OcaGateway.
    ///
    /// `request_timeout` bounds the HTTP exchange itself; the ingestion engine
    /// applies its own fetch timeout on top.
    pub fn new(config: &OcaConfig, request_timeout: Duration) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            utc_offset: config.utc_offset,
            http_client: reqwest::Client::builder()
                .timeout(request_timeout)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    /// POST the tracking number and return the raw body.
    async fn fetch_body(&self, tracking_number: &str) -> Result<String, FetchError> {
        #[derive(serde::Serialize)]
        #[serde(rename_all = "camelCase")]
        struct OcaRequest<'a> {
            number_of_send: &'a str,
        }

        let response = self
            .http_client
            .post(self.endpoint.clone())
            .json(&OcaRequest {
                number_of_send: tracking_number,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        Ok(response.text().await?)
    }
}

#[async_trait]
impl CarrierGateway for OcaGateway {
    async fn fetch(
        &self,
        tracking_number: &str,
        carrier: CarrierName,
    ) -> Result<Vec<TrackingEvent>, FetchError> {
        debug!(tracking_number, %carrier, "Fetching carrier tracking");
        let body = self.fetch_body(tracking_number).await?;
        let events = parse_tracking_payload(&body, self.utc_offset)?;
        debug!(
            tracking_number,
            %carrier,
            events = events.len(),
            "Fetched carrier tracking"
        );
        Ok(events)
    }
}

// API response types for OCA
#[derive(Debug, serde::Deserialize)]
struct OcaEnvelope {
    d: Vec<OcaTrackingRow>,
}

#[derive(Debug, serde::Deserialize)]
struct OcaTrackingRow {
    #[serde(rename = "Date")]
    date: String,
    #[serde(rename = "State")]
    state: String,
    #[serde(rename = "Sucursal", default)]
    branch: Option<String>,
}

/// Normalize an OCA response body into tracking events, keeping the
/// carrier's order.
pub fn parse_tracking_payload(
    body: &str,
    utc_offset: UtcOffset,
) -> Result<Vec<TrackingEvent>, FetchError> {
    let envelope: OcaEnvelope = serde_json::from_str(body)
        .map_err(|e| FetchError::Parse(format!("Invalid payload: {}", e)))?;

    envelope
        .d
        .into_iter()
        .map(|row| {
            let occurred_at = parse_dotnet_date(&row.date)?.to_offset(utc_offset);
            Ok(TrackingEvent {
                occurred_at,
                description: row.state.trim_end().to_string(),
                location: row.branch.unwrap_or_default().trim_end().to_string(),
            })
        })
        .collect()
}

/// Parse `/Date(1704103200000)/`, optionally followed by a zone suffix such
/// as `/Date(1704103200000-0300)/`. The millis are UTC either way.
fn parse_dotnet_date(raw: &str) -> Result<OffsetDateTime, FetchError> {
    let inner = raw
        .trim()
        .strip_prefix("/Date(")
        .and_then(|s| s.strip_suffix(")/"))
        .ok_or_else(|| FetchError::Parse(format!("Invalid date: {}", raw)))?;

    let digits_end = inner
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && c == '-')))
        .map(|(i, _)| i)
        .unwrap_or(inner.len());

    let millis: i64 = inner[..digits_end]
        .parse()
        .map_err(|e| FetchError::Parse(format!("Invalid date {}: {}", raw, e)))?;

    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .map_err(|e| FetchError::Parse(format!("Date out of range {}: {}", raw, e)))
}
