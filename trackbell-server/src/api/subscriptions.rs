//! Subscription handlers.

use axum::extract::{Path, State};
use axum::{
    Json, Router,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use time::format_description::well_known::Rfc3339;
use trackbell_core::entities::{Subscription, TrackingEvent};
use trackbell_core::processors::JobStatus;
use trackbell_core::tracker::{ExistingInfoError, RegisterError};
use trackbell_sdk::objects::{
    ApiErrorBody, ExistingInfoRequest, ExistingInfoResponse, RegisterTrackingRequest,
    RegisterTrackingResponse, RegistrationStatus, SubscriptionView, TrackingEventView,
    UnregisterTrackingRequest, UnregisterTrackingResponse,
};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/subscriptions", post(register))
        .route("/subscriptions/remove", post(unregister))
        .route("/subscriptions/existing-info", post(existing_info))
        .route(
            "/subscribers/{subscriber_id}/subscriptions",
            get(list_subscriptions),
        )
}

/// `POST /subscriptions`: start tracking a parcel for a subscriber.
///
/// Answers `201 Created` when the parcel was not tracked before and
/// `200 OK` when the subscriber joined an existing job.
async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterTrackingRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let registration = state
        .tracker
        .register(
            payload.subscriber_id,
            &payload.tracking_number,
            payload.carrier.into(),
            &payload.display_name,
        )
        .await?;

    let (code, status) = match registration.job {
        JobStatus::Created => (StatusCode::CREATED, RegistrationStatus::Created),
        JobStatus::Existing => (StatusCode::OK, RegistrationStatus::Joined),
    };
    let response = RegisterTrackingResponse {
        status,
        tracking_number: registration.key.tracking_number,
        carrier: registration.key.carrier.into(),
    };
    Ok((code, Json(response)))
}

/// `POST /subscriptions/remove`: stop tracking a parcel for a subscriber.
async fn unregister(
    State(state): State<AppState>,
    Json(payload): Json<UnregisterTrackingRequest>,
) -> Result<Json<UnregisterTrackingResponse>, ApiError> {
    let outcome = state
        .tracker
        .unregister(
            payload.subscriber_id,
            &payload.tracking_number,
            payload.carrier.into(),
        )
        .await
        .map_err(ApiError::Database)?;

    Ok(Json(UnregisterTrackingResponse {
        removed: outcome.removed,
        released: outcome.released,
    }))
}

/// `POST /subscriptions/existing-info`: message the stored history of the
/// parcel the subscriber named `display_name`, and return it.
async fn existing_info(
    State(state): State<AppState>,
    Json(payload): Json<ExistingInfoRequest>,
) -> Result<Json<ExistingInfoResponse>, ApiError> {
    let info = state
        .tracker
        .request_existing_info(payload.subscriber_id, &payload.display_name)
        .await?;

    Ok(Json(ExistingInfoResponse {
        tracking_number: info.key.tracking_number,
        carrier: info.key.carrier.into(),
        delivered: info.report.delivered > 0,
        events: info.events.iter().map(to_event_view).collect(),
    }))
}

/// `GET /subscribers/{subscriber_id}/subscriptions`
async fn list_subscriptions(
    State(state): State<AppState>,
    Path(subscriber_id): Path<i64>,
) -> Result<Json<Vec<SubscriptionView>>, ApiError> {
    let subscriptions = state
        .tracker
        .list_subscriptions(subscriber_id)
        .await
        .map_err(ApiError::Database)?;

    Ok(Json(subscriptions.into_iter().map(to_subscription_view).collect()))
}

fn to_event_view(event: &TrackingEvent) -> TrackingEventView {
    TrackingEventView {
        date: event
            .occurred_at
            .format(&Rfc3339)
            .unwrap_or_else(|_| event.occurred_at.to_string()),
        description: event.description.clone(),
        location: event.location.clone(),
    }
}

fn to_subscription_view(subscription: Subscription) -> SubscriptionView {
    SubscriptionView {
        tracking_number: subscription.tracking_number,
        carrier: subscription.carrier.into(),
        display_name: subscription.display_name,
    }
}

/// Errors that can occur in subscription handlers.
#[derive(Debug)]
enum ApiError {
    Register(RegisterError),
    ExistingInfo(ExistingInfoError),
    /// A database query failed.
    Database(sqlx::Error),
}

impl From<RegisterError> for ApiError {
    fn from(value: RegisterError) -> Self {
        ApiError::Register(value)
    }
}

impl From<ExistingInfoError> for ApiError {
    fn from(value: ExistingInfoError) -> Self {
        ApiError::ExistingInfo(value)
    }
}

fn error_body(error: &str, message: String) -> ApiErrorBody {
    ApiErrorBody {
        error: error.to_string(),
        message,
        existing_name: None,
        existing_tracking_number: None,
    }
}

fn internal_error(e: &sqlx::Error) -> (StatusCode, ApiErrorBody) {
    tracing::error!(error = %e, "Subscription API database error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        error_body("internal", "internal server error".to_string()),
    )
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = match self {
            ApiError::Register(e) => {
                let message = e.to_string();
                match e {
                    RegisterError::InvalidInput(_) => (
                        StatusCode::BAD_REQUEST,
                        error_body("invalid_input", message),
                    ),
                    RegisterError::DuplicateTrackingNumber { existing_name } => (
                        StatusCode::CONFLICT,
                        ApiErrorBody {
                            existing_name: Some(existing_name),
                            ..error_body("duplicate_tracking_number", message)
                        },
                    ),
                    RegisterError::DuplicateDisplayName {
                        existing_tracking_number,
                    } => (
                        StatusCode::CONFLICT,
                        ApiErrorBody {
                            existing_tracking_number: Some(existing_tracking_number),
                            ..error_body("duplicate_display_name", message)
                        },
                    ),
                    RegisterError::Database(e) => internal_error(&e),
                }
            }
            ApiError::ExistingInfo(ExistingInfoError::NotFound(name)) => (
                StatusCode::NOT_FOUND,
                error_body("not_found", format!("no parcel named \"{name}\"")),
            ),
            ApiError::ExistingInfo(ExistingInfoError::Database(e)) | ApiError::Database(e) => {
                internal_error(&e)
            }
        };
        (status, Json(body)).into_response()
    }
}
