//! Response envelope
//!
//! Every `/api` endpoint answers `{success, data?, error?, details?}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use reachmail_core::ScheduleError;

/// Standard response envelope
#[derive(Debug, Serialize)]
pub struct ApiEnvelope<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// 200 with data
pub fn ok<T: Serialize>(data: T) -> Json<ApiEnvelope<T>> {
    Json(ApiEnvelope {
        success: true,
        data: Some(data),
        error: None,
        details: None,
    })
}

/// 201 with data
pub fn created<T: Serialize>(data: T) -> (StatusCode, Json<ApiEnvelope<T>>) {
    (StatusCode::CREATED, ok(data))
}

/// Enveloped error response
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub error: String,
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn bad_request(error: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: error.into(),
            details: None,
        }
    }

    pub fn not_found(error: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            error: error.into(),
            details: None,
        }
    }

    pub fn internal(error: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ApiEnvelope::<()> {
            success: false,
            data: None,
            error: Some(self.error),
            details: self.details,
        });
        (self.status, body).into_response()
    }
}

impl From<reachmail_common::Error> for ApiError {
    fn from(e: reachmail_common::Error) -> Self {
        let status = StatusCode::from_u16(e.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self {
            status,
            error: e.to_string(),
            details: None,
        }
    }
}

impl From<ScheduleError> for ApiError {
    fn from(e: ScheduleError) -> Self {
        match e {
            ScheduleError::Validation { field, message } => {
                ApiError::bad_request(message.clone())
                    .with_details(serde_json::json!({ "field": field, "message": message }))
            }
            ScheduleError::NoNewDispatches => ApiError::bad_request("No new dispatches"),
            ScheduleError::Database(e) => {
                tracing::error!(error = %e, "Campaign creation failed on the store");
                ApiError::internal("Failed to create campaign")
            }
            ScheduleError::Queue(e) => {
                tracing::error!(error = %e, "Campaign creation failed on the queue");
                ApiError::internal("Failed to create campaign")
            }
        }
    }
}
