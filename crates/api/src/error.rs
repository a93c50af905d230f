//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::FulfillmentError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Request clashes with existing data.
    Conflict(String),
    /// Error from the fulfillment core.
    Fulfillment(FulfillmentError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Fulfillment(err) => fulfillment_error_to_response(err),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

/// Returns the HTTP status for a fulfillment error.
pub fn status_for(err: &FulfillmentError) -> StatusCode {
    match err {
        FulfillmentError::Validation(_) => StatusCode::BAD_REQUEST,
        FulfillmentError::OrderNotFound(_)
        | FulfillmentError::ProductNotFound(_)
        | FulfillmentError::UserNotFound(_)
        | FulfillmentError::LineNotFound { .. } => StatusCode::NOT_FOUND,
        FulfillmentError::InvalidTransition { .. }
        | FulfillmentError::OrderNotMutable { .. }
        | FulfillmentError::EmptyOrder(_)
        | FulfillmentError::InsufficientStock { .. }
        | FulfillmentError::InventoryInconsistency { .. }
        | FulfillmentError::StockAlreadyInitialized(_)
        | FulfillmentError::ProductReferenced(_)
        | FulfillmentError::UserHasOrders(_)
        | FulfillmentError::OrderHasLines(_) => StatusCode::CONFLICT,
        FulfillmentError::ConcurrencyTimeout => StatusCode::SERVICE_UNAVAILABLE,
        FulfillmentError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn fulfillment_error_to_response(err: FulfillmentError) -> (StatusCode, String) {
    let status = status_for(&err);
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %err, "fulfillment storage failure");
    }
    (status, err.to_string())
}

impl From<FulfillmentError> for ApiError {
    fn from(err: FulfillmentError) -> Self {
        ApiError::Fulfillment(err)
    }
}
