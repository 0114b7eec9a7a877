//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::{CatalogError, OrderError};
use orders::ServiceError;
use payments::{CallbackError, PaymentError};
use store::StoreError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Missing or invalid customer identity.
    Unauthorized(String),
    /// Order or catalog operation failed.
    Service(ServiceError),
    /// Payment initiation failed.
    Payment(PaymentError),
    /// Provider callback could not be applied.
    Callback(CallbackError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Service(err) => (service_status(&err), err.to_string()),
            ApiError::Payment(err) => (payment_status(&err), err.to_string()),
            ApiError::Callback(err) => (callback_status(&err), err.to_string()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        if status.is_server_error() {
            tracing::error!(%status, error = %message, "request failed");
        }

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn service_status(err: &ServiceError) -> StatusCode {
    match err {
        ServiceError::Order(order_err) => match order_err {
            OrderError::InsufficientStock(_)
            | OrderError::OrderLocked { .. }
            | OrderError::InvalidTransition { .. } => StatusCode::CONFLICT,
            OrderError::ItemNotFound { .. } => StatusCode::NOT_FOUND,
            OrderError::EmptyOrder
            | OrderError::InvalidQuantity { .. }
            | OrderError::TotalTooLarge { .. } => StatusCode::BAD_REQUEST,
        },
        ServiceError::Catalog(catalog_err) => match catalog_err {
            CatalogError::InsufficientStock(_) => StatusCode::CONFLICT,
            CatalogError::InvalidProduct(_)
            | CatalogError::InvalidQuantity { .. }
            | CatalogError::TotalTooLarge { .. } => StatusCode::BAD_REQUEST,
        },
        ServiceError::InsufficientStock(_) => StatusCode::CONFLICT,
        ServiceError::OrderNotFound(_) | ServiceError::ProductNotFound(_) => StatusCode::NOT_FOUND,
        ServiceError::Store(store_err) => store_status(store_err),
    }
}

fn payment_status(err: &PaymentError) -> StatusCode {
    match err {
        PaymentError::OrderNotFound(_) => StatusCode::NOT_FOUND,
        PaymentError::OrderNotPayable { .. } | PaymentError::AlreadyPaid(_) => {
            StatusCode::CONFLICT
        }
        PaymentError::NothingToPay(_) | PaymentError::InvalidPhone(_) => StatusCode::BAD_REQUEST,
        PaymentError::AuthError(_) | PaymentError::GatewayUnavailable(_) => {
            StatusCode::BAD_GATEWAY
        }
        PaymentError::Store(store_err) => store_status(store_err),
    }
}

fn callback_status(err: &CallbackError) -> StatusCode {
    match err {
        CallbackError::MalformedCallback(_) => StatusCode::BAD_REQUEST,
        CallbackError::UnknownOrder(_) => StatusCode::NOT_FOUND,
        CallbackError::Store(store_err) => store_status(store_err),
    }
}

fn store_status(err: &StoreError) -> StatusCode {
    match err {
        StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
        StoreError::ConcurrencyConflict { .. }
        | StoreError::InsufficientStock(_)
        | StoreError::StockLimitExceeded(_)
        | StoreError::DuplicateCorrelation(_)
        | StoreError::PaymentAlreadySettled(_)
        | StoreError::ProductInUse(_) => StatusCode::CONFLICT,
        StoreError::Database(_) | StoreError::Migration(_) | StoreError::InvalidData(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        ApiError::Service(err)
    }
}

impl From<PaymentError> for ApiError {
    fn from(err: PaymentError) -> Self {
        ApiError::Payment(err)
    }
}

impl From<CallbackError> for ApiError {
    fn from(err: CallbackError) -> Self {
        ApiError::Callback(err)
    }
}
