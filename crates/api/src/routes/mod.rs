//! HTTP handlers and shared request plumbing.

pub mod health;
pub mod metrics;
pub mod orders;
pub mod payments;
pub mod products;
pub mod sales;

use std::str::FromStr;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use common::CustomerId;

use crate::error::ApiError;

/// Header carrying the caller's customer id.
pub const CUSTOMER_HEADER: &str = "x-customer-id";

/// The customer making the request, taken from the `x-customer-id` header.
#[derive(Debug, Clone, Copy)]
pub struct CurrentCustomer(pub CustomerId);

impl<S: Send + Sync> FromRequestParts<S> for CurrentCustomer {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(CUSTOMER_HEADER)
            .ok_or_else(|| ApiError::Unauthorized(format!("Missing {CUSTOMER_HEADER} header")))?
            .to_str()
            .map_err(|_| ApiError::Unauthorized(format!("Invalid {CUSTOMER_HEADER} header")))?;

        let id = CustomerId::from_str(raw.trim())
            .map_err(|e| ApiError::Unauthorized(format!("Invalid {CUSTOMER_HEADER}: {e}")))?;
        Ok(Self(id))
    }
}

/// Parses a UUID path segment into a typed id.
pub(crate) fn parse_id<T>(raw: &str) -> Result<T, ApiError>
where
    T: FromStr<Err = uuid::Error>,
{
    raw.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))
}
