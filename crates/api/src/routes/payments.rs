//! Payment initiation and provider callback endpoints.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, NaiveDateTime, Utc};
use common::OrderId;
use domain::{Payment, PaymentStatus};
use payments::CallbackError;
use serde::{Deserialize, Serialize};
use store::Store;

use super::{CurrentCustomer, parse_id};
use crate::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct PayRequest {
    pub phone_number: String,
}

#[derive(Serialize)]
pub struct PaymentResponse {
    pub id: String,
    pub order_id: String,
    pub phone_number: String,
    pub amount_cents: i64,
    pub status: PaymentStatus,
    pub checkout_request_id: String,
    pub merchant_request_id: Option<String>,
    pub receipt_number: Option<String>,
    pub transaction_date: Option<NaiveDateTime>,
    pub result_desc: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Payment> for PaymentResponse {
    fn from(payment: Payment) -> Self {
        Self {
            id: payment.id.to_string(),
            order_id: payment.order_id.to_string(),
            phone_number: payment.phone_number.as_str().to_string(),
            amount_cents: payment.amount.cents(),
            status: payment.status,
            checkout_request_id: payment.checkout_request_id,
            merchant_request_id: payment.merchant_request_id,
            receipt_number: payment.receipt_number,
            transaction_date: payment.transaction_date,
            result_desc: payment.result_desc,
            created_at: payment.created_at,
            updated_at: payment.updated_at,
        }
    }
}

/// Acknowledgement the provider expects for every handled callback.
#[derive(Serialize)]
pub struct CallbackAck {
    #[serde(rename = "ResultCode")]
    pub result_code: i32,
    #[serde(rename = "ResultDesc")]
    pub result_desc: &'static str,
}

impl CallbackAck {
    fn accepted() -> Json<Self> {
        Json(Self {
            result_code: 0,
            result_desc: "Accepted",
        })
    }
}

/// POST /orders/:id/pay — push a payment prompt to the payer's phone.
#[tracing::instrument(skip(state, req))]
pub async fn pay<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentCustomer(customer): CurrentCustomer,
    Path(id): Path<String>,
    Json(req): Json<PayRequest>,
) -> Result<(StatusCode, Json<PaymentResponse>), ApiError> {
    let order_id: OrderId = parse_id(&id)?;
    let payment = state
        .payments
        .initiate_payment(customer, order_id, &req.phone_number)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(payment.into())))
}

/// GET /orders/:id/payments — payment attempts, oldest first.
#[tracing::instrument(skip(state))]
pub async fn list<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentCustomer(customer): CurrentCustomer,
    Path(id): Path<String>,
) -> Result<Json<Vec<PaymentResponse>>, ApiError> {
    let order_id: OrderId = parse_id(&id)?;
    let payments = state.payments.list_payments(customer, order_id).await?;
    Ok(Json(payments.into_iter().map(Into::into).collect()))
}

/// POST /mpesa/callback — provider reports the outcome of a push.
///
/// Unknown checkout ids are acknowledged so the provider stops retrying.
#[tracing::instrument(skip(state, body), fields(bytes = body.len()))]
pub async fn callback<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    body: Bytes,
) -> Result<Json<CallbackAck>, ApiError> {
    match state.reconciler.handle_callback(&body).await {
        Ok(outcome) => {
            tracing::debug!(%outcome, "callback handled");
            Ok(CallbackAck::accepted())
        }
        Err(CallbackError::UnknownOrder(_)) => Ok(CallbackAck::accepted()),
        Err(err) => Err(err.into()),
    }
}
