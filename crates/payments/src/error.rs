//! Payment error types.

use common::OrderId;
use domain::{InvalidPhone, OrderStatus};
use store::StoreError;
use thiserror::Error;

/// Errors raised while initiating a payment.
#[derive(Debug, Error)]
pub enum PaymentError {
    /// The order does not exist or belongs to another customer.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// Only confirmed orders can be paid.
    #[error("Order {order_id} is {status}; only confirmed orders can be paid")]
    OrderNotPayable {
        order_id: OrderId,
        status: OrderStatus,
    },

    /// The order already has a successful payment.
    #[error("Order {0} has already been paid")]
    AlreadyPaid(OrderId),

    /// The order total rounds down to zero whole units.
    #[error("Order {0} has nothing to pay")]
    NothingToPay(OrderId),

    /// The payer phone number is not a valid MSISDN.
    #[error(transparent)]
    InvalidPhone(#[from] InvalidPhone),

    /// The provider refused our credentials or the token request failed.
    #[error("Payment provider authentication failed: {0}")]
    AuthError(String),

    /// The provider rejected the request, returned an error status, or
    /// could not be reached in time.
    #[error("Payment provider unavailable: {0}")]
    GatewayUnavailable(String),

    /// Persistence failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors raised while reconciling a provider callback.
#[derive(Debug, Error)]
pub enum CallbackError {
    /// The payload is not a well-formed STK callback.
    #[error("Malformed callback: {0}")]
    MalformedCallback(String),

    /// No payment attempt carries this checkout request id.
    #[error("No payment matches checkout request id {0}")]
    UnknownOrder(String),

    /// Persistence failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CallbackError {
    /// Label used for the `payment_callbacks_total` metric.
    pub fn label(&self) -> &'static str {
        match self {
            CallbackError::MalformedCallback(_) => "malformed",
            CallbackError::UnknownOrder(_) => "unknown",
            CallbackError::Store(_) => "error",
        }
    }
}
