//! Outbound payment provider adapter.

mod in_memory;
mod mpesa;

pub use in_memory::InMemoryPaymentGateway;
pub use mpesa::{MpesaConfig, MpesaGateway, SANDBOX_BASE_URL};

use async_trait::async_trait;
use domain::PhoneNumber;

use crate::error::PaymentError;

/// A request to push a payment prompt to a customer's phone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StkPushRequest {
    /// Whole currency units; the provider does not accept fractions.
    pub amount: u64,
    pub phone_number: PhoneNumber,
    /// Short reference shown to the payer.
    pub account_reference: String,
    pub description: String,
}

/// The provider accepted a push request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StkPushAccepted {
    /// Correlation id the provider will echo in its callback.
    pub checkout_request_id: String,
    pub merchant_request_id: Option<String>,
    pub customer_message: Option<String>,
}

/// Trait for payment provider integrations.
///
/// Implementations either return an accepted request or one of
/// [`PaymentError::AuthError`] / [`PaymentError::GatewayUnavailable`].
/// They never persist anything.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Sends an STK push request.
    async fn initiate_stk_push(
        &self,
        request: &StkPushRequest,
    ) -> Result<StkPushAccepted, PaymentError>;
}
