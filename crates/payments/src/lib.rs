//! Mobile-money (STK push) payments.
//!
//! The flow has two halves:
//! 1. [`PaymentService::initiate_payment`] asks the provider, through a
//!    [`PaymentGateway`], to push a payment prompt to the customer's phone
//!    and records a pending [`domain::Payment`] keyed by the provider's
//!    checkout request id.
//! 2. The provider later calls back; [`CallbackReconciler::handle_callback`]
//!    matches the checkout request id, settles the payment exactly once and
//!    moves the order from confirmed to paid.

pub mod callback;
pub mod error;
pub mod gateway;
pub mod initiation;
pub mod reconciler;

pub use callback::{CallbackResult, ParsedCallback, parse_callback};
pub use error::{CallbackError, PaymentError};
pub use gateway::{
    InMemoryPaymentGateway, MpesaConfig, MpesaGateway, PaymentGateway, SANDBOX_BASE_URL,
    StkPushAccepted, StkPushRequest,
};
pub use initiation::PaymentService;
pub use reconciler::{CallbackOutcome, CallbackReconciler};
