//! In-memory payment gateway for tests and local sandbox runs.

use std::collections::VecDeque;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use super::{PaymentGateway, StkPushAccepted, StkPushRequest};
use crate::error::PaymentError;

/// Number of most recent push requests kept for inspection.
pub const REQUEST_LOG_CAPACITY: usize = 1_000;

#[derive(Debug, Default)]
struct InMemoryGatewayState {
    requests: VecDeque<StkPushRequest>,
    received: usize,
    queued_checkout_ids: VecDeque<String>,
    next_id: u64,
    fail_auth: bool,
    fail_push: bool,
}

/// Gateway that accepts every push request without leaving the process.
///
/// Checkout request ids are taken from [`queue_checkout_request_id`] when
/// one is queued, otherwise generated as `ws_CO_0001`, `ws_CO_0002`, ...
///
/// [`queue_checkout_request_id`]: InMemoryPaymentGateway::queue_checkout_request_id
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<RwLock<InMemoryGatewayState>>,
}

impl InMemoryPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the token request fail, as if the credentials were wrong.
    pub fn set_fail_auth(&self, fail: bool) {
        self.write().fail_auth = fail;
    }

    /// Makes the push request fail, as if the provider were unreachable.
    pub fn set_fail_push(&self, fail: bool) {
        self.write().fail_push = fail;
    }

    /// Uses `id` as the checkout request id of the next accepted push.
    pub fn queue_checkout_request_id(&self, id: impl Into<String>) {
        self.write().queued_checkout_ids.push_back(id.into());
    }

    /// The most recent push requests, oldest first, including failed ones.
    ///
    /// At most [`REQUEST_LOG_CAPACITY`] are kept.
    pub fn requests(&self) -> Vec<StkPushRequest> {
        self.read().requests.iter().cloned().collect()
    }

    /// Total push requests received, including ones no longer logged.
    pub fn request_count(&self) -> usize {
        self.read().received
    }

    fn read(&self) -> RwLockReadGuard<'_, InMemoryGatewayState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, InMemoryGatewayState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn initiate_stk_push(
        &self,
        request: &StkPushRequest,
    ) -> Result<StkPushAccepted, PaymentError> {
        let mut state = self.write();
        if state.requests.len() == REQUEST_LOG_CAPACITY {
            state.requests.pop_front();
        }
        state.requests.push_back(request.clone());
        state.received += 1;

        if state.fail_auth {
            return Err(PaymentError::AuthError("invalid consumer credentials".to_string()));
        }
        if state.fail_push {
            return Err(PaymentError::GatewayUnavailable("request timed out".to_string()));
        }

        state.next_id += 1;
        let checkout_request_id = match state.queued_checkout_ids.pop_front() {
            Some(id) => id,
            None => format!("ws_CO_{:04}", state.next_id),
        };

        Ok(StkPushAccepted {
            checkout_request_id,
            merchant_request_id: Some(format!("MR-{:04}", state.next_id)),
            customer_message: Some("Success. Request accepted for processing".to_string()),
        })
    }
}
