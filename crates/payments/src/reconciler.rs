//! Applies provider callbacks to payments and orders.

use chrono::Utc;
use common::OrderId;
use domain::{OrderStatus, Payment, PaymentStatus};
use store::{Store, StoreError};

use crate::callback::{CallbackResult, ParsedCallback, parse_callback};
use crate::error::CallbackError;

/// Attempts at moving an order to paid when its version moves underneath.
const MAX_ORDER_ATTEMPTS: u32 = 3;

/// What a handled callback did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// Payment settled and the order moved to paid.
    Paid,
    /// Payment settled but the order was no longer awaiting payment.
    PaidForInactiveOrder,
    /// Re-delivery of a callback that was already applied.
    AlreadyApplied,
    /// Payment marked failed; the order stays payable.
    Failed,
    /// The order already had another successful payment.
    DuplicatePayment,
}

impl CallbackOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackOutcome::Paid => "paid",
            CallbackOutcome::PaidForInactiveOrder => "paid_inactive_order",
            CallbackOutcome::AlreadyApplied => "already_applied",
            CallbackOutcome::Failed => "failed",
            CallbackOutcome::DuplicatePayment => "duplicate_payment",
        }
    }
}

impl std::fmt::Display for CallbackOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reconciles provider callbacks against stored payment attempts.
///
/// Safe to call any number of times with the same payload: the payment
/// status change is a compare-and-set, and the order only moves from
/// confirmed to paid.
pub struct CallbackReconciler<S: Store> {
    store: S,
}

impl<S: Store> CallbackReconciler<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Parses and applies a raw callback body.
    pub async fn handle_callback(&self, payload: &[u8]) -> Result<CallbackOutcome, CallbackError> {
        let result = match parse_callback(payload) {
            Ok(callback) => self.apply(callback).await,
            Err(err) => Err(err),
        };

        let label = match &result {
            Ok(outcome) => outcome.as_str(),
            Err(err) => err.label(),
        };
        metrics::counter!("payment_callbacks_total", "outcome" => label).increment(1);

        if let Err(err) = &result {
            match err {
                CallbackError::Store(_) => tracing::error!(error = %err, "callback not applied"),
                _ => tracing::warn!(error = %err, "callback rejected"),
            }
        }
        result
    }

    #[tracing::instrument(
        skip(self, callback),
        fields(checkout_request_id = %callback.checkout_request_id)
    )]
    async fn apply(&self, callback: ParsedCallback) -> Result<CallbackOutcome, CallbackError> {
        let payment = self
            .store
            .get_payment_by_checkout_request_id(&callback.checkout_request_id)
            .await?
            .ok_or_else(|| CallbackError::UnknownOrder(callback.checkout_request_id.clone()))?;

        match callback.result {
            CallbackResult::Failure { result_code } => {
                self.apply_failure(payment, result_code, callback.result_desc)
                    .await
            }
            CallbackResult::Success(details) => {
                if payment.is_success() {
                    tracing::info!("success callback replayed");
                    self.complete_order(payment.order_id).await?;
                    return Ok(CallbackOutcome::AlreadyApplied);
                }

                if details.amount != payment.amount {
                    tracing::warn!(
                        payment_id = %payment.id,
                        order_id = %payment.order_id,
                        requested = %payment.amount,
                        paid = %details.amount,
                        "paid amount differs from the amount requested"
                    );
                    metrics::counter!("payment_amount_mismatches_total").increment(1);
                }

                let from = payment.status;
                let mut settled = payment;
                if settled
                    .record_success(details, callback.result_desc, Utc::now())
                    .is_err()
                {
                    return Ok(CallbackOutcome::AlreadyApplied);
                }
                self.apply_success(settled, from).await
            }
        }
    }

    async fn apply_failure(
        &self,
        mut payment: Payment,
        result_code: i64,
        result_desc: Option<String>,
    ) -> Result<CallbackOutcome, CallbackError> {
        let desc = result_desc.unwrap_or_else(|| format!("result code {result_code}"));
        if payment.record_failure(desc, Utc::now()).is_err() {
            tracing::info!(status = %payment.status, "failure callback for settled payment ignored");
            return Ok(CallbackOutcome::AlreadyApplied);
        }

        if !self
            .store
            .transition_payment(&payment, PaymentStatus::Pending)
            .await?
        {
            return Ok(CallbackOutcome::AlreadyApplied);
        }

        tracing::info!(result_code, order_id = %payment.order_id, "payment failed");
        Ok(CallbackOutcome::Failed)
    }

    async fn apply_success(
        &self,
        payment: Payment,
        from: PaymentStatus,
    ) -> Result<CallbackOutcome, CallbackError> {
        match self.store.transition_payment(&payment, from).await {
            Ok(true) => {}
            Ok(false) => {
                // Another delivery of this callback won the compare-and-set
                tracing::info!("concurrent callback already settled the payment");
                self.complete_order(payment.order_id).await?;
                return Ok(CallbackOutcome::AlreadyApplied);
            }
            Err(StoreError::PaymentAlreadySettled(order_id)) => {
                tracing::error!(
                    %order_id,
                    payment_id = %payment.id,
                    receipt_number = ?payment.receipt_number,
                    "order already paid by another payment; duplicate charge needs a refund"
                );
                return Ok(CallbackOutcome::DuplicatePayment);
            }
            Err(err) => return Err(err.into()),
        }

        tracing::info!(
            payment_id = %payment.id,
            receipt_number = ?payment.receipt_number,
            amount = %payment.amount,
            "payment settled"
        );

        if self.complete_order(payment.order_id).await? {
            Ok(CallbackOutcome::Paid)
        } else {
            Ok(CallbackOutcome::PaidForInactiveOrder)
        }
    }

    /// Moves the order from confirmed to paid.
    ///
    /// Returns false if the order is neither confirmed nor already past
    /// payment, which means money arrived for an order that no longer
    /// wants it.
    async fn complete_order(&self, order_id: OrderId) -> Result<bool, CallbackError> {
        let mut attempt = 1;
        loop {
            let mut order = self
                .store
                .get_order(order_id)
                .await?
                .ok_or_else(|| StoreError::not_found("order", order_id))?;

            match order.status() {
                OrderStatus::Paid | OrderStatus::Delivered => return Ok(true),
                OrderStatus::Confirmed => {}
                status => {
                    tracing::error!(
                        %order_id,
                        %status,
                        "payment received for an order that is not awaiting payment"
                    );
                    return Ok(false);
                }
            }

            if order.mark_paid(Utc::now()).is_err() {
                return Ok(false);
            }

            match self.store.commit_order(&order, &[]).await {
                Ok(_) => {
                    tracing::info!(%order_id, "order paid");
                    return Ok(true);
                }
                Err(err) if err.is_conflict() && attempt < MAX_ORDER_ATTEMPTS => {
                    tracing::debug!(attempt, "order changed while marking paid, retrying");
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{Money, Order, PhoneNumber};
    use serde_json::json;
    use store::InMemoryStore;

    async fn confirmed_order_with_payment(store: &InMemoryStore, checkout_id: &str) -> Payment {
        let mut order = Order::from_parts(
            OrderId::new(),
            common::CustomerId::new(),
            OrderStatus::Confirmed,
            Vec::new(),
            Utc::now(),
            Utc::now(),
            common::Version::initial(),
        );
        let version = store.insert_order(&order).await.unwrap();
        order.set_version(version);

        let payment = Payment::pending(
            order.id(),
            PhoneNumber::parse("0712345678").unwrap(),
            Money::from_units(300),
            checkout_id,
            None,
            Utc::now(),
        );
        store.insert_payment(&payment).await.unwrap();
        payment
    }

    fn success(checkout_id: &str, receipt: &str) -> Vec<u8> {
        success_for(checkout_id, receipt, 300)
    }

    fn success_for(checkout_id: &str, receipt: &str, amount: u64) -> Vec<u8> {
        json!({"Body": {"stkCallback": {
            "MerchantRequestID": "m-1",
            "CheckoutRequestID": checkout_id,
            "ResultCode": 0,
            "ResultDesc": "The service request is processed successfully.",
            "CallbackMetadata": {"Item": [
                {"Name": "Amount", "Value": amount},
                {"Name": "MpesaReceiptNumber", "Value": receipt},
                {"Name": "TransactionDate", "Value": 20240101120000u64},
                {"Name": "PhoneNumber", "Value": 254712345678u64}
            ]}
        }}})
        .to_string()
        .into_bytes()
    }

    fn failure(checkout_id: &str) -> Vec<u8> {
        json!({"Body": {"stkCallback": {
            "CheckoutRequestID": checkout_id,
            "ResultCode": 1032,
            "ResultDesc": "Request cancelled by user"
        }}})
        .to_string()
        .into_bytes()
    }

    #[tokio::test]
    async fn success_then_replay() {
        let store = InMemoryStore::new();
        let payment = confirmed_order_with_payment(&store, "ws_CO_1").await;
        let reconciler = CallbackReconciler::new(store.clone());

        let first = reconciler.handle_callback(&success("ws_CO_1", "R1")).await;
        assert_eq!(first.unwrap(), CallbackOutcome::Paid);

        let order = store.get_order(payment.order_id).await.unwrap().unwrap();
        assert_eq!(order.status(), OrderStatus::Paid);
        let version = order.version();

        let replay = reconciler.handle_callback(&success("ws_CO_1", "R1")).await;
        assert_eq!(replay.unwrap(), CallbackOutcome::AlreadyApplied);
        let order = store.get_order(payment.order_id).await.unwrap().unwrap();
        assert_eq!(order.version(), version);
    }

    #[tokio::test]
    async fn short_payment_is_recorded_as_paid() {
        let store = InMemoryStore::new();
        let payment = confirmed_order_with_payment(&store, "ws_CO_1").await;
        let reconciler = CallbackReconciler::new(store.clone());

        let outcome = reconciler
            .handle_callback(&success_for("ws_CO_1", "R1", 250))
            .await;
        assert_eq!(outcome.unwrap(), CallbackOutcome::Paid);

        let stored = store
            .get_payment_by_checkout_request_id("ws_CO_1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.amount, Money::from_units(250));
        assert_ne!(stored.amount, payment.amount);
    }

    #[tokio::test]
    async fn replay_repairs_order_left_confirmed() {
        let store = InMemoryStore::new();
        let mut payment = confirmed_order_with_payment(&store, "ws_CO_1").await;

        // Payment settled but the order write never happened
        payment
            .record_success(
                domain::SuccessDetails {
                    receipt_number: "R1".to_string(),
                    amount: Money::from_units(300),
                    phone_number: None,
                    transaction_date: None,
                },
                None,
                Utc::now(),
            )
            .unwrap();
        assert!(
            store
                .transition_payment(&payment, PaymentStatus::Pending)
                .await
                .unwrap()
        );

        let reconciler = CallbackReconciler::new(store.clone());
        let outcome = reconciler.handle_callback(&success("ws_CO_1", "R1")).await;
        assert_eq!(outcome.unwrap(), CallbackOutcome::AlreadyApplied);

        let order = store.get_order(payment.order_id).await.unwrap().unwrap();
        assert_eq!(order.status(), OrderStatus::Paid);
    }

    #[tokio::test]
    async fn failure_keeps_order_confirmed() {
        let store = InMemoryStore::new();
        let payment = confirmed_order_with_payment(&store, "ws_CO_1").await;
        let reconciler = CallbackReconciler::new(store.clone());

        let outcome = reconciler.handle_callback(&failure("ws_CO_1")).await;
        assert_eq!(outcome.unwrap(), CallbackOutcome::Failed);

        let stored = store
            .get_payment_by_checkout_request_id("ws_CO_1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, PaymentStatus::Failed);
        assert_eq!(stored.result_desc.as_deref(), Some("Request cancelled by user"));

        let order = store.get_order(payment.order_id).await.unwrap().unwrap();
        assert_eq!(order.status(), OrderStatus::Confirmed);

        // Repeated failure report changes nothing
        let again = reconciler.handle_callback(&failure("ws_CO_1")).await;
        assert_eq!(again.unwrap(), CallbackOutcome::AlreadyApplied);
    }

    #[tokio::test]
    async fn second_successful_payment_is_a_duplicate() {
        let store = InMemoryStore::new();
        let first = confirmed_order_with_payment(&store, "ws_CO_1").await;
        let second = Payment::pending(
            first.order_id,
            PhoneNumber::parse("0712345678").unwrap(),
            Money::from_units(300),
            "ws_CO_2",
            None,
            Utc::now(),
        );
        store.insert_payment(&second).await.unwrap();
        let reconciler = CallbackReconciler::new(store.clone());

        reconciler
            .handle_callback(&success("ws_CO_1", "R1"))
            .await
            .unwrap();
        let outcome = reconciler.handle_callback(&success("ws_CO_2", "R2")).await;
        assert_eq!(outcome.unwrap(), CallbackOutcome::DuplicatePayment);

        let stored = store
            .get_payment_by_checkout_request_id("ws_CO_2")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn unknown_and_malformed_callbacks() {
        let store = InMemoryStore::new();
        let reconciler = CallbackReconciler::new(store);

        assert!(matches!(
            reconciler.handle_callback(&success("nope", "R1")).await,
            Err(CallbackError::UnknownOrder(id)) if id == "nope"
        ));
        assert!(matches!(
            reconciler.handle_callback(b"{}").await,
            Err(CallbackError::MalformedCallback(_))
        ));
    }
}
