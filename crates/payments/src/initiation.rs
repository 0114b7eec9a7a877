//! Payment initiation: validates the order and requests an STK push.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use common::{CustomerId, OrderId};
use domain::{Money, Order, OrderStatus, Payment, PhoneNumber};
use store::Store;

use crate::error::PaymentError;
use crate::gateway::{PaymentGateway, StkPushRequest};

/// Shown on the payer's phone and provider statement.
const TRANSACTION_DESC: &str = "Order Payment";

/// Starts payments for confirmed orders.
pub struct PaymentService<S: Store> {
    store: S,
    gateway: Arc<dyn PaymentGateway>,
}

impl<S: Store> PaymentService<S> {
    pub fn new(store: S, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { store, gateway }
    }

    /// Asks the provider to prompt `phone` for the order total.
    ///
    /// Nothing is persisted unless the provider accepts the request. The
    /// returned payment is pending until the callback arrives.
    #[tracing::instrument(skip(self, phone))]
    pub async fn initiate_payment(
        &self,
        customer_id: CustomerId,
        order_id: OrderId,
        phone: &str,
    ) -> Result<Payment, PaymentError> {
        let order = self.load_owned(customer_id, order_id).await?;

        let attempts = self.store.list_payments_for_order(order_id).await?;
        if attempts.iter().any(Payment::is_success) {
            return Err(PaymentError::AlreadyPaid(order_id));
        }
        if order.status() != OrderStatus::Confirmed {
            return Err(PaymentError::OrderNotPayable {
                order_id,
                status: order.status(),
            });
        }

        let units = order.total_price().floor_units();
        if units <= 0 {
            return Err(PaymentError::NothingToPay(order_id));
        }
        let phone_number = PhoneNumber::parse(phone)?;

        let request = StkPushRequest {
            amount: units.unsigned_abs(),
            phone_number: phone_number.clone(),
            account_reference: account_reference(order_id),
            description: TRANSACTION_DESC.to_string(),
        };

        let started = Instant::now();
        let result = self.gateway.initiate_stk_push(&request).await;
        metrics::histogram!("payment_gateway_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        let accepted = match result {
            Ok(accepted) => accepted,
            Err(err) => {
                metrics::counter!("payment_gateway_failures_total").increment(1);
                tracing::warn!(error = %err, "stk push failed");
                return Err(err);
            }
        };

        let payment = Payment::pending(
            order_id,
            phone_number,
            Money::from_units(units),
            accepted.checkout_request_id,
            accepted.merchant_request_id,
            Utc::now(),
        );
        self.store.insert_payment(&payment).await?;

        metrics::counter!("payments_initiated_total").increment(1);
        tracing::info!(
            payment_id = %payment.id,
            checkout_request_id = %payment.checkout_request_id,
            amount = %payment.amount,
            "payment initiated"
        );
        Ok(payment)
    }

    /// Lists the payment attempts for one of the customer's orders, oldest
    /// first.
    #[tracing::instrument(skip(self))]
    pub async fn list_payments(
        &self,
        customer_id: CustomerId,
        order_id: OrderId,
    ) -> Result<Vec<Payment>, PaymentError> {
        self.load_owned(customer_id, order_id).await?;
        Ok(self.store.list_payments_for_order(order_id).await?)
    }

    async fn load_owned(
        &self,
        customer_id: CustomerId,
        order_id: OrderId,
    ) -> Result<Order, PaymentError> {
        match self.store.get_order(order_id).await? {
            Some(order) if order.is_owned_by(customer_id) => Ok(order),
            _ => Err(PaymentError::OrderNotFound(order_id)),
        }
    }
}

/// Short order reference: `ORD` and the first 8 hex digits of the id.
fn account_reference(order_id: OrderId) -> String {
    let hex = order_id.as_uuid().simple().to_string();
    format!("ORD{}", &hex[..8])
}
