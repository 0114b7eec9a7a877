use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CustomerId, OrderId, ProductId, Version};
use domain::{Order, Payment, PaymentStatus, Product, Sale, StockAdjustment};

use crate::{Result, StoreError};

/// Core trait for store implementations.
///
/// Every write that touches more than one row is atomic: either all of it
/// lands or none of it does. Stock changes are always applied through a
/// guarded decrement that refuses to take `quantity_on_hand` below zero,
/// so two writers racing for the last unit cannot both win.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Store: Send + Sync {
    // ---- catalog ----

    /// Inserts a new product.
    async fn insert_product(&self, product: &Product) -> Result<()>;

    /// Loads a product by id.
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>>;

    /// Lists all products, newest first.
    async fn list_products(&self) -> Result<Vec<Product>>;

    /// Lists products whose stock is at or below `threshold`, lowest stock first.
    async fn list_low_stock(&self, threshold: u32) -> Result<Vec<Product>>;

    /// Persists descriptive and pricing fields.
    ///
    /// `quantity_on_hand` is never written here; stock only moves through
    /// [`Store::adjust_stock`] and the order/sale writes.
    async fn update_product_details(&self, product: &Product) -> Result<()>;

    /// Deletes a product. Returns false if it did not exist.
    ///
    /// Fails with [`StoreError::ProductInUse`] while order lines reference it.
    async fn delete_product(&self, id: ProductId) -> Result<bool>;

    /// Applies a single guarded stock change and returns the new on-hand quantity.
    async fn adjust_stock(&self, adjustment: StockAdjustment, at: DateTime<Utc>) -> Result<u32>;

    /// Records a walk-in sale together with its stock decrement.
    ///
    /// Returns the product's remaining quantity.
    async fn record_sale(&self, sale: &Sale) -> Result<u32>;

    /// Lists all sales, newest first.
    async fn list_sales(&self) -> Result<Vec<Sale>>;

    // ---- orders ----

    /// Inserts a new, empty order and returns its stored version.
    async fn insert_order(&self, order: &Order) -> Result<Version>;

    /// Loads an order with its items.
    async fn get_order(&self, id: OrderId) -> Result<Option<Order>>;

    /// Lists a customer's orders, newest first.
    async fn list_orders_for_customer(&self, customer_id: CustomerId) -> Result<Vec<Order>>;

    /// Persists an order together with the stock changes its mutation produced.
    ///
    /// The stored version must still equal `order.version()`, otherwise
    /// [`StoreError::ConcurrencyConflict`] is returned and nothing is written.
    /// A stock change that would go negative fails with
    /// [`StoreError::InsufficientStock`], also writing nothing.
    ///
    /// Returns the new version.
    async fn commit_order(&self, order: &Order, adjustments: &[StockAdjustment])
    -> Result<Version>;

    /// Deletes an order, its items and payments, applying `adjustments` in
    /// the same transaction.
    async fn delete_order(&self, order: &Order, adjustments: &[StockAdjustment]) -> Result<()>;

    // ---- payments ----

    /// Inserts a payment attempt.
    ///
    /// Fails with [`StoreError::DuplicateCorrelation`] if the checkout
    /// request id is already stored.
    async fn insert_payment(&self, payment: &Payment) -> Result<()>;

    /// Looks up a payment attempt by the provider's correlation id.
    async fn get_payment_by_checkout_request_id(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<Payment>>;

    /// Lists payment attempts for an order, oldest first.
    async fn list_payments_for_order(&self, order_id: OrderId) -> Result<Vec<Payment>>;

    /// Writes `payment` only if its stored status is still `from`.
    ///
    /// Returns false when another writer got there first. Fails with
    /// [`StoreError::PaymentAlreadySettled`] when `payment` is successful
    /// and the order already has a different successful payment.
    async fn transition_payment(&self, payment: &Payment, from: PaymentStatus) -> Result<bool>;
}

/// Extension trait providing convenience methods for stores.
#[async_trait]
pub trait StoreExt: Store {
    /// Loads an order or fails with [`StoreError::NotFound`].
    async fn require_order(&self, id: OrderId) -> Result<Order> {
        self.get_order(id)
            .await?
            .ok_or_else(|| StoreError::not_found("order", id))
    }

    /// Loads a product or fails with [`StoreError::NotFound`].
    async fn require_product(&self, id: ProductId) -> Result<Product> {
        self.get_product(id)
            .await?
            .ok_or_else(|| StoreError::not_found("product", id))
    }
}

// Blanket implementation for all Store implementations
impl<T: Store + ?Sized> StoreExt for T {}
