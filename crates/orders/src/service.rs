//! Order service: cart mutations and lifecycle transitions.

use std::future::Future;

use chrono::Utc;
use common::{CustomerId, OrderId, ProductId, Version};
use domain::{Money, Order, OrderError, OrderItem, OrderStatus, Product, StockAdjustment};
use store::Store;

use crate::error::ServiceError;

/// How many times a command is attempted when the order was written
/// concurrently between load and commit.
const MAX_ATTEMPTS: u32 = 3;

/// Result of a committed order command.
#[derive(Debug, Clone)]
pub struct CommandResult<T = ()> {
    /// The order as persisted.
    pub order: Order,

    /// Command-specific output.
    pub output: T,

    /// The order's version after the command.
    pub new_version: Version,
}

/// Service for managing orders.
///
/// Every customer-facing method takes the caller's [`CustomerId`]; orders
/// that belong to someone else are reported as not found.
pub struct OrderService<S: Store> {
    store: S,
}

impl<S: Store> OrderService<S> {
    /// Creates a new order service on top of `store`.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Opens a new pending order.
    #[tracing::instrument(skip(self))]
    pub async fn create_order(&self, customer_id: CustomerId) -> Result<Order, ServiceError> {
        let mut order = Order::new(customer_id, Utc::now());
        let version = self.store.insert_order(&order).await?;
        order.set_version(version);

        metrics::counter!("orders_created_total").increment(1);
        tracing::info!(order_id = %order.id(), "order created");
        Ok(order)
    }

    /// Loads one of the customer's orders.
    #[tracing::instrument(skip(self))]
    pub async fn get_order(
        &self,
        customer_id: CustomerId,
        order_id: OrderId,
    ) -> Result<Order, ServiceError> {
        self.load_owned(customer_id, order_id).await
    }

    /// Lists the customer's orders, newest first.
    #[tracing::instrument(skip(self))]
    pub async fn list_orders(&self, customer_id: CustomerId) -> Result<Vec<Order>, ServiceError> {
        Ok(self.store.list_orders_for_customer(customer_id).await?)
    }

    /// Computes the order total from the lines' snapshot prices.
    pub async fn total_price(
        &self,
        customer_id: CustomerId,
        order_id: OrderId,
    ) -> Result<Money, ServiceError> {
        Ok(self.load_owned(customer_id, order_id).await?.total_price())
    }

    /// Adds units of a product to a pending order, taking them out of stock.
    ///
    /// Returns the resulting line.
    #[tracing::instrument(skip(self))]
    pub async fn add_item(
        &self,
        customer_id: CustomerId,
        order_id: OrderId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<CommandResult<OrderItem>, ServiceError> {
        let result = retry_on_conflict(move || {
            self.try_add_item(customer_id, order_id, product_id, quantity)
        })
        .await;

        match &result {
            Ok(_) => {
                metrics::counter!("order_items_added_total").increment(1);
            }
            Err(ServiceError::InsufficientStock(shortage)) => {
                metrics::counter!("stock_rejections_total").increment(1);
                tracing::warn!(
                    available = shortage.available,
                    requested = shortage.requested,
                    "add item rejected: insufficient stock"
                );
            }
            Err(_) => {}
        }

        result
    }

    /// Removes a line and returns its units to stock.
    #[tracing::instrument(skip(self))]
    pub async fn remove_item(
        &self,
        customer_id: CustomerId,
        order_id: OrderId,
        product_id: ProductId,
    ) -> Result<CommandResult, ServiceError> {
        retry_on_conflict(move || async move {
            let mut order = self.load_owned(customer_id, order_id).await?;
            let adjustment = order.remove_item(product_id, Utc::now())?;
            self.commit(order, &[adjustment], ()).await
        })
        .await
    }

    /// Sets a line to an exact quantity; zero removes it.
    #[tracing::instrument(skip(self))]
    pub async fn update_item_quantity(
        &self,
        customer_id: CustomerId,
        order_id: OrderId,
        product_id: ProductId,
        new_quantity: u32,
    ) -> Result<CommandResult, ServiceError> {
        let result = retry_on_conflict(move || async move {
            let mut order = self.load_owned(customer_id, order_id).await?;
            let product = self.load_product(product_id).await?;
            let adjustment = order.update_item_quantity(
                product_id,
                new_quantity,
                product.quantity_on_hand,
                Utc::now(),
            )?;

            let adjustments: Vec<StockAdjustment> = adjustment.into_iter().collect();
            self.commit(order, &adjustments, ()).await
        })
        .await;

        if matches!(result, Err(ServiceError::InsufficientStock(_))) {
            metrics::counter!("stock_rejections_total").increment(1);
        }
        result
    }

    /// Moves a pending order with items to confirmed.
    #[tracing::instrument(skip(self))]
    pub async fn checkout(
        &self,
        customer_id: CustomerId,
        order_id: OrderId,
    ) -> Result<CommandResult, ServiceError> {
        let result = retry_on_conflict(move || async move {
            let mut order = self.load_owned(customer_id, order_id).await?;
            order.checkout(Utc::now())?;
            self.commit(order, &[], ()).await
        })
        .await?;

        tracing::info!(total = %result.order.total_price(), "order checked out");
        Ok(result)
    }

    /// Cancels a pending or confirmed order, returning its units to stock.
    ///
    /// Output is the list of stock releases that were applied.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(
        &self,
        customer_id: CustomerId,
        order_id: OrderId,
    ) -> Result<CommandResult<Vec<StockAdjustment>>, ServiceError> {
        let result = retry_on_conflict(move || async move {
            let mut order = self.load_owned(customer_id, order_id).await?;
            let released = order.cancel(Utc::now())?;
            self.commit(order, &released, released.clone()).await
        })
        .await?;

        tracing::info!(lines_released = result.output.len(), "order cancelled");
        Ok(result)
    }

    /// Staff action: marks a paid order as delivered.
    #[tracing::instrument(skip(self))]
    pub async fn mark_delivered(&self, order_id: OrderId) -> Result<CommandResult, ServiceError> {
        retry_on_conflict(move || async move {
            let mut order = self
                .store
                .get_order(order_id)
                .await?
                .ok_or(ServiceError::OrderNotFound(order_id))?;
            order.mark_delivered(Utc::now())?;
            self.commit(order, &[], ()).await
        })
        .await
    }

    /// Deletes a pending or cancelled order with its lines and payments.
    ///
    /// A pending order's units go back to stock; a cancelled order already
    /// released them.
    #[tracing::instrument(skip(self))]
    pub async fn delete_order(
        &self,
        customer_id: CustomerId,
        order_id: OrderId,
    ) -> Result<(), ServiceError> {
        retry_on_conflict(move || self.try_delete_order(customer_id, order_id)).await?;

        tracing::info!("order deleted");
        Ok(())
    }

    async fn try_add_item(
        &self,
        customer_id: CustomerId,
        order_id: OrderId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<CommandResult<OrderItem>, ServiceError> {
        let mut order = self.load_owned(customer_id, order_id).await?;
        let product = self.load_product(product_id).await?;

        let adjustment = order.add_item(&product, quantity, Utc::now())?;
        let line = order
            .item(product_id)
            .cloned()
            .ok_or(OrderError::ItemNotFound { product_id })?;

        self.commit(order, &[adjustment], line).await
    }

    async fn try_delete_order(
        &self,
        customer_id: CustomerId,
        order_id: OrderId,
    ) -> Result<(), ServiceError> {
        let order = self.load_owned(customer_id, order_id).await?;
        if !order.status().can_delete() {
            return Err(OrderError::InvalidTransition {
                current_status: order.status(),
                action: "delete",
            }
            .into());
        }

        let adjustments = if order.status() == OrderStatus::Pending {
            order.stock_release()
        } else {
            Vec::new()
        };

        self.store.delete_order(&order, &adjustments).await?;
        Ok(())
    }

    async fn load_owned(
        &self,
        customer_id: CustomerId,
        order_id: OrderId,
    ) -> Result<Order, ServiceError> {
        match self.store.get_order(order_id).await? {
            Some(order) if order.is_owned_by(customer_id) => Ok(order),
            _ => Err(ServiceError::OrderNotFound(order_id)),
        }
    }

    async fn load_product(&self, product_id: ProductId) -> Result<Product, ServiceError> {
        self.store
            .get_product(product_id)
            .await?
            .ok_or(ServiceError::ProductNotFound(product_id))
    }

    async fn commit<T>(
        &self,
        mut order: Order,
        adjustments: &[StockAdjustment],
        output: T,
    ) -> Result<CommandResult<T>, ServiceError> {
        let new_version = self.store.commit_order(&order, adjustments).await?;
        order.set_version(new_version);

        Ok(CommandResult {
            order,
            output,
            new_version,
        })
    }
}

/// Runs `attempt` again when it lost an optimistic-concurrency race.
///
/// Each attempt reloads and re-validates from scratch, so a retry can still
/// fail with a business error (for example, stock ran out meanwhile).
async fn retry_on_conflict<T, F, Fut>(mut attempt: F) -> Result<T, ServiceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let mut tries = 1;
    loop {
        match attempt().await {
            Err(err) if err.is_conflict() && tries < MAX_ATTEMPTS => {
                tracing::debug!(attempt = tries, error = %err, "version conflict, retrying");
                tries += 1;
            }
            result => return result,
        }
    }
}
