use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CustomerId, OrderId, ProductId, Version};
use domain::{Order, Payment, PaymentStatus, Product, Sale, StockAdjustment};
use tokio::sync::RwLock;

use crate::{Result, StoreError, store::Store};

#[derive(Default)]
struct Tables {
    products: HashMap<ProductId, Product>,
    sales: Vec<Sale>,
    orders: HashMap<OrderId, Order>,
    payments: Vec<Payment>,
}

impl Tables {
    /// Applies all adjustments or none of them.
    fn apply_adjustments(
        &mut self,
        adjustments: &[StockAdjustment],
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut staged: HashMap<ProductId, Product> = HashMap::new();

        for adjustment in adjustments {
            let product = match staged.entry(adjustment.product_id) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    let current = self
                        .products
                        .get(&adjustment.product_id)
                        .cloned()
                        .ok_or_else(|| StoreError::not_found("product", adjustment.product_id))?;
                    entry.insert(current)
                }
            };
            product.apply_stock_delta(adjustment.delta, at)?;
        }

        self.products.extend(staged);
        Ok(())
    }

    fn check_order_version(&self, order: &Order) -> Result<()> {
        let stored = self
            .orders
            .get(&order.id())
            .ok_or_else(|| StoreError::not_found("order", order.id()))?;

        if stored.version() != order.version() {
            return Err(StoreError::ConcurrencyConflict {
                entity: "order",
                id: order.id().to_string(),
                expected: order.version(),
                actual: stored.version(),
            });
        }
        Ok(())
    }
}

/// In-memory store implementation for tests and local runs.
///
/// A single lock guards every table, so multi-row writes are atomic in the
/// same way a database transaction makes them.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored products.
    pub async fn product_count(&self) -> usize {
        self.tables.read().await.products.len()
    }

    /// Returns the number of stored orders.
    pub async fn order_count(&self) -> usize {
        self.tables.read().await.orders.len()
    }

    /// Clears all tables.
    pub async fn clear(&self) {
        *self.tables.write().await = Tables::default();
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert_product(&self, product: &Product) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.products.contains_key(&product.id) {
            return Err(StoreError::InvalidData(format!(
                "product {} already exists",
                product.id
            )));
        }
        tables.products.insert(product.id, product.clone());
        Ok(())
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        Ok(self.tables.read().await.products.get(&id).cloned())
    }

    async fn list_products(&self) -> Result<Vec<Product>> {
        let tables = self.tables.read().await;
        let mut products: Vec<_> = tables.products.values().cloned().collect();
        products.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(products)
    }

    async fn list_low_stock(&self, threshold: u32) -> Result<Vec<Product>> {
        let tables = self.tables.read().await;
        let mut products: Vec<_> = tables
            .products
            .values()
            .filter(|p| p.is_low_stock(threshold))
            .cloned()
            .collect();
        products.sort_by(|a, b| {
            a.quantity_on_hand
                .cmp(&b.quantity_on_hand)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(products)
    }

    async fn update_product_details(&self, product: &Product) -> Result<()> {
        let mut tables = self.tables.write().await;
        let stored = tables
            .products
            .get_mut(&product.id)
            .ok_or_else(|| StoreError::not_found("product", product.id))?;

        stored.name = product.name.clone();
        stored.category = product.category;
        stored.size = product.size.clone();
        stored.buying_price = product.buying_price;
        stored.selling_price = product.selling_price;
        stored.updated_at = product.updated_at;
        Ok(())
    }

    async fn delete_product(&self, id: ProductId) -> Result<bool> {
        let mut tables = self.tables.write().await;
        if !tables.products.contains_key(&id) {
            return Ok(false);
        }

        let referenced = tables
            .orders
            .values()
            .any(|order| order.item(id).is_some());
        if referenced {
            return Err(StoreError::ProductInUse(id));
        }

        tables.products.remove(&id);
        tables.sales.retain(|sale| sale.product_id != id);
        Ok(true)
    }

    async fn adjust_stock(&self, adjustment: StockAdjustment, at: DateTime<Utc>) -> Result<u32> {
        let mut tables = self.tables.write().await;
        let product = tables
            .products
            .get_mut(&adjustment.product_id)
            .ok_or_else(|| StoreError::not_found("product", adjustment.product_id))?;

        Ok(product.apply_stock_delta(adjustment.delta, at)?)
    }

    async fn record_sale(&self, sale: &Sale) -> Result<u32> {
        let mut tables = self.tables.write().await;
        let product = tables
            .products
            .get_mut(&sale.product_id)
            .ok_or_else(|| StoreError::not_found("product", sale.product_id))?;

        let remaining = product.apply_stock_delta(-i64::from(sale.quantity_sold), sale.sold_at)?;
        tables.sales.push(sale.clone());
        Ok(remaining)
    }

    async fn list_sales(&self) -> Result<Vec<Sale>> {
        let tables = self.tables.read().await;
        let mut sales = tables.sales.clone();
        sales.sort_by(|a, b| b.sold_at.cmp(&a.sold_at));
        Ok(sales)
    }

    async fn insert_order(&self, order: &Order) -> Result<Version> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables.orders.get(&order.id()) {
            return Err(StoreError::ConcurrencyConflict {
                entity: "order",
                id: order.id().to_string(),
                expected: Version::initial(),
                actual: existing.version(),
            });
        }

        let version = Version::first();
        let mut stored = order.clone();
        stored.set_version(version);
        tables.orders.insert(order.id(), stored);
        Ok(version)
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.tables.read().await.orders.get(&id).cloned())
    }

    async fn list_orders_for_customer(&self, customer_id: CustomerId) -> Result<Vec<Order>> {
        let tables = self.tables.read().await;
        let mut orders: Vec<_> = tables
            .orders
            .values()
            .filter(|o| o.is_owned_by(customer_id))
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        Ok(orders)
    }

    async fn commit_order(
        &self,
        order: &Order,
        adjustments: &[StockAdjustment],
    ) -> Result<Version> {
        let mut tables = self.tables.write().await;
        tables.check_order_version(order)?;
        tables.apply_adjustments(adjustments, order.updated_at())?;

        let next = order.version().next();
        let mut stored = order.clone();
        stored.set_version(next);
        tables.orders.insert(order.id(), stored);
        Ok(next)
    }

    async fn delete_order(&self, order: &Order, adjustments: &[StockAdjustment]) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.check_order_version(order)?;
        tables.apply_adjustments(adjustments, Utc::now())?;

        tables.orders.remove(&order.id());
        tables.payments.retain(|p| p.order_id != order.id());
        Ok(())
    }

    async fn insert_payment(&self, payment: &Payment) -> Result<()> {
        let mut tables = self.tables.write().await;
        if !tables.orders.contains_key(&payment.order_id) {
            return Err(StoreError::not_found("order", payment.order_id));
        }
        if tables
            .payments
            .iter()
            .any(|p| p.checkout_request_id == payment.checkout_request_id)
        {
            return Err(StoreError::DuplicateCorrelation(
                payment.checkout_request_id.clone(),
            ));
        }

        tables.payments.push(payment.clone());
        Ok(())
    }

    async fn get_payment_by_checkout_request_id(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<Payment>> {
        let tables = self.tables.read().await;
        Ok(tables
            .payments
            .iter()
            .find(|p| p.checkout_request_id == checkout_request_id)
            .cloned())
    }

    async fn list_payments_for_order(&self, order_id: OrderId) -> Result<Vec<Payment>> {
        let tables = self.tables.read().await;
        let mut payments: Vec<_> = tables
            .payments
            .iter()
            .filter(|p| p.order_id == order_id)
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.created_at);
        Ok(payments)
    }

    async fn transition_payment(&self, payment: &Payment, from: PaymentStatus) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let index = tables
            .payments
            .iter()
            .position(|p| p.id == payment.id)
            .ok_or_else(|| StoreError::not_found("payment", payment.id))?;

        if tables.payments[index].status != from {
            return Ok(false);
        }

        // At most one successful payment per order
        if payment.is_success()
            && tables
                .payments
                .iter()
                .any(|p| p.order_id == payment.order_id && p.id != payment.id && p.is_success())
        {
            return Err(StoreError::PaymentAlreadySettled(payment.order_id));
        }

        tables.payments[index] = payment.clone();
        Ok(true)
    }
}
