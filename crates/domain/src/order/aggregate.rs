//! Order aggregate implementation.

use chrono::{DateTime, Utc};
use common::{CustomerId, OrderId, ProductId, Version};
use serde::{Deserialize, Serialize};

use crate::catalog::Product;
use crate::error::InsufficientStock;
use crate::stock::StockAdjustment;

use super::{Money, OrderError, OrderItem, OrderStatus};

/// Order aggregate root.
///
/// Every command method validates first and only then mutates, so a
/// rejected command leaves the order exactly as it was. Methods that move
/// stock return the [`StockAdjustment`]s the store must apply in the same
/// transaction as the order write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Unique order identifier.
    id: OrderId,

    /// Customer who owns the order.
    customer_id: CustomerId,

    /// Current status of the order.
    status: OrderStatus,

    /// Lines in insertion order; at most one per product.
    items: Vec<OrderItem>,

    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,

    /// Stored version for optimistic concurrency.
    #[serde(default)]
    version: Version,
}

impl Order {
    /// Opens a new pending order for a customer.
    pub fn new(customer_id: CustomerId, now: DateTime<Utc>) -> Self {
        Self {
            id: OrderId::new(),
            customer_id,
            status: OrderStatus::Pending,
            items: Vec::new(),
            created_at: now,
            updated_at: now,
            version: Version::initial(),
        }
    }

    /// Reassembles an order loaded from storage.
    pub fn from_parts(
        id: OrderId,
        customer_id: CustomerId,
        status: OrderStatus,
        items: Vec<OrderItem>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        version: Version,
    ) -> Self {
        Self {
            id,
            customer_id,
            status,
            items,
            created_at,
            updated_at,
            version,
        }
    }

    /// Records the version the store assigned after a successful write.
    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }
}

// Query methods
impl Order {
    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn customer_id(&self) -> CustomerId {
        self.customer_id
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Returns all items in the order.
    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    /// Returns the line for a product, if any.
    pub fn item(&self, product_id: ProductId) -> Option<&OrderItem> {
        self.items.iter().find(|item| item.product_id == product_id)
    }

    /// Returns the number of lines.
    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// Returns the total quantity across all lines.
    pub fn total_quantity(&self) -> u32 {
        self.items.iter().map(|item| item.quantity).sum()
    }

    /// Sum of line subtotals at their snapshot prices.
    ///
    /// Computed on every call; never cached.
    pub fn total_price(&self) -> Money {
        self.items.iter().map(OrderItem::subtotal).sum()
    }

    pub fn has_items(&self) -> bool {
        !self.items.is_empty()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_owned_by(&self, customer_id: CustomerId) -> bool {
        self.customer_id == customer_id
    }

    /// Adjustments that would put every line's quantity back into stock.
    pub fn stock_release(&self) -> Vec<StockAdjustment> {
        self.items
            .iter()
            .map(|item| StockAdjustment::release(item.product_id, item.quantity))
            .collect()
    }
}

// Command methods
impl Order {
    /// Adds `quantity` units of `product`, merging into an existing line.
    ///
    /// A merged line keeps its original snapshot price. Units already on the
    /// line were taken from stock when they were added, so only the
    /// increment is checked against what is left on hand.
    pub fn add_item(
        &mut self,
        product: &Product,
        quantity: u32,
        now: DateTime<Utc>,
    ) -> Result<StockAdjustment, OrderError> {
        self.ensure_items_editable()?;

        if quantity == 0 {
            return Err(OrderError::InvalidQuantity { quantity });
        }

        if !product.has_stock_for(quantity) {
            return Err(InsufficientStock {
                product_id: product.id,
                available: product.quantity_on_hand,
                requested: quantity,
            }
            .into());
        }

        let (line_quantity, unit_price) = match self.item(product.id) {
            Some(existing) => (
                existing
                    .quantity
                    .checked_add(quantity)
                    .ok_or(OrderError::InvalidQuantity { quantity })?,
                existing.unit_price,
            ),
            None => (quantity, product.selling_price),
        };
        self.ensure_total_within_limit(product.id, line_quantity, unit_price)?;

        match self.items.iter_mut().find(|i| i.product_id == product.id) {
            Some(existing) => existing.quantity = line_quantity,
            None => self.items.push(OrderItem::new(
                self.id,
                product.id,
                product.name.clone(),
                quantity,
                product.selling_price,
            )),
        }

        self.updated_at = now;
        Ok(StockAdjustment::reserve(product.id, quantity))
    }

    /// Removes a line and returns its quantity to stock.
    pub fn remove_item(
        &mut self,
        product_id: ProductId,
        now: DateTime<Utc>,
    ) -> Result<StockAdjustment, OrderError> {
        self.ensure_items_editable()?;

        let position = self
            .items
            .iter()
            .position(|item| item.product_id == product_id)
            .ok_or(OrderError::ItemNotFound { product_id })?;

        let removed = self.items.remove(position);
        self.updated_at = now;
        Ok(StockAdjustment::release(product_id, removed.quantity))
    }

    /// Sets a line to an exact quantity.
    ///
    /// Zero removes the line. Growing a line is checked against `available`
    /// (the product's current on-hand quantity). Returns `None` if the
    /// quantity is unchanged.
    pub fn update_item_quantity(
        &mut self,
        product_id: ProductId,
        new_quantity: u32,
        available: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<StockAdjustment>, OrderError> {
        self.ensure_items_editable()?;

        let (current, unit_price) = self
            .item(product_id)
            .map(|item| (item.quantity, item.unit_price))
            .ok_or(OrderError::ItemNotFound { product_id })?;

        if new_quantity == 0 {
            return self.remove_item(product_id, now).map(Some);
        }

        if new_quantity == current {
            return Ok(None);
        }

        let adjustment = if new_quantity > current {
            let increment = new_quantity - current;
            if increment > available {
                return Err(InsufficientStock {
                    product_id,
                    available,
                    requested: increment,
                }
                .into());
            }
            self.ensure_total_within_limit(product_id, new_quantity, unit_price)?;
            StockAdjustment::reserve(product_id, increment)
        } else {
            StockAdjustment::release(product_id, current - new_quantity)
        };

        if let Some(item) = self.items.iter_mut().find(|i| i.product_id == product_id) {
            item.quantity = new_quantity;
        }
        self.updated_at = now;
        Ok(Some(adjustment))
    }

    /// Moves the order from pending to confirmed.
    pub fn checkout(&mut self, now: DateTime<Utc>) -> Result<(), OrderError> {
        if !self.status.can_checkout() {
            return Err(OrderError::InvalidTransition {
                current_status: self.status,
                action: "checkout",
            });
        }

        if !self.has_items() {
            return Err(OrderError::EmptyOrder);
        }

        self.transition(OrderStatus::Confirmed, now);
        Ok(())
    }

    /// Moves the order from confirmed to paid.
    pub fn mark_paid(&mut self, now: DateTime<Utc>) -> Result<(), OrderError> {
        if !self.status.can_mark_paid() {
            return Err(OrderError::InvalidTransition {
                current_status: self.status,
                action: "mark paid",
            });
        }

        self.transition(OrderStatus::Paid, now);
        Ok(())
    }

    /// Moves the order from paid to delivered.
    pub fn mark_delivered(&mut self, now: DateTime<Utc>) -> Result<(), OrderError> {
        if !self.status.can_deliver() {
            return Err(OrderError::InvalidTransition {
                current_status: self.status,
                action: "deliver",
            });
        }

        self.transition(OrderStatus::Delivered, now);
        Ok(())
    }

    /// Cancels a pending or confirmed order.
    ///
    /// Lines are kept for history; their quantities go back to stock.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<Vec<StockAdjustment>, OrderError> {
        if !self.status.can_cancel() {
            return Err(OrderError::InvalidTransition {
                current_status: self.status,
                action: "cancel",
            });
        }

        self.transition(OrderStatus::Cancelled, now);
        Ok(self.stock_release())
    }

    /// Checks the total the order would have with the line for
    /// `product_id` set to `quantity` units at `unit_price`.
    fn ensure_total_within_limit(
        &self,
        product_id: ProductId,
        quantity: u32,
        unit_price: Money,
    ) -> Result<(), OrderError> {
        let total = self
            .items
            .iter()
            .filter(|item| item.product_id != product_id)
            .map(OrderItem::checked_subtotal)
            .chain(std::iter::once(unit_price.checked_multiply(quantity)))
            .try_fold(Money::zero(), |acc, line| line.and_then(|l| acc.checked_add(l)));

        match total {
            Some(total) if total <= Money::MAX => Ok(()),
            _ => Err(OrderError::TotalTooLarge { limit: Money::MAX }),
        }
    }

    fn ensure_items_editable(&self) -> Result<(), OrderError> {
        if !self.status.can_modify_items() {
            return Err(OrderError::OrderLocked {
                status: self.status,
            });
        }
        Ok(())
    }

    fn transition(&mut self, to: OrderStatus, now: DateTime<Utc>) {
        self.status = to;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Category, ProductDetails};

    fn product(quantity: u32, price_units: i64) -> Product {
        Product::create(
            ProductDetails {
                name: "Denim Jacket".to_string(),
                category: Category::Other,
                size: "L".to_string(),
                buying_price: Money::from_units(price_units / 2),
                selling_price: Money::from_units(price_units),
            },
            quantity,
            Utc::now(),
        )
        .unwrap()
    }

    fn pending_order() -> Order {
        Order::new(CustomerId::new(), Utc::now())
    }

    #[test]
    fn test_new_order_is_pending_and_empty() {
        let order = pending_order();
        assert_eq!(order.status(), OrderStatus::Pending);
        assert!(!order.has_items());
        assert_eq!(order.total_price(), Money::zero());
        assert_eq!(order.version(), Version::initial());
    }

    #[test]
    fn test_add_item_snapshots_price() {
        let mut order = pending_order();
        let p = product(5, 100);

        let adjustment = order.add_item(&p, 3, Utc::now()).unwrap();

        assert_eq!(adjustment, StockAdjustment::reserve(p.id, 3));
        let item = order.item(p.id).unwrap();
        assert_eq!(item.unit_price, Money::from_units(100));
        assert_eq!(item.subtotal(), Money::from_units(300));
        assert_eq!(item.order_id, order.id());
    }

    #[test]
    fn test_add_same_product_merges_line() {
        let mut order = pending_order();
        let mut p = product(10, 100);

        order.add_item(&p, 2, Utc::now()).unwrap();
        p.apply_stock_delta(-2, Utc::now()).unwrap();
        p.selling_price = Money::from_units(150);
        order.add_item(&p, 3, Utc::now()).unwrap();

        assert_eq!(order.item_count(), 1);
        let item = order.item(p.id).unwrap();
        assert_eq!(item.quantity, 5);
        assert_eq!(item.unit_price, Money::from_units(100));
    }

    #[test]
    fn test_add_item_over_stock_leaves_order_unchanged() {
        let mut order = pending_order();
        let p = product(2, 100);
        let before = order.clone();

        let err = order.add_item(&p, 3, Utc::now()).unwrap_err();

        assert_eq!(
            err,
            OrderError::InsufficientStock(InsufficientStock {
                product_id: p.id,
                available: 2,
                requested: 3,
            })
        );
        assert_eq!(order, before);
    }

    #[test]
    fn test_add_zero_quantity_fails() {
        let mut order = pending_order();
        let result = order.add_item(&product(5, 100), 0, Utc::now());
        assert!(matches!(
            result,
            Err(OrderError::InvalidQuantity { quantity: 0 })
        ));
    }

    #[test]
    fn test_remove_item_releases_quantity() {
        let mut order = pending_order();
        let p = product(5, 100);
        order.add_item(&p, 3, Utc::now()).unwrap();

        let adjustment = order.remove_item(p.id, Utc::now()).unwrap();

        assert_eq!(adjustment, StockAdjustment::release(p.id, 3));
        assert!(!order.has_items());
    }

    #[test]
    fn test_remove_missing_item_fails() {
        let mut order = pending_order();
        let missing = ProductId::new();
        assert_eq!(
            order.remove_item(missing, Utc::now()),
            Err(OrderError::ItemNotFound {
                product_id: missing
            })
        );
    }

    #[test]
    fn test_update_item_quantity_up_and_down() {
        let mut order = pending_order();
        let p = product(10, 100);
        order.add_item(&p, 4, Utc::now()).unwrap();

        let down = order.update_item_quantity(p.id, 1, 6, Utc::now()).unwrap();
        assert_eq!(down, Some(StockAdjustment::release(p.id, 3)));

        let up = order.update_item_quantity(p.id, 5, 9, Utc::now()).unwrap();
        assert_eq!(up, Some(StockAdjustment::reserve(p.id, 4)));
        assert_eq!(order.item(p.id).unwrap().quantity, 5);

        let same = order.update_item_quantity(p.id, 5, 5, Utc::now()).unwrap();
        assert_eq!(same, None);
    }

    #[test]
    fn test_update_item_quantity_checks_increment_against_stock() {
        let mut order = pending_order();
        let p = product(10, 100);
        order.add_item(&p, 4, Utc::now()).unwrap();

        let result = order.update_item_quantity(p.id, 8, 3, Utc::now());

        assert!(matches!(result, Err(OrderError::InsufficientStock(_))));
        assert_eq!(order.item(p.id).unwrap().quantity, 4);
    }

    #[test]
    fn test_update_item_quantity_to_zero_removes() {
        let mut order = pending_order();
        let p = product(10, 100);
        order.add_item(&p, 2, Utc::now()).unwrap();

        let adjustment = order.update_item_quantity(p.id, 0, 8, Utc::now()).unwrap();

        assert_eq!(adjustment, Some(StockAdjustment::release(p.id, 2)));
        assert!(order.item(p.id).is_none());
    }

    #[test]
    fn test_total_price_sums_snapshot_subtotals() {
        let mut order = pending_order();
        let a = product(5, 100);
        let b = product(5, 250);
        order.add_item(&a, 3, Utc::now()).unwrap();
        order.add_item(&b, 2, Utc::now()).unwrap();

        assert_eq!(order.total_price(), Money::from_units(800));
        assert_eq!(order.total_quantity(), 5);
    }

    #[test]
    fn test_checkout_empty_order_fails() {
        let mut order = pending_order();
        assert_eq!(order.checkout(Utc::now()), Err(OrderError::EmptyOrder));
        assert_eq!(order.status(), OrderStatus::Pending);
    }

    #[test]
    fn test_checkout_twice_is_invalid_transition() {
        let mut order = pending_order();
        order.add_item(&product(5, 100), 1, Utc::now()).unwrap();

        order.checkout(Utc::now()).unwrap();
        assert_eq!(order.status(), OrderStatus::Confirmed);

        assert_eq!(
            order.checkout(Utc::now()),
            Err(OrderError::InvalidTransition {
                current_status: OrderStatus::Confirmed,
                action: "checkout",
            })
        );
    }

    #[test]
    fn test_items_locked_after_checkout() {
        let mut order = pending_order();
        let p = product(5, 100);
        order.add_item(&p, 1, Utc::now()).unwrap();
        order.checkout(Utc::now()).unwrap();

        assert_eq!(
            order.add_item(&p, 1, Utc::now()),
            Err(OrderError::OrderLocked {
                status: OrderStatus::Confirmed
            })
        );
        assert!(matches!(
            order.remove_item(p.id, Utc::now()),
            Err(OrderError::OrderLocked { .. })
        ));
    }

    #[test]
    fn test_full_lifecycle() {
        let mut order = pending_order();
        order.add_item(&product(5, 100), 1, Utc::now()).unwrap();

        order.checkout(Utc::now()).unwrap();
        order.mark_paid(Utc::now()).unwrap();
        order.mark_delivered(Utc::now()).unwrap();

        assert_eq!(order.status(), OrderStatus::Delivered);
        assert!(order.is_terminal());
    }

    #[test]
    fn test_cannot_skip_to_paid() {
        let mut order = pending_order();
        order.add_item(&product(5, 100), 1, Utc::now()).unwrap();
        assert!(matches!(
            order.mark_paid(Utc::now()),
            Err(OrderError::InvalidTransition { .. })
        ));
        assert!(matches!(
            order.mark_delivered(Utc::now()),
            Err(OrderError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_cancel_releases_all_lines() {
        let mut order = pending_order();
        let a = product(5, 100);
        let b = product(5, 100);
        order.add_item(&a, 2, Utc::now()).unwrap();
        order.add_item(&b, 1, Utc::now()).unwrap();
        order.checkout(Utc::now()).unwrap();

        let released = order.cancel(Utc::now()).unwrap();

        assert_eq!(order.status(), OrderStatus::Cancelled);
        assert_eq!(
            released,
            vec![
                StockAdjustment::release(a.id, 2),
                StockAdjustment::release(b.id, 1)
            ]
        );
    }

    #[test]
    fn test_cannot_cancel_paid_order() {
        let mut order = pending_order();
        order.add_item(&product(5, 100), 1, Utc::now()).unwrap();
        order.checkout(Utc::now()).unwrap();
        order.mark_paid(Utc::now()).unwrap();

        assert!(matches!(
            order.cancel(Utc::now()),
            Err(OrderError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_transition_sets_updated_at() {
        let created = Utc::now();
        let mut order = Order::new(CustomerId::new(), created);
        order.add_item(&product(5, 100), 1, created).unwrap();

        let later = created + chrono::Duration::seconds(30);
        order.checkout(later).unwrap();

        assert_eq!(order.created_at(), created);
        assert_eq!(order.updated_at(), later);
    }

    #[test]
    fn test_add_item_rejects_total_beyond_limit() {
        let mut p = product(10, 1);
        p.selling_price = Money::MAX;
        let mut order = pending_order();

        order.add_item(&p, 1, Utc::now()).unwrap();
        assert_eq!(
            order.add_item(&p, 1, Utc::now()),
            Err(OrderError::TotalTooLarge { limit: Money::MAX })
        );
        assert_eq!(order.item(p.id).unwrap().quantity, 1);
        assert_eq!(order.total_price(), Money::MAX);
    }

    #[test]
    fn test_overflowing_price_is_an_error_not_a_panic() {
        let mut p = product(10, 1);
        p.selling_price = Money::from_cents(i64::MAX / 2 + 1);
        let mut order = pending_order();

        assert!(matches!(
            order.add_item(&p, 2, Utc::now()),
            Err(OrderError::TotalTooLarge { .. })
        ));
        assert!(!order.has_items());
        assert_eq!(order.total_price(), Money::zero());
    }

    #[test]
    fn test_update_item_quantity_rejects_total_beyond_limit() {
        let mut p = product(10, 1);
        p.selling_price = Money::from_cents(Money::MAX.cents() / 2);
        let mut order = pending_order();
        order.add_item(&p, 1, Utc::now()).unwrap();

        assert!(matches!(
            order.update_item_quantity(p.id, 3, 9, Utc::now()),
            Err(OrderError::TotalTooLarge { .. })
        ));
        assert_eq!(order.item(p.id).unwrap().quantity, 1);
    }
}
