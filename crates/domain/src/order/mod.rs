//! Order aggregate and related types.

mod aggregate;
mod state;
mod value_objects;

pub use aggregate::Order;
pub use state::OrderStatus;
pub use value_objects::{Money, OrderItem};

use common::ProductId;
use thiserror::Error;

use crate::error::InsufficientStock;

/// Errors that can occur during order operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    /// Not enough stock to cover the requested quantity.
    #[error(transparent)]
    InsufficientStock(#[from] InsufficientStock),

    /// Checkout attempted on an order without items.
    #[error("Order has no items")]
    EmptyOrder,

    /// Items can only change while the order is pending.
    #[error("Order is {status}; its items can no longer be changed")]
    OrderLocked { status: OrderStatus },

    /// Order is not in the expected state.
    #[error("Invalid state transition: cannot {action} from {current_status} state")]
    InvalidTransition {
        current_status: OrderStatus,
        action: &'static str,
    },

    /// Invalid quantity.
    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },

    /// The order total would exceed the largest storable amount.
    #[error("Order total would exceed {limit}")]
    TotalTooLarge { limit: Money },

    /// Item not found in order.
    #[error("Item not found: {product_id}")]
    ItemNotFound { product_id: ProductId },
}
