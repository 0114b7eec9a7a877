//! Stock adjustments.
//!
//! Domain operations never touch `quantity_on_hand` directly. They describe
//! the change as a [`StockAdjustment`] and the store applies it atomically,
//! refusing any delta that would leave the product below zero.

use common::ProductId;
use serde::{Deserialize, Serialize};

/// A signed change to a product's on-hand quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjustment {
    /// The product whose stock changes.
    pub product_id: ProductId,

    /// Negative to take units out of stock, positive to put them back.
    pub delta: i64,
}

impl StockAdjustment {
    /// Takes `quantity` units out of stock.
    pub fn reserve(product_id: ProductId, quantity: u32) -> Self {
        Self {
            product_id,
            delta: -i64::from(quantity),
        }
    }

    /// Returns `quantity` units to stock.
    pub fn release(product_id: ProductId, quantity: u32) -> Self {
        Self {
            product_id,
            delta: i64::from(quantity),
        }
    }

    /// Returns true if this adjustment removes units from stock.
    pub fn is_decrement(&self) -> bool {
        self.delta < 0
    }

    /// Number of units moved, regardless of direction.
    pub fn units(&self) -> u32 {
        u32::try_from(self.delta.unsigned_abs()).unwrap_or(u32::MAX)
    }
}
