//! Error types shared across the domain modules.

use common::ProductId;
use thiserror::Error;

/// A stock decrement was refused because it would drive the on-hand
/// quantity below zero.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
pub struct InsufficientStock {
    pub product_id: ProductId,
    pub available: u32,
    pub requested: u32,
}

/// A stock increment was refused because the on-hand quantity would no
/// longer fit in a `u32`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Stock limit exceeded for product {product_id}: {on_hand} on hand, adding {added}")]
pub struct StockLimitExceeded {
    pub product_id: ProductId,
    pub on_hand: u32,
    pub added: u64,
}

/// Why a stock change could not be applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StockError {
    #[error(transparent)]
    Insufficient(#[from] InsufficientStock),

    #[error(transparent)]
    LimitExceeded(#[from] StockLimitExceeded),
}

/// A stored or submitted string did not name a known enum variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
