//! Domain layer for the inventory and order system.
//!
//! This crate holds the entities and their invariants, free of any I/O:
//! - Catalog products, categories and walk-in sales
//! - Order aggregate with line items and the status state machine
//! - Payment attempts and their settlement rules
//! - Stock adjustments handed to the store for guarded application

pub mod catalog;
pub mod error;
pub mod order;
pub mod payment;
pub mod stock;

pub use catalog::{CatalogError, Category, Product, ProductDetails, Sale};
pub use error::{InsufficientStock, StockError, StockLimitExceeded, UnknownVariant};
pub use order::{Money, Order, OrderError, OrderItem, OrderStatus};
pub use payment::{
    InvalidPhone, Payment, PaymentStatus, PaymentStatusError, PhoneNumber, SuccessDetails,
};
pub use stock::StockAdjustment;
