//! Application services for the shop.
//!
//! [`CatalogService`] manages products, restocking and walk-in sales.
//! [`OrderService`] drives the cart and order lifecycle; every mutation
//! is a load, validate, mutate and commit cycle against the [`store::Store`],
//! retried a bounded number of times when another writer got there first.

pub mod catalog;
pub mod error;
pub mod service;

pub use catalog::CatalogService;
pub use error::ServiceError;
pub use service::{CommandResult, OrderService};
