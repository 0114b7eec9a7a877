//! Identifiers and concurrency tokens shared by every crate in the workspace.

pub mod types;
pub mod version;

pub use types::{CustomerId, OrderId, OrderItemId, PaymentId, ProductId, SaleId};
pub use version::Version;
