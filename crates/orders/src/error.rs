use common::{OrderId, ProductId};
use domain::{CatalogError, InsufficientStock, OrderError};
use store::StoreError;
use thiserror::Error;

/// Errors returned by the catalog and order services.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Order rule violation.
    #[error(transparent)]
    Order(OrderError),

    /// Catalog validation failure.
    #[error(transparent)]
    Catalog(CatalogError),

    /// Stock refused a decrement, either in the domain check or the
    /// store's guarded update.
    #[error(transparent)]
    InsufficientStock(InsufficientStock),

    /// The order does not exist or belongs to another customer.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// The product does not exist.
    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    /// Persistence failure.
    #[error(transparent)]
    Store(StoreError),
}

impl From<OrderError> for ServiceError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::InsufficientStock(e) => ServiceError::InsufficientStock(e),
            other => ServiceError::Order(other),
        }
    }
}

impl From<CatalogError> for ServiceError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::InsufficientStock(e) => ServiceError::InsufficientStock(e),
            other => ServiceError::Catalog(other),
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InsufficientStock(e) => ServiceError::InsufficientStock(e),
            other => ServiceError::Store(other),
        }
    }
}

impl ServiceError {
    pub(crate) fn is_conflict(&self) -> bool {
        matches!(self, ServiceError::Store(e) if e.is_conflict())
    }
}
