use common::{OrderId, ProductId, Version};
use domain::{InsufficientStock, StockError, StockLimitExceeded};
use thiserror::Error;

/// Errors that can occur when reading or writing the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The row was written by someone else since it was read.
    #[error(
        "Concurrency conflict for {entity} {id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        entity: &'static str,
        id: String,
        expected: Version,
        actual: Version,
    },

    /// The row does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A guarded stock decrement would have gone below zero.
    #[error(transparent)]
    InsufficientStock(#[from] InsufficientStock),

    /// A stock increment would take the on-hand quantity past `u32::MAX`.
    #[error(transparent)]
    StockLimitExceeded(#[from] StockLimitExceeded),

    /// A payment with this correlation id is already stored.
    #[error("Payment with checkout request id {0} already exists")]
    DuplicateCorrelation(String),

    /// The order already has a different successful payment.
    #[error("Order {0} already has a successful payment")]
    PaymentAlreadySettled(OrderId),

    /// The product is still referenced by order lines.
    #[error("Product {0} is referenced by orders and cannot be deleted")]
    ProductInUse(ProductId),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored value could not be mapped back onto the domain.
    #[error("Invalid stored data: {0}")]
    InvalidData(String),
}

impl From<StockError> for StoreError {
    fn from(err: StockError) -> Self {
        match err {
            StockError::Insufficient(e) => StoreError::InsufficientStock(e),
            StockError::LimitExceeded(e) => StoreError::StockLimitExceeded(e),
        }
    }
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Returns true if retrying the whole read-modify-write may succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::ConcurrencyConflict { .. })
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
