//! Domain error types.

use common::{Money, OrderId, OrderState, ParseOrderStateError, ProductId, UserId};
use storage::StorageError;
use thiserror::Error;

/// Malformed input, rejected before anything is mutated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Quantities must be strictly positive.
    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    NonPositiveQuantity { quantity: i64 },

    /// Quantity does not fit the supported range.
    #[error("Invalid quantity: {quantity} (too large)")]
    QuantityTooLarge { quantity: i64 },

    /// Merging into an existing line would overflow its quantity.
    #[error("Line quantity for {product_id} would overflow")]
    QuantityOverflow { product_id: ProductId },

    /// The requested state is not an order state.
    #[error(transparent)]
    UnknownState(#[from] ParseOrderStateError),

    /// The catalog returned a price below zero.
    #[error("Invalid price for {product_id}: {price}")]
    NegativePrice { product_id: ProductId, price: Money },

    /// A line subtotal or the order total would leave the range of `Money`.
    #[error("Amount for {product_id} would overflow")]
    AmountOverflow { product_id: ProductId },
}

/// Errors returned by the fulfillment core.
///
/// Every variant aborts the atomic unit it was raised in; nothing the unit
/// wrote is kept.
#[derive(Debug, Error)]
pub enum FulfillmentError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The lifecycle does not allow moving from `from` to `to`.
    #[error("Invalid state transition for order {order_id}: {from} -> {to}")]
    InvalidTransition {
        order_id: OrderId,
        from: OrderState,
        to: OrderState,
    },

    /// Lines can only change while the order is `entered`.
    #[error("Order {order_id} cannot be modified in {state} state")]
    OrderNotMutable { order_id: OrderId, state: OrderState },

    /// An ordered product has no stock record. This points at a catalog
    /// entry whose inventory was never initialized.
    #[error("Inventory inconsistency: product {product_id} has no stock record")]
    InventoryInconsistency { product_id: ProductId },

    /// Checkout was requested for an order without lines.
    #[error("Order {0} has no lines")]
    EmptyOrder(OrderId),

    #[error(
        "Insufficient stock for {product_id}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    /// A row lock was not granted in time. Safe to retry.
    #[error("Timed out waiting for a lock; retry the operation")]
    ConcurrencyTimeout,

    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    #[error("User not found: {0}")]
    UserNotFound(UserId),

    #[error("Order {order_id} has no line for product {product_id}")]
    LineNotFound {
        order_id: OrderId,
        product_id: ProductId,
    },

    #[error("Stock already initialized for product {0}")]
    StockAlreadyInitialized(ProductId),

    #[error("Product {0} is referenced by order lines")]
    ProductReferenced(ProductId),

    #[error("User {0} has orders")]
    UserHasOrders(UserId),

    #[error("Order {0} has lines and cannot be deleted")]
    OrderHasLines(OrderId),

    #[error("Storage error: {0}")]
    Storage(StorageError),
}

impl FulfillmentError {
    /// Short, stable name of the error kind, used as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            FulfillmentError::Validation(_) => "validation",
            FulfillmentError::InvalidTransition { .. } => "invalid_transition",
            FulfillmentError::OrderNotMutable { .. } => "order_not_mutable",
            FulfillmentError::EmptyOrder(_) => "empty_order",
            FulfillmentError::InventoryInconsistency { .. } => "inventory_inconsistency",
            FulfillmentError::InsufficientStock { .. } => "insufficient_stock",
            FulfillmentError::ConcurrencyTimeout => "concurrency_timeout",
            FulfillmentError::OrderNotFound(_)
            | FulfillmentError::ProductNotFound(_)
            | FulfillmentError::UserNotFound(_)
            | FulfillmentError::LineNotFound { .. } => "not_found",
            FulfillmentError::StockAlreadyInitialized(_)
            | FulfillmentError::ProductReferenced(_)
            | FulfillmentError::UserHasOrders(_)
            | FulfillmentError::OrderHasLines(_) => "conflict",
            FulfillmentError::Storage(_) => "storage",
        }
    }
}

impl From<StorageError> for FulfillmentError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::LockTimeout => FulfillmentError::ConcurrencyTimeout,
            other => FulfillmentError::Storage(other),
        }
    }
}

impl From<ParseOrderStateError> for FulfillmentError {
    fn from(err: ParseOrderStateError) -> Self {
        FulfillmentError::Validation(err.into())
    }
}

/// Result type for fulfillment operations.
pub type Result<T> = std::result::Result<T, FulfillmentError>;
