//! Order fulfillment core.
//!
//! This crate keeps order state and the stock ledger consistent:
//! - Order aggregate with the cart merge rule
//! - Lifecycle rules deciding each transition's stock effect
//! - Stock ledger arithmetic with ordered row locking
//! - Low-stock advisories published after commit
//! - `FulfillmentService`, the single entry point for every mutation

pub mod advisory;
pub mod collaborators;
pub mod error;
pub mod order;
pub mod service;
pub mod stock;

pub use advisory::{AdvisoryBus, DEFAULT_ADVISORY_BUFFER, LowStockAdvisory};
pub use collaborators::{
    Catalog, CatalogProduct, InMemoryCatalog, InMemoryUserDirectory, UserDirectory,
};
pub use common::{LineId, Money, OrderId, OrderState, ProductId, UserId};
pub use error::{FulfillmentError, Result, ValidationError};
pub use order::{LineChange, Order, OrderStateExt, StockEffect, parse_quantity};
pub use service::FulfillmentService;
