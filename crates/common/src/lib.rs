//! Shared identifiers and value types.
//!
//! These types are used by both the storage layer and the domain layer, so
//! they carry no behaviour beyond parsing, formatting and arithmetic.

pub mod money;
pub mod state;
pub mod types;

pub use money::Money;
pub use state::{OrderState, ParseOrderStateError};
pub use types::{LineId, OrderId, ProductId, UserId};
