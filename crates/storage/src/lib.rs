//! Row storage for orders, order lines and stock records.
//!
//! Every mutation happens inside a [`UnitOfWork`]: rows are locked
//! exclusively for the lifetime of the unit and all writes become visible
//! together on [`UnitOfWork::commit`]. Dropping a unit without committing
//! discards its writes and releases its locks.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod record;
pub mod store;

pub use common::{LineId, Money, OrderId, OrderState, ProductId, UserId};
pub use error::{Result, StorageError};
pub use memory::{InMemoryStore, InMemoryUnit};
pub use postgres::{PostgresStore, PostgresUnit};
pub use record::{OrderLine, OrderRecord, OrderSnapshot, StockRecord};
pub use store::{DEFAULT_LOCK_TIMEOUT, Store, UnitOfWork};
