use std::time::Duration;

use async_trait::async_trait;

use crate::{
    OrderId, OrderLine, OrderRecord, OrderSnapshot, OrderState, ProductId, Result, StockRecord,
    UserId,
};

/// How long a unit waits for a row lock before giving up.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// A transactional row store.
///
/// Reads through the store itself are consistent point-in-time snapshots and
/// take no locks. Mutations go through a [`UnitOfWork`] obtained from
/// [`Store::begin`].
#[async_trait]
pub trait Store: Send + Sync {
    /// The atomic unit type handed out by this store.
    type Unit: UnitOfWork;

    /// Starts a new atomic unit.
    async fn begin(&self) -> Result<Self::Unit>;

    /// Reads an order and its lines.
    ///
    /// Returns None if the order doesn't exist.
    async fn get_order(&self, order_id: OrderId) -> Result<Option<OrderSnapshot>>;

    /// Reads the stock record of a product.
    ///
    /// Returns None if inventory was never initialized for the product.
    async fn get_stock(&self, product_id: &ProductId) -> Result<Option<StockRecord>>;
}

/// An atomic unit of work.
///
/// `lock_*` methods acquire an exclusive lock on the row's key that is held
/// until the unit commits or is dropped; they always return the latest
/// committed value, so a unit that waited on a lock sees the writes of the
/// unit it waited for. Reads inside a unit observe the unit's own writes.
///
/// Dropping a unit without calling [`UnitOfWork::commit`] rolls it back.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Locks an order row.
    async fn lock_order(&mut self, order_id: OrderId) -> Result<Option<OrderRecord>>;

    /// Reads the lines of an order, sorted by product ID.
    ///
    /// Callers lock the order first; lines are only written under that lock.
    async fn order_lines(&mut self, order_id: OrderId) -> Result<Vec<OrderLine>>;

    /// Inserts a new order row. Fails with `DuplicateKey` if it exists.
    async fn insert_order(&mut self, order: &OrderRecord) -> Result<()>;

    /// Writes a new state for a locked order.
    async fn update_order_state(
        &mut self,
        order_id: OrderId,
        state: OrderState,
        updated_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<()>;

    /// Deletes a locked order row.
    async fn delete_order(&mut self, order_id: OrderId) -> Result<()>;

    /// Inserts a line. Fails with `DuplicateKey` if the order already has a
    /// line for the product.
    async fn insert_line(&mut self, line: &OrderLine) -> Result<()>;

    /// Sets the quantity of an existing line. The unit price is never
    /// touched.
    async fn update_line_quantity(
        &mut self,
        order_id: OrderId,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<()>;

    /// Deletes a line.
    async fn delete_line(&mut self, order_id: OrderId, product_id: &ProductId) -> Result<()>;

    /// Locks the stock row of a product.
    ///
    /// The key is locked even when no record exists yet, so concurrent
    /// initializations of the same product serialize.
    async fn lock_stock(&mut self, product_id: &ProductId) -> Result<Option<StockRecord>>;

    /// Inserts a stock record. Fails with `DuplicateKey` if one exists.
    async fn insert_stock(&mut self, record: &StockRecord) -> Result<()>;

    /// Overwrites a locked stock record.
    async fn update_stock(&mut self, record: &StockRecord) -> Result<()>;

    /// Deletes a locked stock record.
    async fn delete_stock(&mut self, product_id: &ProductId) -> Result<()>;

    /// Returns true if any order line references the product.
    async fn product_is_referenced(&mut self, product_id: &ProductId) -> Result<bool>;

    /// Returns true if the user owns any order.
    async fn user_has_orders(&mut self, user_id: UserId) -> Result<bool>;

    /// Makes every write of the unit visible at once and releases its locks.
    async fn commit(self) -> Result<()>;

    /// Discards every write of the unit and releases its locks.
    async fn rollback(self) -> Result<()>;
}
