use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::{
    OrderId, OrderLine, OrderRecord, OrderSnapshot, OrderState, ProductId, Result, StockRecord,
    StorageError, UserId,
    store::{DEFAULT_LOCK_TIMEOUT, Store, UnitOfWork},
};

/// Key of a lockable row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RowKey {
    Order(OrderId),
    Stock(ProductId),
}

/// Committed rows.
#[derive(Debug, Default)]
struct Tables {
    orders: HashMap<OrderId, OrderRecord>,
    lines: BTreeMap<(OrderId, ProductId), OrderLine>,
    stock: HashMap<ProductId, StockRecord>,
}

impl Tables {
    fn lines_for(&self, order_id: OrderId) -> impl Iterator<Item = &OrderLine> {
        self.lines
            .range((order_id, ProductId::new(""))..)
            .take_while(move |((id, _), _)| *id == order_id)
            .map(|(_, line)| line)
    }
}

type LockTable = HashMap<RowKey, Arc<Mutex<()>>>;

/// The lock table is only touched between awaits, so a std mutex guards it.
type SharedLockTable = Arc<std::sync::Mutex<LockTable>>;

fn lock_table(table: &SharedLockTable) -> MutexGuard<'_, LockTable> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drops table entries that no unit holds or waits on. Holders and waiters
/// each own a clone of the entry's `Arc`, so a count of one means only the
/// table refers to it.
fn prune(table: &mut LockTable, keys: impl IntoIterator<Item = RowKey>) {
    for key in keys {
        if table
            .get(&key)
            .is_some_and(|row_lock| Arc::strong_count(row_lock) == 1)
        {
            table.remove(&key);
        }
    }
}

/// Row locks held by one unit. Dropping it releases them and prunes their
/// table entries.
struct HeldLocks {
    table: SharedLockTable,
    guards: HashMap<RowKey, OwnedMutexGuard<()>>,
}

impl HeldLocks {
    fn new(table: SharedLockTable) -> Self {
        Self {
            table,
            guards: HashMap::new(),
        }
    }

    async fn acquire(&mut self, key: RowKey, timeout: Duration) -> Result<()> {
        if self.guards.contains_key(&key) {
            return Ok(());
        }

        let row_lock = lock_table(&self.table)
            .entry(key.clone())
            .or_default()
            .clone();

        match tokio::time::timeout(timeout, row_lock.lock_owned()).await {
            Ok(guard) => {
                self.guards.insert(key, guard);
                Ok(())
            }
            Err(_) => {
                tracing::debug!(?key, "row lock wait timed out");
                prune(&mut lock_table(&self.table), [key]);
                Err(StorageError::LockTimeout)
            }
        }
    }
}

impl Drop for HeldLocks {
    fn drop(&mut self) {
        let keys: Vec<RowKey> = self.guards.keys().cloned().collect();
        self.guards.clear();
        prune(&mut lock_table(&self.table), keys);
    }
}

/// In-memory store for tests and the default API binary.
///
/// Row locks are `tokio` mutexes keyed by row; committed rows sit behind a
/// single `RwLock` that commits take for writing, so readers always see
/// either all or none of a unit's writes.
#[derive(Clone)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
    locks: SharedLockTable,
    lock_timeout: Duration,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self {
            tables: Arc::default(),
            locks: Arc::default(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how long units wait for a row lock.
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Returns the total number of committed orders.
    pub async fn order_count(&self) -> usize {
        self.tables.read().await.orders.len()
    }

    /// Returns the number of rows with a lock table entry.
    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        lock_table(&self.locks).len()
    }

    /// Clears all rows.
    pub async fn clear(&self) {
        let mut tables = self.tables.write().await;
        *tables = Tables::default();
    }
}

#[async_trait]
impl Store for InMemoryStore {
    type Unit = InMemoryUnit;

    async fn begin(&self) -> Result<InMemoryUnit> {
        Ok(InMemoryUnit {
            tables: self.tables.clone(),
            lock_timeout: self.lock_timeout,
            held: HeldLocks::new(self.locks.clone()),
            orders: HashMap::new(),
            lines: BTreeMap::new(),
            stock: HashMap::new(),
        })
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<OrderSnapshot>> {
        let tables = self.tables.read().await;
        Ok(tables.orders.get(&order_id).map(|order| OrderSnapshot {
            order: order.clone(),
            lines: tables.lines_for(order_id).cloned().collect(),
        }))
    }

    async fn get_stock(&self, product_id: &ProductId) -> Result<Option<StockRecord>> {
        Ok(self.tables.read().await.stock.get(product_id).cloned())
    }
}

/// Atomic unit over an [`InMemoryStore`].
///
/// Writes are staged in the unit (`None` marks a deletion) and applied to the
/// committed tables in one step on commit.
pub struct InMemoryUnit {
    tables: Arc<RwLock<Tables>>,
    lock_timeout: Duration,
    held: HeldLocks,
    orders: HashMap<OrderId, Option<OrderRecord>>,
    lines: BTreeMap<(OrderId, ProductId), Option<OrderLine>>,
    stock: HashMap<ProductId, Option<StockRecord>>,
}

impl InMemoryUnit {
    async fn acquire(&mut self, key: RowKey) -> Result<()> {
        self.held.acquire(key, self.lock_timeout).await
    }

    async fn read_order(&self, order_id: OrderId) -> Option<OrderRecord> {
        match self.orders.get(&order_id) {
            Some(staged) => staged.clone(),
            None => self.tables.read().await.orders.get(&order_id).cloned(),
        }
    }

    async fn read_stock(&self, product_id: &ProductId) -> Option<StockRecord> {
        match self.stock.get(product_id) {
            Some(staged) => staged.clone(),
            None => self.tables.read().await.stock.get(product_id).cloned(),
        }
    }

    async fn read_line(&self, order_id: OrderId, product_id: &ProductId) -> Option<OrderLine> {
        let key = (order_id, product_id.clone());
        match self.lines.get(&key) {
            Some(staged) => staged.clone(),
            None => self.tables.read().await.lines.get(&key).cloned(),
        }
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnit {
    async fn lock_order(&mut self, order_id: OrderId) -> Result<Option<OrderRecord>> {
        self.acquire(RowKey::Order(order_id)).await?;
        Ok(self.read_order(order_id).await)
    }

    async fn order_lines(&mut self, order_id: OrderId) -> Result<Vec<OrderLine>> {
        let mut merged: BTreeMap<ProductId, OrderLine> = self
            .tables
            .read()
            .await
            .lines_for(order_id)
            .map(|line| (line.product_id.clone(), line.clone()))
            .collect();

        for ((id, product_id), staged) in &self.lines {
            if *id != order_id {
                continue;
            }
            match staged {
                Some(line) => {
                    merged.insert(product_id.clone(), line.clone());
                }
                None => {
                    merged.remove(product_id);
                }
            }
        }

        Ok(merged.into_values().collect())
    }

    async fn insert_order(&mut self, order: &OrderRecord) -> Result<()> {
        self.acquire(RowKey::Order(order.order_id)).await?;
        if self.read_order(order.order_id).await.is_some() {
            return Err(StorageError::DuplicateKey(format!(
                "orders.order_id = {}",
                order.order_id
            )));
        }
        self.orders.insert(order.order_id, Some(order.clone()));
        Ok(())
    }

    async fn update_order_state(
        &mut self,
        order_id: OrderId,
        state: OrderState,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        self.acquire(RowKey::Order(order_id)).await?;
        let mut order = self
            .read_order(order_id)
            .await
            .ok_or_else(|| StorageError::RowNotFound(format!("order {order_id}")))?;
        order.state = state;
        order.updated_at = updated_at;
        self.orders.insert(order_id, Some(order));
        Ok(())
    }

    async fn delete_order(&mut self, order_id: OrderId) -> Result<()> {
        self.acquire(RowKey::Order(order_id)).await?;
        if !self.order_lines(order_id).await?.is_empty() {
            return Err(StorageError::ForeignKeyViolation(format!(
                "order_lines.order_id = {order_id}"
            )));
        }
        self.orders.insert(order_id, None);
        Ok(())
    }

    async fn insert_line(&mut self, line: &OrderLine) -> Result<()> {
        if self.read_line(line.order_id, &line.product_id).await.is_some() {
            return Err(StorageError::DuplicateKey(format!(
                "order_lines ({}, {})",
                line.order_id, line.product_id
            )));
        }
        self.lines.insert(
            (line.order_id, line.product_id.clone()),
            Some(line.clone()),
        );
        Ok(())
    }

    async fn update_line_quantity(
        &mut self,
        order_id: OrderId,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<()> {
        let mut line = self.read_line(order_id, product_id).await.ok_or_else(|| {
            StorageError::RowNotFound(format!("order line ({order_id}, {product_id})"))
        })?;
        line.quantity = quantity;
        self.lines
            .insert((order_id, product_id.clone()), Some(line));
        Ok(())
    }

    async fn delete_line(&mut self, order_id: OrderId, product_id: &ProductId) -> Result<()> {
        self.lines.insert((order_id, product_id.clone()), None);
        Ok(())
    }

    async fn lock_stock(&mut self, product_id: &ProductId) -> Result<Option<StockRecord>> {
        self.acquire(RowKey::Stock(product_id.clone())).await?;
        Ok(self.read_stock(product_id).await)
    }

    async fn insert_stock(&mut self, record: &StockRecord) -> Result<()> {
        self.acquire(RowKey::Stock(record.product_id.clone()))
            .await?;
        if self.read_stock(&record.product_id).await.is_some() {
            return Err(StorageError::DuplicateKey(format!(
                "stock_records.product_id = {}",
                record.product_id
            )));
        }
        self.stock
            .insert(record.product_id.clone(), Some(record.clone()));
        Ok(())
    }

    async fn update_stock(&mut self, record: &StockRecord) -> Result<()> {
        self.acquire(RowKey::Stock(record.product_id.clone()))
            .await?;
        if self.read_stock(&record.product_id).await.is_none() {
            return Err(StorageError::RowNotFound(format!(
                "stock record {}",
                record.product_id
            )));
        }
        self.stock
            .insert(record.product_id.clone(), Some(record.clone()));
        Ok(())
    }

    async fn delete_stock(&mut self, product_id: &ProductId) -> Result<()> {
        self.acquire(RowKey::Stock(product_id.clone())).await?;
        self.stock.insert(product_id.clone(), None);
        Ok(())
    }

    async fn product_is_referenced(&mut self, product_id: &ProductId) -> Result<bool> {
        let staged = self
            .lines
            .iter()
            .filter(|((_, id), _)| id == product_id)
            .map(|(key, line)| (key.clone(), line.is_some()))
            .collect::<HashMap<_, _>>();

        if staged.values().any(|present| *present) {
            return Ok(true);
        }

        let tables = self.tables.read().await;
        Ok(tables
            .lines
            .keys()
            .any(|key| key.1 == *product_id && !staged.contains_key(key)))
    }

    async fn user_has_orders(&mut self, user_id: UserId) -> Result<bool> {
        if self
            .orders
            .values()
            .flatten()
            .any(|order| order.user_id == user_id)
        {
            return Ok(true);
        }

        let tables = self.tables.read().await;
        Ok(tables
            .orders
            .values()
            .any(|order| order.user_id == user_id && !self.orders.contains_key(&order.order_id)))
    }

    async fn commit(self) -> Result<()> {
        let mut tables = self.tables.write().await;

        for (order_id, order) in self.orders {
            match order {
                Some(order) => {
                    tables.orders.insert(order_id, order);
                }
                None => {
                    tables.orders.remove(&order_id);
                }
            }
        }

        for (key, line) in self.lines {
            match line {
                Some(line) => {
                    tables.lines.insert(key, line);
                }
                None => {
                    tables.lines.remove(&key);
                }
            }
        }

        for (product_id, record) in self.stock {
            match record {
                Some(record) => {
                    tables.stock.insert(product_id, record);
                }
                None => {
                    tables.stock.remove(&product_id);
                }
            }
        }

        // Row locks in `self.held` are released only after the tables are
        // updated.
        drop(tables);
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LineId, Money};

    fn line(order_id: OrderId, product: &str, quantity: u32) -> OrderLine {
        OrderLine {
            line_id: LineId::new(),
            order_id,
            product_id: ProductId::new(product),
            quantity,
            unit_price: Money::from_cents(1000),
            created_at: Utc::now(),
        }
    }

    async fn seed_stock(store: &InMemoryStore, product: &str, quantity: u32) {
        let mut unit = store.begin().await.unwrap();
        unit.insert_stock(&StockRecord::new(product, quantity, 0))
            .await
            .unwrap();
        unit.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_commit_makes_writes_visible() {
        let store = InMemoryStore::new();
        let order = OrderRecord::new(OrderId::new(), UserId::new());

        let mut unit = store.begin().await.unwrap();
        unit.insert_order(&order).await.unwrap();
        unit.insert_line(&line(order.order_id, "SKU-002", 1))
            .await
            .unwrap();
        unit.insert_line(&line(order.order_id, "SKU-001", 2))
            .await
            .unwrap();

        assert!(store.get_order(order.order_id).await.unwrap().is_none());

        unit.commit().await.unwrap();

        let snapshot = store.get_order(order.order_id).await.unwrap().unwrap();
        assert_eq!(snapshot.order, order);
        let products: Vec<_> = snapshot.lines.iter().map(|l| l.product_id.as_str()).collect();
        assert_eq!(products, ["SKU-001", "SKU-002"]);
    }

    #[tokio::test]
    async fn test_dropped_unit_discards_writes() {
        let store = InMemoryStore::new();
        seed_stock(&store, "SKU-001", 10).await;

        {
            let mut unit = store.begin().await.unwrap();
            let mut record = unit
                .lock_stock(&ProductId::new("SKU-001"))
                .await
                .unwrap()
                .unwrap();
            record.quantity = 3;
            unit.update_stock(&record).await.unwrap();
        }

        let record = store
            .get_stock(&ProductId::new("SKU-001"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.quantity, 10);

        // The lock was released with the unit.
        let mut unit = store.begin().await.unwrap();
        assert!(unit.lock_stock(&ProductId::new("SKU-001")).await.is_ok());
    }

    #[tokio::test]
    async fn test_unit_reads_its_own_writes() {
        let store = InMemoryStore::new();
        let order_id = OrderId::new();

        let mut unit = store.begin().await.unwrap();
        unit.insert_order(&OrderRecord::new(order_id, UserId::new()))
            .await
            .unwrap();
        unit.insert_line(&line(order_id, "SKU-001", 2)).await.unwrap();
        unit.update_line_quantity(order_id, &ProductId::new("SKU-001"), 7)
            .await
            .unwrap();

        let lines = unit.order_lines(order_id).await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].quantity, 7);

        unit.delete_line(order_id, &ProductId::new("SKU-001"))
            .await
            .unwrap();
        assert!(unit.order_lines(order_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_stock_record_rejected() {
        let store = InMemoryStore::new();
        seed_stock(&store, "SKU-001", 10).await;

        let mut unit = store.begin().await.unwrap();
        let result = unit.insert_stock(&StockRecord::new("SKU-001", 5, 1)).await;
        assert!(matches!(result, Err(StorageError::DuplicateKey(_))));
    }

    #[tokio::test]
    async fn test_duplicate_line_rejected() {
        let store = InMemoryStore::new();
        let order_id = OrderId::new();

        let mut unit = store.begin().await.unwrap();
        unit.insert_line(&line(order_id, "SKU-001", 1)).await.unwrap();
        let result = unit.insert_line(&line(order_id, "SKU-001", 1)).await;
        assert!(matches!(result, Err(StorageError::DuplicateKey(_))));
    }

    #[tokio::test]
    async fn test_lock_wait_times_out() {
        let store = InMemoryStore::new().with_lock_timeout(Duration::from_millis(50));
        seed_stock(&store, "SKU-001", 1).await;

        let mut holder = store.begin().await.unwrap();
        holder
            .lock_stock(&ProductId::new("SKU-001"))
            .await
            .unwrap();

        let mut waiter = store.begin().await.unwrap();
        let result = waiter.lock_stock(&ProductId::new("SKU-001")).await;
        assert!(matches!(result, Err(StorageError::LockTimeout)));

        holder.rollback().await.unwrap();
        assert!(waiter.lock_stock(&ProductId::new("SKU-001")).await.is_ok());
    }

    #[tokio::test]
    async fn test_finished_units_leave_no_lock_entries() {
        let store = InMemoryStore::new().with_lock_timeout(Duration::from_millis(50));
        seed_stock(&store, "SKU-001", 1).await;

        for i in 0..10 {
            let mut unit = store.begin().await.unwrap();
            unit.lock_order(OrderId::new()).await.unwrap();
            unit.lock_stock(&ProductId::new(format!("SKU-{i:03}")))
                .await
                .unwrap();
            if i % 2 == 0 {
                unit.commit().await.unwrap();
            }
        }
        assert_eq!(store.tracked_locks(), 0);

        let mut holder = store.begin().await.unwrap();
        holder
            .lock_stock(&ProductId::new("SKU-001"))
            .await
            .unwrap();
        let mut waiter = store.begin().await.unwrap();
        assert!(waiter.lock_stock(&ProductId::new("SKU-001")).await.is_err());
        assert_eq!(store.tracked_locks(), 1);

        drop(waiter);
        holder.commit().await.unwrap();
        assert_eq!(store.tracked_locks(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_waiter_sees_committed_value() {
        let store = InMemoryStore::new();
        seed_stock(&store, "SKU-001", 5).await;

        let mut holder = store.begin().await.unwrap();
        let mut record = holder
            .lock_stock(&ProductId::new("SKU-001"))
            .await
            .unwrap()
            .unwrap();

        let waiter_store = store.clone();
        let waiter = tokio::spawn(async move {
            let mut unit = waiter_store.begin().await.unwrap();
            unit.lock_stock(&ProductId::new("SKU-001"))
                .await
                .unwrap()
                .unwrap()
                .quantity
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        record.quantity = 2;
        holder.update_stock(&record).await.unwrap();
        holder.commit().await.unwrap();

        assert_eq!(waiter.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_delete_order_with_lines_rejected() {
        let store = InMemoryStore::new();
        let order = OrderRecord::new(OrderId::new(), UserId::new());

        let mut unit = store.begin().await.unwrap();
        unit.insert_order(&order).await.unwrap();
        unit.insert_line(&line(order.order_id, "SKU-001", 1))
            .await
            .unwrap();
        unit.commit().await.unwrap();

        let mut unit = store.begin().await.unwrap();
        let result = unit.delete_order(order.order_id).await;
        assert!(matches!(result, Err(StorageError::ForeignKeyViolation(_))));
    }

    #[tokio::test]
    async fn test_reference_checks() {
        let store = InMemoryStore::new();
        let user_id = UserId::new();
        let order = OrderRecord::new(OrderId::new(), user_id);

        let mut unit = store.begin().await.unwrap();
        unit.insert_order(&order).await.unwrap();
        unit.insert_line(&line(order.order_id, "SKU-001", 1))
            .await
            .unwrap();
        unit.commit().await.unwrap();

        let mut unit = store.begin().await.unwrap();
        assert!(unit.user_has_orders(user_id).await.unwrap());
        assert!(!unit.user_has_orders(UserId::new()).await.unwrap());
        assert!(
            unit.product_is_referenced(&ProductId::new("SKU-001"))
                .await
                .unwrap()
        );
        assert!(
            !unit
                .product_is_referenced(&ProductId::new("SKU-404"))
                .await
                .unwrap()
        );

        unit.delete_line(order.order_id, &ProductId::new("SKU-001"))
            .await
            .unwrap();
        assert!(
            !unit
                .product_is_referenced(&ProductId::new("SKU-001"))
                .await
                .unwrap()
        );
    }
}
