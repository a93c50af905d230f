use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    LineId, Money, OrderId, OrderLine, OrderRecord, OrderSnapshot, OrderState, ProductId, Result,
    StockRecord, StorageError, UserId,
    store::{DEFAULT_LOCK_TIMEOUT, Store, UnitOfWork},
};

const ORDER_COLUMNS: &str = "order_id, user_id, state, created_at, updated_at";
const LINE_COLUMNS: &str =
    "line_id, order_id, product_id, quantity, unit_price_cents, created_at";
const STOCK_COLUMNS: &str = "product_id, quantity, reorder_threshold, updated_at";

/// PostgreSQL-backed store.
///
/// Row locks are `SELECT ... FOR UPDATE` inside a database transaction; the
/// lock wait is bounded per transaction through the `lock_timeout` setting.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Sets how long transactions wait for a row lock.
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Reads the current catalog price of a product.
    pub async fn product_price(&self, product_id: &ProductId) -> Result<Option<Money>> {
        let cents: Option<i64> =
            sqlx::query_scalar("SELECT price_cents FROM products WHERE product_id = $1")
                .bind(product_id.as_str())
                .fetch_optional(&self.pool)
                .await?;
        Ok(cents.map(Money::from_cents))
    }

    /// Returns true if the user exists.
    pub async fn user_exists(&self, user_id: UserId) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE user_id = $1)")
                .bind(user_id.as_uuid())
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }
}

fn to_u32(value: i64, column: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| StorageError::Corrupt(format!("{column} = {value}")))
}

fn row_to_order(row: &PgRow) -> Result<OrderRecord> {
    let state: String = row.try_get("state")?;
    Ok(OrderRecord {
        order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
        user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
        state: state
            .parse::<OrderState>()
            .map_err(|e| StorageError::Corrupt(e.to_string()))?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

fn row_to_line(row: &PgRow) -> Result<OrderLine> {
    Ok(OrderLine {
        line_id: LineId::from_uuid(row.try_get::<Uuid, _>("line_id")?),
        order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
        product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
        quantity: to_u32(row.try_get("quantity")?, "order_lines.quantity")?,
        unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

fn row_to_stock(row: &PgRow) -> Result<StockRecord> {
    Ok(StockRecord {
        product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
        quantity: to_u32(row.try_get("quantity")?, "stock_records.quantity")?,
        reorder_threshold: to_u32(
            row.try_get("reorder_threshold")?,
            "stock_records.reorder_threshold",
        )?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

async fn fetch_lines(
    tx: &mut Transaction<'static, Postgres>,
    order_id: OrderId,
) -> Result<Vec<OrderLine>> {
    // "C" collation matches the byte-wise ordering of `ProductId`.
    let rows = sqlx::query(&format!(
        r#"SELECT {LINE_COLUMNS} FROM order_lines WHERE order_id = $1 ORDER BY product_id COLLATE "C""#
    ))
    .bind(order_id.as_uuid())
    .fetch_all(&mut **tx)
    .await?;

    rows.iter().map(row_to_line).collect()
}

/// Renders a lock wait bound for `lock_timeout`. PostgreSQL reads `0` as
/// "wait forever", so anything shorter than a millisecond becomes `1ms`.
fn lock_timeout_setting(timeout: Duration) -> String {
    format!("{}ms", timeout.as_millis().max(1))
}

#[async_trait]
impl Store for PostgresStore {
    type Unit = PostgresUnit;

    async fn begin(&self) -> Result<PostgresUnit> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(lock_timeout_setting(self.lock_timeout))
            .execute(&mut *tx)
            .await?;

        Ok(PostgresUnit { tx })
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<OrderSnapshot>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE order_id = $1"
        ))
        .bind(order_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;

        let snapshot = match row {
            Some(row) => Some(OrderSnapshot {
                order: row_to_order(&row)?,
                lines: fetch_lines(&mut tx, order_id).await?,
            }),
            None => None,
        };

        tx.commit().await?;
        Ok(snapshot)
    }

    async fn get_stock(&self, product_id: &ProductId) -> Result<Option<StockRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {STOCK_COLUMNS} FROM stock_records WHERE product_id = $1"
        ))
        .bind(product_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_stock).transpose()
    }
}

/// Atomic unit over a [`PostgresStore`]: one database transaction.
pub struct PostgresUnit {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PostgresUnit {
    async fn lock_order(&mut self, order_id: OrderId) -> Result<Option<OrderRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE order_id = $1 FOR UPDATE"
        ))
        .bind(order_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref().map(row_to_order).transpose()
    }

    async fn order_lines(&mut self, order_id: OrderId) -> Result<Vec<OrderLine>> {
        fetch_lines(&mut self.tx, order_id).await
    }

    async fn insert_order(&mut self, order: &OrderRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (order_id, user_id, state, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(order.order_id.as_uuid())
        .bind(order.user_id.as_uuid())
        .bind(order.state.as_str())
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_order_state(
        &mut self,
        order_id: OrderId,
        state: OrderState,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let result =
            sqlx::query("UPDATE orders SET state = $2, updated_at = $3 WHERE order_id = $1")
                .bind(order_id.as_uuid())
                .bind(state.as_str())
                .bind(updated_at)
                .execute(&mut *self.tx)
                .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::RowNotFound(format!("order {order_id}")));
        }
        Ok(())
    }

    async fn delete_order(&mut self, order_id: OrderId) -> Result<()> {
        sqlx::query("DELETE FROM orders WHERE order_id = $1")
            .bind(order_id.as_uuid())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_line(&mut self, line: &OrderLine) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO order_lines (line_id, order_id, product_id, quantity, unit_price_cents, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(line.line_id.as_uuid())
        .bind(line.order_id.as_uuid())
        .bind(line.product_id.as_str())
        .bind(i64::from(line.quantity))
        .bind(line.unit_price.cents())
        .bind(line.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_line_quantity(
        &mut self,
        order_id: OrderId,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE order_lines SET quantity = $3 WHERE order_id = $1 AND product_id = $2",
        )
        .bind(order_id.as_uuid())
        .bind(product_id.as_str())
        .bind(i64::from(quantity))
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::RowNotFound(format!(
                "order line ({order_id}, {product_id})"
            )));
        }
        Ok(())
    }

    async fn delete_line(&mut self, order_id: OrderId, product_id: &ProductId) -> Result<()> {
        sqlx::query("DELETE FROM order_lines WHERE order_id = $1 AND product_id = $2")
            .bind(order_id.as_uuid())
            .bind(product_id.as_str())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn lock_stock(&mut self, product_id: &ProductId) -> Result<Option<StockRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {STOCK_COLUMNS} FROM stock_records WHERE product_id = $1 FOR UPDATE"
        ))
        .bind(product_id.as_str())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref().map(row_to_stock).transpose()
    }

    async fn insert_stock(&mut self, record: &StockRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO stock_records (product_id, quantity, reorder_threshold, updated_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(record.product_id.as_str())
        .bind(i64::from(record.quantity))
        .bind(i64::from(record.reorder_threshold))
        .bind(record.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_stock(&mut self, record: &StockRecord) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE stock_records
            SET quantity = $2, reorder_threshold = $3, updated_at = $4
            WHERE product_id = $1
            "#,
        )
        .bind(record.product_id.as_str())
        .bind(i64::from(record.quantity))
        .bind(i64::from(record.reorder_threshold))
        .bind(record.updated_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::RowNotFound(format!(
                "stock record {}",
                record.product_id
            )));
        }
        Ok(())
    }

    async fn delete_stock(&mut self, product_id: &ProductId) -> Result<()> {
        sqlx::query("DELETE FROM stock_records WHERE product_id = $1")
            .bind(product_id.as_str())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn product_is_referenced(&mut self, product_id: &ProductId) -> Result<bool> {
        let referenced: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM order_lines WHERE product_id = $1)",
        )
        .bind(product_id.as_str())
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(referenced)
    }

    async fn user_has_orders(&mut self, user_id: UserId) -> Result<bool> {
        let has_orders: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM orders WHERE user_id = $1)")
                .bind(user_id.as_uuid())
                .fetch_one(&mut *self.tx)
                .await?;
        Ok(has_orders)
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_timeout_setting_is_never_unbounded() {
        assert_eq!(lock_timeout_setting(Duration::from_secs(5)), "5000ms");
        assert_eq!(lock_timeout_setting(Duration::from_millis(200)), "200ms");
        assert_eq!(lock_timeout_setting(Duration::ZERO), "1ms");
        assert_eq!(lock_timeout_setting(Duration::from_micros(300)), "1ms");
    }
}
