//! Persisted rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{LineId, Money, OrderId, OrderState, ProductId, UserId};

/// Available quantity of one product. One row per product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRecord {
    pub product_id: ProductId,

    /// Units currently sellable. Never negative.
    pub quantity: u32,

    /// A sale that leaves `quantity` at or below this value raises a
    /// low-stock advisory.
    pub reorder_threshold: u32,

    pub updated_at: DateTime<Utc>,
}

impl StockRecord {
    /// Creates a stock record stamped with the current time.
    pub fn new(product_id: impl Into<ProductId>, quantity: u32, reorder_threshold: u32) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
            reorder_threshold,
            updated_at: Utc::now(),
        }
    }
}

/// Order header row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub state: OrderState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderRecord {
    /// Creates an empty order in the initial state.
    pub fn new(order_id: OrderId, user_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            order_id,
            user_id,
            state: OrderState::default(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// One product entry of an order. Unique per (order, product).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub line_id: LineId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: u32,

    /// Catalog price at the time the line was created. Storage never
    /// updates this column.
    pub unit_price: Money,

    pub created_at: DateTime<Utc>,
}

impl OrderLine {
    /// Returns quantity × unit price snapshot.
    pub fn subtotal(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

/// An order header with all of its lines, read at a single point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub order: OrderRecord,

    /// Sorted by product ID.
    pub lines: Vec<OrderLine>,
}
