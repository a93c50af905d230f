//! Stock ledger operations.
//!
//! Every function that touches more than one stock row locks the rows in
//! ascending product ID order. Two units selling overlapping products
//! therefore always queue on the same first row instead of deadlocking.

use chrono::{DateTime, Utc};
use common::{OrderId, ProductId};
use storage::{OrderLine, StockRecord, UnitOfWork};

use crate::advisory::LowStockAdvisory;
use crate::error::{FulfillmentError, Result, ValidationError};

/// Takes `requested` units out of a record.
///
/// Fails with `InsufficientStock` and leaves the record untouched if fewer
/// units are available.
pub fn take(record: &mut StockRecord, requested: u32, now: DateTime<Utc>) -> Result<()> {
    let remaining = record.quantity.checked_sub(requested).ok_or_else(|| {
        FulfillmentError::InsufficientStock {
            product_id: record.product_id.clone(),
            requested,
            available: record.quantity,
        }
    })?;
    record.quantity = remaining;
    record.updated_at = now;
    Ok(())
}

/// Returns `quantity` units to a record. There is no upper bound other than
/// the width of the counter.
pub fn restore(record: &mut StockRecord, quantity: u32, now: DateTime<Utc>) -> Result<()> {
    record.quantity = record.quantity.checked_add(quantity).ok_or_else(|| {
        ValidationError::QuantityOverflow {
            product_id: record.product_id.clone(),
        }
    })?;
    record.updated_at = now;
    Ok(())
}

/// Returns true if the record is at or below its reorder threshold.
pub fn is_low(record: &StockRecord) -> bool {
    record.quantity <= record.reorder_threshold
}

/// Lines in lock order.
fn in_lock_order(lines: &[OrderLine]) -> Vec<&OrderLine> {
    let mut sorted: Vec<&OrderLine> = lines.iter().collect();
    sorted.sort_by(|a, b| a.product_id.cmp(&b.product_id));
    sorted
}

async fn lock_existing<U: UnitOfWork>(unit: &mut U, product_id: &ProductId) -> Result<StockRecord> {
    unit.lock_stock(product_id)
        .await?
        .ok_or_else(|| FulfillmentError::InventoryInconsistency {
            product_id: product_id.clone(),
        })
}

/// Decrements stock for every line of a paid order inside `unit`.
///
/// Returns the advisories to publish once the unit has committed. On error
/// the caller drops the unit, which discards the decrements already staged.
pub async fn sell_lines<U: UnitOfWork>(
    unit: &mut U,
    order_id: OrderId,
    lines: &[OrderLine],
    now: DateTime<Utc>,
) -> Result<Vec<LowStockAdvisory>> {
    let mut advisories = Vec::new();

    for line in in_lock_order(lines) {
        let mut record = lock_existing(unit, &line.product_id).await?;
        take(&mut record, line.quantity, now)?;
        unit.update_stock(&record).await?;

        tracing::debug!(
            product_id = %record.product_id,
            sold = line.quantity,
            remaining = record.quantity,
            "stock decremented"
        );

        if is_low(&record) {
            advisories.push(LowStockAdvisory {
                product_id: record.product_id,
                quantity: record.quantity,
                reorder_threshold: record.reorder_threshold,
                order_id,
                raised_at: now,
            });
        }
    }

    Ok(advisories)
}

/// Returns every line's quantity to stock inside `unit`.
pub async fn restore_lines<U: UnitOfWork>(
    unit: &mut U,
    lines: &[OrderLine],
    now: DateTime<Utc>,
) -> Result<()> {
    for line in in_lock_order(lines) {
        let mut record = lock_existing(unit, &line.product_id).await?;
        restore(&mut record, line.quantity, now)?;
        unit.update_stock(&record).await?;

        tracing::debug!(
            product_id = %record.product_id,
            restored = line.quantity,
            quantity = record.quantity,
            "stock restored"
        );
    }
    Ok(())
}
