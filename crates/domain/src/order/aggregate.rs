//! Order aggregate and the cart merge rule.

use chrono::{DateTime, Utc};
use common::{LineId, Money, OrderId, OrderState, ProductId, UserId};
use serde::{Deserialize, Serialize};
use storage::{OrderLine, OrderRecord, OrderSnapshot};

use crate::error::{FulfillmentError, Result, ValidationError};

use super::state::{OrderStateExt, StockEffect};

/// Order aggregate root.
///
/// An order header and its lines, read together. Decisions about the order
/// (may a line be merged, may the state change) are made here; the service
/// writes the outcome through a unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    #[serde(flatten)]
    record: OrderRecord,

    /// Sorted by product ID.
    lines: Vec<OrderLine>,
}

/// The write needed to add a product to an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineChange {
    /// No line exists for the product yet.
    Create(OrderLine),

    /// An existing line grows; its price snapshot is kept.
    Merge {
        line_id: LineId,
        product_id: ProductId,
        quantity: u32,
    },
}

impl LineChange {
    /// Returns the ID of the line the change lands on.
    pub fn line_id(&self) -> LineId {
        match self {
            LineChange::Create(line) => line.line_id,
            LineChange::Merge { line_id, .. } => *line_id,
        }
    }
}

/// Converts a caller-supplied quantity into a line quantity.
pub fn parse_quantity(quantity: i64) -> std::result::Result<u32, ValidationError> {
    if quantity <= 0 {
        return Err(ValidationError::NonPositiveQuantity { quantity });
    }
    u32::try_from(quantity).map_err(|_| ValidationError::QuantityTooLarge { quantity })
}

impl Order {
    /// Builds the aggregate from its header and lines.
    pub fn new(record: OrderRecord, mut lines: Vec<OrderLine>) -> Self {
        lines.sort_by(|a, b| a.product_id.cmp(&b.product_id));
        Self { record, lines }
    }

    pub fn id(&self) -> OrderId {
        self.record.order_id
    }

    pub fn user_id(&self) -> UserId {
        self.record.user_id
    }

    pub fn state(&self) -> OrderState {
        self.record.state
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.record.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.record.updated_at
    }

    /// Returns the header row.
    pub fn record(&self) -> &OrderRecord {
        &self.record
    }

    /// Returns all lines, sorted by product ID.
    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    /// Returns the line for a product.
    pub fn line(&self, product_id: &ProductId) -> Option<&OrderLine> {
        self.lines.iter().find(|line| &line.product_id == product_id)
    }

    pub fn has_lines(&self) -> bool {
        !self.lines.is_empty()
    }

    /// Returns the total quantity over all lines.
    pub fn total_quantity(&self) -> u64 {
        self.lines.iter().map(|line| u64::from(line.quantity)).sum()
    }

    /// Returns the sum of line subtotals.
    pub fn total(&self) -> Money {
        self.lines.iter().map(OrderLine::subtotal).sum()
    }

    /// Fails unless lines may still change.
    pub fn ensure_mutable(&self) -> Result<()> {
        if self.state().can_modify_lines() {
            Ok(())
        } else {
            Err(FulfillmentError::OrderNotMutable {
                order_id: self.id(),
                state: self.state(),
            })
        }
    }

    /// Applies the cart merge rule for adding `quantity` of a product at the
    /// current catalog price.
    ///
    /// A new line captures `unit_price`. An existing line only grows; its
    /// price snapshot stays what it was when the line was created.
    pub fn plan_line(
        &self,
        product_id: &ProductId,
        quantity: u32,
        unit_price: Money,
        now: DateTime<Utc>,
    ) -> Result<LineChange> {
        self.ensure_mutable()?;
        if quantity == 0 {
            return Err(ValidationError::NonPositiveQuantity { quantity: 0 }.into());
        }

        if let Some(existing) = self.line(product_id) {
            let merged = existing.quantity.checked_add(quantity).ok_or_else(|| {
                ValidationError::QuantityOverflow {
                    product_id: product_id.clone(),
                }
            })?;
            self.ensure_total_fits(product_id, existing.unit_price, merged)?;
            return Ok(LineChange::Merge {
                line_id: existing.line_id,
                product_id: product_id.clone(),
                quantity: merged,
            });
        }

        if unit_price.is_negative() {
            return Err(ValidationError::NegativePrice {
                product_id: product_id.clone(),
                price: unit_price,
            }
            .into());
        }
        self.ensure_total_fits(product_id, unit_price, quantity)?;

        Ok(LineChange::Create(OrderLine {
            line_id: LineId::new(),
            order_id: self.id(),
            product_id: product_id.clone(),
            quantity,
            unit_price,
            created_at: now,
        }))
    }

    /// Fails if the line for `product_id` at `quantity` would push its
    /// subtotal or the order total past what `Money` holds.
    fn ensure_total_fits(
        &self,
        product_id: &ProductId,
        unit_price: Money,
        quantity: u32,
    ) -> std::result::Result<(), ValidationError> {
        let overflow = || ValidationError::AmountOverflow {
            product_id: product_id.clone(),
        };
        let subtotal = unit_price.checked_multiply(quantity).ok_or_else(overflow)?;
        self.lines
            .iter()
            .filter(|line| &line.product_id != product_id)
            .try_fold(subtotal, |total, line| {
                line.unit_price
                    .checked_multiply(line.quantity)
                    .and_then(|amount| total.checked_add(amount))
            })
            .ok_or_else(overflow)?;
        Ok(())
    }

    /// Checks that the line for a product may be removed.
    pub fn plan_removal(&self, product_id: &ProductId) -> Result<&OrderLine> {
        self.ensure_mutable()?;
        self.line(product_id)
            .ok_or_else(|| FulfillmentError::LineNotFound {
                order_id: self.id(),
                product_id: product_id.clone(),
            })
    }

    /// Validates a move to `target` and returns its stock effect.
    pub fn plan_transition(&self, target: OrderState) -> Result<StockEffect> {
        let effect = self.state().stock_effect_to(target).ok_or(
            FulfillmentError::InvalidTransition {
                order_id: self.id(),
                from: self.state(),
                to: target,
            },
        )?;

        if target.requires_lines() && !self.has_lines() {
            return Err(FulfillmentError::EmptyOrder(self.id()));
        }

        Ok(effect)
    }

    /// Applies a committed state change to this copy.
    pub(crate) fn set_state(&mut self, state: OrderState, updated_at: DateTime<Utc>) {
        self.record.state = state;
        self.record.updated_at = updated_at;
    }
}

impl From<OrderSnapshot> for Order {
    fn from(snapshot: OrderSnapshot) -> Self {
        Order::new(snapshot.order, snapshot.lines)
    }
}
