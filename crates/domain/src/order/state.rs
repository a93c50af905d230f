//! Order lifecycle rules.

use common::OrderState;

/// What a transition does to the stock ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockEffect {
    /// Status change only.
    None,

    /// Every line's quantity is taken from stock.
    Decrement,

    /// Every line's quantity is returned to stock.
    Restore,
}

/// Lifecycle rules on top of [`OrderState`].
///
/// State transitions:
/// ```text
/// Entered ──► AwaitingPayment ──► Paid ──► Cancelled
///    │               │                        ▲
///    ├───────────────┼──► Paid                │
///    └───────────────┴────────────────────────┘
/// ```
pub trait OrderStateExt {
    /// Returns true if lines can be added or removed in this state.
    fn can_modify_lines(&self) -> bool;

    /// Returns the stock effect of moving to `target`, or None if the
    /// lifecycle doesn't allow it.
    fn stock_effect_to(&self, target: OrderState) -> Option<StockEffect>;

    /// Returns true if an order must have lines to enter this state.
    fn requires_lines(&self) -> bool;

    /// Returns true if no further transition is possible.
    fn is_terminal(&self) -> bool;
}

impl OrderStateExt for OrderState {
    fn can_modify_lines(&self) -> bool {
        matches!(self, OrderState::Entered)
    }

    fn stock_effect_to(&self, target: OrderState) -> Option<StockEffect> {
        use OrderState::*;

        match (*self, target) {
            (Entered, AwaitingPayment) => Some(StockEffect::None),
            (Entered | AwaitingPayment, Paid) => Some(StockEffect::Decrement),
            (Entered | AwaitingPayment, Cancelled) => Some(StockEffect::None),
            (Paid, Cancelled) => Some(StockEffect::Restore),
            _ => None,
        }
    }

    fn requires_lines(&self) -> bool {
        matches!(self, OrderState::AwaitingPayment | OrderState::Paid)
    }

    fn is_terminal(&self) -> bool {
        matches!(self, OrderState::Cancelled)
    }
}
