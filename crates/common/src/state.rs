//! Order lifecycle states.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The lifecycle state of an order.
///
/// ```text
/// entered ──► awaiting_payment ──► paid ──► cancelled
///    │               │                          ▲
///    └───────────────┴──────────────────────────┘
/// ```
///
/// Which of these moves are legal, and what they do to stock, is decided by
/// the domain crate; this type only names and parses the states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    /// Cart is open, lines can be added.
    #[default]
    Entered,

    /// Checkout started, lines are frozen.
    AwaitingPayment,

    /// Payment captured, stock has been decremented.
    Paid,

    /// Terminal.
    Cancelled,
}

impl OrderState {
    pub const ALL: [OrderState; 4] = [
        OrderState::Entered,
        OrderState::AwaitingPayment,
        OrderState::Paid,
        OrderState::Cancelled,
    ];

    /// Returns the persisted name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::Entered => "entered",
            OrderState::AwaitingPayment => "awaiting_payment",
            OrderState::Paid => "paid",
            OrderState::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string does not name an order state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown order state: {0:?}")]
pub struct ParseOrderStateError(pub String);

impl FromStr for OrderState {
    type Err = ParseOrderStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| ParseOrderStateError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_entered() {
        assert_eq!(OrderState::default(), OrderState::Entered);
    }

    #[test]
    fn test_parse_every_state_name() {
        for state in OrderState::ALL {
            assert_eq!(state.as_str().parse::<OrderState>(), Ok(state));
        }
    }

    #[test]
    fn test_parse_unknown_state_fails() {
        let err = "shipped".parse::<OrderState>().unwrap_err();
        assert_eq!(err, ParseOrderStateError("shipped".to_string()));
        assert!("Paid".parse::<OrderState>().is_err());
    }

    #[test]
    fn test_serde_uses_snake_case() {
        let json = serde_json::to_string(&OrderState::AwaitingPayment).unwrap();
        assert_eq!(json, "\"awaiting_payment\"");
        let state: OrderState = serde_json::from_str("\"paid\"").unwrap();
        assert_eq!(state, OrderState::Paid);
    }
}
