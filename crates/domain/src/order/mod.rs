//! Order aggregate and lifecycle rules.

mod aggregate;
mod state;

pub use aggregate::{LineChange, Order, parse_quantity};
pub use state::{OrderStateExt, StockEffect};
