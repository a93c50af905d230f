//! Low-stock advisories.
//!
//! An advisory is a notification, never an error: it is published after the
//! sale that caused it has committed, and publishing it cannot fail the sale.

use chrono::{DateTime, Utc};
use common::{OrderId, ProductId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Default number of advisories buffered per subscriber.
pub const DEFAULT_ADVISORY_BUFFER: usize = 256;

/// A product's quantity fell to or below its reorder threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowStockAdvisory {
    pub product_id: ProductId,

    /// Quantity left after the sale.
    pub quantity: u32,

    pub reorder_threshold: u32,

    /// The order whose payment triggered the advisory.
    pub order_id: OrderId,

    pub raised_at: DateTime<Utc>,
}

/// Fan-out channel for advisories.
///
/// Subscribers that fall behind lose the oldest advisories; every advisory
/// is also logged and counted, so a lagging subscriber doesn't hide it.
#[derive(Debug, Clone)]
pub struct AdvisoryBus {
    sender: broadcast::Sender<LowStockAdvisory>,
}

impl Default for AdvisoryBus {
    fn default() -> Self {
        Self::new(DEFAULT_ADVISORY_BUFFER)
    }
}

impl AdvisoryBus {
    /// Creates a bus buffering up to `capacity` advisories per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Returns a receiver for advisories published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<LowStockAdvisory> {
        self.sender.subscribe()
    }

    /// Publishes an advisory to every subscriber.
    pub fn publish(&self, advisory: LowStockAdvisory) {
        tracing::warn!(
            product_id = %advisory.product_id,
            quantity = advisory.quantity,
            reorder_threshold = advisory.reorder_threshold,
            order_id = %advisory.order_id,
            "low stock"
        );
        metrics::counter!("low_stock_advisories_total").increment(1);

        // No subscribers is fine.
        let _ = self.sender.send(advisory);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advisory(product: &str, quantity: u32) -> LowStockAdvisory {
        LowStockAdvisory {
            product_id: ProductId::new(product),
            quantity,
            reorder_threshold: 5,
            order_id: OrderId::new(),
            raised_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_subscribers_receive_advisories() {
        let bus = AdvisoryBus::new(8);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.publish(advisory("Q", 2));

        assert_eq!(first.recv().await.unwrap().product_id.as_str(), "Q");
        assert_eq!(second.recv().await.unwrap().quantity, 2);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = AdvisoryBus::default();
        bus.publish(advisory("Q", 0));
    }

    #[test]
    fn test_serialization() {
        let advisory = advisory("Q", 2);
        let json = serde_json::to_string(&advisory).unwrap();
        let deserialized: LowStockAdvisory = serde_json::from_str(&json).unwrap();
        assert_eq!(advisory, deserialized);
    }
}
