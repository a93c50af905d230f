//! Fulfillment service: the public entry point of the core.
//!
//! Every mutating operation runs in one unit of work. The order row is
//! locked first, stock rows after it in ascending product ID order. An
//! error drops the unit, which rolls back everything it staged, so a failed
//! operation leaves orders and stock exactly as they were.

use std::time::Instant;

use chrono::Utc;
use common::{LineId, OrderId, OrderState, ProductId, UserId};
use storage::{OrderRecord, StockRecord, StorageError, Store, UnitOfWork};
use tokio::sync::broadcast;

use crate::advisory::{AdvisoryBus, LowStockAdvisory};
use crate::collaborators::{Catalog, UserDirectory};
use crate::error::{FulfillmentError, Result};
use crate::order::{LineChange, Order, StockEffect, parse_quantity};
use crate::stock;

/// Service keeping order state and the stock ledger consistent.
pub struct FulfillmentService<S, C, U>
where
    S: Store,
    C: Catalog,
    U: UserDirectory,
{
    store: S,
    catalog: C,
    users: U,
    advisories: AdvisoryBus,
}

impl<S, C, U> FulfillmentService<S, C, U>
where
    S: Store,
    C: Catalog,
    U: UserDirectory,
{
    /// Creates a service over a store and its read-only collaborators.
    pub fn new(store: S, catalog: C, users: U) -> Self {
        Self {
            store,
            catalog,
            users,
            advisories: AdvisoryBus::default(),
        }
    }

    /// Replaces the advisory bus.
    pub fn with_advisory_bus(mut self, advisories: AdvisoryBus) -> Self {
        self.advisories = advisories;
        self
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    pub fn users(&self) -> &U {
        &self.users
    }

    /// Returns a receiver for low-stock advisories raised from now on.
    pub fn subscribe_advisories(&self) -> broadcast::Receiver<LowStockAdvisory> {
        self.advisories.subscribe()
    }

    /// Creates an empty order in the `entered` state.
    #[tracing::instrument(skip(self))]
    pub async fn create_order(&self, user_id: UserId) -> Result<OrderId> {
        if !self.users.user_exists(user_id).await? {
            return Err(FulfillmentError::UserNotFound(user_id));
        }

        let record = OrderRecord::new(OrderId::new(), user_id);
        let mut unit = self.store.begin().await?;
        unit.insert_order(&record).await?;
        unit.commit().await?;

        tracing::info!(order_id = %record.order_id, %user_id, "order created");
        Ok(record.order_id)
    }

    /// Adds a product to an order, merging into the existing line if the
    /// order already has one for it.
    ///
    /// A new line captures the current catalog price. A merged line keeps
    /// the price it was created with.
    #[tracing::instrument(skip(self))]
    pub async fn add_or_merge_line(
        &self,
        order_id: OrderId,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<LineId> {
        let quantity = parse_quantity(quantity)?;

        let mut unit = self.store.begin().await?;
        let order = Self::load_locked(&mut unit, order_id).await?;
        order.ensure_mutable()?;

        // Read under the order lock so the price pairs with the lines it is
        // planned against.
        let unit_price = self
            .catalog
            .product_price(&product_id)
            .await?
            .ok_or_else(|| FulfillmentError::ProductNotFound(product_id.clone()))?;

        let change = order.plan_line(&product_id, quantity, unit_price, Utc::now())?;
        match &change {
            LineChange::Create(line) => unit.insert_line(line).await?,
            LineChange::Merge {
                product_id,
                quantity,
                ..
            } => {
                unit.update_line_quantity(order_id, product_id, *quantity)
                    .await?
            }
        }
        unit.commit().await?;

        tracing::info!(
            %order_id,
            %product_id,
            quantity,
            merged = matches!(change, LineChange::Merge { .. }),
            "line added"
        );
        Ok(change.line_id())
    }

    /// Removes the line for a product from an `entered` order.
    #[tracing::instrument(skip(self))]
    pub async fn remove_line(&self, order_id: OrderId, product_id: ProductId) -> Result<()> {
        let mut unit = self.store.begin().await?;
        let order = Self::load_locked(&mut unit, order_id).await?;

        order.plan_removal(&product_id)?;
        unit.delete_line(order_id, &product_id).await?;
        unit.commit().await?;

        tracing::info!(%order_id, %product_id, "line removed");
        Ok(())
    }

    /// Moves an order to `target`, applying the transition's stock effect in
    /// the same unit as the state change.
    ///
    /// This is the only operation that changes an order's state.
    #[tracing::instrument(skip(self))]
    pub async fn transition_state(&self, order_id: OrderId, target: OrderState) -> Result<Order> {
        let start = Instant::now();
        let result = self.apply_transition(order_id, target).await;
        metrics::histogram!("order_transition_duration_seconds")
            .record(start.elapsed().as_secs_f64());

        match &result {
            Ok(_) => {
                metrics::counter!("order_transitions_total", "to" => target.as_str())
                    .increment(1);
            }
            Err(e) => {
                metrics::counter!(
                    "order_transition_failures_total",
                    "to" => target.as_str(),
                    "kind" => e.kind()
                )
                .increment(1);
                tracing::warn!(%order_id, %target, error = %e, "transition rejected");
            }
        }

        result
    }

    async fn apply_transition(&self, order_id: OrderId, target: OrderState) -> Result<Order> {
        let mut unit = self.store.begin().await?;
        let mut order = Self::load_locked(&mut unit, order_id).await?;
        let from = order.state();
        let effect = order.plan_transition(target)?;
        let now = Utc::now();

        let advisories = match effect {
            StockEffect::None => Vec::new(),
            StockEffect::Decrement => {
                stock::sell_lines(&mut unit, order_id, order.lines(), now).await?
            }
            StockEffect::Restore => {
                stock::restore_lines(&mut unit, order.lines(), now).await?;
                Vec::new()
            }
        };

        unit.update_order_state(order_id, target, now).await?;
        unit.commit().await?;
        order.set_state(target, now);

        tracing::info!(%order_id, %from, to = %target, ?effect, "order transitioned");

        for advisory in advisories {
            self.advisories.publish(advisory);
        }

        Ok(order)
    }

    /// Loads an order by ID.
    ///
    /// Returns None if the order doesn't exist.
    #[tracing::instrument(skip(self))]
    pub async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.store.get_order(order_id).await?.map(Order::from))
    }

    /// Loads the stock record of a product.
    ///
    /// Returns None if inventory was never initialized for the product.
    #[tracing::instrument(skip(self))]
    pub async fn get_stock(&self, product_id: &ProductId) -> Result<Option<StockRecord>> {
        Ok(self.store.get_stock(product_id).await?)
    }

    /// Creates the stock record of a catalog product.
    #[tracing::instrument(skip(self))]
    pub async fn initialize_stock(
        &self,
        product_id: ProductId,
        quantity: u32,
        reorder_threshold: u32,
    ) -> Result<StockRecord> {
        if !self.catalog.product_exists(&product_id).await? {
            return Err(FulfillmentError::ProductNotFound(product_id));
        }

        let mut unit = self.store.begin().await?;
        if unit.lock_stock(&product_id).await?.is_some() {
            return Err(FulfillmentError::StockAlreadyInitialized(product_id));
        }

        let record = StockRecord::new(product_id.clone(), quantity, reorder_threshold);
        unit.insert_stock(&record)
            .await
            .map_err(|e| already_initialized(e, &product_id))?;
        unit.commit()
            .await
            .map_err(|e| already_initialized(e, &product_id))?;

        tracing::info!(%product_id, quantity, reorder_threshold, "stock initialized");
        Ok(record)
    }

    /// Fails if any order line references the product, in which case the
    /// catalog must keep it.
    #[tracing::instrument(skip(self))]
    pub async fn ensure_product_removable(&self, product_id: &ProductId) -> Result<()> {
        let mut unit = self.store.begin().await?;
        if unit.product_is_referenced(product_id).await? {
            return Err(FulfillmentError::ProductReferenced(product_id.clone()));
        }
        unit.rollback().await?;
        Ok(())
    }

    /// Deletes the stock record of a product that is leaving the catalog.
    ///
    /// Returns the removed record, or None if the product had none.
    #[tracing::instrument(skip(self))]
    pub async fn release_stock(&self, product_id: &ProductId) -> Result<Option<StockRecord>> {
        let mut unit = self.store.begin().await?;
        let record = unit.lock_stock(product_id).await?;
        if unit.product_is_referenced(product_id).await? {
            return Err(FulfillmentError::ProductReferenced(product_id.clone()));
        }

        if record.is_some() {
            unit.delete_stock(product_id).await?;
        }
        unit.commit().await?;

        tracing::info!(%product_id, released = record.is_some(), "stock released");
        Ok(record)
    }

    /// Fails if the user owns any order.
    #[tracing::instrument(skip(self))]
    pub async fn ensure_user_removable(&self, user_id: UserId) -> Result<()> {
        let mut unit = self.store.begin().await?;
        if unit.user_has_orders(user_id).await? {
            return Err(FulfillmentError::UserHasOrders(user_id));
        }
        unit.rollback().await?;
        Ok(())
    }

    /// Physically deletes an order that has no lines.
    #[tracing::instrument(skip(self))]
    pub async fn delete_order(&self, order_id: OrderId) -> Result<()> {
        let mut unit = self.store.begin().await?;
        let order = Self::load_locked(&mut unit, order_id).await?;
        if order.has_lines() {
            return Err(FulfillmentError::OrderHasLines(order_id));
        }

        unit.delete_order(order_id).await?;
        unit.commit().await?;

        tracing::info!(%order_id, "order deleted");
        Ok(())
    }

    /// Locks the order row and reads its lines.
    async fn load_locked(unit: &mut S::Unit, order_id: OrderId) -> Result<Order> {
        let record = unit
            .lock_order(order_id)
            .await?
            .ok_or(FulfillmentError::OrderNotFound(order_id))?;
        let lines = unit.order_lines(order_id).await?;
        Ok(Order::new(record, lines))
    }
}

/// A concurrent initializer won the insert race.
fn already_initialized(err: StorageError, product_id: &ProductId) -> FulfillmentError {
    match err {
        StorageError::DuplicateKey(_) => {
            FulfillmentError::StockAlreadyInitialized(product_id.clone())
        }
        other => other.into(),
    }
}
