//! Read-only collaborators: the product catalog and the user store.
//!
//! The fulfillment core never writes to either. The in-memory
//! implementations expose their own mutators for seeding and tests.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use common::{Money, ProductId, UserId};
use storage::PostgresStore;
use tokio::sync::RwLock;

use crate::error::Result;

/// Source of product prices.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Returns the current price of a product, or None if it is unknown.
    async fn product_price(&self, product_id: &ProductId) -> Result<Option<Money>>;

    /// Returns true if the product exists.
    async fn product_exists(&self, product_id: &ProductId) -> Result<bool> {
        Ok(self.product_price(product_id).await?.is_some())
    }
}

/// Source of account identity.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Returns true if the user exists.
    async fn user_exists(&self, user_id: UserId) -> Result<bool>;
}

/// A catalog entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogProduct {
    pub name: String,
    pub price: Money,
}

/// In-memory catalog.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    products: Arc<RwLock<HashMap<ProductId, CatalogProduct>>>,
}

impl InMemoryCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a product.
    pub async fn add_product(
        &self,
        product_id: impl Into<ProductId>,
        name: impl Into<String>,
        price: Money,
    ) {
        self.products.write().await.insert(
            product_id.into(),
            CatalogProduct {
                name: name.into(),
                price,
            },
        );
    }

    /// Adds a product unless one with the same ID exists. Returns false,
    /// leaving the catalog untouched, if it does.
    pub async fn insert_new(
        &self,
        product_id: impl Into<ProductId>,
        name: impl Into<String>,
        price: Money,
    ) -> bool {
        match self.products.write().await.entry(product_id.into()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(CatalogProduct {
                    name: name.into(),
                    price,
                });
                true
            }
        }
    }

    /// Changes the price of an existing product. Returns false if the
    /// product is unknown.
    pub async fn set_price(&self, product_id: &ProductId, price: Money) -> bool {
        match self.products.write().await.get_mut(product_id) {
            Some(product) => {
                product.price = price;
                true
            }
            None => false,
        }
    }

    /// Removes a product. Callers check
    /// `FulfillmentService::ensure_product_removable` first.
    pub async fn remove_product(&self, product_id: &ProductId) -> Option<CatalogProduct> {
        self.products.write().await.remove(product_id)
    }

    /// Returns a product by ID.
    pub async fn get(&self, product_id: &ProductId) -> Option<CatalogProduct> {
        self.products.read().await.get(product_id).cloned()
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn product_price(&self, product_id: &ProductId) -> Result<Option<Money>> {
        Ok(self
            .products
            .read()
            .await
            .get(product_id)
            .map(|product| product.price))
    }
}

/// In-memory user store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryUserDirectory {
    users: Arc<RwLock<HashSet<UserId>>>,
}

impl InMemoryUserDirectory {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a user.
    pub async fn register(&self, user_id: UserId) {
        self.users.write().await.insert(user_id);
    }

    /// Removes a user. Callers check
    /// `FulfillmentService::ensure_user_removable` first.
    pub async fn remove(&self, user_id: UserId) -> bool {
        self.users.write().await.remove(&user_id)
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn user_exists(&self, user_id: UserId) -> Result<bool> {
        Ok(self.users.read().await.contains(&user_id))
    }
}

#[async_trait]
impl Catalog for PostgresStore {
    async fn product_price(&self, product_id: &ProductId) -> Result<Option<Money>> {
        Ok(PostgresStore::product_price(self, product_id).await?)
    }
}

#[async_trait]
impl UserDirectory for PostgresStore {
    async fn user_exists(&self, user_id: UserId) -> Result<bool> {
        Ok(PostgresStore::user_exists(self, user_id).await?)
    }
}
