//! Product lookups consumed by the order engine.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ledger::Money;

/// Product identifier (SKU).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(String);

impl ProductId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProductId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ProductId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Current catalog view of a product. Prices are copied onto line items at
/// mutation time, stock is only compared against, never reserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Money,
    pub stock: u32,
    pub unit: String,
}

impl Product {
    pub fn new(
        id: impl Into<ProductId>,
        name: impl Into<String>,
        price: Money,
        stock: u32,
        unit: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            price,
            stock,
            unit: unit.into(),
        }
    }
}

#[derive(Debug, Error)]
#[error("Catalog unavailable: {0}")]
pub struct CatalogError(pub String);

#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn product(&self, id: &ProductId) -> Result<Option<Product>, CatalogError>;
}

/// Catalog backed by a map, for tests and local bootstrapping.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    products: Arc<RwLock<HashMap<ProductId, Product>>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_products(products: impl IntoIterator<Item = Product>) -> Self {
        let catalog = Self::new();
        for product in products {
            catalog.upsert(product);
        }
        catalog
    }

    pub fn upsert(&self, product: Product) {
        let mut products = self.products.write().unwrap_or_else(|e| e.into_inner());
        products.insert(product.id.clone(), product);
    }

    pub fn set_price(&self, id: &ProductId, price: Money) {
        let mut products = self.products.write().unwrap_or_else(|e| e.into_inner());
        if let Some(product) = products.get_mut(id) {
            product.price = price;
        }
    }
}

#[async_trait]
impl ProductCatalog for InMemoryCatalog {
    async fn product(&self, id: &ProductId) -> Result<Option<Product>, CatalogError> {
        let products = self.products.read().unwrap_or_else(|e| e.into_inner());
        Ok(products.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookup_and_reprice() {
        let catalog = InMemoryCatalog::with_products([Product::new(
            "TOM-1",
            "Tomatoes",
            Money::from_cents(250),
            40,
            "kg",
        )]);
        let id = ProductId::new("TOM-1");

        catalog.set_price(&id, Money::from_cents(300));

        let product = catalog.product(&id).await.unwrap().unwrap();
        assert_eq!(product.price, Money::from_cents(300));
        assert_eq!(product.stock, 40);
        assert!(catalog.product(&"NOPE".into()).await.unwrap().is_none());
    }
}
