//! Read-only view of the product/merchant/customer catalog owned by the
//! surrounding storefront.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::database::error::DatabaseError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductSnapshot {
    pub id: Uuid,
    pub merchant_id: Uuid,
    pub name: String,
    pub unit_price: i64,
    /// Fixed voucher expiry; overrides the default validity window.
    pub ticket_expiry: Option<DateTime<Utc>>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CustomerProfile {
    pub id: Uuid,
    pub email: Option<String>,
    pub name: Option<String>,
}

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn product(&self, id: Uuid) -> Result<Option<ProductSnapshot>, DatabaseError>;

    async fn customer(&self, id: Uuid) -> Result<Option<CustomerProfile>, DatabaseError>;
}

#[derive(Default)]
pub struct InMemoryCatalog {
    products: RwLock<HashMap<Uuid, ProductSnapshot>>,
    customers: RwLock<HashMap<Uuid, CustomerProfile>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_product(&self, product: ProductSnapshot) {
        self.products.write().await.insert(product.id, product);
    }

    pub async fn add_customer(&self, customer: CustomerProfile) {
        self.customers.write().await.insert(customer.id, customer);
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn product(&self, id: Uuid) -> Result<Option<ProductSnapshot>, DatabaseError> {
        Ok(self.products.read().await.get(&id).cloned())
    }

    async fn customer(&self, id: Uuid) -> Result<Option<CustomerProfile>, DatabaseError> {
        Ok(self.customers.read().await.get(&id).cloned())
    }
}
