use async_trait::async_trait;
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::entities::product;
use crate::errors::ServiceError;
use crate::money;

/// Canonical product facts used to price a cart line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProductInfo {
    pub product_id: String,
    pub name: String,
    pub description: Option<String>,
    pub unit_price: Decimal,
}

/// Read-only product lookup. Each call is a fresh query against the source of truth.
#[async_trait]
pub trait CatalogLookup: Send + Sync {
    /// `Ok(None)` when the product is unknown or not for sale.
    async fn resolve_product(&self, product_id: &str) -> Result<Option<ProductInfo>, ServiceError>;
}

/// Catalog backed by the `products` table.
#[derive(Clone)]
pub struct ProductCatalog {
    db: Arc<DatabaseConnection>,
}

impl ProductCatalog {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CatalogLookup for ProductCatalog {
    #[instrument(skip(self))]
    async fn resolve_product(&self, product_id: &str) -> Result<Option<ProductInfo>, ServiceError> {
        let found = product::Entity::find_by_id(product_id.to_string())
            .filter(product::Column::IsActive.eq(true))
            .one(&*self.db)
            .await?;

        debug!(found = found.is_some(), "catalog lookup");

        Ok(found.map(|p| ProductInfo {
            product_id: p.id,
            name: p.name,
            description: p.description,
            unit_price: money::normalize(p.price),
        }))
    }
}
