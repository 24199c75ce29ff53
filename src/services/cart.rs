use crate::{
    catalog::{CatalogLookup, ProductInfo},
    db::is_unique_violation,
    entities::cart_line,
    errors::ServiceError,
    events::{Event, EventSender},
    money,
};
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr,
    EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

type LineKey = (String, String);

/// One async mutex per `(cart_id, product_id)`; entries are dropped once nobody waits on them.
#[derive(Default)]
struct LineLocks {
    inner: DashMap<LineKey, Arc<Mutex<()>>>,
}

impl LineLocks {
    fn slot(&self, key: LineKey) -> LineSlot<'_> {
        let handle = self.inner.entry(key.clone()).or_default().clone();
        LineSlot {
            locks: self,
            key,
            handle,
        }
    }

    fn release(&self, key: &LineKey) {
        self.inner
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.len()
    }
}

/// A caller's claim on one line lock. Dropping it releases the table entry,
/// including when the owning future is cancelled mid-wait.
struct LineSlot<'a> {
    locks: &'a LineLocks,
    key: LineKey,
    handle: Arc<Mutex<()>>,
}

impl LineSlot<'_> {
    async fn lock(&self) -> MutexGuard<'_, ()> {
        self.handle.lock().await
    }
}

impl Drop for LineSlot<'_> {
    fn drop(&mut self) {
        // Our clone must be gone before the strong count is checked.
        drop(std::mem::take(&mut self.handle));
        self.locks.release(&self.key);
    }
}

/// Cart contents with derived totals.
#[derive(Debug, Clone, Serialize)]
pub struct CartSummary {
    pub cart_id: String,
    pub lines: Vec<cart_line::Model>,
    pub item_count: i64,
    pub subtotal: Decimal,
}

/// Owns cart lines: merges repeated additions and keeps one line per product.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    catalog: Arc<dyn CatalogLookup>,
    event_sender: Arc<EventSender>,
    line_locks: Arc<LineLocks>,
}

impl CartService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        catalog: Arc<dyn CatalogLookup>,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            db,
            catalog,
            event_sender,
            line_locks: Arc::new(LineLocks::default()),
        }
    }

    /// Adds `quantity` of a product, merging into the existing line if there is one.
    ///
    /// Name, description and unit price always come from the catalog, so a merge
    /// also refreshes them. Concurrent adds of the same product to the same cart
    /// are serialized.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        cart_id: &str,
        product_id: &str,
        quantity: i32,
    ) -> Result<cart_line::Model, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::ValidationError(
                "quantity must be at least 1".to_string(),
            ));
        }

        let product = self
            .catalog
            .resolve_product(product_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        let slot = self
            .line_locks
            .slot((cart_id.to_string(), product_id.to_string()));
        let result = {
            let _guard = slot.lock().await;
            self.merge_with_retry(cart_id, &product, quantity).await
        };
        drop(slot);

        let line = result?;

        self.event_sender
            .send_or_log(Event::CartItemAdded {
                cart_id: cart_id.to_string(),
                product_id: product_id.to_string(),
                quantity,
            })
            .await;

        info!(
            "Added item to cart {}: product {} x{} (now {})",
            cart_id, product_id, quantity, line.quantity
        );
        Ok(line)
    }

    /// A unique-index conflict means another instance inserted the line first; merging again
    /// takes the update path.
    async fn merge_with_retry(
        &self,
        cart_id: &str,
        product: &ProductInfo,
        quantity: i32,
    ) -> Result<cart_line::Model, ServiceError> {
        match self.merge_line(cart_id, product, quantity).await {
            Err(ServiceError::DatabaseError(e)) if is_unique_violation(&e) => {
                warn!(cart_id, product_id = %product.product_id, "cart line inserted concurrently, retrying merge");
                self.merge_line(cart_id, product, quantity).await
            }
            other => other,
        }
    }

    async fn merge_line(
        &self,
        cart_id: &str,
        product: &ProductInfo,
        quantity: i32,
    ) -> Result<cart_line::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let now = Utc::now();

        let existing = cart_line::Entity::find()
            .filter(cart_line::Column::CartId.eq(cart_id))
            .filter(cart_line::Column::ProductId.eq(product.product_id.as_str()))
            .one(&txn)
            .await?;

        let line_id = match existing {
            Some(line) => {
                if line.quantity.checked_add(quantity).is_none() {
                    return Err(ServiceError::ValidationError(format!(
                        "quantity for product {} is too large",
                        product.product_id
                    )));
                }

                // Increment in SQL so the row itself is the source of the new total
                cart_line::Entity::update_many()
                    .col_expr(
                        cart_line::Column::Quantity,
                        Expr::col(cart_line::Column::Quantity).add(quantity),
                    )
                    .col_expr(cart_line::Column::Name, Expr::value(product.name.clone()))
                    .col_expr(
                        cart_line::Column::Description,
                        Expr::value(product.description.clone()),
                    )
                    .col_expr(cart_line::Column::UnitPrice, Expr::value(product.unit_price))
                    .col_expr(cart_line::Column::UpdatedAt, Expr::value(now))
                    .filter(cart_line::Column::Id.eq(line.id))
                    .exec(&txn)
                    .await?;
                line.id
            }
            None => {
                let line = cart_line::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    cart_id: Set(cart_id.to_string()),
                    product_id: Set(product.product_id.clone()),
                    name: Set(product.name.clone()),
                    description: Set(product.description.clone()),
                    unit_price: Set(product.unit_price),
                    quantity: Set(quantity),
                    created_at: Set(now),
                    updated_at: Set(now),
                };
                line.insert(&txn).await?.id
            }
        };

        let line = cart_line::Entity::find_by_id(line_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::InternalError("cart line vanished during merge".into()))?;

        txn.commit().await?;
        Ok(normalized(line))
    }

    /// Lines of the cart in the order they were first added.
    #[instrument(skip(self))]
    pub async fn list_items(&self, cart_id: &str) -> Result<Vec<cart_line::Model>, ServiceError> {
        let lines = load_lines(&*self.db, cart_id).await?;
        Ok(lines.into_iter().map(normalized).collect())
    }

    #[instrument(skip(self))]
    pub async fn summary(&self, cart_id: &str) -> Result<CartSummary, ServiceError> {
        let lines = self.list_items(cart_id).await?;
        let item_count = lines.iter().map(|l| i64::from(l.quantity)).sum();
        let subtotal = money::normalize(
            lines
                .iter()
                .map(|l| l.unit_price * Decimal::from(l.quantity))
                .sum(),
        );

        Ok(CartSummary {
            cart_id: cart_id.to_string(),
            lines,
            item_count,
            subtotal,
        })
    }

    /// Sets a line's quantity. Zero removes the line and returns `None`.
    #[instrument(skip(self))]
    pub async fn update_quantity(
        &self,
        cart_id: &str,
        product_id: &str,
        quantity: i32,
    ) -> Result<Option<cart_line::Model>, ServiceError> {
        if quantity < 0 {
            return Err(ServiceError::ValidationError(
                "quantity cannot be negative".to_string(),
            ));
        }

        let slot = self
            .line_locks
            .slot((cart_id.to_string(), product_id.to_string()));
        let result = {
            let _guard = slot.lock().await;
            self.set_quantity(cart_id, product_id, quantity).await
        };
        drop(slot);

        let updated = result?;
        debug!(cart_id, product_id, quantity, "cart line quantity set");
        Ok(updated)
    }

    async fn set_quantity(
        &self,
        cart_id: &str,
        product_id: &str,
        quantity: i32,
    ) -> Result<Option<cart_line::Model>, ServiceError> {
        let txn = self.db.begin().await?;

        let line = cart_line::Entity::find()
            .filter(cart_line::Column::CartId.eq(cart_id))
            .filter(cart_line::Column::ProductId.eq(product_id))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} is not in the cart", product_id))
            })?;

        let updated = if quantity == 0 {
            cart_line::Entity::delete_by_id(line.id).exec(&txn).await?;
            None
        } else {
            let mut line: cart_line::ActiveModel = line.into();
            line.quantity = Set(quantity);
            line.updated_at = Set(Utc::now());
            Some(normalized(line.update(&txn).await?))
        };

        txn.commit().await?;
        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn remove_item(&self, cart_id: &str, product_id: &str) -> Result<(), ServiceError> {
        self.update_quantity(cart_id, product_id, 0).await.map(|_| ())
    }

    /// Deletes every line of the cart and returns how many were removed.
    #[instrument(skip(self))]
    pub async fn clear(&self, cart_id: &str) -> Result<u64, ServiceError> {
        let removed = clear_lines(&*self.db, cart_id).await?;

        self.event_sender
            .send_or_log(Event::CartCleared {
                cart_id: cart_id.to_string(),
            })
            .await;

        info!("Cleared cart {} ({} lines)", cart_id, removed);
        Ok(removed)
    }
}

fn normalized(mut line: cart_line::Model) -> cart_line::Model {
    line.unit_price = money::normalize(line.unit_price);
    line
}

/// Lines of a cart on any connection, oldest first.
pub(crate) async fn load_lines<C: ConnectionTrait>(
    conn: &C,
    cart_id: &str,
) -> Result<Vec<cart_line::Model>, DbErr> {
    cart_line::Entity::find()
        .filter(cart_line::Column::CartId.eq(cart_id))
        .order_by_asc(cart_line::Column::CreatedAt)
        .order_by_asc(cart_line::Column::Id)
        .all(conn)
        .await
}

/// Deletes all lines of a cart on any connection, typically inside a caller's transaction.
pub(crate) async fn clear_lines<C: ConnectionTrait>(conn: &C, cart_id: &str) -> Result<u64, DbErr> {
    let result = cart_line::Entity::delete_many()
        .filter(cart_line::Column::CartId.eq(cart_id))
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}
