use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Priced copy of a cart line, frozen when the checkout session is created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotLine {
    pub product_id: String,
    pub name: String,
    pub description: Option<String>,
    pub unit_price: Decimal,
    /// `unit_price` in cents, as sent to the gateway
    pub unit_amount_minor: i64,
    pub quantity: i32,
}

impl SnapshotLine {
    pub fn line_total_minor(&self) -> i64 {
        self.unit_amount_minor * i64::from(self.quantity)
    }
}

/// A payment attempt handed to the gateway. Rows are written once and never updated.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "checkout_sessions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub session_id: String,
    pub cart_id: String,
    #[sea_orm(column_type = "Json")]
    pub line_snapshot: Json,
    pub amount_total_minor: i64,
    pub currency: String,
    #[sea_orm(column_type = "Text")]
    pub redirect_url: String,
    pub created_at: DateTime<Utc>,
}

impl Model {
    /// Decodes the frozen line items.
    pub fn lines(&self) -> Result<Vec<SnapshotLine>, serde_json::Error> {
        serde_json::from_value(self.line_snapshot.clone())
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_one = "super::order::Entity")]
    Order,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
