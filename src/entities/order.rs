use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::checkout_session::SnapshotLine;

#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[sea_orm(string_value = "PENDING")]
    Pending,
    #[sea_orm(string_value = "PAID")]
    Paid,
    #[sea_orm(string_value = "FAILED")]
    Failed,
}

impl OrderStatus {
    /// PAID and FAILED never change once written.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Paid | OrderStatus::Failed)
    }
}

/// Outcome of a payment session. At most one row per `session_id`; rows are never deleted.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub session_id: String,
    pub cart_id: Option<String>,
    pub customer_email: Option<String>,
    pub total_amount: Decimal,
    pub currency: String,
    pub status: OrderStatus,
    #[sea_orm(column_type = "Json")]
    pub items: Json,
    pub notified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Model {
    pub fn lines(&self) -> Result<Vec<SnapshotLine>, serde_json::Error> {
        serde_json::from_value(self.items.clone())
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::checkout_session::Entity",
        from = "Column::SessionId",
        to = "super::checkout_session::Column::SessionId"
    )]
    CheckoutSession,
}

impl Related<super::checkout_session::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CheckoutSession.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
