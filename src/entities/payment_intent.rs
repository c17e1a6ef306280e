use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::PaymentStatus;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payment_intents")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub org_id: String,
    /// Amount in minor units; never changes after creation.
    pub amount_minor: i64,
    pub currency: String,
    pub description: Option<String>,
    pub order_id: Option<String>,
    pub status: PaymentStatus,
    #[serde(skip_serializing)]
    pub client_secret: String,
    pub return_url: Option<String>,
    pub metadata: Json,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::checkout_session::Entity")]
    CheckoutSessions,
    #[sea_orm(has_many = "super::payment_attempt::Entity")]
    PaymentAttempts,
}

impl Related<super::checkout_session::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CheckoutSessions.def()
    }
}

impl Related<super::payment_attempt::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PaymentAttempts.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
