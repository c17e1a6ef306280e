use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::PaymentStatus;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payment_attempts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub payment_intent_id: Uuid,
    pub provider_id: String,
    pub org_provider_account_id: Uuid,
    pub status: PaymentStatus,
    pub provider_payment_id: Option<String>,
    pub checkout_url: Option<String>,
    /// Registration round-trip as recorded by the adapter; `{}` until registered.
    pub raw_init_response: Json,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::payment_intent::Entity",
        from = "Column::PaymentIntentId",
        to = "super::payment_intent::Column::Id"
    )]
    PaymentIntent,
    #[sea_orm(
        belongs_to = "super::org_provider_account::Entity",
        from = "Column::OrgProviderAccountId",
        to = "super::org_provider_account::Column::Id"
    )]
    OrgProviderAccount,
}

impl Related<super::payment_intent::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PaymentIntent.def()
    }
}

impl Related<super::org_provider_account::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrgProviderAccount.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
