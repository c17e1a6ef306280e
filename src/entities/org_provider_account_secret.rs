use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Provider credentials for one merchant account.
///
/// The blob is stored already decrypted by the secrets collaborator that writes
/// it; adapters decode it into their own typed credential shape.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "org_provider_account_secrets")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub org_provider_account_id: Uuid,
    #[serde(skip_serializing)]
    pub credentials: Json,
    pub rotation_version: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::org_provider_account::Entity",
        from = "Column::OrgProviderAccountId",
        to = "super::org_provider_account::Column::Id"
    )]
    OrgProviderAccount,
}

impl Related<super::org_provider_account::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrgProviderAccount.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
