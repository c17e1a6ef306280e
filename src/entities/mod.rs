//! Ledger tables and the status vocabularies they share.

pub mod checkout_session;
pub mod customer;
pub mod org_provider_account;
pub mod org_provider_account_secret;
pub mod payment_attempt;
pub mod payment_event;
pub mod payment_intent;

use sea_orm::entity::prelude::*;
use sea_orm::Iterable;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Status shared by payment intents and payment attempts.
///
/// Statuses are ordered by rank: `open`/`initialized` < `requires_action` <
/// `processing` < terminal. A status may only move to a strictly higher rank and
/// terminal statuses never change, which makes replayed and reordered webhook
/// deliveries harmless.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "open")]
    Open,
    #[sea_orm(string_value = "initialized")]
    Initialized,
    #[sea_orm(string_value = "requires_action")]
    RequiresAction,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "succeeded")]
    Succeeded,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "canceled")]
    Canceled,
}

impl PaymentStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Open | Self::Initialized => 0,
            Self::RequiresAction => 1,
            Self::Processing => 2,
            Self::Succeeded | Self::Failed | Self::Canceled => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 3
    }

    pub fn can_transition_to(self, target: PaymentStatus) -> bool {
        !self.is_terminal() && target.rank() > self.rank()
    }

    /// Every status from which `target` is a legal next step.
    pub fn predecessors_of(target: PaymentStatus) -> Vec<PaymentStatus> {
        Self::iter()
            .filter(|status| status.can_transition_to(target))
            .collect()
    }

    /// Attempt statuses that still represent a live provider checkout.
    pub fn is_pending_attempt(self) -> bool {
        matches!(
            self,
            Self::Initialized | Self::RequiresAction | Self::Processing
        )
    }
}

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SessionStatus {
    #[sea_orm(string_value = "open")]
    Open,
    #[sea_orm(string_value = "succeeded")]
    Succeeded,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "canceled")]
    Canceled,
}

impl SessionStatus {
    /// Session status that closes a session once its intent reaches `status`.
    pub fn closed_by(status: PaymentStatus) -> Option<SessionStatus> {
        match status {
            PaymentStatus::Succeeded => Some(Self::Succeeded),
            PaymentStatus::Failed => Some(Self::Failed),
            PaymentStatus::Canceled => Some(Self::Canceled),
            _ => None,
        }
    }
}

/// Provider environment a merchant account belongs to.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProviderEnvironment {
    #[sea_orm(string_value = "test")]
    Test,
    #[sea_orm(string_value = "live")]
    Live,
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "disabled")]
    Disabled,
}
