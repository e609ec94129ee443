use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::payment::PaymentStatus;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    strum::Display,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SlipStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "verified")]
    Verified,
    #[sea_orm(string_value = "rejected")]
    Rejected,
}

impl SlipStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SlipStatus::Pending)
    }

    /// Payment status implied by this slip status.
    pub fn payment_status(self) -> PaymentStatus {
        match self {
            SlipStatus::Pending => PaymentStatus::Pending,
            SlipStatus::Verified => PaymentStatus::Completed,
            SlipStatus::Rejected => PaymentStatus::Failed,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payment_slips")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: Uuid,
    #[sea_orm(unique)]
    pub payment_id: Uuid,
    #[sea_orm(unique)]
    pub slip_code: String,
    /// Reference number claimed by the customer
    pub reference_number: String,
    /// Claimed amount in minor units
    pub amount_minor: i64,
    /// Original client-side file name
    pub file_name: String,
    /// Relative URL under `/uploads/`
    pub file_url: String,
    pub status: SlipStatus,
    pub admin_remarks: Option<String>,
    pub verified_by: Option<Uuid>,
    pub verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::payment::Entity",
        from = "Column::PaymentId",
        to = "super::payment::Column::Id"
    )]
    Payment,
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,
}

impl Related<super::payment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Payment.def()
    }
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_map_to_payment_outcome() {
        assert!(!SlipStatus::Pending.is_terminal());
        assert_eq!(SlipStatus::Verified.payment_status(), PaymentStatus::Completed);
        assert_eq!(SlipStatus::Rejected.payment_status(), PaymentStatus::Failed);
        assert_eq!(SlipStatus::Rejected.to_string(), "rejected");
    }
}
