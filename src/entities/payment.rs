use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// One payment row per gateway order. The gateway order id is the
/// idempotency anchor: webhook processing reaches the owning order only by
/// looking this row up. The refund sub-state is independent of `status` so a
/// failed refund attempt does not destroy the captured record.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[schema(as = Payment)]
#[sea_orm(table_name = "payments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_id: Uuid,

    #[sea_orm(unique)]
    pub gateway_order_id: String,
    #[sea_orm(nullable, unique)]
    pub gateway_payment_id: Option<String>,
    /// Opaque signature kept for audit; never re-derived from.
    #[sea_orm(nullable)]
    pub signature: Option<String>,

    pub status: PaymentStatus,

    /// Minor units. Equals the order's total payable at creation; replaced
    /// by the gateway-reported captured amount on capture.
    pub amount: i64,
    pub currency: String,

    #[sea_orm(nullable)]
    pub method: Option<String>,
    #[sea_orm(nullable)]
    pub upi_vpa: Option<String>,
    #[sea_orm(nullable)]
    pub reference_id: Option<String>,
    #[sea_orm(nullable)]
    pub card_last4: Option<String>,
    #[sea_orm(nullable)]
    pub card_network: Option<String>,
    #[sea_orm(nullable)]
    pub bank_name: Option<String>,

    #[sea_orm(nullable, unique)]
    pub refund_id: Option<String>,
    #[sea_orm(nullable)]
    pub refund_status: Option<RefundStatus>,
    #[sea_orm(nullable)]
    pub refund_amount: Option<i64>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic counter; every update compare-and-swaps on this.
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id"
    )]
    Order,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C: ConnectionTrait>(self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active = self;
        let now = Utc::now();
        if insert {
            if let ActiveValue::NotSet = active.created_at {
                active.created_at = Set(now);
            }
        }
        active.updated_at = Set(now);
        Ok(active)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum, ToSchema)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "CREATED")]
    Created,
    #[sea_orm(string_value = "ATTEMPTED")]
    Attempted,
    #[sea_orm(string_value = "CAPTURED")]
    Captured,
    #[sea_orm(string_value = "FAILED")]
    Failed,
    #[sea_orm(string_value = "REFUNDED")]
    Refunded,
}

impl PaymentStatus {
    /// CAPTURED is a terminal success state reachable only from
    /// CREATED/ATTEMPTED; no handler may regress it.
    pub fn can_transition_to(self, to: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, to),
            (Created, Attempted)
                | (Created, Captured)
                | (Created, Failed)
                | (Attempted, Captured)
                | (Attempted, Failed)
                | (Captured, Refunded)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum, ToSchema)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundStatus {
    #[sea_orm(string_value = "REQUESTED")]
    Requested,
    #[sea_orm(string_value = "PROCESSED")]
    Processed,
    #[sea_orm(string_value = "FAILED")]
    Failed,
}

#[cfg(test)]
mod tests {
    use super::PaymentStatus::*;

    #[test]
    fn captured_is_never_regressed() {
        assert!(!Captured.can_transition_to(Created));
        assert!(!Captured.can_transition_to(Attempted));
        assert!(!Captured.can_transition_to(Failed));
        assert!(Captured.can_transition_to(Refunded));
    }

    #[test]
    fn capture_reachable_only_from_created_or_attempted() {
        assert!(Created.can_transition_to(Captured));
        assert!(Attempted.can_transition_to(Captured));
        assert!(!Failed.can_transition_to(Captured));
        assert!(!Refunded.can_transition_to(Captured));
    }
}
