use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Order aggregate root. Monetary columns are integer minor units (paise);
/// the customer/address columns are a snapshot frozen at draft creation and
/// never recomputed from live catalog or profile data.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[schema(as = Order)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: Uuid,

    pub customer_name: String,
    pub phone: String,

    pub ship_house_no: String,
    pub ship_area: String,
    pub ship_landmark: String,
    pub ship_city: String,
    pub ship_state: String,
    pub ship_country: String,
    pub ship_pin_code: String,
    pub ship_address_type: String,

    pub subtotal: i64,
    pub shipping_fee: i64,
    pub cod_fee: i64,
    pub discount: i64,
    pub total_payable: i64,

    pub status: OrderStatus,
    pub payment_method: String,

    #[sea_orm(nullable, unique)]
    pub gateway_order_id: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItems,
    #[sea_orm(has_one = "super::payment::Entity")]
    Payment,
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
    }
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

/// Order status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum, ToSchema)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[sea_orm(string_value = "DRAFT")]
    Draft,
    #[sea_orm(string_value = "PAYMENT_PENDING")]
    PaymentPending,
    #[sea_orm(string_value = "PAID")]
    Paid,
    #[sea_orm(string_value = "CONFIRMED")]
    Confirmed,
    #[sea_orm(string_value = "PACKED")]
    Packed,
    #[sea_orm(string_value = "SHIPPED")]
    Shipped,
    #[sea_orm(string_value = "DELIVERED")]
    Delivered,
    #[sea_orm(string_value = "CANCELLED")]
    Cancelled,
    #[sea_orm(string_value = "FAILED")]
    Failed,
    #[sea_orm(string_value = "REFUND_PENDING")]
    RefundPending,
    #[sea_orm(string_value = "REFUNDED")]
    Refunded,
}

impl OrderStatus {
    /// Terminal for the settlement subsystem: nothing transitions out.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered
                | OrderStatus::Cancelled
                | OrderStatus::Refunded
                | OrderStatus::Failed
        )
    }

    /// Whether a transition is legal under the order lifecycle.
    ///
    /// Cancellation is allowed from any non-terminal state; the fulfillment
    /// progression (CONFIRMED -> PACKED -> SHIPPED -> DELIVERED) is strictly
    /// ordered. Same-state transitions are handled as no-ops by callers and
    /// are not legal here.
    pub fn can_transition_to(self, to: OrderStatus) -> bool {
        use OrderStatus::*;
        if self.is_terminal() {
            return false;
        }
        if to == Cancelled {
            return true;
        }
        matches!(
            (self, to),
            (Draft, PaymentPending)
                | (Draft, Confirmed)
                | (PaymentPending, Paid)
                | (PaymentPending, Failed)
                | (Paid, Confirmed)
                | (Paid, RefundPending)
                | (Confirmed, RefundPending)
                | (RefundPending, Refunded)
                | (Confirmed, Packed)
                | (Packed, Shipped)
                | (Shipped, Delivered)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::OrderStatus::{self, *};

    const ALL: [OrderStatus; 11] = [
        Draft,
        PaymentPending,
        Paid,
        Confirmed,
        Packed,
        Shipped,
        Delivered,
        Cancelled,
        Failed,
        RefundPending,
        Refunded,
    ];

    #[test]
    fn terminal_states_admit_no_transitions() {
        for terminal in [Delivered, Cancelled, Refunded, Failed] {
            for target in ALL {
                assert!(
                    !terminal.can_transition_to(target),
                    "{terminal:?} -> {target:?} should be rejected"
                );
            }
        }
    }

    #[test]
    fn cancellation_allowed_from_any_non_terminal() {
        for from in [Draft, PaymentPending, Paid, Confirmed, Packed, Shipped, RefundPending] {
            assert!(from.can_transition_to(Cancelled), "{from:?} -> CANCELLED");
        }
        assert!(!Delivered.can_transition_to(Cancelled));
    }

    #[test]
    fn fulfillment_progression_is_ordered() {
        assert!(Confirmed.can_transition_to(Packed));
        assert!(Packed.can_transition_to(Shipped));
        assert!(Shipped.can_transition_to(Delivered));
        assert!(!Confirmed.can_transition_to(Shipped));
        assert!(!Packed.can_transition_to(Delivered));
        assert!(!Shipped.can_transition_to(Packed));
    }

    #[test]
    fn settlement_transitions() {
        assert!(PaymentPending.can_transition_to(Paid));
        assert!(Draft.can_transition_to(Confirmed));
        assert!(Paid.can_transition_to(Confirmed));
        assert!(!Draft.can_transition_to(Paid));
        assert!(Paid.can_transition_to(RefundPending));
        assert!(RefundPending.can_transition_to(Refunded));
    }
}
