use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveModelBehavior, ActiveValue, ConnectionTrait};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ManufacturingStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "in_progress")]
    InProgress,
    #[sea_orm(string_value = "paused")]
    Paused,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl ManufacturingStatus {
    /// Transition table of the manufacturing order state machine.
    pub fn can_transition_to(self, next: ManufacturingStatus) -> bool {
        use ManufacturingStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (Paused, InProgress)
                | (InProgress, Paused)
                | (InProgress, Completed)
                | (Pending, Cancelled)
                | (InProgress, Cancelled)
                | (Paused, Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "manufacturing_orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub order_number: String,
    pub product_id: Uuid,
    pub recipe_id: Option<Uuid>,
    pub source_order_id: Option<Uuid>,
    pub warehouse_id: Option<Uuid>,
    pub planned_quantity: i32,
    /// Set exactly once, by completion
    pub produced_quantity: Option<i32>,
    pub status: ManufacturingStatus,
    pub start_date: Option<DateTime<Utc>>,
    pub planned_end_date: Option<DateTime<Utc>>,
    pub actual_end_date: Option<DateTime<Utc>>,
    pub estimated_duration_minutes: Option<i32>,
    pub actual_duration_minutes: Option<i32>,
    pub material_cost: Decimal,
    pub labor_cost: Decimal,
    pub overhead_cost: Decimal,
    pub total_cost: Decimal,
    pub batch_number: Option<String>,
    pub quality_rating: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::manufacturing_step::Entity")]
    Step,
    #[sea_orm(has_many = "super::serial_number::Entity")]
    SerialNumber,
    #[sea_orm(
        belongs_to = "super::product::Entity",
        from = "Column::ProductId",
        to = "super::product::Column::Id"
    )]
    Product,
}

impl Related<super::manufacturing_step::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Step.def()
    }
}

impl Related<super::serial_number::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SerialNumber.def()
    }
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Product.def()
    }
}

#[async_trait::async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(mut self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let now = Utc::now();

        if insert {
            if let ActiveValue::NotSet = self.id {
                self.id = ActiveValue::Set(Uuid::new_v4());
            }

            if let ActiveValue::NotSet = self.status {
                self.status = ActiveValue::Set(ManufacturingStatus::Pending);
            }

            for cost in [
                &mut self.material_cost,
                &mut self.labor_cost,
                &mut self.overhead_cost,
                &mut self.total_cost,
            ] {
                if let ActiveValue::NotSet = cost {
                    *cost = ActiveValue::Set(Decimal::ZERO);
                }
            }

            if let ActiveValue::NotSet = self.created_at {
                self.created_at = ActiveValue::Set(now);
            }
        }

        self.updated_at = ActiveValue::Set(now);

        Ok(self)
    }
}

impl Model {
    /// Units produced beyond the planned quantity, if any.
    pub fn over_production(&self) -> Option<i32> {
        self.produced_quantity
            .map(|produced| produced - self.planned_quantity)
            .filter(|excess| *excess > 0)
    }
}
