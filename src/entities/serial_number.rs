use chrono::{DateTime, Utc};
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
pub enum SerialStatus {
    #[sea_orm(string_value = "available")]
    Available,
    #[sea_orm(string_value = "reserved")]
    Reserved,
    #[sea_orm(string_value = "sold")]
    Sold,
    #[sea_orm(string_value = "defective")]
    Defective,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "serial_numbers")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub serial_number: String,
    pub product_id: Uuid,
    pub category_id: Option<Uuid>,
    pub manufacturing_order_id: Option<Uuid>,
    pub status: SerialStatus,
    pub warehouse_id: Option<Uuid>,
    pub order_id: Option<Uuid>,
    pub order_item_id: Option<Uuid>,
    pub shipment_item_id: Option<Uuid>,
    pub invoice_id: Option<Uuid>,
    pub manufactured_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::product::Entity",
        from = "Column::ProductId",
        to = "super::product::Column::Id"
    )]
    Product,
    #[sea_orm(
        belongs_to = "super::manufacturing_order::Entity",
        from = "Column::ManufacturingOrderId",
        to = "super::manufacturing_order::Column::Id"
    )]
    ManufacturingOrder,
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Product.def()
    }
}

impl Related<super::manufacturing_order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ManufacturingOrder.def()
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
                self.status = ActiveValue::Set(SerialStatus::Available);
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
    /// Whether this unit can be bound to the given customer order.
    /// A unit already attached to a shipment item is never allocatable again.
    pub fn allocatable_to(&self, order_id: Uuid) -> bool {
        if self.shipment_item_id.is_some() {
            return false;
        }
        match self.status {
            SerialStatus::Available => true,
            SerialStatus::Reserved => self.order_id == Some(order_id),
            SerialStatus::Sold | SerialStatus::Defective => false,
        }
    }
}
