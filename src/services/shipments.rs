use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ActiveValue::Set, ColumnTrait, Condition,
    DatabaseConnection, DatabaseTransaction, EntityTrait, QueryFilter, QueryOrder,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{
        inventory_movement::MovementReason,
        order::{self, Entity as OrderEntity, OrderStatus},
        order_item::{self, Entity as OrderItemEntity},
        product::Entity as ProductEntity,
        serial_number::{self, Entity as SerialNumberEntity, SerialStatus},
        shipment::{self, Entity as ShipmentEntity, ShipmentStatus},
        shipment_item::{self, Entity as ShipmentItemEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        inventory_ledger::{apply_delta, MovementSource},
        serial_numbers::find_serial,
    },
};

/// Quantity (and optionally the exact units) to ship from one order line
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LineAllocation {
    pub order_item_id: Uuid,
    #[validate(range(min = 1))]
    pub quantity: i32,
    /// Required, with exactly `quantity` entries, for serial-tracked products
    pub serial_numbers: Option<Vec<String>>,
}

impl LineAllocation {
    pub fn new(order_item_id: Uuid, quantity: i32) -> Self {
        Self {
            order_item_id,
            quantity,
            serial_numbers: None,
        }
    }

    pub fn with_serial_numbers(mut self, serial_numbers: Vec<String>) -> Self {
        self.serial_numbers = Some(serial_numbers);
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct ShipmentMeta {
    /// Warehouse stock is drawn from; falls back to each order line's warehouse
    pub warehouse_id: Option<Uuid>,
    #[validate(length(max = 100))]
    pub carrier: Option<String>,
    #[validate(length(max = 100))]
    pub tracking_number: Option<String>,
    pub notes: Option<String>,
    /// Mark the shipment shipped in the same transaction
    #[serde(default)]
    pub ship_immediately: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShipmentLine {
    pub item: shipment_item::Model,
    pub serial_numbers: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShipmentResult {
    pub shipment: shipment::Model,
    pub lines: Vec<ShipmentLine>,
    pub order_status: OrderStatus,
}

impl ShipmentResult {
    pub fn total_quantity(&self) -> i32 {
        self.lines.iter().map(|line| line.item.quantity).sum()
    }
}

/// A line allocation that passed validation.
struct PlannedLine {
    item: order_item::Model,
    quantity: i32,
    serials: Vec<serial_number::Model>,
}

/// Partial shipment allocator
#[derive(Clone)]
pub struct ShipmentService {
    db: Arc<DatabaseConnection>,
    event_sender: Option<EventSender>,
}

impl ShipmentService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Option<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Creates a shipment covering part or all of an order's remaining quantity.
    ///
    /// Every allocation is validated before anything is written; one bad line
    /// rejects the whole call.
    #[instrument(skip(self, allocations), fields(lines = allocations.len()))]
    pub async fn create_partial_shipment(
        &self,
        order_id: Uuid,
        allocations: Vec<LineAllocation>,
        meta: ShipmentMeta,
    ) -> Result<ShipmentResult, ServiceError> {
        let start = std::time::Instant::now();

        if allocations.is_empty() {
            return Err(ServiceError::ValidationError(
                "A shipment needs at least one line allocation".to_string(),
            ));
        }
        meta.validate()?;
        for allocation in &allocations {
            allocation.validate()?;
        }

        let txn = self.db.begin().await.map_err(|e| {
            error!("Failed to begin transaction: {}", e);
            ServiceError::DatabaseError(e)
        })?;

        let order = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::ReferenceNotFound(format!("Order {} not found", order_id)))?;

        if order.status == OrderStatus::Cancelled {
            return Err(ServiceError::invalid_transition(
                "order",
                order.id,
                order.status,
                OrderStatus::Shipped,
            ));
        }

        let plan = plan_lines(&txn, &order, allocations).await?;

        // Validation is complete; everything below mutates.
        let now = Utc::now();
        let shipment = shipment::ActiveModel {
            shipment_number: Set(generate_shipment_number(now, Uuid::new_v4())),
            order_id: Set(order.id),
            status: Set(if meta.ship_immediately {
                ShipmentStatus::Shipped
            } else {
                ShipmentStatus::Allocated
            }),
            warehouse_id: Set(meta.warehouse_id),
            carrier: Set(meta.carrier.clone()),
            tracking_number: Set(meta.tracking_number.clone()),
            notes: Set(meta.notes.clone()),
            shipped_at: Set(meta.ship_immediately.then_some(now)),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        let serial_status = if meta.ship_immediately {
            SerialStatus::Sold
        } else {
            SerialStatus::Reserved
        };

        let mut lines = Vec::with_capacity(plan.len());
        for planned in plan {
            let item = shipment_item::ActiveModel {
                shipment_id: Set(shipment.id),
                order_item_id: Set(planned.item.id),
                quantity: Set(planned.quantity),
                ..Default::default()
            }
            .insert(&txn)
            .await?;

            let mut serial_numbers = Vec::with_capacity(planned.serials.len());
            for serial in planned.serials {
                claim_serial(&txn, &serial, order.id, planned.item.id, item.id, serial_status)
                    .await?;
                serial_numbers.push(serial.serial_number);
            }

            increment_shipped(&txn, &planned.item, planned.quantity).await?;

            if let Some(warehouse_id) = meta.warehouse_id.or(planned.item.warehouse_id) {
                apply_delta(
                    &txn,
                    planned.item.product_id,
                    warehouse_id,
                    -planned.quantity,
                    false,
                    MovementSource::referencing(MovementReason::Shipment, "shipment", shipment.id),
                )
                .await?;
            }

            lines.push(ShipmentLine {
                item,
                serial_numbers,
            });
        }

        let previous_status = order.status;
        let order_status = refresh_order_status(&txn, order).await?;

        txn.commit().await?;

        let result = ShipmentResult {
            shipment,
            lines,
            order_status,
        };

        counter!("fulfillment.shipments.created", 1);
        histogram!(
            "fulfillment.shipments.create_duration_seconds",
            start.elapsed().as_secs_f64()
        );
        info!(
            shipment_id = %result.shipment.id,
            shipment_number = %result.shipment.shipment_number,
            %order_id,
            total_quantity = result.total_quantity(),
            order_status = %order_status,
            "Shipment created"
        );

        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::ShipmentCreated {
                    shipment_id: result.shipment.id,
                    order_id,
                    total_quantity: result.total_quantity(),
                })
                .await;
            if meta.ship_immediately {
                sender
                    .send_or_log(Event::ShipmentShipped(result.shipment.id))
                    .await;
            }
            if previous_status != order_status {
                sender
                    .send_or_log(Event::OrderStatusChanged {
                        order_id,
                        old_status: previous_status.to_string(),
                        new_status: order_status.to_string(),
                    })
                    .await;
            }
        }

        Ok(result)
    }

    /// Marks an allocated shipment shipped; its serial numbers become sold
    #[instrument(skip(self))]
    pub async fn mark_shipped(&self, shipment_id: Uuid) -> Result<shipment::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let shipment = ShipmentEntity::find_by_id(shipment_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::ReferenceNotFound(format!("Shipment {} not found", shipment_id))
            })?;

        if shipment.status != ShipmentStatus::Allocated {
            return Err(ServiceError::invalid_transition(
                "shipment",
                shipment.id,
                shipment.status,
                ShipmentStatus::Shipped,
            ));
        }

        let item_ids: Vec<Uuid> = ShipmentItemEntity::find()
            .filter(shipment_item::Column::ShipmentId.eq(shipment.id))
            .all(&txn)
            .await?
            .into_iter()
            .map(|item| item.id)
            .collect();

        let now = Utc::now();
        let sold = if item_ids.is_empty() {
            0
        } else {
            SerialNumberEntity::update_many()
                .col_expr(serial_number::Column::Status, Expr::value(SerialStatus::Sold))
                .col_expr(serial_number::Column::UpdatedAt, Expr::value(now))
                .filter(serial_number::Column::ShipmentItemId.is_in(item_ids))
                .filter(serial_number::Column::Status.eq(SerialStatus::Reserved))
                .exec(&txn)
                .await?
                .rows_affected
        };

        let mut active: shipment::ActiveModel = shipment.into();
        active.status = Set(ShipmentStatus::Shipped);
        active.shipped_at = Set(Some(now));
        let updated = active.update(&txn).await?;

        txn.commit().await?;

        counter!("fulfillment.shipments.shipped", 1);
        info!(shipment_id = %updated.id, serial_numbers_sold = sold, "Shipment marked shipped");

        if let Some(sender) = &self.event_sender {
            sender.send_or_log(Event::ShipmentShipped(updated.id)).await;
        }

        Ok(updated)
    }

    pub async fn get_shipment(
        &self,
        shipment_id: Uuid,
    ) -> Result<(shipment::Model, Vec<shipment_item::Model>), ServiceError> {
        let db = &*self.db;
        let shipment = ShipmentEntity::find_by_id(shipment_id)
            .one(db)
            .await?
            .ok_or_else(|| {
                ServiceError::ReferenceNotFound(format!("Shipment {} not found", shipment_id))
            })?;
        let items = ShipmentItemEntity::find()
            .filter(shipment_item::Column::ShipmentId.eq(shipment_id))
            .order_by_asc(shipment_item::Column::CreatedAt)
            .all(db)
            .await?;
        Ok((shipment, items))
    }

    pub async fn shipments_for_order(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<shipment::Model>, ServiceError> {
        Ok(ShipmentEntity::find()
            .filter(shipment::Column::OrderId.eq(order_id))
            .order_by_asc(shipment::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }
}

/// Checks every allocation against the order's lines and the named serial numbers.
async fn plan_lines(
    txn: &DatabaseTransaction,
    order: &order::Model,
    allocations: Vec<LineAllocation>,
) -> Result<Vec<PlannedLine>, ServiceError> {
    let mut items: HashMap<Uuid, order_item::Model> = OrderItemEntity::find()
        .filter(order_item::Column::OrderId.eq(order.id))
        .all(txn)
        .await?
        .into_iter()
        .map(|item| (item.id, item))
        .collect();

    let mut seen_serials = HashSet::new();
    let mut plan = Vec::with_capacity(allocations.len());

    for allocation in allocations {
        let item = items.remove(&allocation.order_item_id).ok_or_else(|| {
            if plan
                .iter()
                .any(|p: &PlannedLine| p.item.id == allocation.order_item_id)
            {
                ServiceError::ValidationError(format!(
                    "Order item {} is allocated more than once",
                    allocation.order_item_id
                ))
            } else {
                ServiceError::ReferenceNotFound(format!(
                    "Order item {} not found on order {}",
                    allocation.order_item_id, order.id
                ))
            }
        })?;

        let remaining = item.remaining_quantity();
        if allocation.quantity > remaining {
            return Err(ServiceError::CapacityExceeded {
                reference: format!("order item {}", item.id),
                requested: allocation.quantity,
                allowed: remaining.max(0),
            });
        }

        let product = ProductEntity::find_by_id(item.product_id)
            .one(txn)
            .await?
            .ok_or_else(|| {
                ServiceError::ReferenceNotFound(format!("Product {} not found", item.product_id))
            })?;

        let requested_serials = allocation.serial_numbers.unwrap_or_default();
        let expected = allocation.quantity as usize;
        if (product.serial_tracked || !requested_serials.is_empty())
            && requested_serials.len() != expected
        {
            return Err(ServiceError::ValidationError(format!(
                "Order item {} ships {} units but names {} serial numbers",
                item.id,
                allocation.quantity,
                requested_serials.len()
            )));
        }

        let mut serials = Vec::with_capacity(requested_serials.len());
        for serial in requested_serials {
            if !seen_serials.insert(serial.clone()) {
                return Err(ServiceError::ValidationError(format!(
                    "Serial number {} is listed more than once",
                    serial
                )));
            }

            let row = find_serial(txn, &serial).await?;
            if row.product_id != item.product_id {
                return Err(ServiceError::ReferenceNotFound(format!(
                    "Serial number {} belongs to product {}, not {}",
                    serial, row.product_id, item.product_id
                )));
            }
            if !row.allocatable_to(order.id) {
                return Err(ServiceError::Conflict(format!(
                    "Serial number {} is {} and cannot be allocated to order {}",
                    serial, row.status, order.id
                )));
            }
            serials.push(row);
        }

        plan.push(PlannedLine {
            item,
            quantity: allocation.quantity,
            serials,
        });
    }

    Ok(plan)
}

/// Attaches a unit to a shipment item, provided it is still free: available,
/// or reserved for this order, and not yet on any shipment item.
async fn claim_serial(
    txn: &DatabaseTransaction,
    serial: &serial_number::Model,
    order_id: Uuid,
    order_item_id: Uuid,
    shipment_item_id: Uuid,
    status: SerialStatus,
) -> Result<(), ServiceError> {
    let result = SerialNumberEntity::update_many()
        .col_expr(serial_number::Column::Status, Expr::value(status))
        .col_expr(serial_number::Column::OrderId, Expr::value(Some(order_id)))
        .col_expr(
            serial_number::Column::OrderItemId,
            Expr::value(Some(order_item_id)),
        )
        .col_expr(
            serial_number::Column::ShipmentItemId,
            Expr::value(Some(shipment_item_id)),
        )
        .col_expr(serial_number::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(serial_number::Column::Id.eq(serial.id))
        .filter(serial_number::Column::ShipmentItemId.is_null())
        .filter(
            Condition::any()
                .add(serial_number::Column::Status.eq(SerialStatus::Available))
                .add(
                    Condition::all()
                        .add(serial_number::Column::Status.eq(SerialStatus::Reserved))
                        .add(serial_number::Column::OrderId.eq(order_id)),
                ),
        )
        .exec(txn)
        .await?;

    if result.rows_affected == 0 {
        warn!(serial_number = %serial.serial_number, "Serial number claimed by a concurrent shipment");
        return Err(ServiceError::Conflict(format!(
            "Serial number {} is no longer allocatable to order {}",
            serial.serial_number, order_id
        )));
    }

    Ok(())
}

/// Adds to `shipped_quantity` only while the result stays within `quantity`.
async fn increment_shipped(
    txn: &DatabaseTransaction,
    item: &order_item::Model,
    quantity: i32,
) -> Result<(), ServiceError> {
    let result = OrderItemEntity::update_many()
        .col_expr(
            order_item::Column::ShippedQuantity,
            Expr::col(order_item::Column::ShippedQuantity).add(quantity),
        )
        .col_expr(order_item::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(order_item::Column::Id.eq(item.id))
        .filter(
            Expr::col(order_item::Column::ShippedQuantity)
                .lte(Expr::col(order_item::Column::Quantity).sub(quantity)),
        )
        .exec(txn)
        .await?;

    if result.rows_affected == 0 {
        let fresh = OrderItemEntity::find_by_id(item.id)
            .one(txn)
            .await?
            .ok_or_else(|| {
                ServiceError::ReferenceNotFound(format!("Order item {} not found", item.id))
            })?;
        warn!(order_item_id = %item.id, "Concurrent shipment consumed the remaining quantity");
        return Err(ServiceError::CapacityExceeded {
            reference: format!("order item {}", item.id),
            requested: quantity,
            allowed: fresh.remaining_quantity().max(0),
        });
    }

    Ok(())
}

/// Re-reads the order's lines and stores the derived fulfillment status.
async fn refresh_order_status(
    txn: &DatabaseTransaction,
    order: order::Model,
) -> Result<OrderStatus, ServiceError> {
    let items = OrderItemEntity::find()
        .filter(order_item::Column::OrderId.eq(order.id))
        .all(txn)
        .await?;

    let Some(status) = fulfillment_status(&items) else {
        return Ok(order.status);
    };

    if status != order.status {
        let mut active: order::ActiveModel = order.into();
        active.status = Set(status);
        active.update(txn).await?;
    }

    Ok(status)
}

/// `shipped` when every line is complete, `partially_shipped` when any
/// units have shipped, `None` when nothing has.
pub fn fulfillment_status(items: &[order_item::Model]) -> Option<OrderStatus> {
    if items.iter().all(|item| item.shipped_quantity == 0) {
        None
    } else if items.iter().all(order_item::Model::is_fully_shipped) {
        Some(OrderStatus::Shipped)
    } else {
        Some(OrderStatus::PartiallyShipped)
    }
}

fn generate_shipment_number(now: DateTime<Utc>, id: Uuid) -> String {
    let suffix: String = id.simple().to_string().chars().take(8).collect();
    format!("SHP-{}-{}", now.format("%Y%m%d"), suffix.to_uppercase())
}
