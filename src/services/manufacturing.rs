use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection,
    DatabaseTransaction, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{
        inventory_movement::MovementReason,
        manufacturing_order::{self, Entity as ManufacturingOrderEntity, ManufacturingStatus},
        manufacturing_step::{self, Entity as ManufacturingStepEntity, StepStatus, DEFAULT_OPERATIONS},
        order::{Entity as OrderEntity, OrderStatus},
        order_item::{self, Entity as OrderItemEntity},
        product::Entity as ProductEntity,
        recipe::{self, Entity as RecipeEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        inventory_ledger::{apply_delta, MovementSource},
        serial_numbers::SerialNumberService,
    },
};

const ENTITY: &str = "manufacturing order";

/// Input for opening a manufacturing order
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct CreateManufacturingOrder {
    /// Generated as `MO-YYYYMMDD-XXXXXXXX` when absent
    #[validate(length(min = 1, max = 50))]
    pub order_number: Option<String>,
    pub product_id: Uuid,
    pub recipe_id: Option<Uuid>,
    pub source_order_id: Option<Uuid>,
    pub warehouse_id: Option<Uuid>,
    #[validate(range(min = 1))]
    pub planned_quantity: i32,
    pub planned_end_date: Option<DateTime<Utc>>,
    #[validate(range(min = 0))]
    pub estimated_duration_minutes: Option<i32>,
    #[validate(length(max = 100))]
    pub batch_number: Option<String>,
    pub notes: Option<String>,
}

/// Result of completing a manufacturing order.
#[derive(Debug, Clone, Serialize)]
pub struct ManufacturingCompletion {
    pub order: manufacturing_order::Model,
    /// Serial numbers issued for serial-tracked products, in issuance order
    pub serial_numbers: Vec<String>,
    /// Units produced beyond plan, when any
    pub over_production: Option<i32>,
    /// On-hand quantity after the production posting, when a warehouse is set
    pub warehouse_on_hand: Option<i32>,
}

/// Read-only production-task view derived from an order and its steps.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductionTask {
    pub manufacturing_order_id: Uuid,
    pub order_number: String,
    pub product_id: Uuid,
    pub status: ManufacturingStatus,
    pub planned_quantity: i32,
    pub produced_quantity: Option<i32>,
    pub total_steps: usize,
    pub completed_steps: usize,
    pub skipped_steps: usize,
    pub progress_percent: u8,
    pub current_step: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub actual_end_date: Option<DateTime<Utc>>,
}

impl ProductionTask {
    fn project(order: &manufacturing_order::Model, steps: &[manufacturing_step::Model]) -> Self {
        let completed_steps = steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count();
        let skipped_steps = steps
            .iter()
            .filter(|s| s.status == StepStatus::Skipped)
            .count();

        let progress_percent = if order.status == ManufacturingStatus::Completed {
            100
        } else if steps.is_empty() {
            0
        } else {
            ((completed_steps + skipped_steps) * 100 / steps.len()) as u8
        };

        let current_step = steps
            .iter()
            .find(|s| s.status == StepStatus::InProgress)
            .or_else(|| steps.iter().find(|s| !s.status.is_finished()))
            .map(|s| s.operation_name.clone());

        Self {
            manufacturing_order_id: order.id,
            order_number: order.order_number.clone(),
            product_id: order.product_id,
            status: order.status,
            planned_quantity: order.planned_quantity,
            produced_quantity: order.produced_quantity,
            total_steps: steps.len(),
            completed_steps,
            skipped_steps,
            progress_percent,
            current_step,
            start_date: order.start_date,
            actual_end_date: order.actual_end_date,
        }
    }
}

/// Manufacturing order state machine
#[derive(Clone)]
pub struct ManufacturingService {
    db: Arc<DatabaseConnection>,
    serial_numbers: Arc<SerialNumberService>,
    event_sender: Option<EventSender>,
}

impl ManufacturingService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        serial_numbers: Arc<SerialNumberService>,
        event_sender: Option<EventSender>,
    ) -> Self {
        Self {
            db,
            serial_numbers,
            event_sender,
        }
    }

    /// Opens a manufacturing order in `pending`
    #[instrument(skip(self))]
    pub async fn create_manufacturing_order(
        &self,
        command: CreateManufacturingOrder,
    ) -> Result<manufacturing_order::Model, ServiceError> {
        command.validate()?;

        let txn = self.db.begin().await?;
        let order = insert_order(&txn, command).await?;
        txn.commit().await?;

        counter!("fulfillment.manufacturing.created", 1);
        info!(
            order_id = %order.id,
            order_number = %order.order_number,
            planned_quantity = order.planned_quantity,
            "Manufacturing order created"
        );

        self.emit(Event::ManufacturingOrderCreated {
            order_id: order.id,
            product_id: order.product_id,
            planned_quantity: order.planned_quantity,
        })
        .await;

        Ok(order)
    }

    /// Opens one manufacturing order per line of a confirmed sales order
    /// whose product has a recipe, sized to the line's remaining quantity.
    #[instrument(skip(self))]
    pub async fn create_for_sales_order(
        &self,
        sales_order_id: Uuid,
        warehouse_id: Option<Uuid>,
    ) -> Result<Vec<manufacturing_order::Model>, ServiceError> {
        let txn = self.db.begin().await?;

        let sales_order = OrderEntity::find_by_id(sales_order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::ReferenceNotFound(format!("Order {} not found", sales_order_id))
            })?;

        if sales_order.status != OrderStatus::Confirmed {
            return Err(ServiceError::invalid_transition(
                "order",
                sales_order.id,
                sales_order.status,
                "manufacturing",
            ));
        }

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(sales_order.id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(&txn)
            .await?;

        let mut created = Vec::new();
        for item in items.iter().filter(|item| item.remaining_quantity() > 0) {
            let Some(recipe) = RecipeEntity::find()
                .filter(recipe::Column::ProductId.eq(item.product_id))
                .order_by_asc(recipe::Column::CreatedAt)
                .one(&txn)
                .await?
            else {
                continue;
            };

            let order = insert_order(
                &txn,
                CreateManufacturingOrder {
                    product_id: item.product_id,
                    recipe_id: Some(recipe.id),
                    source_order_id: Some(sales_order.id),
                    warehouse_id: warehouse_id.or(item.warehouse_id),
                    planned_quantity: item.remaining_quantity(),
                    ..Default::default()
                },
            )
            .await?;
            created.push(order);
        }

        txn.commit().await?;

        info!(
            sales_order_id = %sales_order.id,
            created = created.len(),
            "Manufacturing demand derived from sales order"
        );

        for order in &created {
            self.emit(Event::ManufacturingOrderCreated {
                order_id: order.id,
                product_id: order.product_id,
                planned_quantity: order.planned_quantity,
            })
            .await;
        }

        Ok(created)
    }

    /// Moves an order to `in_progress`, creating its default steps on first entry.
    /// Starting an order that is already in progress is a no-op.
    #[instrument(skip(self))]
    pub async fn start(&self, order_id: Uuid) -> Result<manufacturing_order::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let order = load_order(&txn, order_id).await?;

        if order.status == ManufacturingStatus::InProgress {
            return Ok(order);
        }
        ensure_transition(&order, ManufacturingStatus::InProgress)?;
        claim_transition(&txn, &order, ManufacturingStatus::InProgress).await?;

        let existing_steps = ManufacturingStepEntity::find()
            .filter(manufacturing_step::Column::ManufacturingOrderId.eq(order.id))
            .count(&txn)
            .await?;

        if existing_steps == 0 {
            for (index, operation) in DEFAULT_OPERATIONS.iter().enumerate() {
                manufacturing_step::ActiveModel {
                    manufacturing_order_id: Set(order.id),
                    step_number: Set(index as i32 + 1),
                    operation_name: Set(operation.to_string()),
                    status: Set(StepStatus::Pending),
                    ..Default::default()
                }
                .insert(&txn)
                .await?;
            }
        }

        let start_date = order.start_date.unwrap_or_else(Utc::now);
        let resumed = order.status == ManufacturingStatus::Paused;
        let mut active: manufacturing_order::ActiveModel = order.into();
        active.status = Set(ManufacturingStatus::InProgress);
        active.start_date = Set(Some(start_date));
        let updated = active.update(&txn).await?;

        txn.commit().await?;

        counter!("fulfillment.manufacturing.started", 1);
        info!(order_id = %updated.id, resumed, "Manufacturing order started");
        self.emit(Event::ManufacturingOrderStarted(updated.id)).await;

        Ok(updated)
    }

    /// Pauses an in-progress order; its running steps are stamped and marked paused
    #[instrument(skip(self))]
    pub async fn pause(&self, order_id: Uuid) -> Result<manufacturing_order::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let order = load_order(&txn, order_id).await?;
        ensure_transition(&order, ManufacturingStatus::Paused)?;
        claim_transition(&txn, &order, ManufacturingStatus::Paused).await?;

        let now = Utc::now();
        let paused_steps = ManufacturingStepEntity::update_many()
            .col_expr(
                manufacturing_step::Column::Status,
                Expr::value(StepStatus::Paused),
            )
            .col_expr(
                manufacturing_step::Column::CompletedAt,
                Expr::value(Some(now)),
            )
            .col_expr(
                manufacturing_step::Column::UpdatedAt,
                Expr::value(now),
            )
            .filter(manufacturing_step::Column::ManufacturingOrderId.eq(order.id))
            .filter(manufacturing_step::Column::Status.eq(StepStatus::InProgress))
            .exec(&txn)
            .await?
            .rows_affected;

        let mut active: manufacturing_order::ActiveModel = order.into();
        active.status = Set(ManufacturingStatus::Paused);
        let updated = active.update(&txn).await?;

        txn.commit().await?;

        info!(order_id = %updated.id, paused_steps, "Manufacturing order paused");
        self.emit(Event::ManufacturingOrderPaused(updated.id)).await;

        Ok(updated)
    }

    /// Completes an in-progress order, posting output to inventory and
    /// issuing serial numbers for serial-tracked products
    #[instrument(skip(self))]
    pub async fn complete(
        &self,
        order_id: Uuid,
        produced_quantity: i32,
        quality_rating: Option<String>,
        notes: Option<String>,
    ) -> Result<ManufacturingCompletion, ServiceError> {
        if produced_quantity < 0 {
            return Err(ServiceError::ValidationError(format!(
                "Produced quantity cannot be negative, got: {}",
                produced_quantity
            )));
        }

        let txn = self.db.begin().await.map_err(|e| {
            error!("Failed to begin transaction: {}", e);
            ServiceError::DatabaseError(e)
        })?;

        let order = load_order(&txn, order_id).await?;
        ensure_transition(&order, ManufacturingStatus::Completed)?;
        claim_transition(&txn, &order, ManufacturingStatus::Completed).await?;

        let product = ProductEntity::find_by_id(order.product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::ReferenceNotFound(format!("Product {} not found", order.product_id))
            })?;

        let now = Utc::now();
        let actual_duration_minutes = order
            .start_date
            .map(|started| (now - started).num_minutes().clamp(0, i64::from(i32::MAX)) as i32);

        let warehouse_on_hand = match order.warehouse_id {
            Some(warehouse_id) if produced_quantity > 0 => Some(
                apply_delta(
                    &txn,
                    order.product_id,
                    warehouse_id,
                    produced_quantity,
                    true,
                    MovementSource::referencing(MovementReason::Production, ENTITY, order.id),
                )
                .await?,
            ),
            _ => None,
        };

        let serial_numbers = if product.serial_tracked {
            self.serial_numbers
                .issue_in_txn(&txn, &order, produced_quantity, now)
                .await?
        } else {
            Vec::new()
        };

        let merged_notes = match (order.notes.clone(), notes) {
            (Some(existing), Some(extra)) => Some(format!("{}\n{}", existing, extra)),
            (existing, extra) => extra.or(existing),
        };

        let mut active: manufacturing_order::ActiveModel = order.into();
        active.produced_quantity = Set(Some(produced_quantity));
        active.quality_rating = Set(quality_rating);
        active.notes = Set(merged_notes);
        active.actual_end_date = Set(Some(now));
        active.actual_duration_minutes = Set(actual_duration_minutes);
        active.status = Set(ManufacturingStatus::Completed);
        let completed = active.update(&txn).await?;

        txn.commit().await?;

        let over_production = completed.over_production();
        if let Some(excess) = over_production {
            warn!(
                order_id = %completed.id,
                planned = completed.planned_quantity,
                produced = produced_quantity,
                excess,
                "Produced quantity exceeds plan"
            );
            counter!("fulfillment.manufacturing.over_production", 1);
        }

        counter!("fulfillment.manufacturing.completed", 1);
        histogram!(
            "fulfillment.manufacturing.produced_quantity",
            f64::from(produced_quantity)
        );
        info!(
            order_id = %completed.id,
            produced_quantity,
            serial_numbers = serial_numbers.len(),
            "Manufacturing order completed"
        );

        self.emit(Event::ManufacturingOrderCompleted {
            order_id: completed.id,
            produced_quantity,
            serial_numbers_issued: serial_numbers.len(),
        })
        .await;

        Ok(ManufacturingCompletion {
            order: completed,
            serial_numbers,
            over_production,
            warehouse_on_hand,
        })
    }

    /// Cancels a non-terminal order. Inventory is never touched.
    #[instrument(skip(self))]
    pub async fn cancel(&self, order_id: Uuid) -> Result<manufacturing_order::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let order = load_order(&txn, order_id).await?;
        ensure_transition(&order, ManufacturingStatus::Cancelled)?;
        claim_transition(&txn, &order, ManufacturingStatus::Cancelled).await?;

        let mut active: manufacturing_order::ActiveModel = order.into();
        active.status = Set(ManufacturingStatus::Cancelled);
        let updated = active.update(&txn).await?;

        txn.commit().await?;

        counter!("fulfillment.manufacturing.cancelled", 1);
        info!(order_id = %updated.id, "Manufacturing order cancelled");
        self.emit(Event::ManufacturingOrderCancelled(updated.id)).await;

        Ok(updated)
    }

    /// Adds to the accumulated costs; the total is the sum of the three buckets
    #[instrument(skip(self))]
    pub async fn record_costs(
        &self,
        order_id: Uuid,
        material: Decimal,
        labor: Decimal,
        overhead: Decimal,
    ) -> Result<manufacturing_order::Model, ServiceError> {
        if [material, labor, overhead].iter().any(|c| c.is_sign_negative()) {
            return Err(ServiceError::ValidationError(
                "Cost amounts cannot be negative".to_string(),
            ));
        }

        let txn = self.db.begin().await?;
        let order = load_order(&txn, order_id).await?;

        if order.status == ManufacturingStatus::Cancelled {
            return Err(ServiceError::InvalidOperation(format!(
                "Cannot record costs on cancelled manufacturing order {}",
                order.id
            )));
        }

        let material_cost = order.material_cost + material;
        let labor_cost = order.labor_cost + labor;
        let overhead_cost = order.overhead_cost + overhead;

        let mut active: manufacturing_order::ActiveModel = order.into();
        active.material_cost = Set(material_cost);
        active.labor_cost = Set(labor_cost);
        active.overhead_cost = Set(overhead_cost);
        active.total_cost = Set(material_cost + labor_cost + overhead_cost);
        let updated = active.update(&txn).await?;

        txn.commit().await?;
        Ok(updated)
    }

    pub async fn get(&self, order_id: Uuid) -> Result<manufacturing_order::Model, ServiceError> {
        ManufacturingOrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| not_found(order_id))
    }

    /// Steps of an order in step-number order.
    pub async fn steps(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<manufacturing_step::Model>, ServiceError> {
        Ok(ManufacturingStepEntity::find()
            .filter(manufacturing_step::Column::ManufacturingOrderId.eq(order_id))
            .order_by_asc(manufacturing_step::Column::StepNumber)
            .all(&*self.db)
            .await?)
    }

    /// Production-task view of an order
    pub async fn production_task(&self, order_id: Uuid) -> Result<ProductionTask, ServiceError> {
        let order = self.get(order_id).await?;
        let steps = self.steps(order_id).await?;
        Ok(ProductionTask::project(&order, &steps))
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            sender.send_or_log(event).await;
        }
    }
}

async fn insert_order(
    txn: &DatabaseTransaction,
    command: CreateManufacturingOrder,
) -> Result<manufacturing_order::Model, ServiceError> {
    ProductEntity::find_by_id(command.product_id)
        .one(txn)
        .await?
        .ok_or_else(|| {
            ServiceError::ReferenceNotFound(format!("Product {} not found", command.product_id))
        })?;

    if let Some(recipe_id) = command.recipe_id {
        let recipe = RecipeEntity::find_by_id(recipe_id)
            .one(txn)
            .await?
            .ok_or_else(|| ServiceError::ReferenceNotFound(format!("Recipe {} not found", recipe_id)))?;
        if recipe.product_id != command.product_id {
            return Err(ServiceError::ReferenceNotFound(format!(
                "Recipe {} does not produce product {}",
                recipe_id, command.product_id
            )));
        }
    }

    let order_number = command
        .order_number
        .unwrap_or_else(|| generate_order_number(Utc::now(), Uuid::new_v4()));

    let order = manufacturing_order::ActiveModel {
        order_number: Set(order_number),
        product_id: Set(command.product_id),
        recipe_id: Set(command.recipe_id),
        source_order_id: Set(command.source_order_id),
        warehouse_id: Set(command.warehouse_id),
        planned_quantity: Set(command.planned_quantity),
        produced_quantity: Set(None),
        status: Set(ManufacturingStatus::Pending),
        start_date: Set(None),
        planned_end_date: Set(command.planned_end_date),
        actual_end_date: Set(None),
        estimated_duration_minutes: Set(command.estimated_duration_minutes),
        actual_duration_minutes: Set(None),
        batch_number: Set(command.batch_number),
        quality_rating: Set(None),
        notes: Set(command.notes),
        ..Default::default()
    }
    .insert(txn)
    .await?;

    Ok(order)
}

fn generate_order_number(now: DateTime<Utc>, id: Uuid) -> String {
    let suffix: String = id.simple().to_string().chars().take(8).collect();
    format!("MO-{}-{}", now.format("%Y%m%d"), suffix.to_uppercase())
}

pub(crate) async fn load_order(
    txn: &DatabaseTransaction,
    order_id: Uuid,
) -> Result<manufacturing_order::Model, ServiceError> {
    ManufacturingOrderEntity::find_by_id(order_id)
        .one(txn)
        .await?
        .ok_or_else(|| not_found(order_id))
}

fn ensure_transition(
    order: &manufacturing_order::Model,
    next: ManufacturingStatus,
) -> Result<(), ServiceError> {
    if order.status.can_transition_to(next) {
        Ok(())
    } else {
        Err(ServiceError::invalid_transition(
            ENTITY,
            order.id,
            order.status,
            next,
        ))
    }
}

/// Moves the stored status from the observed one to `next`, failing when a
/// concurrent caller already changed it. Runs before any side effect of the
/// transition.
async fn claim_transition(
    txn: &DatabaseTransaction,
    order: &manufacturing_order::Model,
    next: ManufacturingStatus,
) -> Result<(), ServiceError> {
    let result = ManufacturingOrderEntity::update_many()
        .col_expr(manufacturing_order::Column::Status, Expr::value(next))
        .col_expr(manufacturing_order::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(manufacturing_order::Column::Id.eq(order.id))
        .filter(manufacturing_order::Column::Status.eq(order.status))
        .exec(txn)
        .await?;

    if result.rows_affected == 0 {
        let current = load_order(txn, order.id).await?;
        warn!(
            order_id = %order.id,
            observed = %order.status,
            current = %current.status,
            "Manufacturing order changed state concurrently"
        );
        return Err(ServiceError::invalid_transition(
            ENTITY,
            order.id,
            current.status,
            next,
        ));
    }

    Ok(())
}

fn not_found(order_id: Uuid) -> ServiceError {
    ServiceError::ReferenceNotFound(format!("Manufacturing order {} not found", order_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn order(status: ManufacturingStatus) -> manufacturing_order::Model {
        let now = Utc::now();
        manufacturing_order::Model {
            id: Uuid::new_v4(),
            order_number: "MO-TEST".into(),
            product_id: Uuid::new_v4(),
            recipe_id: None,
            source_order_id: None,
            warehouse_id: None,
            planned_quantity: 10,
            produced_quantity: None,
            status,
            start_date: None,
            planned_end_date: None,
            actual_end_date: None,
            estimated_duration_minutes: None,
            actual_duration_minutes: None,
            material_cost: Decimal::ZERO,
            labor_cost: Decimal::ZERO,
            overhead_cost: Decimal::ZERO,
            total_cost: Decimal::ZERO,
            batch_number: None,
            quality_rating: None,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn step(number: i32, status: StepStatus) -> manufacturing_step::Model {
        let now = Utc::now();
        manufacturing_step::Model {
            id: Uuid::new_v4(),
            manufacturing_order_id: Uuid::nil(),
            step_number: number,
            operation_name: DEFAULT_OPERATIONS[(number - 1) as usize].to_string(),
            status,
            estimated_duration_minutes: None,
            actual_duration_secs: None,
            assigned_worker_id: None,
            started_at: None,
            completed_at: None,
            quality_check_passed: None,
            quality_notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn order_number_carries_date_and_id_fragment() {
        let at = Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap();
        let id = Uuid::parse_str("a1b2c3d4-0000-0000-0000-000000000000").unwrap();
        assert_eq!(generate_order_number(at, id), "MO-20240305-A1B2C3D4");
    }

    #[test]
    fn completing_pending_order_names_both_states() {
        let pending = order(ManufacturingStatus::Pending);
        let err = ensure_transition(&pending, ManufacturingStatus::Completed).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("pending"));
        assert!(message.contains("completed"));
    }

    #[test]
    fn projection_counts_finished_steps() {
        let mo = order(ManufacturingStatus::InProgress);
        let steps = vec![
            step(1, StepStatus::Completed),
            step(2, StepStatus::Skipped),
            step(3, StepStatus::InProgress),
            step(4, StepStatus::Pending),
            step(5, StepStatus::Pending),
        ];
        let task = ProductionTask::project(&mo, &steps);
        assert_eq!(task.total_steps, 5);
        assert_eq!(task.completed_steps, 1);
        assert_eq!(task.skipped_steps, 1);
        assert_eq!(task.progress_percent, 40);
        assert_eq!(task.current_step.as_deref(), Some("Production"));
    }

    #[test]
    fn completed_order_projects_full_progress() {
        let mo = order(ManufacturingStatus::Completed);
        let task = ProductionTask::project(&mo, &[]);
        assert_eq!(task.progress_percent, 100);
        assert_eq!(task.current_step, None);
    }

    #[tokio::test]
    async fn stale_snapshot_cannot_claim_a_transition() {
        let db = Arc::new(
            crate::db::establish_connection("sqlite::memory:")
                .await
                .unwrap(),
        );
        crate::db::run_migrations(&db).await.unwrap();

        let product = crate::entities::product::ActiveModel {
            sku: Set("GEAR".to_string()),
            name: Set("Gear".to_string()),
            serial_tracked: Set(false),
            ..Default::default()
        }
        .insert(&*db)
        .await
        .unwrap();

        let serials = Arc::new(SerialNumberService::new(
            db.clone(),
            crate::config::FulfillmentConfig::default(),
            None,
        ));
        let service = ManufacturingService::new(db.clone(), serials, None);
        let created = service
            .create_manufacturing_order(CreateManufacturingOrder {
                product_id: product.id,
                planned_quantity: 5,
                ..Default::default()
            })
            .await
            .unwrap();
        let stale = service.start(created.id).await.unwrap();

        // A concurrent caller cancels after `stale` was read.
        service.cancel(created.id).await.unwrap();

        let txn = db.begin().await.unwrap();
        let err = claim_transition(&txn, &stale, ManufacturingStatus::Completed)
            .await
            .unwrap_err();
        match err {
            ServiceError::InvalidTransition { from, to, .. } => {
                assert_eq!(from, "cancelled");
                assert_eq!(to, "completed");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        drop(txn);

        let reloaded = service.get(created.id).await.unwrap();
        assert_eq!(reloaded.status, ManufacturingStatus::Cancelled);
    }

    #[test]
    fn create_command_rejects_zero_quantity() {
        let command = CreateManufacturingOrder {
            product_id: Uuid::new_v4(),
            planned_quantity: 0,
            ..Default::default()
        };
        assert!(command.validate().is_err());
    }
}
