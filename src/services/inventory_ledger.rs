use chrono::Utc;
use metrics::{counter, histogram};
use sea_orm::{
    sea_query::{Expr, OnConflict},
    ActiveModelTrait,
    ActiveValue::Set,
    ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait, QueryFilter, QueryOrder,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::{
    entities::{
        inventory_level::{self, Entity as InventoryLevelEntity},
        inventory_movement::{self, Entity as InventoryMovementEntity, MovementReason},
        recipe::Entity as RecipeEntity,
        recipe_component::{self, Entity as RecipeComponentEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
};

/// What caused a ledger movement, recorded in the movement journal.
#[derive(Debug, Clone, Copy)]
pub struct MovementSource {
    pub reason: MovementReason,
    pub reference_type: Option<&'static str>,
    pub reference_id: Option<Uuid>,
}

impl MovementSource {
    pub fn adjustment() -> Self {
        Self {
            reason: MovementReason::Adjustment,
            reference_type: None,
            reference_id: None,
        }
    }

    pub fn referencing(reason: MovementReason, reference_type: &'static str, id: Uuid) -> Self {
        Self {
            reason,
            reference_type: Some(reference_type),
            reference_id: Some(id),
        }
    }
}

/// One component line of an assembly or disassembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentQuantity {
    pub product_id: Uuid,
    /// Total units of the component moved by the operation
    pub quantity: i32,
}

/// Balances after an assembly or disassembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyOutcome {
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    pub product_on_hand: i32,
    pub components: Vec<ComponentQuantity>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Assemble,
    Disassemble,
}

/// Authoritative (product, warehouse) stock ledger
#[derive(Clone)]
pub struct InventoryLedgerService {
    db: Arc<DatabaseConnection>,
    event_sender: Option<EventSender>,
}

impl InventoryLedgerService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Option<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Applies `delta` to the on-hand quantity and returns the new quantity
    #[instrument(skip(self))]
    pub async fn adjust_inventory(
        &self,
        product_id: Uuid,
        warehouse_id: Uuid,
        delta: i32,
        allow_negative: bool,
    ) -> Result<i32, ServiceError> {
        let start = std::time::Instant::now();
        let txn = self.db.begin().await.map_err(|e| {
            error!("Failed to begin transaction: {}", e);
            ServiceError::DatabaseError(e)
        })?;

        let new_quantity = apply_delta(
            &txn,
            product_id,
            warehouse_id,
            delta,
            allow_negative,
            MovementSource::adjustment(),
        )
        .await?;

        txn.commit().await?;

        histogram!(
            "fulfillment.inventory.adjust_duration_seconds",
            start.elapsed().as_secs_f64()
        );
        info!(
            %product_id,
            %warehouse_id,
            delta,
            new_quantity,
            "Inventory adjusted"
        );

        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::InventoryAdjusted {
                    product_id,
                    warehouse_id,
                    delta,
                    new_quantity,
                })
                .await;
        }

        Ok(new_quantity)
    }

    /// Current on-hand quantity; zero when no row exists yet.
    pub async fn on_hand(&self, product_id: Uuid, warehouse_id: Uuid) -> Result<i32, ServiceError> {
        Ok(find_level(&*self.db, product_id, warehouse_id)
            .await?
            .map_or(0, |level| level.quantity))
    }

    /// Movement journal for one (product, warehouse) pair, oldest first.
    pub async fn movements(
        &self,
        product_id: Uuid,
        warehouse_id: Uuid,
    ) -> Result<Vec<inventory_movement::Model>, ServiceError> {
        Ok(InventoryMovementEntity::find()
            .filter(inventory_movement::Column::ProductId.eq(product_id))
            .filter(inventory_movement::Column::WarehouseId.eq(warehouse_id))
            .order_by_asc(inventory_movement::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    /// Sets the stock thresholds for a pair, creating the row if needed.
    #[instrument(skip(self))]
    pub async fn set_stock_thresholds(
        &self,
        product_id: Uuid,
        warehouse_id: Uuid,
        min_stock: Option<i32>,
        max_stock: Option<i32>,
    ) -> Result<inventory_level::Model, ServiceError> {
        if let (Some(min), Some(max)) = (min_stock, max_stock) {
            if min > max {
                return Err(ServiceError::ValidationError(format!(
                    "min_stock ({}) cannot exceed max_stock ({})",
                    min, max
                )));
            }
        }

        let txn = self.db.begin().await?;
        ensure_level(&txn, product_id, warehouse_id).await?;
        let level = find_level(&txn, product_id, warehouse_id)
            .await?
            .ok_or_else(|| ServiceError::InternalError("inventory row vanished".into()))?;

        let mut active: inventory_level::ActiveModel = level.into();
        active.min_stock = Set(min_stock);
        active.max_stock = Set(max_stock);
        let updated = active.update(&txn).await?;
        txn.commit().await?;
        Ok(updated)
    }

    /// Consumes every component and produces `quantity` of the parent product
    #[instrument(skip(self, components))]
    pub async fn assemble(
        &self,
        product_id: Uuid,
        warehouse_id: Uuid,
        quantity: i32,
        components: &[ComponentQuantity],
    ) -> Result<AssemblyOutcome, ServiceError> {
        self.run_assembly(Direction::Assemble, product_id, warehouse_id, quantity, components)
            .await
    }

    /// Consumes `quantity` of the parent product and returns its components to stock
    #[instrument(skip(self, components))]
    pub async fn disassemble(
        &self,
        product_id: Uuid,
        warehouse_id: Uuid,
        quantity: i32,
        components: &[ComponentQuantity],
    ) -> Result<AssemblyOutcome, ServiceError> {
        self.run_assembly(
            Direction::Disassemble,
            product_id,
            warehouse_id,
            quantity,
            components,
        )
        .await
    }

    /// Assembles `runs` batches of a recipe's output.
    #[instrument(skip(self))]
    pub async fn assemble_from_recipe(
        &self,
        recipe_id: Uuid,
        warehouse_id: Uuid,
        runs: i32,
    ) -> Result<AssemblyOutcome, ServiceError> {
        let (product_id, output, components) = self.expand_recipe(recipe_id, runs).await?;
        self.assemble(product_id, warehouse_id, output, &components)
            .await
    }

    /// Breaks `runs` batches of a recipe's output back into components.
    #[instrument(skip(self))]
    pub async fn disassemble_from_recipe(
        &self,
        recipe_id: Uuid,
        warehouse_id: Uuid,
        runs: i32,
    ) -> Result<AssemblyOutcome, ServiceError> {
        let (product_id, output, components) = self.expand_recipe(recipe_id, runs).await?;
        self.disassemble(product_id, warehouse_id, output, &components)
            .await
    }

    async fn expand_recipe(
        &self,
        recipe_id: Uuid,
        runs: i32,
    ) -> Result<(Uuid, i32, Vec<ComponentQuantity>), ServiceError> {
        if runs <= 0 {
            return Err(ServiceError::ValidationError(format!(
                "Recipe runs must be positive, got: {}",
                runs
            )));
        }

        let db = &*self.db;
        let recipe = RecipeEntity::find_by_id(recipe_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::ReferenceNotFound(format!("Recipe {} not found", recipe_id)))?;

        let components = RecipeComponentEntity::find()
            .filter(recipe_component::Column::RecipeId.eq(recipe_id))
            .all(db)
            .await?
            .into_iter()
            .map(|c| {
                c.quantity
                    .checked_mul(runs)
                    .map(|quantity| ComponentQuantity {
                        product_id: c.component_product_id,
                        quantity,
                    })
                    .ok_or_else(|| overflow(recipe_id))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let output = recipe
            .output_quantity
            .checked_mul(runs)
            .ok_or_else(|| overflow(recipe_id))?;

        Ok((recipe.product_id, output, components))
    }

    async fn run_assembly(
        &self,
        direction: Direction,
        product_id: Uuid,
        warehouse_id: Uuid,
        quantity: i32,
        components: &[ComponentQuantity],
    ) -> Result<AssemblyOutcome, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(format!(
                "Assembly quantity must be positive, got: {}",
                quantity
            )));
        }
        if components.is_empty() {
            return Err(ServiceError::ValidationError(
                "Assembly requires at least one component".to_string(),
            ));
        }
        if let Some(bad) = components.iter().find(|c| c.quantity <= 0) {
            return Err(ServiceError::ValidationError(format!(
                "Component {} quantity must be positive, got: {}",
                bad.product_id, bad.quantity
            )));
        }

        let (consume, produce, parent_delta) = match direction {
            Direction::Assemble => (
                MovementReason::AssemblyConsume,
                MovementReason::AssemblyOutput,
                quantity,
            ),
            Direction::Disassemble => (
                MovementReason::DisassemblyConsume,
                MovementReason::DisassemblyOutput,
                -quantity,
            ),
        };
        let operation_id = Uuid::new_v4();
        let reference_type = match direction {
            Direction::Assemble => "assembly",
            Direction::Disassemble => "disassembly",
        };

        let txn = self.db.begin().await?;

        // Consumption first: any underflow aborts before the output is posted.
        if direction == Direction::Disassemble {
            apply_delta(
                &txn,
                product_id,
                warehouse_id,
                parent_delta,
                false,
                MovementSource::referencing(consume, reference_type, operation_id),
            )
            .await?;
        }

        for component in components {
            let (delta, reason) = match direction {
                Direction::Assemble => (-component.quantity, consume),
                Direction::Disassemble => (component.quantity, produce),
            };
            apply_delta(
                &txn,
                component.product_id,
                warehouse_id,
                delta,
                false,
                MovementSource::referencing(reason, reference_type, operation_id),
            )
            .await?;
        }

        let product_on_hand = if direction == Direction::Assemble {
            apply_delta(
                &txn,
                product_id,
                warehouse_id,
                parent_delta,
                false,
                MovementSource::referencing(produce, reference_type, operation_id),
            )
            .await?
        } else {
            find_level(&txn, product_id, warehouse_id)
                .await?
                .map_or(0, |level| level.quantity)
        };

        txn.commit().await?;

        counter!("fulfillment.inventory.assemblies", 1);
        info!(
            %product_id,
            %warehouse_id,
            quantity,
            ?direction,
            components = components.len(),
            "Assembly operation committed"
        );

        if let Some(sender) = &self.event_sender {
            let event = match direction {
                Direction::Assemble => Event::AssemblyCompleted {
                    product_id,
                    warehouse_id,
                    quantity,
                },
                Direction::Disassemble => Event::DisassemblyCompleted {
                    product_id,
                    warehouse_id,
                    quantity,
                },
            };
            sender.send_or_log(event).await;
        }

        Ok(AssemblyOutcome {
            product_id,
            warehouse_id,
            product_on_hand,
            components: components.to_vec(),
        })
    }
}

/// Applies one delta inside the caller's transaction.
///
/// The row update is a single conditional `UPDATE ... SET quantity = quantity + delta`,
/// so concurrent adjustments on the same pair serialize on the row and none is lost.
/// When negative stock is not allowed, the `quantity >= -delta` guard turns an
/// underflow into zero affected rows.
pub(crate) async fn apply_delta(
    txn: &DatabaseTransaction,
    product_id: Uuid,
    warehouse_id: Uuid,
    delta: i32,
    allow_negative: bool,
    source: MovementSource,
) -> Result<i32, ServiceError> {
    ensure_level(txn, product_id, warehouse_id).await?;

    let mut update = InventoryLevelEntity::update_many()
        .col_expr(
            inventory_level::Column::Quantity,
            Expr::col(inventory_level::Column::Quantity).add(delta),
        )
        .col_expr(inventory_level::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(inventory_level::Column::ProductId.eq(product_id))
        .filter(inventory_level::Column::WarehouseId.eq(warehouse_id));

    if !allow_negative && delta < 0 {
        update = update.filter(inventory_level::Column::Quantity.gte(-delta));
    }

    let result = update.exec(txn).await?;

    if result.rows_affected == 0 {
        let on_hand = find_level(txn, product_id, warehouse_id)
            .await?
            .map_or(0, |level| level.quantity);
        counter!("fulfillment.inventory.negative_rejected", 1);
        debug!(%product_id, %warehouse_id, on_hand, delta, "Rejected underflowing adjustment");
        return Err(ServiceError::NegativeStockRejected {
            product_id,
            warehouse_id,
            on_hand,
            delta,
        });
    }

    let new_quantity = find_level(txn, product_id, warehouse_id)
        .await?
        .map(|level| level.quantity)
        .ok_or_else(|| ServiceError::InternalError("inventory row vanished".into()))?;

    inventory_movement::ActiveModel {
        product_id: Set(product_id),
        warehouse_id: Set(warehouse_id),
        delta: Set(delta),
        resulting_quantity: Set(new_quantity),
        reason: Set(source.reason),
        reference_type: Set(source.reference_type.map(str::to_string)),
        reference_id: Set(source.reference_id),
        ..Default::default()
    }
    .insert(txn)
    .await?;

    counter!("fulfillment.inventory.adjusted", 1);
    Ok(new_quantity)
}

/// Creates the zero-quantity row for a pair if it does not exist yet.
async fn ensure_level(
    txn: &DatabaseTransaction,
    product_id: Uuid,
    warehouse_id: Uuid,
) -> Result<(), ServiceError> {
    let now = Utc::now();
    let row = inventory_level::ActiveModel {
        id: Set(Uuid::new_v4()),
        product_id: Set(product_id),
        warehouse_id: Set(warehouse_id),
        quantity: Set(0),
        min_stock: Set(None),
        max_stock: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    };

    InventoryLevelEntity::insert(row)
        .on_conflict(
            OnConflict::columns([
                inventory_level::Column::ProductId,
                inventory_level::Column::WarehouseId,
            ])
            .do_nothing()
            .to_owned(),
        )
        .exec_without_returning(txn)
        .await?;

    Ok(())
}

async fn find_level<C>(
    conn: &C,
    product_id: Uuid,
    warehouse_id: Uuid,
) -> Result<Option<inventory_level::Model>, ServiceError>
where
    C: sea_orm::ConnectionTrait,
{
    Ok(InventoryLevelEntity::find()
        .filter(inventory_level::Column::ProductId.eq(product_id))
        .filter(inventory_level::Column::WarehouseId.eq(warehouse_id))
        .one(conn)
        .await?)
}

fn overflow(recipe_id: Uuid) -> ServiceError {
    ServiceError::ValidationError(format!("Recipe {} quantities overflow", recipe_id))
}
