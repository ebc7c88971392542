use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, QueryFilter, QueryOrder, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    config::FulfillmentConfig,
    entities::{
        manufacturing_order::{self, Entity as ManufacturingOrderEntity},
        order_item::Entity as OrderItemEntity,
        product::Entity as ProductEntity,
        product_category::{self, Entity as CategoryEntity},
        serial_number::{self, Entity as SerialNumberEntity, SerialStatus},
        serial_number_settings::{self, ResetPolicy},
    },
    errors::{is_unique_violation, ServiceError},
    events::{Event, EventSender},
    services::{
        counters::{self, CounterScope},
        serial_template::SerialTemplate,
    },
};

/// Issuance policy resolved for one product.
#[derive(Debug, Clone)]
struct IssuancePolicy {
    template: SerialTemplate,
    prefix: Option<String>,
    scope: CounterScope,
}

/// Changes to the process-wide issuance settings. `None` leaves a field as is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SerialSettingsUpdate {
    pub cross_numbering: Option<bool>,
    pub global_template: Option<Option<String>>,
    pub global_prefix: Option<Option<String>>,
    pub reset_policy: Option<ResetPolicy>,
}

/// Issues, reserves and retires serial numbers
#[derive(Clone)]
pub struct SerialNumberService {
    db: Arc<DatabaseConnection>,
    config: FulfillmentConfig,
    event_sender: Option<EventSender>,
}

impl SerialNumberService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: FulfillmentConfig,
        event_sender: Option<EventSender>,
    ) -> Self {
        Self {
            db,
            config,
            event_sender,
        }
    }

    /// Issues `quantity` serial numbers for a manufacturing order's product
    #[instrument(skip(self))]
    pub async fn issue(
        &self,
        manufacturing_order_id: Uuid,
        quantity: i32,
    ) -> Result<Vec<String>, ServiceError> {
        self.issue_at(manufacturing_order_id, quantity, Utc::now())
            .await
    }

    /// Same as [`issue`](Self::issue) with an explicit issuance timestamp
    /// for the date tokens.
    #[instrument(skip(self))]
    pub async fn issue_at(
        &self,
        manufacturing_order_id: Uuid,
        quantity: i32,
        issued_at: DateTime<Utc>,
    ) -> Result<Vec<String>, ServiceError> {
        if quantity < 0 {
            return Err(ServiceError::ValidationError(format!(
                "Serial number quantity cannot be negative, got: {}",
                quantity
            )));
        }
        if quantity == 0 {
            return Ok(Vec::new());
        }

        let txn = self.db.begin().await?;

        let order = ManufacturingOrderEntity::find_by_id(manufacturing_order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::ReferenceNotFound(format!(
                    "Manufacturing order {} not found",
                    manufacturing_order_id
                ))
            })?;

        let issued = self
            .issue_in_txn(&txn, &order, quantity, issued_at)
            .await?;

        txn.commit().await?;

        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::SerialNumbersIssued {
                    manufacturing_order_id,
                    count: issued.len(),
                })
                .await;
        }

        Ok(issued)
    }

    /// Issuance body shared with manufacturing completion.
    pub(crate) async fn issue_in_txn(
        &self,
        txn: &DatabaseTransaction,
        order: &manufacturing_order::Model,
        quantity: i32,
        issued_at: DateTime<Utc>,
    ) -> Result<Vec<String>, ServiceError> {
        if quantity <= 0 {
            return Ok(Vec::new());
        }

        let product = ProductEntity::find_by_id(order.product_id)
            .one(txn)
            .await?
            .ok_or_else(|| {
                ServiceError::ReferenceNotFound(format!("Product {} not found", order.product_id))
            })?;

        let category = match product.category_id {
            Some(category_id) => CategoryEntity::find_by_id(category_id).one(txn).await?,
            None => None,
        };

        let settings = counters::load_settings(txn).await?;
        let policy = self.resolve_policy(&product.sku, product.id, category.as_ref(), &settings)?;
        if quantity > 1 && !policy.template.has_counter_token() {
            warn!(
                product_id = %product.id,
                quantity,
                "Serial template has no counter token; units after the first will collide"
            );
        }

        let today = issued_at.date_naive();
        let lease =
            counters::next_counter(txn, policy.scope, i64::from(quantity), today).await?;
        let mut high_water = lease.last;

        let mut issued = Vec::with_capacity(lease.len());
        for mut counter_value in lease.values() {
            let mut attempts = 0u32;
            loop {
                attempts += 1;
                let candidate =
                    policy
                        .template
                        .render(policy.prefix.as_deref(), issued_at, counter_value);

                let row = serial_number::ActiveModel {
                    serial_number: Set(candidate.clone()),
                    product_id: Set(product.id),
                    category_id: Set(product.category_id),
                    manufacturing_order_id: Set(Some(order.id)),
                    status: Set(SerialStatus::Available),
                    warehouse_id: Set(order.warehouse_id),
                    order_id: Set(None),
                    order_item_id: Set(None),
                    shipment_item_id: Set(None),
                    invoice_id: Set(None),
                    manufactured_at: Set(Some(issued_at)),
                    ..Default::default()
                };

                // Savepoint so a duplicate does not poison the outer transaction.
                let savepoint = txn.begin().await?;
                match row.insert(&savepoint).await {
                    Ok(_) => {
                        savepoint.commit().await?;
                        issued.push(candidate);
                        break;
                    }
                    Err(e) if is_unique_violation(&e) => {
                        savepoint.rollback().await?;
                        counter!("fulfillment.serials.collisions", 1);

                        if attempts >= self.config.serial_max_collision_retries {
                            warn!(
                                serial_number = %candidate,
                                attempts,
                                "Serial number collision retries exhausted"
                            );
                            return Err(ServiceError::UniquenessConflict {
                                serial_number: candidate,
                                attempts,
                            });
                        }

                        counter_value = self
                            .fresh_counter(txn, policy.scope, high_water, today)
                            .await?;
                        high_water = high_water.max(counter_value);
                        warn!(
                            serial_number = %candidate,
                            retry_counter = counter_value,
                            "Serial number collided; retrying with fresh counter"
                        );
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        counter!("fulfillment.serials.issued", issued.len() as u64);
        info!(
            manufacturing_order_id = %order.id,
            count = issued.len(),
            scope = ?policy.scope,
            "Serial numbers issued"
        );

        Ok(issued)
    }

    /// Next value for a colliding unit, never below what this batch already used.
    async fn fresh_counter(
        &self,
        txn: &DatabaseTransaction,
        scope: CounterScope,
        high_water: i64,
        today: chrono::NaiveDate,
    ) -> Result<i64, ServiceError> {
        let authority = match scope {
            CounterScope::Global => counters::next_counter(txn, scope, 1, today).await?.last,
            CounterScope::Category(_) | CounterScope::Product(_) => 0,
        };
        Ok(authority.max(high_water + 1))
    }

    fn resolve_policy(
        &self,
        sku: &str,
        product_id: Uuid,
        category: Option<&product_category::Model>,
        settings: &serial_number_settings::Model,
    ) -> Result<IssuancePolicy, ServiceError> {
        let scoped = |category: Option<&product_category::Model>| {
            if settings.cross_numbering {
                CounterScope::Global
            } else {
                match category {
                    Some(c) => CounterScope::Category(c.id),
                    None => CounterScope::Product(product_id),
                }
            }
        };

        if let Some(category) = category {
            if let Some(template) = non_empty(category.serial_template.as_deref()) {
                return Ok(IssuancePolicy {
                    template: SerialTemplate::parse(template)?,
                    prefix: category.serial_prefix.clone(),
                    scope: scoped(Some(category)),
                });
            }
        }

        if settings.cross_numbering {
            if let Some(template) = non_empty(settings.global_template.as_deref()) {
                return Ok(IssuancePolicy {
                    template: SerialTemplate::parse(template)?,
                    prefix: settings.global_prefix.clone(),
                    scope: CounterScope::Global,
                });
            }
        }

        let marker = category
            .and_then(|c| non_empty(c.code.as_deref()).or(non_empty(Some(c.name.as_str()))))
            .unwrap_or(sku);

        Ok(IssuancePolicy {
            template: SerialTemplate::fallback(marker, self.config.default_counter_width),
            prefix: None,
            scope: scoped(category),
        })
    }

    /// Binds available serial numbers to an order line
    #[instrument(skip(self, serial_numbers))]
    pub async fn reserve_serial_numbers(
        &self,
        order_item_id: Uuid,
        serial_numbers: &[String],
    ) -> Result<Vec<serial_number::Model>, ServiceError> {
        let txn = self.db.begin().await?;

        let item = OrderItemEntity::find_by_id(order_item_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::ReferenceNotFound(format!("Order item {} not found", order_item_id))
            })?;

        let mut rows = Vec::with_capacity(serial_numbers.len());
        for serial in serial_numbers {
            let row = find_serial(&txn, serial).await?;
            if row.product_id != item.product_id {
                return Err(ServiceError::ReferenceNotFound(format!(
                    "Serial number {} belongs to product {}, not {}",
                    serial, row.product_id, item.product_id
                )));
            }
            if row.status != SerialStatus::Available {
                return Err(ServiceError::Conflict(format!(
                    "Serial number {} is {}, expected available",
                    serial, row.status
                )));
            }
            rows.push(row);
        }

        let mut reserved = Vec::with_capacity(rows.len());
        for row in rows {
            let mut active: serial_number::ActiveModel = row.into();
            active.status = Set(SerialStatus::Reserved);
            active.order_id = Set(Some(item.order_id));
            active.order_item_id = Set(Some(item.id));
            reserved.push(active.update(&txn).await?);
        }

        txn.commit().await?;

        if let Some(sender) = &self.event_sender {
            for row in &reserved {
                sender
                    .send_or_log(Event::SerialNumberStatusChanged {
                        serial_number: row.serial_number.clone(),
                        old_status: SerialStatus::Available.to_string(),
                        new_status: SerialStatus::Reserved.to_string(),
                    })
                    .await;
            }
        }

        Ok(reserved)
    }

    /// Marks a unit defective; sold units are out of reach
    #[instrument(skip(self))]
    pub async fn mark_defective(
        &self,
        serial_number: &str,
    ) -> Result<serial_number::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let row = find_serial(&txn, serial_number).await?;
        let old_status = row.status;

        match old_status {
            SerialStatus::Sold => {
                return Err(ServiceError::invalid_transition(
                    "serial number",
                    row.id,
                    old_status,
                    SerialStatus::Defective,
                ))
            }
            SerialStatus::Defective => return Ok(row),
            SerialStatus::Available | SerialStatus::Reserved => {}
        }

        let mut active: serial_number::ActiveModel = row.into();
        active.status = Set(SerialStatus::Defective);
        let updated = active.update(&txn).await?;
        txn.commit().await?;

        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::SerialNumberStatusChanged {
                    serial_number: updated.serial_number.clone(),
                    old_status: old_status.to_string(),
                    new_status: SerialStatus::Defective.to_string(),
                })
                .await;
        }

        Ok(updated)
    }

    pub async fn find_by_serial(
        &self,
        serial_number: &str,
    ) -> Result<Option<serial_number::Model>, ServiceError> {
        Ok(SerialNumberEntity::find()
            .filter(serial_number::Column::SerialNumber.eq(serial_number))
            .one(&*self.db)
            .await?)
    }

    /// Serial numbers issued for a manufacturing order, in issuance order.
    pub async fn for_manufacturing_order(
        &self,
        manufacturing_order_id: Uuid,
    ) -> Result<Vec<serial_number::Model>, ServiceError> {
        Ok(SerialNumberEntity::find()
            .filter(serial_number::Column::ManufacturingOrderId.eq(manufacturing_order_id))
            .order_by_asc(serial_number::Column::CreatedAt)
            .order_by_asc(serial_number::Column::SerialNumber)
            .all(&*self.db)
            .await?)
    }

    pub async fn settings(&self) -> Result<serial_number_settings::Model, ServiceError> {
        counters::load_settings(&*self.db).await
    }

    /// Updates the process-wide issuance settings. A global template is
    /// parsed before it is stored.
    #[instrument(skip(self))]
    pub async fn update_settings(
        &self,
        update: SerialSettingsUpdate,
    ) -> Result<serial_number_settings::Model, ServiceError> {
        if let Some(Some(template)) = &update.global_template {
            if !SerialTemplate::parse(template)?.has_counter_token() {
                warn!(
                    template = %template,
                    "Global serial template has no counter token; batches larger than one will collide"
                );
            }
        }

        let txn = self.db.begin().await?;
        let current = counters::load_settings(&txn).await?;
        let mut active: serial_number_settings::ActiveModel = current.into();

        if let Some(cross_numbering) = update.cross_numbering {
            active.cross_numbering = Set(cross_numbering);
        }
        if let Some(template) = update.global_template {
            active.global_template = Set(template);
        }
        if let Some(prefix) = update.global_prefix {
            active.global_prefix = Set(prefix);
        }
        if let Some(policy) = update.reset_policy {
            active.reset_policy = Set(policy);
        }

        let updated = active.update(&txn).await?;
        txn.commit().await?;

        info!(
            cross_numbering = updated.cross_numbering,
            reset_policy = %updated.reset_policy,
            "Serial number settings updated"
        );
        Ok(updated)
    }
}

pub(crate) async fn find_serial(
    txn: &DatabaseTransaction,
    serial_number: &str,
) -> Result<serial_number::Model, ServiceError> {
    SerialNumberEntity::find()
        .filter(serial_number::Column::SerialNumber.eq(serial_number))
        .one(txn)
        .await?
        .ok_or_else(|| {
            ServiceError::ReferenceNotFound(format!("Serial number {} not found", serial_number))
        })
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
