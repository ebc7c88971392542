use chrono::Utc;
use metrics::{counter, histogram};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, QueryFilter, QueryOrder, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::{
    config::StepSequencing,
    entities::{
        manufacturing_order::ManufacturingStatus,
        manufacturing_step::{self, Entity as ManufacturingStepEntity, StepStatus},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::manufacturing::load_order,
};

const ENTITY: &str = "manufacturing step";

/// Outcome recorded when a step completes
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct StepCompletion {
    pub quality_check_passed: Option<bool>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

/// Step-level operations of a manufacturing order
#[derive(Clone)]
pub struct ProductionStepService {
    db: Arc<DatabaseConnection>,
    sequencing: StepSequencing,
    event_sender: Option<EventSender>,
}

impl ProductionStepService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        sequencing: StepSequencing,
        event_sender: Option<EventSender>,
    ) -> Self {
        Self {
            db,
            sequencing,
            event_sender,
        }
    }

    /// Starts a pending step or resumes a paused one.
    ///
    /// Under [`StepSequencing::Strict`] every lower-numbered step must be
    /// completed or skipped first.
    #[instrument(skip(self))]
    pub async fn start_step(&self, step_id: Uuid) -> Result<manufacturing_step::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let step = load_step(&txn, step_id).await?;

        if !matches!(step.status, StepStatus::Pending | StepStatus::Paused) {
            return Err(ServiceError::invalid_transition(
                ENTITY,
                step.id,
                step.status,
                StepStatus::InProgress,
            ));
        }

        let order = load_order(&txn, step.manufacturing_order_id).await?;
        if order.status != ManufacturingStatus::InProgress {
            return Err(ServiceError::InvalidOperation(format!(
                "Manufacturing order {} is {}; steps can only start while it is in_progress",
                order.id, order.status
            )));
        }

        if self.sequencing == StepSequencing::Strict {
            let blocking = ManufacturingStepEntity::find()
                .filter(manufacturing_step::Column::ManufacturingOrderId.eq(order.id))
                .filter(manufacturing_step::Column::StepNumber.lt(step.step_number))
                .order_by_asc(manufacturing_step::Column::StepNumber)
                .all(&txn)
                .await?
                .into_iter()
                .find(|earlier| !earlier.status.is_finished());

            if let Some(earlier) = blocking {
                return Err(ServiceError::InvalidOperation(format!(
                    "Step {} ({}) cannot start before step {} ({}) is finished",
                    step.step_number,
                    step.operation_name,
                    earlier.step_number,
                    earlier.operation_name
                )));
            }
        }

        let started_at = step.started_at.unwrap_or_else(Utc::now);
        let resumed = step.status == StepStatus::Paused;
        let mut active: manufacturing_step::ActiveModel = step.into();
        active.status = Set(StepStatus::InProgress);
        active.started_at = Set(Some(started_at));
        active.completed_at = Set(None);
        let updated = active.update(&txn).await?;

        txn.commit().await?;

        info!(step_id = %updated.id, resumed, "Manufacturing step started");
        self.emit(Event::ManufacturingStepStarted {
            order_id: updated.manufacturing_order_id,
            step_id: updated.id,
        })
        .await;

        Ok(updated)
    }

    /// Completes a running step, recording its duration and quality outcome
    #[instrument(skip(self))]
    pub async fn complete_step(
        &self,
        step_id: Uuid,
        completion: StepCompletion,
    ) -> Result<manufacturing_step::Model, ServiceError> {
        completion.validate()?;

        let txn = self.db.begin().await?;
        let step = load_step(&txn, step_id).await?;

        if step.status != StepStatus::InProgress {
            return Err(ServiceError::invalid_transition(
                ENTITY,
                step.id,
                step.status,
                StepStatus::Completed,
            ));
        }

        let completed_at = Utc::now();
        let actual_duration_secs = step
            .started_at
            .map(|started| (completed_at - started).num_seconds().max(0));

        let mut active: manufacturing_step::ActiveModel = step.into();
        active.status = Set(StepStatus::Completed);
        active.completed_at = Set(Some(completed_at));
        active.actual_duration_secs = Set(actual_duration_secs);
        active.quality_check_passed = Set(completion.quality_check_passed);
        active.quality_notes = Set(completion.notes);
        let updated = active.update(&txn).await?;

        txn.commit().await?;

        if let Some(secs) = actual_duration_secs {
            histogram!("fulfillment.manufacturing.step_duration_seconds", secs as f64);
        }
        if updated.quality_check_passed == Some(false) {
            counter!("fulfillment.manufacturing.quality_failures", 1);
        }
        info!(
            step_id = %updated.id,
            quality_check_passed = ?updated.quality_check_passed,
            "Manufacturing step completed"
        );

        self.emit(Event::ManufacturingStepCompleted {
            order_id: updated.manufacturing_order_id,
            step_id: updated.id,
            quality_check_passed: updated.quality_check_passed,
        })
        .await;

        Ok(updated)
    }

    /// Skips a step that has not been started
    #[instrument(skip(self))]
    pub async fn skip_step(&self, step_id: Uuid) -> Result<manufacturing_step::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let step = load_step(&txn, step_id).await?;

        if step.status != StepStatus::Pending {
            return Err(ServiceError::invalid_transition(
                ENTITY,
                step.id,
                step.status,
                StepStatus::Skipped,
            ));
        }

        let mut active: manufacturing_step::ActiveModel = step.into();
        active.status = Set(StepStatus::Skipped);
        let updated = active.update(&txn).await?;

        txn.commit().await?;

        self.emit(Event::ManufacturingStepSkipped {
            order_id: updated.manufacturing_order_id,
            step_id: updated.id,
        })
        .await;

        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn assign_worker(
        &self,
        step_id: Uuid,
        worker_id: Uuid,
    ) -> Result<manufacturing_step::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let step = load_step(&txn, step_id).await?;

        if step.status.is_finished() {
            return Err(ServiceError::InvalidOperation(format!(
                "Step {} is {} and cannot be reassigned",
                step.id, step.status
            )));
        }

        let mut active: manufacturing_step::ActiveModel = step.into();
        active.assigned_worker_id = Set(Some(worker_id));
        let updated = active.update(&txn).await?;

        txn.commit().await?;
        Ok(updated)
    }

    pub async fn get(&self, step_id: Uuid) -> Result<manufacturing_step::Model, ServiceError> {
        ManufacturingStepEntity::find_by_id(step_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| not_found(step_id))
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            sender.send_or_log(event).await;
        }
    }
}

async fn load_step(
    txn: &DatabaseTransaction,
    step_id: Uuid,
) -> Result<manufacturing_step::Model, ServiceError> {
    ManufacturingStepEntity::find_by_id(step_id)
        .one(txn)
        .await?
        .ok_or_else(|| not_found(step_id))
}

fn not_found(step_id: Uuid) -> ServiceError {
    ServiceError::ReferenceNotFound(format!("Manufacturing step {} not found", step_id))
}
