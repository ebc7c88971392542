//! Counter authority for serial-number issuance.
//!
//! The global scope lives in the `serial_number_settings` row and is advanced
//! with a single atomic `UPDATE ... SET counter = counter + n` inside the
//! caller's transaction; that row write is the synchronization point between
//! concurrent issuers. Category and product scopes are derived from the
//! number of serial numbers already stored for the scope.

use chrono::{NaiveDate, Utc};
use sea_orm::{
    sea_query::{Expr, OnConflict},
    ActiveValue::Set,
    ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    entities::{
        serial_number,
        serial_number_settings::{self, Entity as SettingsEntity, ResetPolicy, SETTINGS_ID},
    },
    errors::ServiceError,
};

/// Which counter a batch draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterScope {
    Global,
    Category(Uuid),
    /// Used when a product has no category and cross-numbering is off.
    Product(Uuid),
}

/// A contiguous block of counter values handed to one issuer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterLease {
    pub first: i64,
    pub last: i64,
}

impl CounterLease {
    pub fn len(&self) -> usize {
        (self.last - self.first + 1).max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn values(&self) -> impl Iterator<Item = i64> {
        self.first..=self.last
    }
}

/// Loads the settings row, creating it with defaults on first use.
pub async fn load_settings<C>(conn: &C) -> Result<serial_number_settings::Model, ServiceError>
where
    C: ConnectionTrait,
{
    if let Some(settings) = SettingsEntity::find_by_id(SETTINGS_ID).one(conn).await? {
        return Ok(settings);
    }

    let defaults = serial_number_settings::ActiveModel {
        id: Set(SETTINGS_ID),
        cross_numbering: Set(false),
        global_template: Set(None),
        global_prefix: Set(None),
        current_global_counter: Set(0),
        reset_policy: Set(ResetPolicy::Never),
        last_reset_date: Set(None),
        version: Set(0),
        updated_at: Set(Utc::now()),
    };

    SettingsEntity::insert(defaults)
        .on_conflict(
            OnConflict::column(serial_number_settings::Column::Id)
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(conn)
        .await?;

    SettingsEntity::find_by_id(SETTINGS_ID)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::InternalError("serial number settings row missing".into()))
}

/// Reserves `count` consecutive values from `scope`.
///
/// Must run inside the transaction that persists the serial numbers, so a
/// rollback returns the values along with everything else.
pub async fn next_counter<C>(
    conn: &C,
    scope: CounterScope,
    count: i64,
    today: NaiveDate,
) -> Result<CounterLease, ServiceError>
where
    C: ConnectionTrait,
{
    if count <= 0 {
        return Err(ServiceError::ValidationError(format!(
            "counter batch size must be positive, got {}",
            count
        )));
    }

    let lease = match scope {
        CounterScope::Global => next_global(conn, count, today).await?,
        CounterScope::Category(category_id) => {
            let existing = serial_number::Entity::find()
                .filter(serial_number::Column::CategoryId.eq(category_id))
                .count(conn)
                .await? as i64;
            CounterLease {
                first: existing + 1,
                last: existing + count,
            }
        }
        CounterScope::Product(product_id) => {
            let existing = serial_number::Entity::find()
                .filter(serial_number::Column::ProductId.eq(product_id))
                .count(conn)
                .await? as i64;
            CounterLease {
                first: existing + 1,
                last: existing + count,
            }
        }
    };

    debug!(?scope, first = lease.first, last = lease.last, "Counter lease granted");
    Ok(lease)
}

async fn next_global<C>(conn: &C, count: i64, today: NaiveDate) -> Result<CounterLease, ServiceError>
where
    C: ConnectionTrait,
{
    let settings = load_settings(conn).await?;

    // Reset happens before the increment so the first batch of a new period starts at 1.
    if settings
        .reset_policy
        .needs_reset(settings.last_reset_date, today)
    {
        let reset = SettingsEntity::update_many()
            .col_expr(serial_number_settings::Column::CurrentGlobalCounter, Expr::value(0i64))
            .col_expr(serial_number_settings::Column::LastResetDate, Expr::value(today))
            .col_expr(
                serial_number_settings::Column::Version,
                Expr::col(serial_number_settings::Column::Version).add(1),
            )
            .col_expr(serial_number_settings::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(serial_number_settings::Column::Id.eq(SETTINGS_ID))
            .filter(serial_number_settings::Column::Version.eq(settings.version))
            .exec(conn)
            .await?;

        if reset.rows_affected == 1 {
            info!(
                policy = %settings.reset_policy,
                previous = settings.current_global_counter,
                "Global serial counter reset for new period"
            );
        } else {
            debug!("Global serial counter already reset by a concurrent issuer");
        }
    }

    SettingsEntity::update_many()
        .col_expr(
            serial_number_settings::Column::CurrentGlobalCounter,
            Expr::col(serial_number_settings::Column::CurrentGlobalCounter).add(count),
        )
        .col_expr(serial_number_settings::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(serial_number_settings::Column::Id.eq(SETTINGS_ID))
        .exec(conn)
        .await?;

    let advanced = SettingsEntity::find_by_id(SETTINGS_ID)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::InternalError("serial number settings row missing".into()))?;

    Ok(CounterLease {
        first: advanced.current_global_counter - count + 1,
        last: advanced.current_global_counter,
    })
}
