use chrono::{DateTime, Datelike, NaiveDate, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveModelBehavior, ActiveValue, ConnectionTrait};
use serde::{Deserialize, Serialize};

/// Row id of the single settings record.
pub const SETTINGS_ID: i32 = 1;

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
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
pub enum ResetPolicy {
    #[default]
    #[sea_orm(string_value = "never")]
    Never,
    #[sea_orm(string_value = "yearly")]
    Yearly,
    #[sea_orm(string_value = "monthly")]
    Monthly,
    #[sea_orm(string_value = "daily")]
    Daily,
}

impl ResetPolicy {
    /// Whether `today` falls in a different reset period than `last_reset`.
    pub fn needs_reset(self, last_reset: Option<NaiveDate>, today: NaiveDate) -> bool {
        let Some(last) = last_reset else {
            return self != ResetPolicy::Never;
        };
        match self {
            ResetPolicy::Never => false,
            ResetPolicy::Yearly => last.year() != today.year(),
            ResetPolicy::Monthly => (last.year(), last.month()) != (today.year(), today.month()),
            ResetPolicy::Daily => last != today,
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "serial_number_settings")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i32,
    /// When set, every template draws from the global counter.
    pub cross_numbering: bool,
    pub global_template: Option<String>,
    pub global_prefix: Option<String>,
    pub current_global_counter: i64,
    pub reset_policy: ResetPolicy,
    pub last_reset_date: Option<NaiveDate>,
    /// Optimistic concurrency token for counter resets
    pub version: i32,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

#[async_trait::async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(mut self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        if insert {
            if let ActiveValue::NotSet = self.id {
                self.id = ActiveValue::Set(SETTINGS_ID);
            }
            if let ActiveValue::NotSet = self.version {
                self.version = ActiveValue::Set(0);
            }
        }

        self.updated_at = ActiveValue::Set(Utc::now());

        Ok(self)
    }
}
