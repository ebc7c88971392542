use sea_orm::error::{DbErr, SqlErr};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    /// A state-machine call made from a state that does not permit it.
    #[error("Invalid transition for {entity} {id}: cannot go from {from} to {to}")]
    InvalidTransition {
        entity: &'static str,
        id: Uuid,
        from: String,
        to: String,
    },

    /// An allocation exceeds a hard bound such as the remaining line quantity.
    #[error("Capacity exceeded for {reference}: requested {requested}, allowed {allowed}")]
    CapacityExceeded {
        reference: String,
        requested: i32,
        allowed: i32,
    },

    /// A rendered serial number still collides after the retry budget was spent.
    /// This means counter state has diverged from stored data.
    #[error("Serial number {serial_number} still collides after {attempts} attempts")]
    UniquenessConflict { serial_number: String, attempts: u32 },

    #[error("Reference not found: {0}")]
    ReferenceNotFound(String),

    #[error(
        "Negative stock rejected for product {product_id} in warehouse {warehouse_id}: on hand {on_hand}, delta {delta}"
    )]
    NegativeStockRejected {
        product_id: Uuid,
        warehouse_id: Uuid,
        on_hand: i32,
        delta: i32,
    },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Generic constructor that normalizes any database error input.
    pub fn db_error(error: DbErr) -> Self {
        ServiceError::DatabaseError(error)
    }

    pub fn invalid_transition(
        entity: &'static str,
        id: Uuid,
        from: impl ToString,
        to: impl ToString,
    ) -> Self {
        ServiceError::InvalidTransition {
            entity,
            id,
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Stable machine-readable code for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) => "database_error",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::CapacityExceeded { .. } => "capacity_exceeded",
            Self::UniquenessConflict { .. } => "uniqueness_conflict",
            Self::ReferenceNotFound(_) => "reference_not_found",
            Self::NegativeStockRejected { .. } => "negative_stock_rejected",
            Self::ValidationError(_) => "validation_error",
            Self::Conflict(_) => "conflict",
            Self::InvalidConfiguration(_) => "invalid_configuration",
            Self::InvalidOperation(_) => "invalid_operation",
            Self::InternalError(_) | Self::Other(_) => "internal_error",
        }
    }

    /// True for failures detected before any mutation was applied.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidTransition { .. }
                | Self::CapacityExceeded { .. }
                | Self::ReferenceNotFound(_)
                | Self::NegativeStockRejected { .. }
                | Self::ValidationError(_)
                | Self::Conflict(_)
                | Self::InvalidOperation(_)
        )
    }
}

/// Returns true when the database rejected a write because of a unique index.
pub fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}
