//! Storage error classification shared by the PostgreSQL and in-memory stores.

use sqlx::error::DatabaseError;
use thiserror::Error;

/// Storage failures handlers can act on. Anything else is [`DbError::Other`].
#[derive(Error, Debug)]
pub enum DbError {
    /// The account, patient or report named by a mutation does not exist
    #[error("Entity not found")]
    NotFound,

    /// Duplicate email, Google id or role name
    #[error("Unique constraint violation on {}", table.as_deref().unwrap_or("unknown table"))]
    UniqueViolation {
        constraint: Option<String>,
        table: Option<String>,
        message: String,
    },

    /// A row points at a patient or account that is gone
    #[error("Foreign key constraint violation on {}", table.as_deref().unwrap_or("unknown table"))]
    ForeignKeyViolation {
        constraint: Option<String>,
        table: Option<String>,
        message: String,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Constraint, table and message reported by PostgreSQL
fn violation_parts(db_err: &dyn DatabaseError) -> (Option<String>, Option<String>, String) {
    (
        db_err.constraint().map(str::to_string),
        db_err.table().map(str::to_string),
        db_err.message().to_string(),
    )
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => DbError::NotFound,
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                let (constraint, table, message) = violation_parts(&**db_err);
                DbError::UniqueViolation { constraint, table, message }
            }
            sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
                let (constraint, table, message) = violation_parts(&**db_err);
                DbError::ForeignKeyViolation { constraint, table, message }
            }
            _ => DbError::Other(anyhow::Error::from(err)),
        }
    }
}

/// Type alias for storage operation results
pub type Result<T> = std::result::Result<T, DbError>;
