use crate::db::errors::DbError;
use crate::types::RoleName;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// No credential (or an unusable one) was supplied
    #[error("Not authenticated")]
    Unauthenticated { message: Option<String> },

    /// Bearer token present but its signature, kind or expiry is invalid
    #[error("Invalid token")]
    InvalidCredential,

    /// Token is valid but names an account that no longer exists
    #[error("User not found")]
    AccountNotFound,

    /// Account exists but has not been approved (or was deactivated)
    #[error("Account not active")]
    AccountSuspended { message: Option<String> },

    /// Account roles do not intersect the roles the route accepts
    #[error("Insufficient role, one of {required:?} required")]
    InsufficientRole { required: Vec<RoleName> },

    /// Ownership violation: a doctor touching another doctor's patient
    #[error("Forbidden access to {resource} {id}")]
    Forbidden { resource: String, id: String },

    /// Requested resource not found
    #[error("{resource} with ID {id} not found")]
    NotFound { resource: String, id: String },

    /// Invalid request data
    #[error("{message}")]
    Validation { message: String },

    /// Doctor id does not name an active account holding the doctor role
    #[error("{id} is not an active doctor")]
    InvalidDoctor { id: String },

    /// Duplicate of an existing resource (e.g. email already registered)
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// Rate limit exceeded
    #[error("Too many requests: {message}")]
    TooManyRequests { message: String },

    /// Upstream prediction service failed or returned non-2xx
    #[error("Prediction service error: {details}")]
    PredictionService { details: Value },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Storage operation error
    #[error(transparent)]
    Database(#[from] DbError),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthenticated { .. } | Error::AccountNotFound => StatusCode::UNAUTHORIZED,
            Error::InvalidCredential | Error::AccountSuspended { .. } | Error::InsufficientRole { .. } | Error::Forbidden { .. } => {
                StatusCode::FORBIDDEN
            }
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Validation { .. } | Error::InvalidDoctor { .. } | Error::Conflict { .. } => StatusCode::BAD_REQUEST,
            Error::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::PredictionService { .. } | Error::Internal { .. } | Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Database(db_err) => match db_err {
                DbError::NotFound => StatusCode::NOT_FOUND,
                DbError::UniqueViolation { .. } | DbError::ForeignKeyViolation { .. } => StatusCode::BAD_REQUEST,
                DbError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::Unauthenticated { message } => message.clone().unwrap_or_else(|| "Missing token".to_string()),
            Error::InvalidCredential => "Invalid token".to_string(),
            Error::AccountNotFound => "User not found".to_string(),
            Error::AccountSuspended { message } => message.clone().unwrap_or_else(|| "Account not active".to_string()),
            Error::InsufficientRole { .. } => "Forbidden: insufficient role".to_string(),
            Error::Forbidden { .. } => "Forbidden".to_string(),
            Error::NotFound { resource, .. } => format!("{resource} not found"),
            Error::Validation { message } => message.clone(),
            Error::InvalidDoctor { .. } => "Invalid doctor: the account is not an active doctor".to_string(),
            Error::Conflict { message } => message.clone(),
            Error::TooManyRequests { message } => message.clone(),
            Error::PredictionService { .. } => "Prediction service error".to_string(),
            Error::Internal { .. } | Error::Other(_) => "Internal server error".to_string(),
            Error::Database(db_err) => match db_err {
                DbError::NotFound => "Resource not found".to_string(),
                DbError::UniqueViolation { table, .. } => match table.as_deref() {
                    Some("accounts") => "User already exists".to_string(),
                    _ => "Resource already exists".to_string(),
                },
                DbError::ForeignKeyViolation { .. } => "Invalid reference to related resource".to_string(),
                DbError::Other(_) => "Database error occurred".to_string(),
            },
        }
    }

    /// Extra detail relayed to the client. Only upstream prediction failures carry any.
    fn details(&self) -> Option<Value> {
        match self {
            Error::PredictionService { details } => Some(details.clone()),
            Error::InvalidDoctor { id } => Some(Value::String(id.clone())),
            _ => None,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Error::Database(DbError::Other(_)) | Error::Internal { .. } | Error::Other(_) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::PredictionService { .. } => {
                tracing::error!("{}", self);
            }
            Error::Database(_) => {
                tracing::warn!("Database constraint error: {}", self);
            }
            Error::TooManyRequests { .. } => {
                tracing::warn!("{}", self);
            }
            Error::Unauthenticated { .. }
            | Error::InvalidCredential
            | Error::AccountNotFound
            | Error::AccountSuspended { .. }
            | Error::InsufficientRole { .. }
            | Error::Forbidden { .. } => {
                tracing::info!("Authorization error: {}", self);
            }
            Error::NotFound { .. } | Error::Validation { .. } | Error::InvalidDoctor { .. } | Error::Conflict { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let status = self.status_code();
        let body = match self.details() {
            Some(details) => json!({ "error": self.user_message(), "details": details }),
            None => json!({ "error": self.user_message() }),
        };

        (status, Json(body)).into_response()
    }
}

/// Convert from String errors (e.g., from external functions)
impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Internal { operation: msg }
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_follow_taxonomy() {
        assert_eq!(Error::Unauthenticated { message: None }.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(Error::InvalidCredential.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(Error::AccountNotFound.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(Error::AccountSuspended { message: None }.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            Error::InsufficientRole {
                required: vec![RoleName::Admin]
            }
            .status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            Error::InvalidDoctor {
                id: "x".to_string()
            }
            .status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::PredictionService { details: Value::Null }.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_persistence_errors_are_redacted() {
        let err = Error::Database(DbError::Other(anyhow::anyhow!("connection to 10.0.0.3:5432 refused")));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.user_message().contains("10.0.0.3"));
        assert!(err.details().is_none());
    }

    #[test]
    fn test_prediction_errors_relay_upstream_details() {
        let err = Error::PredictionService {
            details: json!({"detail": "model not loaded"}),
        };
        assert_eq!(err.user_message(), "Prediction service error");
        assert_eq!(err.details(), Some(json!({"detail": "model not loaded"})));
    }
}
