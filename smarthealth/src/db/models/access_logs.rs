//! Storage models for the append-only access log.

use crate::types::{AccessLogId, AccountId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// One audit entry as queued by the recorder. The timestamp is taken when the request is
/// handled, not when the writer persists it.
#[derive(Debug, Clone)]
pub struct AccessLogCreateDBRequest {
    pub account_id: Option<AccountId>,
    pub action: String,
    pub resource: String,
    pub ip_address: String,
    pub user_agent: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccessLogDBResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: AccessLogId,
    #[serde(rename = "userId")]
    #[schema(value_type = Option<String>, format = "uuid")]
    pub account_id: Option<AccountId>,
    pub action: String,
    pub resource: String,
    pub ip_address: String,
    pub user_agent: String,
    pub created_at: DateTime<Utc>,
}
