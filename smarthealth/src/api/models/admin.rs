//! API request/response models for administration.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::accounts::AccountSummary;
use crate::db::models::access_logs::AccessLogDBResponse;

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssignRoleRequest {
    pub user_id: Option<String>,
    pub role_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApproveResponse {
    pub message: String,
    pub user: AccountSummary,
}

/// One page of the access log
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccessLogPage {
    pub page: i64,
    pub page_size: i64,
    pub logs: Vec<AccessLogDBResponse>,
}
