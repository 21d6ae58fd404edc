use axum::{
    Json,
    extract::{Path, Query, State},
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    AppState,
    api::models::{
        MessageResponse,
        accounts::{AccountResponse, AccountSummary},
        admin::{AccessLogPage, ApproveResponse, AssignRoleRequest},
        pagination::PageQuery,
    },
    auth::{current_user::Authorized, roles::AdminOnly},
    db::errors::DbError,
    errors::Error,
    types::{AccountId, abbrev_uuid},
};

fn user_not_found(id: AccountId) -> Error {
    Error::NotFound {
        resource: "User".to_string(),
        id: id.to_string(),
    }
}

/// List accounts awaiting approval
#[utoipa::path(
    get,
    path = "/admin/pending",
    tag = "admin",
    responses(
        (status = 200, description = "Inactive accounts, newest first", body = [AccountResponse]),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Not an administrator"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all)]
pub async fn list_pending(State(state): State<AppState>, _admin: Authorized<AdminOnly>) -> Result<Json<Vec<AccountResponse>>, Error> {
    let pending = state.storage.list_pending_accounts().await?;
    Ok(Json(pending.into_iter().map(AccountResponse::from).collect()))
}

/// Activate an account
#[utoipa::path(
    post,
    path = "/admin/approve/{userId}",
    tag = "admin",
    params(("userId" = String, Path, description = "Account to approve")),
    responses(
        (status = 200, description = "Account approved", body = ApproveResponse),
        (status = 403, description = "Not an administrator"),
        (status = 404, description = "Unknown account"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip(state, admin), fields(user_id = %abbrev_uuid(&user_id)), err)]
pub async fn approve(
    State(state): State<AppState>,
    admin: Authorized<AdminOnly>,
    Path(user_id): Path<AccountId>,
) -> Result<Json<ApproveResponse>, Error> {
    let account = state.storage.set_account_active(user_id, true).await.map_err(|e| match e {
        DbError::NotFound => user_not_found(user_id),
        other => other.into(),
    })?;

    info!(approved_by = %abbrev_uuid(&admin.id()), "Account approved");
    Ok(Json(ApproveResponse {
        message: "User approved".to_string(),
        user: AccountSummary::from(&account),
    }))
}

/// Grant a role to an account
///
/// Unknown role names are created. Assigning a role the account already holds succeeds without
/// adding a second assignment.
#[utoipa::path(
    post,
    path = "/admin/assign-role",
    tag = "admin",
    request_body = AssignRoleRequest,
    responses(
        (status = 200, description = "Role assigned, or already held", body = MessageResponse),
        (status = 400, description = "userId and roleName required"),
        (status = 403, description = "Not an administrator"),
        (status = 404, description = "Unknown account"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all, err)]
pub async fn assign_role(
    State(state): State<AppState>,
    admin: Authorized<AdminOnly>,
    Json(request): Json<AssignRoleRequest>,
) -> Result<Json<MessageResponse>, Error> {
    let required = || Error::Validation {
        message: "userId and roleName required".to_string(),
    };
    let user_id = request.user_id.as_deref().map(str::trim).filter(|s| !s.is_empty()).ok_or_else(required)?;
    let role_name = request.role_name.as_deref().map(str::trim).filter(|s| !s.is_empty()).ok_or_else(required)?;

    let user_id = Uuid::parse_str(user_id).map_err(|_| Error::Validation {
        message: format!("Invalid userId: {user_id}"),
    })?;

    let assigned = state.storage.assign_role(user_id, role_name).await.map_err(|e| match e {
        DbError::NotFound => user_not_found(user_id),
        other => other.into(),
    })?;

    info!(
        user_id = %abbrev_uuid(&user_id),
        role = role_name,
        assigned,
        by = %abbrev_uuid(&admin.id()),
        "Role assignment"
    );
    Ok(Json(MessageResponse::new(if assigned { "Role assigned" } else { "Role already assigned" })))
}

/// Read the access log
#[utoipa::path(
    get,
    path = "/admin/logs",
    tag = "admin",
    params(PageQuery),
    responses(
        (status = 200, description = "One page of the access log, newest first", body = AccessLogPage),
        (status = 403, description = "Not an administrator"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all, err)]
pub async fn list_logs(
    State(state): State<AppState>,
    _admin: Authorized<AdminOnly>,
    Query(query): Query<PageQuery>,
) -> Result<Json<AccessLogPage>, Error> {
    let logs = state.storage.list_access_logs(query.skip(), query.page_size()).await?;
    Ok(Json(AccessLogPage {
        page: query.page(),
        page_size: query.page_size(),
        logs,
    }))
}
