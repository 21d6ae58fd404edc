//! Storage models for staff accounts.

use crate::types::{AccountId, RoleName};
use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// Request for creating a new account
#[derive(Debug, Clone)]
pub struct AccountCreateDBRequest {
    pub email: String,
    pub password_hash: Option<String>,
    pub name: Option<String>,
    pub google_id: Option<String>,
    pub is_active: bool,
    /// Role names assigned on creation. Missing roles are created.
    pub roles: Vec<String>,
}

/// An account together with its current role names
#[derive(Debug, Clone, FromRow)]
pub struct AccountDBResponse {
    pub id: AccountId,
    pub email: String,
    pub password_hash: Option<String>,
    pub name: Option<String>,
    pub google_id: Option<String>,
    pub is_active: bool,
    pub roles: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AccountDBResponse {
    pub fn has_role(&self, role: RoleName) -> bool {
        role.held_by(&self.roles)
    }

    /// Active and holding the doctor role; the only valid target for patient assignment
    pub fn is_active_doctor(&self) -> bool {
        self.is_active && self.has_role(RoleName::Doctor)
    }
}
