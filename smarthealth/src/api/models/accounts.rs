//! API response models for staff accounts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{db::models::accounts::AccountDBResponse, types::AccountId};

/// Minimal account reference returned after registration or approval
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AccountSummary {
    #[schema(value_type = String, format = "uuid")]
    pub id: AccountId,
    pub email: String,
}

impl From<&AccountDBResponse> for AccountSummary {
    fn from(account: &AccountDBResponse) -> Self {
        Self {
            id: account.id,
            email: account.email.clone(),
        }
    }
}

/// An account with its role names flattened; never carries the password hash
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccountResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: AccountId,
    pub email: String,
    pub name: Option<String>,
    pub is_active: bool,
    pub roles: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl From<AccountDBResponse> for AccountResponse {
    fn from(account: AccountDBResponse) -> Self {
        Self {
            id: account.id,
            email: account.email,
            name: account.name,
            is_active: account.is_active,
            roles: account.roles,
            created_at: account.created_at,
        }
    }
}

/// A doctor a nurse can assign patients to
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DoctorResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: AccountId,
    pub name: Option<String>,
    pub email: String,
}

impl From<AccountDBResponse> for DoctorResponse {
    fn from(account: AccountDBResponse) -> Self {
        Self {
            id: account.id,
            name: account.name,
            email: account.email,
        }
    }
}
