//! Common type definitions.
//!
//! # ID Types
//!
//! All entity IDs are UUIDs wrapped in type aliases:
//!
//! - [`AccountId`]: staff account identifier (doctors, nurses, administrators)
//! - [`PatientId`]: patient record identifier
//! - [`BloodMetalsId`]: blood-metals lab report identifier
//! - [`PredictionId`]: stored model output identifier
//!
//! # Roles
//!
//! [`RoleName`] lists the roles the application itself understands. Roles are stored by name,
//! and administrators may assign names outside this list; such roles grant nothing.

use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;

pub type AccountId = Uuid;
pub type PatientId = Uuid;
pub type BloodMetalsId = Uuid;
pub type PredictionId = Uuid;
pub type AccessLogId = Uuid;

/// Abbreviate a UUID to its first 8 characters for more readable logs and traces
/// Example: "550e8400-e29b-41d4-a716-446655440000" -> "550e8400"
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}

/// Built-in role names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RoleName {
    Doctor,
    Nurse,
    Admin,
    /// Assigned to self-registered accounts until an administrator grants a real role
    Unauthorized,
}

impl RoleName {
    pub const ALL: [RoleName; 4] = [RoleName::Doctor, RoleName::Admin, RoleName::Nurse, RoleName::Unauthorized];

    pub fn as_str(&self) -> &'static str {
        match self {
            RoleName::Doctor => "doctor",
            RoleName::Nurse => "nurse",
            RoleName::Admin => "admin",
            RoleName::Unauthorized => "unauthorized",
        }
    }

    /// True if `held` (a list of stored role names) contains this role.
    pub fn held_by(&self, held: &[String]) -> bool {
        held.iter().any(|r| r == self.as_str())
    }
}

impl fmt::Display for RoleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
