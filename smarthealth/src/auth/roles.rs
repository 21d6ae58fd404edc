//! Route role requirements and the effective-role precedence.
//!
//! Each protected handler names its accepted roles at the type level through
//! [`Authorized<R>`](crate::auth::current_user::Authorized), where `R` is one of the marker types
//! below. Once the gate has passed, handlers branch on a single [`EffectiveRole`] instead of
//! testing role membership one `if` at a time.

use crate::types::RoleName;

/// Roles a route accepts
pub trait RoleRequirement: Send + Sync + 'static {
    const ROLES: &'static [RoleName];
}

pub struct AdminOnly;
pub struct DoctorOnly;
pub struct NurseOnly;
/// Doctor or nurse
pub struct Clinician;

impl RoleRequirement for AdminOnly {
    const ROLES: &'static [RoleName] = &[RoleName::Admin];
}

impl RoleRequirement for DoctorOnly {
    const ROLES: &'static [RoleName] = &[RoleName::Doctor];
}

impl RoleRequirement for NurseOnly {
    const ROLES: &'static [RoleName] = &[RoleName::Nurse];
}

impl RoleRequirement for Clinician {
    const ROLES: &'static [RoleName] = &[RoleName::Doctor, RoleName::Nurse];
}

/// The single role a request acts under.
///
/// Resolved as the first of `Admin`, `Nurse`, `Doctor` that the caller holds and the route
/// accepts. Roles the route does not accept never count, so an admin who is also a doctor acts
/// as a doctor on clinician routes. A caller holding both doctor and nurse acts as a nurse and
/// sees every patient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectiveRole {
    Admin,
    Nurse,
    Doctor,
}

impl EffectiveRole {
    const PRECEDENCE: [(RoleName, EffectiveRole); 3] = [
        (RoleName::Admin, EffectiveRole::Admin),
        (RoleName::Nurse, EffectiveRole::Nurse),
        (RoleName::Doctor, EffectiveRole::Doctor),
    ];

    /// `None` when the caller holds none of the accepted roles
    pub fn resolve(held: &[String], accepted: &[RoleName]) -> Option<Self> {
        Self::PRECEDENCE
            .iter()
            .find(|(name, _)| name.held_by(held) && accepted.contains(name))
            .map(|(_, role)| *role)
    }

    /// Doctors only ever see and touch their own patients
    pub fn is_ownership_scoped(&self) -> bool {
        matches!(self, EffectiveRole::Doctor)
    }
}
