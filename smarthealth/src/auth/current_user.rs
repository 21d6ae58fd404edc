//! Request extractors that authenticate and authorize the caller.
//!
//! ```text
//! Authorization: Bearer <jwt>
//!        │
//!        ↓ verify_token          (stateless: signature, expiry, kind)
//!     Claims
//!        │
//!        ↓ authorize             (storage: exists, active, role intersection)
//! Authorized<R> { account, role }
//! ```
//!
//! Failures short-circuit before the handler body, and so before any audit entry is queued.

use std::marker::PhantomData;

use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header, request::Parts},
};
use tracing::{debug, instrument};

use crate::{
    AppState,
    auth::{
        roles::{EffectiveRole, RoleRequirement},
        session::{self, Claims, TokenKind},
    },
    config::Config,
    db::{
        Storage,
        models::{
            accounts::AccountDBResponse,
            patients::{PatientDBResponse, PatientFilter},
        },
    },
    errors::{Error, Result},
    types::{AccountId, RoleName, abbrev_uuid},
};

/// Token from an `Authorization: Bearer` header
pub fn bearer_token(headers: &HeaderMap) -> Result<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(Error::Unauthenticated {
            message: Some("Missing token".to_string()),
        })
}

/// Verify the access token in `headers`
pub fn access_claims(headers: &HeaderMap, config: &Config) -> Result<Claims> {
    session::verify_token(bearer_token(headers)?, TokenKind::Access, config)
}

/// Load the caller's current account and check it against `accepted`.
///
/// Runs on every request; roles are never trusted from the token.
#[instrument(skip(storage, accepted), fields(account_id = %abbrev_uuid(&account_id)), err)]
pub async fn authorize(
    storage: &dyn Storage,
    account_id: AccountId,
    accepted: &[RoleName],
) -> Result<(AccountDBResponse, EffectiveRole)> {
    let account = storage.get_account(account_id).await?.ok_or(Error::AccountNotFound)?;

    if !account.is_active {
        return Err(Error::AccountSuspended { message: None });
    }

    let role = EffectiveRole::resolve(&account.roles, accepted).ok_or_else(|| Error::InsufficientRole {
        required: accepted.to_vec(),
    })?;
    debug!(?role, "authorized");
    Ok((account, role))
}

/// An authenticated, active caller holding one of the roles `R` accepts
pub struct Authorized<R: RoleRequirement> {
    pub account: AccountDBResponse,
    pub role: EffectiveRole,
    _requirement: PhantomData<fn() -> R>,
}

impl<R: RoleRequirement> std::fmt::Debug for Authorized<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authorized")
            .field("account_id", &self.account.id)
            .field("role", &self.role)
            .finish()
    }
}

impl<R: RoleRequirement> Authorized<R> {
    pub fn id(&self) -> AccountId {
        self.account.id
    }

    /// Patients this caller may list
    pub fn patient_filter(&self) -> PatientFilter {
        if self.role.is_ownership_scoped() {
            PatientFilter::owned_by(self.account.id)
        } else {
            PatientFilter::all()
        }
    }

    /// Doctors may only touch their own patients; everyone else who got past the gate may
    pub fn ensure_can_access(&self, patient: &PatientDBResponse) -> Result<()> {
        if self.role.is_ownership_scoped() && patient.doctor_id != Some(self.account.id) {
            return Err(Error::Forbidden {
                resource: "patient".to_string(),
                id: patient.id.to_string(),
            });
        }
        Ok(())
    }

    /// Owning doctor for a new patient: a doctor always owns what they create
    pub fn owner_for_new_patient(&self, requested: Option<AccountId>) -> Option<AccountId> {
        if self.role.is_ownership_scoped() {
            Some(self.account.id)
        } else {
            requested
        }
    }

    pub fn display_name(&self) -> &str {
        self.account.name.as_deref().unwrap_or(&self.account.email)
    }
}

impl<R: RoleRequirement> FromRequestParts<AppState> for Authorized<R> {
    type Rejection = Error;

    #[instrument(skip(parts, state))]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let claims = access_claims(&parts.headers, &state.config)?;
        let (account, role) = authorize(state.storage.as_ref(), claims.sub, R::ROLES).await?;
        Ok(Self {
            account,
            role,
            _requirement: PhantomData,
        })
    }
}
