use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::Redirect,
};
use tracing::{info, instrument};

use crate::{
    AppState,
    api::models::{
        accounts::AccountSummary,
        auth::{GoogleCallbackQuery, LoginRequest, RefreshRequest, RegisterRequest, RegisterResponse},
    },
    auth::{
        google::{GoogleProfile, fallback_email},
        password,
        session::{self, TokenKind, TokenPair},
    },
    db::{
        Storage,
        models::accounts::{AccountCreateDBRequest, AccountDBResponse},
    },
    errors::Error,
    types::{RoleName, abbrev_uuid},
};

fn invalid_credentials() -> Error {
    Error::Unauthenticated {
        message: Some("Invalid credentials".to_string()),
    }
}

/// Register a new staff account
///
/// The account starts inactive with the `unauthorized` role and cannot use any protected route
/// until an administrator approves it.
#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    tag = "auth",
    responses(
        (status = 201, description = "Registered, awaiting approval", body = RegisterResponse),
        (status = 400, description = "Missing fields or email already registered"),
        (status = 429, description = "Too many requests"),
    )
)]
#[instrument(skip_all)]
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), Error> {
    let email = request.email.trim().to_lowercase();
    if email.is_empty() || request.password.is_empty() {
        return Err(Error::Validation {
            message: "email & password required".to_string(),
        });
    }

    if state.storage.get_account_by_email(&email).await?.is_some() {
        return Err(Error::Conflict {
            message: "User already exists".to_string(),
        });
    }

    let password_hash = password::hash_password(request.password).await?;
    let account = state
        .storage
        .create_account(&AccountCreateDBRequest {
            email,
            password_hash: Some(password_hash),
            name: request.name,
            google_id: None,
            is_active: false,
            roles: vec![RoleName::Unauthorized.to_string()],
        })
        .await?;

    info!(account_id = %abbrev_uuid(&account.id), "Account registered, pending approval");
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "Registered. Wait for admin approval.".to_string(),
            user: AccountSummary::from(&account),
        }),
    ))
}

/// Sign in with email and password
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    tag = "auth",
    responses(
        (status = 200, description = "Access and refresh tokens", body = TokenPair),
        (status = 401, description = "Invalid credentials"),
        (status = 403, description = "Account not yet approved"),
        (status = 429, description = "Too many requests"),
    )
)]
#[instrument(skip_all)]
pub async fn login(State(state): State<AppState>, Json(request): Json<LoginRequest>) -> Result<Json<TokenPair>, Error> {
    let email = request.email.trim().to_lowercase();
    let account = state.storage.get_account_by_email(&email).await?.ok_or_else(invalid_credentials)?;

    // Accounts created through Google have no password
    let hash = account.password_hash.clone().ok_or_else(invalid_credentials)?;
    if !password::verify_password(request.password, hash).await? {
        return Err(invalid_credentials());
    }

    if !account.is_active {
        return Err(Error::AccountSuspended {
            message: Some("Account not yet approved".to_string()),
        });
    }

    Ok(Json(session::create_token_pair(account.id, &state.config)?))
}

/// Exchange a refresh token for a new token pair
#[utoipa::path(
    post,
    path = "/auth/refresh",
    request_body = RefreshRequest,
    tag = "auth",
    responses(
        (status = 200, description = "New access and refresh tokens", body = TokenPair),
        (status = 401, description = "Account no longer exists"),
        (status = 403, description = "Invalid or expired refresh token, or account inactive"),
    )
)]
#[instrument(skip_all)]
pub async fn refresh(State(state): State<AppState>, Json(request): Json<RefreshRequest>) -> Result<Json<TokenPair>, Error> {
    let claims = session::verify_token(&request.refresh_token, TokenKind::Refresh, &state.config)?;
    let account = state.storage.get_account(claims.sub).await?.ok_or(Error::AccountNotFound)?;
    if !account.is_active {
        return Err(Error::AccountSuspended { message: None });
    }
    Ok(Json(session::create_token_pair(account.id, &state.config)?))
}

/// Start Google sign-in
#[utoipa::path(
    get,
    path = "/auth/google",
    tag = "auth",
    responses(
        (status = 303, description = "Redirect to Google"),
        (status = 400, description = "Google sign-in is not configured"),
    )
)]
#[instrument(skip_all)]
pub async fn google_login(State(state): State<AppState>) -> Result<Redirect, Error> {
    let google = state.google.as_ref().ok_or_else(google_disabled)?;
    Ok(Redirect::to(google.authorization_url().as_str()))
}

/// Complete Google sign-in
///
/// Finds the account by Google id, then by verified email (linking the Google id), and otherwise
/// creates an inactive account awaiting approval.
#[utoipa::path(
    get,
    path = "/auth/google/callback",
    params(GoogleCallbackQuery),
    tag = "auth",
    responses(
        (status = 200, description = "Access and refresh tokens", body = TokenPair),
        (status = 401, description = "Sign-in failed or state invalid"),
        (status = 403, description = "Account pending approval"),
    )
)]
#[instrument(skip_all)]
pub async fn google_callback(
    State(state): State<AppState>,
    Query(query): Query<GoogleCallbackQuery>,
) -> Result<Json<TokenPair>, Error> {
    let google = state.google.as_ref().ok_or_else(google_disabled)?;

    let (Some(code), None) = (query.code.as_deref(), query.error.as_deref()) else {
        return Err(Error::Unauthenticated {
            message: Some("Google sign-in failed".to_string()),
        });
    };
    if !query.state.as_deref().is_some_and(|s| google.take_state(s)) {
        return Err(Error::Unauthenticated {
            message: Some("Invalid OAuth state".to_string()),
        });
    }

    let profile = google.fetch_profile(code).await?;
    let account = account_for_profile(state.storage.as_ref(), &profile).await?;

    if !account.is_active {
        return Err(Error::AccountSuspended {
            message: Some("Account pending approval".to_string()),
        });
    }

    Ok(Json(session::create_token_pair(account.id, &state.config)?))
}

fn google_disabled() -> Error {
    Error::Validation {
        message: "Google sign-in is not configured".to_string(),
    }
}

/// Existing account for a Google identity, or a new inactive one
async fn account_for_profile(storage: &dyn Storage, profile: &GoogleProfile) -> Result<AccountDBResponse, Error> {
    if let Some(account) = storage.get_account_by_google_id(&profile.sub).await? {
        return Ok(account);
    }

    // An unverified address is never linked or stored
    let email = match profile.verified_email() {
        Some(email) => {
            if let Some(existing) = storage.get_account_by_email(&email).await? {
                info!(account_id = %abbrev_uuid(&existing.id), "Linking Google identity to existing account");
                return Ok(storage.link_google_id(existing.id, &profile.sub).await?);
            }
            email
        }
        None => fallback_email(&profile.sub),
    };

    let account = storage
        .create_account(&AccountCreateDBRequest {
            email,
            password_hash: None,
            name: profile.name.clone(),
            google_id: Some(profile.sub.clone()),
            is_active: false,
            roles: vec![RoleName::Unauthorized.to_string()],
        })
        .await?;
    info!(account_id = %abbrev_uuid(&account.id), "Account created from Google sign-in, pending approval");
    Ok(account)
}
