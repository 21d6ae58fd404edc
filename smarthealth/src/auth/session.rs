//! Bearer token creation and verification.
//!
//! Tokens carry only the account id and their kind. Roles and active status are looked up on
//! every request (see [`crate::auth::current_user::authorize`]), so an administrator's changes
//! apply on the very next call rather than at token expiry.

use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{config::Config, errors::Error, types::AccountId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// JWT claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: AccountId,
    pub kind: TokenKind,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

fn secret_for(kind: TokenKind, config: &Config) -> Result<&str, Error> {
    let secret = match kind {
        TokenKind::Access => config.secret_key.as_deref(),
        TokenKind::Refresh => config.refresh_secret(),
    };
    secret.ok_or_else(|| Error::Internal {
        operation: "sign tokens: secret_key is required".to_string(),
    })
}

pub fn create_token(account_id: AccountId, kind: TokenKind, config: &Config) -> Result<String, Error> {
    let now = Utc::now();
    let lifetime = match kind {
        TokenKind::Access => config.auth.access_token_expiry,
        TokenKind::Refresh => config.auth.refresh_token_expiry,
    };
    let claims = Claims {
        sub: account_id,
        kind,
        iat: now.timestamp(),
        exp: (now + lifetime).timestamp(),
    };

    let key = EncodingKey::from_secret(secret_for(kind, config)?.as_bytes());
    encode(&Header::default(), &claims, &key).map_err(|e| Error::Internal {
        operation: format!("create JWT: {e}"),
    })
}

/// Issue a fresh access/refresh pair
pub fn create_token_pair(account_id: AccountId, config: &Config) -> Result<TokenPair, Error> {
    Ok(TokenPair {
        access_token: create_token(account_id, TokenKind::Access, config)?,
        refresh_token: create_token(account_id, TokenKind::Refresh, config)?,
    })
}

/// Check signature, expiry and kind. Never touches storage.
pub fn verify_token(token: &str, kind: TokenKind, config: &Config) -> Result<Claims, Error> {
    let key = DecodingKey::from_secret(secret_for(kind, config)?.as_bytes());

    let data = decode::<Claims>(token, &key, &Validation::default()).map_err(|e| match e.kind() {
        ErrorKind::InvalidToken
        | ErrorKind::InvalidSignature
        | ErrorKind::ExpiredSignature
        | ErrorKind::MissingRequiredClaim(_)
        | ErrorKind::ImmatureSignature
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_)
        | ErrorKind::InvalidAlgorithm => Error::InvalidCredential,
        _ => Error::Internal {
            operation: format!("JWT verification: {e}"),
        },
    })?;

    if data.claims.kind != kind {
        return Err(Error::InvalidCredential);
    }
    Ok(data.claims)
}
