//! Google OAuth 2.0 authorization-code sign-in.
//!
//! `GET /auth/google` redirects to Google with a random `state`; the callback checks that state,
//! exchanges the code for an access token and reads the userinfo profile. Mapping the profile
//! onto an account happens in the auth handler.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Deserialize;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::{auth::password::generate_state_token, config::GoogleConfig, errors::Error};

/// Identity returned by the userinfo endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleProfile {
    pub sub: String,
    pub email: Option<String>,
    /// OpenID `email_verified`; the v2 userinfo endpoint calls it `verified_email`
    #[serde(default, alias = "verified_email")]
    pub email_verified: bool,
    pub name: Option<String>,
}

impl GoogleProfile {
    /// The profile email, normalized, if Google has verified it
    pub fn verified_email(&self) -> Option<String> {
        self.email
            .as_deref()
            .filter(|_| self.email_verified)
            .map(|email| email.trim().to_lowercase())
            .filter(|email| !email.is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

pub struct GoogleOAuth {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    callback_url: Url,
    auth_url: Url,
    token_url: Url,
    userinfo_url: Url,
    state_ttl: Duration,
    /// Issued `state` values and when they were issued
    states: DashMap<String, Instant>,
}

impl GoogleOAuth {
    /// None when sign-in is disabled or incompletely configured
    pub fn from_config(config: &GoogleConfig, http: reqwest::Client) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        Some(Self {
            http,
            client_id: config.client_id.clone()?,
            client_secret: config.client_secret.clone()?,
            callback_url: config.callback_url.clone()?,
            auth_url: config.auth_url.clone(),
            token_url: config.token_url.clone(),
            userinfo_url: config.userinfo_url.clone(),
            state_ttl: config.state_ttl,
            states: DashMap::new(),
        })
    }

    /// Provider URL to redirect the browser to, carrying a freshly issued state
    pub fn authorization_url(&self) -> Url {
        self.purge_expired();

        let state = generate_state_token();
        self.states.insert(state.clone(), Instant::now());

        let mut url = self.auth_url.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", self.callback_url.as_str())
            .append_pair("scope", "openid email profile")
            .append_pair("state", &state);
        url
    }

    /// Consume a state value. Each one is accepted at most once, and only within its TTL.
    pub fn take_state(&self, state: &str) -> bool {
        match self.states.remove(state) {
            Some((_, issued)) => issued.elapsed() <= self.state_ttl,
            None => false,
        }
    }

    fn purge_expired(&self) {
        let ttl = self.state_ttl;
        self.states.retain(|_, issued| issued.elapsed() <= ttl);
    }

    /// Exchange an authorization code and fetch the signed-in user's profile
    #[instrument(skip(self, code), err)]
    pub async fn fetch_profile(&self, code: &str) -> Result<GoogleProfile, Error> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.callback_url.as_str()),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];

        let response = self
            .http
            .post(self.token_url.clone())
            .form(&params)
            .send()
            .await
            .map_err(|e| Error::Internal {
                operation: format!("reach Google token endpoint: {e}"),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(%status, body, "Google rejected authorization code");
            return Err(Error::Unauthenticated {
                message: Some("Google sign-in failed".to_string()),
            });
        }

        let token: TokenResponse = response.json().await.map_err(|e| Error::Internal {
            operation: format!("parse Google token response: {e}"),
        })?;

        let response = self
            .http
            .get(self.userinfo_url.clone())
            .bearer_auth(&token.access_token)
            .send()
            .await
            .map_err(|e| Error::Internal {
                operation: format!("reach Google userinfo endpoint: {e}"),
            })?;

        if !response.status().is_success() {
            return Err(Error::Internal {
                operation: format!("fetch Google profile: HTTP {}", response.status()),
            });
        }

        let profile: GoogleProfile = response.json().await.map_err(|e| Error::Internal {
            operation: format!("parse Google profile: {e}"),
        })?;
        debug!(google_id = %profile.sub, "fetched Google profile");
        Ok(profile)
    }
}

/// Address used for Google identities that share no email
pub fn fallback_email(google_id: &str) -> String {
    format!("no-email-{google_id}@example.com")
}
