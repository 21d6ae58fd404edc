//! Test utilities for driving the full router over in-memory storage
use std::sync::Arc;

use axum_test::TestServer;
use uuid::Uuid;

use crate::{
    AppState, Application, BackgroundServices,
    auth::{
        password,
        session::{self, TokenKind},
    },
    config::{Config, RateLimitConfig},
    db::{
        InMemoryStorage, Storage,
        models::{
            accounts::{AccountCreateDBRequest, AccountDBResponse},
            patients::{DerivedMetrics, PatientCreateDBRequest, PatientDBResponse, PatientDetails},
        },
    },
    types::AccountId,
};

pub const ADMIN_EMAIL: &str = "admin@test.com";
pub const ADMIN_PASSWORD: &str = "admin-password";
pub const TEST_PASSWORD: &str = "correct horse";

pub fn create_test_config() -> Config {
    let mut config = Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        secret_key: Some("test-secret-key-for-testing-only".to_string()),
        refresh_secret_key: Some("test-refresh-secret-for-testing-only".to_string()),
        ..Default::default()
    };
    config.database.in_memory = true;
    config.admin.email = ADMIN_EMAIL.to_string();
    config.admin.password = Some(ADMIN_PASSWORD.to_string());
    // Individual tests opt back in
    config.rate_limits.auth = RateLimitConfig {
        max_requests: 0,
        ..Default::default()
    };
    config.rate_limits.global = RateLimitConfig {
        max_requests: 0,
        ..Default::default()
    };
    config
}

/// A running test server plus direct handles on what sits behind it
pub struct TestApp {
    pub server: TestServer,
    pub storage: Arc<InMemoryStorage>,
    pub state: AppState,
    pub bg_services: BackgroundServices,
}

pub async fn create_test_app(config: Config) -> TestApp {
    let storage = Arc::new(InMemoryStorage::new());
    let app = Application::new_with_storage(config, storage.clone())
        .await
        .expect("Failed to create application");
    let (server, state, bg_services) = app.into_test_server();
    TestApp {
        server,
        storage,
        state,
        bg_services,
    }
}

/// Insert an account whose password is [`TEST_PASSWORD`]
pub async fn create_test_account(storage: &InMemoryStorage, roles: &[&str], active: bool) -> AccountDBResponse {
    storage
        .create_account(&AccountCreateDBRequest {
            email: format!("{}@example.com", Uuid::new_v4()),
            password_hash: Some(password::hash_string(TEST_PASSWORD).expect("hash")),
            name: Some(format!("Test {}", roles.join("/"))),
            google_id: None,
            is_active: active,
            roles: roles.iter().map(|r| r.to_string()).collect(),
        })
        .await
        .expect("Failed to create test account")
}

pub fn access_token(account_id: AccountId, config: &Config) -> String {
    session::create_token(account_id, TokenKind::Access, config).expect("Failed to sign token")
}

/// An active account holding `roles`, and a valid access token for it
pub async fn create_test_user(app: &TestApp, roles: &[&str]) -> (AccountDBResponse, String) {
    let account = create_test_account(&app.storage, roles, true).await;
    let token = access_token(account.id, &app.state.config);
    (account, token)
}

pub async fn create_test_patient(storage: &InMemoryStorage, name: &str, doctor_id: Option<AccountId>) -> PatientDBResponse {
    let details = PatientDetails {
        name: name.to_string(),
        height_cm: Some(165.0),
        weight_kg: Some(60.0),
        ..Default::default()
    };
    let derived = DerivedMetrics::compute(&details, chrono::Utc::now().date_naive());
    storage
        .create_patient(&PatientCreateDBRequest {
            details,
            derived,
            doctor_id,
        })
        .await
        .expect("Failed to create test patient")
}
