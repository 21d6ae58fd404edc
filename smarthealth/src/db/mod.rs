//! Storage layer for accounts, patients, lab reports, predictions and the access log.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐
//! │  Handlers   │  (API request handlers)
//! └──────┬──────┘
//!        │  Arc<dyn Storage>
//!        ↓
//! ┌─────────────┐
//! │   Storage   │  (this trait)
//! └──────┬──────┘
//!        │
//!   ┌────┴──────────────┐
//!   ↓                   ↓
//! PostgresStorage   InMemoryStorage
//! ```
//!
//! Handlers never hold a database client of their own: the store is built once in
//! [`crate::Application`] and handed to every component through [`crate::AppState`]. Tests and
//! `database.in_memory` deployments substitute [`InMemoryStorage`].
//!
//! # Modules
//!
//! - [`models`]: request and response records for each table
//! - [`errors`]: storage error classification
//! - [`postgres`]: the PostgreSQL implementation
//! - [`in_memory`]: the in-process implementation

pub mod errors;
pub mod in_memory;
pub mod models;
pub mod postgres;

pub use in_memory::InMemoryStorage;
pub use postgres::PostgresStorage;

use crate::types::{AccountId, BloodMetalsId, PatientId};
use async_trait::async_trait;
use errors::Result;
use models::{
    access_logs::{AccessLogCreateDBRequest, AccessLogDBResponse},
    accounts::{AccountCreateDBRequest, AccountDBResponse},
    blood_metals::{BloodMetalsCreateDBRequest, BloodMetalsDBResponse},
    patients::{PatientCreateDBRequest, PatientDBResponse, PatientFilter, PatientUpdateDBRequest},
    predictions::{PredictionCreateDBRequest, PredictionDBResponse},
};

/// The system of record.
///
/// Methods returning `Option` report a missing entity as `None`; methods that mutate a specific
/// entity report it as [`errors::DbError::NotFound`]. Every "list" method that mentions ordering
/// returns newest first.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Create an account and assign `request.roles`, creating any role that does not exist yet
    async fn create_account(&self, request: &AccountCreateDBRequest) -> Result<AccountDBResponse>;

    async fn get_account(&self, id: AccountId) -> Result<Option<AccountDBResponse>>;

    async fn get_account_by_email(&self, email: &str) -> Result<Option<AccountDBResponse>>;

    async fn get_account_by_google_id(&self, google_id: &str) -> Result<Option<AccountDBResponse>>;

    async fn link_google_id(&self, id: AccountId, google_id: &str) -> Result<AccountDBResponse>;

    async fn set_account_active(&self, id: AccountId, active: bool) -> Result<AccountDBResponse>;

    /// Accounts awaiting approval, newest first
    async fn list_pending_accounts(&self) -> Result<Vec<AccountDBResponse>>;

    async fn list_active_accounts_with_role(&self, role: &str) -> Result<Vec<AccountDBResponse>>;

    /// Create the role if it does not exist
    async fn ensure_role(&self, name: &str) -> Result<()>;

    /// Assign a role, creating it if needed. Returns false if the account already held it.
    async fn assign_role(&self, account_id: AccountId, role: &str) -> Result<bool>;

    async fn create_patient(&self, request: &PatientCreateDBRequest) -> Result<PatientDBResponse>;

    async fn get_patient(&self, id: PatientId) -> Result<Option<PatientDBResponse>>;

    /// Patients matching the filter, newest first
    async fn list_patients(&self, filter: &PatientFilter) -> Result<Vec<PatientDBResponse>>;

    async fn update_patient(&self, id: PatientId, request: &PatientUpdateDBRequest) -> Result<PatientDBResponse>;

    async fn assign_doctor(&self, id: PatientId, doctor_id: AccountId) -> Result<PatientDBResponse>;

    /// Delete a patient after its blood-metals reports and predictions. Returns false if the
    /// patient did not exist.
    async fn delete_patient(&self, id: PatientId) -> Result<bool>;

    async fn create_blood_metals(&self, request: &BloodMetalsCreateDBRequest) -> Result<BloodMetalsDBResponse>;

    /// A patient's lab history, newest first
    async fn list_blood_metals(&self, patient_id: PatientId) -> Result<Vec<BloodMetalsDBResponse>>;

    async fn latest_blood_metals(&self, patient_id: PatientId) -> Result<Option<BloodMetalsDBResponse>>;

    async fn get_blood_metals(&self, id: BloodMetalsId) -> Result<Option<BloodMetalsDBResponse>>;

    async fn delete_blood_metals(&self, id: BloodMetalsId) -> Result<bool>;

    async fn create_prediction(&self, request: &PredictionCreateDBRequest) -> Result<PredictionDBResponse>;

    /// A patient's predictions across all models, newest first
    async fn list_predictions(&self, patient_id: PatientId) -> Result<Vec<PredictionDBResponse>>;

    async fn append_access_logs(&self, entries: &[AccessLogCreateDBRequest]) -> Result<()>;

    /// One page of the access log, newest first
    async fn list_access_logs(&self, skip: i64, limit: i64) -> Result<Vec<AccessLogDBResponse>>;
}
