//! In-process [`Storage`] used by tests and `database.in_memory` deployments.
//!
//! Rows live in insertion-ordered vectors behind a single `RwLock`, so every operation sees a
//! consistent snapshot and multi-table changes (patient cascade delete) are atomic.

use super::{
    Storage,
    errors::{DbError, Result},
    models::{
        access_logs::{AccessLogCreateDBRequest, AccessLogDBResponse},
        accounts::{AccountCreateDBRequest, AccountDBResponse},
        blood_metals::{BloodMetalsCreateDBRequest, BloodMetalsDBResponse},
        patients::{PatientCreateDBRequest, PatientDBResponse, PatientFilter, PatientUpdateDBRequest},
        predictions::{PredictionCreateDBRequest, PredictionDBResponse},
    },
};
use crate::types::{AccountId, BloodMetalsId, PatientId};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeSet;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    roles: BTreeSet<String>,
    accounts: Vec<AccountDBResponse>,
    patients: Vec<PatientDBResponse>,
    blood_metals: Vec<BloodMetalsDBResponse>,
    predictions: Vec<PredictionDBResponse>,
    access_logs: Vec<AccessLogDBResponse>,
}

impl Tables {
    fn account_mut(&mut self, id: AccountId) -> Result<&mut AccountDBResponse> {
        self.accounts.iter_mut().find(|a| a.id == id).ok_or(DbError::NotFound)
    }

    fn patient_mut(&mut self, id: PatientId) -> Result<&mut PatientDBResponse> {
        self.patients.iter_mut().find(|p| p.id == id).ok_or(DbError::NotFound)
    }

    fn unique_violation(constraint: &str, message: String) -> DbError {
        DbError::UniqueViolation {
            constraint: Some(constraint.to_string()),
            table: Some("accounts".to_string()),
            message,
        }
    }

    fn require_patient(&self, patient_id: PatientId, table: &str) -> Result<()> {
        if self.patients.iter().any(|p| p.id == patient_id) {
            Ok(())
        } else {
            Err(DbError::ForeignKeyViolation {
                constraint: Some(format!("{table}_patient_id_fkey")),
                table: Some(table.to_string()),
                message: format!("patient {patient_id} does not exist"),
            })
        }
    }
}

/// Grant `role` to `account`, keeping role names sorted. Returns false if already held.
fn grant(roles: &mut BTreeSet<String>, account: &mut AccountDBResponse, role: &str) -> bool {
    roles.insert(role.to_string());
    if account.roles.iter().any(|r| r == role) {
        return false;
    }
    account.roles.push(role.to_string());
    account.roles.sort();
    true
}

#[derive(Default)]
pub struct InMemoryStorage {
    tables: RwLock<Tables>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn create_account(&self, request: &AccountCreateDBRequest) -> Result<AccountDBResponse> {
        let mut tables = self.tables.write().await;

        if tables.accounts.iter().any(|a| a.email == request.email) {
            return Err(Tables::unique_violation(
                "accounts_email_key",
                format!("email {} already registered", request.email),
            ));
        }
        if let Some(google_id) = &request.google_id
            && tables.accounts.iter().any(|a| a.google_id.as_ref() == Some(google_id))
        {
            return Err(Tables::unique_violation(
                "accounts_google_id_key",
                "google id already linked".to_string(),
            ));
        }

        let now = Utc::now();
        let mut account = AccountDBResponse {
            id: Uuid::new_v4(),
            email: request.email.clone(),
            password_hash: request.password_hash.clone(),
            name: request.name.clone(),
            google_id: request.google_id.clone(),
            is_active: request.is_active,
            roles: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        for role in &request.roles {
            grant(&mut tables.roles, &mut account, role);
        }

        tables.accounts.push(account.clone());
        Ok(account)
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<AccountDBResponse>> {
        let tables = self.tables.read().await;
        Ok(tables.accounts.iter().find(|a| a.id == id).cloned())
    }

    async fn get_account_by_email(&self, email: &str) -> Result<Option<AccountDBResponse>> {
        let tables = self.tables.read().await;
        Ok(tables.accounts.iter().find(|a| a.email == email).cloned())
    }

    async fn get_account_by_google_id(&self, google_id: &str) -> Result<Option<AccountDBResponse>> {
        let tables = self.tables.read().await;
        Ok(tables
            .accounts
            .iter()
            .find(|a| a.google_id.as_deref() == Some(google_id))
            .cloned())
    }

    async fn link_google_id(&self, id: AccountId, google_id: &str) -> Result<AccountDBResponse> {
        let mut tables = self.tables.write().await;
        if tables
            .accounts
            .iter()
            .any(|a| a.id != id && a.google_id.as_deref() == Some(google_id))
        {
            return Err(Tables::unique_violation(
                "accounts_google_id_key",
                "google id already linked".to_string(),
            ));
        }
        let account = tables.account_mut(id)?;
        account.google_id = Some(google_id.to_string());
        account.updated_at = Utc::now();
        Ok(account.clone())
    }

    async fn set_account_active(&self, id: AccountId, active: bool) -> Result<AccountDBResponse> {
        let mut tables = self.tables.write().await;
        let account = tables.account_mut(id)?;
        account.is_active = active;
        account.updated_at = Utc::now();
        Ok(account.clone())
    }

    async fn list_pending_accounts(&self) -> Result<Vec<AccountDBResponse>> {
        let tables = self.tables.read().await;
        Ok(tables.accounts.iter().rev().filter(|a| !a.is_active).cloned().collect())
    }

    async fn list_active_accounts_with_role(&self, role: &str) -> Result<Vec<AccountDBResponse>> {
        let tables = self.tables.read().await;
        Ok(tables
            .accounts
            .iter()
            .filter(|a| a.is_active && a.roles.iter().any(|r| r == role))
            .cloned()
            .collect())
    }

    async fn ensure_role(&self, name: &str) -> Result<()> {
        self.tables.write().await.roles.insert(name.to_string());
        Ok(())
    }

    async fn assign_role(&self, account_id: AccountId, role: &str) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let Tables { roles, accounts, .. } = &mut *tables;
        let account = accounts.iter_mut().find(|a| a.id == account_id).ok_or(DbError::NotFound)?;
        Ok(grant(roles, account, role))
    }

    async fn create_patient(&self, request: &PatientCreateDBRequest) -> Result<PatientDBResponse> {
        let now = Utc::now();
        let patient = PatientDBResponse {
            id: Uuid::new_v4(),
            details: request.details.clone(),
            derived: request.derived,
            doctor_id: request.doctor_id,
            created_at: now,
            updated_at: now,
        };
        self.tables.write().await.patients.push(patient.clone());
        Ok(patient)
    }

    async fn get_patient(&self, id: PatientId) -> Result<Option<PatientDBResponse>> {
        let tables = self.tables.read().await;
        Ok(tables.patients.iter().find(|p| p.id == id).cloned())
    }

    async fn list_patients(&self, filter: &PatientFilter) -> Result<Vec<PatientDBResponse>> {
        let tables = self.tables.read().await;
        Ok(tables.patients.iter().rev().filter(|p| filter.matches(p)).cloned().collect())
    }

    async fn update_patient(&self, id: PatientId, request: &PatientUpdateDBRequest) -> Result<PatientDBResponse> {
        let mut tables = self.tables.write().await;
        let patient = tables.patient_mut(id)?;
        patient.details = request.details.clone();
        patient.derived = request.derived;
        patient.updated_at = Utc::now();
        Ok(patient.clone())
    }

    async fn assign_doctor(&self, id: PatientId, doctor_id: AccountId) -> Result<PatientDBResponse> {
        let mut tables = self.tables.write().await;
        let patient = tables.patient_mut(id)?;
        patient.doctor_id = Some(doctor_id);
        patient.updated_at = Utc::now();
        Ok(patient.clone())
    }

    async fn delete_patient(&self, id: PatientId) -> Result<bool> {
        let mut tables = self.tables.write().await;
        tables.blood_metals.retain(|b| b.patient_id != id);
        tables.predictions.retain(|p| p.patient_id != id);
        let before = tables.patients.len();
        tables.patients.retain(|p| p.id != id);
        Ok(tables.patients.len() < before)
    }

    async fn create_blood_metals(&self, request: &BloodMetalsCreateDBRequest) -> Result<BloodMetalsDBResponse> {
        let mut tables = self.tables.write().await;
        tables.require_patient(request.patient_id, "blood_metals")?;
        let report = BloodMetalsDBResponse {
            id: Uuid::new_v4(),
            patient_id: request.patient_id,
            values: request.values,
            created_at: Utc::now(),
        };
        tables.blood_metals.push(report.clone());
        Ok(report)
    }

    async fn list_blood_metals(&self, patient_id: PatientId) -> Result<Vec<BloodMetalsDBResponse>> {
        let tables = self.tables.read().await;
        Ok(tables
            .blood_metals
            .iter()
            .rev()
            .filter(|b| b.patient_id == patient_id)
            .cloned()
            .collect())
    }

    async fn latest_blood_metals(&self, patient_id: PatientId) -> Result<Option<BloodMetalsDBResponse>> {
        let tables = self.tables.read().await;
        Ok(tables.blood_metals.iter().rev().find(|b| b.patient_id == patient_id).cloned())
    }

    async fn get_blood_metals(&self, id: BloodMetalsId) -> Result<Option<BloodMetalsDBResponse>> {
        let tables = self.tables.read().await;
        Ok(tables.blood_metals.iter().find(|b| b.id == id).cloned())
    }

    async fn delete_blood_metals(&self, id: BloodMetalsId) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let before = tables.blood_metals.len();
        tables.blood_metals.retain(|b| b.id != id);
        Ok(tables.blood_metals.len() < before)
    }

    async fn create_prediction(&self, request: &PredictionCreateDBRequest) -> Result<PredictionDBResponse> {
        let mut tables = self.tables.write().await;
        tables.require_patient(request.patient_id, "predictions")?;
        let prediction = PredictionDBResponse {
            id: Uuid::new_v4(),
            patient_id: request.patient_id,
            model: request.model.clone(),
            value: request.value,
            created_at: Utc::now(),
        };
        tables.predictions.push(prediction.clone());
        Ok(prediction)
    }

    async fn list_predictions(&self, patient_id: PatientId) -> Result<Vec<PredictionDBResponse>> {
        let tables = self.tables.read().await;
        Ok(tables
            .predictions
            .iter()
            .rev()
            .filter(|p| p.patient_id == patient_id)
            .cloned()
            .collect())
    }

    async fn append_access_logs(&self, entries: &[AccessLogCreateDBRequest]) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.access_logs.extend(entries.iter().map(|entry| AccessLogDBResponse {
            id: Uuid::new_v4(),
            account_id: entry.account_id,
            action: entry.action.clone(),
            resource: entry.resource.clone(),
            ip_address: entry.ip_address.clone(),
            user_agent: entry.user_agent.clone(),
            created_at: entry.created_at,
        }));
        Ok(())
    }

    async fn list_access_logs(&self, skip: i64, limit: i64) -> Result<Vec<AccessLogDBResponse>> {
        let tables = self.tables.read().await;
        // Entries carry their request time, so insertion order is only a tie-breaker
        let mut logs: Vec<_> = tables.access_logs.iter().rev().cloned().collect();
        logs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(logs
            .into_iter()
            .skip(skip.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }
}
