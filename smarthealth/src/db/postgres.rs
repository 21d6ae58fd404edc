//! PostgreSQL [`Storage`] backed by a `sqlx` pool.

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
use crate::types::{AccountId, BloodMetalsId, PatientId, abbrev_uuid};
use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, QueryBuilder};
use tracing::instrument;
use uuid::Uuid;

/// Accounts joined with their role names, sorted. Callers append `WHERE`, then `GROUP BY a.id`.
const ACCOUNT_SELECT: &str = r#"
    SELECT a.id, a.email, a.password_hash, a.name, a.google_id, a.is_active, a.created_at, a.updated_at,
           COALESCE(ARRAY_AGG(r.name ORDER BY r.name) FILTER (WHERE r.name IS NOT NULL), ARRAY[]::TEXT[]) AS roles
    FROM accounts a
    LEFT JOIN account_roles ar ON ar.account_id = a.id
    LEFT JOIN roles r ON r.id = ar.role_id
"#;

const PATIENT_COLUMNS: &str = r#"
    id, name, nic, dob, gender, height_cm, weight_kg, contact_number, email, address, marital_status,
    pregnancy_count, pregnancy_status, tried_year_pregnant, vaginal_deliveries, ever_used_female_hormones,
    had_hysterectomy, ovaries_removed, ever_used_birth_control_pills, ever_treated_for_pid,
    age_at_last_period, diagnosis, age_years, age_months, bmi, doctor_id, created_at, updated_at
"#;

const BLOOD_METALS_COLUMNS: &str =
    "id, patient_id, lead_umol_l, mercury_umol_l, cadmium_umol_l, selenium_umol_l, manganese_umol_l, created_at";

#[derive(Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the embedded schema migrations
    pub async fn migrate(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        crate::migrator().run(&self.pool).await
    }
}

async fn fetch_account(conn: &mut PgConnection, id: AccountId) -> Result<Option<AccountDBResponse>> {
    let account = sqlx::query_as::<_, AccountDBResponse>(&format!("{ACCOUNT_SELECT} WHERE a.id = $1 GROUP BY a.id"))
        .bind(id)
        .fetch_optional(conn)
        .await?;
    Ok(account)
}

async fn insert_role(conn: &mut PgConnection, name: &str) -> Result<()> {
    sqlx::query("INSERT INTO roles (name) VALUES ($1) ON CONFLICT (name) DO NOTHING")
        .bind(name)
        .execute(conn)
        .await?;
    Ok(())
}

/// Returns true if a new assignment row was written
async fn insert_account_role(conn: &mut PgConnection, account_id: AccountId, role: &str) -> Result<bool> {
    insert_role(&mut *conn, role).await?;
    let result = sqlx::query(
        r#"
        INSERT INTO account_roles (account_id, role_id)
        SELECT $1, id FROM roles WHERE name = $2
        ON CONFLICT (account_id, role_id) DO NOTHING
        "#,
    )
    .bind(account_id)
    .bind(role)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

#[async_trait]
impl Storage for PostgresStorage {
    #[instrument(skip(self, request), fields(roles = ?request.roles), err)]
    async fn create_account(&self, request: &AccountCreateDBRequest) -> Result<AccountDBResponse> {
        let id = Uuid::new_v4();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO accounts (id, email, password_hash, name, google_id, is_active)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(id)
        .bind(&request.email)
        .bind(&request.password_hash)
        .bind(&request.name)
        .bind(&request.google_id)
        .bind(request.is_active)
        .execute(&mut *tx)
        .await?;

        for role in &request.roles {
            insert_account_role(&mut tx, id, role).await?;
        }

        let account = fetch_account(&mut tx, id).await?.ok_or(DbError::NotFound)?;
        tx.commit().await?;
        Ok(account)
    }

    #[instrument(skip(self), fields(account_id = %abbrev_uuid(&id)), err)]
    async fn get_account(&self, id: AccountId) -> Result<Option<AccountDBResponse>> {
        let mut conn = self.pool.acquire().await?;
        fetch_account(&mut conn, id).await
    }

    #[instrument(skip(self, email), err)]
    async fn get_account_by_email(&self, email: &str) -> Result<Option<AccountDBResponse>> {
        let account = sqlx::query_as::<_, AccountDBResponse>(&format!("{ACCOUNT_SELECT} WHERE a.email = $1 GROUP BY a.id"))
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(account)
    }

    #[instrument(skip(self, google_id), err)]
    async fn get_account_by_google_id(&self, google_id: &str) -> Result<Option<AccountDBResponse>> {
        let account = sqlx::query_as::<_, AccountDBResponse>(&format!("{ACCOUNT_SELECT} WHERE a.google_id = $1 GROUP BY a.id"))
            .bind(google_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(account)
    }

    #[instrument(skip(self, google_id), fields(account_id = %abbrev_uuid(&id)), err)]
    async fn link_google_id(&self, id: AccountId, google_id: &str) -> Result<AccountDBResponse> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("UPDATE accounts SET google_id = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(google_id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        let account = fetch_account(&mut tx, id).await?.ok_or(DbError::NotFound)?;
        tx.commit().await?;
        Ok(account)
    }

    #[instrument(skip(self), fields(account_id = %abbrev_uuid(&id)), err)]
    async fn set_account_active(&self, id: AccountId, active: bool) -> Result<AccountDBResponse> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("UPDATE accounts SET is_active = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(active)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        let account = fetch_account(&mut tx, id).await?.ok_or(DbError::NotFound)?;
        tx.commit().await?;
        Ok(account)
    }

    #[instrument(skip(self), err)]
    async fn list_pending_accounts(&self) -> Result<Vec<AccountDBResponse>> {
        let accounts = sqlx::query_as::<_, AccountDBResponse>(&format!(
            "{ACCOUNT_SELECT} WHERE a.is_active = FALSE GROUP BY a.id ORDER BY a.created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(accounts)
    }

    #[instrument(skip(self), err)]
    async fn list_active_accounts_with_role(&self, role: &str) -> Result<Vec<AccountDBResponse>> {
        let accounts = sqlx::query_as::<_, AccountDBResponse>(&format!(
            r#"{ACCOUNT_SELECT}
            WHERE a.is_active = TRUE
              AND EXISTS (
                SELECT 1 FROM account_roles held JOIN roles hr ON hr.id = held.role_id
                WHERE held.account_id = a.id AND hr.name = $1
              )
            GROUP BY a.id
            ORDER BY a.created_at"#
        ))
        .bind(role)
        .fetch_all(&self.pool)
        .await?;
        Ok(accounts)
    }

    #[instrument(skip(self), err)]
    async fn ensure_role(&self, name: &str) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        insert_role(&mut conn, name).await
    }

    #[instrument(skip(self), fields(account_id = %abbrev_uuid(&account_id)), err)]
    async fn assign_role(&self, account_id: AccountId, role: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM accounts WHERE id = $1")
            .bind(account_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(DbError::NotFound);
        }
        let assigned = insert_account_role(&mut tx, account_id, role).await?;
        tx.commit().await?;
        Ok(assigned)
    }

    #[instrument(skip(self, request), err)]
    async fn create_patient(&self, request: &PatientCreateDBRequest) -> Result<PatientDBResponse> {
        let d = &request.details;
        let patient = sqlx::query_as::<_, PatientDBResponse>(&format!(
            r#"
            INSERT INTO patients (
                id, name, nic, dob, gender, height_cm, weight_kg, contact_number, email, address, marital_status,
                pregnancy_count, pregnancy_status, tried_year_pregnant, vaginal_deliveries, ever_used_female_hormones,
                had_hysterectomy, ovaries_removed, ever_used_birth_control_pills, ever_treated_for_pid,
                age_at_last_period, diagnosis, age_years, age_months, bmi, doctor_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20,
                    $21, $22, $23, $24, $25, $26)
            RETURNING {PATIENT_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&d.name)
        .bind(&d.nic)
        .bind(d.dob)
        .bind(&d.gender)
        .bind(d.height_cm)
        .bind(d.weight_kg)
        .bind(&d.contact_number)
        .bind(&d.email)
        .bind(&d.address)
        .bind(&d.marital_status)
        .bind(d.pregnancy_count)
        .bind(d.pregnancy_status)
        .bind(d.tried_year_pregnant)
        .bind(d.vaginal_deliveries)
        .bind(d.ever_used_female_hormones)
        .bind(d.had_hysterectomy)
        .bind(d.ovaries_removed)
        .bind(d.ever_used_birth_control_pills)
        .bind(d.ever_treated_for_pid)
        .bind(d.age_at_last_period)
        .bind(&d.diagnosis)
        .bind(request.derived.age_years)
        .bind(request.derived.age_months)
        .bind(request.derived.bmi)
        .bind(request.doctor_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(patient)
    }

    #[instrument(skip(self), fields(patient_id = %abbrev_uuid(&id)), err)]
    async fn get_patient(&self, id: PatientId) -> Result<Option<PatientDBResponse>> {
        let patient = sqlx::query_as::<_, PatientDBResponse>(&format!("SELECT {PATIENT_COLUMNS} FROM patients WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(patient)
    }

    #[instrument(skip(self, filter), fields(doctor_id = ?filter.doctor_id.as_ref().map(abbrev_uuid)), err)]
    async fn list_patients(&self, filter: &PatientFilter) -> Result<Vec<PatientDBResponse>> {
        let mut query = QueryBuilder::new(format!("SELECT {PATIENT_COLUMNS} FROM patients WHERE 1=1"));
        if let Some(doctor_id) = filter.doctor_id {
            query.push(" AND doctor_id = ").push_bind(doctor_id);
        }
        query.push(" ORDER BY created_at DESC");

        let patients = query.build_query_as::<PatientDBResponse>().fetch_all(&self.pool).await?;
        Ok(patients)
    }

    #[instrument(skip(self, request), fields(patient_id = %abbrev_uuid(&id)), err)]
    async fn update_patient(&self, id: PatientId, request: &PatientUpdateDBRequest) -> Result<PatientDBResponse> {
        let d = &request.details;
        let patient = sqlx::query_as::<_, PatientDBResponse>(&format!(
            r#"
            UPDATE patients SET
                name = $2, nic = $3, dob = $4, gender = $5, height_cm = $6, weight_kg = $7, contact_number = $8,
                email = $9, address = $10, marital_status = $11, pregnancy_count = $12, pregnancy_status = $13,
                tried_year_pregnant = $14, vaginal_deliveries = $15, ever_used_female_hormones = $16,
                had_hysterectomy = $17, ovaries_removed = $18, ever_used_birth_control_pills = $19,
                ever_treated_for_pid = $20, age_at_last_period = $21, diagnosis = $22,
                age_years = $23, age_months = $24, bmi = $25, updated_at = NOW()
            WHERE id = $1
            RETURNING {PATIENT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&d.name)
        .bind(&d.nic)
        .bind(d.dob)
        .bind(&d.gender)
        .bind(d.height_cm)
        .bind(d.weight_kg)
        .bind(&d.contact_number)
        .bind(&d.email)
        .bind(&d.address)
        .bind(&d.marital_status)
        .bind(d.pregnancy_count)
        .bind(d.pregnancy_status)
        .bind(d.tried_year_pregnant)
        .bind(d.vaginal_deliveries)
        .bind(d.ever_used_female_hormones)
        .bind(d.had_hysterectomy)
        .bind(d.ovaries_removed)
        .bind(d.ever_used_birth_control_pills)
        .bind(d.ever_treated_for_pid)
        .bind(d.age_at_last_period)
        .bind(&d.diagnosis)
        .bind(request.derived.age_years)
        .bind(request.derived.age_months)
        .bind(request.derived.bmi)
        .fetch_one(&self.pool)
        .await?;
        Ok(patient)
    }

    #[instrument(skip(self), fields(patient_id = %abbrev_uuid(&id), doctor_id = %abbrev_uuid(&doctor_id)), err)]
    async fn assign_doctor(&self, id: PatientId, doctor_id: AccountId) -> Result<PatientDBResponse> {
        let patient = sqlx::query_as::<_, PatientDBResponse>(&format!(
            "UPDATE patients SET doctor_id = $2, updated_at = NOW() WHERE id = $1 RETURNING {PATIENT_COLUMNS}"
        ))
        .bind(id)
        .bind(doctor_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(patient)
    }

    #[instrument(skip(self), fields(patient_id = %abbrev_uuid(&id)), err)]
    async fn delete_patient(&self, id: PatientId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        // Children first: neither table cascades on patient deletion
        sqlx::query("DELETE FROM blood_metals WHERE patient_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM predictions WHERE patient_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM patients WHERE id = $1").bind(id).execute(&mut *tx).await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, request), fields(patient_id = %abbrev_uuid(&request.patient_id)), err)]
    async fn create_blood_metals(&self, request: &BloodMetalsCreateDBRequest) -> Result<BloodMetalsDBResponse> {
        let v = &request.values;
        let report = sqlx::query_as::<_, BloodMetalsDBResponse>(&format!(
            r#"
            INSERT INTO blood_metals (id, patient_id, lead_umol_l, mercury_umol_l, cadmium_umol_l, selenium_umol_l, manganese_umol_l)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {BLOOD_METALS_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(request.patient_id)
        .bind(v.lead_umol_l)
        .bind(v.mercury_umol_l)
        .bind(v.cadmium_umol_l)
        .bind(v.selenium_umol_l)
        .bind(v.manganese_umol_l)
        .fetch_one(&self.pool)
        .await?;
        Ok(report)
    }

    #[instrument(skip(self), fields(patient_id = %abbrev_uuid(&patient_id)), err)]
    async fn list_blood_metals(&self, patient_id: PatientId) -> Result<Vec<BloodMetalsDBResponse>> {
        let reports = sqlx::query_as::<_, BloodMetalsDBResponse>(&format!(
            "SELECT {BLOOD_METALS_COLUMNS} FROM blood_metals WHERE patient_id = $1 ORDER BY created_at DESC"
        ))
        .bind(patient_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(reports)
    }

    #[instrument(skip(self), fields(patient_id = %abbrev_uuid(&patient_id)), err)]
    async fn latest_blood_metals(&self, patient_id: PatientId) -> Result<Option<BloodMetalsDBResponse>> {
        let report = sqlx::query_as::<_, BloodMetalsDBResponse>(&format!(
            "SELECT {BLOOD_METALS_COLUMNS} FROM blood_metals WHERE patient_id = $1 ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(patient_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(report)
    }

    #[instrument(skip(self), fields(report_id = %abbrev_uuid(&id)), err)]
    async fn get_blood_metals(&self, id: BloodMetalsId) -> Result<Option<BloodMetalsDBResponse>> {
        let report = sqlx::query_as::<_, BloodMetalsDBResponse>(&format!("SELECT {BLOOD_METALS_COLUMNS} FROM blood_metals WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(report)
    }

    #[instrument(skip(self), fields(report_id = %abbrev_uuid(&id)), err)]
    async fn delete_blood_metals(&self, id: BloodMetalsId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM blood_metals WHERE id = $1").bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, request), fields(patient_id = %abbrev_uuid(&request.patient_id), model = %request.model), err)]
    async fn create_prediction(&self, request: &PredictionCreateDBRequest) -> Result<PredictionDBResponse> {
        let prediction = sqlx::query_as::<_, PredictionDBResponse>(
            r#"
            INSERT INTO predictions (id, patient_id, model, value)
            VALUES ($1, $2, $3, $4)
            RETURNING id, patient_id, model, value, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request.patient_id)
        .bind(&request.model)
        .bind(request.value)
        .fetch_one(&self.pool)
        .await?;
        Ok(prediction)
    }

    #[instrument(skip(self), fields(patient_id = %abbrev_uuid(&patient_id)), err)]
    async fn list_predictions(&self, patient_id: PatientId) -> Result<Vec<PredictionDBResponse>> {
        let predictions = sqlx::query_as::<_, PredictionDBResponse>(
            "SELECT id, patient_id, model, value, created_at FROM predictions WHERE patient_id = $1 ORDER BY created_at DESC",
        )
        .bind(patient_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(predictions)
    }

    #[instrument(skip(self, entries), fields(count = entries.len()), err)]
    async fn append_access_logs(&self, entries: &[AccessLogCreateDBRequest]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut query = QueryBuilder::new("INSERT INTO access_logs (account_id, action, resource, ip_address, user_agent, created_at) ");
        query.push_values(entries, |mut row, entry| {
            row.push_bind(entry.account_id)
                .push_bind(&entry.action)
                .push_bind(&entry.resource)
                .push_bind(&entry.ip_address)
                .push_bind(&entry.user_agent)
                .push_bind(entry.created_at);
        });
        query.build().execute(&self.pool).await?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn list_access_logs(&self, skip: i64, limit: i64) -> Result<Vec<AccessLogDBResponse>> {
        let logs = sqlx::query_as::<_, AccessLogDBResponse>(
            r#"
            SELECT id, account_id, action, resource, ip_address, user_agent, created_at
            FROM access_logs
            ORDER BY created_at DESC
            OFFSET $1 LIMIT $2
            "#,
        )
        .bind(skip)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(logs)
    }
}
