//! Storage models for patients.

use crate::types::{AccountId, PatientId};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Demographic and clinical-intake fields entered by staff
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct PatientDetails {
    pub name: String,
    /// National identity card number
    pub nic: Option<String>,
    pub dob: Option<NaiveDate>,
    pub gender: Option<String>,
    pub height_cm: Option<f64>,
    pub weight_kg: Option<f64>,
    pub contact_number: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub marital_status: Option<String>,
    pub pregnancy_count: Option<i32>,
    pub pregnancy_status: Option<bool>,
    pub tried_year_pregnant: Option<bool>,
    pub vaginal_deliveries: Option<i32>,
    pub ever_used_female_hormones: Option<bool>,
    pub had_hysterectomy: Option<bool>,
    pub ovaries_removed: Option<bool>,
    pub ever_used_birth_control_pills: Option<bool>,
    pub ever_treated_for_pid: Option<bool>,
    pub age_at_last_period: Option<i32>,
    pub diagnosis: Option<String>,
}

/// Values computed from [`PatientDetails`] at write time and stored as-is.
///
/// Age is the age on the day of the last write; it is not refreshed on read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DerivedMetrics {
    pub age_years: Option<i32>,
    /// Months past the last full year
    pub age_months: Option<i32>,
    pub bmi: Option<f64>,
}

impl DerivedMetrics {
    pub fn compute(details: &PatientDetails, today: NaiveDate) -> Self {
        let (age_years, age_months) = match details.dob.and_then(|dob| months_between(dob, today)) {
            Some(total) => (Some(total / 12), Some(total % 12)),
            None => (None, None),
        };

        let bmi = match (details.height_cm, details.weight_kg) {
            (Some(height), Some(weight)) if height > 0.0 => {
                let metres = height / 100.0;
                Some((weight / (metres * metres) * 100.0).round() / 100.0)
            }
            _ => None,
        };

        Self {
            age_years,
            age_months,
            bmi,
        }
    }
}

/// Whole months elapsed from `from` to `to`, or None if `from` is later
fn months_between(from: NaiveDate, to: NaiveDate) -> Option<i32> {
    let mut months = (to.year() - from.year()) * 12 + to.month() as i32 - from.month() as i32;
    if to.day() < from.day() {
        months -= 1;
    }
    (months >= 0).then_some(months)
}

#[derive(Debug, Clone)]
pub struct PatientCreateDBRequest {
    pub details: PatientDetails,
    pub derived: DerivedMetrics,
    pub doctor_id: Option<AccountId>,
}

/// Full replacement of the entered fields; the owning doctor is changed separately
#[derive(Debug, Clone)]
pub struct PatientUpdateDBRequest {
    pub details: PatientDetails,
    pub derived: DerivedMetrics,
}

#[derive(Debug, Clone, Default)]
pub struct PatientFilter {
    /// Restrict to patients owned by this doctor
    pub doctor_id: Option<AccountId>,
}

impl PatientFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn owned_by(doctor_id: AccountId) -> Self {
        Self { doctor_id: Some(doctor_id) }
    }

    pub fn matches(&self, patient: &PatientDBResponse) -> bool {
        self.doctor_id.is_none_or(|id| patient.doctor_id == Some(id))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PatientDBResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: PatientId,
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub details: PatientDetails,
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub derived: DerivedMetrics,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub doctor_id: Option<AccountId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
