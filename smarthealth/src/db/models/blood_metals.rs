//! Storage models for blood-metals lab reports.

use crate::types::{BloodMetalsId, PatientId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// The five analyte concentrations of one report, in µmol/L
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct AnalyteValues {
    #[serde(rename = "lead_umolL")]
    pub lead_umol_l: Option<f64>,
    #[serde(rename = "mercury_umolL")]
    pub mercury_umol_l: Option<f64>,
    #[serde(rename = "cadmium_umolL")]
    pub cadmium_umol_l: Option<f64>,
    #[serde(rename = "selenium_umolL")]
    pub selenium_umol_l: Option<f64>,
    #[serde(rename = "manganese_umolL")]
    pub manganese_umol_l: Option<f64>,
}

impl AnalyteValues {
    /// Wire names of the analyte fields, in report order
    pub const KEYS: [&'static str; 5] = ["lead_umolL", "mercury_umolL", "cadmium_umolL", "selenium_umolL", "manganese_umolL"];
}

#[derive(Debug, Clone)]
pub struct BloodMetalsCreateDBRequest {
    pub patient_id: PatientId,
    pub values: AnalyteValues,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BloodMetalsDBResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: BloodMetalsId,
    #[schema(value_type = String, format = "uuid")]
    pub patient_id: PatientId,
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub values: AnalyteValues,
    pub created_at: DateTime<Utc>,
}
