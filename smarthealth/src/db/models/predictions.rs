//! Storage models for model outputs.

use crate::types::{PatientId, PredictionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

#[derive(Debug, Clone)]
pub struct PredictionCreateDBRequest {
    pub patient_id: PatientId,
    pub model: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PredictionDBResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: PredictionId,
    #[schema(value_type = String, format = "uuid")]
    pub patient_id: PatientId,
    pub model: String,
    pub value: f64,
    pub created_at: DateTime<Utc>,
}
