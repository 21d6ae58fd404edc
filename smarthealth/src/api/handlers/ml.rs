use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, header},
};
use serde_json::Value;
use tracing::instrument;
use uuid::Uuid;

use super::patients::load_patient;
use crate::{
    AppState,
    audit::{AuditAction, AuditContext},
    auth::{current_user::Authorized, roles::DoctorOnly},
    errors::Error,
    prediction::record_predictions,
};

/// Payload mode that builds features from the stored patient record
const DATABASE_METHOD: &str = "db";

/// Run a prediction through the external model service
///
/// With method `db` the body only needs a `patientId`; the patient and their latest blood-metals
/// report are flattened into `{"features": {...}}`. Any other method forwards the body as-is.
/// The upstream response is returned unchanged.
#[utoipa::path(
    post,
    path = "/ml/{model}/{method}",
    tag = "ml",
    request_body(content_type = "application/json", description = "`{\"patientId\": ..}` for `db`, otherwise the upstream payload"),
    params(
        ("model" = String, Path, description = "Upstream model name"),
        ("method" = String, Path, description = "`db` to assemble features from storage"),
    ),
    responses(
        (status = 200, description = "Upstream prediction, returned unchanged"),
        (status = 400, description = "patientId required, or invalid model name"),
        (status = 403, description = "Not a doctor"),
        (status = 404, description = "Unknown patient"),
        (status = 500, description = "Prediction service error, with upstream details"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip(state, caller, audit, headers, body), err)]
pub async fn predict(
    State(state): State<AppState>,
    caller: Authorized<DoctorOnly>,
    audit: AuditContext,
    headers: HeaderMap,
    Path((model, method)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, Error> {
    state.audit.record(AuditAction::Predict, Some(caller.id()), &audit);
    let authorization = headers.get(header::AUTHORIZATION);

    if method != DATABASE_METHOD {
        return Ok(Json(state.predictions.predict(&model, &body, authorization).await?));
    }

    let patient_id = body
        .get("patientId")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| Error::Validation {
            message: "patientId required".to_string(),
        })?;
    let patient_id = Uuid::parse_str(patient_id).map_err(|_| Error::Validation {
        message: format!("Invalid patientId: {patient_id}"),
    })?;

    let storage = state.storage.as_ref();
    let patient = load_patient(storage, patient_id).await?;
    let result = state.predictions.predict_for_patient(storage, &model, &patient, authorization).await?;

    if state.config.ml.record_predictions {
        record_predictions(storage, patient.id, &model, &result).await;
    }
    Ok(Json(result))
}
