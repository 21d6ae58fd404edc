use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
};
use futures::future::join_all;
use tracing::{Instrument, debug, info, info_span, instrument, warn};

use super::patients::load_patient;
use crate::{
    AppState,
    api::models::MessageResponse,
    audit::{AuditAction, AuditContext},
    auth::{current_user::Authorized, roles::Clinician},
    db::{
        Storage,
        models::{
            blood_metals::{AnalyteValues, BloodMetalsCreateDBRequest, BloodMetalsDBResponse},
            patients::PatientDBResponse,
        },
    },
    errors::Error,
    prediction::{PredictionClient, record_predictions},
    types::{BloodMetalsId, PatientId, abbrev_uuid},
};

/// Record a blood-metals report for a patient
///
/// When automatic prediction is configured, each configured model is run against the patient in
/// the background once the report is stored.
#[utoipa::path(
    post,
    path = "/bloodmetals/{patientId}",
    tag = "bloodmetals",
    request_body = AnalyteValues,
    params(("patientId" = String, Path, description = "Patient id")),
    responses(
        (status = 201, description = "Report stored", body = BloodMetalsDBResponse),
        (status = 403, description = "Not a clinician, or another doctor's patient"),
        (status = 404, description = "Unknown patient"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip(state, caller, audit, headers, values), fields(patient_id = %abbrev_uuid(&patient_id)), err)]
pub async fn create_blood_metals(
    State(state): State<AppState>,
    caller: Authorized<Clinician>,
    audit: AuditContext,
    headers: HeaderMap,
    Path(patient_id): Path<PatientId>,
    Json(values): Json<AnalyteValues>,
) -> Result<(StatusCode, Json<BloodMetalsDBResponse>), Error> {
    let patient = load_patient(state.storage.as_ref(), patient_id).await?;
    caller.ensure_can_access(&patient)?;
    state.audit.record(AuditAction::CreateBloodMetals, Some(caller.id()), &audit);

    let report = state
        .storage
        .create_blood_metals(&BloodMetalsCreateDBRequest { patient_id, values })
        .await?;
    info!(report_id = %abbrev_uuid(&report.id), "Blood metals report stored");

    let models = &state.config.ml.auto_predict_models;
    if !models.is_empty() {
        tokio::spawn(
            auto_predict(
                state.storage.clone(),
                state.predictions.clone(),
                patient,
                models.clone(),
                headers.get(header::AUTHORIZATION).cloned(),
                state.config.ml.record_predictions,
            )
            .instrument(info_span!("auto_predict", patient_id = %abbrev_uuid(&patient_id))),
        );
    }

    Ok((StatusCode::CREATED, Json(report)))
}

/// Run every configured model against a patient. Failures are logged and otherwise ignored.
async fn auto_predict(
    storage: Arc<dyn Storage>,
    client: PredictionClient,
    patient: PatientDBResponse,
    models: Vec<String>,
    authorization: Option<HeaderValue>,
    record: bool,
) {
    let runs = models.iter().map(|model| {
        let storage = storage.as_ref();
        let client = &client;
        let patient = &patient;
        let authorization = authorization.as_ref();
        async move {
            match client.predict_for_patient(storage, model, patient, authorization).await {
                Ok(body) => {
                    debug!(model = %model, "Automatic prediction succeeded");
                    if record {
                        record_predictions(storage, patient.id, model, &body).await;
                    }
                }
                Err(e) => warn!(model = %model, error = %e, "Automatic prediction failed"),
            }
        }
    });
    join_all(runs).await;
}

/// A patient's blood-metals history
#[utoipa::path(
    get,
    path = "/bloodmetals/{patientId}",
    tag = "bloodmetals",
    params(("patientId" = String, Path, description = "Patient id")),
    responses(
        (status = 200, description = "Reports, newest first", body = [BloodMetalsDBResponse]),
        (status = 403, description = "Not a clinician, or another doctor's patient"),
        (status = 404, description = "Unknown patient"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip(state, caller, audit), fields(patient_id = %abbrev_uuid(&patient_id)), err)]
pub async fn list_blood_metals(
    State(state): State<AppState>,
    caller: Authorized<Clinician>,
    audit: AuditContext,
    Path(patient_id): Path<PatientId>,
) -> Result<Json<Vec<BloodMetalsDBResponse>>, Error> {
    let patient = load_patient(state.storage.as_ref(), patient_id).await?;
    caller.ensure_can_access(&patient)?;
    state.audit.record(AuditAction::ListBloodMetals, Some(caller.id()), &audit);

    Ok(Json(state.storage.list_blood_metals(patient_id).await?))
}

/// Delete one blood-metals report
#[utoipa::path(
    delete,
    path = "/bloodmetals/record/{id}",
    tag = "bloodmetals",
    params(("id" = String, Path, description = "Report id")),
    responses(
        (status = 200, description = "Report deleted", body = MessageResponse),
        (status = 403, description = "Not a clinician, or another doctor's patient"),
        (status = 404, description = "Unknown report"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip(state, caller, audit), fields(report_id = %abbrev_uuid(&id)), err)]
pub async fn delete_blood_metals(
    State(state): State<AppState>,
    caller: Authorized<Clinician>,
    audit: AuditContext,
    Path(id): Path<BloodMetalsId>,
) -> Result<Json<MessageResponse>, Error> {
    let not_found = || Error::NotFound {
        resource: "Record".to_string(),
        id: id.to_string(),
    };
    let report = state.storage.get_blood_metals(id).await?.ok_or_else(not_found)?;
    let patient = load_patient(state.storage.as_ref(), report.patient_id).await?;
    caller.ensure_can_access(&patient)?;
    state.audit.record(AuditAction::DeleteBloodMetals, Some(caller.id()), &audit);

    if !state.storage.delete_blood_metals(id).await? {
        return Err(not_found());
    }
    Ok(Json(MessageResponse::new("Blood metals record deleted successfully")))
}
