use axum::{
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use tracing::{info, instrument};

use super::patients::load_patient;
use crate::{
    AppState,
    audit::{AuditAction, AuditContext},
    auth::{current_user::Authorized, roles::DoctorOnly},
    errors::Error,
    report::{self, ReportSnapshot, latest_per_model},
    types::{PatientId, abbrev_uuid},
};

/// Download a patient's diagnostic report as PDF
///
/// Any doctor may render any patient's report unless `reports.enforce_ownership` is set.
#[utoipa::path(
    get,
    path = "/reports/{patientId}",
    tag = "reports",
    params(("patientId" = String, Path, description = "Patient id")),
    responses(
        (status = 200, description = "PDF report (`application/pdf`, sent as an attachment)"),
        (status = 403, description = "Not a doctor, or another doctor's patient when ownership is enforced"),
        (status = 404, description = "Unknown patient"),
        (status = 500, description = "Failed to generate report"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip(state, caller, audit), fields(patient_id = %abbrev_uuid(&patient_id)), err)]
pub async fn generate_report(
    State(state): State<AppState>,
    caller: Authorized<DoctorOnly>,
    audit: AuditContext,
    Path(patient_id): Path<PatientId>,
) -> Result<Response, Error> {
    let storage = state.storage.as_ref();
    let patient = load_patient(storage, patient_id).await?;
    if state.config.reports.enforce_ownership {
        caller.ensure_can_access(&patient)?;
    }
    state.audit.record(AuditAction::GenerateReport, Some(caller.id()), &audit);

    let labs = storage.latest_blood_metals(patient_id).await?;
    let history = storage.list_predictions(patient_id).await?;
    let filename = report::filename(&patient);

    let snapshot = ReportSnapshot {
        patient,
        labs,
        predictions: latest_per_model(&history),
        clinician: caller.display_name().to_string(),
        generated_at: Utc::now(),
    };
    let pdf = tokio::task::spawn_blocking(move || report::render_pdf(&snapshot))
        .await
        .map_err(|e| Error::Internal {
            operation: format!("join report rendering task: {e}"),
        })??;

    info!(bytes = pdf.len(), "Report generated");
    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{filename}\"")),
        ],
        pdf,
    )
        .into_response())
}
