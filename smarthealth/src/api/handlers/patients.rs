use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::Utc;
use tracing::{info, instrument};

use crate::{
    AppState,
    api::models::{
        MessageResponse,
        accounts::DoctorResponse,
        patients::{AssignDoctorRequest, PatientCreate, PatientWithLabs, validate_details},
    },
    audit::{AuditAction, AuditContext},
    auth::{
        current_user::Authorized,
        roles::{Clinician, NurseOnly},
    },
    db::{
        Storage,
        models::patients::{DerivedMetrics, PatientCreateDBRequest, PatientDBResponse, PatientDetails, PatientUpdateDBRequest},
    },
    errors::Error,
    types::{AccountId, PatientId, RoleName, abbrev_uuid},
};

/// Load a patient or fail with 404
pub(crate) async fn load_patient(storage: &dyn Storage, id: PatientId) -> Result<PatientDBResponse, Error> {
    storage.get_patient(id).await?.ok_or_else(|| Error::NotFound {
        resource: "Patient".to_string(),
        id: id.to_string(),
    })
}

/// Check that `doctor_id` names an active account holding the doctor role
async fn ensure_active_doctor(storage: &dyn Storage, doctor_id: AccountId) -> Result<(), Error> {
    match storage.get_account(doctor_id).await? {
        Some(account) if account.is_active_doctor() => Ok(()),
        _ => Err(Error::InvalidDoctor {
            id: doctor_id.to_string(),
        }),
    }
}

/// Create a patient
///
/// A doctor always becomes the owner of the patients they create. A nurse may name any active
/// doctor, or none.
#[utoipa::path(
    post,
    path = "/patients",
    tag = "patients",
    request_body = PatientCreate,
    responses(
        (status = 201, description = "Patient created", body = PatientDBResponse),
        (status = 400, description = "Invalid fields or doctorId is not an active doctor"),
        (status = 403, description = "Not a doctor or nurse"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all, fields(caller = %abbrev_uuid(&caller.id())), err)]
pub async fn create_patient(
    State(state): State<AppState>,
    caller: Authorized<Clinician>,
    audit: AuditContext,
    Json(request): Json<PatientCreate>,
) -> Result<(StatusCode, Json<PatientDBResponse>), Error> {
    state.audit.record(AuditAction::CreatePatient, Some(caller.id()), &audit);

    let today = Utc::now().date_naive();
    validate_details(&request.details, today)?;

    let doctor_id = caller.owner_for_new_patient(request.doctor_id);
    if !caller.role.is_ownership_scoped()
        && state.config.patients.validate_doctor_on_create
        && let Some(doctor_id) = doctor_id
    {
        ensure_active_doctor(state.storage.as_ref(), doctor_id).await?;
    }

    let derived = DerivedMetrics::compute(&request.details, today);
    let patient = state
        .storage
        .create_patient(&PatientCreateDBRequest {
            details: request.details,
            derived,
            doctor_id,
        })
        .await?;

    info!(patient_id = %abbrev_uuid(&patient.id), "Patient created");
    Ok((StatusCode::CREATED, Json(patient)))
}

/// List patients visible to the caller
///
/// Doctors see only their own patients; nurses see every patient.
#[utoipa::path(
    get,
    path = "/patients",
    tag = "patients",
    responses(
        (status = 200, description = "Patients, newest first", body = [PatientDBResponse]),
        (status = 403, description = "Not a doctor or nurse"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all, fields(caller = %abbrev_uuid(&caller.id())), err)]
pub async fn list_patients(
    State(state): State<AppState>,
    caller: Authorized<Clinician>,
    audit: AuditContext,
) -> Result<Json<Vec<PatientDBResponse>>, Error> {
    state.audit.record(AuditAction::ListPatients, Some(caller.id()), &audit);
    let patients = state.storage.list_patients(&caller.patient_filter()).await?;
    Ok(Json(patients))
}

/// Active doctors a nurse can assign patients to
#[utoipa::path(
    get,
    path = "/patients/available-doctors",
    tag = "patients",
    responses(
        (status = 200, description = "Active doctors", body = [DoctorResponse]),
        (status = 403, description = "Not a nurse"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all, err)]
pub async fn available_doctors(State(state): State<AppState>, _nurse: Authorized<NurseOnly>) -> Result<Json<Vec<DoctorResponse>>, Error> {
    let doctors = state.storage.list_active_accounts_with_role(RoleName::Doctor.as_str()).await?;
    Ok(Json(doctors.into_iter().map(DoctorResponse::from).collect()))
}

/// Hand a patient over to a doctor
#[utoipa::path(
    patch,
    path = "/patients/{id}/assign-doctor",
    tag = "patients",
    request_body = AssignDoctorRequest,
    params(("id" = String, Path, description = "Patient id")),
    responses(
        (status = 200, description = "Patient reassigned", body = PatientDBResponse),
        (status = 400, description = "doctorId missing or not an active doctor"),
        (status = 403, description = "Not a nurse"),
        (status = 404, description = "Unknown patient"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip(state, caller, audit, request), fields(patient_id = %abbrev_uuid(&id)), err)]
pub async fn assign_doctor(
    State(state): State<AppState>,
    caller: Authorized<NurseOnly>,
    audit: AuditContext,
    Path(id): Path<PatientId>,
    Json(request): Json<AssignDoctorRequest>,
) -> Result<Json<PatientDBResponse>, Error> {
    let storage = state.storage.as_ref();
    load_patient(storage, id).await?;
    state.audit.record(AuditAction::AssignDoctor, Some(caller.id()), &audit);

    let doctor_id = request.doctor_id.ok_or_else(|| Error::Validation {
        message: "doctorId required".to_string(),
    })?;
    ensure_active_doctor(storage, doctor_id).await?;

    let patient = storage.assign_doctor(id, doctor_id).await?;
    info!(doctor_id = %abbrev_uuid(&doctor_id), "Doctor assigned");
    Ok(Json(patient))
}

/// Read one patient together with their lab history
#[utoipa::path(
    get,
    path = "/patients/{id}",
    tag = "patients",
    params(("id" = String, Path, description = "Patient id")),
    responses(
        (status = 200, description = "Patient with blood-metals history", body = PatientWithLabs),
        (status = 403, description = "Another doctor's patient"),
        (status = 404, description = "Unknown patient"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip(state, caller, audit), fields(patient_id = %abbrev_uuid(&id)), err)]
pub async fn get_patient(
    State(state): State<AppState>,
    caller: Authorized<Clinician>,
    audit: AuditContext,
    Path(id): Path<PatientId>,
) -> Result<Json<PatientWithLabs>, Error> {
    let patient = load_patient(state.storage.as_ref(), id).await?;
    caller.ensure_can_access(&patient)?;
    state.audit.record(AuditAction::ReadPatient, Some(caller.id()), &audit);

    let blood_metals = state.storage.list_blood_metals(id).await?;
    Ok(Json(PatientWithLabs { patient, blood_metals }))
}

/// Replace a patient's entered details
///
/// Derived age and BMI are recomputed; the owning doctor is unchanged.
#[utoipa::path(
    put,
    path = "/patients/{id}",
    tag = "patients",
    request_body = PatientDetails,
    params(("id" = String, Path, description = "Patient id")),
    responses(
        (status = 200, description = "Updated patient", body = PatientDBResponse),
        (status = 400, description = "Invalid fields"),
        (status = 403, description = "Another doctor's patient"),
        (status = 404, description = "Unknown patient"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip(state, caller, audit, details), fields(patient_id = %abbrev_uuid(&id)), err)]
pub async fn update_patient(
    State(state): State<AppState>,
    caller: Authorized<Clinician>,
    audit: AuditContext,
    Path(id): Path<PatientId>,
    Json(details): Json<PatientDetails>,
) -> Result<Json<PatientDBResponse>, Error> {
    let patient = load_patient(state.storage.as_ref(), id).await?;
    caller.ensure_can_access(&patient)?;
    state.audit.record(AuditAction::UpdatePatient, Some(caller.id()), &audit);

    let today = Utc::now().date_naive();
    validate_details(&details, today)?;
    let derived = DerivedMetrics::compute(&details, today);

    let updated = state.storage.update_patient(id, &PatientUpdateDBRequest { details, derived }).await?;
    Ok(Json(updated))
}

/// Delete a patient and all of their lab reports and predictions
#[utoipa::path(
    delete,
    path = "/patients/{id}",
    tag = "patients",
    params(("id" = String, Path, description = "Patient id")),
    responses(
        (status = 200, description = "Patient deleted", body = MessageResponse),
        (status = 403, description = "Another doctor's patient"),
        (status = 404, description = "Unknown patient"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip(state, caller, audit), fields(patient_id = %abbrev_uuid(&id)), err)]
pub async fn delete_patient(
    State(state): State<AppState>,
    caller: Authorized<Clinician>,
    audit: AuditContext,
    Path(id): Path<PatientId>,
) -> Result<Json<MessageResponse>, Error> {
    let patient = load_patient(state.storage.as_ref(), id).await?;
    caller.ensure_can_access(&patient)?;
    state.audit.record(AuditAction::DeletePatient, Some(caller.id()), &audit);

    if !state.storage.delete_patient(id).await? {
        return Err(Error::NotFound {
            resource: "Patient".to_string(),
            id: id.to_string(),
        });
    }
    info!("Patient deleted");
    Ok(Json(MessageResponse::new("Patient deleted successfully")))
}
