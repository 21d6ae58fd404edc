//! OpenAPI documentation for the HTTP API.
//!
//! The document is served as JSON at `/api-docs/openapi.json` and rendered with Scalar at
//! `/docs`.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};

use crate::{api, auth::session::TokenPair, db::models, types::RoleName};

/// Bearer access tokens issued by `/auth/login`
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.security_schemes.insert(
                "BearerAuth".to_string(),
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .description(Some(
                            "Access token from `/auth/login` or `/auth/refresh`:\n\n\
                            ```\nAuthorization: Bearer <accessToken>\n```\n\n\
                            Access tokens expire after 15 minutes by default.",
                        ))
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Smart Health Diagnostics API",
        description = "Patient records, blood-metal labs, ML predictions and PDF health reports."
    ),
    modifiers(&SecurityAddon),
    paths(
        api::handlers::auth::register,
        api::handlers::auth::login,
        api::handlers::auth::refresh,
        api::handlers::auth::google_login,
        api::handlers::auth::google_callback,
        api::handlers::admin::list_pending,
        api::handlers::admin::approve,
        api::handlers::admin::assign_role,
        api::handlers::admin::list_logs,
        api::handlers::patients::create_patient,
        api::handlers::patients::list_patients,
        api::handlers::patients::available_doctors,
        api::handlers::patients::assign_doctor,
        api::handlers::patients::get_patient,
        api::handlers::patients::update_patient,
        api::handlers::patients::delete_patient,
        api::handlers::blood_metals::create_blood_metals,
        api::handlers::blood_metals::list_blood_metals,
        api::handlers::blood_metals::delete_blood_metals,
        api::handlers::ml::predict,
        api::handlers::reports::generate_report,
    ),
    components(
        schemas(
            TokenPair,
            RoleName,
            api::models::MessageResponse,
            api::models::auth::RegisterRequest,
            api::models::auth::RegisterResponse,
            api::models::auth::LoginRequest,
            api::models::auth::RefreshRequest,
            api::models::accounts::AccountSummary,
            api::models::accounts::AccountResponse,
            api::models::accounts::DoctorResponse,
            api::models::admin::AssignRoleRequest,
            api::models::admin::ApproveResponse,
            api::models::admin::AccessLogPage,
            api::models::patients::PatientCreate,
            api::models::patients::AssignDoctorRequest,
            api::models::patients::PatientWithLabs,
            models::patients::PatientDetails,
            models::patients::DerivedMetrics,
            models::patients::PatientDBResponse,
            models::blood_metals::AnalyteValues,
            models::blood_metals::BloodMetalsDBResponse,
            models::predictions::PredictionDBResponse,
            models::access_logs::AccessLogDBResponse,
        )
    ),
    tags(
        (name = "auth", description = "Registration, sign-in and token refresh. New accounts wait for administrator approval."),
        (name = "admin", description = "Account approval, role assignment and the access log."),
        (name = "patients", description = "Patient records. Doctors see only their own patients; nurses see all."),
        (name = "bloodmetals", description = "Blood-metal lab reports (µmol/L)."),
        (name = "ml", description = "Predictions from the external model service."),
        (name = "reports", description = "Downloadable PDF health reports."),
    )
)]
pub struct ApiDoc;
