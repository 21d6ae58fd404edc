//! Best-effort access logging.
//!
//! Handlers take an [`AuditContext`] extractor and, once authorization and ownership checks have
//! passed, call [`AuditRecorder::record`]. The entry is handed to a channel and persisted by
//! [`AuditWriter`] in the background; nothing about it can fail or delay the request.

mod recorder;

pub use recorder::{AuditRecorder, AuditWriter};

use std::{convert::Infallible, net::SocketAddr};

use axum::{
    extract::{ConnectInfo, FromRequestParts, RawPathParams},
    http::{HeaderMap, header, request::Parts},
};

/// Action labels written to the access log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    CreatePatient,
    ListPatients,
    ReadPatient,
    UpdatePatient,
    DeletePatient,
    AssignDoctor,
    CreateBloodMetals,
    ListBloodMetals,
    DeleteBloodMetals,
    Predict,
    GenerateReport,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::CreatePatient => "CREATE_PATIENT",
            AuditAction::ListPatients => "LIST_PATIENTS",
            AuditAction::ReadPatient => "READ_PATIENT",
            AuditAction::UpdatePatient => "UPDATE_PATIENT",
            AuditAction::DeletePatient => "DELETE_PATIENT",
            AuditAction::AssignDoctor => "ASSIGN_DOCTOR",
            AuditAction::CreateBloodMetals => "CREATE_BLOODMETALS",
            AuditAction::ListBloodMetals => "LIST_BLOODMETALS",
            AuditAction::DeleteBloodMetals => "DELETE_BLOODMETALS",
            AuditAction::Predict => "PREDICT",
            AuditAction::GenerateReport => "GENERATE_REPORT",
        }
    }
}

/// Who-called-what details captured from the request
#[derive(Debug, Clone, Default)]
pub struct AuditContext {
    /// Resource path parameter, else the request path and query
    pub resource: String,
    pub ip_address: String,
    pub user_agent: String,
}

/// Path parameters that name the resource being touched, in preference order
const RESOURCE_PARAMS: [&str; 2] = ["patientId", "id"];

/// First hop of `X-Forwarded-For`, else the socket peer
pub(crate) fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_default()
}

impl<S: Send + Sync> FromRequestParts<S> for AuditContext {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts.extensions.get::<ConnectInfo<SocketAddr>>().map(|ConnectInfo(addr)| *addr);

        let from_path = match RawPathParams::from_request_parts(parts, state).await {
            Ok(params) => RESOURCE_PARAMS
                .iter()
                .find_map(|wanted| params.iter().find(|(name, _)| name == wanted).map(|(_, value)| value.to_string())),
            Err(_) => None,
        };
        let resource = from_path.unwrap_or_else(|| {
            parts
                .uri
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| parts.uri.path().to_string())
        });

        Ok(Self {
            resource,
            ip_address: client_ip(&parts.headers, peer),
            user_agent: parts
                .headers
                .get(header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string(),
        })
    }
}
