//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers for all API endpoints
//! - **[`models`]**: Request/response data structures for API communication
//!
//! # API Structure
//!
//! - **Authentication** (`/auth/*`): registration, login, token refresh, Google sign-in
//! - **Administration** (`/admin/*`): approvals, role assignment, access log
//! - **Patients** (`/patients/*`): ownership-scoped patient records
//! - **Blood metals** (`/bloodmetals/*`): lab reports per patient
//! - **Predictions** (`/ml/*`): proxy to the external model service
//! - **Reports** (`/reports/*`): PDF diagnostic reports
//!
//! All endpoints are documented with `utoipa`; the rendered documentation is served at `/docs`.

pub mod handlers;
pub mod models;
