//! HTTP request handlers for all API endpoints.
//!
//! Each handler names the roles it accepts through its [`crate::auth::current_user::Authorized`]
//! argument, so authentication and role failures are rejected by the extractor before the body
//! runs. Handlers then apply ownership checks, queue their access-log entry, and call into
//! [`crate::db::Storage`].
//!
//! # Handler Modules
//!
//! - [`admin`]: account approval, role assignment, access log
//! - [`auth`]: registration, login, token refresh, Google sign-in
//! - [`blood_metals`]: lab reports per patient
//! - [`ml`]: prediction proxy
//! - [`patients`]: patient records
//! - [`reports`]: PDF reports
//!
//! # Error Handling
//!
//! Handlers return [`crate::errors::Error`], which converts to the matching status code and a
//! `{"error": ..}` JSON body.

pub mod admin;
pub mod auth;
pub mod blood_metals;
pub mod ml;
pub mod patients;
pub mod reports;
