//! Authentication and authorization.
//!
//! Every protected route runs the same chain:
//!
//! 1. [`session`]: the bearer token's signature, expiry and kind are checked without touching
//!    storage.
//! 2. [`current_user::authorize`]: the account is reloaded with its current roles and active
//!    flag, so approvals, suspensions and role changes take effect on the next request.
//! 3. [`roles`]: the account's roles must intersect the route's [`roles::RoleRequirement`], and
//!    one [`roles::EffectiveRole`] is chosen by fixed precedence.
//! 4. Ownership: handlers ask the resulting [`current_user::Authorized`] whether the caller may
//!    see or change a particular patient.
//!
//! # Modules
//!
//! - [`current_user`]: the `Authorized<R>` extractor and ownership helpers
//! - [`google`]: Google OAuth sign-in
//! - [`password`]: Argon2id hashing
//! - [`roles`]: route requirements and role precedence
//! - [`session`]: JWT access and refresh tokens

pub mod current_user;
pub mod google;
pub mod password;
pub mod roles;
pub mod session;
