//! Storage records and the requests used to create or change them.

pub mod access_logs;
pub mod accounts;
pub mod blood_metals;
pub mod patients;
pub mod predictions;
