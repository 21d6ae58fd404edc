//! API request/response models for patients.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    db::models::{
        blood_metals::BloodMetalsDBResponse,
        patients::{PatientDBResponse, PatientDetails},
    },
    errors::Error,
    types::AccountId,
};

/// Body of `POST /patients`. Derived fields and ids sent by the client are ignored.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PatientCreate {
    #[serde(flatten)]
    pub details: PatientDetails,
    /// Honored for nurses only; a doctor always owns the patients they create
    #[schema(value_type = Option<String>, format = "uuid")]
    pub doctor_id: Option<AccountId>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssignDoctorRequest {
    #[schema(value_type = Option<String>, format = "uuid")]
    pub doctor_id: Option<AccountId>,
}

/// A patient with their lab history, newest first
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PatientWithLabs {
    #[serde(flatten)]
    pub patient: PatientDBResponse,
    pub blood_metals: Vec<BloodMetalsDBResponse>,
}

/// Reject details that cannot be stored as entered
pub fn validate_details(details: &PatientDetails, today: NaiveDate) -> Result<(), Error> {
    if details.name.trim().is_empty() {
        return Err(Error::Validation {
            message: "name is required".to_string(),
        });
    }
    if details.height_cm.is_some_and(|h| h <= 0.0) {
        return Err(Error::Validation {
            message: "heightCm must be positive".to_string(),
        });
    }
    if details.weight_kg.is_some_and(|w| w <= 0.0) {
        return Err(Error::Validation {
            message: "weightKg must be positive".to_string(),
        });
    }
    if details.dob.is_some_and(|dob| dob > today) {
        return Err(Error::Validation {
            message: "dob cannot be in the future".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
    }

    #[test]
    fn test_create_body_ignores_client_derived_fields() {
        let body: PatientCreate = serde_json::from_value(json!({
            "name": "Jane",
            "ageYears": 99,
            "bmi": 1.0,
            "doctorId": "550e8400-e29b-41d4-a716-446655440000"
        }))
        .unwrap();
        assert_eq!(body.details.name, "Jane");
        assert!(body.doctor_id.is_some());
    }

    #[test]
    fn test_validation() {
        let mut details = PatientDetails {
            name: "Jane".to_string(),
            ..Default::default()
        };
        assert!(validate_details(&details, today()).is_ok());

        details.height_cm = Some(0.0);
        assert!(validate_details(&details, today()).is_err());
        details.height_cm = Some(170.0);

        details.dob = NaiveDate::from_ymd_opt(2026, 1, 1);
        assert!(validate_details(&details, today()).is_err());
        details.dob = NaiveDate::from_ymd_opt(2000, 1, 1);
        assert!(validate_details(&details, today()).is_ok());

        details.name = "  ".to_string();
        assert!(matches!(validate_details(&details, today()), Err(Error::Validation { .. })));
    }
}
