//! Proxy to the external ML prediction service.
//!
//! Two payload modes, selected by the `method` path segment of `POST /ml/{model}/{method}`:
//!
//! - `db`: the body names a `patientId`; the patient and their latest blood-metals report are
//!   flattened into one `{"features": {...}}` object.
//! - anything else: the body is forwarded unchanged.
//!
//! Either way the caller's `Authorization` header is passed through to the upstream, and any
//! upstream failure becomes [`Error::PredictionService`] carrying the upstream's error body.

use axum::http::HeaderValue;
use reqwest::header::AUTHORIZATION;
use serde_json::{Map, Value, json};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::{
    config::MlConfig,
    db::{
        Storage,
        models::{
            blood_metals::{AnalyteValues, BloodMetalsDBResponse},
            patients::PatientDBResponse,
            predictions::PredictionCreateDBRequest,
        },
    },
    errors::Error,
    types::{PatientId, abbrev_uuid},
};

/// Storage bookkeeping the model must never see
const STRIPPED_KEYS: [&str; 5] = ["id", "createdAt", "updatedAt", "doctorId", "patientId"];

/// Model names become a URL path segment, so keep them to a safe alphabet
pub fn is_valid_model_name(model: &str) -> bool {
    !model.is_empty() && model.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn flatten_into(features: &mut Map<String, Value>, record: Value) {
    let Value::Object(fields) = record else {
        return;
    };
    for (key, value) in fields {
        if STRIPPED_KEYS.contains(&key.as_str()) || value.is_array() || value.is_object() {
            continue;
        }
        features.insert(key, value);
    }
}

/// Merge a patient and their latest lab report into one flat feature object.
///
/// Lab fields are merged second and win on collision. Without a report the analyte keys are
/// present as null.
pub fn assemble_features(patient: &PatientDBResponse, labs: Option<&BloodMetalsDBResponse>) -> Map<String, Value> {
    let mut features = Map::new();
    flatten_into(&mut features, serde_json::to_value(patient).unwrap_or(Value::Null));

    match labs {
        Some(report) => flatten_into(&mut features, serde_json::to_value(report).unwrap_or(Value::Null)),
        None => {
            for key in AnalyteValues::KEYS {
                features.insert(key.to_string(), Value::Null);
            }
        }
    }
    features
}

/// Numeric predictions in an upstream response: `{"prediction": x}` is stored under the model
/// name, `{"predictions": {"k": x}}` under `<model>_<k>`.
pub fn extract_predictions(model: &str, body: &Value) -> Vec<(String, f64)> {
    let mut found = Vec::new();
    if let Some(value) = body.get("prediction").and_then(Value::as_f64) {
        found.push((model.to_string(), value));
    }
    if let Some(Value::Object(named)) = body.get("predictions") {
        for (key, value) in named {
            if let Some(value) = value.as_f64() {
                found.push((format!("{model}_{key}"), value));
            }
        }
    }
    found
}

#[derive(Clone)]
pub struct PredictionClient {
    http: reqwest::Client,
    base_url: Url,
}

impl PredictionClient {
    pub fn new(config: &MlConfig) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Internal {
                operation: format!("build prediction HTTP client: {e}"),
            })?;
        Ok(Self {
            http,
            base_url: config.base_url.clone(),
        })
    }

    fn endpoint(&self, model: &str) -> Result<Url, Error> {
        if !is_valid_model_name(model) {
            return Err(Error::Validation {
                message: format!("Invalid model name: {model}"),
            });
        }
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Internal {
                operation: format!("build prediction URL from {}", self.base_url),
            })?
            .pop_if_empty()
            .push("predict")
            .push(model);
        Ok(url)
    }

    /// POST `payload` to `{base_url}/predict/{model}` and return the upstream JSON
    #[instrument(skip(self, payload, authorization), err)]
    pub async fn predict(&self, model: &str, payload: &Value, authorization: Option<&HeaderValue>) -> Result<Value, Error> {
        let url = self.endpoint(model)?;

        let mut request = self.http.post(url).json(payload);
        if let Some(value) = authorization {
            request = request.header(AUTHORIZATION, value.clone());
        }

        let response = request.send().await.map_err(|e| Error::PredictionService {
            details: Value::String(e.to_string()),
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| Error::PredictionService {
            details: Value::String(e.to_string()),
        })?;
        let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

        if !status.is_success() {
            return Err(Error::PredictionService { details: body });
        }
        debug!(%status, "prediction service responded");
        Ok(body)
    }

    /// Assemble features for a stored patient and forward them
    #[instrument(skip(self, storage, patient, authorization), fields(patient_id = %abbrev_uuid(&patient.id)), err)]
    pub async fn predict_for_patient(
        &self,
        storage: &dyn Storage,
        model: &str,
        patient: &PatientDBResponse,
        authorization: Option<&HeaderValue>,
    ) -> Result<Value, Error> {
        let labs = storage.latest_blood_metals(patient.id).await?;
        let features = assemble_features(patient, labs.as_ref());
        self.predict(model, &json!({ "features": features }), authorization).await
    }
}

/// Store the numeric predictions in `body`. Failures are logged, never returned.
pub async fn record_predictions(storage: &dyn Storage, patient_id: PatientId, model: &str, body: &Value) {
    for (model, value) in extract_predictions(model, body) {
        let request = PredictionCreateDBRequest {
            patient_id,
            model,
            value,
        };
        if let Err(e) = storage.create_prediction(&request).await {
            warn!(error = %e, model = %request.model, "Failed to record prediction");
        }
    }
}
