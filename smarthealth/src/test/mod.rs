pub mod utils;

use std::time::Duration;

use axum::http::StatusCode;
use serde_json::{Value, json};
use utils::{
    ADMIN_EMAIL, ADMIN_PASSWORD, TEST_PASSWORD, create_test_account, create_test_app, create_test_config, create_test_patient,
    create_test_user,
};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_json, body_partial_json, body_string_contains, header, method, path},
};

use crate::{
    config::RateLimitConfig,
    db::{
        Storage,
        models::{
            blood_metals::{AnalyteValues, BloodMetalsCreateDBRequest},
            predictions::PredictionCreateDBRequest,
        },
    },
    seed_database,
};

#[test_log::test(tokio::test)]
async fn test_root_and_health() {
    let app = create_test_app(create_test_config()).await;

    let root = app.server.get("/").await;
    root.assert_status_ok();
    assert_eq!(root.text(), "App API is running.");

    app.server.get("/healthz").await.assert_status_ok();
}

#[test_log::test(tokio::test)]
async fn test_openapi_document_served() {
    let app = create_test_app(create_test_config()).await;

    let response = app.server.get("/api-docs/openapi.json").await;
    response.assert_status_ok();
    let doc: Value = response.json();
    assert!(doc["paths"]["/patients"].is_object());
    assert!(doc["components"]["securitySchemes"]["BearerAuth"].is_object());
}

/// Register, get refused until approved, then sign in
#[test_log::test(tokio::test)]
async fn test_registration_requires_admin_approval() {
    let app = create_test_app(create_test_config()).await;

    let response = app
        .server
        .post("/auth/register")
        .json(&json!({ "email": "Alice@Example.com", "password": "pw123456", "name": "Alice" }))
        .await;
    response.assert_status(StatusCode::CREATED);
    let body: Value = response.json();
    assert_eq!(body["message"], "Registered. Wait for admin approval.");
    assert_eq!(body["user"]["email"], "alice@example.com");
    let alice_id = body["user"]["id"].as_str().unwrap().to_string();

    // Duplicate email
    let duplicate = app
        .server
        .post("/auth/register")
        .json(&json!({ "email": "alice@example.com", "password": "other" }))
        .await;
    duplicate.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(duplicate.json::<Value>()["error"], "User already exists");

    let login = json!({ "email": "alice@example.com", "password": "pw123456" });
    let pending = app.server.post("/auth/login").json(&login).await;
    pending.assert_status(StatusCode::FORBIDDEN);
    assert_eq!(pending.json::<Value>()["error"], "Account not yet approved");

    // Admin signs in with the seeded credentials and approves
    let admin_login = app
        .server
        .post("/auth/login")
        .json(&json!({ "email": ADMIN_EMAIL, "password": ADMIN_PASSWORD }))
        .await;
    admin_login.assert_status_ok();
    let admin_token = admin_login.json::<Value>()["accessToken"].as_str().unwrap().to_string();

    let listed = app.server.get("/admin/pending").authorization_bearer(&admin_token).await;
    listed.assert_status_ok();
    let listed: Value = listed.json();
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["roles"], json!(["unauthorized"]));

    let approved = app
        .server
        .post(&format!("/admin/approve/{alice_id}"))
        .authorization_bearer(&admin_token)
        .await;
    approved.assert_status_ok();
    assert_eq!(approved.json::<Value>()["message"], "User approved");

    let tokens = app.server.post("/auth/login").json(&login).await;
    tokens.assert_status_ok();
    let tokens: Value = tokens.json();
    assert!(tokens["accessToken"].is_string());
    assert!(tokens["refreshToken"].is_string());

    // Approved but still only `unauthorized`: no clinical access
    app.server
        .get("/patients")
        .authorization_bearer(tokens["accessToken"].as_str().unwrap())
        .await
        .assert_status(StatusCode::FORBIDDEN);
}

#[test_log::test(tokio::test)]
async fn test_login_rejects_bad_password() {
    let app = create_test_app(create_test_config()).await;
    let account = create_test_account(&app.storage, &["doctor"], true).await;

    let response = app
        .server
        .post("/auth/login")
        .json(&json!({ "email": account.email, "password": "wrong" }))
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(response.json::<Value>()["error"], "Invalid credentials");
}

#[test_log::test(tokio::test)]
async fn test_refresh_issues_new_pair() {
    let app = create_test_app(create_test_config()).await;
    let account = create_test_account(&app.storage, &["nurse"], true).await;

    let tokens: Value = app
        .server
        .post("/auth/login")
        .json(&json!({ "email": account.email, "password": TEST_PASSWORD }))
        .await
        .json();

    let refreshed = app
        .server
        .post("/auth/refresh")
        .json(&json!({ "refreshToken": tokens["refreshToken"] }))
        .await;
    refreshed.assert_status_ok();
    let access = refreshed.json::<Value>()["accessToken"].as_str().unwrap().to_string();
    app.server.get("/patients").authorization_bearer(&access).await.assert_status_ok();

    // An access token is not a refresh token
    app.server
        .post("/auth/refresh")
        .json(&json!({ "refreshToken": tokens["accessToken"] }))
        .await
        .assert_status(StatusCode::FORBIDDEN);
}

#[test_log::test(tokio::test)]
async fn test_missing_and_invalid_tokens() {
    let app = create_test_app(create_test_config()).await;

    let missing = app.server.get("/patients").await;
    missing.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(missing.json::<Value>()["error"], "Missing token");

    app.server
        .get("/patients")
        .authorization_bearer("not-a-jwt")
        .await
        .assert_status(StatusCode::FORBIDDEN);
}

#[test_log::test(tokio::test)]
async fn test_suspended_account_rejected_on_next_request() {
    let app = create_test_app(create_test_config()).await;
    let (doctor, token) = create_test_user(&app, &["doctor"]).await;

    app.server.get("/patients").authorization_bearer(&token).await.assert_status_ok();

    app.storage.set_account_active(doctor.id, false).await.unwrap();
    app.server
        .get("/patients")
        .authorization_bearer(&token)
        .await
        .assert_status(StatusCode::FORBIDDEN);
}

#[test_log::test(tokio::test)]
async fn test_doctor_scoping_and_nurse_visibility() {
    let app = create_test_app(create_test_config()).await;
    let (doctor_a, token_a) = create_test_user(&app, &["doctor"]).await;
    let (_doctor_b, token_b) = create_test_user(&app, &["doctor"]).await;
    let (_nurse, nurse_token) = create_test_user(&app, &["nurse"]).await;

    // A doctor's requested doctorId is ignored in favour of the caller
    let created = app
        .server
        .post("/patients")
        .authorization_bearer(&token_a)
        .json(&json!({ "name": "Jane", "heightCm": 160.0, "weightKg": 64.0, "doctorId": uuid::Uuid::new_v4() }))
        .await;
    created.assert_status(StatusCode::CREATED);
    let patient: Value = created.json();
    assert_eq!(patient["doctorId"], json!(doctor_a.id));
    assert_eq!(patient["bmi"], json!(25.0));
    let patient_id = patient["id"].as_str().unwrap().to_string();

    let listed_b: Value = app.server.get("/patients").authorization_bearer(&token_b).await.json();
    assert!(listed_b.as_array().unwrap().is_empty());

    app.server
        .get(&format!("/patients/{patient_id}"))
        .authorization_bearer(&token_b)
        .await
        .assert_status(StatusCode::FORBIDDEN);

    let read = app
        .server
        .get(&format!("/patients/{patient_id}"))
        .authorization_bearer(&nurse_token)
        .await;
    read.assert_status_ok();
    assert_eq!(read.json::<Value>()["bloodMetals"], json!([]));

    let listed_nurse: Value = app.server.get("/patients").authorization_bearer(&nurse_token).await.json();
    assert_eq!(listed_nurse.as_array().unwrap().len(), 1);
}

#[test_log::test(tokio::test)]
async fn test_patient_validation() {
    let app = create_test_app(create_test_config()).await;
    let (_doctor, token) = create_test_user(&app, &["doctor"]).await;

    for body in [
        json!({ "name": "" }),
        json!({ "name": "Jane", "heightCm": -1.0 }),
        json!({ "name": "Jane", "dob": "2999-01-01" }),
    ] {
        app.server
            .post("/patients")
            .authorization_bearer(&token)
            .json(&body)
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }
}

#[test_log::test(tokio::test)]
async fn test_update_recomputes_derived_fields() {
    let app = create_test_app(create_test_config()).await;
    let (doctor, token) = create_test_user(&app, &["doctor"]).await;
    let patient = create_test_patient(&app.storage, "Jane", Some(doctor.id)).await;

    let response = app
        .server
        .put(&format!("/patients/{}", patient.id))
        .authorization_bearer(&token)
        .json(&json!({ "name": "Jane Doe", "heightCm": 200.0, "weightKg": 80.0 }))
        .await;
    response.assert_status_ok();
    let updated: Value = response.json();
    assert_eq!(updated["name"], "Jane Doe");
    assert_eq!(updated["bmi"], json!(20.0));
    assert_eq!(updated["doctorId"], json!(doctor.id));
}

#[test_log::test(tokio::test)]
async fn test_nurse_assigns_only_active_doctors() {
    let app = create_test_app(create_test_config()).await;
    let (doctor, _) = create_test_user(&app, &["doctor"]).await;
    let inactive_doctor = create_test_account(&app.storage, &["doctor"], false).await;
    let (_nurse, nurse_token) = create_test_user(&app, &["nurse"]).await;

    let doctors: Value = app
        .server
        .get("/patients/available-doctors")
        .authorization_bearer(&nurse_token)
        .await
        .json();
    let ids: Vec<&str> = doctors.as_array().unwrap().iter().filter_map(|d| d["id"].as_str()).collect();
    assert_eq!(ids, vec![doctor.id.to_string().as_str()]);

    app.server
        .post("/patients")
        .authorization_bearer(&nurse_token)
        .json(&json!({ "name": "Jane", "doctorId": inactive_doctor.id }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    let unassigned = app
        .server
        .post("/patients")
        .authorization_bearer(&nurse_token)
        .json(&json!({ "name": "Jane" }))
        .await;
    unassigned.assert_status(StatusCode::CREATED);
    let patient_id = unassigned.json::<Value>()["id"].as_str().unwrap().to_string();

    let assigned = app
        .server
        .patch(&format!("/patients/{patient_id}/assign-doctor"))
        .authorization_bearer(&nurse_token)
        .json(&json!({ "doctorId": doctor.id }))
        .await;
    assigned.assert_status_ok();
    assert_eq!(assigned.json::<Value>()["doctorId"], json!(doctor.id));

    app.server
        .patch(&format!("/patients/{patient_id}/assign-doctor"))
        .authorization_bearer(&nurse_token)
        .json(&json!({}))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[test_log::test(tokio::test)]
async fn test_delete_patient_cascades() {
    let app = create_test_app(create_test_config()).await;
    let (doctor, token) = create_test_user(&app, &["doctor"]).await;
    let patient = create_test_patient(&app.storage, "Jane", Some(doctor.id)).await;

    app.storage
        .create_blood_metals(&BloodMetalsCreateDBRequest {
            patient_id: patient.id,
            values: AnalyteValues {
                lead_umol_l: Some(0.1),
                ..Default::default()
            },
        })
        .await
        .unwrap();
    app.storage
        .create_prediction(&PredictionCreateDBRequest {
            patient_id: patient.id,
            model: "hormone".to_string(),
            value: 0.3,
        })
        .await
        .unwrap();

    let response = app
        .server
        .delete(&format!("/patients/{}", patient.id))
        .authorization_bearer(&token)
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["message"], "Patient deleted successfully");

    assert!(app.storage.list_blood_metals(patient.id).await.unwrap().is_empty());
    assert!(app.storage.list_predictions(patient.id).await.unwrap().is_empty());
    app.server
        .get(&format!("/patients/{}", patient.id))
        .authorization_bearer(&token)
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[test_log::test(tokio::test)]
async fn test_blood_metals_lifecycle() {
    let app = create_test_app(create_test_config()).await;
    let (doctor, token) = create_test_user(&app, &["doctor"]).await;
    let (_other, other_token) = create_test_user(&app, &["doctor"]).await;
    let patient = create_test_patient(&app.storage, "Jane", Some(doctor.id)).await;
    let url = format!("/bloodmetals/{}", patient.id);

    let first = app
        .server
        .post(&url)
        .authorization_bearer(&token)
        .json(&json!({ "lead_umolL": 0.15, "selenium_umolL": 1.2 }))
        .await;
    first.assert_status(StatusCode::CREATED);
    let first: Value = first.json();
    assert_eq!(first["mercury_umolL"], Value::Null);

    let full = json!({
        "lead_umolL": 0.24,
        "mercury_umolL": 0.012,
        "cadmium_umolL": 0.008,
        "selenium_umolL": 1.45,
        "manganese_umolL": 0.17
    });
    let latest = app.server.post(&url).authorization_bearer(&token).json(&full).await;
    latest.assert_status(StatusCode::CREATED);
    let latest: Value = latest.json();
    let report_id = latest["id"].as_str().unwrap().to_string();

    let listed: Value = app.server.get(&url).authorization_bearer(&token).await.json();
    let listed = listed.as_array().unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0]["id"], latest["id"]);
    assert_eq!(listed[1]["id"], first["id"]);
    for key in AnalyteValues::KEYS {
        assert_eq!(listed[0][key], full[key], "{key}");
    }

    app.server
        .get(&url)
        .authorization_bearer(&other_token)
        .await
        .assert_status(StatusCode::FORBIDDEN);

    let record_url = format!("/bloodmetals/record/{report_id}");
    app.server
        .delete(&record_url)
        .authorization_bearer(&other_token)
        .await
        .assert_status(StatusCode::FORBIDDEN);
    app.server.delete(&record_url).authorization_bearer(&token).await.assert_status_ok();

    let gone = app.server.delete(&record_url).authorization_bearer(&token).await;
    gone.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(gone.json::<Value>()["error"], "Record not found");
}

/// Lab routes follow the same role gate and doctor scoping as patient records
#[test_log::test(tokio::test)]
async fn test_blood_metals_gated_like_patients() {
    let app = create_test_app(create_test_config()).await;
    let (owner, _) = create_test_user(&app, &["doctor"]).await;
    let (_admin_doctor, admin_doctor_token) = create_test_user(&app, &["doctor", "admin"]).await;
    let (_member, member_token) = create_test_user(&app, &["unauthorized"]).await;
    let (_admin, admin_token) = create_test_user(&app, &["admin"]).await;
    let patient = create_test_patient(&app.storage, "Jane", Some(owner.id)).await;
    let report = app
        .storage
        .create_blood_metals(&BloodMetalsCreateDBRequest {
            patient_id: patient.id,
            values: AnalyteValues {
                lead_umol_l: Some(0.1),
                ..Default::default()
            },
        })
        .await
        .unwrap();
    let url = format!("/bloodmetals/{}", patient.id);
    let record_url = format!("/bloodmetals/record/{}", report.id);

    // Holding admin as well does not lift the doctor's ownership scope
    for route in [format!("/patients/{}", patient.id), url.clone()] {
        app.server
            .get(&route)
            .authorization_bearer(&admin_doctor_token)
            .await
            .assert_status(StatusCode::FORBIDDEN);
    }
    app.server
        .post(&url)
        .authorization_bearer(&admin_doctor_token)
        .json(&json!({ "lead_umolL": 0.2 }))
        .await
        .assert_status(StatusCode::FORBIDDEN);

    // Neither an approved account without a clinical role nor a plain admin gets in
    for token in [&member_token, &admin_token] {
        app.server.get(&url).authorization_bearer(token).await.assert_status(StatusCode::FORBIDDEN);
        app.server
            .post(&url)
            .authorization_bearer(token)
            .json(&json!({ "lead_umolL": 0.2 }))
            .await
            .assert_status(StatusCode::FORBIDDEN);
        app.server
            .delete(&record_url)
            .authorization_bearer(token)
            .await
            .assert_status(StatusCode::FORBIDDEN);
    }

    assert_eq!(app.storage.list_blood_metals(patient.id).await.unwrap().len(), 1);
}

#[test_log::test(tokio::test)]
async fn test_lab_report_triggers_configured_predictions() {
    let mock_server = MockServer::start().await;
    let mut config = create_test_config();
    config.ml.base_url = mock_server.uri().parse().unwrap();
    config.ml.auto_predict_models = vec!["hormone".to_string(), "cancer".to_string()];
    config.ml.record_predictions = true;
    let app = create_test_app(config).await;
    let (doctor, token) = create_test_user(&app, &["doctor"]).await;
    let patient = create_test_patient(&app.storage, "Jane", Some(doctor.id)).await;

    for (model, value) in [("hormone", 0.42), ("cancer", 0.07)] {
        Mock::given(method("POST"))
            .and(path(format!("/predict/{model}")))
            .and(header("authorization", format!("Bearer {token}").as_str()))
            .and(body_partial_json(json!({
                "features": { "name": "Jane", "lead_umolL": 0.3, "mercury_umolL": null }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "prediction": value })))
            .expect(1)
            .mount(&mock_server)
            .await;
    }

    app.server
        .post(&format!("/bloodmetals/{}", patient.id))
        .authorization_bearer(&token)
        .json(&json!({ "lead_umolL": 0.3 }))
        .await
        .assert_status(StatusCode::CREATED);

    // Predictions run in the background after the response
    let mut recorded = Vec::new();
    for _ in 0..100 {
        recorded = app.storage.list_predictions(patient.id).await.unwrap();
        if recorded.len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let mut models: Vec<(String, f64)> = recorded.into_iter().map(|p| (p.model, p.value)).collect();
    models.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(models, vec![("cancer".to_string(), 0.07), ("hormone".to_string(), 0.42)]);

    mock_server.verify().await;
}

#[test_log::test(tokio::test)]
async fn test_assign_role_is_idempotent() {
    let app = create_test_app(create_test_config()).await;
    let (_admin, admin_token) = create_test_user(&app, &["admin"]).await;
    let target = create_test_account(&app.storage, &["unauthorized"], true).await;

    let request = json!({ "userId": target.id, "roleName": "nurse" });
    let first = app
        .server
        .post("/admin/assign-role")
        .authorization_bearer(&admin_token)
        .json(&request)
        .await;
    first.assert_status_ok();
    assert_eq!(first.json::<Value>()["message"], "Role assigned");

    let second = app
        .server
        .post("/admin/assign-role")
        .authorization_bearer(&admin_token)
        .json(&request)
        .await;
    assert_eq!(second.json::<Value>()["message"], "Role already assigned");

    let account = app.storage.get_account(target.id).await.unwrap().unwrap();
    assert_eq!(account.roles.iter().filter(|r| *r == "nurse").count(), 1);

    let blank = app
        .server
        .post("/admin/assign-role")
        .authorization_bearer(&admin_token)
        .json(&json!({ "userId": target.id, "roleName": "  " }))
        .await;
    blank.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(blank.json::<Value>()["error"], "userId and roleName required");

    // Non-admins cannot reach admin routes
    let (_doctor, doctor_token) = create_test_user(&app, &["doctor"]).await;
    app.server
        .post("/admin/assign-role")
        .authorization_bearer(&doctor_token)
        .json(&request)
        .await
        .assert_status(StatusCode::FORBIDDEN);
}

#[test_log::test(tokio::test)]
async fn test_db_prediction_without_labs_sends_null_analytes() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/predict/hormone"))
        .and(body_partial_json(json!({
            "features": { "name": "Jane", "heightCm": 165.0, "lead_umolL": null, "manganese_umolL": null }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "prediction": 0.42 })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut config = create_test_config();
    config.ml.base_url = mock_server.uri().parse().unwrap();
    config.ml.record_predictions = true;
    let app = create_test_app(config).await;
    let (doctor, token) = create_test_user(&app, &["doctor"]).await;
    let patient = create_test_patient(&app.storage, "Jane", Some(doctor.id)).await;

    let response = app
        .server
        .post("/ml/hormone/db")
        .authorization_bearer(&token)
        .json(&json!({ "patientId": patient.id }))
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>(), json!({ "prediction": 0.42 }));

    let recorded = app.storage.list_predictions(patient.id).await.unwrap();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].model, "hormone");
}

#[test_log::test(tokio::test)]
async fn test_raw_prediction_forwards_body_token_and_upstream_errors() {
    let mock_server = MockServer::start().await;
    let mut config = create_test_config();
    config.ml.base_url = mock_server.uri().parse().unwrap();
    let app = create_test_app(config).await;
    let (_doctor, token) = create_test_user(&app, &["doctor"]).await;

    Mock::given(method("POST"))
        .and(path("/predict/cancer"))
        .and(header("authorization", format!("Bearer {token}").as_str()))
        .and(body_json(json!({ "age": 40 })))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({ "detail": "bad features" })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let response = app
        .server
        .post("/ml/cancer/raw")
        .authorization_bearer(&token)
        .json(&json!({ "age": 40 }))
        .await;
    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json();
    assert_eq!(body["error"], "Prediction service error");
    assert_eq!(body["details"], json!({ "detail": "bad features" }));

    let (_nurse, nurse_token) = create_test_user(&app, &["nurse"]).await;
    app.server
        .post("/ml/cancer/raw")
        .authorization_bearer(&nurse_token)
        .json(&json!({ "age": 40 }))
        .await
        .assert_status(StatusCode::FORBIDDEN);

    let missing = app
        .server
        .post("/ml/hormone/db")
        .authorization_bearer(&token)
        .json(&json!({}))
        .await;
    missing.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(missing.json::<Value>()["error"], "patientId required");
}

#[test_log::test(tokio::test)]
async fn test_report_pdf_for_doctors_only() {
    let app = create_test_app(create_test_config()).await;
    let (doctor, token) = create_test_user(&app, &["doctor"]).await;
    let (_nurse, nurse_token) = create_test_user(&app, &["nurse"]).await;
    let patient = create_test_patient(&app.storage, "Jane Doe", Some(doctor.id)).await;

    let response = app
        .server
        .get(&format!("/reports/{}", patient.id))
        .authorization_bearer(&token)
        .await;
    response.assert_status_ok();
    assert_eq!(response.header("content-type"), "application/pdf");
    assert_eq!(
        response.header("content-disposition"),
        "attachment; filename=\"Health_Report_Jane_Doe.pdf\""
    );
    assert!(response.as_bytes().starts_with(b"%PDF"));

    app.server
        .get(&format!("/reports/{}", patient.id))
        .authorization_bearer(&nurse_token)
        .await
        .assert_status(StatusCode::FORBIDDEN);

    app.server
        .get(&format!("/reports/{}", uuid::Uuid::new_v4()))
        .authorization_bearer(&token)
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[test_log::test(tokio::test)]
async fn test_report_ownership_when_enforced() {
    let mut config = create_test_config();
    config.reports.enforce_ownership = true;
    let app = create_test_app(config).await;
    let (doctor, _) = create_test_user(&app, &["doctor"]).await;
    let (_other, other_token) = create_test_user(&app, &["doctor"]).await;
    let patient = create_test_patient(&app.storage, "Jane", Some(doctor.id)).await;

    app.server
        .get(&format!("/reports/{}", patient.id))
        .authorization_bearer(&other_token)
        .await
        .assert_status(StatusCode::FORBIDDEN);
}

#[test_log::test(tokio::test)]
async fn test_auth_rate_limit() {
    let mut config = create_test_config();
    config.rate_limits.auth = RateLimitConfig {
        max_requests: 2,
        window: Duration::from_secs(60),
    };
    let app = create_test_app(config).await;

    let login = json!({ "email": "nobody@example.com", "password": "x" });
    for _ in 0..2 {
        app.server
            .post("/auth/login")
            .json(&login)
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }
    let limited = app.server.post("/auth/login").json(&login).await;
    limited.assert_status(StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(limited.json::<Value>()["error"], "Too many requests, please try again later.");

    // Other routes have their own budget
    app.server.get("/healthz").await.assert_status_ok();
}

#[test_log::test(tokio::test)]
async fn test_access_log_written_after_authorization() {
    let app = create_test_app(create_test_config()).await;
    let (doctor, token) = create_test_user(&app, &["doctor"]).await;
    let (_other, other_token) = create_test_user(&app, &["doctor"]).await;
    let patient = create_test_patient(&app.storage, "Jane", Some(doctor.id)).await;

    app.server
        .get(&format!("/patients/{}", patient.id))
        .authorization_bearer(&token)
        .add_header("user-agent", "test-agent")
        .add_header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
        .await
        .assert_status_ok();
    // Refused by ownership, so never audited
    app.server
        .get(&format!("/patients/{}", patient.id))
        .authorization_bearer(&other_token)
        .await
        .assert_status(StatusCode::FORBIDDEN);

    // Stopping the writer drains everything queued so far
    let storage = app.storage.clone();
    app.bg_services.shutdown().await;

    let logs = storage.list_access_logs(0, 50).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].action, "READ_PATIENT");
    assert_eq!(logs[0].account_id, Some(doctor.id));
    assert_eq!(logs[0].resource, patient.id.to_string());
    assert_eq!(logs[0].ip_address, "203.0.113.7");
    assert_eq!(logs[0].user_agent, "test-agent");
}

#[test_log::test(tokio::test)]
async fn test_admin_log_pagination() {
    let app = create_test_app(create_test_config()).await;
    let (_admin, admin_token) = create_test_user(&app, &["admin"]).await;

    let response = app
        .server
        .get("/admin/logs")
        .add_query_param("page", 2)
        .add_query_param("pageSize", 500)
        .authorization_bearer(&admin_token)
        .await;
    response.assert_status_ok();
    let page: Value = response.json();
    assert_eq!(page["page"], 2);
    assert_eq!(page["pageSize"], 100);
    assert_eq!(page["logs"], json!([]));
}

#[test_log::test(tokio::test)]
async fn test_seeding_is_idempotent() {
    let app = create_test_app(create_test_config()).await;
    let storage = app.storage.as_ref();

    seed_database(storage, &app.state.config).await.unwrap();

    let admin = storage.get_account_by_email(ADMIN_EMAIL).await.unwrap().unwrap();
    assert!(admin.is_active);
    assert_eq!(admin.roles, vec!["admin".to_string()]);
    assert_eq!(storage.list_pending_accounts().await.unwrap().len(), 0);
}

/// Google sign-in only links an existing account through a verified email
#[test_log::test(tokio::test)]
async fn test_google_sign_in_requires_verified_email_to_link() {
    let mock_server = MockServer::start().await;
    let mut config = create_test_config();
    let google = &mut config.auth.google;
    google.enabled = true;
    google.client_id = Some("client-123".to_string());
    google.client_secret = Some("shh".to_string());
    google.callback_url = Some("http://localhost:5001/auth/google/callback".parse().unwrap());
    google.auth_url = format!("{}/auth", mock_server.uri()).parse().unwrap();
    google.token_url = format!("{}/token", mock_server.uri()).parse().unwrap();
    google.userinfo_url = format!("{}/userinfo", mock_server.uri()).parse().unwrap();
    let app = create_test_app(config).await;

    for (code, verified) in [("unverified-code", false), ("verified-code", true)] {
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains(format!("code={code}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": code })))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .and(header("authorization", format!("Bearer {code}").as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sub": format!("google-{code}"),
                "email": ADMIN_EMAIL,
                "email_verified": verified
            })))
            .expect(1)
            .mount(&mock_server)
            .await;
    }

    let sign_in = |code: &'static str| {
        let server = &app.server;
        async move {
            let redirect = server.get("/auth/google").await;
            redirect.assert_status(StatusCode::SEE_OTHER);
            let location: url::Url = redirect.header("location").to_str().unwrap().parse().unwrap();
            let state = location
                .query_pairs()
                .find(|(k, _)| k == "state")
                .map(|(_, v)| v.into_owned())
                .unwrap();
            server
                .get("/auth/google/callback")
                .add_query_param("code", code)
                .add_query_param("state", state)
                .await
        }
    };

    // An unverified claim on the admin's address gets a fresh account awaiting approval
    let refused = sign_in("unverified-code").await;
    refused.assert_status(StatusCode::FORBIDDEN);
    let admin = app.storage.get_account_by_email(ADMIN_EMAIL).await.unwrap().unwrap();
    assert_eq!(admin.google_id, None);
    let pending = app.storage.list_pending_accounts().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].email, "no-email-google-unverified-code@example.com");

    let linked = sign_in("verified-code").await;
    linked.assert_status_ok();
    assert!(linked.json::<Value>()["accessToken"].is_string());
    let admin = app.storage.get_account(admin.id).await.unwrap().unwrap();
    assert_eq!(admin.google_id.as_deref(), Some("google-verified-code"));
}

#[test_log::test(tokio::test)]
async fn test_seeding_without_password_leaves_google_only_admin() {
    let mut config = create_test_config();
    config.admin.password = None;
    let app = create_test_app(config).await;

    let admin = app.storage.get_account_by_email(ADMIN_EMAIL).await.unwrap().unwrap();
    assert!(admin.is_active);
    assert_eq!(admin.password_hash, None);

    let response = app
        .server
        .post("/auth/login")
        .json(&json!({ "email": ADMIN_EMAIL, "password": ADMIN_PASSWORD }))
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
}
