//! End-to-end checks against a real Postgres. Skipped unless
//! `EMR_TEST_DATABASE_URL` points at a database the tests may migrate.
//! Every test seeds its own users and patients, so runs do not collide.

use actix_web::{http::StatusCode, test, web, App};
use chrono::Duration;
use fake::faker::name::en::{FirstName, LastName};
use fake::Fake;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::api::middleware::{self, Claims};
use crate::config::from_toml;
use crate::db::Database;
use crate::models::user::Role;
use crate::AppState;

const SECRET: &str = "db-test-secret";
const DB_ENV: &str = "EMR_TEST_DATABASE_URL";

async fn state() -> Option<web::Data<AppState>> {
    let Ok(url) = std::env::var(DB_ENV) else {
        eprintln!("{} not set, skipping", DB_ENV);
        return None;
    };
    let config = from_toml(&format!(
        r#"
        [server]
        host = "127.0.0.1"
        port = 0

        [database]
        url = "{}"
        max_connections = 8

        [auth]
        jwt_secret = "{}"
        "#,
        url, SECRET
    ))
    .unwrap();
    let db = Database::connect(&config.database).await.unwrap();
    db.run_migrations().await.unwrap();
    Some(web::Data::new(AppState::new(db, config)))
}

struct Caller {
    id: Uuid,
    auth: (&'static str, String),
}

async fn seed_user(state: &AppState, role: Role) -> Caller {
    let username = format!("{}-{}", role, Uuid::new_v4().simple());
    let id: Uuid = sqlx::query_scalar(
        "INSERT INTO users (username, email, password_hash, first_name, last_name, role) \
         VALUES ($1, $2, 'unused', $3, $4, $5) RETURNING id",
    )
    .bind(&username)
    .bind(format!("{}@example.test", username))
    .bind(FirstName().fake::<String>())
    .bind(LastName().fake::<String>())
    .bind(role)
    .fetch_one(state.db.pool())
    .await
    .unwrap();
    let token = Claims::new(id, role, &username, Duration::hours(1)).encode(SECRET).unwrap();
    Caller {
        id,
        auth: ("Authorization", format!("Bearer {}", token)),
    }
}

macro_rules! app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .app_data($state.clone())
                .app_data(middleware::json_config())
                .app_data(middleware::query_config())
                .app_data(middleware::path_config())
                .configure(crate::api::configure),
        )
        .await
    };
}

macro_rules! call {
    ($app:expr, $req:expr) => {{
        let resp = test::call_service(&$app, $req.to_request()).await;
        let status = resp.status();
        let body: Value = test::read_body_json(resp).await;
        (status, body)
    }};
}

fn patient_body(account: Option<Uuid>) -> Value {
    json!({
        "firstName": FirstName().fake::<String>(),
        "lastName": LastName().fake::<String>(),
        "dateOfBirth": "1984-03-12",
        "gender": "female",
        "userId": account,
    })
}

fn uuid_of(body: &Value) -> Uuid {
    body["data"]["id"].as_str().and_then(|s| s.parse().ok()).unwrap()
}

macro_rules! new_patient {
    ($app:expr, $caller:expr, $account:expr) => {{
        let (status, body) = call!(
            $app,
            test::TestRequest::post()
                .uri("/api/patients")
                .insert_header($caller.auth.clone())
                .set_json(patient_body($account))
        );
        assert_eq!(status, StatusCode::CREATED);
        uuid_of(&body)
    }};
}

#[actix_web::test]
async fn overlapping_booking_for_same_physician_conflicts() {
    let Some(state) = state().await else { return };
    let app = app!(state);
    let admin = seed_user(&state, Role::Admin).await;
    let doctor = seed_user(&state, Role::Doctor).await;

    let a = new_patient!(app, admin, None);
    let b = new_patient!(app, admin, None);
    let booking = |time: &str| {
        json!({
            "physicianId": doctor.id,
            "appointmentDate": "2031-02-03",
            "appointmentTime": time,
            "durationMinutes": 30,
            "appointmentType": "consultation",
        })
    };

    let (status, _) = call!(
        app,
        test::TestRequest::post()
            .uri(&format!("/api/patients/{}/appointments", a))
            .insert_header(admin.auth.clone())
            .set_json(booking("09:00:00"))
    );
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = call!(
        app,
        test::TestRequest::post()
            .uri(&format!("/api/patients/{}/appointments", b))
            .insert_header(admin.auth.clone())
            .set_json(booking("09:15:00"))
    );
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "APPOINTMENT_CONFLICT");

    let (status, _) = call!(
        app,
        test::TestRequest::post()
            .uri(&format!("/api/patients/{}/appointments", b))
            .insert_header(admin.auth.clone())
            .set_json(booking("09:30:00"))
    );
    assert_eq!(status, StatusCode::CREATED);
}

#[actix_web::test]
async fn concurrent_bookings_on_empty_calendar_admit_one() {
    let Some(state) = state().await else { return };
    let app = app!(state);
    let admin = seed_user(&state, Role::Admin).await;

    for _ in 0..5 {
        // A fresh physician each round keeps the calendar empty.
        let doctor = seed_user(&state, Role::Doctor).await;
        let a = new_patient!(app, admin, None);
        let b = new_patient!(app, admin, None);
        let booking = json!({
            "physicianId": doctor.id,
            "appointmentDate": "2031-02-04",
            "appointmentTime": "09:00:00",
            "durationMinutes": 30,
            "appointmentType": "consultation",
        });
        let first = test::TestRequest::post()
            .uri(&format!("/api/patients/{}/appointments", a))
            .insert_header(admin.auth.clone())
            .set_json(&booking)
            .to_request();
        let second = test::TestRequest::post()
            .uri(&format!("/api/patients/{}/appointments", b))
            .insert_header(admin.auth.clone())
            .set_json(&booking)
            .to_request();
        let (r1, r2) = futures::join!(test::call_service(&app, first), test::call_service(&app, second));
        let mut statuses = [r1.status(), r2.status()];
        statuses.sort();
        assert_eq!(statuses, [StatusCode::CREATED, StatusCode::CONFLICT]);

        let booked: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM appointments WHERE physician_id = $1")
            .bind(doctor.id)
            .fetch_one(state.db.pool())
            .await
            .unwrap();
        assert_eq!(booked, 1);
    }
}

#[actix_web::test]
async fn orders_cannot_attach_to_another_patients_visit() {
    let Some(state) = state().await else { return };
    let app = app!(state);
    let doctor = seed_user(&state, Role::Doctor).await;

    let a = new_patient!(app, doctor, None);
    let b = new_patient!(app, doctor, None);

    let (status, visit) = call!(
        app,
        test::TestRequest::post()
            .uri(&format!("/api/patients/{}/visits", a))
            .insert_header(doctor.auth.clone())
            .set_json(json!({ "visitType": "outpatient", "chiefComplaint": "cough" }))
    );
    assert_eq!(status, StatusCode::CREATED);
    let visit_id = uuid_of(&visit);

    let prescription = json!({
        "visitId": visit_id,
        "items": [{ "medicationName": "Amoxicillin", "dosage": "500 mg", "frequency": "tid" }],
    });
    let (status, body) = call!(
        app,
        test::TestRequest::post()
            .uri(&format!("/api/patients/{}/prescriptions", b))
            .insert_header(doctor.auth.clone())
            .set_json(&prescription)
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (status, body) = call!(
        app,
        test::TestRequest::post()
            .uri(&format!("/api/patients/{}/lab-orders", b))
            .insert_header(doctor.auth.clone())
            .set_json(json!({
                "visitId": visit_id,
                "tests": [{ "testCode": "CBC", "testName": "Complete blood count" }],
            }))
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (status, _) = call!(
        app,
        test::TestRequest::post()
            .uri(&format!("/api/patients/{}/prescriptions", a))
            .insert_header(doctor.auth.clone())
            .set_json(&prescription)
    );
    assert_eq!(status, StatusCode::CREATED);

    let (_, detail) = call!(
        app,
        test::TestRequest::get().uri(&format!("/api/visits/{}", visit_id)).insert_header(doctor.auth.clone())
    );
    let owners: Vec<&str> = detail["data"]["prescriptions"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|p| p["patientId"].as_str())
        .collect();
    assert_eq!(owners, vec![a.to_string().as_str()]);
}

/// Admin registers a patient with a portal account and an external
/// requester files a request for `data_types`.
struct ConsentFixture {
    patient_user: Caller,
    requester: Caller,
    patient_id: Uuid,
    request_id: Uuid,
}

macro_rules! consent_fixture {
    ($state:expr, $app:expr, $data_types:expr) => {{
        let admin = seed_user(&$state, Role::Admin).await;
        let patient_user = seed_user(&$state, Role::Patient).await;
        let requester = seed_user(&$state, Role::ExternalUser).await;

        let patient_id = new_patient!($app, admin, Some(patient_user.id));

        let (status, request) = call!(
            $app,
            test::TestRequest::post()
                .uri("/api/consent-requests")
                .insert_header(requester.auth.clone())
                .set_json(json!({
                    "patientId": patient_id,
                    "requestType": "data_access",
                    "requestedDataTypes": $data_types,
                    "purpose": "Follow-up care at a partner clinic",
                }))
        );
        assert_eq!(status, StatusCode::CREATED);

        ConsentFixture {
            patient_user,
            requester,
            patient_id,
            request_id: uuid_of(&request),
        }
    }};
}

#[actix_web::test]
async fn consent_request_is_answered_once() {
    let Some(state) = state().await else { return };
    let app = app!(state);
    let fx = consent_fixture!(state, app, ["lab_results"]);
    let uri = format!("/api/consent-requests/{}/respond", fx.request_id);

    let approve = test::TestRequest::put()
        .uri(&uri)
        .insert_header(fx.patient_user.auth.clone())
        .set_json(json!({ "response": "approved" }))
        .to_request();
    let reject = test::TestRequest::put()
        .uri(&uri)
        .insert_header(fx.patient_user.auth.clone())
        .set_json(json!({ "response": "rejected" }))
        .to_request();
    let (r1, r2) = futures::join!(test::call_service(&app, approve), test::call_service(&app, reject));
    let mut statuses = [r1.status(), r2.status()];
    statuses.sort();
    assert_eq!(statuses, [StatusCode::OK, StatusCode::CONFLICT]);

    let contracts: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM consent_contracts WHERE consent_request_id = $1")
        .bind(fx.request_id)
        .fetch_one(state.db.pool())
        .await
        .unwrap();
    assert!(contracts <= 1);

    let (status, body) = call!(
        app,
        test::TestRequest::put()
            .uri(&uri)
            .insert_header(fx.patient_user.auth.clone())
            .set_json(json!({ "response": "approved" }))
    );
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "REQUEST_ALREADY_PROCESSED");
}

#[actix_web::test]
async fn late_response_expires_the_request() {
    let Some(state) = state().await else { return };
    let app = app!(state);
    let fx = consent_fixture!(state, app, ["lab_results"]);
    sqlx::query("UPDATE consent_requests SET expires_at = NOW() - INTERVAL '1 hour' WHERE id = $1")
        .bind(fx.request_id)
        .execute(state.db.pool())
        .await
        .unwrap();

    let (status, body) = call!(
        app,
        test::TestRequest::put()
            .uri(&format!("/api/consent-requests/{}/respond", fx.request_id))
            .insert_header(fx.patient_user.auth.clone())
            .set_json(json!({ "response": "approved" }))
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "REQUEST_EXPIRED");

    let stored: String = sqlx::query_scalar("SELECT status FROM consent_requests WHERE id = $1")
        .bind(fx.request_id)
        .fetch_one(state.db.pool())
        .await
        .unwrap();
    assert_eq!(stored, "expired");

    let failures: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM audit_logs WHERE user_id = $1 AND action = 'RESPOND' AND status = 'failure' \
         AND details->>'code' = 'REQUEST_EXPIRED'",
    )
    .bind(fx.patient_user.id)
    .fetch_one(state.db.pool())
    .await
    .unwrap();
    assert_eq!(failures, 1);
}

#[actix_web::test]
async fn access_check_matches_data_type_case_insensitively() {
    let Some(state) = state().await else { return };
    let app = app!(state);
    let fx = consent_fixture!(state, app, ["Lab_Results"]);

    let (status, _) = call!(
        app,
        test::TestRequest::put()
            .uri(&format!("/api/consent-requests/{}/respond", fx.request_id))
            .insert_header(fx.patient_user.auth.clone())
            .set_json(json!({ "response": "approved" }))
    );
    assert_eq!(status, StatusCode::OK);

    for (data_type, allowed) in [("Lab_Results", true), ("lab_results", true), ("imaging", false)] {
        let (status, body) = call!(
            app,
            test::TestRequest::get()
                .uri(&format!(
                    "/api/consent-contracts/check-access?patientId={}&requesterId={}&dataType={}",
                    fx.patient_id, fx.requester.id, data_type
                ))
                .insert_header(fx.requester.auth.clone())
        );
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["allowed"], allowed, "dataType={}", data_type);
    }
}

#[actix_web::test]
async fn refused_writes_leave_failure_audit_rows() {
    let Some(state) = state().await else { return };
    let app = app!(state);
    let fx = consent_fixture!(state, app, ["prescriptions"]);
    let stranger = seed_user(&state, Role::Patient).await;
    let nurse = seed_user(&state, Role::Nurse).await;

    let (status, _) = call!(
        app,
        test::TestRequest::put()
            .uri(&format!("/api/consent-requests/{}/respond", fx.request_id))
            .insert_header(stranger.auth.clone())
            .set_json(json!({ "response": "approved" }))
    );
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = call!(
        app,
        test::TestRequest::delete()
            .uri(&format!("/api/patients/{}", fx.patient_id))
            .insert_header(nurse.auth.clone())
    );
    assert_eq!(status, StatusCode::FORBIDDEN);

    let rows: Vec<(String, String, Option<String>)> = sqlx::query_as(
        "SELECT action, resource_type, resource_id FROM audit_logs \
         WHERE user_id = ANY($1) AND status = 'failure' ORDER BY created_at",
    )
    .bind(vec![stranger.id, nurse.id])
    .fetch_all(state.db.pool())
    .await
    .unwrap();
    assert_eq!(
        rows,
        vec![
            ("RESPOND".to_string(), "consent_request".to_string(), Some(fx.request_id.to_string())),
            ("DELETE".to_string(), "patient".to_string(), Some(fx.patient_id.to_string())),
        ]
    );
}
