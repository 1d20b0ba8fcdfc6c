//! End-to-end tests driving the full router against an in-memory database.

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, HeaderValue, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

use super::{auth, create_router};
use crate::config::Config;
use crate::db;
use crate::notifications::testing::RecordingMailer;
use crate::uploads::PUBLIC_PREFIX;
use crate::AppState;

const ADMIN_EMAIL: &str = "admin@kmun.test";
const ADMIN_PASSWORD: &str = "admin-password";

struct TestApp {
    router: Router,
    state: Arc<AppState>,
    mailer: Arc<RecordingMailer>,
    uploads: TempDir,
}

fn test_config(uploads: &TempDir) -> Config {
    let mut config = Config::default();
    config.auth.jwt_secret = "test-secret".to_string();
    config.auth.admin_email = ADMIN_EMAIL.to_string();
    config.auth.admin_password = Some(ADMIN_PASSWORD.to_string());
    config.uploads.dir = uploads.path().to_path_buf();
    config.rate_limit.enabled = false;
    config
}

async fn spawn_app_with(config_fn: impl FnOnce(&mut Config), mailer: RecordingMailer) -> TestApp {
    let uploads = tempfile::tempdir().unwrap();
    let mut config = test_config(&uploads);
    config_fn(&mut config);

    let pool = db::init_memory().await.unwrap();
    auth::ensure_admin_user(&pool, &config.auth).await.unwrap();

    let mailer = Arc::new(mailer);
    let state = Arc::new(AppState::with_mailer(config, pool, mailer.clone()));
    TestApp {
        router: create_router(state.clone()),
        state,
        mailer,
        uploads,
    }
}

async fn spawn_app() -> TestApp {
    spawn_app_with(|_| {}, RecordingMailer::default()).await
}

async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn json_request(method: Method, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(Method::GET).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

fn delete(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method(Method::DELETE)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

const BOUNDARY: &str = "----kmun-test-boundary";

/// Encode text fields and `(field, file name, bytes)` files as multipart
fn multipart_request(fields: &[(&str, &str)], files: &[(&str, &str, &[u8])]) -> Request<Body> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
    }
    for (name, file_name, data) in files {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                BOUNDARY, name, file_name
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method(Method::POST)
        .uri("/api/registrations")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

fn with_bearer(mut request: Request<Body>, token: &str) -> Request<Body> {
    request.headers_mut().insert(
        header::AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
    );
    request
}

async fn registration_total(app: &TestApp) -> i64 {
    let admin = admin_token(app).await;
    let (status, body) = send(app, get("/api/registrations", Some(&admin))).await;
    assert_eq!(status, StatusCode::OK);
    body["total"].as_i64().unwrap()
}

fn applicant_fields<'a>(first_name: &'a str, email: &'a str) -> Vec<(&'a str, &'a str)> {
    vec![
        ("firstName", first_name),
        ("lastName", "Shrestha"),
        ("email", email),
        ("phone", "9800000000"),
        ("institution", "Budhanilkantha School"),
        ("committeePreference1", "UNSC"),
        ("portfolioPreference1", "United States"),
    ]
}

async fn login(app: &TestApp, email: &str, password: &str) -> String {
    let (status, body) = send(
        app,
        json_request(
            Method::POST,
            "/api/auth/login",
            None,
            json!({ "email": email, "password": password }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "login failed: {}", body);
    body["token"].as_str().unwrap().to_string()
}

async fn admin_token(app: &TestApp) -> String {
    login(app, ADMIN_EMAIL, ADMIN_PASSWORD).await
}

/// Create a committee with one single-seat portfolio; returns the committee id
async fn seed_committee(app: &TestApp, token: &str, name: &str, portfolio: &str) -> String {
    let (status, body) = send(
        app,
        json_request(
            Method::POST,
            "/api/committees",
            Some(token),
            json!({ "name": name, "description": "Test committee", "capacity": 10 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    let id = body["committee"]["id"].as_str().unwrap().to_string();

    let (status, _) = send(
        app,
        json_request(
            Method::POST,
            &format!("/api/committees/{}/portfolios", id),
            Some(token),
            json!({ "name": portfolio, "capacity": 1 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    id
}

async fn submit_registration(app: &TestApp, first_name: &str, email: &str) -> Value {
    let (status, body) = send(
        app,
        multipart_request(&applicant_fields(first_name, email), &[]),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    body
}

#[tokio::test]
async fn test_registration_creates_account_with_temp_password() {
    let app = spawn_app().await;

    let (status, body) = send(
        &app,
        multipart_request(
            &applicant_fields("Aarav", "Aarav@Example.com"),
            &[("idDocument", "passport.pdf", b"%PDF-1.4 test")],
        ),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["success"], json!(true));
    assert!(!body["registration"]["id"].as_str().unwrap().is_empty());
    assert_eq!(body["registration"]["status"], json!("pending"));
    assert_eq!(body["user"]["tempPassword"], json!("IamAarav1!@#"));
    assert_eq!(body["user"]["email"], json!("aarav@example.com"));
    assert!(db::is_valid_user_id(body["user"]["userId"].as_str().unwrap()));

    let stored = body["registration"]["idDocumentPath"].as_str().unwrap();
    assert!(stored.starts_with(PUBLIC_PREFIX));
    let on_disk = app.uploads.path().join(stored.trim_start_matches(PUBLIC_PREFIX));
    assert!(on_disk.exists());

    let sent = app.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "aarav@example.com");
    assert_eq!(body["emailSent"], json!(true));

    // The temporary password logs in
    let token = login(&app, "aarav@example.com", "IamAarav1!@#").await;
    let (status, mine) = send(&app, get("/api/registrations/me", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(mine["registration"]["id"], body["registration"]["id"]);
}

#[tokio::test]
async fn test_second_registration_for_same_email_conflicts() {
    let app = spawn_app().await;
    submit_registration(&app, "Mei", "mei@example.com").await;

    let (status, body) = send(
        &app,
        multipart_request(&applicant_fields("Mei", "MEI@example.com"), &[]),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["error"]["code"], json!("conflict"));
}

#[tokio::test]
async fn test_existing_account_registers_without_temp_password() {
    let app = spawn_app().await;

    let (status, registered) = send(
        &app,
        json_request(
            Method::POST,
            "/api/auth/register",
            None,
            json!({
                "firstName": "Lena",
                "lastName": "Gurung",
                "email": "lena@example.com",
                "password": "my-own-password",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let token = registered["token"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        with_bearer(
            multipart_request(&applicant_fields("Lena", "lena@example.com"), &[]),
            &token,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert!(body["user"].get("tempPassword").is_none());
    assert!(body["token"].is_null());
    login(&app, "lena@example.com", "my-own-password").await;
}

#[tokio::test]
async fn test_existing_account_requires_its_own_session() {
    let app = spawn_app().await;
    let (status, _) = send(
        &app,
        json_request(
            Method::POST,
            "/api/auth/register",
            None,
            json!({
                "firstName": "Lena",
                "lastName": "Gurung",
                "email": "lena@example.com",
                "password": "my-own-password",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // Anonymous
    let (status, body) = send(
        &app,
        multipart_request(&applicant_fields("Lena", "lena@example.com"), &[]),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body.get("token").is_none());

    // Signed in as somebody else
    let other = submit_registration(&app, "Mei", "mei@example.com").await;
    let other_token = other["token"].as_str().unwrap().to_string();
    let (status, body) = send(
        &app,
        with_bearer(
            multipart_request(&applicant_fields("Lena", "lena@example.com"), &[]),
            &other_token,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body.get("token").is_none());

    assert_eq!(registration_total(&app).await, 1);
}

#[tokio::test]
async fn test_staff_email_cannot_be_used_to_register() {
    let app = spawn_app().await;

    let (status, body) = send(
        &app,
        multipart_request(&applicant_fields("Mallory", ADMIN_EMAIL), &[]),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["success"], json!(false));
    assert!(body.get("token").is_none());

    // Not even when signed in as that admin
    let admin = admin_token(&app).await;
    let (status, body) = send(
        &app,
        with_bearer(
            multipart_request(&applicant_fields("Mallory", ADMIN_EMAIL), &[]),
            &admin,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body.get("token").is_none());

    assert_eq!(registration_total(&app).await, 0);
    let (_, me) = send(&app, get("/api/auth/me", Some(&admin))).await;
    assert_eq!(me["user"]["role"], json!("admin"));
}

#[tokio::test]
async fn test_registration_validation_and_upload_rules() {
    let app = spawn_app().await;

    let mut fields = applicant_fields("Aarav", "not-an-email");
    fields.retain(|(name, _)| *name != "committeePreference1");
    let (status, body) = send(&app, multipart_request(&fields, &[])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], json!("validation_error"));
    assert!(body["error"]["details"]["email"].is_array());
    assert!(body["error"]["details"]["committeePreference1"].is_array());

    let (status, body) = send(
        &app,
        multipart_request(
            &applicant_fields("Aarav", "aarav@example.com"),
            &[("munResume", "resume.exe", b"MZ")],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], json!("bad_request"));

    // Nothing was persisted by the failed attempts
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM registrations")
        .fetch_one(&app.state.db)
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn test_wrong_password_login_leaves_last_login_untouched() {
    let app = spawn_app().await;

    let (status, body) = send(
        &app,
        json_request(
            Method::POST,
            "/api/auth/login",
            None,
            json!({ "email": ADMIN_EMAIL, "password": "not-the-password" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], json!("Invalid credentials"));

    let admin = db::find_user_by_email(&app.state.db, ADMIN_EMAIL)
        .await
        .unwrap()
        .unwrap();
    assert!(admin.last_login.is_none());

    // Unknown email gets the same answer
    let (status, body) = send(
        &app,
        json_request(
            Method::POST,
            "/api/auth/login",
            None,
            json!({ "email": "nobody@example.com", "password": "whatever" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], json!("Invalid credentials"));

    admin_token(&app).await;
    let admin = db::find_user_by_email(&app.state.db, ADMIN_EMAIL)
        .await
        .unwrap()
        .unwrap();
    assert!(admin.last_login.is_some());
}

#[tokio::test]
async fn test_deactivated_account_cannot_log_in() {
    let app = spawn_app().await;
    submit_registration(&app, "Ravi", "ravi@example.com").await;

    sqlx::query("UPDATE users SET is_active = 0 WHERE email = 'ravi@example.com'")
        .execute(&app.state.db)
        .await
        .unwrap();

    let (status, body) = send(
        &app,
        json_request(
            Method::POST,
            "/api/auth/login",
            None,
            json!({ "email": "ravi@example.com", "password": "IamRavi1!@#" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], json!("Account is deactivated"));
}

#[tokio::test]
async fn test_role_guards() {
    let app = spawn_app().await;
    let registered = submit_registration(&app, "Sara", "sara@example.com").await;
    let delegate = registered["token"].as_str().unwrap().to_string();
    let admin = admin_token(&app).await;

    let (status, _) = send(&app, get("/api/registrations", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(&app, get("/api/registrations", Some(&delegate))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], json!("forbidden"));

    let (status, body) = send(&app, get("/api/registrations", Some(&admin))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], json!(1));

    let (status, _) = send(&app, get("/api/dashboard/stats", Some(&delegate))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &app,
        json_request(
            Method::POST,
            "/api/committees",
            Some(&delegate),
            json!({ "name": "DISEC" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&app, get("/api/auth/me", Some("not-a-jwt"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, me) = send(&app, get("/api/auth/me", Some(&delegate))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["user"]["email"], json!("sara@example.com"));
    assert!(me["user"].get("passwordHash").is_none());
}

#[tokio::test]
async fn test_delegate_can_only_view_own_registration() {
    let app = spawn_app().await;
    let first = submit_registration(&app, "Ana", "ana@example.com").await;
    let second = submit_registration(&app, "Bo", "bo@example.com").await;
    let token = first["token"].as_str().unwrap();

    let own = format!("/api/registrations/{}", first["registration"]["id"].as_str().unwrap());
    let other = format!("/api/registrations/{}", second["registration"]["id"].as_str().unwrap());

    let (status, _) = send(&app, get(&own, Some(token))).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, get(&other, Some(token))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_portfolio_endpoints() {
    let app = spawn_app().await;
    let admin = admin_token(&app).await;
    let committee_id = seed_committee(&app, &admin, "UNSC", "France").await;
    let base = format!("/api/committees/{}/portfolios", committee_id);

    let (status, body) = send(
        &app,
        json_request(
            Method::POST,
            &base,
            Some(&admin),
            json!({ "name": "China", "description": "P5 member", "capacity": 2 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["portfolio"]["registered"], json!(0));
    let china = body["portfolio"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(&app, get(&base, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["portfolios"].as_array().unwrap().len(), 2);

    let (status, body) = send(
        &app,
        json_request(
            Method::POST,
            &base,
            Some(&admin),
            json!({ "name": "china" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT, "{}", body);

    let (status, _) = send(
        &app,
        json_request(
            Method::PUT,
            &format!("{}/missing", base),
            Some(&admin),
            json!({ "capacity": 5 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(
        &app,
        json_request(
            Method::PUT,
            &format!("{}/{}", base, china),
            Some(&admin),
            json!({ "capacity": 3 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["portfolio"]["capacity"], json!(3));
    assert_eq!(body["portfolio"]["description"], json!("P5 member"));

    let (status, body) = send(&app, delete(&format!("{}/{}", base, china), &admin)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], json!(true));
    let (status, body) = send(&app, delete(&format!("{}/{}", base, china), &admin)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], json!(false));

    let (status, body) = send(&app, get(&format!("/api/committees/{}", committee_id), None)).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body["committee"]["portfolios"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["France"]);

    let (status, _) = send(&app, get("/api/committees/missing/portfolios", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Portfolios always have at least one seat
    let (status, body) = send(
        &app,
        json_request(
            Method::POST,
            &base,
            Some(&admin),
            json!({ "name": "Kenya", "capacity": 0 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], json!("validation_error"));
}

#[tokio::test]
async fn test_committee_version_conflict() {
    let app = spawn_app().await;
    let admin = admin_token(&app).await;
    let id = seed_committee(&app, &admin, "DISEC", "Japan").await;
    let uri = format!("/api/committees/{}", id);

    let (status, body) = send(
        &app,
        json_request(Method::PUT, &uri, Some(&admin), json!({ "capacity": 30, "version": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["committee"]["version"], json!(2));

    let (status, body) = send(
        &app,
        json_request(Method::PUT, &uri, Some(&admin), json!({ "capacity": 40, "version": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["details"]["currentVersion"], json!(2));
}

#[tokio::test]
async fn test_allocation_sends_email_and_fills_seat() {
    let app = spawn_app().await;
    let admin = admin_token(&app).await;
    let committee_id = seed_committee(&app, &admin, "UNSC", "France").await;

    let first = submit_registration(&app, "Ana", "ana@example.com").await;
    let second = submit_registration(&app, "Bo", "bo@example.com").await;
    let first_id = first["registration"]["id"].as_str().unwrap();
    let second_id = second["registration"]["id"].as_str().unwrap();

    let (status, body) = send(
        &app,
        json_request(
            Method::PUT,
            &format!("/api/registrations/{}/allocation", first_id),
            Some(&admin),
            json!({ "allocatedCommittee": "unsc", "allocatedPortfolio": "france" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["registration"]["allocatedCommittee"], json!("UNSC"));
    assert_eq!(body["registration"]["allocatedPortfolio"], json!("France"));
    assert_eq!(body["emailSent"], json!(true));

    let allocation_mail = app
        .mailer
        .sent()
        .into_iter()
        .find(|m| m.to == "ana@example.com" && m.subject.contains("allocation"))
        .unwrap();
    assert_eq!(allocation_mail.subject, "KMUN allocation: UNSC - France");

    let (_, body) = send(&app, get(&format!("/api/committees/{}/portfolios", committee_id), None)).await;
    assert_eq!(body["portfolios"][0]["registered"], json!(1));

    // France has one seat
    let (status, _) = send(
        &app,
        json_request(
            Method::PUT,
            &format!("/api/registrations/{}/allocation", second_id),
            Some(&admin),
            json!({ "allocatedCommittee": "UNSC", "allocatedPortfolio": "France" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(
        &app,
        json_request(
            Method::PUT,
            &format!("/api/registrations/{}/allocation", second_id),
            Some(&admin),
            json!({ "allocatedCommittee": "Nonexistent" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_allocation_survives_mail_failure() {
    let app = spawn_app_with(|_| {}, RecordingMailer::failing()).await;
    let admin = admin_token(&app).await;
    seed_committee(&app, &admin, "UNHRC", "Kenya").await;

    let registered = submit_registration(&app, "Ana", "ana@example.com").await;
    assert_eq!(registered["emailSent"], json!(false));
    let id = registered["registration"]["id"].as_str().unwrap();

    let (status, body) = send(
        &app,
        json_request(
            Method::PUT,
            &format!("/api/registrations/{}/allocation", id),
            Some(&admin),
            json!({ "allocatedCommittee": "UNHRC", "allocatedPortfolio": "Kenya" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["emailSent"], json!(false));
    assert_eq!(body["registration"]["allocatedPortfolio"], json!("Kenya"));
}

#[tokio::test]
async fn test_status_and_payment_updates() {
    let app = spawn_app().await;
    let admin = admin_token(&app).await;
    let registered = submit_registration(&app, "Ana", "ana@example.com").await;
    let id = registered["registration"]["id"].as_str().unwrap();

    let (status, body) = send(
        &app,
        json_request(
            Method::PUT,
            &format!("/api/registrations/{}/status", id),
            Some(&admin),
            json!({ "status": "confirmed", "adminNotes": "Paid at desk" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["registration"]["status"], json!("confirmed"));
    assert_eq!(body["registration"]["adminNotes"], json!("Paid at desk"));

    let (status, _) = send(
        &app,
        json_request(
            Method::PUT,
            &format!("/api/registrations/{}/status", id),
            Some(&admin),
            json!({ "status": "pending" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        json_request(
            Method::PUT,
            &format!("/api/registrations/{}/status", id),
            Some(&admin),
            json!({ "status": "approved" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &app,
        json_request(
            Method::PUT,
            &format!("/api/registrations/{}/payment", id),
            Some(&admin),
            json!({ "paymentStatus": "paid" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["registration"]["paymentStatus"], json!("paid"));

    let (_, body) = send(&app, get("/api/registrations?paymentStatus=paid", Some(&admin))).await;
    assert_eq!(body["total"], json!(1));
    let (_, body) = send(&app, get("/api/registrations?status=pending", Some(&admin))).await;
    assert_eq!(body["total"], json!(0));
}

#[tokio::test]
async fn test_delete_registration_removes_documents() {
    let app = spawn_app().await;
    let admin = admin_token(&app).await;

    let (status, body) = send(
        &app,
        multipart_request(
            &applicant_fields("Ana", "ana@example.com"),
            &[("munResume", "cv.pdf", b"%PDF-1.4 resume")],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["registration"]["id"].as_str().unwrap();
    let stored = body["registration"]["munResumePath"].as_str().unwrap();
    let on_disk = app.uploads.path().join(stored.trim_start_matches(PUBLIC_PREFIX));
    assert!(on_disk.exists());

    let (status, _) = send(&app, delete(&format!("/api/registrations/{}", id), &admin)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!on_disk.exists());

    let (status, _) = send(&app, delete(&format!("/api/registrations/{}", id), &admin)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_pricing_and_popup_get_or_init() {
    let app = spawn_app().await;
    let admin = admin_token(&app).await;

    let (status, body) = send(&app, get("/api/pricing", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pricing"]["currency"], json!("INR"));
    assert_eq!(body["pricing"]["registrationOpen"], json!(true));

    let (status, body) = send(
        &app,
        json_request(
            Method::PUT,
            "/api/pricing",
            Some(&admin),
            json!({ "delegateFee": 3000, "currency": "npr" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pricing"]["currency"], json!("NPR"));
    assert_eq!(body["currentFee"], json!(3000));

    let (_, body) = send(&app, get("/api/pricing", None)).await;
    assert_eq!(body["pricing"]["delegateFee"], json!(3000));

    let (status, body) = send(&app, get("/api/popup", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["popup"]["enabled"], json!(false));

    let (status, body) = send(
        &app,
        json_request(
            Method::PUT,
            "/api/popup",
            Some(&admin),
            json!({ "enabled": true, "title": "Early bird closes soon", "ctaLink": "/register" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["popup"]["enabled"], json!(true));

    let (status, _) = send(
        &app,
        json_request(
            Method::PUT,
            "/api/popup",
            Some(&admin),
            json!({ "ctaLink": "javascript:alert(1)" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_closed_registration_is_refused() {
    let app = spawn_app().await;
    let admin = admin_token(&app).await;

    send(
        &app,
        json_request(
            Method::PUT,
            "/api/pricing",
            Some(&admin),
            json!({ "registrationOpen": false }),
        ),
    )
    .await;

    let (status, _) = send(
        &app,
        multipart_request(&applicant_fields("Ana", "ana@example.com"), &[]),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_contact_flow_and_dashboard() {
    let app = spawn_app().await;
    let admin = admin_token(&app).await;
    submit_registration(&app, "Ana", "ana@example.com").await;

    let (status, body) = send(
        &app,
        json_request(
            Method::POST,
            "/api/contacts",
            None,
            json!({
                "name": "Parent",
                "email": "parent@example.com",
                "subject": "Accommodation",
                "message": "Is housing available for outstation delegates?",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let contact_id = body["contact"]["id"].as_str().unwrap().to_string();

    let (_, body) = send(&app, get("/api/dashboard/stats", Some(&admin))).await;
    assert_eq!(body["stats"]["totalRegistrations"], json!(1));
    assert_eq!(body["stats"]["pendingContacts"], json!(1));

    let (status, body) = send(
        &app,
        json_request(
            Method::PUT,
            &format!("/api/contacts/{}", contact_id),
            Some(&admin),
            json!({ "status": "resolved", "notes": "Replied by phone" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["contact"]["status"], json!("resolved"));

    let (_, body) = send(&app, get("/api/contacts?status=pending", Some(&admin))).await;
    assert_eq!(body["total"], json!(0));

    let (status, _) = send(&app, delete(&format!("/api/contacts/{}", contact_id), &admin)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_public_writes_are_rate_limited() {
    let app = spawn_app_with(
        |config| {
            config.rate_limit.enabled = true;
            config.rate_limit.public_requests_per_window = 2;
        },
        RecordingMailer::default(),
    )
    .await;

    let attempt = || {
        json_request(
            Method::POST,
            "/api/auth/login",
            None,
            json!({ "email": "x@example.com", "password": "wrong-password" }),
        )
    };

    for _ in 0..2 {
        let (status, _) = send(&app, attempt()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    let response = app.router.clone().oneshot(attempt()).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("retry-after"));

    // Reads are not limited
    let (status, _) = send(&app, get("/api/committees", None)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_rate_limit_keys_on_peer_address() {
    let app = spawn_app_with(
        |config| {
            config.rate_limit.enabled = true;
            config.rate_limit.public_requests_per_window = 2;
        },
        RecordingMailer::default(),
    )
    .await;

    let attempt = |peer: &str, forwarded_for: &str| {
        let mut request = json_request(
            Method::POST,
            "/api/auth/login",
            None,
            json!({ "email": "x@example.com", "password": "wrong-password" }),
        );
        request
            .headers_mut()
            .insert("x-forwarded-for", HeaderValue::from_str(forwarded_for).unwrap());
        let addr: SocketAddr = format!("{}:40000", peer).parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));
        request
    };

    // A rotating X-Forwarded-For does not earn a fresh bucket
    for n in 1..=2 {
        let (status, _) = send(&app, attempt("203.0.113.7", &format!("198.51.100.{}", n))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
    let (status, body) = send(&app, attempt("203.0.113.7", "198.51.100.3")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"]["code"], json!("too_many_requests"));

    // Other clients keep their own budget
    let (status, _) = send(&app, attempt("203.0.113.8", "198.51.100.3")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_malformed_requests_use_error_envelope() {
    let app = spawn_app().await;

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/contacts")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/json"
    );
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["error"]["code"], json!("bad_request"));
    assert_eq!(body["message"], json!("Request body is not valid JSON"));

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/contacts")
        .body(Body::from(r#"{"name":"Ana"}"#))
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], json!("bad_request"));

    // Well-formed JSON of the wrong shape
    let (status, body) = send(
        &app,
        json_request(Method::POST, "/api/contacts", None, json!({ "name": 7 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], json!("validation_error"));

    let admin = admin_token(&app).await;
    let (status, body) = send(&app, get("/api/registrations?page=abc", Some(&admin))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], json!("validation_error"));

    let (status, body) = send(
        &app,
        get("/api/registrations?page=9223372036854775807", Some(&admin)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["registrations"], json!([]));

    // Registration needs multipart
    let (status, body) = send(
        &app,
        json_request(Method::POST, "/api/registrations", None, json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], json!("bad_request"));
}

#[tokio::test]
async fn test_email_health_reports_unreachable_relay() {
    let app = spawn_app_with(|_| {}, RecordingMailer::failing()).await;
    let (status, body) = send(&app, get("/api/health/email", None)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["status"], json!("error"));
}

#[tokio::test]
async fn test_health_and_unknown_routes() {
    let app = spawn_app().await;

    let (status, body) = send(&app, get("/api/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("ok"));

    let (status, body) = send(&app, get("/api/health/database", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["latencyMs"].is_u64());

    let (_, body) = send(&app, get("/api/health/payment", None)).await;
    assert_eq!(body["simulated"], json!(true));

    let (status, body) = send(&app, get("/api/health/email", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["simulated"], json!(false));
    assert_eq!(body["status"], json!("ok"));

    let (status, body) = send(&app, get("/api/does-not-exist", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["error"]["code"], json!("not_found"));
}

#[tokio::test]
async fn test_profile_and_password_change() {
    let app = spawn_app().await;
    let registered = submit_registration(&app, "Ana", "ana@example.com").await;
    let token = registered["token"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        json_request(
            Method::PUT,
            "/api/auth/profile",
            Some(&token),
            json!({ "lastName": "Thapa" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["lastName"], json!("Thapa"));
    assert_eq!(body["user"]["firstName"], json!("Ana"));

    let (status, _) = send(
        &app,
        json_request(
            Method::PUT,
            "/api/auth/password",
            Some(&token),
            json!({ "currentPassword": "wrong", "newPassword": "a-better-password" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        json_request(
            Method::PUT,
            "/api/auth/password",
            Some(&token),
            json!({ "currentPassword": "IamAna1!@#", "newPassword": "a-better-password" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    login(&app, "ana@example.com", "a-better-password").await;

    let (status, _) = send(
        &app,
        json_request(Method::POST, "/api/auth/logout", Some(&token), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}
