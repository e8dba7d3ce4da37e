use actix_web::{
    dev::ServiceResponse,
    http::{header, StatusCode},
    test,
    web::Data,
    App,
};
use serde_json::{json, Value};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use schwiftybox::{auth::AuthService, config::JwtConfig, configure, db, AppState};

async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!().run(&pool).await.unwrap();
    pool
}

async fn app_state() -> AppState {
    let pool = memory_pool().await;
    let auth = AuthService::new(
        pool.clone(),
        &JwtConfig {
            secret: "integration-secret".to_string(),
            ..JwtConfig::default()
        },
    );
    AppState::new(pool, auth)
}

macro_rules! app {
    ($state:expr) => {
        test::init_service(App::new().app_data(Data::new($state)).configure(configure)).await
    };
}

async fn json_body(resp: ServiceResponse) -> Value {
    let body = test::read_body(resp).await;
    if body.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&body).unwrap()
}

macro_rules! send {
    ($app:expr, $req:expr) => {{
        let resp = test::call_service(&$app, $req.to_request()).await;
        let status = resp.status();
        (status, json_body(resp).await)
    }};
}

fn bearer(token: &str) -> (header::HeaderName, String) {
    (header::AUTHORIZATION, format!("Bearer {}", token))
}

macro_rules! register_and_login {
    ($app:expr, $email:expr) => {{
        let req = test::TestRequest::post()
            .uri("/api/users")
            .set_json(json!({ "email": $email, "password": "password123" }));
        let (status, _) = send!($app, req);
        assert_eq!(status, StatusCode::CREATED);

        let req = test::TestRequest::post()
            .uri("/api/token")
            .set_json(json!({ "email": $email, "password": "password123" }));
        let (status, body) = send!($app, req);
        assert_eq!(status, StatusCode::OK);
        body
    }};
}

#[actix_web::test]
async fn register_login_refresh_and_create_items() {
    let app = app!(app_state().await);

    let req = test::TestRequest::post()
        .uri("/api/users")
        .set_json(json!({ "email": "alice@example.com", "password": "password123" }));
    let (status, body) = send!(app, req);
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body, json!({ "message": "User created successfully" }));

    let req = test::TestRequest::post()
        .uri("/api/token")
        .set_json(json!({ "email": "alice@example.com", "password": "password123" }));
    let (status, pair) = send!(app, req);
    assert_eq!(status, StatusCode::OK);
    let token = pair["token"].as_str().unwrap().to_string();
    let refresh_token = pair["refresh_token"].as_str().unwrap().to_string();
    assert!(!token.is_empty());
    assert_ne!(token, refresh_token);

    let req = test::TestRequest::post()
        .uri("/api/token")
        .set_json(json!({ "email": "alice@example.com", "password": "wrongpassword" }));
    let (status, body) = send!(app, req);
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({ "error": "Invalid credentials" }));

    let req = test::TestRequest::post()
        .uri("/api/refresh")
        .set_json(json!({ "refresh_token": refresh_token }));
    let (status, rotated) = send!(app, req);
    assert_eq!(status, StatusCode::OK);
    assert_ne!(rotated["token"], pair["token"]);
    assert_ne!(rotated["refresh_token"], pair["refresh_token"]);

    let new_token = rotated["token"].as_str().unwrap();
    let mut backpack_ids = Vec::new();
    for name in ["Tent", "Stove"] {
        let req = test::TestRequest::post()
            .uri("/api/items")
            .insert_header(bearer(new_token))
            .set_json(json!({ "name": name }));
        let (status, item) = send!(app, req);
        assert_eq!(status, StatusCode::CREATED);
        backpack_ids.push(item["backpack_id"].as_str().unwrap().to_string());
    }
    assert_eq!(backpack_ids, vec!["ALI0001", "ALI0002"]);
}

#[actix_web::test]
async fn duplicate_registration_conflicts() {
    let app = app!(app_state().await);
    register_and_login!(app, "bob@example.com");

    let req = test::TestRequest::post()
        .uri("/api/users")
        .set_json(json!({ "email": "bob@example.com", "password": "password123" }));
    let (status, body) = send!(app, req);
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body, json!({ "error": "User already exists" }));
}

#[actix_web::test]
async fn malformed_input_is_bad_request() {
    let app = app!(app_state().await);

    let req = test::TestRequest::post()
        .uri("/api/users")
        .insert_header((header::CONTENT_TYPE, "application/json"))
        .set_payload("{not json");
    let (status, body) = send!(app, req);
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().starts_with("Invalid input"));

    let req = test::TestRequest::post()
        .uri("/api/users")
        .set_json(json!({ "email": "not-an-email", "password": "password123" }));
    let (status, _) = send!(app, req);
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let req = test::TestRequest::post()
        .uri("/api/users")
        .set_json(json!({ "email": "short@example.com", "password": "12345" }));
    let (status, _) = send!(app, req);
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn verify_reports_the_subject() {
    let app = app!(app_state().await);
    let pair = register_and_login!(app, "carol@example.com");

    let req = test::TestRequest::post()
        .uri("/api/token/verify")
        .set_json(json!({ "token": pair["token"] }));
    let (status, body) = send!(app, req);
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "valid": true, "email": "carol@example.com" }));

    let req = test::TestRequest::post()
        .uri("/api/token/verify")
        .set_json(json!({ "token": pair["refresh_token"] }));
    let (status, body) = send!(app, req);
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({ "error": "Invalid token" }));
}

#[actix_web::test]
async fn protected_routes_require_an_access_token() {
    let app = app!(app_state().await);
    let pair = register_and_login!(app, "dave@example.com");

    let (status, body) = send!(app, test::TestRequest::get().uri("/api/items"));
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({ "error": "Authorization header required" }));

    let req = test::TestRequest::get()
        .uri("/api/items")
        .insert_header(bearer(pair["refresh_token"].as_str().unwrap()));
    let (status, _) = send!(app, req);
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let req = test::TestRequest::get()
        .uri("/api/items")
        .insert_header(bearer(pair["token"].as_str().unwrap()));
    let (status, body) = send!(app, req);
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "items": [] }));
}

#[actix_web::test]
async fn refresh_after_account_deletion_is_rejected() {
    let app = app!(app_state().await);
    let pair = register_and_login!(app, "erin@example.com");

    let req = test::TestRequest::delete()
        .uri("/api/users/erin@example.com")
        .insert_header(bearer(pair["token"].as_str().unwrap()));
    let (status, _) = send!(app, req);
    assert_eq!(status, StatusCode::NO_CONTENT);

    let req = test::TestRequest::post()
        .uri("/api/refresh")
        .set_json(json!({ "refresh_token": pair["refresh_token"] }));
    let (status, body) = send!(app, req);
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({ "error": "User not found" }));

    let req = test::TestRequest::post()
        .uri("/api/refresh")
        .set_json(json!({ "refresh_token": "garbage" }));
    let (status, body) = send!(app, req);
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({ "error": "Invalid refresh token" }));
}

#[actix_web::test]
async fn users_only_see_their_own_account() {
    let app = app!(app_state().await);
    let frank = register_and_login!(app, "frank@example.com");
    register_and_login!(app, "grace@example.com");

    let req = test::TestRequest::get()
        .uri("/api/users/grace@example.com")
        .insert_header(bearer(frank["token"].as_str().unwrap()));
    let (status, _) = send!(app, req);
    assert_eq!(status, StatusCode::FORBIDDEN);

    let req = test::TestRequest::get()
        .uri("/api/users/frank@example.com")
        .insert_header(bearer(frank["token"].as_str().unwrap()));
    let (status, body) = send!(app, req);
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "frank@example.com");
    assert_eq!(body["prefix"], "FRA");
    assert!(body.get("password").is_none());

    let (status, body) = send!(app, test::TestRequest::get().uri("/api/users"));
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "total": 2 }));
}

#[actix_web::test]
async fn password_reset_flow() {
    let state = app_state().await;
    let pool = state.db_pool.clone();
    let app = app!(state);
    register_and_login!(app, "heidi@example.com");

    let req = test::TestRequest::post()
        .uri("/api/users/reset-password")
        .set_json(json!({ "username": "nobody@example.com" }));
    let (status, _) = send!(app, req);
    assert_eq!(status, StatusCode::NOT_FOUND);

    let req = test::TestRequest::post()
        .uri("/api/users/reset-password")
        .set_json(json!({ "username": "heidi@example.com" }));
    let (status, _) = send!(app, req);
    assert_eq!(status, StatusCode::OK);

    let token: String =
        sqlx::query_scalar("SELECT token FROM reset_tokens WHERE user_email = $1")
            .bind("heidi@example.com")
            .fetch_one(&pool)
            .await
            .unwrap();

    let req = test::TestRequest::post()
        .uri("/api/users/send-password")
        .set_json(json!({ "password": "newpassword", "token": token }));
    let (status, _) = send!(app, req);
    assert_eq!(status, StatusCode::OK);

    let req = test::TestRequest::post()
        .uri("/api/users/send-password")
        .set_json(json!({ "password": "again123", "token": token }));
    let (status, body) = send!(app, req);
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "Invalid or expired token" }));

    let req = test::TestRequest::post()
        .uri("/api/token")
        .set_json(json!({ "email": "heidi@example.com", "password": "newpassword" }));
    let (status, _) = send!(app, req);
    assert_eq!(status, StatusCode::OK);

    assert!(db::find_user(&pool, "heidi@example.com").await.unwrap().is_some());
}

#[actix_web::test]
async fn tags_attach_to_items() {
    let app = app!(app_state().await);
    let pair = register_and_login!(app, "ivan@example.com");
    let token = pair["token"].as_str().unwrap();

    let req = test::TestRequest::post()
        .uri("/api/tags")
        .insert_header(bearer(token))
        .set_json(json!({ "name": "camping" }));
    let (status, tag) = send!(app, req);
    assert_eq!(status, StatusCode::CREATED);

    let req = test::TestRequest::post()
        .uri("/api/tags")
        .insert_header(bearer(token))
        .set_json(json!({ "name": "camping" }));
    let (status, _) = send!(app, req);
    assert_eq!(status, StatusCode::CONFLICT);

    let req = test::TestRequest::post()
        .uri("/api/items")
        .insert_header(bearer(token))
        .set_json(json!({ "name": "Lantern", "description": "battery powered" }));
    let (_, item) = send!(app, req);

    let req = test::TestRequest::patch()
        .uri(&format!("/api/items/{}", item["id"]))
        .insert_header(bearer(token))
        .set_json(json!({ "tags": [tag["id"]] }));
    let (status, updated) = send!(app, req);
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["tags"][0]["name"], "camping");
    assert_eq!(updated["backpack_id"], "IVA0001");

    let req = test::TestRequest::get()
        .uri(&format!("/api/tags/{}/items", tag["id"]))
        .insert_header(bearer(token))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["items"][0]["name"], "Lantern");
}

#[actix_web::test]
async fn changing_email_keeps_items_and_memberships() {
    let app = app!(app_state().await);
    let judy = register_and_login!(app, "judy@example.com");
    register_and_login!(app, "kate@example.com");
    let token = judy["token"].as_str().unwrap();

    let req = test::TestRequest::post()
        .uri("/api/items")
        .insert_header(bearer(token))
        .set_json(json!({ "name": "Compass" }));
    let (status, _) = send!(app, req);
    assert_eq!(status, StatusCode::CREATED);

    let req = test::TestRequest::put()
        .uri("/api/users/kate@example.com")
        .insert_header(bearer(token))
        .set_json(json!({ "email": "stolen@example.com" }));
    let (status, _) = send!(app, req);
    assert_eq!(status, StatusCode::FORBIDDEN);

    let req = test::TestRequest::put()
        .uri("/api/users/judy@example.com")
        .insert_header(bearer(token))
        .set_json(json!({ "email": "kate@example.com" }));
    let (status, body) = send!(app, req);
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body, json!({ "error": "Email already in use" }));

    let req = test::TestRequest::put()
        .uri("/api/users/judy@example.com")
        .insert_header(bearer(token))
        .set_json(json!({ "email": "not-an-email" }));
    let (status, _) = send!(app, req);
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let req = test::TestRequest::put()
        .uri("/api/users/judy@example.com")
        .insert_header(bearer(token))
        .set_json(json!({ "email": "Judy.New@Example.com" }));
    let (status, body) = send!(app, req);
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "email": "judy.new@example.com" }));

    let req = test::TestRequest::post()
        .uri("/api/token")
        .set_json(json!({ "email": "judy.new@example.com", "password": "password123" }));
    let (status, pair) = send!(app, req);
    assert_eq!(status, StatusCode::OK);
    let new_token = pair["token"].as_str().unwrap();

    let req = test::TestRequest::get()
        .uri("/api/items")
        .insert_header(bearer(new_token));
    let (status, body) = send!(app, req);
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"][0]["name"], "Compass");
    assert_eq!(body["items"][0]["backpack_id"], "JUD0001");

    let req = test::TestRequest::get()
        .uri("/api/organizations")
        .insert_header(bearer(new_token));
    let (status, body) = send!(app, req);
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["name"], "judy@example.com_org");
}

#[actix_web::test]
async fn switching_active_organization_requires_membership() {
    let app = app!(app_state().await);
    let leo = register_and_login!(app, "leo@example.com");
    let mia = register_and_login!(app, "mia@example.com");
    let leo_token = leo["token"].as_str().unwrap();

    let req = test::TestRequest::get()
        .uri("/api/organizations")
        .insert_header(bearer(leo_token));
    let (status, orgs) = send!(app, req);
    assert_eq!(status, StatusCode::OK);
    assert_eq!(orgs.as_array().unwrap().len(), 1);
    assert_eq!(orgs[0]["name"], "leo@example.com_org");
    let own_id = orgs[0]["id"].clone();

    let req = test::TestRequest::get()
        .uri("/api/users/mia@example.com")
        .insert_header(bearer(mia["token"].as_str().unwrap()));
    let (_, mia_profile) = send!(app, req);
    let foreign_id = mia_profile["active_organization_id"].clone();
    assert_ne!(foreign_id, own_id);

    let req = test::TestRequest::put()
        .uri("/api/organizations/active")
        .insert_header(bearer(leo_token))
        .set_json(json!({ "organization_id": foreign_id }));
    let (status, body) = send!(app, req);
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({ "error": "Organization not found" }));

    let req = test::TestRequest::put()
        .uri("/api/organizations/active")
        .insert_header(bearer(leo_token))
        .set_json(json!({ "organization_id": own_id }));
    let (status, body) = send!(app, req);
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "active_organization_id": own_id }));

    let (status, _) = send!(app, test::TestRequest::get().uri("/api/organizations"));
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn tags_are_deleted_only_within_the_active_organization() {
    let app = app!(app_state().await);
    let nina = register_and_login!(app, "nina@example.com");
    let omar = register_and_login!(app, "omar@example.com");
    let nina_token = nina["token"].as_str().unwrap();

    let req = test::TestRequest::post()
        .uri("/api/tags")
        .insert_header(bearer(nina_token))
        .set_json(json!({ "name": "fragile" }));
    let (status, tag) = send!(app, req);
    assert_eq!(status, StatusCode::CREATED);
    let uri = format!("/api/tags/{}", tag["id"]);

    let req = test::TestRequest::delete()
        .uri(&uri)
        .insert_header(bearer(omar["token"].as_str().unwrap()));
    let (status, body) = send!(app, req);
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({ "error": "Tag not found" }));

    let req = test::TestRequest::delete()
        .uri(&uri)
        .insert_header(bearer(nina_token));
    let (status, body) = send!(app, req);
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);

    let req = test::TestRequest::get()
        .uri("/api/tags")
        .insert_header(bearer(nina_token));
    let (status, body) = send!(app, req);
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));

    let req = test::TestRequest::delete()
        .uri(&uri)
        .insert_header(bearer(nina_token));
    let (status, _) = send!(app, req);
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn deactivation_is_acknowledged_for_authenticated_users() {
    let app = app!(app_state().await);
    let pair = register_and_login!(app, "pia@example.com");

    let (status, _) = send!(app, test::TestRequest::post().uri("/api/users/deactivate"));
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let req = test::TestRequest::post()
        .uri("/api/users/deactivate")
        .insert_header(bearer(pair["token"].as_str().unwrap()));
    let (status, body) = send!(app, req);
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "message": "User deactivated successfully" }));

    let req = test::TestRequest::post()
        .uri("/api/token")
        .set_json(json!({ "email": "pia@example.com", "password": "password123" }));
    let (status, _) = send!(app, req);
    assert_eq!(status, StatusCode::OK);
}
