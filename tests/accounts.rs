use actix_web::test::TestRequest;
use actix_web::{http::StatusCode, test, web, App};
use serde_json::{json, Value};
use sqlx::Row;
use uuid::Uuid;

use lms_backend::api::auth::{logout, JwtMiddleware};
use lms_backend::api::json_config;
use lms_backend::api::users::{get_profile, update_profile};

mod support;

#[actix_web::test]
async fn profile_is_read_and_renamed_for_the_caller_only() {
    let test_db = support::init_test_db().await;
    let pool = &test_db.pool;
    let state = support::build_state(pool.clone(), support::FakeGateway::new());
    let student = support::insert_user(pool, "student").await;
    let other = support::insert_user(pool, "student").await;

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state))
            .app_data(json_config())
            .service(
                web::scope("/api")
                    .wrap(JwtMiddleware::new(support::JWT_SECRET))
                    .service(get_profile)
                    .service(update_profile),
            ),
    )
    .await;

    let req = TestRequest::get()
        .uri("/api/user/profile")
        .insert_header(support::bearer(student))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["user"]["id"], student.to_string());
    assert!(body["user"].get("password_hash").is_none());

    let req = TestRequest::put()
        .uri("/api/user/profile")
        .insert_header(support::bearer(student))
        .set_json(json!({"name": "  Barbara Liskov  ", "email": "ignored@example.com", "role": "educator"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["user"]["name"], "Barbara Liskov");
    assert_eq!(body["user"]["role"], "student");

    let row = sqlx::query("SELECT name, email, role FROM users WHERE id = $1")
        .bind(student)
        .fetch_one(pool)
        .await
        .unwrap();
    assert_eq!(row.get::<String, _>("name"), "Barbara Liskov");
    assert_ne!(row.get::<String, _>("email"), "ignored@example.com");
    assert_eq!(row.get::<String, _>("role"), "student");

    let untouched: String = sqlx::query("SELECT name FROM users WHERE id = $1")
        .bind(other)
        .fetch_one(pool)
        .await
        .unwrap()
        .get("name");
    assert_ne!(untouched, "Barbara Liskov");

    let req = TestRequest::put()
        .uri("/api/user/profile")
        .insert_header(support::bearer(student))
        .set_json(json!({"name": "   "}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body, json!({"success": false, "message": "Name is required"}));
}

#[actix_web::test]
async fn profile_of_deleted_account_is_not_found() {
    let test_db = support::init_test_db().await;
    let pool = &test_db.pool;
    let state = support::build_state(pool.clone(), support::FakeGateway::new());
    let ghost = Uuid::new_v4();

    let app = test::init_service(
        App::new().app_data(web::Data::new(state)).service(
            web::scope("/api")
                .wrap(JwtMiddleware::new(support::JWT_SECRET))
                .service(get_profile)
                .service(update_profile),
        ),
    )
    .await;

    let req = TestRequest::get()
        .uri("/api/user/profile")
        .insert_header(support::bearer(ghost))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let req = TestRequest::put()
        .uri("/api/user/profile")
        .insert_header(support::bearer(ghost))
        .set_json(json!({"name": "Nobody"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn logout_clears_the_token_cookie() {
    let test_db = support::init_test_db().await;
    let pool = &test_db.pool;
    let state = support::build_state(pool.clone(), support::FakeGateway::new());
    let student = support::insert_user(pool, "student").await;

    let app = test::init_service(
        App::new().app_data(web::Data::new(state)).service(
            web::scope("/api")
                .wrap(JwtMiddleware::new(support::JWT_SECRET))
                .service(logout),
        ),
    )
    .await;

    let req = TestRequest::post()
        .uri("/api/logout")
        .insert_header(support::bearer(student))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let cookie = resp
        .response()
        .cookies()
        .find(|c| c.name() == "token")
        .expect("token cookie");
    assert_eq!(cookie.value(), "");
    assert_eq!(cookie.path(), Some("/"));
    assert_eq!(cookie.max_age().map(|d| d.whole_seconds()), Some(0));

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body, json!({"success": true, "message": "Successfully logged out"}));

    let req = TestRequest::post().uri("/api/logout").to_request();
    let err = match test::try_call_service(&app, req).await {
        Ok(r) => panic!("expected error, got {}", r.status()),
        Err(e) => e,
    };
    assert_eq!(err.error_response().status(), StatusCode::UNAUTHORIZED);
}
