#![allow(dead_code)]

use std::collections::HashMap;
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgPool;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use lms_backend::api::auth::issue_token;
use lms_backend::config::Config;
use lms_backend::gateway::{
    CheckoutGateway, CheckoutSession, CheckoutSessionRequest, GatewayError, SessionStatus,
};
use lms_backend::AppState;

pub const JWT_SECRET: &str = "test-jwt-secret";
pub const WEBHOOK_SECRET: &str = "whsec_test";

fn split_db_url(url: &str) -> Result<(String, String), String> {
    let (base, query) = match url.split_once('?') {
        Some((base, query)) => (base.to_string(), Some(query)),
        None => (url.to_string(), None),
    };

    let db_start = base
        .rfind('/')
        .ok_or_else(|| "invalid database url".to_string())?;
    if db_start + 1 >= base.len() {
        return Err("database name is empty".to_string());
    }

    let db_name = base[db_start + 1..].to_string();
    let mut admin_url = format!("{}postgres", &base[..db_start + 1]);
    if let Some(query) = query {
        admin_url = format!("{admin_url}?{query}");
    }

    Ok((admin_url, db_name))
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

static TEST_DB_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

pub struct TestDb {
    pub pool: PgPool,
    _guard: MutexGuard<'static, ()>,
}

pub async fn init_test_db() -> TestDb {
    dotenvy::dotenv().ok();
    let test_url = env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set");
    let (admin_url, db_name) =
        split_db_url(&test_url).expect("invalid TEST_DATABASE_URL format");

    let lock = TEST_DB_LOCK.get_or_init(|| Mutex::new(()));
    let guard = lock.lock().await;

    let admin_pool = PgPool::connect(&admin_url)
        .await
        .expect("connect admin db");

    let _ = sqlx::query("SELECT pg_advisory_lock(424242)")
        .execute(&admin_pool)
        .await;

    let quoted_name = quote_identifier(&db_name);
    let drop_sql = format!("DROP DATABASE IF EXISTS {quoted_name} WITH (FORCE)");
    let create_sql = format!("CREATE DATABASE {quoted_name}");

    let _ = sqlx::query(&drop_sql).execute(&admin_pool).await;
    if let Err(e) = sqlx::query(&create_sql).execute(&admin_pool).await {
        eprintln!("create test db error: {e}");
        let _ = sqlx::query(&drop_sql).execute(&admin_pool).await;
        sqlx::query(&create_sql)
            .execute(&admin_pool)
            .await
            .expect("create test db retry");
    }

    let _ = sqlx::query("SELECT pg_advisory_unlock(424242)")
        .execute(&admin_pool)
        .await;

    admin_pool.close().await;

    let pool = PgPool::connect(&test_url)
        .await
        .expect("connect test db");
    sqlx::migrate!().run(&pool).await.expect("migrations");
    TestDb { pool, _guard: guard }
}

/// In-memory checkout provider. Sessions are created unpaid; tests flip
/// them with `mark_paid`.
#[derive(Default)]
pub struct FakeGateway {
    sessions: std::sync::Mutex<HashMap<String, SessionStatus>>,
    requests: std::sync::Mutex<Vec<CheckoutSessionRequest>>,
    fail: AtomicBool,
}

impl FakeGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_requests(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<CheckoutSessionRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Registers a session directly, bypassing `create_session`.
    pub fn put_session(&self, session_id: &str, payment_status: &str, reference: Option<Uuid>) {
        self.sessions.lock().unwrap().insert(
            session_id.to_string(),
            SessionStatus {
                payment_status: payment_status.to_string(),
                client_reference: reference.map(|r| r.to_string()),
            },
        );
    }

    pub fn mark_paid(&self, session_id: &str) {
        if let Some(s) = self.sessions.lock().unwrap().get_mut(session_id) {
            s.payment_status = "paid".to_string();
        }
    }
}

#[async_trait]
impl CheckoutGateway for FakeGateway {
    async fn create_session(
        &self,
        req: CheckoutSessionRequest,
    ) -> Result<CheckoutSession, GatewayError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(GatewayError::Timeout);
        }

        let id = format!("cs_test_{}", Uuid::new_v4().simple());
        self.sessions.lock().unwrap().insert(
            id.clone(),
            SessionStatus {
                payment_status: "unpaid".to_string(),
                client_reference: Some(req.client_reference.clone()),
            },
        );
        self.requests.lock().unwrap().push(req);

        Ok(CheckoutSession {
            url: format!("https://checkout.test/pay/{id}"),
            id,
        })
    }

    async fn get_session(&self, session_id: &str) -> Result<SessionStatus, GatewayError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(GatewayError::Timeout);
        }

        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| GatewayError::Api {
                status: 404,
                body: "no such checkout session".to_string(),
            })
    }
}

pub fn test_config() -> Config {
    Config {
        database_url: String::new(),
        db_max_connections: 5,
        bind_addr: "127.0.0.1".to_string(),
        port: 0,
        jwt_secret: JWT_SECRET.to_string(),
        jwt_ttl_hours: 1,
        stripe_secret_key: "sk_test".to_string(),
        stripe_webhook_secret: Some(WEBHOOK_SECRET.to_string()),
        stripe_api_base: "http://localhost".to_string(),
        frontend_url: "http://frontend.test".to_string(),
        checkout_currency: "usd".to_string(),
        gateway_timeout: Duration::from_secs(1),
    }
}

pub fn build_state(pool: PgPool, gateway: Arc<FakeGateway>) -> AppState {
    AppState {
        pool,
        gateway,
        config: Arc::new(test_config()),
    }
}

pub async fn insert_user(pool: &PgPool, role: &str) -> Uuid {
    let suffix = Uuid::new_v4().simple().to_string();
    sqlx::query(
        r#"INSERT INTO users (name, email, password_hash, role)
           VALUES ($1, $2, 'test-hash', $3)
           RETURNING id"#,
    )
    .bind(format!("user_{suffix}"))
    .bind(format!("user_{suffix}@example.com"))
    .bind(role)
    .fetch_one(pool)
    .await
    .map(|row| sqlx::Row::get(&row, "id"))
    .expect("insert user")
}

pub async fn insert_course(pool: &PgPool, educator_id: Uuid, price: Decimal, discount: Decimal) -> Uuid {
    sqlx::query(
        r#"INSERT INTO courses (course_title, course_description, course_price, discount, educator_id)
           VALUES ('Test course', 'About testing', $1, $2, $3)
           RETURNING id"#,
    )
    .bind(price)
    .bind(discount)
    .bind(educator_id)
    .fetch_one(pool)
    .await
    .map(|row| sqlx::Row::get(&row, "id"))
    .expect("insert course")
}

/// Course with one chapter and the given number of lectures; returns the
/// course id and lecture ids in order.
pub async fn insert_course_with_lectures(
    pool: &PgPool,
    educator_id: Uuid,
    lectures: usize,
) -> (Uuid, Vec<Uuid>) {
    let course_id = insert_course(pool, educator_id, Decimal::from(10), Decimal::ZERO).await;
    let chapter_id: Uuid = sqlx::query(
        r#"INSERT INTO chapters (course_id, chapter_order, chapter_title)
           VALUES ($1, 1, 'Chapter 1')
           RETURNING id"#,
    )
    .bind(course_id)
    .fetch_one(pool)
    .await
    .map(|row| sqlx::Row::get(&row, "id"))
    .expect("insert chapter");

    let mut ids = Vec::with_capacity(lectures);
    for n in 0..lectures {
        let id: Uuid = sqlx::query(
            r#"INSERT INTO lectures (chapter_id, lecture_title, lecture_duration, lecture_url, lecture_order)
               VALUES ($1, $2, 10, 'https://videos.test/l', $3)
               RETURNING id"#,
        )
        .bind(chapter_id)
        .bind(format!("Lecture {n}"))
        .bind(n as i32 + 1)
        .fetch_one(pool)
        .await
        .map(|row| sqlx::Row::get(&row, "id"))
        .expect("insert lecture");
        ids.push(id);
    }

    (course_id, ids)
}

pub async fn enroll(pool: &PgPool, user_id: Uuid, course_id: Uuid) {
    sqlx::query("INSERT INTO user_courses (user_id, course_id) VALUES ($1, $2)")
        .bind(user_id)
        .bind(course_id)
        .execute(pool)
        .await
        .expect("enroll");
}

pub fn bearer(user_id: Uuid) -> (&'static str, String) {
    let token = issue_token(JWT_SECRET, 1, user_id).expect("issue token");
    ("Authorization", format!("Bearer {token}"))
}

pub async fn count(pool: &PgPool, sql: &str, user_id: Uuid, course_id: Uuid) -> i64 {
    sqlx::query_scalar(sql)
        .bind(user_id)
        .bind(course_id)
        .fetch_one(pool)
        .await
        .expect("count query")
}
