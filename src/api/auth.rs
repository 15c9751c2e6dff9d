// src/api/auth.rs

use std::rc::Rc;
use std::task::{Context, Poll};

use actix_web::body::MessageBody;
use actix_web::cookie::Cookie;
use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::{post, web, Error, HttpMessage, HttpResponse};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{Duration, Utc};
use futures_util::future::{ready, LocalBoxFuture, Ready};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{Principal, User};
use crate::{db, AppState};

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: Uuid,
    exp: usize,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SignupRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthResponse {
    pub success: bool,
    pub token: String,
    pub user: User,
}

const MIN_PASSWORD_LEN: usize = 6;

impl SignupRequest {
    fn validate(&self) -> Result<(), AppError> {
        if self.name.trim().is_empty() {
            return Err(AppError::validation("Name is required"));
        }
        let email = self.email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(AppError::validation("A valid email is required"));
        }
        if self.password.len() < MIN_PASSWORD_LEN {
            return Err(AppError::validation(format!(
                "Password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        Ok(())
    }
}

#[utoipa::path(
    post,
    path = "/api/signup",
    tag = "auth",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "Account created", body = AuthResponse),
        (status = 400, description = "Invalid input or email already registered")
    )
)]
#[post("/signup")]
pub async fn signup(
    state: web::Data<AppState>,
    payload: web::Json<SignupRequest>,
) -> Result<HttpResponse, AppError> {
    payload.validate()?;
    let email = payload.email.trim().to_lowercase();

    if db::get_user_by_email(&state.pool, &email).await?.is_some() {
        return Err(AppError::validation("User with this email already exists"));
    }

    let password_hash = hash(&payload.password, DEFAULT_COST)
        .map_err(|e| AppError::Internal(format!("bcrypt hash error: {e}")))?;

    let user = match db::create_user(&state.pool, payload.name.trim(), &email, &password_hash).await
    {
        Ok(u) => u,
        // lost a race with a concurrent signup for the same email
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            return Err(AppError::validation("User with this email already exists"));
        }
        Err(e) => return Err(e.into()),
    };

    let token = issue_token(&state.config.jwt_secret, state.config.jwt_ttl_hours, user.id)?;
    log::info!("user signed up user_id={}", user.id);

    Ok(HttpResponse::Created().json(AuthResponse {
        success: true,
        token,
        user,
    }))
}

#[utoipa::path(
    post,
    path = "/api/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = AuthResponse),
        (status = 401, description = "Invalid email or password")
    )
)]
#[post("/login")]
pub async fn login(
    state: web::Data<AppState>,
    payload: web::Json<LoginRequest>,
) -> Result<HttpResponse, AppError> {
    let invalid = || AppError::Unauthorized("Invalid email or password".to_string());
    let email = payload.email.trim().to_lowercase();

    let user = db::get_user_by_email(&state.pool, &email)
        .await?
        .ok_or_else(invalid)?;

    let matches = verify(&payload.password, &user.password_hash)
        .map_err(|e| AppError::Internal(format!("bcrypt verify error: {e}")))?;
    if !matches {
        return Err(invalid());
    }

    let token = issue_token(&state.config.jwt_secret, state.config.jwt_ttl_hours, user.id)?;

    Ok(HttpResponse::Ok().json(AuthResponse {
        success: true,
        token,
        user,
    }))
}

/// Tokens are stateless, so this only clears a `token` cookie a browser
/// client may hold; the bearer token stays valid until it expires.
#[utoipa::path(
    post,
    path = "/api/logout",
    tag = "auth",
    responses(
        (status = 200, description = "Logged out"),
        (status = 401, description = "Missing or invalid token")
    ),
    security(("bearer" = []))
)]
#[post("/logout")]
pub async fn logout(principal: web::ReqData<Principal>) -> HttpResponse {
    let mut cookie = Cookie::new("token", "");
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie.make_removal();

    log::info!("user logged out user_id={}", principal.user_id);

    HttpResponse::Ok().cookie(cookie).json(json!({
        "success": true,
        "message": "Successfully logged out"
    }))
}

pub fn issue_token(secret: &str, ttl_hours: i64, user_id: Uuid) -> Result<String, AppError> {
    let expiration = Utc::now()
        .checked_add_signed(Duration::hours(ttl_hours))
        .ok_or_else(|| AppError::Internal("token expiry overflow".to_string()))?
        .timestamp() as usize;

    let claims = Claims {
        sub: user_id,
        exp: expiration,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("jwt encode error: {e}")))
}

/// Validates a bearer token and returns the caller it was issued to.
pub fn verify_token(secret: &str, token: &str) -> Result<Principal, AppError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| Principal {
        user_id: data.claims.sub,
    })
    .map_err(|_| AppError::Unauthorized("Invalid token".to_string()))
}

fn bearer_token(req: &ServiceRequest) -> Result<&str, AppError> {
    let header = req
        .headers()
        .get(actix_web::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Authorization header is required".to_string()))?;

    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Unauthorized("Invalid token format".to_string()))
}

/// Middleware that:
/// - takes `Authorization: Bearer <jwt>`
/// - validates the JWT against the configured secret
/// - puts a [`Principal`] into `req.extensions_mut()` for `web::ReqData<Principal>`
pub struct JwtMiddleware {
    secret: Rc<str>,
}

impl JwtMiddleware {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: Rc::from(secret),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for JwtMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = JwtMiddlewareInner<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(JwtMiddlewareInner {
            service,
            secret: Rc::clone(&self.secret),
        }))
    }
}

pub struct JwtMiddlewareInner<S> {
    service: S,
    secret: Rc<str>,
}

impl<S, B> Service<ServiceRequest> for JwtMiddlewareInner<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let principal = bearer_token(&req).and_then(|token| verify_token(&self.secret, token));

        match principal {
            Ok(principal) => {
                req.extensions_mut().insert(principal);
                let fut = self.service.call(req);
                Box::pin(async move { fut.await })
            }
            Err(e) => Box::pin(async move { Err(e.into()) }),
        }
    }
}
