// src/api/purchases.rs

use actix_web::{get, post, web, HttpResponse};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::api::parse_id;
use crate::error::AppError;
use crate::models::Principal;
use crate::{billing, AppState};

#[derive(Debug, Serialize, ToSchema)]
pub struct PurchaseResponse {
    pub success: bool,
    pub purchase_id: Uuid,
    pub checkout_url: String,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct VerifyPaymentQuery {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub course_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct VerifyPaymentResponse {
    pub success: bool,
    pub message: String,
}

/// Creates a pending purchase for the course and returns the hosted
/// checkout URL the client should redirect to.
#[utoipa::path(
    post,
    path = "/api/user/purchase/{course_id}",
    tag = "purchases",
    params(("course_id" = String, Path, description = "Course to buy")),
    responses(
        (status = 200, description = "Checkout session created", body = PurchaseResponse),
        (status = 400, description = "Malformed course id"),
        (status = 401, description = "Missing or invalid token"),
        (status = 404, description = "User or course not found"),
        (status = 500, description = "Ledger or payment provider failure")
    ),
    security(("bearer" = []))
)]
#[post("/user/purchase/{course_id}")]
pub async fn purchase_course(
    state: web::Data<AppState>,
    principal: web::ReqData<Principal>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let course_id = parse_id(&path.into_inner(), "Course ID")?;

    let initiated = billing::initiate_purchase(
        &state.pool,
        state.gateway.as_ref(),
        &state.config,
        principal.into_inner(),
        course_id,
    )
    .await?;

    Ok(HttpResponse::Ok().json(PurchaseResponse {
        success: true,
        purchase_id: initiated.purchase_id,
        checkout_url: initiated.checkout_url,
    }))
}

/// Confirms the checkout session with the provider, then enrolls the caller
/// and completes the purchase. Safe to call repeatedly.
#[utoipa::path(
    get,
    path = "/api/user/verify-payment",
    tag = "purchases",
    params(VerifyPaymentQuery),
    responses(
        (status = 200, description = "Payment verified and enrollment recorded", body = VerifyPaymentResponse),
        (status = 400, description = "Missing session_id or course_id"),
        (status = 401, description = "Missing or invalid token"),
        (status = 402, description = "Payment not completed"),
        (status = 403, description = "Session belongs to another purchase"),
        (status = 404, description = "User or course not found"),
        (status = 500, description = "Ledger or payment provider failure")
    ),
    security(("bearer" = []))
)]
#[get("/user/verify-payment")]
pub async fn verify_payment(
    state: web::Data<AppState>,
    principal: web::ReqData<Principal>,
    query: web::Query<VerifyPaymentQuery>,
) -> Result<HttpResponse, AppError> {
    let session_id = query.session_id.trim();
    if session_id.is_empty() || query.course_id.trim().is_empty() {
        return Err(AppError::validation("Session ID and Course ID are required"));
    }
    let course_id = parse_id(&query.course_id, "Course ID")?;

    let reconciled = billing::reconcile_purchase(
        &state.pool,
        state.gateway.as_ref(),
        principal.into_inner(),
        session_id,
        course_id,
    )
    .await?;

    let message = if reconciled.newly_enrolled {
        "Payment verified, course enrolled, and payment status updated successfully"
    } else {
        "Payment already verified, course enrollment is active"
    };

    Ok(HttpResponse::Ok().json(VerifyPaymentResponse {
        success: true,
        message: message.to_string(),
    }))
}
