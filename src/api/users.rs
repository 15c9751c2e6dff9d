// src/api/users.rs

use actix_web::{get, post, put, web, HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::{IntoParams, ToSchema};

use crate::api::parse_id;
use crate::error::AppError;
use crate::models::{CourseProgress, Principal, Role, User};
use crate::{db, AppState};

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateProgressRequest {
    #[serde(default)]
    pub course_id: String,
    #[serde(default)]
    pub lecture_id: String,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ProgressQuery {
    #[serde(default)]
    pub course_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProgressResponse {
    pub success: bool,
    #[serde(rename = "progressData")]
    pub progress_data: CourseProgress,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProfileResponse {
    pub success: bool,
    pub user: User,
}

/// Only the display name is editable; email and role have their own flows.
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateProfileRequest {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddRatingRequest {
    #[serde(default)]
    pub course_id: String,
    pub rating: Option<i64>,
}

#[utoipa::path(
    post,
    path = "/api/user/update-course-progress",
    tag = "users",
    request_body = UpdateProgressRequest,
    responses(
        (status = 200, description = "Lecture recorded (or already recorded)"),
        (status = 400, description = "Missing required fields")
    ),
    security(("bearer" = []))
)]
#[post("/user/update-course-progress")]
pub async fn update_course_progress(
    state: web::Data<AppState>,
    principal: web::ReqData<Principal>,
    payload: web::Json<UpdateProgressRequest>,
) -> Result<HttpResponse, AppError> {
    let lecture_id = payload.lecture_id.trim();
    if payload.course_id.trim().is_empty() || lecture_id.is_empty() {
        return Err(AppError::validation("Missing required fields"));
    }
    let course_id = parse_id(&payload.course_id, "Course ID")?;

    let added =
        db::mark_lecture_completed(&state.pool, principal.user_id, course_id, lecture_id).await?;

    let message = if added {
        "Lecture marked as completed successfully"
    } else {
        "Lecture already marked as completed"
    };

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": message
    })))
}

#[utoipa::path(
    get,
    path = "/api/user/get-course-progress",
    tag = "users",
    params(ProgressQuery),
    responses(
        (status = 200, description = "Progress for the course, empty if not started", body = ProgressResponse),
        (status = 400, description = "Missing course_id")
    ),
    security(("bearer" = []))
)]
#[get("/user/get-course-progress")]
pub async fn get_course_progress(
    state: web::Data<AppState>,
    principal: web::ReqData<Principal>,
    query: web::Query<ProgressQuery>,
) -> Result<HttpResponse, AppError> {
    if query.course_id.trim().is_empty() {
        return Err(AppError::validation("Missing required fields"));
    }
    let course_id = parse_id(&query.course_id, "Course ID")?;

    let progress = db::get_course_progress(&state.pool, principal.user_id, course_id)
        .await?
        .unwrap_or_else(|| CourseProgress::empty(principal.user_id, course_id));

    Ok(HttpResponse::Ok().json(ProgressResponse {
        success: true,
        progress_data: progress,
    }))
}

#[utoipa::path(
    post,
    path = "/api/user/add-rating",
    tag = "users",
    request_body = AddRatingRequest,
    responses(
        (status = 200, description = "Rating stored"),
        (status = 400, description = "Missing fields or rating outside 1-5"),
        (status = 403, description = "Not enrolled in the course"),
        (status = 404, description = "Course not found")
    ),
    security(("bearer" = []))
)]
#[post("/user/add-rating")]
pub async fn add_rating(
    state: web::Data<AppState>,
    principal: web::ReqData<Principal>,
    payload: web::Json<AddRatingRequest>,
) -> Result<HttpResponse, AppError> {
    let Some(rating) = payload.rating.filter(|_| !payload.course_id.trim().is_empty()) else {
        return Err(AppError::validation("Missing required fields"));
    };
    if !(1..=5).contains(&rating) {
        return Err(AppError::validation("Invalid rating value (must be 1-5)"));
    }
    let course_id = parse_id(&payload.course_id, "Course ID")?;

    let course_exists = {
        let mut conn = state.pool.acquire().await?;
        db::get_course(&mut conn, course_id).await?.is_some()
    };
    if !course_exists {
        return Err(AppError::not_found("Course not found"));
    }

    if !db::is_enrolled(&state.pool, principal.user_id, course_id).await? {
        return Err(AppError::forbidden("You are not enrolled in this course"));
    }

    let stored =
        db::upsert_course_rating(&state.pool, principal.user_id, course_id, rating as i16).await?;
    log::info!(
        "course rated user_id={} course_id={} rating={}",
        stored.user_id,
        stored.course_id,
        stored.rating
    );

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Rating added successfully"
    })))
}

/// Promotes the caller to the educator role.
#[utoipa::path(
    post,
    path = "/api/user/update-role",
    tag = "users",
    responses(
        (status = 200, description = "Role updated"),
        (status = 404, description = "User not found")
    ),
    security(("bearer" = []))
)]
#[post("/user/update-role")]
pub async fn update_role(
    state: web::Data<AppState>,
    principal: web::ReqData<Principal>,
) -> Result<HttpResponse, AppError> {
    if !db::set_user_role(&state.pool, principal.user_id, Role::Educator).await? {
        return Err(AppError::not_found("User not found"));
    }

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Role updated successfully"
    })))
}

#[utoipa::path(
    get,
    path = "/api/user/profile",
    tag = "users",
    responses(
        (status = 200, description = "The caller's account", body = ProfileResponse),
        (status = 404, description = "User not found")
    ),
    security(("bearer" = []))
)]
#[get("/user/profile")]
pub async fn get_profile(
    state: web::Data<AppState>,
    principal: web::ReqData<Principal>,
) -> Result<HttpResponse, AppError> {
    let user = db::get_user(&state.pool, principal.user_id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;

    Ok(HttpResponse::Ok().json(ProfileResponse {
        success: true,
        user,
    }))
}

#[utoipa::path(
    put,
    path = "/api/user/profile",
    tag = "users",
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Profile updated", body = ProfileResponse),
        (status = 400, description = "Name is empty"),
        (status = 404, description = "User not found")
    ),
    security(("bearer" = []))
)]
#[put("/user/profile")]
pub async fn update_profile(
    state: web::Data<AppState>,
    principal: web::ReqData<Principal>,
    payload: web::Json<UpdateProfileRequest>,
) -> Result<HttpResponse, AppError> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::validation("Name is required"));
    }

    let user = db::set_user_name(&state.pool, principal.user_id, name)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;

    Ok(HttpResponse::Ok().json(ProfileResponse {
        success: true,
        user,
    }))
}
