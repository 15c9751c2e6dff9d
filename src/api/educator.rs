// src/api/educator.rs

use actix_web::{post, web, HttpResponse};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use utoipa::ToSchema;

use crate::db::{self, NewCourse, NewLecture};
use crate::error::AppError;
use crate::models::{Principal, Role};
use crate::AppState;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LectureInput {
    pub lecture_title: String,
    /// Whole minutes.
    pub lecture_duration: i32,
    pub lecture_url: String,
    #[serde(default)]
    pub is_preview_free: bool,
    pub lecture_order: i32,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChapterInput {
    pub chapter_title: String,
    pub chapter_order: i32,
    #[serde(default)]
    pub chapter_content: Vec<LectureInput>,
}

/// Course payload. The thumbnail is a URL; uploads are not handled here.
#[derive(Debug, Deserialize, ToSchema)]
pub struct AddCourseRequest {
    pub course_title: String,
    pub course_description: String,
    #[serde(default)]
    pub course_thumbnail: Option<String>,
    #[schema(value_type = String)]
    pub course_price: Decimal,
    #[serde(default)]
    #[schema(value_type = String)]
    pub discount: Decimal,
    #[serde(default)]
    pub course_content: Vec<ChapterInput>,
}

impl AddCourseRequest {
    fn validate(&self) -> Result<(), AppError> {
        if self.course_title.trim().is_empty() {
            return Err(AppError::validation("Course title is required"));
        }
        if self.course_description.trim().is_empty() {
            return Err(AppError::validation("Course description is required"));
        }
        if self.course_content.is_empty() {
            return Err(AppError::validation("Course content is required"));
        }
        if self.course_price.is_sign_negative() {
            return Err(AppError::validation("Course price must not be negative"));
        }
        if self.discount < Decimal::ZERO || self.discount > Decimal::ONE_HUNDRED {
            return Err(AppError::validation("Discount must be between 0 and 100"));
        }
        for chapter in &self.course_content {
            if chapter.chapter_title.trim().is_empty() {
                return Err(AppError::validation("Chapter title is required"));
            }
            for lecture in &chapter.chapter_content {
                if lecture.lecture_title.trim().is_empty() || lecture.lecture_url.trim().is_empty() {
                    return Err(AppError::validation("Lecture title and url are required"));
                }
                if lecture.lecture_duration < 0 {
                    return Err(AppError::validation("Lecture duration must not be negative"));
                }
            }
        }
        Ok(())
    }
}

/// Creates a course with its chapters and lectures in one transaction.
#[utoipa::path(
    post,
    path = "/api/educator/add-course",
    tag = "educator",
    request_body = AddCourseRequest,
    responses(
        (status = 200, description = "Course created"),
        (status = 400, description = "Invalid course data"),
        (status = 403, description = "Caller is not an educator")
    ),
    security(("bearer" = []))
)]
#[post("/educator/add-course")]
pub async fn add_course(
    state: web::Data<AppState>,
    principal: web::ReqData<Principal>,
    payload: web::Json<AddCourseRequest>,
) -> Result<HttpResponse, AppError> {
    let educator = db::get_user(&state.pool, principal.user_id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;
    if educator.role != Role::Educator {
        return Err(AppError::forbidden("Only educators can add courses"));
    }

    payload.validate()?;

    let mut tx = state.pool.begin().await?;

    let course_id = db::insert_course(
        &mut tx,
        &NewCourse {
            title: payload.course_title.trim(),
            description: payload.course_description.trim(),
            thumbnail: payload
                .course_thumbnail
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty()),
            price: payload.course_price.round_dp(2),
            discount: payload.discount.round_dp(2),
            educator_id: educator.id,
        },
    )
    .await?;

    for chapter in &payload.course_content {
        let chapter_id =
            db::insert_chapter(&mut tx, course_id, chapter.chapter_order, chapter.chapter_title.trim())
                .await?;

        for lecture in &chapter.chapter_content {
            db::insert_lecture(
                &mut tx,
                chapter_id,
                &NewLecture {
                    title: lecture.lecture_title.trim(),
                    duration: lecture.lecture_duration,
                    url: lecture.lecture_url.trim(),
                    is_preview_free: lecture.is_preview_free,
                    order: lecture.lecture_order,
                },
            )
            .await?;
        }
    }

    tx.commit().await?;
    log::info!("course created course_id={} educator_id={}", course_id, educator.id);

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Course added successfully",
        "course_id": course_id
    })))
}
