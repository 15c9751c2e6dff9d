use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::api::auth::signup,
        crate::api::auth::login,
        crate::api::auth::logout,
        crate::api::users::get_profile,
        crate::api::users::update_profile,
        crate::api::purchases::purchase_course,
        crate::api::purchases::verify_payment,
        crate::api::users::update_course_progress,
        crate::api::users::get_course_progress,
        crate::api::users::add_rating,
        crate::api::users::update_role,
        crate::api::educator::add_course
    ),
    components(
        schemas(
            crate::api::auth::SignupRequest,
            crate::api::auth::LoginRequest,
            crate::api::auth::AuthResponse,
            crate::api::purchases::PurchaseResponse,
            crate::api::purchases::VerifyPaymentResponse,
            crate::api::users::UpdateProgressRequest,
            crate::api::users::ProgressResponse,
            crate::api::users::ProfileResponse,
            crate::api::users::UpdateProfileRequest,
            crate::api::users::AddRatingRequest,
            crate::api::educator::AddCourseRequest,
            crate::api::educator::ChapterInput,
            crate::api::educator::LectureInput,
            crate::models::User,
            crate::models::Role,
            crate::models::CourseProgress
        )
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "auth", description = "Signup, login and logout"),
        (name = "purchases", description = "Checkout and payment verification"),
        (name = "users", description = "Profile, progress, ratings and roles"),
        (name = "educator", description = "Course authoring")
    )
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}
