pub mod auth;
pub mod educator;
pub mod purchases;
pub mod users;
pub mod webhooks_stripe;

use actix_web::web;
use uuid::Uuid;

use crate::error::AppError;

/// JSON extractor settings: body errors render like every other `AppError`.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, req| {
        log::warn!("rejected json body path={}: {err}", req.path());
        AppError::validation("Invalid request payload").into()
    })
}

pub fn query_config() -> web::QueryConfig {
    web::QueryConfig::default().error_handler(|err, req| {
        log::warn!("rejected query string path={}: {err}", req.path());
        AppError::validation("Invalid query parameters").into()
    })
}

/// Parses a required id taken from a path, query or body field.
pub(crate) fn parse_id(raw: &str, what: &str) -> Result<Uuid, AppError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(AppError::validation(format!("{what} is required")));
    }
    Uuid::parse_str(raw).map_err(|_| AppError::validation(format!("{what} is invalid")))
}
