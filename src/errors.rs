use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use thiserror::Error;

/// Infrastructure failures. Conflict outcomes (duplicate lot name, no free
/// spot, ...) are per-operation enums in `db` and never reach this type.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Template error: {0}")]
    Template(#[from] tera::Error),

    #[error("Session error: {0}")]
    Session(#[from] actix_session::SessionInsertError),

    #[error("Identity error: {0}")]
    Identity(String),

    #[error("Password hashing error: {0}")]
    Password(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }

    fn error_response(&self) -> HttpResponse {
        log::error!("request failed: {}", self);
        HttpResponse::build(self.status_code()).body("Something went wrong. Please try again.")
    }
}
