pub mod config;

pub use config::*;

use crate::error::AppError;
use actix_web::{HttpRequest, HttpResponse};

/// Fallback for any path without a route.
pub async fn not_found(req: HttpRequest) -> Result<HttpResponse, AppError> {
    Err(AppError::NotFound(format!("No route for {} {}", req.method(), req.path())))
}
