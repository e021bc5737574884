//! Maps `AppError` onto HTTP responses.

use actix_web::http::{header, StatusCode};
use actix_web::{HttpResponse, ResponseError};
use log::error;
use pk_core::error::AppError;
use serde_json::json;

/// HTTP-facing wrapper so `AppError` can be returned straight from handlers.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ApiError(#[from] pub AppError);

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match &self.0 {
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(..) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let message = match &self.0 {
            AppError::Internal(detail) => {
                error!("Request failed: {}", detail);
                "internal server error".to_string()
            }
            other => other.to_string(),
        };

        let mut builder = HttpResponse::build(status);
        if matches!(self.0, AppError::Unauthorized(_)) {
            builder.insert_header((header::WWW_AUTHENTICATE, r#"Basic realm="pikyak""#));
        }
        builder.json(json!({ "error": message }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_status_codes() {
        let cases = [
            (AppError::ValidationError("x".into()), 400),
            (AppError::Unauthorized("x".into()), 401),
            (AppError::Forbidden("x".into()), 403),
            (AppError::not_found("Post", 1), 404),
            (AppError::Conflict("x".into()), 409),
            (AppError::Internal("x".into()), 500),
        ];
        for (err, code) in cases {
            assert_eq!(ApiError(err).status_code().as_u16(), code);
        }
    }

    #[test]
    fn unauthorized_challenges_for_basic_auth() {
        let resp = ApiError(AppError::Unauthorized("no".into())).error_response();
        assert_eq!(
            resp.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            r#"Basic realm="pikyak""#
        );
    }

    #[actix_web::test]
    async fn internal_details_stay_out_of_the_body() {
        let resp = ApiError(AppError::Internal("db password is hunter2".into())).error_response();
        let body = actix_web::body::to_bytes(resp.into_body()).await.unwrap();
        assert!(!String::from_utf8_lossy(&body).contains("hunter2"));
    }
}
