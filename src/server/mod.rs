//! The user-facing JSON web server. Accepts image uploads, hands them to the
//! `Gateway`, and renders every failure as a JSON body callers can debug.

use crate::gateway::ApiError;
use actix_web::http::header::ContentType;
use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse};
use protocol::ErrorResponse;

pub mod protocol;
pub mod routes;

/// Register every route on an app
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(routes::index)
        .service(routes::health)
        .service(routes::analyze);
}

impl actix_web::error::ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        let body = match self {
            ApiError::MissingImage => ErrorResponse::new(protocol::NO_IMAGE),
            ApiError::Upload(details) => ErrorResponse {
                details: Some(details.as_str()),
                ..ErrorResponse::new(protocol::UPLOAD_FAILED)
            },
            ApiError::UpstreamStatus {
                status_code,
                details,
            } => ErrorResponse {
                status_code: Some(*status_code),
                details: Some(details.as_str()),
                ..ErrorResponse::new(protocol::REQUEST_FAILED)
            },
            ApiError::UpstreamUnreachable(details) => ErrorResponse {
                details: Some(details.as_str()),
                ..ErrorResponse::new(protocol::REQUEST_FAILED)
            },
            ApiError::UpstreamRejected { status, raw } => ErrorResponse {
                status: Some(status),
                raw: Some(raw),
                ..ErrorResponse::new(protocol::NON_SUCCESS_STATUS)
            },
            ApiError::MalformedResponse { exception, raw } => ErrorResponse {
                exception: Some(exception.as_str()),
                raw: Some(raw),
                ..ErrorResponse::new(protocol::PARSE_FAILED)
            },
        };

        HttpResponse::build(self.status_code())
            .insert_header(ContentType::json())
            .json(body)
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::MissingImage | ApiError::Upload(_) => StatusCode::BAD_REQUEST,
            // Passed through verbatim when it is a usable response status
            ApiError::UpstreamStatus { status_code, .. } => StatusCode::from_u16(*status_code)
                .ok()
                .filter(|s| !s.is_informational() && !s.is_success())
                .unwrap_or(StatusCode::BAD_GATEWAY),
            ApiError::UpstreamUnreachable(_)
            | ApiError::UpstreamRejected { .. }
            | ApiError::MalformedResponse { .. } => StatusCode::BAD_GATEWAY,
        }
    }
}
