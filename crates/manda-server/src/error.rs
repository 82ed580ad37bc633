use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use manda_db::DbError;
use manda_worker::WorkerError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Internal(String),

    #[error(transparent)]
    Worker(#[from] WorkerError),
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Worker(e) => match e {
                WorkerError::NotConnected(_) => StatusCode::CONFLICT,
                WorkerError::NotFound(_) => StatusCode::NOT_FOUND,
                WorkerError::Forbidden(_) => StatusCode::FORBIDDEN,
                WorkerError::DeliveryFailed(_) => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl From<DbError> for ApiError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::EmailTaken(_) => ApiError::Conflict("Email already registered".into()),
            e => ApiError::Worker(WorkerError::from(e)),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self, "Request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        (status, Json(json!({ "message": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_errors_map_to_statuses() {
        let cases = [
            (WorkerError::NotConnected("a".into()), StatusCode::CONFLICT),
            (WorkerError::NotFound("a".into()), StatusCode::NOT_FOUND),
            (WorkerError::Forbidden("a".into()), StatusCode::FORBIDDEN),
            (WorkerError::DeliveryFailed("a".into()), StatusCode::BAD_GATEWAY),
            (WorkerError::AlreadyActive("a".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn taken_email_is_a_conflict() {
        let err = ApiError::from(DbError::EmailTaken("ana@example.com".into()));
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(ApiError::from(DbError::NoDataDir).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn internal_details_stay_in_the_log() {
        let response = ApiError::from(WorkerError::AlreadyActive("secret-id".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["message"], "Internal server error");
    }
}
