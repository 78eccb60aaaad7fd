use application::ApplicationError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code,
                message: message.into(),
            },
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        use application::ApplicationError as AppErr;
        use domain::{DomainError, RepositoryError};

        let message = error.to_string();
        match error {
            AppErr::AlreadyQueued => ApiError::new(StatusCode::CONFLICT, "ALREADY_QUEUED", message),
            AppErr::AlreadyChatting => {
                ApiError::new(StatusCode::CONFLICT, "ALREADY_CHATTING", message)
            }
            AppErr::NoMatch => ApiError::new(StatusCode::NOT_FOUND, "NO_MATCH", message),
            AppErr::NoActiveSession => {
                ApiError::new(StatusCode::CONFLICT, "NO_ACTIVE_SESSION", message)
            }
            AppErr::NotAuthorizedAction(_) => {
                ApiError::new(StatusCode::FORBIDDEN, "NOT_AUTHORIZED", message)
            }
            AppErr::Suspended { .. } => ApiError::new(StatusCode::FORBIDDEN, "SUSPENDED", message),
            AppErr::InvalidRating(_) => {
                ApiError::new(StatusCode::BAD_REQUEST, "INVALID_RATING", message)
            }
            AppErr::InvalidCommand(_) => {
                ApiError::new(StatusCode::BAD_REQUEST, "INVALID_COMMAND", message)
            }
            AppErr::NotFound(_) => ApiError::new(StatusCode::NOT_FOUND, "NOT_FOUND", message),
            AppErr::StoreUnavailable(_) => ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "STORE_UNAVAILABLE",
                "storage is temporarily unavailable",
            ),
            AppErr::Domain(
                DomainError::InvalidArgument { .. }
                | DomainError::ScoreOutOfRange(_)
                | DomainError::SelfPairing
                | DomainError::SelfReport,
            ) => ApiError::new(StatusCode::BAD_REQUEST, "INVALID_ARGUMENT", message),
            AppErr::Domain(
                DomainError::SessionEnded | DomainError::BusinessRuleViolation { .. },
            ) => ApiError::new(StatusCode::CONFLICT, "RULE_VIOLATION", message),
            AppErr::Repository(repo_err) => match repo_err {
                RepositoryError::NotFound => ApiError::new(
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    "requested resource not found",
                ),
                RepositoryError::Conflict | RepositoryError::ConcurrentModification { .. } => {
                    ApiError::new(StatusCode::CONFLICT, "CONFLICT", message)
                }
                RepositoryError::Unavailable { .. } => ApiError::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "STORE_UNAVAILABLE",
                    "storage is temporarily unavailable",
                ),
                RepositoryError::Storage { .. } => {
                    tracing::error!(error = %message, "存储错误");
                    ApiError::new(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "DATABASE_ERROR",
                        "internal storage error",
                    )
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::RepositoryError;

    #[test]
    fn maps_application_errors_to_status_codes() {
        let cases = [
            (ApplicationError::AlreadyQueued, StatusCode::CONFLICT),
            (ApplicationError::NoActiveSession, StatusCode::CONFLICT),
            (
                ApplicationError::Suspended {
                    reason: "spam".into(),
                },
                StatusCode::FORBIDDEN,
            ),
            (
                ApplicationError::invalid_rating("7"),
                StatusCode::BAD_REQUEST,
            ),
            (ApplicationError::NotFound("report"), StatusCode::NOT_FOUND),
            (
                ApplicationError::from(RepositoryError::unavailable("down")),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ApplicationError::from(RepositoryError::storage("boom")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(ApiError::from(error).status(), status);
        }
    }
}
