use domain::{DomainError, RepositoryError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("user is already waiting for a partner")]
    AlreadyQueued,
    #[error("user is already in a chat")]
    AlreadyChatting,
    #[error("no partner available right now")]
    NoMatch,
    #[error("no active chat session")]
    NoActiveSession,
    #[error("action not allowed: {0}")]
    NotAuthorizedAction(String),
    #[error("invalid rating: {0}")]
    InvalidRating(String),
    #[error("account suspended: {reason}")]
    Suspended { reason: String },
    #[error("invalid command: {0}")]
    InvalidCommand(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("storage unavailable: {0}")]
    StoreUnavailable(String),
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("repository error: {0}")]
    Repository(RepositoryError),
}

impl ApplicationError {
    pub fn not_authorized(message: impl Into<String>) -> Self {
        ApplicationError::NotAuthorizedAction(message.into())
    }

    pub fn invalid_rating(message: impl Into<String>) -> Self {
        ApplicationError::InvalidRating(message.into())
    }

    pub fn invalid_command(message: impl Into<String>) -> Self {
        ApplicationError::InvalidCommand(message.into())
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Unavailable { message } => ApplicationError::StoreUnavailable(message),
            other => ApplicationError::Repository(other),
        }
    }
}

pub type ApplicationResult<T> = Result<T, ApplicationError>;
