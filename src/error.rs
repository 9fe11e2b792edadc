use serde::Deserialize;

use crate::models::Id;

pub const GENERIC_FAILURE: &str = "Something went wrong. Please try again.";
pub const NOT_FOUND_FAILURE: &str = "This content is no longer available.";

/// Error payload returned by the backend on non-success responses.
#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    #[serde(alias = "message")]
    pub error: String,
}

/// Comment text rejected before anything is sent.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("comment cannot be empty")] EmptyContent,
    #[error("comment is {len} characters, the limit is {max}")] TooLong { len: usize, max: usize },
    #[error("comment mentions {count} users, the limit is {max}")] TooManyMentions { count: usize, max: usize },
}

/// Failure reported by (or while talking to) the comment backend.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("not found")] NotFound(Option<String>),
    #[error("conflict")] Conflict(Option<String>),
    #[error("rejected ({status}): {message}")] Rejected { status: u16, message: String },
    #[error("transport: {0}")] Transport(String),
    #[error("decode: {0}")] Decode(String),
}

impl ApiError {
    /// Text suitable for an inline banner or form error.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::NotFound(Some(m)) | ApiError::Conflict(Some(m)) if !m.trim().is_empty() => m.clone(),
            ApiError::Rejected { message, .. } if !message.trim().is_empty() => message.clone(),
            ApiError::NotFound(_) => NOT_FOUND_FAILURE.to_string(),
            _ => GENERIC_FAILURE.to_string(),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else {
            ApiError::Transport(e.to_string())
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)] Validation(#[from] ValidationError),
    #[error(transparent)] Network(#[from] ApiError),
    #[error("comment session is closed")] Closed,
    #[error("comment {0} is not part of this thread")] UnknownComment(Id),
}

pub type SessionResult<T> = Result<T, SessionError>;
