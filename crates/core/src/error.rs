//! Error types for the gateway and the session controller.

use crate::{segment::LectureId, session::SessionStatus};

/// Failures of a remote gateway call.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("authentication required (redirected to {location})")]
    AuthenticationRequired { location: String },
    #[error("request failed with status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("malformed reply: {0}")]
    MalformedReply(String),
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
}

/// Failures surfaced by [`crate::session::SessionController`].
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("a session for lecture {active} is still in progress; cancel it first")]
    SessionInProgress { active: LectureId },
    #[error("failed to initialize session for lecture {lecture_id}: {source}")]
    Initialization {
        lecture_id: LectureId,
        #[source]
        source: GatewayError,
    },
    #[error("failed to fetch the next segment for lecture {lecture_id}: {source}")]
    Fetch {
        lecture_id: LectureId,
        #[source]
        source: GatewayError,
    },
    #[error("failed to submit the answer to question {question_id}: {source}")]
    AnswerSubmission {
        question_id: String,
        #[source]
        source: GatewayError,
    },
    #[error("failed to read the remote session for lecture {lecture_id}: {source}")]
    Snapshot {
        lecture_id: LectureId,
        #[source]
        source: GatewayError,
    },
    #[error("answer to question {question_id} is stale (current question: {})", .current.as_deref().unwrap_or("none"))]
    StaleAnswer {
        question_id: String,
        current: Option<String>,
    },
    #[error("an answer to question {question_id} is already being submitted")]
    AnswerInFlight { question_id: String },
    #[error("a segment is already being fetched for lecture {0}")]
    FetchInProgress(LectureId),
    #[error("cannot {operation} while the session is {status}")]
    InvalidState {
        operation: &'static str,
        status: SessionStatus,
    },
    #[error("the session was cancelled")]
    Cancelled,
}

impl SessionError {
    /// Whether the session moved to `Errored` because of this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SessionError::Initialization { .. } | SessionError::Fetch { .. }
        )
    }
}
