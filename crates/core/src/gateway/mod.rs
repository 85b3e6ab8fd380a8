//! Remote Session Gateway
//!
//! The streaming endpoints are the only collaborator the session core talks
//! to. This module defines that contract and ships two implementations:
//!
//! - `http`: the real backend, reached with `reqwest`.
//! - `scripted`: a deterministic in-memory backend for offline demos and tests.

pub mod http;
pub mod scripted;

use crate::{
    error::GatewayError,
    segment::{AnswerReply, AnswerRequest, InitializeReply, LectureId, NextReply, SessionSnapshot},
};
use async_trait::async_trait;

pub use http::HttpSessionGateway;
pub use scripted::{GatewayCall, ScriptedSessionGateway};

/// Defines the contract for any backend that can run a tutoring session.
///
/// Every operation is addressed by the lecture the session belongs to. The
/// trait makes no promise about ordering between concurrent calls; the
/// session controller guarantees that at most one `next` is outstanding.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionGateway: Send + Sync {
    /// Starts a remote content-generation session and returns its chapters.
    async fn initialize(&self, lecture_id: LectureId) -> Result<InitializeReply, GatewayError>;

    /// Requests the next segment. The reply may only say "processing".
    async fn next(&self, lecture_id: LectureId) -> Result<NextReply, GatewayError>;

    /// Submits the learner's answer to the pending question.
    async fn answer(
        &self,
        lecture_id: LectureId,
        request: AnswerRequest,
    ) -> Result<AnswerReply, GatewayError>;

    /// Tears the remote session down. The reply carries no payload.
    async fn cancel(&self, lecture_id: LectureId) -> Result<(), GatewayError>;

    /// Reads the server's view of the session.
    async fn session(&self, lecture_id: LectureId) -> Result<SessionSnapshot, GatewayError>;
}
