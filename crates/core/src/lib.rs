//! Lecture Tutor Core
//!
//! This crate implements the client side of a turn-based tutoring session over
//! one uploaded lecture. A [`session::SessionController`] starts a remote
//! session, polls for segments while the server is still generating them,
//! advances automatically through explanatory content, gates on questions
//! until the learner answers, and tears the session down on cancellation.

pub mod advancer;
pub mod answer_gate;
pub mod cancellation;
pub mod error;
pub mod gateway;
pub mod polling;
pub mod segment;
pub mod session;

use crate::{
    cancellation::CancelReason,
    segment::{ChapterManifest, LectureId, Segment, SupplementaryResult},
};
use std::time::Duration;

/// Notifications the session controller issues to the surrounding UI.
///
/// This enum is the only channel through which the core talks to its caller;
/// it classifies and sequences content but never formats it.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The remote session was created and the chapter manifest is known.
    Initialized {
        lecture_id: LectureId,
        manifest: ChapterManifest,
    },
    /// One resolved segment, emitted exactly once per segment in server order.
    Segment(Segment),
    /// A follow-up segment will be requested after the display delay.
    AdvancePending,
    /// The result of an answered question.
    Supplementary(SupplementaryResult),
    /// The server kept reporting "processing" past the soft ceiling.
    StillWorking { waited: Duration, attempts: u32 },
    /// No more segments remain.
    Completed,
    /// The session was cancelled locally.
    Cancelled {
        lecture_id: LectureId,
        reason: CancelReason,
    },
    /// The session could not start or could not fetch its next segment.
    Failed { message: String },
}
