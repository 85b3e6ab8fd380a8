//! Decides what happens after a segment resolves.

use crate::{cancellation::CancellationCoordinator, segment::Segment};
use std::time::Duration;

/// What the session should do with a freshly resolved segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Request exactly one more segment after the display delay.
    Continue,
    /// Block on the given question until the learner answers it.
    AwaitAnswer(String),
    /// A question arrived without the server waiting on it: show it and stay
    /// put until the caller asks for more.
    Pause,
    /// Nothing remains after this segment.
    Complete,
    /// The abort signal is up; schedule nothing.
    Stop,
}

pub struct AutoAdvancer {
    delay: Duration,
}

impl AutoAdvancer {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// Classifies a resolved segment.
    ///
    /// The server's `waitingForAnswer` flag takes precedence over the content
    /// type, and a pending question takes precedence over `has_more`.
    pub fn decide(&self, segment: &Segment, abort: &CancellationCoordinator) -> Decision {
        if let Some(question_id) = &segment.question_id {
            return Decision::AwaitAnswer(question_id.clone());
        }
        if segment.content_type.is_question() {
            return Decision::Pause;
        }
        if !segment.has_more {
            return Decision::Complete;
        }
        if abort.is_raised() {
            return Decision::Stop;
        }
        Decision::Continue
    }

    /// Waits out the display delay before a follow-up request.
    ///
    /// Returns `false` if the session was aborted meanwhile, in which case the
    /// follow-up must not be issued.
    pub async fn hold(&self, abort: &CancellationCoordinator) -> bool {
        if self.delay.is_zero() {
            return !abort.is_raised();
        }
        abort.sleep_unless_raised(self.delay).await
    }
}
