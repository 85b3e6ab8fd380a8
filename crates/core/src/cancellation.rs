//! Per-session abort signal.
//!
//! A [`CancellationCoordinator`] is allocated with every session and raised at
//! most once. Raising is synchronous so it can run from a signal handler or a
//! `Drop` impl; everything that waits on the session (polling, the display
//! delay between segments) observes it through the wrapped
//! [`CancellationToken`].

use crate::{gateway::SessionGateway, segment::LectureId};
use std::{
    fmt,
    sync::{Arc, OnceLock},
    time::Duration,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Why a session was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The learner pressed stop.
    UserStop,
    /// Another lecture was selected while this session was in progress.
    LectureSwitch,
    /// The owning UI surface went away.
    Teardown,
    /// The process or page is being unloaded.
    Unload,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::UserStop => write!(f, "stopped by user"),
            CancelReason::LectureSwitch => write!(f, "lecture switched"),
            CancelReason::Teardown => write!(f, "torn down"),
            CancelReason::Unload => write!(f, "unloaded"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CancellationCoordinator {
    token: CancellationToken,
    reason: Arc<OnceLock<CancelReason>>,
}

impl CancellationCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the abort signal. Returns `false` if it was already raised, in
    /// which case the first reason is kept.
    pub fn raise(&self, reason: CancelReason) -> bool {
        let first = self.reason.set(reason).is_ok();
        self.token.cancel();
        first
    }

    pub fn is_raised(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<CancelReason> {
        self.reason.get().copied()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Suspends for `duration` unless the signal is raised first.
    ///
    /// Returns `true` when the full duration elapsed and `false` when the
    /// wait was cut short.
    pub async fn sleep_unless_raised(&self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => false,
            _ = tokio::time::sleep(duration) => !self.is_raised(),
        }
    }
}

/// Issues the remote cancel without waiting for it.
///
/// Failures are only logged. Outside a Tokio runtime (e.g. a `Drop` running
/// after shutdown) the remote call is skipped altogether.
pub fn spawn_remote_cancel(gateway: Arc<dyn SessionGateway>, lecture_id: LectureId) {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        warn!(%lecture_id, "No runtime available; skipping remote cancel.");
        return;
    };
    handle.spawn(async move {
        match gateway.cancel(lecture_id).await {
            Ok(()) => debug!(%lecture_id, "Remote session cancelled."),
            Err(e) => warn!(%lecture_id, error = %e, "Remote cancel failed."),
        }
    });
}
