//! Polling for the next segment while the server is still generating it.

use crate::{
    cancellation::CancellationCoordinator,
    error::GatewayError,
    gateway::SessionGateway,
    segment::{LectureId, Segment},
};
use std::{sync::Arc, time::Duration};
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_ADVANCE_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_SOFT_CEILING: Duration = Duration::from_secs(300);

/// Timing knobs for the polling and auto-advance loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Wait between two `next` calls answered with "processing".
    pub interval: Duration,
    /// Continuous processing time after which polling yields `StillWorking`.
    /// `None` polls for as long as the server keeps processing.
    pub soft_ceiling: Option<Duration>,
    /// Display delay before an automatic follow-up request.
    pub advance_delay: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            soft_ceiling: Some(DEFAULT_SOFT_CEILING),
            advance_delay: DEFAULT_ADVANCE_DELAY,
        }
    }
}

/// How a single fetch ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Resolved(Segment),
    /// The soft ceiling elapsed while the server kept processing.
    StillWorking { waited: Duration, attempts: u32 },
    /// The abort signal was observed; any reply in flight was dropped.
    Cancelled,
}

pub struct PollingFetcher {
    gateway: Arc<dyn SessionGateway>,
    policy: PollPolicy,
}

impl PollingFetcher {
    pub fn new(gateway: Arc<dyn SessionGateway>, policy: PollPolicy) -> Self {
        Self { gateway, policy }
    }

    /// Calls `next` until the server resolves a segment.
    ///
    /// The abort signal is checked before every call, after every reply, and
    /// during every wait, so a raised signal takes effect within one polling
    /// interval at most.
    #[instrument(name = "poll_next", skip(self, abort), fields(%lecture_id))]
    pub async fn fetch(
        &self,
        lecture_id: LectureId,
        abort: &CancellationCoordinator,
    ) -> Result<PollOutcome, GatewayError> {
        let started = Instant::now();
        let mut attempts = 0u32;
        loop {
            if abort.is_raised() {
                return Ok(PollOutcome::Cancelled);
            }
            attempts += 1;
            let reply = self.gateway.next(lecture_id).await?;
            if abort.is_raised() {
                debug!(attempts, "Dropping reply received after abort.");
                return Ok(PollOutcome::Cancelled);
            }
            if !reply.is_processing() {
                debug!(attempts, "Segment resolved.");
                return reply.into_segment().map(PollOutcome::Resolved);
            }

            let waited = started.elapsed();
            if self.policy.soft_ceiling.is_some_and(|ceiling| waited >= ceiling) {
                warn!(attempts, waited_ms = waited.as_millis() as u64, "Server still processing past the soft ceiling.");
                return Ok(PollOutcome::StillWorking { waited, attempts });
            }
            debug!(attempts, "Server still processing; retrying.");
            if !abort.sleep_unless_raised(self.policy.interval).await {
                return Ok(PollOutcome::Cancelled);
            }
        }
    }
}
