//! Session Controller
//!
//! The controller is the only writer of session state. It composes the
//! polling fetcher, the auto-advancer, the answer gate and the per-session
//! abort signal into one state machine:
//!
//! ```text
//! Idle -> Initializing -> Active <-> WaitingForAnswer -> Completed
//!                  \___________\__________\__> Cancelled | Errored
//! ```
//!
//! State lives behind a `std::sync::Mutex` that is never held across an
//! `.await`. Every async operation takes a [`Ticket`] up front and re-validates
//! it before writing back, so a continuation that outlives its session (it was
//! cancelled, or replaced by a new one) can never touch the current state.

use crate::{
    SessionEvent,
    advancer::{AutoAdvancer, Decision},
    answer_gate::{AnswerGate, PendingQuestion},
    cancellation::{self, CancelReason, CancellationCoordinator},
    error::SessionError,
    gateway::SessionGateway,
    polling::{PollOutcome, PollPolicy, PollingFetcher},
    segment::{ChapterManifest, LectureId, SessionSnapshot, SupplementaryResult},
};
use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

/// Externally visible status of the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionStatus {
    Idle,
    Initializing,
    Active,
    WaitingForAnswer,
    Completed,
    Cancelled,
    Errored,
}

impl SessionStatus {
    /// No transition leaves a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Cancelled | SessionStatus::Errored
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Initializing => "initializing",
            SessionStatus::Active => "active",
            SessionStatus::WaitingForAnswer => "waiting for an answer",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Why a call to `request_next` (or the follow-up of an answer) returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    AwaitingAnswer { question_id: String },
    /// A question arrived that the server is not waiting on.
    Paused,
    Completed,
    /// The soft ceiling elapsed; the session is Active and may be resumed.
    StillWorking { waited: Duration },
    Cancelled,
}

/// Result of a successful answer submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerOutcome {
    pub supplementary: SupplementaryResult,
    pub advance: Advance,
}

#[derive(Debug)]
enum Phase {
    Initializing,
    Active { fetching: bool },
    WaitingForAnswer(PendingQuestion),
    Completed,
    Cancelled(CancelReason),
    Errored(String),
}

impl Phase {
    fn status(&self) -> SessionStatus {
        match self {
            Phase::Initializing => SessionStatus::Initializing,
            Phase::Active { .. } => SessionStatus::Active,
            Phase::WaitingForAnswer(_) => SessionStatus::WaitingForAnswer,
            Phase::Completed => SessionStatus::Completed,
            Phase::Cancelled(_) => SessionStatus::Cancelled,
            Phase::Errored(_) => SessionStatus::Errored,
        }
    }
}

struct Session {
    lecture_id: LectureId,
    generation: u64,
    phase: Phase,
    abort: CancellationCoordinator,
}

impl Session {
    fn ticket(&self) -> Ticket {
        Ticket {
            lecture_id: self.lecture_id,
            generation: self.generation,
            abort: self.abort.clone(),
        }
    }
}

/// A claim on one session instance, held by an in-flight operation.
struct Ticket {
    lecture_id: LectureId,
    generation: u64,
    abort: CancellationCoordinator,
}

/// Which in-flight marker an [`InFlight`] guard owns.
#[derive(Debug, Clone, Copy)]
enum Marker {
    Fetch,
    Answer,
}

/// Clears an in-flight marker when the operation that set it is dropped.
///
/// Only touches the session of the generation it was taken for.
struct InFlight<'a> {
    controller: &'a SessionController,
    generation: u64,
    marker: Marker,
    armed: bool,
}

impl<'a> InFlight<'a> {
    fn new(controller: &'a SessionController, ticket: &Ticket, marker: Marker) -> Self {
        Self {
            controller,
            generation: ticket.generation,
            marker,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut slot = self.controller.lock();
        let Some(session) = slot.session.as_mut() else {
            return;
        };
        if session.generation != self.generation {
            return;
        }
        let released = match (self.marker, &mut session.phase) {
            (Marker::Fetch, Phase::Active { fetching }) if *fetching => {
                *fetching = false;
                true
            }
            (Marker::Answer, Phase::WaitingForAnswer(pending)) if pending.in_flight() => {
                pending.release();
                true
            }
            _ => false,
        };
        if released {
            debug!(lecture_id = %session.lecture_id, marker = ?self.marker, "Released in-flight marker.");
        }
    }
}

#[derive(Default)]
struct Slot {
    session: Option<Session>,
    generations: u64,
}

pub struct SessionController {
    gateway: Arc<dyn SessionGateway>,
    fetcher: PollingFetcher,
    advancer: AutoAdvancer,
    gate: AnswerGate,
    slot: Mutex<Slot>,
    events: Option<mpsc::UnboundedSender<SessionEvent>>,
}

impl SessionController {
    /// Creates a controller with no session.
    ///
    /// Events are delivered on `events` when given; the receiver may be
    /// dropped at any time without affecting the session.
    pub fn new(
        gateway: Arc<dyn SessionGateway>,
        policy: PollPolicy,
        events: Option<mpsc::UnboundedSender<SessionEvent>>,
    ) -> Self {
        Self {
            fetcher: PollingFetcher::new(gateway.clone(), policy),
            advancer: AutoAdvancer::new(policy.advance_delay),
            gate: AnswerGate::new(gateway.clone()),
            gateway,
            slot: Mutex::new(Slot::default()),
            events,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.lock()
            .session
            .as_ref()
            .map_or(SessionStatus::Idle, |s| s.phase.status())
    }

    pub fn lecture_id(&self) -> Option<LectureId> {
        self.lock().session.as_ref().map(|s| s.lecture_id)
    }

    /// The question the session is blocked on, if any.
    pub fn current_question(&self) -> Option<String> {
        match &self.lock().session.as_ref()?.phase {
            Phase::WaitingForAnswer(pending) => Some(pending.question_id().to_string()),
            _ => None,
        }
    }

    /// The reason the current session was cancelled, if it was.
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        match &self.lock().session.as_ref()?.phase {
            Phase::Cancelled(reason) => Some(*reason),
            _ => None,
        }
    }

    /// The failure message of an errored session.
    pub fn failure(&self) -> Option<String> {
        match &self.lock().session.as_ref()?.phase {
            Phase::Errored(message) => Some(message.clone()),
            _ => None,
        }
    }

    /// Starts a session for `lecture_id`.
    ///
    /// Fails if a non-terminal session exists; the caller has to cancel it
    /// first (or use [`Self::switch_lecture`]). A terminal session is replaced
    /// by a fresh one with its own abort signal.
    #[instrument(skip(self), fields(%lecture_id))]
    pub async fn initialize(&self, lecture_id: LectureId) -> Result<ChapterManifest, SessionError> {
        let ticket = {
            let mut slot = self.lock();
            if let Some(active) = slot.session.as_ref() {
                if !active.phase.status().is_terminal() {
                    return Err(SessionError::SessionInProgress {
                        active: active.lecture_id,
                    });
                }
            }
            slot.generations += 1;
            let session = Session {
                lecture_id,
                generation: slot.generations,
                phase: Phase::Initializing,
                abort: CancellationCoordinator::new(),
            };
            let ticket = session.ticket();
            slot.session = Some(session);
            ticket
        };
        info!("Initializing tutoring session.");

        match self.gateway.initialize(lecture_id).await {
            Ok(reply) => {
                let manifest = reply.into_manifest();
                self.with_session(&ticket, |session| {
                    session.phase = Phase::Active { fetching: false };
                    self.emit(SessionEvent::Initialized {
                        lecture_id,
                        manifest: manifest.clone(),
                    });
                })?;
                info!(
                    total_chapters = manifest.total_chapters,
                    "Session initialized."
                );
                Ok(manifest)
            }
            Err(source) => {
                error!(error = %source, "Session initialization failed.");
                self.fail(&ticket, source.to_string());
                Err(SessionError::Initialization { lecture_id, source })
            }
        }
    }

    /// Fetches segments until the session has to stop.
    ///
    /// Explanatory segments with more content behind them are followed by
    /// exactly one further fetch; a question, the last segment, the soft
    /// ceiling or the abort signal ends the call.
    #[instrument(skip(self))]
    pub async fn request_next(&self) -> Result<Advance, SessionError> {
        let ticket = {
            let mut slot = self.lock();
            let Some(session) = slot.session.as_mut() else {
                return Err(SessionError::InvalidState {
                    operation: "request the next segment",
                    status: SessionStatus::Idle,
                });
            };
            match &mut session.phase {
                Phase::Active { fetching: true } => {
                    return Err(SessionError::FetchInProgress(session.lecture_id));
                }
                Phase::Active { fetching } => *fetching = true,
                other => {
                    return Err(SessionError::InvalidState {
                        operation: "request the next segment",
                        status: other.status(),
                    });
                }
            }
            session.ticket()
        };
        self.drive(ticket).await
    }

    /// Submits the learner's answer to the pending question.
    ///
    /// The question id must match the one the session is waiting on; anything
    /// else is rejected locally without a remote call. A failed submission
    /// keeps the session waiting so the same answer can be sent again.
    #[instrument(skip(self, text))]
    pub async fn submit_answer(
        &self,
        question_id: &str,
        text: &str,
    ) -> Result<AnswerOutcome, SessionError> {
        let ticket = {
            let mut slot = self.lock();
            let Some(session) = slot.session.as_mut() else {
                return Err(SessionError::StaleAnswer {
                    question_id: question_id.to_string(),
                    current: None,
                });
            };
            match &mut session.phase {
                Phase::WaitingForAnswer(pending) => pending.claim(question_id)?,
                _ => {
                    return Err(SessionError::StaleAnswer {
                        question_id: question_id.to_string(),
                        current: None,
                    });
                }
            }
            session.ticket()
        };

        // Dropping the guard reopens the question, on failure or if this call is abandoned.
        let claim = InFlight::new(self, &ticket, Marker::Answer);
        let supplementary = match self.gate.submit(ticket.lecture_id, question_id, text).await {
            Ok(result) => result,
            Err(source) => {
                warn!(error = %source, "Answer submission failed; question stays open.");
                return Err(SessionError::AnswerSubmission {
                    question_id: question_id.to_string(),
                    source,
                });
            }
        };
        claim.disarm();

        let can_continue = supplementary.can_continue;
        self.with_session(&ticket, |session| {
            self.emit(SessionEvent::Supplementary(supplementary.clone()));
            if can_continue {
                session.phase = Phase::Active { fetching: true };
            } else {
                session.phase = Phase::Completed;
                self.emit(SessionEvent::Completed);
            }
        })?;

        let advance = if can_continue {
            self.drive(ticket).await?
        } else {
            info!("Session completed after the last answer.");
            Advance::Completed
        };
        Ok(AnswerOutcome {
            supplementary,
            advance,
        })
    }

    /// Stops the session on the learner's request.
    pub fn cancel(&self) -> bool {
        self.cancel_with(CancelReason::UserStop)
    }

    /// Cancels the session and issues a remote cancel without awaiting it.
    ///
    /// The local transition happens synchronously and regardless of what
    /// the remote call does. Returns `false` when there was nothing to cancel.
    pub fn cancel_with(&self, reason: CancelReason) -> bool {
        match self.cancel_locally(reason) {
            Some(lecture_id) => {
                cancellation::spawn_remote_cancel(self.gateway.clone(), lecture_id);
                true
            }
            None => false,
        }
    }

    /// Cancels the session with reason `Teardown`. Also runs on drop.
    pub fn teardown(&self) -> bool {
        self.cancel_with(CancelReason::Teardown)
    }

    /// Cancels the session and waits for the remote cancel to finish.
    ///
    /// A failing remote cancel is logged; the local session is cancelled
    /// either way.
    pub async fn close(&self, reason: CancelReason) -> bool {
        let Some(lecture_id) = self.cancel_locally(reason) else {
            return false;
        };
        if let Err(e) = self.gateway.cancel(lecture_id).await {
            warn!(%lecture_id, error = %e, "Remote cancel failed.");
        }
        true
    }

    /// Cancels the current session, if any, before starting one for `lecture_id`.
    #[instrument(skip(self), fields(%lecture_id))]
    pub async fn switch_lecture(
        &self,
        lecture_id: LectureId,
    ) -> Result<ChapterManifest, SessionError> {
        self.close(CancelReason::LectureSwitch).await;
        self.initialize(lecture_id).await
    }

    /// Reads the server's view of the current lecture's session.
    pub async fn remote_snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let lecture_id = self.lecture_id().ok_or(SessionError::InvalidState {
            operation: "read the remote session",
            status: SessionStatus::Idle,
        })?;
        self.gateway
            .session(lecture_id)
            .await
            .map_err(|source| SessionError::Snapshot { lecture_id, source })
    }

    /// The explicit advance loop: fetch, classify, publish, repeat.
    ///
    /// Entered with the session Active and its fetch marker set. The marker
    /// is cleared again if the returned future is dropped before completion.
    async fn drive(&self, ticket: Ticket) -> Result<Advance, SessionError> {
        let _fetch = InFlight::new(self, &ticket, Marker::Fetch);
        loop {
            let outcome = match self.fetcher.fetch(ticket.lecture_id, &ticket.abort).await {
                Ok(outcome) => outcome,
                Err(source) => {
                    error!(lecture_id = %ticket.lecture_id, error = %source, "Fetching the next segment failed.");
                    self.fail(&ticket, source.to_string());
                    return Err(SessionError::Fetch {
                        lecture_id: ticket.lecture_id,
                        source,
                    });
                }
            };

            let segment = match outcome {
                PollOutcome::Resolved(segment) => segment,
                PollOutcome::Cancelled => return Ok(Advance::Cancelled),
                PollOutcome::StillWorking { waited, attempts } => {
                    let released = self.with_session(&ticket, |session| {
                        session.phase = Phase::Active { fetching: false };
                        self.emit(SessionEvent::StillWorking { waited, attempts });
                    });
                    return Ok(match released {
                        Ok(()) => Advance::StillWorking { waited },
                        Err(_) => Advance::Cancelled,
                    });
                }
            };

            let decision = self.advancer.decide(&segment, &ticket.abort);
            let applied = self.with_session(&ticket, |session| {
                session.phase = match &decision {
                    Decision::Continue => Phase::Active { fetching: true },
                    Decision::AwaitAnswer(question_id) => {
                        Phase::WaitingForAnswer(PendingQuestion::new(question_id.clone()))
                    }
                    Decision::Pause | Decision::Stop => Phase::Active { fetching: false },
                    Decision::Complete => Phase::Completed,
                };
                self.emit(SessionEvent::Segment(segment.clone()));
                match &decision {
                    Decision::Continue => self.emit(SessionEvent::AdvancePending),
                    Decision::Complete => self.emit(SessionEvent::Completed),
                    _ => {}
                }
            });
            if applied.is_err() {
                return Ok(Advance::Cancelled);
            }

            match decision {
                Decision::Continue => {
                    if !self.advancer.hold(&ticket.abort).await {
                        return Ok(Advance::Cancelled);
                    }
                }
                Decision::AwaitAnswer(question_id) => {
                    info!(%question_id, "Waiting for the learner's answer.");
                    return Ok(Advance::AwaitingAnswer { question_id });
                }
                Decision::Pause => return Ok(Advance::Paused),
                Decision::Complete => {
                    info!("Session completed.");
                    return Ok(Advance::Completed);
                }
                Decision::Stop => return Ok(Advance::Cancelled),
            }
        }
    }

    fn cancel_locally(&self, reason: CancelReason) -> Option<LectureId> {
        let mut slot = self.lock();
        let session = slot.session.as_mut()?;
        if session.phase.status().is_terminal() {
            return None;
        }
        session.abort.raise(reason);
        session.phase = Phase::Cancelled(reason);
        self.emit(SessionEvent::Cancelled {
            lecture_id: session.lecture_id,
            reason,
        });
        info!(lecture_id = %session.lecture_id, %reason, "Session cancelled.");
        Some(session.lecture_id)
    }

    fn fail(&self, ticket: &Ticket, message: String) {
        let _ = self.with_session(ticket, |session| {
            self.emit(SessionEvent::Failed {
                message: message.clone(),
            });
            session.phase = Phase::Errored(message);
        });
    }

    /// Runs `f` against the ticket's session if it is still current and not aborted.
    fn with_session<R>(
        &self,
        ticket: &Ticket,
        f: impl FnOnce(&mut Session) -> R,
    ) -> Result<R, SessionError> {
        let mut slot = self.lock();
        match slot.session.as_mut() {
            Some(session) if session.generation == ticket.generation && !session.abort.is_raised() => {
                Ok(f(session))
            }
            _ => Err(SessionError::Cancelled),
        }
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(tx) = &self.events {
            if tx.send(event).is_err() {
                warn!("Failed to publish session event: receiver dropped.");
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        gateway::scripted::{ScriptedSessionGateway, concept},
        segment::ChapterManifest,
    };

    fn controller(gateway: ScriptedSessionGateway) -> SessionController {
        SessionController::new(Arc::new(gateway), PollPolicy::default(), None)
    }

    #[test]
    fn test_status_terminality() {
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Cancelled.is_terminal());
        assert!(SessionStatus::Errored.is_terminal());
        assert!(!SessionStatus::Idle.is_terminal());
        assert!(!SessionStatus::WaitingForAnswer.is_terminal());
        assert_eq!(
            SessionStatus::WaitingForAnswer.to_string(),
            "waiting for an answer"
        );
    }

    #[tokio::test]
    async fn test_idle_controller_rejects_operations() {
        let controller = controller(ScriptedSessionGateway::new(ChapterManifest::default()));
        assert_eq!(controller.status(), SessionStatus::Idle);
        assert!(matches!(
            controller.request_next().await,
            Err(SessionError::InvalidState {
                status: SessionStatus::Idle,
                ..
            })
        ));
        assert!(matches!(
            controller.submit_answer("q1", "42").await,
            Err(SessionError::StaleAnswer { current: None, .. })
        ));
        assert!(!controller.cancel());
    }

    #[tokio::test]
    async fn test_fetch_marker_release_is_scoped_to_its_session() {
        let controller = controller(ScriptedSessionGateway::new(ChapterManifest::default()));
        controller.initialize(LectureId(1)).await.unwrap();
        let replaced = controller.lock().session.as_ref().unwrap().ticket();
        assert!(controller.cancel());
        controller.initialize(LectureId(2)).await.unwrap();
        controller.lock().session.as_mut().unwrap().phase = Phase::Active { fetching: true };

        drop(InFlight::new(&controller, &replaced, Marker::Fetch));
        assert!(matches!(
            controller.request_next().await,
            Err(SessionError::FetchInProgress(LectureId(2)))
        ));

        let current = controller.lock().session.as_ref().unwrap().ticket();
        InFlight::new(&controller, &current, Marker::Fetch).disarm();
        assert!(matches!(
            controller.lock().session.as_ref().unwrap().phase,
            Phase::Active { fetching: true }
        ));

        drop(InFlight::new(&controller, &current, Marker::Fetch));
        assert!(matches!(
            controller.lock().session.as_ref().unwrap().phase,
            Phase::Active { fetching: false }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_session_can_be_replaced() {
        let gateway =
            ScriptedSessionGateway::new(ChapterManifest::default()).push_next(concept(None, "only", false));
        let controller = controller(gateway);
        controller.initialize(LectureId(1)).await.unwrap();
        assert_eq!(controller.request_next().await.unwrap(), Advance::Completed);
        assert_eq!(controller.status(), SessionStatus::Completed);

        assert!(!controller.cancel());
        controller.initialize(LectureId(2)).await.unwrap();
        assert_eq!(controller.status(), SessionStatus::Active);
        assert_eq!(controller.lecture_id(), Some(LectureId(2)));
    }
}
