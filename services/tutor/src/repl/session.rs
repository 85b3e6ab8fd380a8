//! Manages the terminal dialogue for a tutoring session.
//!
//! The REPL reads commands line by line and never blocks on the network:
//! every controller call that may wait (initialize, polling, answering) runs
//! in a driver task, while the main loop keeps reading input and rendering
//! the controller's events. That is what lets `/stop` cut a long poll short.

use super::protocol::{HELP, UserCommand, render_event};
use crate::state::AppState;
use anyhow::{Context, Result};
use std::{future::Future, sync::Arc, time::Duration};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt},
    sync::mpsc,
    task::{JoinError, JoinSet},
};
use tracing::{debug, error, info, instrument, warn};
use tutor_core::{
    SessionEvent,
    cancellation::CancelReason,
    error::SessionError,
    segment::{LectureId, SessionSnapshot},
    session::{Advance, SessionController},
};

/// How long an interrupt waits for the remote cancel before giving up.
const UNLOAD_GRACE: Duration = Duration::from_secs(1);

/// What a finished driver task hands back to the REPL.
#[derive(Debug)]
enum Reply {
    Advance(Advance),
    Snapshot(SessionSnapshot),
}

type DriverResult = Result<Reply, SessionError>;

enum Flow {
    Continue,
    Quit,
}

pub struct Repl<W> {
    state: AppState,
    default_lecture: Option<LectureId>,
    out: W,
    drivers: JoinSet<DriverResult>,
}

impl<W: AsyncWrite + Unpin> Repl<W> {
    pub fn new(state: AppState, default_lecture: Option<LectureId>, out: W) -> Self {
        Self {
            state,
            default_lecture,
            out,
            drivers: JoinSet::new(),
        }
    }

    /// Runs until `/quit`, end of input, or `shutdown` resolves.
    ///
    /// `/quit` and end of input close the session and wait for the remote
    /// cancel. `shutdown` cancels with reason `Unload` and gives the remote
    /// cancel at most [`UNLOAD_GRACE`] to go out. The writer is handed back
    /// when the loop ends.
    #[instrument(name = "repl", skip_all)]
    pub async fn run<R, S>(
        mut self,
        input: R,
        mut events: mpsc::UnboundedReceiver<SessionEvent>,
        shutdown: S,
    ) -> Result<W>
    where
        R: AsyncBufRead + Unpin,
        S: Future<Output = ()>,
    {
        let mut lines = input.lines();
        tokio::pin!(shutdown);

        self.print(&["Type /help for commands."]).await?;
        if let Some(lecture_id) = self.default_lecture {
            self.spawn(start(self.state.controller.clone(), lecture_id, false));
        }

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Interrupted; cancelling the session.");
                    let close = self.state.controller.close(CancelReason::Unload);
                    if tokio::time::timeout(UNLOAD_GRACE, close).await.is_err() {
                        warn!("Remote cancel did not finish in time; giving up on it.");
                    }
                    self.drivers.abort_all();
                    break;
                }
                line = lines.next_line() => {
                    let line = line.context("Failed to read from input")?;
                    let flow = match line {
                        Some(line) => self.handle_line(&line).await?,
                        None => {
                            info!("End of input.");
                            Flow::Quit
                        }
                    };
                    if let Flow::Quit = flow {
                        self.state.controller.close(CancelReason::Teardown).await;
                        self.drivers.abort_all();
                        break;
                    }
                }
                Some(event) = events.recv() => self.render(&event).await?,
                Some(joined) = self.drivers.join_next() => self.report(joined).await?,
            }
        }

        while let Ok(event) = events.try_recv() {
            self.render(&event).await?;
        }
        self.out.flush().await?;
        Ok(self.out)
    }

    async fn handle_line(&mut self, line: &str) -> Result<Flow> {
        let command = match UserCommand::parse(line) {
            Ok(command) => command,
            Err(e) => {
                self.print(&[e.to_string()]).await?;
                return Ok(Flow::Continue);
            }
        };
        debug!(?command, "Handling command.");

        let controller = self.state.controller.clone();
        match command {
            UserCommand::Start(lecture_id) => match lecture_id.or(self.default_lecture) {
                Some(lecture_id) => self.spawn(start(controller, lecture_id, false)),
                None => {
                    self.print(&["/start needs a lecture id (or run with --lecture)."])
                        .await?
                }
            },
            UserCommand::Switch(lecture_id) => self.spawn(start(controller, lecture_id, true)),
            UserCommand::Next => self.spawn(advance(controller)),
            UserCommand::Text(text) => match controller.current_question() {
                Some(question_id) => self.spawn(async move {
                    controller
                        .submit_answer(&question_id, &text)
                        .await
                        .map(|outcome| Reply::Advance(outcome.advance))
                }),
                None => self.spawn(advance(controller)),
            },
            UserCommand::Stop => {
                if !controller.cancel() {
                    self.print(&["No session in progress."]).await?;
                }
            }
            UserCommand::Status => {
                let lines = self.status_lines();
                self.print(lines.as_slice()).await?;
            }
            UserCommand::Remote => self.spawn(async move {
                controller.remote_snapshot().await.map(Reply::Snapshot)
            }),
            UserCommand::Help => self.print(&[HELP]).await?,
            UserCommand::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    fn spawn<F>(&mut self, driver: F)
    where
        F: Future<Output = DriverResult> + Send + 'static,
    {
        self.drivers.spawn(driver);
    }

    async fn report(&mut self, joined: Result<DriverResult, JoinError>) -> Result<()> {
        match joined {
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => {
                error!(error = %e, "Session driver panicked.");
                self.print(&["Internal error; see the log for details."]).await
            }
            Ok(Ok(Reply::Advance(Advance::Paused))) => {
                self.print(&["Press Enter to continue."]).await
            }
            Ok(Ok(Reply::Advance(_))) => Ok(()),
            Ok(Ok(Reply::Snapshot(snapshot))) => {
                let line = format!(
                    "Server session: {} (service {})",
                    snapshot.status.as_deref().unwrap_or("unknown"),
                    snapshot.service_status.as_deref().unwrap_or("unknown"),
                );
                self.print(&[line]).await
            }
            // Fatal errors and cancellations already surfaced as events.
            Ok(Err(e)) if e.is_fatal() => Ok(()),
            Ok(Err(SessionError::Cancelled)) => Ok(()),
            Ok(Err(e)) => {
                warn!(error = %e, "Command failed.");
                self.print(&[e.to_string()]).await
            }
        }
    }

    fn status_lines(&self) -> Vec<String> {
        let controller = &self.state.controller;
        let config = &self.state.config;
        let mut lines = vec![format!(
            "Backend: {} (polling every {} ms)",
            self.state.backend,
            config.poll_interval.as_millis()
        )];
        let Some(lecture_id) = controller.lecture_id() else {
            lines.push("No session.".to_string());
            return lines;
        };
        lines.push(format!("Lecture {lecture_id}: {}", controller.status()));
        if let Some(question_id) = controller.current_question() {
            lines.push(format!("Waiting for an answer to question {question_id}."));
        }
        if let Some(reason) = controller.cancel_reason() {
            lines.push(format!("Cancelled: {reason}."));
        }
        if let Some(message) = controller.failure() {
            lines.push(format!("Failed: {message}"));
        }
        lines
    }

    async fn render(&mut self, event: &SessionEvent) -> Result<()> {
        let lines = render_event(event);
        self.print(lines.as_slice()).await
    }

    async fn print<L: AsRef<str>>(&mut self, lines: &[L]) -> Result<()> {
        for line in lines {
            self.out.write_all(line.as_ref().as_bytes()).await?;
            self.out.write_all(b"\n").await?;
        }
        self.out.flush().await?;
        Ok(())
    }
}

/// Starts (or switches to) a lecture and streams up to the first stop.
async fn start(
    controller: Arc<SessionController>,
    lecture_id: LectureId,
    switch: bool,
) -> DriverResult {
    if switch {
        controller.switch_lecture(lecture_id).await?;
    } else {
        controller.initialize(lecture_id).await?;
    }
    advance(controller).await
}

async fn advance(controller: Arc<SessionController>) -> DriverResult {
    controller.request_next().await.map(Reply::Advance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::time::Duration;
    use tokio::io::{AsyncWriteExt, BufReader, DuplexStream};
    use tutor_core::{
        gateway::{
            GatewayCall, ScriptedSessionGateway,
            scripted::{answer, concept, question},
        },
        polling::PollPolicy,
        segment::ChapterManifest,
        session::SessionStatus,
    };

    fn config() -> Config {
        Config {
            api_url: "http://localhost".to_string(),
            access_token: None,
            poll_interval: Duration::from_secs(2),
            advance_delay: Duration::from_millis(500),
            soft_ceiling: None,
            request_timeout: Duration::from_secs(30),
            log_level: tracing::Level::INFO,
        }
    }

    struct Harness {
        gateway: Arc<ScriptedSessionGateway>,
        state: AppState,
        events: mpsc::UnboundedReceiver<SessionEvent>,
        input: DuplexStream,
        server: DuplexStream,
    }

    fn harness(gateway: ScriptedSessionGateway) -> Harness {
        let gateway = Arc::new(gateway);
        let (tx, events) = mpsc::unbounded_channel();
        let controller = Arc::new(SessionController::new(
            gateway.clone(),
            PollPolicy::default(),
            Some(tx),
        ));
        let (input, server) = tokio::io::duplex(1024);
        Harness {
            gateway,
            state: AppState {
                controller,
                config: Arc::new(config()),
                backend: "scripted".to_string(),
            },
            events,
            input,
            server,
        }
    }

    fn lecture() -> ScriptedSessionGateway {
        ScriptedSessionGateway::new(ChapterManifest::default())
            .push_next(concept(Some("Queues"), "A queue is FIFO.", true))
            .push_next(question("q1", Some("Queues"), "What is dequeued first?", true))
            .push_answer(answer(true, ""))
            .push_next(concept(Some("Queues"), "That is all.", false))
    }

    async fn type_line(input: &mut DuplexStream, line: &str) {
        input.write_all(format!("{line}\n").as_bytes()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_walkthrough_through_the_terminal() {
        let Harness {
            gateway,
            state,
            events,
            mut input,
            server,
        } = harness(lecture());
        let repl = Repl::new(state.clone(), Some(LectureId(42)), Vec::new());
        let running = tokio::spawn(repl.run(
            BufReader::new(server),
            events,
            std::future::pending::<()>(),
        ));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(state.controller.status(), SessionStatus::WaitingForAnswer);
        type_line(&mut input, "the oldest element").await;
        assert_eq!(state.controller.status(), SessionStatus::Completed);
        type_line(&mut input, "/quit").await;

        let output = String::from_utf8(running.await.unwrap().unwrap()).unwrap();
        assert!(output.contains("Session started for lecture 42"));
        assert!(output.contains("[Queues] Concept\nA queue is FIFO."));
        assert!(output.contains("[Queues] Question\nWhat is dequeued first?"));
        assert!(output.contains("Please answer the question above."));
        assert!(output.contains("No supplementary explanation was provided."));
        assert!(output.contains("Lecture complete."));
        assert!(gateway.calls().contains(&GatewayCall::Answer(
            LectureId(42),
            tutor_core::segment::AnswerRequest {
                ai_question_id: "q1".to_string(),
                answer: "the oldest element".to_string(),
            }
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_a_running_poll() {
        let gateway = ScriptedSessionGateway::new(ChapterManifest::default()).push_processing(50);
        let Harness {
            gateway,
            state,
            events,
            mut input,
            server,
        } = harness(gateway);
        let repl = Repl::new(state.clone(), None, Vec::new());
        let running = tokio::spawn(repl.run(
            BufReader::new(server),
            events,
            std::future::pending::<()>(),
        ));

        type_line(&mut input, "/start 3").await;
        assert_eq!(state.controller.status(), SessionStatus::Active);
        type_line(&mut input, "/stop").await;
        let polled = gateway.next_calls();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(gateway.next_calls(), polled);
        assert_eq!(
            state.controller.cancel_reason(),
            Some(CancelReason::UserStop)
        );

        drop(input);
        let output = String::from_utf8(running.await.unwrap().unwrap()).unwrap();
        assert!(output.contains("Session for lecture 3 cancelled (stopped by user)."));
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_of_input_tears_down() {
        let Harness {
            gateway,
            state,
            events,
            mut input,
            server,
        } = harness(lecture());
        let repl = Repl::new(state.clone(), Some(LectureId(5)), Vec::new());
        let running = tokio::spawn(repl.run(
            BufReader::new(server),
            events,
            std::future::pending::<()>(),
        ));

        tokio::time::sleep(Duration::from_secs(5)).await;
        input.shutdown().await.unwrap();
        drop(input);
        running.await.unwrap().unwrap();

        assert_eq!(
            state.controller.cancel_reason(),
            Some(CancelReason::Teardown)
        );
        assert_eq!(
            gateway.calls().last(),
            Some(&GatewayCall::Cancel(LectureId(5)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_signal_unloads() {
        let Harness {
            gateway,
            state,
            events,
            input: _input,
            server,
        } = harness(lecture());
        let (trigger, signal) = tokio::sync::oneshot::channel::<()>();
        let repl = Repl::new(state.clone(), Some(LectureId(6)), Vec::new());
        let running = tokio::spawn(repl.run(BufReader::new(server), events, async move {
            let _ = signal.await;
        }));

        tokio::time::sleep(Duration::from_secs(5)).await;
        trigger.send(()).unwrap();
        running.await.unwrap().unwrap();

        assert_eq!(state.controller.status(), SessionStatus::Cancelled);
        assert_eq!(state.controller.cancel_reason(), Some(CancelReason::Unload));
        assert_eq!(
            gateway.calls().last(),
            Some(&GatewayCall::Cancel(LectureId(6)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_and_errors_are_printed() {
        let Harness {
            state,
            events,
            mut input,
            server,
            ..
        } = harness(lecture());
        let repl = Repl::new(state.clone(), None, Vec::new());
        let running = tokio::spawn(repl.run(
            BufReader::new(server),
            events,
            std::future::pending::<()>(),
        ));

        type_line(&mut input, "/status").await;
        type_line(&mut input, "/start").await;
        type_line(&mut input, "/bogus").await;
        type_line(&mut input, "/next").await;
        drop(input);

        let output = String::from_utf8(running.await.unwrap().unwrap()).unwrap();
        assert!(output.contains("Backend: scripted (polling every 2000 ms)"));
        assert!(output.contains("No session."));
        assert!(output.contains("/start needs a lecture id"));
        assert!(output.contains("Unknown command: /bogus"));
        assert!(output.contains("cannot request the next segment while the session is idle"));
    }
}
