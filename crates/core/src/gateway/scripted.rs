//! A deterministic gateway that replays a prepared script.
//!
//! Replies are queued per operation and handed out in order. Every call is
//! recorded, which lets callers assert exactly which remote operations a
//! session issued. The `demo` script drives the offline mode of the terminal
//! front end.

use super::SessionGateway;
use crate::{
    error::GatewayError,
    segment::{
        AnswerReply, AnswerRequest, Chapter, ChapterManifest, InitializeReply, LectureId,
        NextReply, SessionSnapshot,
    },
};
use async_trait::async_trait;
use std::{
    collections::{HashSet, VecDeque},
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

/// A remote operation as observed by the scripted gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    Initialize(LectureId),
    Next(LectureId),
    Answer(LectureId, AnswerRequest),
    Cancel(LectureId),
    Session(LectureId),
}

#[derive(Default)]
struct Script {
    initialize: VecDeque<Result<InitializeReply, GatewayError>>,
    next: VecDeque<Result<NextReply, GatewayError>>,
    answers: VecDeque<Result<AnswerReply, GatewayError>>,
    calls: Vec<GatewayCall>,
    cancelled: HashSet<LectureId>,
}

pub struct ScriptedSessionGateway {
    manifest: ChapterManifest,
    latency: Duration,
    script: Mutex<Script>,
}

impl ScriptedSessionGateway {
    /// Creates an empty script whose `initialize` always returns `manifest`.
    pub fn new(manifest: ChapterManifest) -> Self {
        Self {
            manifest,
            latency: Duration::ZERO,
            script: Mutex::new(Script::default()),
        }
    }

    /// Delays every `next` and `answer` reply, like a slow server would.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn push_next(mut self, reply: NextReply) -> Self {
        self.script_mut().next.push_back(Ok(reply));
        self
    }

    pub fn push_processing(mut self, times: usize) -> Self {
        let script = self.script_mut();
        for _ in 0..times {
            script.next.push_back(Ok(NextReply::processing()));
        }
        self
    }

    pub fn push_next_error(mut self, err: GatewayError) -> Self {
        self.script_mut().next.push_back(Err(err));
        self
    }

    pub fn push_answer(mut self, reply: AnswerReply) -> Self {
        self.script_mut().answers.push_back(Ok(reply));
        self
    }

    pub fn push_answer_error(mut self, err: GatewayError) -> Self {
        self.script_mut().answers.push_back(Err(err));
        self
    }

    /// Makes the next `initialize` call fail once.
    pub fn fail_initialize(mut self, err: GatewayError) -> Self {
        self.script_mut().initialize.push_back(Err(err));
        self
    }

    /// All calls received so far, in arrival order.
    pub fn calls(&self) -> Vec<GatewayCall> {
        self.script().calls.clone()
    }

    pub fn next_calls(&self) -> usize {
        self.script()
            .calls
            .iter()
            .filter(|call| matches!(call, GatewayCall::Next(_)))
            .count()
    }

    /// A short two-chapter lecture with one question per chapter.
    pub fn demo() -> Self {
        let manifest = ChapterManifest {
            total_chapters: 2,
            chapters: vec![
                Chapter {
                    title: "Stacks and Queues".to_string(),
                    start_page: 1,
                    end_page: 6,
                },
                Chapter {
                    title: "Hash Tables".to_string(),
                    start_page: 7,
                    end_page: 12,
                },
            ],
        };
        Self::new(manifest)
            .with_latency(Duration::from_millis(300))
            .push_processing(2)
            .push_next(concept(
                Some("Stacks and Queues"),
                "A stack is a last-in, first-out collection: the element pushed most recently is the first one popped. A queue is first-in, first-out.",
                true,
            ))
            .push_next(question(
                "demo-q1",
                Some("Stacks and Queues"),
                "Which element does `pop` return after pushing 1, 2 and 3 onto an empty stack?",
                true,
            ))
            .push_answer(answer(
                true,
                "Right: 3 was pushed last, so it sits on top and is popped first.",
            ))
            .push_processing(1)
            .push_next(concept(
                Some("Hash Tables"),
                "A hash table maps keys to buckets with a hash function, giving average constant-time lookups. Collisions are resolved by chaining or open addressing.",
                true,
            ))
            .push_next(question(
                "demo-q2",
                Some("Hash Tables"),
                "What happens when two keys hash to the same bucket?",
                false,
            ))
            .push_answer(answer(
                false,
                "Exactly, that is a collision; chaining keeps both entries in a list at that bucket.",
            ))
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn script_mut(&mut self) -> &mut Script {
        self.script.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: GatewayCall) {
        self.script().calls.push(call);
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

/// A resolved explanatory segment.
pub fn concept(chapter_title: Option<&str>, text: &str, has_more: bool) -> NextReply {
    NextReply {
        status: Some("OK".to_string()),
        content_type: Some("CONCEPT".to_string()),
        content_data: Some(text.to_string()),
        chapter_title: chapter_title.map(str::to_string),
        has_more,
        ..Default::default()
    }
}

/// A resolved question that blocks the session until answered.
pub fn question(
    question_id: &str,
    chapter_title: Option<&str>,
    text: &str,
    has_more: bool,
) -> NextReply {
    NextReply {
        status: Some("OK".to_string()),
        content_type: Some("QUESTION".to_string()),
        content_data: Some(text.to_string()),
        chapter_title: chapter_title.map(str::to_string),
        has_more,
        waiting_for_answer: true,
        ai_question_id: Some(question_id.to_string()),
        ..Default::default()
    }
}

pub fn answer(can_continue: bool, supplementary: &str) -> AnswerReply {
    AnswerReply {
        status: Some("OK".to_string()),
        can_continue,
        supplementary: Some(supplementary.to_string()),
        ..Default::default()
    }
}

#[async_trait]
impl SessionGateway for ScriptedSessionGateway {
    async fn initialize(&self, lecture_id: LectureId) -> Result<InitializeReply, GatewayError> {
        let scripted = {
            let mut script = self.script();
            script.calls.push(GatewayCall::Initialize(lecture_id));
            script.cancelled.remove(&lecture_id);
            script.initialize.pop_front()
        };
        scripted.unwrap_or_else(|| {
            Ok(InitializeReply {
                status: Some("OK".to_string()),
                lecture_id: Some(lecture_id.0),
                total_chapters: self.manifest.total_chapters,
                chapters: self.manifest.chapters.clone(),
            })
        })
    }

    async fn next(&self, lecture_id: LectureId) -> Result<NextReply, GatewayError> {
        self.record(GatewayCall::Next(lecture_id));
        self.simulate_latency().await;
        self.script()
            .next
            .pop_front()
            .unwrap_or_else(|| Err(GatewayError::Unavailable("script exhausted".to_string())))
    }

    async fn answer(
        &self,
        lecture_id: LectureId,
        request: AnswerRequest,
    ) -> Result<AnswerReply, GatewayError> {
        self.record(GatewayCall::Answer(lecture_id, request));
        self.simulate_latency().await;
        self.script()
            .answers
            .pop_front()
            .unwrap_or_else(|| Err(GatewayError::Unavailable("script exhausted".to_string())))
    }

    async fn cancel(&self, lecture_id: LectureId) -> Result<(), GatewayError> {
        let mut script = self.script();
        script.calls.push(GatewayCall::Cancel(lecture_id));
        script.cancelled.insert(lecture_id);
        Ok(())
    }

    async fn session(&self, lecture_id: LectureId) -> Result<SessionSnapshot, GatewayError> {
        let mut script = self.script();
        script.calls.push(GatewayCall::Session(lecture_id));
        let status = if script.cancelled.contains(&lecture_id) {
            "CANCELLED"
        } else {
            "ACTIVE"
        };
        Ok(SessionSnapshot {
            status: Some(status.to_string()),
            lecture_id: Some(lecture_id.0),
            service_status: Some("READY".to_string()),
            ..Default::default()
        })
    }
}
