//! Gating the session on a pending question.

use crate::{
    error::{GatewayError, SessionError},
    gateway::SessionGateway,
    segment::{AnswerRequest, LectureId, SupplementaryResult},
};
use std::sync::Arc;
use tracing::{info, instrument};

/// The single question a session is blocked on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingQuestion {
    question_id: String,
    in_flight: bool,
}

impl PendingQuestion {
    pub fn new(question_id: impl Into<String>) -> Self {
        Self {
            question_id: question_id.into(),
            in_flight: false,
        }
    }

    pub fn question_id(&self) -> &str {
        &self.question_id
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// Reserves the question for one submission.
    pub fn claim(&mut self, question_id: &str) -> Result<(), SessionError> {
        if self.question_id != question_id {
            return Err(SessionError::StaleAnswer {
                question_id: question_id.to_string(),
                current: Some(self.question_id.clone()),
            });
        }
        if self.in_flight {
            return Err(SessionError::AnswerInFlight {
                question_id: question_id.to_string(),
            });
        }
        self.in_flight = true;
        Ok(())
    }

    /// Gives the question back after a failed submission so it can be retried.
    pub fn release(&mut self) {
        self.in_flight = false;
    }
}

pub struct AnswerGate {
    gateway: Arc<dyn SessionGateway>,
}

impl AnswerGate {
    pub fn new(gateway: Arc<dyn SessionGateway>) -> Self {
        Self { gateway }
    }

    #[instrument(skip(self, text), fields(%lecture_id))]
    pub async fn submit(
        &self,
        lecture_id: LectureId,
        question_id: &str,
        text: &str,
    ) -> Result<SupplementaryResult, GatewayError> {
        let request = AnswerRequest {
            ai_question_id: question_id.to_string(),
            answer: text.to_string(),
        };
        let reply = self.gateway.answer(lecture_id, request).await?;
        info!(can_continue = reply.can_continue, "Answer accepted.");
        Ok(reply.into_result(question_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{gateway::MockSessionGateway, segment::AnswerReply};
    use mockall::predicate::eq;

    #[test]
    fn test_claim_rejects_other_question() {
        let mut pending = PendingQuestion::new("q1");
        let err = pending.claim("q0").unwrap_err();
        match err {
            SessionError::StaleAnswer {
                question_id,
                current,
            } => {
                assert_eq!(question_id, "q0");
                assert_eq!(current.as_deref(), Some("q1"));
            }
            other => panic!("Expected StaleAnswer, got {other:?}"),
        }
        assert!(!pending.in_flight());
    }

    #[test]
    fn test_claim_is_exclusive_until_released() {
        let mut pending = PendingQuestion::new("q1");
        pending.claim("q1").unwrap();
        assert!(matches!(
            pending.claim("q1"),
            Err(SessionError::AnswerInFlight { .. })
        ));
        pending.release();
        assert!(pending.claim("q1").is_ok());
    }

    #[tokio::test]
    async fn test_submit_sends_pair_and_maps_result() {
        let mut gateway = MockSessionGateway::new();
        gateway
            .expect_answer()
            .with(
                eq(LectureId(42)),
                eq(AnswerRequest {
                    ai_question_id: "q1".to_string(),
                    answer: "42".to_string(),
                }),
            )
            .times(1)
            .returning(|_, _| {
                Ok(AnswerReply {
                    can_continue: true,
                    supplementary: Some("Correct, because...".to_string()),
                    ..Default::default()
                })
            });

        let result = AnswerGate::new(Arc::new(gateway))
            .submit(LectureId(42), "q1", "42")
            .await
            .unwrap();
        assert_eq!(result.question_id, "q1");
        assert_eq!(result.text.as_deref(), Some("Correct, because..."));
        assert!(result.can_continue);
    }
}
