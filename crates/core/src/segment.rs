//! Session content types and their wire representations.
//!
//! The `*Reply` structs mirror the JSON bodies exchanged with the streaming
//! endpoints. They are lenient: a "processing" reply carries
//! little more than its status, so every field has a default.

use crate::error::GatewayError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of the lecture a session is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LectureId(pub u64);

impl fmt::Display for LectureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of content carried by a segment.
///
/// Unrecognized values are preserved verbatim in `Other` and behave like
/// `Concept` everywhere in the session logic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ContentType {
    Concept,
    Question,
    Supplementary,
    Script,
    Other(String),
}

impl ContentType {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "CONCEPT" => ContentType::Concept,
            "QUESTION" => ContentType::Question,
            "SUPPLEMENTARY" => ContentType::Supplementary,
            "SCRIPT" => ContentType::Script,
            _ => ContentType::Other(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ContentType::Concept => "CONCEPT",
            ContentType::Question => "QUESTION",
            ContentType::Supplementary => "SUPPLEMENTARY",
            ContentType::Script => "SCRIPT",
            ContentType::Other(raw) => raw,
        }
    }

    pub fn is_question(&self) -> bool {
        matches!(self, ContentType::Question)
    }
}

impl From<String> for ContentType {
    fn from(raw: String) -> Self {
        ContentType::parse(&raw)
    }
}

impl From<ContentType> for String {
    fn from(content_type: ContentType) -> Self {
        content_type.as_str().to_string()
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One resolved unit of tutoring content.
///
/// `question_id` is present exactly when the server is waiting for an answer,
/// so a segment can never claim to wait without naming its question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub content_type: ContentType,
    pub text: String,
    pub chapter_title: Option<String>,
    pub has_more: bool,
    pub question_id: Option<String>,
}

/// A chapter of the source material, established during initialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub title: String,
    #[serde(default)]
    pub start_page: u32,
    #[serde(default)]
    pub end_page: u32,
}

/// Read-only chapter overview returned when a session starts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChapterManifest {
    pub total_chapters: u32,
    pub chapters: Vec<Chapter>,
}

/// Outcome of answering a question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupplementaryResult {
    pub question_id: String,
    /// Explanatory text; `None` when the server sent nothing useful.
    pub text: Option<String>,
    pub question: Option<String>,
    pub chapter_title: Option<String>,
    /// Whether more segments exist after this question.
    pub can_continue: bool,
}

// --- Wire Types ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InitializeReply {
    pub status: Option<String>,
    pub lecture_id: Option<u64>,
    pub total_chapters: u32,
    pub chapters: Vec<Chapter>,
}

impl InitializeReply {
    pub fn into_manifest(self) -> ChapterManifest {
        ChapterManifest {
            total_chapters: self.total_chapters,
            chapters: self.chapters,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NextReply {
    pub status: Option<String>,
    pub lecture_id: Option<u64>,
    pub content_type: Option<String>,
    pub content_data: Option<String>,
    pub chapter_title: Option<String>,
    pub has_more: bool,
    pub waiting_for_answer: bool,
    pub ai_question_id: Option<String>,
}

impl NextReply {
    /// A reply telling the caller the segment is not ready yet.
    pub fn processing() -> Self {
        Self {
            status: Some("PROCESSING".to_string()),
            ..Default::default()
        }
    }

    /// Whether the server is still generating content (case-insensitive).
    pub fn is_processing(&self) -> bool {
        self.status
            .as_deref()
            .is_some_and(|status| status.trim().eq_ignore_ascii_case("PROCESSING"))
    }

    /// Converts a resolved reply into a [`Segment`].
    ///
    /// A reply that waits for an answer without naming the question is
    /// rejected; a question id sent alongside `waitingForAnswer == false` is
    /// ignored.
    pub fn into_segment(self) -> Result<Segment, GatewayError> {
        let question_id = match (self.waiting_for_answer, self.ai_question_id) {
            (true, Some(id)) if !id.trim().is_empty() => Some(id),
            (true, _) => {
                return Err(GatewayError::MalformedReply(
                    "reply is waiting for an answer but has no aiQuestionId".to_string(),
                ));
            }
            (false, _) => None,
        };
        Ok(Segment {
            content_type: ContentType::parse(self.content_type.as_deref().unwrap_or_default()),
            text: self.content_data.unwrap_or_default(),
            chapter_title: self.chapter_title.filter(|title| !title.trim().is_empty()),
            has_more: self.has_more,
            question_id,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRequest {
    pub ai_question_id: String,
    pub answer: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnswerReply {
    pub status: Option<String>,
    pub lecture_id: Option<u64>,
    pub ai_question_id: Option<String>,
    pub question: Option<String>,
    pub chapter_title: Option<String>,
    pub can_continue: bool,
    pub supplementary: Option<String>,
}

impl AnswerReply {
    pub fn into_result(self, question_id: &str) -> SupplementaryResult {
        SupplementaryResult {
            question_id: self
                .ai_question_id
                .unwrap_or_else(|| question_id.to_string()),
            text: self
                .supplementary
                .map(|text| text.trim().to_string())
                .filter(|text| !text.is_empty()),
            question: self.question,
            chapter_title: self.chapter_title,
            can_continue: self.can_continue,
        }
    }
}

/// The server's view of a streaming session. Informational only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSnapshot {
    pub status: Option<String>,
    pub lecture_id: Option<u64>,
    pub service_status: Option<String>,
    pub chapters: Option<serde_json::Value>,
    pub questions: Option<serde_json::Value>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub error: Option<serde_json::Value>,
}
