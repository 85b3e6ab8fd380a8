//! Defines the line protocol between the terminal and the session driver.
//!
//! Input lines parse into [`UserCommand`]s; [`SessionEvent`]s render into
//! output lines. Neither direction touches session state.

use tutor_core::{
    SessionEvent,
    segment::{ContentType, LectureId, Segment, SupplementaryResult},
};

pub const ANSWER_PROMPT: &str = "Please answer the question above.";
pub const NO_SUPPLEMENTARY: &str = "No supplementary explanation was provided.";

pub const HELP: &str = "\
Commands:
  /start [id]    start a session (defaults to --lecture)
  /next          request the next segment
  /stop          cancel the current session
  /switch <id>   cancel and start a session for another lecture
  /status        show the local session status
  /remote        show the server's view of the session
  /quit          cancel and exit
Press Enter to advance; type text to answer a pending question.";

/// A single line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    Start(Option<LectureId>),
    Next,
    Stop,
    Switch(LectureId),
    Status,
    Remote,
    Quit,
    Help,
    /// Free text: an answer while a question is pending, "next" otherwise.
    Text(String),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown command: /{0} (type /help for a list)")]
    Unknown(String),
    #[error("/{0} needs a lecture id")]
    MissingLecture(&'static str),
    #[error("'{0}' is not a valid lecture id")]
    InvalidLecture(String),
}

impl UserCommand {
    /// Parses one input line. An empty line advances.
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let line = line.trim();
        let Some(command) = line.strip_prefix('/') else {
            return Ok(if line.is_empty() {
                UserCommand::Next
            } else {
                UserCommand::Text(line.to_string())
            });
        };

        let mut parts = command.split_whitespace();
        let name = parts.next().unwrap_or_default().to_ascii_lowercase();
        let argument = parts.next();
        match name.as_str() {
            "start" => argument
                .map(parse_lecture)
                .transpose()
                .map(UserCommand::Start),
            "next" => Ok(UserCommand::Next),
            "stop" | "cancel" => Ok(UserCommand::Stop),
            "switch" => {
                let raw = argument.ok_or(CommandError::MissingLecture("switch"))?;
                parse_lecture(raw).map(UserCommand::Switch)
            }
            "status" => Ok(UserCommand::Status),
            "remote" => Ok(UserCommand::Remote),
            "quit" | "exit" => Ok(UserCommand::Quit),
            "help" | "?" => Ok(UserCommand::Help),
            _ => Err(CommandError::Unknown(name)),
        }
    }
}

fn parse_lecture(raw: &str) -> Result<LectureId, CommandError> {
    raw.parse::<u64>()
        .map(LectureId)
        .map_err(|_| CommandError::InvalidLecture(raw.to_string()))
}

/// Formats an event for the terminal. Events with nothing to show yield no lines.
pub fn render_event(event: &SessionEvent) -> Vec<String> {
    match event {
        SessionEvent::Initialized {
            lecture_id,
            manifest,
        } => {
            let mut lines = vec![format!(
                "Session started for lecture {} ({} chapters).",
                lecture_id, manifest.total_chapters
            )];
            lines.extend(manifest.chapters.iter().enumerate().map(|(i, chapter)| {
                format!(
                    "  {}. {} (pp. {}-{})",
                    i + 1,
                    chapter.title,
                    chapter.start_page,
                    chapter.end_page
                )
            }));
            lines
        }
        SessionEvent::Segment(segment) => render_segment(segment),
        SessionEvent::AdvancePending => Vec::new(),
        SessionEvent::Supplementary(result) => render_supplementary(result),
        SessionEvent::StillWorking { waited, attempts } => vec![format!(
            "Still working… ({}s, {} attempts). Type /next to keep waiting or /stop to cancel.",
            waited.as_secs(),
            attempts
        )],
        SessionEvent::Completed => vec!["Lecture complete.".to_string()],
        SessionEvent::Cancelled { lecture_id, reason } => {
            vec![format!("Session for lecture {lecture_id} cancelled ({reason}).")]
        }
        SessionEvent::Failed { message } => vec![format!("Error: {message}")],
    }
}

fn header(chapter_title: Option<&str>, label: &str) -> String {
    match chapter_title {
        Some(title) => format!("[{title}] {label}"),
        None => label.to_string(),
    }
}

fn render_segment(segment: &Segment) -> Vec<String> {
    let label = match segment.content_type {
        ContentType::Question => "Question",
        ContentType::Supplementary => "Supplementary",
        _ => "Concept",
    };
    let mut lines = vec![
        header(segment.chapter_title.as_deref(), label),
        segment.text.clone(),
    ];
    if segment.question_id.is_some() {
        lines.push(ANSWER_PROMPT.to_string());
    }
    lines
}

fn render_supplementary(result: &SupplementaryResult) -> Vec<String> {
    vec![
        header(result.chapter_title.as_deref(), "Supplementary"),
        result
            .text
            .clone()
            .unwrap_or_else(|| NO_SUPPLEMENTARY.to_string()),
    ]
}
