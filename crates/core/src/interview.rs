use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One interview question. Its position in `Interview::questions` is its identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    #[serde(rename = "question")]
    pub text: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl Question {
    pub fn new(text: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: kind.into(),
        }
    }
}

/// Questions used when no generator is available.
pub fn template_defaults() -> Vec<Question> {
    vec![
        Question::new("Tell me about yourself and your experience.", "behavioral"),
        Question::new("What are your strengths and weaknesses?", "behavioral"),
        Question::new("Describe a challenging project you worked on.", "behavioral"),
    ]
}

/// Renders questions as `"1. text (type)"` lines for prompts.
pub fn numbered_questions(questions: &[Question]) -> String {
    questions
        .iter()
        .enumerate()
        .map(|(i, q)| format!("{}. {} ({})", i + 1, q.text, q.kind))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterviewStatus {
    Pending,
    InProgress,
    Completed,
}

impl InterviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterviewStatus::Pending => "pending",
            InterviewStatus::InProgress => "in_progress",
            InterviewStatus::Completed => "completed",
        }
    }

    /// Status only moves forward: pending -> in_progress -> completed.
    pub fn can_advance_to(&self, next: InterviewStatus) -> bool {
        self.rank() < next.rank()
    }

    fn rank(&self) -> u8 {
        match self {
            InterviewStatus::Pending => 0,
            InterviewStatus::InProgress => 1,
            InterviewStatus::Completed => 2,
        }
    }
}

impl fmt::Display for InterviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InterviewStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(InterviewStatus::Pending),
            "in_progress" => Ok(InterviewStatus::InProgress),
            "completed" => Ok(InterviewStatus::Completed),
            other => Err(format!("unknown interview status '{other}'")),
        }
    }
}

/// Where the interview came from. Read once when the voice session is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionOrigin {
    #[default]
    Form,
    Voice,
}

impl SessionOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionOrigin::Form => "form",
            SessionOrigin::Voice => "voice",
        }
    }
}

impl FromStr for SessionOrigin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "form" => Ok(SessionOrigin::Form),
            "voice" => Ok(SessionOrigin::Voice),
            other => Err(format!("unknown session origin '{other}'")),
        }
    }
}

/// A captured answer, keyed by `question_index`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub question_index: usize,
    pub question_text: String,
    pub answer_text: String,
}

/// Scored critique of one response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackItem {
    pub question_index: usize,
    pub question: String,
    pub answer: String,
    pub strengths: Vec<String>,
    pub improvements: Vec<String>,
    pub score: u8,
    pub tips: String,
}

/// Everything the feedback pipeline writes in its single completing update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackReport {
    pub items: Vec<FeedbackItem>,
    pub overall_score: f64,
    pub completed_at: DateTime<Utc>,
}

impl FeedbackReport {
    /// True when there is exactly one item per response and each item scored
    /// the answer currently stored at its index.
    pub fn covers(&self, responses: &[Response]) -> bool {
        self.items.len() == responses.len()
            && responses.iter().all(|r| {
                self.items
                    .iter()
                    .any(|i| i.question_index == r.question_index && i.answer == r.answer_text)
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interview {
    pub id: String,
    pub user_id: String,
    pub role: String,
    #[serde(rename = "type")]
    pub interview_type: String,
    pub experience: String,
    pub technologies: String,
    pub origin: SessionOrigin,
    pub questions: Vec<Question>,
    /// Sorted by question index; indices without an answer are absent.
    pub responses: Vec<Response>,
    pub status: InterviewStatus,
    pub feedback_details: Option<Vec<FeedbackItem>>,
    pub overall_score: Option<f64>,
    pub external_feedback: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub feedback_saved_at: Option<DateTime<Utc>>,
}

/// Fields supplied by the creation flow.
#[derive(Debug, Clone)]
pub struct NewInterview {
    pub user_id: String,
    pub role: String,
    pub interview_type: String,
    pub experience: String,
    pub technologies: String,
    pub origin: SessionOrigin,
    pub questions: Vec<Question>,
}

impl Interview {
    pub fn new(fields: NewInterview) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: fields.user_id,
            role: fields.role,
            interview_type: fields.interview_type,
            experience: fields.experience,
            technologies: fields.technologies,
            origin: fields.origin,
            questions: fields.questions,
            responses: Vec::new(),
            status: InterviewStatus::Pending,
            feedback_details: None,
            overall_score: None,
            external_feedback: None,
            created_at: now,
            updated_at: now,
            ended_at: None,
            completed_at: None,
            feedback_saved_at: None,
        }
    }

    pub fn question_count(&self) -> usize {
        self.questions.len()
    }

    pub fn question(&self, index: usize) -> Option<&Question> {
        self.questions.get(index)
    }

    pub fn response(&self, index: usize) -> Option<&Response> {
        self.responses.iter().find(|r| r.question_index == index)
    }

    /// Builds a response for `index`, copying the question text. `None` if out of range.
    pub fn response_for(&self, index: usize, answer: impl Into<String>) -> Option<Response> {
        self.question(index).map(|q| Response {
            question_index: index,
            question_text: q.text.clone(),
            answer_text: answer.into(),
        })
    }
}
