use crate::interview::{Interview, SessionOrigin};
use crate::prompts::PromptBook;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const NEXT_QUESTION_TOOL: &str = "nextQuestion";
pub const SAVE_RESPONSE_TOOL: &str = "saveResponse";

pub const OPENING_UTTERANCE: &str =
    "Hello, I'll be conducting your interview today. Let's begin with the first question.";

/// Why a voice session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EndReason {
    /// The remote side hung up, including silence and max-duration limits.
    Completed,
    /// The local side called `end()`.
    UserStopped,
    TransportError,
}

/// The orchestrator's view of everything a voice provider can report.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    SessionStarted {
        at: DateTime<Utc>,
    },
    SessionEnded {
        reason: EndReason,
        detail: Option<String>,
    },
    /// Move the cursor to `current + 1`.
    AdvanceQuestion,
    CaptureAnswer {
        question_index: usize,
        answer_text: String,
    },
}

impl SessionEvent {
    pub fn started() -> Self {
        SessionEvent::SessionStarted { at: Utc::now() }
    }

    pub fn ended(reason: EndReason) -> Self {
        SessionEvent::SessionEnded {
            reason,
            detail: None,
        }
    }

    pub fn transport_error(detail: impl Into<String>) -> Self {
        SessionEvent::SessionEnded {
            reason: EndReason::TransportError,
            detail: Some(detail.into()),
        }
    }

    pub fn capture(question_index: usize, answer_text: impl Into<String>) -> Self {
        SessionEvent::CaptureAnswer {
            question_index,
            answer_text: answer_text.into(),
        }
    }
}

/// A function the remote conversational agent may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments.
    pub parameters: serde_json::Value,
}

/// The two tools the interviewer agent uses to drive the session.
pub fn interview_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: NEXT_QUESTION_TOOL.to_string(),
            description: "Move to the next question in the interview".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
        },
        ToolDefinition {
            name: SAVE_RESPONSE_TOOL.to_string(),
            description: "Save the candidate's response to a question".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "questionIndex": {
                        "type": "number",
                        "description": "The index of the question that was answered"
                    },
                    "response": {
                        "type": "string",
                        "description": "The candidate's response to the question"
                    }
                },
                "required": ["questionIndex", "response"]
            }),
        },
    ]
}

/// Provider choices for the live conversation. Different vendors are data here, not code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceProfile {
    pub transcriber_provider: String,
    pub transcriber_model: String,
    pub language: String,
    pub voice_provider: String,
    pub voice_id: String,
    pub llm_provider: String,
    pub llm_model: String,
    pub silence_timeout_secs: u32,
    pub max_duration_secs: u32,
}

impl Default for VoiceProfile {
    fn default() -> Self {
        Self {
            transcriber_provider: "deepgram".to_string(),
            transcriber_model: "nova-2".to_string(),
            language: "en".to_string(),
            voice_provider: "11labs".to_string(),
            voice_id: "rachel".to_string(),
            llm_provider: "openai".to_string(),
            llm_model: "gpt-4".to_string(),
            silence_timeout_secs: 30,
            max_duration_secs: 600,
        }
    }
}

/// Generic configuration for opening a voice session with any provider.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionDescriptor {
    pub name: String,
    pub opening_utterance: String,
    pub instructions: String,
    pub profile: VoiceProfile,
    pub tools: Vec<ToolDefinition>,
    /// Correlation data echoed back by the provider.
    pub metadata: BTreeMap<String, String>,
    /// Remote workflow to run instead of the inline assistant.
    pub workflow_ref: Option<String>,
}

impl SessionDescriptor {
    /// Builds the descriptor for one interview. The origin tag is consulted here and nowhere else.
    pub fn for_interview(
        interview: &Interview,
        profile: &VoiceProfile,
        prompts: &PromptBook,
        workflow_ref: Option<&str>,
    ) -> Self {
        let workflow_ref = match interview.origin {
            SessionOrigin::Voice => workflow_ref.map(str::to_string),
            SessionOrigin::Form => None,
        };

        let mut metadata = BTreeMap::new();
        metadata.insert("interviewId".to_string(), interview.id.clone());

        Self {
            name: format!("{} Interviewer", interview.role),
            opening_utterance: OPENING_UTTERANCE.to_string(),
            instructions: prompts.interviewer_instructions(interview),
            profile: profile.clone(),
            tools: interview_tools(),
            metadata,
            workflow_ref,
        }
    }

    pub fn interview_id(&self) -> Option<&str> {
        self.metadata.get("interviewId").map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interview::{NewInterview, template_defaults};

    fn interview(origin: SessionOrigin) -> Interview {
        Interview::new(NewInterview {
            user_id: "u".to_string(),
            role: "Frontend Developer".to_string(),
            interview_type: "mixed".to_string(),
            experience: "junior".to_string(),
            technologies: "React".to_string(),
            origin,
            questions: template_defaults(),
        })
    }

    #[test]
    fn descriptor_embeds_questions_tools_and_correlation_id() {
        let interview = interview(SessionOrigin::Form);
        let descriptor = SessionDescriptor::for_interview(
            &interview,
            &VoiceProfile::default(),
            &PromptBook::default(),
            Some("wf-1"),
        );

        assert_eq!(descriptor.interview_id(), Some(interview.id.as_str()));
        assert!(descriptor.instructions.contains("1. Tell me about yourself"));
        assert!(descriptor.instructions.contains("3. Describe a challenging project"));
        let names: Vec<_> = descriptor.tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec![NEXT_QUESTION_TOOL, SAVE_RESPONSE_TOOL]);
        // Form-originated interviews always use the inline assistant.
        assert_eq!(descriptor.workflow_ref, None);
    }

    #[test]
    fn voice_origin_uses_configured_workflow() {
        let descriptor = SessionDescriptor::for_interview(
            &interview(SessionOrigin::Voice),
            &VoiceProfile::default(),
            &PromptBook::default(),
            Some("wf-1"),
        );
        assert_eq!(descriptor.workflow_ref.as_deref(), Some("wf-1"));
    }

    #[test]
    fn save_response_tool_requires_index_and_text() {
        let tools = interview_tools();
        let required = &tools[1].parameters["required"];
        assert_eq!(required, &serde_json::json!(["questionIndex", "response"]));
    }
}
