//! Named interview actions over a single interview id.
//!
//! Each action loads the interview, performs one operation through the core
//! crate, and returns a JSON envelope. Nothing is kept between calls.

use crate::error::ActionError;
use chrono::Utc;
use interview_core::feedback::{PipelineOptions, generate_feedback};
use interview_core::generic_types::{SessionDescriptor, VoiceProfile};
use interview_core::interview::{Interview, NewInterview, Question, SessionOrigin, template_defaults};
use interview_core::parsing::parse_questions;
use interview_core::persistence::{ResponseGateway, RetryPolicy};
use interview_core::prompts::PromptBook;
use interview_core::reviewer::{QuestionRequest, Scorer};
use interview_core::store::InterviewStore;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{info, warn};

const INTERVIEW_TYPES: &[&str] = &["technical", "behavioral", "mixed"];
const EXPERIENCE_LEVELS: &[&str] = &["junior", "mid", "senior"];
const MAX_QUESTIONS: i64 = 10;

/// A parsed action request.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    GetQuestions,
    UpdateResponse { question_index: usize, response: String },
    GenerateFeedback,
    Start,
    End,
    SaveFeedback { feedback: Value },
}

impl Action {
    /// Parses `{ action, ...fields }`. Unknown actions and missing fields are rejected.
    pub fn from_body(body: &Value) -> Result<Self, ActionError> {
        let name = body
            .get("action")
            .and_then(Value::as_str)
            .ok_or_else(|| ActionError::InvalidAction(String::new()))?;

        match name {
            "getQuestions" => Ok(Action::GetQuestions),
            "updateResponse" => {
                let question_index = body
                    .get("questionIndex")
                    .and_then(Value::as_u64)
                    .and_then(|i| usize::try_from(i).ok())
                    .ok_or_else(|| {
                        ActionError::Validation(
                            "questionIndex must be a non-negative integer".to_string(),
                        )
                    })?;
                let response = body
                    .get("response")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ActionError::Validation("response is required".to_string()))?
                    .to_string();
                Ok(Action::UpdateResponse {
                    question_index,
                    response,
                })
            }
            "generateFeedback" => Ok(Action::GenerateFeedback),
            "start" => Ok(Action::Start),
            "end" => Ok(Action::End),
            "save_feedback" => {
                let feedback = body.get("feedback").cloned().unwrap_or(Value::Null);
                if is_blank(&feedback) {
                    return Err(ActionError::Validation(
                        "Feedback data is required".to_string(),
                    ));
                }
                Ok(Action::SaveFeedback { feedback })
            }
            other => Err(ActionError::InvalidAction(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Action::GetQuestions => "getQuestions",
            Action::UpdateResponse { .. } => "updateResponse",
            Action::GenerateFeedback => "generateFeedback",
            Action::Start => "start",
            Action::End => "end",
            Action::SaveFeedback { .. } => "save_feedback",
        }
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

/// Body of `POST /api/interviews`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInterview {
    pub user_id: String,
    pub role: String,
    #[serde(rename = "type")]
    pub interview_type: String,
    pub experience: String,
    pub technologies: String,
    pub question_count: i64,
    #[serde(default)]
    pub origin: SessionOrigin,
}

impl CreateInterview {
    pub fn validate(&self) -> Result<u8, ActionError> {
        let invalid = |msg: &str| Err(ActionError::Validation(msg.to_string()));
        if self.user_id.trim().is_empty() {
            return invalid("userId is required");
        }
        if self.role.trim().chars().count() < 3 {
            return invalid("Job role must be at least 3 characters");
        }
        if !INTERVIEW_TYPES.contains(&self.interview_type.as_str()) {
            return invalid("Interview type must be technical, behavioral or mixed");
        }
        if !EXPERIENCE_LEVELS.contains(&self.experience.as_str()) {
            return invalid("Experience must be junior, mid or senior");
        }
        if !(1..=MAX_QUESTIONS).contains(&self.question_count) {
            return invalid("Question count must be between 1 and 10");
        }
        if self.technologies.trim().chars().count() < 3 {
            return invalid("Technologies must be at least 3 characters");
        }
        // Range checked above.
        Ok(self.question_count as u8)
    }
}

/// Executes interview actions against the store and the scoring collaborator.
#[derive(Clone)]
pub struct ActionDispatcher {
    store: Arc<dyn InterviewStore>,
    scorer: Arc<dyn Scorer>,
    gateway: ResponseGateway,
    pipeline: PipelineOptions,
    prompts: PromptBook,
    profile: VoiceProfile,
    workflow_id: Option<String>,
}

impl ActionDispatcher {
    pub fn new(store: Arc<dyn InterviewStore>, scorer: Arc<dyn Scorer>) -> Self {
        Self {
            gateway: ResponseGateway::new(store.clone(), RetryPolicy::default()),
            store,
            scorer,
            pipeline: PipelineOptions::default(),
            prompts: PromptBook::default(),
            profile: VoiceProfile::default(),
            workflow_id: None,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.gateway = ResponseGateway::new(self.store.clone(), policy);
        self
    }

    pub fn with_pipeline_options(mut self, pipeline: PipelineOptions) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn with_voice(
        mut self,
        prompts: PromptBook,
        profile: VoiceProfile,
        workflow_id: Option<String>,
    ) -> Self {
        self.prompts = prompts;
        self.profile = profile;
        self.workflow_id = workflow_id;
        self
    }

    pub async fn load(&self, interview_id: &str) -> Result<Interview, ActionError> {
        self.store
            .get(interview_id)
            .await?
            .ok_or_else(|| ActionError::NotFound(interview_id.to_string()))
    }

    /// Runs one action. The interview must exist before the action is considered.
    pub async fn dispatch(&self, interview_id: &str, body: &Value) -> Result<Value, ActionError> {
        let interview = self.load(interview_id).await?;
        let action = Action::from_body(body)?;
        info!(interview_id = %interview_id, action = action.name(), "Dispatching action");

        match action {
            Action::GetQuestions => Ok(json!({
                "success": true,
                "questions": interview.questions,
            })),
            Action::UpdateResponse {
                question_index,
                response,
            } => {
                let Some(response) = interview.response_for(question_index, response) else {
                    return Err(ActionError::Validation(format!(
                        "questionIndex {} is out of range for {} questions",
                        question_index,
                        interview.question_count()
                    )));
                };
                self.gateway.write(interview_id, &response).await?;
                Ok(json!({ "success": true }))
            }
            Action::GenerateFeedback => {
                let outcome = generate_feedback(
                    self.store.as_ref(),
                    self.scorer.as_ref(),
                    interview_id,
                    &self.pipeline,
                )
                .await?;
                Ok(json!({
                    "success": true,
                    "feedbackId": interview.id,
                    "overallScore": outcome.overall_score(),
                }))
            }
            Action::Start => {
                self.store.mark_in_progress(interview_id).await?;
                let descriptor = SessionDescriptor::for_interview(
                    &interview,
                    &self.profile,
                    &self.prompts,
                    self.workflow_id.as_deref(),
                );
                Ok(json!({
                    "success": true,
                    "interviewData": {
                        "role": interview.role,
                        "type": interview.interview_type,
                        "level": interview.experience,
                        "questions": interview.questions,
                        "voiceWorkflowRef": descriptor.workflow_ref,
                    }
                }))
            }
            Action::End => {
                self.store.mark_ended(interview_id, Utc::now()).await?;
                Ok(json!({ "success": true }))
            }
            Action::SaveFeedback { feedback } => {
                self.store
                    .save_external_feedback(interview_id, &feedback, Utc::now())
                    .await?;
                Ok(json!({ "success": true }))
            }
        }
    }

    /// Creates a pending interview with generated questions.
    ///
    /// Voice-originated interviews fall back to the default questions when
    /// generation fails; form-originated ones report the failure.
    pub async fn create(&self, request: CreateInterview) -> Result<Interview, ActionError> {
        let count = request.validate()?;
        let questions = match self.generate_questions(&request, count).await {
            Ok(questions) => questions,
            Err(e) if request.origin == SessionOrigin::Voice => {
                warn!("Question generation failed, using defaults: {:#}", e);
                template_defaults()
            }
            Err(e) => {
                return Err(ActionError::Internal(format!(
                    "Failed to generate questions: {e:#}"
                )));
            }
        };

        let interview = Interview::new(NewInterview {
            user_id: request.user_id,
            role: request.role,
            interview_type: request.interview_type,
            experience: request.experience,
            technologies: request.technologies,
            origin: request.origin,
            questions,
        });
        self.store.insert(&interview).await?;
        info!(
            interview_id = %interview.id,
            questions = interview.question_count(),
            origin = interview.origin.as_str(),
            "Interview created"
        );
        Ok(interview)
    }

    async fn generate_questions(
        &self,
        request: &CreateInterview,
        count: u8,
    ) -> anyhow::Result<Vec<Question>> {
        let question_request = QuestionRequest {
            role: request.role.clone(),
            interview_type: request.interview_type.clone(),
            experience: request.experience.clone(),
            technologies: request.technologies.clone(),
            count,
        };
        let call = self.scorer.generate_questions(&question_request);
        let raw = tokio::time::timeout(self.pipeline.item_timeout, call)
            .await
            .map_err(|_| anyhow::anyhow!("question generation timed out"))??;
        let mut questions = parse_questions(&raw)?;
        questions.truncate(usize::from(count));
        Ok(questions)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use interview_core::interview::InterviewStatus;
    use interview_core::store::SqliteInterviewStore;
    use std::time::Duration;

    /// Scores answers by their length and returns a fixed question list.
    pub(crate) struct FakeScorer {
        questions: Option<String>,
    }

    impl FakeScorer {
        pub(crate) fn new(questions: Option<&str>) -> Self {
            Self {
                questions: questions.map(str::to_string),
            }
        }
    }

    #[async_trait]
    impl Scorer for FakeScorer {
        async fn score_answer(&self, _question: &str, answer: &str, _role: &str) -> anyhow::Result<String> {
            if answer == "fail" {
                anyhow::bail!("upstream unavailable");
            }
            let score = answer.len().clamp(1, 10);
            Ok(format!(
                "Here you go:\n{{\"strengths\": [\"Clear\"], \"improvements\": [], \"score\": {score}, \"tips\": \"Keep going\"}}"
            ))
        }

        async fn generate_questions(&self, _request: &QuestionRequest) -> anyhow::Result<String> {
            self.questions
                .clone()
                .ok_or_else(|| anyhow::anyhow!("generator offline"))
        }
    }

    pub(crate) const TWO_QUESTIONS: &str = r#"```json
[{"question": "What is ownership?", "type": "technical"},
 {"question": "Explain lifetimes.", "type": "technical"}]
```"#;

    pub(crate) async fn dispatcher(scorer: FakeScorer) -> (ActionDispatcher, Arc<SqliteInterviewStore>) {
        let store = Arc::new(SqliteInterviewStore::in_memory().await.unwrap());
        let dispatcher = ActionDispatcher::new(store.clone(), Arc::new(scorer))
            .with_retry_policy(RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            })
            .with_voice(PromptBook::default(), VoiceProfile::default(), Some("wf-7".to_string()));
        (dispatcher, store)
    }

    pub(crate) fn request(origin: SessionOrigin) -> CreateInterview {
        CreateInterview {
            user_id: "user-1".to_string(),
            role: "Rust Developer".to_string(),
            interview_type: "technical".to_string(),
            experience: "mid".to_string(),
            technologies: "Rust, Tokio".to_string(),
            question_count: 2,
            origin,
        }
    }

    #[test]
    fn creation_requests_are_validated() {
        assert_eq!(request(SessionOrigin::Form).validate().unwrap(), 2);
        let cases: Vec<Box<dyn Fn(&mut CreateInterview)>> = vec![
            Box::new(|r| r.role = "QA".to_string()),
            Box::new(|r| r.interview_type = "trivia".to_string()),
            Box::new(|r| r.experience = "principal".to_string()),
            Box::new(|r| r.question_count = 0),
            Box::new(|r| r.question_count = 11),
            Box::new(|r| r.technologies = "Go".to_string()),
            Box::new(|r| r.user_id = " ".to_string()),
        ];
        for mutate in cases {
            let mut r = request(SessionOrigin::Form);
            mutate(&mut r);
            assert!(matches!(r.validate(), Err(ActionError::Validation(_))));
        }
    }

    #[test]
    fn actions_parse_and_reject_bad_input() {
        assert_eq!(
            Action::from_body(&json!({"action": "updateResponse", "questionIndex": 1, "response": "Yes"})).unwrap(),
            Action::UpdateResponse {
                question_index: 1,
                response: "Yes".to_string()
            }
        );
        assert!(matches!(
            Action::from_body(&json!({"action": "updateResponse", "questionIndex": -1, "response": "x"})),
            Err(ActionError::Validation(_))
        ));
        assert!(matches!(
            Action::from_body(&json!({"action": "fly"})),
            Err(ActionError::InvalidAction(name)) if name == "fly"
        ));
        assert!(matches!(Action::from_body(&json!({})), Err(ActionError::InvalidAction(_))));
        for blank in [json!(null), json!(""), json!({}), json!([])] {
            assert!(matches!(
                Action::from_body(&json!({"action": "save_feedback", "feedback": blank})),
                Err(ActionError::Validation(_))
            ));
        }
        assert!(matches!(
            Action::from_body(&json!({"action": "save_feedback"})),
            Err(ActionError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn create_uses_generated_questions() {
        let (dispatcher, store) = dispatcher(FakeScorer::new(Some(TWO_QUESTIONS))).await;
        let interview = dispatcher.create(request(SessionOrigin::Form)).await.unwrap();

        assert_eq!(interview.question_count(), 2);
        assert_eq!(interview.questions[0].text, "What is ownership?");
        let stored = store.get(&interview.id).await.unwrap().unwrap();
        assert_eq!(stored.status, InterviewStatus::Pending);
        assert_eq!(stored.questions, interview.questions);
    }

    #[tokio::test]
    async fn failed_generation_depends_on_origin() {
        let (dispatcher, _) = dispatcher(FakeScorer::new(None)).await;

        let voice = dispatcher.create(request(SessionOrigin::Voice)).await.unwrap();
        assert_eq!(voice.questions, template_defaults());

        let form = dispatcher.create(request(SessionOrigin::Form)).await;
        assert!(matches!(form, Err(ActionError::Internal(_))));
    }

    #[tokio::test]
    async fn unknown_interview_is_not_found_before_action_parsing() {
        let (dispatcher, _) = dispatcher(FakeScorer::new(None)).await;
        let err = dispatcher
            .dispatch("missing", &json!({"action": "fly"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::NotFound(_)));
    }

    #[tokio::test]
    async fn out_of_range_update_is_rejected_without_writing() {
        let (dispatcher, store) = dispatcher(FakeScorer::new(Some(TWO_QUESTIONS))).await;
        let interview = dispatcher.create(request(SessionOrigin::Form)).await.unwrap();

        let err = dispatcher
            .dispatch(
                &interview.id,
                &json!({"action": "updateResponse", "questionIndex": 5, "response": "late"}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::Validation(ref msg) if msg.contains("out of range")));
        assert!(store.get(&interview.id).await.unwrap().unwrap().responses.is_empty());
    }

    #[tokio::test]
    async fn full_action_flow_completes_the_interview() {
        let (dispatcher, store) = dispatcher(FakeScorer::new(Some(TWO_QUESTIONS))).await;
        let interview = dispatcher.create(request(SessionOrigin::Voice)).await.unwrap();
        let id = interview.id.as_str();

        let started = dispatcher.dispatch(id, &json!({"action": "start"})).await.unwrap();
        assert_eq!(started["interviewData"]["level"], "mid");
        assert_eq!(started["interviewData"]["voiceWorkflowRef"], "wf-7");

        for (index, answer) in [(0, "abcdefgh"), (1, "abcdef")] {
            let body = json!({"action": "updateResponse", "questionIndex": index, "response": answer});
            assert_eq!(dispatcher.dispatch(id, &body).await.unwrap(), json!({"success": true}));
        }
        dispatcher.dispatch(id, &json!({"action": "end"})).await.unwrap();

        let generated = dispatcher
            .dispatch(id, &json!({"action": "generateFeedback"}))
            .await
            .unwrap();
        assert_eq!(generated["feedbackId"], id);
        assert_eq!(generated["overallScore"], 7.0);

        let stored = store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, InterviewStatus::Completed);
        assert!(stored.ended_at.is_some());
        assert_eq!(stored.feedback_details.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn partial_scoring_failure_is_an_internal_error_naming_the_question() {
        let (dispatcher, store) = dispatcher(FakeScorer::new(Some(TWO_QUESTIONS))).await;
        let interview = dispatcher.create(request(SessionOrigin::Form)).await.unwrap();
        let id = interview.id.as_str();

        for (index, answer) in [(0, "fine"), (1, "fail")] {
            let body = json!({"action": "updateResponse", "questionIndex": index, "response": answer});
            dispatcher.dispatch(id, &body).await.unwrap();
        }
        let err = dispatcher
            .dispatch(id, &json!({"action": "generateFeedback"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::Internal(ref msg) if msg.contains("[1]")));
        assert_ne!(store.get(id).await.unwrap().unwrap().status, InterviewStatus::Completed);
    }

    #[tokio::test]
    async fn feedback_without_responses_is_a_validation_error() {
        let (dispatcher, _) = dispatcher(FakeScorer::new(Some(TWO_QUESTIONS))).await;
        let interview = dispatcher.create(request(SessionOrigin::Form)).await.unwrap();
        let err = dispatcher
            .dispatch(&interview.id, &json!({"action": "generateFeedback"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::Validation(_)));
    }

    #[tokio::test]
    async fn save_feedback_stores_the_external_payload_only() {
        let (dispatcher, store) = dispatcher(FakeScorer::new(Some(TWO_QUESTIONS))).await;
        let interview = dispatcher.create(request(SessionOrigin::Form)).await.unwrap();

        let payload = json!({"summary": "Strong on fundamentals"});
        dispatcher
            .dispatch(&interview.id, &json!({"action": "save_feedback", "feedback": payload}))
            .await
            .unwrap();

        let stored = store.get(&interview.id).await.unwrap().unwrap();
        assert_eq!(stored.external_feedback, Some(payload));
        assert!(stored.feedback_saved_at.is_some());
        assert_eq!(stored.status, InterviewStatus::Pending);
        assert_eq!(stored.overall_score, None);
    }
}
