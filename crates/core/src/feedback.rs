//! Fan-out scoring of captured responses and the single completing write.

use crate::error::{ItemFailure, PipelineError, ScoringError};
use crate::interview::{FeedbackItem, FeedbackReport, Interview, InterviewStatus, Response};
use crate::parsing::parse_feedback;
use crate::reviewer::Scorer;
use crate::store::{Completion, InterviewStore};
use chrono::Utc;
use futures::future::join_all;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    /// Upper bound for one scoring call.
    pub item_timeout: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            item_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedbackOutcome {
    Generated {
        overall_score: f64,
        items: Vec<FeedbackItem>,
    },
    /// The interview was completed by an earlier run; nothing was rescored.
    AlreadyCompleted { overall_score: Option<f64> },
}

impl FeedbackOutcome {
    pub fn overall_score(&self) -> Option<f64> {
        match self {
            FeedbackOutcome::Generated { overall_score, .. } => Some(*overall_score),
            FeedbackOutcome::AlreadyCompleted { overall_score } => *overall_score,
        }
    }
}

/// Mean of the item scores, rounded to one decimal, half away from zero.
pub fn overall_score(items: &[FeedbackItem]) -> f64 {
    if items.is_empty() {
        return 0.0;
    }
    let sum: u32 = items.iter().map(|i| u32::from(i.score)).sum();
    // Scaling the integer sum first keeps the rounding exact for one decimal.
    (f64::from(sum * 10) / items.len() as f64).round() / 10.0
}

/// Scoring passes attempted before giving up on an interview whose responses
/// keep changing underneath the pipeline.
pub const MAX_SCORING_PASSES: usize = 3;

/// Scores every persisted response and completes the interview.
///
/// All calls run concurrently and each is bounded by `options.item_timeout`.
/// A failed item never cancels the others, but the interview is only completed
/// when every response was scored; otherwise nothing is written and the
/// failures are returned per question index. A response written while scoring
/// is in flight makes the completing write refuse, and the interview is
/// rescored from a fresh snapshot.
pub async fn generate_feedback(
    store: &dyn InterviewStore,
    scorer: &dyn Scorer,
    interview_id: &str,
    options: &PipelineOptions,
) -> Result<FeedbackOutcome, PipelineError> {
    for pass in 1..=MAX_SCORING_PASSES {
        let interview = store
            .get(interview_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(interview_id.to_string()))?;

        if interview.status == InterviewStatus::Completed {
            info!(interview_id = %interview_id, "Feedback already generated, skipping");
            return Ok(FeedbackOutcome::AlreadyCompleted {
                overall_score: interview.overall_score,
            });
        }
        if interview.responses.is_empty() {
            return Err(PipelineError::NoResponses(interview_id.to_string()));
        }

        info!(
            interview_id = %interview_id,
            responses = interview.responses.len(),
            pass,
            "Scoring responses"
        );
        let report = score_all(scorer, &interview, options).await?;

        match store.complete_with_feedback(interview_id, &report).await? {
            Completion::Completed => {
                info!(
                    interview_id = %interview_id,
                    overall_score = report.overall_score,
                    "Interview completed"
                );
                return Ok(FeedbackOutcome::Generated {
                    overall_score: report.overall_score,
                    items: report.items,
                });
            }
            Completion::AlreadyCompleted => {
                // Another run completed the interview while this one was scoring.
                let current = store.get(interview_id).await?;
                return Ok(FeedbackOutcome::AlreadyCompleted {
                    overall_score: current.and_then(|i| i.overall_score),
                });
            }
            Completion::ResponsesChanged => {
                warn!(interview_id = %interview_id, pass, "Responses changed while scoring");
            }
        }
    }

    Err(PipelineError::ResponsesChanged {
        interview_id: interview_id.to_string(),
        passes: MAX_SCORING_PASSES,
    })
}

async fn score_all(
    scorer: &dyn Scorer,
    interview: &Interview,
    options: &PipelineOptions,
) -> Result<FeedbackReport, PipelineError> {
    let calls = interview
        .responses
        .iter()
        .map(|response| score_one(scorer, &interview.id, response, &interview.role, options));
    let results = join_all(calls).await;

    let total = results.len();
    let mut items = Vec::with_capacity(total);
    let mut failures = Vec::new();
    for result in results {
        match result {
            Ok(item) => items.push(item),
            Err(failure) => failures.push(failure),
        }
    }

    if !failures.is_empty() {
        error!(
            interview_id = %interview.id,
            failed = failures.len(),
            total,
            "Feedback incomplete, interview left open for retry"
        );
        return Err(PipelineError::Incomplete {
            interview_id: interview.id.clone(),
            total,
            failures,
        });
    }

    Ok(FeedbackReport {
        overall_score: overall_score(&items),
        items,
        completed_at: Utc::now(),
    })
}

async fn score_one(
    scorer: &dyn Scorer,
    interview_id: &str,
    response: &Response,
    role: &str,
    options: &PipelineOptions,
) -> Result<FeedbackItem, ItemFailure> {
    let question_index = response.question_index;
    let call = scorer.score_answer(&response.question_text, &response.answer_text, role);

    let outcome = match tokio::time::timeout(options.item_timeout, call).await {
        Err(_) => Err(ScoringError::Timeout(options.item_timeout)),
        Ok(Err(e)) => Err(ScoringError::Upstream(format!("{e:#}"))),
        Ok(Ok(raw)) => parse_feedback(&raw),
    };

    match outcome {
        Ok(scored) => Ok(FeedbackItem {
            question_index,
            question: response.question_text.clone(),
            answer: response.answer_text.clone(),
            strengths: scored.strengths,
            improvements: scored.improvements,
            score: scored.score,
            tips: scored.tips,
        }),
        Err(error) => {
            error!(
                interview_id = %interview_id,
                question_index,
                error = %error,
                "Failed to score response"
            );
            Err(ItemFailure {
                question_index,
                error,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interview::{NewInterview, SessionOrigin, template_defaults};
    use crate::reviewer::{MockScorer, QuestionRequest};
    use crate::store::SqliteInterviewStore;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn interview_with_answers(answers: &[(usize, &str)]) -> (SqliteInterviewStore, Interview) {
        let store = SqliteInterviewStore::in_memory().await.unwrap();
        let interview = Interview::new(NewInterview {
            user_id: "user-1".to_string(),
            role: "QA Engineer".to_string(),
            interview_type: "behavioral".to_string(),
            experience: "junior".to_string(),
            technologies: "Selenium".to_string(),
            origin: SessionOrigin::Form,
            questions: template_defaults(),
        });
        store.insert(&interview).await.unwrap();
        for (index, answer) in answers {
            let response = interview.response_for(*index, *answer).unwrap();
            store.upsert_response(&interview.id, &response).await.unwrap();
        }
        (store, interview)
    }

    fn feedback_json(score: u8) -> String {
        format!(
            r#"{{"strengths": ["Relevant"], "improvements": ["Be specific"], "score": {score}, "tips": "Use STAR."}}"#
        )
    }

    fn item(score: u8) -> FeedbackItem {
        FeedbackItem {
            question_index: 0,
            question: String::new(),
            answer: String::new(),
            strengths: vec![],
            improvements: vec![],
            score,
            tips: String::new(),
        }
    }

    #[test]
    fn overall_score_rounds_half_away_from_zero() {
        let scores = |s: &[u8]| s.iter().map(|&x| item(x)).collect::<Vec<_>>();
        assert_eq!(overall_score(&scores(&[8, 6, 10])), 8.0);
        assert_eq!(overall_score(&scores(&[7, 8])), 7.5);
        // 23 / 3 = 7.666...
        assert_eq!(overall_score(&scores(&[7, 8, 8])), 7.7);
        // 2.25 sits exactly on the half and rounds up.
        assert_eq!(overall_score(&scores(&[1, 2, 3, 3])), 2.3);
        assert_eq!(overall_score(&[]), 0.0);
    }

    #[tokio::test]
    async fn scores_are_aggregated_and_completion_is_written() {
        let (store, interview) =
            interview_with_answers(&[(0, "I build things"), (1, "Patient"), (2, "A migration")]).await;

        let mut scorer = MockScorer::new();
        scorer
            .expect_score_answer()
            .times(3)
            .returning(|question, _, role| {
                assert_eq!(role, "QA Engineer");
                let score = if question.starts_with("Tell me") {
                    8
                } else if question.starts_with("What are") {
                    6
                } else {
                    10
                };
                Ok(feedback_json(score))
            });

        let outcome = generate_feedback(&store, &scorer, &interview.id, &PipelineOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.overall_score(), Some(8.0));

        let stored = store.get(&interview.id).await.unwrap().unwrap();
        assert_eq!(stored.status, InterviewStatus::Completed);
        assert_eq!(stored.overall_score, Some(8.0));
        assert!(stored.completed_at.is_some());
        let items = stored.feedback_details.clone().unwrap();
        assert_eq!(items.len(), 3);
        assert!(
            stored
                .responses
                .iter()
                .zip(&items)
                .all(|(r, i)| r.question_index == i.question_index && r.answer_text == i.answer)
        );
        assert_eq!(items[0].tips, "Use STAR.");
    }

    #[tokio::test]
    async fn one_item_per_response_for_partial_sessions() {
        let (store, interview) = interview_with_answers(&[(0, "zero"), (2, "two")]).await;

        let mut scorer = MockScorer::new();
        scorer
            .expect_score_answer()
            .times(2)
            .returning(|_, answer, _| Ok(feedback_json(if answer == "zero" { 5 } else { 6 })));

        let outcome = generate_feedback(&store, &scorer, &interview.id, &PipelineOptions::default())
            .await
            .unwrap();
        match outcome {
            FeedbackOutcome::Generated { overall_score, items } => {
                assert_eq!(overall_score, 5.5);
                let indices: Vec<_> = items.iter().map(|i| i.question_index).collect();
                assert_eq!(indices, vec![0, 2]);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn failed_items_are_isolated_and_nothing_is_written() {
        let (store, interview) =
            interview_with_answers(&[(0, "fine"), (1, "garbled"), (2, "upstream")]).await;

        let mut scorer = MockScorer::new();
        scorer
            .expect_score_answer()
            .times(3)
            .returning(|_, answer, _| match answer {
                "garbled" => Ok("I'd give this a solid eight".to_string()),
                "upstream" => Err(anyhow::anyhow!("503 Service Unavailable")),
                _ => Ok(feedback_json(9)),
            });

        let err = generate_feedback(&store, &scorer, &interview.id, &PipelineOptions::default())
            .await
            .unwrap_err();
        match err {
            PipelineError::Incomplete { total, failures, .. } => {
                assert_eq!(total, 3);
                let mut indices: Vec<_> = failures.iter().map(|f| f.question_index).collect();
                indices.sort();
                assert_eq!(indices, vec![1, 2]);
                assert!(failures.iter().any(|f| matches!(f.error, ScoringError::Malformed(_))));
                assert!(failures.iter().any(|f| matches!(f.error, ScoringError::Upstream(_))));
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let stored = store.get(&interview.id).await.unwrap().unwrap();
        assert_ne!(stored.status, InterviewStatus::Completed);
        assert_eq!(stored.overall_score, None);
        assert!(stored.feedback_details.is_none());
    }

    #[tokio::test]
    async fn completed_interviews_are_not_rescored() {
        let (store, interview) = interview_with_answers(&[(0, "once")]).await;

        let mut scorer = MockScorer::new();
        scorer
            .expect_score_answer()
            .times(1)
            .returning(|_, _, _| Ok(feedback_json(4)));

        let options = PipelineOptions::default();
        generate_feedback(&store, &scorer, &interview.id, &options).await.unwrap();
        let second = generate_feedback(&store, &scorer, &interview.id, &options)
            .await
            .unwrap();
        assert_eq!(
            second,
            FeedbackOutcome::AlreadyCompleted {
                overall_score: Some(4.0)
            }
        );
    }

    #[tokio::test]
    async fn missing_interview_and_empty_responses_are_rejected() {
        let (store, interview) = interview_with_answers(&[]).await;
        let scorer = MockScorer::new();
        let options = PipelineOptions::default();

        assert!(matches!(
            generate_feedback(&store, &scorer, "nope", &options).await,
            Err(PipelineError::NotFound(_))
        ));
        assert!(matches!(
            generate_feedback(&store, &scorer, &interview.id, &options).await,
            Err(PipelineError::NoResponses(_))
        ));
    }

    /// Writes a response through the store from inside a scoring call, the
    /// way a live session keeps capturing while feedback is requested.
    struct WritesWhileScoring {
        store: SqliteInterviewStore,
        interview: Interview,
        late: Mutex<Option<(usize, String)>>,
        revise_every_call: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Scorer for WritesWhileScoring {
        async fn score_answer(&self, _question: &str, answer: &str, _role: &str) -> anyhow::Result<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let late = if self.revise_every_call {
                Some((1, format!("revision {call}")))
            } else {
                self.late.lock().unwrap().take()
            };
            if let Some((index, text)) = late {
                let response = self.interview.response_for(index, text).unwrap();
                self.store.upsert_response(&self.interview.id, &response).await?;
            }
            Ok(feedback_json(if answer == "late" { 4 } else { 8 }))
        }

        async fn generate_questions(&self, _request: &QuestionRequest) -> anyhow::Result<String> {
            Err(anyhow::anyhow!("not used"))
        }
    }

    #[tokio::test]
    async fn answer_captured_mid_scoring_is_scored_before_completion() {
        let (store, interview) = interview_with_answers(&[(0, "early")]).await;
        let scorer = WritesWhileScoring {
            store: store.clone(),
            interview: interview.clone(),
            late: Mutex::new(Some((2, "late".to_string()))),
            revise_every_call: false,
            calls: AtomicUsize::new(0),
        };

        let outcome = generate_feedback(&store, &scorer, &interview.id, &PipelineOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.overall_score(), Some(6.0));
        // One call on the stale snapshot, two on the fresh one.
        assert_eq!(scorer.calls.load(Ordering::SeqCst), 3);

        let stored = store.get(&interview.id).await.unwrap().unwrap();
        assert_eq!(stored.status, InterviewStatus::Completed);
        let scored: Vec<_> = stored
            .feedback_details
            .unwrap()
            .iter()
            .map(|i| i.question_index)
            .collect();
        let answered: Vec<_> = stored.responses.iter().map(|r| r.question_index).collect();
        assert_eq!(answered, vec![0, 2]);
        assert_eq!(scored, answered);
    }

    #[tokio::test]
    async fn responses_that_never_settle_leave_the_interview_open() {
        let (store, interview) = interview_with_answers(&[(0, "early")]).await;
        let scorer = WritesWhileScoring {
            store: store.clone(),
            interview: interview.clone(),
            late: Mutex::new(None),
            revise_every_call: true,
            calls: AtomicUsize::new(0),
        };

        let err = generate_feedback(&store, &scorer, &interview.id, &PipelineOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ResponsesChanged { passes: MAX_SCORING_PASSES, .. }
        ));

        let stored = store.get(&interview.id).await.unwrap().unwrap();
        assert_ne!(stored.status, InterviewStatus::Completed);
        assert_eq!(stored.overall_score, None);
        assert!(stored.feedback_details.is_none());
    }
}
