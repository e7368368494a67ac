use crate::interview::{Interview, numbered_questions};
use std::collections::HashMap;

const DEFAULT_INTERVIEWER: &str = r#"You are an AI interview assistant conducting a {type} interview for a {level} {role} position.

Your task is to ask the following {count} questions one at a time:

{questions}

Ask ONE question at a time and wait for the candidate to respond. Listen to their answer and only move to the next question after they have finished answering. Don't rush through the questions.

At the start, introduce yourself briefly and then ask the first question.

When you're ready to move to a new question, use the function "nextQuestion" to advance to the next question.

After each answer, use the function "saveResponse" to record their answer. Pass the zero-based index of the question that was answered.

After all questions have been asked and answered, thank the candidate for their time and end the interview."#;

const DEFAULT_FEEDBACK: &str = r#"You are an expert interviewer for {role} positions.

Question: {question}

Candidate's Answer: {answer}

Provide feedback on the answer, including:
1. Strengths (what was good about the answer)
2. Areas for improvement
3. A score from 1-10
4. Additional tips or advice

Format your response as a JSON object with these keys: strengths, improvements, score, tips"#;

const DEFAULT_QUESTIONS: &str = r#"Generate {count} interview questions for a {experience}-level {role} position.
The interview should be of type: {type}.
Focus on these technologies: {technologies}.
Format the response as a JSON array of objects, each with "question" and "type" fields."#;

/// Prompt templates keyed by name, with `{placeholder}` substitution.
#[derive(Debug, Clone)]
pub struct PromptBook {
    interviewer: String,
    feedback: String,
    questions: String,
}

impl Default for PromptBook {
    fn default() -> Self {
        Self {
            interviewer: DEFAULT_INTERVIEWER.to_string(),
            feedback: DEFAULT_FEEDBACK.to_string(),
            questions: DEFAULT_QUESTIONS.to_string(),
        }
    }
}

impl PromptBook {
    /// Overrides the built-in templates with any of `interviewer`, `feedback`, `questions`.
    pub fn from_map(mut prompts: HashMap<String, String>) -> Self {
        let mut book = Self::default();
        if let Some(p) = prompts.remove("interviewer") {
            book.interviewer = p;
        }
        if let Some(p) = prompts.remove("feedback") {
            book.feedback = p;
        }
        if let Some(p) = prompts.remove("questions") {
            book.questions = p;
        }
        for unused in prompts.keys() {
            tracing::debug!("Ignoring unknown prompt template '{}'", unused);
        }
        book
    }

    pub fn interviewer_instructions(&self, interview: &Interview) -> String {
        render(
            &self.interviewer,
            &[
                ("type", &interview.interview_type),
                ("level", &interview.experience),
                ("role", &interview.role),
                ("count", &interview.question_count().to_string()),
                ("questions", &numbered_questions(&interview.questions)),
            ],
        )
    }

    pub fn feedback_prompt(&self, question: &str, answer: &str, role: &str) -> String {
        render(
            &self.feedback,
            &[("role", role), ("question", question), ("answer", answer)],
        )
    }

    pub fn questions_prompt(
        &self,
        role: &str,
        interview_type: &str,
        experience: &str,
        technologies: &str,
        count: u8,
    ) -> String {
        render(
            &self.questions,
            &[
                ("count", &count.to_string()),
                ("experience", experience),
                ("role", role),
                ("type", interview_type),
                ("technologies", technologies),
            ],
        )
    }
}

/// Replaces each `{key}` in `template` in a single pass, so substituted text
/// is never scanned again. Unknown placeholders are left as-is.
pub fn render(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return out;
        };

        let key = &after[..close];
        if key.contains('{') {
            // Not a placeholder; keep the brace and rescan from the next one.
            out.push('{');
            rest = after;
            continue;
        }
        match values.iter().find(|(k, _)| *k == key) {
            Some((_, value)) => out.push_str(value),
            None => out.push_str(&rest[open..open + close + 2]),
        }
        rest = &after[close + 1..];
    }

    out.push_str(rest);
    out
}
