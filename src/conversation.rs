//! Conversation Loop (spec §4.D): ask a question, validate the response,
//! re-ask up to a bounded number of attempts.

use std::sync::LazyLock;

use regex::Regex;

use crate::config::ConversationConfig;
use crate::evaluator::{EvaluationContext, QualityAssessment, QualityEvaluator};
use crate::store::{ConversationTurn, Role, TurnMetadata};

/// Prompt-injection screen patterns. Case-insensitivity is achieved by
/// lower-casing the candidate string before matching rather than pulling in
/// a Unicode-normalization crate for this narrow a need.
static INJECTION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"ignore (all )?(previous|prior|above) instructions").unwrap(),
        Regex::new(r"you are now").unwrap(),
        Regex::new(r"system prompt").unwrap(),
        Regex::new(r"</?(system|assistant|user)>").unwrap(),
        Regex::new(r"\{\{.*\}\}").unwrap(),
    ]
});

#[derive(Debug, thiserror::Error)]
pub enum ConversationError {
    #[error("response exceeds the {0}-character bound")]
    ResponseTooLong(usize),

    #[error("question exceeds the {0}-character bound")]
    QuestionTooLong(usize),

    #[error("response flagged by the injection screen")]
    InjectionDetected,

    #[error("evaluator error: {0}")]
    Evaluator(#[from] crate::evaluator::EvaluatorError),

    #[error("evaluation timed out")]
    EvaluationTimeout,
}

/// Outcome of asking one question to completion.
#[derive(Debug, Clone)]
pub struct AskResult {
    pub final_response: String,
    pub assessment: QualityAssessment,
    pub attempts_used: u32,
    pub turns: Vec<ConversationTurn>,
    /// True if the attempt budget was exhausted before the quality
    /// threshold was met — the last response was force-accepted rather than
    /// the loop failing upward (spec §4.D, §7: `attempts_exhausted` is not
    /// an error, the best response is still returned).
    pub force_accepted: bool,
}

/// Checks a candidate response against the injection pattern list.
pub fn screen_for_injection(text: &str) -> bool {
    let lowered = text.to_lowercase();
    INJECTION_PATTERNS.iter().any(|re| re.is_match(&lowered))
}

/// Escapes triple-quote and template delimiters before a string is embedded
/// in a prompt, so user content cannot break out of its slot.
pub fn escape_for_prompt(text: &str) -> String {
    text.replace("\"\"\"", "'''")
        .replace("{{", "{ {")
        .replace("}}", "} }")
}

/// Fetches a user's response to `question`, re-asking until the quality
/// threshold is met or the attempt budget is exhausted.
pub struct ConversationLoop<'a> {
    evaluator: QualityEvaluator<'a>,
    config: &'a ConversationConfig,
}

/// A source of user input, abstracted so the loop can be driven by a CLI
/// prompt, an HTTP handler, or a test fixture.
#[async_trait::async_trait]
pub trait ResponseSource: Send + Sync {
    async fn next_response(&mut self, question: &str) -> String;
}

impl<'a> ConversationLoop<'a> {
    pub fn new(evaluator: QualityEvaluator<'a>, config: &'a ConversationConfig) -> Self {
        Self { evaluator, config }
    }

    pub async fn ask(
        &self,
        source: &mut dyn ResponseSource,
        session_id: &str,
        question: &str,
        stage_number: u8,
        seq_start: u64,
    ) -> Result<AskResult, ConversationError> {
        if question.chars().count() > self.config.max_question_chars {
            return Err(ConversationError::QuestionTooLong(self.config.max_question_chars));
        }

        let mut turns = Vec::new();
        let mut seq = seq_start;
        let session_id = session_id.to_string();

        turns.push(ConversationTurn {
            session_id: session_id.clone(),
            seq,
            role: Role::Assistant,
            content: question.to_string(),
            stage_number,
            timestamp: chrono::Utc::now(),
            metadata: TurnMetadata::default(),
        });
        seq += 1;

        let mut attempt = 0u32;
        let mut last_response = String::new();
        let mut last_assessment = QualityAssessment {
            score: 0,
            issues: vec![],
            rationale: String::new(),
        };

        loop {
            attempt += 1;
            let response = source.next_response(question).await;

            if response.chars().count() > self.config.max_response_chars {
                return Err(ConversationError::ResponseTooLong(self.config.max_response_chars));
            }
            if screen_for_injection(&response) {
                return Err(ConversationError::InjectionDetected);
            }

            turns.push(ConversationTurn {
                session_id: session_id.clone(),
                seq,
                role: Role::User,
                content: response.clone(),
                stage_number,
                timestamp: chrono::Utc::now(),
                metadata: TurnMetadata {
                    attempt_index: Some(attempt),
                    ..Default::default()
                },
            });
            seq += 1;

            let ctx = EvaluationContext {
                question: question.to_string(),
                response: escape_for_prompt(&response),
                stage_number,
            };

            let assessment = tokio::time::timeout(
                self.config.evaluation_timeout,
                self.evaluator.evaluate(&ctx),
            )
            .await
            .map_err(|_| ConversationError::EvaluationTimeout)??;

            turns.push(ConversationTurn {
                session_id: session_id.clone(),
                seq,
                role: Role::System,
                content: format!("score={} issues={:?}", assessment.score, assessment.issues),
                stage_number,
                timestamp: chrono::Utc::now(),
                metadata: TurnMetadata {
                    quality_score: Some(assessment.score),
                    attempt_index: Some(attempt),
                    issues: assessment
                        .issues
                        .iter()
                        .map(|i| format!("{:?}", i))
                        .collect(),
                },
            });
            seq += 1;

            last_response = response;
            last_assessment = assessment;

            if last_assessment.score >= self.config.quality_threshold {
                break;
            }
            if attempt >= self.config.max_attempts {
                turns.push(ConversationTurn {
                    session_id: session_id.clone(),
                    seq,
                    role: Role::System,
                    content: format!(
                        "FORCE_ACCEPT after {} attempts: final score={} issues={:?}",
                        attempt, last_assessment.score, last_assessment.issues
                    ),
                    stage_number,
                    timestamp: chrono::Utc::now(),
                    metadata: TurnMetadata {
                        quality_score: Some(last_assessment.score),
                        attempt_index: Some(attempt),
                        ..Default::default()
                    },
                });
                return Ok(AskResult {
                    final_response: last_response,
                    assessment: last_assessment,
                    attempts_used: attempt,
                    turns,
                    force_accepted: true,
                });
            }
        }

        Ok(AskResult {
            final_response: last_response,
            assessment: last_assessment,
            attempts_used: attempt,
            turns,
            force_accepted: false,
        })
    }
}
