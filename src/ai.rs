use std::fmt::Write;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::warn;

use crate::provider::{GenerateContent, ProviderError};
use crate::rotation::{KeyPool, RotationError};

#[derive(Debug, Error)]
pub enum AiError {
    /// Every credential is over its daily limit. Try again tomorrow.
    #[error(transparent)]
    QuotaExhausted(#[from] RotationError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("could not parse question list from provider output: {0}")]
    Parse(String),
}

/// One generated multiple-choice question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedQuestion {
    pub question: String,
    pub options: Vec<String>,
    pub answer: String,
    #[serde(default)]
    pub explanation: String,
}

/// Generation front end: owns the credential pool behind a lock and drives
/// provider calls through it.
///
/// A rate-limit failure on one credential is retried once per remaining slot
/// with a freshly acquired credential; any other provider error propagates
/// immediately so bad prompts and revoked keys are not masked as transient.
pub struct QuestionGenerator<P> {
    pool: Mutex<KeyPool>,
    provider: P,
}

impl<P: GenerateContent> QuestionGenerator<P> {
    pub fn new(pool: KeyPool, provider: P) -> Self {
        Self {
            pool: Mutex::new(pool),
            provider,
        }
    }

    /// Run one prompt through the provider, rotating credentials on
    /// rate-limit errors. Attempts are capped at the pool size so an
    /// adversarial error sequence still terminates.
    pub async fn generate(&self, prompt: &str) -> Result<String, AiError> {
        let pool_size = self.pool.lock().await.len();

        for attempt in 1..=pool_size {
            let lease = self.pool.lock().await.acquire()?;

            match self.provider.generate_content(&lease.credential, prompt).await {
                Ok(text) => {
                    self.pool.lock().await.mark_success(lease.slot_index);
                    return Ok(text);
                }
                Err(err) => {
                    self.pool.lock().await.mark_failure(lease.slot_index);
                    if err.is_rate_limited() && pool_size > 1 && attempt < pool_size {
                        warn!(
                            slot = lease.slot_index,
                            attempt, "credential rate limited, rotating to the next"
                        );
                        continue;
                    }
                    return Err(AiError::Provider(err));
                }
            }
        }

        // The final attempt always returns above; this satisfies the
        // compiler for the zero-size case the constructor already rejects.
        Err(AiError::QuotaExhausted(RotationError::QuotaExhausted))
    }

    /// Generate a structured multiple-choice question set.
    pub async fn generate_questions(
        &self,
        request: &QuestionRequest,
    ) -> Result<Vec<GeneratedQuestion>, AiError> {
        let prompt = build_question_prompt(request);
        let output = self.generate(&prompt).await?;
        parse_questions(&output)
    }
}

#[derive(Debug, Clone)]
pub struct QuestionRequest {
    pub class_name: String,
    pub subject: String,
    pub chapter: String,
    pub difficulty: String,
    pub quantity: u32,
}

pub fn build_question_prompt(request: &QuestionRequest) -> String {
    let mut prompt = String::new();
    let _ = writeln!(
        prompt,
        "Generate {} multiple-choice questions for class {} on the subject \"{}\", \
         chapter \"{}\", at {} difficulty.",
        request.quantity, request.class_name, request.subject, request.chapter,
        request.difficulty
    );
    let _ = writeln!(
        prompt,
        "Respond with only a JSON array. Each element must have the keys \
         \"question\", \"options\" (exactly 4 strings), \"answer\" (one of the \
         options), and \"explanation\"."
    );
    prompt
}

/// Parse the provider's output into questions, tolerating a markdown code
/// fence around the JSON array.
pub fn parse_questions(output: &str) -> Result<Vec<GeneratedQuestion>, AiError> {
    let stripped = strip_code_fence(output);
    let questions: Vec<GeneratedQuestion> =
        serde_json::from_str(stripped).map_err(|e| AiError::Parse(e.to_string()))?;

    if questions.is_empty() {
        return Err(AiError::Parse("provider returned no questions".to_string()));
    }
    for question in &questions {
        if question.options.is_empty() {
            return Err(AiError::Parse(format!(
                "question without options: {}",
                question.question
            )));
        }
    }
    Ok(questions)
}

fn strip_code_fence(output: &str) -> &str {
    let trimmed = output.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language tag on the opening fence line, if any.
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.trim_start_matches(['\r', '\n'])
        .strip_suffix("```")
        .unwrap_or(rest)
        .trim()
}
