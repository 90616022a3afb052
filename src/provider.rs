use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Errors from the generative provider, classified once at this boundary so
/// callers never have to inspect message text themselves.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Quota or rate limit hit on the credential used for this call. The only
    /// class the rotation layer retries with a different credential.
    #[error("provider rate limit: {message}")]
    RateLimited { message: String },

    /// Credential rejected. Permanent for this credential.
    #[error("provider rejected credential: {message}")]
    Auth { message: String },

    /// The request itself was malformed. Retrying would send the same bad
    /// request again.
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    /// Anything else the provider reported, or a body we could not parse.
    #[error("provider error: {message}")]
    Provider { message: String },

    /// Transport-level failure, including the request timeout.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl ProviderError {
    /// True for the quota/rate class that warrants trying another credential.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

/// The one provider capability the rotation layer needs. Mocked in tests.
#[async_trait]
pub trait GenerateContent: Send + Sync {
    async fn generate_content(
        &self,
        credential: &str,
        prompt: &str,
    ) -> Result<String, ProviderError>;
}

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// HTTP adapter for a Gemini-style generateContent endpoint. The credential
/// is supplied per call by the rotation pool rather than baked into the
/// client, so one client serves every slot.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl GeminiClient {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .gzip(true)
            .build()
            .map_err(|e| ProviderError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            model: model.into(),
        })
    }

    fn generate_url(&self, credential: &str) -> String {
        format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, credential
        )
    }

    fn classify_error(status: u16, message: String) -> ProviderError {
        let lowered = message.to_lowercase();
        if status == 429 || lowered.contains("quota") || lowered.contains("rate") {
            return ProviderError::RateLimited { message };
        }
        match status {
            401 | 403 => ProviderError::Auth { message },
            400 => ProviderError::InvalidRequest { message },
            _ => ProviderError::Provider { message },
        }
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    parts: Option<Vec<CandidatePart>>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    message: Option<String>,
}

#[async_trait]
impl GenerateContent for GeminiClient {
    async fn generate_content(
        &self,
        credential: &str,
        prompt: &str,
    ) -> Result<String, ProviderError> {
        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
        };

        let response = self
            .client
            .post(self.generate_url(credential))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        debug!(status = status.as_u16(), "provider response received");

        if !status.is_success() {
            let message = serde_json::from_str::<GenerateResponse>(&text)
                .ok()
                .and_then(|parsed| parsed.error)
                .and_then(|error| error.message)
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            return Err(Self::classify_error(status.as_u16(), message));
        }

        let parsed: GenerateResponse = serde_json::from_str(&text).map_err(|e| {
            ProviderError::Provider {
                message: format!("invalid JSON from provider: {e}"),
            }
        })?;

        if let Some(error) = parsed.error {
            let message = error.message.unwrap_or_default();
            return Err(Self::classify_error(status.as_u16(), message));
        }

        let output: String = parsed
            .candidates
            .and_then(|candidates| candidates.into_iter().next())
            .and_then(|candidate| candidate.content)
            .and_then(|content| content.parts)
            .map(|parts| {
                parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if output.trim().is_empty() {
            return Err(ProviderError::Provider {
                message: "empty response from provider".to_string(),
            });
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_429_as_rate_limited() {
        let err = GeminiClient::classify_error(429, "too many requests".to_string());
        assert!(err.is_rate_limited());
    }

    #[test]
    fn classifies_quota_message_as_rate_limited() {
        let err = GeminiClient::classify_error(
            403,
            "Quota exceeded for quota metric 'GenerateContent'".to_string(),
        );
        assert!(err.is_rate_limited());
    }

    #[test]
    fn classifies_auth_and_bad_request() {
        assert!(matches!(
            GeminiClient::classify_error(401, "API key not valid".to_string()),
            ProviderError::Auth { .. }
        ));
        assert!(matches!(
            GeminiClient::classify_error(400, "missing contents".to_string()),
            ProviderError::InvalidRequest { .. }
        ));
    }

    #[test]
    fn server_errors_are_plain_provider_errors() {
        assert!(matches!(
            GeminiClient::classify_error(503, "backend unavailable".to_string()),
            ProviderError::Provider { .. }
        ));
    }
}
