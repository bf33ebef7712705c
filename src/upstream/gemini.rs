use async_trait::async_trait;
use log::{ debug, error, info, warn };
use reqwest::{ Client as HttpClient, StatusCode };
use url::Url;

use super::{ RetryPolicy, UpstreamClient, UpstreamReply };
use crate::cli::Args;
use crate::error::{ looks_rate_limited, truncate_message, RelayError };
use crate::models::chat::{ GenerateContentRequest, GenerateContentResponse, UpstreamErrorBody };

/// Caller for the Gemini `generateContent` REST endpoint with bounded retry.
///
/// The API key travels as a query parameter, so the full request URL is a
/// secret: it is never logged and never placed in error messages.
pub struct GeminiClient {
    http: HttpClient,
    api_key: Option<String>,
    model: String,
    base_url: Url,
    policy: RetryPolicy,
}

impl GeminiClient {
    pub fn new(
        api_key: Option<String>,
        model: String,
        base_url: &str,
        policy: RetryPolicy
    ) -> Result<Self, RelayError> {
        let base_url = Url::parse(base_url).map_err(|e| {
            RelayError::Configuration(format!("invalid upstream base URL '{}': {}", base_url, e))
        })?;

        let http = HttpClient::builder()
            .timeout(policy.timeout)
            .build()
            .map_err(|e| RelayError::Internal(format!("failed to build HTTP client: {}", e)))?;

        let api_key = api_key.filter(|k| !k.trim().is_empty());

        let client = Self { http, api_key, model, base_url, policy };
        info!("Gemini upstream endpoint: {}", client.redacted_endpoint());
        Ok(client)
    }

    pub fn from_args(args: &Args) -> Result<Self, RelayError> {
        Self::new(
            args.gemini_api_key.clone(),
            args.gemini_model.clone(),
            &args.gemini_base_url,
            RetryPolicy::from_args(args)
        )
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn endpoint(&self, key: &str) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url.as_str().trim_end_matches('/'),
            self.model,
            key
        )
    }

    /// Endpoint suitable for log lines.
    pub fn redacted_endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent?key=REDACTED",
            self.base_url.as_str().trim_end_matches('/'),
            self.model
        )
    }

    async fn attempt(
        &self,
        attempt: u32,
        url: &str,
        payload: &GenerateContentRequest
    ) -> Result<UpstreamReply, RelayError> {
        debug!("upstream attempt {} ({})", attempt + 1, self.redacted_endpoint());

        let send = self.http.post(url).json(payload).send();
        let response = match tokio::time::timeout(self.policy.timeout, send).await {
            Err(_) => {
                return Err(RelayError::timeout_after(self.policy.timeout));
            }
            Ok(Err(e)) => {
                return Err(RelayError::from_transport(e, self.policy.timeout));
            }
            Ok(Ok(r)) => r,
        };

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<UpstreamErrorBody>().await
                .ok()
                .and_then(|b| b.error)
                .and_then(|e| e.message)
                .unwrap_or_else(|| "unknown error from upstream".to_string());
            error!(
                "upstream attempt {} returned status {}: {}",
                attempt + 1,
                status.as_u16(),
                truncate_message(&message, 200)
            );
            return Err(classify_status(status, message));
        }

        let raw: serde_json::Value = response
            .json().await
            .map_err(|e| RelayError::InvalidUpstream(e.without_url().to_string()))?;
        let parsed: GenerateContentResponse = serde_json::from_value(raw.clone())
            .map_err(|e| RelayError::InvalidUpstream(e.to_string()))?;
        let text = parsed.first_text().ok_or_else(|| {
            RelayError::InvalidUpstream("reply carries no candidate message content".to_string())
        })?;

        debug!("upstream attempt {} succeeded", attempt + 1);
        Ok(UpstreamReply { raw, text })
    }
}

/// Map a terminal or retryable upstream status to an error kind. 429 and
/// 5xx are retryable; everything else ends the call, with quota wording
/// still surfacing as a rate limit.
fn classify_status(status: StatusCode, message: String) -> RelayError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return RelayError::rate_limited(message);
    }
    if status.is_server_error() {
        return RelayError::UpstreamUnavailable { status: status.as_u16(), message };
    }
    if looks_rate_limited(&message) {
        return RelayError::rate_limited(message);
    }
    RelayError::Internal(
        format!("upstream rejected request (status {}): {}", status.as_u16(), message)
    )
}

#[async_trait]
impl UpstreamClient for GeminiClient {
    async fn generate(&self, payload: &GenerateContentRequest) -> Result<UpstreamReply, RelayError> {
        // Without a key there is nothing to call; fail before any I/O.
        let key = self.api_key.as_deref().ok_or_else(|| {
            RelayError::Configuration("GEMINI_API_KEY is not set".to_string())
        })?;
        let url = self.endpoint(key);

        let mut attempt: u32 = 0;
        loop {
            match self.attempt(attempt, &url, payload).await {
                Ok(reply) => {
                    return Ok(reply);
                }
                Err(err) => {
                    if !err.is_retryable() || attempt >= self.policy.max_retries {
                        return Err(err);
                    }
                    let delay = self.policy.backoff_for(attempt);
                    warn!(
                        "upstream attempt {}/{} failed ({}); retrying in {:?}",
                        attempt + 1,
                        self.policy.max_retries + 1,
                        truncate_message(&err.to_string(), 200),
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
