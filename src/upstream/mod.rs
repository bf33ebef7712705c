pub mod gemini;
pub mod shape;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::cli::Args;
use crate::error::RelayError;
use crate::models::chat::GenerateContentRequest;
use self::gemini::GeminiClient;

/// Bounded retry with exponential backoff for upstream calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    /// Delay before the first retry, doubled on each subsequent retry.
    pub initial_backoff: Duration,
    /// Per-attempt timeout.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            timeout: Duration::from_secs(25),
        }
    }
}

impl RetryPolicy {
    pub fn from_args(args: &Args) -> Self {
        Self {
            max_retries: args.upstream_max_retries,
            initial_backoff: Duration::from_millis(args.upstream_initial_backoff_ms),
            timeout: Duration::from_secs(args.upstream_timeout_secs),
        }
    }

    /// Delay before the retry that follows attempt `attempt` (zero-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.initial_backoff.saturating_mul(1u32 << attempt.min(16))
    }
}

/// Validated upstream reply: the raw body for passthrough plus the extracted
/// message text.
#[derive(Debug)]
pub struct UpstreamReply {
    pub raw: serde_json::Value,
    pub text: String,
}

#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn generate(&self, payload: &GenerateContentRequest) -> Result<UpstreamReply, RelayError>;
}

pub fn new_client(args: &Args) -> Result<Arc<dyn UpstreamClient>, RelayError> {
    let client = GeminiClient::from_args(args)?;
    Ok(Arc::new(client))
}
