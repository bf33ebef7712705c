use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Host address and port for the relay server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:3000")]
    pub server_addr: String,

    // --- Upstream API Args ---
    /// API key for the upstream generative-language API. When unset the
    /// server still starts but every chat call fails with a configuration
    /// error.
    #[arg(long, env = "GEMINI_API_KEY")]
    pub gemini_api_key: Option<String>,

    /// Base URL of the upstream generative-language API.
    #[arg(long, env = "GEMINI_BASE_URL", default_value = "https://generativelanguage.googleapis.com")]
    pub gemini_base_url: String,

    /// Model identifier used for chat completion.
    #[arg(long, env = "GEMINI_MODEL", default_value = "gemini-2.0-flash")]
    pub gemini_model: String,

    /// Per-attempt timeout in seconds for upstream calls.
    #[arg(long, env = "UPSTREAM_TIMEOUT_SECS", default_value = "25")]
    pub upstream_timeout_secs: u64,

    /// Maximum number of retries after the first upstream attempt.
    #[arg(long, env = "UPSTREAM_MAX_RETRIES", default_value = "3")]
    pub upstream_max_retries: u32,

    /// Initial backoff delay in milliseconds, doubled on each retry.
    #[arg(long, env = "UPSTREAM_INITIAL_BACKOFF_MS", default_value = "1000")]
    pub upstream_initial_backoff_ms: u64,

    /// Forward the full conversation history upstream instead of only the
    /// latest user message. Latest-only discards in-session context.
    #[arg(long, env = "FORWARD_HISTORY", default_value = "false")]
    pub forward_history: bool,

    // --- Rate Limit Args ---
    /// Enable the advisory in-memory per-IP rate limit. Resets on restart;
    /// not a security boundary.
    #[arg(long, env = "ENABLE_RATE_LIMIT", default_value = "false")]
    pub enable_rate_limit: bool,

    /// Length of the rate limit window in seconds.
    #[arg(long, env = "RATE_LIMIT_WINDOW_SECS", default_value = "60")]
    pub rate_limit_window_secs: u64,

    /// Maximum number of requests allowed per IP within one window.
    #[arg(long, env = "RATE_LIMIT_MAX_REQUESTS", default_value = "20")]
    pub rate_limit_max_requests: u32,

    // --- TLS Args ---
    /// Optional path to the TLS certificate file (PEM format). Requires --tls-key-path.
    #[arg(long, env = "TLS_CERT_PATH")]
    pub tls_cert_path: Option<String>,

    /// Optional path to the TLS private key file (PEM format). Requires --tls-cert-path.
    #[arg(long, env = "TLS_KEY_PATH")]
    pub tls_key_path: Option<String>,

    #[arg(long, env = "ENABLE_TLS", default_value = "false")]
    pub enable_tls: bool,
}
