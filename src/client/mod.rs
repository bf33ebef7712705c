use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use log::{ debug, warn };
use std::sync::{ Arc, Mutex };
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::RelayError;
use crate::models::chat::{
    ChatRequest,
    ConversationTurn,
    GenerateContentResponse,
    InlineData,
    Part,
    ProxyErrorResponse,
    Role,
};

/// Result of one conversation turn. A user-initiated stop is an outcome,
/// not an error.
#[derive(Debug)]
pub enum TurnOutcome {
    Reply(String),
    Cancelled,
}

/// Client-side retry policy in front of the relay. Separate from the
/// relay's own upstream retry; this one covers the hop to the relay.
#[derive(Debug, Clone)]
pub struct DispatchPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub timeout: Duration,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_secs(1),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Stops whatever turn is in flight when invoked. Cloneable so the UI can
/// hold it while the dispatcher runs.
#[derive(Clone)]
pub struct StopHandle {
    inner: Arc<Mutex<CancellationToken>>,
}

impl StopHandle {
    pub fn stop(&self) {
        match self.inner.lock() {
            Ok(token) => token.cancel(),
            Err(poisoned) => poisoned.into_inner().cancel(),
        }
    }
}

/// The browser widget's request loop as a library client: one in-flight
/// turn at a time, an in-memory transcript, limited retry on transient
/// failures, and a cooperative stop.
pub struct ChatDispatcher {
    http: reqwest::Client,
    endpoint: String,
    policy: DispatchPolicy,
    session_id: Uuid,
    transcript: Vec<ConversationTurn>,
    pending_attachment: Option<InlineData>,
    cancel: Arc<Mutex<CancellationToken>>,
}

impl ChatDispatcher {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            policy: DispatchPolicy::default(),
            session_id: Uuid::new_v4(),
            transcript: Vec::new(),
            pending_attachment: None,
            cancel: Arc::new(Mutex::new(CancellationToken::new())),
        }
    }

    pub fn with_policy(mut self, policy: DispatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Handle for the user-initiated stop. Stopping aborts the in-flight
    /// call and suppresses any scheduled retries for the current turn.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle { inner: Arc::clone(&self.cancel) }
    }

    pub fn transcript(&self) -> &[ConversationTurn] {
        &self.transcript
    }

    /// The "delete chat" action: wipes the in-memory transcript.
    pub fn clear(&mut self) {
        self.transcript.clear();
        self.pending_attachment = None;
    }

    /// Attach one base64-encoded file to the next user turn.
    pub fn attach_file(&mut self, mime_type: impl Into<String>, bytes: &[u8]) {
        self.pending_attachment = Some(InlineData {
            mime_type: mime_type.into(),
            data: STANDARD.encode(bytes),
        });
    }

    /// Run one conversation turn. Starting a new turn supersedes any prior
    /// in-flight call. On success the model reply is appended to the
    /// transcript; on terminal failure the caller renders
    /// [`RelayError::user_message`].
    pub async fn send(&mut self, message: &str) -> Result<TurnOutcome, RelayError> {
        let cancel = self.begin_turn();

        let mut parts = vec![Part::Text { text: message.to_string() }];
        if let Some(attachment) = self.pending_attachment.take() {
            parts.push(Part::InlineData { inline_data: attachment });
        }
        self.transcript.push(ConversationTurn { role: Role::User, parts });

        let request = ChatRequest { contents: self.transcript.clone() };
        let mut attempt: u32 = 0;
        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("[{}] turn cancelled", self.session_id);
                    return Ok(TurnOutcome::Cancelled);
                }
                r = self.post_once(&request) => r,
            };

            match result {
                Ok(text) => {
                    self.transcript.push(ConversationTurn::model_text(text.clone()));
                    return Ok(TurnOutcome::Reply(text));
                }
                Err(err) => {
                    if !err.is_retryable() || attempt >= self.policy.max_retries {
                        warn!("[{}] turn failed: {}", self.session_id, err);
                        return Err(err);
                    }
                    let delay = self.policy.initial_delay.saturating_mul(1u32 << attempt.min(16));
                    debug!(
                        "[{}] transient failure ({}); retrying in {:?}",
                        self.session_id,
                        err.error_type(),
                        delay
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            return Ok(TurnOutcome::Cancelled);
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// Cancel any prior in-flight turn and install a fresh token for this
    /// one. Stop handles observe the swap through the shared slot.
    fn begin_turn(&self) -> CancellationToken {
        let mut slot = match self.cancel.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        slot.cancel();
        *slot = CancellationToken::new();
        slot.clone()
    }

    async fn post_once(&self, request: &ChatRequest) -> Result<String, RelayError> {
        let send = self.http.post(&self.endpoint).json(request).send();
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
        let body: serde_json::Value = response
            .json().await
            .map_err(|_| RelayError::InvalidUpstream("invalid response from server".to_string()))?;

        if !status.is_success() {
            let parsed: Option<ProxyErrorResponse> = serde_json::from_value(body).ok();
            return Err(RelayError::from_wire(status.as_u16(), parsed));
        }

        let reply: GenerateContentResponse = serde_json::from_value(body)
            .map_err(|e| RelayError::InvalidUpstream(e.to_string()))?;
        reply.first_text().ok_or_else(|| {
            RelayError::InvalidUpstream("reply carries no candidate message content".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{ method, path };
    use wiremock::{ Mock, MockServer, ResponseTemplate };

    fn reply_body(text: &str) -> serde_json::Value {
        serde_json::json!({
            "candidates": [{ "content": { "parts": [{ "text": text }] } }]
        })
    }

    fn fast_policy() -> DispatchPolicy {
        DispatchPolicy {
            max_retries: 2,
            initial_delay: Duration::from_millis(10),
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn successful_turn_appends_both_sides_to_transcript() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply_body("Hi there")))
            .mount(&server).await;

        let mut dispatcher = ChatDispatcher::new(format!("{}/api/chat", server.uri()));
        let outcome = dispatcher.send("Hello").await.unwrap();

        match outcome {
            TurnOutcome::Reply(text) => assert_eq!(text, "Hi there"),
            TurnOutcome::Cancelled => panic!("turn should not be cancelled"),
        }
        assert_eq!(dispatcher.transcript().len(), 2);
        assert_eq!(dispatcher.transcript()[0].role, Role::User);
        assert_eq!(dispatcher.transcript()[1].role, Role::Model);
        assert_eq!(dispatcher.transcript()[1].text(), Some("Hi there"));
    }

    #[tokio::test]
    async fn transient_relay_failure_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(
                ResponseTemplate::new(503).set_body_json(
                    serde_json::json!({
                        "error": { "message": "upstream unavailable", "type": "upstream_unavailable" }
                    })
                )
            )
            .up_to_n_times(1)
            .mount(&server).await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply_body("Recovered")))
            .mount(&server).await;

        let mut dispatcher = ChatDispatcher::new(format!("{}/api/chat", server.uri())).with_policy(
            fast_policy()
        );
        let outcome = dispatcher.send("Hello").await.unwrap();
        assert!(matches!(outcome, TurnOutcome::Reply(text) if text == "Recovered"));
    }

    #[tokio::test]
    async fn terminal_failure_surfaces_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(
                    serde_json::json!({
                        "error": {
                            "message": "invalid request: contents must not be empty",
                            "type": "validation_error"
                        }
                    })
                )
            )
            .expect(1)
            .mount(&server).await;

        let mut dispatcher = ChatDispatcher::new(format!("{}/api/chat", server.uri())).with_policy(
            fast_policy()
        );
        let err = dispatcher.send("Hello").await.unwrap_err();
        assert_eq!(err.error_type(), "validation_error");
        assert_eq!(err.user_message(), "Your message couldn't be sent. Please try again.");
        // The failed user turn stays in the transcript, matching widget behavior.
        assert_eq!(dispatcher.transcript().len(), 1);
        server.verify().await;
    }

    #[tokio::test]
    async fn stop_suppresses_scheduled_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(
                ResponseTemplate::new(503).set_body_json(
                    serde_json::json!({
                        "error": { "message": "still down", "type": "upstream_unavailable" }
                    })
                )
            )
            .mount(&server).await;

        let mut dispatcher = ChatDispatcher::new(format!("{}/api/chat", server.uri())).with_policy(
            DispatchPolicy {
                max_retries: 5,
                initial_delay: Duration::from_secs(30),
                timeout: Duration::from_secs(5),
            }
        );
        let handle = dispatcher.stop_handle();

        let (outcome, _) = tokio::join!(dispatcher.send("Hello"), async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            handle.stop();
        });

        assert!(matches!(outcome.unwrap(), TurnOutcome::Cancelled));
    }

    #[tokio::test]
    async fn attachment_rides_along_on_the_next_user_turn() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply_body("Nice picture")))
            .mount(&server).await;

        let mut dispatcher = ChatDispatcher::new(format!("{}/api/chat", server.uri()));
        dispatcher.attach_file("image/png", b"pixels");
        dispatcher.send("What is this?").await.unwrap();

        let user_turn = &dispatcher.transcript()[0];
        assert_eq!(user_turn.parts.len(), 2);
        match &user_turn.parts[1] {
            Part::InlineData { inline_data } => {
                assert_eq!(inline_data.mime_type, "image/png");
                assert_eq!(inline_data.data, STANDARD.encode(b"pixels"));
            }
            other => panic!("unexpected part: {:?}", other),
        }

        // Next turn carries no attachment.
        dispatcher.send("Thanks").await.unwrap();
        assert_eq!(dispatcher.transcript()[2].parts.len(), 1);
    }

    #[tokio::test]
    async fn clear_wipes_the_transcript() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply_body("Hi")))
            .mount(&server).await;

        let mut dispatcher = ChatDispatcher::new(format!("{}/api/chat", server.uri()));
        dispatcher.send("Hello").await.unwrap();
        assert!(!dispatcher.transcript().is_empty());

        dispatcher.clear();
        assert!(dispatcher.transcript().is_empty());
    }
}
