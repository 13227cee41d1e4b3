//! Completion gateway with model fallback.
//!
//! `LlmGateway` owns the whole retry policy: linear backoff between attempts,
//! a per-call timeout, a global wall-clock budget, and a ranked model list it
//! walks with a cursor. It never returns an error; callers get a `Completion`
//! value and decide how to degrade.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use payplan_core::config::LlmConfig;
use payplan_core::errors::ApplicationError;

pub const ERROR_PREFIX: &str = "ERROR:";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Completion {
    Text(String),
    /// Upstream rejected the API key. Never retried.
    InvalidCredential,
    /// Retry budget ran out without a usable answer.
    Exhausted,
}

impl Completion {
    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text(_))
    }

    pub fn into_result(self) -> Result<String, GatewayFailure> {
        match self {
            Self::Text(text) => Ok(text),
            Self::InvalidCredential => Err(GatewayFailure::InvalidCredential),
            Self::Exhausted => Err(GatewayFailure::Exhausted),
        }
    }
}

impl fmt::Display for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::InvalidCredential => write!(f, "{ERROR_PREFIX} invalid API credential"),
            Self::Exhausted => write!(f, "{ERROR_PREFIX} completion service unavailable"),
        }
    }
}

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum GatewayFailure {
    #[error("completion service rejected the API credential")]
    InvalidCredential,
    #[error("completion service did not answer within the retry budget")]
    Exhausted,
}

impl From<GatewayFailure> for ApplicationError {
    fn from(value: GatewayFailure) -> Self {
        ApplicationError::Integration(value.to_string())
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Completion;
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("transport error: {0}")]
    Other(String),
}

/// One HTTP round trip to the completion endpoint.
#[async_trait]
pub trait CompletionTransport: Send + Sync {
    async fn send(&self, request: &CompletionRequest) -> Result<TransportResponse, TransportError>;
}

pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    api_key: SecretString,
    site_url: Option<String>,
    site_name: Option<String>,
}

impl HttpTransport {
    pub fn new(config: &LlmConfig) -> Result<Self, ApplicationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ApplicationError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.base_url.clone(),
            api_key: config.api_key.clone(),
            site_url: config.site_url.clone(),
            site_name: config.site_name.clone(),
        })
    }
}

#[async_trait]
impl CompletionTransport for HttpTransport {
    async fn send(&self, request: &CompletionRequest) -> Result<TransportResponse, TransportError> {
        let mut builder =
            self.client.post(&self.endpoint).bearer_auth(self.api_key.expose_secret()).json(request);
        if let Some(site_url) = &self.site_url {
            builder = builder.header("HTTP-Referer", site_url);
        }
        if let Some(site_name) = &self.site_name {
            builder = builder.header("X-Title", site_name);
        }

        let response = builder.send().await.map_err(classify_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(classify_reqwest_error)?;
        Ok(TransportResponse { status, body })
    }
}

fn classify_reqwest_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else if error.is_connect() || error.is_request() || error.is_body() {
        TransportError::Network(error.to_string())
    } else {
        TransportError::Other(error.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub request_timeout: Duration,
    pub total_budget: Duration,
    pub backoff_step: Duration,
    pub max_backoff: Duration,
    pub network_penalty: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            total_budget: Duration::from_secs(config.total_budget_secs),
            ..Self::default()
        }
    }

    /// Delay before attempt `attempt` (1-based); the first attempt never waits.
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        self.backoff_step.saturating_mul(attempt).min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(25),
            total_budget: Duration::from_secs(180),
            backoff_step: Duration::from_secs(2),
            max_backoff: Duration::from_secs(30),
            network_penalty: Duration::from_secs(5),
        }
    }
}

/// What happened during one `complete` call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AttemptTrace {
    pub attempts: u32,
    pub cursor_advances: u32,
    pub models_tried: Vec<String>,
}

enum Step {
    Done(Completion),
    Advance(&'static str),
    Retry(&'static str),
    RetryAfterNetworkError(String),
}

pub struct LlmGateway {
    transport: Arc<dyn CompletionTransport>,
    models: Vec<String>,
    policy: RetryPolicy,
    temperature: f32,
    max_tokens: u32,
}

impl LlmGateway {
    pub fn new(
        transport: Arc<dyn CompletionTransport>,
        models: Vec<String>,
        policy: RetryPolicy,
    ) -> Self {
        Self { transport, models, policy, temperature: 0.0, max_tokens: 512 }
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, ApplicationError> {
        let transport = Arc::new(HttpTransport::new(config)?);
        Ok(Self::with_transport(transport, config))
    }

    pub fn with_transport(transport: Arc<dyn CompletionTransport>, config: &LlmConfig) -> Self {
        Self {
            transport,
            models: config.models.clone(),
            policy: RetryPolicy::from_config(config),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    pub async fn complete_with_trace(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> (Completion, AttemptTrace) {
        let mut trace = AttemptTrace::default();
        if self.models.is_empty() {
            warn!(event_name = "agent.gateway.no_models", "no completion models configured");
            return (Completion::Exhausted, trace);
        }

        let started = Instant::now();
        let mut cursor = 0usize;

        while started.elapsed() < self.policy.total_budget {
            trace.attempts += 1;
            let attempt = trace.attempts;
            let model = self.models[cursor % self.models.len()].clone();

            let delay = self.policy.backoff(attempt);
            if !delay.is_zero() {
                debug!(event_name = "agent.gateway.backoff", attempt, delay_secs = delay.as_secs(), "waiting before retry");
                tokio::time::sleep(delay).await;
            }

            trace.models_tried.push(model.clone());
            let request = self.request_for(&model, system_prompt, user_prompt);
            let outcome = tokio::time::timeout(self.policy.request_timeout, self.transport.send(&request))
                .await
                .unwrap_or(Err(TransportError::Timeout));

            match evaluate(outcome) {
                Step::Done(completion) => {
                    match &completion {
                        Completion::Text(_) => info!(event_name = "agent.gateway.completed", model = %model, attempt, "completion received"),
                        _ => warn!(event_name = "agent.gateway.invalid_credential", model = %model, attempt, "completion service rejected credential"),
                    }
                    return (completion, trace);
                }
                Step::Advance(reason) => {
                    warn!(event_name = "agent.gateway.retry", model = %model, attempt, reason, "switching model");
                    cursor += 1;
                    trace.cursor_advances += 1;
                }
                Step::Retry(reason) => {
                    warn!(event_name = "agent.gateway.retry", model = %model, attempt, reason, "retrying same model");
                }
                Step::RetryAfterNetworkError(detail) => {
                    warn!(event_name = "agent.gateway.network_error", model = %model, attempt, error = %detail, "network error, retrying same model");
                    tokio::time::sleep(self.policy.network_penalty).await;
                }
            }
        }

        warn!(
            event_name = "agent.gateway.exhausted",
            attempts = trace.attempts,
            budget_secs = self.policy.total_budget.as_secs(),
            "completion budget exhausted"
        );
        (Completion::Exhausted, trace)
    }

    fn request_for(&self, model: &str, system_prompt: &str, user_prompt: &str) -> CompletionRequest {
        CompletionRequest {
            model: model.to_string(),
            messages: vec![
                ChatMessage { role: "system", content: system_prompt.to_string() },
                ChatMessage { role: "user", content: user_prompt.to_string() },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

#[async_trait]
impl LlmClient for LlmGateway {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Completion {
        self.complete_with_trace(system_prompt, user_prompt).await.0
    }
}

fn evaluate(outcome: Result<TransportResponse, TransportError>) -> Step {
    let response = match outcome {
        Ok(response) => response,
        Err(TransportError::Timeout) => return Step::Advance("timeout"),
        Err(TransportError::Network(detail)) => return Step::RetryAfterNetworkError(detail),
        Err(TransportError::Other(_)) => return Step::Advance("transport error"),
    };

    if response.body.trim().is_empty() {
        return Step::Advance("empty body");
    }
    match response.status {
        429 => return Step::Advance("rate limited"),
        404 => return Step::Advance("model not found"),
        401 => return Step::Done(Completion::InvalidCredential),
        503 => return Step::Retry("service unavailable"),
        200 => {}
        _ => return Step::Advance("unexpected status"),
    }

    let Ok(payload) = serde_json::from_str::<Value>(&response.body) else {
        return Step::Advance("invalid json");
    };
    match first_choice_content(&payload) {
        Some(content) => Step::Done(Completion::Text(content.trim().to_string())),
        None => Step::Advance("no usable choice"),
    }
}

fn first_choice_content(payload: &Value) -> Option<&str> {
    payload.get("choices")?.get(0)?.get("message")?.get("content")?.as_str()
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use payplan_core::config::LlmConfig;

    use super::{
        Completion, CompletionRequest, CompletionTransport, GatewayFailure, HttpTransport,
        LlmGateway, RetryPolicy, TransportError, TransportResponse,
    };

    fn ok_body(content: &str) -> String {
        serde_json::json!({"choices": [{"message": {"role": "assistant", "content": content}}]})
            .to_string()
    }

    fn response(status: u16, body: impl Into<String>) -> Result<TransportResponse, TransportError> {
        Ok(TransportResponse { status, body: body.into() })
    }

    /// Replies from a per-model script; the last reply of a model repeats.
    #[derive(Default)]
    struct ScriptedTransport {
        by_model: Mutex<HashMap<String, VecDeque<Result<TransportResponse, TransportError>>>>,
        requests: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn with(mut self, model: &str, replies: Vec<Result<TransportResponse, TransportError>>) -> Self {
            self.by_model.get_mut().expect("script lock").insert(model.to_string(), replies.into());
            self
        }

        fn requested_models(&self) -> Vec<String> {
            self.requests.lock().expect("requests lock").clone()
        }
    }

    #[async_trait]
    impl CompletionTransport for ScriptedTransport {
        async fn send(&self, request: &CompletionRequest) -> Result<TransportResponse, TransportError> {
            self.requests.lock().expect("requests lock").push(request.model.clone());
            let mut scripts = self.by_model.lock().expect("script lock");
            let Some(replies) = scripts.get_mut(&request.model) else {
                return response(404, "{\"error\":{\"message\":\"unknown model\"}}");
            };
            if replies.len() > 1 {
                replies.pop_front().unwrap_or(Err(TransportError::Other("empty script".into())))
            } else {
                replies.front().cloned().unwrap_or(Err(TransportError::Other("empty script".into())))
            }
        }
    }

    struct HangingTransport;

    #[async_trait]
    impl CompletionTransport for HangingTransport {
        async fn send(&self, _request: &CompletionRequest) -> Result<TransportResponse, TransportError> {
            std::future::pending().await
        }
    }

    fn models() -> Vec<String> {
        vec!["model-a".to_string(), "model-b".to_string(), "model-c".to_string()]
    }

    fn gateway(transport: Arc<dyn CompletionTransport>) -> LlmGateway {
        LlmGateway::new(transport, models(), RetryPolicy::default())
    }

    #[test]
    fn backoff_is_linear_and_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::ZERO);
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(7), Duration::from_secs(14));
        assert_eq!(policy.backoff(40), Duration::from_secs(30));
    }

    #[test]
    fn sentinels_render_with_error_prefix() {
        assert!(Completion::Exhausted.to_string().starts_with("ERROR:"));
        assert!(Completion::InvalidCredential.to_string().starts_with("ERROR:"));
        assert_eq!(Completion::Exhausted.into_result(), Err(GatewayFailure::Exhausted));
        assert_eq!(Completion::Text("PAGAR".into()).into_result(), Ok("PAGAR".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_models_fall_through_to_next() {
        let transport = Arc::new(
            ScriptedTransport::default()
                .with("model-a", vec![response(429, "{\"error\":{\"message\":\"rate limited\"}}")])
                .with("model-b", vec![response(429, "{\"error\":{\"message\":\"rate limited\"}}")])
                .with("model-c", vec![response(200, ok_body("  PLANIFICAR \n"))]),
        );

        let (completion, trace) = gateway(transport.clone()).complete_with_trace("sys", "user").await;

        assert_eq!(completion, Completion::Text("PLANIFICAR".to_string()));
        assert_eq!(trace.cursor_advances, 2);
        assert_eq!(trace.attempts, 3);
        assert_eq!(transport.requested_models(), vec!["model-a", "model-b", "model-c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn unauthorized_is_terminal_on_first_attempt() {
        let transport = Arc::new(
            ScriptedTransport::default()
                .with("model-a", vec![response(401, "{\"error\":{\"message\":\"bad key\"}}")]),
        );

        let (completion, trace) = gateway(transport.clone()).complete_with_trace("sys", "user").await;

        assert_eq!(completion, Completion::InvalidCredential);
        assert_eq!(trace.attempts, 1);
        assert_eq!(trace.cursor_advances, 0);
        assert_eq!(transport.requested_models().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn service_unavailable_retries_same_model() {
        let transport = Arc::new(ScriptedTransport::default().with(
            "model-a",
            vec![response(503, "unavailable"), response(503, "unavailable"), response(200, ok_body("PAGAR"))],
        ));

        let (completion, trace) = gateway(transport.clone()).complete_with_trace("sys", "user").await;

        assert_eq!(completion, Completion::Text("PAGAR".to_string()));
        assert_eq!(trace.cursor_advances, 0);
        assert_eq!(transport.requested_models(), vec!["model-a"; 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn network_errors_keep_model_and_wait_extra() {
        let transport = Arc::new(ScriptedTransport::default().with(
            "model-a",
            vec![Err(TransportError::Network("connection reset".into())), response(200, ok_body("PAGAR"))],
        ));

        let started = tokio::time::Instant::now();
        let (completion, trace) = gateway(transport).complete_with_trace("sys", "user").await;

        assert_eq!(completion, Completion::Text("PAGAR".to_string()));
        assert_eq!(trace.cursor_advances, 0);
        // 5s network penalty plus the 4s backoff before attempt 2.
        assert_eq!(started.elapsed(), Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_answers_advance_the_cursor() {
        let transport = Arc::new(
            ScriptedTransport::default()
                .with("model-a", vec![response(200, "<html>oops</html>")])
                .with("model-b", vec![response(200, "{\"choices\": []}")])
                .with("model-c", vec![response(200, "   ")]),
        );

        let (completion, trace) = gateway(transport.clone()).complete_with_trace("sys", "user").await;

        assert_eq!(completion, Completion::Exhausted);
        assert!(trace.cursor_advances >= 3);
        assert_eq!(trace.cursor_advances, trace.attempts);
        let requested = transport.requested_models();
        assert_eq!(&requested[..4], &["model-a", "model-b", "model-c", "model-a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn budget_bounds_total_retrying() {
        let transport = Arc::new(ScriptedTransport::default().with("model-a", vec![response(503, "busy")]));

        let started = tokio::time::Instant::now();
        let (completion, trace) = gateway(transport).complete_with_trace("sys", "user").await;

        assert_eq!(completion, Completion::Exhausted);
        assert!(trace.attempts > 1);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(180));
        assert!(elapsed < Duration::from_secs(180 + 30), "at most one backoff past the budget");
    }

    #[tokio::test(start_paused = true)]
    async fn per_call_timeout_advances_the_cursor() {
        let policy = RetryPolicy { total_budget: Duration::from_secs(60), ..RetryPolicy::default() };
        let gateway = LlmGateway::new(Arc::new(HangingTransport), models(), policy);

        let (completion, trace) = gateway.complete_with_trace("sys", "user").await;

        assert_eq!(completion, Completion::Exhausted);
        assert_eq!(trace.models_tried[..2], ["model-a".to_string(), "model-b".to_string()]);
        assert_eq!(trace.cursor_advances, trace.attempts);
    }

    fn http_config(base_url: String) -> LlmConfig {
        LlmConfig {
            api_key: "sk-test".to_string().into(),
            base_url,
            models: vec!["model-a".to_string()],
            site_url: Some("https://payplan.local".to_string()),
            site_name: Some("Payplan".to_string()),
            ..LlmConfig::default()
        }
    }

    #[tokio::test]
    async fn http_transport_sends_bearer_and_attribution_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(header("x-title", "Payplan"))
            .and(header("http-referer", "https://payplan.local"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"choices": [{"message": {"content": "PAGAR"}}]})),
            )
            .mount(&server)
            .await;

        let config = http_config(format!("{}/chat/completions", server.uri()));
        let gateway = LlmGateway::from_config(&config).expect("gateway");
        let (completion, trace) = gateway.complete_with_trace("sys", "pagué 5000").await;

        assert_eq!(completion, Completion::Text("PAGAR".to_string()));
        assert_eq!(trace.attempts, 1);
    }

    #[tokio::test]
    async fn http_transport_reports_unauthorized_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(serde_json::json!({"error": {"message": "No auth credentials found"}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let transport = HttpTransport::new(&http_config(format!("{}/chat/completions", server.uri())))
            .expect("transport");
        let gateway = LlmGateway::new(Arc::new(transport), models(), RetryPolicy::default());

        assert_eq!(gateway.complete_with_trace("sys", "user").await.0, Completion::InvalidCredential);
    }

    fn plain_request() -> CompletionRequest {
        gateway(Arc::new(HangingTransport)).request_for("model-a", "sys", "user")
    }

    #[tokio::test]
    async fn refused_connection_is_a_network_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let address = listener.local_addr().expect("local addr");
        drop(listener);

        let transport = HttpTransport::new(&http_config(format!("http://{address}/chat/completions")))
            .expect("transport");
        let result = transport.send(&plain_request()).await;

        assert!(matches!(result, Err(TransportError::Network(_))), "got {result:?}");
    }

    #[tokio::test]
    async fn connection_dropped_mid_request_is_a_network_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let address = listener.local_addr().expect("local addr");
        let server = std::thread::spawn(move || {
            if let Ok((mut socket, _)) = listener.accept() {
                let mut buffer = [0u8; 1024];
                let _ = std::io::Read::read(&mut socket, &mut buffer);
            }
        });

        let transport = HttpTransport::new(&http_config(format!("http://{address}/chat/completions")))
            .expect("transport");
        let result = transport.send(&plain_request()).await;
        server.join().expect("server thread");

        assert!(matches!(result, Err(TransportError::Network(_))), "got {result:?}");
    }
}
