//! Request dispatcher (§4.3): picks a credential, translates the public
//! request, calls upstream, classifies the failure, and retries on another
//! key with backoff. Grounded on the teacher's `proxy_engine` attempt loop,
//! rebuilt around a single fixed upstream shape rather than per-protocol
//! dispatch tables.

use std::sync::Arc;
use std::time::Duration;

use gateway_pool::{CredentialPool, ErrorClass, FailureConfig};
use gateway_protocol::openai::create_chat_completions::request::CreateChatCompletionRequest;
use gateway_protocol::openai::create_chat_completions::response::CreateChatCompletionResponse;
use gateway_protocol::openai::create_chat_completions::stream::CreateChatCompletionStreamResponse;
use gateway_transform::generate_content::request::transform_request;
use gateway_transform::generate_content::response::transform_response;
use gateway_transform::generate_content::stream::GeminiToOpenAIChatCompletionStreamState;
use tokio::sync::mpsc;

use crate::classify::{UpstreamErrorKind, classify_http_failure, classify_transport_failure};
use crate::error::ProxyError;
use crate::upstream::{StreamError, StreamItem, UpstreamClient, UpstreamError};

/// Ties the credential pool, schema translator, and upstream client together
/// into the retry loop described in §4.3.
pub struct Dispatcher<U> {
    pool: Arc<CredentialPool>,
    upstream: U,
    failure_config: FailureConfig,
    max_retries: u32,
}

impl<U: UpstreamClient + 'static> Dispatcher<U> {
    pub fn new(
        pool: Arc<CredentialPool>,
        upstream: U,
        failure_config: FailureConfig,
        max_retries: u32,
    ) -> Self {
        Self {
            pool,
            upstream,
            failure_config,
            max_retries,
        }
    }

    pub fn pool(&self) -> &CredentialPool {
        &self.pool
    }

    async fn max_attempts(&self) -> usize {
        let pool_size = self.pool.size().await.max(1);
        ((self.max_retries as usize) + 1).min(pool_size)
    }

    /// Non-streaming path: awaits the full upstream response before returning.
    pub async fn dispatch(
        &self,
        request: CreateChatCompletionRequest,
    ) -> Result<CreateChatCompletionResponse, ProxyError> {
        validate_request(&request, false)?;
        let model = request.body.model.clone();
        let upstream_request = transform_request(request);
        let max_attempts = self.max_attempts().await;

        let mut last_kind = None;
        let mut acquired_any = false;

        for attempt in 0..max_attempts {
            let Some(acquired) = self.pool.acquire().await else {
                if attempt + 1 == max_attempts {
                    break;
                }
                sleep_no_key(attempt).await;
                continue;
            };
            acquired_any = true;

            match self
                .upstream
                .generate(&acquired.key, &model, &upstream_request.body)
                .await
            {
                Ok(response) => {
                    self.pool.mark_success(&acquired.key).await;
                    return Ok(transform_response(response));
                }
                Err(err) => {
                    let kind = classify_upstream_error(&err);
                    last_kind = Some(kind);
                    self.pool
                        .mark_failure(&acquired.key, kind.pool_class(), self.failure_config)
                        .await;
                    if kind == UpstreamErrorKind::InvalidArgument {
                        return Err(ProxyError::bad_request(
                            "upstream rejected the translated request",
                        ));
                    }
                    if attempt + 1 == max_attempts {
                        break;
                    }
                    sleep_between_attempts(attempt).await;
                }
            }
        }

        if !acquired_any {
            return Err(ProxyError::pool_empty("no active credential available"));
        }
        Err(terminal_error(last_kind))
    }

    /// Streaming path: once the initial upstream connection succeeds (2xx), the
    /// attempt loop stops — the dispatcher commits to that key for the rest of
    /// the stream and mid-stream errors are surfaced as synthetic content
    /// (§4.1.3), not retried here.
    pub async fn dispatch_stream(
        &self,
        request: CreateChatCompletionRequest,
    ) -> Result<mpsc::Receiver<String>, ProxyError> {
        validate_request(&request, true)?;
        let model = request.body.model.clone();
        let upstream_request = transform_request(request);
        let max_attempts = self.max_attempts().await;

        let mut last_kind = None;
        let mut acquired_any = false;

        for attempt in 0..max_attempts {
            let Some(acquired) = self.pool.acquire().await else {
                if attempt + 1 == max_attempts {
                    break;
                }
                sleep_no_key(attempt).await;
                continue;
            };
            acquired_any = true;

            match self
                .upstream
                .generate_stream(&acquired.key, &model, &upstream_request.body)
                .await
            {
                Ok(upstream_rx) => {
                    let (tx, out_rx) = mpsc::channel(16);
                    spawn_stream_bridge(
                        Arc::clone(&self.pool),
                        acquired.key,
                        self.failure_config,
                        upstream_rx,
                        tx,
                    );
                    return Ok(out_rx);
                }
                Err(err) => {
                    let kind = classify_upstream_error(&err);
                    last_kind = Some(kind);
                    self.pool
                        .mark_failure(&acquired.key, kind.pool_class(), self.failure_config)
                        .await;
                    if kind == UpstreamErrorKind::InvalidArgument {
                        return Err(ProxyError::bad_request(
                            "upstream rejected the translated request",
                        ));
                    }
                    if attempt + 1 == max_attempts {
                        break;
                    }
                    sleep_between_attempts(attempt).await;
                }
            }
        }

        if !acquired_any {
            return Err(ProxyError::pool_empty("no active credential available"));
        }
        Err(terminal_error(last_kind))
    }
}

/// Drains the upstream chunk channel, translating each cumulative Gemini
/// chunk into OpenAI-shaped delta chunks and forwarding them as framed SSE
/// lines. Stops as soon as a chunk carries a `finish_reason` rather than
/// waiting for the channel to close, and distinguishes a recoverable
/// per-chunk decode error (logged into the stream, read loop continues) from
/// a fatal transport error (ends the stream, marks the credential failed).
/// Marks the credential success or failed depending on how the stream ends; a
/// dropped receiver (client disconnect) stops the bridge without touching the
/// pool at all (§5 "Cancellation").
fn spawn_stream_bridge(
    pool: Arc<CredentialPool>,
    key: String,
    failure_config: FailureConfig,
    mut upstream_rx: mpsc::Receiver<StreamItem>,
    out_tx: mpsc::Sender<String>,
) {
    tokio::spawn(async move {
        let mut state = GeminiToOpenAIChatCompletionStreamState::new();
        let mut failed = false;

        while let Some(item) = upstream_rx.recv().await {
            match item {
                Ok(response) => {
                    let events = state.transform_response(response);
                    let mut terminated = false;
                    for chunk in &events {
                        if !send_chunk(&out_tx, chunk).await {
                            return;
                        }
                        if chunk.choices[0].finish_reason.is_some() {
                            terminated = true;
                        }
                    }
                    if terminated {
                        break;
                    }
                }
                Err(StreamError::Decode(message)) => {
                    let chunk = state.error_chunk(&message);
                    if !send_chunk(&out_tx, &chunk).await {
                        return;
                    }
                }
                Err(StreamError::Transport(message)) => {
                    failed = true;
                    pool.mark_failure(&key, ErrorClass::Transient, failure_config)
                        .await;
                    let chunk = state.fatal_error_chunk(&message);
                    let _ = send_chunk(&out_tx, &chunk).await;
                    break;
                }
            }
        }

        if !failed {
            pool.mark_success(&key).await;
        }
        let _ = out_tx.send("[DONE]".to_string()).await;
    });
}

async fn send_chunk(
    tx: &mpsc::Sender<String>,
    chunk: &CreateChatCompletionStreamResponse,
) -> bool {
    match serde_json::to_string(chunk) {
        Ok(json) => tx.send(json).await.is_ok(),
        Err(_) => false,
    }
}

fn classify_upstream_error(err: &UpstreamError) -> UpstreamErrorKind {
    match err {
        UpstreamError::Http { status, body } => classify_http_failure(*status, body),
        UpstreamError::Transport(_) => classify_transport_failure(),
    }
}

fn terminal_error(kind: Option<UpstreamErrorKind>) -> ProxyError {
    use http::StatusCode;
    match kind {
        Some(UpstreamErrorKind::QuotaExhausted) => {
            ProxyError::upstream_quota("quota exhausted across all available credentials")
        }
        Some(UpstreamErrorKind::PermissionDenied) => ProxyError::upstream_permanent(
            StatusCode::FORBIDDEN,
            "upstream denied permission on all available credentials",
        ),
        Some(UpstreamErrorKind::Unauthenticated) => ProxyError::upstream_permanent(
            StatusCode::UNAUTHORIZED,
            "upstream rejected credentials",
        ),
        Some(UpstreamErrorKind::InvalidArgument) => {
            ProxyError::bad_request("upstream rejected the translated request")
        }
        Some(UpstreamErrorKind::Transient) | None => {
            ProxyError::upstream_transient("upstream request failed")
        }
    }
}

async fn sleep_no_key(attempt: usize) {
    let seconds = (5u64 * (attempt as u64 + 1)).min(30);
    tokio::time::sleep(Duration::from_secs(seconds)).await;
}

async fn sleep_between_attempts(attempt: usize) {
    let seconds = 2u64.saturating_pow(attempt as u32).min(30);
    tokio::time::sleep(Duration::from_secs(seconds)).await;
}

/// Bad-request validation per §3 and §7; everything else is left to the
/// upstream provider to reject.
fn validate_request(
    request: &CreateChatCompletionRequest,
    force_stream: bool,
) -> Result<(), ProxyError> {
    let body = &request.body;

    if body.messages.is_empty() {
        return Err(ProxyError::bad_request("messages must not be empty"));
    }

    if let Some(temperature) = body.temperature
        && !(0.0..=2.0).contains(&temperature)
    {
        return Err(ProxyError::bad_request("temperature must be within [0, 2]"));
    }

    if let Some(top_p) = body.top_p
        && !(0.0..=1.0).contains(&top_p)
    {
        return Err(ProxyError::bad_request("top_p must be within [0, 1]"));
    }

    if body.tool_choice.is_some() && body.tools.as_deref().unwrap_or_default().is_empty() {
        return Err(ProxyError::bad_request(
            "tool_choice requires a non-empty tools list",
        ));
    }

    if let Some(n) = body.n {
        if !(1..=10).contains(&n) {
            return Err(ProxyError::bad_request("n must be within [1, 10]"));
        }
        let streaming = force_stream || body.stream.unwrap_or(false);
        if n > 1 && streaming {
            return Err(ProxyError::bad_request(
                "streaming is not supported when n > 1",
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use bytes::Bytes;
    use gateway_protocol::gemini::generate_content::request::GenerateContentRequestBody;
    use gateway_protocol::gemini::generate_content::response::GenerateContentResponse;
    use gateway_protocol::openai::create_chat_completions::request::CreateChatCompletionRequestBody;
    use gateway_protocol::openai::create_chat_completions::types::{
        ChatCompletionRequestMessage, ChatCompletionRequestUserMessage, ChatCompletionUserContent,
    };

    use super::*;

    fn request_with(messages: Vec<ChatCompletionRequestMessage>) -> CreateChatCompletionRequest {
        CreateChatCompletionRequest {
            body: CreateChatCompletionRequestBody {
                messages,
                model: "gemini-2.5-flash".to_string(),
                modalities: None,
                verbosity: None,
                reasoning_effort: None,
                max_completion_tokens: None,
                frequency_penalty: None,
                presence_penalty: None,
                web_search_options: None,
                top_logprobs: None,
                response_format: None,
                audio: None,
                store: None,
                stream: None,
                stop: None,
                logit_bias: None,
                logprobs: None,
                max_tokens: None,
                n: None,
                prediction: None,
                seed: None,
                stream_options: None,
                tools: None,
                tool_choice: None,
                parallel_tool_calls: None,
                function_call: None,
                functions: None,
                metadata: None,
                extra_body: None,
                temperature: None,
                top_p: None,
                user: None,
                safety_identifier: None,
                prompt_cache_key: None,
                service_tier: None,
                prompt_cache_retention: None,
            },
        }
    }

    fn user_message(text: &str) -> ChatCompletionRequestMessage {
        ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
            content: ChatCompletionUserContent::Text(text.to_string()),
            name: None,
        })
    }

    struct AlwaysQuotaExhausted {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl UpstreamClient for AlwaysQuotaExhausted {
        async fn generate(
            &self,
            _api_key: &str,
            _model: &str,
            _body: &GenerateContentRequestBody,
        ) -> Result<GenerateContentResponse, UpstreamError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(UpstreamError::Http {
                status: 429,
                body: Bytes::from_static(
                    br#"{"error":{"status":"RESOURCE_EXHAUSTED","message":"quota"}}"#,
                ),
            })
        }

        async fn generate_stream(
            &self,
            _api_key: &str,
            _model: &str,
            _body: &GenerateContentRequestBody,
        ) -> Result<mpsc::Receiver<StreamItem>, UpstreamError> {
            unreachable!("not exercised in this test")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn exhausting_all_keys_on_quota_reports_429_and_cools_every_key() {
        let pool = Arc::new(CredentialPool::new(["K1", "K2"].map(String::from)));
        let upstream = AlwaysQuotaExhausted {
            calls: AtomicUsize::new(0),
        };
        let dispatcher = Dispatcher::new(
            pool,
            upstream,
            FailureConfig {
                base_cooling_period: Duration::from_secs(1),
                max_retries: 3,
            },
            3,
        );

        let result = dispatcher
            .dispatch(request_with(vec![user_message("hi")]))
            .await;

        assert_eq!(dispatcher.upstream.calls.load(Ordering::SeqCst), 2);
        let err = result.unwrap_err();
        assert_eq!(err.status, http::StatusCode::TOO_MANY_REQUESTS);

        let summary = dispatcher.pool().summary().await;
        assert_eq!(summary.cooling, 2);
    }

    #[tokio::test]
    async fn empty_messages_is_rejected_before_touching_the_pool() {
        let pool = Arc::new(CredentialPool::new(["K1"].map(String::from)));
        let upstream = AlwaysQuotaExhausted {
            calls: AtomicUsize::new(0),
        };
        let dispatcher = Dispatcher::new(pool, upstream, FailureConfig::default(), 3);

        let err = dispatcher
            .dispatch(request_with(Vec::new()))
            .await
            .unwrap_err();
        assert_eq!(err.status, http::StatusCode::BAD_REQUEST);
        assert_eq!(dispatcher.upstream.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn streaming_with_n_greater_than_one_is_rejected() {
        let pool = Arc::new(CredentialPool::new(["K1"].map(String::from)));
        let upstream = AlwaysQuotaExhausted {
            calls: AtomicUsize::new(0),
        };
        let dispatcher = Dispatcher::new(pool, upstream, FailureConfig::default(), 3);

        let mut request = request_with(vec![user_message("hi")]);
        request.body.n = Some(2);
        request.body.stream = Some(true);

        let err = dispatcher
            .dispatch_stream(request)
            .await
            .unwrap_err();
        assert_eq!(err.status, http::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn empty_pool_reports_pool_empty() {
        let pool = Arc::new(CredentialPool::new(std::iter::empty()));
        let upstream = AlwaysQuotaExhausted {
            calls: AtomicUsize::new(0),
        };
        let dispatcher = Dispatcher::new(pool, upstream, FailureConfig::default(), 3);

        let err = dispatcher
            .dispatch(request_with(vec![user_message("hi")]))
            .await
            .unwrap_err();
        assert_eq!(err.status, http::StatusCode::SERVICE_UNAVAILABLE);
    }
}
