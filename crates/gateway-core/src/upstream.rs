//! Upstream HTTP client for the Gemini-style generateContent API. Grounded on
//! the aistudio provider adapter's request shaping and the wreq-based
//! transport/client-cache pattern used elsewhere in this stack.

use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use gateway_protocol::gemini::generate_content::request::GenerateContentRequestBody;
use gateway_protocol::gemini::generate_content::response::GenerateContentResponse;
use gateway_protocol::sse::SseParser;
use tokio::sync::mpsc;
use wreq::{Client, Method};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

#[derive(Debug)]
pub enum UpstreamError {
    /// A response came back with a non-2xx status; carries the raw status and body
    /// so the caller can classify it (§7, `classify::classify_http_failure`).
    Http { status: u16, body: Bytes },
    /// Connect/TLS/timeout/serialization failure below the HTTP layer.
    Transport(String),
}

/// What went wrong mid-stream, distinguishing errors the producer recovers
/// from versus ones that end it.
#[derive(Debug)]
pub enum StreamError {
    /// A single SSE event failed to decode; the producer keeps reading.
    Decode(String),
    /// The underlying transport failed; no further items will follow.
    Transport(String),
}

/// One item from a streamed upstream response: either a successfully decoded
/// cumulative chunk, or a [`StreamError`] describing what went wrong.
pub type StreamItem = Result<GenerateContentResponse, StreamError>;

#[async_trait::async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn generate(
        &self,
        api_key: &str,
        model: &str,
        body: &GenerateContentRequestBody,
    ) -> Result<GenerateContentResponse, UpstreamError>;

    async fn generate_stream(
        &self,
        api_key: &str,
        model: &str,
        body: &GenerateContentRequestBody,
    ) -> Result<mpsc::Receiver<StreamItem>, UpstreamError>;
}

pub struct WreqUpstreamClient {
    client: Client,
    base_url: String,
}

impl WreqUpstreamClient {
    pub fn new(request_timeout: Duration) -> Result<Self, wreq::Error> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    fn url(&self, model: &str, action: &str, extra_query: Option<&str>) -> String {
        let model = normalize_model_name(model);
        let mut url = format!("{}/v1beta/{model}:{action}", self.base_url);
        if let Some(query) = extra_query {
            url.push('?');
            url.push_str(query);
        }
        url
    }
}

#[async_trait::async_trait]
impl UpstreamClient for WreqUpstreamClient {
    async fn generate(
        &self,
        api_key: &str,
        model: &str,
        body: &GenerateContentRequestBody,
    ) -> Result<GenerateContentResponse, UpstreamError> {
        let url = self.url(model, "generateContent", None);
        let response = self
            .client
            .request(Method::POST, &url)
            .header("x-goog-api-key", api_key)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status().as_u16();
        let bytes = response.bytes().await.map_err(map_transport_error)?;

        if !(200..300).contains(&status) {
            return Err(UpstreamError::Http { status, body: bytes });
        }

        serde_json::from_slice(&bytes)
            .map_err(|err| UpstreamError::Transport(format!("decode upstream response: {err}")))
    }

    async fn generate_stream(
        &self,
        api_key: &str,
        model: &str,
        body: &GenerateContentRequestBody,
    ) -> Result<mpsc::Receiver<StreamItem>, UpstreamError> {
        let url = self.url(model, "streamGenerateContent", Some("alt=sse"));
        let response = self
            .client
            .request(Method::POST, &url)
            .header("x-goog-api-key", api_key)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let bytes = response.bytes().await.unwrap_or_default();
            return Err(UpstreamError::Http { status, body: bytes });
        }

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            let mut parser = SseParser::new();
            let mut body_stream = response.bytes_stream();

            loop {
                let chunk = match body_stream.next().await {
                    Some(Ok(chunk)) => chunk,
                    Some(Err(err)) => {
                        let _ = tx
                            .send(Err(StreamError::Transport(format!(
                                "stream read error: {err}"
                            ))))
                            .await;
                        return;
                    }
                    None => break,
                };

                for event in parser.push_bytes(&chunk) {
                    if !emit_event(&tx, &event.data).await {
                        return;
                    }
                }
            }

            for event in parser.finish() {
                if !emit_event(&tx, &event.data).await {
                    return;
                }
            }
        });

        Ok(rx)
    }
}

async fn emit_event(tx: &mpsc::Sender<StreamItem>, data: &str) -> bool {
    if data == "[DONE]" {
        return true;
    }
    let item = serde_json::from_str::<GenerateContentResponse>(data)
        .map_err(|err| StreamError::Decode(format!("decode upstream chunk: {err}")));
    tx.send(item).await.is_ok()
}

fn normalize_model_name(model: &str) -> String {
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{model}")
    }
}

fn map_transport_error(err: wreq::Error) -> UpstreamError {
    UpstreamError::Transport(err.to_string())
}
