use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use futures_util::StreamExt;
use gateway_core::ProxyError;
use gateway_protocol::openai::create_chat_completions::request::{
    CreateChatCompletionRequest, CreateChatCompletionRequestBody,
};
use tokio_stream::wrappers::ReceiverStream;

use crate::error_response::HttpError;
use crate::state::AppState;

/// `POST /v1/chat/completions` (§6.2). Dispatches through the Dispatcher and
/// returns either a JSON response or a `text/event-stream` body (§6.3)
/// depending on `body.stream`.
pub async fn create_chat_completion(
    State(state): State<AppState>,
    body: Result<Json<CreateChatCompletionRequestBody>, JsonRejection>,
) -> Result<Response, HttpError> {
    let Json(body) = body.map_err(|rejection| ProxyError::bad_request(rejection.to_string()))?;
    let streaming = body.stream.unwrap_or(false);
    let request = CreateChatCompletionRequest { body };

    if streaming {
        let rx = state.dispatcher.dispatch_stream(request).await?;
        Ok(sse_response(rx))
    } else {
        let response = state.dispatcher.dispatch(request).await?;
        Ok(Json(response).into_response())
    }
}

fn sse_response(rx: tokio::sync::mpsc::Receiver<String>) -> Response {
    let body = ReceiverStream::new(rx)
        .map(|frame| Ok::<Bytes, std::io::Error>(Bytes::from(format!("data: {frame}\n\n"))));

    Response::builder()
        .status(http::StatusCode::OK)
        .header("content-type", "text/event-stream")
        .header("cache-control", "no-cache")
        .header("connection", "keep-alive")
        .body(Body::from_stream(body))
        .expect("static headers always build a valid response")
}
