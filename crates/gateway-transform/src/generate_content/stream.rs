use std::collections::BTreeMap;

use gateway_protocol::gemini::content::Part as GeminiPart;
use gateway_protocol::gemini::generate_content::response::GenerateContentResponse;
use gateway_protocol::gemini::generate_content::types::{FinishReason, UsageMetadata};
use gateway_protocol::openai::create_chat_completions::stream::{
    ChatCompletionChunkObjectType, ChatCompletionStreamChoice, CreateChatCompletionStreamResponse,
};
use gateway_protocol::openai::create_chat_completions::types::{
    ChatCompletionFinishReason, ChatCompletionMessageToolCallChunk,
    ChatCompletionMessageToolCallChunkFunction, ChatCompletionRole,
    ChatCompletionStreamResponseDelta, ChatCompletionToolCallChunkType, CompletionTokensDetails,
    CompletionUsage, PromptTokensDetails,
};

use crate::generate_content::response::new_tool_call_id;

/// One entry in the per-stream `active_tool_calls` mapping (index -> state).
#[derive(Debug, Clone)]
struct ToolCallState {
    index: i64,
    id: String,
    name: String,
    merged_args: BTreeMap<String, serde_json::Value>,
    last_sent_args_json: String,
}

/// Incremental Gemini-cumulative to OpenAI-delta translator for a single stream.
///
/// Assumes a single candidate per response, matching the default `candidate_count`.
/// Call [`Self::transform_response`] once per upstream chunk; it returns zero or more
/// OpenAI stream chunks to forward to the client in order.
#[derive(Debug, Clone)]
pub struct GeminiToOpenAIChatCompletionStreamState {
    id: String,
    model: String,
    created: i64,
    first_chunk_sent: bool,
    content_buffer: String,
    active_tool_calls: Vec<ToolCallState>,
    tool_call_counter: i64,
    usage: Option<CompletionUsage>,
}

impl GeminiToOpenAIChatCompletionStreamState {
    pub fn new() -> Self {
        Self {
            id: "response".to_string(),
            model: "unknown".to_string(),
            created: time::OffsetDateTime::now_utc().unix_timestamp(),
            first_chunk_sent: false,
            content_buffer: String::new(),
            active_tool_calls: Vec::new(),
            tool_call_counter: 0,
            usage: None,
        }
    }

    /// Translate one upstream chunk into zero or more OpenAI-shaped stream chunks.
    ///
    /// Returns the sequence of chunks that must be forwarded to the client in order;
    /// callers are responsible for SSE framing and for appending `[DONE]` once this
    /// function (or stream end) signals termination via a chunk carrying `finish_reason`.
    pub fn transform_response(
        &mut self,
        response: GenerateContentResponse,
    ) -> Vec<CreateChatCompletionStreamResponse> {
        self.update_from_response(&response);
        if let Some(usage) = &response.usage_metadata {
            self.usage = Some(map_usage(usage));
        }

        let mut events = Vec::new();
        if !self.first_chunk_sent {
            events.push(self.role_chunk());
            self.first_chunk_sent = true;
        }

        let candidate = match response.candidates.first() {
            Some(candidate) => candidate,
            None => return events,
        };

        events.extend(self.handle_parts(&candidate.content.parts));

        if let Some(reason) = candidate.finish_reason
            && reason != FinishReason::FinishReasonUnspecified
        {
            events.push(self.finish_chunk(reason));
        }

        events
    }

    fn role_chunk(&self) -> CreateChatCompletionStreamResponse {
        self.make_chunk(
            ChatCompletionStreamResponseDelta {
                content: None,
                reasoning_content: None,
                function_call: None,
                tool_calls: None,
                role: Some(ChatCompletionRole::Assistant),
                refusal: None,
                obfuscation: None,
            },
            None,
        )
    }

    fn handle_parts(&mut self, parts: &[GeminiPart]) -> Vec<CreateChatCompletionStreamResponse> {
        let mut events = Vec::new();
        for part in parts {
            events.extend(self.handle_part(part));
        }
        events
    }

    fn handle_part(&mut self, part: &GeminiPart) -> Vec<CreateChatCompletionStreamResponse> {
        let mut events = Vec::new();

        if let Some(text) = &part.text
            && let Some(delta) = self.emit_text_delta(text)
        {
            events.push(delta);
        }

        if let Some(function_call) = &part.function_call {
            let args = function_call.args.as_ref().and_then(|value| value.as_object());
            events.extend(self.emit_tool_delta(&function_call.name, args));
        }

        events
    }

    /// Content is cumulative: only the newly appended suffix is emitted. A shorter or
    /// non-extending `text` is treated as upstream truncation and ignored — the
    /// previously emitted prefix remains authoritative.
    fn emit_text_delta(&mut self, text: &str) -> Option<CreateChatCompletionStreamResponse> {
        if text.len() <= self.content_buffer.len() {
            return None;
        }
        let delta_text = text[self.content_buffer.len()..].to_string();
        self.content_buffer = text.to_string();

        Some(self.make_chunk(
            ChatCompletionStreamResponseDelta {
                content: Some(delta_text),
                reasoning_content: None,
                function_call: None,
                tool_calls: None,
                role: None,
                refusal: None,
                obfuscation: None,
            },
            None,
        ))
    }

    fn emit_tool_delta(
        &mut self,
        name: &str,
        args: Option<&serde_json::Map<String, serde_json::Value>>,
    ) -> Vec<CreateChatCompletionStreamResponse> {
        let mut events = Vec::new();

        let position = self
            .active_tool_calls
            .iter()
            .position(|call| call.name == name);

        let slot = match position {
            Some(position) => position,
            None => {
                let index = self.tool_call_counter;
                self.tool_call_counter += 1;
                let id = new_tool_call_id();
                self.active_tool_calls.push(ToolCallState {
                    index,
                    id: id.clone(),
                    name: name.to_string(),
                    merged_args: BTreeMap::new(),
                    last_sent_args_json: String::new(),
                });

                events.push(self.make_chunk(
                    ChatCompletionStreamResponseDelta {
                        content: None,
                        reasoning_content: None,
                        function_call: None,
                        tool_calls: Some(vec![ChatCompletionMessageToolCallChunk {
                            index,
                            id: Some(id),
                            r#type: Some(ChatCompletionToolCallChunkType::Function),
                            function: Some(ChatCompletionMessageToolCallChunkFunction {
                                name: Some(name.to_string()),
                                arguments: Some(String::new()),
                            }),
                        }]),
                        role: None,
                        refusal: None,
                        obfuscation: None,
                    },
                    None,
                ));
                self.active_tool_calls.len() - 1
            }
        };

        if let Some(args) = args {
            let call = &mut self.active_tool_calls[slot];
            for (key, value) in args {
                call.merged_args.insert(key.clone(), value.clone());
            }

            let new_args_json = serde_json::to_string(&call.merged_args).unwrap_or_default();
            let delta_args = if new_args_json.starts_with(call.last_sent_args_json.as_str()) {
                new_args_json[call.last_sent_args_json.len()..].to_string()
            } else {
                new_args_json.clone()
            };
            call.last_sent_args_json = new_args_json;
            let index = call.index;

            if !delta_args.is_empty() {
                events.push(self.make_chunk(
                    ChatCompletionStreamResponseDelta {
                        content: None,
                        reasoning_content: None,
                        function_call: None,
                        tool_calls: Some(vec![ChatCompletionMessageToolCallChunk {
                            index,
                            id: None,
                            r#type: None,
                            function: Some(ChatCompletionMessageToolCallChunkFunction {
                                name: None,
                                arguments: Some(delta_args),
                            }),
                        }]),
                        role: None,
                        refusal: None,
                        obfuscation: None,
                    },
                    None,
                ));
            }
        }

        events
    }

    fn finish_chunk(&self, reason: FinishReason) -> CreateChatCompletionStreamResponse {
        let mut mapped = map_finish_reason(reason);
        if !self.active_tool_calls.is_empty() && self.content_buffer.is_empty() {
            mapped = ChatCompletionFinishReason::ToolCalls;
        }
        self.make_chunk(
            ChatCompletionStreamResponseDelta {
                content: None,
                reasoning_content: None,
                function_call: None,
                tool_calls: None,
                role: None,
                refusal: None,
                obfuscation: None,
            },
            Some(mapped),
        )
    }

    fn make_chunk(
        &self,
        delta: ChatCompletionStreamResponseDelta,
        finish_reason: Option<ChatCompletionFinishReason>,
    ) -> CreateChatCompletionStreamResponse {
        CreateChatCompletionStreamResponse {
            id: self.id.clone(),
            object: ChatCompletionChunkObjectType::ChatCompletionChunk,
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChatCompletionStreamChoice {
                index: 0,
                delta,
                logprobs: None,
                finish_reason,
            }],
            usage: if finish_reason.is_some() {
                self.usage.clone()
            } else {
                None
            },
            service_tier: None,
            system_fingerprint: None,
        }
    }

    fn update_from_response(&mut self, response: &GenerateContentResponse) {
        if let Some(id) = response.response_id.clone() {
            self.id = id;
        }
        if let Some(model) = response.model_version.clone().or_else(|| {
            response
                .model_status
                .as_ref()
                .map(|status| format!("{:?}", status.model_stage))
        }) {
            self.model = map_model_name(model);
        }
    }

    /// An error mid-stream still produces a visible chunk and the closing `[DONE]`;
    /// the stream never silently dies.
    pub fn error_chunk(&self, message: &str) -> CreateChatCompletionStreamResponse {
        self.make_chunk(
            ChatCompletionStreamResponseDelta {
                content: Some(format!("[Error: {message}]")),
                reasoning_content: None,
                function_call: None,
                tool_calls: None,
                role: None,
                refusal: None,
                obfuscation: None,
            },
            None,
        )
    }

    pub fn fatal_error_chunk(&self, message: &str) -> CreateChatCompletionStreamResponse {
        let mut chunk = self.error_chunk(message);
        chunk.choices[0].finish_reason = Some(ChatCompletionFinishReason::Stop);
        chunk
    }
}

impl Default for GeminiToOpenAIChatCompletionStreamState {
    fn default() -> Self {
        Self::new()
    }
}

fn map_finish_reason(reason: FinishReason) -> ChatCompletionFinishReason {
    match reason {
        FinishReason::Stop => ChatCompletionFinishReason::Stop,
        FinishReason::MaxTokens => ChatCompletionFinishReason::Length,
        FinishReason::MalformedFunctionCall
        | FinishReason::UnexpectedToolCall
        | FinishReason::TooManyToolCalls => ChatCompletionFinishReason::ToolCalls,
        FinishReason::Safety
        | FinishReason::Blocklist
        | FinishReason::ProhibitedContent
        | FinishReason::Spii
        | FinishReason::ImageSafety
        | FinishReason::ImageProhibitedContent
        | FinishReason::ImageRecitation
        | FinishReason::NoImage
        | FinishReason::Recitation => ChatCompletionFinishReason::ContentFilter,
        _ => ChatCompletionFinishReason::Stop,
    }
}

fn map_usage(usage: &UsageMetadata) -> CompletionUsage {
    let prompt_tokens = usage.prompt_token_count.unwrap_or(0) as i64;
    let completion_tokens = usage.candidates_token_count.unwrap_or(0) as i64;
    let total_tokens = usage
        .total_token_count
        .map(|value| value as i64)
        .unwrap_or_else(|| prompt_tokens + completion_tokens);

    CompletionUsage {
        prompt_tokens,
        completion_tokens,
        total_tokens,
        completion_tokens_details: Some(CompletionTokensDetails {
            accepted_prediction_tokens: None,
            audio_tokens: None,
            reasoning_tokens: usage.thoughts_token_count.map(|value| value as i64),
            rejected_prediction_tokens: None,
        }),
        prompt_tokens_details: Some(PromptTokensDetails {
            audio_tokens: None,
            cached_tokens: usage.cached_content_token_count.map(|value| value as i64),
        }),
    }
}

fn map_model_name(model: String) -> String {
    model.strip_prefix("models/").unwrap_or(&model).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_protocol::gemini::content::{Content, ContentRole, FunctionCall};
    use gateway_protocol::gemini::generate_content::types::Candidate;

    fn text_response(text: &str, finish_reason: Option<FinishReason>) -> GenerateContentResponse {
        GenerateContentResponse {
            candidates: vec![Candidate {
                content: Content {
                    parts: vec![GeminiPart {
                        text: Some(text.to_string()),
                        inline_data: None,
                        function_call: None,
                        function_response: None,
                        file_data: None,
                        executable_code: None,
                        code_execution_result: None,
                        thought: None,
                        thought_signature: None,
                        part_metadata: None,
                        video_metadata: None,
                    }],
                    role: Some(ContentRole::Model),
                },
                finish_reason,
                safety_ratings: None,
                citation_metadata: None,
                token_count: None,
                grounding_attributions: None,
                grounding_metadata: None,
                avg_logprobs: None,
                logprobs_result: None,
                url_context_metadata: None,
                index: None,
                finish_message: None,
            }],
            prompt_feedback: None,
            usage_metadata: None,
            model_version: Some("models/gemini-2.5-flash".to_string()),
            response_id: None,
            model_status: None,
        }
    }

    #[test]
    fn cumulative_text_becomes_incremental_deltas() {
        let mut state = GeminiToOpenAIChatCompletionStreamState::new();

        let first = state.transform_response(text_response("Hel", None));
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].choices[0].delta.role, Some(ChatCompletionRole::Assistant));
        assert_eq!(first[1].choices[0].delta.content.as_deref(), Some("Hel"));

        let second = state.transform_response(text_response("Hello", None));
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].choices[0].delta.content.as_deref(), Some("lo"));

        let third = state.transform_response(text_response("Hello!", Some(FinishReason::Stop)));
        assert_eq!(third.len(), 2);
        assert_eq!(third[0].choices[0].delta.content.as_deref(), Some("!"));
        assert_eq!(
            third[1].choices[0].finish_reason,
            Some(ChatCompletionFinishReason::Stop)
        );
    }

    #[test]
    fn truncated_text_is_ignored() {
        let mut state = GeminiToOpenAIChatCompletionStreamState::new();
        state.transform_response(text_response("Hello", None));
        let events = state.transform_response(text_response("Hel", None));
        assert!(events.is_empty());
        assert_eq!(state.content_buffer, "Hello");
    }

    #[test]
    fn tool_call_arguments_stream_as_prefix_deltas() {
        let mut state = GeminiToOpenAIChatCompletionStreamState::new();
        let mut first_args = serde_json::Map::new();
        first_args.insert("city".to_string(), serde_json::json!("Tokyo"));

        let call = |args: serde_json::Map<String, serde_json::Value>, finish: Option<FinishReason>| {
            GenerateContentResponse {
                candidates: vec![Candidate {
                    content: Content {
                        parts: vec![GeminiPart {
                            text: None,
                            inline_data: None,
                            function_call: Some(FunctionCall {
                                id: None,
                                name: "get_weather".to_string(),
                                args: Some(serde_json::Value::Object(args)),
                            }),
                            function_response: None,
                            file_data: None,
                            executable_code: None,
                            code_execution_result: None,
                            thought: None,
                            thought_signature: None,
                            part_metadata: None,
                            video_metadata: None,
                        }],
                        role: Some(ContentRole::Model),
                    },
                    finish_reason: finish,
                    safety_ratings: None,
                    citation_metadata: None,
                    token_count: None,
                    grounding_attributions: None,
                    grounding_metadata: None,
                    avg_logprobs: None,
                    logprobs_result: None,
                    url_context_metadata: None,
                    index: None,
                    finish_message: None,
                }],
                prompt_feedback: None,
                usage_metadata: None,
                model_version: None,
                response_id: None,
                model_status: None,
            }
        };

        let first = state.transform_response(call(first_args.clone(), None));
        // role chunk + registration chunk + initial args chunk
        assert_eq!(first.len(), 3);
        let registration = &first[1].choices[0].delta.tool_calls.as_ref().unwrap()[0];
        assert!(registration.id.as_deref().unwrap().starts_with("call_"));
        assert_eq!(
            registration.function.as_ref().unwrap().name.as_deref(),
            Some("get_weather")
        );

        let mut second_args = first_args;
        second_args.insert("unit".to_string(), serde_json::json!("c"));
        let second = state.transform_response(call(second_args, Some(FinishReason::Stop)));
        let args_delta = &second[0].choices[0].delta.tool_calls.as_ref().unwrap()[0];
        assert!(args_delta.id.is_none());
        let arguments = args_delta.function.as_ref().unwrap().arguments.clone().unwrap();
        assert!(arguments.starts_with(','));
        assert!(arguments.contains("\"unit\":\"c\""));
        assert_eq!(
            second[1].choices[0].finish_reason,
            Some(ChatCompletionFinishReason::ToolCalls)
        );
    }

    #[test]
    fn unspecified_finish_reason_does_not_terminate() {
        let mut state = GeminiToOpenAIChatCompletionStreamState::new();
        let events =
            state.transform_response(text_response("Hi", Some(FinishReason::FinishReasonUnspecified)));
        assert!(events.iter().all(|event| event.choices[0].finish_reason.is_none()));
    }
}
