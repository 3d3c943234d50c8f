use gateway_protocol::gemini::content::Content as GeminiContent;
use gateway_protocol::gemini::generate_content::response::GenerateContentResponse as GeminiGenerateContentResponse;
use gateway_protocol::gemini::generate_content::types::{Candidate, FinishReason, UsageMetadata};
use gateway_protocol::openai::create_chat_completions::response::{
    ChatCompletionChoice, ChatCompletionObjectType, CreateChatCompletionResponse,
};
use gateway_protocol::openai::create_chat_completions::types::{
    ChatCompletionFinishReason, ChatCompletionMessageToolCall, ChatCompletionResponseMessage,
    ChatCompletionResponseRole, CompletionTokensDetails, CompletionUsage, PromptTokensDetails,
};

/// Convert a Gemini generate-content response into an OpenAI chat-completions response.
pub fn transform_response(response: GeminiGenerateContentResponse) -> CreateChatCompletionResponse {
    let model = map_model_name(
        response
            .model_version
            .clone()
            .or_else(|| {
                response
                    .model_status
                    .as_ref()
                    .map(|status| format!("{:?}", status.model_stage))
            })
            .unwrap_or_else(|| "unknown".to_string()),
    );

    let choices = if response.candidates.is_empty() {
        vec![ChatCompletionChoice {
            index: 0,
            message: ChatCompletionResponseMessage {
                role: ChatCompletionResponseRole::Assistant,
                content: None,
                refusal: None,
                tool_calls: None,
                annotations: None,
                function_call: None,
                audio: None,
            },
            finish_reason: ChatCompletionFinishReason::Stop,
            logprobs: None,
        }]
    } else {
        response
            .candidates
            .iter()
            .enumerate()
            .map(|(idx, candidate)| map_candidate_to_choice(candidate, idx))
            .collect()
    };

    CreateChatCompletionResponse {
        id: response
            .response_id
            .unwrap_or_else(|| "response".to_string()),
        object: ChatCompletionObjectType::ChatCompletion,
        created: time::OffsetDateTime::now_utc().unix_timestamp(),
        model,
        choices,
        usage: response.usage_metadata.as_ref().map(map_usage),
        service_tier: None,
        system_fingerprint: None,
    }
}

fn map_candidate_to_choice(candidate: &Candidate, fallback_index: usize) -> ChatCompletionChoice {
    let (content, tool_calls) = map_content_to_message_parts(&candidate.content, fallback_index);
    let has_tool_calls = !tool_calls.is_empty();

    let mut finish_reason = candidate
        .finish_reason
        .map(map_finish_reason)
        .unwrap_or(ChatCompletionFinishReason::Stop);
    if has_tool_calls && content.is_none() {
        finish_reason = ChatCompletionFinishReason::ToolCalls;
    }

    let message = ChatCompletionResponseMessage {
        role: ChatCompletionResponseRole::Assistant,
        content,
        refusal: None,
        tool_calls: if has_tool_calls { Some(tool_calls) } else { None },
        annotations: None,
        function_call: None,
        audio: None,
    };

    ChatCompletionChoice {
        index: candidate.index.unwrap_or(fallback_index as u32) as i64,
        message,
        finish_reason,
        logprobs: None,
    }
}

fn map_content_to_message_parts(
    content: &GeminiContent,
    fallback_index: usize,
) -> (Option<String>, Vec<ChatCompletionMessageToolCall>) {
    let _ = fallback_index;
    let mut texts = Vec::new();
    let mut tool_calls = Vec::new();

    for part in &content.parts {
        if let Some(text) = part.text.clone()
            && !text.is_empty()
        {
            texts.push(text);
        }

        if let Some(function_call) = &part.function_call {
            let id = new_tool_call_id();

            let args = function_call
                .args
                .as_ref()
                .and_then(|value| serde_json::to_string(value).ok())
                .unwrap_or_else(|| "{}".to_string());
            tool_calls.push(ChatCompletionMessageToolCall::Function {
                id,
                function: gateway_protocol::openai::create_chat_completions::types::ChatCompletionMessageToolCallFunction {
                    name: function_call.name.clone(),
                    arguments: args,
                },
            });
        }

        if let Some(function_response) = &part.function_response
            && let Ok(text) = serde_json::to_string(function_response)
            && !text.is_empty()
        {
            texts.push(text);
        }

        if let Some(code) = &part.executable_code
            && let Ok(text) = serde_json::to_string(code)
            && !text.is_empty()
        {
            texts.push(text);
        }

        if let Some(result) = &part.code_execution_result
            && let Ok(text) = serde_json::to_string(result)
            && !text.is_empty()
        {
            texts.push(text);
        }

        if part.inline_data.is_some() {
            texts.push("[inline_data]".to_string());
        }

        if let Some(file_data) = &part.file_data {
            texts.push(format!("[file:{}]", file_data.file_uri));
        }
    }

    let content = if texts.is_empty() {
        None
    } else {
        Some(texts.join("\n"))
    };

    (content, tool_calls)
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

/// Opaque tool-call id: `call_` followed by a hex-random suffix. Upstream ids are not
/// reused since Gemini's function_call.id is optional and not guaranteed stable.
pub(crate) fn new_tool_call_id() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 12];
    rand::rng().fill_bytes(&mut bytes);
    let mut id = String::with_capacity(5 + bytes.len() * 2);
    id.push_str("call_");
    for byte in bytes {
        id.push_str(&format!("{byte:02x}"));
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_id_has_expected_shape() {
        let id = new_tool_call_id();
        assert!(id.starts_with("call_"));
        assert_eq!(id.len(), "call_".len() + 24);
        assert!(id["call_".len()..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn empty_candidates_fall_back_to_single_assistant_choice() {
        let response = GeminiGenerateContentResponse {
            candidates: Vec::new(),
            prompt_feedback: None,
            usage_metadata: None,
            model_version: Some("models/gemini-2.5-flash".to_string()),
            response_id: None,
            model_status: None,
        };
        let converted = transform_response(response);
        assert_eq!(converted.choices.len(), 1);
        assert_eq!(converted.model, "gemini-2.5-flash");
        assert!(converted.choices[0].message.content.is_none());
        assert_eq!(
            converted.choices[0].finish_reason,
            ChatCompletionFinishReason::Stop
        );
    }
}
