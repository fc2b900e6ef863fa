use gemrelay_protocol::gemini::response::{
    Candidate, FinishReason, GenerateContentResponse, UsageMetadata,
};
use gemrelay_protocol::openai::response::{
    ChatChoice, ChatChoiceMessage, ChatCompletionObjectType, ChatCompletionResponse,
};
use gemrelay_protocol::openai::types::{
    ChatFinishReason, ChatRole, ChatToolCall, ChatToolCallFunction, ChatToolType, ChatUsage,
};
use serde_json::json;

/// Maps a buffered upstream answer onto one OpenAI-style completion object.
pub fn to_chat_completion(
    response: &GenerateContentResponse,
    id: String,
    model: &str,
    created: i64,
) -> ChatCompletionResponse {
    let usage = response.usage_metadata.as_ref().map(map_usage);

    if response.candidates.is_empty() {
        // A blocked prompt is an answer, not an error: surface the block
        // reason as assistant text so clients render it.
        let (content, finish_reason) = match response
            .prompt_feedback
            .as_ref()
            .and_then(|feedback| feedback.block_reason)
        {
            Some(reason) => (
                Some(format!("Request was blocked by upstream: {}", reason.as_str())),
                Some(ChatFinishReason::ContentFilter),
            ),
            None => (None, Some(ChatFinishReason::Stop)),
        };
        return ChatCompletionResponse {
            id,
            object: ChatCompletionObjectType::ChatCompletion,
            created,
            model: model.to_owned(),
            choices: vec![ChatChoice {
                index: 0,
                message: ChatChoiceMessage {
                    role: ChatRole::Assistant,
                    content,
                    tool_calls: None,
                },
                finish_reason,
            }],
            usage,
        };
    }

    let candidate = &response.candidates[0];
    let (content, tool_calls) = split_candidate_parts(candidate);
    let finish_reason = Some(resolve_finish_reason(
        candidate.finish_reason,
        tool_calls.is_some(),
    ));

    ChatCompletionResponse {
        id,
        object: ChatCompletionObjectType::ChatCompletion,
        created,
        model: model.to_owned(),
        choices: vec![ChatChoice {
            index: 0,
            message: ChatChoiceMessage {
                role: ChatRole::Assistant,
                content,
                tool_calls,
            },
            finish_reason,
        }],
        usage,
    }
}

/// Text parts concatenate; function-call parts become tool calls with ids
/// synthesized when the upstream provides none.
pub(crate) fn split_candidate_parts(
    candidate: &Candidate,
) -> (Option<String>, Option<Vec<ChatToolCall>>) {
    let mut text = String::new();
    let mut tool_calls: Vec<ChatToolCall> = Vec::new();

    for part in candidate.content.iter().flat_map(|content| &content.parts) {
        if let Some(part_text) = &part.text {
            text.push_str(part_text);
        }
        if let Some(call) = &part.function_call {
            let id = call
                .id
                .clone()
                .unwrap_or_else(|| format!("call_{}", tool_calls.len()));
            tool_calls.push(ChatToolCall {
                id,
                r#type: ChatToolType::Function,
                function: ChatToolCallFunction {
                    name: call.name.clone(),
                    arguments: call
                        .args
                        .clone()
                        .unwrap_or_else(|| json!({}))
                        .to_string(),
                },
            });
        }
    }

    (
        (!text.is_empty()).then_some(text),
        (!tool_calls.is_empty()).then_some(tool_calls),
    )
}

/// A function call anywhere in the candidate overrides the upstream finish
/// reason.
pub(crate) fn resolve_finish_reason(
    finish_reason: Option<FinishReason>,
    has_tool_calls: bool,
) -> ChatFinishReason {
    if has_tool_calls {
        return ChatFinishReason::ToolCalls;
    }
    match finish_reason {
        Some(FinishReason::MaxTokens) => ChatFinishReason::Length,
        Some(
            FinishReason::Safety
            | FinishReason::Recitation
            | FinishReason::Blocklist
            | FinishReason::ProhibitedContent
            | FinishReason::Spii,
        ) => ChatFinishReason::ContentFilter,
        _ => ChatFinishReason::Stop,
    }
}

pub(crate) fn map_usage(usage: &UsageMetadata) -> ChatUsage {
    let prompt_tokens = usage.prompt_token_count.unwrap_or(0);
    let completion_tokens = usage.candidates_token_count.unwrap_or(0);
    ChatUsage {
        prompt_tokens,
        completion_tokens,
        total_tokens: usage
            .total_token_count
            .unwrap_or(prompt_tokens + completion_tokens),
    }
}

/// True when the candidate carries no content and its finish reason does not
/// represent a deliberate upstream stop. Such answers are worth retrying on
/// a different credential.
pub fn is_empty_retryable(response: &GenerateContentResponse) -> bool {
    if response
        .prompt_feedback
        .as_ref()
        .is_some_and(|feedback| feedback.block_reason.is_some())
    {
        return false;
    }
    let Some(candidate) = response.candidates.first() else {
        return true;
    };
    let has_content = candidate
        .content
        .as_ref()
        .is_some_and(|content| {
            content.parts.iter().any(|part| {
                part.text.as_ref().is_some_and(|text| !text.is_empty())
                    || part.function_call.is_some()
            })
        });
    if has_content {
        return false;
    }
    !matches!(
        candidate.finish_reason,
        Some(FinishReason::Safety | FinishReason::Recitation | FinishReason::ProhibitedContent)
    )
}
