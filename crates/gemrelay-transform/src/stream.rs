use gemrelay_protocol::gemini::response::GenerateContentResponse;
use gemrelay_protocol::openai::response::ChatCompletionResponse;
use gemrelay_protocol::openai::stream::{
    ChatChunkChoice, ChatCompletionChunk, ChatCompletionChunkObjectType, ChatDelta,
    ChatDeltaToolCall, ChatDeltaToolCallFunction,
};
use gemrelay_protocol::openai::types::{ChatFinishReason, ChatRole, ChatToolType};
use serde_json::json;

use crate::response::{map_usage, resolve_finish_reason};

/// Per-request state for mapping upstream stream events onto OpenAI-style
/// chunks. The assistant role is announced on the first chunk only, and a
/// finish chunk is synthesized at end-of-stream if the upstream never sent
/// one.
#[derive(Debug)]
pub struct StreamState {
    id: String,
    model: String,
    created: i64,
    role_sent: bool,
    finish_sent: bool,
    tool_calls_emitted: i64,
}

impl StreamState {
    pub fn new(id: String, model: String, created: i64) -> Self {
        Self {
            id,
            model,
            created,
            role_sent: false,
            finish_sent: false,
            tool_calls_emitted: 0,
        }
    }

    /// Maps one upstream event to at most one client chunk. Usage-only
    /// events (no candidates, no block reason) yield nothing.
    pub fn next_chunk(&mut self, event: &GenerateContentResponse) -> Option<ChatCompletionChunk> {
        let usage = event.usage_metadata.as_ref().map(map_usage);

        if event.candidates.is_empty() {
            let reason = event
                .prompt_feedback
                .as_ref()
                .and_then(|feedback| feedback.block_reason)?;
            self.finish_sent = true;
            let role = self.announce_role();
            return Some(self.chunk(
                ChatDelta {
                    role,
                    content: Some(format!(
                        "Request was blocked by upstream: {}",
                        reason.as_str()
                    )),
                    tool_calls: None,
                },
                Some(ChatFinishReason::ContentFilter),
                usage,
            ));
        }

        let candidate = &event.candidates[0];
        let mut text = String::new();
        let mut tool_calls: Vec<ChatDeltaToolCall> = Vec::new();
        for part in candidate.content.iter().flat_map(|content| &content.parts) {
            if let Some(part_text) = &part.text {
                text.push_str(part_text);
            }
            if let Some(call) = &part.function_call {
                let index = self.tool_calls_emitted;
                self.tool_calls_emitted += 1;
                tool_calls.push(ChatDeltaToolCall {
                    index,
                    id: Some(
                        call.id
                            .clone()
                            .unwrap_or_else(|| format!("call_{index}")),
                    ),
                    r#type: Some(ChatToolType::Function),
                    function: Some(ChatDeltaToolCallFunction {
                        name: Some(call.name.clone()),
                        arguments: Some(
                            call.args.clone().unwrap_or_else(|| json!({})).to_string(),
                        ),
                    }),
                });
            }
        }

        let has_tool_calls = !tool_calls.is_empty();
        let finish_reason = candidate
            .finish_reason
            .map(|reason| resolve_finish_reason(Some(reason), has_tool_calls));
        if finish_reason.is_some() {
            self.finish_sent = true;
        }

        let delta = ChatDelta {
            role: self.announce_role(),
            content: (!text.is_empty()).then_some(text),
            tool_calls: has_tool_calls.then_some(tool_calls),
        };
        if delta.is_empty() && finish_reason.is_none() && usage.is_none() {
            return None;
        }
        Some(self.chunk(delta, finish_reason, usage))
    }

    /// Synthesizes the terminal chunk when the upstream stream ended without
    /// carrying a finish reason.
    pub fn finalize(&mut self) -> Option<ChatCompletionChunk> {
        if self.finish_sent {
            return None;
        }
        self.finish_sent = true;
        let role = self.announce_role();
        Some(self.chunk(
            ChatDelta {
                role,
                ..Default::default()
            },
            Some(ChatFinishReason::Stop),
            None,
        ))
    }

    /// An empty-delta heartbeat, used by keepalive mode.
    pub fn heartbeat(&self) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.id.clone(),
            object: ChatCompletionChunkObjectType::ChatCompletionChunk,
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChatChunkChoice {
                index: 0,
                delta: ChatDelta::default(),
                finish_reason: None,
            }],
            usage: None,
        }
    }

    /// Collapses a buffered completion into a single full-answer chunk, for
    /// keepalive mode's final delivery.
    pub fn chunk_from_completion(
        &mut self,
        completion: &ChatCompletionResponse,
    ) -> ChatCompletionChunk {
        self.finish_sent = true;
        let choice = completion.choices.first();
        let delta = ChatDelta {
            role: Some(ChatRole::Assistant),
            content: choice.and_then(|choice| choice.message.content.clone()),
            tool_calls: choice
                .and_then(|choice| choice.message.tool_calls.as_ref())
                .map(|calls| {
                    calls
                        .iter()
                        .enumerate()
                        .map(|(index, call)| ChatDeltaToolCall {
                            index: index as i64,
                            id: Some(call.id.clone()),
                            r#type: Some(call.r#type),
                            function: Some(ChatDeltaToolCallFunction {
                                name: Some(call.function.name.clone()),
                                arguments: Some(call.function.arguments.clone()),
                            }),
                        })
                        .collect()
                }),
        };
        self.role_sent = true;
        self.chunk(
            delta,
            choice.and_then(|choice| choice.finish_reason),
            completion.usage.clone(),
        )
    }

    fn announce_role(&mut self) -> Option<ChatRole> {
        if self.role_sent {
            None
        } else {
            self.role_sent = true;
            Some(ChatRole::Assistant)
        }
    }

    fn chunk(
        &self,
        delta: ChatDelta,
        finish_reason: Option<ChatFinishReason>,
        usage: Option<gemrelay_protocol::openai::types::ChatUsage>,
    ) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.id.clone(),
            object: ChatCompletionChunkObjectType::ChatCompletionChunk,
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChatChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
            usage,
        }
    }
}
