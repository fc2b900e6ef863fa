use gemrelay_protocol::gemini::request::{
    GenerateContentBody, GenerateContentPath, GenerateContentRequest,
};
use gemrelay_protocol::gemini::types::{
    Content, ContentRole, FunctionCall, FunctionDeclaration, FunctionResponse, GenerationConfig,
    HarmBlockThreshold, HarmCategory, Part, SafetySetting, Tool,
};
use gemrelay_protocol::openai::request::ChatCompletionRequest;
use gemrelay_protocol::openai::types::{
    ChatContentPart, ChatMessage, ChatMessageContent, ChatRole, ChatToolDefinition,
};
use serde_json::{Value as JsonValue, json};
use std::collections::BTreeMap;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct TranslateOptions {
    pub safety_enabled: bool,
}

impl Default for TranslateOptions {
    fn default() -> Self {
        Self {
            safety_enabled: true,
        }
    }
}

/// Builds the upstream generate-content request from an OpenAI-style chat
/// request. Pure mapping, no I/O; unsupported message shapes are dropped
/// with a warning rather than rejected.
pub fn to_gemini(
    request: &ChatCompletionRequest,
    options: &TranslateOptions,
) -> Result<GenerateContentRequest, super::TranslateError> {
    // Gemma-family models reject a separate system instruction field, and
    // safety-off traffic folds it for the same reason.
    let fold_system = !options.safety_enabled || request.model.starts_with("gemma");

    let mut system_texts: Vec<String> = Vec::new();
    let mut turns: Vec<(ContentRole, Vec<Part>)> = Vec::new();
    // tool_call id -> function name, so tool-role replies can be named.
    let mut call_names: BTreeMap<String, String> = BTreeMap::new();

    for message in &request.messages {
        match message.role {
            ChatRole::System | ChatRole::Developer => {
                if let Some(text) = plain_text(message) {
                    system_texts.push(text);
                }
            }
            ChatRole::User => {
                let parts = user_parts(message);
                if !parts.is_empty() {
                    turns.push((ContentRole::User, parts));
                }
            }
            ChatRole::Assistant => {
                let parts = assistant_parts(message, &mut call_names);
                if !parts.is_empty() {
                    turns.push((ContentRole::Model, parts));
                }
            }
            ChatRole::Tool => {
                if let Some(part) = tool_response_part(message, &call_names) {
                    turns.push((ContentRole::User, vec![part]));
                }
            }
            ChatRole::Unknown => {
                warn!(event = "unknown_role_dropped");
            }
        }
    }

    let system_instruction = if system_texts.is_empty() {
        None
    } else if fold_system {
        turns.insert(
            0,
            (ContentRole::User, vec![Part::text(system_texts.join("\n\n"))]),
        );
        None
    } else {
        Some(Content {
            parts: vec![Part::text(system_texts.join("\n\n"))],
            role: None,
        })
    };

    let contents = merge_turns(turns);
    if contents.is_empty() && system_instruction.is_none() {
        return Err(super::TranslateError::EmptyRequest);
    }

    let generation_config = build_generation_config(request);
    Ok(GenerateContentRequest {
        path: GenerateContentPath {
            model: request.model.clone(),
        },
        body: GenerateContentBody {
            contents,
            tools: request.tools.as_deref().map(map_tools),
            safety_settings: (!options.safety_enabled).then(permissive_safety_settings),
            system_instruction,
            generation_config: (!generation_config.is_empty()).then_some(generation_config),
        },
    })
}

/// Consecutive same-role turns are merged; the upstream API expects
/// alternating roles.
fn merge_turns(turns: Vec<(ContentRole, Vec<Part>)>) -> Vec<Content> {
    let mut contents: Vec<Content> = Vec::new();
    for (role, parts) in turns {
        if let Some(last) = contents.last_mut()
            && last.role == Some(role)
        {
            last.parts.extend(parts);
        } else {
            contents.push(Content {
                parts,
                role: Some(role),
            });
        }
    }
    contents
}

fn plain_text(message: &ChatMessage) -> Option<String> {
    match message.content.as_ref()? {
        ChatMessageContent::Text(text) => Some(text.clone()),
        ChatMessageContent::Parts(parts) => {
            let texts: Vec<&str> = parts
                .iter()
                .filter_map(|part| match part {
                    ChatContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect();
            (!texts.is_empty()).then(|| texts.join("\n"))
        }
    }
}

fn user_parts(message: &ChatMessage) -> Vec<Part> {
    match &message.content {
        Some(ChatMessageContent::Text(text)) => vec![Part::text(text.clone())],
        Some(ChatMessageContent::Parts(parts)) => {
            parts.iter().filter_map(map_content_part).collect()
        }
        None => Vec::new(),
    }
}

fn map_content_part(part: &ChatContentPart) -> Option<Part> {
    match part {
        ChatContentPart::Text { text } => Some(Part::text(text.clone())),
        ChatContentPart::ImageUrl { image_url } => match parse_data_url(&image_url.url) {
            Some((mime_type, data)) => Some(Part::inline_data(mime_type, data)),
            None => {
                warn!(event = "image_url_dropped", "image reference is not an inline data url");
                None
            }
        },
        ChatContentPart::Unknown => {
            warn!(event = "unknown_content_part_dropped");
            None
        }
    }
}

fn assistant_parts(
    message: &ChatMessage,
    call_names: &mut BTreeMap<String, String>,
) -> Vec<Part> {
    let mut parts = user_parts(message);
    for call in message.tool_calls.iter().flatten() {
        call_names.insert(call.id.clone(), call.function.name.clone());
        let args = match serde_json::from_str::<JsonValue>(&call.function.arguments) {
            Ok(args) => Some(args),
            Err(err) => {
                warn!(event = "tool_call_args_unparsable", error = %err);
                None
            }
        };
        parts.push(Part {
            function_call: Some(FunctionCall {
                id: Some(call.id.clone()),
                name: call.function.name.clone(),
                args,
            }),
            ..Default::default()
        });
    }
    parts
}

fn tool_response_part(
    message: &ChatMessage,
    call_names: &BTreeMap<String, String>,
) -> Option<Part> {
    let text = plain_text(message)?;
    let id = message.tool_call_id.clone();
    let name = id
        .as_deref()
        .and_then(|id| call_names.get(id).cloned())
        .or_else(|| message.name.clone())
        .or_else(|| id.clone())?;
    let value = serde_json::from_str::<JsonValue>(&text)
        .unwrap_or_else(|_| JsonValue::String(text));
    let response = if value.is_object() {
        value
    } else {
        json!({ "result": value })
    };
    Some(Part {
        function_response: Some(FunctionResponse { id, name, response }),
        ..Default::default()
    })
}

fn parse_data_url(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("data:")?;
    let (mime_type, data) = rest.split_once(";base64,")?;
    if mime_type.is_empty() || data.is_empty() {
        return None;
    }
    Some((mime_type.to_owned(), data.to_owned()))
}

fn map_tools(tools: &[ChatToolDefinition]) -> Vec<Tool> {
    // `strict` is OpenAI implementation metadata and does not survive
    // translation.
    let function_declarations = tools
        .iter()
        .map(|tool| FunctionDeclaration {
            name: tool.function.name.clone(),
            description: tool.function.description.clone(),
            parameters: tool.function.parameters.clone(),
        })
        .collect();
    vec![Tool {
        function_declarations: Some(function_declarations),
    }]
}

fn permissive_safety_settings() -> Vec<SafetySetting> {
    [
        HarmCategory::HarmCategoryHarassment,
        HarmCategory::HarmCategoryHateSpeech,
        HarmCategory::HarmCategorySexuallyExplicit,
        HarmCategory::HarmCategoryDangerousContent,
        HarmCategory::HarmCategoryCivicIntegrity,
    ]
    .into_iter()
    .map(|category| SafetySetting {
        category,
        threshold: HarmBlockThreshold::BlockNone,
    })
    .collect()
}

fn build_generation_config(request: &ChatCompletionRequest) -> GenerationConfig {
    GenerationConfig {
        stop_sequences: request
            .stop
            .clone()
            .map(|stop| stop.into_sequences())
            .filter(|stops| !stops.is_empty()),
        max_output_tokens: request.output_token_limit(),
        temperature: request.temperature,
        top_p: request.top_p,
        candidate_count: request.n,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_from(json: &str) -> ChatCompletionRequest {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn maps_roles_and_system_instruction() {
        let request = request_from(
            r#"{"model":"gemini-2.5-pro","messages":[
                {"role":"system","content":"be terse"},
                {"role":"user","content":"hi"},
                {"role":"assistant","content":"hello"},
                {"role":"user","content":"bye"}
            ]}"#,
        );
        let upstream = to_gemini(&request, &TranslateOptions::default()).unwrap();
        assert_eq!(upstream.path.model, "gemini-2.5-pro");
        assert_eq!(
            upstream.body.system_instruction.unwrap().parts[0].text.as_deref(),
            Some("be terse")
        );
        let roles: Vec<_> = upstream
            .body
            .contents
            .iter()
            .map(|content| content.role.unwrap())
            .collect();
        assert_eq!(
            roles,
            vec![ContentRole::User, ContentRole::Model, ContentRole::User]
        );
    }

    #[test]
    fn gemma_models_fold_system_into_user_turn() {
        let request = request_from(
            r#"{"model":"gemma-3-27b-it","messages":[
                {"role":"system","content":"be terse"},
                {"role":"user","content":"hi"}
            ]}"#,
        );
        let upstream = to_gemini(&request, &TranslateOptions::default()).unwrap();
        assert!(upstream.body.system_instruction.is_none());
        let first = &upstream.body.contents[0];
        assert_eq!(first.role, Some(ContentRole::User));
        assert_eq!(first.parts[0].text.as_deref(), Some("be terse"));
        assert_eq!(first.parts[1].text.as_deref(), Some("hi"));
    }

    #[test]
    fn safety_disabled_folds_system_and_sets_block_none() {
        let request = request_from(
            r#"{"model":"gemini-2.5-flash","messages":[
                {"role":"system","content":"s"},
                {"role":"user","content":"u"}
            ]}"#,
        );
        let options = TranslateOptions {
            safety_enabled: false,
        };
        let upstream = to_gemini(&request, &options).unwrap();
        assert!(upstream.body.system_instruction.is_none());
        let settings = upstream.body.safety_settings.unwrap();
        assert_eq!(settings.len(), 5);
        assert!(
            settings
                .iter()
                .all(|setting| setting.threshold == HarmBlockThreshold::BlockNone)
        );
    }

    #[test]
    fn inline_image_data_url_is_forwarded() {
        let request = request_from(
            r#"{"model":"m","messages":[{"role":"user","content":[
                {"type":"text","text":"what is this"},
                {"type":"image_url","image_url":{"url":"data:image/png;base64,iVBORw0K"}},
                {"type":"image_url","image_url":{"url":"https://example.com/cat.png"}}
            ]}]}"#,
        );
        let upstream = to_gemini(&request, &TranslateOptions::default()).unwrap();
        let parts = &upstream.body.contents[0].parts;
        // http reference dropped, data url kept
        assert_eq!(parts.len(), 2);
        let blob = parts[1].inline_data.as_ref().unwrap();
        assert_eq!(blob.mime_type, "image/png");
        assert_eq!(blob.data, "iVBORw0K");
    }

    #[test]
    fn tool_declarations_lose_strict_field() {
        let request = request_from(
            r#"{"model":"m","messages":[{"role":"user","content":"u"}],
                "tools":[{"type":"function","function":{
                    "name":"lookup","description":"d",
                    "parameters":{"type":"object"},"strict":true}}]}"#,
        );
        let upstream = to_gemini(&request, &TranslateOptions::default()).unwrap();
        let tools = upstream.body.tools.unwrap();
        let declaration = &tools[0].function_declarations.as_ref().unwrap()[0];
        assert_eq!(declaration.name, "lookup");
        let encoded = serde_json::to_string(&tools).unwrap();
        assert!(!encoded.contains("strict"));
    }

    #[test]
    fn tool_cycle_round_trips_through_function_parts() {
        let request = request_from(
            r#"{"model":"m","messages":[
                {"role":"user","content":"weather?"},
                {"role":"assistant","content":null,"tool_calls":[{"id":"call_1",
                    "type":"function","function":{"name":"get_weather",
                    "arguments":"{\"city\":\"Oslo\"}"}}]},
                {"role":"tool","tool_call_id":"call_1","content":"{\"temp\":4}"}
            ]}"#,
        );
        let upstream = to_gemini(&request, &TranslateOptions::default()).unwrap();
        let call = upstream.body.contents[1].parts[0].function_call.as_ref().unwrap();
        assert_eq!(call.name, "get_weather");
        assert_eq!(call.args, Some(json!({"city":"Oslo"})));
        let reply = upstream.body.contents[2].parts[0]
            .function_response
            .as_ref()
            .unwrap();
        assert_eq!(reply.name, "get_weather");
        assert_eq!(reply.response, json!({"temp":4}));
    }

    #[test]
    fn unknown_roles_are_skipped_not_fatal() {
        let request = request_from(
            r#"{"model":"m","messages":[
                {"role":"moderator","content":"x"},
                {"role":"user","content":"u"}
            ]}"#,
        );
        let upstream = to_gemini(&request, &TranslateOptions::default()).unwrap();
        assert_eq!(upstream.body.contents.len(), 1);
    }

    #[test]
    fn empty_request_is_rejected() {
        let request = request_from(r#"{"model":"m","messages":[{"role":"moderator","content":"x"}]}"#);
        assert!(matches!(
            to_gemini(&request, &TranslateOptions::default()),
            Err(crate::TranslateError::EmptyRequest)
        ));
    }

    #[test]
    fn sampling_parameters_map_to_generation_config() {
        let request = request_from(
            r#"{"model":"m","messages":[{"role":"user","content":"u"}],
                "temperature":0.2,"top_p":0.9,"max_tokens":64,"stop":["END"]}"#,
        );
        let upstream = to_gemini(&request, &TranslateOptions::default()).unwrap();
        let config = upstream.body.generation_config.unwrap();
        assert_eq!(config.temperature, Some(0.2));
        assert_eq!(config.top_p, Some(0.9));
        assert_eq!(config.max_output_tokens, Some(64));
        assert_eq!(config.stop_sequences, Some(vec!["END".to_owned()]));
    }
}
