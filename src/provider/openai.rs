//! OpenAI Chat Completions API provider.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::types::{AssistantTurn, Message, Role, ToolCallRequest, Usage};

use super::http::{bearer_headers, shared_client, status_to_error};
use super::{require_api_key, ModelProvider, ProviderFactory, ProviderRequest};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiProvider {
    model_id: String,
    api_key: String,
    base_url: String,
    name: &'static str,
}

impl OpenAiProvider {
    pub fn new(model_id: impl Into<String>, api_key: String, base_url: Option<String>) -> Self {
        Self {
            model_id: model_id.into(),
            api_key,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            name: "openai",
        }
    }

    /// Same wire format, reported under another provider name.
    pub(crate) fn renamed(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    fn build_request_body(&self, request: &ProviderRequest<'_>) -> Value {
        let messages: Vec<Value> = request.messages.iter().map(message_to_openai).collect();
        let mut body = json!({
            "model": self.model_id,
            "messages": messages,
        });

        if !request.tools.is_empty() {
            let tool_defs: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = Value::Array(tool_defs);
            body["tool_choice"] = json!("auto");
        }

        body
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    fn provider_name(&self) -> &str {
        self.name
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn generate(&self, request: &ProviderRequest<'_>) -> Result<AssistantTurn, BridgeError> {
        let body = self.build_request_body(request);
        let url = format!("{}/chat/completions", self.base_url);

        debug!(
            provider = self.name,
            model = %self.model_id,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "chat completion request"
        );

        let resp = shared_client()
            .post(&url)
            .headers(bearer_headers(&self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status != 200 {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(status_to_error(status, &body_text));
        }

        let data: OpenAiChatResponse = resp
            .json()
            .await
            .map_err(|e| BridgeError::generation(self.name, format!("malformed response: {e}")))?;
        let choice = data
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| BridgeError::generation(self.name, "no choices in response"))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCallRequest {
                id: tc.id,
                name: tc.function.name,
                arguments: parse_arguments(tc.function.arguments),
            })
            .collect();

        Ok(AssistantTurn {
            content: choice.message.content.filter(|text| !text.is_empty()),
            tool_calls,
            usage: data
                .usage
                .map(|u| Usage {
                    input_tokens: u.prompt_tokens,
                    output_tokens: u.completion_tokens,
                    total_tokens: u.total_tokens,
                })
                .unwrap_or_default(),
        })
    }
}

/// Arguments arrive as a JSON string; empty means no arguments.
fn parse_arguments(raw: String) -> Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(&raw).unwrap_or(Value::String(raw))
}

fn message_to_openai(msg: &Message) -> Value {
    let role = match msg.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };

    let mut value = json!({
        "role": role,
        "content": msg.content,
    });

    if !msg.tool_calls.is_empty() {
        let calls: Vec<Value> = msg
            .tool_calls
            .iter()
            .map(|tc| {
                json!({
                    "id": tc.id,
                    "type": "function",
                    "function": {
                        "name": tc.name,
                        "arguments": tc.arguments.to_string(),
                    }
                })
            })
            .collect();
        value["tool_calls"] = Value::Array(calls);
    }
    if let Some(ref id) = msg.tool_call_id {
        value["tool_call_id"] = json!(id);
    }

    value
}

/// Factory for the `openai` provider key.
pub struct OpenAiFactory;

impl ProviderFactory for OpenAiFactory {
    fn provider_keys(&self) -> &[&str] {
        &["openai"]
    }

    fn create(
        &self,
        config: &BridgeConfig,
        _provider_key: &str,
        model_id: &str,
    ) -> Result<Box<dyn ModelProvider>, BridgeError> {
        let api_key = require_api_key(config, "openai", "Missing OPENAI_API_KEY")?;
        Ok(Box::new(OpenAiProvider::new(
            model_id,
            api_key,
            config.get_base_url("openai"),
        )))
    }
}

// OpenAI API response types (internal)

#[derive(Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Deserialize)]
struct OpenAiToolCall {
    id: String,
    function: OpenAiFunction,
}

#[derive(Deserialize)]
struct OpenAiFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ToolKind, ToolSpec};

    #[test]
    fn request_body_carries_tools_and_tool_messages() {
        let provider = OpenAiProvider::new("gpt-5-mini", "sk".into(), None);
        let call = ToolCallRequest::new("call_1", "mcp-find", json!({"query": "git"}));
        let messages = vec![
            Message::user("hi"),
            Message::assistant_tool_calls(None, vec![call.clone()]),
            Message::tool_result(&call, "found"),
        ];
        let tools = vec![ToolSpec::new(
            "mcp-find",
            "discover",
            json!({"type": "object"}),
            ToolKind::Management,
        )];
        let body = provider.build_request_body(&ProviderRequest {
            messages: &messages,
            tools: &tools,
        });

        assert_eq!(body["model"], "gpt-5-mini");
        assert_eq!(body["tools"][0]["function"]["name"], "mcp-find");
        assert_eq!(body["messages"][1]["content"], Value::Null);
        assert_eq!(
            body["messages"][1]["tool_calls"][0]["function"]["arguments"],
            "{\"query\":\"git\"}"
        );
        assert_eq!(body["messages"][2]["tool_call_id"], "call_1");
    }

    #[test]
    fn no_tools_omits_tool_choice() {
        let provider = OpenAiProvider::new("m", "sk".into(), Some("http://x/v1/".into()));
        let messages = vec![Message::user("hi")];
        let body = provider.build_request_body(&ProviderRequest {
            messages: &messages,
            tools: &[],
        });
        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());
        assert_eq!(provider.base_url, "http://x/v1");
    }

    #[test]
    fn unparseable_arguments_are_kept_as_text() {
        assert_eq!(parse_arguments(String::new()), json!({}));
        assert_eq!(parse_arguments("{\"a\":1}".into()), json!({"a": 1}));
        assert_eq!(parse_arguments("{oops".into()), json!("{oops"));
    }
}
