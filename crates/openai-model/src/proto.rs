use copilot_model::{
    ModelFinishReason, ModelMessage, ModelRequest, ModelTool, ToolCallRequest,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::OpenAIConfig;

// ------------------------------
// Types received from the server
// ------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionToolCall {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionToolCall>,
}

impl ToolCall {
    /// Converts a fully received tool call. Arguments that are not valid
    /// JSON are passed on as a string, so the tool reports the problem.
    pub fn to_request(&self) -> ToolCallRequest {
        let function = self.function.as_ref();
        let arguments = function
            .and_then(|f| f.arguments.as_deref())
            .map(|args| {
                if args.trim().is_empty() {
                    return Value::Object(Default::default());
                }
                serde_json::from_str::<Value>(args)
                    .unwrap_or_else(|_| Value::String(args.to_owned()))
            })
            .unwrap_or_else(|| Value::Object(Default::default()));
        ToolCallRequest {
            id: self.id.clone().unwrap_or_default(),
            name: function.and_then(|f| f.name.clone()).unwrap_or_default(),
            arguments,
        }
    }

    /// Patches this partial tool call with a streamed delta.
    pub fn merge(&mut self, delta: ToolCall) {
        if let Some(id) = delta.id {
            self.id.get_or_insert_default().push_str(&id);
        }
        if let Some(ty) = delta.r#type {
            // The type is sent whole, never split.
            self.r#type = Some(ty);
        }
        let Some(function) = delta.function else {
            return;
        };
        let partial_func = self.function.get_or_insert(FunctionToolCall {
            name: None,
            arguments: None,
        });
        if let Some(name) = function.name {
            partial_func.name.get_or_insert_default().push_str(&name);
        }
        if let Some(arguments) = function.arguments {
            partial_func
                .arguments
                .get_or_insert_default()
                .push_str(&arguments);
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub delta: Delta,
    pub finish_reason: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
pub struct Delta {
    pub content: Option<String>,
    pub tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
}

pub fn parse_finish_reason(reason: &str) -> ModelFinishReason {
    match reason {
        "tool_calls" | "function_call" => ModelFinishReason::ToolCalls,
        "length" => ModelFinishReason::Length,
        "content_filter" => ModelFinishReason::ContentFilter,
        _ => ModelFinishReason::Stop,
    }
}

// ------------------------
// Types sent to the server
// ------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
struct FunctionTool {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
struct Tool {
    r#type: &'static str,
    function: FunctionTool,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<ToolCall>>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tool>,
    stream: bool,
}

// -----------
// Conversions
// -----------

#[inline]
pub fn create_request(
    req: &ModelRequest,
    config: &OpenAIConfig,
) -> ChatCompletionRequest {
    ChatCompletionRequest {
        model: config.model.clone(),
        messages: req.messages.iter().map(create_message).collect(),
        tools: req.tools.iter().map(create_tool).collect(),
        stream: true,
    }
}

fn create_message(msg: &ModelMessage) -> Message {
    match msg {
        ModelMessage::System(content) => Message::System {
            content: content.clone(),
        },
        ModelMessage::User(content) => Message::User {
            content: content.clone(),
        },
        ModelMessage::Assistant {
            content,
            tool_calls,
        } => Message::Assistant {
            content: if content.is_empty() && !tool_calls.is_empty() {
                None
            } else {
                Some(content.clone())
            },
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls.iter().map(create_tool_call).collect())
            },
        },
        ModelMessage::Tool(result) => Message::Tool {
            tool_call_id: result.id.clone(),
            content: result.content.clone(),
        },
    }
}

fn create_tool_call(req: &ToolCallRequest) -> ToolCall {
    ToolCall {
        index: None,
        id: Some(req.id.clone()),
        r#type: Some("function".to_owned()),
        function: Some(FunctionToolCall {
            name: Some(req.name.clone()),
            arguments: Some(req.arguments.to_string()),
        }),
    }
}

#[inline]
fn create_tool(tool: &ModelTool) -> Tool {
    Tool {
        r#type: "function",
        function: FunctionTool {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: tool.parameters.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use copilot_model::ToolCallResult;
    use serde_json::json;

    use super::*;
    use crate::OpenAIConfigBuilder;

    #[test]
    fn test_create_request() {
        let request = ModelRequest {
            messages: vec![
                ModelMessage::System("You are a helpful assistant.".to_owned()),
                ModelMessage::User("Hello".to_owned()),
            ],
            tools: vec![ModelTool {
                name: "get_local_time".to_owned(),
                description: "Gets the local time.".to_owned(),
                parameters: json!({
                    "type": "object",
                    "properties": { "location": { "type": "string" } }
                }),
            }],
        };
        let config = OpenAIConfigBuilder::with_api_key("xxx")
            .with_model("custom")
            .build();
        let expected = json!({
            "model": "custom",
            "messages": [
                { "role": "system", "content": "You are a helpful assistant." },
                { "role": "user", "content": "Hello" }
            ],
            "tools": [{
                "type": "function",
                "function": {
                    "name": "get_local_time",
                    "description": "Gets the local time.",
                    "parameters": {
                        "type": "object",
                        "properties": { "location": { "type": "string" } }
                    }
                }
            }],
            "stream": true
        });
        let actual =
            serde_json::to_value(create_request(&request, &config)).unwrap();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_tool_call_history() {
        let request = ModelRequest {
            messages: vec![
                ModelMessage::Assistant {
                    content: String::new(),
                    tool_calls: vec![ToolCallRequest {
                        id: "call_1".to_owned(),
                        name: "get_local_time".to_owned(),
                        arguments: json!({ "location": "Paris" }),
                    }],
                },
                ModelMessage::Tool(ToolCallResult {
                    id: "call_1".to_owned(),
                    content: "10:00".to_owned(),
                }),
            ],
            tools: vec![],
        };
        let config = OpenAIConfigBuilder::with_api_key("xxx").build();
        let actual =
            serde_json::to_value(create_request(&request, &config)).unwrap();
        assert_eq!(
            actual["messages"],
            json!([
                {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {
                            "name": "get_local_time",
                            "arguments": "{\"location\":\"Paris\"}"
                        }
                    }]
                },
                { "role": "tool", "tool_call_id": "call_1", "content": "10:00" }
            ])
        );
        assert!(actual.get("tools").is_none());
    }

    #[test]
    fn test_tool_call_merge() {
        let mut partial = ToolCall {
            index: Some(0),
            id: Some("call_".to_owned()),
            r#type: Some("function".to_owned()),
            function: Some(FunctionToolCall {
                name: Some("get_local".to_owned()),
                arguments: Some("{\"loca".to_owned()),
            }),
        };
        partial.merge(ToolCall {
            index: Some(0),
            id: Some("1".to_owned()),
            r#type: Some("function".to_owned()),
            function: Some(FunctionToolCall {
                name: Some("_time".to_owned()),
                arguments: Some("tion\":\"Oslo\"}".to_owned()),
            }),
        });
        let req = partial.to_request();
        assert_eq!(req.id, "call_1");
        assert_eq!(req.name, "get_local_time");
        assert_eq!(req.arguments, json!({ "location": "Oslo" }));
    }

    #[test]
    fn test_malformed_arguments() {
        let call = ToolCall {
            index: Some(0),
            id: Some("call_2".to_owned()),
            r#type: None,
            function: Some(FunctionToolCall {
                name: Some("get_local_time".to_owned()),
                arguments: Some("{not json".to_owned()),
            }),
        };
        assert_eq!(call.to_request().arguments, json!("{not json"));
    }

    #[test]
    fn test_finish_reasons() {
        assert_eq!(parse_finish_reason("tool_calls"), ModelFinishReason::ToolCalls);
        assert_eq!(parse_finish_reason("length"), ModelFinishReason::Length);
        assert_eq!(parse_finish_reason("stop"), ModelFinishReason::Stop);
    }
}
