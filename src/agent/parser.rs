//! Tool-call extraction from raw assistant messages.
//!
//! Shapes are tried in a fixed order and the first one that yields calls wins:
//! 1. `tool_calls` list (OpenAI multi-call)
//! 2. `function_call` object (legacy single call)
//! 3. JSON embedded in `content`: fenced blocks first, then the raw text
//!
//! A message matching none of these is a plain answer with zero calls.

use serde_json::{Map, Value};

use crate::llm::ToolCall;

/// Which shape the calls were found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    ToolCalls,
    FunctionCall,
    ContentJson,
    Text,
}

/// Canonical view of one assistant message.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResponse {
    pub content: String,
    pub calls: Vec<ToolCall>,
    pub shape: ResponseShape,
}

impl ParsedResponse {
    pub fn is_answer(&self) -> bool {
        self.calls.is_empty()
    }
}

/// Parse an assistant message. Never fails; unrecognized input is text.
pub fn parse_response(message: &Value) -> ParsedResponse {
    let content = message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let (calls, shape) = if let Some(calls) = from_tool_calls(message) {
        (calls, ResponseShape::ToolCalls)
    } else if let Some(calls) = from_function_call(message) {
        (calls, ResponseShape::FunctionCall)
    } else if let Some(calls) = from_content(&content) {
        (calls, ResponseShape::ContentJson)
    } else {
        (Vec::new(), ResponseShape::Text)
    };

    ParsedResponse {
        content,
        calls,
        shape,
    }
}

fn from_tool_calls(message: &Value) -> Option<Vec<ToolCall>> {
    let list = message.get("tool_calls")?.as_array()?;
    let calls: Vec<ToolCall> = list
        .iter()
        .enumerate()
        .filter_map(|(idx, item)| wire_call(item, || format!("call_{}", idx + 1)))
        .collect();
    non_empty(calls)
}

fn from_function_call(message: &Value) -> Option<Vec<ToolCall>> {
    let fc = message.get("function_call")?.as_object()?;
    let name = fc.get("name")?.as_str()?;
    let arguments = decode_arguments(fc.get("arguments").cloned().unwrap_or(Value::Null));
    Some(vec![ToolCall::new("legacy_call_1", name, arguments)])
}

fn from_content(content: &str) -> Option<Vec<ToolCall>> {
    let text = content.trim();
    if !text.contains("tool") {
        return None;
    }
    fenced_blocks(text)
        .into_iter()
        .chain([text])
        .chain(embedded_spans(text))
        .filter_map(|candidate| serde_json::from_str::<Value>(candidate).ok())
        .find_map(|value| calls_from_json(&value))
}

/// Calls described by a decoded JSON directive.
fn calls_from_json(value: &Value) -> Option<Vec<ToolCall>> {
    match value {
        Value::Object(obj) => {
            if let Some(list) = obj.get("tool_calls").and_then(Value::as_array) {
                let calls: Vec<ToolCall> = list
                    .iter()
                    .enumerate()
                    .filter_map(|(idx, item)| {
                        let id = || format!("json_call_{}", idx + 1);
                        wire_call(item, id).or_else(|| directive_call(item.as_object()?, id()))
                    })
                    .collect();
                return non_empty(calls);
            }
            directive_call(obj, "json_call_1".to_string()).map(|call| vec![call])
        }
        Value::Array(items) => {
            let calls: Vec<ToolCall> = items
                .iter()
                .enumerate()
                .filter_map(|(idx, item)| {
                    directive_call(item.as_object()?, format!("json_call_{}", idx + 1))
                })
                .collect();
            non_empty(calls)
        }
        _ => None,
    }
}

/// `{"id", "type": "function", "function": {"name", "arguments"}}`.
fn wire_call(item: &Value, fallback_id: impl FnOnce() -> String) -> Option<ToolCall> {
    let obj = item.as_object()?;
    let function = obj.get("function")?.as_object()?;
    let name = function
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let id = obj
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(fallback_id);
    let arguments = decode_arguments(function.get("arguments").cloned().unwrap_or(Value::Null));
    Some(ToolCall::new(id, name, arguments))
}

/// `{"tool" | "tool_name": name, "args" | "tool_args": {...}}`.
fn directive_call(obj: &Map<String, Value>, id: String) -> Option<ToolCall> {
    let name = ["tool", "tool_name"]
        .iter()
        .filter_map(|key| obj.get(*key).and_then(Value::as_str))
        .find(|name| !name.is_empty())?;
    let arguments = ["args", "tool_args"]
        .iter()
        .filter_map(|key| obj.get(*key))
        .find(|v| !v.is_null())
        .cloned()
        .unwrap_or(Value::Null);
    Some(ToolCall::new(id, name, decode_arguments(arguments)))
}

/// Arguments may arrive as an object or as a JSON-encoded string. A string
/// that does not decode is kept as-is and rejected later as malformed.
fn decode_arguments(raw: Value) -> Value {
    match raw {
        Value::Null => Value::Object(Map::new()),
        Value::String(s) if s.trim().is_empty() => Value::Object(Map::new()),
        Value::String(s) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
        other => other,
    }
}

/// Contents of every ``` fenced block, with a leading `json` tag removed.
fn fenced_blocks(text: &str) -> Vec<&str> {
    text.split("```")
        .skip(1)
        .step_by(2)
        .map(|block| {
            let block = block.trim();
            match block.get(..4) {
                Some(tag) if tag.eq_ignore_ascii_case("json") => block[4..].trim_start(),
                _ => block,
            }
        })
        .collect()
}

/// Outermost `{...}` and `[...]` spans, for directives surrounded by prose.
/// Whichever opens first is tried first.
fn embedded_spans(text: &str) -> Vec<&str> {
    let mut spans: Vec<(usize, &str)> = [('{', '}'), ('[', ']')]
        .into_iter()
        .filter_map(|(open, close)| {
            let start = text.find(open)?;
            let end = text.rfind(close)?;
            (end > start).then(|| (start, &text[start..=end]))
        })
        .collect();
    spans.sort_by_key(|(start, _)| *start);
    spans.into_iter().map(|(_, span)| span).collect()
}

fn non_empty(calls: Vec<ToolCall>) -> Option<Vec<ToolCall>> {
    (!calls.is_empty()).then_some(calls)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn name_and_args(parsed: &ParsedResponse) -> Vec<(String, Value)> {
        parsed
            .calls
            .iter()
            .map(|c| (c.name.clone(), c.raw_arguments.clone()))
            .collect()
    }

    #[test]
    fn test_structured_tool_calls() {
        let msg = json!({
            "role": "assistant",
            "content": null,
            "tool_calls": [
                {"id": "call_a", "type": "function",
                 "function": {"name": "slurm_squeue", "arguments": "{\"limit\": 5}"}},
                {"id": "call_b", "type": "function",
                 "function": {"name": "tail_file", "arguments": {"path": "x.log"}}}
            ]
        });
        let parsed = parse_response(&msg);
        assert_eq!(parsed.shape, ResponseShape::ToolCalls);
        assert_eq!(parsed.calls.len(), 2);
        assert_eq!(parsed.calls[0].id, "call_a");
        assert_eq!(parsed.calls[0].raw_arguments, json!({"limit": 5}));
        assert_eq!(parsed.calls[1].raw_arguments, json!({"path": "x.log"}));
        assert_eq!(parsed.content, "");
    }

    #[test]
    fn test_empty_tool_calls_falls_through() {
        let msg = json!({"content": "all done", "tool_calls": []});
        let parsed = parse_response(&msg);
        assert!(parsed.is_answer());
        assert_eq!(parsed.shape, ResponseShape::Text);
    }

    #[test]
    fn test_legacy_function_call() {
        let msg = json!({
            "content": "",
            "function_call": {"name": "gmv_validate", "arguments": "{\"config_path\": \"c.yaml\"}"}
        });
        let parsed = parse_response(&msg);
        assert_eq!(parsed.shape, ResponseShape::FunctionCall);
        assert_eq!(parsed.calls[0].id, "legacy_call_1");
        assert_eq!(parsed.calls[0].raw_arguments, json!({"config_path": "c.yaml"}));
    }

    #[test]
    fn test_tool_calls_preferred_over_function_call() {
        let msg = json!({
            "tool_calls": [{"id": "x", "function": {"name": "slurm_squeue", "arguments": "{}"}}],
            "function_call": {"name": "gmv_validate", "arguments": "{}"}
        });
        let parsed = parse_response(&msg);
        assert_eq!(parsed.shape, ResponseShape::ToolCalls);
        assert_eq!(parsed.calls[0].name, "slurm_squeue");
    }

    #[test]
    fn test_fenced_json_with_tool_name_keys() {
        let msg = json!({
            "content": "Let me check.\n```json\n{\"tool_name\": \"slurm_sacct\", \"tool_args\": {\"job_id\": \"12\"}}\n```"
        });
        let parsed = parse_response(&msg);
        assert_eq!(parsed.shape, ResponseShape::ContentJson);
        assert_eq!(parsed.calls[0].id, "json_call_1");
        assert_eq!(parsed.calls[0].name, "slurm_sacct");
        assert_eq!(parsed.calls[0].raw_arguments, json!({"job_id": "12"}));
    }

    #[test]
    fn test_raw_json_list() {
        let msg = json!({
            "content": "[{\"tool\": \"slurm_squeue\"}, {\"tool\": \"tail_file\", \"args\": {\"path\": \"a\"}}]"
        });
        let parsed = parse_response(&msg);
        let ids: Vec<&str> = parsed.calls.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["json_call_1", "json_call_2"]);
        assert_eq!(parsed.calls[0].raw_arguments, json!({}));
    }

    #[test]
    fn test_json_tool_calls_object_in_content() {
        let msg = json!({
            "content": "{\"tool_calls\": [{\"id\": \"c9\", \"type\": \"function\", \"function\": {\"name\": \"slurm_squeue\", \"arguments\": \"{}\"}}]}"
        });
        let parsed = parse_response(&msg);
        assert_eq!(parsed.calls[0].id, "c9");
        assert_eq!(parsed.calls[0].name, "slurm_squeue");
    }

    #[test]
    fn test_directive_inside_prose() {
        let msg = json!({
            "content": "I will run {\"tool\": \"gmv_validate\", \"args\": {\"config_path\": \"c.yaml\"}} now."
        });
        let parsed = parse_response(&msg);
        assert_eq!(parsed.calls.len(), 1);
        assert_eq!(parsed.calls[0].name, "gmv_validate");
    }

    #[test]
    fn test_directive_list_inside_prose() {
        let msg = json!({
            "content": "Running these now: [{\"tool\": \"slurm_squeue\"}, {\"tool\": \"tail_file\", \"args\": {\"path\": \"a\"}}]"
        });
        let parsed = parse_response(&msg);
        assert_ne!(parsed.shape, ResponseShape::Text);
        assert_eq!(
            name_and_args(&parsed),
            vec![
                ("slurm_squeue".to_string(), json!({})),
                ("tail_file".to_string(), json!({"path": "a"})),
            ]
        );

        // An object that opens first still wins over a later list.
        let msg = json!({
            "content": "Do {\"tool\": \"gmv_validate\", \"args\": {\"paths\": [\"a\"]}} first."
        });
        let parsed = parse_response(&msg);
        assert_eq!(
            name_and_args(&parsed),
            vec![("gmv_validate".to_string(), json!({"paths": ["a"]}))]
        );
    }

    #[test]
    fn test_plain_text_is_answer() {
        for content in [
            "The queue is empty.",
            "Use the tool carefully",
            "{\"not\": \"a directive\", \"tool\": 5}",
            "```\nno json here, just a tool mention\n```",
        ] {
            let parsed = parse_response(&json!({"content": content}));
            assert!(parsed.is_answer(), "{content}");
            assert_eq!(parsed.shape, ResponseShape::Text);
        }
        assert!(parse_response(&json!({})).is_answer());
        assert!(parse_response(&json!("not an object")).is_answer());
    }

    #[test]
    fn test_undecodable_arguments_kept_as_string() {
        let msg = json!({
            "tool_calls": [{"id": "c1", "function": {"name": "slurm_squeue", "arguments": "{limit: 5"}}]
        });
        let parsed = parse_response(&msg);
        assert_eq!(parsed.calls[0].raw_arguments, json!("{limit: 5"));
    }

    #[test]
    fn test_all_shapes_yield_equivalent_call() {
        let args = json!({"job_id": "4242"});
        let encoded = args.to_string();
        let directive = json!({"tool": "slurm_scancel", "args": args}).to_string();

        let shapes = [
            json!({"tool_calls": [{"id": "call_1", "type": "function",
                "function": {"name": "slurm_scancel", "arguments": encoded}}]}),
            json!({"function_call": {"name": "slurm_scancel", "arguments": encoded}}),
            json!({"content": format!("```json\n{directive}\n```")}),
            json!({"content": directive}),
        ];

        let expected = vec![("slurm_scancel".to_string(), args.clone())];
        for msg in &shapes {
            let parsed = parse_response(msg);
            assert_eq!(name_and_args(&parsed), expected, "shape {msg}");
        }
    }
}
