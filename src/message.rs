//! The public event stream: [`Message`], plus the Update Parser that turns a
//! raw `session/update` payload into zero or one `Message`.
//!
//! `Message` is a flat tagged enum rather than a class hierarchy — see the
//! crate-level design notes on polymorphic update payloads. Every message is
//! timestamped on construction via [`Message::now`]; callers that need to
//! preserve a specific timestamp (e.g. replaying a transcript) can build one
//! directly with the struct literal.

use std::time::SystemTime;

use serde_json::Value;

use crate::error::truncate_diagnostic;
use crate::protocol::session::{SessionUpdate, SessionUpdateParams};

/// A tool name plus whichever of its input/output payload is applicable.
/// `ToolUse` populates `input`; `ToolResult` populates `output`. Never both.
#[derive(Debug, Clone, Default)]
pub struct Tool {
    pub name: String,
    pub input: Option<Value>,
    pub output: Option<Value>,
}

/// Turn-level token accounting, as reported on a `session/prompt` response.
/// Never appears on a [`MessageKind::ContextWindow`] message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TurnUsage {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cached_read_tokens: i64,
    pub cached_write_tokens: i64,
    pub thinking_tokens: i64,
}

impl TurnUsage {
    pub fn is_zero(&self) -> bool {
        *self == TurnUsage::default()
    }
}

/// Context-window fill, as reported on a `usage_update` session notification.
/// Never appears on a [`MessageKind::Result`] message. Always satisfies
/// `0 <= used <= size` — see [`crate::message::clamp_context_window`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextWindowUsage {
    pub size: i64,
    pub used: i64,
}

/// The public event type streamed to the consumer.
#[derive(Debug, Clone)]
pub struct Message {
    pub timestamp: SystemTime,
    pub kind: MessageKind,
}

impl Message {
    /// Builds a message stamped with the current time.
    pub fn now(kind: MessageKind) -> Self {
        Self {
            timestamp: SystemTime::now(),
            kind,
        }
    }
}

/// The tagged variant carried by every [`Message`].
#[derive(Debug, Clone)]
pub enum MessageKind {
    /// Emitted exactly once, immediately after a successful handshake.
    Init {
        resume_id: String,
        agent_name: String,
        agent_version: String,
        model: Option<String>,
    },
    /// A streamed chunk of the agent's visible response text.
    TextDelta(String),
    /// A streamed chunk of the agent's internal reasoning.
    ThinkingDelta(String),
    /// A complete block of text (used for plans).
    Text(String),
    /// Reserved for a future non-streamed thinking block; never emitted today.
    Thinking(String),
    /// The agent started a tool call.
    ToolUse(Tool),
    /// A tool call completed successfully.
    ToolResult(Tool),
    /// An informational status update that doesn't fit another variant.
    System(String),
    /// A recoverable error surfaced to the stream rather than ending the session.
    Error { code: String, content: String },
    /// Context-window fill, already clamped to `0 <= used <= size`.
    ContextWindow(ContextWindowUsage),
    /// Terminal message for a turn.
    Result {
        stop_reason: String,
        usage: Option<TurnUsage>,
    },
}

/// Applies the safety-critical clamping rules from the update parser's
/// `usage_update` contract: negative inputs clamp to zero, a zero `size`
/// yields no message (no capacity to report), and `used` is clamped to
/// `size`.
pub fn clamp_context_window(size: i64, used: i64) -> Option<ContextWindowUsage> {
    let size = size.max(0);
    let used = used.max(0);
    if size == 0 {
        return None;
    }
    let used = used.min(size);
    Some(ContextWindowUsage { size, used })
}

/// Prefers structured content (`content[0].content.text`) over the raw
/// `rawOutput` blob, in that order; yields nothing if neither is present or
/// the structured text is empty.
fn extract_tool_output(content: &Option<Value>, raw_output: &Option<Value>) -> Option<Value> {
    if let Some(first) = content.as_ref().and_then(|c| c.as_array()).and_then(|a| a.first()) {
        if let Some(text) = first.get("content").and_then(|c| c.get("text")).and_then(|t| t.as_str()) {
            if !text.is_empty() {
                return Some(Value::String(text.to_string()));
            }
        }
    }
    raw_output.clone()
}

/// The Update Parser (component C): dispatches an already-decoded
/// [`SessionUpdate`] to its [`Message`] mapping per the discriminator table.
/// Returns `None` only when the discriminator carries no representable
/// event (there is currently no such discriminator, but the signature
/// leaves room for one without an API break).
pub fn parse_session_update(update: &SessionUpdate) -> Option<Message> {
    let kind = match update {
        SessionUpdate::AgentMessageChunk { text } => MessageKind::TextDelta(text.clone()),
        SessionUpdate::AgentThoughtChunk { text } => MessageKind::ThinkingDelta(text.clone()),
        SessionUpdate::UserMessageChunk { text } => MessageKind::System(text.clone()),
        SessionUpdate::ToolCall(info) => MessageKind::ToolUse(Tool {
            name: info.title.clone(),
            input: info.raw_input.clone(),
            output: None,
        }),
        SessionUpdate::ToolCallUpdate(info) => match info.status.as_deref() {
            Some("completed") => MessageKind::ToolResult(Tool {
                name: info.title.clone().unwrap_or_default(),
                input: None,
                output: extract_tool_output(&info.content, &info.raw_output),
            }),
            Some("failed") => MessageKind::Error {
                code: "tool_call_failed".to_string(),
                content: format!(
                    "tool_call failed: {}",
                    info.title.clone().unwrap_or_default()
                ),
            },
            other => MessageKind::System(format!(
                "tool_call_update: {} ({})",
                info.title.clone().unwrap_or_default(),
                other.unwrap_or("")
            )),
        },
        SessionUpdate::Plan(info) => {
            let joined = info
                .entries
                .iter()
                .map(|e| e.content.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            MessageKind::Text(joined)
        }
        SessionUpdate::CurrentModeUpdate { mode_id } => {
            MessageKind::System(format!("mode:{mode_id}"))
        }
        SessionUpdate::ConfigOptionUpdate => MessageKind::System("config_option_update".to_string()),
        SessionUpdate::SessionInfoUpdate { title } => {
            MessageKind::System(format!("session_info:{title}"))
        }
        SessionUpdate::UsageUpdate { size, used } => {
            return clamp_context_window(*size, *used).map(|usage| Message::now(MessageKind::ContextWindow(usage)));
        }
        SessionUpdate::AvailableCommandsUpdate(_) => {
            MessageKind::System("available_commands_update".to_string())
        }
        SessionUpdate::Unknown(value) => {
            let disc = value
                .get("sessionUpdate")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            MessageKind::System(if disc.is_empty() {
                "unknown".to_string()
            } else {
                disc.to_string()
            })
        }
    };
    Some(Message::now(kind))
}

/// Decodes a raw `session/update` notification payload and runs it through
/// the update parser. A payload that fails to deserialize into
/// [`SessionUpdateParams`] at all (the "malformed JSON" row of the
/// discriminator table — in practice a structurally invalid params object,
/// since the transport has already parsed the outer JSON-RPC envelope)
/// becomes an `Error` message with a truncated diagnostic rather than being
/// dropped silently.
pub fn decode_session_update(params: Option<Value>) -> Option<Message> {
    let params = params?;
    match serde_json::from_value::<SessionUpdateParams>(params) {
        Ok(update_params) => parse_session_update(&SessionUpdate::from_value(&update_params.update)),
        Err(e) => Some(Message::now(MessageKind::Error {
            code: "session_update_invalid".to_string(),
            content: truncate_diagnostic(&format!("failed to parse session/update: {e}")),
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::session::{ToolCallInfo, ToolCallUpdateInfo};

    #[test]
    fn clamp_rejects_zero_size() {
        assert_eq!(clamp_context_window(0, 500), None);
    }

    #[test]
    fn clamp_clamps_negatives_to_zero() {
        let result = clamp_context_window(-10, 999).unwrap();
        // size still clamps to 0 → no message per the zero-size rule above,
        // but this exercises the intermediate clamp directly.
        assert_eq!(result.size, 0);
    }

    #[test]
    fn usage_update_with_negative_size_yields_no_message() {
        let update = SessionUpdate::UsageUpdate { size: -10, used: 999 };
        assert!(parse_session_update(&update).is_none());
    }

    #[test]
    fn usage_update_clamps_used_to_size() {
        let update = SessionUpdate::UsageUpdate { size: 1000, used: 5000 };
        let msg = parse_session_update(&update).unwrap();
        match msg.kind {
            MessageKind::ContextWindow(usage) => {
                assert_eq!(usage.size, 1000);
                assert_eq!(usage.used, 1000);
            }
            other => panic!("expected ContextWindow, got {other:?}"),
        }
    }

    #[test]
    fn tool_call_update_completed_extracts_structured_text() {
        let update = SessionUpdate::ToolCallUpdate(ToolCallUpdateInfo {
            tool_call_id: "tc-1".to_string(),
            status: Some("completed".to_string()),
            title: Some("Read file".to_string()),
            content: Some(serde_json::json!([{ "content": { "text": "file contents" } }])),
            raw_output: Some(serde_json::json!({ "bytes": 13 })),
        });
        let msg = parse_session_update(&update).unwrap();
        match msg.kind {
            MessageKind::ToolResult(tool) => {
                assert_eq!(tool.name, "Read file");
                assert_eq!(tool.output, Some(Value::String("file contents".to_string())));
            }
            other => panic!("expected ToolResult, got {other:?}"),
        }
    }

    #[test]
    fn tool_call_update_completed_falls_back_to_raw_output() {
        let update = SessionUpdate::ToolCallUpdate(ToolCallUpdateInfo {
            tool_call_id: "tc-1".to_string(),
            status: Some("completed".to_string()),
            title: Some("Run".to_string()),
            content: None,
            raw_output: Some(serde_json::json!({ "exit_code": 0 })),
        });
        let msg = parse_session_update(&update).unwrap();
        match msg.kind {
            MessageKind::ToolResult(tool) => {
                assert_eq!(tool.output, Some(serde_json::json!({ "exit_code": 0 })));
            }
            other => panic!("expected ToolResult, got {other:?}"),
        }
    }

    #[test]
    fn tool_call_update_failed_becomes_error() {
        let update = SessionUpdate::ToolCallUpdate(ToolCallUpdateInfo {
            tool_call_id: "tc-1".to_string(),
            status: Some("failed".to_string()),
            title: Some("Write file".to_string()),
            content: None,
            raw_output: None,
        });
        let msg = parse_session_update(&update).unwrap();
        match msg.kind {
            MessageKind::Error { code, content } => {
                assert_eq!(code, "tool_call_failed");
                assert_eq!(content, "tool_call failed: Write file");
            }
            other => panic!("expected Error, got {other:?}"),
        }
    }

    #[test]
    fn tool_call_update_other_status_becomes_system() {
        let update = SessionUpdate::ToolCallUpdate(ToolCallUpdateInfo {
            tool_call_id: "tc-1".to_string(),
            status: Some("in_progress".to_string()),
            title: Some("Search".to_string()),
            content: None,
            raw_output: None,
        });
        let msg = parse_session_update(&update).unwrap();
        match msg.kind {
            MessageKind::System(text) => assert_eq!(text, "tool_call_update: Search (in_progress)"),
            other => panic!("expected System, got {other:?}"),
        }
    }

    #[test]
    fn tool_call_maps_to_tool_use_with_raw_input() {
        let update = SessionUpdate::ToolCall(ToolCallInfo {
            tool_call_id: "tc-1".to_string(),
            title: "Edit file".to_string(),
            kind: "edit".to_string(),
            status: "pending".to_string(),
            content: None,
            raw_input: Some(serde_json::json!({ "path": "/a" })),
        });
        let msg = parse_session_update(&update).unwrap();
        match msg.kind {
            MessageKind::ToolUse(tool) => {
                assert_eq!(tool.name, "Edit file");
                assert_eq!(tool.input, Some(serde_json::json!({ "path": "/a" })));
            }
            other => panic!("expected ToolUse, got {other:?}"),
        }
    }

    #[test]
    fn unknown_with_discriminator_preserves_it() {
        let value = serde_json::json!({ "sessionUpdate": "some_future_type" });
        let msg = parse_session_update(&SessionUpdate::Unknown(value)).unwrap();
        match msg.kind {
            MessageKind::System(text) => assert_eq!(text, "some_future_type"),
            other => panic!("expected System, got {other:?}"),
        }
    }

    #[test]
    fn unknown_without_discriminator_is_literally_unknown() {
        let value = serde_json::json!({ "foo": "bar" });
        let msg = parse_session_update(&SessionUpdate::Unknown(value)).unwrap();
        match msg.kind {
            MessageKind::System(text) => assert_eq!(text, "unknown"),
            other => panic!("expected System, got {other:?}"),
        }
    }

    #[test]
    fn decode_session_update_routes_through_parser() {
        let params = serde_json::json!({
            "sessionId": "sess-1",
            "update": { "sessionUpdate": "agent_message_chunk", "content": { "type": "text", "text": "hi" } }
        });
        let msg = decode_session_update(Some(params)).unwrap();
        match msg.kind {
            MessageKind::TextDelta(text) => assert_eq!(text, "hi"),
            other => panic!("expected TextDelta, got {other:?}"),
        }
    }

    #[test]
    fn decode_session_update_malformed_params_yields_error() {
        let params = serde_json::json!({ "sessionId": 1234 });
        let msg = decode_session_update(Some(params)).unwrap();
        match msg.kind {
            MessageKind::Error { code, .. } => assert_eq!(code, "session_update_invalid"),
            other => panic!("expected Error, got {other:?}"),
        }
    }

    #[test]
    fn decode_session_update_with_no_params_yields_nothing() {
        assert!(decode_session_update(None).is_none());
    }
}
