//! NDJSON protocol types for the agent CLI
//!
//! The CLI runs with `--input-format stream-json --output-format stream-json`
//! and exchanges one JSON object per line over stdin/stdout.

use serde::{Deserialize, Serialize};

// =============================================================================
// CLI → bridge messages
// =============================================================================

/// Top-level CLI message (parsed from one NDJSON line)
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CliMessage {
    System(CliSystemMessage),
    Assistant(CliAssistantMessage),
    Result(CliResultMessage),
    ToolProgress(CliToolProgressMessage),
    KeepAlive,
    /// Stream events, control traffic and anything newer than this client
    #[serde(other)]
    Unknown,
}

/// System message (subtype: "init" or "status")
#[derive(Debug, Clone, Deserialize)]
pub struct CliSystemMessage {
    pub subtype: String,
    pub session_id: Option<String>,
    pub cwd: Option<String>,
    pub model: Option<String>,
    #[serde(rename = "permissionMode")]
    pub permission_mode: Option<String>,
    pub status: Option<String>,
}

/// Assistant message (complete model response)
#[derive(Debug, Clone, Deserialize)]
pub struct CliAssistantMessage {
    pub message: AssistantMessageBody,
    pub parent_tool_use_id: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantMessageBody {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    pub content: Vec<ContentBlock>,
    pub stop_reason: Option<String>,
}

/// Content block within an assistant message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: serde_json::Value,
        #[serde(default)]
        is_error: bool,
    },
    Thinking {
        thinking: String,
    },
    #[serde(other)]
    Other,
}

/// Result message (turn completion)
#[derive(Debug, Clone, Deserialize)]
pub struct CliResultMessage {
    pub subtype: String,
    #[serde(default)]
    pub is_error: bool,
    pub result: Option<String>,
    pub duration_ms: Option<u64>,
    pub num_turns: Option<u32>,
    pub total_cost_usd: Option<f64>,
    pub session_id: Option<String>,
}

/// Tool progress heartbeat
#[derive(Debug, Clone, Deserialize)]
pub struct CliToolProgressMessage {
    pub tool_use_id: String,
    pub tool_name: String,
    pub elapsed_time_seconds: f64,
}

// =============================================================================
// Helper functions
// =============================================================================

/// Parse one NDJSON line, logging and skipping malformed input
pub fn parse_ndjson_line(line: &str) -> Option<CliMessage> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    serde_json::from_str::<CliMessage>(line)
        .map_err(|e| {
            let preview: String = line.chars().take(200).collect();
            tracing::warn!("NDJSON parse error: {} (line: {})", e, preview);
        })
        .ok()
}

/// A user turn in CLI NDJSON format
pub fn user_message_to_cli_ndjson(content: &str, session_id: &str) -> serde_json::Value {
    serde_json::json!({
        "type": "user",
        "message": {
            "role": "user",
            "content": content,
        },
        "parent_tool_use_id": null,
        "session_id": session_id,
    })
}

/// Create an interrupt control request for the CLI
pub fn interrupt_to_cli_ndjson() -> serde_json::Value {
    serde_json::json!({
        "type": "control_request",
        "request_id": uuid::Uuid::new_v4().to_string(),
        "request": {
            "subtype": "interrupt",
        }
    })
}

/// Create a set_model control request for the CLI
pub fn set_model_to_cli_ndjson(model: &str) -> serde_json::Value {
    serde_json::json!({
        "type": "control_request",
        "request_id": uuid::Uuid::new_v4().to_string(),
        "request": {
            "subtype": "set_model",
            "model": model,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_system_status() {
        let line = r#"{"type":"system","subtype":"status","status":"compacting","session_id":"s1"}"#;
        match parse_ndjson_line(line) {
            Some(CliMessage::System(sys)) => {
                assert_eq!(sys.subtype, "status");
                assert_eq!(sys.status.as_deref(), Some("compacting"));
            }
            other => panic!("Expected System message, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_assistant_message() {
        let line = r#"{"type":"assistant","message":{"id":"msg1","role":"assistant","model":"m","content":[{"type":"text","text":"Hello"},{"type":"tool_use","id":"t1","name":"Bash","input":{"command":"ls"}},{"type":"server_tool_use"}],"stop_reason":null},"parent_tool_use_id":null,"session_id":"s1"}"#;
        match parse_ndjson_line(line) {
            Some(CliMessage::Assistant(ast)) => {
                assert_eq!(ast.message.content.len(), 3);
                assert!(matches!(ast.message.content[1], ContentBlock::ToolUse { .. }));
                assert_eq!(ast.message.content[2], ContentBlock::Other);
            }
            other => panic!("Expected Assistant message, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_result_message() {
        let line = r#"{"type":"result","subtype":"success","is_error":false,"num_turns":2,"total_cost_usd":0.01,"duration_ms":500,"result":"ok","session_id":"s1"}"#;
        match parse_ndjson_line(line) {
            Some(CliMessage::Result(res)) => {
                assert!(!res.is_error);
                assert_eq!(res.num_turns, Some(2));
                assert_eq!(res.total_cost_usd, Some(0.01));
            }
            other => panic!("Expected Result message, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_types_are_tolerated() {
        let line = r#"{"type":"stream_event","event":{"type":"content_block_delta"}}"#;
        assert!(matches!(parse_ndjson_line(line), Some(CliMessage::Unknown)));
        assert!(matches!(
            parse_ndjson_line(r#"{"type":"keep_alive"}"#),
            Some(CliMessage::KeepAlive)
        ));
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        assert!(parse_ndjson_line("not json").is_none());
        assert!(parse_ndjson_line("   ").is_none());
    }

    #[test]
    fn test_user_message_to_cli_ndjson() {
        let ndjson = user_message_to_cli_ndjson("hello", "s1");
        assert_eq!(ndjson["type"], "user");
        assert_eq!(ndjson["message"]["content"], "hello");
        assert_eq!(ndjson["session_id"], "s1");
    }

    #[test]
    fn test_control_requests() {
        let ndjson = interrupt_to_cli_ndjson();
        assert_eq!(ndjson["type"], "control_request");
        assert_eq!(ndjson["request"]["subtype"], "interrupt");
        assert!(ndjson["request_id"].is_string());

        let ndjson = set_model_to_cli_ndjson("opus");
        assert_eq!(ndjson["request"]["subtype"], "set_model");
        assert_eq!(ndjson["request"]["model"], "opus");
    }
}
