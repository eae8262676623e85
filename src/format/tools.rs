//! Tool activity lines and turn summaries

use super::markdown::escape_html;
use crate::runtime::{ContentBlock, TurnSummary};
use serde_json::Value;

const PREVIEW_CHARS: usize = 60;

/// Icon for a tool kind
pub fn tool_icon(name: &str) -> &'static str {
    match name {
        "Bash" => "💻",
        "Read" => "📖",
        "Write" => "✏️",
        "Edit" | "MultiEdit" => "📝",
        "Glob" => "🔍",
        "Grep" => "🔎",
        "WebFetch" | "WebSearch" => "🌐",
        "Task" => "🤖",
        "TodoWrite" => "📋",
        "NotebookEdit" => "📓",
        _ => "🔧",
    }
}

/// One-line HTML summary of a tool invocation
pub fn tool_line(name: &str, input: &Value) -> String {
    let icon = tool_icon(name);
    match tool_preview(name, input) {
        Some(preview) => format!(
            "{} <b>{}</b> <code>{}</code>",
            icon,
            escape_html(name),
            escape_html(&truncate(&preview, PREVIEW_CHARS))
        ),
        None => format!("{} <b>{}</b>", icon, escape_html(name)),
    }
}

fn tool_preview(name: &str, input: &Value) -> Option<String> {
    let field = |key: &str| input.get(key).and_then(Value::as_str).map(str::to_string);
    match name {
        "Bash" => field("command").map(|c| c.lines().next().unwrap_or_default().to_string()),
        "Read" | "Write" | "Edit" | "MultiEdit" => field("file_path").map(|p| shorten_path(&p)),
        "NotebookEdit" => field("notebook_path").map(|p| shorten_path(&p)),
        "Glob" => field("pattern"),
        "Grep" => field("pattern").map(|pattern| match field("path") {
            Some(path) => format!("{} in {}", pattern, shorten_path(&path)),
            None => pattern,
        }),
        "WebFetch" => field("url"),
        "WebSearch" => field("query"),
        "Task" => field("description"),
        "TodoWrite" => input
            .get("todos")
            .and_then(Value::as_array)
            .map(|todos| format!("{} items", todos.len())),
        _ => None,
    }
}

/// Keep the last two components of long paths
pub fn shorten_path(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    if parts.len() <= 3 {
        return path.to_string();
    }
    format!("…/{}", parts[parts.len() - 2..].join("/"))
}

/// Cut `text` to `max` chars, marking the cut with an ellipsis
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(1)).collect();
    format!("{}…", kept)
}

/// Separate assistant content into tool lines and prose
pub fn split_content(blocks: &[ContentBlock]) -> (Vec<String>, String) {
    let mut tools = Vec::new();
    let mut prose: Vec<&str> = Vec::new();
    for block in blocks {
        match block {
            ContentBlock::Text { text } if !text.trim().is_empty() => prose.push(text),
            ContentBlock::ToolUse { name, input, .. } => tools.push(tool_line(name, input)),
            _ => {}
        }
    }
    (tools, prose.join("\n\n"))
}

/// One-line cost/turns/duration summary of a finished turn
pub fn summary_line(summary: &TurnSummary) -> String {
    let head = if summary.is_error {
        "⚠️ Finished with error"
    } else {
        "✅ Done"
    };
    let mut parts = vec![head.to_string()];
    if let Some(turns) = summary.num_turns {
        parts.push(format!(
            "{} turn{}",
            turns,
            if turns == 1 { "" } else { "s" }
        ));
    }
    if let Some(cost) = summary.total_cost_usd {
        parts.push(format!("${:.4}", cost));
    }
    if let Some(ms) = summary.duration_ms {
        parts.push(format!("{:.1}s", ms as f64 / 1000.0));
    }
    parts.join(" · ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bash_line() {
        let line = tool_line("Bash", &json!({"command": "cargo fmt && echo <ok>\nsecond"}));
        assert_eq!(line, "💻 <b>Bash</b> <code>cargo fmt &amp;&amp; echo &lt;ok&gt;</code>");
    }

    #[test]
    fn test_read_line_shortens_path() {
        let line = tool_line("Read", &json!({"file_path": "/home/me/src/app/main.rs"}));
        assert_eq!(line, "📖 <b>Read</b> <code>…/app/main.rs</code>");
    }

    #[test]
    fn test_unknown_tool_falls_back() {
        let line = tool_line("mcp__db__query", &json!({"sql": "select 1"}));
        assert_eq!(line, "🔧 <b>mcp__db__query</b>");
    }

    #[test]
    fn test_long_preview_is_truncated() {
        let cmd = "x".repeat(200);
        let line = tool_line("Bash", &json!({ "command": cmd }));
        assert!(line.contains('…'));
        assert!(line.chars().count() < 100);
    }

    #[test]
    fn test_grep_and_todo_previews() {
        assert_eq!(
            tool_line("Grep", &json!({"pattern": "fn main", "path": "src"})),
            "🔎 <b>Grep</b> <code>fn main in src</code>"
        );
        assert_eq!(
            tool_line("TodoWrite", &json!({"todos": [{}, {}]})),
            "📋 <b>TodoWrite</b> <code>2 items</code>"
        );
    }

    #[test]
    fn test_split_content() {
        let blocks = vec![
            ContentBlock::Text {
                text: "Looking.".to_string(),
            },
            ContentBlock::ToolUse {
                id: "t1".to_string(),
                name: "Glob".to_string(),
                input: json!({"pattern": "**/*.rs"}),
            },
            ContentBlock::Text {
                text: "  ".to_string(),
            },
            ContentBlock::Text {
                text: "Found it.".to_string(),
            },
        ];
        let (tools, prose) = split_content(&blocks);
        assert_eq!(tools, vec!["🔍 <b>Glob</b> <code>**/*.rs</code>".to_string()]);
        assert_eq!(prose, "Looking.\n\nFound it.");
    }

    #[test]
    fn test_summary_line() {
        let summary = TurnSummary {
            is_error: false,
            num_turns: Some(3),
            total_cost_usd: Some(0.01234),
            duration_ms: Some(4200),
        };
        assert_eq!(summary_line(&summary), "✅ Done · 3 turns · $0.0123 · 4.2s");

        let summary = TurnSummary {
            is_error: true,
            num_turns: Some(1),
            ..TurnSummary::default()
        };
        assert_eq!(summary_line(&summary), "⚠️ Finished with error · 1 turn");
    }
}
