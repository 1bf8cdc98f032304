// ABOUTME: Human-readable one-line summaries for tool invocations.
// ABOUTME: Normalizes backend-specific tool names to a shared vocabulary.

use serde_json::Value;

const MAX_PREVIEW_CHARS: usize = 40;

/// Map backend-specific tool names onto the shared labels
pub fn normalize_tool_name(name: &str) -> &str {
    match name.to_lowercase().as_str() {
        "read" | "read_file" => "Read",
        "write" | "write_file" => "Write",
        "edit" | "edit_file" => "Edit",
        "bash" | "shell" | "run_terminal_command" => "Bash",
        "grep" | "search_file_content" => "Grep",
        "glob" | "find_files" => "Glob",
        "websearch" | "web_search" | "google_web_search" => "WebSearch",
        "task" => "Task",
        _ => name,
    }
}

fn str_field<'a>(input: &'a Value, keys: &[&str]) -> &'a str {
    keys.iter()
        .find_map(|k| input.get(*k).and_then(|v| v.as_str()))
        .unwrap_or("")
}

fn file_name(path: &str) -> &str {
    match path.rsplit('/').next() {
        Some(name) if !name.is_empty() => name,
        _ => "file",
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() > MAX_PREVIEW_CHARS {
        let head: String = text.chars().take(MAX_PREVIEW_CHARS).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

/// One-line markdown summary of a tool call, e.g. "**Read** `main.rs`"
pub fn tool_summary(name: &str, input: &Value) -> String {
    let label = normalize_tool_name(name);
    match label {
        "Read" | "Write" | "Edit" => {
            let path = str_field(input, &["file_path", "path"]);
            format!("**{}** `{}`", label, file_name(path))
        }
        "Bash" => format!("**Bash** `{}`", preview(str_field(input, &["command"]))),
        "Grep" => format!("**Search** `{}`", str_field(input, &["pattern"])),
        "Glob" => format!("**Glob** `{}`", str_field(input, &["pattern"])),
        "WebSearch" => format!("**WebSearch** `{}`", preview(str_field(input, &["query"]))),
        "Task" => format!("**Task** `{}`", preview(str_field(input, &["description"]))),
        _ => format!("**{}** `executing...`", name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_read_summary_uses_file_name() {
        let input = json!({"file_path": "/work/src/main.rs"});
        assert_eq!(tool_summary("Read", &input), "**Read** `main.rs`");
        assert_eq!(tool_summary("read_file", &json!({"path": "a/b.txt"})), "**Read** `b.txt`");
    }

    #[test]
    fn test_bash_summary_truncates_long_commands() {
        let long = "x".repeat(60);
        let summary = tool_summary("shell", &json!({"command": long}));
        assert_eq!(summary, format!("**Bash** `{}...`", "x".repeat(40)));
    }

    #[test]
    fn test_unknown_tool_falls_back() {
        assert_eq!(tool_summary("Deploy", &json!({})), "**Deploy** `executing...`");
    }

    #[test]
    fn test_missing_path_reads_as_file() {
        assert_eq!(tool_summary("Write", &json!({})), "**Write** `file`");
    }
}
