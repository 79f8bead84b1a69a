//! File-to-text conversion for folder ingestion

use crate::error::{Result, SourcegateError};
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Title and plain text extracted from a file
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDocument {
    pub title: String,
    pub text: String,
}

/// Parse a file by extension
///
/// `.md` and `.txt` are taken verbatim. `.json` Slack channel exports become
/// one `user: text` line per message under a `Channel:` header; any other JSON
/// is kept as compact JSON. Every other extension is unsupported.
pub fn parse_file(path: &Path) -> Result<ParsedDocument> {
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let text = match extension.as_str() {
        "md" | "txt" => read_text(path)?,
        "json" => {
            let raw = read_text(path)?;
            let value: Value = serde_json::from_str(&raw).map_err(|e| SourcegateError::Json {
                source: e,
                context: format!("Failed to parse {}", path.display()),
            })?;
            json_to_text(&value)
        }
        _ => {
            return Err(SourcegateError::UnsupportedDocumentFormat {
                path: path.to_path_buf(),
                extension,
            })
        }
    };

    Ok(ParsedDocument {
        title: title_from_path(path),
        text,
    })
}

/// File stem with underscores read as spaces
pub fn title_from_path(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().replace('_', " "))
        .unwrap_or_default()
}

fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| SourcegateError::Io {
        source: e,
        context: format!("Failed to read {}", path.display()),
    })
}

fn json_to_text(value: &Value) -> String {
    let Some(messages) = value.as_object().and_then(|o| o.get("messages")) else {
        return value.to_string();
    };

    let channel = value.get("channel").map(display_value);
    let mut lines = vec![format!(
        "Channel: {}",
        channel.unwrap_or_else(|| "unknown".to_string())
    )];

    for message in messages.as_array().into_iter().flatten() {
        let user = message
            .get("user")
            .map(display_value)
            .unwrap_or_else(|| "?".to_string());
        let text = message.get("text").map(display_value).unwrap_or_default();
        lines.push(format!("{}: {}", user, text));
    }

    lines.join("\n")
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_markdown_verbatim() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("q3_budget_plan.md");
        fs::write(&path, "# Budget\n\nTotal: 10k").unwrap();

        let parsed = parse_file(&path).unwrap();
        assert_eq!(parsed.title, "q3 budget plan");
        assert_eq!(parsed.text, "# Budget\n\nTotal: 10k");
    }

    #[test]
    fn test_slack_export() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("general.json");
        fs::write(
            &path,
            r#"{"channel": "general", "messages": [
                {"user": "ana", "text": "standup at 10"},
                {"text": "no user here"}
            ]}"#,
        )
        .unwrap();

        let parsed = parse_file(&path).unwrap();
        assert_eq!(
            parsed.text,
            "Channel: general\nana: standup at 10\n?: no user here"
        );
    }

    #[test]
    fn test_slack_export_without_channel() {
        let value: Value = serde_json::json!({"messages": []});
        assert_eq!(json_to_text(&value), "Channel: unknown");
    }

    #[test]
    fn test_other_json_compact() {
        let value: Value = serde_json::json!({"a": [1, 2]});
        assert_eq!(json_to_text(&value), r#"{"a":[1,2]}"#);
    }

    #[test]
    fn test_unsupported_extension() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("deck.pptx");
        fs::write(&path, b"binary").unwrap();

        match parse_file(&path) {
            Err(SourcegateError::UnsupportedDocumentFormat { extension, .. }) => {
                assert_eq!(extension, "pptx")
            }
            other => panic!("expected unsupported format, got {:?}", other),
        }
    }

    #[test]
    fn test_extension_case_insensitive() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("NOTES.TXT");
        fs::write(&path, "hello").unwrap();
        assert_eq!(parse_file(&path).unwrap().text, "hello");
    }
}
