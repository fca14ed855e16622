use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

/// Appends like/dislike decisions to `feedback.jsonl`.
#[derive(Debug, Clone)]
pub struct FeedbackWriter {
    path: PathBuf,
    session_id: String,
}

impl FeedbackWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            session_id: session_id.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(
        &self,
        version_id: Option<&str>,
        liked: bool,
        prompt: &str,
    ) -> anyhow::Result<Map<String, Value>> {
        let mut payload = Map::new();
        payload.insert("ts".to_string(), Value::String(now_utc_iso()));
        payload.insert(
            "session_id".to_string(),
            Value::String(self.session_id.clone()),
        );
        payload.insert(
            "version_id".to_string(),
            version_id
                .map(|value| Value::String(value.to_string()))
                .unwrap_or(Value::Null),
        );
        payload.insert(
            "rating".to_string(),
            Value::String(rating_label(liked).to_string()),
        );
        payload.insert("prompt".to_string(), Value::String(prompt.to_string()));

        append_jsonl(&self.path, &payload)?;
        Ok(payload)
    }
}

pub fn rating_label(liked: bool) -> &'static str {
    if liked {
        "like"
    } else {
        "dislike"
    }
}

fn append_jsonl(path: &Path, payload: &Map<String, Value>) -> anyhow::Result<()> {
    use std::io::Write;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(serde_json::to_string(payload)?.as_bytes())?;
    file.write_all(b"\n")?;
    Ok(())
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::FeedbackWriter;

    #[test]
    fn record_appends_rating_lines() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("feedback.jsonl");
        let writer = FeedbackWriter::new(&path, "session-9");

        let first = writer.record(Some("v1"), false, "a red fox in snow")?;
        assert_eq!(first["rating"], Value::String("dislike".to_string()));
        assert_eq!(first["version_id"], Value::String("v1".to_string()));
        writer.record(None, true, "make it nighttime")?;

        let raw = std::fs::read_to_string(path)?;
        let lines: Vec<Value> = raw
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["rating"], Value::String("like".to_string()));
        assert_eq!(lines[1]["version_id"], Value::Null);
        assert_eq!(lines[1]["session_id"], Value::String("session-9".to_string()));
        assert!(lines[1].get("ts").and_then(Value::as_str).is_some());
        Ok(())
    }
}
