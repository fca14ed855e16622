use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use similar::TextDiff;
use uuid::Uuid;

use crate::runs::feedback::rating_label;

pub const HISTORY_SCHEMA_VERSION: u64 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftVersion {
    pub version_id: String,
    pub parent_version_id: Option<String>,
    pub source: String,
    pub prompt: String,
    pub prompt_diff: Option<Vec<String>>,
    pub image_path: Option<String>,
    pub created_at: String,
    #[serde(default)]
    pub feedback: Vec<Map<String, Value>>,
    #[serde(default)]
    pub accepted: bool,
    pub optimized_prompt: Option<String>,
}

/// Every draft produced in one session, chained by parent links so the
/// prompt refinements can be replayed.
#[derive(Debug, Clone, PartialEq)]
pub struct DraftHistory {
    pub path: PathBuf,
    pub schema_version: u64,
    pub history_id: String,
    pub created_at: String,
    pub versions: Vec<DraftVersion>,
}

#[derive(Debug, Serialize, Deserialize)]
struct HistoryFile {
    schema_version: u64,
    history_id: String,
    created_at: String,
    #[serde(default)]
    versions: Vec<DraftVersion>,
}

impl DraftHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            schema_version: HISTORY_SCHEMA_VERSION,
            history_id: Uuid::new_v4().to_string(),
            created_at: now_utc_iso(),
            versions: Vec::new(),
        }
    }

    /// Loads `path`, falling back to an empty history when the file is
    /// missing or unreadable.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let parsed = std::fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str::<HistoryFile>(&raw).ok());
        match parsed {
            Some(file) => Self {
                path,
                schema_version: file.schema_version,
                history_id: file.history_id,
                created_at: file.created_at,
                versions: file.versions,
            },
            None => Self::new(path),
        }
    }

    pub fn add_version(
        &mut self,
        source: &str,
        prompt: &str,
        image_path: Option<&Path>,
        parent_version_id: Option<String>,
    ) -> DraftVersion {
        let parent = parent_version_id
            .as_deref()
            .and_then(|id| self.versions.iter().find(|entry| entry.version_id == id));
        let version = DraftVersion {
            version_id: format!("v{}", self.versions.len() + 1),
            parent_version_id: parent.map(|entry| entry.version_id.clone()),
            source: source.to_string(),
            prompt: prompt.to_string(),
            prompt_diff: prompt_diff(parent.map(|entry| entry.prompt.as_str()), prompt),
            image_path: image_path.map(|path| path.to_string_lossy().to_string()),
            created_at: now_utc_iso(),
            feedback: Vec::new(),
            accepted: false,
            optimized_prompt: None,
        };
        self.versions.push(version.clone());
        version
    }

    pub fn latest(&self) -> Option<&DraftVersion> {
        self.versions.last()
    }

    pub fn accepted(&self) -> Option<&DraftVersion> {
        self.versions.iter().rev().find(|entry| entry.accepted)
    }

    pub fn record_feedback(&mut self, version_id: &str, liked: bool) {
        if let Some(version) = self.get_version_mut(version_id) {
            let mut row = Map::new();
            row.insert(
                "rating".to_string(),
                Value::String(rating_label(liked).to_string()),
            );
            row.insert("ts".to_string(), Value::String(now_utc_iso()));
            version.feedback.push(row);
        }
    }

    pub fn mark_accepted(&mut self, version_id: &str, optimized_prompt: &str) {
        for version in &mut self.versions {
            version.accepted = false;
        }
        if let Some(version) = self.get_version_mut(version_id) {
            version.accepted = true;
            version.optimized_prompt = Some(optimized_prompt.to_string());
        }
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let file = HistoryFile {
            schema_version: self.schema_version,
            history_id: self.history_id.clone(),
            created_at: self.created_at.clone(),
            versions: self.versions.clone(),
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }

    fn get_version_mut(&mut self, version_id: &str) -> Option<&mut DraftVersion> {
        self.versions
            .iter_mut()
            .find(|entry| entry.version_id == version_id)
    }
}

fn prompt_diff(prev: Option<&str>, curr: &str) -> Option<Vec<String>> {
    let prev = prev?;
    let diff = TextDiff::from_lines(prev, curr);
    let rendered = diff.unified_diff().header("prev", "curr").to_string();
    Some(rendered.lines().map(str::to_string).collect())
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use serde_json::json;

    use super::DraftHistory;

    #[test]
    fn versions_chain_and_survive_reload() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("history.json");
        let mut history = DraftHistory::new(&path);

        let v1 = history.add_version(
            "initial",
            "a red fox in snow",
            Some(Path::new("/tmp/draft-v1.png")),
            None,
        );
        history.record_feedback(&v1.version_id, false);
        let v2 = history.add_version(
            "modification",
            "make it nighttime",
            None,
            Some(v1.version_id.clone()),
        );
        history.mark_accepted(&v2.version_id, "A fox...");
        history.save()?;

        let loaded = DraftHistory::load(&path);
        assert_eq!(loaded.history_id, history.history_id);
        assert_eq!(loaded.versions.len(), 2);
        assert_eq!(loaded.versions[0].parent_version_id, None);
        assert!(loaded.versions[0].prompt_diff.is_none());
        assert_eq!(loaded.versions[0].feedback[0]["rating"], json!("dislike"));
        assert_eq!(
            loaded.versions[1].parent_version_id.as_deref(),
            Some("v1")
        );
        let diff = loaded.versions[1].prompt_diff.clone().unwrap_or_default();
        assert!(diff.iter().any(|line| line == "-a red fox in snow"));
        assert!(diff.iter().any(|line| line == "+make it nighttime"));
        let accepted = loaded.accepted().map(|entry| entry.version_id.clone());
        assert_eq!(accepted.as_deref(), Some("v2"));
        assert_eq!(
            loaded.versions[1].optimized_prompt.as_deref(),
            Some("A fox...")
        );
        Ok(())
    }

    #[test]
    fn load_of_missing_file_starts_empty() {
        let history = DraftHistory::load("/nonexistent/lensmind/history.json");
        assert!(history.versions.is_empty());
        assert!(history.latest().is_none());
    }

    #[test]
    fn unknown_parent_starts_a_new_chain() {
        let mut history = DraftHistory::new("/tmp/unused-history.json");
        history.add_version("initial", "a", None, None);
        let fresh = history.add_version("initial", "b", None, Some("v9".to_string()));
        assert_eq!(fresh.version_id, "v2");
        assert_eq!(fresh.parent_version_id, None);
        assert!(fresh.prompt_diff.is_none());
    }
}
