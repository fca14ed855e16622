use std::fmt;

use serde::{Deserialize, Serialize};

/// Position of the wizard in its linear flow.
///
/// `Feedback` is only ever a recovery target and is never rendered on its
/// own; [`Stage::normalized`] folds it into `DraftDisplay`, which is the view
/// where feedback is collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    Input,
    Loading,
    DraftDisplay,
    Feedback,
    ModifyDraftInput,
    OptimizedPromptDisplay,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Input,
        Stage::Loading,
        Stage::DraftDisplay,
        Stage::Feedback,
        Stage::ModifyDraftInput,
        Stage::OptimizedPromptDisplay,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Input => "input",
            Stage::Loading => "loading",
            Stage::DraftDisplay => "draft_display",
            Stage::Feedback => "feedback",
            Stage::ModifyDraftInput => "modify_draft_input",
            Stage::OptimizedPromptDisplay => "optimized_prompt_display",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str() == normalized)
    }

    pub fn normalized(self) -> Self {
        match self {
            Stage::Feedback => Stage::DraftDisplay,
            other => other,
        }
    }

    pub fn accepts_feedback(&self) -> bool {
        matches!(self, Stage::DraftDisplay | Stage::Feedback)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
