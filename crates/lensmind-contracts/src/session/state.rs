use serde::{Deserialize, Serialize};

use super::draft_image::DraftImage;
use super::stage::Stage;

/// Generation id stamped on every outbound request. A completion is only
/// applied while its token is still the session's pending one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestToken(pub u64);

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Session {
    pub initial_prompt: String,
    pub modification_prompt: String,
    pub current_draft_prompt: String,
    pub draft_image: Option<DraftImage>,
    pub optimized_prompt: String,
    pub stage: Stage,
    pub error_message: Option<String>,
    pub generation: u64,
    pub pending: Option<RequestToken>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loading(&self) -> bool {
        self.stage == Stage::Loading
    }

    /// Fresh session that keeps the generation counter, so results of
    /// requests issued before the reset can never match a later token.
    pub fn reset(&self) -> Self {
        Self {
            generation: self.generation,
            ..Self::default()
        }
    }

    pub(crate) fn issue_token(&mut self) -> RequestToken {
        self.generation += 1;
        let token = RequestToken(self.generation);
        self.pending = Some(token);
        token
    }

    pub(crate) fn take_pending(&mut self, token: RequestToken) -> bool {
        if self.pending == Some(token) {
            self.pending = None;
            return true;
        }
        false
    }
}
