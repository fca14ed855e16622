use serde::{Deserialize, Serialize};

use super::draft_image::DraftImage;
use super::stage::Stage;
use super::state::{RequestToken, Session};

pub const MSG_EMPTY_INITIAL: &str = "Please enter an initial prompt.";
pub const MSG_EMPTY_MODIFICATION: &str = "Please enter your modifications.";
pub const MSG_NO_DRAFT_IMAGE: &str = "No draft image found to optimize the prompt from.";
pub const MSG_DRAFT_IN_FLIGHT: &str =
    "A request is already in progress. Wait for it to finish or start over.";
const MSG_INITIAL_NOT_AVAILABLE: &str = "Start over to enter a new initial prompt.";
const MSG_MODIFICATION_NOT_AVAILABLE: &str =
    "Dislike the current draft before describing modifications.";
const MSG_NO_DRAFT_AWAITING_FEEDBACK: &str = "There is no draft awaiting feedback.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftSource {
    Initial,
    Modification,
}

impl DraftSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DraftSource::Initial => "initial",
            DraftSource::Modification => "modification",
        }
    }
}

/// User intents plus the completions of the two outbound calls.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    SubmitInitial { prompt: String },
    SubmitModification { prompt: String },
    GiveFeedback { liked: bool },
    StartOver,
    DismissError,
    DraftSucceeded { token: RequestToken, image_base64: String },
    DraftFailed { token: RequestToken, message: String },
    OptimizationSucceeded { token: RequestToken, text: String },
    OptimizationFailed { token: RequestToken, message: String },
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::SubmitInitial { .. } => "submit_initial",
            SessionEvent::SubmitModification { .. } => "submit_modification",
            SessionEvent::GiveFeedback { .. } => "give_feedback",
            SessionEvent::StartOver => "start_over",
            SessionEvent::DismissError => "dismiss_error",
            SessionEvent::DraftSucceeded { .. } => "draft_succeeded",
            SessionEvent::DraftFailed { .. } => "draft_failed",
            SessionEvent::OptimizationSucceeded { .. } => "optimization_succeeded",
            SessionEvent::OptimizationFailed { .. } => "optimization_failed",
        }
    }
}

/// Side effects requested by the reducer. The runtime executes them and
/// reports back through the matching completion event.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    GenerateDraft {
        token: RequestToken,
        prompt: String,
        source: DraftSource,
    },
    OptimizePrompt {
        token: RequestToken,
        prompt: String,
        image: DraftImage,
    },
    Discarded {
        token: RequestToken,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub session: Session,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn unchanged(session: Session) -> Self {
        Self {
            session,
            effects: Vec::new(),
        }
    }

    fn with_message(mut session: Session, message: &str) -> Self {
        session.error_message = Some(message.to_string());
        Self::unchanged(session)
    }
}

pub fn reduce(state: &Session, event: &SessionEvent) -> Transition {
    let mut next = state.clone();
    match event {
        SessionEvent::SubmitInitial { prompt } => {
            if next.is_loading() {
                return Transition::with_message(next, MSG_DRAFT_IN_FLIGHT);
            }
            if next.stage != Stage::Input {
                return Transition::with_message(next, MSG_INITIAL_NOT_AVAILABLE);
            }
            if prompt.trim().is_empty() {
                return Transition::with_message(next, MSG_EMPTY_INITIAL);
            }
            next.initial_prompt = prompt.clone();
            begin_draft(next, prompt, DraftSource::Initial)
        }
        SessionEvent::SubmitModification { prompt } => {
            if next.is_loading() {
                return Transition::with_message(next, MSG_DRAFT_IN_FLIGHT);
            }
            if next.stage != Stage::ModifyDraftInput {
                return Transition::with_message(next, MSG_MODIFICATION_NOT_AVAILABLE);
            }
            if prompt.trim().is_empty() {
                return Transition::with_message(next, MSG_EMPTY_MODIFICATION);
            }
            next.modification_prompt = prompt.clone();
            begin_draft(next, prompt, DraftSource::Modification)
        }
        SessionEvent::GiveFeedback { liked } => {
            if next.is_loading() {
                return Transition::with_message(next, MSG_DRAFT_IN_FLIGHT);
            }
            if !next.stage.accepts_feedback() {
                return Transition::with_message(next, MSG_NO_DRAFT_AWAITING_FEEDBACK);
            }
            if !liked {
                next.stage = Stage::ModifyDraftInput;
                return Transition::unchanged(next);
            }
            let Some(image) = next.draft_image.clone() else {
                next.stage = Stage::Input;
                return Transition::with_message(next, MSG_NO_DRAFT_IMAGE);
            };
            let token = next.issue_token();
            next.optimized_prompt.clear();
            next.stage = Stage::Loading;
            let prompt = next.current_draft_prompt.clone();
            Transition {
                session: next,
                effects: vec![Effect::OptimizePrompt {
                    token,
                    prompt,
                    image,
                }],
            }
        }
        SessionEvent::StartOver => Transition::unchanged(next.reset()),
        SessionEvent::DismissError => {
            next.error_message = None;
            Transition::unchanged(next)
        }
        SessionEvent::DraftSucceeded {
            token,
            image_base64,
        } => {
            if !next.take_pending(*token) {
                return discarded(next, *token);
            }
            next.draft_image = Some(DraftImage::from_base64_png(image_base64));
            next.stage = Stage::DraftDisplay;
            Transition::unchanged(next)
        }
        SessionEvent::DraftFailed { token, message } => {
            if !next.take_pending(*token) {
                return discarded(next, *token);
            }
            next.stage = Stage::Input;
            Transition::with_message(next, message)
        }
        SessionEvent::OptimizationSucceeded { token, text } => {
            if !next.take_pending(*token) {
                return discarded(next, *token);
            }
            next.optimized_prompt = text.clone();
            next.stage = Stage::OptimizedPromptDisplay;
            Transition::unchanged(next)
        }
        SessionEvent::OptimizationFailed { token, message } => {
            if !next.take_pending(*token) {
                return discarded(next, *token);
            }
            next.stage = Stage::Feedback.normalized();
            Transition::with_message(next, message)
        }
    }
}

fn begin_draft(mut next: Session, prompt: &str, source: DraftSource) -> Transition {
    let token = next.issue_token();
    next.draft_image = None;
    next.optimized_prompt.clear();
    next.current_draft_prompt = prompt.to_string();
    next.stage = Stage::Loading;
    Transition {
        session: next,
        effects: vec![Effect::GenerateDraft {
            token,
            prompt: prompt.to_string(),
            source,
        }],
    }
}

fn discarded(session: Session, token: RequestToken) -> Transition {
    Transition {
        session,
        effects: vec![Effect::Discarded { token }],
    }
}
