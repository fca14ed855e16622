//! Runtime for the Lens MIND prompt wizard.
//!
//! [`WizardEngine`] owns the [`Session`], feeds every event through the pure
//! reducer from `lensmind-contracts`, and executes the resulting effects one
//! at a time: the draft request against an image-generation provider and the
//! prompt optimization against a multimodal text provider. Run artifacts
//! (event log, feedback, draft history, summary) land in the run directory.

mod draft;
mod http;
mod optimize;

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use lensmind_contracts::events::{EventPayload, EventWriter};
use lensmind_contracts::models::{Capability, ModelSelector, ModelSpec};
use lensmind_contracts::providers::ProviderRegistry;
use lensmind_contracts::runs::draft_history::DraftHistory;
use lensmind_contracts::runs::feedback::FeedbackWriter;
use lensmind_contracts::runs::summary::{write_summary, SessionSummary};
use lensmind_contracts::session::{
    reduce, DraftSource, Effect, RequestToken, Session, SessionEvent, Stage, DRAFT_MIME_TYPE,
};
use serde_json::{json, Map, Value};

pub use draft::{
    DraftProvider, DraftRequest, DraftResponse, DryrunDraftProvider, ImageGenerationError,
    ImagenProvider,
};
pub use http::upstream_error_message;
pub use optimize::{
    optimization_instruction, DryrunOptimizer, GeminiOptimizer, OptimizeRequest,
    PromptOptimizationError, PromptOptimizer,
};

pub type DraftProviders = ProviderRegistry<Box<dyn DraftProvider>>;
pub type PromptOptimizers = ProviderRegistry<Box<dyn PromptOptimizer>>;

pub fn default_draft_providers() -> DraftProviders {
    let mut providers = DraftProviders::default();
    providers.register(Box::new(DryrunDraftProvider));
    providers.register(Box::new(ImagenProvider::new()));
    providers
}

pub fn default_prompt_optimizers() -> PromptOptimizers {
    let mut optimizers = PromptOptimizers::default();
    optimizers.register(Box::new(DryrunOptimizer));
    optimizers.register(Box::new(GeminiOptimizer::new()));
    optimizers
}

#[derive(Debug, Clone)]
struct InFlightDraft {
    token: RequestToken,
    source: DraftSource,
    provider_request: Map<String, Value>,
}

pub struct WizardEngine {
    run_dir: PathBuf,
    session_id: String,
    session: Session,
    events: EventWriter,
    feedback: FeedbackWriter,
    history: DraftHistory,
    summary_path: PathBuf,
    started_at: String,
    model_selector: ModelSelector,
    image_model: ModelSpec,
    text_model: ModelSpec,
    draft_providers: DraftProviders,
    optimizers: PromptOptimizers,
    in_flight_draft: Option<InFlightDraft>,
    last_version_id: Option<String>,
    last_fallback_reason: Option<String>,
    artifact_failure: Option<anyhow::Error>,
}

impl WizardEngine {
    pub fn new(
        run_dir: impl Into<PathBuf>,
        events_path: impl Into<PathBuf>,
        text_model: Option<String>,
        image_model: Option<String>,
    ) -> Result<Self> {
        Self::with_providers(
            run_dir,
            events_path,
            text_model,
            image_model,
            default_draft_providers(),
            default_prompt_optimizers(),
        )
    }

    pub fn with_providers(
        run_dir: impl Into<PathBuf>,
        events_path: impl Into<PathBuf>,
        text_model: Option<String>,
        image_model: Option<String>,
        draft_providers: DraftProviders,
        optimizers: PromptOptimizers,
    ) -> Result<Self> {
        let run_dir = run_dir.into();
        std::fs::create_dir_all(&run_dir)
            .with_context(|| format!("failed to create {}", run_dir.display()))?;
        let session_id = run_dir
            .file_name()
            .and_then(|value| value.to_str())
            .filter(|value| !value.is_empty())
            .unwrap_or("session")
            .to_string();
        let events = EventWriter::new(events_path.into(), session_id.clone());
        let feedback = FeedbackWriter::new(run_dir.join("feedback.jsonl"), session_id.clone());
        let history = DraftHistory::load(run_dir.join("history.json"));
        let summary_path = run_dir.join("summary.json");

        let model_selector = ModelSelector::new(None);
        let image_selection = model_selector
            .select(image_model.as_deref(), Capability::Image)
            .map_err(|err| anyhow!(err))?;
        let text_selection = model_selector
            .select(text_model.as_deref(), Capability::Vision)
            .map_err(|err| anyhow!(err))?;

        events.emit(
            "run_started",
            map_object(json!({
                "out_dir": run_dir.to_string_lossy().to_string(),
                "image_model": image_selection.model.name,
                "text_model": text_selection.model.name,
            })),
        )?;
        let mut last_fallback_reason = None;
        for (capability, reason) in [
            (Capability::Image, image_selection.fallback_reason.as_ref()),
            (Capability::Vision, text_selection.fallback_reason.as_ref()),
        ] {
            if let Some(reason) = reason {
                events.emit(
                    "model_fallback",
                    map_object(json!({
                        "capability": capability.as_str(),
                        "reason": reason,
                    })),
                )?;
                last_fallback_reason = Some(reason.clone());
            }
        }

        Ok(Self {
            run_dir,
            session_id,
            session: Session::new(),
            events,
            feedback,
            history,
            summary_path,
            started_at: now_utc_iso(),
            model_selector,
            image_model: image_selection.model,
            text_model: text_selection.model,
            draft_providers,
            optimizers,
            in_flight_draft: None,
            last_version_id: None,
            last_fallback_reason,
            artifact_failure: None,
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn history(&self) -> &DraftHistory {
        &self.history
    }

    pub fn image_model(&self) -> &ModelSpec {
        &self.image_model
    }

    pub fn text_model(&self) -> &ModelSpec {
        &self.text_model
    }

    pub fn last_fallback_reason(&self) -> Option<&str> {
        self.last_fallback_reason.as_deref()
    }

    pub fn event_writer(&self) -> EventWriter {
        self.events.clone()
    }

    pub fn set_image_model(&mut self, model: Option<&str>) -> Result<&ModelSpec> {
        self.image_model = self.select_model(model, Capability::Image)?;
        Ok(&self.image_model)
    }

    pub fn set_text_model(&mut self, model: Option<&str>) -> Result<&ModelSpec> {
        self.text_model = self.select_model(model, Capability::Vision)?;
        Ok(&self.text_model)
    }

    fn select_model(&mut self, model: Option<&str>, capability: Capability) -> Result<ModelSpec> {
        let selection = self
            .model_selector
            .select(model, capability)
            .map_err(|err| anyhow!(err))?;
        self.last_fallback_reason = selection.fallback_reason.clone();
        self.events.emit(
            "model_selected",
            map_object(json!({
                "capability": capability.as_str(),
                "model": selection.model.name,
                "requested": selection.requested,
                "fallback_reason": selection.fallback_reason,
            })),
        )?;
        Ok(selection.model)
    }

    /// Reduces `event` and runs every effect it produces, sequentially,
    /// until the session settles. Effects complete before this returns, so
    /// nothing is pending afterwards; a completion event passed in from
    /// outside can only carry a stale token and is logged as discarded.
    ///
    /// Failures writing run artifacts or the event log never abort the
    /// flow. The session is committed first and the failure is surfaced as
    /// a notice.
    pub fn dispatch(&mut self, event: SessionEvent) -> &Session {
        let mut queue = VecDeque::from([event]);
        while let Some(event) = queue.pop_front() {
            let transition = reduce(&self.session, &event);
            let discarded = transition
                .effects
                .iter()
                .any(|effect| matches!(effect, Effect::Discarded { .. }));
            let prev = std::mem::replace(&mut self.session, transition.session);
            if let Err(err) = self.observe(&prev, &event, discarded) {
                self.note_failure(err);
            }
            for effect in transition.effects {
                if let Some(completion) = self.execute(effect) {
                    queue.push_back(completion);
                }
            }
        }
        if let Some(err) = self.artifact_failure.take() {
            let message = format!("Could not save run files: {err:#}");
            if self.session.error_message.is_none() {
                self.session.error_message = Some(message.clone());
            }
            self.events
                .emit("artifact_failed", map_object(json!({ "error": message })))
                .ok();
        }
        &self.session
    }

    fn note_failure(&mut self, err: anyhow::Error) {
        if self.artifact_failure.is_none() {
            self.artifact_failure = Some(err);
        }
    }

    fn log(&mut self, event_type: &str, payload: EventPayload) {
        if let Err(err) = self.events.emit(event_type, payload) {
            self.note_failure(err);
        }
    }

    fn observe(&mut self, prev: &Session, event: &SessionEvent, discarded: bool) -> Result<()> {
        let next = self.session.clone();

        if next.stage != prev.stage {
            self.log(
                "stage_changed",
                map_object(json!({
                    "from": prev.stage.as_str(),
                    "to": next.stage.as_str(),
                    "event": event.name(),
                })),
            );
        }

        if let Some(message) = next.error_message.as_deref() {
            let rejected = next.stage == prev.stage || next.error_message != prev.error_message;
            if is_user_intent(event) && rejected {
                self.log(
                    "validation_failed",
                    map_object(json!({
                        "event": event.name(),
                        "stage": next.stage.as_str(),
                        "message": message,
                    })),
                );
            }
        }

        if discarded {
            return Ok(());
        }
        match event {
            SessionEvent::GiveFeedback { liked }
                if prev.stage.accepts_feedback()
                    && next.stage != prev.stage
                    && next.stage != Stage::Input =>
            {
                self.record_feedback(*liked)
            }
            SessionEvent::StartOver => {
                self.in_flight_draft = None;
                self.last_version_id = None;
                self.log(
                    "session_reset",
                    map_object(json!({
                        "abandoned_request": prev.pending.map(|token| token.0),
                    })),
                );
                Ok(())
            }
            SessionEvent::DraftSucceeded { token, .. } => self.persist_draft(*token),
            SessionEvent::OptimizationSucceeded { token, text } => {
                self.persist_optimized_prompt(*token, text)
            }
            _ => Ok(()),
        }
    }

    fn execute(&mut self, effect: Effect) -> Option<SessionEvent> {
        match effect {
            Effect::GenerateDraft {
                token,
                prompt,
                source,
            } => {
                self.log(
                    "draft_requested",
                    map_object(json!({
                        "token": token.0,
                        "source": source.as_str(),
                        "prompt": prompt,
                        "provider": self.image_model.provider,
                        "model": self.image_model.name,
                    })),
                );
                let request = DraftRequest {
                    prompt,
                    model: self.image_model.name.clone(),
                };
                let outcome = match self.draft_providers.get(&self.image_model.provider) {
                    Some(provider) => provider.generate(&request),
                    None => Err(ImageGenerationError::ProviderUnavailable(
                        self.image_model.provider.clone(),
                    )),
                }
                .and_then(normalize_draft);
                match outcome {
                    Ok(response) => {
                        self.in_flight_draft = Some(InFlightDraft {
                            token,
                            source,
                            provider_request: response.provider_request,
                        });
                        Some(SessionEvent::DraftSucceeded {
                            token,
                            image_base64: response.image_base64,
                        })
                    }
                    Err(err) => {
                        self.in_flight_draft = None;
                        self.log(
                            "draft_failed",
                            map_object(json!({
                                "token": token.0,
                                "kind": err.kind(),
                                "error": err.to_string(),
                            })),
                        );
                        Some(SessionEvent::DraftFailed {
                            token,
                            message: err.user_message(),
                        })
                    }
                }
            }
            Effect::OptimizePrompt {
                token,
                prompt,
                image,
            } => {
                self.log(
                    "optimize_requested",
                    map_object(json!({
                        "token": token.0,
                        "prompt": prompt,
                        "version_id": self.last_version_id,
                        "provider": self.text_model.provider,
                        "model": self.text_model.name,
                    })),
                );
                let request = OptimizeRequest {
                    prompt,
                    image,
                    model: self.text_model.name.clone(),
                };
                let outcome = match self.optimizers.get(&self.text_model.provider) {
                    Some(optimizer) => optimizer.optimize(&request),
                    None => Err(PromptOptimizationError::ProviderUnavailable(
                        self.text_model.provider.clone(),
                    )),
                };
                match outcome {
                    Ok(text) => Some(SessionEvent::OptimizationSucceeded { token, text }),
                    Err(err) => {
                        self.log(
                            "optimize_failed",
                            map_object(json!({
                                "token": token.0,
                                "kind": err.kind(),
                                "error": err.to_string(),
                            })),
                        );
                        Some(SessionEvent::OptimizationFailed {
                            token,
                            message: err.user_message(),
                        })
                    }
                }
            }
            Effect::Discarded { token } => {
                let pending = self.session.pending.map(|pending| pending.0);
                self.log(
                    "result_discarded",
                    map_object(json!({ "token": token.0, "pending": pending })),
                );
                None
            }
        }
    }

    fn persist_draft(&mut self, token: RequestToken) -> Result<()> {
        let in_flight = self
            .in_flight_draft
            .take()
            .filter(|in_flight| in_flight.token == token);
        let source = in_flight
            .as_ref()
            .map(|in_flight| in_flight.source)
            .unwrap_or(DraftSource::Initial);
        let bytes = match self.session.draft_image.as_ref() {
            Some(image) => image.decode_bytes()?,
            None => return Ok(()),
        };
        let image_path = self
            .run_dir
            .join(format!("draft-v{}.png", self.history.versions.len() + 1));
        std::fs::write(&image_path, &bytes)
            .with_context(|| format!("failed to write {}", image_path.display()))?;

        let prompt = self.session.current_draft_prompt.clone();
        let version = self.history.add_version(
            source.as_str(),
            &prompt,
            Some(&image_path),
            self.last_version_id.clone(),
        );
        self.last_version_id = Some(version.version_id.clone());
        self.history.save()?;
        self.log(
            "draft_created",
            map_object(json!({
                "token": token.0,
                "version_id": version.version_id,
                "parent_version_id": version.parent_version_id,
                "image_path": image_path.to_string_lossy().to_string(),
                "bytes": bytes.len(),
                "provider_request": in_flight.map(|in_flight| in_flight.provider_request),
            })),
        );
        Ok(())
    }

    fn persist_optimized_prompt(&mut self, token: RequestToken, text: &str) -> Result<()> {
        if let Some(version_id) = self.last_version_id.clone() {
            self.history.mark_accepted(&version_id, text);
            self.history.save()?;
        }
        let prompt_path = self.run_dir.join("optimized_prompt.txt");
        std::fs::write(&prompt_path, text)
            .with_context(|| format!("failed to write {}", prompt_path.display()))?;
        let version_id = self.last_version_id.clone();
        self.log(
            "prompt_optimized",
            map_object(json!({
                "token": token.0,
                "version_id": version_id,
                "chars": text.chars().count(),
                "path": prompt_path.to_string_lossy().to_string(),
            })),
        );
        Ok(())
    }

    fn record_feedback(&mut self, liked: bool) -> Result<()> {
        let version_id = self.last_version_id.clone();
        let row = self.feedback.record(
            version_id.as_deref(),
            liked,
            &self.session.current_draft_prompt,
        )?;
        self.log("feedback_recorded", row);
        if let Some(version_id) = version_id.as_deref() {
            self.history.record_feedback(version_id, liked);
            self.history.save()?;
        }
        Ok(())
    }

    /// Writes the optimized prompt to `path` for reuse elsewhere.
    pub fn export_optimized_prompt(&self, path: &Path) -> Result<()> {
        if self.session.optimized_prompt.is_empty() {
            bail!("no optimized prompt to export yet");
        }
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &self.session.optimized_prompt)
            .with_context(|| format!("failed to write {}", path.display()))?;
        self.events.emit(
            "prompt_exported",
            map_object(json!({ "path": path.to_string_lossy().to_string() })),
        )?;
        Ok(())
    }

    pub fn finish(&mut self) -> Result<()> {
        let optimized_prompt = Some(self.session.optimized_prompt.clone())
            .filter(|text| !text.is_empty());
        let summary = SessionSummary {
            session_id: self.session_id.clone(),
            started_at: self.started_at.clone(),
            finished_at: now_utc_iso(),
            total_drafts: self.history.versions.len() as u64,
            accepted_version_id: self
                .history
                .accepted()
                .map(|version| version.version_id.clone()),
            final_stage: self.session.stage.as_str().to_string(),
            optimized_prompt,
        };
        let extra = map_object(json!({
            "image_model": self.image_model.name,
            "text_model": self.text_model.name,
        }));
        write_summary(&self.summary_path, &summary, Some(&extra))?;
        self.events.emit(
            "run_finished",
            map_object(json!({
                "summary_path": self.summary_path.to_string_lossy().to_string(),
                "final_stage": summary.final_stage,
            })),
        )?;
        Ok(())
    }
}

/// Trims the provider payload and checks it decodes as a PNG data URL body.
fn normalize_draft(mut response: DraftResponse) -> Result<DraftResponse, ImageGenerationError> {
    if let Some(mime_type) = response.mime_type.as_deref() {
        if !mime_type.trim().eq_ignore_ascii_case(DRAFT_MIME_TYPE) {
            return Err(ImageGenerationError::InvalidResponse(format!(
                "unsupported image type '{mime_type}'"
            )));
        }
    }
    let trimmed = response.image_base64.trim();
    BASE64.decode(trimmed.as_bytes()).map_err(|err| {
        ImageGenerationError::InvalidResponse(format!("image payload is not valid base64: {err}"))
    })?;
    if trimmed.len() != response.image_base64.len() {
        response.image_base64 = trimmed.to_string();
    }
    Ok(response)
}

fn is_user_intent(event: &SessionEvent) -> bool {
    matches!(
        event,
        SessionEvent::SubmitInitial { .. }
            | SessionEvent::SubmitModification { .. }
            | SessionEvent::GiveFeedback { .. }
    )
}

fn map_object(value: Value) -> EventPayload {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn now_utc_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, false)
}
