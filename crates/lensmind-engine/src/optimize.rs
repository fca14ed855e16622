use lensmind_contracts::providers::NamedProvider;
use lensmind_contracts::session::{DraftImage, DRAFT_MIME_TYPE};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};
use thiserror::Error;

use crate::http::{api_base_from_env, first_non_empty_env, post_json, HttpFailure};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PromptOptimizationError {
    #[error("LLM generation failed: no API key configured (set GEMINI_API_KEY or GOOGLE_API_KEY)")]
    MissingCredential,
    #[error("LLM generation failed: no provider registered for '{0}'")]
    ProviderUnavailable(String),
    #[error("LLM generation failed: {0}")]
    Transport(String),
    #[error("LLM generation failed: {message}")]
    Status { status: u16, message: String },
    #[error("LLM generation failed: {0}")]
    InvalidResponse(String),
    #[error("LLM generation failed: no candidate text was returned")]
    NoCandidate,
}

impl PromptOptimizationError {
    pub fn kind(&self) -> &'static str {
        match self {
            PromptOptimizationError::MissingCredential => "missing_credential",
            PromptOptimizationError::ProviderUnavailable(_) => "provider_unavailable",
            PromptOptimizationError::Transport(_) => "transport",
            PromptOptimizationError::Status { .. } => "status",
            PromptOptimizationError::InvalidResponse(_) => "invalid_response",
            PromptOptimizationError::NoCandidate => "no_candidate",
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            PromptOptimizationError::NoCandidate => {
                "Could not generate an optimized prompt. Please try again.".to_string()
            }
            other => format!("Failed to generate prompt: {other}. Please try again."),
        }
    }
}

impl From<HttpFailure> for PromptOptimizationError {
    fn from(failure: HttpFailure) -> Self {
        match failure {
            HttpFailure::Transport(message) => PromptOptimizationError::Transport(message),
            HttpFailure::Status { status, message } => {
                PromptOptimizationError::Status { status, message }
            }
            HttpFailure::InvalidJson(message) => PromptOptimizationError::InvalidResponse(message),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizeRequest {
    pub prompt: String,
    pub image: DraftImage,
    pub model: String,
}

/// Turns an accepted draft plus its prompt into a detailed photography
/// prompt.
pub trait PromptOptimizer: NamedProvider + Send + Sync {
    fn optimize(&self, request: &OptimizeRequest) -> Result<String, PromptOptimizationError>;
}

pub fn optimization_instruction(last_prompt: &str) -> String {
    format!(
        "Based on the most recent user request: '{last_prompt}' and the visual style of this image, \
generate a highly detailed, professional photography AI prompt. The prompt should be optimized for \
a realistic, cinematic, and high-quality output using Gemini AI.

Include specific camera settings (e.g., white balance, aperture, shutter speed, ISO, focal length, \
depth of field, lens type like '85mm f/1.4 prime lens'), lighting conditions (e.g., golden hour, \
soft box lighting, natural light, dramatic rim lighting), photographic composition (e.g., rule of \
thirds, leading lines, low angle shot, wide-angle, close-up, medium shot, subject distance, pose, \
expression, dynamic action, serene stillness, scene elements, background blur/bokeh, symmetrical \
composition), and the intended mood/purpose of the image (e.g., dramatic portrait, serene \
landscape, bustling street photography, product photography, candid moment).

Also, consider aspects a professional photographer would think about: the subject's interaction \
with the environment, the story the image tells, and subtle details.

Crucially, do not explicitly mention 'draft image', 'user's request', 'visual style', or \
'modification' in the final prompt. Focus solely on describing the desired final outcome as if you \
are giving a direct instruction to an image generation AI. Keep the prompt concise but extremely \
descriptive. The prompt should start with the core subject/scene and then elaborate on all the \
photographic details."
    )
}

pub struct GeminiOptimizer {
    api_base: String,
    api_key: Option<String>,
    http: HttpClient,
}

impl GeminiOptimizer {
    pub fn new() -> Self {
        Self {
            api_base: api_base_from_env(&["GEMINI_API_BASE"]),
            api_key: first_non_empty_env(&["GEMINI_API_KEY", "GOOGLE_API_KEY"]),
            http: HttpClient::new(),
        }
    }

    pub fn with_client(api_base: &str, api_key: Option<String>, http: HttpClient) -> Self {
        Self {
            api_base: api_base.trim().trim_end_matches('/').to_string(),
            api_key,
            http,
        }
    }

    pub fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim().trim_start_matches("models/");
        format!("{}/models/{}:generateContent", self.api_base, trimmed)
    }

    pub fn build_payload(instruction: &str, image: &DraftImage) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": [
                    { "text": instruction },
                    {
                        "inlineData": {
                            "mimeType": DRAFT_MIME_TYPE,
                            "data": image.base64_payload(),
                        }
                    }
                ]
            }]
        })
    }

    /// `candidates[0].content.parts[0].text`, returned exactly as sent.
    pub fn extract_candidate_text(payload: &Value) -> Result<String, PromptOptimizationError> {
        payload
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|rows| rows.first())
            .and_then(|candidate| candidate.get("content"))
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .and_then(|parts| parts.first())
            .and_then(|part| part.get("text"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(PromptOptimizationError::NoCandidate)
    }
}

impl Default for GeminiOptimizer {
    fn default() -> Self {
        Self::new()
    }
}

impl NamedProvider for GeminiOptimizer {
    fn name(&self) -> &str {
        "gemini"
    }
}

impl PromptOptimizer for GeminiOptimizer {
    fn optimize(&self, request: &OptimizeRequest) -> Result<String, PromptOptimizationError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(PromptOptimizationError::MissingCredential)?;
        let endpoint = self.endpoint_for_model(&request.model);
        let payload = Self::build_payload(&optimization_instruction(&request.prompt), &request.image);
        let response = post_json(&self.http, &endpoint, api_key, &payload)?;
        Self::extract_candidate_text(&response)
    }
}

/// Offline optimizer that expands the prompt with fixed photographic detail.
pub struct DryrunOptimizer;

impl NamedProvider for DryrunOptimizer {
    fn name(&self) -> &str {
        "dryrun"
    }
}

impl PromptOptimizer for DryrunOptimizer {
    fn optimize(&self, request: &OptimizeRequest) -> Result<String, PromptOptimizationError> {
        let subject = request.prompt.trim().trim_end_matches('.');
        if subject.is_empty() {
            return Err(PromptOptimizationError::NoCandidate);
        }
        Ok(format!(
            "{subject}, photographed with an 85mm f/1.4 prime lens at f/2.0, 1/500s, ISO 200, \
daylight white balance; soft golden-hour side light with a gentle rim on the subject; \
medium shot composed on the rule of thirds with creamy background bokeh; cinematic, \
naturally graded colour and fine texture detail."
        ))
    }
}

#[cfg(test)]
mod tests {
    use lensmind_contracts::session::DraftImage;
    use serde_json::{json, Value};

    use super::{
        optimization_instruction, DryrunOptimizer, GeminiOptimizer, OptimizeRequest,
        PromptOptimizationError, PromptOptimizer,
    };
    use crate::http::test_server::{local_client, serve_once};

    fn request(prompt: &str) -> OptimizeRequest {
        OptimizeRequest {
            prompt: prompt.to_string(),
            image: DraftImage::from_base64_png("Zm94"),
            model: "gemini-2.0-flash".to_string(),
        }
    }

    #[test]
    fn instruction_interpolates_prompt_and_forbids_process_words() {
        let instruction = optimization_instruction("make it nighttime");
        assert!(instruction.starts_with("Based on the most recent user request: 'make it nighttime'"));
        assert!(instruction.contains("high-quality output using Gemini AI.\n\nInclude specific camera"));
        assert!(instruction.contains("85mm f/1.4 prime lens"));
        assert!(instruction.contains("golden hour"));
        assert!(instruction.contains("rule of thirds"));
        assert!(instruction.contains(
            "do not explicitly mention 'draft image', 'user's request', 'visual style', or 'modification'"
        ));
    }

    #[test]
    fn payload_is_a_single_user_turn_with_inline_png() {
        let image = DraftImage::from_base64_png("Zm94");
        let payload = GeminiOptimizer::build_payload("describe", &image);
        assert_eq!(
            payload,
            json!({
                "contents": [{
                    "role": "user",
                    "parts": [
                        { "text": "describe" },
                        { "inlineData": { "mimeType": "image/png", "data": "Zm94" } }
                    ]
                }]
            })
        );
    }

    #[test]
    fn candidate_text_is_not_trimmed() -> anyhow::Result<()> {
        let payload = json!({
            "candidates": [{ "content": { "parts": [{ "text": " T\n" }] } }]
        });
        assert_eq!(GeminiOptimizer::extract_candidate_text(&payload)?, " T\n");
        Ok(())
    }

    #[test]
    fn missing_candidates_or_parts_are_no_candidate() {
        for payload in [
            json!({}),
            json!({ "candidates": [] }),
            json!({ "candidates": [{ "finishReason": "SAFETY" }] }),
            json!({ "candidates": [{ "content": { "parts": [] } }] }),
            json!({ "candidates": [{ "content": { "parts": [{ "inlineData": {} }] } }] }),
        ] {
            assert_eq!(
                GeminiOptimizer::extract_candidate_text(&payload),
                Err(PromptOptimizationError::NoCandidate)
            );
        }
    }

    #[test]
    fn user_messages_follow_error_kind() {
        assert_eq!(
            PromptOptimizationError::NoCandidate.user_message(),
            "Could not generate an optimized prompt. Please try again."
        );
        assert_eq!(
            PromptOptimizationError::Transport("connection refused".to_string()).user_message(),
            "Failed to generate prompt: LLM generation failed: connection refused. Please try again."
        );
    }

    #[test]
    fn optimize_posts_instruction_and_image() -> anyhow::Result<()> {
        let (base, captured) = serve_once(
            200,
            "OK",
            r#"{"candidates":[{"content":{"parts":[{"text":"A fox..."}],"role":"model"}}]}"#,
        )?;
        let optimizer =
            GeminiOptimizer::with_client(&base, Some("test-key".to_string()), local_client()?);
        let text = optimizer.optimize(&request("a red fox in snow"))?;
        assert_eq!(text, "A fox...");

        let seen = captured.recv()?;
        assert!(seen
            .request_line
            .starts_with("POST /models/gemini-2.0-flash:generateContent?key=test-key"));
        let body: Value = serde_json::from_str(&seen.body)?;
        let parts = &body["contents"][0]["parts"];
        assert!(parts[0]["text"]
            .as_str()
            .unwrap_or("")
            .contains("'a red fox in snow'"));
        assert_eq!(parts[1]["inlineData"]["data"], json!("Zm94"));
        Ok(())
    }

    #[test]
    fn optimize_maps_status_failures() -> anyhow::Result<()> {
        let (base, _captured) = serve_once(500, "Internal Server Error", "{}")?;
        let optimizer =
            GeminiOptimizer::with_client(&base, Some("test-key".to_string()), local_client()?);
        let err = optimizer.optimize(&request("fox")).unwrap_err();
        assert_eq!(
            err,
            PromptOptimizationError::Status {
                status: 500,
                message: "Internal Server Error".to_string(),
            }
        );
        Ok(())
    }

    #[test]
    fn dryrun_optimizer_starts_with_subject() -> anyhow::Result<()> {
        let text = DryrunOptimizer.optimize(&request("A red fox in snow."))?;
        assert!(text.starts_with("A red fox in snow, photographed"));
        assert_eq!(
            DryrunOptimizer.optimize(&request("  ")),
            Err(PromptOptimizationError::NoCandidate)
        );
        Ok(())
    }
}
