use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{ImageFormat, Rgb, RgbImage};
use lensmind_contracts::providers::NamedProvider;
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::http::{api_base_from_env, first_non_empty_env, post_json, HttpFailure};

const DRYRUN_DRAFT_SIZE: u32 = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageGenerationError {
    #[error("Image generation failed: no API key configured (set IMAGEN_API_KEY, GEMINI_API_KEY or GOOGLE_API_KEY)")]
    MissingCredential,
    #[error("Image generation failed: no provider registered for '{0}'")]
    ProviderUnavailable(String),
    #[error("Image generation failed: {0}")]
    Transport(String),
    #[error("Image generation failed: {message}")]
    Status { status: u16, message: String },
    #[error("Image generation failed: {0}")]
    InvalidResponse(String),
    #[error("Image generation failed: no image was produced")]
    NoImage,
}

impl ImageGenerationError {
    pub fn kind(&self) -> &'static str {
        match self {
            ImageGenerationError::MissingCredential => "missing_credential",
            ImageGenerationError::ProviderUnavailable(_) => "provider_unavailable",
            ImageGenerationError::Transport(_) => "transport",
            ImageGenerationError::Status { .. } => "status",
            ImageGenerationError::InvalidResponse(_) => "invalid_response",
            ImageGenerationError::NoImage => "no_image",
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            ImageGenerationError::NoImage => {
                "Could not generate a draft image. Please try again.".to_string()
            }
            other => format!("Failed to generate image: {other}. Please try again."),
        }
    }
}

impl From<HttpFailure> for ImageGenerationError {
    fn from(failure: HttpFailure) -> Self {
        match failure {
            HttpFailure::Transport(message) => ImageGenerationError::Transport(message),
            HttpFailure::Status { status, message } => {
                ImageGenerationError::Status { status, message }
            }
            HttpFailure::InvalidJson(message) => ImageGenerationError::InvalidResponse(message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftRequest {
    pub prompt: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DraftResponse {
    pub image_base64: String,
    pub mime_type: Option<String>,
    pub provider_request: Map<String, Value>,
}

/// Turns a text prompt into exactly one draft image.
pub trait DraftProvider: NamedProvider + Send + Sync {
    fn generate(&self, request: &DraftRequest) -> Result<DraftResponse, ImageGenerationError>;
}

pub struct ImagenProvider {
    api_base: String,
    api_key: Option<String>,
    http: HttpClient,
}

impl ImagenProvider {
    pub fn new() -> Self {
        Self {
            api_base: api_base_from_env(&["IMAGEN_API_BASE", "GEMINI_API_BASE"]),
            api_key: first_non_empty_env(&["IMAGEN_API_KEY", "GEMINI_API_KEY", "GOOGLE_API_KEY"]),
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
        format!("{}/models/{}:predict", self.api_base, trimmed)
    }

    pub fn build_payload(prompt: &str) -> Value {
        json!({
            "instances": { "prompt": prompt },
            "parameters": { "sampleCount": 1 },
        })
    }

    /// First prediction's base64 payload. A missing or empty prediction
    /// list is `NoImage`, not a transport failure.
    pub fn extract_first_prediction(
        payload: &Value,
    ) -> Result<(String, Option<String>), ImageGenerationError> {
        let first = payload
            .get("predictions")
            .and_then(Value::as_array)
            .and_then(|rows| rows.first())
            .ok_or(ImageGenerationError::NoImage)?;
        let encoded = first
            .get("bytesBase64Encoded")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or(ImageGenerationError::NoImage)?;
        BASE64.decode(encoded.as_bytes()).map_err(|err| {
            ImageGenerationError::InvalidResponse(format!("prediction is not valid base64: {err}"))
        })?;
        let mime_type = first
            .get("mimeType")
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok((encoded.to_string(), mime_type))
    }
}

impl Default for ImagenProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl NamedProvider for ImagenProvider {
    fn name(&self) -> &str {
        "imagen"
    }
}

impl DraftProvider for ImagenProvider {
    fn generate(&self, request: &DraftRequest) -> Result<DraftResponse, ImageGenerationError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(ImageGenerationError::MissingCredential)?;
        let endpoint = self.endpoint_for_model(&request.model);
        let payload = Self::build_payload(&request.prompt);
        let response = post_json(&self.http, &endpoint, api_key, &payload)?;
        let (image_base64, mime_type) = Self::extract_first_prediction(&response)?;

        let mut provider_request = Map::new();
        provider_request.insert("endpoint".to_string(), Value::String(endpoint));
        provider_request.insert("payload".to_string(), payload);
        Ok(DraftResponse {
            image_base64,
            mime_type,
            provider_request,
        })
    }
}

/// Offline provider: a solid swatch whose colour is derived from the prompt.
pub struct DryrunDraftProvider;

impl NamedProvider for DryrunDraftProvider {
    fn name(&self) -> &str {
        "dryrun"
    }
}

impl DraftProvider for DryrunDraftProvider {
    fn generate(&self, request: &DraftRequest) -> Result<DraftResponse, ImageGenerationError> {
        let (r, g, b) = color_from_prompt(&request.prompt);
        let mut image = RgbImage::new(DRYRUN_DRAFT_SIZE, DRYRUN_DRAFT_SIZE);
        for pixel in image.pixels_mut() {
            *pixel = Rgb([r, g, b]);
        }
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|err| {
                ImageGenerationError::InvalidResponse(format!("dryrun encode failed: {err}"))
            })?;

        let mut provider_request = Map::new();
        provider_request.insert(
            "endpoint".to_string(),
            Value::String("dryrun-native".to_string()),
        );
        provider_request.insert(
            "payload".to_string(),
            ImagenProvider::build_payload(&request.prompt),
        );
        Ok(DraftResponse {
            image_base64: BASE64.encode(bytes),
            mime_type: Some("image/png".to_string()),
            provider_request,
        })
    }
}

fn color_from_prompt(prompt: &str) -> (u8, u8, u8) {
    let digest = Sha256::digest(prompt.as_bytes());
    (digest[0], digest[1], digest[2])
}
