use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

pub const DRAFT_MIME_TYPE: &str = "image/png";

/// Displayable reference to a draft image, kept as a `data:` URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DraftImage {
    data_url: String,
}

impl DraftImage {
    pub fn from_base64_png(payload: &str) -> Self {
        Self {
            data_url: format!("data:{DRAFT_MIME_TYPE};base64,{payload}"),
        }
    }

    pub fn from_png_bytes(bytes: &[u8]) -> Self {
        Self::from_base64_png(&BASE64.encode(bytes))
    }

    pub fn data_url(&self) -> &str {
        &self.data_url
    }

    /// Everything after the first comma, which is what the multimodal
    /// endpoint expects as inline data.
    pub fn base64_payload(&self) -> &str {
        self.data_url
            .split_once(',')
            .map(|(_, payload)| payload)
            .unwrap_or("")
    }

    pub fn mime_type(&self) -> &str {
        self.data_url
            .strip_prefix("data:")
            .and_then(|rest| rest.split_once(';'))
            .map(|(mime, _)| mime)
            .unwrap_or(DRAFT_MIME_TYPE)
    }

    pub fn decode_bytes(&self) -> anyhow::Result<Vec<u8>> {
        BASE64
            .decode(self.base64_payload().as_bytes())
            .map_err(|err| anyhow::anyhow!("draft image payload is not valid base64: {err}"))
    }
}
