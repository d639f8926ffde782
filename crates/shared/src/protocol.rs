use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::{IssuerId, Mutez, PerMille};

/// Stage reported by the signing server for one token.
///
/// The set is closed on the client side but the server may add stages
/// without notice; those deserialize into [`StageId::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StageId {
    #[default]
    None,
    NotFound,
    Queued,
    GeneratingMetadata,
    MetadataGenerated,
    CallingContract,
    Signed,
    Other(String),
}

impl StageId {
    pub const KNOWN: [StageId; 7] = [
        StageId::None,
        StageId::NotFound,
        StageId::Queued,
        StageId::GeneratingMetadata,
        StageId::MetadataGenerated,
        StageId::CallingContract,
        StageId::Signed,
    ];

    pub fn as_wire(&self) -> &str {
        match self {
            StageId::None => "NONE",
            StageId::NotFound => "NOT_FOUND",
            StageId::Queued => "QUEUED",
            StageId::GeneratingMetadata => "GENERATING_METADATA",
            StageId::MetadataGenerated => "METADATA_GENERATED",
            StageId::CallingContract => "CALLING_CONTRACT",
            StageId::Signed => "SIGNED",
            StageId::Other(raw) => raw,
        }
    }
}

impl From<String> for StageId {
    fn from(raw: String) -> Self {
        let normalized = raw.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "" | "NONE" => StageId::None,
            "NOT_FOUND" => StageId::NotFound,
            "QUEUED" => StageId::Queued,
            "GENERATING_METADATA" => StageId::GeneratingMetadata,
            "METADATA_GENERATED" => StageId::MetadataGenerated,
            "CALLING_CONTRACT" | "SUBMITTING_TO_CHAIN" => StageId::CallingContract,
            "SIGNED" => StageId::Signed,
            _ => StageId::Other(raw),
        }
    }
}

impl From<StageId> for String {
    fn from(stage: StageId) -> Self {
        match stage {
            StageId::Other(raw) => raw,
            known => known.as_wire().to_string(),
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageExtra {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u32>,
    #[serde(flatten)]
    pub other: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenFeature {
    pub name: String,
    pub value: serde_json::Value,
}

/// Payload of the terminal `SIGNED` frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningData {
    #[serde(
        default,
        alias = "contentLocatorA",
        skip_serializing_if = "Option::is_none"
    )]
    pub cid_generative: Option<String>,
    #[serde(
        default,
        alias = "contentLocatorB",
        skip_serializing_if = "Option::is_none"
    )]
    pub cid_preview: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<Vec<TokenFeature>>,
}

/// The signing server does not commit to an error schema; anything under
/// `error` is kept so the frame still ends the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FrameError {
    Text(String),
    Detailed {
        #[serde(default)]
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
    Other(serde_json::Value),
}

impl FrameError {
    pub fn message(&self) -> String {
        match self {
            FrameError::Text(message) => message.clone(),
            FrameError::Detailed { message, .. } if !message.is_empty() => message.clone(),
            FrameError::Detailed {
                code: Some(code), ..
            } => code.clone(),
            FrameError::Detailed { .. } => "unspecified signing error".to_string(),
            FrameError::Other(value) => value.to_string(),
        }
    }
}

/// One frame pushed by the mint feedback channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SigningFrame {
    #[serde(default)]
    pub state: StageId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<StageExtra>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<SigningData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FrameError>,
}

impl SigningFrame {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaptureMode {
    Canvas,
    Viewport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaptureTriggerMode {
    Delay,
    FnTrigger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub x: u32,
    pub y: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSettings {
    pub mode: CaptureMode,
    pub trigger_mode: CaptureTriggerMode,
    #[serde(default)]
    pub gpu: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canvas_selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,
}

impl CaptureSettings {
    /// Keeps only the fields the chosen modes read: `resolution` for
    /// viewport captures, `canvas_selector` for canvas captures and `delay`
    /// for delayed triggers.
    pub fn normalized(&self) -> Self {
        Self {
            mode: self.mode,
            trigger_mode: self.trigger_mode,
            gpu: self.gpu,
            resolution: self
                .resolution
                .filter(|_| self.mode == CaptureMode::Viewport),
            canvas_selector: self
                .canvas_selector
                .clone()
                .filter(|_| self.mode == CaptureMode::Canvas),
            delay: self
                .delay
                .filter(|_| self.trigger_mode == CaptureTriggerMode::Delay),
        }
    }
}

/// Metadata document uploaded to the file API before a generative token is
/// published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerativeTokenMetadata {
    pub name: String,
    pub description: String,
    pub children_description: String,
    pub tags: Vec<String>,
    pub artifact_uri: String,
    pub display_uri: String,
    pub thumbnail_uri: String,
    pub generative_uri: String,
    pub authenticity_hash: String,
    pub preview_hash: String,
    pub capture: CaptureSettings,
    pub settings: Option<serde_json::Value>,
    pub symbol: String,
    pub decimals: u8,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataResponse {
    pub cid: String,
}

/// Arguments of the `mint_issuer` entrypoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintGenerativeCall {
    pub amount: u64,
    pub enabled: bool,
    /// Hex encoded bytes of the `ipfs://` metadata URI.
    pub metadata: String,
    pub price: Mutez,
    pub royalties: PerMille,
}

/// Arguments of the `mint` entrypoint, collecting one iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintCall {
    pub issuer_id: IssuerId,
    pub price: Mutez,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateGenerativeCall {
    pub issuer_id: IssuerId,
    pub price: Mutez,
    pub royalties: PerMille,
    pub enabled: bool,
}

/// Tezos `bytes` literal for a UTF-8 string.
pub fn string_to_byte_string(value: &str) -> String {
    value.bytes().map(|byte| format!("{byte:02x}")).collect()
}

pub fn tags_from_string(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}
