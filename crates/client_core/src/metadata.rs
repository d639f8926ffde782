use async_trait::async_trait;
use reqwest::Client;
use shared::{
    domain::{ContentId, Mutez, PerMille},
    error::{ApiError, ApiException},
    protocol::{
        string_to_byte_string, tags_from_string, CaptureSettings, GenerativeTokenMetadata,
        MetadataResponse, MintGenerativeCall,
    },
};
use tracing::{info, warn};

use crate::error::UploadError;

const TOKEN_SYMBOL: &str = "FXGEN";
const METADATA_VERSION: &str = "0.2";
const DEFAULT_ROYALTIES_PERCENT: f64 = 10.0;

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn upload(&self, metadata: &GenerativeTokenMetadata) -> Result<ContentId, UploadError>;
}

pub struct MissingMetadataStore;

#[async_trait]
impl MetadataStore for MissingMetadataStore {
    async fn upload(&self, _metadata: &GenerativeTokenMetadata) -> Result<ContentId, UploadError> {
        Err(UploadError::Transport(
            "metadata storage is unavailable".to_string(),
        ))
    }
}

/// File API client: `POST {root}/metadata` pins the JSON document.
pub struct HttpMetadataStore {
    http: Client,
    file_api_root: String,
}

impl HttpMetadataStore {
    pub fn new(file_api_root: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            file_api_root: file_api_root.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl MetadataStore for HttpMetadataStore {
    async fn upload(&self, metadata: &GenerativeTokenMetadata) -> Result<ContentId, UploadError> {
        let response = self
            .http
            .post(format!("{}/metadata", self.file_api_root))
            .json(metadata)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let err = match serde_json::from_str::<ApiError>(&body) {
                Ok(api_error) => UploadError::from(ApiException::from(api_error)),
                Err(_) => UploadError::Transport(format!("file api answered {status}: {body}")),
            };
            warn!(name = %metadata.name, "metadata: upload rejected: {err}");
            return Err(err);
        }

        let parsed: MetadataResponse = serde_json::from_str(&body)
            .map_err(|err| UploadError::InvalidResponse(err.to_string()))?;
        if parsed.cid.is_empty() {
            return Err(UploadError::InvalidResponse("empty cid".to_string()));
        }
        info!(name = %metadata.name, cid = %parsed.cid, "metadata: uploaded");
        Ok(ContentId::new(parsed.cid))
    }
}

/// Values entered in the token information form.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenInformationForm {
    pub name: String,
    pub description: String,
    pub children_description: Option<String>,
    /// Comma separated.
    pub tags: String,
    pub editions: u64,
    pub enabled: bool,
    /// In tez.
    pub price: Option<f64>,
    /// In percent.
    pub royalties: Option<f64>,
}

/// Files pinned during the earlier upload and capture steps.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedAssets {
    pub cid_url_params: ContentId,
    pub cid_preview: ContentId,
    pub cid_thumbnail: ContentId,
    pub preview_hash: String,
    pub authenticity_hash: String,
    pub capture: CaptureSettings,
    pub settings: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MintDraft {
    pub form: TokenInformationForm,
    pub assets: CapturedAssets,
}

impl MintDraft {
    pub fn metadata(&self) -> GenerativeTokenMetadata {
        let form = &self.form;
        let assets = &self.assets;
        let generative_uri = assets.cid_url_params.ipfs_uri();
        GenerativeTokenMetadata {
            name: form.name.clone(),
            description: form.description.clone(),
            children_description: form
                .children_description
                .clone()
                .filter(|text| !text.trim().is_empty())
                .unwrap_or_else(|| form.description.clone()),
            tags: tags_from_string(&form.tags),
            artifact_uri: format!("{generative_uri}?fxhash={}", assets.preview_hash),
            display_uri: assets.cid_preview.ipfs_uri(),
            thumbnail_uri: assets.cid_thumbnail.ipfs_uri(),
            generative_uri,
            authenticity_hash: assets.authenticity_hash.clone(),
            preview_hash: assets.preview_hash.clone(),
            capture: assets.capture.normalized(),
            settings: assets.settings.clone(),
            symbol: TOKEN_SYMBOL.to_string(),
            decimals: 0,
            version: METADATA_VERSION.to_string(),
        }
    }

    /// Contract arguments once the metadata document is pinned at `metadata`.
    pub fn mint_call(&self, metadata: &ContentId) -> MintGenerativeCall {
        MintGenerativeCall {
            amount: self.form.editions,
            enabled: self.form.enabled,
            metadata: string_to_byte_string(&metadata.ipfs_uri()),
            price: Mutez::from_tez(self.form.price.unwrap_or(0.0)),
            royalties: PerMille::from_percent(
                self.form.royalties.unwrap_or(DEFAULT_ROYALTIES_PERCENT),
            ),
        }
    }
}

#[cfg(test)]
#[path = "tests/metadata_tests.rs"]
mod tests;
