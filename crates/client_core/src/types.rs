use chrono::{DateTime, Utc};
use shared::{
    domain::{ContentId, TokenHash},
    protocol::{SigningData, SigningFrame, StageExtra, StageId, TokenFeature},
};

use crate::error::StreamError;

#[derive(Debug, Clone, PartialEq)]
pub enum TerminalOutcome {
    Pending,
    Success(SigningData),
    Error(StreamError),
}

impl TerminalOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TerminalOutcome::Pending)
    }
}

/// Latest known state of the signing pipeline for one token.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub stage: StageId,
    pub extra: Option<StageExtra>,
    pub outcome: TerminalOutcome,
    pub received_at: DateTime<Utc>,
}

impl ProgressSnapshot {
    pub fn parse(raw: &str) -> Result<Self, StreamError> {
        let frame = SigningFrame::parse(raw)?;
        Ok(Self::from_frame(frame))
    }

    pub fn from_frame(frame: SigningFrame) -> Self {
        let outcome = if let Some(error) = frame.error {
            TerminalOutcome::Error(StreamError::Terminal(error.message()))
        } else if frame.state == StageId::Signed {
            TerminalOutcome::Success(frame.data.unwrap_or_default())
        } else {
            TerminalOutcome::Pending
        };
        Self {
            stage: frame.state,
            extra: frame.extra,
            outcome,
            received_at: Utc::now(),
        }
    }

    pub fn pending(stage: StageId) -> Self {
        Self {
            stage,
            extra: None,
            outcome: TerminalOutcome::Pending,
            received_at: Utc::now(),
        }
    }

    pub fn queue_position(&self) -> Option<u32> {
        self.extra.as_ref().and_then(|extra| extra.position)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamStatus {
    #[default]
    Closed,
    Connecting,
    Open,
    Errored,
}

/// A snapshot the sequencer let through, with the progress position it
/// renders at.
#[derive(Debug, Clone, PartialEq)]
pub struct StageUpdate {
    pub position: u32,
    pub snapshot: ProgressSnapshot,
}

/// A token whose metadata has been assigned and signed.
#[derive(Debug, Clone, PartialEq)]
pub struct RevealedToken {
    pub identity: TokenHash,
    pub generative: ContentId,
    pub preview: ContentId,
    pub features: Vec<TokenFeature>,
}

impl RevealedToken {
    /// Builds the reveal from a success payload, listing the fields the
    /// signing server left out.
    pub fn from_signing(
        identity: TokenHash,
        data: &SigningData,
    ) -> Result<Self, Vec<&'static str>> {
        let generative = data.cid_generative.as_deref().filter(|cid| !cid.is_empty());
        let preview = data.cid_preview.as_deref().filter(|cid| !cid.is_empty());
        match (generative, preview) {
            (Some(generative), Some(preview)) => Ok(Self {
                identity,
                generative: ContentId::new(generative),
                preview: ContentId::new(preview),
                features: data.features.clone().unwrap_or_default(),
            }),
            (generative, preview) => {
                let mut missing = Vec::new();
                if generative.is_none() {
                    missing.push("cidGenerative");
                }
                if preview.is_none() {
                    missing.push("cidPreview");
                }
                Err(missing)
            }
        }
    }

    pub fn generative_uri(&self) -> String {
        self.generative.ipfs_uri()
    }

    pub fn preview_uri(&self) -> String {
        self.preview.ipfs_uri()
    }

    /// Older tokens do not embed the hash in their generative URI, so it is
    /// appended as the `fxhash` query parameter.
    pub fn view_uri(&self) -> String {
        let uri = self.generative_uri();
        if uri.contains("fxhash") {
            uri
        } else {
            format!("{uri}?fxhash={}", self.identity)
        }
    }
}
