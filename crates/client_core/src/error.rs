use std::fmt;

use chrono::{DateTime, Utc};
use shared::{
    domain::{TokenHash, TransactionId},
    error::{ApiException, ErrorCode},
};
use thiserror::Error;

use crate::transaction::TransactionPhase;
use crate::wallet::ContractMethod;

/// Why a contract call ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCause {
    UserRejected,
    NetworkError,
    ContractRevert,
    Unknown,
}

impl FailureCause {
    /// Whether resubmitting the very same payload can succeed.
    pub fn retry_same_payload(self) -> bool {
        matches!(self, FailureCause::UserRejected | FailureCause::NetworkError)
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureCause::UserRejected => "rejected by user",
            FailureCause::NetworkError => "network error",
            FailureCause::ContractRevert => "contract rejected the operation",
            FailureCause::Unknown => "unknown error",
        };
        f.write_str(label)
    }
}

/// Failure reported by a wallet. The shape is owned by the wallet
/// implementation; only a code and a message are assumed.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct WalletError {
    pub code: Option<String>,
    pub message: String,
}

impl WalletError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// Best-effort mapping of wallet/node errors onto [`FailureCause`].
    pub fn classify(&self) -> FailureCause {
        let haystack = format!(
            "{} {}",
            self.code.as_deref().unwrap_or_default(),
            self.message
        )
        .to_ascii_lowercase();

        // Node-side rejections mention "rejected" too, so they go first.
        if haystack.contains("script_rejected")
            || haystack.contains("balance_too_low")
            || haystack.contains("insufficient")
            || haystack.contains("revert")
            || haystack.contains("failwith")
            || haystack.contains("runtime_error")
            || haystack.contains("michelson")
        {
            FailureCause::ContractRevert
        } else if haystack.contains("aborted")
            || haystack.contains("rejected")
            || haystack.contains("denied")
            || haystack.contains("not_granted")
            || haystack.contains("cancel")
        {
            FailureCause::UserRejected
        } else if haystack.contains("network")
            || haystack.contains("timeout")
            || haystack.contains("timed out")
            || haystack.contains("connection")
            || haystack.contains("unreachable")
            || haystack.contains("broadcast")
            || haystack.contains("rpc")
            || haystack.contains("503")
            || haystack.contains("502")
        {
            FailureCause::NetworkError
        } else {
            FailureCause::Unknown
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{cause}: {message}")]
pub struct ContractCallError {
    pub cause: FailureCause,
    pub message: String,
}

impl ContractCallError {
    pub fn new(cause: FailureCause, message: impl Into<String>) -> Self {
        Self {
            cause,
            message: message.into(),
        }
    }

    pub fn user_message(&self) -> String {
        match self.cause {
            FailureCause::UserRejected => "The operation was rejected in your wallet.".to_string(),
            FailureCause::NetworkError => {
                format!("The network could not be reached ({}); please retry.", self.message)
            }
            FailureCause::ContractRevert => {
                format!("The contract refused the operation: {}", self.message)
            }
            FailureCause::Unknown => format!("The operation failed: {}", self.message),
        }
    }
}

impl From<WalletError> for ContractCallError {
    fn from(err: WalletError) -> Self {
        Self {
            cause: err.classify(),
            message: err.message,
        }
    }
}

/// `submit` was called while another call of the same controller was live.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("a {method} call is already in flight ({phase:?})")]
pub struct ConcurrentCallError {
    pub method: ContractMethod,
    pub phase: TransactionPhase,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransactionError {
    #[error(transparent)]
    ConcurrentCall(#[from] ConcurrentCallError),
    #[error(transparent)]
    Failed(#[from] ContractCallError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadError {
    #[error("file api rejected metadata ({code:?}): {message}")]
    Rejected { code: ErrorCode, message: String },
    #[error("metadata upload failed: {0}")]
    Transport(String),
    #[error("unexpected metadata upload response: {0}")]
    InvalidResponse(String),
}

impl From<ApiException> for UploadError {
    fn from(value: ApiException) -> Self {
        UploadError::Rejected {
            code: value.code,
            message: value.message,
        }
    }
}

impl From<reqwest::Error> for UploadError {
    fn from(value: reqwest::Error) -> Self {
        UploadError::Transport(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("malformed progress frame: {0}")]
    Parse(String),
    #[error("signing server reported an error: {0}")]
    Terminal(String),
    #[error("push channel unreachable after {attempts} reconnection attempts: {last_error}")]
    ReconnectBudgetExhausted { attempts: u32, last_error: String },
}

impl From<serde_json::Error> for StreamError {
    fn from(value: serde_json::Error) -> Self {
        StreamError::Parse(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MintIneligible {
    #[error("token is hidden or sold out")]
    Hidden,
    #[error("token is locked until {0}")]
    Locked(DateTime<Utc>),
    #[error("token is disabled by its author")]
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MintFailure {
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error(transparent)]
    Contract(#[from] ContractCallError),
    #[error(transparent)]
    ConcurrentCall(#[from] ConcurrentCallError),
    #[error("mint is already in progress")]
    Busy,
    #[error("token was already minted in operation {0}")]
    AlreadyMinted(TransactionId),
    #[error(transparent)]
    Ineligible(#[from] MintIneligible),
    #[error("mint was abandoned before completion")]
    Abandoned,
}

impl From<TransactionError> for MintFailure {
    fn from(value: TransactionError) -> Self {
        match value {
            TransactionError::ConcurrentCall(err) => MintFailure::ConcurrentCall(err),
            TransactionError::Failed(err) => MintFailure::Contract(err),
        }
    }
}

impl MintFailure {
    pub fn user_message(&self) -> String {
        match self {
            MintFailure::Upload(err) => format!("Could not store token metadata: {err}"),
            MintFailure::Contract(err) => err.user_message(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackingCause {
    #[error(transparent)]
    StreamTerminal(#[from] StreamError),
    #[error("signing succeeded but the final data is missing: {}", .0.join(", "))]
    MissingTerminalData(Vec<&'static str>),
    #[error("progress stream ended without a terminal outcome")]
    SessionEnded,
    #[error("a reveal is already being tracked")]
    AlreadyTracking,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("reveal of {identity} failed: {cause}")]
pub struct TrackingFailure {
    pub identity: TokenHash,
    pub cause: TrackingCause,
}

impl TrackingFailure {
    pub fn new(identity: TokenHash, cause: impl Into<TrackingCause>) -> Self {
        Self {
            identity,
            cause: cause.into(),
        }
    }

    /// The signing pipeline may have moved on without this client seeing it;
    /// a hard refresh re-reads its state from scratch.
    pub fn recommend_refresh(&self) -> bool {
        !matches!(self.cause, TrackingCause::AlreadyTracking)
    }
}
