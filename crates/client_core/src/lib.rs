//! Client side of the mint-to-reveal flow: wallet calls, metadata upload and
//! live tracking of the signing pipeline that assigns a minted token its
//! metadata.
//!
//! Everything runs as cooperative tasks on one tokio runtime; the console app
//! uses the current-thread flavor. No component shares a live call or
//! connection with another.

pub mod config;
pub mod error;
pub mod metadata;
pub mod orchestrator;
pub mod sequencer;
pub mod stream;
pub mod transaction;
pub mod transport;
pub mod types;
pub mod wallet;

pub use config::{load_settings, ClientSettings, PushTransport};
pub use error::{
    ConcurrentCallError, ContractCallError, FailureCause, MintFailure, MintIneligible,
    StreamError, TrackingCause, TrackingFailure, TransactionError, UploadError, WalletError,
};
pub use metadata::{
    CapturedAssets, HttpMetadataStore, MetadataStore, MintDraft, MissingMetadataStore,
    TokenInformationForm,
};
pub use orchestrator::{
    IterationMinter, MintRevealError, MintRevealOrchestrator, MintState, MintWorkflow,
    OrchestratorContext, RevealState, RevealWorkflow,
};
pub use sequencer::{StageSequencer, COMPLETE_POSITION};
pub use stream::{ProgressStreamClient, ReconnectPolicy, StreamHandle};
pub use transaction::{TransactionController, TransactionPhase, TransactionState};
pub use transport::{
    connector_from_settings, EventSourceConnector, FrameStream, MissingPushConnector,
    PushConnector, WebSocketConnector,
};
pub use types::{ProgressSnapshot, RevealedToken, StageUpdate, StreamStatus, TerminalOutcome};
pub use wallet::{ContractMethod, MissingWallet, Wallet, WalletProgress};

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;
