//! Fakes for the wallet, file API and push channel shared by the unit tests.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::StreamExt;
use shared::{
    domain::{
        ContentId, GenTokFlag, GenerativeTokenListing, IssuerId, Mutez, TokenHash, TransactionId,
        UserId, UserSummary,
    },
    protocol::{CaptureMode, CaptureSettings, CaptureTriggerMode, GenerativeTokenMetadata, Resolution},
};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::{
    error::{UploadError, WalletError},
    metadata::{CapturedAssets, MetadataStore, MintDraft, TokenInformationForm},
    stream::ReconnectPolicy,
    transport::{FrameStream, PushConnector},
    wallet::{ContractMethod, Wallet, WalletProgress},
};

pub(crate) type WalletReply = Result<TransactionId, WalletError>;

pub(crate) enum WalletScript {
    /// Reports the broadcast, then confirms.
    Confirm(&'static str),
    /// Confirms without reporting the broadcast first.
    ConfirmSilently(&'static str),
    Fail(WalletError),
    /// Optionally reports a broadcast, then waits for the test to answer.
    Hold {
        broadcast: Option<&'static str>,
        reply: oneshot::Receiver<WalletReply>,
    },
}

pub(crate) struct ScriptedWallet {
    script: Mutex<VecDeque<WalletScript>>,
    calls: Mutex<Vec<(ContractMethod, serde_json::Value)>>,
}

impl ScriptedWallet {
    pub(crate) fn new(script: Vec<WalletScript>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }

    pub(crate) fn calls(&self) -> Vec<(ContractMethod, serde_json::Value)> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl Wallet for ScriptedWallet {
    async fn call(
        &self,
        method: ContractMethod,
        arguments: serde_json::Value,
        progress: WalletProgress,
    ) -> Result<TransactionId, WalletError> {
        self.calls
            .lock()
            .expect("calls lock")
            .push((method, arguments));
        let step = self.script.lock().expect("script lock").pop_front();
        match step {
            Some(WalletScript::Confirm(hash)) => {
                let transaction = TransactionId::new(hash);
                progress.submitted(&transaction);
                Ok(transaction)
            }
            Some(WalletScript::ConfirmSilently(hash)) => Ok(TransactionId::new(hash)),
            Some(WalletScript::Fail(err)) => Err(err),
            Some(WalletScript::Hold { broadcast, reply }) => {
                if let Some(hash) = broadcast {
                    progress.submitted(&TransactionId::new(hash));
                }
                reply
                    .await
                    .unwrap_or_else(|_| Err(WalletError::new("test dropped the reply")))
            }
            None => Err(WalletError::new("unscripted wallet call")),
        }
    }
}

pub(crate) struct ScriptedMetadataStore {
    reply: Result<ContentId, UploadError>,
    uploads: Mutex<Vec<GenerativeTokenMetadata>>,
}

impl ScriptedMetadataStore {
    pub(crate) fn ok(cid: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(ContentId::new(cid)),
            uploads: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn failing(err: UploadError) -> Arc<Self> {
        Arc::new(Self {
            reply: Err(err),
            uploads: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn uploads(&self) -> Vec<GenerativeTokenMetadata> {
        self.uploads.lock().expect("uploads lock").clone()
    }
}

#[async_trait]
impl MetadataStore for ScriptedMetadataStore {
    async fn upload(&self, metadata: &GenerativeTokenMetadata) -> Result<ContentId, UploadError> {
        self.uploads
            .lock()
            .expect("uploads lock")
            .push(metadata.clone());
        self.reply.clone()
    }
}

enum ScriptedConnection {
    Frames(mpsc::UnboundedReceiver<Result<String>>),
    Refuse(String),
}

/// Push connector whose connections are fed by the test.
#[derive(Default)]
pub(crate) struct ChannelConnector {
    connections: Mutex<VecDeque<ScriptedConnection>>,
    identities: Mutex<Vec<TokenHash>>,
}

impl ChannelConnector {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queues a connection; dropping the returned sender closes it.
    pub(crate) fn open(&self) -> mpsc::UnboundedSender<Result<String>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections
            .lock()
            .expect("connections lock")
            .push_back(ScriptedConnection::Frames(rx));
        tx
    }

    pub(crate) fn refuse(&self, reason: &str) {
        self.connections
            .lock()
            .expect("connections lock")
            .push_back(ScriptedConnection::Refuse(reason.to_string()));
    }

    pub(crate) fn connect_count(&self) -> usize {
        self.identities.lock().expect("identities lock").len()
    }

    pub(crate) fn identities(&self) -> Vec<TokenHash> {
        self.identities.lock().expect("identities lock").clone()
    }
}

#[async_trait]
impl PushConnector for ChannelConnector {
    async fn connect(&self, identity: &TokenHash) -> Result<FrameStream> {
        self.identities
            .lock()
            .expect("identities lock")
            .push(identity.clone());
        let next = self.connections.lock().expect("connections lock").pop_front();
        match next {
            Some(ScriptedConnection::Frames(rx)) => Ok(UnboundedReceiverStream::new(rx).boxed()),
            Some(ScriptedConnection::Refuse(reason)) => Err(anyhow!(reason)),
            None => Err(anyhow!("connection refused")),
        }
    }
}

pub(crate) fn send_frame(tx: &mpsc::UnboundedSender<Result<String>>, frame: serde_json::Value) {
    tx.send(Ok(frame.to_string())).expect("session listening");
}

pub(crate) fn fast_reconnect(max_attempts: u32) -> ReconnectPolicy {
    ReconnectPolicy {
        max_attempts,
        base_delay: Duration::from_millis(1),
    }
}

pub(crate) fn draft() -> MintDraft {
    MintDraft {
        form: TokenInformationForm {
            name: "Orbitals".into(),
            description: "Concentric noise fields".into(),
            children_description: None,
            tags: "noise, orbit".into(),
            editions: 250,
            enabled: true,
            price: Some(2.5),
            royalties: Some(12.5),
        },
        assets: CapturedAssets {
            cid_url_params: ContentId::new("QmParams"),
            cid_preview: ContentId::new("QmPreview"),
            cid_thumbnail: ContentId::new("QmThumb"),
            preview_hash: "ooPreviewHash".into(),
            authenticity_hash: "authHash".into(),
            capture: CaptureSettings {
                mode: CaptureMode::Viewport,
                trigger_mode: CaptureTriggerMode::Delay,
                gpu: false,
                resolution: Some(Resolution { x: 1024, y: 1024 }),
                canvas_selector: None,
                delay: Some(2000),
            },
            settings: None,
        },
    }
}

pub(crate) fn listing() -> GenerativeTokenListing {
    GenerativeTokenListing {
        id: IssuerId(42),
        name: "Orbitals".into(),
        author: UserSummary {
            id: UserId(7),
            name: Some("artist".into()),
        },
        price: Mutez(2_500_000),
        balance: 10,
        enabled: true,
        flag: GenTokFlag::Clean,
        lock_end: Utc.with_ymd_and_hms(2021, 11, 1, 0, 0, 0).single().expect("date"),
    }
}
