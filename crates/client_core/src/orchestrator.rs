//! Mint and reveal workflows built from the transaction controller and the
//! progress stream client.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use shared::{
    domain::{ContentId, GenerativeTokenListing, TokenHash, TransactionId, UserSummary},
    protocol::{MintCall, MintGenerativeCall, UpdateGenerativeCall},
};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::{
    error::{MintFailure, MintIneligible, TrackingCause, TrackingFailure},
    metadata::{MetadataStore, MintDraft},
    sequencer::StageSequencer,
    stream::{ProgressStreamClient, ReconnectPolicy},
    transaction::TransactionController,
    transport::PushConnector,
    types::{ProgressSnapshot, RevealedToken, TerminalOutcome},
    wallet::{ContractMethod, Wallet},
};

/// Collaborators handed to the orchestrator instead of ambient globals.
#[derive(Clone)]
pub struct OrchestratorContext {
    pub wallet: Arc<dyn Wallet>,
    pub metadata: Arc<dyn MetadataStore>,
    pub push: Arc<dyn PushConnector>,
    pub reconnect: ReconnectPolicy,
    pub user: Option<UserSummary>,
}

pub struct MintRevealOrchestrator {
    ctx: OrchestratorContext,
    sequencer: Arc<StageSequencer>,
}

impl MintRevealOrchestrator {
    pub fn new(ctx: OrchestratorContext) -> Self {
        Self::with_sequencer(ctx, StageSequencer::default())
    }

    pub fn with_sequencer(ctx: OrchestratorContext, sequencer: StageSequencer) -> Self {
        Self {
            ctx,
            sequencer: Arc::new(sequencer),
        }
    }

    pub fn context(&self) -> &OrchestratorContext {
        &self.ctx
    }

    /// Publishing a generative token: upload metadata, then `mint_issuer`.
    pub fn mint_workflow(&self) -> MintWorkflow {
        MintWorkflow::new(
            Arc::clone(&self.ctx.metadata),
            TransactionController::new(Arc::clone(&self.ctx.wallet), ContractMethod::MintGenerative),
        )
    }

    pub fn iteration_minter(&self) -> IterationMinter {
        IterationMinter {
            controller: TransactionController::new(
                Arc::clone(&self.ctx.wallet),
                ContractMethod::Mint,
            ),
            user: self.ctx.user.clone(),
        }
    }

    pub fn token_editor(&self) -> TransactionController<UpdateGenerativeCall> {
        TransactionController::new(Arc::clone(&self.ctx.wallet), ContractMethod::UpdateGenerative)
    }

    pub fn reveal_workflow(&self) -> RevealWorkflow {
        RevealWorkflow::new(ProgressStreamClient::new(
            Arc::clone(&self.ctx.push),
            Arc::clone(&self.sequencer),
            self.ctx.reconnect,
        ))
    }

    /// Collects one iteration and follows it until revealed.
    pub async fn mint_and_reveal(
        &self,
        listing: &GenerativeTokenListing,
    ) -> Result<RevealedToken, MintRevealError> {
        let identity = self
            .iteration_minter()
            .mint(listing, Utc::now())
            .await?;
        let revealed = self.reveal_workflow().track(identity).await?;
        Ok(revealed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MintRevealError {
    #[error(transparent)]
    Mint(#[from] MintFailure),
    #[error(transparent)]
    Reveal(#[from] TrackingFailure),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MintState {
    Editing,
    UploadingMetadata,
    AwaitingMintConfirmation {
        metadata: ContentId,
    },
    Minted {
        metadata: ContentId,
        transaction: TransactionId,
    },
    Failed(MintFailure),
}

impl MintState {
    fn is_busy(&self) -> bool {
        matches!(
            self,
            MintState::UploadingMetadata | MintState::AwaitingMintConfirmation { .. }
        )
    }
}

pub struct MintWorkflow {
    metadata: Arc<dyn MetadataStore>,
    controller: TransactionController<MintGenerativeCall>,
    state: watch::Sender<MintState>,
}

impl MintWorkflow {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        controller: TransactionController<MintGenerativeCall>,
    ) -> Self {
        let (state, _) = watch::channel(MintState::Editing);
        Self {
            metadata,
            controller,
            state,
        }
    }

    pub fn state(&self) -> MintState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<MintState> {
        self.state.subscribe()
    }

    pub fn controller(&self) -> &TransactionController<MintGenerativeCall> {
        &self.controller
    }

    /// Runs one attempt. Allowed from `Editing` and, as an explicit retry,
    /// from `Failed`.
    pub async fn run(&self, draft: &MintDraft) -> Result<TransactionId, MintFailure> {
        let mut rejection = None;
        self.state.send_if_modified(|state| match state {
            MintState::Editing | MintState::Failed(_) => {
                *state = MintState::UploadingMetadata;
                true
            }
            MintState::Minted { transaction, .. } => {
                rejection = Some(MintFailure::AlreadyMinted(transaction.clone()));
                false
            }
            _ => {
                rejection = Some(MintFailure::Busy);
                false
            }
        });
        if let Some(rejection) = rejection {
            return Err(rejection);
        }

        let mut step = StepGuard {
            state: &self.state,
            done: false,
        };

        let document = draft.metadata();
        info!(name = %document.name, "mint: uploading metadata");
        let metadata = match self.metadata.upload(&document).await {
            Ok(cid) => cid,
            Err(err) => {
                warn!(name = %document.name, "mint: metadata upload failed: {err}");
                return Err(step.fail(err.into()));
            }
        };

        self.state.send_replace(MintState::AwaitingMintConfirmation {
            metadata: metadata.clone(),
        });
        let call = draft.mint_call(&metadata);
        match self.controller.submit(call).await {
            Ok(transaction) => {
                info!(operation = %transaction, cid = %metadata, "mint: token minted");
                step.finish(MintState::Minted {
                    metadata,
                    transaction: transaction.clone(),
                });
                Ok(transaction)
            }
            Err(err) => Err(step.fail(err.into())),
        }
    }
}

/// Moves the workflow to its terminal state; an attempt dropped mid-way ends
/// as `Failed(Abandoned)`.
struct StepGuard<'a> {
    state: &'a watch::Sender<MintState>,
    done: bool,
}

impl StepGuard<'_> {
    fn finish(&mut self, state: MintState) {
        self.done = true;
        self.state.send_replace(state);
    }

    fn fail(&mut self, failure: MintFailure) -> MintFailure {
        self.finish(MintState::Failed(failure.clone()));
        failure
    }
}

impl Drop for StepGuard<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.state.send_if_modified(|state| {
                if !state.is_busy() {
                    return false;
                }
                *state = MintState::Failed(MintFailure::Abandoned);
                true
            });
        }
    }
}

/// Collecting an iteration of a published token. The operation hash is the
/// identity its reveal is tracked under.
pub struct IterationMinter {
    controller: TransactionController<MintCall>,
    user: Option<UserSummary>,
}

impl IterationMinter {
    pub fn controller(&self) -> &TransactionController<MintCall> {
        &self.controller
    }

    pub fn eligibility(
        &self,
        listing: &GenerativeTokenListing,
        now: DateTime<Utc>,
    ) -> Result<(), MintIneligible> {
        if listing.is_hidden() {
            return Err(MintIneligible::Hidden);
        }
        if listing.lock_end > now {
            return Err(MintIneligible::Locked(listing.lock_end));
        }
        let is_author = self
            .user
            .as_ref()
            .is_some_and(|user| user.id == listing.author.id);
        if !listing.enabled && !is_author {
            return Err(MintIneligible::Disabled);
        }
        Ok(())
    }

    pub async fn mint(
        &self,
        listing: &GenerativeTokenListing,
        now: DateTime<Utc>,
    ) -> Result<TokenHash, MintFailure> {
        self.eligibility(listing, now)?;
        let transaction = self
            .controller
            .submit(MintCall {
                issuer_id: listing.id,
                price: listing.price,
            })
            .await?;
        info!(issuer_id = listing.id.0, operation = %transaction, "mint: iteration collected");
        Ok(TokenHash::from(transaction))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RevealState {
    NotStarted,
    Tracking {
        identity: TokenHash,
        position: u32,
        latest: Option<ProgressSnapshot>,
    },
    Revealed(RevealedToken),
    TrackingFailed(TrackingFailure),
}

pub struct RevealWorkflow {
    client: ProgressStreamClient,
    state: watch::Sender<RevealState>,
}

impl RevealWorkflow {
    pub fn new(client: ProgressStreamClient) -> Self {
        let (state, _) = watch::channel(RevealState::NotStarted);
        Self { client, state }
    }

    pub fn state(&self) -> RevealState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RevealState> {
        self.state.subscribe()
    }

    /// Progress entry labels for the current state.
    pub fn entries(&self) -> Vec<String> {
        let state = self.state.borrow();
        let latest = match &*state {
            RevealState::Tracking { latest, .. } => latest.as_ref(),
            _ => None,
        };
        self.client.sequencer().entries(latest)
    }

    /// Follows the signing pipeline of `identity` to a terminal outcome.
    ///
    /// Restartable after `TrackingFailed`: the pipeline lives on the server,
    /// so a new session picks up wherever it is now.
    pub async fn track(&self, identity: TokenHash) -> Result<RevealedToken, TrackingFailure> {
        let mut early = None;
        self.state.send_if_modified(|state| match state {
            RevealState::Tracking { .. } => {
                early = Some(Err(TrackingFailure::new(
                    identity.clone(),
                    TrackingCause::AlreadyTracking,
                )));
                false
            }
            RevealState::Revealed(token) if token.identity == identity => {
                early = Some(Ok(token.clone()));
                false
            }
            _ => {
                *state = RevealState::Tracking {
                    identity: identity.clone(),
                    position: 0,
                    latest: None,
                };
                true
            }
        });
        if let Some(early) = early {
            return early;
        }

        let mut tracking = TrackingGuard {
            state: &self.state,
            done: false,
        };
        let mut handle = self.client.start(identity.clone());
        let outcome = loop {
            let Some(update) = handle.next().await else {
                break Err(TrackingCause::SessionEnded);
            };
            let snapshot = update.snapshot;
            match snapshot.outcome.clone() {
                TerminalOutcome::Pending => {
                    info!(
                        identity = %identity,
                        stage = %snapshot.stage,
                        position = update.position,
                        queue_position = ?snapshot.queue_position(),
                        "reveal: progress"
                    );
                    self.state.send_replace(RevealState::Tracking {
                        identity: identity.clone(),
                        position: update.position,
                        latest: Some(snapshot),
                    });
                }
                TerminalOutcome::Success(data) => {
                    break RevealedToken::from_signing(identity.clone(), &data)
                        .map_err(TrackingCause::MissingTerminalData);
                }
                TerminalOutcome::Error(err) => {
                    break Err(err.into());
                }
            }
        };
        self.client.stop(&mut handle);
        tracking.done = true;

        match outcome {
            Ok(token) => {
                info!(identity = %identity, uri = %token.view_uri(), "reveal: token revealed");
                self.state.send_replace(RevealState::Revealed(token.clone()));
                Ok(token)
            }
            Err(cause) => {
                let failure = TrackingFailure::new(identity, cause);
                warn!("reveal: {failure}; a hard refresh is recommended");
                self.state
                    .send_replace(RevealState::TrackingFailed(failure.clone()));
                Err(failure)
            }
        }
    }
}

/// Returns the workflow to `NotStarted` if the caller stops tracking before
/// a terminal outcome.
struct TrackingGuard<'a> {
    state: &'a watch::Sender<RevealState>,
    done: bool,
}

impl Drop for TrackingGuard<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.state.send_replace(RevealState::NotStarted);
        }
    }
}

#[cfg(test)]
#[path = "tests/orchestrator_tests.rs"]
mod tests;
