//! One wallet-initiated contract call as a state machine.
//!
//! Every call site (publishing, collecting, editing a token) instantiates a
//! [`TransactionController`] bound to one entrypoint instead of tracking its
//! own loading/success/error flags.

use std::sync::Arc;

use serde::Serialize;
use shared::domain::TransactionId;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};

use crate::{
    error::{ConcurrentCallError, ContractCallError, FailureCause, TransactionError},
    wallet::{ContractMethod, Wallet, WalletProgress},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionPhase {
    #[default]
    Idle,
    AwaitingWalletConfirmation,
    Submitted,
    Confirmed,
    Failed,
}

impl TransactionPhase {
    /// A call is live between the wallet prompt and its terminal state.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            TransactionPhase::AwaitingWalletConfirmation | TransactionPhase::Submitted
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TransactionPhase::Confirmed | TransactionPhase::Failed)
    }
}

#[derive(Debug, Clone)]
pub struct TransactionState<P> {
    /// Number of `submit` calls accepted by the controller so far.
    pub attempt: u64,
    pub phase: TransactionPhase,
    pub payload: Option<P>,
    /// Operation hash once broadcast. Kept through `Confirmed`.
    pub broadcast: Option<TransactionId>,
    pub result: Option<TransactionId>,
    pub error: Option<ContractCallError>,
}

impl<P> Default for TransactionState<P> {
    fn default() -> Self {
        Self {
            attempt: 0,
            phase: TransactionPhase::Idle,
            payload: None,
            broadcast: None,
            result: None,
            error: None,
        }
    }
}

impl<P> TransactionState<P> {
    pub fn is_loading(&self) -> bool {
        self.phase.is_live()
    }

    pub fn is_success(&self) -> bool {
        self.phase == TransactionPhase::Confirmed
    }

    fn fail(&mut self, error: ContractCallError) {
        self.phase = TransactionPhase::Failed;
        self.result = None;
        self.error = Some(error);
    }
}

type StateTx<P> = watch::Sender<TransactionState<P>>;

pub struct TransactionController<P> {
    wallet: Arc<dyn Wallet>,
    method: ContractMethod,
    state: Arc<StateTx<P>>,
}

impl<P> TransactionController<P>
where
    P: Serialize + Clone + Send + Sync + 'static,
{
    pub fn new(wallet: Arc<dyn Wallet>, method: ContractMethod) -> Self {
        let (state, _) = watch::channel(TransactionState::default());
        Self {
            wallet,
            method,
            state: Arc::new(state),
        }
    }

    pub fn method(&self) -> ContractMethod {
        self.method
    }

    pub fn state(&self) -> TransactionState<P> {
        self.state.borrow().clone()
    }

    pub fn is_busy(&self) -> bool {
        self.state.borrow().phase.is_live()
    }

    pub fn subscribe(&self) -> watch::Receiver<TransactionState<P>> {
        self.state.subscribe()
    }

    /// Phase changes as a stream; intermediate states may be coalesced if the
    /// consumer lags.
    pub fn states(&self) -> WatchStream<TransactionState<P>> {
        WatchStream::new(self.state.subscribe())
    }

    /// Issues exactly one wallet call for `payload`.
    ///
    /// Fails fast with [`TransactionError::ConcurrentCall`] while another call
    /// is live; the live call is not touched. Nothing is retried.
    pub async fn submit(&self, payload: P) -> Result<TransactionId, TransactionError> {
        let mut attempt = 0;
        let mut live_phase = None;
        let claimed = self.state.send_if_modified(|state| {
            if state.phase.is_live() {
                live_phase = Some(state.phase);
                return false;
            }
            attempt = state.attempt + 1;
            *state = TransactionState {
                attempt,
                phase: TransactionPhase::AwaitingWalletConfirmation,
                payload: Some(payload.clone()),
                ..TransactionState::default()
            };
            true
        });
        if !claimed {
            let phase = live_phase.unwrap_or(TransactionPhase::AwaitingWalletConfirmation);
            warn!(method = %self.method, ?phase, "transaction: submit rejected, call in flight");
            return Err(ConcurrentCallError {
                method: self.method,
                phase,
            }
            .into());
        }

        let mut guard = InFlight {
            state: &self.state,
            attempt,
            settled: false,
        };

        let arguments = match serde_json::to_value(&payload) {
            Ok(arguments) => arguments,
            Err(err) => {
                let error = ContractCallError::new(
                    FailureCause::Unknown,
                    format!("could not encode {} arguments: {err}", self.method),
                );
                guard.settle(Err(error.clone()));
                return Err(error.into());
            }
        };

        info!(method = %self.method, attempt, "transaction: awaiting wallet confirmation");
        let progress = {
            let state = Arc::clone(&self.state);
            let method = self.method;
            WalletProgress::new(move |transaction| {
                let moved = state.send_if_modified(|current| {
                    if current.attempt != attempt
                        || current.phase != TransactionPhase::AwaitingWalletConfirmation
                    {
                        return false;
                    }
                    current.phase = TransactionPhase::Submitted;
                    current.broadcast = Some(transaction.clone());
                    true
                });
                if moved {
                    info!(%method, attempt, operation = %transaction, "transaction: submitted");
                }
            })
        };

        let outcome = self
            .wallet
            .call(self.method, arguments, progress)
            .await
            .map_err(ContractCallError::from);

        match &outcome {
            Ok(transaction) => {
                info!(method = %self.method, attempt, operation = %transaction, "transaction: confirmed")
            }
            Err(err) => {
                warn!(method = %self.method, attempt, cause = ?err.cause, "transaction: failed: {}", err.message)
            }
        }
        guard.settle(outcome.clone());
        outcome.map_err(TransactionError::from)
    }
}

/// Settles the controller state exactly once for one attempt. If the caller
/// stops awaiting `submit`, the attempt is marked failed so the controller
/// accepts new calls; the broadcast itself is not undone.
struct InFlight<'a, P> {
    state: &'a StateTx<P>,
    attempt: u64,
    settled: bool,
}

impl<P> InFlight<'_, P> {
    fn settle(&mut self, outcome: Result<TransactionId, ContractCallError>) {
        self.settled = true;
        let attempt = self.attempt;
        match outcome {
            Ok(transaction) => {
                // Confirmed is only reachable from Submitted.
                self.state.send_if_modified(|state| {
                    if state.attempt != attempt
                        || state.phase != TransactionPhase::AwaitingWalletConfirmation
                    {
                        return false;
                    }
                    state.phase = TransactionPhase::Submitted;
                    state.broadcast = Some(transaction.clone());
                    true
                });
                self.state.send_if_modified(|state| {
                    if state.attempt != attempt || state.phase != TransactionPhase::Submitted {
                        return false;
                    }
                    state.phase = TransactionPhase::Confirmed;
                    state.result = Some(transaction);
                    state.error = None;
                    true
                });
            }
            Err(error) => {
                self.state.send_if_modified(|state| {
                    if state.attempt != attempt || !state.phase.is_live() {
                        return false;
                    }
                    state.fail(error);
                    true
                });
            }
        }
    }
}

impl<P> Drop for InFlight<'_, P> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        debug!(attempt = self.attempt, "transaction: caller stopped listening");
        self.settle(Err(ContractCallError::new(
            FailureCause::Unknown,
            "stopped listening before the wallet answered",
        )));
    }
}

#[cfg(test)]
#[path = "tests/transaction_tests.rs"]
mod tests;
