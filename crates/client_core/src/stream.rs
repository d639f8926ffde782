//! Tracks the signing pipeline of one token over the push channel.
//!
//! [`ProgressStreamClient::start`] spawns a session task that owns the
//! connection, reconnects through transient drops and forwards every
//! snapshot the [`StageSequencer`] accepts to the [`StreamHandle`] over a
//! bounded channel. The sequence ends at the first terminal snapshot or when
//! the handle is stopped, and cannot be restarted; a new `start` opens a new
//! session.

use std::{sync::Arc, time::Duration};

use futures::StreamExt;
use shared::{domain::TokenHash, protocol::StageId};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    error::StreamError,
    sequencer::StageSequencer,
    transport::PushConnector,
    types::{ProgressSnapshot, StageUpdate, StreamStatus, TerminalOutcome},
};

pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 8;
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(500);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);
const UPDATE_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Consecutive failed connections tolerated before the session errors.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            base_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

impl ReconnectPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(factor)
            .min(MAX_RECONNECT_DELAY)
    }
}

#[derive(Debug, Clone, Default)]
struct SessionView {
    status: StreamStatus,
    position: u32,
    latest: Option<ProgressSnapshot>,
    latest_raw: Option<ProgressSnapshot>,
}

#[derive(Clone)]
pub struct ProgressStreamClient {
    connector: Arc<dyn PushConnector>,
    sequencer: Arc<StageSequencer>,
    policy: ReconnectPolicy,
}

impl ProgressStreamClient {
    pub fn new(
        connector: Arc<dyn PushConnector>,
        sequencer: Arc<StageSequencer>,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            connector,
            sequencer,
            policy,
        }
    }

    pub fn sequencer(&self) -> &StageSequencer {
        &self.sequencer
    }

    /// Opens a session for `identity`. The connection is established in the
    /// background; the handle is usable (and stoppable) immediately.
    pub fn start(&self, identity: TokenHash) -> StreamHandle {
        let (updates_tx, updates_rx) = mpsc::channel(UPDATE_BUFFER);
        let (view_tx, view_rx) = watch::channel(SessionView {
            status: StreamStatus::Connecting,
            ..SessionView::default()
        });
        let session = Session {
            identity: identity.clone(),
            connector: Arc::clone(&self.connector),
            sequencer: Arc::clone(&self.sequencer),
            policy: self.policy,
            updates: updates_tx,
            view: view_tx,
        };
        info!(identity = %identity, "progress stream: starting session");
        let task = tokio::spawn(session.run());
        StreamHandle {
            identity,
            updates: updates_rx,
            view: view_rx,
            task: Some(task),
            stopped: false,
        }
    }

    pub fn stop(&self, handle: &mut StreamHandle) {
        handle.stop();
    }
}

/// Caller side of one session. Dropping the handle stops the session.
pub struct StreamHandle {
    identity: TokenHash,
    updates: mpsc::Receiver<StageUpdate>,
    view: watch::Receiver<SessionView>,
    task: Option<JoinHandle<()>>,
    stopped: bool,
}

impl StreamHandle {
    pub fn identity(&self) -> &TokenHash {
        &self.identity
    }

    /// Next accepted snapshot, or `None` once the session is over or stopped.
    pub async fn next(&mut self) -> Option<StageUpdate> {
        if self.stopped {
            return None;
        }
        self.updates.recv().await
    }

    pub fn latest(&self) -> Option<ProgressSnapshot> {
        self.view.borrow().latest.clone()
    }

    /// Last parsed snapshot even if the sequencer rejected it.
    pub fn latest_raw(&self) -> Option<ProgressSnapshot> {
        self.view.borrow().latest_raw.clone()
    }

    pub fn position(&self) -> u32 {
        self.view.borrow().position
    }

    pub fn status(&self) -> StreamStatus {
        if self.stopped {
            let status = self.view.borrow().status;
            return match status {
                StreamStatus::Errored => StreamStatus::Errored,
                _ => StreamStatus::Closed,
            };
        }
        self.view.borrow().status
    }

    pub fn outcome(&self) -> TerminalOutcome {
        self.view
            .borrow()
            .latest
            .as_ref()
            .map(|snapshot| snapshot.outcome.clone())
            .unwrap_or(TerminalOutcome::Pending)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Tears the session down. Idempotent; after it returns [`Self::next`]
    /// yields `None`.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.updates.close();
        while self.updates.try_recv().is_ok() {}
        debug!(identity = %self.identity, "progress stream: stopped");
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

enum Delivery {
    Continue,
    Finished,
}

struct Session {
    identity: TokenHash,
    connector: Arc<dyn PushConnector>,
    sequencer: Arc<StageSequencer>,
    policy: ReconnectPolicy,
    updates: mpsc::Sender<StageUpdate>,
    view: watch::Sender<SessionView>,
}

impl Session {
    async fn run(self) {
        let mut failures = 0u32;
        loop {
            self.set_status(StreamStatus::Connecting);
            let last_error = match self.connector.connect(&self.identity).await {
                Ok(mut frames) => {
                    self.set_status(StreamStatus::Open);
                    info!(identity = %self.identity, "progress stream: connected");
                    let mut last_error = "connection closed by server".to_string();
                    while let Some(frame) = frames.next().await {
                        let raw = match frame {
                            Ok(raw) => raw,
                            Err(err) => {
                                last_error = err.to_string();
                                break;
                            }
                        };
                        let snapshot = match ProgressSnapshot::parse(&raw) {
                            Ok(snapshot) => snapshot,
                            Err(err) => {
                                warn!(identity = %self.identity, "progress stream: dropping frame: {err}");
                                continue;
                            }
                        };
                        failures = 0;
                        if let Delivery::Finished = self.deliver(snapshot).await {
                            return;
                        }
                    }
                    last_error
                }
                Err(err) => format!("{err:#}"),
            };

            failures += 1;
            if failures > self.policy.max_attempts {
                let error = StreamError::ReconnectBudgetExhausted {
                    attempts: self.policy.max_attempts,
                    last_error,
                };
                warn!(identity = %self.identity, "progress stream: {error}");
                let stage = self
                    .view
                    .borrow()
                    .latest
                    .as_ref()
                    .map(|snapshot| snapshot.stage.clone())
                    .unwrap_or(StageId::None);
                let mut snapshot = ProgressSnapshot::pending(stage);
                snapshot.outcome = TerminalOutcome::Error(error);
                self.deliver(snapshot).await;
                return;
            }

            let delay = self.policy.delay_for(failures);
            warn!(
                identity = %self.identity,
                attempt = failures,
                delay_ms = delay.as_millis() as u64,
                "progress stream: disconnected ({last_error}), reconnecting"
            );
            self.set_status(StreamStatus::Connecting);
            tokio::time::sleep(delay).await;
        }
    }

    async fn deliver(&self, snapshot: ProgressSnapshot) -> Delivery {
        let current = self.view.borrow().position;
        let accepted = self.sequencer.position_after(current, &snapshot);
        self.view
            .send_modify(|view| view.latest_raw = Some(snapshot.clone()));

        let Some(position) = accepted else {
            debug!(
                identity = %self.identity,
                stage = %snapshot.stage,
                position = current,
                "progress stream: ignoring regressed snapshot"
            );
            return Delivery::Continue;
        };

        let terminal_status = match snapshot.outcome {
            TerminalOutcome::Pending => None,
            TerminalOutcome::Success(_) => Some(StreamStatus::Closed),
            TerminalOutcome::Error(_) => Some(StreamStatus::Errored),
        };
        debug!(
            identity = %self.identity,
            stage = %snapshot.stage,
            position,
            "progress stream: accepted snapshot"
        );
        self.view.send_modify(|view| {
            view.position = position;
            view.latest = Some(snapshot.clone());
            if let Some(status) = terminal_status {
                view.status = status;
            }
        });

        if self
            .updates
            .send(StageUpdate { position, snapshot })
            .await
            .is_err()
        {
            debug!(identity = %self.identity, "progress stream: handle gone, ending session");
            return Delivery::Finished;
        }
        if terminal_status.is_some() {
            info!(identity = %self.identity, "progress stream: terminal outcome reached");
            return Delivery::Finished;
        }
        Delivery::Continue
    }

    fn set_status(&self, status: StreamStatus) {
        self.view.send_if_modified(|view| {
            if view.status == status {
                return false;
            }
            view.status = status;
            true
        });
    }
}

#[cfg(test)]
#[path = "tests/stream_tests.rs"]
mod tests;
