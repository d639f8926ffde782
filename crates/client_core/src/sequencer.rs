use std::collections::HashMap;

use shared::protocol::StageId;

use crate::types::{ProgressSnapshot, TerminalOutcome};

/// Position rendered once the token is signed.
pub const COMPLETE_POSITION: u32 = 7;

const DEFAULT_RANKS: [(StageId, u32); 7] = [
    (StageId::None, 0),
    (StageId::NotFound, 1),
    (StageId::Queued, 2),
    (StageId::GeneratingMetadata, 3),
    (StageId::MetadataGenerated, 4),
    (StageId::CallingContract, 5),
    (StageId::Signed, COMPLETE_POSITION),
];

/// Total order over signing stages.
#[derive(Debug, Clone)]
pub struct StageSequencer {
    ranks: HashMap<StageId, u32>,
}

impl Default for StageSequencer {
    fn default() -> Self {
        Self {
            ranks: DEFAULT_RANKS.into_iter().collect(),
        }
    }
}

impl StageSequencer {
    /// Teaches the sequencer a stage the server added.
    pub fn with_stage(mut self, stage: StageId, rank: u32) -> Self {
        self.ranks.insert(stage, rank);
        self
    }

    pub fn rank(&self, stage: &StageId) -> Option<u32> {
        self.ranks.get(stage).copied()
    }

    /// Whether `incoming` may replace a snapshot at `current`.
    ///
    /// Terminal outcomes always win; unknown stages are accepted without
    /// moving. An unknown `current` ranks as the start of the pipeline.
    pub fn advance(&self, current: &StageId, incoming: &ProgressSnapshot) -> bool {
        let current = self.rank(current).unwrap_or_default();
        self.position_after(current, incoming).is_some()
    }

    /// Rendered position after `incoming` arrives at `current`, or `None` when
    /// the snapshot is a regression and must not be rendered.
    pub fn position_after(&self, current: u32, incoming: &ProgressSnapshot) -> Option<u32> {
        match incoming.outcome {
            TerminalOutcome::Success(_) => Some(COMPLETE_POSITION.max(current)),
            TerminalOutcome::Error(_) => Some(current),
            TerminalOutcome::Pending => match self.rank(&incoming.stage) {
                None => Some(current),
                Some(rank) if rank >= current => Some(rank),
                Some(_) => None,
            },
        }
    }

    /// Labels of the progress entries, annotated with the queue position
    /// carried by `latest` when relevant.
    pub fn entries(&self, latest: Option<&ProgressSnapshot>) -> Vec<String> {
        let position = |stage: StageId| {
            latest
                .filter(|snapshot| snapshot.stage == stage)
                .map(|snapshot| match snapshot.queue_position() {
                    Some(position) => position.to_string(),
                    None => "unknown".to_string(),
                })
        };
        let queued = match position(StageId::Queued) {
            Some(position) => format!("token is in the queue (position: {position})"),
            None => "token is in the queue".to_string(),
        };
        let generated = match position(StageId::MetadataGenerated) {
            Some(position) => {
                format!("metadata generated (waiting to be signed, position: {position})")
            }
            None => "metadata generated".to_string(),
        };
        vec![
            "contacting signing server".to_string(),
            "token will be added to the queue".to_string(),
            queued,
            "server is generating your token metadata".to_string(),
            generated,
            "signing operation is being sent to the blockchain".to_string(),
            "token metadata has been signed".to_string(),
        ]
    }
}
