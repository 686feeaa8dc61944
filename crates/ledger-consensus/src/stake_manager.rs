//! Stake Manager (C2): owns the history of [`StakeSnapshot`]s indexed by
//! block number, applies pending add/remove updates as blocks advance, and
//! answers "what snapshot governed cabinet selection at block N".

use crate::errors::ConsensusError;
use crate::stake_snapshot::StakeSnapshot;
use shared_types::{Identity, StakeRecord};
use std::collections::BTreeMap;

/// Number of historical snapshots retained. Matches the original node's
/// `HISTORY_LENGTH`: enough to answer time-travel queries for any peer that
/// hasn't fallen further behind than this many stake-changing blocks.
pub const HISTORY_LENGTH: usize = 1000;

/// A pending change to a staker's stake, applied once its target block
/// number is reached.
#[derive(Debug, Clone)]
pub struct PendingUpdate {
    /// Block number at which this update takes effect.
    pub effective_at: u64,
    /// The identity being added or removed.
    pub identity: Identity,
    /// `Some(stake)` to add/update the staker, `None` to remove them.
    pub stake: Option<u64>,
}

/// Queue of not-yet-applied stake changes, ordered by the block they take
/// effect at (spin-up for additions, cool-down for removals: both are just
/// "don't apply until `effective_at`").
#[derive(Debug, Default)]
pub struct StakeUpdateQueue {
    pending: Vec<PendingUpdate>,
}

impl StakeUpdateQueue {
    /// Queue an update to take effect at `effective_at`.
    pub fn push(&mut self, update: PendingUpdate) {
        self.pending.push(update);
    }

    /// Apply every queued update with `effective_at <= block_index` onto
    /// `base`, returning the resulting snapshot and `true` if anything
    /// changed. Applied updates are removed from the queue.
    fn apply_updates(&mut self, block_index: u64, base: &StakeSnapshot) -> (StakeSnapshot, bool) {
        let mut ready = Vec::new();
        self.pending.retain(|u| {
            if u.effective_at <= block_index {
                ready.push(u.clone());
                false
            } else {
                true
            }
        });
        if ready.is_empty() {
            return (base.clone(), false);
        }

        let mut records: Vec<StakeRecord> = base.iter().copied().collect();
        for update in ready {
            records.retain(|r| r.identity != update.identity);
            if let Some(stake) = update.stake {
                records.push(StakeRecord {
                    identity: update.identity,
                    stake,
                });
            }
        }
        (StakeSnapshot::new(records), true)
    }
}

/// Owns the stake history and produces cabinets from it.
pub struct StakeManager {
    history: BTreeMap<u64, StakeSnapshot>,
    queue: StakeUpdateQueue,
    current: StakeSnapshot,
    current_block_index: u64,
}

impl StakeManager {
    /// Start the manager with `genesis` stake in effect from block 0.
    pub fn new(genesis: StakeSnapshot) -> Self {
        let mut history = BTreeMap::new();
        history.insert(0, genesis.clone());
        Self {
            history,
            queue: StakeUpdateQueue::default(),
            current: genesis,
            current_block_index: 0,
        }
    }

    /// Reset to a fresh genesis snapshot, discarding all history and
    /// pending updates.
    pub fn reset(&mut self, genesis: StakeSnapshot) {
        self.history.clear();
        self.history.insert(0, genesis.clone());
        self.queue = StakeUpdateQueue::default();
        self.current = genesis;
        self.current_block_index = 0;
    }

    /// Queue a stake change to take effect at `effective_at`.
    pub fn queue_update(&mut self, update: PendingUpdate) {
        self.queue.push(update);
    }

    /// Apply any pending updates whose effective block has been reached,
    /// recording a new historical snapshot if the stake set actually
    /// changed. A no-op for `block_index == 0`.
    pub fn update_current_block(&mut self, block_index: u64) {
        if block_index == 0 {
            return;
        }
        let (next, changed) = self.queue.apply_updates(block_index, &self.current);
        if changed {
            self.history.insert(block_index, next.clone());
            self.current = next;
        }
        self.current_block_index = block_index;
        self.trim_history();
    }

    fn trim_history(&mut self) {
        while self.history.len() > HISTORY_LENGTH {
            let oldest = *self.history.keys().next().expect("non-empty, just checked len");
            self.history.remove(&oldest);
        }
    }

    /// Find the snapshot that governed cabinet selection as of `block`:
    /// the current snapshot if `block` is at or after the manager's
    /// current position, otherwise the most recent historical snapshot at
    /// or before `block`.
    pub fn lookup_stake_snapshot(&self, block: u64) -> Result<&StakeSnapshot, ConsensusError> {
        if block >= self.current_block_index {
            return Ok(&self.current);
        }
        self.history
            .range(..=block)
            .next_back()
            .map(|(_, snapshot)| snapshot)
            .ok_or(ConsensusError::NoSnapshotBefore(block))
    }

    /// Build a cabinet for `block`, sourcing stake from whatever snapshot
    /// governed that block.
    pub fn build_cabinet(
        &self,
        block: u64,
        entropy: u64,
        count: usize,
    ) -> Result<Vec<Identity>, ConsensusError> {
        let snapshot = self.lookup_stake_snapshot(block)?;
        Ok(snapshot.build_cabinet(entropy, count, None))
    }

    /// The snapshot currently in effect.
    pub fn current(&self) -> &StakeSnapshot {
        &self.current
    }
}
