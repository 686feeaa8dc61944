//! Stake Snapshot (C1): an immutable, identity-sorted view of stake at one
//! point in the chain, and the deterministic cabinet-selection function
//! built on top of it.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared_types::{Identity, StakeRecord};
use std::collections::HashSet;

/// A point-in-time view of every staker and their stake, sorted by
/// identity so that the same snapshot always iterates in the same order
/// regardless of how its records were built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StakeSnapshot {
    records: Vec<StakeRecord>,
}

impl StakeSnapshot {
    /// Build a snapshot from an unordered set of records, sorting by
    /// identity and dropping zero-stake entries.
    pub fn new(mut records: Vec<StakeRecord>) -> Self {
        records.retain(|r| r.stake > 0);
        records.sort_by(|a, b| a.identity.0.cmp(&b.identity.0));
        Self { records }
    }

    /// Number of stakers in the snapshot.
    pub fn size(&self) -> usize {
        self.records.len()
    }

    /// Sum of every record's stake.
    pub fn total_stake(&self) -> u64 {
        self.records.iter().map(|r| r.stake).sum()
    }

    /// Look up a single staker's stake, if present.
    pub fn lookup_stake(&self, identity: &Identity) -> Option<u64> {
        self.records
            .iter()
            .find(|r| r.identity == *identity)
            .map(|r| r.stake)
    }

    /// Iterate records in identity-sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &StakeRecord> {
        self.records.iter()
    }

    /// Deterministically select up to `count` identities, weighted by
    /// stake, seeded only by `entropy` and intersected with `whitelist`
    /// when one is given.
    ///
    /// Pure function of `(self, entropy, count, whitelist)`: the same
    /// inputs always produce the same cabinet, so every honest node
    /// running this function independently agrees on who is in it.
    /// Candidates are ranked by an exponential-weighted key
    /// (`u.powf(1 / stake)`, smallest key wins), the standard
    /// weighted-sampling-without-replacement construction, so stakers
    /// with more stake are more likely to rank near the front without
    /// ever being guaranteed a seat.
    pub fn build_cabinet(
        &self,
        entropy: u64,
        count: usize,
        whitelist: Option<&HashSet<Identity>>,
    ) -> Vec<Identity> {
        let mut rng = StdRng::seed_from_u64(entropy);
        let mut keyed: Vec<(f64, Identity)> = self
            .records
            .iter()
            .filter(|r| whitelist.map_or(true, |w| w.contains(&r.identity)))
            .map(|r| {
                let u: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
                let key = u.powf(1.0 / r.stake as f64);
                (key, r.identity)
            })
            .collect();

        keyed.sort_by(|a, b| b.0.total_cmp(&a.0));
        keyed.truncate(count);
        keyed.into_iter().map(|(_, identity)| identity).collect()
    }
}
