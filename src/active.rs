//! Which channels of each fixture get persisted on save.
//!
//! A fixture that was never given an explicit set has every channel active.
//! A fixture with an explicit set has exactly those channels active, and an
//! explicit empty set means none. [`ActiveSpec`] makes the two cases distinct
//! in the API; internally only explicit sets are stored.

use crate::model::{ChannelIndex, FixtureId, SparseEntry};
use std::collections::{BTreeSet, HashMap};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ActiveSpec {
    AllActive,
    Explicit(BTreeSet<ChannelIndex>),
}

impl ActiveSpec {
    pub fn contains(&self, index: ChannelIndex) -> bool {
        match self {
            ActiveSpec::AllActive => true,
            ActiveSpec::Explicit(set) => set.contains(&index),
        }
    }

    /// The explicit set, or `None` when everything is active.
    pub fn as_set(&self) -> Option<&BTreeSet<ChannelIndex>> {
        match self {
            ActiveSpec::AllActive => None,
            ActiveSpec::Explicit(set) => Some(set),
        }
    }

    /// Keep only members below `channel_count`. `AllActive` stays as is.
    pub fn truncated(&self, channel_count: usize) -> ActiveSpec {
        match self {
            ActiveSpec::AllActive => ActiveSpec::AllActive,
            ActiveSpec::Explicit(set) => ActiveSpec::Explicit(set.range(..channel_count).copied().collect()),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct ActiveChannelTracker {
    current: HashMap<FixtureId, BTreeSet<ChannelIndex>>,
    initial: HashMap<FixtureId, BTreeSet<ChannelIndex>>,
}

impl ActiveChannelTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self, fixture_id: FixtureId, index: ChannelIndex) -> bool {
        self.current.get(&fixture_id).map_or(true, |set| set.contains(&index))
    }

    pub fn spec(&self, fixture_id: FixtureId) -> ActiveSpec {
        match self.current.get(&fixture_id) {
            Some(set) => ActiveSpec::Explicit(set.clone()),
            None => ActiveSpec::AllActive,
        }
    }

    pub fn is_tracked(&self, fixture_id: FixtureId) -> bool {
        self.current.contains_key(&fixture_id)
    }

    /// Turn one channel on or off.
    ///
    /// An untracked fixture gets a set holding `index` when turning on. When
    /// turning off, the untracked fixture gets a set built from
    /// `channel_count` with `index` left out, so the remaining channels stay
    /// active.
    pub fn set_active(&mut self, fixture_id: FixtureId, index: ChannelIndex, active: bool, channel_count: usize) {
        let set = self.current.entry(fixture_id).or_insert_with(|| {
            if active {
                BTreeSet::new()
            } else {
                (0..channel_count).collect()
            }
        });
        if active {
            set.insert(index);
        } else {
            set.remove(&index);
        }
    }

    pub fn set_spec(&mut self, fixture_id: FixtureId, spec: ActiveSpec) {
        match spec {
            ActiveSpec::AllActive => {
                self.current.remove(&fixture_id);
            }
            ActiveSpec::Explicit(set) => {
                self.current.insert(fixture_id, set);
            }
        }
    }

    /// Seed both the current and baseline sets from the channels stored in a look.
    pub fn initialize_from_sparse(&mut self, fixture_id: FixtureId, entries: &[SparseEntry]) {
        let set: BTreeSet<ChannelIndex> = entries.iter().map(|e| e.offset).collect();
        self.initial.insert(fixture_id, set.clone());
        self.current.insert(fixture_id, set);
    }

    /// Forget the fixture's current set. The baseline is kept for dirty tracking.
    pub fn untrack(&mut self, fixture_id: FixtureId) {
        self.current.remove(&fixture_id);
    }

    pub fn current(&self) -> &HashMap<FixtureId, BTreeSet<ChannelIndex>> {
        &self.current
    }

    pub fn initial(&self) -> &HashMap<FixtureId, BTreeSet<ChannelIndex>> {
        &self.initial
    }

    /// Make the current sets the new baseline (after a successful save).
    pub fn commit(&mut self) {
        self.initial = self.current.clone();
    }

    /// Throw away changes since the baseline.
    pub fn revert(&mut self) {
        self.current = self.initial.clone();
    }

    pub fn clear(&mut self) {
        self.current.clear();
        self.initial.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const F: FixtureId = FixtureId(1);

    fn set(items: &[ChannelIndex]) -> BTreeSet<ChannelIndex> {
        items.iter().copied().collect()
    }

    #[test]
    fn test_untracked_fixture_is_all_active() {
        let tracker = ActiveChannelTracker::new();
        assert!(tracker.is_active(F, 0));
        assert!(tracker.is_active(F, 511));
        assert_eq!(tracker.spec(F), ActiveSpec::AllActive);
    }

    #[test]
    fn test_toggle_off_on_untracked_keeps_the_rest() {
        let mut tracker = ActiveChannelTracker::new();
        tracker.set_active(F, 1, false, 4);

        assert_eq!(tracker.spec(F), ActiveSpec::Explicit(set(&[0, 2, 3])));
        assert!(!tracker.is_active(F, 1));
        assert!(tracker.is_active(F, 3));
    }

    #[test]
    fn test_toggle_on_untracked_creates_single_member_set() {
        let mut tracker = ActiveChannelTracker::new();
        tracker.set_active(F, 2, true, 4);
        assert_eq!(tracker.spec(F), ActiveSpec::Explicit(set(&[2])));
    }

    #[test]
    fn test_empty_explicit_set_means_nothing_active() {
        let mut tracker = ActiveChannelTracker::new();
        tracker.initialize_from_sparse(F, &[]);

        assert!(tracker.is_tracked(F));
        assert!(!tracker.is_active(F, 0), "Present-but-empty set must not read as all-active");
    }

    #[test]
    fn test_initialize_sets_baseline() {
        let mut tracker = ActiveChannelTracker::new();
        let entries = [SparseEntry { offset: 0, value: 1 }, SparseEntry { offset: 3, value: 9 }];
        tracker.initialize_from_sparse(F, &entries);

        assert_eq!(tracker.initial()[&F], set(&[0, 3]));
        tracker.set_active(F, 1, true, 4);
        assert_eq!(tracker.initial()[&F], set(&[0, 3]), "Edits must not move the baseline");

        tracker.revert();
        assert_eq!(tracker.spec(F), ActiveSpec::Explicit(set(&[0, 3])));
    }

    #[test]
    fn test_truncated_spec() {
        let spec = ActiveSpec::Explicit(set(&[0, 2, 5]));
        assert_eq!(spec.truncated(3), ActiveSpec::Explicit(set(&[0, 2])));
        assert_eq!(ActiveSpec::AllActive.truncated(1), ActiveSpec::AllActive);
    }
}
