use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

pub type ChannelIndex = usize;
pub type ChannelValue = u16;
pub type LookId = u64;
pub type ProjectId = u64;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct FixtureId(pub u64);

impl fmt::Display for FixtureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fixture#{}", self.0)
    }
}

/// One explicitly stored channel of a fixture in a look.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct SparseEntry {
    pub offset: ChannelIndex,
    pub value: ChannelValue,
}

/// Declared value range of a channel. Values written through the editor are clamped into it.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelRange {
    pub min: ChannelValue,
    pub max: ChannelValue,
}

impl Default for ChannelRange {
    fn default() -> Self {
        Self { min: 0, max: 255 }
    }
}

impl ChannelRange {
    pub fn clamp(&self, value: ChannelValue) -> ChannelValue {
        value.clamp(self.min, self.max.max(self.min))
    }
}

/// A fixture as it is stored inside a look: its size plus the active channels only.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FixtureSnapshot {
    pub fixture_id: FixtureId,
    pub channel_count: usize,
    #[serde(default)]
    pub channels: Vec<SparseEntry>,
    #[serde(default)]
    pub ranges: Vec<ChannelRange>, // empty = every channel uses the default range
}

/// What the snapshot-fetch collaborator returns for one look.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct LookSnapshot {
    pub look_id: LookId,
    #[serde(default)]
    pub fixtures: Vec<FixtureSnapshot>,
}

/// Per-fixture payload handed to the persistence collaborator.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FixtureChannels {
    pub fixture_id: FixtureId,
    #[serde(default)]
    pub channel_count: usize, // 0 = unknown, the store keeps what it has
    pub channels: Vec<SparseEntry>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LookSummary {
    pub id: LookId,
    pub name: String,
    pub fixture_count: usize,
}

/// Where a fixture lives on the wire.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FixturePatch {
    pub fixture_id: FixtureId,
    pub name: String,
    pub universe: u16,
    pub start_channel: u16, // 1-based DMX address
    pub channel_count: usize,
    #[serde(default)]
    pub ranges: Vec<ChannelRange>,
}

impl Default for FixturePatch {
    fn default() -> Self {
        Self {
            fixture_id: FixtureId(0),
            name: String::new(),
            universe: 1,
            start_channel: 1,
            channel_count: 0,
            ranges: Vec::new(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct NetworkConfig {
    pub use_multicast: bool,
    pub unicast_ip: String,
    pub universe: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            use_multicast: true,
            unicast_ip: "192.168.1.50".to_string(), // Default placeholder
            universe: 1,
        }
    }
}

/// Expand sparse entries into a dense array of `channel_count` slots.
/// Channels without an entry read as 0; entries past the end are dropped.
pub fn sparse_to_dense(channel_count: usize, entries: &[SparseEntry]) -> Vec<ChannelValue> {
    let mut dense = vec![0; channel_count];
    for entry in entries {
        if let Some(slot) = dense.get_mut(entry.offset) {
            *slot = entry.value;
        }
    }
    dense
}

/// Collapse a dense array to sparse entries, keeping only channels in `active`.
/// `None` keeps every channel.
pub fn dense_to_sparse(dense: &[ChannelValue], active: Option<&BTreeSet<ChannelIndex>>) -> Vec<SparseEntry> {
    dense
        .iter()
        .enumerate()
        .filter(|(offset, _)| active.map_or(true, |set| set.contains(offset)))
        .map(|(offset, &value)| SparseEntry { offset, value })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_active_round_trip() {
        let dense = vec![12, 0, 255, 7];
        let sparse = dense_to_sparse(&dense, None);
        assert_eq!(sparse.len(), 4);
        assert_eq!(sparse_to_dense(dense.len(), &sparse), dense);

        let all: BTreeSet<ChannelIndex> = (0..4).collect();
        let sparse = dense_to_sparse(&dense, Some(&all));
        assert_eq!(sparse_to_dense(dense.len(), &sparse), dense, "Explicit full set should round-trip too");
    }

    #[test]
    fn test_narrow_active_set_omits_channels() {
        let dense = vec![10, 20, 30, 40];
        let active: BTreeSet<ChannelIndex> = [0, 2].into_iter().collect();
        let sparse = dense_to_sparse(&dense, Some(&active));

        assert_eq!(sparse, vec![SparseEntry { offset: 0, value: 10 }, SparseEntry { offset: 2, value: 30 }]);
        assert!(sparse.iter().all(|e| e.offset != 1 && e.offset != 3), "Inactive offsets must not be saved");
    }

    #[test]
    fn test_empty_active_set_saves_nothing() {
        let active = BTreeSet::new();
        assert!(dense_to_sparse(&[1, 2, 3], Some(&active)).is_empty());
    }

    #[test]
    fn test_sparse_entries_past_end_are_dropped() {
        let entries = [SparseEntry { offset: 1, value: 9 }, SparseEntry { offset: 8, value: 50 }];
        assert_eq!(sparse_to_dense(3, &entries), vec![0, 9, 0]);
    }

    #[test]
    fn test_range_clamp() {
        let range = ChannelRange { min: 10, max: 100 };
        assert_eq!(range.clamp(0), 10);
        assert_eq!(range.clamp(500), 100);
        assert_eq!(ChannelRange::default().clamp(300), 255);
    }
}
