//! Working channel values per fixture.
//!
//! The store keeps two layers: the last values known to be saved (`server`)
//! and the values edited in this session (`working`). A fixture only gets a
//! working copy on its first write; reads fall through to the server layer
//! until then. Fixtures may exist only in `working` (added, never saved).

use crate::error::EditError;
use crate::model::{ChannelIndex, ChannelRange, ChannelValue, FixtureId};
use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// A requested write of one channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelChange {
    pub fixture_id: FixtureId,
    pub index: ChannelIndex,
    pub value: ChannelValue,
}

impl ChannelChange {
    pub fn new(fixture_id: FixtureId, index: ChannelIndex, value: ChannelValue) -> Self {
        Self { fixture_id, index, value }
    }
}

/// A committed write: what the cell held before and what it holds now (after clamping).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CellWrite {
    pub fixture_id: FixtureId,
    pub index: ChannelIndex,
    pub previous: ChannelValue,
    pub value: ChannelValue,
}

#[derive(Debug, Default, Clone)]
pub struct ChannelStore {
    working: HashMap<FixtureId, Vec<ChannelValue>>,
    server: HashMap<FixtureId, Vec<ChannelValue>>,
    ranges: HashMap<FixtureId, Vec<ChannelRange>>,
}

impl ChannelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the saved values of a fixture. Any working copy is left alone.
    pub fn seed_server(&mut self, fixture_id: FixtureId, values: Vec<ChannelValue>) {
        self.server.insert(fixture_id, values);
    }

    /// Add a fixture that has no saved counterpart yet.
    pub fn insert_working(&mut self, fixture_id: FixtureId, values: Vec<ChannelValue>) {
        self.working.insert(fixture_id, values);
    }

    /// Declare per-channel ranges. Channels past the end of `ranges` use the default range.
    pub fn set_ranges(&mut self, fixture_id: FixtureId, ranges: Vec<ChannelRange>) {
        if ranges.is_empty() {
            self.ranges.remove(&fixture_id);
        } else {
            self.ranges.insert(fixture_id, ranges);
        }
    }

    pub fn range(&self, fixture_id: FixtureId, index: ChannelIndex) -> ChannelRange {
        self.ranges
            .get(&fixture_id)
            .and_then(|r| r.get(index))
            .copied()
            .unwrap_or_default()
    }

    pub fn contains(&self, fixture_id: FixtureId) -> bool {
        self.working.contains_key(&fixture_id) || self.server.contains_key(&fixture_id)
    }

    /// Current values of a fixture: the working copy if there is one, otherwise the saved values.
    pub fn get(&self, fixture_id: FixtureId) -> Result<&[ChannelValue], EditError> {
        self.working
            .get(&fixture_id)
            .or_else(|| self.server.get(&fixture_id))
            .map(Vec::as_slice)
            .ok_or(EditError::UnknownFixture(fixture_id))
    }

    pub fn channel_count(&self, fixture_id: FixtureId) -> Result<usize, EditError> {
        self.get(fixture_id).map(<[ChannelValue]>::len)
    }

    pub fn value(&self, fixture_id: FixtureId, index: ChannelIndex) -> Result<ChannelValue, EditError> {
        let values = self.get(fixture_id)?;
        values.get(index).copied().ok_or(EditError::IndexOutOfBounds {
            fixture_id,
            index,
            len: values.len(),
        })
    }

    /// Write one channel, clamped to its range. Returns the previous and stored values.
    pub fn set_channel(&mut self, fixture_id: FixtureId, index: ChannelIndex, value: ChannelValue) -> Result<CellWrite, EditError> {
        let previous = self.value(fixture_id, index)?;
        let value = self.range(fixture_id, index).clamp(value);
        self.working_mut(fixture_id)?[index] = value;
        Ok(CellWrite { fixture_id, index, previous, value })
    }

    /// Apply several writes as one step.
    ///
    /// Every change is validated before anything is written, so an invalid
    /// change leaves the store untouched. Previous values come from the state
    /// before the batch; a cell written twice reports its pre-batch value and
    /// its last written value. Writes are returned once per distinct cell, in
    /// the order each cell first appears.
    pub fn batch_set(&mut self, changes: &[ChannelChange]) -> Result<Vec<CellWrite>, EditError> {
        let mut writes: Vec<CellWrite> = Vec::with_capacity(changes.len());
        let mut seen: HashMap<(FixtureId, ChannelIndex), usize> = HashMap::new();

        for change in changes {
            let previous = self.value(change.fixture_id, change.index)?;
            let value = self.range(change.fixture_id, change.index).clamp(change.value);
            match seen.entry((change.fixture_id, change.index)) {
                Entry::Occupied(e) => writes[*e.get()].value = value,
                Entry::Vacant(e) => {
                    e.insert(writes.len());
                    writes.push(CellWrite {
                        fixture_id: change.fixture_id,
                        index: change.index,
                        previous,
                        value,
                    });
                }
            }
        }

        for write in &writes {
            self.working_mut(write.fixture_id)?[write.index] = write.value;
        }
        Ok(writes)
    }

    fn working_mut(&mut self, fixture_id: FixtureId) -> Result<&mut Vec<ChannelValue>, EditError> {
        match self.working.entry(fixture_id) {
            Entry::Occupied(e) => Ok(e.into_mut()),
            Entry::Vacant(e) => {
                let base = self.server.get(&fixture_id).ok_or(EditError::UnknownFixture(fixture_id))?;
                Ok(e.insert(base.clone()))
            }
        }
    }

    pub fn has_working(&self, fixture_id: FixtureId) -> bool {
        self.working.contains_key(&fixture_id)
    }

    pub fn remove_working(&mut self, fixture_id: FixtureId) -> Option<Vec<ChannelValue>> {
        self.working.remove(&fixture_id)
    }

    pub fn working(&self) -> &HashMap<FixtureId, Vec<ChannelValue>> {
        &self.working
    }

    pub fn server(&self) -> &HashMap<FixtureId, Vec<ChannelValue>> {
        &self.server
    }

    /// Every fixture id known to either layer.
    pub fn fixture_ids(&self) -> Vec<FixtureId> {
        let mut ids: Vec<FixtureId> = self.server.keys().chain(self.working.keys()).copied().collect();
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn clear_working(&mut self) {
        self.working.clear();
    }

    /// Replace the saved layer wholesale and drop all working copies.
    pub fn commit(&mut self, saved: HashMap<FixtureId, Vec<ChannelValue>>) {
        self.server = saved;
        self.working.clear();
        self.ranges.retain(|id, _| self.server.contains_key(id));
    }

    pub fn clear(&mut self) {
        self.working.clear();
        self.server.clear();
        self.ranges.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const F: FixtureId = FixtureId(1);
    const G: FixtureId = FixtureId(2);

    fn store() -> ChannelStore {
        let mut store = ChannelStore::new();
        store.seed_server(F, vec![0, 0, 0, 0]);
        store.seed_server(G, vec![5, 6]);
        store
    }

    #[test]
    fn test_get_falls_back_to_server() {
        let store = store();
        assert_eq!(store.get(F).unwrap(), &[0, 0, 0, 0]);
        assert!(!store.has_working(F), "Reads must not create a working copy");
        assert_eq!(store.get(FixtureId(99)), Err(EditError::UnknownFixture(FixtureId(99))));
    }

    #[test]
    fn test_set_channel_copies_on_write() {
        let mut store = store();
        let write = store.set_channel(F, 2, 128).unwrap();

        assert_eq!(write, CellWrite { fixture_id: F, index: 2, previous: 0, value: 128 });
        assert_eq!(store.get(F).unwrap(), &[0, 0, 128, 0]);
        assert_eq!(store.server()[&F], vec![0, 0, 0, 0], "Server layer must stay untouched");
    }

    #[test]
    fn test_set_channel_out_of_bounds() {
        let mut store = store();
        let err = store.set_channel(F, 4, 10).unwrap_err();
        assert_eq!(err, EditError::IndexOutOfBounds { fixture_id: F, index: 4, len: 4 });
        assert!(!store.has_working(F), "Failed write must not materialize a working copy");
    }

    #[test]
    fn test_set_channel_clamps_to_range() {
        let mut store = store();
        store.set_ranges(F, vec![ChannelRange { min: 0, max: 255 }, ChannelRange { min: 20, max: 200 }]);

        assert_eq!(store.set_channel(F, 1, 255).unwrap().value, 200);
        assert_eq!(store.set_channel(F, 1, 3).unwrap().value, 20);
        assert_eq!(store.set_channel(F, 3, 999).unwrap().value, 255, "Undeclared channels use the default range");
    }

    #[test]
    fn test_batch_set_uses_pre_batch_values() {
        let mut store = store();
        store.set_channel(F, 0, 50).unwrap();

        let writes = store
            .batch_set(&[
                ChannelChange::new(F, 0, 10),
                ChannelChange::new(G, 1, 60),
                ChannelChange::new(F, 0, 11),
            ])
            .unwrap();

        assert_eq!(writes.len(), 2, "Repeated cell should collapse to one write");
        assert_eq!(writes[0], CellWrite { fixture_id: F, index: 0, previous: 50, value: 11 });
        assert_eq!(writes[1], CellWrite { fixture_id: G, index: 1, previous: 6, value: 60 });
        assert_eq!(store.get(G).unwrap(), &[5, 60]);
    }

    #[test]
    fn test_batch_set_is_all_or_nothing() {
        let mut store = store();
        let result = store.batch_set(&[ChannelChange::new(F, 0, 10), ChannelChange::new(G, 7, 1)]);

        assert!(result.is_err());
        assert_eq!(store.get(F).unwrap(), &[0, 0, 0, 0], "No change may land when one is invalid");
    }

    #[test]
    fn test_working_only_fixture() {
        let mut store = store();
        let new = FixtureId(3);
        store.insert_working(new, vec![0; 3]);
        store.set_channel(new, 2, 9).unwrap();

        assert_eq!(store.get(new).unwrap(), &[0, 0, 9]);
        assert_eq!(store.fixture_ids(), vec![F, G, new]);
    }

    #[test]
    fn test_commit_replaces_server_and_clears_working() {
        let mut store = store();
        store.set_channel(F, 0, 1).unwrap();

        let mut saved = HashMap::new();
        saved.insert(F, vec![1, 0, 0, 0]);
        store.commit(saved);

        assert!(store.working().is_empty());
        assert_eq!(store.get(F).unwrap(), &[1, 0, 0, 0]);
        assert!(!store.contains(G), "Fixtures left out of the commit are gone");
    }
}
