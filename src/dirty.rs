//! Unsaved-change detection.
//!
//! Computed on demand from the session state rather than tracked on every
//! edit. A fixture with working values but no saved counterpart is always
//! dirty.

use crate::model::FixtureId;
use crate::session::EditSessionState;
use std::collections::BTreeSet;

pub fn is_dirty(state: &EditSessionState) -> bool {
    if !state.removed.is_empty() {
        return true;
    }

    let server = state.channels.server();
    for (id, values) in state.channels.working() {
        match server.get(id) {
            Some(saved) if saved == values => {}
            _ => return true,
        }
    }

    let initial = state.active.initial();
    for (id, current) in state.active.current() {
        if active_set_changed(current, initial.get(id)) {
            return true;
        }
    }

    let current = state.active.current();
    initial.keys().any(|id| !current.contains_key(id))
}

/// Fixtures that would make [`is_dirty`] true, in id order.
pub fn dirty_fixtures(state: &EditSessionState) -> BTreeSet<FixtureId> {
    let mut dirty: BTreeSet<FixtureId> = state.removed.iter().copied().collect();

    let server = state.channels.server();
    for (id, values) in state.channels.working() {
        if server.get(id) != Some(values) {
            dirty.insert(*id);
        }
    }

    let initial = state.active.initial();
    let current = state.active.current();
    for (id, set) in current {
        if active_set_changed(set, initial.get(id)) {
            dirty.insert(*id);
        }
    }
    dirty.extend(initial.keys().filter(|id| !current.contains_key(id)).copied());

    dirty
}

fn active_set_changed(current: &BTreeSet<usize>, initial: Option<&BTreeSet<usize>>) -> bool {
    match initial {
        None => !current.is_empty(),
        Some(initial) => current.len() != initial.len() || current.iter().any(|i| !initial.contains(i)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SparseEntry;

    const F: FixtureId = FixtureId(1);
    const G: FixtureId = FixtureId(2);

    fn loaded() -> EditSessionState {
        let mut state = EditSessionState::default();
        state.channels.seed_server(F, vec![0, 0, 0, 0]);
        state.channels.seed_server(G, vec![9, 9]);
        state.active.initialize_from_sparse(G, &[SparseEntry { offset: 0, value: 9 }]);
        state
    }

    #[test]
    fn test_fresh_state_is_clean() {
        let state = loaded();
        assert!(!is_dirty(&state));
        assert!(dirty_fixtures(&state).is_empty());
    }

    #[test]
    fn test_working_value_change_is_dirty() {
        let mut state = loaded();
        state.channels.set_channel(F, 1, 200).unwrap();
        assert!(is_dirty(&state));
        assert_eq!(dirty_fixtures(&state), BTreeSet::from([F]));

        state.channels.set_channel(F, 1, 0).unwrap();
        assert!(!is_dirty(&state), "Writing the saved value back should be clean again");
    }

    #[test]
    fn test_new_fixture_is_dirty() {
        let mut state = loaded();
        state.channels.insert_working(FixtureId(7), vec![0, 0]);
        assert!(is_dirty(&state), "Working-only fixture should count as dirty");
    }

    #[test]
    fn test_removed_fixture_is_dirty() {
        let mut state = loaded();
        state.removed.insert(F);
        assert!(is_dirty(&state));
    }

    #[test]
    fn test_active_set_changes() {
        let mut state = loaded();
        state.active.set_active(G, 1, true, 2);
        assert!(is_dirty(&state), "Added member should be dirty");

        state.active.set_active(G, 1, false, 2);
        assert!(!is_dirty(&state));

        state.active.set_active(G, 0, false, 2);
        state.active.set_active(G, 1, true, 2);
        assert!(is_dirty(&state), "Same size but different member should be dirty");
    }

    #[test]
    fn test_untracking_a_baseline_fixture_is_dirty() {
        let mut state = loaded();
        state.active.untrack(G);
        assert!(is_dirty(&state));
    }

    #[test]
    fn test_new_explicit_set_without_baseline() {
        let mut state = loaded();
        state.active.set_active(F, 0, false, 4);
        assert!(is_dirty(&state), "Non-empty set on an untracked fixture should be dirty");

        let mut state = loaded();
        state.active.set_spec(F, crate::active::ActiveSpec::Explicit(BTreeSet::new()));
        assert!(!is_dirty(&state), "Empty set without a baseline is not counted");
    }
}
