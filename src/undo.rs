//! Coalescing undo/redo log of channel edits.
//!
//! Each [`UndoAction`] stores the before and after value of every cell it
//! touched, so undo and redo replay values instead of restoring snapshots.
//!
//! - Pushing clears the redo stack.
//! - A push that repeats the previous action's kind and exact cell set within
//!   the coalesce window is folded into it. A slider drag therefore becomes
//!   one undo step whose before-values are those from the start of the drag.
//! - The undo stack is bounded; the oldest entry is dropped silently.
//!
//! Views that share one history (a look editor and an embedded fixture
//! panel, say) hold the same [`SharedUndoStack`] rather than separate stacks.

use crate::active::ActiveSpec;
use crate::model::{ChannelIndex, ChannelValue, FixtureId};
use std::cell::RefCell;
use std::collections::{BTreeSet, VecDeque};
use std::rc::Rc;
use std::time::{Duration, Instant};

pub const DEFAULT_MAX_UNDO: usize = 50;
pub const DEFAULT_COALESCE_WINDOW: Duration = Duration::from_millis(500);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UndoKind {
    SetChannel,
    Batch,
    Paste,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UndoDelta {
    pub fixture_id: FixtureId,
    pub index: ChannelIndex,
    pub previous: ChannelValue,
    pub value: ChannelValue,
}

/// Active membership of one fixture before and after an action.
#[derive(Clone, Debug, PartialEq)]
pub struct ActiveDelta {
    pub fixture_id: FixtureId,
    pub previous: ActiveSpec,
    pub value: ActiveSpec,
}

#[derive(Clone, Debug, PartialEq)]
pub struct UndoAction {
    pub kind: UndoKind,
    pub deltas: Vec<UndoDelta>,
    pub active: Vec<ActiveDelta>,
    pub timestamp: Instant,
}

impl UndoAction {
    pub fn new(kind: UndoKind, deltas: Vec<UndoDelta>, timestamp: Instant) -> Self {
        Self { kind, deltas, active: Vec::new(), timestamp }
    }

    pub fn with_active(mut self, active: Vec<ActiveDelta>) -> Self {
        self.active = active;
        self
    }

    fn cells(&self) -> BTreeSet<(FixtureId, ChannelIndex)> {
        self.deltas.iter().map(|d| (d.fixture_id, d.index)).collect()
    }

    fn can_absorb(&self, next: &UndoAction, window: Duration) -> bool {
        self.kind == next.kind
            && next.timestamp.saturating_duration_since(self.timestamp) <= window
            && self.cells() == next.cells()
    }

    /// Take the newer values of `next`, keeping this action's before-values.
    fn absorb(&mut self, next: UndoAction) {
        for delta in next.deltas {
            if let Some(existing) = self
                .deltas
                .iter_mut()
                .find(|d| d.fixture_id == delta.fixture_id && d.index == delta.index)
            {
                existing.value = delta.value;
            }
        }
        for delta in next.active {
            match self.active.iter_mut().find(|d| d.fixture_id == delta.fixture_id) {
                Some(existing) => existing.value = delta.value,
                None => self.active.push(delta),
            }
        }
        self.timestamp = next.timestamp;
    }
}

/// The history interface an edit session talks to.
pub trait UndoHistory {
    fn push(&mut self, action: UndoAction);
    /// Move the newest action to the redo stack and return it. `None` when empty.
    fn undo(&mut self) -> Option<UndoAction>;
    /// Move the newest undone action back and return it. `None` when empty.
    fn redo(&mut self) -> Option<UndoAction>;
    fn peek_undo(&self) -> Option<UndoAction>;
    fn peek_redo(&self) -> Option<UndoAction>;
    fn undo_len(&self) -> usize;
    fn redo_len(&self) -> usize;
    fn clear(&mut self);

    fn can_undo(&self) -> bool {
        self.undo_len() > 0
    }

    fn can_redo(&self) -> bool {
        self.redo_len() > 0
    }
}

pub struct UndoStack {
    undo_stack: VecDeque<UndoAction>,
    redo_stack: Vec<UndoAction>,
    max_size: usize,
    coalesce_window: Duration,
}

pub type SharedUndoStack = Rc<RefCell<UndoStack>>;

impl Default for UndoStack {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_UNDO, DEFAULT_COALESCE_WINDOW)
    }
}

impl UndoStack {
    pub fn new(max_size: usize, coalesce_window: Duration) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: Vec::new(),
            max_size: max_size.max(1),
            coalesce_window,
        }
    }

    pub fn shared(self) -> SharedUndoStack {
        Rc::new(RefCell::new(self))
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn coalesce_window(&self) -> Duration {
        self.coalesce_window
    }
}

impl UndoHistory for UndoStack {
    fn push(&mut self, action: UndoAction) {
        self.redo_stack.clear();

        if let Some(top) = self.undo_stack.back_mut() {
            if top.can_absorb(&action, self.coalesce_window) {
                top.absorb(action);
                log::trace!("[UNDO] Coalesced into top entry ({} deltas)", top.deltas.len());
                return;
            }
        }

        self.undo_stack.push_back(action);
        while self.undo_stack.len() > self.max_size {
            self.undo_stack.pop_front();
        }

        log::debug!("[UNDO] Entry pushed, depth {}", self.undo_stack.len());
    }

    fn undo(&mut self) -> Option<UndoAction> {
        let action = self.undo_stack.pop_back()?;
        self.redo_stack.push(action.clone());
        log::debug!("[UNDO] Undo {:?}, {} remaining", action.kind, self.undo_stack.len());
        Some(action)
    }

    fn redo(&mut self) -> Option<UndoAction> {
        let action = self.redo_stack.pop()?;
        self.undo_stack.push_back(action.clone());
        log::debug!("[UNDO] Redo {:?}, {} remaining", action.kind, self.redo_stack.len());
        Some(action)
    }

    fn peek_undo(&self) -> Option<UndoAction> {
        self.undo_stack.back().cloned()
    }

    fn peek_redo(&self) -> Option<UndoAction> {
        self.redo_stack.last().cloned()
    }

    fn undo_len(&self) -> usize {
        self.undo_stack.len()
    }

    fn redo_len(&self) -> usize {
        self.redo_stack.len()
    }

    fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }
}

impl<T: UndoHistory + ?Sized> UndoHistory for Rc<RefCell<T>> {
    fn push(&mut self, action: UndoAction) {
        self.borrow_mut().push(action)
    }

    fn undo(&mut self) -> Option<UndoAction> {
        self.borrow_mut().undo()
    }

    fn redo(&mut self) -> Option<UndoAction> {
        self.borrow_mut().redo()
    }

    fn peek_undo(&self) -> Option<UndoAction> {
        self.borrow().peek_undo()
    }

    fn peek_redo(&self) -> Option<UndoAction> {
        self.borrow().peek_redo()
    }

    fn undo_len(&self) -> usize {
        self.borrow().undo_len()
    }

    fn redo_len(&self) -> usize {
        self.borrow().redo_len()
    }

    fn clear(&mut self) {
        self.borrow_mut().clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const F: FixtureId = FixtureId(1);

    fn delta(index: ChannelIndex, previous: ChannelValue, value: ChannelValue) -> UndoDelta {
        UndoDelta { fixture_id: F, index, previous, value }
    }

    fn set_action(index: ChannelIndex, previous: ChannelValue, value: ChannelValue, at: Instant) -> UndoAction {
        UndoAction::new(UndoKind::SetChannel, vec![delta(index, previous, value)], at)
    }

    #[test]
    fn test_coalesce_same_cell_within_window() {
        let t0 = Instant::now();
        let mut stack = UndoStack::default();
        stack.push(set_action(0, 0, 10, t0));
        stack.push(set_action(0, 10, 20, t0 + Duration::from_millis(100)));
        stack.push(set_action(0, 20, 30, t0 + Duration::from_millis(550)));

        assert_eq!(stack.undo_len(), 1, "Drag within the window should be one entry");
        let top = stack.peek_undo().unwrap();
        assert_eq!(top.deltas, vec![delta(0, 0, 30)]);
        assert_eq!(top.timestamp, t0 + Duration::from_millis(550), "Timestamp should refresh on merge");
    }

    #[test]
    fn test_coalesce_keeps_first_membership() {
        let t0 = Instant::now();
        fn spec(items: &[ChannelIndex]) -> ActiveSpec {
            ActiveSpec::Explicit(items.iter().copied().collect())
        }
        let mut stack = UndoStack::default();
        stack.push(
            UndoAction::new(UndoKind::Paste, vec![delta(0, 0, 10)], t0).with_active(vec![ActiveDelta {
                fixture_id: F,
                previous: ActiveSpec::AllActive,
                value: spec(&[0]),
            }]),
        );
        stack.push(
            UndoAction::new(UndoKind::Paste, vec![delta(0, 10, 20)], t0 + Duration::from_millis(100)).with_active(vec![
                ActiveDelta { fixture_id: F, previous: spec(&[0]), value: spec(&[0, 1]) },
            ]),
        );

        let top = stack.peek_undo().unwrap();
        assert_eq!(top.active.len(), 1);
        assert_eq!(top.active[0].previous, ActiveSpec::AllActive, "Merged entry keeps the membership from before the first paste");
        assert_eq!(top.active[0].value, spec(&[0, 1]));
    }

    #[test]
    fn test_no_coalesce_outside_window() {
        let t0 = Instant::now();
        let mut stack = UndoStack::default();
        stack.push(set_action(0, 0, 10, t0));
        stack.push(set_action(0, 10, 20, t0 + Duration::from_millis(501)));
        assert_eq!(stack.undo_len(), 2);
    }

    #[test]
    fn test_no_coalesce_different_cells_or_kind() {
        let t0 = Instant::now();
        let mut stack = UndoStack::default();
        stack.push(set_action(0, 0, 10, t0));
        stack.push(set_action(1, 0, 10, t0));
        assert_eq!(stack.undo_len(), 2, "Different cell must not merge");

        stack.push(UndoAction::new(UndoKind::Batch, vec![delta(1, 10, 11)], t0));
        assert_eq!(stack.undo_len(), 3, "Different kind must not merge");
    }

    #[test]
    fn test_bounded_history_drops_oldest() {
        let t0 = Instant::now();
        let mut stack = UndoStack::new(3, Duration::from_millis(500));
        for i in 0..4 {
            stack.push(set_action(i, 0, 1, t0));
        }

        assert_eq!(stack.undo_len(), 3);
        let mut remaining = Vec::new();
        while let Some(action) = stack.undo() {
            remaining.push(action.deltas[0].index);
        }
        assert_eq!(remaining, vec![3, 2, 1], "Entry for channel 0 should have been evicted");
    }

    #[test]
    fn test_undo_redo_moves_between_stacks() {
        let t0 = Instant::now();
        let mut stack = UndoStack::default();
        assert!(stack.undo().is_none(), "Empty undo is a no-op");
        assert!(stack.redo().is_none(), "Empty redo is a no-op");

        stack.push(set_action(0, 0, 10, t0));
        let undone = stack.undo().unwrap();
        assert!(!stack.can_undo());
        assert!(stack.can_redo());

        let redone = stack.redo().unwrap();
        assert_eq!(undone, redone);
        assert!(stack.can_undo());
        assert!(!stack.can_redo());
    }

    #[test]
    fn test_push_clears_redo() {
        let t0 = Instant::now();
        let mut stack = UndoStack::default();
        stack.push(set_action(0, 0, 10, t0));
        stack.undo();
        stack.push(set_action(1, 0, 5, t0 + Duration::from_secs(1)));
        assert!(!stack.can_redo());
    }

    #[test]
    fn test_peek_does_not_mutate() {
        let t0 = Instant::now();
        let mut stack = UndoStack::default();
        stack.push(set_action(0, 0, 10, t0));
        assert!(stack.peek_undo().is_some());
        assert!(stack.peek_redo().is_none());
        assert_eq!(stack.undo_len(), 1);
    }

    #[test]
    fn test_shared_stack_sees_same_history() {
        let t0 = Instant::now();
        let shared = UndoStack::default().shared();
        let mut parent = shared.clone();
        let child = shared.clone();

        parent.push(set_action(0, 0, 10, t0));
        assert_eq!(child.undo_len(), 1);
        assert_eq!(child.peek_undo().unwrap().deltas[0].value, 10);
    }
}
