//! The look editing session.
//!
//! An [`EditSession`] owns everything that changes while a look is open in
//! the editor: working channel values, active-channel sets, removed fixtures,
//! the clipboard, the undo history and the preview link. Every input goes
//! through one method here, which applies the change to the channel store,
//! records it in the undo history and then schedules preview output, in that
//! order.
//!
//! The session is single-threaded. Hosts that save off the input path use
//! [`EditSession::begin_save`] and [`EditSession::finish_save`]; everyone
//! else calls [`EditSession::save`]. [`EditSession::tick`] must be called
//! from the host's event loop to drive the preview debounce and to expire
//! save errors.

use crate::active::{ActiveChannelTracker, ActiveSpec};
use crate::backend::{LookSink, LookSource, PreviewBackend, PreviewSessionId};
use crate::channels::{CellWrite, ChannelChange, ChannelStore};
use crate::clipboard::ChannelClipboard;
use crate::clock::{Clock, SystemClock};
use crate::config::SessionConfig;
use crate::dirty;
use crate::error::{EditError, PreviewError};
use crate::model::{
    dense_to_sparse, sparse_to_dense, ChannelIndex, ChannelValue, FixtureChannels, FixtureId, LookId, LookSnapshot,
    ProjectId,
};
use crate::preview::PreviewSync;
use crate::undo::{ActiveDelta, UndoAction, UndoDelta, UndoHistory, UndoKind, UndoStack};
use log::{debug, info, warn};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::{Duration, Instant};

/// Editable state of one open look.
#[derive(Debug, Default, Clone)]
pub struct EditSessionState {
    pub channels: ChannelStore,
    pub active: ActiveChannelTracker,
    pub removed: HashSet<FixtureId>,
}

impl EditSessionState {
    fn reset(&mut self) {
        self.channels.clear();
        self.active.clear();
        self.removed.clear();
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    Loading,
    Ready,
    Editing,
    PreviewActive,
    Saving,
    Closed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Lifecycle {
    Loading,
    Open,
    Saving,
    Closed,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SaveError {
    pub message: String,
    pub raised_at: Instant,
}

/// Payload of a save in flight. Hand it back to [`EditSession::finish_save`].
#[derive(Debug)]
pub struct SaveRequest {
    look_id: LookId,
    fixtures: Vec<FixtureChannels>,
    values: HashMap<FixtureId, Vec<ChannelValue>>,
}

impl SaveRequest {
    pub fn look_id(&self) -> LookId {
        self.look_id
    }

    pub fn fixtures(&self) -> &[FixtureChannels] {
        &self.fixtures
    }
}

pub struct EditSession {
    look_id: LookId,
    project_id: ProjectId,
    lifecycle: Lifecycle,
    state: EditSessionState,
    undo: Box<dyn UndoHistory>,
    preview: PreviewSync,
    clipboard: Option<ChannelClipboard>,
    clock: Box<dyn Clock>,
    save_error: Option<SaveError>,
    error_clear: Duration,
}

impl EditSession {
    pub fn new(look_id: LookId, project_id: ProjectId, config: &SessionConfig) -> Self {
        Self {
            look_id,
            project_id,
            lifecycle: Lifecycle::Loading,
            state: EditSessionState::default(),
            undo: Box::new(UndoStack::new(config.max_undo, config.coalesce_window())),
            preview: PreviewSync::new(config.preview_debounce()),
            clipboard: None,
            clock: Box::new(SystemClock),
            save_error: None,
            error_clear: config.error_clear(),
        }
    }

    /// Use a history shared with another view instead of a private stack.
    pub fn with_undo(mut self, undo: Box<dyn UndoHistory>) -> Self {
        self.undo = undo;
        self
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn look_id(&self) -> LookId {
        self.look_id
    }

    pub fn status(&self) -> SessionStatus {
        match self.lifecycle {
            Lifecycle::Loading => SessionStatus::Loading,
            Lifecycle::Saving => SessionStatus::Saving,
            Lifecycle::Closed => SessionStatus::Closed,
            Lifecycle::Open if self.preview.is_active() => SessionStatus::PreviewActive,
            Lifecycle::Open if self.is_dirty() => SessionStatus::Editing,
            Lifecycle::Open => SessionStatus::Ready,
        }
    }

    pub fn state(&self) -> &EditSessionState {
        &self.state
    }

    // ---- loading ----

    pub fn load(&mut self, source: &mut dyn LookSource) -> Result<(), EditError> {
        if self.lifecycle == Lifecycle::Closed || self.lifecycle == Lifecycle::Saving {
            return Err(EditError::NotEditable(self.status()));
        }
        let snapshot = source
            .fetch_look(self.look_id)
            .map_err(|e| EditError::Load(format!("{:#}", e)))?;
        self.seed(snapshot);
        Ok(())
    }

    /// Refetch the look, dropping all edits and history. A running preview is reseeded.
    pub fn reload(&mut self, source: &mut dyn LookSource) -> Result<(), EditError> {
        self.load(source)?;
        self.reseed_preview();
        Ok(())
    }

    /// Replace all state with a fetched snapshot.
    fn seed(&mut self, snapshot: LookSnapshot) {
        if snapshot.look_id != self.look_id {
            warn!("[LOOKS] Seeding look {} with a snapshot of look {}", self.look_id, snapshot.look_id);
        }
        self.state.reset();
        for fixture in &snapshot.fixtures {
            let dense = sparse_to_dense(fixture.channel_count, &fixture.channels);
            self.state.channels.seed_server(fixture.fixture_id, dense);
            self.state.channels.set_ranges(fixture.fixture_id, fixture.ranges.clone());
            self.state.active.initialize_from_sparse(fixture.fixture_id, &fixture.channels);
        }
        self.undo.clear();
        self.save_error = None;
        self.lifecycle = Lifecycle::Open;
        info!("[LOOKS] Look {} loaded with {} fixtures", self.look_id, snapshot.fixtures.len());
    }

    // ---- queries ----

    pub fn get(&self, fixture_id: FixtureId) -> Result<&[ChannelValue], EditError> {
        self.state.channels.get(fixture_id)
    }

    pub fn value(&self, fixture_id: FixtureId, index: ChannelIndex) -> Result<ChannelValue, EditError> {
        self.state.channels.value(fixture_id, index)
    }

    pub fn is_active(&self, fixture_id: FixtureId, index: ChannelIndex) -> bool {
        self.state.active.is_active(fixture_id, index)
    }

    pub fn active_spec(&self, fixture_id: FixtureId) -> ActiveSpec {
        self.state.active.spec(fixture_id)
    }

    /// Fixtures currently in the look, removed ones excluded.
    pub fn fixture_ids(&self) -> Vec<FixtureId> {
        self.state
            .channels
            .fixture_ids()
            .into_iter()
            .filter(|id| !self.state.removed.contains(id))
            .collect()
    }

    pub fn is_removed(&self, fixture_id: FixtureId) -> bool {
        self.state.removed.contains(&fixture_id)
    }

    pub fn is_dirty(&self) -> bool {
        dirty::is_dirty(&self.state)
    }

    pub fn dirty_fixtures(&self) -> BTreeSet<FixtureId> {
        dirty::dirty_fixtures(&self.state)
    }

    pub fn can_undo(&self) -> bool {
        self.undo.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.undo.can_redo()
    }

    pub fn clipboard(&self) -> Option<&ChannelClipboard> {
        self.clipboard.as_ref()
    }

    pub fn save_error(&self) -> Option<&SaveError> {
        self.save_error.as_ref()
    }

    pub fn preview_error(&self) -> Option<&PreviewError> {
        self.preview.last_error()
    }

    pub fn take_preview_error(&mut self) -> Option<PreviewError> {
        self.preview.take_error()
    }

    // ---- edits ----

    /// Set one channel. Returns the value actually stored after clamping.
    pub fn set_channel_value(
        &mut self,
        fixture_id: FixtureId,
        index: ChannelIndex,
        value: ChannelValue,
    ) -> Result<ChannelValue, EditError> {
        self.ensure_editable()?;
        self.ensure_present(fixture_id)?;
        let write = self.state.channels.set_channel(fixture_id, index, value)?;
        if write.previous == write.value {
            return Ok(write.value);
        }

        let now = self.clock.now();
        self.undo
            .push(UndoAction::new(UndoKind::SetChannel, vec![delta_of(&write)], now));
        self.preview
            .schedule_debounced(&[ChannelChange::new(fixture_id, index, write.value)], now);
        Ok(write.value)
    }

    /// Apply several writes as one undo step. Returns the number of distinct cells written.
    pub fn batch_apply(&mut self, changes: &[ChannelChange]) -> Result<usize, EditError> {
        self.ensure_editable()?;
        for change in changes {
            self.ensure_present(change.fixture_id)?;
        }
        let writes = self.state.channels.batch_set(changes)?;
        if writes.iter().all(|w| w.previous == w.value) {
            return Ok(writes.len());
        }

        let now = self.clock.now();
        self.undo
            .push(UndoAction::new(UndoKind::Batch, writes.iter().map(delta_of).collect(), now));
        self.preview.schedule_debounced(&changes_of(&writes), now);
        Ok(writes.len())
    }

    /// Flip whether a channel is saved. Returns the new state.
    pub fn toggle_channel_active(&mut self, fixture_id: FixtureId, index: ChannelIndex) -> Result<bool, EditError> {
        let active = !self.state.active.is_active(fixture_id, index);
        self.set_channel_active(fixture_id, index, active)?;
        Ok(active)
    }

    pub fn set_channel_active(&mut self, fixture_id: FixtureId, index: ChannelIndex, active: bool) -> Result<(), EditError> {
        self.ensure_editable()?;
        self.ensure_present(fixture_id)?;
        let len = self.state.channels.channel_count(fixture_id)?;
        if index >= len {
            return Err(EditError::IndexOutOfBounds { fixture_id, index, len });
        }
        self.state.active.set_active(fixture_id, index, active, len);
        debug!("[LOOKS] {} ch {} active={}", fixture_id, index, active);
        Ok(())
    }

    /// Select all (`AllActive`) or a given set of channels. Members past the end are dropped.
    pub fn set_fixture_active(&mut self, fixture_id: FixtureId, spec: ActiveSpec) -> Result<(), EditError> {
        self.ensure_editable()?;
        self.ensure_present(fixture_id)?;
        let len = self.state.channels.channel_count(fixture_id)?;
        self.state.active.set_spec(fixture_id, spec.truncated(len));
        Ok(())
    }

    pub fn copy(&mut self, fixture_id: FixtureId) -> Result<(), EditError> {
        self.ensure_present(fixture_id)?;
        let values = self.state.channels.get(fixture_id)?.to_vec();
        self.clipboard = Some(ChannelClipboard {
            source: fixture_id,
            values,
            active: self.state.active.spec(fixture_id),
        });
        debug!("[LOOKS] Copied {}", fixture_id);
        Ok(())
    }

    /// Paste the clipboard onto a fixture.
    ///
    /// Only the first `min(clipboard, target)` values are written; membership
    /// past the target's end is dropped. Values and membership undo together.
    /// Returns the number of values written, zero when the clipboard is empty.
    pub fn paste(&mut self, fixture_id: FixtureId) -> Result<usize, EditError> {
        self.ensure_editable()?;
        self.ensure_present(fixture_id)?;
        let len = self.state.channels.channel_count(fixture_id)?;
        let Some(clip) = self.clipboard.as_ref() else {
            return Ok(0);
        };

        let changes: Vec<ChannelChange> = clip
            .values_for(len)
            .iter()
            .enumerate()
            .map(|(index, &value)| ChannelChange::new(fixture_id, index, value))
            .collect();
        let active = clip.active_for(len);

        let writes = self.state.channels.batch_set(&changes)?;
        let previous = self.state.active.spec(fixture_id);
        self.state.active.set_spec(fixture_id, active.clone());

        let values_changed = writes.iter().any(|w| w.previous != w.value);
        if values_changed || previous != active {
            let now = self.clock.now();
            let membership = ActiveDelta { fixture_id, previous, value: active };
            self.undo.push(
                UndoAction::new(UndoKind::Paste, writes.iter().map(delta_of).collect(), now)
                    .with_active(vec![membership]),
            );
        }
        if values_changed {
            self.preview.send_batched_immediate(&changes_of(&writes));
        }
        debug!("[LOOKS] Pasted {} values onto {}", writes.len(), fixture_id);
        Ok(writes.len())
    }

    /// Add a fixture that is not yet part of the saved look. All its channels start at 0 and active.
    pub fn add_fixture(&mut self, fixture_id: FixtureId, channel_count: usize) -> Result<(), EditError> {
        self.ensure_editable()?;
        if self.state.channels.contains(fixture_id) {
            if self.state.removed.contains(&fixture_id) {
                self.unremove_fixture(fixture_id)?;
            }
            return Ok(());
        }
        self.state.channels.insert_working(fixture_id, vec![0; channel_count]);
        self.state.removed.remove(&fixture_id);
        self.state.active.untrack(fixture_id);
        info!("[LOOKS] Added {} ({} channels)", fixture_id, channel_count);
        Ok(())
    }

    /// Drop a fixture from the look. Its working values and active set are discarded.
    pub fn remove_fixture(&mut self, fixture_id: FixtureId) -> Result<(), EditError> {
        self.ensure_editable()?;
        if !self.state.channels.contains(fixture_id) {
            return Err(EditError::UnknownFixture(fixture_id));
        }
        self.state.removed.insert(fixture_id);
        self.state.channels.remove_working(fixture_id);
        self.state.active.untrack(fixture_id);
        info!("[LOOKS] Removed {}", fixture_id);
        Ok(())
    }

    /// Bring back a removed fixture. Returns false if it was not removed.
    ///
    /// If working values exist for it, every channel becomes explicitly
    /// active; otherwise the fixture stays untracked.
    pub fn unremove_fixture(&mut self, fixture_id: FixtureId) -> Result<bool, EditError> {
        self.ensure_editable()?;
        if !self.state.removed.remove(&fixture_id) {
            return Ok(false);
        }
        if let Some(values) = self.state.channels.working().get(&fixture_id) {
            let all: BTreeSet<ChannelIndex> = (0..values.len()).collect();
            self.state.active.set_spec(fixture_id, ActiveSpec::Explicit(all));
        }
        info!("[LOOKS] Restored {}", fixture_id);
        Ok(true)
    }

    // ---- history ----

    /// Revert the newest history entry. `None` when there is nothing to undo
    /// or the session is not editable.
    pub fn undo(&mut self) -> Option<UndoAction> {
        if self.ensure_editable().is_err() {
            debug!("[LOOKS] Undo ignored while {:?}", self.status());
            return None;
        }
        let action = self.undo.undo()?;
        self.replay(&action, |d| d.previous);
        self.replay_active(&action, |d| &d.previous);
        Some(action)
    }

    pub fn redo(&mut self) -> Option<UndoAction> {
        if self.ensure_editable().is_err() {
            debug!("[LOOKS] Redo ignored while {:?}", self.status());
            return None;
        }
        let action = self.undo.redo()?;
        self.replay(&action, |d| d.value);
        self.replay_active(&action, |d| &d.value);
        Some(action)
    }

    /// Write one side of an action's deltas back, in stored order, and mirror them to preview.
    fn replay(&mut self, action: &UndoAction, pick: impl Fn(&UndoDelta) -> ChannelValue) {
        let mut sent = Vec::with_capacity(action.deltas.len());
        for delta in &action.deltas {
            if self.state.removed.contains(&delta.fixture_id) {
                debug!("[LOOKS] Skipping history for removed {}", delta.fixture_id);
                continue;
            }
            match self.state.channels.set_channel(delta.fixture_id, delta.index, pick(delta)) {
                Ok(write) => sent.push(ChannelChange::new(write.fixture_id, write.index, write.value)),
                Err(e) => warn!("[LOOKS] Skipping history entry: {}", e),
            }
        }
        self.preview.send_batched_immediate(&sent);
    }

    fn replay_active(&mut self, action: &UndoAction, pick: impl Fn(&ActiveDelta) -> &ActiveSpec) {
        for delta in &action.active {
            if self.state.removed.contains(&delta.fixture_id) {
                continue;
            }
            self.state.active.set_spec(delta.fixture_id, pick(delta).clone());
        }
    }

    // ---- save / discard ----

    /// Freeze the payload and enter `Saving`. Edits are rejected until [`finish_save`](Self::finish_save).
    pub fn begin_save(&mut self) -> Result<SaveRequest, EditError> {
        match self.lifecycle {
            Lifecycle::Saving => return Err(EditError::SaveInProgress),
            Lifecycle::Open => {}
            _ => return Err(EditError::NotEditable(self.status())),
        }

        let mut fixtures = Vec::new();
        let mut values = HashMap::new();
        for id in self.fixture_ids() {
            let dense = self.state.channels.get(id)?.to_vec();
            fixtures.push(FixtureChannels {
                fixture_id: id,
                channel_count: dense.len(),
                channels: dense_to_sparse(&dense, self.state.active.current().get(&id)),
            });
            values.insert(id, dense);
        }

        self.lifecycle = Lifecycle::Saving;
        info!("[LOOKS] Saving look {} ({} fixtures)", self.look_id, fixtures.len());
        Ok(SaveRequest { look_id: self.look_id, fixtures, values })
    }

    /// Apply the outcome of a save started with [`begin_save`](Self::begin_save).
    pub fn finish_save(&mut self, request: SaveRequest, result: anyhow::Result<()>) -> Result<(), EditError> {
        if self.lifecycle != Lifecycle::Saving {
            warn!("[LOOKS] Dropping save result for look {} while {:?}", request.look_id, self.status());
            return match result {
                Ok(()) => Err(EditError::NotEditable(self.status())),
                Err(e) => Err(EditError::SaveFailed(format!("{:#}", e))),
            };
        }
        self.lifecycle = Lifecycle::Open;

        match result {
            Ok(()) => {
                self.state.channels.commit(request.values);
                self.state.removed.clear();
                self.state.active.commit();
                self.undo.clear();
                self.save_error = None;
                info!("[LOOKS] Look {} saved", self.look_id);
                Ok(())
            }
            Err(e) => {
                let message = format!("{:#}", e);
                warn!("[LOOKS] Save of look {} failed: {}", self.look_id, message);
                self.save_error = Some(SaveError {
                    message: message.clone(),
                    raised_at: self.clock.now(),
                });
                Err(EditError::SaveFailed(message))
            }
        }
    }

    pub fn save(&mut self, sink: &mut dyn LookSink) -> Result<(), EditError> {
        let request = self.begin_save()?;
        let result = sink.save_look(request.look_id, &request.fixtures);
        self.finish_save(request, result)
    }

    /// Throw away every unsaved edit and the history.
    pub fn discard(&mut self) -> Result<(), EditError> {
        self.ensure_editable()?;
        self.state.channels.clear_working();
        self.state.removed.clear();
        self.state.active.revert();
        self.undo.clear();
        self.reseed_preview();
        info!("[LOOKS] Discarded edits to look {}", self.look_id);
        Ok(())
    }

    // ---- preview ----

    pub fn attach_preview(&mut self, backend: Box<dyn PreviewBackend>) {
        self.preview.attach(backend);
    }

    pub fn detach_preview(&mut self) -> Option<Box<dyn PreviewBackend>> {
        self.preview.detach()
    }

    pub fn is_preview_active(&self) -> bool {
        self.preview.is_active()
    }

    /// Start live preview, seeded with every channel of the current values.
    pub fn start_preview(&mut self) -> Result<PreviewSessionId, PreviewError> {
        if matches!(self.lifecycle, Lifecycle::Loading | Lifecycle::Closed) {
            return Err(PreviewError::Transport(format!("session is {:?}", self.status())));
        }
        let fixtures = self.preview_seed();
        self.preview.start(self.project_id, self.look_id, &fixtures)
    }

    pub fn stop_preview(&mut self) {
        self.preview.shutdown();
    }

    fn preview_seed(&self) -> Vec<FixtureChannels> {
        self.fixture_ids()
            .into_iter()
            .filter_map(|id| {
                let values = self.state.channels.get(id).ok()?;
                Some(FixtureChannels {
                    fixture_id: id,
                    channel_count: values.len(),
                    channels: dense_to_sparse(values, None),
                })
            })
            .collect()
    }

    fn reseed_preview(&mut self) {
        if !self.preview.is_active() {
            return;
        }
        let changes: Vec<ChannelChange> = self
            .preview_seed()
            .into_iter()
            .flat_map(|f| {
                let id = f.fixture_id;
                f.channels
                    .into_iter()
                    .map(move |e| ChannelChange::new(id, e.offset, e.value))
            })
            .collect();
        self.preview.send_batched_immediate(&changes);
    }

    // ---- event loop ----

    /// Fire the preview flush when due and expire an old save error.
    pub fn tick(&mut self) {
        let now = self.clock.now();
        self.preview.poll(now);
        if let Some(err) = &self.save_error {
            if now.saturating_duration_since(err.raised_at) >= self.error_clear {
                debug!("[LOOKS] Clearing save error");
                self.save_error = None;
            }
        }
    }

    /// Tear down: cancel pending preview output and the preview session. Never fails.
    pub fn close(&mut self) {
        if self.lifecycle == Lifecycle::Closed {
            return;
        }
        self.preview.shutdown();
        self.lifecycle = Lifecycle::Closed;
        info!("[LOOKS] Session for look {} closed", self.look_id);
    }

    fn ensure_editable(&self) -> Result<(), EditError> {
        match self.lifecycle {
            Lifecycle::Open => Ok(()),
            _ => Err(EditError::NotEditable(self.status())),
        }
    }

    /// Removed fixtures take no edits until restored.
    fn ensure_present(&self, fixture_id: FixtureId) -> Result<(), EditError> {
        if self.state.removed.contains(&fixture_id) {
            return Err(EditError::UnknownFixture(fixture_id));
        }
        Ok(())
    }
}

impl Drop for EditSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn delta_of(write: &CellWrite) -> UndoDelta {
    UndoDelta {
        fixture_id: write.fixture_id,
        index: write.index,
        previous: write.previous,
        value: write.value,
    }
}

fn changes_of(writes: &[CellWrite]) -> Vec<ChannelChange> {
    writes
        .iter()
        .map(|w| ChannelChange::new(w.fixture_id, w.index, w.value))
        .collect()
}
