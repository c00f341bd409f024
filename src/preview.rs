//! Debounced propagation of edits to a live-preview session.
//!
//! Continuous input (slider drags) goes through [`PreviewSync::schedule_debounced`]:
//! changes accumulate in a pending set keyed by cell, and the set is flushed
//! once no new change arrived for the debounce delay. Discrete actions (undo,
//! redo, paste) use [`PreviewSync::send_batched_immediate`].
//!
//! There is no background timer. The host calls [`PreviewSync::poll`] from its
//! event loop, the same way a frame update would, and the flush happens there.
//!
//! Without an active preview session every call is a no-op. Backend failures
//! are kept as the last preview error and never touch edit state.

use crate::backend::{PreviewBackend, PreviewSessionId};
use crate::channels::ChannelChange;
use crate::error::PreviewError;
use crate::model::{ChannelIndex, ChannelValue, FixtureChannels, FixtureId, LookId, ProjectId};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

pub const DEFAULT_PREVIEW_DEBOUNCE: Duration = Duration::from_millis(50);

/// A single cancellable deadline.
#[derive(Debug, Default, Clone)]
pub struct DebounceTimer {
    deadline: Option<Instant>,
}

impl DebounceTimer {
    /// Arm the timer, replacing any earlier deadline.
    pub fn arm(&mut self, deadline: Instant) {
        self.deadline = Some(deadline);
    }

    /// Returns true if a deadline was pending.
    pub fn cancel(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Disarm and return true once `now` has reached the deadline.
    pub fn fire_if_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

pub struct PreviewSync {
    backend: Option<Box<dyn PreviewBackend>>,
    session: Option<PreviewSessionId>,
    pending: BTreeMap<(FixtureId, ChannelIndex), ChannelValue>,
    timer: DebounceTimer,
    delay: Duration,
    last_error: Option<PreviewError>,
    failed_sends: usize,
}

impl Default for PreviewSync {
    fn default() -> Self {
        Self::new(DEFAULT_PREVIEW_DEBOUNCE)
    }
}

impl PreviewSync {
    pub fn new(delay: Duration) -> Self {
        Self {
            backend: None,
            session: None,
            pending: BTreeMap::new(),
            timer: DebounceTimer::default(),
            delay,
            last_error: None,
            failed_sends: 0,
        }
    }

    pub fn attach(&mut self, backend: Box<dyn PreviewBackend>) {
        self.shutdown();
        self.backend = Some(backend);
    }

    /// Stop any session and hand the backend back.
    pub fn detach(&mut self) -> Option<Box<dyn PreviewBackend>> {
        self.shutdown();
        self.backend.take()
    }

    pub fn has_backend(&self) -> bool {
        self.backend.is_some()
    }

    pub fn is_active(&self) -> bool {
        self.backend.is_some() && self.session.is_some()
    }

    pub fn session(&self) -> Option<PreviewSessionId> {
        self.session
    }

    /// Start a preview session and seed it with `fixtures`.
    ///
    /// A running session is cancelled first. A failed seed is recorded as a
    /// preview error but the session stays up; later edits still reach it.
    pub fn start(
        &mut self,
        project_id: ProjectId,
        look_id: LookId,
        fixtures: &[FixtureChannels],
    ) -> Result<PreviewSessionId, PreviewError> {
        self.shutdown();
        let backend = self
            .backend
            .as_mut()
            .ok_or_else(|| PreviewError::Transport("no preview backend attached".into()))?;

        let session = match backend.start(project_id) {
            Ok(session) => session,
            Err(e) => {
                log::warn!("[PREVIEW] Failed to start session for project {}: {}", project_id, e);
                self.last_error = Some(e.clone());
                return Err(e);
            }
        };
        log::info!("[PREVIEW] Session {} started for look {}", session, look_id);
        self.session = Some(session);

        if let Err(e) = backend.initialize_from_look(session, look_id, fixtures) {
            log::warn!("[PREVIEW] Failed to seed session {}: {}", session, e);
            self.last_error = Some(e);
        }
        Ok(session)
    }

    /// Cancel the pending flush and the session. Cancel failures are logged and dropped.
    pub fn shutdown(&mut self) {
        self.timer.cancel();
        self.pending.clear();

        let Some(session) = self.session.take() else {
            return;
        };
        if let Some(backend) = self.backend.as_mut() {
            match backend.cancel(session) {
                Ok(()) => log::info!("[PREVIEW] Session {} cancelled", session),
                Err(e) => log::warn!("[PREVIEW] Ignoring cancel failure for session {}: {}", session, e),
            }
        }
    }

    /// Merge `changes` into the pending set and restart the debounce delay.
    pub fn schedule_debounced(&mut self, changes: &[ChannelChange], now: Instant) {
        if !self.is_active() {
            return;
        }
        self.timer.cancel();
        for change in changes {
            self.pending.insert((change.fixture_id, change.index), change.value);
        }
        self.timer.arm(now + self.delay);
        log::trace!("[PREVIEW] {} changes pending", self.pending.len());
    }

    /// Send `changes` now, together with anything still waiting on the debounce delay.
    pub fn send_batched_immediate(&mut self, changes: &[ChannelChange]) {
        if !self.is_active() {
            return;
        }
        self.timer.cancel();
        for change in changes {
            self.pending.insert((change.fixture_id, change.index), change.value);
        }
        self.flush();
    }

    /// Flush when the debounce deadline has passed. Returns true if a flush happened.
    pub fn poll(&mut self, now: Instant) -> bool {
        if self.timer.fire_if_due(now) {
            self.flush();
            true
        } else {
            false
        }
    }

    /// Dispatch every pending change. A failing channel does not stop the others.
    fn flush(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        let (Some(backend), Some(session)) = (self.backend.as_mut(), self.session) else {
            return;
        };

        let mut failures = 0;
        for ((fixture_id, index), value) in pending {
            if let Err(e) = backend.update_channel(session, fixture_id, index, value) {
                log::debug!("[PREVIEW] {} ch {} failed: {}", fixture_id, index, e);
                failures += 1;
                self.last_error = Some(e);
            }
        }
        if failures > 0 {
            self.failed_sends += failures;
            log::warn!("[PREVIEW] {} channel updates failed in session {}", failures, session);
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self) -> bool {
        self.timer.is_armed()
    }

    pub fn last_error(&self) -> Option<&PreviewError> {
        self.last_error.as_ref()
    }

    pub fn take_error(&mut self) -> Option<PreviewError> {
        self.last_error.take()
    }

    pub fn failed_sends(&self) -> usize {
        self.failed_sends
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Clone, Debug, PartialEq)]
    pub(crate) enum Call {
        Start(ProjectId),
        Cancel(PreviewSessionId),
        Update(PreviewSessionId, FixtureId, ChannelIndex, ChannelValue),
        Initialize(PreviewSessionId, LookId, usize),
    }

    /// Records every call; fails updates to fixtures listed in `failing`.
    #[derive(Default)]
    pub(crate) struct RecordingBackend {
        pub calls: Rc<RefCell<Vec<Call>>>,
        pub failing: Vec<FixtureId>,
        pub fail_cancel: bool,
        next_session: PreviewSessionId,
    }

    impl RecordingBackend {
        pub fn new() -> (Self, Rc<RefCell<Vec<Call>>>) {
            let backend = Self::default();
            let calls = backend.calls.clone();
            (backend, calls)
        }
    }

    impl PreviewBackend for RecordingBackend {
        fn start(&mut self, project_id: ProjectId) -> Result<PreviewSessionId, PreviewError> {
            self.calls.borrow_mut().push(Call::Start(project_id));
            self.next_session += 1;
            Ok(self.next_session)
        }

        fn cancel(&mut self, session: PreviewSessionId) -> Result<(), PreviewError> {
            self.calls.borrow_mut().push(Call::Cancel(session));
            if self.fail_cancel {
                return Err(PreviewError::Transport("socket closed".into()));
            }
            Ok(())
        }

        fn update_channel(
            &mut self,
            session: PreviewSessionId,
            fixture_id: FixtureId,
            index: ChannelIndex,
            value: ChannelValue,
        ) -> Result<(), PreviewError> {
            self.calls.borrow_mut().push(Call::Update(session, fixture_id, index, value));
            if self.failing.contains(&fixture_id) {
                return Err(PreviewError::Unpatched(fixture_id));
            }
            Ok(())
        }

        fn initialize_from_look(
            &mut self,
            session: PreviewSessionId,
            look_id: LookId,
            fixtures: &[FixtureChannels],
        ) -> Result<(), PreviewError> {
            self.calls.borrow_mut().push(Call::Initialize(session, look_id, fixtures.len()));
            Ok(())
        }
    }

    fn updates(calls: &Rc<RefCell<Vec<Call>>>) -> Vec<Call> {
        calls.borrow().iter().filter(|c| matches!(c, Call::Update(..))).cloned().collect()
    }

    fn started() -> (PreviewSync, Rc<RefCell<Vec<Call>>>) {
        let (backend, calls) = RecordingBackend::new();
        let mut sync = PreviewSync::default();
        sync.attach(Box::new(backend));
        sync.start(1, 10, &[]).unwrap();
        (sync, calls)
    }

    const F: FixtureId = FixtureId(1);

    #[test]
    fn test_inactive_sync_is_noop() {
        let mut sync = PreviewSync::default();
        let now = Instant::now();
        sync.schedule_debounced(&[ChannelChange::new(F, 0, 1)], now);
        sync.send_batched_immediate(&[ChannelChange::new(F, 0, 1)]);

        assert!(!sync.is_pending());
        assert_eq!(sync.pending_len(), 0);
        assert!(!sync.poll(now + Duration::from_secs(1)));
    }

    #[test]
    fn test_debounce_merges_and_fires_once() {
        let (mut sync, calls) = started();
        let t0 = Instant::now();

        sync.schedule_debounced(&[ChannelChange::new(F, 0, 10)], t0);
        sync.schedule_debounced(&[ChannelChange::new(F, 0, 20), ChannelChange::new(F, 1, 5)], t0 + Duration::from_millis(30));

        assert!(!sync.poll(t0 + Duration::from_millis(60)), "Rescheduling should push the deadline out");
        assert!(updates(&calls).is_empty());

        assert!(sync.poll(t0 + Duration::from_millis(80)));
        assert_eq!(updates(&calls), vec![Call::Update(1, F, 0, 20), Call::Update(1, F, 1, 5)]);
        assert_eq!(sync.pending_len(), 0);
        assert!(!sync.poll(t0 + Duration::from_secs(5)), "Timer must not fire twice");
    }

    #[test]
    fn test_immediate_send_cancels_timer_and_includes_pending() {
        let (mut sync, calls) = started();
        let t0 = Instant::now();

        sync.schedule_debounced(&[ChannelChange::new(F, 0, 10)], t0);
        sync.send_batched_immediate(&[ChannelChange::new(F, 2, 7)]);

        assert!(!sync.is_pending());
        assert_eq!(updates(&calls), vec![Call::Update(1, F, 0, 10), Call::Update(1, F, 2, 7)]);
    }

    #[test]
    fn test_backend_errors_are_recorded_not_fatal() {
        let (mut backend, calls) = RecordingBackend::new();
        backend.failing = vec![FixtureId(9)];
        let mut sync = PreviewSync::default();
        sync.attach(Box::new(backend));
        sync.start(1, 10, &[]).unwrap();

        sync.send_batched_immediate(&[ChannelChange::new(FixtureId(9), 0, 1), ChannelChange::new(F, 0, 2)]);

        assert_eq!(updates(&calls).len(), 2, "A failing channel must not stop the rest");
        assert_eq!(sync.last_error(), Some(&PreviewError::Unpatched(FixtureId(9))));
        assert_eq!(sync.failed_sends(), 1);
        assert!(sync.is_active(), "Session should survive send failures");
    }

    #[test]
    fn test_shutdown_swallows_cancel_failure() {
        let (mut backend, calls) = RecordingBackend::new();
        backend.fail_cancel = true;
        let mut sync = PreviewSync::default();
        sync.attach(Box::new(backend));
        sync.start(1, 10, &[]).unwrap();
        sync.schedule_debounced(&[ChannelChange::new(F, 0, 10)], Instant::now());

        sync.shutdown();

        assert!(!sync.is_active());
        assert!(!sync.is_pending(), "Teardown must cancel the pending flush");
        assert!(calls.borrow().contains(&Call::Cancel(1)));
    }

    #[test]
    fn test_timer_fire_if_due() {
        let t0 = Instant::now();
        let mut timer = DebounceTimer::default();
        assert!(!timer.fire_if_due(t0));

        timer.arm(t0 + Duration::from_millis(50));
        assert!(!timer.fire_if_due(t0 + Duration::from_millis(49)));
        assert!(timer.fire_if_due(t0 + Duration::from_millis(50)));
        assert!(!timer.is_armed());

        timer.arm(t0);
        assert!(timer.cancel());
        assert!(!timer.cancel());
    }
}
