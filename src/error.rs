//! Error types for look editing.

use crate::model::{ChannelIndex, FixtureId};
use crate::session::SessionStatus;
use thiserror::Error;

/// Errors returned by the editing engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EditError {
    #[error("Unknown fixture: {0}")]
    UnknownFixture(FixtureId),

    #[error("Channel {index} out of bounds for {fixture_id} ({len} channels)")]
    IndexOutOfBounds {
        fixture_id: FixtureId,
        index: ChannelIndex,
        len: usize,
    },

    #[error("A save is already in progress")]
    SaveInProgress,

    #[error("Session is not editable while {0:?}")]
    NotEditable(SessionStatus),

    #[error("Save failed: {0}")]
    SaveFailed(String),

    #[error("Failed to load look: {0}")]
    Load(String),
}

/// Errors reported by a live-preview backend. These never affect edit state.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PreviewError {
    #[error("Preview session {0} is not active")]
    UnknownSession(u64),

    #[error("{0} is not patched")]
    Unpatched(FixtureId),

    #[error("Preview transport error: {0}")]
    Transport(String),
}
