//! Look editing for Lightspeed: sparse per-fixture channel storage, an
//! undoable edit session with dirty tracking, and live sACN preview.

pub mod active;
pub mod backend;
pub mod channels;
pub mod clipboard;
pub mod clock;
pub mod config;
pub mod db;
pub mod dirty;
pub mod engine;
pub mod error;
pub mod model;
pub mod preview;
pub mod session;
pub mod undo;

pub use active::{ActiveChannelTracker, ActiveSpec};
pub use backend::{LookSink, LookSource, PreviewBackend, PreviewSessionId};
pub use channels::{ChannelChange, ChannelStore};
pub use config::{AppConfig, SessionConfig};
pub use db::LookDatabase;
pub use engine::SacnPreviewEngine;
pub use error::{EditError, PreviewError};
pub use session::{EditSession, EditSessionState, SessionStatus};
pub use undo::{SharedUndoStack, UndoHistory, UndoStack};
