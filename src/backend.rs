//! Collaborators the edit session talks to: where looks come from, where they
//! are saved, and where live preview output goes.

use crate::error::PreviewError;
use crate::model::{ChannelIndex, ChannelValue, FixtureChannels, FixtureId, LookId, LookSnapshot, ProjectId};
use anyhow::Result;

pub type PreviewSessionId = u64;

/// Loads the saved state of a look.
pub trait LookSource {
    fn fetch_look(&mut self, look_id: LookId) -> Result<LookSnapshot>;
}

/// Persists the active channels of every fixture in a look.
pub trait LookSink {
    fn save_look(&mut self, look_id: LookId, fixtures: &[FixtureChannels]) -> Result<()>;
}

/// Live, non-persistent output used to try edits before saving.
pub trait PreviewBackend {
    fn start(&mut self, project_id: ProjectId) -> Result<PreviewSessionId, PreviewError>;

    fn cancel(&mut self, session: PreviewSessionId) -> Result<(), PreviewError>;

    fn update_channel(
        &mut self,
        session: PreviewSessionId,
        fixture_id: FixtureId,
        index: ChannelIndex,
        value: ChannelValue,
    ) -> Result<(), PreviewError>;

    /// Bulk-seed the preview with a look's values in one call.
    fn initialize_from_look(
        &mut self,
        session: PreviewSessionId,
        look_id: LookId,
        fixtures: &[FixtureChannels],
    ) -> Result<(), PreviewError>;
}
