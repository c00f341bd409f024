use crate::active::ActiveSpec;
use crate::model::{ChannelValue, FixtureId};

/// Channel values and active membership copied from one fixture.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelClipboard {
    pub source: FixtureId,
    pub values: Vec<ChannelValue>,
    pub active: ActiveSpec,
}

impl ChannelClipboard {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Values that fit a target with `channel_count` channels. Extra values are dropped.
    pub fn values_for(&self, channel_count: usize) -> &[ChannelValue] {
        &self.values[..self.values.len().min(channel_count)]
    }

    /// Active membership for a target with `channel_count` channels.
    pub fn active_for(&self, channel_count: usize) -> ActiveSpec {
        self.active.truncated(channel_count)
    }
}
