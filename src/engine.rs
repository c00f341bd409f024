use crate::backend::{PreviewBackend, PreviewSessionId};
use crate::error::PreviewError;
use crate::model::{ChannelIndex, ChannelValue, FixtureChannels, FixtureId, FixturePatch, LookId, NetworkConfig, ProjectId};
use log::{debug, error, info, warn};
use sacn::source::SacnSource;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::net::{IpAddr, SocketAddr};

const UNIVERSE_SIZE: usize = 512;
const MAX_UNIVERSE: u16 = 63999;
const SACN_PORT: u16 = 5568;

/// DMX frames for every universe the patch touches.
///
/// Pure state: mapping a fixture channel to a slot and keeping the frame
/// buffers. Transmission lives in [`SacnPreviewEngine`].
#[derive(Debug, Default)]
pub struct DmxFrames {
    patch: HashMap<FixtureId, FixturePatch>,
    universe_offset: u16,
    frames: HashMap<u16, Vec<u8>>,
}

impl DmxFrames {
    /// `base_universe` shifts every patched universe, universe 1 meaning no shift.
    pub fn new(patch: &[FixturePatch], base_universe: u16) -> Self {
        Self {
            patch: patch.iter().map(|p| (p.fixture_id, p.clone())).collect(),
            universe_offset: base_universe.saturating_sub(1),
            frames: HashMap::new(),
        }
    }

    pub fn is_patched(&self, fixture_id: FixtureId) -> bool {
        self.patch.contains_key(&fixture_id)
    }

    /// Output universe of a fixture (clamped to valid sACN range 1-63999).
    pub fn universe_of(&self, fixture_id: FixtureId) -> Option<u16> {
        self.patch
            .get(&fixture_id)
            .map(|p| p.universe.saturating_add(self.universe_offset).clamp(1, MAX_UNIVERSE))
    }

    /// `(universe, slot)` of a fixture channel, slot being 0-based within the frame.
    /// `None` when the channel is past the fixture or past the end of the universe.
    pub fn address(&self, fixture_id: FixtureId, index: ChannelIndex) -> Option<(u16, usize)> {
        let patch = self.patch.get(&fixture_id)?;
        if index >= patch.channel_count {
            return None;
        }
        let slot = (patch.start_channel as usize).saturating_sub(1) + index;
        if slot >= UNIVERSE_SIZE {
            return None;
        }
        Some((self.universe_of(fixture_id)?, slot))
    }

    /// Write one channel. Returns the universe that changed, if any.
    pub fn write(
        &mut self,
        fixture_id: FixtureId,
        index: ChannelIndex,
        value: ChannelValue,
    ) -> Result<Option<u16>, PreviewError> {
        if !self.is_patched(fixture_id) {
            return Err(PreviewError::Unpatched(fixture_id));
        }
        let Some((universe, slot)) = self.address(fixture_id, index) else {
            debug!("[LIGHTS] {} channel {} has no DMX slot, dropped", fixture_id, index);
            return Ok(None);
        };
        let frame = self.frames.entry(universe).or_insert_with(|| vec![0; UNIVERSE_SIZE]);
        frame[slot] = value.min(u8::MAX as ChannelValue) as u8;
        Ok(Some(universe))
    }

    /// Write every channel of the given fixtures. Unpatched fixtures are skipped.
    pub fn write_look(&mut self, fixtures: &[FixtureChannels]) -> BTreeSet<u16> {
        let mut touched = BTreeSet::new();
        for fixture in fixtures {
            if !self.is_patched(fixture.fixture_id) {
                debug!("[LIGHTS] {} is not patched, skipped", fixture.fixture_id);
                continue;
            }
            for entry in &fixture.channels {
                if let Ok(Some(universe)) = self.write(fixture.fixture_id, entry.offset, entry.value) {
                    touched.insert(universe);
                }
            }
        }
        touched
    }

    pub fn frame(&self, universe: u16) -> Option<&[u8]> {
        self.frames.get(&universe).map(|f| f.as_slice())
    }

    /// Zero every frame. Returns the universes that were zeroed.
    pub fn blackout(&mut self) -> BTreeSet<u16> {
        for frame in self.frames.values_mut() {
            frame.fill(0);
        }
        self.frames.keys().copied().collect()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

/// Resolve where frames go: `None` for multicast, the unicast target otherwise.
fn destination(network: &NetworkConfig) -> Result<Option<SocketAddr>, PreviewError> {
    if network.use_multicast {
        return Ok(None);
    }
    network
        .unicast_ip
        .parse::<IpAddr>()
        .map(|ip| Some(SocketAddr::new(ip, SACN_PORT)))
        .map_err(|_| PreviewError::Transport(format!("Invalid unicast IP '{}'", network.unicast_ip)))
}

/// Live preview over sACN (E1.31).
pub struct SacnPreviewEngine {
    sender: Option<SacnSource>,
    registered_universes: HashSet<u16>,
    frames: DmxFrames,
    network: NetworkConfig,
    session: Option<PreviewSessionId>,
    last_session: PreviewSessionId,
    pub priority: u8,
}

impl SacnPreviewEngine {
    pub fn new(patch: &[FixturePatch], network: NetworkConfig) -> Self {
        Self {
            sender: None,
            registered_universes: HashSet::new(),
            frames: DmxFrames::new(patch, network.universe),
            network,
            session: None,
            last_session: 0,
            priority: 200,
        }
    }

    pub fn session(&self) -> Option<PreviewSessionId> {
        self.session
    }

    pub fn frames(&self) -> &DmxFrames {
        &self.frames
    }

    fn check_session(&self, session: PreviewSessionId) -> Result<(), PreviewError> {
        if self.session == Some(session) {
            Ok(())
        } else {
            Err(PreviewError::UnknownSession(session))
        }
    }

    fn ensure_sender(&mut self) -> Result<&mut SacnSource, PreviewError> {
        if self.sender.is_none() {
            info!("[LIGHTS] Initializing sACN (E1.31) network stack...");
            let local_addr = SocketAddr::from(([0, 0, 0, 0], 0));
            let sender = SacnSource::with_ip("Lightspeed", local_addr).map_err(|e| {
                error!("[LIGHTS] Failed to create sACN sender: {:?}", e);
                PreviewError::Transport(format!("{:?}", e))
            })?;
            info!("[LIGHTS] sACN sender bound to {}", local_addr);
            self.sender = Some(sender);
        }
        self.sender
            .as_mut()
            .ok_or_else(|| PreviewError::Transport("sACN sender unavailable".to_string()))
    }

    fn transmit(&mut self, universe: u16) -> Result<(), PreviewError> {
        let dst_ip = destination(&self.network)?;
        let mut data = vec![0u8]; // Start Code
        data.extend_from_slice(self.frames.frame(universe).unwrap_or(&[0; UNIVERSE_SIZE]));

        let priority = self.priority;
        let needs_register = !self.registered_universes.contains(&universe);
        let sender = self.ensure_sender()?;
        if needs_register {
            sender.register_universe(universe).map_err(|e| {
                error!("[LIGHTS] Failed to register sACN Universe {}: {:?}", universe, e);
                PreviewError::Transport(format!("{:?}", e))
            })?;
            info!("[LIGHTS] Registered sACN Universe {}", universe);
        }
        let sent = sender.send(&[universe], &data, Some(priority), dst_ip, None);
        if needs_register {
            self.registered_universes.insert(universe);
        }
        sent.map_err(|e| {
            warn!("[LIGHTS] sACN send error on Universe {} (Dest: {:?}): {:?}", universe, dst_ip, e);
            PreviewError::Transport(format!("{:?}", e))
        })
    }

    /// Transmit each universe, trying all of them and returning the first failure.
    fn transmit_all(&mut self, universes: BTreeSet<u16>) -> Result<(), PreviewError> {
        let mut first_error = None;
        for universe in universes {
            if let Err(e) = self.transmit(universe) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl PreviewBackend for SacnPreviewEngine {
    fn start(&mut self, project_id: ProjectId) -> Result<PreviewSessionId, PreviewError> {
        self.ensure_sender()?;
        if let Some(old) = self.session.take() {
            debug!("[LIGHTS] Preview session {} replaced", old);
        }
        self.frames.clear();
        self.last_session += 1;
        self.session = Some(self.last_session);
        info!("[LIGHTS] Preview session {} started for project {}", self.last_session, project_id);
        Ok(self.last_session)
    }

    fn cancel(&mut self, session: PreviewSessionId) -> Result<(), PreviewError> {
        self.check_session(session)?;
        self.session = None;
        let universes = self.frames.blackout();
        let result = self.transmit_all(universes);
        self.frames.clear();
        info!("[LIGHTS] Preview session {} cancelled", session);
        result
    }

    fn update_channel(
        &mut self,
        session: PreviewSessionId,
        fixture_id: FixtureId,
        index: ChannelIndex,
        value: ChannelValue,
    ) -> Result<(), PreviewError> {
        self.check_session(session)?;
        match self.frames.write(fixture_id, index, value)? {
            Some(universe) => self.transmit(universe),
            None => Ok(()),
        }
    }

    fn initialize_from_look(
        &mut self,
        session: PreviewSessionId,
        look_id: LookId,
        fixtures: &[FixtureChannels],
    ) -> Result<(), PreviewError> {
        self.check_session(session)?;
        let touched = self.frames.write_look(fixtures);
        debug!("[LIGHTS] Seeded look {} into {} universe(s)", look_id, touched.len());
        self.transmit_all(touched)
    }
}
