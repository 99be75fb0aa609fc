//! Battle Controller (component I) — the heart of the core.
//!
//! Drives the multi-stage PvP battle lifecycle: patch the ROM's link-cable
//! state so the native battle engine believes a peer is connected, exchange
//! parties, skip the (now meaningless) link-negotiation states, and then
//! mirror the engine's two 256-byte communication buffers between the two
//! clients every frame using the per-battler execute-flags as the
//! synchronization primitive. Split into one module per stage, mirroring
//! the size and weight §4.I gives this subsystem in the budget.

pub mod ending;
pub mod outcome;
pub mod patches;
pub mod relay;
pub mod start;

use crate::config::AddressMap;
use crate::memory::{Domain, MemoryBus, MemoryBusExt};
use crate::model::BattleOutcome;
use crate::textbox::font;
use patches::PatchRecord;
use protocol::InboundMessage;
use relay::BufferRelayState;

bitflags::bitflags! {
    /// The battle-type-flags word (`battle.flags`). Bit positions follow
    /// the native engine's own numbering; this crate only ever sets or
    /// reads the subset §3 names.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct BattleTypeFlags: u32 {
        const LINK = 1 << 1;
        const IS_MASTER = 1 << 2;
        const TRAINER = 1 << 3;
        const RECORDED = 1 << 13;
        const LINK_IN_BATTLE = 1 << 24;
    }
}

/// Forward-only lifecycle per §3: `Idle -> Starting -> MainLoop -> Ending
/// -> Done`. `Restoring` is the shortcut teardown path taken when the
/// Starting stage times out — there is no natural-battle equivalent, since
/// the natural path always runs the full 3-phase `Ending` sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BattleStage {
    Idle,
    Starting,
    MainLoop,
    Ending,
    Restoring,
    Done,
}

fn stage_rank(stage: BattleStage) -> u8 {
    match stage {
        BattleStage::Idle => 0,
        BattleStage::Starting => 1,
        BattleStage::MainLoop => 2,
        BattleStage::Ending | BattleStage::Restoring => 3,
        BattleStage::Done => 4,
    }
}

/// A side effect [`BattleState::tick`] wants the Scheduler to carry out.
#[derive(Clone, Debug, PartialEq)]
pub enum BattleAction {
    SendMessage(protocol::OutboundMessage),
    Finished(BattleOutcome),
}

/// The local player's identity, read from the save block before a battle
/// starts and mirrored into the engine's link-player struct every frame
/// the intro runs (DMA may zero it mid-animation).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LocalPlayerInfo {
    pub name: String,
    pub gender: u8,
    pub trainer_id: u32,
}

/// English language code in the engine's own numbering.
const LANGUAGE_ENGLISH: u8 = 2;
/// Bytes per link-player struct slot: a 7-character name plus terminator,
/// gender, version, language, and a 4-byte-aligned trainer id.
pub(crate) const LINK_PLAYER_STRUCT_SIZE: u32 = 16;

pub(crate) fn write_link_player_struct(
    bus: &mut dyn MemoryBus,
    link_players_base: u32,
    slot: u8,
    info: &LocalPlayerInfo,
) {
    let base = link_players_base + slot as u32 * LINK_PLAYER_STRUCT_SIZE;
    let mut name_bytes = font::encode(&info.name);
    name_bytes.resize(8, font::END_OF_STRING);
    bus.write_range_ignore(Domain::Ewram, base, &name_bytes);
    bus.write_u8_ignore(Domain::Ewram, base + 8, info.gender);
    bus.write_u8_ignore(Domain::Ewram, base + 9, 0); // version: unused by this profile
    bus.write_u8_ignore(Domain::Ewram, base + 10, LANGUAGE_ENGLISH);
    bus.write_u32_ignore(Domain::Ewram, base + 12, info.trainer_id);
}

/// Re-injects the cached opponent/local party bytes. Called whenever the
/// engine's link exchange might have clobbered either party buffer.
pub(crate) fn reinject_parties(bus: &mut dyn MemoryBus, map: &AddressMap, state: &BattleState) {
    let len = map.constants.party_size_bytes;
    if let Some(opponent) = &state.opponent_party {
        bus.write_range_ignore(Domain::Ewram, map.battle.enemy_party, &opponent[..len]);
    }
    if let Some(local) = &state.local_party_backup {
        bus.write_range_ignore(Domain::Ewram, map.battle.player_party, &local[..len]);
    }
}

pub const STARTING_TIMEOUT_SECS: f64 = start::STARTING_TIMEOUT_SECS;
pub const ENDING_TIMEOUT_FRAMES: u64 = ending::ENDING_TIMEOUT_FRAMES;
pub const FORFEIT_FRAMES: u64 = ending::FORFEIT_FRAMES;

/// Owns the entire battle lifecycle for one PvP duel.
pub struct BattleState {
    stage: BattleStage,
    pub is_master: bool,
    pub local_player_info: LocalPlayerInfo,
    frame_counter: u64,
    stage_clock_sec: f64,
    pub(crate) battle_main_reached: bool,
    pub(crate) remote_mainloop_ready: bool,
    pub(crate) comm_advanced: bool,
    pub(crate) intro_complete: bool,
    cached_outcome: Option<BattleOutcome>,
    force_end_pending: bool,
    force_end_frame: Option<u64>,
    pub(crate) opponent_party: Option<[u8; 600]>,
    pub(crate) local_party_backup: Option<[u8; 600]>,
    saved_callback1: Option<u32>,
    pub(crate) battle_flags: Option<u32>,
    pub(crate) relay: BufferRelayState,
    rom_patches: Vec<PatchRecord>,
    ram_patches: Vec<PatchRecord>,
    ending_phase: ending::EndingPhase,
}

impl Default for BattleState {
    fn default() -> Self {
        BattleState {
            stage: BattleStage::Idle,
            is_master: false,
            local_player_info: LocalPlayerInfo::default(),
            frame_counter: 0,
            stage_clock_sec: 0.0,
            battle_main_reached: false,
            remote_mainloop_ready: false,
            comm_advanced: false,
            intro_complete: false,
            cached_outcome: None,
            force_end_pending: false,
            force_end_frame: None,
            opponent_party: None,
            local_party_backup: None,
            saved_callback1: None,
            battle_flags: None,
            relay: BufferRelayState::new(0),
            rom_patches: Vec::new(),
            ram_patches: Vec::new(),
            ending_phase: ending::EndingPhase::Injecting,
        }
    }
}

impl BattleState {
    pub fn new() -> Self {
        BattleState::default()
    }

    pub fn stage(&self) -> BattleStage {
        self.stage
    }

    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    pub fn is_active(&self) -> bool {
        !matches!(self.stage, BattleStage::Idle | BattleStage::Done)
    }

    pub(crate) fn transition(&mut self, next: BattleStage) {
        if next != BattleStage::Idle && stage_rank(next) < stage_rank(self.stage) {
            log::error!("battle: rejected backward transition {:?} -> {:?}", self.stage, next);
            return;
        }
        log::debug!("battle: {:?} -> {:?}", self.stage, next);
        self.stage = next;
        self.stage_clock_sec = 0.0;
        self.frame_counter = 0;
    }

    pub(crate) fn stage_clock_sec(&self) -> f64 {
        self.stage_clock_sec
    }

    /// Starts the battle lifecycle: backs up the local party, writes
    /// battle-type flags, applies the patching preamble, saves callback1,
    /// points `saved_callback` at `CB2_ReturnToField`, and sets callback2
    /// to the battle entry point. Transitions `Idle -> Starting`.
    pub fn start(
        &mut self,
        bus: &mut dyn MemoryBus,
        map: &AddressMap,
        is_master: bool,
        opponent_party: [u8; 600],
        local_player_info: LocalPlayerInfo,
    ) {
        self.is_master = is_master;
        self.local_player_info = local_player_info;
        self.opponent_party = Some(opponent_party);
        self.relay = BufferRelayState::new(if is_master { 0 } else { 1 });

        let mut backup = [0u8; 600];
        if let Ok(bytes) = bus.read_range(Domain::Ewram, map.battle.player_party, map.constants.party_size_bytes) {
            backup[..bytes.len()].copy_from_slice(&bytes);
        }
        self.local_party_backup = Some(backup);

        let mut flags = BattleTypeFlags::LINK | BattleTypeFlags::TRAINER;
        if is_master {
            flags |= BattleTypeFlags::IS_MASTER;
        }
        bus.write_u32_ignore(Domain::Ewram, map.battle.flags, flags.bits());
        self.battle_flags = Some(flags.bits());

        self.ram_patches = patches::apply_ram_patches(bus, map);
        self.rom_patches = patches::apply_rom_patches(bus, map);
        if let Some(record) = patches::apply_get_multiplayer_id_patch(bus, map, is_master) {
            self.rom_patches.push(record);
        }

        if let Some(link) = &map.battle_link {
            bus.write_u8_ignore(Domain::Ewram, link.block_received_status, 0);
            bus.write_u32_ignore(Domain::Ewram, link.battler_controller_funcs, 0);
        }

        self.saved_callback1 = Some(bus.read_u32_or(Domain::Iwram, map.saved_callback_offset, 0));
        bus.write_u32_ignore(Domain::Iwram, map.callback2_addr, 0);
        bus.write_u32_ignore(Domain::Iwram, map.saved_callback_offset, map.cb2_return_to_field);
        bus.write_u8_ignore(Domain::Iwram, map.main_state_offset, 0);

        if let Some(link) = &map.battle_link {
            write_link_player_struct(bus, link.link_players, self.relay.local_slot, &self.local_player_info);
        }

        bus.write_u32_ignore(Domain::Iwram, map.callback2_addr, map.cb2_battle_main);

        self.transition(BattleStage::Starting);
    }

    /// Requests a forced end (forfeit / disconnect). Takes effect on the
    /// next `tick` call during `MainLoop`.
    pub fn force_end(&mut self, outcome: BattleOutcome) {
        self.cached_outcome = Some(outcome);
        self.force_end_pending = true;
        self.force_end_frame = Some(self.frame_counter);
    }

    pub(crate) fn force_end_pending(&self) -> bool {
        self.force_end_pending
    }

    pub(crate) fn force_end_frame(&self) -> Option<u64> {
        self.force_end_frame
    }

    pub(crate) fn take_cached_outcome(&mut self) -> Option<BattleOutcome> {
        self.cached_outcome.take()
    }

    pub(crate) fn set_cached_outcome(&mut self, outcome: BattleOutcome) {
        self.cached_outcome = Some(outcome);
    }

    pub(crate) fn restore_all_patches(&mut self, bus: &mut dyn MemoryBus) {
        patches::restore_patches(bus, &self.rom_patches);
        patches::restore_patches(bus, &self.ram_patches);
        self.rom_patches.clear();
        self.ram_patches.clear();
    }

    /// Resets back to `Idle`, restoring patches first if any remain
    /// applied. This is the sole edge back to `Idle` from any stage.
    pub fn reset(&mut self, bus: &mut dyn MemoryBus) {
        self.restore_all_patches(bus);
        *self = BattleState::default();
    }

    /// Advances the battle controller by one frame.
    pub fn tick(
        &mut self,
        bus: &mut dyn MemoryBus,
        map: &AddressMap,
        wall_dt_secs: f64,
        inbound: &[InboundMessage],
    ) -> Vec<BattleAction> {
        self.frame_counter += 1;
        self.stage_clock_sec += wall_dt_secs;
        match self.stage {
            BattleStage::Idle => vec![],
            BattleStage::Starting => start::tick(self, bus, map, inbound),
            BattleStage::MainLoop => relay::tick(self, bus, map, inbound),
            BattleStage::Ending => ending::tick(self, bus, map),
            BattleStage::Restoring => {
                self.restore_all_patches(bus);
                self.transition(BattleStage::Done);
                vec![BattleAction::Finished(self.cached_outcome.unwrap_or(BattleOutcome::Unknown))]
            }
            BattleStage::Done => vec![],
        }
    }
}
