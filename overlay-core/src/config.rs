//! Per-ROM address map: the immutable configuration object every other
//! component is handed a shared reference to.
//!
//! A [`AddressMap`] is normally produced by deserializing a host-supplied
//! TOML/JSON/RON file (the file format and the ROM-scanning tool that would
//! populate it are a host concern, out of scope here) and then calling
//! [`AddressMap::validate`], which is the one place untrusted config data
//! is checked before the rest of the crate trusts it.

use crate::error::{ConfigError, MemoryError};
use crate::memory::{Domain, MemoryBus};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Either a fixed address or a pointer chain resolved at read time: read a
/// `u32` at the current address, add the next offset, repeat.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AddressOrChain {
    Static(u32),
    Chain { root: u32, offsets: Vec<i32> },
}

impl AddressOrChain {
    /// Resolves to a concrete address. A chain with zero offsets degenerates
    /// to the root address, i.e. behaves exactly like `Static(root)`.
    pub fn resolve(&self, bus: &dyn MemoryBus, domain: Domain) -> Result<u32, MemoryError> {
        match self {
            AddressOrChain::Static(addr) => Ok(*addr),
            AddressOrChain::Chain { root, offsets } => {
                let mut addr = *root;
                for offset in offsets {
                    let base = bus.read_u32(domain, addr)?;
                    addr = (base as i64 + *offset as i64) as u32;
                }
                Ok(addr)
            }
        }
    }

    fn offsets_empty_if_chain(&self) -> bool {
        matches!(self, AddressOrChain::Chain { offsets, .. } if offsets.is_empty())
    }
}

/// The width of a single ROM patch, so a byte patch can never accidentally
/// write four bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchWidth {
    Byte,
    Half,
    Word,
}

impl PatchWidth {
    pub fn size_bytes(self) -> usize {
        match self {
            PatchWidth::Byte => 1,
            PatchWidth::Half => 2,
            PatchWidth::Word => 4,
        }
    }
}

/// A width-tagged patch payload. Always stored as `u32`; callers mask to
/// `width` before writing so a `Byte` patch can't clobber its neighbors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchValue(pub u32);

/// One named, declarative ROM patch: "at this cart offset, this value,
/// this width". The runtime original-bytes bookkeeping needed to restore a
/// patch lives in [`crate::battle::patches`], not here — this is the
/// read-only declaration side.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RomPatch {
    pub name: String,
    pub rom_offset: u32,
    pub value: PatchValue,
    pub width: PatchWidth,
}

/// `battle.*` addresses: plain EWRAM/IWRAM addresses, never pointer chains
/// (unlike the player-position fields, these sit inside the fixed layout of
/// the link-battle engine's static structures).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BattleAddresses {
    pub player_party: u32,
    pub enemy_party: u32,
    pub party_count: u32,
    pub flags: u32,
    pub exec_flags: u32,
    pub outcome: u32,
    pub in_battle_byte: u32,
}

/// `battle_link.*` addresses, needed only by the buffer-relay subsystem.
/// Absent entirely when a ROM profile doesn't support PvP relay (the
/// "configuration missing" path of the error taxonomy: the battle
/// controller refuses to start and logs, everything else keeps working).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BattleLinkAddresses {
    pub get_multiplayer_id: u32,
    pub script_load: u32,
    pub script_data: u32,
    pub text_data: u32,
    pub var_result: u32,
    pub var_8001: u32,
    pub received_remote: u32,
    pub wireless_comm_type: u32,
    pub block_received_status: u32,
    pub block_recv_buffer: u32,
    pub link_players: u32,
    pub battle_resources: u32,
    pub buffer_a_offset: u32,
    pub buffer_b_offset: u32,
    pub battle_main_func: u32,
    pub begin_battle_intro: u32,
    pub do_battle_intro: u32,
    pub save_block_2_ptr: u32,
    pub battle_communication: u32,
    pub battler_controller_funcs: u32,
    pub battler_attacker: u32,
    pub battler_target: u32,
    pub absent_battler_flags: u32,
    pub effect_battler: u32,
    /// `[start, end)` function-pointer range the Starting-stage task sweep
    /// uses to identify scheduled link-operation tasks to neuter.
    pub link_task_range: (u32, u32),
    /// Base address of the engine's scheduled-task slot array.
    pub link_task_table: u32,
    /// Byte stride between consecutive task slots.
    pub link_task_slot_stride: u32,
    /// Number of slots in the task array.
    pub link_task_slot_count: u32,
    /// Offset of a slot's function-pointer field from the slot's base.
    pub link_task_func_offset: u32,
    /// Address of a known-harmless no-op task function, substituted for any
    /// slot whose function pointer falls inside `link_task_range`.
    pub link_task_dummy_func: u32,
}

/// Fixed layout constants that, unlike the addresses above, don't vary by
/// ROM build but are still easiest to keep alongside the map they describe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constants {
    pub party_size_bytes: usize,
    pub pokemon_size_bytes: usize,
    pub hp_offset: usize,
}

impl Default for Constants {
    fn default() -> Self {
        Constants {
            party_size_bytes: 600,
            pokemon_size_bytes: 100,
            hp_offset: 86,
        }
    }
}

/// The full per-ROM address map.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AddressMap {
    pub cb2_overworld: u32,
    pub cb2_load_map: u32,
    pub cb2_battle_main: u32,
    pub cb2_return_to_field: u32,
    pub callback2_addr: u32,
    pub main_state_offset: u32,
    pub saved_callback_offset: u32,

    pub player_x: AddressOrChain,
    pub player_y: AddressOrChain,
    pub map_id: AddressOrChain,
    pub map_group: AddressOrChain,
    pub facing: AddressOrChain,
    pub camera_x: AddressOrChain,
    pub camera_y: AddressOrChain,

    pub battle: BattleAddresses,
    pub battle_link: Option<BattleLinkAddresses>,

    pub patches: Vec<RomPatch>,
    pub constants: Constants,
}

impl AddressMap {
    /// Checks the structural invariants only a loaded (and therefore
    /// untrusted) config can violate: required addresses left at the zero
    /// sentinel, pointer chains with no offsets, duplicate patch names.
    /// Never second-guesses whether an address is *correct* — that's a ROM
    /// profile's problem, not this crate's.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required: &[(&'static str, u32)] = &[
            ("cb2_overworld", self.cb2_overworld),
            ("cb2_load_map", self.cb2_load_map),
            ("cb2_battle_main", self.cb2_battle_main),
            ("cb2_return_to_field", self.cb2_return_to_field),
            ("callback2_addr", self.callback2_addr),
        ];
        for (name, addr) in required {
            if *addr == 0 {
                return Err(ConfigError::MissingAddress(name));
            }
        }

        let chains: &[(&'static str, &AddressOrChain)] = &[
            ("player_x", &self.player_x),
            ("player_y", &self.player_y),
            ("map_id", &self.map_id),
            ("map_group", &self.map_group),
            ("facing", &self.facing),
            ("camera_x", &self.camera_x),
            ("camera_y", &self.camera_y),
        ];
        for (name, chain) in chains {
            if chain.offsets_empty_if_chain() {
                return Err(ConfigError::EmptyPointerChain(name));
            }
        }

        let mut seen = HashSet::new();
        for patch in &self.patches {
            if !seen.insert(patch.name.as_str()) {
                return Err(ConfigError::DuplicatePatchName(patch.name.clone()));
            }
        }

        Ok(())
    }
}

/// Shared `AddressMap` fixtures for tests across the crate (battle, warp,
/// duel modules all need a plausible map without re-deriving one each
/// time). Not part of the public API.
#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;

    pub(crate) fn minimal_map_for_tests() -> AddressMap {
        AddressMap {
            cb2_overworld: 0x0800_1000,
            cb2_load_map: 0x0800_1100,
            cb2_battle_main: 0x0800_1200,
            cb2_return_to_field: 0x0800_1300,
            callback2_addr: 0x0300_0100,
            main_state_offset: 0x0300_0104,
            saved_callback_offset: 0x0300_0108,
            player_x: AddressOrChain::Static(0x0200_1000),
            player_y: AddressOrChain::Static(0x0200_1002),
            map_id: AddressOrChain::Static(0x0200_1004),
            map_group: AddressOrChain::Static(0x0200_1005),
            facing: AddressOrChain::Static(0x0200_1006),
            camera_x: AddressOrChain::Static(0x0400_0010),
            camera_y: AddressOrChain::Static(0x0400_0012),
            battle: BattleAddresses {
                player_party: 0x0200_2000,
                enemy_party: 0x0200_2400,
                party_count: 0x0200_2800,
                flags: 0x0200_2804,
                exec_flags: 0x0300_0200,
                outcome: 0x0200_2808,
                in_battle_byte: 0x0200_2809,
            },
            battle_link: None,
            patches: vec![],
            constants: Constants::default(),
        }
    }

    pub(crate) fn battle_link_addresses_for_tests() -> BattleLinkAddresses {
        BattleLinkAddresses {
            get_multiplayer_id: 0x0800_0000,
            script_load: 0x0300_0000,
            script_data: 0x0800_1000,
            text_data: 0x0800_2000,
            var_result: 0x0200_0000,
            var_8001: 0x0200_0002,
            received_remote: 0x0200_0004,
            wireless_comm_type: 0x0200_0005,
            block_received_status: 0x0200_0006,
            block_recv_buffer: 0x0200_0100,
            link_players: 0x0200_0200,
            battle_resources: 0x0300_0010,
            buffer_a_offset: 0,
            buffer_b_offset: 0x800,
            battle_main_func: 0x0300_0020,
            begin_battle_intro: 0x0800_3000,
            do_battle_intro: 0x0800_3100,
            save_block_2_ptr: 0x0300_0030,
            battle_communication: 0x0200_0300,
            battler_controller_funcs: 0x0200_0400,
            battler_attacker: 0x0200_0500,
            battler_target: 0x0200_0501,
            absent_battler_flags: 0x0200_0502,
            effect_battler: 0x0200_0503,
            link_task_range: (0x0800_4000, 0x0800_5000),
            link_task_table: 0x0300_1000,
            link_task_slot_stride: 40,
            link_task_slot_count: 16,
            link_task_func_offset: 0,
            link_task_dummy_func: 0x0800_6000,
        }
    }

    pub(crate) fn map_with_battle_link() -> AddressMap {
        let mut map = minimal_map_for_tests();
        map.battle_link = Some(battle_link_addresses_for_tests());
        map
    }
}
