//! Battle outcome detection (component I): the primary outcome-byte decode
//! plus the HP-sum fallback used when that byte hasn't been written yet.

use crate::config::{AddressMap, Constants};
use crate::memory::{Domain, MemoryBus, MemoryBusExt};
use crate::model::BattleOutcome;

/// Masked off the outcome byte before decoding; set whenever a link battle
/// actually ran (vs. being skipped/aborted before it started).
const B_OUTCOME_LINK_BATTLE_RAN: u8 = 0x80;

fn decode_primary(byte: u8) -> Option<BattleOutcome> {
    match byte & !B_OUTCOME_LINK_BATTLE_RAN {
        1 => Some(BattleOutcome::Win),
        2 => Some(BattleOutcome::Lose),
        3 => Some(BattleOutcome::Draw),
        4 | 7 => Some(BattleOutcome::Flee),
        9 => Some(BattleOutcome::Forfeit),
        _ => None,
    }
}

/// Sums the HP `u16` at `hp_offset` across all 6 party slots in a 600-byte
/// party buffer starting at `base`.
fn sum_party_hp(bus: &dyn MemoryBus, domain: Domain, base: u32, constants: &Constants) -> u32 {
    let mut total = 0u32;
    for slot in 0..6 {
        let addr = base + (slot * constants.pokemon_size_bytes) as u32 + constants.hp_offset as u32;
        total += bus.read_u16_or(domain, addr, 0) as u32;
    }
    total
}

/// Decodes the battle's outcome: the primary byte if it decodes to a known
/// value, otherwise the HP-sum fallback (player HP 0 -> lose, enemy HP 0 ->
/// win, otherwise "completed" reported as [`BattleOutcome::Unknown`] since
/// there's no dedicated variant for an otherwise-ordinary finish).
pub fn decode_outcome(bus: &dyn MemoryBus, map: &AddressMap) -> BattleOutcome {
    let raw = bus.read_u8_or(Domain::Ewram, map.battle.outcome, 0);
    if let Some(outcome) = decode_primary(raw) {
        return outcome;
    }

    let player_hp = sum_party_hp(bus, Domain::Ewram, map.battle.player_party, &map.constants);
    let enemy_hp = sum_party_hp(bus, Domain::Ewram, map.battle.enemy_party, &map.constants);
    if player_hp == 0 {
        BattleOutcome::Lose
    } else if enemy_hp == 0 {
        BattleOutcome::Win
    } else {
        BattleOutcome::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AddressOrChain, BattleAddresses};
    use crate::memory::VecMemoryBus;

    fn map() -> AddressMap {
        AddressMap {
            cb2_overworld: 0x0800_1000,
            cb2_load_map: 0x0800_1100,
            cb2_battle_main: 0x0800_1200,
            cb2_return_to_field: 0x0800_1300,
            callback2_addr: 0x0300_0100,
            main_state_offset: 0x0300_0104,
            saved_callback_offset: 0x0300_0108,
            player_x: AddressOrChain::Static(0),
            player_y: AddressOrChain::Static(0),
            map_id: AddressOrChain::Static(0),
            map_group: AddressOrChain::Static(0),
            facing: AddressOrChain::Static(0),
            camera_x: AddressOrChain::Static(0),
            camera_y: AddressOrChain::Static(0),
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

    #[test]
    fn primary_byte_decodes_win_masking_link_ran_bit() {
        let mut bus = VecMemoryBus::new();
        let m = map();
        bus.write_u8(Domain::Ewram, m.battle.outcome, 0x80 | 1).unwrap();
        assert_eq!(decode_outcome(&bus, &m), BattleOutcome::Win);
    }

    #[test]
    fn primary_byte_decodes_forfeit() {
        let mut bus = VecMemoryBus::new();
        let m = map();
        bus.write_u8(Domain::Ewram, m.battle.outcome, 9).unwrap();
        assert_eq!(decode_outcome(&bus, &m), BattleOutcome::Forfeit);
    }

    #[test]
    fn fallback_to_hp_sum_when_byte_unknown() {
        let mut bus = VecMemoryBus::new();
        let m = map();
        // outcome byte left at 0 (unknown); enemy HP all zero -> win.
        for slot in 0..6u32 {
            let addr = m.battle.player_party + slot * 100 + 86;
            bus.write_u16(Domain::Ewram, addr, 10).unwrap();
        }
        assert_eq!(decode_outcome(&bus, &m), BattleOutcome::Win);
    }

    #[test]
    fn fallback_reports_lose_when_player_hp_zero() {
        let bus = VecMemoryBus::new();
        let m = map();
        // Both parties all-zero HP; player checked first -> lose.
        assert_eq!(decode_outcome(&bus, &m), BattleOutcome::Lose);
    }
}
