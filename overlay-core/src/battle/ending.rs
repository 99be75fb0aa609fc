//! 2-3 phase battle teardown (component I's `Ending` stage).
//!
//! Phase 1 forces the engine's own "link partner disconnected" exit path by
//! repeatedly injecting `GetAwayExit` into the master's bufferA; phase 2
//! clears the link-specific bits the engine would otherwise keep honoring;
//! phase 3 restores every patch and hands control back to the overworld.
//! The same 30-frame phase-1 injection also services an externally
//! requested forfeit, since spec's forfeit sequence and the natural
//! teardown's phase 1 are byte-for-byte the same mechanism applied from
//! different entry points — see `DESIGN.md`.

use super::{BattleAction, BattleStage, BattleState, BattleTypeFlags};
use crate::config::AddressMap;
use crate::memory::{Domain, MemoryBus, MemoryBusExt};
use crate::model::ExecFlags;

/// Command byte for the engine's own `GetAwayExit` battle action; forcing
/// it into bufferA makes the native battle-end sequence run as if the
/// local player fled/disconnected cleanly.
const GET_AWAY_EXIT: u8 = 0x37;
/// Frames phase 1 spends re-injecting `GetAwayExit`.
pub const FORFEIT_FRAMES: u64 = 30;
/// Hard cap on the whole Ending stage; phase 3 fires here even if the
/// natural-exit callback2 check never observes the expected values.
pub const ENDING_TIMEOUT_FRAMES: u64 = 90;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum EndingPhase {
    Injecting,
    ClearingLinkState,
    Restoring,
}

fn callback2_is_overworld_or_return(bus: &dyn MemoryBus, map: &AddressMap) -> bool {
    let cb2 = bus.read_u32_or(Domain::Iwram, map.callback2_addr, 0);
    cb2 == map.cb2_overworld || cb2 == map.cb2_return_to_field
}

pub(super) fn tick(state: &mut BattleState, bus: &mut dyn MemoryBus, map: &AddressMap) -> Vec<BattleAction> {
    let mut actions = Vec::new();
    let frame = state.frame_counter();

    match state.ending_phase {
        EndingPhase::Injecting => {
            if let Some(link) = map.battle_link.clone() {
                let addr = link.battle_resources + link.buffer_a_offset;
                bus.write_u8_ignore(Domain::Ewram, addr, GET_AWAY_EXIT);
                if frame == 1 {
                    let mut flags = ExecFlags::new(bus.read_u32_or(Domain::Iwram, map.battle.exec_flags, 0));
                    flags.set_active(0, true);
                    bus.write_u32_ignore(Domain::Iwram, map.battle.exec_flags, flags.raw());
                }
            }
            if frame >= FORFEIT_FRAMES {
                state.ending_phase = EndingPhase::ClearingLinkState;
            }
        }
        EndingPhase::ClearingLinkState => {
            bus.write_u32_ignore(Domain::Iwram, map.battle.exec_flags, 0);
            let current = BattleTypeFlags::from_bits_truncate(bus.read_u32_or(Domain::Ewram, map.battle.flags, 0));
            let cleared = current
                & !(BattleTypeFlags::LINK | BattleTypeFlags::LINK_IN_BATTLE | BattleTypeFlags::IS_MASTER | BattleTypeFlags::RECORDED);
            bus.write_u32_ignore(Domain::Ewram, map.battle.flags, cleared.bits());
            if let Some(link) = map.battle_link.clone() {
                bus.write_u8_ignore(Domain::Ewram, link.received_remote, 0);
            }
            state.ending_phase = EndingPhase::Restoring;
        }
        EndingPhase::Restoring => {
            if callback2_is_overworld_or_return(bus, map) || frame >= ENDING_TIMEOUT_FRAMES {
                if !callback2_is_overworld_or_return(bus, map) {
                    bus.write_u32_ignore(Domain::Iwram, map.callback2_addr, map.cb2_return_to_field);
                }
                bus.write_u8_ignore(Domain::Iwram, map.main_state_offset, 0);
                bus.write_u32_ignore(Domain::Iwram, map.saved_callback_offset, 0);
                if let Some(link) = map.battle_link.clone() {
                    bus.write_u8_ignore(Domain::Ewram, link.block_received_status, 0);
                    bus.write_u32_ignore(Domain::Ewram, link.battler_controller_funcs, 0);
                }
                let current = BattleTypeFlags::from_bits_truncate(bus.read_u32_or(Domain::Ewram, map.battle.flags, 0));
                let cleared = current
                    & !(BattleTypeFlags::LINK | BattleTypeFlags::LINK_IN_BATTLE | BattleTypeFlags::IS_MASTER | BattleTypeFlags::RECORDED);
                bus.write_u32_ignore(Domain::Ewram, map.battle.flags, cleared.bits());

                state.restore_all_patches(bus);
                let outcome = state.take_cached_outcome().unwrap_or(crate::model::BattleOutcome::Unknown);
                state.transition(BattleStage::Done);
                actions.push(BattleAction::Finished(outcome));
            }
        }
    }

    actions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battle::LocalPlayerInfo;
    use crate::config::tests_support::map_with_battle_link;
    use crate::memory::VecMemoryBus;
    use crate::model::BattleOutcome;

    fn in_ending(bus: &mut VecMemoryBus, map: &AddressMap, outcome: BattleOutcome) -> BattleState {
        let mut state = BattleState::new();
        state.start(bus, map, true, [0u8; 600], LocalPlayerInfo::default());
        state.set_cached_outcome(outcome);
        state.transition(BattleStage::Ending);
        state
    }

    #[test]
    fn phase1_injects_get_away_exit_and_sets_active() {
        let mut bus = VecMemoryBus::new();
        let map = map_with_battle_link();
        let link = map.battle_link.clone().unwrap();
        let mut state = in_ending(&mut bus, &map, BattleOutcome::Forfeit);

        state.tick(&mut bus, &map, 0.01, &[]);
        let addr = link.battle_resources + link.buffer_a_offset;
        assert_eq!(bus.read_u8(Domain::Ewram, addr).unwrap(), GET_AWAY_EXIT);
        assert!(ExecFlags::new(bus.read_u32(Domain::Iwram, map.battle.exec_flags).unwrap()).active(0));
    }

    #[test]
    fn advances_through_all_phases_to_done_within_timeout() {
        let mut bus = VecMemoryBus::new();
        let map = map_with_battle_link();
        let mut state = in_ending(&mut bus, &map, BattleOutcome::Win);

        let mut last_actions = Vec::new();
        for _ in 0..ENDING_TIMEOUT_FRAMES + 1 {
            last_actions = state.tick(&mut bus, &map, 0.01, &[]);
            if state.stage() == BattleStage::Done {
                break;
            }
        }
        assert_eq!(state.stage(), BattleStage::Done);
        assert!(matches!(last_actions[0], BattleAction::Finished(BattleOutcome::Win)));
    }

    #[test]
    fn natural_exit_callback2_short_circuits_phase3() {
        let mut bus = VecMemoryBus::new();
        let map = map_with_battle_link();
        let mut state = in_ending(&mut bus, &map, BattleOutcome::Lose);

        for _ in 0..FORFEIT_FRAMES {
            state.tick(&mut bus, &map, 0.01, &[]);
        }
        state.tick(&mut bus, &map, 0.01, &[]); // ClearingLinkState -> Restoring
        bus.write_u32(Domain::Iwram, map.callback2_addr, map.cb2_overworld).unwrap();
        let actions = state.tick(&mut bus, &map, 0.01, &[]);
        assert_eq!(state.stage(), BattleStage::Done);
        assert!(matches!(actions[0], BattleAction::Finished(BattleOutcome::Lose)));
    }

    #[test]
    fn restoring_clears_link_in_battle_flag() {
        let mut bus = VecMemoryBus::new();
        let map = map_with_battle_link();
        let mut state = in_ending(&mut bus, &map, BattleOutcome::Win);
        bus.write_u32(
            Domain::Ewram,
            map.battle.flags,
            (BattleTypeFlags::LINK | BattleTypeFlags::LINK_IN_BATTLE | BattleTypeFlags::TRAINER).bits(),
        )
        .unwrap();

        for _ in 0..ENDING_TIMEOUT_FRAMES + 1 {
            state.tick(&mut bus, &map, 0.01, &[]);
            if state.stage() == BattleStage::Done {
                break;
            }
        }
        let flags = BattleTypeFlags::from_bits_truncate(bus.read_u32(Domain::Ewram, map.battle.flags).unwrap());
        assert!(!flags.contains(BattleTypeFlags::LINK_IN_BATTLE));
        assert!(flags.contains(BattleTypeFlags::TRAINER));
    }
}
