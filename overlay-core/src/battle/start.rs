//! Starting-stage per-frame maintenance: keeps the native engine convinced
//! a real link partner is present while the link-negotiation states run
//! their course, then skips straight past them once both sides have
//! actually connected.

use super::{reinject_parties, BattleAction, BattleStage, BattleState};
use crate::config::AddressMap;
use crate::memory::{Domain, MemoryBus, MemoryBusExt};
use protocol::{DuelStage, InboundMessage, OutboundMessage};

/// Wall-clock timeout for the whole Starting stage. Measured in real
/// seconds rather than frames since a host running at a speedhack
/// multiplier would otherwise let a genuinely stalled peer run for far
/// longer than intended before giving up.
pub const STARTING_TIMEOUT_SECS: f64 = 45.0;

/// The `battle_communication[0]` value the vanilla link-negotiation
/// sequence would eventually reach on its own; once observed, this crate
/// forces it straight to [`SKIP_TARGET_STATE`] instead of waiting out the
/// remaining (and, with both controllers patched, meaningless) states.
const LINK_EXCHANGE_DONE_STATE: u8 = 2;
/// The state value that tells the engine link setup is complete and it can
/// proceed into the battle's main loop.
const SKIP_TARGET_STATE: u8 = 7;

pub(super) fn tick(
    state: &mut BattleState,
    bus: &mut dyn MemoryBus,
    map: &AddressMap,
    inbound: &[InboundMessage],
) -> Vec<BattleAction> {
    let mut actions = Vec::new();

    let Some(link) = map.battle_link.clone() else {
        log::error!("battle start aborted: ROM profile has no battle_link addresses");
        state.transition(BattleStage::Restoring);
        state.set_cached_outcome(crate::model::BattleOutcome::Unknown);
        return actions;
    };

    if state.stage_clock_sec() >= STARTING_TIMEOUT_SECS {
        log::warn!("battle start timed out after {:.1}s", state.stage_clock_sec());
        state.set_cached_outcome(crate::model::BattleOutcome::Unknown);
        state.transition(BattleStage::Restoring);
        return actions;
    }

    for msg in inbound {
        if let InboundMessage::DuelStage { stage } = msg {
            if is_mainloop_ready(stage) {
                state.remote_mainloop_ready = true;
            }
        }
    }

    bus.write_u8_ignore(Domain::Ewram, link.wireless_comm_type, 0);
    bus.write_u8_ignore(Domain::Ewram, link.received_remote, 1);

    let comm = bus.read_u8_or(Domain::Ewram, link.battle_communication, 0);
    let block_status = if comm < LINK_EXCHANGE_DONE_STATE { 0x0F } else { 0x03 };
    bus.write_u8_ignore(Domain::Ewram, link.block_received_status, block_status);

    let frame = state.frame_counter();
    if frame <= 5 || frame % 30 == 0 {
        neuter_link_tasks(bus, &link);
    }

    let current_flags = bus.read_u32_or(Domain::Ewram, map.battle.flags, 0);
    let desired_flags = state.battle_flags.unwrap_or(0);
    bus.write_u32_ignore(Domain::Ewram, map.battle.flags, current_flags | desired_flags);

    super::write_link_player_struct(bus, link.link_players, state.relay.local_slot, &state.local_player_info);

    if comm < SKIP_TARGET_STATE && state.frame_counter() % 10 == 0 {
        reinject_parties(bus, map, state);
    }

    if comm == LINK_EXCHANGE_DONE_STATE && !state.comm_advanced {
        reinject_parties(bus, map, state);
        bus.write_u8_ignore(Domain::Ewram, link.battle_communication, SKIP_TARGET_STATE);
        bus.write_u8_ignore(Domain::Ewram, link.block_received_status, 0x03);
        bus.write_u32_ignore(Domain::Iwram, map.battle.exec_flags, 0);
        bus.write_u8_ignore(Domain::Ewram, link.block_recv_buffer, 0);
        state.comm_advanced = true;
    }

    if !state.is_master {
        bus.write_u32_ignore(Domain::Iwram, link.battle_main_func, link.begin_battle_intro);
    }

    let callback2 = bus.read_u32_or(Domain::Iwram, map.callback2_addr, 0);
    if callback2 == map.cb2_battle_main && !state.battle_main_reached {
        state.battle_main_reached = true;
        reinject_parties(bus, map, state);
        actions.push(BattleAction::SendMessage(OutboundMessage::DuelStage {
            stage: DuelStage::mainloop_ready(),
        }));
    }

    if state.battle_main_reached && state.remote_mainloop_ready {
        state.transition(BattleStage::MainLoop);
    }

    actions
}

fn is_mainloop_ready(stage: &DuelStage) -> bool {
    match stage {
        DuelStage::Named(name) => name == DuelStage::MAINLOOP_READY,
        DuelStage::Code(_) => false,
    }
}

/// Scans the configured link-operation task table and replaces any
/// scheduled task whose function pointer falls inside `link_task_range`
/// with the configured dummy no-op, so the vanilla link-negotiation
/// routines never run against a peer this crate is impersonating.
fn neuter_link_tasks(bus: &mut dyn MemoryBus, link: &crate::config::BattleLinkAddresses) {
    let (range_start, range_end) = link.link_task_range;
    for slot in 0..link.link_task_slot_count {
        let slot_base = link.link_task_table + slot * link.link_task_slot_stride;
        let func_addr = slot_base + link.link_task_func_offset;
        let func = bus.read_u32_or(Domain::Iwram, func_addr, 0);
        if func >= range_start && func < range_end {
            bus.write_u32_ignore(Domain::Iwram, func_addr, link.link_task_dummy_func);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battle::BattleStage;
    use crate::config::tests_support::map_with_battle_link;
    use crate::memory::VecMemoryBus;

    #[test]
    fn maintains_wireless_comm_type_and_received_remote_every_frame() {
        let mut bus = VecMemoryBus::new();
        let map = map_with_battle_link();
        let mut state = BattleState::new();
        state.start(&mut bus, &map, true, [0u8; 600], Default::default());
        state.tick(&mut bus, &map, 0.01, &[]);
        let link = map.battle_link.unwrap();
        assert_eq!(bus.read_u8(Domain::Ewram, link.wireless_comm_type).unwrap(), 0);
        assert_eq!(bus.read_u8(Domain::Ewram, link.received_remote).unwrap(), 1);
    }

    #[test]
    fn neuter_link_tasks_replaces_in_range_slots_only() {
        let mut bus = VecMemoryBus::new();
        let map = map_with_battle_link();
        let link = map.battle_link.unwrap();

        // Slot 0: function pointer inside the link-operations range.
        let in_range_slot = link.link_task_table;
        bus.write_u32(Domain::Iwram, in_range_slot + link.link_task_func_offset, link.link_task_range.0 + 4).unwrap();
        // Slot 1: function pointer outside the range, must survive untouched.
        let out_of_range_slot = link.link_task_table + link.link_task_slot_stride;
        bus.write_u32(Domain::Iwram, out_of_range_slot + link.link_task_func_offset, 0x0801_0000).unwrap();

        neuter_link_tasks(&mut bus, &link);

        assert_eq!(
            bus.read_u32(Domain::Iwram, in_range_slot + link.link_task_func_offset).unwrap(),
            link.link_task_dummy_func
        );
        assert_eq!(
            bus.read_u32(Domain::Iwram, out_of_range_slot + link.link_task_func_offset).unwrap(),
            0x0801_0000
        );
    }

    #[test]
    fn reaching_exchange_done_state_forces_skip_target() {
        let mut bus = VecMemoryBus::new();
        let map = map_with_battle_link();
        let link = map.battle_link.clone().unwrap();
        let mut state = BattleState::new();
        state.start(&mut bus, &map, true, [0u8; 600], Default::default());
        bus.write_u8(Domain::Ewram, link.battle_communication, LINK_EXCHANGE_DONE_STATE).unwrap();
        state.tick(&mut bus, &map, 0.01, &[]);
        assert_eq!(bus.read_u8(Domain::Ewram, link.battle_communication).unwrap(), SKIP_TARGET_STATE);
        assert!(state.comm_advanced);
    }

    #[test]
    fn reaching_cb2_battle_main_sends_mainloop_ready() {
        let mut bus = VecMemoryBus::new();
        let map = map_with_battle_link();
        let mut state = BattleState::new();
        state.start(&mut bus, &map, true, [0u8; 600], Default::default());
        bus.write_u32(Domain::Iwram, map.callback2_addr, map.cb2_battle_main).unwrap();
        let actions = state.tick(&mut bus, &map, 0.01, &[]);
        assert!(actions.iter().any(|a| matches!(
            a,
            BattleAction::SendMessage(OutboundMessage::DuelStage { stage })
                if is_mainloop_ready(stage)
        )));
        assert!(state.battle_main_reached);
    }

    #[test]
    fn transitions_to_main_loop_once_both_sides_ready() {
        let mut bus = VecMemoryBus::new();
        let map = map_with_battle_link();
        let mut state = BattleState::new();
        state.start(&mut bus, &map, true, [0u8; 600], Default::default());
        bus.write_u32(Domain::Iwram, map.callback2_addr, map.cb2_battle_main).unwrap();
        let inbound = vec![InboundMessage::DuelStage { stage: DuelStage::mainloop_ready() }];
        state.tick(&mut bus, &map, 0.01, &inbound);
        assert_eq!(state.stage(), BattleStage::MainLoop);
    }

    #[test]
    fn timeout_restores_and_finishes_unknown() {
        let mut bus = VecMemoryBus::new();
        let map = map_with_battle_link();
        let mut state = BattleState::new();
        state.start(&mut bus, &map, true, [0u8; 600], Default::default());
        let actions = state.tick(&mut bus, &map, STARTING_TIMEOUT_SECS + 1.0, &[]);
        assert_eq!(state.stage(), BattleStage::Restoring);
        assert!(actions.is_empty());
        let actions = state.tick(&mut bus, &map, 0.01, &[]);
        assert_eq!(state.stage(), BattleStage::Done);
        assert!(matches!(actions[0], BattleAction::Finished(crate::model::BattleOutcome::Unknown)));
    }

    #[test]
    fn missing_battle_link_config_aborts_to_restoring() {
        let mut bus = VecMemoryBus::new();
        let map = crate::config::tests_support::minimal_map_for_tests();
        let mut state = BattleState::new();
        // Can't call start() without battle_link (apply_ram_patches would
        // refuse); drive tick() directly from Starting to exercise the
        // missing-config path in isolation.
        state.transition(BattleStage::Starting);
        state.tick(&mut bus, &map, 0.01, &[]);
        assert_eq!(state.stage(), BattleStage::Restoring);
    }
}
