//! The buffer-relay protocol (component I's core): mirrors the native
//! engine's two 256-byte per-battler communication buffers between host
//! and client, using the execute-flags word as the handshake.
//!
//! Host side watches for `link_dispatch`, ships bufferA to the peer, and
//! waits for a response to write back into bufferB. Client side mirrors a
//! received command into its own bufferA/context registers, lets the local
//! engine run the controller, and ships the resulting bufferB back once
//! the engine clears its `active` bit. Both sides also watch for the
//! battle's natural end (`in_battle_byte` dropping to zero) and for an
//! externally requested forfeit.

use super::outcome;
use super::{BattleAction, BattleStage, BattleState};
use crate::config::{AddressMap, BattleLinkAddresses};
use crate::memory::{Domain, MemoryBus, MemoryBusExt};
use crate::model::{BattleOutcome, ExecFlags};
use protocol::{BufferCmdContext, DuelStage, InboundMessage, OutboundMessage};

const BUFFER_LEN: usize = 256;
const MAX_BATTLERS: usize = 4;
/// The gap between the bufferA and bufferB regions inside `battle_resources`
/// on every ROM build this crate has seen; used to disambiguate between
/// scanned candidate offset pairs rather than to compute addresses at
/// runtime.
const BUFFER_REGION_GAP: u32 = 0x800;

/// Per-duel relay bookkeeping: which battlers have an in-flight command and
/// (client side) which are waiting for the local engine to finish so their
/// result can be shipped back.
pub struct BufferRelayState {
    pub(crate) local_slot: u8,
    /// Host: pending-relay[b], true from the moment a command is dispatched
    /// (local or remote) until it's fully resolved.
    dispatched: [bool; MAX_BATTLERS],
    /// Host: true once a remote battler's ack has been received and its
    /// controller activated, but its `duel_buffer_resp` hasn't arrived yet.
    remote_acked: [bool; MAX_BATTLERS],
    /// Host: last `bufB` received for a remote battler, re-written every
    /// frame so ROM-side scribbling during multi-frame execution can't
    /// disturb it before the next command cycle overwrites the cache.
    cached_remote_buf_b: [Option<Vec<u8>>; MAX_BATTLERS],
    /// Client: battler currently being processed locally (active(b) set).
    awaiting_engine: [bool; MAX_BATTLERS],
    /// Client: the `bufA` last written for a processing battler, re-written
    /// every frame for the same scribbling reason.
    cached_local_buf_a: [Option<Vec<u8>>; MAX_BATTLERS],
}

impl BufferRelayState {
    pub fn new(local_slot: u8) -> Self {
        BufferRelayState {
            local_slot,
            dispatched: [false; MAX_BATTLERS],
            remote_acked: [false; MAX_BATTLERS],
            cached_remote_buf_b: [None, None, None, None],
            awaiting_engine: [false; MAX_BATTLERS],
            cached_local_buf_a: [None, None, None, None],
        }
    }
}

fn buffer_addr(link: &BattleLinkAddresses, region_offset: u32, battler: u8) -> u32 {
    link.battle_resources + region_offset + battler as u32 * BUFFER_LEN as u32
}

/// Picks the first `(offset_a, offset_b)` candidate pair whose gap matches
/// the known bufferA/bufferB separation — used by the address-discovery
/// side of the toolchain, not at relay runtime.
pub fn derive_buffer_offsets(candidates: &[(u32, u32)]) -> Option<(u32, u32)> {
    candidates
        .iter()
        .copied()
        .find(|(a, b)| b.wrapping_sub(*a) == BUFFER_REGION_GAP)
}

pub(super) fn tick(
    state: &mut BattleState,
    bus: &mut dyn MemoryBus,
    map: &AddressMap,
    inbound: &[InboundMessage],
) -> Vec<BattleAction> {
    let mut actions = Vec::new();

    let Some(link) = map.battle_link.clone() else {
        log::error!("battle relay ticked with no battle_link configured");
        state.set_cached_outcome(BattleOutcome::Unknown);
        state.transition(BattleStage::Ending);
        return actions;
    };

    if state.force_end_pending() {
        let outcome = state.take_cached_outcome().unwrap_or(BattleOutcome::Forfeit);
        state.set_cached_outcome(outcome);
        state.transition(BattleStage::Ending);
        return actions;
    }

    let in_battle = bus.read_u8_or(Domain::Ewram, map.battle.in_battle_byte, 1);
    if in_battle == 0 {
        let outcome = outcome::decode_outcome(bus, map);
        state.set_cached_outcome(outcome);
        state.transition(BattleStage::Ending);
        return actions;
    }

    let mut flags = ExecFlags::new(bus.read_u32_or(Domain::Iwram, map.battle.exec_flags, 0));
    let mut any_dispatch_activity = false;

    if state.is_master {
        let local = state.relay.local_slot;

        // 1. Detect a new command.
        for battler in 0..MAX_BATTLERS as u8 {
            if flags.link_dispatch(battler) && !state.relay.dispatched[battler as usize] {
                let buf_a = bus
                    .read_range(Domain::Ewram, buffer_addr(&link, link.buffer_a_offset, battler), BUFFER_LEN)
                    .unwrap_or_else(|_| vec![0; BUFFER_LEN]);
                let buf_b = bus
                    .read_range(Domain::Ewram, buffer_addr(&link, link.buffer_b_offset, battler), BUFFER_LEN)
                    .unwrap_or_else(|_| vec![0; BUFFER_LEN]);
                let ctx = BufferCmdContext {
                    attacker: bus.read_u8_or(Domain::Ewram, link.battler_attacker, 0),
                    target: bus.read_u8_or(Domain::Ewram, link.battler_target, 0),
                    absent: bus.read_u8_or(Domain::Ewram, link.absent_battler_flags, 0),
                    effect: bus.read_u8_or(Domain::Ewram, link.effect_battler, 0),
                };
                actions.push(BattleAction::SendMessage(OutboundMessage::DuelBufferCmd {
                    battler,
                    buf_a,
                    buf_b: Some(buf_b),
                    ctx,
                }));
                state.relay.dispatched[battler as usize] = true;
                state.relay.remote_acked[battler as usize] = false;
                state.relay.cached_remote_buf_b[battler as usize] = None;
                // Our own battler: nothing to wait on the peer for, run it now.
                // Otherwise byte 3 stays set; the engine stays blocked until the peer acks.
                if battler == local {
                    flags.clear_link_dispatch(battler);
                    flags.set_active(battler, true);
                    flags.set_network_wait(battler, true);
                }
                any_dispatch_activity = true;
            }
        }

        // 2. On peer ack for a remote battler, activate it locally.
        for msg in inbound {
            match msg {
                InboundMessage::DuelBufferAck { battler } => {
                    let battler = *battler;
                    if battler != local && state.relay.dispatched[battler as usize] {
                        flags.clear_link_dispatch(battler);
                        flags.set_active(battler, true);
                        flags.set_network_wait(battler, true);
                        state.relay.remote_acked[battler as usize] = true;
                    }
                }
                InboundMessage::DuelBufferResp { battler, buf_b } => {
                    let battler = *battler;
                    bus.write_range_ignore(Domain::Ewram, buffer_addr(&link, link.buffer_b_offset, battler), buf_b);
                    state.relay.cached_remote_buf_b[battler as usize] = Some(buf_b.clone());
                    flags.set_active(battler, false);
                    flags.set_network_wait(battler, false);
                    state.relay.dispatched[battler as usize] = false;
                    state.relay.remote_acked[battler as usize] = false;
                }
                _ => {}
            }
        }

        // 3. Local battler's own controller completes without a network
        // round-trip — just watch the engine clear its own active bit.
        if state.relay.dispatched[local as usize] && !flags.active(local) {
            flags.set_network_wait(local, false);
            state.relay.dispatched[local as usize] = false;
        }

        // Activated-but-no-resp-yet: keep signalling network-wait.
        for battler in 0..MAX_BATTLERS as u8 {
            if battler != local && state.relay.remote_acked[battler as usize] {
                flags.set_network_wait(battler, true);
            }
        }

        // 4. Per-frame re-write of cached remote bufB until the next cycle.
        for battler in 0..MAX_BATTLERS as u8 {
            if battler == local {
                continue;
            }
            if let Some(cached) = state.relay.cached_remote_buf_b[battler as usize].clone() {
                bus.write_range_ignore(Domain::Ewram, buffer_addr(&link, link.buffer_b_offset, battler), &cached);
            }
        }
    } else {
        for msg in inbound {
            if let InboundMessage::DuelBufferCmd { battler, buf_a, buf_b, ctx } = msg {
                let battler = *battler;
                bus.write_range_ignore(Domain::Ewram, buffer_addr(&link, link.buffer_a_offset, battler), buf_a);
                if let Some(buf_b) = buf_b {
                    bus.write_range_ignore(Domain::Ewram, buffer_addr(&link, link.buffer_b_offset, battler), buf_b);
                }
                bus.write_u8_ignore(Domain::Ewram, link.battler_attacker, ctx.attacker);
                bus.write_u8_ignore(Domain::Ewram, link.battler_target, ctx.target);
                bus.write_u8_ignore(Domain::Ewram, link.absent_battler_flags, ctx.absent);
                bus.write_u8_ignore(Domain::Ewram, link.effect_battler, ctx.effect);
                flags.set_active(battler, true);
                flags.clear_link_dispatch(battler);
                state.relay.awaiting_engine[battler as usize] = true;
                state.relay.cached_local_buf_a[battler as usize] = Some(buf_a.clone());
                actions.push(BattleAction::SendMessage(OutboundMessage::DuelBufferAck { battler }));
                any_dispatch_activity = true;
            }
        }

        // While processing: re-write bufA every frame; context and bufB are
        // left alone (the engine owns them from here).
        for battler in 0..MAX_BATTLERS as u8 {
            if state.relay.awaiting_engine[battler as usize] {
                if let Some(cached) = state.relay.cached_local_buf_a[battler as usize].clone() {
                    bus.write_range_ignore(Domain::Ewram, buffer_addr(&link, link.buffer_a_offset, battler), &cached);
                }
            }
        }

        for battler in 0..MAX_BATTLERS as u8 {
            if state.relay.awaiting_engine[battler as usize] && !flags.active(battler) {
                let buf_b = bus
                    .read_range(Domain::Ewram, buffer_addr(&link, link.buffer_b_offset, battler), BUFFER_LEN)
                    .unwrap_or_else(|_| vec![0; BUFFER_LEN]);
                actions.push(BattleAction::SendMessage(OutboundMessage::DuelBufferResp { battler, buf_b }));
                state.relay.awaiting_engine[battler as usize] = false;
                state.relay.cached_local_buf_a[battler as usize] = None;
            }
        }
    }

    flags.clear_byte2();
    bus.write_u32_ignore(Domain::Iwram, map.battle.exec_flags, flags.raw());

    if !state.intro_complete && any_dispatch_activity {
        state.intro_complete = true;
        actions.push(BattleAction::SendMessage(OutboundMessage::DuelStage {
            stage: DuelStage::mainloop_entered(),
        }));
    }

    actions
}
