//! Frame Scheduler (component J): the one type a host embeds directly.
//!
//! Owns every other component plus the [`TransportAdapter`], and drives
//! them in the fixed per-frame order §4.J and §5 specify: inbound
//! transport messages are routed before anything ticks; the interpolator
//! always steps before the ghost projector reads it; the duel machine
//! always ticks before the battle controller's stage transitions.

use crate::battle::{BattleAction, BattleState, LocalPlayerInfo};
use crate::camera::CameraTracker;
use crate::config::AddressMap;
use crate::duel::{DuelAction, DuelEvent, DuelStateMachine};
use crate::ghost::projector::{LocalContext, MetaTrustTracker};
use crate::ghost::renderer::{GhostRenderRecord, GhostRenderer, OamPriority, PaletteAllocator, SlotAllocator};
use crate::ghost::{draw_position, project_pose};
use crate::interpolator::Interpolator;
use crate::memory::MemoryBus;
use crate::model::{BattleOutcome, MapConnection, PositionSample};
use crate::textbox::TextboxInjector;
use crate::transport::TransportAdapter;
use protocol::{InboundMessage, OutboundMessage};
use std::collections::HashMap;

/// Local player screen origin the ghost renderer's coordinates are
/// expressed relative to; the overworld camera always centers the local
/// player tile here.
pub const LOCAL_SCREEN_ORIGIN: (i32, i32) = (112, 72);

/// Fixed host-reserved OAM/VRAM region the ghost renderer writes into.
/// Equivalent to component B's "OAM reservation" note; unlike the rest of
/// [`AddressMap`] it isn't ROM-specific, just host-layout configuration,
/// so it's threaded in separately rather than living in the address map.
#[derive(Clone, Copy, Debug)]
pub struct GhostLayout {
    pub oam_base: u32,
    pub vram_tile_base: u32,
    pub tile_stride: u32,
}

/// Everything the host has to supply about one remote player's sprite this
/// frame; 4bpp decoding and palette-bank *policy* beyond native-bank reuse
/// are out of scope (§1) so the host hands over already-decoded pixels.
#[derive(Clone, Debug)]
pub struct RemoteSpriteFrame {
    pub width: u32,
    pub height: u32,
    pub hflip: bool,
    pub vflip: bool,
    pub native_pal_bank: Option<u8>,
    pub sprite_hash: u32,
    pub tile_pixels: Option<Vec<u8>>,
}

/// Everything the Scheduler needs sampled locally this frame. Camera bytes
/// are `None` when the memory gateway couldn't read them.
#[derive(Clone, Debug)]
pub struct LocalFrameInputs {
    pub position: PositionSample,
    pub camera: Option<(i16, i16)>,
    pub timestamp_ms: u64,
}

/// Host-originated events the Scheduler can't derive from memory or the
/// transport on its own: local input. Proximity/tile-distance detection is
/// the host's to perform against its own ghost list (it already has every
/// remote player's projected tile from the previous frame's render pass).
#[derive(Clone, Debug, PartialEq)]
pub enum HostEvent {
    ProximityPress { target_id: String, target_name: String },
    AReleased,
    ManualToggle,
    ManualCommit,
    ManualCancel,
}

pub struct Scheduler {
    map: AddressMap,
    local_player_id: String,
    camera: CameraTracker,
    interpolator: Interpolator,
    duel: DuelStateMachine,
    battle: BattleState,
    textbox: TextboxInjector,
    renderer: GhostRenderer,
    slots: SlotAllocator,
    palettes: PaletteAllocator,
    meta_trust: HashMap<String, MetaTrustTracker>,
    transport: Box<dyn TransportAdapter>,
    frame: u64,
    last_heartbeat_position: Option<PositionSample>,
    pending_event: Option<DuelEvent>,
}

/// Outcome of one [`Scheduler::tick`]: the ghosts to present on screen plus
/// anything terminal that happened this frame.
#[derive(Default)]
pub struct SchedulerOutput {
    pub ghosts: Vec<GhostRenderRecord>,
    pub battle_finished: Option<BattleOutcome>,
    pub duel_cancelled: bool,
}

impl Scheduler {
    pub fn new(map: AddressMap, local_player_id: String, transport: Box<dyn TransportAdapter>, oam_capacity: usize) -> Self {
        Scheduler {
            map,
            local_player_id,
            camera: CameraTracker::new(),
            interpolator: Interpolator::new(),
            duel: DuelStateMachine::new(),
            battle: BattleState::new(),
            textbox: TextboxInjector::new(),
            renderer: GhostRenderer::new(),
            slots: SlotAllocator::new(oam_capacity),
            palettes: PaletteAllocator::default(),
            meta_trust: HashMap::new(),
            transport,
            frame: 0,
            last_heartbeat_position: None,
            pending_event: None,
        }
    }

    pub fn duel_state(&self) -> &DuelStateMachine {
        &self.duel
    }

    pub fn battle_state(&self) -> &BattleState {
        &self.battle
    }

    pub fn map(&self) -> &AddressMap {
        &self.map
    }

    fn route_inbound(&mut self, inbound: Vec<InboundMessage>) -> (Vec<InboundMessage>, Option<DuelEvent>) {
        let mut battle_inbound = Vec::new();
        let mut duel_event = None;
        for message in inbound {
            match message {
                InboundMessage::Position { player_id, x, y, map_group, map_id, facing, map_rev, meta_stable, meta_hash, border_x, border_y, connections, transition_from, transition_kind, .. } => {
                    let sample = PositionSample {
                        x: x as i32,
                        y: y as i32,
                        map_group,
                        map_id,
                        facing,
                        border_x,
                        border_y,
                        connections: connections
                            .unwrap_or_default()
                            .into_iter()
                            .map(|c| MapConnection { direction: c.direction.into(), offset: c.offset, map_group: c.map_group, map_id: c.map_id })
                            .collect(),
                        meta_stable,
                        meta_hash,
                        map_rev,
                        transition_from: transition_from.map(|t| crate::model::TransitionFrom { map_group: t.map_group, map_id: t.map_id, x: t.x, y: t.y }),
                        transition_kind: transition_kind.map(|k| match k {
                            protocol::TransitionKind::SeamConnected => crate::model::TransitionKind::SeamConnected,
                            protocol::TransitionKind::LikelySeam => crate::model::TransitionKind::LikelySeam,
                            protocol::TransitionKind::None => crate::model::TransitionKind::None,
                        }),
                    };
                    self.interpolator.update(&player_id, sample, None, None);
                }
                InboundMessage::DuelRequest { requester_id, requester_name } => {
                    duel_event = Some(DuelEvent::IncomingRequest { requester_id, requester_name });
                }
                InboundMessage::DuelAccept { .. } => {
                    duel_event = Some(DuelEvent::ResponseAccepted);
                }
                InboundMessage::DuelDecline { .. } | InboundMessage::DuelDeclined { .. } => {
                    duel_event = Some(DuelEvent::ResponseDeclined);
                }
                other @ (InboundMessage::DuelBufferCmd { .. }
                | InboundMessage::DuelBufferResp { .. }
                | InboundMessage::DuelBufferAck { .. }
                | InboundMessage::DuelStage { .. }) => {
                    battle_inbound.push(other);
                }
                InboundMessage::DuelWarp { .. } | InboundMessage::DuelPlayerInfo { .. } => {
                    // Consumed by the host's warp/battle-start orchestration,
                    // which sits a layer above this scheduler (it owns the
                    // trampoline placement and opponent-party staging).
                }
            }
        }
        (battle_inbound, duel_event)
    }

    fn send(&mut self, message: OutboundMessage) {
        self.transport.send(message);
    }

    fn apply_duel_action(&mut self, action: DuelAction, bus: &mut dyn MemoryBus, output: &mut SchedulerOutput) {
        match action {
            DuelAction::SendDuelRequest { target_id } => {
                self.send(OutboundMessage::DuelRequest { target_id });
            }
            DuelAction::SendAccept { requester_id } => {
                self.send(OutboundMessage::DuelAccept { requester_id });
            }
            DuelAction::SendDecline { requester_id } => {
                self.send(OutboundMessage::DuelDecline { requester_id });
            }
            DuelAction::ShowYesNo { text } => {
                if let Some(link) = self.map.battle_link.clone() {
                    self.textbox.show_yes_no(bus, &link, &text);
                } else {
                    log::warn!("scheduler: yes/no prompt requested with no battle_link configured");
                    self.duel.enter_manual_fallback();
                }
            }
            DuelAction::ShowMessage { text } => {
                if let Some(link) = self.map.battle_link.clone() {
                    self.textbox.show_message(bus, &link, &text);
                }
            }
            DuelAction::StartWarp => {
                // Trampoline placement and the opponent-party handoff are
                // driven by the host once it sees this in the output, since
                // they need the scratch-region scan results and the peer's
                // `duel_player_info`/party payload this crate doesn't buffer.
            }
            DuelAction::Cancel => {
                if let Some(link) = self.map.battle_link.clone() {
                    self.textbox.clear(bus, &link);
                }
                output.duel_cancelled = true;
            }
        }
    }

    /// Starts the battle controller once the host has staged the opponent's
    /// party and resolved master/slave. Call after a `DuelAction::StartWarp`
    /// has been carried out and the map load has landed in the battle.
    pub fn start_battle(&mut self, bus: &mut dyn MemoryBus, is_master: bool, opponent_party: [u8; 600], local_info: LocalPlayerInfo) {
        self.battle.start(bus, &self.map, is_master, opponent_party, local_info);
    }

    pub fn force_end_battle(&mut self, outcome: BattleOutcome) {
        self.battle.force_end(outcome);
    }

    /// Advances every component by one frame, in the order §4.J specifies.
    pub fn tick(&mut self, bus: &mut dyn MemoryBus, local: LocalFrameInputs, sprites: &HashMap<String, RemoteSpriteFrame>, wall_dt_secs: f64, host_event: Option<HostEvent>) -> SchedulerOutput {
        self.frame += 1;
        let mut output = SchedulerOutput::default();

        let inbound = self.transport.poll_inbound();
        let (battle_inbound, inbound_duel_event) = self.route_inbound(inbound);

        self.maybe_send_heartbeat(&local);

        let (sub_x, sub_y) = self.camera.update(local.position.x, local.position.y, local.position.map_group, local.position.map_id, local.camera);
        self.interpolator.step(16);

        let in_battle = self.battle.is_active();
        if !in_battle {
            output.ghosts = self.render_ghosts(bus, &local.position, (sub_x, sub_y), sprites);
        }

        let duel_event = host_event
            .and_then(host_event_to_duel_event)
            .or(inbound_duel_event)
            .or_else(|| self.pending_event.take());
        let duel_actions = self.duel.tick(duel_event, self.frame);
        for action in duel_actions {
            self.apply_duel_action(action, bus, &mut output);
        }

        if self.battle.is_active() {
            let battle_actions = self.battle.tick(bus, &self.map, wall_dt_secs, &battle_inbound);
            for action in battle_actions {
                match action {
                    BattleAction::SendMessage(message) => self.send(message),
                    BattleAction::Finished(outcome) => output.battle_finished = Some(outcome),
                }
            }
        }

        if self.textbox.is_active() {
            if let Some(link) = self.map.battle_link.clone() {
                let outcome = self.textbox.poll(bus, &link);
                self.apply_textbox_outcome(outcome);
            }
        }

        output
    }

    fn apply_textbox_outcome(&mut self, outcome: crate::textbox::TextboxOutcome) {
        use crate::textbox::TextboxOutcome;
        // Fed back into the duel machine on the *next* tick: the textbox
        // poll happens after H per §4.J's ordering, so an answer observed
        // this frame is delivered as next frame's event.
        match outcome {
            TextboxOutcome::Yes => self.pending_event = Some(DuelEvent::Yes),
            TextboxOutcome::No => self.pending_event = Some(DuelEvent::No),
            TextboxOutcome::MessageDone => self.pending_event = Some(DuelEvent::MessageDismissed),
            TextboxOutcome::Pending => {}
        }
    }

    fn maybe_send_heartbeat(&mut self, local: &LocalFrameInputs) {
        let position = &local.position;
        let changed = match &self.last_heartbeat_position {
            Some(prev) => prev.x != position.x || prev.y != position.y || prev.map_id != position.map_id || prev.map_group != position.map_group || prev.facing != position.facing,
            None => true,
        };
        if !changed {
            return;
        }
        self.last_heartbeat_position = Some(position.clone());
        self.send(OutboundMessage::Position {
            x: position.x as i16,
            y: position.y as i16,
            map_id: position.map_id,
            map_group: position.map_group,
            facing: position.facing,
            time_ms: local.timestamp_ms,
            map_rev: position.map_rev,
            meta_stable: position.meta_stable,
            meta_hash: position.meta_hash,
            border_x: position.border_x,
            border_y: position.border_y,
            connections: if position.connections.is_empty() {
                None
            } else {
                Some(
                    position
                        .connections
                        .iter()
                        .map(|c| protocol::ConnectionInfo { direction: c.direction.into(), offset: c.offset, map_group: c.map_group, map_id: c.map_id })
                        .collect(),
                )
            },
            transition_from: position.transition_from.map(|t| protocol::TransitionFrom { map_group: t.map_group, map_id: t.map_id, x: t.x, y: t.y }),
            transition_kind: position.transition_kind.map(|k| match k {
                crate::model::TransitionKind::SeamConnected => protocol::TransitionKind::SeamConnected,
                crate::model::TransitionKind::LikelySeam => protocol::TransitionKind::LikelySeam,
                crate::model::TransitionKind::None => protocol::TransitionKind::None,
            }),
            transition_token: None,
        });
    }

    fn render_ghosts(&mut self, bus: &mut dyn MemoryBus, local_pos: &PositionSample, sub_pixel: (i16, i16), sprites: &HashMap<String, RemoteSpriteFrame>) -> Vec<GhostRenderRecord> {
        let local_ctx = LocalContext {
            map_group: local_pos.map_group,
            map_id: local_pos.map_id,
            border_x: local_pos.border_x.unwrap_or(0),
            border_y: local_pos.border_y.unwrap_or(0),
            connections: local_pos.connections.clone(),
        };

        let mut records = Vec::new();
        let player_ids: Vec<String> = sprites.keys().cloned().collect();
        for player_id in player_ids {
            if player_id == self.local_player_id {
                continue;
            }
            let Some(pose) = self.interpolator.position_of(&player_id) else { continue };
            let Some(sprite) = sprites.get(&player_id) else { continue };

            let trust = self
                .meta_trust
                .entry(player_id.clone())
                .or_insert_with(MetaTrustTracker::new);
            let meta_trust = trust.observe(pose.map_group, pose.map_id, 0, true, 0);

            let Some((screen_x, screen_y)) = draw_position(&local_ctx, (local_pos.x, local_pos.y), sub_pixel, &pose, meta_trust) else {
                self.slots.release(&player_id);
                self.palettes.release(&player_id);
                continue;
            };
            let projected = project_pose(&local_ctx, &pose, meta_trust);
            let Some(vram_slot) = self.slots.slot_for(&player_id) else {
                log::warn!("scheduler: OAM slots exhausted, dropping ghost for {}", player_id);
                continue;
            };
            let palette_slot = Some(self.palettes.bank_for(&player_id, sprite.native_pal_bank));

            let local_y_f = local_pos.y as f32;
            let desired_front = projected.map(|(_, gy)| gy > local_y_f).unwrap_or(false);
            let priority = self.renderer.resolve_priority(&player_id, desired_front, OamPriority::Back);

            let record = GhostRenderRecord {
                player_id: player_id.clone(),
                vram_slot,
                palette_slot,
                native_pal_bank: sprite.native_pal_bank,
                sprite_hash: sprite.sprite_hash,
                oam_priority: priority,
                screen_x: screen_x as i32,
                screen_y: screen_y as i32,
                width: sprite.width,
                height: sprite.height,
                hflip: sprite.hflip,
                vflip: sprite.vflip,
                force_overlay_front: desired_front,
            };
            records.push(record);
            let _ = bus; // VRAM/OAM writes happen via render_to_memory below.
        }

        crate::ghost::depth_sort(&mut records, |r| r.screen_y as f32);
        records
    }

    /// Writes the already-projected ghost records into OAM/VRAM, using the
    /// host-supplied tile pixel data for whichever slots need a refresh.
    pub fn render_to_memory(&mut self, bus: &mut dyn MemoryBus, layout: &GhostLayout, ghosts: &[GhostRenderRecord], sprites: &HashMap<String, RemoteSpriteFrame>) {
        for ghost in ghosts {
            let pixels = sprites.get(&ghost.player_id).and_then(|s| s.tile_pixels.as_deref());
            self.renderer.render(bus, layout.oam_base, layout.vram_tile_base, layout.tile_stride, ghost, pixels);
        }
    }
}

fn host_event_to_duel_event(event: HostEvent) -> Option<DuelEvent> {
    match event {
        HostEvent::ProximityPress { target_id, target_name } => Some(DuelEvent::ProximityPress { target_id, target_name }),
        HostEvent::AReleased => Some(DuelEvent::AReleased),
        HostEvent::ManualToggle | HostEvent::ManualCommit | HostEvent::ManualCancel => None,
    }
}
