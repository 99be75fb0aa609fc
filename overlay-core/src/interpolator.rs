//! FIFO waypoint queues per remote player, consuming position snapshots
//! from the network at whatever rate they arrive — including the
//! 250x-speedhack extreme where dozens of packets land in a single local
//! frame (component D).
//!
//! Every remote player gets its own independent queue; nothing here reads
//! emulator memory, which is what makes the module cheap to test
//! exhaustively against the scenarios in §8 without a `MemoryBus` double.

use crate::model::{
    ConnectionCache, ConnectionCacheMap, MapConnection, PositionSample, TransitionFrom,
    TransitionKind, Waypoint,
};
use std::collections::{HashMap, VecDeque};

/// A queue longer than this is almost certainly a runaway backlog (the
/// peer disconnected, or the speedhack is running at an extreme multiplier
/// for a long time); rather than let memory grow unbounded the queue is
/// flushed and the ghost snaps to the newest waypoint.
pub const MAX_QUEUE_SIZE: usize = 1000;

/// Manhattan tile distance beyond which a same-map update is treated as a
/// teleport rather than a walked step.
pub const TELEPORT_THRESHOLD: i32 = 10;

/// The assumed interval between position packets absent better evidence.
pub const DEFAULT_DURATION_MS: u32 = 266;

/// No waypoint is ever animated faster than this, regardless of how close
/// together its packets arrived.
pub const MIN_VISUAL_DURATION_MS: u32 = 64;

/// Multiplier applied to every selected duration as padding against
/// network jitter, so a slightly-early next packet doesn't truncate the
/// current animation into a stutter.
const JITTER_PADDING: f32 = 1.08;

fn manhattan(ax: i32, ay: i32, bx: i32, by: i32) -> i32 {
    (ax - bx).abs() + (ay - by).abs()
}

/// Whether the interpolator is currently idle (`current` is the resting
/// position) or animating a segment towards the queue's head.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InterpState {
    Idle,
    Interpolating,
}

/// A render-facing snapshot of one remote player's current pose, derived
/// from the interpolator's internal waypoint state. This is what
/// [`Interpolator::position_of`] returns and what the ghost projector
/// consumes — it is deliberately not the same type as the stored
/// [`Waypoint`], since a mid-segment seam crossing reports the *target*
/// map/position plus a separate transition progress rather than a
/// continuously blended coordinate (the projector does that blend in
/// local tile space, per §4.E).
#[derive(Clone, Debug, PartialEq)]
pub struct InterpolatedPose {
    pub x: f32,
    pub y: f32,
    pub map_group: u8,
    pub map_id: u8,
    pub facing: u8,
    pub border_x: u16,
    pub border_y: u16,
    pub connections: Vec<MapConnection>,
    pub cross_map_seam: bool,
    pub transition_progress: Option<f32>,
    pub transition_from: Option<TransitionFrom>,
}

impl From<&Waypoint> for InterpolatedPose {
    fn from(wp: &Waypoint) -> Self {
        InterpolatedPose {
            x: wp.x,
            y: wp.y,
            map_group: wp.map_group,
            map_id: wp.map_id,
            facing: wp.facing,
            border_x: wp.border_x,
            border_y: wp.border_y,
            connections: wp.connections.clone(),
            cross_map_seam: false,
            transition_progress: None,
            transition_from: None,
        }
    }
}

struct PlayerInterp {
    current: Waypoint,
    queue: VecDeque<Waypoint>,
    anim_from: Option<Waypoint>,
    anim_progress: f32,
    state: InterpState,
    last_move_timestamp_ms: Option<u64>,
    meta_by_map_rev: ConnectionCacheMap,
}

struct ResolvedMeta {
    border_x: u16,
    border_y: u16,
    connections: Vec<MapConnection>,
}

impl PlayerInterp {
    fn new(position: &PositionSample, timestamp_ms: Option<u64>) -> Self {
        let meta = ResolvedMeta {
            border_x: position.border_x.unwrap_or(0),
            border_y: position.border_y.unwrap_or(0),
            connections: position.connections.clone(),
        };
        let mut interp = PlayerInterp {
            current: build_waypoint(position, &meta, 0, false, TransitionKind::None),
            queue: VecDeque::new(),
            anim_from: None,
            anim_progress: 0.0,
            state: InterpState::Idle,
            last_move_timestamp_ms: timestamp_ms,
            meta_by_map_rev: HashMap::new(),
        };
        interp.remember_metadata(position);
        interp
    }

    fn remember_metadata(&mut self, position: &PositionSample) {
        if let (Some(bx), Some(by)) = (position.border_x, position.border_y) {
            self.meta_by_map_rev.insert(
                (position.map_key(), position.map_rev),
                ConnectionCache {
                    border_x: bx,
                    border_y: by,
                    connections: position.connections.clone(),
                },
            );
        }
    }

    fn resolve_metadata(&self, position: &PositionSample) -> ResolvedMeta {
        if let (Some(bx), Some(by)) = (position.border_x, position.border_y) {
            return ResolvedMeta {
                border_x: bx,
                border_y: by,
                connections: position.connections.clone(),
            };
        }
        if let Some(cached) = self
            .meta_by_map_rev
            .get(&(position.map_key(), position.map_rev))
        {
            return ResolvedMeta {
                border_x: cached.border_x,
                border_y: cached.border_y,
                connections: cached.connections.clone(),
            };
        }
        ResolvedMeta {
            border_x: 0,
            border_y: 0,
            connections: vec![],
        }
    }

    fn reference(&self) -> &Waypoint {
        self.queue.back().unwrap_or(&self.current)
    }

    fn snap_to(&mut self, waypoint: Waypoint) {
        self.queue.clear();
        self.current = waypoint;
        self.anim_from = None;
        self.anim_progress = 0.0;
        self.state = InterpState::Idle;
    }

    fn ingest(&mut self, position: &PositionSample, timestamp_ms: Option<u64>, duration_hint_ms: Option<u32>) {
        self.remember_metadata(position);
        let meta = self.resolve_metadata(position);

        let reference = self.reference().clone();
        let same_map = reference.map_key() == position.map_key();
        let same_tile =
            same_map && reference.x as i32 == position.x && reference.y as i32 == position.y;

        if same_map && self.queue.is_empty() && same_tile {
            // Facing-only packet: update in place, never touch the move
            // clock (a facing-only packet must not shrink the duration
            // computed for the *next* real step).
            self.current.facing = position.facing;
            return;
        }

        let is_seam = !same_map
            && (position
                .transition_kind
                .map(|k| k.is_seam())
                .unwrap_or(false)
                || position
                    .transition_from
                    .as_ref()
                    .map(|from| {
                        from.map_group == reference.map_group
                            && from.map_id == reference.map_id
                            && manhattan(from.x, from.y, reference.x as i32, reference.y as i32)
                                <= 2
                    })
                    .unwrap_or(false));

        let teleport = if same_map {
            manhattan(
                reference.x as i32,
                reference.y as i32,
                position.x,
                position.y,
            ) > TELEPORT_THRESHOLD
        } else {
            !is_seam
        };

        if teleport {
            let waypoint = build_waypoint(position, &meta, 0, false, TransitionKind::None);
            self.snap_to(waypoint);
            if let Some(ts) = timestamp_ms {
                self.last_move_timestamp_ms = Some(ts);
            }
            return;
        }

        let duration = select_duration(self.last_move_timestamp_ms, timestamp_ms, duration_hint_ms);
        if let Some(ts) = timestamp_ms {
            self.last_move_timestamp_ms = Some(ts);
        }

        let transition_kind = position.transition_kind.unwrap_or(TransitionKind::None);
        let mut waypoint = build_waypoint(position, &meta, duration, !same_map, transition_kind);
        waypoint.transition_from = position.transition_from.clone();

        if let Some(tail) = self.queue.back_mut() {
            if tail.cross_map_seam
                && tail.is_out_of_bounds()
                && tail.map_key() == waypoint.map_key()
                && manhattan(tail.x as i32, tail.y as i32, waypoint.x as i32, waypoint.y as i32)
                    <= 2
                && !waypoint.is_out_of_bounds()
            {
                tail.x = waypoint.x;
                tail.y = waypoint.y;
                tail.facing = waypoint.facing;
                tail.duration_ms = tail.duration_ms.max(waypoint.duration_ms);
                self.state = InterpState::Interpolating;
                return;
            }
        }

        self.queue.push_back(waypoint);
        if self.queue.len() > MAX_QUEUE_SIZE {
            let last = self.queue.pop_back().expect("just pushed");
            self.snap_to(last);
        } else {
            self.state = InterpState::Interpolating;
        }
    }

    fn step(&mut self, mut dt_ms: u32) {
        loop {
            let Some(target) = self.queue.front() else {
                self.state = InterpState::Idle;
                self.anim_progress = 0.0;
                self.anim_from = None;
                return;
            };

            let queue_len = self.queue.len();
            let base_duration = target.duration_ms.max(1) as f32;
            let effective_duration = if target.cross_map_seam {
                base_duration
            } else {
                base_duration / (1.0 + 0.5 * (queue_len as f32 - 1.0))
            };
            let effective_duration = effective_duration.max(1.0);

            let elapsed_before = self.anim_progress * effective_duration;
            let elapsed_after = elapsed_before + dt_ms as f32;

            if elapsed_after >= effective_duration {
                let consumed = (effective_duration - elapsed_before).max(0.0) as u32;
                dt_ms = dt_ms.saturating_sub(consumed);
                let target = self.queue.pop_front().expect("checked Some above");
                self.current = target;
                self.anim_progress = 0.0;
                self.anim_from = None;
                self.state = InterpState::Idle;
                if dt_ms == 0 {
                    return;
                }
                continue;
            }

            let progress = (elapsed_after / effective_duration).clamp(0.0, 1.0);
            let from = self
                .anim_from
                .clone()
                .unwrap_or_else(|| self.current.clone());
            let target = self.queue.front().expect("checked Some above").clone();
            self.anim_from.get_or_insert(from.clone());
            self.anim_progress = progress;
            self.state = InterpState::Interpolating;

            if target.cross_map_seam {
                // The projector blends endpoints itself; leave the stored
                // position untouched and just publish progress via
                // `position_of`.
            } else {
                self.current.x = from.x + (target.x - from.x) * progress;
                self.current.y = from.y + (target.y - from.y) * progress;
                self.current.facing = if progress >= 0.5 {
                    target.facing
                } else {
                    from.facing
                };
                self.current.map_group = target.map_group;
                self.current.map_id = target.map_id;
                self.current.border_x = target.border_x;
                self.current.border_y = target.border_y;
                self.current.connections = target.connections.clone();
            }
            return;
        }
    }

    fn pose(&self) -> InterpolatedPose {
        if self.state == InterpState::Interpolating {
            if let Some(target) = self.queue.front() {
                if target.cross_map_seam {
                    return InterpolatedPose {
                        x: target.x,
                        y: target.y,
                        map_group: target.map_group,
                        map_id: target.map_id,
                        facing: target.facing,
                        border_x: target.border_x,
                        border_y: target.border_y,
                        connections: target.connections.clone(),
                        cross_map_seam: true,
                        transition_progress: Some(self.anim_progress),
                        transition_from: target.transition_from.clone(),
                    };
                }
            }
        }
        InterpolatedPose::from(&self.current)
    }
}

fn build_waypoint(
    position: &PositionSample,
    meta: &ResolvedMeta,
    duration_ms: u32,
    cross_map_seam: bool,
    transition_kind: TransitionKind,
) -> Waypoint {
    Waypoint {
        x: position.x as f32,
        y: position.y as f32,
        map_group: position.map_group,
        map_id: position.map_id,
        facing: position.facing,
        map_rev: position.map_rev,
        meta_stable: position.meta_stable,
        meta_hash: position.meta_hash,
        border_x: meta.border_x,
        border_y: meta.border_y,
        connections: meta.connections.clone(),
        transition_from: position.transition_from.clone(),
        transition_kind,
        cross_map_seam,
        duration_ms,
    }
}

fn select_duration(last_ts: Option<u64>, ts: Option<u64>, hint: Option<u32>) -> u32 {
    let from_dt = match (last_ts, ts) {
        (Some(last), Some(now)) => {
            let dt = now.saturating_sub(last);
            if (10..=(2 * DEFAULT_DURATION_MS) as u64).contains(&dt) {
                Some(dt as u32)
            } else {
                None
            }
        }
        _ => None,
    };
    let from_hint = hint.filter(|h| (10..=2000).contains(h));
    let duration = from_dt.or(from_hint).unwrap_or(DEFAULT_DURATION_MS);
    let padded = (duration as f32 * JITTER_PADDING) as u32;
    padded.max(MIN_VISUAL_DURATION_MS)
}

/// Owns every remote player's waypoint queue and drives them forward.
#[derive(Default)]
pub struct Interpolator {
    players: HashMap<String, PlayerInterp>,
}

impl Interpolator {
    pub fn new() -> Self {
        Interpolator::default()
    }

    /// Ingests one position packet for `player_id`, enqueuing, fusing, or
    /// snapping per §4.D's rules.
    pub fn update(
        &mut self,
        player_id: &str,
        position: PositionSample,
        timestamp_ms: Option<u64>,
        duration_hint_ms: Option<u32>,
    ) {
        match self.players.get_mut(player_id) {
            Some(entry) => entry.ingest(&position, timestamp_ms, duration_hint_ms),
            None => {
                self.players
                    .insert(player_id.to_string(), PlayerInterp::new(&position, timestamp_ms));
            }
        }
    }

    /// Advances every tracked player's animation by `dt_ms`.
    pub fn step(&mut self, dt_ms: u32) {
        for player in self.players.values_mut() {
            player.step(dt_ms);
        }
    }

    pub fn position_of(&self, player_id: &str) -> Option<InterpolatedPose> {
        self.players.get(player_id).map(PlayerInterp::pose)
    }

    pub fn state_of(&self, player_id: &str) -> Option<InterpState> {
        self.players.get(player_id).map(|p| p.state)
    }

    pub fn remove(&mut self, player_id: &str) {
        self.players.remove(player_id);
    }
}
