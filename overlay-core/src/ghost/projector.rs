//! Pure coordinate math mapping a remote player's `(map, x, y)` into the
//! local camera's tile space (component E, projection half).
//!
//! Nothing here touches a [`crate::memory::MemoryBus`]; it is kept pure so
//! the map-border/connection formulas can be pinned against the concrete
//! scenarios in spec §8 without any emulator state at all.

use crate::model::{Direction, MapConnection, TransitionFrom};
use std::collections::{HashMap, HashSet};

/// Everything the projector needs to know about the local player's
/// situation to project a remote point into local tile space.
#[derive(Clone, Debug)]
pub struct LocalContext {
    pub map_group: u8,
    pub map_id: u8,
    pub border_x: u16,
    pub border_y: u16,
    pub connections: Vec<MapConnection>,
}

/// A remote player's position plus the map metadata needed to project it —
/// either resolved live from a position packet or reused from the
/// interpolator's [`crate::model::ConnectionCache`].
#[derive(Clone, Debug)]
pub struct RemotePoint {
    pub map_group: u8,
    pub map_id: u8,
    pub x: f32,
    pub y: f32,
    pub border_x: u16,
    pub border_y: u16,
    /// The remote's own advertised connections, consulted only by the
    /// (disabled-by-default) fallback path.
    pub connections: Vec<MapConnection>,
}

fn invert(direction: Direction) -> Direction {
    match direction {
        Direction::N => Direction::S,
        Direction::S => Direction::N,
        Direction::W => Direction::E,
        Direction::E => Direction::W,
    }
}

/// The unit tile vector a connection direction implies, used to derive an
/// unprojectable seam "from" endpoint from its "to" endpoint.
pub fn direction_unit_vector(direction: Direction) -> (f32, f32) {
    match direction {
        Direction::N => (0.0, -1.0),
        Direction::S => (0.0, 1.0),
        Direction::W => (-1.0, 0.0),
        Direction::E => (1.0, 0.0),
    }
}

fn apply_connection(
    direction: Direction,
    offset: i32,
    local_border_x: u16,
    local_border_y: u16,
    remote_border_x: u16,
    remote_border_y: u16,
    remote_x: f32,
    remote_y: f32,
) -> (f32, f32) {
    let offset = offset as f32;
    match direction {
        Direction::N => (remote_x + offset, remote_y + local_border_y as f32),
        Direction::S => (remote_x + offset, remote_y - remote_border_y as f32),
        Direction::W => (remote_x - remote_border_x as f32, remote_y + offset),
        Direction::E => (remote_x + local_border_x as f32, remote_y + offset),
    }
}

/// Projects `remote` into `local`'s tile space. Returns `None` when no
/// connection links the two maps and the fallback is not both enabled
/// (`meta_trust`) and applicable.
///
/// Same-map positions always project as the identity — this is invariant
/// #2 from spec §8 and is exercised directly in the test below.
pub fn project(local: &LocalContext, remote: &RemotePoint, meta_trust: bool) -> Option<(f32, f32)> {
    if local.map_group == remote.map_group && local.map_id == remote.map_id {
        return Some((remote.x, remote.y));
    }

    if let Some(conn) = local
        .connections
        .iter()
        .find(|c| c.map_group == remote.map_group && c.map_id == remote.map_id)
    {
        return Some(apply_connection(
            conn.direction,
            conn.offset,
            local.border_x,
            local.border_y,
            remote.border_x,
            remote.border_y,
            remote.x,
            remote.y,
        ));
    }

    if meta_trust {
        if let Some(conn) = remote
            .connections
            .iter()
            .find(|c| c.map_group == local.map_group && c.map_id == local.map_id)
        {
            return Some(apply_connection(
                invert(conn.direction),
                conn.offset,
                local.border_x,
                local.border_y,
                remote.border_x,
                remote.border_y,
                remote.x,
                remote.y,
            ));
        }
    }

    None
}

/// Blends a seam crossing's "from" and "to" endpoints in local tile space
/// at `progress`, per §4.E. `to` is the interpolator's current target
/// point; `from` is its recorded `transition_from`, which may itself need
/// projecting (it can be expressed in either map).
pub fn project_seam_blend(
    local: &LocalContext,
    to: &RemotePoint,
    from: Option<&TransitionFrom>,
    seam_direction: Option<Direction>,
    progress: f32,
    meta_trust: bool,
) -> Option<(f32, f32)> {
    let to_projected = project(local, to, meta_trust)?;

    let from_projected = from.and_then(|f| {
        let candidate = RemotePoint {
            map_group: f.map_group,
            map_id: f.map_id,
            x: f.x as f32,
            y: f.y as f32,
            border_x: to.border_x,
            border_y: to.border_y,
            connections: to.connections.clone(),
        };
        project(local, &candidate, meta_trust)
    });

    let from_projected = from_projected.or_else(|| {
        seam_direction.map(|dir| {
            let (dx, dy) = direction_unit_vector(dir);
            (to_projected.0 - dx, to_projected.1 - dy)
        })
    })?;

    let t = progress.clamp(0.0, 1.0);
    Some((
        from_projected.0 + (to_projected.0 - from_projected.0) * t,
        from_projected.1 + (to_projected.1 - from_projected.1) * t,
    ))
}

/// Screen-space draw position for a ghost at projected tile `(gx, gy)`,
/// given the local player's tile and sub-tile camera offset.
pub fn screen_position(local_x: i32, local_y: i32, sub_x: i16, sub_y: i16, gx: f32, gy: f32) -> (f32, f32) {
    const ORIGIN_X: f32 = 112.0;
    const ORIGIN_Y: f32 = 72.0;
    const TILE: f32 = 16.0;
    (
        ORIGIN_X + (gx - local_x as f32) * TILE + sub_x as f32,
        ORIGIN_Y + (gy - local_y as f32) * TILE + sub_y as f32,
    )
}

/// Tracks, per `(map_group, map_id, map_rev)`, whether a sender's metadata
/// has been consistent enough to trust the fallback projection path.
///
/// Gate per §4.E: `meta_stable` must hold, the hash must not have
/// mismatched more than two consecutive times for the same `map_rev`, and
/// the `map_rev` must not already be flagged "ignored" by a prior run of
/// mismatches.
#[derive(Default)]
pub struct MetaTrustTracker {
    mismatches: HashMap<(u8, u8, u32), u8>,
    ignored: HashSet<(u8, u8, u32)>,
    expected_hash: HashMap<(u8, u8, u32), u32>,
}

impl MetaTrustTracker {
    pub fn new() -> Self {
        MetaTrustTracker::default()
    }

    /// Observes one packet's metadata and returns whether the fallback
    /// projection is currently trusted for this `(map, map_rev)`.
    pub fn observe(&mut self, map_group: u8, map_id: u8, map_rev: u32, meta_stable: bool, meta_hash: u32) -> bool {
        let key = (map_group, map_id, map_rev);
        if self.ignored.contains(&key) || !meta_stable {
            return false;
        }
        match self.expected_hash.get(&key) {
            Some(&expected) if expected != meta_hash => {
                let count = self.mismatches.entry(key).or_insert(0);
                *count += 1;
                if *count > 2 {
                    self.ignored.insert(key);
                }
                false
            }
            _ => {
                self.expected_hash.insert(key, meta_hash);
                self.mismatches.remove(&key);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_ctx() -> LocalContext {
        LocalContext {
            map_group: 1,
            map_id: 2,
            border_x: 20,
            border_y: 30,
            connections: vec![],
        }
    }

    #[test]
    fn same_map_projection_is_identity() {
        let local = local_ctx();
        let remote = RemotePoint {
            map_group: 1,
            map_id: 2,
            x: 12.0,
            y: 10.0,
            border_x: 20,
            border_y: 30,
            connections: vec![],
        };
        assert_eq!(project(&local, &remote, false), Some((12.0, 10.0)));
    }

    #[test]
    fn north_connection_formula() {
        let mut local = local_ctx();
        local.connections.push(MapConnection {
            direction: Direction::N,
            offset: 5,
            map_group: 1,
            map_id: 3,
        });
        let remote = RemotePoint {
            map_group: 1,
            map_id: 3,
            x: 10.0,
            y: 0.0,
            border_x: 20,
            border_y: 20,
            connections: vec![],
        };
        // x' = remote_x + offset, y' = remote_y + local_border_y
        assert_eq!(project(&local, &remote, false), Some((15.0, 30.0)));
    }

    #[test]
    fn south_connection_formula() {
        let mut local = local_ctx();
        local.connections.push(MapConnection {
            direction: Direction::S,
            offset: 0,
            map_group: 1,
            map_id: 4,
        });
        let remote = RemotePoint {
            map_group: 1,
            map_id: 4,
            x: 5.0,
            y: 12.0,
            border_x: 20,
            border_y: 20,
            connections: vec![],
        };
        // x' = remote_x + offset, y' = remote_y - remote_border_y
        assert_eq!(project(&local, &remote, false), Some((5.0, -8.0)));
    }

    #[test]
    fn west_connection_formula() {
        let mut local = local_ctx();
        local.connections.push(MapConnection {
            direction: Direction::W,
            offset: 3,
            map_group: 1,
            map_id: 5,
        });
        let remote = RemotePoint {
            map_group: 1,
            map_id: 5,
            x: 2.0,
            y: 8.0,
            border_x: 10,
            border_y: 10,
            connections: vec![],
        };
        // x' = remote_x - remote_border_x, y' = remote_y + offset
        assert_eq!(project(&local, &remote, false), Some((-8.0, 11.0)));
    }

    #[test]
    fn east_connection_formula() {
        let mut local = local_ctx();
        local.connections.push(MapConnection {
            direction: Direction::E,
            offset: 2,
            map_group: 1,
            map_id: 6,
        });
        let remote = RemotePoint {
            map_group: 1,
            map_id: 6,
            x: 0.0,
            y: 4.0,
            border_x: 20,
            border_y: 20,
            connections: vec![],
        };
        // x' = remote_x + local_border_x, y' = remote_y + offset
        assert_eq!(project(&local, &remote, false), Some((20.0, 6.0)));
    }

    #[test]
    fn unconnected_map_without_fallback_is_none() {
        let local = local_ctx();
        let remote = RemotePoint {
            map_group: 9,
            map_id: 9,
            x: 0.0,
            y: 0.0,
            border_x: 10,
            border_y: 10,
            connections: vec![],
        };
        assert_eq!(project(&local, &remote, false), None);
        assert_eq!(project(&local, &remote, true), None);
    }

    #[test]
    fn fallback_uses_remote_connection_pointing_back_when_trusted() {
        let local = local_ctx();
        let remote = RemotePoint {
            map_group: 7,
            map_id: 7,
            x: 10.0,
            y: 10.0,
            border_x: 20,
            border_y: 20,
            connections: vec![MapConnection {
                direction: Direction::S, // remote's own south connects back to local
                offset: 0,
                map_group: local.map_group,
                map_id: local.map_id,
            }],
        };
        assert!(project(&local, &remote, false).is_none());
        assert!(project(&local, &remote, true).is_some());
    }

    #[test]
    fn screen_position_places_local_tile_at_origin() {
        let (sx, sy) = screen_position(10, 10, 0, 0, 10.0, 10.0);
        assert_eq!((sx, sy), (112.0, 72.0));
    }

    #[test]
    fn meta_trust_tracker_ignores_after_three_consecutive_mismatches() {
        let mut tracker = MetaTrustTracker::new();
        assert!(tracker.observe(1, 2, 7, true, 0xAAAA));
        assert!(!tracker.observe(1, 2, 7, true, 0xBBBB));
        assert!(!tracker.observe(1, 2, 7, true, 0xBBBB));
        assert!(!tracker.observe(1, 2, 7, true, 0xBBBB));
        // Now flagged ignored even if a later packet matches the last hash.
        assert!(!tracker.observe(1, 2, 7, true, 0xBBBB));
    }

    #[test]
    fn meta_trust_tracker_requires_meta_stable() {
        let mut tracker = MetaTrustTracker::new();
        assert!(!tracker.observe(1, 2, 7, false, 0xAAAA));
    }
}
