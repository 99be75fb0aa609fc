//! Per-frame sub-tile camera phase (component C).
//!
//! The local player's position is only known at tile granularity; the
//! camera hardware registers carry the sub-pixel scroll that interpolates
//! the sprite between tiles. This module turns the two into a signed
//! sub-tile offset the ghost renderer and the local-player draw code both
//! need, with a short warm-up after every map change so the first couple
//! of frames (during which the camera bytes are still settling from the
//! previous map) don't publish a visible snap.

/// Half the width of a tile in pixels; the published offset always lies in
/// `[-TILE, TILE]`.
pub const TILE: i16 = 16;

/// Frames to suppress output for after a map change, while the camera
/// registers settle.
pub const CAMERA_WARMUP_FRAMES: u8 = 2;

/// `(256 - (cam mod 256)) mod 16`, the sub-tile phase implied by a raw
/// camera register value.
fn phase_for(cam: i16) -> i16 {
    let modulo_256 = (cam as i32).rem_euclid(256);
    ((256 - modulo_256).rem_euclid(16)) as i16
}

#[derive(Clone, Copy, Debug, Default)]
struct AxisTracker {
    prev_tile: Option<i32>,
    step_dir: i8,
}

impl AxisTracker {
    fn reset(&mut self) {
        self.prev_tile = None;
        self.step_dir = 0;
    }

    /// Advances the axis one frame and returns its published sub-tile
    /// offset. `tile` is the player's current whole-tile coordinate on
    /// this axis; `cam` is the raw signed camera register value.
    fn update(&mut self, tile: i32, cam: i16) -> i16 {
        let phase = phase_for(cam);
        let delta = match self.prev_tile {
            Some(prev) => tile - prev,
            None => 0,
        };
        self.prev_tile = Some(tile);

        if delta.abs() > 2 {
            // Teleport: the tile jumped more than a single step could
            // account for. Drop any in-flight direction and publish zero
            // rather than guessing which way the camera is about to pan.
            self.step_dir = 0;
            return 0;
        }

        if delta != 0 {
            self.step_dir = if delta > 0 { 1 } else { -1 };
        }

        let sub = match self.step_dir.cmp(&0) {
            std::cmp::Ordering::Greater => (TILE - phase) % TILE,
            std::cmp::Ordering::Less => phase,
            std::cmp::Ordering::Equal => 0,
        };

        if delta == 0 && phase == 0 {
            self.step_dir = 0;
        }

        sub
    }
}

/// Tracks per-axis camera phase across frames and map changes.
#[derive(Default)]
pub struct CameraTracker {
    x: AxisTracker,
    y: AxisTracker,
    prev_map: Option<(u8, u8)>,
    warmup_remaining: u8,
}

impl CameraTracker {
    pub fn new() -> Self {
        CameraTracker::default()
    }

    fn reset_offsets(&mut self) {
        self.x.reset();
        self.y.reset();
    }

    /// Runs one frame of the tracker. `camera` is `None` when the camera
    /// registers couldn't be read this frame (memory gateway failure);
    /// in that case the tracker resets and publishes zero, per §4.C step 1.
    pub fn update(
        &mut self,
        player_x: i32,
        player_y: i32,
        map_group: u8,
        map_id: u8,
        camera: Option<(i16, i16)>,
    ) -> (i16, i16) {
        let Some((cam_x, cam_y)) = camera else {
            self.reset_offsets();
            return (0, 0);
        };

        let entering_new_map = self.prev_map != Some((map_group, map_id));
        if entering_new_map {
            self.prev_map = Some((map_group, map_id));
            self.warmup_remaining = CAMERA_WARMUP_FRAMES;
            self.reset_offsets();
            self.x.prev_tile = Some(player_x);
            self.y.prev_tile = Some(player_y);
            return (0, 0);
        }

        if self.warmup_remaining > 0 {
            self.warmup_remaining -= 1;
            self.x.prev_tile = Some(player_x);
            self.y.prev_tile = Some(player_y);
            return (0, 0);
        }

        let sub_x = self.x.update(player_x, cam_x);
        let sub_y = self.y.update(player_y, cam_y);
        (sub_x, sub_y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_camera_resets_and_publishes_zero() {
        let mut tracker = CameraTracker::new();
        tracker.update(10, 10, 1, 2, Some((0, 0)));
        let out = tracker.update(10, 10, 1, 2, None);
        assert_eq!(out, (0, 0));
    }

    #[test]
    fn entering_new_map_arms_warmup() {
        let mut tracker = CameraTracker::new();
        // First call always counts as "entering a new map" (no prior map).
        let out0 = tracker.update(10, 10, 1, 2, Some((8, 8)));
        assert_eq!(out0, (0, 0));
        // Still inside the two-frame warm-up window.
        let out1 = tracker.update(10, 10, 1, 2, Some((8, 8)));
        assert_eq!(out1, (0, 0));
        let out2 = tracker.update(10, 10, 1, 2, Some((8, 8)));
        assert_eq!(out2, (0, 0));
        // Warm-up has elapsed; normal phase computation resumes.
        let out3 = tracker.update(10, 10, 1, 2, Some((8, 8)));
        assert_eq!(out3.0, 0); // step_dir is still 0: delta==0, phase==0
    }

    #[test]
    fn phase_zero_with_positive_step_dir_yields_zero_not_tile() {
        // Boundary behavior called out explicitly by §8.
        let mut tracker = CameraTracker::new();
        tracker.update(10, 10, 1, 2, Some((0, 0))); // new map, warm-up frame 1
        tracker.update(10, 10, 1, 2, Some((0, 0))); // warm-up frame 2
        // Move one tile right; cam_x stays at a multiple of 256 so phase==0.
        let out = tracker.update(11, 10, 1, 2, Some((0, 0)));
        assert_eq!(out.0, 0);
    }

    #[test]
    fn teleport_resets_step_direction() {
        let mut tracker = CameraTracker::new();
        tracker.update(10, 10, 1, 2, Some((0, 0)));
        tracker.update(10, 10, 1, 2, Some((0, 0)));
        tracker.update(10, 10, 1, 2, Some((4, 0))); // establish step_dir = +1
        let out = tracker.update(30, 10, 1, 2, Some((4, 0))); // |Δ| = 20 > 2
        assert_eq!(out.0, 0);
    }

    #[test]
    fn map_change_mid_stream_rearms_warmup() {
        let mut tracker = CameraTracker::new();
        tracker.update(10, 10, 1, 2, Some((0, 0)));
        tracker.update(10, 10, 1, 2, Some((0, 0)));
        tracker.update(10, 10, 1, 2, Some((0, 0)));
        let out = tracker.update(0, 0, 1, 3, Some((0, 0)));
        assert_eq!(out, (0, 0));
    }
}
