//! OAM/VRAM/palette injection for ghost sprites (component E, render half).
//!
//! This module owns the only emulator memory the ghost pipeline ever
//! touches: reserved OAM slots, a reserved VRAM tile range, and the
//! reserved palette banks `{13,14,15}` (per §3's ownership rule, E never
//! writes outside this region).

use crate::memory::{Domain, MemoryBus, MemoryBusExt};
use std::collections::HashMap;

/// How often VRAM tile data is rewritten even when the sprite hash hasn't
/// changed, as insurance against a host that might have overwritten the
/// tile range for some other purpose.
pub const VRAM_REFRESH_INTERVAL_FRAMES: u32 = 8;

/// Frames a slot is kept visible after it last received a write, so a
/// single dropped frame doesn't flicker the sprite out of existence.
const WRITE_GRACE_FRAMES: u8 = 10;

/// Consecutive "desired front" frames required before actually raising a
/// ghost's OAM priority, and the number of frames the raised priority is
/// held after the desire ends — both per §4.E's occlusion hysteresis.
const FORCE_FRONT_ON_STREAK: u8 = 2;
const FORCE_FRONT_HOLD_FRAMES: u8 = 6;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OamPriority {
    Front = 1,
    Back = 2,
}

/// Transient, per-frame description of one visible ghost, built by the
/// scheduler from the interpolator's pose and the projector's screen
/// coordinates.
#[derive(Clone, Debug)]
pub struct GhostRenderRecord {
    pub player_id: String,
    pub vram_slot: usize,
    pub palette_slot: Option<u8>,
    pub native_pal_bank: Option<u8>,
    pub sprite_hash: u32,
    pub oam_priority: OamPriority,
    pub screen_x: i32,
    pub screen_y: i32,
    pub width: u32,
    pub height: u32,
    pub hflip: bool,
    pub vflip: bool,
    pub force_overlay_front: bool,
}

/// Maps a sprite's `(width, height)` in pixels to the GBA OAM
/// `(shape, size)` field pair. Returns `None` for a dimension pair the
/// hardware has no shape for.
pub fn shape_size(width: u32, height: u32) -> Option<(u8, u8)> {
    match (width, height) {
        (8, 8) => Some((0, 0)),
        (16, 16) => Some((0, 1)),
        (32, 32) => Some((0, 2)),
        (64, 64) => Some((0, 3)),
        (16, 8) => Some((1, 0)),
        (32, 8) => Some((1, 1)),
        (32, 16) => Some((1, 2)),
        (64, 32) => Some((1, 3)),
        (8, 16) => Some((2, 0)),
        (8, 32) => Some((2, 1)),
        (16, 32) => Some((2, 2)),
        (32, 64) => Some((2, 3)),
        _ => None,
    }
}

fn wrap_y(y: i32) -> u16 {
    y.rem_euclid(256) as u16
}

fn wrap_x(x: i32) -> u16 {
    x.rem_euclid(512) as u16
}

pub fn pack_attr0(y: i32, shape: u8) -> u16 {
    (wrap_y(y) & 0xFF) | ((shape as u16) << 14)
}

pub fn pack_attr1(x: i32, hflip: bool, vflip: bool, size: u8) -> u16 {
    (wrap_x(x) & 0x1FF)
        | ((hflip as u16) << 12)
        | ((vflip as u16) << 13)
        | ((size as u16) << 14)
}

pub fn pack_attr2(tile_index: u16, priority: OamPriority, palbank: u8) -> u16 {
    (tile_index & 0x3FF) | ((priority as u16) << 10) | ((palbank as u16) << 12)
}

/// Fixed-size free-list allocator handing out OAM/VRAM slot indices to
/// remote players by id, released on disconnect.
pub struct SlotAllocator {
    capacity: usize,
    assigned: HashMap<String, usize>,
    free: Vec<usize>,
}

impl SlotAllocator {
    pub fn new(capacity: usize) -> Self {
        SlotAllocator {
            capacity,
            assigned: HashMap::new(),
            free: (0..capacity).rev().collect(),
        }
    }

    pub fn slot_for(&mut self, player_id: &str) -> Option<usize> {
        if let Some(&slot) = self.assigned.get(player_id) {
            return Some(slot);
        }
        let slot = self.free.pop()?;
        self.assigned.insert(player_id.to_string(), slot);
        Some(slot)
    }

    pub fn release(&mut self, player_id: &str) {
        if let Some(slot) = self.assigned.remove(player_id) {
            self.free.push(slot);
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Chooses a palette bank for a ghost: the sprite's native bank when
/// known, otherwise a rotation over the three reserved banks.
pub struct PaletteAllocator {
    reserved_banks: [u8; 3],
    assigned: HashMap<String, u8>,
    next: usize,
}

impl Default for PaletteAllocator {
    fn default() -> Self {
        PaletteAllocator {
            reserved_banks: [13, 14, 15],
            assigned: HashMap::new(),
            next: 0,
        }
    }
}

impl PaletteAllocator {
    pub fn bank_for(&mut self, player_id: &str, native_pal_bank: Option<u8>) -> u8 {
        if let Some(bank) = native_pal_bank {
            return bank;
        }
        if let Some(&bank) = self.assigned.get(player_id) {
            return bank;
        }
        let bank = self.reserved_banks[self.next % self.reserved_banks.len()];
        self.next += 1;
        self.assigned.insert(player_id.to_string(), bank);
        bank
    }

    pub fn release(&mut self, player_id: &str) {
        self.assigned.remove(player_id);
    }
}

#[derive(Default, Clone, Copy)]
struct ForceFrontState {
    desire_streak: u8,
    active: bool,
    hold_remaining: u8,
}

impl ForceFrontState {
    fn update(&mut self, desired: bool) -> bool {
        if desired {
            self.desire_streak = self.desire_streak.saturating_add(1);
            if self.desire_streak >= FORCE_FRONT_ON_STREAK {
                self.active = true;
                self.hold_remaining = FORCE_FRONT_HOLD_FRAMES;
            }
        } else {
            self.desire_streak = 0;
            if self.active {
                if self.hold_remaining > 0 {
                    self.hold_remaining -= 1;
                } else {
                    self.active = false;
                }
            }
        }
        self.active
    }
}

/// Tracks occlusion hysteresis and write-grace per ghost slot, and performs
/// the actual OAM/VRAM writes for the scheduler's per-frame render pass.
#[derive(Default)]
pub struct GhostRenderer {
    force_front: HashMap<String, ForceFrontState>,
    frames_since_write: HashMap<String, u8>,
    frames_since_vram_write: HashMap<String, (u32, u32)>, // (sprite_hash, frames)
}

impl GhostRenderer {
    pub fn new() -> Self {
        GhostRenderer::default()
    }

    /// Applies the occlusion hysteresis rule and returns the priority this
    /// ghost should actually be drawn with this frame.
    pub fn resolve_priority(&mut self, player_id: &str, desired_front: bool, base: OamPriority) -> OamPriority {
        let state = self.force_front.entry(player_id.to_string()).or_default();
        if state.update(desired_front) {
            OamPriority::Front
        } else {
            base
        }
    }

    /// Whether VRAM tile data needs rewriting this frame: the sprite
    /// changed, or the refresh interval elapsed since the last write.
    pub fn needs_vram_refresh(&mut self, player_id: &str, sprite_hash: u32) -> bool {
        let entry = self
            .frames_since_vram_write
            .entry(player_id.to_string())
            .or_insert((sprite_hash, VRAM_REFRESH_INTERVAL_FRAMES));
        let (last_hash, frames) = entry;
        let needs = *last_hash != sprite_hash || *frames >= VRAM_REFRESH_INTERVAL_FRAMES;
        if needs {
            *last_hash = sprite_hash;
            *frames = 0;
        } else {
            *frames += 1;
        }
        needs
    }

    /// Whether a slot that wrote `wrote_this_frame` should remain visible,
    /// applying the 10-frame flicker grace.
    pub fn should_remain_visible(&mut self, player_id: &str, wrote_this_frame: bool) -> bool {
        let frames = self.frames_since_write.entry(player_id.to_string()).or_insert(0);
        if wrote_this_frame {
            *frames = 0;
        } else {
            *frames = frames.saturating_add(1);
        }
        *frames <= WRITE_GRACE_FRAMES
    }

    pub fn forget(&mut self, player_id: &str) {
        self.force_front.remove(player_id);
        self.frames_since_write.remove(player_id);
        self.frames_since_vram_write.remove(player_id);
    }

    /// Writes one ghost's VRAM tile data (when due) and its OAM entry.
    /// `oam_base` and `vram_tile_base`/`tile_stride` describe the
    /// reserved regions this renderer owns; `tile_pixels` is the
    /// already-decoded tile data (4bpp decoding is out of scope per §1).
    pub fn render(
        &mut self,
        bus: &mut dyn MemoryBus,
        oam_base: u32,
        vram_tile_base: u32,
        tile_stride: u32,
        record: &GhostRenderRecord,
        tile_pixels: Option<&[u8]>,
    ) {
        if self.needs_vram_refresh(&record.player_id, record.sprite_hash) {
            if let Some(pixels) = tile_pixels {
                let addr = vram_tile_base + record.vram_slot as u32 * tile_stride;
                bus.write_range_ignore(Domain::Vram, addr, pixels);
            }
        }

        let Some((shape, size)) = shape_size(record.width, record.height) else {
            log::warn!(
                "ghost renderer: unsupported sprite dimensions {}x{} for player {}",
                record.width,
                record.height,
                record.player_id
            );
            return;
        };

        let palbank = record.palette_slot.unwrap_or(0);
        let attr0 = pack_attr0(record.screen_y, shape);
        let attr1 = pack_attr1(record.screen_x, record.hflip, record.vflip, size);
        let attr2 = pack_attr2(record.vram_slot as u16, record.oam_priority, palbank);

        let entry_addr = oam_base + record.vram_slot as u32 * 8;
        bus.write_u16_ignore(Domain::Oam, entry_addr, attr0);
        bus.write_u16_ignore(Domain::Oam, entry_addr + 2, attr1);
        bus.write_u16_ignore(Domain::Oam, entry_addr + 4, attr2);
    }
}
