//! Ghost Projector & Renderer (component E): projects remote players into
//! the local camera's tile space and injects their sprites into OAM/VRAM.

pub mod projector;
pub mod renderer;

use crate::interpolator::InterpolatedPose;
use projector::{project, project_seam_blend, screen_position, LocalContext, RemotePoint};

pub use projector::MetaTrustTracker;

/// Depth-sorts a batch of projected ghost positions by ascending `y`, the
/// stable ordering §4.E specifies for overlapping sprites.
pub fn depth_sort<T>(ghosts: &mut [T], y_of: impl Fn(&T) -> f32) {
    ghosts.sort_by(|a, b| y_of(a).partial_cmp(&y_of(b)).unwrap_or(std::cmp::Ordering::Equal));
}

/// Ties the pure projector math to one remote player's interpolated pose,
/// returning the tile-space position the renderer should draw at (and
/// `None` when the pose can't currently be projected into local space at
/// all — an unconnected map with no trusted fallback). `meta_trust` gates
/// the remote-connection fallback path; the caller derives it from a
/// [`MetaTrustTracker`] fed by the raw position packets (which carry the
/// `map_rev` this module's pose type doesn't retain).
pub fn project_pose(local: &LocalContext, pose: &InterpolatedPose, meta_trust: bool) -> Option<(f32, f32)> {
    let remote = RemotePoint {
        map_group: pose.map_group,
        map_id: pose.map_id,
        x: pose.x,
        y: pose.y,
        border_x: pose.border_x,
        border_y: pose.border_y,
        connections: pose.connections.clone(),
    };

    if pose.cross_map_seam {
        if let Some(progress) = pose.transition_progress {
            return project_seam_blend(local, &remote, pose.transition_from.as_ref(), None, progress, meta_trust);
        }
    }

    project(local, &remote, meta_trust)
}

/// Full screen-space draw position for a ghost, combining projection with
/// the local player's tile and camera sub-offset.
pub fn draw_position(
    local: &LocalContext,
    local_tile: (i32, i32),
    sub_pixel: (i16, i16),
    pose: &InterpolatedPose,
    meta_trust: bool,
) -> Option<(f32, f32)> {
    let (gx, gy) = project_pose(local, pose, meta_trust)?;
    Some(screen_position(local_tile.0, local_tile.1, sub_pixel.0, sub_pixel.1, gx, gy))
}
