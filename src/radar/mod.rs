//! Coordinate transforms, follow camera, and the render-state layer.
//!
//! Everything here is a pure function of frame, calibration, viewport and
//! settings (plus the state `RenderState` carries between frames), so it
//! runs without any display.

mod camera;
mod state;
mod transform;

pub use camera::{
    facing_rotation, resolve_follow_target, shortest_delta, CameraTransform, FollowCamera,
    FollowTarget, RotationAccumulator, Translation, ViewportMetrics,
};
pub use state::{RenderSnapshot, RenderState, RenderedBomb, RenderedPlayer, ENEMY_COLOR, TEAMMATE_COLORS};
pub use transform::{world_to_radar, DeathFreeze, RadarPoint};
