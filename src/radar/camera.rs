use super::transform::RadarPoint;
use crate::config::TeamPolicy;
use crate::settings::Settings;
use crate::telemetry::{PlayerId, PlayerState, TelemetryFrame};
use serde::Serialize;

/// Screen rotation for a facing angle, aligned with the radar image.
pub fn facing_rotation(eye_angle: f64) -> f64 {
    270.0 - eye_angle
}

/// Signed difference from `current` to `target` along the short way
/// round, in `[-180, 180)`.
pub fn shortest_delta(current: f64, target: f64) -> f64 {
    ((target - current).rem_euclid(360.0) + 540.0).rem_euclid(360.0) - 180.0
}

/// Unbounded rotation that follows a wrapping angle without ever stepping
/// more than 180 degrees.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RotationAccumulator {
    value: f64,
}

impl RotationAccumulator {
    pub fn advance(&mut self, target: f64) -> f64 {
        if target.is_finite() {
            self.value += shortest_delta(self.value, target);
        }
        self.value
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn reset(&mut self) {
        self.value = 0.0;
    }
}

/// Measured size of the rendered radar image in pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ViewportMetrics {
    pub width: f64,
    pub height: f64,
}

impl ViewportMetrics {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn is_measured(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }

    pub fn to_pixels(&self, point: RadarPoint) -> (f64, f64) {
        if !self.is_measured() {
            return (0.0, 0.0);
        }
        (point.x * self.width, point.y * self.height)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Translation {
    pub x: f64,
    pub y: f64,
}

/// Transform applied to the whole map view.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CameraTransform {
    /// Degrees, unbounded
    pub rotation: f64,
    pub translation: Translation,
    pub scale: f64,
}

impl CameraTransform {
    pub fn identity(scale: f64) -> Self {
        Self {
            rotation: 0.0,
            translation: Translation::default(),
            scale,
        }
    }
}

/// What the camera needs to know about the followed entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FollowTarget {
    pub id: PlayerId,
    pub eye_angle: f64,
    pub position: RadarPoint,
}

/// Look up the follow target in `frame`, applying the team constraint of
/// `policy`. `None` means follow is cleared.
pub fn resolve_follow_target<'a>(
    frame: &'a TelemetryFrame,
    settings: &Settings,
    policy: TeamPolicy,
) -> Option<&'a PlayerState> {
    let player = frame.player(settings.follow_player_id?)?;

    match (policy, settings.perspective_team(frame)) {
        (TeamPolicy::LocalTeam, Some(team)) if player.team != team => None,
        _ => Some(player),
    }
}

/// Camera that centres on, and optionally rotates with, a followed entity.
#[derive(Debug, Clone, Default)]
pub struct FollowCamera {
    rotation: RotationAccumulator,
    followed: Option<PlayerId>,
}

impl FollowCamera {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn followed(&self) -> Option<PlayerId> {
        self.followed
    }

    pub fn update(
        &mut self,
        target: Option<FollowTarget>,
        viewport: ViewportMetrics,
        settings: &Settings,
    ) -> CameraTransform {
        let scale = effective_zoom(settings.map_zoom);

        let Some(target) = target else {
            self.followed = None;
            self.rotation.reset();
            return CameraTransform::identity(scale);
        };
        self.followed = Some(target.id);

        let rotation = if settings.rotate_with_player {
            self.rotation.advance(facing_rotation(target.eye_angle))
        } else {
            self.rotation.reset();
            0.0
        };

        let translation = if viewport.is_measured() && target.position.is_valid() {
            Translation {
                x: viewport.width / 2.0 - target.position.x * viewport.width,
                y: viewport.height / 2.0 - target.position.y * viewport.height,
            }
        } else {
            Translation::default()
        };

        CameraTransform {
            rotation,
            translation,
            scale,
        }
    }
}

fn effective_zoom(zoom: f64) -> f64 {
    if zoom.is_finite() && zoom > 0.0 {
        zoom
    } else {
        1.0
    }
}
