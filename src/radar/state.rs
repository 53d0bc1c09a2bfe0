use super::camera::{
    facing_rotation, resolve_follow_target, CameraTransform, FollowCamera, FollowTarget,
    RotationAccumulator, ViewportMetrics,
};
use super::transform::{world_to_radar, DeathFreeze, RadarPoint};
use crate::config::TeamPolicy;
use crate::map::MapCalibration;
use crate::settings::Settings;
use crate::telemetry::{BombUrgency, DefuseOutcome, PlayerId, PlayerState, Team, TelemetryFrame};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::trace;

/// Dot colours for teammates, indexed by the producer's colour index
pub const TEAMMATE_COLORS: [&str; 5] = ["#40a0ff", "#00c850", "#ffe100", "#ff8000", "#c800ff"];
pub const ENEMY_COLOR: &str = "#ff1493";

/// Per-entity state carried between frames.
#[derive(Debug, Clone, Default)]
struct EntityState {
    freeze: DeathFreeze,
    rotation: RotationAccumulator,
    absent_frames: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedPlayer {
    pub id: PlayerId,
    pub name: String,
    pub position: RadarPoint,
    /// Position in viewport pixels
    pub pixel: (f64, f64),
    /// Degrees; already compensated for the camera when followed
    pub rotation: f64,
    pub visible: bool,
    pub dead: bool,
    pub followed: bool,
    pub enemy: bool,
    pub show_name: bool,
    pub show_health_circle: bool,
    pub show_view_cone: bool,
    pub health_fraction: f64,
    pub color: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedBomb {
    pub position: RadarPoint,
    pub pixel: (f64, f64),
    pub visible: bool,
    pub planted: bool,
    pub defuse_outcome: DefuseOutcome,
    pub urgency: BombUrgency,
    pub blow_time: f64,
}

/// Everything the rendering layer needs for one tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderSnapshot {
    /// False while the map calibration is unavailable; positions are withheld
    pub map_ready: bool,
    pub camera: CameraTransform,
    pub players: Vec<RenderedPlayer>,
    pub bomb: Option<RenderedBomb>,
}

/// Render-state layer: turns frames into screen-ready snapshots and owns
/// every piece of state that must survive between frames.
#[derive(Debug)]
pub struct RenderState {
    entities: HashMap<PlayerId, EntityState>,
    camera: FollowCamera,
    policy: TeamPolicy,
    eviction_after: u32,
}

impl RenderState {
    pub fn new(policy: TeamPolicy, eviction_after: u32) -> Self {
        Self {
            entities: HashMap::new(),
            camera: FollowCamera::new(),
            policy,
            eviction_after: eviction_after.max(1),
        }
    }

    pub fn policy(&self) -> TeamPolicy {
        self.policy
    }

    pub fn tracked_entities(&self) -> usize {
        self.entities.len()
    }

    /// Position currently frozen for a dead entity, if any.
    pub fn frozen_position(&self, id: PlayerId) -> Option<RadarPoint> {
        self.entities.get(&id).and_then(|e| e.freeze.frozen())
    }

    pub fn render(
        &mut self,
        frame: &TelemetryFrame,
        calibration: Option<&MapCalibration>,
        viewport: ViewportMetrics,
        settings: &Settings,
    ) -> RenderSnapshot {
        self.age_entities(frame);

        let Some(calibration) = calibration.filter(|_| frame.has_active_map()) else {
            return RenderSnapshot {
                map_ready: false,
                camera: self.camera.update(None, viewport, settings),
                players: Vec::new(),
                bomb: None,
            };
        };

        // Advance state for every entity, selected or not, so freezes and
        // rotations stay continuous when the selection changes.
        let mut resolved: HashMap<PlayerId, (RadarPoint, f64)> =
            HashMap::with_capacity(frame.players.len());
        for player in &frame.players {
            let entity = self.entities.entry(player.id).or_default();
            let live = world_to_radar(&player.position, calibration);
            let position = entity.freeze.resolve(live, player.is_dead);
            let rotation = entity.rotation.advance(facing_rotation(player.eye_angle));
            resolved.insert(player.id, (position, rotation));
        }

        let target = resolve_follow_target(frame, settings, self.policy).map(|player| {
            FollowTarget {
                id: player.id,
                eye_angle: player.eye_angle,
                position: resolved
                    .get(&player.id)
                    .map(|(position, _)| *position)
                    .unwrap_or(RadarPoint::ORIGIN),
            }
        });
        let camera = self.camera.update(target, viewport, settings);
        let followed = target.map(|t| t.id);

        let perspective = settings.perspective_team(frame);
        let players = frame
            .players
            .iter()
            .filter(|player| settings.is_selected(player.id))
            .map(|player| {
                let (position, rotation) = resolved[&player.id];
                self.render_player(
                    player,
                    position,
                    rotation,
                    followed == Some(player.id),
                    perspective,
                    &camera,
                    viewport,
                    settings,
                )
            })
            .collect();

        let bomb = frame.bomb.as_ref().map(|bomb| {
            let position = world_to_radar(&bomb.position(), calibration);
            RenderedBomb {
                position,
                pixel: viewport.to_pixels(position),
                visible: position.is_valid(),
                planted: bomb.is_planted(),
                defuse_outcome: bomb.defuse_outcome(),
                urgency: bomb.urgency(),
                blow_time: bomb.blow_time,
            }
        });

        RenderSnapshot {
            map_ready: true,
            camera,
            players,
            bomb,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn render_player(
        &self,
        player: &PlayerState,
        position: RadarPoint,
        base_rotation: f64,
        followed: bool,
        perspective: Option<Team>,
        camera: &CameraTransform,
        viewport: ViewportMetrics,
        settings: &Settings,
    ) -> RenderedPlayer {
        let enemy = match self.policy {
            TeamPolicy::Uniform => true,
            TeamPolicy::LocalTeam => perspective.map_or(true, |team| player.team != team),
        };

        let rotation = if player.is_dead {
            0.0
        } else if followed {
            base_rotation - camera.rotation
        } else {
            base_rotation
        };

        let color = if enemy {
            ENEMY_COLOR
        } else {
            TEAMMATE_COLORS[player.color_index.rem_euclid(TEAMMATE_COLORS.len() as i64) as usize]
        };

        RenderedPlayer {
            id: player.id,
            name: player.name.clone(),
            position,
            pixel: viewport.to_pixels(position),
            rotation,
            visible: position.is_valid(),
            dead: player.is_dead,
            followed,
            enemy,
            show_name: (settings.show_all_names && !enemy) || (settings.show_enemy_names && enemy),
            show_health_circle: settings.show_health_circles && enemy && !player.is_dead,
            show_view_cone: settings.show_view_cones && !player.is_dead,
            health_fraction: player.health.clamp(0, 100) as f64 / 100.0,
            color,
        }
    }

    /// Count frames each id has been missing and evict the stale ones.
    fn age_entities(&mut self, frame: &TelemetryFrame) {
        let present: HashSet<PlayerId> = frame.players.iter().map(|p| p.id).collect();
        let eviction_after = self.eviction_after;

        self.entities.retain(|id, entity| {
            if present.contains(id) {
                entity.absent_frames = 0;
                return true;
            }
            entity.absent_frames += 1;
            let keep = entity.absent_frames < eviction_after;
            if !keep {
                trace!("Evicting render state for entity {}", id);
            }
            keep
        });
    }
}
