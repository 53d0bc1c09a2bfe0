use crate::map::MapCalibration;
use crate::telemetry::Position;
use serde::Serialize;

/// Position on the radar image as a fraction of its width and height.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct RadarPoint {
    pub x: f64,
    pub y: f64,
}

impl RadarPoint {
    /// Off-map sentinel
    pub const ORIGIN: RadarPoint = RadarPoint { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Inside the image and not the at-or-below-zero sentinel.
    pub fn is_valid(&self) -> bool {
        self.x.is_finite()
            && self.y.is_finite()
            && (0.0..=1.0).contains(&self.x)
            && (0.0..=1.0).contains(&self.y)
            && !(self.x <= 0.0 && self.y <= 0.0)
    }
}

/// Map a world position onto the radar image.
///
/// World Y grows upwards while image Y grows downwards, hence the inverted
/// vertical term.
pub fn world_to_radar(position: &Position, calibration: &MapCalibration) -> RadarPoint {
    let pixel_x = (position.x - calibration.origin_x) / calibration.scale;
    let pixel_y = (calibration.origin_y - position.y) / calibration.scale;

    RadarPoint::new(
        pixel_x / calibration.image_width,
        pixel_y / calibration.image_height,
    )
}

/// Holds an entity's position still while it is dead.
///
/// While alive, every valid position is remembered. On death the last valid
/// one is frozen and returned for every frame until the entity is alive
/// again, at which point the freeze is dropped.
#[derive(Debug, Clone, Default)]
pub struct DeathFreeze {
    last_valid: Option<RadarPoint>,
    frozen: Option<RadarPoint>,
    dead: bool,
}

impl DeathFreeze {
    pub fn resolve(&mut self, live: RadarPoint, is_dead: bool) -> RadarPoint {
        if is_dead {
            if !self.dead {
                self.dead = true;
                self.frozen = self
                    .last_valid
                    .or_else(|| live.is_valid().then_some(live));
            } else if self.frozen.is_none() && live.is_valid() {
                self.frozen = Some(live);
            }
            return self.frozen.unwrap_or(RadarPoint::ORIGIN);
        }

        if self.dead {
            self.dead = false;
            self.frozen = None;
            self.last_valid = None;
        }
        if live.is_valid() {
            self.last_valid = Some(live);
        }
        live
    }

    pub fn frozen(&self) -> Option<RadarPoint> {
        self.frozen
    }
}
