//! Telemetry frames as emitted by the producer.
//!
//! Field names on the wire are the producer's `m_`-prefixed names; the
//! unprefixed names are accepted as aliases. Unknown fields are ignored and
//! missing optional fields fall back to their defaults.

use crate::error::ProtocolError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;

/// Map name meaning "no active map"
pub const NO_MAP: &str = "invalid";

pub type PlayerId = i64;

/// One complete snapshot of every tracked entity. Replaces the previous
/// frame wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryFrame {
    #[serde(rename = "m_players", alias = "players", default)]
    pub players: Vec<PlayerState>,

    #[serde(
        rename = "m_local_team",
        alias = "local_team",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub local_team: Option<Team>,

    #[serde(
        rename = "m_bomb",
        alias = "bomb",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub bomb: Option<BombState>,

    #[serde(rename = "m_map", alias = "map", default = "default_map")]
    pub map: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    #[serde(rename = "m_idx", alias = "idx", alias = "id")]
    pub id: PlayerId,

    #[serde(rename = "m_name", alias = "name", default)]
    pub name: String,

    #[serde(rename = "m_team", alias = "team", default)]
    pub team: Team,

    #[serde(rename = "m_color", alias = "color", alias = "color_index", default)]
    pub color_index: i64,

    #[serde(rename = "m_health", alias = "health", default)]
    pub health: i64,

    #[serde(rename = "m_armor", alias = "armor", default)]
    pub armor: i64,

    #[serde(rename = "m_position", alias = "position", default)]
    pub position: Position,

    #[serde(rename = "m_eye_angle", alias = "eye_angle", default)]
    pub eye_angle: f64,

    #[serde(rename = "m_is_dead", alias = "is_dead", default)]
    pub is_dead: bool,

    #[serde(rename = "m_last_place", alias = "last_place", default)]
    pub last_place: String,
}

/// World-space position in game units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BombState {
    /// Seconds until detonation, 0 when not planted
    #[serde(rename = "m_blow_time", alias = "blow_time", default)]
    pub blow_time: f64,

    #[serde(rename = "m_defuse_time", alias = "defuse_time", default)]
    pub defuse_time: f64,

    #[serde(rename = "m_is_defusing", alias = "is_defusing", default)]
    pub is_defusing: bool,

    #[serde(rename = "m_is_defused", alias = "is_defused", default)]
    pub is_defused: bool,

    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

/// Whether an in-progress defuse beats the detonation timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DefuseOutcome {
    /// Defusing and the kit finishes before detonation
    Defusable,
    /// Detonation comes before the defuse would finish
    TooLate,
    /// Nobody is defusing
    Ticking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BombUrgency {
    Normal,
    Warning,
    Critical,
}

impl BombState {
    pub fn position(&self) -> Position {
        Position::new(self.x, self.y, self.z)
    }

    pub fn is_planted(&self) -> bool {
        self.blow_time > 0.0 && !self.is_defused
    }

    pub fn defuse_outcome(&self) -> DefuseOutcome {
        let margin = self.blow_time - self.defuse_time;
        if self.is_defusing && margin > 0.0 {
            DefuseOutcome::Defusable
        } else if margin < 0.0 {
            DefuseOutcome::TooLate
        } else {
            DefuseOutcome::Ticking
        }
    }

    /// Only a planted bomb is ever urgent.
    pub fn urgency(&self) -> BombUrgency {
        if !self.is_planted() {
            BombUrgency::Normal
        } else if self.blow_time <= 5.0 {
            BombUrgency::Critical
        } else if self.blow_time <= 10.0 {
            BombUrgency::Warning
        } else {
            BombUrgency::Normal
        }
    }
}

/// Team affiliation, encoded on the wire as the game's team number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Team {
    #[default]
    Unassigned,
    Spectator,
    Terrorist,
    CounterTerrorist,
}

impl Team {
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => Team::Spectator,
            2 => Team::Terrorist,
            3 => Team::CounterTerrorist,
            _ => Team::Unassigned,
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            Team::Unassigned => 0,
            Team::Spectator => 1,
            Team::Terrorist => 2,
            Team::CounterTerrorist => 3,
        }
    }
}

impl Serialize for Team {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.code())
    }
}

impl<'de> Deserialize<'de> for Team {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Team::from_code(i64::deserialize(deserializer)?))
    }
}

fn default_map() -> String {
    NO_MAP.to_string()
}

impl Default for TelemetryFrame {
    fn default() -> Self {
        Self {
            players: Vec::new(),
            local_team: None,
            bomb: None,
            map: default_map(),
        }
    }
}

impl TelemetryFrame {
    /// Decode one inbound message. Player ids must be unique within the frame.
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let frame: TelemetryFrame = serde_json::from_slice(payload)?;

        let mut seen = HashSet::with_capacity(frame.players.len());
        for player in &frame.players {
            if !seen.insert(player.id) {
                return Err(ProtocolError::DuplicatePlayerId { id: player.id });
            }
        }

        Ok(frame)
    }

    pub fn has_active_map(&self) -> bool {
        !self.map.is_empty() && self.map != NO_MAP
    }

    pub fn player(&self, id: PlayerId) -> Option<&PlayerState> {
        self.players.iter().find(|player| player.id == id)
    }
}
