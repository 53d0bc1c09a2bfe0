//! Viewer preferences persisted as an opaque JSON blob.
//!
//! Loading shallow-merges the stored object over the defaults, so blobs
//! written before a key existed still load. Keys this build does not know
//! about are carried through and written back untouched.

use crate::config::TeamPolicy;
use crate::error::SettingsError;
use crate::radar::resolve_follow_target;
use crate::telemetry::{PlayerId, Team, TelemetryFrame};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub dot_size: f64,
    pub bomb_size: f64,
    pub show_all_names: bool,
    pub show_enemy_names: bool,
    pub show_view_cones: bool,
    pub show_health_circles: bool,
    pub map_zoom: f64,
    pub follow_player_id: Option<PlayerId>,
    pub rotate_with_player: bool,
    /// Team rendered as friendly, overriding the frame's local team
    pub draw_team: Option<Team>,
    /// When non-empty, only these ids are rendered
    #[serde(alias = "selectedEnemyIds")]
    pub selected_ids: Vec<PlayerId>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            dot_size: 1.0,
            bomb_size: 0.5,
            show_all_names: false,
            show_enemy_names: true,
            show_view_cones: false,
            show_health_circles: true,
            map_zoom: 1.0,
            follow_player_id: None,
            rotate_with_player: true,
            draw_team: None,
            selected_ids: Vec::new(),
            extra: Map::new(),
        }
    }
}

/// Older blobs stored the selection under `selectedEnemyIds`.
const LEGACY_KEYS: &[(&str, &str)] = &[("selectedEnemyIds", "selectedIds")];

fn canonical_key(key: String) -> String {
    LEGACY_KEYS
        .iter()
        .find(|(legacy, _)| *legacy == key)
        .map(|(_, current)| current.to_string())
        .unwrap_or(key)
}

impl Settings {
    /// Shallow-merge a stored blob over the defaults.
    ///
    /// A stored key whose value does not fit its field keeps the default
    /// instead of failing the whole load.
    pub fn merge_over_defaults(stored: Value) -> Self {
        let defaults = Self::default();
        let mut merged = match serde_json::to_value(&defaults) {
            Ok(Value::Object(map)) => map,
            _ => return defaults,
        };

        let Value::Object(stored) = stored else {
            warn!("Stored settings are not an object, using defaults");
            return defaults;
        };

        for (key, value) in stored {
            let key = canonical_key(key);
            let previous = merged.insert(key.clone(), value);
            if serde_json::from_value::<Settings>(Value::Object(merged.clone())).is_err() {
                warn!("Ignoring stored setting '{}' with an unusable value", key);
                match previous {
                    Some(previous) => merged.insert(key, previous),
                    None => merged.remove(&key),
                };
            }
        }

        serde_json::from_value(Value::Object(merged)).unwrap_or(defaults)
    }

    /// Team treated as friendly: the explicit `drawTeam` if set, otherwise
    /// the frame's local team.
    pub fn perspective_team(&self, frame: &TelemetryFrame) -> Option<Team> {
        self.draw_team.or(frame.local_team)
    }

    /// Clear a follow target that no longer resolves in `frame`. Returns
    /// `true` when the setting changed and should be persisted.
    pub fn reconcile_follow(&mut self, frame: &TelemetryFrame, policy: TeamPolicy) -> bool {
        if self.follow_player_id.is_none() {
            return false;
        }
        if resolve_follow_target(frame, self, policy).is_some() {
            return false;
        }

        debug!(
            "Follow target {:?} left the frame, clearing",
            self.follow_player_id
        );
        self.follow_player_id = None;
        true
    }

    pub fn is_selected(&self, id: PlayerId) -> bool {
        self.selected_ids.is_empty() || self.selected_ids.contains(&id)
    }
}

/// File-backed settings persistence.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load settings; a missing or unreadable blob yields the defaults.
    pub async fn load(&self) -> Settings {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No stored settings at {}, using defaults", self.path.display());
                return Settings::default();
            }
            Err(e) => {
                warn!("Failed to read settings from {}: {}", self.path.display(), e);
                return Settings::default();
            }
        };

        match serde_json::from_slice::<Value>(&raw) {
            Ok(stored) => Settings::merge_over_defaults(stored),
            Err(e) => {
                warn!("Stored settings at {} are corrupt ({}), using defaults", self.path.display(), e);
                Settings::default()
            }
        }
    }

    /// Write settings through a temp file and rename over the blob.
    pub async fn save(&self, settings: &Settings) -> Result<(), SettingsError> {
        let encoded = serde_json::to_vec_pretty(settings)?;
        let tmp = self.path.with_extension("json.tmp");

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| SettingsError::Write {
                    path: self.path.clone(),
                    source,
                })?;
        }

        tokio::fs::write(&tmp, &encoded)
            .await
            .map_err(|source| SettingsError::Write {
                path: tmp.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|source| SettingsError::Write {
                path: self.path.clone(),
                source,
            })?;

        debug!("Settings saved to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{PlayerState, Position};
    use serde_json::json;

    fn player(id: PlayerId, team: Team) -> PlayerState {
        PlayerState {
            id,
            name: format!("p{}", id),
            team,
            color_index: 0,
            health: 100,
            armor: 0,
            position: Position::default(),
            eye_angle: 0.0,
            is_dead: false,
            last_place: String::new(),
        }
    }

    #[test]
    fn test_merge_fills_missing_keys_with_defaults() {
        // A blob written before rotateWithPlayer and selectedIds existed.
        let stored = json!({
            "dotSize": 2.5,
            "bombSize": 0.5,
            "showAllNames": true,
            "showEnemyNames": false,
            "showViewCones": true,
            "showHealthCircles": false,
            "mapZoom": 1.75,
            "followPlayerId": 4
        });

        let settings = Settings::merge_over_defaults(stored);
        assert_eq!(settings.dot_size, 2.5);
        assert!(settings.show_all_names);
        assert!(!settings.show_enemy_names);
        assert!(settings.show_view_cones);
        assert!(!settings.show_health_circles);
        assert_eq!(settings.map_zoom, 1.75);
        assert_eq!(settings.follow_player_id, Some(4));
        assert!(settings.rotate_with_player);
        assert!(settings.selected_ids.is_empty());
        assert!(settings.extra.is_empty());
    }

    #[test]
    fn test_merge_keeps_unknown_keys_and_skips_bad_values() {
        let stored = json!({
            "dotSize": "huge",
            "mapName": "de_dust2",
            "drawTeam": 3,
            "selectedIds": [1, 5]
        });

        let settings = Settings::merge_over_defaults(stored);
        assert_eq!(settings.dot_size, 1.0);
        assert_eq!(settings.draw_team, Some(Team::CounterTerrorist));
        assert_eq!(settings.selected_ids, vec![1, 5]);
        assert_eq!(settings.extra.get("mapName"), Some(&json!("de_dust2")));

        let written = serde_json::to_value(&settings).unwrap();
        assert_eq!(written["mapName"], json!("de_dust2"));
        assert_eq!(written["selectedIds"], json!([1, 5]));
    }

    #[test]
    fn test_merge_reads_legacy_selection_key() {
        let stored = json!({ "selectedEnemyIds": [2], "mapZoom": 2.0 });

        let settings = Settings::merge_over_defaults(stored);
        assert_eq!(settings.selected_ids, vec![2]);
        assert_eq!(settings.map_zoom, 2.0);
        assert!(settings.is_selected(2));
        assert!(!settings.is_selected(3));
        assert!(settings.extra.is_empty());

        let written = serde_json::to_value(&settings).unwrap();
        assert_eq!(written["selectedIds"], json!([2]));
        assert!(written.get("selectedEnemyIds").is_none());
    }

    #[test]
    fn test_merge_non_object_yields_defaults() {
        assert_eq!(Settings::merge_over_defaults(json!([1, 2])), Settings::default());
    }

    #[tokio::test]
    async fn test_store_round_trip_and_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("nested").join("radar_settings.json"));

        assert_eq!(store.load().await, Settings::default());

        let mut settings = Settings::default();
        settings.map_zoom = 2.0;
        settings.follow_player_id = Some(7);
        store.save(&settings).await.unwrap();
        assert_eq!(store.load().await, settings);

        std::fs::write(store.path(), b"{not json").unwrap();
        assert_eq!(store.load().await, Settings::default());
    }

    #[test]
    fn test_reconcile_follow_clears_missing_target() {
        let frame = TelemetryFrame {
            players: vec![player(1, Team::Terrorist), player(2, Team::CounterTerrorist)],
            local_team: Some(Team::Terrorist),
            ..Default::default()
        };

        let mut settings = Settings {
            follow_player_id: Some(1),
            ..Default::default()
        };
        assert!(!settings.reconcile_follow(&frame, TeamPolicy::LocalTeam));
        assert_eq!(settings.follow_player_id, Some(1));

        settings.follow_player_id = Some(9);
        assert!(settings.reconcile_follow(&frame, TeamPolicy::LocalTeam));
        assert_eq!(settings.follow_player_id, None);
        assert!(!settings.reconcile_follow(&frame, TeamPolicy::LocalTeam));
    }

    #[test]
    fn test_reconcile_follow_team_constraint_depends_on_policy() {
        let frame = TelemetryFrame {
            players: vec![player(1, Team::Terrorist), player(2, Team::CounterTerrorist)],
            local_team: Some(Team::Terrorist),
            ..Default::default()
        };

        let mut settings = Settings {
            follow_player_id: Some(2),
            ..Default::default()
        };
        assert!(!settings.reconcile_follow(&frame, TeamPolicy::Uniform));
        assert!(settings.reconcile_follow(&frame, TeamPolicy::LocalTeam));

        // drawTeam overrides the frame's perspective.
        let mut settings = Settings {
            follow_player_id: Some(2),
            draw_team: Some(Team::CounterTerrorist),
            ..Default::default()
        };
        assert!(!settings.reconcile_follow(&frame, TeamPolicy::LocalTeam));
    }
}
