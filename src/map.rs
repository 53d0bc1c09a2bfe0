//! Per-map calibration assets and map-change tracking.

use crate::error::AssetError;
use crate::telemetry::NO_MAP;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Pixel size of the stock radar images
pub const DEFAULT_RADAR_IMAGE_SIZE: f64 = 1024.0;

/// Affine parameters that turn world units into radar image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapCalibration {
    /// World X at the image's left edge
    #[serde(rename = "x", alias = "originX", alias = "pos_x")]
    pub origin_x: f64,

    /// World Y at the image's top edge
    #[serde(rename = "y", alias = "originY", alias = "pos_y")]
    pub origin_y: f64,

    /// World units per image pixel
    pub scale: f64,

    #[serde(rename = "width", default = "default_image_size")]
    pub image_width: f64,

    #[serde(rename = "height", default = "default_image_size")]
    pub image_height: f64,
}

fn default_image_size() -> f64 {
    DEFAULT_RADAR_IMAGE_SIZE
}

impl MapCalibration {
    pub fn new(origin_x: f64, origin_y: f64, scale: f64) -> Self {
        Self {
            origin_x,
            origin_y,
            scale,
            image_width: DEFAULT_RADAR_IMAGE_SIZE,
            image_height: DEFAULT_RADAR_IMAGE_SIZE,
        }
    }

    pub fn with_image_size(mut self, width: f64, height: f64) -> Self {
        self.image_width = width;
        self.image_height = height;
        self
    }

    fn check(&self, map: &str) -> Result<(), AssetError> {
        let finite = [
            self.origin_x,
            self.origin_y,
            self.scale,
            self.image_width,
            self.image_height,
        ]
        .iter()
        .all(|v| v.is_finite());

        if !finite {
            return Err(AssetError::Invalid {
                map: map.to_string(),
                details: "non-finite calibration value".to_string(),
            });
        }
        if self.scale <= 0.0 {
            return Err(AssetError::Invalid {
                map: map.to_string(),
                details: format!("scale must be positive (got {})", self.scale),
            });
        }
        if self.image_width <= 0.0 || self.image_height <= 0.0 {
            return Err(AssetError::Invalid {
                map: map.to_string(),
                details: "image dimensions must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// A resolved map: its name, calibration, and companion radar image path.
#[derive(Debug, Clone, PartialEq)]
pub struct MapAsset {
    pub name: String,
    pub calibration: MapCalibration,
    pub image_path: PathBuf,
}

/// Reads calibration files laid out as `<data_dir>/<map>/data.json`.
#[derive(Debug, Clone)]
pub struct MapCatalog {
    data_dir: PathBuf,
}

impl MapCatalog {
    pub fn new<P: Into<PathBuf>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub async fn load(&self, map: &str) -> Result<MapAsset, AssetError> {
        if map.is_empty()
            || map == NO_MAP
            || map.contains(['/', '\\'])
            || map.starts_with('.')
        {
            return Err(AssetError::InvalidName {
                map: map.to_string(),
            });
        }

        let map_dir = self.data_dir.join(map);
        let path = map_dir.join("data.json");
        debug!("Loading calibration for {} from {}", map, path.display());

        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AssetError::NotFound {
                    map: map.to_string(),
                    path,
                });
            }
            Err(e) => {
                return Err(AssetError::Read {
                    map: map.to_string(),
                    source: e,
                });
            }
        };

        let calibration: MapCalibration =
            serde_json::from_slice(&raw).map_err(|e| AssetError::Invalid {
                map: map.to_string(),
                details: e.to_string(),
            })?;
        calibration.check(map)?;

        Ok(MapAsset {
            name: map.to_string(),
            calibration,
            image_path: map_dir.join("radar.png"),
        })
    }
}

/// Follows the frame's map name and resolves its asset once per change.
///
/// A failed load is not retried until the map name changes again.
#[derive(Debug)]
pub struct MapTracker {
    catalog: MapCatalog,
    current_map: Option<String>,
    asset: Option<MapAsset>,
}

impl MapTracker {
    pub fn new(catalog: MapCatalog) -> Self {
        Self {
            catalog,
            current_map: None,
            asset: None,
        }
    }

    /// Observe the map named by the latest frame. Returns `true` when the map
    /// changed (whether or not its asset loaded).
    pub async fn observe(&mut self, map: &str) -> bool {
        if self.current_map.as_deref() == Some(map) {
            return false;
        }

        self.current_map = Some(map.to_string());
        self.asset = None;

        if map == NO_MAP || map.is_empty() {
            info!("No active map");
            return true;
        }

        match self.catalog.load(map).await {
            Ok(asset) => {
                info!(
                    "Map changed to {} (origin {:.1},{:.1} scale {})",
                    map, asset.calibration.origin_x, asset.calibration.origin_y, asset.calibration.scale
                );
                self.asset = Some(asset);
            }
            Err(e) => {
                warn!("Map asset unavailable, withholding positions: {}", e);
            }
        }

        true
    }

    pub fn asset(&self) -> Option<&MapAsset> {
        self.asset.as_ref()
    }

    pub fn current_map(&self) -> Option<&str> {
        self.current_map.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_calibration(dir: &Path, map: &str, body: &str) {
        let map_dir = dir.join(map);
        std::fs::create_dir_all(&map_dir).unwrap();
        std::fs::write(map_dir.join("data.json"), body).unwrap();
    }

    #[tokio::test]
    async fn test_catalog_loads_calibration() {
        let dir = tempfile::tempdir().unwrap();
        write_calibration(dir.path(), "de_mirage", r#"{"x": -3230, "y": 1713, "scale": 5.0}"#);

        let catalog = MapCatalog::new(dir.path());
        let asset = catalog.load("de_mirage").await.unwrap();

        assert_eq!(asset.name, "de_mirage");
        assert_eq!(asset.calibration, MapCalibration::new(-3230.0, 1713.0, 5.0));
        assert_eq!(asset.image_path, dir.path().join("de_mirage").join("radar.png"));
    }

    #[tokio::test]
    async fn test_catalog_accepts_aliases_and_image_size() {
        let dir = tempfile::tempdir().unwrap();
        write_calibration(
            dir.path(),
            "de_nuke",
            r#"{"pos_x": -3453, "pos_y": 2887, "scale": 7.0, "width": 2048, "height": 2048}"#,
        );

        let asset = MapCatalog::new(dir.path()).load("de_nuke").await.unwrap();
        assert_eq!(asset.calibration.origin_x, -3453.0);
        assert_eq!(asset.calibration.image_width, 2048.0);
    }

    #[tokio::test]
    async fn test_catalog_errors() {
        let dir = tempfile::tempdir().unwrap();
        write_calibration(dir.path(), "de_bad", r#"{"x": 0, "y": 0, "scale": 0}"#);
        write_calibration(dir.path(), "de_garbage", "{");

        let catalog = MapCatalog::new(dir.path());
        assert!(matches!(
            catalog.load("de_missing").await,
            Err(AssetError::NotFound { .. })
        ));
        assert!(matches!(
            catalog.load("de_bad").await,
            Err(AssetError::Invalid { .. })
        ));
        assert!(matches!(
            catalog.load("de_garbage").await,
            Err(AssetError::Invalid { .. })
        ));
        assert!(matches!(
            catalog.load("../secrets").await,
            Err(AssetError::InvalidName { .. })
        ));
        assert!(matches!(
            catalog.load(NO_MAP).await,
            Err(AssetError::InvalidName { .. })
        ));
    }

    #[tokio::test]
    async fn test_tracker_loads_once_per_map_change() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = MapTracker::new(MapCatalog::new(dir.path()));

        // Asset missing: withheld, and not retried while the map is unchanged.
        assert!(tracker.observe("de_inferno").await);
        assert!(tracker.asset().is_none());

        write_calibration(dir.path(), "de_inferno", r#"{"x": -2087, "y": 3870, "scale": 4.9}"#);
        assert!(!tracker.observe("de_inferno").await);
        assert!(tracker.asset().is_none());

        // Leaving and re-entering the map is a new change event.
        assert!(tracker.observe(NO_MAP).await);
        assert!(tracker.asset().is_none());
        assert!(tracker.observe("de_inferno").await);
        assert_eq!(tracker.asset().unwrap().name, "de_inferno");
        assert_eq!(tracker.current_map(), Some("de_inferno"));
    }
}
