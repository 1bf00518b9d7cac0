//! Map manager configuration.
//!
//! Every field has a default, so a TOML file only needs the values it
//! overrides:
//!
//! ```toml
//! redundancy_ratio = 0.8
//!
//! [files]
//! point_cloud = "cloud.json"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{MapError, Result};

/// Pruning thresholds and persistence layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    /// Points with a larger mean reprojection error (pixels) are pruned.
    pub reprojection_error_threshold: f64,

    /// Points whose confidence falls below this value are pruned.
    pub confidence_threshold: f64,

    /// Step applied by inlier / outlier confidence updates.
    pub confidence_step: f64,

    /// A keyframe is redundant when more than this fraction of its points
    /// are seen by at least `redundant_observers` keyframes.
    pub redundancy_ratio: f64,

    /// Every point of a prunable keyframe needs at least this many observers.
    pub min_observers_per_point: usize,

    pub redundant_observers: usize,

    pub files: MapFiles,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            reprojection_error_threshold: 3.0,
            confidence_threshold: 0.1,
            confidence_step: 0.1,
            redundancy_ratio: 0.9,
            min_observers_per_point: 4,
            redundant_observers: 5,
            files: MapFiles::default(),
        }
    }
}

/// File names inside a map directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapFiles {
    pub identification: String,
    pub coordinate_system: String,
    pub point_cloud: String,
    pub keyframes: String,
    pub covisibility_graph: String,
    pub retrieval_index: String,
}

impl Default for MapFiles {
    fn default() -> Self {
        Self {
            identification: "identification.json".to_string(),
            coordinate_system: "coordinate_system.json".to_string(),
            point_cloud: "point_cloud.json".to_string(),
            keyframes: "keyframes.json".to_string(),
            covisibility_graph: "covisibility_graph.json".to_string(),
            retrieval_index: "retrieval_index.json".to_string(),
        }
    }
}

impl MapConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: MapConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| MapError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Reject values that would make pruning meaningless.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.redundancy_ratio) {
            return Err(MapError::Config(format!(
                "redundancy_ratio must be in [0, 1], got {}",
                self.redundancy_ratio
            )));
        }
        if self.reprojection_error_threshold <= 0.0 {
            return Err(MapError::Config(format!(
                "reprojection_error_threshold must be positive, got {}",
                self.reprojection_error_threshold
            )));
        }
        if self.redundant_observers < self.min_observers_per_point {
            return Err(MapError::Config(format!(
                "redundant_observers ({}) must not be below min_observers_per_point ({})",
                self.redundant_observers, self.min_observers_per_point
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MapConfig::default();
        assert_eq!(config.redundancy_ratio, 0.9);
        assert_eq!(config.min_observers_per_point, 4);
        assert_eq!(config.redundant_observers, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = MapConfig::from_toml_str(
            r#"
            redundancy_ratio = 0.8

            [files]
            point_cloud = "cloud.json"
            "#,
        )
        .unwrap();

        assert_eq!(config.redundancy_ratio, 0.8);
        assert_eq!(config.confidence_threshold, 0.1);
        assert_eq!(config.files.point_cloud, "cloud.json");
        assert_eq!(config.files.keyframes, "keyframes.json");
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(
            MapConfig::from_toml_str("redundancy_ratio = 1.5"),
            Err(MapError::Config(_))
        ));
        assert!(matches!(
            MapConfig::from_toml_str("redundancy_ratio = \"high\""),
            Err(MapError::Config(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.toml");
        std::fs::write(&path, "confidence_threshold = 0.3\n").unwrap();

        let config = MapConfig::load(&path).unwrap();
        assert_eq!(config.confidence_threshold, 0.3);
        assert!(MapConfig::load(dir.path().join("absent.toml")).unwrap_err().is_io());
    }
}
