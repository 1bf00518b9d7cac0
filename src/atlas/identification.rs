//! Map-level metadata persisted next to the stores.

use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::atlas::archive;
use crate::error::Result;
use crate::geometry::SE3;

const IDENTIFICATION_FORMAT: &str = "map_identification";
const COORDINATE_SYSTEM_FORMAT: &str = "map_coordinate_system";

/// Who built the map and under which name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapIdentification {
    pub map_uuid: Uuid,
    pub name: String,
    pub user_id: String,
    pub created_unix_s: u64,
}

impl MapIdentification {
    /// Fresh identity with a random UUID.
    pub fn new(name: impl Into<String>) -> Self {
        let created_unix_s = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            map_uuid: Uuid::new_v4(),
            name: name.into(),
            user_id: String::new(),
            created_unix_s,
        }
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        archive::save(path, IDENTIFICATION_FORMAT, self)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        archive::load(path, IDENTIFICATION_FORMAT)
    }
}

impl Default for MapIdentification {
    fn default() -> Self {
        Self::new("map")
    }
}

/// Placement of the map frame inside a parent frame (world, or another map
/// after a merge).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CoordinateSystem {
    pub parent_map_uuid: Option<Uuid>,
    /// Transform from the map frame to the parent frame.
    pub transform: SE3,
}

impl CoordinateSystem {
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        archive::save(path, COORDINATE_SYSTEM_FORMAT, self)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        archive::load(path, COORDINATE_SYSTEM_FORMAT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    #[test]
    fn test_identities_are_unique() {
        let a = MapIdentification::new("lab");
        let b = MapIdentification::new("lab");
        assert_ne!(a.map_uuid, b.map_uuid);
        assert_eq!(a.name, "lab");
    }

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let id_path = dir.path().join("id.json");
        let cs_path = dir.path().join("cs.json");

        let id = MapIdentification::new("corridor");
        id.save_to_file(&id_path).unwrap();
        assert_eq!(MapIdentification::load_from_file(&id_path).unwrap(), id);

        let cs = CoordinateSystem {
            parent_map_uuid: Some(id.map_uuid),
            transform: SE3::from_translation(Vector3::new(1.0, -2.0, 0.5)),
        };
        cs.save_to_file(&cs_path).unwrap();
        assert_eq!(CoordinateSystem::load_from_file(&cs_path).unwrap(), cs);

        // Blobs are not interchangeable
        assert!(CoordinateSystem::load_from_file(&id_path).is_err());
    }
}
