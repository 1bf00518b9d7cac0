//! Core ID types for the map stores.

use serde::{Deserialize, Serialize};

/// Unique identifier for a KeyFrame within a map.
///
/// KeyFrameIds are assigned sequentially by the keyframe store.
/// They serve as lightweight handles for cross-referencing without
/// needing Arc/Rc, which simplifies ownership and avoids cyclic references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyFrameId(pub u64);

impl KeyFrameId {
    /// The first keyframe of a map. Never pruned.
    pub const ANCHOR: KeyFrameId = KeyFrameId(0);

    /// Create a new KeyFrameId with the given value.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn is_anchor(&self) -> bool {
        *self == Self::ANCHOR
    }
}

impl std::fmt::Display for KeyFrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KF{}", self.0)
    }
}

/// Unique identifier for a MapPoint (cloud point) within a map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MapPointId(pub u64);

impl MapPointId {
    /// Create a new MapPointId with the given value.
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for MapPointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MP{}", self.0)
    }
}

/// Descriptor family shared by every entry of a store.
///
/// Stores tag their archive with it so a map built with one extractor is
/// never matched against descriptors of another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DescriptorType {
    #[default]
    Orb,
    Akaze,
    Sift,
    Surf,
    Brisk,
    Freak,
}

impl DescriptorType {
    /// Size of one descriptor row in bytes.
    pub fn row_size(&self) -> usize {
        match self {
            DescriptorType::Orb | DescriptorType::Freak => 32,
            DescriptorType::Akaze => 61,
            DescriptorType::Brisk => 64,
            DescriptorType::Sift => 128 * 4,
            DescriptorType::Surf => 64 * 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyframe_id_equality() {
        let id1 = KeyFrameId::new(42);
        let id2 = KeyFrameId::new(42);
        let id3 = KeyFrameId::new(43);

        assert_eq!(id1, id2);
        assert_ne!(id1, id3);
        assert!(id1 < id3);
    }

    #[test]
    fn test_mappoint_id_display() {
        let id = MapPointId::new(123);
        assert_eq!(format!("{}", id), "MP123");
        assert_eq!(format!("{}", KeyFrameId::new(7)), "KF7");
    }

    #[test]
    fn test_anchor_keyframe() {
        assert!(KeyFrameId::new(0).is_anchor());
        assert!(!KeyFrameId::new(1).is_anchor());
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let json = serde_json::to_string(&KeyFrameId::new(5)).unwrap();
        assert_eq!(json, "5");
        let back: MapPointId = serde_json::from_str("17").unwrap();
        assert_eq!(back, MapPointId::new(17));
    }
}
