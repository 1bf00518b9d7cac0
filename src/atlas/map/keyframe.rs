//! KeyFrame - A retained camera observation with its point associations.
//!
//! KeyFrames are the nodes of the covisibility graph. They contain:
//! - Pose estimate (SE3, camera to world)
//! - Visual features (keypoints and one descriptor row per keypoint)
//! - An optional Bag-of-Words vector for the retrieval index
//! - The keypoint → MapPoint visibility map
//!
//! Covisibility itself is not stored here: the graph lives in its own store
//! and is kept in step by the map manager.

use std::collections::HashMap;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::atlas::keyframe_db::BowVector;
use crate::geometry::SE3;

use super::types::{DescriptorType, KeyFrameId, MapPointId};

/// A detected image feature.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeyPoint {
    pub x: f32,
    pub y: f32,
    pub size: f32,
    pub angle: f32,
    pub response: f32,
    /// Pyramid level the feature was detected at.
    pub octave: i32,
}

impl KeyPoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            size: 31.0,
            angle: -1.0,
            response: 0.0,
            octave: 0,
        }
    }
}

/// Row-major descriptor buffer, one row per keypoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Descriptors {
    pub kind: DescriptorType,
    /// Row length in bytes.
    pub row_size: usize,
    pub data: Vec<u8>,
}

impl Descriptors {
    pub fn new(kind: DescriptorType, data: Vec<u8>) -> Self {
        Self {
            kind,
            row_size: kind.row_size(),
            data,
        }
    }

    pub fn empty(kind: DescriptorType) -> Self {
        Self::new(kind, Vec::new())
    }

    /// Number of descriptor rows.
    pub fn len(&self) -> usize {
        if self.row_size == 0 {
            0
        } else {
            self.data.len() / self.row_size
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn row(&self, idx: usize) -> Option<&[u8]> {
        let start = idx.checked_mul(self.row_size)?;
        self.data.get(start..start + self.row_size)
    }
}

/// A KeyFrame in the map.
#[derive(Clone, Serialize, Deserialize)]
pub struct KeyFrame {
    /// Unique identifier for this KeyFrame.
    pub id: KeyFrameId,

    /// Timestamp in nanoseconds.
    pub timestamp_ns: u64,

    /// Pose: transform from camera to world (T_wc).
    pub pose: SE3,

    // ─────────────────────────────────────────────────────────────────────────
    // Visual Features
    // ─────────────────────────────────────────────────────────────────────────
    pub keypoints: Vec<KeyPoint>,

    pub descriptors: Descriptors,

    /// Bag-of-Words histogram used by the retrieval index.
    pub bow_vector: Option<BowVector>,

    // ─────────────────────────────────────────────────────────────────────────
    // Map Associations
    // ─────────────────────────────────────────────────────────────────────────
    /// Keypoint index → MapPoint association (partial function).
    visibility: HashMap<usize, MapPointId>,
}

impl KeyFrame {
    /// Create a new KeyFrame with no point associations.
    pub fn new(
        id: KeyFrameId,
        timestamp_ns: u64,
        pose: SE3,
        keypoints: Vec<KeyPoint>,
        descriptors: Descriptors,
    ) -> Self {
        Self {
            id,
            timestamp_ns,
            pose,
            keypoints,
            descriptors,
            bow_vector: None,
            visibility: HashMap::new(),
        }
    }

    /// KeyFrame without features, mostly useful for graph-only bookkeeping.
    pub fn bare(id: KeyFrameId, pose: SE3) -> Self {
        Self::new(id, 0, pose, Vec::new(), Descriptors::default())
    }

    /// Get the camera position in world frame.
    pub fn camera_center(&self) -> Vector3<f64> {
        self.pose.translation
    }

    pub fn set_bow_vector(&mut self, bow: BowVector) {
        self.bow_vector = Some(bow);
    }

    pub fn bow_vector(&self) -> Option<&BowVector> {
        self.bow_vector.as_ref()
    }

    /// Whether `idx` can carry an association.
    ///
    /// A keyframe without attached features accepts any index.
    pub fn has_keypoint(&self, idx: usize) -> bool {
        self.keypoints.is_empty() || idx < self.keypoints.len()
    }

    pub fn num_features(&self) -> usize {
        self.keypoints.len()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Map Point Associations
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the MapPoint ID for a given keypoint index.
    pub fn get_map_point(&self, kp_idx: usize) -> Option<MapPointId> {
        self.visibility.get(&kp_idx).copied()
    }

    /// Associate a keypoint with a MapPoint.
    ///
    /// Returns the previous MapPoint ID if there was one.
    pub fn set_map_point(&mut self, kp_idx: usize, mp_id: MapPointId) -> Option<MapPointId> {
        self.visibility.insert(kp_idx, mp_id)
    }

    /// Whether keypoint `kp_idx` can carry `mp_id` without displacing another
    /// point or binding `mp_id` twice.
    pub fn can_bind(&self, kp_idx: usize, mp_id: MapPointId) -> bool {
        self.has_keypoint(kp_idx)
            && self.get_map_point(kp_idx).map_or(true, |bound| bound == mp_id)
            && self.keypoint_of(mp_id).map_or(true, |idx| idx == kp_idx)
    }

    /// Associate only if [`KeyFrame::can_bind`] allows it. Returns whether the
    /// association is in place afterwards.
    pub fn bind_map_point(&mut self, kp_idx: usize, mp_id: MapPointId) -> bool {
        if !self.can_bind(kp_idx, mp_id) {
            return false;
        }
        self.visibility.insert(kp_idx, mp_id);
        true
    }

    /// Remove the association for a keypoint.
    pub fn erase_map_point(&mut self, kp_idx: usize) -> Option<MapPointId> {
        self.visibility.remove(&kp_idx)
    }

    /// Remove every keypoint bound to `mp_id`. Returns the freed indices.
    pub fn erase_map_point_id(&mut self, mp_id: MapPointId) -> Vec<usize> {
        let freed: Vec<usize> = self
            .visibility
            .iter()
            .filter(|(_, &id)| id == mp_id)
            .map(|(&idx, _)| idx)
            .collect();
        for idx in &freed {
            self.visibility.remove(idx);
        }
        freed
    }

    /// Keypoint index currently bound to `mp_id`, if any.
    pub fn keypoint_of(&self, mp_id: MapPointId) -> Option<usize> {
        self.visibility
            .iter()
            .find(|(_, &id)| id == mp_id)
            .map(|(&idx, _)| idx)
    }

    /// Get all associated MapPoint IDs with their keypoint indices.
    pub fn get_map_point_indices(&self) -> impl Iterator<Item = (usize, MapPointId)> + '_ {
        self.visibility.iter().map(|(&idx, &id)| (idx, id))
    }

    pub fn visibility(&self) -> &HashMap<usize, MapPointId> {
        &self.visibility
    }

    /// Count the number of associated MapPoints.
    pub fn num_map_points(&self) -> usize {
        self.visibility.len()
    }
}

impl std::fmt::Debug for KeyFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyFrame")
            .field("id", &self.id)
            .field("timestamp_ns", &self.timestamp_ns)
            .field("num_features", &self.num_features())
            .field("num_map_points", &self.num_map_points())
            .field("descriptor", &self.descriptors.kind)
            .finish()
    }
}
