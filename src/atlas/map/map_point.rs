//! MapPoint - A 3D landmark (cloud point) observed by KeyFrames.
//!
//! Each MapPoint tracks which KeyFrames observe it and through which
//! keypoint, and carries the quality metrics used by point pruning.

use std::collections::HashMap;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use super::types::{KeyFrameId, MapPointId};

/// Starting confidence of a freshly triangulated point.
pub const INITIAL_CONFIDENCE: f64 = 1.0;

/// A 3D map point observed by one or more KeyFrames.
#[derive(Clone, Serialize, Deserialize)]
pub struct MapPoint {
    /// Unique identifier for this MapPoint.
    pub id: MapPointId,

    /// 3D position in world frame.
    pub position: Vector3<f64>,

    /// RGB color sampled from the first observation.
    pub color: [u8; 3],

    /// Mean viewing direction (unit vector, world frame).
    pub view_direction: Vector3<f64>,

    /// Representative descriptor row.
    pub descriptor: Vec<u8>,

    /// Mean reprojection error in pixels, as last reported by the optimizer.
    pub reprojection_error: f64,

    /// Tracking confidence in [0, 1]. Raised on inlier matches, decayed on
    /// outliers.
    pub confidence: f64,

    /// Cleared by outlier rejection; invalid points are removed by pruning.
    pub is_valid: bool,

    /// KeyFrames observing this point, mapped to keypoint index in that KeyFrame.
    visibility: HashMap<KeyFrameId, usize>,
}

impl MapPoint {
    /// Create a new MapPoint with no observations.
    pub fn new(id: MapPointId, position: Vector3<f64>) -> Self {
        Self {
            id,
            position,
            color: [0, 0, 0],
            view_direction: Vector3::zeros(),
            descriptor: Vec::new(),
            reprojection_error: 0.0,
            confidence: INITIAL_CONFIDENCE,
            is_valid: true,
            visibility: HashMap::new(),
        }
    }

    /// Builder-style helper: attach observations before insertion.
    pub fn with_visibility(mut self, observations: impl IntoIterator<Item = (KeyFrameId, usize)>) -> Self {
        self.visibility.extend(observations);
        self
    }

    pub fn with_descriptor(mut self, descriptor: Vec<u8>) -> Self {
        self.descriptor = descriptor;
        self
    }

    /// Add an observation from a KeyFrame.
    ///
    /// Returns the previous keypoint index if the KeyFrame already observed it.
    pub fn add_visibility(&mut self, kf_id: KeyFrameId, kp_idx: usize) -> Option<usize> {
        self.visibility.insert(kf_id, kp_idx)
    }

    /// Remove an observation.
    ///
    /// Returns the keypoint index if the observation existed.
    pub fn remove_visibility(&mut self, kf_id: KeyFrameId) -> Option<usize> {
        self.visibility.remove(&kf_id)
    }

    pub fn keypoint_in(&self, kf_id: KeyFrameId) -> Option<usize> {
        self.visibility.get(&kf_id).copied()
    }

    pub fn is_observed_by(&self, kf_id: KeyFrameId) -> bool {
        self.visibility.contains_key(&kf_id)
    }

    pub fn visibility(&self) -> &HashMap<KeyFrameId, usize> {
        &self.visibility
    }

    /// Observing KeyFrames in ascending id order.
    pub fn observers(&self) -> Vec<KeyFrameId> {
        let mut ids: Vec<KeyFrameId> = self.visibility.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Get the number of KeyFrames observing this point.
    pub fn num_observations(&self) -> usize {
        self.visibility.len()
    }

    /// Fold a tracking outcome into the confidence counter.
    pub fn update_confidence(&mut self, is_inlier: bool, step: f64) {
        self.confidence = if is_inlier {
            (self.confidence + step).min(1.0)
        } else {
            (self.confidence - step).max(0.0)
        };
    }

    pub fn set_invalid(&mut self) {
        self.is_valid = false;
    }

    /// Check if this MapPoint should be pruned.
    ///
    /// A point is pruned if:
    /// - It was invalidated
    /// - Its reprojection error exceeds `max_reprojection_error`
    /// - Its confidence fell below `min_confidence`
    pub fn should_prune(&self, max_reprojection_error: f64, min_confidence: f64) -> bool {
        !self.is_valid
            || self.reprojection_error > max_reprojection_error
            || self.confidence < min_confidence
    }

    /// Recompute the mean viewing direction from observer camera centers.
    pub fn update_view_direction<'a>(&mut self, centers: impl Iterator<Item = &'a Vector3<f64>>) {
        let mut sum = Vector3::zeros();
        for center in centers {
            let dir = self.position - center;
            let dist = dir.norm();
            if dist > 1e-10 {
                sum += dir / dist;
            }
        }
        let norm = sum.norm();
        if norm > 1e-10 {
            self.view_direction = sum / norm;
        }
    }
}

impl std::fmt::Debug for MapPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapPoint")
            .field("id", &self.id)
            .field("position", &self.position)
            .field("observations", &self.visibility.len())
            .field("confidence", &self.confidence)
            .field("is_valid", &self.is_valid)
            .finish()
    }
}
