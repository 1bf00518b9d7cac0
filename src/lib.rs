//! Map consistency core for a keyframe-based visual SLAM system.
//!
//! Three independently locked stores hold the map:
//! - [`PointStore`] - 3D landmarks keyed by [`MapPointId`]
//! - [`KeyframeStore`] - keyframes keyed by [`KeyFrameId`]
//! - [`CovisibilityGraph`] - keyframe nodes joined by shared-point counts
//!
//! [`MapManager`] is the only component that mutates more than one of them per
//! operation and keeps them consistent.

pub mod atlas;
pub mod config;
pub mod error;
pub mod geometry;

pub use atlas::{
    CovisibilityGraph, KeyFrame, KeyFrameDatabase, KeyFrameId, KeyframeRetriever, KeyframeStore,
    MapManager, MapPoint, MapPointId, PointStore,
};
pub use config::MapConfig;
pub use error::{MapError, Result};
pub use geometry::SE3;
