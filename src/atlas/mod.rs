//! Atlas module - map stores and their coordinator.
//!
//! - [`point_store::PointStore`] / [`keyframe_store::KeyframeStore`] - id-keyed
//!   tables behind one lock each
//! - [`covisibility::CovisibilityGraph`] - weighted keyframe graph with path
//!   and spanning-tree queries
//! - [`keyframe_db`] - retrieval index seam and the default BoW database
//! - [`map_manager::MapManager`] - cross-store operations, pruning, persistence

pub mod archive;
pub mod covisibility;
pub mod identification;
pub mod keyframe_db;
pub mod keyframe_store;
pub mod map;
pub mod map_manager;
pub mod point_store;

// Re-export commonly used types
pub use covisibility::{CovisibilityGraph, EdgeWeight, SpanningForest};
pub use identification::{CoordinateSystem, MapIdentification};
pub use keyframe_db::{BowVector, KeyFrameDatabase, KeyframeRetriever};
pub use keyframe_store::KeyframeStore;
pub use map::{DescriptorType, KeyFrame, KeyFrameId, MapPoint, MapPointId};
pub use map_manager::MapManager;
pub use point_store::PointStore;
