//! Map entities.
//!
//! KeyFrames and MapPoints reference each other by id only:
//! - KeyFrames map keypoint indices to MapPoints (`visibility`)
//! - MapPoints map observing KeyFrames to keypoint indices (`visibility`)
//!
//! Keeping the two sides in agreement is the job of
//! [`MapManager`](crate::atlas::MapManager).

pub mod keyframe;
pub mod map_point;
pub mod types;

pub use keyframe::{Descriptors, KeyFrame, KeyPoint};
pub use map_point::MapPoint;
pub use types::{DescriptorType, KeyFrameId, MapPointId};
