//! Error types for the map stores and the map manager.
//!
//! Not-found results are routine (a concurrent delete, a stale visibility
//! entry) and callers are expected to branch on [`MapError::is_not_found`]
//! rather than treat them as failures.

use std::path::PathBuf;

use thiserror::Error;

use crate::atlas::map::{KeyFrameId, MapPointId};

#[derive(Debug, Error)]
pub enum MapError {
    #[error("keyframe {0} not found")]
    KeyFrameNotFound(KeyFrameId),

    #[error("map point {0} not found")]
    PointNotFound(MapPointId),

    #[error("graph node {0} not found")]
    NodeNotFound(KeyFrameId),

    #[error("no covisibility edge between {0} and {1}")]
    EdgeNotFound(KeyFrameId, KeyFrameId),

    #[error("self edge requested on {0}")]
    SelfLoop(KeyFrameId),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{to} is unreachable from {from}")]
    Unreachable { from: KeyFrameId, to: KeyFrameId },

    #[error("i/o failure on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to serialize {path}: {source}")]
    Serialize {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to deserialize {path}: {source}")]
    Deserialize {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("corrupt archive {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("unsupported archive {path}: found {found}, expected {expected}")]
    UnsupportedArchive {
        path: PathBuf,
        found: String,
        expected: String,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

impl MapError {
    /// True for the routine "id absent" family.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            MapError::KeyFrameNotFound(_)
                | MapError::PointNotFound(_)
                | MapError::NodeNotFound(_)
                | MapError::EdgeNotFound(_, _)
        )
    }

    /// True for failures that come from the persistence layer.
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            MapError::Io { .. }
                | MapError::Serialize { .. }
                | MapError::Deserialize { .. }
                | MapError::Corrupt { .. }
                | MapError::UnsupportedArchive { .. }
        )
    }
}

impl From<toml::de::Error> for MapError {
    fn from(e: toml::de::Error) -> Self {
        MapError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MapError>;
