//! KeyframeStore - the id-keyed collection of keyframes.
//!
//! Mirror image of [`crate::atlas::PointStore`]: one lock per store, `Arc`
//! snapshots for readers, copy-on-write updates, and guard hand-out for
//! multi-step critical sections.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::atlas::archive;
use crate::atlas::map::{DescriptorType, KeyFrame, KeyFrameId};
use crate::error::{MapError, Result};

const ARCHIVE_FORMAT: &str = "keyframes";

/// Unlocked keyframe table. Reachable only through a [`KeyframeStore`] guard.
#[derive(Default)]
pub struct KeyframeTable {
    keyframes: HashMap<KeyFrameId, Arc<KeyFrame>>,
    descriptor_type: DescriptorType,
    next_id: u64,
}

#[derive(Serialize, Deserialize)]
struct KeyframeArchive {
    descriptor_type: DescriptorType,
    next_id: u64,
    keyframes: Vec<KeyFrame>,
}

impl KeyframeTable {
    /// Insert or overwrite by id.
    ///
    /// Accepts either a value (`KeyFrame`, moved in) or a shared handle
    /// (`Arc<KeyFrame>`, stored as is).
    pub fn add_keyframe(&mut self, keyframe: impl Into<Arc<KeyFrame>>) {
        let keyframe = keyframe.into();
        if keyframe.id.0 >= self.next_id {
            self.next_id = keyframe.id.0 + 1;
        }
        self.keyframes.insert(keyframe.id, keyframe);
    }

    pub fn get_keyframe(&self, id: KeyFrameId) -> Result<Arc<KeyFrame>> {
        self.keyframes
            .get(&id)
            .cloned()
            .ok_or(MapError::KeyFrameNotFound(id))
    }

    pub fn get_keyframes(&self, ids: &[KeyFrameId]) -> Result<Vec<Arc<KeyFrame>>> {
        ids.iter().map(|&id| self.get_keyframe(id)).collect()
    }

    pub fn get_all_keyframes(&self) -> Vec<Arc<KeyFrame>> {
        let mut keyframes: Vec<Arc<KeyFrame>> = self.keyframes.values().cloned().collect();
        keyframes.sort_unstable_by_key(|kf| kf.id);
        keyframes
    }

    pub fn keyframe_ids(&self) -> Vec<KeyFrameId> {
        let mut ids: Vec<KeyFrameId> = self.keyframes.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn update_keyframe<R>(
        &mut self,
        id: KeyFrameId,
        f: impl FnOnce(&mut KeyFrame) -> R,
    ) -> Result<R> {
        let keyframe = self
            .keyframes
            .get_mut(&id)
            .ok_or(MapError::KeyFrameNotFound(id))?;
        Ok(f(Arc::make_mut(keyframe)))
    }

    pub fn suppress_keyframe(&mut self, id: KeyFrameId) -> Option<Arc<KeyFrame>> {
        self.keyframes.remove(&id)
    }

    pub fn nb_keyframes(&self) -> usize {
        self.keyframes.len()
    }

    pub fn is_exist_keyframe(&self, id: KeyFrameId) -> bool {
        self.keyframes.contains_key(&id)
    }

    pub fn next_keyframe_id(&mut self) -> KeyFrameId {
        let id = KeyFrameId::new(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn descriptor_type(&self) -> DescriptorType {
        self.descriptor_type
    }

    pub fn set_descriptor_type(&mut self, kind: DescriptorType) {
        self.descriptor_type = kind;
    }
}

/// Thread-safe keyframe collection.
#[derive(Default)]
pub struct KeyframeStore {
    table: RwLock<KeyframeTable>,
}

impl KeyframeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_descriptor_type(kind: DescriptorType) -> Self {
        let store = Self::new();
        store.table.write().descriptor_type = kind;
        store
    }

    pub fn read(&self) -> RwLockReadGuard<'_, KeyframeTable> {
        self.table.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, KeyframeTable> {
        self.table.write()
    }

    pub fn add_keyframe(&self, keyframe: impl Into<Arc<KeyFrame>>) {
        self.table.write().add_keyframe(keyframe);
    }

    pub fn add_keyframes(&self, keyframes: impl IntoIterator<Item = KeyFrame>) {
        let mut table = self.table.write();
        for kf in keyframes {
            table.add_keyframe(kf);
        }
    }

    pub fn get_keyframe(&self, id: KeyFrameId) -> Result<Arc<KeyFrame>> {
        self.table.read().get_keyframe(id)
    }

    pub fn get_keyframes(&self, ids: &[KeyFrameId]) -> Result<Vec<Arc<KeyFrame>>> {
        self.table.read().get_keyframes(ids)
    }

    pub fn get_all_keyframes(&self) -> Vec<Arc<KeyFrame>> {
        self.table.read().get_all_keyframes()
    }

    pub fn keyframe_ids(&self) -> Vec<KeyFrameId> {
        self.table.read().keyframe_ids()
    }

    pub fn update_keyframe<R>(
        &self,
        id: KeyFrameId,
        f: impl FnOnce(&mut KeyFrame) -> R,
    ) -> Result<R> {
        self.table.write().update_keyframe(id, f)
    }

    pub fn suppress_keyframe(&self, id: KeyFrameId) -> Option<Arc<KeyFrame>> {
        self.table.write().suppress_keyframe(id)
    }

    pub fn suppress_keyframes(&self, ids: &[KeyFrameId]) -> usize {
        let mut table = self.table.write();
        ids.iter()
            .filter(|&&id| table.suppress_keyframe(id).is_some())
            .count()
    }

    pub fn nb_keyframes(&self) -> usize {
        self.table.read().nb_keyframes()
    }

    pub fn is_exist_keyframe(&self, id: KeyFrameId) -> bool {
        self.table.read().is_exist_keyframe(id)
    }

    pub fn next_keyframe_id(&self) -> KeyFrameId {
        self.table.write().next_keyframe_id()
    }

    pub fn descriptor_type(&self) -> DescriptorType {
        self.table.read().descriptor_type()
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let payload = {
            let table = self.table.read();
            KeyframeArchive {
                descriptor_type: table.descriptor_type,
                next_id: table.next_id,
                keyframes: table
                    .get_all_keyframes()
                    .into_iter()
                    .map(|kf| KeyFrame::clone(&kf))
                    .collect(),
            }
        };
        archive::save(path, ARCHIVE_FORMAT, &payload)?;
        debug!(
            "[KeyframeStore] Saved {} keyframes to {}",
            payload.keyframes.len(),
            path.display()
        );
        Ok(())
    }

    pub fn load_from_file(&self, path: &Path) -> Result<()> {
        let payload: KeyframeArchive = archive::load(path, ARCHIVE_FORMAT)?;
        let mut table = self.table.write();
        table.keyframes = payload
            .keyframes
            .into_iter()
            .map(|kf| (kf.id, Arc::new(kf)))
            .collect();
        table.descriptor_type = payload.descriptor_type;
        let max_id = table.keyframes.keys().map(|id| id.0 + 1).max().unwrap_or(0);
        table.next_id = payload.next_id.max(max_id);
        debug!(
            "[KeyframeStore] Loaded {} keyframes from {}",
            table.keyframes.len(),
            path.display()
        );
        Ok(())
    }
}

impl std::fmt::Debug for KeyframeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.table.read();
        f.debug_struct("KeyframeStore")
            .field("num_keyframes", &table.keyframes.len())
            .field("descriptor_type", &table.descriptor_type)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atlas::map::{Descriptors, KeyPoint, MapPointId};
    use crate::geometry::SE3;
    use nalgebra::Vector3;

    fn keyframe(id: u64) -> KeyFrame {
        KeyFrame::bare(
            KeyFrameId::new(id),
            SE3::from_translation(Vector3::new(id as f64, 0.0, 0.0)),
        )
    }

    #[test]
    fn test_value_and_shared_forms() {
        let store = KeyframeStore::new();
        store.add_keyframe(keyframe(0));

        let shared = Arc::new(keyframe(1));
        store.add_keyframe(Arc::clone(&shared));

        assert_eq!(store.nb_keyframes(), 2);
        let fetched = store.get_keyframe(KeyFrameId::new(1)).unwrap();
        assert!(Arc::ptr_eq(&fetched, &shared));
    }

    #[test]
    fn test_missing_keyframe_is_reported() {
        let store = KeyframeStore::new();
        store.add_keyframe(keyframe(0));

        assert!(store.get_keyframe(KeyFrameId::new(5)).unwrap_err().is_not_found());
        assert!(store
            .get_keyframes(&[KeyFrameId::new(0), KeyFrameId::new(5)])
            .is_err());
        assert_eq!(store.get_keyframes(&[KeyFrameId::new(0)]).unwrap().len(), 1);
    }

    #[test]
    fn test_suppress_absent_is_noop() {
        let store = KeyframeStore::new();
        assert!(store.suppress_keyframe(KeyFrameId::new(3)).is_none());
        store.add_keyframes([keyframe(0), keyframe(1)]);
        assert_eq!(
            store.suppress_keyframes(&[KeyFrameId::new(1), KeyFrameId::new(9)]),
            1
        );
        assert_eq!(store.keyframe_ids(), vec![KeyFrameId::new(0)]);
    }

    #[test]
    fn test_update_keyframe() {
        let store = KeyframeStore::new();
        store.add_keyframe(keyframe(2));
        store
            .update_keyframe(KeyFrameId::new(2), |kf| {
                kf.set_map_point(4, MapPointId::new(40));
            })
            .unwrap();

        let kf = store.get_keyframe(KeyFrameId::new(2)).unwrap();
        assert_eq!(kf.get_map_point(4), Some(MapPointId::new(40)));
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keyframes.json");

        let store = KeyframeStore::with_descriptor_type(DescriptorType::Orb);
        let mut kf = KeyFrame::new(
            KeyFrameId::new(3),
            1_000,
            SE3::from_translation(Vector3::new(0.5, 0.0, -1.0)),
            vec![KeyPoint::new(10.0, 20.0), KeyPoint::new(30.0, 40.0)],
            Descriptors::new(DescriptorType::Orb, vec![1u8; 64]),
        );
        kf.set_map_point(1, MapPointId::new(12));
        store.add_keyframes([keyframe(0), kf]);
        store.save_to_file(&path).unwrap();

        let loaded = KeyframeStore::new();
        loaded.load_from_file(&path).unwrap();

        assert_eq!(loaded.keyframe_ids(), vec![KeyFrameId::new(0), KeyFrameId::new(3)]);
        let kf = loaded.get_keyframe(KeyFrameId::new(3)).unwrap();
        assert_eq!(kf.timestamp_ns, 1_000);
        assert_eq!(kf.keypoints.len(), 2);
        assert_eq!(kf.descriptors.len(), 2);
        assert_eq!(kf.get_map_point(1), Some(MapPointId::new(12)));
        assert_eq!(kf.pose.translation, Vector3::new(0.5, 0.0, -1.0));
        assert_eq!(loaded.next_keyframe_id(), KeyFrameId::new(4));
    }
}
