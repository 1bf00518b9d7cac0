//! PointStore - the id-keyed collection of cloud points.
//!
//! The store owns its table exclusively and guards it with one lock held for
//! the full body of every method. Points are stored behind `Arc` so readers
//! get cheap snapshots; in-place updates go through [`PointStore::update_point`]
//! which clones a point only when a snapshot of it is still alive.
//!
//! A caller that needs several operations to be atomic with respect to other
//! threads takes the guard with [`PointStore::write`] (or [`PointStore::read`])
//! and works on the [`PointTable`] directly for the whole critical section.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::atlas::archive;
use crate::atlas::map::{DescriptorType, MapPoint, MapPointId};
use crate::error::{MapError, Result};

const ARCHIVE_FORMAT: &str = "point_cloud";

/// Unlocked point table. Reachable only through a [`PointStore`] guard.
#[derive(Default)]
pub struct PointTable {
    points: HashMap<MapPointId, Arc<MapPoint>>,
    descriptor_type: DescriptorType,
    next_id: u64,
}

#[derive(Serialize, Deserialize)]
struct PointArchive {
    descriptor_type: DescriptorType,
    next_id: u64,
    points: Vec<MapPoint>,
}

impl PointTable {
    /// Insert or overwrite by id.
    pub fn add_point(&mut self, point: impl Into<Arc<MapPoint>>) {
        let point = point.into();
        if point.id.0 >= self.next_id {
            self.next_id = point.id.0 + 1;
        }
        self.points.insert(point.id, point);
    }

    pub fn get_point(&self, id: MapPointId) -> Result<Arc<MapPoint>> {
        self.points
            .get(&id)
            .cloned()
            .ok_or(MapError::PointNotFound(id))
    }

    /// All-or-nothing fetch: the first missing id is reported and nothing is
    /// returned.
    pub fn get_points(&self, ids: &[MapPointId]) -> Result<Vec<Arc<MapPoint>>> {
        ids.iter().map(|&id| self.get_point(id)).collect()
    }

    pub fn get_all_points(&self) -> Vec<Arc<MapPoint>> {
        let mut points: Vec<Arc<MapPoint>> = self.points.values().cloned().collect();
        points.sort_unstable_by_key(|p| p.id);
        points
    }

    pub fn point_ids(&self) -> Vec<MapPointId> {
        let mut ids: Vec<MapPointId> = self.points.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Mutate one point in place.
    pub fn update_point<R>(&mut self, id: MapPointId, f: impl FnOnce(&mut MapPoint) -> R) -> Result<R> {
        let point = self
            .points
            .get_mut(&id)
            .ok_or(MapError::PointNotFound(id))?;
        Ok(f(Arc::make_mut(point)))
    }

    /// Removing an absent id is not an error. Returns the removed point.
    pub fn suppress_point(&mut self, id: MapPointId) -> Option<Arc<MapPoint>> {
        self.points.remove(&id)
    }

    pub fn nb_points(&self) -> usize {
        self.points.len()
    }

    pub fn is_exist_point(&self, id: MapPointId) -> bool {
        self.points.contains_key(&id)
    }

    /// Reserve the next unused point id.
    pub fn next_point_id(&mut self) -> MapPointId {
        let id = MapPointId::new(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn descriptor_type(&self) -> DescriptorType {
        self.descriptor_type
    }

    pub fn set_descriptor_type(&mut self, kind: DescriptorType) {
        self.descriptor_type = kind;
    }

    pub fn clear(&mut self) {
        self.points.clear();
        self.next_id = 0;
    }
}

/// Thread-safe cloud point collection.
#[derive(Default)]
pub struct PointStore {
    table: RwLock<PointTable>,
}

impl PointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_descriptor_type(kind: DescriptorType) -> Self {
        let store = Self::new();
        store.table.write().descriptor_type = kind;
        store
    }

    /// Shared guard for a multi-step read section.
    pub fn read(&self) -> RwLockReadGuard<'_, PointTable> {
        self.table.read()
    }

    /// Exclusive guard for a multi-step write section.
    pub fn write(&self) -> RwLockWriteGuard<'_, PointTable> {
        self.table.write()
    }

    pub fn add_point(&self, point: impl Into<Arc<MapPoint>>) {
        self.table.write().add_point(point);
    }

    pub fn add_points(&self, points: impl IntoIterator<Item = MapPoint>) {
        let mut table = self.table.write();
        for point in points {
            table.add_point(point);
        }
    }

    pub fn get_point(&self, id: MapPointId) -> Result<Arc<MapPoint>> {
        self.table.read().get_point(id)
    }

    pub fn get_points(&self, ids: &[MapPointId]) -> Result<Vec<Arc<MapPoint>>> {
        self.table.read().get_points(ids)
    }

    pub fn get_all_points(&self) -> Vec<Arc<MapPoint>> {
        self.table.read().get_all_points()
    }

    pub fn point_ids(&self) -> Vec<MapPointId> {
        self.table.read().point_ids()
    }

    pub fn update_point<R>(&self, id: MapPointId, f: impl FnOnce(&mut MapPoint) -> R) -> Result<R> {
        self.table.write().update_point(id, f)
    }

    pub fn suppress_point(&self, id: MapPointId) -> Option<Arc<MapPoint>> {
        self.table.write().suppress_point(id)
    }

    pub fn suppress_points(&self, ids: &[MapPointId]) -> usize {
        let mut table = self.table.write();
        ids.iter()
            .filter(|&&id| table.suppress_point(id).is_some())
            .count()
    }

    pub fn nb_points(&self) -> usize {
        self.table.read().nb_points()
    }

    pub fn is_exist_point(&self, id: MapPointId) -> bool {
        self.table.read().is_exist_point(id)
    }

    pub fn next_point_id(&self) -> MapPointId {
        self.table.write().next_point_id()
    }

    pub fn descriptor_type(&self) -> DescriptorType {
        self.table.read().descriptor_type()
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let payload = {
            let table = self.table.read();
            PointArchive {
                descriptor_type: table.descriptor_type,
                next_id: table.next_id,
                points: table
                    .get_all_points()
                    .into_iter()
                    .map(|p| MapPoint::clone(&p))
                    .collect(),
            }
        };
        archive::save(path, ARCHIVE_FORMAT, &payload)?;
        debug!(
            "[PointStore] Saved {} points to {}",
            payload.points.len(),
            path.display()
        );
        Ok(())
    }

    /// Replace the whole collection with the archive content.
    ///
    /// The table is swapped in place, so every holder of this store observes
    /// the loaded points.
    pub fn load_from_file(&self, path: &Path) -> Result<()> {
        let payload: PointArchive = archive::load(path, ARCHIVE_FORMAT)?;
        let mut table = self.table.write();
        table.points = payload
            .points
            .into_iter()
            .map(|p| (p.id, Arc::new(p)))
            .collect();
        table.descriptor_type = payload.descriptor_type;
        let max_id = table.points.keys().map(|id| id.0 + 1).max().unwrap_or(0);
        table.next_id = payload.next_id.max(max_id);
        debug!(
            "[PointStore] Loaded {} points from {}",
            table.points.len(),
            path.display()
        );
        Ok(())
    }
}

impl std::fmt::Debug for PointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.table.read();
        f.debug_struct("PointStore")
            .field("num_points", &table.points.len())
            .field("descriptor_type", &table.descriptor_type)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atlas::map::KeyFrameId;
    use nalgebra::Vector3;

    fn point(id: u64) -> MapPoint {
        MapPoint::new(MapPointId::new(id), Vector3::new(id as f64, 0.0, 1.0))
    }

    #[test]
    fn test_add_and_get() {
        let store = PointStore::new();
        store.add_points([point(1), point(2)]);

        assert_eq!(store.nb_points(), 2);
        assert!(store.is_exist_point(MapPointId::new(1)));
        assert_eq!(store.get_point(MapPointId::new(2)).unwrap().position.x, 2.0);
    }

    #[test]
    fn test_add_overwrites_by_id() {
        let store = PointStore::new();
        store.add_point(point(4));
        let mut replacement = point(4);
        replacement.position = Vector3::new(9.0, 9.0, 9.0);
        store.add_point(replacement);

        assert_eq!(store.nb_points(), 1);
        assert_eq!(store.get_point(MapPointId::new(4)).unwrap().position.x, 9.0);
    }

    #[test]
    fn test_missing_point_is_reported() {
        let store = PointStore::new();
        store.add_point(point(1));

        let err = store.get_point(MapPointId::new(7)).unwrap_err();
        assert!(err.is_not_found());

        let err = store
            .get_points(&[MapPointId::new(1), MapPointId::new(7)])
            .unwrap_err();
        assert!(matches!(err, MapError::PointNotFound(id) if id == MapPointId::new(7)));
    }

    #[test]
    fn test_suppress_absent_is_noop() {
        let store = PointStore::new();
        store.add_point(point(1));

        assert!(store.suppress_point(MapPointId::new(42)).is_none());
        assert_eq!(store.suppress_points(&[MapPointId::new(1), MapPointId::new(42)]), 1);
        assert_eq!(store.nb_points(), 0);
    }

    #[test]
    fn test_update_does_not_touch_snapshots() {
        let store = PointStore::new();
        store.add_point(point(1));
        let snapshot = store.get_point(MapPointId::new(1)).unwrap();

        store
            .update_point(MapPointId::new(1), |p| {
                p.add_visibility(KeyFrameId::new(3), 11);
            })
            .unwrap();

        assert_eq!(snapshot.num_observations(), 0);
        let fresh = store.get_point(MapPointId::new(1)).unwrap();
        assert_eq!(fresh.keypoint_in(KeyFrameId::new(3)), Some(11));
        assert!(store
            .update_point(MapPointId::new(2), |_| ())
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_next_id_follows_inserted_ids() {
        let store = PointStore::new();
        store.add_point(point(10));
        assert_eq!(store.next_point_id(), MapPointId::new(11));
        assert_eq!(store.next_point_id(), MapPointId::new(12));
    }

    #[test]
    fn test_guard_spans_several_operations() {
        let store = PointStore::new();
        {
            let mut table = store.write();
            let id = table.next_point_id();
            table.add_point(MapPoint::new(id, Vector3::zeros()));
            assert!(table.is_exist_point(id));
        }
        assert_eq!(store.nb_points(), 1);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("points.json");

        let store = PointStore::with_descriptor_type(DescriptorType::Akaze);
        let mut p = point(3).with_visibility([(KeyFrameId::new(0), 5), (KeyFrameId::new(1), 8)]);
        p.color = [10, 20, 30];
        p.confidence = 0.25;
        store.add_points([p, point(8)]);
        store.save_to_file(&path).unwrap();

        let loaded = PointStore::new();
        loaded.load_from_file(&path).unwrap();

        assert_eq!(loaded.descriptor_type(), DescriptorType::Akaze);
        assert_eq!(loaded.point_ids(), vec![MapPointId::new(3), MapPointId::new(8)]);
        let p = loaded.get_point(MapPointId::new(3)).unwrap();
        assert_eq!(p.color, [10, 20, 30]);
        assert_eq!(p.confidence, 0.25);
        assert_eq!(p.keypoint_in(KeyFrameId::new(1)), Some(8));
        assert_eq!(loaded.next_point_id(), MapPointId::new(9));
    }
}
