//! MapManager - keeps the point store, keyframe store and covisibility graph
//! mutually consistent.
//!
//! The manager is the only component that changes more than one store per
//! logical operation. It maintains two invariants:
//! - **Visibility bijection**: `kf.visibility[i] == p.id` iff
//!   `p.visibility[kf.id] == i`.
//! - **Edge weights**: the weight of `(a, b)` equals the number of live points
//!   observed by both `a` and `b`.
//!
//! # Locking
//!
//! Each store has its own lock. Manager operations are not globally atomic:
//! every sub-call takes one store lock and releases it before the next, and
//! the manager never holds two store locks at once. Callers that need to hold
//! several guards take them in the fixed order
//! PointStore → KeyframeStore → CovisibilityGraph.
//!
//! Writes are ordered so that a concurrent reader can only observe a
//! keyframe-side entry for a point that is still, or was until a moment ago,
//! in the point store. [`MapManager::get_local_point_cloud`] repairs the
//! leftovers of the second case when it meets them.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use nalgebra::Vector3;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::atlas::covisibility::CovisibilityGraph;
use crate::atlas::identification::{CoordinateSystem, MapIdentification};
use crate::atlas::keyframe_db::{KeyFrameDatabase, KeyframeRetriever};
use crate::atlas::keyframe_store::KeyframeStore;
use crate::atlas::map::{KeyFrame, KeyFrameId, MapPoint, MapPointId};
use crate::atlas::point_store::PointStore;
use crate::config::MapConfig;
use crate::error::{MapError, Result};
use crate::geometry::SE3;

/// Coordinator over the three map stores and the retrieval index.
pub struct MapManager {
    config: MapConfig,
    identification: RwLock<MapIdentification>,
    coordinate_system: RwLock<CoordinateSystem>,
    points: Arc<PointStore>,
    keyframes: Arc<KeyframeStore>,
    graph: Arc<CovisibilityGraph>,
    retriever: Arc<dyn KeyframeRetriever>,
}

impl MapManager {
    /// Empty map with fresh stores and the default BoW retrieval index.
    pub fn new(config: MapConfig) -> Self {
        Self::with_stores(
            config,
            Arc::new(PointStore::new()),
            Arc::new(KeyframeStore::new()),
            Arc::new(CovisibilityGraph::new()),
            Arc::new(KeyFrameDatabase::new()),
        )
    }

    /// Build a manager over stores shared with other components.
    pub fn with_stores(
        config: MapConfig,
        points: Arc<PointStore>,
        keyframes: Arc<KeyframeStore>,
        graph: Arc<CovisibilityGraph>,
        retriever: Arc<dyn KeyframeRetriever>,
    ) -> Self {
        Self {
            config,
            identification: RwLock::new(MapIdentification::default()),
            coordinate_system: RwLock::new(CoordinateSystem::default()),
            points,
            keyframes,
            graph,
            retriever,
        }
    }

    pub fn config(&self) -> &MapConfig {
        &self.config
    }

    /// Read access to the point store. Safe for pure queries.
    pub fn points(&self) -> &Arc<PointStore> {
        &self.points
    }

    pub fn keyframes(&self) -> &Arc<KeyframeStore> {
        &self.keyframes
    }

    pub fn graph(&self) -> &Arc<CovisibilityGraph> {
        &self.graph
    }

    pub fn retriever(&self) -> &Arc<dyn KeyframeRetriever> {
        &self.retriever
    }

    pub fn identification(&self) -> MapIdentification {
        self.identification.read().clone()
    }

    pub fn set_identification(&self, identification: MapIdentification) {
        *self.identification.write() = identification;
    }

    pub fn coordinate_system(&self) -> CoordinateSystem {
        *self.coordinate_system.read()
    }

    pub fn set_coordinate_system(&self, coordinate_system: CoordinateSystem) {
        *self.coordinate_system.write() = coordinate_system;
    }

    pub fn nb_keyframes(&self) -> usize {
        self.keyframes.nb_keyframes()
    }

    pub fn nb_points(&self) -> usize {
        self.points.nb_points()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Keyframes
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a keyframe and register it with the retrieval index.
    ///
    /// The keyframe must not carry point associations yet: those are created
    /// by [`MapManager::add_cloud_point`] and [`MapManager::add_observation`].
    /// Its id must not be in the map already; replacing a live keyframe goes
    /// through [`MapManager::remove_keyframe`] first.
    /// Its graph node is created here so the node set mirrors the keyframe set.
    pub fn add_keyframe(&self, keyframe: impl Into<Arc<KeyFrame>>) -> Result<KeyFrameId> {
        let keyframe = keyframe.into();
        let id = keyframe.id;
        if keyframe.num_map_points() > 0 {
            return Err(MapError::InvalidArgument(format!(
                "{} already carries {} point associations",
                id,
                keyframe.num_map_points()
            )));
        }

        {
            let mut table = self.keyframes.write();
            if table.is_exist_keyframe(id) {
                return Err(MapError::InvalidArgument(format!(
                    "{} is already in the map",
                    id
                )));
            }
            table.add_keyframe(Arc::clone(&keyframe));
        }
        self.graph.add_node(id);
        self.retriever.add_keyframe(&keyframe)?;
        debug!("[MapManager] Added keyframe {}", id);
        Ok(id)
    }

    /// Remove a keyframe and everything that only existed through it.
    ///
    /// 1. Drop the keyframe from every point it observes; points left with
    ///    fewer than two observers are deleted.
    /// 2. Suppress the graph node (and its incident edges).
    /// 3. Unregister from the retrieval index.
    /// 4. Remove from the keyframe store.
    ///
    /// Returns the number of cascade-deleted points.
    pub fn remove_keyframe(&self, id: KeyFrameId) -> Result<usize> {
        let keyframe = self.keyframes.get_keyframe(id)?;

        let mut observed: Vec<MapPointId> = keyframe.get_map_point_indices().map(|(_, mp)| mp).collect();
        observed.sort_unstable();
        observed.dedup();

        let mut cascaded = 0;
        for mp_id in observed {
            let remaining = match self.points.update_point(mp_id, |p| {
                p.remove_visibility(id);
                p.num_observations()
            }) {
                Ok(n) => n,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };

            if remaining < 2 {
                match self.remove_cloud_point(mp_id) {
                    Ok(()) => cascaded += 1,
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
            }
        }

        self.graph.suppress_node(id);
        self.retriever.suppress_keyframe(id)?;
        self.keyframes.suppress_keyframe(id);

        debug!(
            "[MapManager] Removed keyframe {} ({} points cascaded)",
            id, cascaded
        );
        Ok(cascaded)
    }

    /// Rewrite many poses under one keyframe-store lock.
    ///
    /// Unknown ids are skipped. Returns the number of updated keyframes.
    pub fn update_keyframe_poses(&self, poses: &[(KeyFrameId, SE3)]) -> usize {
        let mut table = self.keyframes.write();
        poses
            .iter()
            .filter(|(id, pose)| table.update_keyframe(*id, |kf| kf.pose = *pose).is_ok())
            .count()
    }

    /// Candidate keyframes similar to `query`, best first.
    pub fn retrieve(&self, query: KeyFrameId, max_results: usize) -> Result<Vec<KeyFrameId>> {
        let keyframe = self.keyframes.get_keyframe(query)?;
        self.retriever.retrieve(&keyframe, max_results)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Points
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a point and mirror its visibility into the keyframes and graph.
    ///
    /// Visibility entries naming an unknown keyframe, an out-of-range keypoint,
    /// or a keypoint already bound to another point are dropped before
    /// insertion. Inserting an id that already exists replaces the old point
    /// after removing its associations.
    pub fn add_cloud_point(&self, point: MapPoint) -> Result<MapPointId> {
        let mut point = point;
        let id = point.id;

        if self.points.is_exist_point(id) {
            self.remove_cloud_point(id)?;
        }

        let rejected: Vec<KeyFrameId> = point
            .visibility()
            .iter()
            .filter(|&(&kf_id, &kp_idx)| !self.can_bind(kf_id, kp_idx, id))
            .map(|(&kf_id, _)| kf_id)
            .collect();
        for kf_id in &rejected {
            point.remove_visibility(*kf_id);
        }
        if !rejected.is_empty() {
            warn!(
                "[MapManager] {}: dropped {} visibility entries that could not be bound",
                id,
                rejected.len()
            );
        }

        let observations: Vec<(KeyFrameId, usize)> = {
            let mut obs: Vec<_> = point.visibility().iter().map(|(&k, &i)| (k, i)).collect();
            obs.sort_unstable();
            obs
        };

        self.points.add_point(point);

        let mut observers = Vec::with_capacity(observations.len());
        for (kf_id, kp_idx) in observations {
            match self.bind_keypoint(kf_id, kp_idx, id) {
                Ok(true) => observers.push(kf_id),
                Ok(false) => {
                    // Keypoint taken by a concurrent insert.
                    warn!(
                        "[MapManager] {}: keypoint {} of {} was bound concurrently",
                        id, kp_idx, kf_id
                    );
                    self.unbind_point_side(id, kf_id, kp_idx);
                }
                Err(e) if e.is_not_found() => {
                    // Keyframe removed concurrently.
                    self.unbind_point_side(id, kf_id, kp_idx);
                }
                Err(e) => return Err(e),
            }
        }

        for (i, &a) in observers.iter().enumerate() {
            for &b in &observers[i + 1..] {
                self.graph.increase_edge(a, b, 1.0)?;
            }
        }

        self.refresh_view_direction(id);
        Ok(id)
    }

    pub fn add_cloud_points(&self, points: impl IntoIterator<Item = MapPoint>) -> Result<usize> {
        let mut added = 0;
        for point in points {
            self.add_cloud_point(point)?;
            added += 1;
        }
        Ok(added)
    }

    /// Remove a point: keyframe-side entries first, then the edge weights it
    /// contributed, then the point itself.
    pub fn remove_cloud_point(&self, id: MapPointId) -> Result<()> {
        let point = self.points.get_point(id)?;

        for (&kf_id, &kp_idx) in point.visibility() {
            let _ = self.keyframes.update_keyframe(kf_id, |kf| {
                if kf.get_map_point(kp_idx) == Some(id) {
                    kf.erase_map_point(kp_idx);
                }
            });
        }

        let observers = point.observers();
        for (i, &a) in observers.iter().enumerate() {
            for &b in &observers[i + 1..] {
                if let Err(e) = self.graph.decrease_edge(a, b, 1.0) {
                    debug!("[MapManager] {}: edge {}-{} not decreased: {}", id, a, b, e);
                }
            }
        }

        self.points.suppress_point(id);
        Ok(())
    }

    /// Record that keyframe `kf_id` observes point `mp_id` at keypoint `kp_idx`.
    ///
    /// Re-adding an identical observation is a no-op.
    pub fn add_observation(&self, mp_id: MapPointId, kf_id: KeyFrameId, kp_idx: usize) -> Result<()> {
        let others = self.points.update_point(mp_id, |p| match p.keypoint_in(kf_id) {
            Some(existing) => Err(existing),
            None => {
                let others = p.observers();
                p.add_visibility(kf_id, kp_idx);
                Ok(others)
            }
        })?;
        let others = match others {
            Ok(others) => others,
            Err(existing) if existing == kp_idx => return Ok(()),
            Err(existing) => {
                return Err(MapError::InvalidArgument(format!(
                    "{} already observes {} at keypoint {}",
                    kf_id, mp_id, existing
                )))
            }
        };

        match self.bind_keypoint(kf_id, kp_idx, mp_id) {
            Ok(true) => {}
            Ok(false) => {
                self.unbind_point_side(mp_id, kf_id, kp_idx);
                return Err(MapError::InvalidArgument(format!(
                    "keypoint {} of {} cannot be bound to {}",
                    kp_idx, kf_id, mp_id
                )));
            }
            Err(e) => {
                self.unbind_point_side(mp_id, kf_id, kp_idx);
                return Err(e);
            }
        }

        for other in others {
            self.graph.increase_edge(kf_id, other, 1.0)?;
        }
        Ok(())
    }

    /// Drop one observation. Deletes the point if fewer than two observers
    /// remain; returns true in that case.
    pub fn remove_observation(&self, mp_id: MapPointId, kf_id: KeyFrameId) -> Result<bool> {
        let kp_idx = self
            .points
            .update_point(mp_id, |p| p.remove_visibility(kf_id))?
            .ok_or_else(|| {
                MapError::InvalidArgument(format!("{} does not observe {}", kf_id, mp_id))
            })?;

        let _ = self.keyframes.update_keyframe(kf_id, |kf| {
            if kf.get_map_point(kp_idx) == Some(mp_id) {
                kf.erase_map_point(kp_idx);
            }
        });

        let remaining = self.points.get_point(mp_id)?.observers();
        for &other in &remaining {
            if let Err(e) = self.graph.decrease_edge(kf_id, other, 1.0) {
                debug!("[MapManager] {}: edge {}-{} not decreased: {}", mp_id, kf_id, other, e);
            }
        }

        if remaining.len() < 2 {
            self.remove_cloud_point(mp_id)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Merge `duplicate` into `keep` (loop closure fusion).
    ///
    /// Observations of `duplicate` from keyframes that do not already see
    /// `keep` are transferred; `duplicate` is removed. Returns the number of
    /// transferred observations.
    pub fn fuse_points(&self, keep: MapPointId, duplicate: MapPointId) -> Result<usize> {
        if keep == duplicate {
            return Err(MapError::InvalidArgument(format!(
                "cannot fuse {} into itself",
                keep
            )));
        }
        let kept = self.points.get_point(keep)?;
        let dup = self.points.get_point(duplicate)?;

        let mut transfers: Vec<(KeyFrameId, usize)> = dup
            .visibility()
            .iter()
            .filter(|(kf_id, _)| !kept.is_observed_by(**kf_id))
            .map(|(&kf_id, &kp_idx)| (kf_id, kp_idx))
            .collect();
        transfers.sort_unstable();

        self.remove_cloud_point(duplicate)?;

        let mut moved = 0;
        for (kf_id, kp_idx) in transfers {
            match self.add_observation(keep, kf_id, kp_idx) {
                Ok(()) => moved += 1,
                Err(e) => warn!(
                    "[MapManager] Fuse {} -> {}: observation from {} lost: {}",
                    duplicate, keep, kf_id, e
                ),
            }
        }
        if moved > 0 {
            self.refresh_view_direction(keep);
        }
        Ok(moved)
    }

    /// Fold a tracking outcome into a point's confidence.
    pub fn update_point_confidence(&self, id: MapPointId, is_inlier: bool) -> Result<f64> {
        let step = self.config.confidence_step;
        self.points.update_point(id, |p| {
            p.update_confidence(is_inlier, step);
            p.confidence
        })
    }

    /// Rewrite many positions under one point-store lock.
    pub fn update_point_positions(&self, positions: &[(MapPointId, Vector3<f64>)]) -> usize {
        let mut table = self.points.write();
        positions
            .iter()
            .filter(|(id, pos)| table.update_point(*id, |p| p.position = *pos).is_ok())
            .count()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Local map
    // ─────────────────────────────────────────────────────────────────────────

    /// Points seen by `kf_id` and by its neighbors heavier than
    /// `min_weight_neighbor`, sorted by id.
    ///
    /// A visibility entry whose point is missing from the store is stale; it
    /// is removed from every local keyframe that still carries it.
    pub fn get_local_point_cloud(
        &self,
        kf_id: KeyFrameId,
        min_weight_neighbor: f64,
    ) -> Result<Vec<Arc<MapPoint>>> {
        let keyframe = self.keyframes.get_keyframe(kf_id)?;
        let neighbors = match self.graph.get_neighbors(kf_id, min_weight_neighbor) {
            Ok(n) => n,
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => return Err(e),
        };

        let mut local = vec![keyframe];
        for id in neighbors {
            // A neighbor may be removed between the graph and store reads.
            if let Ok(kf) = self.keyframes.get_keyframe(id) {
                local.push(kf);
            }
        }

        let mut referenced: BTreeMap<MapPointId, Vec<(KeyFrameId, usize)>> = BTreeMap::new();
        for kf in &local {
            for (kp_idx, mp_id) in kf.get_map_point_indices() {
                referenced.entry(mp_id).or_default().push((kf.id, kp_idx));
            }
        }

        let mut cloud = Vec::with_capacity(referenced.len());
        let mut repaired = 0;
        for (mp_id, refs) in referenced {
            match self.points.get_point(mp_id) {
                Ok(point) => cloud.push(point),
                Err(e) if e.is_not_found() => {
                    for (ref_kf, kp_idx) in refs {
                        let _ = self.keyframes.update_keyframe(ref_kf, |kf| {
                            if kf.get_map_point(kp_idx) == Some(mp_id) {
                                kf.erase_map_point(kp_idx);
                            }
                        });
                        repaired += 1;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        if repaired > 0 {
            warn!(
                "[MapManager] Local map of {}: removed {} stale visibility entries",
                kf_id, repaired
            );
        }
        Ok(cloud)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Pruning
    // ─────────────────────────────────────────────────────────────────────────

    /// Remove invalid, badly reprojected or low-confidence points among
    /// `candidates` (all points when `None`). Returns the removal count.
    pub fn point_cloud_pruning(&self, candidates: Option<&[MapPointId]>) -> usize {
        let ids = match candidates {
            Some(ids) => ids.to_vec(),
            None => self.points.point_ids(),
        };

        let max_error = self.config.reprojection_error_threshold;
        let min_confidence = self.config.confidence_threshold;
        let mut removed = 0;
        for id in ids {
            let Ok(point) = self.points.get_point(id) else {
                continue;
            };
            if point.should_prune(max_error, min_confidence) && self.remove_cloud_point(id).is_ok() {
                removed += 1;
            }
        }

        if removed > 0 {
            info!(
                "[Pruning] Removed {} points (remaining: {})",
                removed,
                self.points.nb_points()
            );
        }
        removed
    }

    /// Remove redundant keyframes among `candidates` (all when `None`).
    ///
    /// A keyframe is redundant when every point it observes has at least
    /// `min_observers_per_point` observers and the fraction of its points
    /// seen by at least `redundant_observers` keyframes exceeds
    /// `redundancy_ratio`. The anchor keyframe is never removed. Candidates are
    /// evaluated one at a time in ascending id order, each against the map as
    /// left by the previous removals.
    pub fn keyframe_pruning(&self, candidates: Option<&[KeyFrameId]>) -> usize {
        let mut ids = match candidates {
            Some(ids) => ids.to_vec(),
            None => self.keyframes.keyframe_ids(),
        };
        ids.sort_unstable();
        ids.dedup();

        let mut removed = 0;
        for id in ids {
            if id.is_anchor() || !self.is_redundant(id) {
                continue;
            }
            match self.remove_keyframe(id) {
                Ok(_) => removed += 1,
                Err(e) => debug!("[Pruning] Keyframe {} not removed: {}", id, e),
            }
        }

        if removed > 0 {
            info!(
                "[Pruning] Removed {} redundant keyframes (remaining: {})",
                removed,
                self.keyframes.nb_keyframes()
            );
        }
        removed
    }

    fn is_redundant(&self, id: KeyFrameId) -> bool {
        let Ok(keyframe) = self.keyframes.get_keyframe(id) else {
            return false;
        };

        let mut total = 0usize;
        let mut redundant = 0usize;
        for (_, mp_id) in keyframe.get_map_point_indices() {
            let Ok(point) = self.points.get_point(mp_id) else {
                continue;
            };
            let observers = point.num_observations();
            if observers < self.config.min_observers_per_point {
                return false;
            }
            total += 1;
            if observers >= self.config.redundant_observers {
                redundant += 1;
            }
        }

        total > 0 && redundant as f64 / total as f64 > self.config.redundancy_ratio
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Persistence
    // ─────────────────────────────────────────────────────────────────────────

    /// Write the whole map into `dir`, one file per component, in the order
    /// identification, coordinate system, points, keyframes, graph, retrieval
    /// index.
    pub fn save_to_file(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir).map_err(|source| MapError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let files = &self.config.files;

        self.identification()
            .save_to_file(&dir.join(&files.identification))?;
        self.coordinate_system()
            .save_to_file(&dir.join(&files.coordinate_system))?;
        self.points.save_to_file(&dir.join(&files.point_cloud))?;
        self.keyframes.save_to_file(&dir.join(&files.keyframes))?;
        self.graph.save_to_file(&dir.join(&files.covisibility_graph))?;
        self.retriever.save_to_file(&dir.join(&files.retrieval_index))?;

        info!(
            "[MapManager] Saved map to {} ({} keyframes, {} points)",
            dir.display(),
            self.nb_keyframes(),
            self.nb_points()
        );
        Ok(())
    }

    /// Restore a map written by [`MapManager::save_to_file`].
    ///
    /// Steps run in the save order and the first failure aborts the rest;
    /// nothing is rolled back. Stores are loaded in place, so every component
    /// sharing them observes the loaded content.
    pub fn load_from_file(&self, dir: &Path) -> Result<()> {
        let files = &self.config.files;

        let identification = MapIdentification::load_from_file(&dir.join(&files.identification))?;
        self.set_identification(identification);
        let coordinate_system = CoordinateSystem::load_from_file(&dir.join(&files.coordinate_system))?;
        self.set_coordinate_system(coordinate_system);
        self.points.load_from_file(&dir.join(&files.point_cloud))?;
        self.keyframes.load_from_file(&dir.join(&files.keyframes))?;
        self.graph.load_from_file(&dir.join(&files.covisibility_graph))?;
        self.retriever.load_from_file(&dir.join(&files.retrieval_index))?;

        info!(
            "[MapManager] Loaded map from {} ({} keyframes, {} points, {} edges)",
            dir.display(),
            self.nb_keyframes(),
            self.nb_points(),
            self.graph.nb_edges()
        );
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Consistency
    // ─────────────────────────────────────────────────────────────────────────

    /// Check the cross-store invariants on a snapshot of the three stores.
    ///
    /// Returns one message per violation; empty when the map is consistent.
    /// Only meaningful while no writer is active.
    pub fn check_consistency(&self) -> Vec<String> {
        let points = self.points.get_all_points();
        let keyframes = self.keyframes.get_all_keyframes();
        let graph = self.graph.read().clone();

        let mut violations = Vec::new();
        let kf_by_id: BTreeMap<KeyFrameId, &Arc<KeyFrame>> =
            keyframes.iter().map(|kf| (kf.id, kf)).collect();
        let point_by_id: BTreeMap<MapPointId, &Arc<MapPoint>> =
            points.iter().map(|p| (p.id, p)).collect();

        for point in &points {
            for (&kf_id, &kp_idx) in point.visibility() {
                match kf_by_id.get(&kf_id) {
                    Some(kf) if kf.get_map_point(kp_idx) == Some(point.id) => {}
                    Some(_) => violations.push(format!(
                        "{} sees {} at {} but the keyframe disagrees",
                        point.id, kf_id, kp_idx
                    )),
                    None => violations.push(format!("{} references missing {}", point.id, kf_id)),
                }
            }
        }

        for kf in &keyframes {
            for (kp_idx, mp_id) in kf.get_map_point_indices() {
                match point_by_id.get(&mp_id) {
                    Some(p) if p.keypoint_in(kf.id) == Some(kp_idx) => {}
                    Some(_) => violations.push(format!(
                        "{} binds {} to {} but the point disagrees",
                        kf.id, kp_idx, mp_id
                    )),
                    None => violations.push(format!("{} references missing {}", kf.id, mp_id)),
                }
            }
            if !graph.has_node(kf.id) {
                violations.push(format!("{} has no graph node", kf.id));
            }
        }

        for node in graph.get_all_nodes() {
            if !kf_by_id.contains_key(&node) {
                violations.push(format!("graph node {} has no keyframe", node));
            }
        }

        let mut expected: BTreeMap<(KeyFrameId, KeyFrameId), f64> = BTreeMap::new();
        for point in &points {
            let observers = point.observers();
            for (i, &a) in observers.iter().enumerate() {
                for &b in &observers[i + 1..] {
                    *expected.entry((a, b)).or_insert(0.0) += 1.0;
                }
            }
        }
        let actual: BTreeMap<(KeyFrameId, KeyFrameId), f64> =
            graph.edges().into_iter().map(|(a, b, w)| ((a, b), w)).collect();
        if expected != actual {
            for (pair, w) in &expected {
                let got = actual.get(pair).copied().unwrap_or(0.0);
                if got != *w {
                    violations.push(format!(
                        "edge {}-{}: weight {} but {} shared points",
                        pair.0, pair.1, got, w
                    ));
                }
            }
            for (pair, w) in &actual {
                if !expected.contains_key(pair) {
                    violations.push(format!(
                        "edge {}-{}: weight {} but no shared point",
                        pair.0, pair.1, w
                    ));
                }
            }
        }

        violations
    }

    /// Whether keypoint `kp_idx` of `kf_id` can carry `mp_id`. Advisory only:
    /// the binding itself is decided by [`MapManager::bind_keypoint`].
    fn can_bind(&self, kf_id: KeyFrameId, kp_idx: usize, mp_id: MapPointId) -> bool {
        self.keyframes
            .get_keyframe(kf_id)
            .map_or(false, |kf| kf.can_bind(kp_idx, mp_id))
    }

    /// Bind keypoint `kp_idx` of `kf_id` to `mp_id` if the slot is free,
    /// checked and written under one keyframe-store lock.
    fn bind_keypoint(&self, kf_id: KeyFrameId, kp_idx: usize, mp_id: MapPointId) -> Result<bool> {
        let mut table = self.keyframes.write();
        if !table.get_keyframe(kf_id)?.can_bind(kp_idx, mp_id) {
            return Ok(false);
        }
        table.update_keyframe(kf_id, |kf| kf.bind_map_point(kp_idx, mp_id))
    }

    /// Drop `(kf_id, kp_idx)` from the point side after a refused binding.
    fn unbind_point_side(&self, mp_id: MapPointId, kf_id: KeyFrameId, kp_idx: usize) {
        let _ = self.points.update_point(mp_id, |p| {
            if p.keypoint_in(kf_id) == Some(kp_idx) {
                p.remove_visibility(kf_id);
            }
        });
    }

    /// Recompute the mean viewing direction of `id` from its observers.
    fn refresh_view_direction(&self, id: MapPointId) {
        let Ok(point) = self.points.get_point(id) else {
            return;
        };
        let centers: Vec<Vector3<f64>> = point
            .observers()
            .into_iter()
            .filter_map(|kf_id| self.keyframes.get_keyframe(kf_id).ok())
            .map(|kf| kf.camera_center())
            .collect();
        let _ = self
            .points
            .update_point(id, |p| p.update_view_direction(centers.iter()));
    }
}

impl Default for MapManager {
    fn default() -> Self {
        Self::new(MapConfig::default())
    }
}

impl std::fmt::Debug for MapManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapManager")
            .field("num_keyframes", &self.nb_keyframes())
            .field("num_points", &self.nb_points())
            .field("num_edges", &self.graph.nb_edges())
            .finish()
    }
}
