//! Covisibility graph - weighted undirected graph over keyframe ids.
//!
//! The weight of edge `(a, b)` is the number of map points observed by both
//! keyframes. The map manager keeps it in step with the point and keyframe
//! stores; the graph itself knows nothing about either.
//!
//! Besides the mutation primitives the graph answers the queries that local
//! mapping and loop closing run over it:
//! - ranked neighbor lists (descending weight)
//! - hop-count shortest paths
//! - minimum / maximum spanning forests
//!
//! Adjacency is kept in ordered sets so traversal order, and therefore every
//! query result, is deterministic for a given graph.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt::Write as _;
use std::path::Path;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::atlas::archive;
use crate::atlas::map::KeyFrameId;
use crate::error::{MapError, Result};

const ARCHIVE_FORMAT: &str = "covisibility_graph";

/// Edge weight. Integral when it counts shared points, fractional weights
/// are accepted for callers that feed their own edges.
pub type EdgeWeight = f64;

/// Unordered node pair, stored smaller id first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct EdgeKey(KeyFrameId, KeyFrameId);

impl EdgeKey {
    fn new(a: KeyFrameId, b: KeyFrameId) -> Self {
        if a <= b {
            Self(a, b)
        } else {
            Self(b, a)
        }
    }
}

/// One edge of a spanning forest.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForestEdge {
    pub a: KeyFrameId,
    pub b: KeyFrameId,
    pub weight: EdgeWeight,
}

/// Result of a spanning forest computation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpanningForest {
    pub edges: Vec<ForestEdge>,
    pub total_weight: EdgeWeight,
}

#[derive(Serialize, Deserialize)]
struct GraphArchive {
    nodes: Vec<KeyFrameId>,
    adjacency: Vec<(KeyFrameId, Vec<KeyFrameId>)>,
    weights: Vec<(KeyFrameId, KeyFrameId, EdgeWeight)>,
}

/// Unlocked graph table. Reachable only through a [`CovisibilityGraph`] guard.
#[derive(Debug, Default, Clone)]
pub struct GraphTable {
    /// Node set and adjacency in one: every node has an entry, possibly empty.
    adjacency: BTreeMap<KeyFrameId, BTreeSet<KeyFrameId>>,
    weights: HashMap<EdgeKey, EdgeWeight>,
}

impl GraphTable {
    // ─────────────────────────────────────────────────────────────────────────
    // Mutation
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a node. Adding an existing node is a no-op.
    pub fn add_node(&mut self, id: KeyFrameId) {
        self.adjacency.entry(id).or_default();
    }

    /// Add `weight` to edge `(a, b)`, creating the nodes and the edge as needed.
    ///
    /// A zero increment only creates the nodes: an edge always carries a
    /// positive weight.
    pub fn increase_edge(&mut self, a: KeyFrameId, b: KeyFrameId, weight: EdgeWeight) -> Result<()> {
        check_edge_args(a, b, weight)?;
        self.add_node(a);
        self.add_node(b);
        if weight == 0.0 {
            return Ok(());
        }
        *self.weights.entry(EdgeKey::new(a, b)).or_insert(0.0) += weight;
        self.link(a, b);
        Ok(())
    }

    /// Subtract `weight` from edge `(a, b)`.
    ///
    /// The edge is removed once the result would not be positive.
    pub fn decrease_edge(&mut self, a: KeyFrameId, b: KeyFrameId, weight: EdgeWeight) -> Result<()> {
        check_edge_args(a, b, weight)?;
        self.check_nodes(a, b)?;
        let key = EdgeKey::new(a, b);
        let current = self
            .weights
            .get(&key)
            .copied()
            .ok_or(MapError::EdgeNotFound(a, b))?;

        let remaining = current - weight;
        if remaining <= 0.0 {
            self.weights.remove(&key);
            self.unlink(a, b);
        } else {
            self.weights.insert(key, remaining);
        }
        Ok(())
    }

    pub fn remove_edge(&mut self, a: KeyFrameId, b: KeyFrameId) -> Result<()> {
        self.check_nodes(a, b)?;
        self.weights
            .remove(&EdgeKey::new(a, b))
            .ok_or(MapError::EdgeNotFound(a, b))?;
        self.unlink(a, b);
        Ok(())
    }

    /// Remove a node with all its incident edges.
    ///
    /// Returns false if the node was absent.
    pub fn suppress_node(&mut self, id: KeyFrameId) -> bool {
        let Some(neighbors) = self.adjacency.remove(&id) else {
            return false;
        };
        for other in neighbors {
            self.weights.remove(&EdgeKey::new(id, other));
            if let Some(set) = self.adjacency.get_mut(&other) {
                set.remove(&id);
            }
        }
        true
    }

    pub fn clear(&mut self) {
        self.adjacency.clear();
        self.weights.clear();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    pub fn has_node(&self, id: KeyFrameId) -> bool {
        self.adjacency.contains_key(&id)
    }

    pub fn is_edge(&self, a: KeyFrameId, b: KeyFrameId) -> Result<bool> {
        self.check_nodes(a, b)?;
        Ok(self.weights.contains_key(&EdgeKey::new(a, b)))
    }

    pub fn get_edge(&self, a: KeyFrameId, b: KeyFrameId) -> Result<EdgeWeight> {
        self.check_nodes(a, b)?;
        self.weights
            .get(&EdgeKey::new(a, b))
            .copied()
            .ok_or(MapError::EdgeNotFound(a, b))
    }

    /// Weight of `(a, b)`, 0 when the edge or either node is absent.
    pub fn weight(&self, a: KeyFrameId, b: KeyFrameId) -> EdgeWeight {
        self.weights.get(&EdgeKey::new(a, b)).copied().unwrap_or(0.0)
    }

    /// Neighbors joined by an edge heavier than `min_weight`, heaviest first.
    pub fn get_neighbors(&self, id: KeyFrameId, min_weight: EdgeWeight) -> Result<Vec<KeyFrameId>> {
        Ok(self
            .get_weighted_neighbors(id, min_weight)?
            .into_iter()
            .map(|(n, _)| n)
            .collect())
    }

    /// Same as [`GraphTable::get_neighbors`] with the weights attached.
    /// Ties are broken by ascending id.
    pub fn get_weighted_neighbors(
        &self,
        id: KeyFrameId,
        min_weight: EdgeWeight,
    ) -> Result<Vec<(KeyFrameId, EdgeWeight)>> {
        let neighbors = self.adjacency.get(&id).ok_or(MapError::NodeNotFound(id))?;
        let mut ranked: Vec<(KeyFrameId, EdgeWeight)> = neighbors
            .iter()
            .map(|&n| (n, self.weight(id, n)))
            .filter(|&(_, w)| w > min_weight)
            .collect();
        ranked.sort_by(|x, y| y.1.total_cmp(&x.1).then(x.0.cmp(&y.0)));
        Ok(ranked)
    }

    /// Path from `from` to `to` (both included) with the fewest hops.
    ///
    /// Edge weights are ignored. The search runs breadth-first from `to`,
    /// recording for every reached node its successor towards `to`, then walks
    /// those successors starting at `from`.
    pub fn get_shortest_path(&self, from: KeyFrameId, to: KeyFrameId) -> Result<Vec<KeyFrameId>> {
        self.check_nodes(from, to)?;
        if from == to {
            return Ok(vec![from]);
        }

        let mut next_hop: HashMap<KeyFrameId, KeyFrameId> = HashMap::new();
        let mut queue = VecDeque::from([to]);
        next_hop.insert(to, to);

        'search: while let Some(current) = queue.pop_front() {
            for &n in &self.adjacency[&current] {
                if next_hop.contains_key(&n) {
                    continue;
                }
                next_hop.insert(n, current);
                if n == from {
                    break 'search;
                }
                queue.push_back(n);
            }
        }

        if !next_hop.contains_key(&from) {
            return Err(MapError::Unreachable { from, to });
        }

        let mut path = vec![from];
        let mut current = from;
        while current != to {
            current = next_hop[&current];
            path.push(current);
        }
        Ok(path)
    }

    /// Minimum-weight spanning forest (one tree per connected component).
    pub fn minimal_spanning_tree(&self) -> SpanningForest {
        self.spanning_forest(false)
    }

    /// Maximum-weight spanning forest, computed as the minimal forest over
    /// negated weights.
    pub fn maximal_spanning_tree(&self) -> SpanningForest {
        self.spanning_forest(true)
    }

    pub fn get_all_nodes(&self) -> Vec<KeyFrameId> {
        self.adjacency.keys().copied().collect()
    }

    pub fn nb_nodes(&self) -> usize {
        self.adjacency.len()
    }

    pub fn nb_edges(&self) -> usize {
        self.weights.len()
    }

    /// All edges, ordered by endpoints.
    pub fn edges(&self) -> Vec<(KeyFrameId, KeyFrameId, EdgeWeight)> {
        let mut edges: Vec<_> = self
            .weights
            .iter()
            .map(|(k, &w)| (k.0, k.1, w))
            .collect();
        edges.sort_by(|x, y| (x.0, x.1).cmp(&(y.0, y.1)));
        edges
    }

    /// Human-readable dump: one line per node with its weighted neighbors.
    pub fn dump(&self) -> String {
        let mut out = format!(
            "covisibility graph: {} nodes, {} edges\n",
            self.nb_nodes(),
            self.nb_edges()
        );
        for (id, neighbors) in &self.adjacency {
            let _ = write!(out, "  {} ->", id);
            for &n in neighbors {
                let _ = write!(out, " {}({})", n, self.weight(*id, n));
            }
            out.push('\n');
        }
        out
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────────

    fn check_nodes(&self, a: KeyFrameId, b: KeyFrameId) -> Result<()> {
        if !self.has_node(a) {
            return Err(MapError::NodeNotFound(a));
        }
        if !self.has_node(b) {
            return Err(MapError::NodeNotFound(b));
        }
        Ok(())
    }

    fn link(&mut self, a: KeyFrameId, b: KeyFrameId) {
        self.adjacency.entry(a).or_default().insert(b);
        self.adjacency.entry(b).or_default().insert(a);
    }

    fn unlink(&mut self, a: KeyFrameId, b: KeyFrameId) {
        if let Some(set) = self.adjacency.get_mut(&a) {
            set.remove(&b);
        }
        if let Some(set) = self.adjacency.get_mut(&b) {
            set.remove(&a);
        }
    }

    /// Kruskal over all edges. With `negate`, weights are flipped for the
    /// ordering and the reported total is flipped back.
    fn spanning_forest(&self, negate: bool) -> SpanningForest {
        let sign = if negate { -1.0 } else { 1.0 };
        let mut candidates: Vec<(EdgeWeight, EdgeKey)> = self
            .weights
            .iter()
            .map(|(&k, &w)| (sign * w, k))
            .collect();
        candidates.sort_by(|x, y| x.0.total_cmp(&y.0).then(x.1.cmp(&y.1)));

        let index: HashMap<KeyFrameId, usize> = self
            .adjacency
            .keys()
            .enumerate()
            .map(|(i, &id)| (id, i))
            .collect();
        let mut sets = DisjointSets::new(index.len());

        let mut forest = SpanningForest::default();
        let mut signed_total = 0.0;
        for (signed, key) in candidates {
            if sets.union(index[&key.0], index[&key.1]) {
                signed_total += signed;
                forest.edges.push(ForestEdge {
                    a: key.0,
                    b: key.1,
                    weight: sign * signed,
                });
            }
        }
        forest.total_weight = sign * signed_total;
        forest
    }

    fn to_archive(&self) -> GraphArchive {
        GraphArchive {
            nodes: self.get_all_nodes(),
            adjacency: self
                .adjacency
                .iter()
                .map(|(&id, set)| (id, set.iter().copied().collect()))
                .collect(),
            weights: self.edges(),
        }
    }

    fn from_archive(archive: GraphArchive) -> std::result::Result<Self, String> {
        let mut table = GraphTable::default();
        for id in archive.nodes {
            table.add_node(id);
        }
        for (a, b, w) in archive.weights {
            if !table.has_node(a) || !table.has_node(b) {
                return Err(format!("edge ({}, {}) references an unknown node", a, b));
            }
            table.increase_edge(a, b, w).map_err(|e| e.to_string())?;
        }
        for (id, neighbors) in archive.adjacency {
            let rebuilt = table.adjacency.get(&id);
            let stored: BTreeSet<KeyFrameId> = neighbors.into_iter().collect();
            if rebuilt != Some(&stored) {
                return Err(format!("adjacency of {} disagrees with the weight table", id));
            }
        }
        Ok(table)
    }
}

fn check_edge_args(a: KeyFrameId, b: KeyFrameId, weight: EdgeWeight) -> Result<()> {
    if a == b {
        return Err(MapError::SelfLoop(a));
    }
    if !weight.is_finite() || weight < 0.0 {
        return Err(MapError::InvalidArgument(format!(
            "edge weight must be finite and non-negative, got {}",
            weight
        )));
    }
    Ok(())
}

/// Union-find with path halving and union by size.
struct DisjointSets {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl DisjointSets {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            size: vec![1; n],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    /// Merge the sets of `a` and `b`. False if they were already joined.
    fn union(&mut self, a: usize, b: usize) -> bool {
        let (mut ra, mut rb) = (self.find(a), self.find(b));
        if ra == rb {
            return false;
        }
        if self.size[ra] < self.size[rb] {
            std::mem::swap(&mut ra, &mut rb);
        }
        self.parent[rb] = ra;
        self.size[ra] += self.size[rb];
        true
    }
}

/// Thread-safe covisibility graph.
#[derive(Default)]
pub struct CovisibilityGraph {
    table: RwLock<GraphTable>,
}

impl CovisibilityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, GraphTable> {
        self.table.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, GraphTable> {
        self.table.write()
    }

    pub fn add_node(&self, id: KeyFrameId) {
        self.table.write().add_node(id);
    }

    pub fn increase_edge(&self, a: KeyFrameId, b: KeyFrameId, weight: EdgeWeight) -> Result<()> {
        self.table.write().increase_edge(a, b, weight)
    }

    /// Apply a batch of increments under a single lock.
    ///
    /// The batch is validated first; on error nothing is applied.
    pub fn increase_edges(&self, updates: &[(KeyFrameId, KeyFrameId, EdgeWeight)]) -> Result<()> {
        for &(a, b, w) in updates {
            check_edge_args(a, b, w)?;
        }
        let mut table = self.table.write();
        for &(a, b, w) in updates {
            table.increase_edge(a, b, w)?;
        }
        Ok(())
    }

    pub fn decrease_edge(&self, a: KeyFrameId, b: KeyFrameId, weight: EdgeWeight) -> Result<()> {
        self.table.write().decrease_edge(a, b, weight)
    }

    pub fn remove_edge(&self, a: KeyFrameId, b: KeyFrameId) -> Result<()> {
        self.table.write().remove_edge(a, b)
    }

    pub fn suppress_node(&self, id: KeyFrameId) -> bool {
        self.table.write().suppress_node(id)
    }

    pub fn has_node(&self, id: KeyFrameId) -> bool {
        self.table.read().has_node(id)
    }

    pub fn is_edge(&self, a: KeyFrameId, b: KeyFrameId) -> Result<bool> {
        self.table.read().is_edge(a, b)
    }

    pub fn get_edge(&self, a: KeyFrameId, b: KeyFrameId) -> Result<EdgeWeight> {
        self.table.read().get_edge(a, b)
    }

    pub fn weight(&self, a: KeyFrameId, b: KeyFrameId) -> EdgeWeight {
        self.table.read().weight(a, b)
    }

    pub fn get_neighbors(&self, id: KeyFrameId, min_weight: EdgeWeight) -> Result<Vec<KeyFrameId>> {
        self.table.read().get_neighbors(id, min_weight)
    }

    pub fn get_weighted_neighbors(
        &self,
        id: KeyFrameId,
        min_weight: EdgeWeight,
    ) -> Result<Vec<(KeyFrameId, EdgeWeight)>> {
        self.table.read().get_weighted_neighbors(id, min_weight)
    }

    pub fn get_shortest_path(&self, from: KeyFrameId, to: KeyFrameId) -> Result<Vec<KeyFrameId>> {
        self.table.read().get_shortest_path(from, to)
    }

    pub fn minimal_spanning_tree(&self) -> SpanningForest {
        self.table.read().minimal_spanning_tree()
    }

    pub fn maximal_spanning_tree(&self) -> SpanningForest {
        self.table.read().maximal_spanning_tree()
    }

    pub fn get_all_nodes(&self) -> Vec<KeyFrameId> {
        self.table.read().get_all_nodes()
    }

    pub fn nb_nodes(&self) -> usize {
        self.table.read().nb_nodes()
    }

    pub fn nb_edges(&self) -> usize {
        self.table.read().nb_edges()
    }

    pub fn edges(&self) -> Vec<(KeyFrameId, KeyFrameId, EdgeWeight)> {
        self.table.read().edges()
    }

    pub fn clear(&self) {
        self.table.write().clear();
    }

    pub fn dump(&self) -> String {
        self.table.read().dump()
    }

    /// Log the graph content at debug level.
    pub fn display(&self) {
        debug!("[CovisGraph] {}", self.dump());
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let payload = self.table.read().to_archive();
        archive::save(path, ARCHIVE_FORMAT, &payload)?;
        debug!(
            "[CovisGraph] Saved {} nodes / {} edges to {}",
            payload.nodes.len(),
            payload.weights.len(),
            path.display()
        );
        Ok(())
    }

    pub fn load_from_file(&self, path: &Path) -> Result<()> {
        let payload: GraphArchive = archive::load(path, ARCHIVE_FORMAT)?;
        let loaded = GraphTable::from_archive(payload).map_err(|reason| MapError::Corrupt {
            path: path.to_path_buf(),
            reason,
        })?;
        let mut table = self.table.write();
        *table = loaded;
        debug!(
            "[CovisGraph] Loaded {} nodes / {} edges from {}",
            table.nb_nodes(),
            table.nb_edges(),
            path.display()
        );
        Ok(())
    }
}

impl std::fmt::Debug for CovisibilityGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.table.read();
        f.debug_struct("CovisibilityGraph")
            .field("num_nodes", &table.nb_nodes())
            .field("num_edges", &table.nb_edges())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn kf(id: u64) -> KeyFrameId {
        KeyFrameId::new(id)
    }

    /// Reference graph used by the path and tree tests.
    fn sample_graph() -> CovisibilityGraph {
        let graph = CovisibilityGraph::new();
        let edges = [
            (1, 2, 2.0),
            (1, 3, 5.0),
            (2, 4, 4.0),
            (4, 3, 12.0),
            (4, 5, 9.0),
            (4, 8, 8.0),
            (5, 8, 1.0),
            (5, 6, 4.0),
            (5, 7, 5.0),
            (6, 7, 6.0),
            (8, 7, 20.0),
        ];
        for (a, b, w) in edges {
            graph.increase_edge(kf(a), kf(b), w).unwrap();
        }
        graph
    }

    #[test]
    fn test_add_node_is_idempotent() {
        let graph = CovisibilityGraph::new();
        graph.add_node(kf(1));
        graph.add_node(kf(1));
        assert_eq!(graph.get_all_nodes(), vec![kf(1)]);
    }

    #[test]
    fn test_increase_creates_nodes_and_accumulates() {
        let graph = CovisibilityGraph::new();
        graph.increase_edge(kf(1), kf(2), 1.0).unwrap();
        graph.increase_edge(kf(2), kf(1), 2.0).unwrap();

        assert_eq!(graph.nb_nodes(), 2);
        assert_eq!(graph.get_edge(kf(1), kf(2)).unwrap(), 3.0);
        assert_eq!(graph.get_edge(kf(2), kf(1)).unwrap(), 3.0);
        assert!(graph.is_edge(kf(1), kf(2)).unwrap());
    }

    #[test]
    fn test_self_edge_is_rejected() {
        let graph = CovisibilityGraph::new();
        let err = graph.increase_edge(kf(3), kf(3), 1.0).unwrap_err();
        assert!(matches!(err, MapError::SelfLoop(_)));
        assert_eq!(graph.nb_nodes(), 0);

        graph.add_node(kf(3));
        assert!(matches!(
            graph.decrease_edge(kf(3), kf(3), 1.0),
            Err(MapError::SelfLoop(_))
        ));
        assert!(matches!(
            graph.increase_edge(kf(3), kf(4), -1.0),
            Err(MapError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_zero_increase_creates_no_edge() {
        let graph = CovisibilityGraph::new();
        graph.increase_edge(kf(1), kf(2), 0.0).unwrap();

        assert_eq!(graph.nb_nodes(), 2);
        assert_eq!(graph.nb_edges(), 0);
        assert!(!graph.is_edge(kf(1), kf(2)).unwrap());
        assert!(graph.get_neighbors(kf(1), -1.0).unwrap().is_empty());

        graph.increase_edge(kf(1), kf(2), 2.0).unwrap();
        graph.increase_edge(kf(1), kf(2), 0.0).unwrap();
        assert_eq!(graph.get_edge(kf(1), kf(2)).unwrap(), 2.0);
    }

    #[test]
    fn test_decrease_subtracts_once() {
        let graph = CovisibilityGraph::new();
        graph.increase_edge(kf(1), kf(2), 3.0).unwrap();

        graph.decrease_edge(kf(1), kf(2), 1.0).unwrap();
        assert_eq!(graph.get_edge(kf(1), kf(2)).unwrap(), 2.0);

        graph.decrease_edge(kf(2), kf(1), 1.0).unwrap();
        assert_eq!(graph.get_edge(kf(1), kf(2)).unwrap(), 1.0);
    }

    #[test]
    fn test_decrease_removes_exhausted_edge() {
        let graph = CovisibilityGraph::new();
        graph.increase_edge(kf(1), kf(2), 2.0).unwrap();

        graph.decrease_edge(kf(1), kf(2), 5.0).unwrap();
        assert!(!graph.is_edge(kf(1), kf(2)).unwrap());
        // Nodes survive their last edge
        assert_eq!(graph.nb_nodes(), 2);
        assert!(graph.get_edge(kf(1), kf(2)).unwrap_err().is_not_found());
        assert!(graph.decrease_edge(kf(1), kf(2), 1.0).unwrap_err().is_not_found());
    }

    #[test]
    fn test_queries_on_missing_nodes() {
        let graph = CovisibilityGraph::new();
        graph.add_node(kf(1));

        assert!(matches!(graph.is_edge(kf(1), kf(9)), Err(MapError::NodeNotFound(id)) if id == kf(9)));
        assert!(matches!(graph.get_edge(kf(9), kf(1)), Err(MapError::NodeNotFound(_))));
        assert!(graph.get_neighbors(kf(9), 0.0).is_err());
        assert!(graph.remove_edge(kf(1), kf(9)).is_err());
    }

    #[test]
    fn test_suppress_node_drops_incident_edges() {
        let graph = sample_graph();
        let edges_before = graph.nb_edges();

        assert!(graph.suppress_node(kf(4)));
        assert!(!graph.has_node(kf(4)));
        assert_eq!(graph.nb_edges(), edges_before - 4);
        assert!(!graph.get_neighbors(kf(2), 0.0).unwrap().contains(&kf(4)));

        // Absent node
        assert!(!graph.suppress_node(kf(4)));
    }

    #[test]
    fn test_remove_edge() {
        let graph = sample_graph();
        graph.remove_edge(kf(5), kf(8)).unwrap();
        assert!(!graph.is_edge(kf(8), kf(5)).unwrap());
        assert!(graph.remove_edge(kf(5), kf(8)).unwrap_err().is_not_found());
    }

    #[test]
    fn test_neighbors_descending_weight() {
        let graph = sample_graph();

        let neighbors = graph.get_weighted_neighbors(kf(4), 0.0).unwrap();
        assert_eq!(
            neighbors,
            vec![(kf(3), 12.0), (kf(5), 9.0), (kf(8), 8.0), (kf(2), 4.0)]
        );

        // Strictly greater than the threshold
        assert_eq!(graph.get_neighbors(kf(4), 8.0).unwrap(), vec![kf(3), kf(5)]);
        assert!(graph.get_neighbors(kf(4), 12.0).unwrap().is_empty());
    }

    #[test]
    fn test_neighbor_ties_break_by_id() {
        let graph = CovisibilityGraph::new();
        graph.increase_edge(kf(1), kf(9), 3.0).unwrap();
        graph.increase_edge(kf(1), kf(4), 3.0).unwrap();
        graph.increase_edge(kf(1), kf(6), 7.0).unwrap();
        assert_eq!(graph.get_neighbors(kf(1), 0.0).unwrap(), vec![kf(6), kf(4), kf(9)]);
    }

    #[test]
    fn test_shortest_path_minimizes_hops() {
        let graph = sample_graph();
        let path = graph.get_shortest_path(kf(1), kf(7)).unwrap();

        assert_eq!(path.len(), 5, "expected a 4-hop path, got {:?}", path);
        assert_eq!(path.first(), Some(&kf(1)));
        assert_eq!(path.last(), Some(&kf(7)));
        for pair in path.windows(2) {
            assert!(graph.is_edge(pair[0], pair[1]).unwrap());
        }
    }

    #[test]
    fn test_shortest_path_trivial_and_unreachable() {
        let graph = sample_graph();
        assert_eq!(graph.get_shortest_path(kf(5), kf(5)).unwrap(), vec![kf(5)]);
        assert_eq!(graph.get_shortest_path(kf(8), kf(7)).unwrap(), vec![kf(8), kf(7)]);

        graph.add_node(kf(42));
        let err = graph.get_shortest_path(kf(1), kf(42)).unwrap_err();
        assert!(matches!(err, MapError::Unreachable { from, to } if from == kf(1) && to == kf(42)));
        assert!(graph.get_shortest_path(kf(1), kf(99)).unwrap_err().is_not_found());
    }

    #[test]
    fn test_minimal_spanning_tree() {
        let graph = sample_graph();
        let forest = graph.minimal_spanning_tree();

        // 8 connected nodes: 7 edges
        assert_eq!(forest.edges.len(), 7);
        // 5-8(1) + 1-2(2) + 2-4(4) + 5-6(4) + 1-3(5) + 5-7(5) + 4-8(8)
        assert_relative_eq!(forest.total_weight, 29.0);
        assert!(!forest.edges.iter().any(|e| e.a == kf(6) && e.b == kf(7)));
    }

    #[test]
    fn test_maximal_spanning_tree() {
        let graph = sample_graph();
        let forest = graph.maximal_spanning_tree();

        assert_eq!(forest.edges.len(), 7);
        // 8-7(20) + 4-3(12) + 4-5(9) + 4-8(8) + 6-7(6) + 1-3(5) + 2-4(4)
        assert_relative_eq!(forest.total_weight, 64.0);
        assert!(forest.edges.iter().all(|e| e.weight > 0.0));
    }

    #[test]
    fn test_spanning_forest_on_disconnected_graph() {
        let graph = CovisibilityGraph::new();
        graph.increase_edge(kf(1), kf(2), 3.0).unwrap();
        graph.increase_edge(kf(2), kf(3), 1.0).unwrap();
        graph.increase_edge(kf(1), kf(3), 2.0).unwrap();
        graph.increase_edge(kf(10), kf(11), 7.0).unwrap();
        graph.add_node(kf(20));

        let min = graph.minimal_spanning_tree();
        assert_eq!(min.edges.len(), 3);
        assert_relative_eq!(min.total_weight, 10.0);

        let max = graph.maximal_spanning_tree();
        assert_eq!(max.edges.len(), 3);
        assert_relative_eq!(max.total_weight, 12.0);
    }

    #[test]
    fn test_batch_increase_is_all_or_nothing() {
        let graph = CovisibilityGraph::new();
        let err = graph
            .increase_edges(&[(kf(1), kf(2), 1.0), (kf(3), kf(3), 1.0)])
            .unwrap_err();
        assert!(matches!(err, MapError::SelfLoop(_)));
        assert_eq!(graph.nb_nodes(), 0);

        graph
            .increase_edges(&[(kf(1), kf(2), 1.0), (kf(2), kf(3), 2.0)])
            .unwrap();
        assert_eq!(graph.nb_edges(), 2);
    }

    #[test]
    fn test_dump_lists_every_node() {
        let graph = sample_graph();
        graph.add_node(kf(30));
        let dump = graph.dump();
        assert!(dump.starts_with("covisibility graph: 9 nodes, 11 edges"));
        assert!(dump.contains("KF30 ->\n"));
        assert!(dump.contains("KF8 -> KF4(8) KF5(1) KF7(20)"));
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.json");

        let graph = sample_graph();
        graph.add_node(kf(99));
        graph.save_to_file(&path).unwrap();

        let loaded = CovisibilityGraph::new();
        loaded.increase_edge(kf(500), kf(501), 1.0).unwrap();
        loaded.load_from_file(&path).unwrap();

        assert_eq!(loaded.get_all_nodes(), graph.get_all_nodes());
        assert_eq!(loaded.edges(), graph.edges());
        assert!(!loaded.has_node(kf(500)));
    }

    #[test]
    fn test_load_missing_file_keeps_graph() {
        let dir = tempfile::tempdir().unwrap();
        let graph = sample_graph();
        let err = graph.load_from_file(&dir.path().join("absent.json")).unwrap_err();
        assert!(err.is_io());
        assert_eq!(graph.nb_edges(), 11);
    }

    #[test]
    fn test_load_corrupt_archive_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let mismatched = dir.path().join("mismatched.json");
        std::fs::write(
            &mismatched,
            r#"{"format":"covisibility_graph","version":1,"payload":{"nodes":[1,2],"adjacency":[[1,[]]],"weights":[[1,2,1.0]]}}"#,
        )
        .unwrap();
        let dangling = dir.path().join("dangling.json");
        std::fs::write(
            &dangling,
            r#"{"format":"covisibility_graph","version":1,"payload":{"nodes":[1],"adjacency":[],"weights":[[1,5,2.0]]}}"#,
        )
        .unwrap();

        let graph = sample_graph();
        for path in [&mismatched, &dangling] {
            let err = graph.load_from_file(path).unwrap_err();
            assert!(matches!(err, MapError::Corrupt { .. }), "got {}", err);
            assert!(err.is_io());
        }
        // Nothing was swapped in
        assert_eq!(graph.nb_edges(), 11);
    }
}
