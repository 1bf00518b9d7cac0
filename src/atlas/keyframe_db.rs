//! Keyframe retrieval index.
//!
//! Place recognition is an external collaborator of the map: the manager only
//! needs to register and unregister keyframes, forward queries, and persist the
//! index alongside the stores. [`KeyframeRetriever`] is that seam.
//!
//! [`KeyFrameDatabase`] is the default implementation: a sparse Bag-of-Words
//! index scored with a plain dot product. A vocabulary-backed index can
//! replace it without touching the map code.

use std::collections::HashMap;
use std::path::Path;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::atlas::archive;
use crate::atlas::map::{KeyFrame, KeyFrameId};
use crate::error::Result;

/// Bag-of-Words vector: word_id -> weight.
pub type BowVector = HashMap<u32, f64>;

const ARCHIVE_FORMAT: &str = "keyframe_retrieval";

/// Operations the map manager needs from a place recognition index.
pub trait KeyframeRetriever: Send + Sync {
    fn add_keyframe(&self, keyframe: &KeyFrame) -> Result<()>;

    /// Unregister a keyframe. Unknown ids are ignored.
    fn suppress_keyframe(&self, id: KeyFrameId) -> Result<()>;

    /// Candidate keyframes for `query`, best first, `query` itself excluded.
    fn retrieve(&self, query: &KeyFrame, max_results: usize) -> Result<Vec<KeyFrameId>>;

    fn save_to_file(&self, path: &Path) -> Result<()>;

    fn load_from_file(&self, path: &Path) -> Result<()>;
}

/// Candidate keyframe with similarity score.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub keyframe_id: KeyFrameId,
    pub score: f64,
}

#[derive(Serialize, Deserialize)]
struct DatabaseArchive {
    entries: Vec<(KeyFrameId, BowVector)>,
}

/// Sparse BoW keyframe database.
#[derive(Default)]
pub struct KeyFrameDatabase {
    entries: RwLock<HashMap<KeyFrameId, BowVector>>,
}

impl KeyFrameDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn contains(&self, id: KeyFrameId) -> bool {
        self.entries.read().contains_key(&id)
    }

    /// Score every stored keyframe against `query`.
    ///
    /// Results are sorted by decreasing score (ties by ascending id) and
    /// truncated to `max_results`.
    pub fn detect_candidates(
        &self,
        query: &BowVector,
        exclude: Option<KeyFrameId>,
        max_results: usize,
    ) -> Vec<Candidate> {
        let entries = self.entries.read();
        let mut cands: Vec<Candidate> = entries
            .iter()
            .filter(|(id, _)| Some(**id) != exclude)
            .filter_map(|(&keyframe_id, bow)| {
                let score = dot(query, bow);
                (score > 0.0).then_some(Candidate { keyframe_id, score })
            })
            .collect();

        cands.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(a.keyframe_id.cmp(&b.keyframe_id))
        });
        cands.truncate(max_results);
        cands
    }
}

/// Dot product between sparse histograms, iterating the smaller one.
fn dot(a: &BowVector, b: &BowVector) -> f64 {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    small
        .iter()
        .filter_map(|(word, w)| large.get(word).map(|other| w * other))
        .sum()
}

impl KeyframeRetriever for KeyFrameDatabase {
    fn add_keyframe(&self, keyframe: &KeyFrame) -> Result<()> {
        let bow = keyframe.bow_vector().cloned().unwrap_or_default();
        self.entries.write().insert(keyframe.id, bow);
        Ok(())
    }

    fn suppress_keyframe(&self, id: KeyFrameId) -> Result<()> {
        self.entries.write().remove(&id);
        Ok(())
    }

    fn retrieve(&self, query: &KeyFrame, max_results: usize) -> Result<Vec<KeyFrameId>> {
        let Some(bow) = query.bow_vector() else {
            return Ok(Vec::new());
        };
        Ok(self
            .detect_candidates(bow, Some(query.id), max_results)
            .into_iter()
            .map(|c| c.keyframe_id)
            .collect())
    }

    fn save_to_file(&self, path: &Path) -> Result<()> {
        let mut entries: Vec<(KeyFrameId, BowVector)> = self
            .entries
            .read()
            .iter()
            .map(|(&id, bow)| (id, bow.clone()))
            .collect();
        entries.sort_by_key(|(id, _)| *id);
        archive::save(path, ARCHIVE_FORMAT, &DatabaseArchive { entries })
    }

    fn load_from_file(&self, path: &Path) -> Result<()> {
        let payload: DatabaseArchive = archive::load(path, ARCHIVE_FORMAT)?;
        *self.entries.write() = payload.entries.into_iter().collect();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::SE3;

    fn keyframe_with_words(id: u64, words: &[(u32, f64)]) -> KeyFrame {
        let mut kf = KeyFrame::bare(KeyFrameId::new(id), SE3::identity());
        kf.set_bow_vector(words.iter().copied().collect());
        kf
    }

    #[test]
    fn test_retrieve_ranks_by_score() {
        let db = KeyFrameDatabase::new();
        db.add_keyframe(&keyframe_with_words(0, &[(1, 1.0), (2, 1.0)])).unwrap();
        db.add_keyframe(&keyframe_with_words(1, &[(1, 0.2)])).unwrap();
        db.add_keyframe(&keyframe_with_words(2, &[(7, 1.0)])).unwrap();

        let query = keyframe_with_words(9, &[(1, 1.0), (2, 0.5)]);
        let found = db.retrieve(&query, 10).unwrap();
        assert_eq!(found, vec![KeyFrameId::new(0), KeyFrameId::new(1)]);

        assert_eq!(db.retrieve(&query, 1).unwrap(), vec![KeyFrameId::new(0)]);
    }

    #[test]
    fn test_query_excludes_itself() {
        let db = KeyFrameDatabase::new();
        let kf = keyframe_with_words(3, &[(1, 1.0)]);
        db.add_keyframe(&kf).unwrap();
        assert!(db.retrieve(&kf, 5).unwrap().is_empty());
    }

    #[test]
    fn test_suppress_unknown_is_ok() {
        let db = KeyFrameDatabase::new();
        db.add_keyframe(&keyframe_with_words(1, &[(1, 1.0)])).unwrap();
        db.suppress_keyframe(KeyFrameId::new(1)).unwrap();
        db.suppress_keyframe(KeyFrameId::new(1)).unwrap();
        assert!(db.is_empty());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("retrieval.json");

        let db = KeyFrameDatabase::new();
        db.add_keyframe(&keyframe_with_words(4, &[(3, 0.5), (8, 2.0)])).unwrap();
        db.save_to_file(&path).unwrap();

        let loaded = KeyFrameDatabase::new();
        loaded.load_from_file(&path).unwrap();
        assert!(loaded.contains(KeyFrameId::new(4)));
        let cands = loaded.detect_candidates(&[(8, 1.0)].into_iter().collect(), None, 5);
        assert_eq!(cands.len(), 1);
        assert_eq!(cands[0].score, 2.0);
    }
}
