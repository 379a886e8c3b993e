use crate::error::{Result, VectorStoreError};
use crate::types::{EntryId, IndexHit};
use ndarray::{ArrayView1, ArrayView2};
use std::cmp::Ordering;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Exact cosine-similarity index over fixed-dimension vectors.
///
/// Rows live in one flat row-major buffer, so a query is a single matrix-vector product over the
/// first `len` rows. Growth is append-only: a row is pushed in full under the write lock, so a
/// reader sees either all `D` components of a row or none of it.
pub struct BruteForceIndex {
    dimension: usize,
    rows: RwLock<Rows>,
}

#[derive(Default)]
struct Rows {
    data: Vec<f32>,
    ids: Vec<EntryId>,
    norms: Vec<f32>,
}

impl BruteForceIndex {
    pub fn new(dimension: usize) -> Result<Self> {
        Self::with_capacity(dimension, 0)
    }

    /// Create an index with room for `reserved` vectors before the first reallocation
    pub fn with_capacity(dimension: usize, reserved: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(VectorStoreError::InvalidConfig(
                "index dimension must be positive".to_string(),
            ));
        }
        let rows = Rows {
            data: Vec::with_capacity(reserved.saturating_mul(dimension)),
            ids: Vec::with_capacity(reserved),
            norms: Vec::with_capacity(reserved),
        };
        Ok(Self {
            dimension,
            rows: RwLock::new(rows),
        })
    }

    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.read().map_or(0, |rows| rows.ids.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append one vector. Ids must be strictly increasing.
    pub fn insert(&self, vector: &[f32], id: EntryId) -> Result<()> {
        self.check_dimension(vector)?;
        let norm = l2_norm(vector);

        let mut rows = self.write()?;
        if rows.ids.last().is_some_and(|last| *last >= id) {
            return Err(VectorStoreError::IndexError(format!(
                "entry id {id} is not greater than the last inserted id"
            )));
        }
        rows.data.extend_from_slice(vector);
        rows.norms.push(norm);
        rows.ids.push(id);
        Ok(())
    }

    /// Top-`k` entries by descending cosine similarity; equal scores keep insertion order
    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<IndexHit>> {
        self.query_filtered(vector, k, |_| true)
    }

    /// Like [`query`](Self::query), but only entries accepted by `keep` compete for the `k` slots
    pub fn query_filtered<F>(&self, vector: &[f32], k: usize, keep: F) -> Result<Vec<IndexHit>>
    where
        F: Fn(EntryId) -> bool,
    {
        self.check_dimension(vector)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let rows = self.read()?;
        let n = rows.ids.len();
        if n == 0 {
            return Ok(Vec::new());
        }

        let matrix = ArrayView2::from_shape((n, self.dimension), &rows.data[..n * self.dimension])
            .map_err(|e| VectorStoreError::IndexError(format!("corrupt row buffer: {e}")))?;
        let query = ArrayView1::from(vector);
        let query_norm = l2_norm(vector);
        let dots = matrix.dot(&query);

        let mut hits: Vec<IndexHit> = dots
            .iter()
            .zip(rows.ids.iter().zip(rows.norms.iter()))
            .filter(|(_, (id, _))| keep(**id))
            .map(|(dot, (id, norm))| IndexHit {
                id: *id,
                score: cosine(*dot, query_norm, *norm),
            })
            .collect();
        drop(rows);

        if k < hits.len() {
            hits.select_nth_unstable_by(k - 1, rank);
            hits.truncate(k);
        }
        hits.sort_unstable_by(rank);
        Ok(hits)
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(VectorStoreError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Rows>> {
        self.rows
            .read()
            .map_err(|_| VectorStoreError::IndexError("index lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Rows>> {
        self.rows
            .write()
            .map_err(|_| VectorStoreError::IndexError("index lock poisoned".to_string()))
    }
}

impl std::fmt::Debug for BruteForceIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BruteForceIndex")
            .field("dimension", &self.dimension)
            .field("len", &self.len())
            .finish()
    }
}

fn rank(a: &IndexHit, b: &IndexHit) -> Ordering {
    b.score.total_cmp(&a.score).then(a.id.cmp(&b.id))
}

fn l2_norm(vector: &[f32]) -> f32 {
    vector.iter().map(|v| v * v).sum::<f32>().sqrt()
}

fn cosine(dot: f32, norm_a: f32, norm_b: f32) -> f32 {
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
