use serde::{Deserialize, Serialize};

/// Identifier of one vector in the index; the document store uses chunk ids
pub type EntryId = u64;

/// One scored entry returned by an index query
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndexHit {
    pub id: EntryId,
    pub score: f32,
}
