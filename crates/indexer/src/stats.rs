use serde::{Deserialize, Serialize};

/// Outcome of one ingestion pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassStats {
    /// Records normalized, chunked and registered
    pub records: usize,

    /// Records lost to unreadable entries or embedding failures
    pub dropped: usize,

    /// Chunks made searchable
    pub chunks: usize,

    /// Chunks refused by the store
    pub rejected: usize,

    /// Reported anomalies, including the ones that did not drop anything
    pub anomalies: usize,

    /// Time taken in milliseconds
    pub time_ms: u64,
}

impl PassStats {
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.records == 0 && self.dropped == 0 && self.anomalies == 0
    }
}
