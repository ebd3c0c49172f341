//! Operation counters, timers and store sizes.

use std::time::Duration;

use redb::ReadableTableMetadata;
use serde::Serialize;

use crate::error::StoreError;
use crate::store::{StoreResult, Tables};

/// Cumulative wall-clock time spent in one kind of operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Timer {
    pub calls: u64,
    pub total: Duration,
}

impl Timer {
    pub fn record(&mut self, elapsed: Duration) {
        self.calls += 1;
        self.total += elapsed;
    }
}

impl std::fmt::Display for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.3} ms over {} calls", self.total.as_secs_f64() * 1e3, self.calls)
    }
}

/// Sizes of the persisted state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub chunks: u64,
    pub edges: u64,
    pub constants: u64,
}

impl StoreCounts {
    pub fn read(tables: &Tables<'_>) -> StoreResult<Self> {
        let len = StoreError::redb;
        Ok(Self {
            chunks: tables.lti.len().map_err(len("count lti"))?,
            edges: tables.web.len().map_err(len("count web"))?,
            constants: tables.hash_by_id.len().map_err(len("count hash"))?,
        })
    }
}

/// Kernel statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LtmStats {
    /// Chunks stored (recursive stores count every chunk).
    pub stores: u64,
    /// Direct `^retrieve` commands run.
    pub retrievals: u64,
    pub queries: u64,
    /// Queries that found a chunk.
    pub query_hits: u64,
    /// WMEs added by expanding chunks.
    pub expansions: u64,
    pub bad_commands: u64,
    pub store_time: Timer,
    pub query_time: Timer,
    pub retrieve_time: Timer,
    pub counts: StoreCounts,
}

impl std::fmt::Display for LtmStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "long-term memory")?;
        writeln!(f, "  chunks:        {}", self.counts.chunks)?;
        writeln!(f, "  edges:         {}", self.counts.edges)?;
        writeln!(f, "  constants:     {}", self.counts.constants)?;
        writeln!(f, "  stores:        {}", self.stores)?;
        writeln!(f, "  retrievals:    {}", self.retrievals)?;
        writeln!(f, "  queries:       {} ({} hits)", self.queries, self.query_hits)?;
        writeln!(f, "  expansions:    {}", self.expansions)?;
        writeln!(f, "  bad commands:  {}", self.bad_commands)?;
        writeln!(f, "  store time:    {}", self.store_time)?;
        writeln!(f, "  query time:    {}", self.query_time)?;
        writeln!(f, "  retrieve time: {}", self.retrieve_time)?;
        Ok(())
    }
}
