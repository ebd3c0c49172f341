//! Persistence layer for long-term memory.
//!
//! - [`durable`] — opening the redb database (file or in-memory)
//! - [`schema`] — table definitions and the per-transaction [`Tables`] view
//! - [`txn`] — eager / lazy transaction manager
//!
//! The edge value sum type [`EdgeValue`] lives here because it is the unit
//! both the storage and retrieval engines encode into table keys.

pub mod durable;
pub mod schema;
pub mod txn;

use redb::ReadableTable;

pub use schema::Tables;
pub use txn::{CommitPolicy, TransactionManager};

use crate::error::StoreError;
use crate::symbol::{HashId, LtiId};

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

const TAG_CONSTANT: u8 = 0;
const TAG_LTI: u8 = 1;

/// Value slot of a stored edge: a hashed constant or another chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EdgeValue {
    Constant(HashId),
    Lti(LtiId),
}

impl EdgeValue {
    /// Split into the `(tag, raw)` pair used in table keys.
    pub fn to_parts(self) -> (u8, u64) {
        match self {
            EdgeValue::Constant(h) => (TAG_CONSTANT, h.get()),
            EdgeValue::Lti(l) => (TAG_LTI, l.get()),
        }
    }

    pub fn from_parts(tag: u8, raw: u64) -> StoreResult<Self> {
        match tag {
            TAG_CONSTANT => Ok(EdgeValue::Constant(HashId::new(raw))),
            TAG_LTI => LtiId::new(raw)
                .map(EdgeValue::Lti)
                .ok_or(StoreError::Dangling { what: "lti", id: raw }),
            other => Err(StoreError::Serialization {
                message: format!("unknown edge value tag {other}"),
            }),
        }
    }
}

/// One persisted edge of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Edge {
    pub parent: LtiId,
    pub attr: HashId,
    pub value: EdgeValue,
}

impl Edge {
    fn web_key(&self) -> (u64, u64, u8, u64) {
        let (tag, raw) = self.value.to_parts();
        (self.parent.get(), self.attr.get(), tag, raw)
    }

    fn attr_key(&self) -> (u64, u8, u64, u64) {
        let (tag, raw) = self.value.to_parts();
        (self.attr.get(), tag, raw, self.parent.get())
    }
}

impl Tables<'_> {
    /// Insert an edge into both web indexes. Returns `false` if it existed.
    pub fn insert_edge(&mut self, edge: &Edge) -> StoreResult<bool> {
        let existed = self
            .web
            .insert(edge.web_key(), ())
            .map_err(StoreError::redb("insert web"))?
            .is_some();
        self.web_by_attr
            .insert(edge.attr_key(), ())
            .map_err(StoreError::redb("insert web_by_attr"))?;
        Ok(!existed)
    }

    /// Remove an edge from both web indexes.
    pub fn remove_edge(&mut self, edge: &Edge) -> StoreResult<()> {
        self.web
            .remove(edge.web_key())
            .map_err(StoreError::redb("remove web"))?;
        self.web_by_attr
            .remove(edge.attr_key())
            .map_err(StoreError::redb("remove web_by_attr"))?;
        Ok(())
    }

    /// Every stored edge of `parent`, ordered by attribute then value.
    pub fn edges_of(&self, parent: LtiId) -> StoreResult<Vec<Edge>> {
        let p = parent.get();
        let range = self
            .web
            .range((p, 0, 0, 0)..=(p, u64::MAX, u8::MAX, u64::MAX))
            .map_err(StoreError::redb("scan web"))?;
        let mut edges = Vec::new();
        for entry in range {
            let (key, _) = entry.map_err(StoreError::redb("scan web"))?;
            let (_, attr, tag, raw) = key.value();
            edges.push(Edge {
                parent,
                attr: HashId::new(attr),
                value: EdgeValue::from_parts(tag, raw)?,
            });
        }
        Ok(edges)
    }

    pub fn has_edge(&self, edge: &Edge) -> StoreResult<bool> {
        Ok(self
            .web
            .get(edge.web_key())
            .map_err(StoreError::redb("probe web"))?
            .is_some())
    }

    /// Whether `parent` has any edge with attribute `attr`.
    pub fn has_attr(&self, parent: LtiId, attr: HashId) -> StoreResult<bool> {
        let (p, a) = (parent.get(), attr.get());
        let mut range = self
            .web
            .range((p, a, 0, 0)..=(p, a, u8::MAX, u64::MAX))
            .map_err(StoreError::redb("probe web"))?;
        match range.next() {
            Some(entry) => {
                entry.map_err(StoreError::redb("probe web"))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Parents that have an edge with `attr`, optionally restricted to one value.
    /// Ascending by persistent id, without duplicates.
    pub fn parents_with(&self, attr: HashId, value: Option<EdgeValue>) -> StoreResult<Vec<LtiId>> {
        let a = attr.get();
        let (lo, hi) = match value {
            Some(v) => {
                let (tag, raw) = v.to_parts();
                ((a, tag, raw, 0), (a, tag, raw, u64::MAX))
            }
            None => ((a, 0, 0, 0), (a, u8::MAX, u64::MAX, u64::MAX)),
        };
        let range = self
            .web_by_attr
            .range(lo..=hi)
            .map_err(StoreError::redb("scan web_by_attr"))?;
        let mut parents = std::collections::BTreeSet::new();
        for entry in range {
            let (key, _) = entry.map_err(StoreError::redb("scan web_by_attr"))?;
            let (_, _, _, parent) = key.value();
            if let Some(id) = LtiId::new(parent) {
                parents.insert(id);
            }
        }
        Ok(parents.into_iter().collect())
    }
}
