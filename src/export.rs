//! Export types for inspecting long-term memory.
//!
//! These types are decoded, name-resolved views of stored chunks suitable
//! for printing or JSON export. The text form is the one chunk files use:
//! `(@B3 ^color red ^next @B7)`.

use redb::ReadableTable;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::hash;
use crate::registry;
use crate::store::{EdgeValue, StoreResult, Tables};
use crate::symbol::{Constant, LtiId};

/// Exported chunk with its decoded edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkExport {
    /// Persistent id.
    pub lti: u64,
    /// Name the chunk was first stored under, e.g. `B3`.
    pub name: String,
    /// Last activation tick.
    pub activation: Option<u64>,
    pub edges: Vec<EdgeExport>,
}

/// One decoded edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeExport {
    pub attr: Constant,
    pub value: ValueExport,
}

/// Value slot of an exported edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueExport {
    Constant(Constant),
    Chunk { lti: u64, name: String },
}

impl std::fmt::Display for ChunkExport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(@{}", self.name)?;
        for edge in &self.edges {
            write!(f, " ^{} {}", edge.attr, edge.value)?;
        }
        write!(f, ")")
    }
}

impl std::fmt::Display for ValueExport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueExport::Constant(c) => write!(f, "{c}"),
            ValueExport::Chunk { name, .. } => write!(f, "@{name}"),
        }
    }
}

/// Decode one chunk.
pub fn chunk(tables: &Tables<'_>, lti: LtiId) -> StoreResult<ChunkExport> {
    let mut edges = Vec::new();
    for edge in tables.edges_of(lti)? {
        let value = match edge.value {
            EdgeValue::Constant(h) => ValueExport::Constant(hash::dehash(tables, h)?),
            EdgeValue::Lti(child) => ValueExport::Chunk {
                lti: child.get(),
                name: registry::name_of(tables, child)?.to_string(),
            },
        };
        edges.push(EdgeExport {
            attr: hash::dehash(tables, edge.attr)?,
            value,
        });
    }
    Ok(ChunkExport {
        lti: lti.get(),
        name: registry::name_of(tables, lti)?.to_string(),
        activation: registry::activation_of(tables, lti)?,
        edges,
    })
}

/// Decode every chunk, ascending by persistent id.
pub fn all(tables: &Tables<'_>) -> StoreResult<Vec<ChunkExport>> {
    let mut ids = Vec::new();
    for entry in tables.lti.iter().map_err(StoreError::redb("scan lti"))? {
        let (key, _) = entry.map_err(StoreError::redb("scan lti"))?;
        if let Some(id) = LtiId::new(key.value()) {
            ids.push(id);
        }
    }
    ids.into_iter().map(|id| chunk(tables, id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{self, StoreMode};
    use crate::store::durable;
    use crate::wm::WorkingMemory;

    #[test]
    fn exported_chunk_renders_like_a_chunk_file() {
        let db = durable::open_in_memory().unwrap();
        let txn = db.begin_write().unwrap();
        let mut t = Tables::open(&txn).unwrap();
        let mut wm = WorkingMemory::new();

        let b = wm.new_identifier('B', 1);
        let c = wm.new_identifier('B', 1);
        let red = wm.symbols_mut().str("red");
        let five = wm.symbols_mut().int(5);
        wm.add_str_attr(&b, "color", &red);
        wm.add_str_attr(&b, "size", &five);
        wm.add_str_attr(&b, "next", &c);
        storage::store(&mut t, &mut wm, &b, StoreMode::Single, 1).unwrap();

        let exported = chunk(&t, b.lti(1).unwrap()).unwrap();
        assert_eq!(exported.name, "B1");
        assert_eq!(exported.edges.len(), 3);
        let text = exported.to_string();
        assert!(text.starts_with("(@B1"));
        assert!(text.contains("^color red"));
        assert!(text.contains("^size 5"));
        assert!(text.contains("^next @B2"));

        let everything = all(&t).unwrap();
        assert_eq!(everything.len(), 2);
        assert!(everything[1].edges.is_empty());
    }

    #[test]
    fn export_serializes_to_json() {
        let export = ChunkExport {
            lti: 1,
            name: "B3".into(),
            activation: Some(4),
            edges: vec![EdgeExport {
                attr: Constant::Str("next".into()),
                value: ValueExport::Chunk {
                    lti: 2,
                    name: "B7".into(),
                },
            }],
        };
        let json = serde_json::to_string(&export).unwrap();
        let back: ChunkExport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, export);
    }
}
