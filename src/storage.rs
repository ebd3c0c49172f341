//! Storage engine: persist a working-memory subgraph as chunks.
//!
//! Storing a root replaces its persisted edge set wholesale:
//!
//! 1. collect the root's storable WMEs (no impasse or acceptable elements)
//! 2. disconnect the root: subtract its old edges from the selectivity
//!    counters and delete them
//! 3. insert the new edges, tallying counter increments per distinct key
//! 4. flush the tallies, one counter update per key
//! 5. bump the root's activation
//!
//! Disconnecting before inserting keeps a value that is both removed and
//! re-added at its correct final count. In recursive mode every
//! identifier-valued child is stored too, each exactly once per call.

use std::collections::BTreeMap;
use std::rc::Rc;

use redb::ReadableTable;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::hash;
use crate::registry;
use crate::store::schema::{adjust_counter, adjust_pair_counter};
use crate::store::{Edge, EdgeValue, StoreResult, Tables};
use crate::symbol::{Epoch, HashId, LtiId, SymbolRef};
use crate::wm::WorkingMemory;

/// How far a store reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreMode {
    /// Only the named root; identifier children just get persistent ids.
    #[default]
    Single,
    /// The root and everything reachable from it.
    Recursive,
}

/// What a store call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreReport {
    /// Chunks whose edge sets were replaced.
    pub chunks: usize,
    /// Edges written across all chunks.
    pub edges: usize,
}

/// Per-key counter deltas accumulated over one chunk.
#[derive(Debug, Default)]
struct Tally {
    attr: BTreeMap<u64, i64>,
    constant: BTreeMap<(u64, u64), i64>,
    lti: BTreeMap<(u64, u64), i64>,
}

impl Tally {
    fn add(&mut self, attr: HashId, value: EdgeValue, delta: i64) {
        *self.attr.entry(attr.get()).or_default() += delta;
        match value {
            EdgeValue::Constant(h) => {
                *self.constant.entry((attr.get(), h.get())).or_default() += delta;
            }
            EdgeValue::Lti(l) => {
                *self.lti.entry((attr.get(), l.get())).or_default() += delta;
            }
        }
    }

    fn flush(self, tables: &mut Tables<'_>) -> StoreResult<()> {
        for (key, delta) in self.attr {
            adjust_counter(&mut tables.ct_attr, key, delta)?;
        }
        for (key, delta) in self.constant {
            adjust_pair_counter(&mut tables.ct_const, key, delta)?;
        }
        for (key, delta) in self.lti {
            adjust_pair_counter(&mut tables.ct_lti, key, delta)?;
        }
        Ok(())
    }
}

/// Store `root` (an identifier) and, in recursive mode, its descendants.
///
/// Constants are skipped as roots.
pub fn store(
    tables: &mut Tables<'_>,
    wm: &mut WorkingMemory,
    root: &SymbolRef,
    mode: StoreMode,
    epoch: Epoch,
) -> StoreResult<StoreReport> {
    let mut report = StoreReport::default();
    let Some(ident) = root.identifier() else {
        return Ok(report);
    };

    let tc = match mode {
        StoreMode::Recursive => {
            let tc = wm.symbols_mut().new_tc();
            ident.mark_tc(tc);
            Some(tc)
        }
        StoreMode::Single => None,
    };

    let mut pending = vec![Rc::clone(root)];
    while let Some(id) = pending.pop() {
        let (edges, children) = store_chunk(tables, wm, &id, epoch)?;
        report.chunks += 1;
        report.edges += edges;
        if let Some(tc) = tc {
            pending.extend(
                children
                    .into_iter()
                    .filter(|c| c.identifier().is_some_and(|i| i.mark_tc(tc))),
            );
        }
    }
    Ok(report)
}

/// Replace one chunk's edges. Returns the edge count and identifier children.
fn store_chunk(
    tables: &mut Tables<'_>,
    wm: &WorkingMemory,
    id: &SymbolRef,
    epoch: Epoch,
) -> StoreResult<(usize, Vec<SymbolRef>)> {
    let root = registry::lti_of(tables, id, epoch, true)?.ok_or_else(|| {
        StoreError::Serialization {
            message: format!("cannot store constant {id} as a chunk"),
        }
    })?;

    let wmes: Vec<_> = wm
        .wmes_of(id)
        .iter()
        .filter(|w| w.kind.is_storable())
        .cloned()
        .collect();

    disconnect(tables, root)?;

    let mut tally = Tally::default();
    let mut children = Vec::new();
    let mut edges = 0;
    for wme in wmes {
        let Some(attr) = hash::hash(tables, &wme.attr, epoch, true)? else {
            tracing::warn!(wme = %wme, "identifier-valued attribute cannot be stored, skipping");
            continue;
        };
        let value = if wme.value.is_identifier() {
            let Some(child) = registry::lti_of(tables, &wme.value, epoch, true)? else {
                continue;
            };
            children.push(Rc::clone(&wme.value));
            EdgeValue::Lti(child)
        } else {
            let Some(h) = hash::hash(tables, &wme.value, epoch, true)? else {
                continue;
            };
            EdgeValue::Constant(h)
        };

        let edge = Edge {
            parent: root,
            attr,
            value,
        };
        if tables.insert_edge(&edge)? {
            tally.add(attr, value, 1);
            edges += 1;
        }
    }
    tally.flush(tables)?;
    registry::activate(tables, root, false)?;

    tracing::debug!(lti = %root, name = %id, edges, "stored chunk");
    Ok((edges, children))
}

/// Remove every stored edge of `parent`, decrementing the counters.
/// Returns the number of edges removed.
pub fn disconnect(tables: &mut Tables<'_>, parent: LtiId) -> StoreResult<usize> {
    let old = tables.edges_of(parent)?;
    let mut tally = Tally::default();
    for edge in &old {
        tables.remove_edge(edge)?;
        tally.add(edge.attr, edge.value, -1);
    }
    tally.flush(tables)?;
    Ok(old.len())
}

/// Snapshot of all three selectivity counter tables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Counters {
    pub attr: BTreeMap<u64, u64>,
    pub constant: BTreeMap<(u64, u64), u64>,
    pub lti: BTreeMap<(u64, u64), u64>,
}

impl Counters {
    /// Drop zero rows so a stored snapshot compares equal to a recount.
    pub fn nonzero(mut self) -> Self {
        self.attr.retain(|_, n| *n > 0);
        self.constant.retain(|_, n| *n > 0);
        self.lti.retain(|_, n| *n > 0);
        self
    }
}

/// Read the counters as stored.
pub fn counters(tables: &Tables<'_>) -> StoreResult<Counters> {
    let scan = StoreError::redb;
    let mut out = Counters::default();
    for entry in tables.ct_attr.iter().map_err(scan("scan ct_attr"))? {
        let (k, v) = entry.map_err(scan("scan ct_attr"))?;
        out.attr.insert(k.value(), v.value());
    }
    for entry in tables.ct_const.iter().map_err(scan("scan ct_const"))? {
        let (k, v) = entry.map_err(scan("scan ct_const"))?;
        out.constant.insert(k.value(), v.value());
    }
    for entry in tables.ct_lti.iter().map_err(scan("scan ct_lti"))? {
        let (k, v) = entry.map_err(scan("scan ct_lti"))?;
        out.lti.insert(k.value(), v.value());
    }
    Ok(out)
}

/// Recompute the counters from the web table.
pub fn recount(tables: &Tables<'_>) -> StoreResult<Counters> {
    let mut out = Counters::default();
    for entry in tables.web.iter().map_err(StoreError::redb("scan web"))? {
        let (k, _) = entry.map_err(StoreError::redb("scan web"))?;
        let (_, attr, tag, raw) = k.value();
        *out.attr.entry(attr).or_default() += 1;
        match EdgeValue::from_parts(tag, raw)? {
            EdgeValue::Constant(_) => *out.constant.entry((attr, raw)).or_default() += 1,
            EdgeValue::Lti(_) => *out.lti.entry((attr, raw)).or_default() += 1,
        }
    }
    Ok(out)
}
