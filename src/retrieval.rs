//! Retrieval engine: direct expansion and cue-based query.
//!
//! A cue is the set of storable WMEs under one query identifier. Each
//! element is weighted by the selectivity counter matching its shape and
//! the elements are evaluated rarest first: the rarest element produces the
//! candidate list, every later element can only shrink it.
//!
//! Candidates start out ordered by descending activation and filtering keeps
//! that order, so the surviving candidate with the most recent activation
//! wins.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::error::StoreError;
use crate::hash;
use crate::registry;
use crate::store::{Edge, EdgeValue, StoreResult, Tables};
use crate::symbol::{Epoch, HashId, LtiId, SymbolRef};
use crate::wm::WorkingMemory;

/// A chunk placed into working memory by [`install`].
#[derive(Debug, Clone)]
pub struct Installed {
    pub id: SymbolRef,
    /// WMEs added by expansion. Zero when the identifier already had children.
    pub expanded: usize,
}

/// Bind `lti` to a live identifier and, if that identifier has no children
/// yet, expand its stored edges one level deep. Bumps the chunk's activation.
pub fn install(
    tables: &mut Tables<'_>,
    wm: &mut WorkingMemory,
    lti: LtiId,
    level: u32,
    epoch: Epoch,
) -> StoreResult<Installed> {
    let id = registry::bind(tables, wm.symbols_mut(), lti, level, epoch)?;
    if let Some(ident) = id.identifier() {
        ident.mark_retrieved();
    }

    let mut expanded = 0;
    if !wm.has_children(&id) {
        for edge in tables.edges_of(lti)? {
            let attr = hash::symbol_for(tables, wm.symbols_mut(), edge.attr, epoch)?;
            let value = match edge.value {
                EdgeValue::Constant(h) => hash::symbol_for(tables, wm.symbols_mut(), h, epoch)?,
                EdgeValue::Lti(child) => registry::bind(tables, wm.symbols_mut(), child, level, epoch)?,
            };
            wm.add(&id, &attr, &value);
            expanded += 1;
        }
    }
    registry::activate(tables, lti, false)?;

    tracing::debug!(%lti, name = %id, expanded, "installed chunk");
    Ok(Installed { id, expanded })
}

/// What a cue element requires of a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CueTest {
    /// Some edge with the attribute, any value.
    Attribute,
    Constant(HashId),
    Lti(LtiId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CueElement {
    pub attr: HashId,
    pub test: CueTest,
    /// Number of stored edges matching this element.
    pub weight: u64,
}

impl CueElement {
    fn candidates(&self, tables: &Tables<'_>) -> StoreResult<Vec<LtiId>> {
        let value = match self.test {
            CueTest::Attribute => None,
            CueTest::Constant(h) => Some(EdgeValue::Constant(h)),
            CueTest::Lti(l) => Some(EdgeValue::Lti(l)),
        };
        tables.parents_with(self.attr, value)
    }

    fn matches(&self, tables: &Tables<'_>, parent: LtiId) -> StoreResult<bool> {
        let value = match self.test {
            CueTest::Attribute => return tables.has_attr(parent, self.attr),
            CueTest::Constant(h) => EdgeValue::Constant(h),
            CueTest::Lti(l) => EdgeValue::Lti(l),
        };
        tables.has_edge(&Edge {
            parent,
            attr: self.attr,
            value,
        })
    }
}

fn read_count(
    guard: Result<Option<redb::AccessGuard<'_, u64>>, redb::StorageError>,
    table: &'static str,
) -> StoreResult<u64> {
    Ok(guard
        .map_err(StoreError::redb(table))?
        .map(|g| g.value())
        .unwrap_or(0))
}

/// Build the cue rooted at `cue`. `None` means the cue provably matches
/// nothing: an attribute or constant was never stored, or a selectivity
/// counter is missing or zero.
pub fn build_cue(
    tables: &mut Tables<'_>,
    wm: &WorkingMemory,
    cue: &SymbolRef,
    epoch: Epoch,
) -> StoreResult<Option<Vec<CueElement>>> {
    use redb::ReadableTable;

    let mut elements = Vec::new();
    for wme in wm.wmes_of(cue).iter().filter(|w| w.kind.is_storable()) {
        let Some(attr) = hash::hash(tables, &wme.attr, epoch, false)? else {
            return Ok(None);
        };
        let test = if wme.value.is_identifier() {
            match registry::lti_of(tables, &wme.value, epoch, false)? {
                Some(lti) => CueTest::Lti(lti),
                None => CueTest::Attribute,
            }
        } else {
            match hash::hash(tables, &wme.value, epoch, false)? {
                Some(h) => CueTest::Constant(h),
                None => return Ok(None),
            }
        };
        let weight = match test {
            CueTest::Attribute => read_count(tables.ct_attr.get(attr.get()), "read ct_attr")?,
            CueTest::Constant(h) => {
                read_count(tables.ct_const.get((attr.get(), h.get())), "read ct_const")?
            }
            CueTest::Lti(l) => read_count(tables.ct_lti.get((attr.get(), l.get())), "read ct_lti")?,
        };
        if weight == 0 {
            return Ok(None);
        }
        elements.push(CueElement { attr, test, weight });
    }
    Ok(Some(elements))
}

/// Evaluate a built cue. Returns the best matching chunk not in `prohibited`.
pub fn evaluate(
    tables: &Tables<'_>,
    elements: &[CueElement],
    prohibited: &[LtiId],
) -> StoreResult<Option<LtiId>> {
    let mut plan: BinaryHeap<Reverse<(u64, usize)>> = elements
        .iter()
        .enumerate()
        .map(|(order, e)| Reverse((e.weight, order)))
        .collect();

    let Some(Reverse((_, first))) = plan.pop() else {
        return Ok(None);
    };
    let mut ranked = Vec::new();
    for lti in elements[first].candidates(tables)? {
        if prohibited.contains(&lti) {
            continue;
        }
        let tick = registry::activation_of(tables, lti)?.unwrap_or(0);
        ranked.push((Reverse(tick), lti));
    }
    ranked.sort_unstable();
    let mut candidates: Vec<LtiId> = ranked.into_iter().map(|(_, lti)| lti).collect();

    while let Some(Reverse((_, next))) = plan.pop() {
        if candidates.is_empty() {
            break;
        }
        let element = &elements[next];
        let mut kept = Vec::with_capacity(candidates.len());
        for lti in candidates {
            if element.matches(tables, lti)? {
                kept.push(lti);
            }
        }
        candidates = kept;
    }
    Ok(candidates.first().copied())
}

/// Build and evaluate the cue rooted at `cue`.
pub fn query(
    tables: &mut Tables<'_>,
    wm: &WorkingMemory,
    cue: &SymbolRef,
    prohibited: &[LtiId],
    epoch: Epoch,
) -> StoreResult<Option<LtiId>> {
    let Some(elements) = build_cue(tables, wm, cue, epoch)? else {
        tracing::debug!(cue = %cue, "cue cannot match any stored chunk");
        return Ok(None);
    };
    let best = evaluate(tables, &elements, prohibited)?;
    tracing::debug!(cue = %cue, elements = elements.len(), best = ?best, "evaluated cue");
    Ok(best)
}
