//! Identifier registry: in-session names ↔ persistent ids, plus activation.
//!
//! Every chunk has a persistent id ([`LtiId`]) and remembers the name
//! (`letter`, `number`) of the identifier it was first stored from, uniquely.
//! Binding a persistent id back into working memory reuses that name, so an
//! identifier keeps the same name across sessions. [`resync_counters`] keeps
//! the agent's name generator from minting a name already owned by a chunk.
//!
//! Activation is a logical clock: each store or successful retrieval of a
//! chunk moves it to the next tick.

use redb::ReadableTable;

use crate::error::StoreError;
use crate::store::schema::{Tables, VAR_MAX_CYCLE, VAR_NEXT_LTI};
use crate::store::StoreResult;
use crate::symbol::{Epoch, IdName, LtiId, Symbol, SymbolRef, SymbolTable};

fn name_key(name: IdName) -> (u32, u64) {
    (name.letter as u32, name.number)
}

fn name_from_key((letter, number): (u32, u64)) -> StoreResult<IdName> {
    let letter = char::from_u32(letter).ok_or_else(|| StoreError::Serialization {
        message: format!("invalid identifier letter code {letter}"),
    })?;
    Ok(IdName::new(letter, number))
}

/// Persistent id registered for `name`, if any.
pub fn get_id(tables: &Tables<'_>, name: IdName) -> StoreResult<Option<LtiId>> {
    Ok(tables
        .lti_by_name
        .get(name_key(name))
        .map_err(StoreError::redb("read lti_by_name"))?
        .and_then(|g| LtiId::new(g.value())))
}

/// Register a new persistent id for `name` and give it an activation record.
///
/// # Panics
///
/// If `name` already has a persistent id. Callers check with [`get_id`]
/// first; a second id for one name would break id uniqueness.
pub fn add_id(tables: &mut Tables<'_>, name: IdName) -> StoreResult<LtiId> {
    if let Some(previous) = get_id(tables, name)? {
        panic!("identifier {name} already has persistent id {previous}");
    }
    let raw = tables.next_var(VAR_NEXT_LTI)?;
    let id = LtiId::new(raw).ok_or(StoreError::Dangling { what: "lti", id: raw })?;
    tables
        .lti_by_name
        .insert(name_key(name), id.get())
        .map_err(StoreError::redb("write lti_by_name"))?;
    tables
        .lti
        .insert(id.get(), name_key(name))
        .map_err(StoreError::redb("write lti"))?;
    activate(tables, id, true)?;
    tracing::debug!(%id, %name, "registered persistent id");
    Ok(id)
}

/// Name recorded for a persistent id, `None` if it was never allocated.
pub fn find_name(tables: &Tables<'_>, id: LtiId) -> StoreResult<Option<IdName>> {
    tables
        .lti
        .get(id.get())
        .map_err(StoreError::redb("read lti"))?
        .map(|g| name_from_key(g.value()))
        .transpose()
}

/// Name recorded for a persistent id.
pub fn name_of(tables: &Tables<'_>, id: LtiId) -> StoreResult<IdName> {
    find_name(tables, id)?.ok_or(StoreError::Dangling {
        what: "lti",
        id: id.get(),
    })
}

/// Persistent id of an identifier symbol.
///
/// Checks the identifier's marker, then the name index, and with `create`
/// registers a new id. The marker is refreshed for the current epoch.
/// Constants yield `None`.
pub fn lti_of(
    tables: &mut Tables<'_>,
    sym: &Symbol,
    epoch: Epoch,
    create: bool,
) -> StoreResult<Option<LtiId>> {
    let Some(ident) = sym.identifier() else {
        return Ok(None);
    };
    if let Some(id) = ident.lti(epoch) {
        return Ok(Some(id));
    }
    let id = match get_id(tables, ident.name())? {
        Some(id) => id,
        None if create => add_id(tables, ident.name())?,
        None => return Ok(None),
    };
    ident.set_lti(id, epoch);
    Ok(Some(id))
}

/// Live identifier for a persistent id, created under its recorded name if
/// working memory has none. Its marker is set to `id` unconditionally.
pub fn bind(
    tables: &Tables<'_>,
    symbols: &mut SymbolTable,
    id: LtiId,
    level: u32,
    epoch: Epoch,
) -> StoreResult<SymbolRef> {
    let name = name_of(tables, id)?;
    let (sym, _created) = symbols.identifier_named(name, level);
    if let Some(ident) = sym.identifier() {
        ident.set_lti(id, epoch);
    }
    Ok(sym)
}

/// Move `id` to the next logical-clock tick. Returns the tick.
///
/// `is_new` marks the first activation of a freshly registered id; the
/// record is upserted either way.
pub fn activate(tables: &mut Tables<'_>, id: LtiId, is_new: bool) -> StoreResult<u64> {
    let tick = tables.next_var(VAR_MAX_CYCLE)?;
    let previous = tables
        .activation
        .insert(id.get(), tick)
        .map_err(StoreError::redb("write activation"))?
        .map(|g| g.value());
    if is_new && previous.is_some() {
        tracing::warn!(%id, "activation record already existed for a new persistent id");
    }
    Ok(tick)
}

/// Last activation tick of `id`.
pub fn activation_of(tables: &Tables<'_>, id: LtiId) -> StoreResult<Option<u64>> {
    Ok(tables
        .activation
        .get(id.get())
        .map_err(StoreError::redb("read activation"))?
        .map(|g| g.value()))
}

/// Raise the symbol table's per-letter counters above every name owned by a
/// chunk. Returns the number of persistent ids scanned.
pub fn resync_counters(tables: &Tables<'_>, symbols: &mut SymbolTable) -> StoreResult<usize> {
    let mut scanned = 0;
    for entry in tables.lti.iter().map_err(StoreError::redb("scan lti"))? {
        let (_, value) = entry.map_err(StoreError::redb("scan lti"))?;
        let name = name_from_key(value.value())?;
        symbols.raise_counter(name.letter, name.number);
        scanned += 1;
    }
    Ok(scanned)
}
