//! Symbol hash cache: constants ↔ compact hash ids.
//!
//! Only constants are hashed. The id is looked up in the symbol's own cache
//! slot first; a slot written in an older validation epoch counts as empty.
//! On a miss the `hash_by_value` table is consulted and, if allowed, a new id
//! is allocated. Either way the result is written back onto the symbol.

use redb::ReadableTable;

use crate::error::StoreError;
use crate::store::schema::{Tables, VAR_NEXT_HASH};
use crate::store::StoreResult;
use crate::symbol::{Constant, Epoch, HashId, Symbol, SymbolRef, SymbolTable};

fn encode(value: &Constant) -> StoreResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| StoreError::Serialization {
        message: format!("failed to encode constant {value}: {e}"),
    })
}

fn decode(bytes: &[u8]) -> StoreResult<Constant> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Serialization {
        message: format!("failed to decode constant: {e}"),
    })
}

/// Hash id of `sym`, or `None` for identifiers.
///
/// With `create == false` an unknown constant also yields `None`; the
/// query path relies on that to prove a cue cannot match.
pub fn hash(
    tables: &mut Tables<'_>,
    sym: &Symbol,
    epoch: Epoch,
    create: bool,
) -> StoreResult<Option<HashId>> {
    let Some(value) = sym.constant() else {
        return Ok(None);
    };
    if let Some(id) = sym.cached_hash(epoch) {
        return Ok(Some(id));
    }

    let key = encode(value)?;
    let found = tables
        .hash_by_value
        .get(key.as_slice())
        .map_err(StoreError::redb("read hash"))?
        .map(|g| HashId::new(g.value()));

    let id = match found {
        Some(id) => id,
        None if create => {
            let id = HashId::new(tables.next_var(VAR_NEXT_HASH)?);
            tables
                .hash_by_value
                .insert(key.as_slice(), id.get())
                .map_err(StoreError::redb("write hash"))?;
            tables
                .hash_by_id
                .insert(id.get(), key.as_slice())
                .map_err(StoreError::redb("write hash"))?;
            tracing::trace!(%id, %value, "hashed new constant");
            id
        }
        None => return Ok(None),
    };
    sym.cache_hash(id, epoch);
    Ok(Some(id))
}

/// The constant a hash id stands for.
pub fn dehash(tables: &Tables<'_>, id: HashId) -> StoreResult<Constant> {
    let guard = tables
        .hash_by_id
        .get(id.get())
        .map_err(StoreError::redb("read hash"))?
        .ok_or(StoreError::Dangling {
            what: "hash",
            id: id.get(),
        })?;
    decode(guard.value())
}

/// Dehash into an interned symbol, pre-filling its cache slot.
pub fn symbol_for(
    tables: &Tables<'_>,
    symbols: &mut SymbolTable,
    id: HashId,
    epoch: Epoch,
) -> StoreResult<SymbolRef> {
    let sym = symbols.constant(dehash(tables, id)?);
    sym.cache_hash(id, epoch);
    Ok(sym)
}
