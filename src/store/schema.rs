//! Table layout of the backing store.
//!
//! | Table | Key | Value |
//! |---|---|---|
//! | `vars` | name | scalar (logical clock, id sequences, schema version) |
//! | `hash_by_value` | bincode-encoded [`Constant`](crate::symbol::Constant) | hash id |
//! | `hash_by_id` | hash id | bincode-encoded constant |
//! | `lti` | persistent id | (letter, number) of its name |
//! | `lti_by_name` | (letter, number) | persistent id |
//! | `web` | (parent, attr, value tag, value) | `()` |
//! | `web_by_attr` | (attr, value tag, value, parent) | `()` |
//! | `ct_attr` | attr | edge count |
//! | `ct_const` | (attr, constant) | edge count |
//! | `ct_lti` | (attr, persistent value) | edge count |
//! | `activation` | persistent id | logical clock of last store/retrieval |
//!
//! `web_by_attr` mirrors `web` with the attribute leading so that cue queries
//! can scan all parents of a feature.

use redb::{ReadableTable, Table, TableDefinition, WriteTransaction};

use crate::error::StoreError;
use crate::store::StoreResult;

pub const VARS: TableDefinition<&str, u64> = TableDefinition::new("vars");
pub const HASH_BY_VALUE: TableDefinition<&[u8], u64> = TableDefinition::new("hash_by_value");
pub const HASH_BY_ID: TableDefinition<u64, &[u8]> = TableDefinition::new("hash_by_id");
pub const LTI: TableDefinition<u64, (u32, u64)> = TableDefinition::new("lti");
pub const LTI_BY_NAME: TableDefinition<(u32, u64), u64> = TableDefinition::new("lti_by_name");
pub const WEB: TableDefinition<(u64, u64, u8, u64), ()> = TableDefinition::new("web");
pub const WEB_BY_ATTR: TableDefinition<(u64, u8, u64, u64), ()> =
    TableDefinition::new("web_by_attr");
pub const CT_ATTR: TableDefinition<u64, u64> = TableDefinition::new("ct_attr");
pub const CT_CONST: TableDefinition<(u64, u64), u64> = TableDefinition::new("ct_const");
pub const CT_LTI: TableDefinition<(u64, u64), u64> = TableDefinition::new("ct_lti");
pub const ACTIVATION: TableDefinition<u64, u64> = TableDefinition::new("activation");

/// Last logical-clock value handed out by `activate`.
pub const VAR_MAX_CYCLE: &str = "max_cycle";
/// Last hash id handed out.
pub const VAR_NEXT_HASH: &str = "next_hash";
/// Last persistent id handed out.
pub const VAR_NEXT_LTI: &str = "next_lti";
pub const VAR_SCHEMA_VERSION: &str = "schema_version";

pub const SCHEMA_VERSION: u64 = 1;

/// All tables opened inside one write transaction.
pub struct Tables<'t> {
    pub vars: Table<'t, &'static str, u64>,
    pub hash_by_value: Table<'t, &'static [u8], u64>,
    pub hash_by_id: Table<'t, u64, &'static [u8]>,
    pub lti: Table<'t, u64, (u32, u64)>,
    pub lti_by_name: Table<'t, (u32, u64), u64>,
    pub web: Table<'t, (u64, u64, u8, u64), ()>,
    pub web_by_attr: Table<'t, (u64, u8, u64, u64), ()>,
    pub ct_attr: Table<'t, u64, u64>,
    pub ct_const: Table<'t, (u64, u64), u64>,
    pub ct_lti: Table<'t, (u64, u64), u64>,
    pub activation: Table<'t, u64, u64>,
}

impl<'t> Tables<'t> {
    /// Open (creating if missing) every table.
    pub fn open(txn: &'t WriteTransaction) -> StoreResult<Self> {
        let open = StoreError::redb;
        Ok(Self {
            vars: txn.open_table(VARS).map_err(open("open vars"))?,
            hash_by_value: txn
                .open_table(HASH_BY_VALUE)
                .map_err(open("open hash_by_value"))?,
            hash_by_id: txn.open_table(HASH_BY_ID).map_err(open("open hash_by_id"))?,
            lti: txn.open_table(LTI).map_err(open("open lti"))?,
            lti_by_name: txn
                .open_table(LTI_BY_NAME)
                .map_err(open("open lti_by_name"))?,
            web: txn.open_table(WEB).map_err(open("open web"))?,
            web_by_attr: txn
                .open_table(WEB_BY_ATTR)
                .map_err(open("open web_by_attr"))?,
            ct_attr: txn.open_table(CT_ATTR).map_err(open("open ct_attr"))?,
            ct_const: txn.open_table(CT_CONST).map_err(open("open ct_const"))?,
            ct_lti: txn.open_table(CT_LTI).map_err(open("open ct_lti"))?,
            activation: txn.open_table(ACTIVATION).map_err(open("open activation"))?,
        })
    }

    /// Create-if-not-exists for every table and the schema version row.
    pub fn create(txn: &'t WriteTransaction) -> StoreResult<()> {
        let mut tables = Self::open(txn)?;
        if tables.var(VAR_SCHEMA_VERSION)? == 0 {
            tables.set_var(VAR_SCHEMA_VERSION, SCHEMA_VERSION)?;
            tracing::debug!(version = SCHEMA_VERSION, "created long-term memory schema");
        }
        Ok(())
    }

    /// Read a scalar; missing rows read as zero.
    pub fn var(&self, name: &str) -> StoreResult<u64> {
        Ok(self
            .vars
            .get(name)
            .map_err(StoreError::redb("read var"))?
            .map(|g| g.value())
            .unwrap_or(0))
    }

    pub fn set_var(&mut self, name: &str, value: u64) -> StoreResult<()> {
        self.vars
            .insert(name, value)
            .map_err(StoreError::redb("write var"))?;
        Ok(())
    }

    /// Increment a scalar and return the new value.
    pub fn next_var(&mut self, name: &str) -> StoreResult<u64> {
        let next = self.var(name)? + 1;
        self.set_var(name, next)?;
        Ok(next)
    }
}

/// Add `delta` to a single-keyed counter row, creating it at zero first.
pub(crate) fn adjust_counter(
    table: &mut Table<'_, u64, u64>,
    key: u64,
    delta: i64,
) -> StoreResult<()> {
    let current = table
        .get(key)
        .map_err(StoreError::redb("read counter"))?
        .map(|g| g.value())
        .unwrap_or(0);
    table
        .insert(key, current.saturating_add_signed(delta))
        .map_err(StoreError::redb("write counter"))?;
    Ok(())
}

/// Pair-keyed variant of [`adjust_counter`].
pub(crate) fn adjust_pair_counter(
    table: &mut Table<'_, (u64, u64), u64>,
    key: (u64, u64),
    delta: i64,
) -> StoreResult<()> {
    let current = table
        .get(key)
        .map_err(StoreError::redb("read counter"))?
        .map(|g| g.value())
        .unwrap_or(0);
    table
        .insert(key, current.saturating_add_signed(delta))
        .map_err(StoreError::redb("write counter"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::durable;

    #[test]
    fn schema_creation_is_idempotent() {
        let db = durable::open_in_memory().unwrap();
        for _ in 0..2 {
            let txn = db.begin_write().unwrap();
            Tables::create(&txn).unwrap();
            txn.commit().unwrap();
        }
        let txn = db.begin_write().unwrap();
        let tables = Tables::open(&txn).unwrap();
        assert_eq!(tables.var(VAR_SCHEMA_VERSION).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn vars_default_to_zero_and_increment() {
        let db = durable::open_in_memory().unwrap();
        let txn = db.begin_write().unwrap();
        let mut tables = Tables::open(&txn).unwrap();
        assert_eq!(tables.var(VAR_MAX_CYCLE).unwrap(), 0);
        assert_eq!(tables.next_var(VAR_MAX_CYCLE).unwrap(), 1);
        assert_eq!(tables.next_var(VAR_MAX_CYCLE).unwrap(), 2);
        assert_eq!(tables.var(VAR_MAX_CYCLE).unwrap(), 2);
    }

    #[test]
    fn counters_adjust_and_saturate() {
        let db = durable::open_in_memory().unwrap();
        let txn = db.begin_write().unwrap();
        let mut tables = Tables::open(&txn).unwrap();
        adjust_counter(&mut tables.ct_attr, 4, 3).unwrap();
        adjust_counter(&mut tables.ct_attr, 4, -1).unwrap();
        assert_eq!(tables.ct_attr.get(4).unwrap().unwrap().value(), 2);

        adjust_pair_counter(&mut tables.ct_const, (4, 9), -5).unwrap();
        assert_eq!(tables.ct_const.get((4, 9)).unwrap().unwrap().value(), 0);
    }
}
