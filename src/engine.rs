//! Engine facade: the per-agent long-term memory context.
//!
//! [`Ltm`] owns the configuration, the transaction manager, the validation
//! epoch, the per-state command headers and the statistics. Working memory
//! stays with the caller and is passed into every operation.
//!
//! Any [`StoreError`] puts the kernel into a failed state: it is logged once,
//! later operations return [`StoreError::Inert`] and commands report
//! `failure` until [`Ltm::reset`] or [`Ltm::reinit`].

use std::rc::Rc;
use std::time::Instant;

use crate::command::{self, Command, StateHeader, Status};
use crate::config::LtmConfig;
use crate::error::{CommandError, LtmResult, StoreError};
use crate::export::{self, ChunkExport};
use crate::registry;
use crate::retrieval::{self, Installed};
use crate::stats::{LtmStats, StoreCounts};
use crate::storage::{self, Counters, StoreMode, StoreReport};
use crate::store::{durable, CommitPolicy, StoreResult, Tables, TransactionManager};
use crate::symbol::{Epoch, IdName, LtiId, SymbolRef};
use crate::wm::WorkingMemory;

/// Long-term memory for one agent.
pub struct Ltm {
    config: LtmConfig,
    txn: TransactionManager,
    epoch: Epoch,
    failed: bool,
    states: Vec<StateHeader>,
    stats: LtmStats,
}

impl Ltm {
    /// Open the store described by `config`, create its schema and raise the
    /// agent's name counters above every stored name.
    pub fn open(config: LtmConfig, wm: &mut WorkingMemory) -> LtmResult<Self> {
        let txn = TransactionManager::new(durable::open(&config)?, config.commit_policy())?;
        let mut ltm = Self {
            config,
            txn,
            epoch: 1,
            failed: false,
            states: Vec::new(),
            stats: LtmStats::default(),
        };
        let scanned = ltm.resync(wm)?;
        tracing::info!(
            database = ?ltm.config.database,
            policy = ?ltm.txn.policy(),
            chunks = scanned,
            "opened long-term memory"
        );
        Ok(ltm)
    }

    pub fn config(&self) -> &LtmConfig {
        &self.config
    }

    /// Current validation epoch.
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Whether an earlier store failure has made the kernel inert.
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    // -----------------------------------------------------------------------
    // Store access
    // -----------------------------------------------------------------------

    fn write<R>(&mut self, f: impl FnOnce(&mut Tables<'_>) -> StoreResult<R>) -> StoreResult<R> {
        if self.failed {
            return Err(StoreError::Inert);
        }
        let result = self.txn.write(f);
        self.check(result)
    }

    fn check<R>(&mut self, result: StoreResult<R>) -> StoreResult<R> {
        if let Err(e) = &result {
            if !self.failed {
                tracing::error!(error = %e, "long-term memory store failed, disabling until reset");
            }
            self.failed = true;
        }
        result
    }

    fn resync(&mut self, wm: &mut WorkingMemory) -> StoreResult<usize> {
        self.write(|t| registry::resync_counters(t, wm.symbols_mut()))
    }

    /// Open a transaction that the following operations join.
    pub fn begin(&mut self) -> StoreResult<()> {
        if self.failed {
            return Err(StoreError::Inert);
        }
        let result = self.txn.begin();
        self.check(result)
    }

    /// Commit the open transaction (under the lazy policy a new one starts).
    pub fn commit(&mut self) -> StoreResult<()> {
        if self.failed {
            return Err(StoreError::Inert);
        }
        let result = self.txn.commit();
        self.check(result)
    }

    /// Discard the open transaction. Ids cached on symbols may refer to
    /// discarded rows, so this also starts a new epoch.
    pub fn rollback(&mut self) -> StoreResult<()> {
        if self.failed {
            return Err(StoreError::Inert);
        }
        let result = self.txn.rollback();
        self.check(result)?;
        self.epoch += 1;
        Ok(())
    }

    /// Make everything written so far durable.
    pub fn flush(&mut self) -> StoreResult<()> {
        self.commit()
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Persist `root` (and in recursive mode its descendants).
    pub fn store(
        &mut self,
        wm: &mut WorkingMemory,
        root: &SymbolRef,
        mode: StoreMode,
    ) -> StoreResult<StoreReport> {
        let epoch = self.epoch;
        let start = Instant::now();
        let report = self.write(|t| storage::store(t, wm, root, mode, epoch))?;
        self.stats.store_time.record(start.elapsed());
        self.stats.stores += report.chunks as u64;
        tracing::debug!(root = %root, ?mode, chunks = report.chunks, edges = report.edges, "stored");
        Ok(report)
    }

    /// Expand a stored chunk into working memory. `Ok(None)` if `lti` was
    /// never allocated.
    pub fn retrieve(
        &mut self,
        wm: &mut WorkingMemory,
        lti: LtiId,
        level: u32,
    ) -> StoreResult<Option<Installed>> {
        let epoch = self.epoch;
        let start = Instant::now();
        let installed = self.write(|t| {
            if registry::find_name(t, lti)?.is_none() {
                return Ok(None);
            }
            retrieval::install(t, wm, lti, level, epoch).map(Some)
        })?;
        let Some(installed) = installed else {
            tracing::debug!(%lti, "retrieve of unknown persistent id");
            return Ok(None);
        };
        self.stats.retrieve_time.record(start.elapsed());
        self.stats.retrievals += 1;
        self.stats.expansions += installed.expanded as u64;
        Ok(Some(installed))
    }

    /// Best stored chunk matching the cue rooted at `cue`, skipping
    /// `prohibited`. Does not touch working memory.
    pub fn query(
        &mut self,
        wm: &WorkingMemory,
        cue: &SymbolRef,
        prohibited: &[LtiId],
    ) -> StoreResult<Option<LtiId>> {
        let epoch = self.epoch;
        let start = Instant::now();
        let best = self.write(|t| retrieval::query(t, wm, cue, prohibited, epoch))?;
        self.stats.query_time.record(start.elapsed());
        self.stats.queries += 1;
        if best.is_some() {
            self.stats.query_hits += 1;
        }
        Ok(best)
    }

    /// Query and, on a match, install the winner at `level`.
    pub fn query_and_install(
        &mut self,
        wm: &mut WorkingMemory,
        cue: &SymbolRef,
        prohibited: &[LtiId],
        level: u32,
    ) -> StoreResult<Option<Installed>> {
        let epoch = self.epoch;
        let start = Instant::now();
        let installed = self.write(|t| {
            match retrieval::query(t, wm, cue, prohibited, epoch)? {
                Some(best) => retrieval::install(t, wm, best, level, epoch).map(Some),
                None => Ok(None),
            }
        })?;
        self.stats.query_time.record(start.elapsed());
        self.stats.queries += 1;
        if let Some(installed) = &installed {
            self.stats.query_hits += 1;
            self.stats.expansions += installed.expanded as u64;
        }
        Ok(installed)
    }

    /// Persistent id of an identifier, without creating one.
    pub fn lti_of(&mut self, sym: &SymbolRef) -> StoreResult<Option<LtiId>> {
        let epoch = self.epoch;
        self.write(|t| registry::lti_of(t, sym, epoch, false))
    }

    /// Live identifier for the chunk first stored as `name`, bound at `level`.
    pub fn lookup(
        &mut self,
        wm: &mut WorkingMemory,
        name: IdName,
        level: u32,
    ) -> StoreResult<Option<SymbolRef>> {
        let epoch = self.epoch;
        self.write(|t| match registry::get_id(t, name)? {
            Some(id) => registry::bind(t, wm.symbols_mut(), id, level, epoch).map(Some),
            None => Ok(None),
        })
    }

    /// Decode one stored chunk. `Ok(None)` if `lti` was never allocated.
    pub fn chunk(&mut self, lti: LtiId) -> StoreResult<Option<ChunkExport>> {
        self.write(|t| match registry::find_name(t, lti)? {
            Some(_) => export::chunk(t, lti).map(Some),
            None => Ok(None),
        })
    }

    /// Decode every stored chunk.
    pub fn export_chunks(&mut self) -> StoreResult<Vec<ChunkExport>> {
        self.write(|t| export::all(t))
    }

    /// Statistics with fresh store sizes.
    pub fn stats(&mut self) -> StoreResult<LtmStats> {
        self.stats.counts = self.write(|t| StoreCounts::read(t))?;
        Ok(self.stats.clone())
    }

    /// Selectivity counters as stored, zero rows dropped.
    pub fn counters(&mut self) -> StoreResult<Counters> {
        self.write(|t| Ok(storage::counters(t)?.nonzero()))
    }

    /// Whether the stored selectivity counters equal a recount of the edges.
    pub fn counters_consistent(&mut self) -> StoreResult<bool> {
        self.write(|t| Ok(storage::counters(t)?.nonzero() == storage::recount(t)?))
    }

    // -----------------------------------------------------------------------
    // Command protocol
    // -----------------------------------------------------------------------

    /// Create the `^ltm` header for `state`.
    pub fn attach_state(&mut self, wm: &mut WorkingMemory, state: &SymbolRef) -> &StateHeader {
        let idx = match self.states.iter().position(|h| Rc::ptr_eq(&h.state, state)) {
            Some(idx) => idx,
            None => {
                self.states.push(StateHeader::attach(wm, state));
                self.states.len() - 1
            }
        };
        &self.states[idx]
    }

    /// Remove the header of a state that went away.
    pub fn detach_state(&mut self, wm: &mut WorkingMemory, state: &SymbolRef) {
        if let Some(idx) = self.states.iter().position(|h| Rc::ptr_eq(&h.state, state)) {
            self.states.remove(idx).detach(wm);
        }
    }

    pub fn header(&self, state: &SymbolRef) -> Option<&StateHeader> {
        self.states.iter().find(|h| Rc::ptr_eq(&h.state, state))
    }

    /// Process every state's command region. Run once per reasoning cycle.
    pub fn run_cycle(&mut self, wm: &mut WorkingMemory) {
        let mut states = std::mem::take(&mut self.states);
        for header in &mut states {
            if header.command_changed(wm, self.epoch) {
                self.respond(wm, header);
                header.settle(wm, self.epoch);
            }
        }
        self.states = states;
    }

    fn respond(&mut self, wm: &mut WorkingMemory, header: &mut StateHeader) {
        header.clear_results(wm);
        if !self.config.enabled {
            return;
        }

        if self.failed {
            header.write_status(wm, Status::Failure);
            return;
        }

        let parsed = match self.parse(wm, &header.command) {
            Ok(parsed) => parsed,
            Err(_) => {
                header.write_status(wm, Status::Failure);
                return;
            }
        };
        let command = match parsed {
            Ok(Some(command)) => command,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(state = %header.state, error = %e, "bad long-term memory command");
                self.stats.bad_commands += 1;
                header.write_status(wm, Status::BadCmd);
                return;
            }
        };

        let level = header.level();
        match command {
            Command::Retrieve { lti, .. } => match self.retrieve(wm, lti, level) {
                Ok(Some(installed)) => {
                    header.write_status(wm, Status::Success);
                    header.write_retrieved(wm, &installed.id);
                }
                Ok(None) | Err(_) => header.write_status(wm, Status::Failure),
            },
            Command::Query { cue, prohibit } => {
                match self.query_and_install(wm, &cue, &prohibit, level) {
                    Ok(Some(installed)) => {
                        header.write_status(wm, Status::Success);
                        header.write_retrieved(wm, &installed.id);
                    }
                    Ok(None) | Err(_) => header.write_status(wm, Status::Failure),
                }
            }
            Command::Store { roots } => {
                let status = match self.store_all(wm, &roots) {
                    Ok(()) => Status::Success,
                    Err(_) => Status::Failure,
                };
                header.write_status(wm, status);
            }
        }
    }

    /// Parse a command region, resolving `^retrieve` and `^prohibit` values
    /// through the name index so markers from an older epoch are refreshed
    /// rather than treated as absent.
    fn parse(
        &mut self,
        wm: &WorkingMemory,
        command: &SymbolRef,
    ) -> StoreResult<Result<Option<Command>, CommandError>> {
        let epoch = self.epoch;
        self.write(|t| {
            let mut lookup = Ok(());
            let parsed = command::parse(wm, command, |sym| {
                match registry::lti_of(t, sym, epoch, false) {
                    Ok(id) => id,
                    Err(e) => {
                        if lookup.is_ok() {
                            lookup = Err(e);
                        }
                        None
                    }
                }
            });
            lookup.map(|()| parsed)
        })
    }

    /// Store every root inside one transaction.
    fn store_all(&mut self, wm: &mut WorkingMemory, roots: &[SymbolRef]) -> StoreResult<()> {
        let mode = self.config.store_mode;
        let wrap = !self.txn.in_transaction();
        if wrap {
            self.begin()?;
        }
        for root in roots {
            self.store(wm, root, mode)?;
        }
        if wrap {
            self.commit()?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Start a new validation epoch.
    ///
    /// Pending work is committed, or discarded if the kernel had failed.
    /// Every cached hash id and persistent-id marker on symbols becomes stale
    /// and the failure flag is cleared.
    pub fn reset(&mut self, wm: &mut WorkingMemory) -> LtmResult<()> {
        let settled = if self.failed {
            self.txn.rollback()
        } else {
            self.txn.commit()
        };
        if let Err(e) = settled {
            tracing::warn!(error = %e, "failed to settle transaction during reset");
            self.txn.rollback()?;
        }
        self.epoch += 1;
        self.failed = false;
        self.resync(wm)?;
        tracing::info!(epoch = self.epoch, "reset long-term memory");
        Ok(())
    }

    /// Wipe the store and start over with an empty schema.
    pub fn reinit(&mut self, wm: &mut WorkingMemory) -> LtmResult<()> {
        let placeholder = TransactionManager::new(durable::open_in_memory()?, CommitPolicy::Eager)?;
        let mut old = std::mem::replace(&mut self.txn, placeholder);
        if let Err(e) = old.rollback().and_then(|()| old.close()) {
            tracing::warn!(error = %e, "discarding pending work before reinit failed");
        }
        drop(old);

        durable::wipe(&self.config)?;
        self.txn = TransactionManager::new(durable::open(&self.config)?, self.config.commit_policy())?;
        self.epoch += 1;
        self.failed = false;
        self.stats = LtmStats::default();
        self.resync(wm)?;
        tracing::info!(epoch = self.epoch, "reinitialized long-term memory");
        Ok(())
    }

    /// Commit pending work and release the store.
    pub fn close(mut self) -> LtmResult<()> {
        if self.failed {
            self.txn.rollback()?;
        }
        self.txn.close()?;
        Ok(())
    }
}

impl std::fmt::Debug for Ltm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ltm")
            .field("config", &self.config)
            .field("txn", &self.txn)
            .field("epoch", &self.epoch)
            .field("failed", &self.failed)
            .field("states", &self.states.len())
            .finish()
    }
}
