//! The context registry.
//!
//! [`ContextRegistry`] is the single owned structure holding every [`ContextChain`] and
//! the [`ThreadProgramMap`]. It is created once at startup and handed to the components
//! that need it, usually as an `Arc`.
//!
//! # Storage
//!
//! Chains live in an append-only `boxcar::Vec` indexed by program id. Index 0 is a
//! permanent empty sentinel so that a chain's index always equals its id. Appending never
//! moves existing chains, so a `&ContextChain` stays valid while other threads create new
//! ones.
//!
//! # Locking
//!
//! One registry mutex serializes chain creation, thread registration, the limbo scan and
//! cross-chain reattachment. Record locks are never held while the registry mutex is
//! acquired, which keeps the lock order global mutex first, record second.
//!
//! # Master mirroring
//!
//! [`ContextRegistry::update`] applies a change to a record and, for attached main module
//! records, applies the same change to the chain's master. The master thereby always holds
//! the last known state of slot 1 and is what a resurrected record is restored from.

pub mod chain;
pub mod tracker;

use std::sync::{Arc, Mutex, MutexGuard, RwLock};

pub use chain::{ContextChain, FIRST_LIBRARY_SLOT, MAIN_SLOT, MASTER_SLOT};
pub use tracker::{ThreadEntry, ThreadProgramMap, TrackedThread};

use crate::{
    context::{
        ContextRc, ExecutionContext, ProgramId, ProgramKind, ThreadId, UninitReason,
        WindowHandle,
    },
    Result,
};

/// Criteria of an indicator that is waiting in limbo to be resurrected.
#[derive(Debug, Clone, Copy)]
pub struct LimboQuery<'a> {
    /// The host's UI thread; indicators only ever run there.
    pub ui_thread: ThreadId,
    /// Display surface the indicator is attached to.
    pub surface: Option<WindowHandle>,
    /// Program name.
    pub program_name: &'a str,
    /// Uninit cause the indicator left with.
    pub uninit_reason: UninitReason,
}

impl LimboQuery<'_> {
    /// Returns true if `master` is an indicator in limbo matching this query.
    #[must_use]
    pub fn matches(&self, master: &ExecutionContext) -> bool {
        master.thread_id == self.ui_thread
            && self.surface.is_some()
            && master.surface == self.surface
            && master.program_kind == Some(ProgramKind::Indicator)
            && master.program_name == self.program_name
            && master.uninit_reason == self.uninit_reason
            && master.root_function.is_none()
    }
}

/// Held registry lock.
///
/// Only the registry can create one, so functions taking it as an argument can rely on
/// the lock being held.
pub(crate) struct RegistryGuard<'a> {
    _lock: MutexGuard<'a, ()>,
}

/// Owner of all context chains and the thread/program map.
#[derive(Debug)]
pub struct ContextRegistry {
    chains: boxcar::Vec<Option<ContextChain>>,
    threads: ThreadProgramMap,
    lock: Mutex<()>,
    chain_capacity: usize,
}

impl Default for ContextRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::with_chain_capacity(8)
    }

    /// Creates an empty registry whose chains reserve `capacity` slots.
    #[must_use]
    pub fn with_chain_capacity(capacity: usize) -> Self {
        let chains = boxcar::Vec::new();
        chains.push(None);

        ContextRegistry {
            chains,
            threads: ThreadProgramMap::new(),
            lock: Mutex::new(()),
            chain_capacity: capacity,
        }
    }

    /// Creates a new chain `[master, record]` and returns its id.
    ///
    /// The master is a snapshot of `record` taken after the new id was assigned to it.
    /// Ids are strictly increasing and never 0.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidParameter`] if `record` is already attached.
    pub fn create_chain(&self, record: &ContextRc) -> Result<ProgramId> {
        let _guard = self.guard()?;

        let id = u32::try_from(self.chains.count())
            .map(ProgramId::new)
            .map_err(|_| illegal_state!("program id space exhausted"))?;

        let master = {
            let mut ctx = write_lock!(record);
            if ctx.is_attached() {
                return Err(invalid_parameter!(
                    "invalid parameter record (already attached to program {})",
                    ctx.program_id
                ));
            }
            ctx.program_id = id;
            Arc::new(RwLock::new(ctx.clone()))
        };

        self.chains.push(Some(ContextChain::new(
            id,
            master,
            record,
            self.chain_capacity,
        )));
        Ok(id)
    }

    /// Returns the chain of `id`.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidParameter`] for id 0 or an unknown id.
    pub fn chain(&self, id: ProgramId) -> Result<&ContextChain> {
        if id.is_unassigned() {
            return Err(invalid_parameter!("invalid parameter programId = 0"));
        }

        match self.chains.get(id.index()) {
            Some(Some(chain)) => Ok(chain),
            _ => Err(invalid_parameter!(
                "invalid parameter programId = {} (out of range)",
                id
            )),
        }
    }

    /// Number of chains, not counting the sentinel.
    #[must_use]
    pub fn chain_count(&self) -> usize {
        self.chains.count().saturating_sub(1)
    }

    /// Iterates over all chains in registration order.
    pub fn chains(&self) -> impl Iterator<Item = &ContextChain> {
        self.chains.iter().filter_map(|(_, chain)| chain.as_ref())
    }

    /// Appends a library record to the chain of `id` and returns its slot.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidParameter`] for an unknown id.
    pub fn append_library(&self, id: ProgramId, record: &ContextRc) -> Result<usize> {
        self.chain(id)?.append_library(record)
    }

    /// Empties a library slot of the chain of `id`, returning the former record.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidParameter`] for an unknown id or a non-library slot.
    pub fn detach_library(&self, id: ProgramId, slot: usize) -> Result<Option<ContextRc>> {
        self.chain(id)?.detach(slot)
    }

    /// Returns the first chain, in registration order, whose master satisfies `predicate`.
    ///
    /// # Errors
    /// Returns [`crate::Error::LockError`] if the registry or a master is poisoned.
    pub fn scan<F>(&self, predicate: F) -> Result<Option<ProgramId>>
    where
        F: Fn(&ExecutionContext) -> bool,
    {
        let _guard = self.guard()?;

        for chain in self.chains() {
            let master = read_lock!(chain.master());
            if predicate(&master) {
                return Ok(Some(chain.id()));
            }
        }
        Ok(None)
    }

    /// Finds the indicator in limbo a freshly allocated record is the resurrection of.
    ///
    /// Returns `None` without scanning if the query carries no display surface.
    ///
    /// # Errors
    /// Returns [`crate::Error::LockError`] if the registry or a master is poisoned.
    pub fn find_indicator_in_limbo(&self, query: &LimboQuery<'_>) -> Result<Option<ProgramId>> {
        if query.surface.is_none() {
            return Ok(None);
        }
        self.scan(|master| query.matches(master))
    }

    /// Returns a copy of the master record of `id`.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidParameter`] for an unknown id.
    pub fn master_snapshot(&self, id: ProgramId) -> Result<ExecutionContext> {
        let chain = self.chain(id)?;
        let master = read_lock!(chain.master());
        Ok(master.clone())
    }

    /// Applies `change` to `record` and mirrors it into the master of the record's chain.
    ///
    /// Mirroring only happens for attached records that are not libraries.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidParameter`] if the record names an unknown chain.
    pub fn update<F>(&self, record: &ContextRc, change: F) -> Result<()>
    where
        F: Fn(&mut ExecutionContext),
    {
        let (id, mirror) = {
            let mut ctx = write_lock!(record);
            change(&mut ctx);
            (ctx.program_id, ctx.is_attached() && !ctx.is_library())
        };

        if mirror {
            let chain = self.chain(id)?;
            if !Arc::ptr_eq(chain.master(), record) {
                let mut master = write_lock!(chain.master());
                change(&mut master);
            }
        }
        Ok(())
    }

    /// Applies `change` to the master record of `id` only.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidParameter`] for an unknown id.
    pub fn update_master<F>(&self, id: ProgramId, change: F) -> Result<()>
    where
        F: FnOnce(&mut ExecutionContext),
    {
        let chain = self.chain(id)?;
        let mut master = write_lock!(chain.master());
        change(&mut master);
        Ok(())
    }

    /// Records that `thread` executes `program`.
    ///
    /// An unassigned `program` registers the thread without changing its last program.
    /// On the UI thread a non-zero `program` also becomes the last UI thread program.
    ///
    /// # Errors
    /// Returns [`crate::Error::LockError`] if registering a new thread hits a poisoned lock.
    pub fn store_thread_program(
        &self,
        thread: ThreadId,
        program: ProgramId,
        is_ui_thread: bool,
    ) -> Result<TrackedThread> {
        let tracked = match self.threads.update(thread, program) {
            Some(index) => TrackedThread {
                index,
                inserted: false,
            },
            None => {
                let guard = self.guard()?;
                self.threads.insert(&guard, thread, program)
            }
        };

        if is_ui_thread && !program.is_unassigned() {
            self.threads.set_last_ui_program(program);
        }
        Ok(tracked)
    }

    /// The program `thread` executed last.
    #[must_use]
    pub fn last_program(&self, thread: ThreadId) -> ProgramId {
        self.threads.last_program(thread)
    }

    /// The program the UI thread executed last.
    #[must_use]
    pub fn last_ui_program(&self) -> ProgramId {
        self.threads.last_ui_program()
    }

    /// Number of tracked threads.
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.threads.thread_count()
    }

    /// The thread/program map.
    #[must_use]
    pub fn threads(&self) -> &ThreadProgramMap {
        &self.threads
    }

    /// Acquires the registry lock.
    ///
    /// # Errors
    /// Returns [`crate::Error::LockError`] if the registry lock is poisoned.
    pub(crate) fn guard(&self) -> Result<RegistryGuard<'_>> {
        Ok(RegistryGuard {
            _lock: lock!(self.lock),
        })
    }

    /// Runs `f` while holding the registry lock.
    ///
    /// Used for operations touching several chains at once. `f` must not call back into
    /// methods of this registry that take the lock themselves.
    ///
    /// # Errors
    /// Returns [`crate::Error::LockError`] if the registry lock is poisoned, or whatever
    /// `f` returns.
    pub(crate) fn exclusive<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let _guard = self.guard()?;
        f()
    }
}
