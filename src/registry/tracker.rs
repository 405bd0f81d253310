//! Thread/program tracker.
//!
//! Remembers, for every OS thread that ever called into the crate, the program instance
//! it executed last. The host reuses threads across unrelated instances, so this is the
//! only way to learn which instance loaded a library, and it is what error diagnostics
//! are attributed to.
//!
//! Entries live in an append-only `boxcar::Vec` in first-seen order, with a `DashMap`
//! index from thread id to entry position. Looking up and updating an existing thread is
//! lock-free; only appending a new thread is serialized by the registry lock.

use std::sync::atomic::{AtomicU32, Ordering};

use dashmap::DashMap;

use super::RegistryGuard;
use crate::context::{ProgramId, ThreadId};

/// One tracked thread.
#[derive(Debug)]
pub struct ThreadEntry {
    thread: ThreadId,
    program: AtomicU32,
}

impl ThreadEntry {
    /// The tracked thread.
    #[must_use]
    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    /// The program the thread executed last, unassigned if none yet.
    #[must_use]
    pub fn program(&self) -> ProgramId {
        ProgramId::new(self.program.load(Ordering::Acquire))
    }
}

/// Result of a tracker update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedThread {
    /// Position of the thread in first-seen order.
    pub index: usize,
    /// True if the thread was seen for the first time.
    pub inserted: bool,
}

/// Mapping of OS threads to the program each executed last.
#[derive(Debug)]
pub struct ThreadProgramMap {
    entries: boxcar::Vec<ThreadEntry>,
    index: DashMap<ThreadId, usize>,
    last_ui_program: AtomicU32,
}

impl Default for ThreadProgramMap {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadProgramMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: boxcar::Vec::new(),
            index: DashMap::new(),
            last_ui_program: AtomicU32::new(0),
        }
    }

    /// Returns the position of `thread`, if it is tracked.
    pub fn find(&self, thread: ThreadId) -> Option<usize> {
        self.index.get(&thread).map(|entry| *entry.value())
    }

    /// Records `program` for an already tracked thread.
    ///
    /// An unassigned `program` leaves the stored value untouched. Returns `None` if the
    /// thread is not tracked.
    pub fn update(&self, thread: ThreadId, program: ProgramId) -> Option<usize> {
        let index = self.find(thread)?;
        if !program.is_unassigned() {
            if let Some(entry) = self.entries.get(index) {
                entry.program.store(program.value(), Ordering::Release);
            }
        }
        Some(index)
    }

    /// Appends `thread` with `program` (possibly unassigned).
    ///
    /// The caller proves it holds the registry lock by passing its guard. A thread that
    /// was appended concurrently before the lock was taken is updated instead.
    pub(crate) fn insert(
        &self,
        _guard: &RegistryGuard<'_>,
        thread: ThreadId,
        program: ProgramId,
    ) -> TrackedThread {
        if let Some(index) = self.update(thread, program) {
            return TrackedThread {
                index,
                inserted: false,
            };
        }

        let index = self.entries.push(ThreadEntry {
            thread,
            program: AtomicU32::new(program.value()),
        });
        self.index.insert(thread, index);

        TrackedThread {
            index,
            inserted: true,
        }
    }

    /// Records `program` as the last program of the UI thread.
    pub fn set_last_ui_program(&self, program: ProgramId) {
        self.last_ui_program
            .store(program.value(), Ordering::Release);
    }

    /// The program the UI thread executed last, unassigned if none yet.
    #[must_use]
    pub fn last_ui_program(&self) -> ProgramId {
        ProgramId::new(self.last_ui_program.load(Ordering::Acquire))
    }

    /// The program `thread` executed last, unassigned if the thread is unknown.
    #[must_use]
    pub fn last_program(&self, thread: ThreadId) -> ProgramId {
        self.find(thread)
            .and_then(|index| self.entries.get(index))
            .map_or(ProgramId::UNASSIGNED, ThreadEntry::program)
    }

    /// Number of tracked threads.
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.entries.count()
    }

    /// Iterates over all tracked threads in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = &ThreadEntry> {
        self.entries.iter().map(|(_, entry)| entry)
    }
}
