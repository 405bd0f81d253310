//! Context chains: the records belonging to one program instance.
//!
//! Slot layout:
//!
//! | Slot | Content                                                                   |
//! |------|---------------------------------------------------------------------------|
//! | 0    | master record, owned by the chain, never empty                            |
//! | 1    | main module record, empty while the instance is in limbo or gone          |
//! | 2..  | library records in load order, empty after unload or reattachment         |
//!
//! Only the master is owned. Every other slot is a [`ContextRef`] into memory the host
//! owns, so a record the host dropped reads as an empty slot.

use std::sync::{Arc, RwLock};

use crate::{
    context::{ContextRc, ContextRef, ProgramId},
    Result,
};

/// Slot of the master record.
pub const MASTER_SLOT: usize = 0;
/// Slot of the main module record.
pub const MAIN_SLOT: usize = 1;
/// First library slot.
pub const FIRST_LIBRARY_SLOT: usize = 2;

/// The ordered records of one program instance.
#[derive(Debug)]
pub struct ContextChain {
    id: ProgramId,
    master: ContextRc,
    slots: RwLock<Vec<Option<ContextRef>>>,
}

impl ContextChain {
    /// Creates a chain `[master, main]`.
    pub(crate) fn new(id: ProgramId, master: ContextRc, main: &ContextRc, capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity.max(FIRST_LIBRARY_SLOT));
        slots.push(Some(ContextRef::new(&master)));
        slots.push(Some(ContextRef::new(main)));

        ContextChain {
            id,
            master,
            slots: RwLock::new(slots),
        }
    }

    /// The program id, equal to the chain's registry index.
    #[must_use]
    pub fn id(&self) -> ProgramId {
        self.id
    }

    /// The master record.
    #[must_use]
    pub fn master(&self) -> &ContextRc {
        &self.master
    }

    /// The current main record, `None` while in limbo.
    ///
    /// # Errors
    /// Returns [`crate::Error::LockError`] if the slot table is poisoned.
    pub fn main(&self) -> Result<Option<ContextRc>> {
        self.slot(MAIN_SLOT)
    }

    /// Returns true if slot 1 references `record`.
    ///
    /// # Errors
    /// Returns [`crate::Error::LockError`] if the slot table is poisoned.
    pub fn is_main(&self, record: &ContextRc) -> Result<bool> {
        let slots = read_lock!(self.slots);
        Ok(slots
            .get(MAIN_SLOT)
            .and_then(Option::as_ref)
            .is_some_and(|main| main.is_valid() && main.points_to(record)))
    }

    /// Installs `record` as the main record.
    ///
    /// # Errors
    /// Returns [`crate::Error::IllegalState`] if slot 1 still holds a different live record.
    pub fn attach_main(&self, record: &ContextRc) -> Result<()> {
        let mut slots = write_lock!(self.slots);
        if let Some(Some(current)) = slots.get(MAIN_SLOT) {
            if current.is_valid() && !current.points_to(record) {
                return Err(illegal_state!(
                    "program {} already has an active main record",
                    self.id
                ));
            }
        }
        slots[MAIN_SLOT] = Some(ContextRef::new(record));
        Ok(())
    }

    /// Empties slot 1. Returns true if it referenced a live record.
    ///
    /// # Errors
    /// Returns [`crate::Error::LockError`] if the slot table is poisoned.
    pub fn clear_main(&self) -> Result<bool> {
        let mut slots = write_lock!(self.slots);
        let previous = slots[MAIN_SLOT].take();
        Ok(previous.is_some_and(|r| r.is_valid()))
    }

    /// Returns the record in `slot`, `None` for an empty slot.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidParameter`] if `slot` is out of range.
    pub fn slot(&self, slot: usize) -> Result<Option<ContextRc>> {
        if slot == MASTER_SLOT {
            return Ok(Some(Arc::clone(&self.master)));
        }

        let slots = read_lock!(self.slots);
        match slots.get(slot) {
            Some(entry) => Ok(entry.as_ref().and_then(ContextRef::upgrade)),
            None => Err(invalid_parameter!(
                "invalid parameter slot = {} (program {} has {} slots)",
                slot,
                self.id,
                slots.len()
            )),
        }
    }

    /// Number of slots including the master and empty slots.
    ///
    /// # Errors
    /// Returns [`crate::Error::LockError`] if the slot table is poisoned.
    pub fn len(&self) -> Result<usize> {
        Ok(read_lock!(self.slots).len())
    }

    /// Appends a library record and returns its slot.
    ///
    /// # Errors
    /// Returns [`crate::Error::LockError`] if the slot table is poisoned.
    pub fn append_library(&self, record: &ContextRc) -> Result<usize> {
        let mut slots = write_lock!(self.slots);
        slots.push(Some(ContextRef::new(record)));
        Ok(slots.len() - 1)
    }

    /// Empties a library slot without shrinking the chain and returns the former record.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidParameter`] for the master or main slot or an
    /// out-of-range slot.
    pub fn detach(&self, slot: usize) -> Result<Option<ContextRc>> {
        if slot < FIRST_LIBRARY_SLOT {
            return Err(invalid_parameter!(
                "invalid parameter slot = {} (not a library slot)",
                slot
            ));
        }

        let mut slots = write_lock!(self.slots);
        let len = slots.len();
        match slots.get_mut(slot) {
            Some(entry) => Ok(entry.take().and_then(|r| r.upgrade())),
            None => Err(invalid_parameter!(
                "invalid parameter slot = {} (program {} has {} slots)",
                slot,
                self.id,
                len
            )),
        }
    }

    /// Returns every library slot with its live record, `None` for empty slots.
    ///
    /// # Errors
    /// Returns [`crate::Error::LockError`] if the slot table is poisoned.
    pub fn libraries(&self) -> Result<Vec<(usize, Option<ContextRc>)>> {
        let slots = read_lock!(self.slots);
        Ok(slots
            .iter()
            .enumerate()
            .skip(FIRST_LIBRARY_SLOT)
            .map(|(slot, entry)| (slot, entry.as_ref().and_then(ContextRef::upgrade)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::new_record;

    fn chain() -> (ContextChain, ContextRc) {
        let main = new_record();
        let chain = ContextChain::new(ProgramId::new(1), new_record(), &main, 4);
        (chain, main)
    }

    #[test]
    fn test_new_chain_layout() {
        let (chain, main) = chain();
        assert_eq!(chain.id(), ProgramId::new(1));
        assert_eq!(chain.len().unwrap(), 2);
        assert!(Arc::ptr_eq(&chain.slot(MASTER_SLOT).unwrap().unwrap(), chain.master()));
        assert!(chain.is_main(&main).unwrap());
        assert!(chain.libraries().unwrap().is_empty());
    }

    #[test]
    fn test_attach_main_rejects_foreign_live_record() {
        let (chain, main) = chain();
        let other = new_record();

        assert!(chain.attach_main(&main).is_ok());
        assert!(matches!(
            chain.attach_main(&other),
            Err(crate::Error::IllegalState { .. })
        ));

        assert!(chain.clear_main().unwrap());
        assert!(chain.main().unwrap().is_none());
        chain.attach_main(&other).unwrap();
        assert!(chain.is_main(&other).unwrap());
    }

    #[test]
    fn test_dropped_main_reads_as_empty() {
        let (chain, main) = chain();
        drop(main);
        assert!(chain.main().unwrap().is_none());

        let replacement = new_record();
        chain.attach_main(&replacement).unwrap();
        assert!(chain.is_main(&replacement).unwrap());
    }

    #[test]
    fn test_library_slots() {
        let (chain, _main) = chain();
        let lib_a = new_record();
        let lib_b = new_record();

        assert_eq!(chain.append_library(&lib_a).unwrap(), 2);
        assert_eq!(chain.append_library(&lib_b).unwrap(), 3);

        let detached = chain.detach(2).unwrap().unwrap();
        assert!(Arc::ptr_eq(&detached, &lib_a));
        assert_eq!(chain.len().unwrap(), 4);

        let libs = chain.libraries().unwrap();
        assert_eq!(libs.len(), 2);
        assert!(libs[0].1.is_none());
        assert!(Arc::ptr_eq(libs[1].1.as_ref().unwrap(), &lib_b));
    }

    #[test]
    fn test_slot_bounds() {
        let (chain, _main) = chain();
        assert!(chain.slot(5).is_err());
        assert!(chain.detach(MAIN_SLOT).is_err());
        assert!(chain.detach(9).is_err());
    }
}
