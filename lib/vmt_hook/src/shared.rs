//!
//! @file shared.rs
//! @author Andrew Spaulding (Kasplat)
//! @brief Class wide hooking by patching a shared dispatch table in place.
//! @bug No known bugs.
//!
//! Every object using the table sees a change made here. The hook remembers the value each slot
//! had before it was first hooked, so that value is what gets restored no matter how many times
//! the slot is hooked over.
//!

use std::ffi::c_void;

use vmem::WORD;

use crate::{SharedVmtHookError, VmHook};

/// Records the value a slot held before it was first hooked.
#[derive(Debug, Clone, Copy)]
struct Entry {
    index: usize,
    original: usize
}

/// Patches the slots of a dispatch table shared by every instance of a class.
#[derive(Default)]
pub struct SharedVmtHook {
    table: usize,
    entries: Vec<Entry>
}

impl SharedVmtHook {
    ///
    /// Attaches to the given table.
    ///
    /// The table is accepted if its first slot holds the address of executable memory. Nothing
    /// is written until a slot is hooked.
    ///
    /// In order to use this function safely, the table must outlive the hook.
    ///
    pub unsafe fn create(
        table: *mut c_void
    ) -> Result<Self, SharedVmtHookError> {
        let table = table as usize;
        if !vmem::is_readable(table, WORD) || !vmem::is_executable(vmem::load(table)) {
            return Err(SharedVmtHookError::BadTable);
        }

        tracing::debug!("shared table {:#x}: attached", table);
        Ok(Self { table, entries: Vec::new() })
    }

    ///
    /// Replaces the method in the given slot.
    ///
    /// The returned handle holds the value the slot had before this call. Dropping it writes that
    /// value back, independently of this hook; keep it alive for as long as the hook should be
    /// in place, or use unhook() to restore the original method.
    ///
    /// In order to use this function safely, the slot must be within the table, and the new
    /// function must be callable wherever the method it replaces is.
    ///
    pub unsafe fn hook(
        &mut self,
        index: usize,
        new: *const c_void
    ) -> Result<VmHook, SharedVmtHookError> {
        if self.table == 0 {
            return Err(SharedVmtHookError::BadTable);
        }

        let slot = self.slot(index).ok_or(SharedVmtHookError::BadTable)?;
        let _prot = vmem::unprotect(slot, WORD)?;
        let current = vmem::load(slot);

        if self.find(index).is_none() {
            self.entries.try_reserve(1).map_err(|_| SharedVmtHookError::OutOfMemory)?;
            self.entries.push(Entry { index, original: current });
        }

        vmem::store(slot, new as usize);

        tracing::debug!("shared table {:#x}: slot {} {:#x} -> {:#x}", self.table, index, current, new as usize);
        Ok(VmHook::new(slot, current, new as usize, None))
    }

    ///
    /// Restores the method the given slot held before it was first hooked.
    ///
    /// If the slot can't be made writable it stays hooked, and the entry is kept.
    ///
    pub fn unhook(
        &mut self,
        index: usize
    ) -> Result<(), SharedVmtHookError> {
        if self.table == 0 {
            return Err(SharedVmtHookError::BadTable);
        }

        let pos = self.entries
            .iter()
            .position(|e| e.index == index)
            .ok_or(SharedVmtHookError::NotFound(index))?;
        let slot = self.slot(index).ok_or(SharedVmtHookError::NotFound(index))?;

        // SAFETY: The table outlives the hook, and the slot was written by hook().
        unsafe {
            let _prot = vmem::unprotect(slot, WORD)?;
            let entry = self.entries.swap_remove(pos);
            vmem::store(slot, entry.original);

            tracing::debug!("shared table {:#x}: slot {} restored to {:#x}", self.table, index, entry.original);
        }

        Ok(())
    }

    /// Restores every hooked slot and detaches from the table.
    pub fn reset(
        &mut self
    ) {
        *self = Self::default();
    }

    /// Gets the value the given slot held before it was first hooked.
    pub fn original(
        &self,
        index: usize
    ) -> Option<*const c_void> {
        self.find(index).map(|e| e.original as *const c_void)
    }

    /// Checks if the given slot is hooked.
    pub fn is_hooked(
        &self,
        index: usize
    ) -> bool {
        self.find(index).is_some()
    }

    /// Gets the number of hooked slots.
    pub fn hook_count(
        &self
    ) -> usize {
        self.entries.len()
    }

    /// Gets the table this hook patches, or null.
    pub fn table(
        &self
    ) -> *mut c_void {
        self.table as *mut c_void
    }

    fn slot(
        &self,
        index: usize
    ) -> Option<usize> {
        index.checked_mul(WORD).and_then(|off| self.table.checked_add(off))
    }

    fn find(
        &self,
        index: usize
    ) -> Option<&Entry> {
        self.entries.iter().find(|e| e.index == index)
    }

    ///
    /// Puts back every original we still hold.
    ///
    /// Slots which can't be made writable are skipped. Nothing here can fail, since this runs
    /// from drop.
    ///
    fn destroy(
        &mut self
    ) {
        let table = self.table;
        for entry in std::mem::take(&mut self.entries) {
            // Entries are only recorded for slots hook() could address.
            let Some(slot) = self.slot(entry.index) else {
                continue;
            };

            // SAFETY: The table outlives the hook.
            match unsafe { vmem::use_region(slot, WORD, || vmem::store(slot, entry.original)) } {
                Ok(()) => tracing::debug!("shared table {:#x}: slot {} restored", table, entry.index),
                Err(e) => tracing::warn!("shared table {:#x}: slot {} left hooked: {}", table, entry.index, e)
            }
        }

        self.table = 0;
    }
}

impl Drop for SharedVmtHook {
    fn drop(
        &mut self
    ) {
        self.destroy();
    }
}

impl std::fmt::Debug for SharedVmtHook {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>
    ) -> Result<(), std::fmt::Error> {
        f.debug_struct("SharedVmtHook")
            .field("table", &format_args!("{:#x}", self.table))
            .field("entries", &self.entries)
            .finish()
    }
}
