//!
//! @file vm_hook.rs
//! @author Andrew Spaulding (Kasplat)
//! @brief Ownership of a single patched table slot.
//! @bug No known bugs.
//!

use std::mem::size_of;
use std::sync::Arc;

use vmem::{Allocation, WORD};

///
/// Owns one patched, pointer sized slot, and writes its original value back when dropped or
/// reset.
///
/// The restore is unconditional: whatever produced the handle is responsible for validating the
/// slot, and nothing is checked again here. If the slot lives in a private table, the handle
/// shares ownership of that table so the slot remains valid for as long as the handle does.
///
/// Replacing a handle (`a = b`) releases the slot `a` owned before taking `b`'s.
///
#[must_use]
#[derive(Default)]
pub struct VmHook {
    slot: usize,
    original: usize,
    new: usize,
    _table: Option<Arc<Allocation>>
}

impl VmHook {
    ///
    /// Takes ownership of a slot which has already been overwritten with new.
    ///
    /// In order to use this function safely, the slot must remain valid for as long as the
    /// handle is alive.
    ///
    pub(crate) unsafe fn new(
        slot: usize,
        original: usize,
        new: usize,
        table: Option<Arc<Allocation>>
    ) -> Self {
        Self { slot, original, new, _table: table }
    }

    /// Checks if this handle owns a slot.
    pub fn is_empty(
        &self
    ) -> bool {
        self.slot == 0
    }

    /// Gets the address of the owned slot, or zero.
    pub fn slot(
        &self
    ) -> usize {
        self.slot
    }

    /// Gets the value the slot held before it was patched.
    pub fn original_address(
        &self
    ) -> usize {
        self.original
    }

    /// Gets the value the slot was patched with.
    pub fn new_address(
        &self
    ) -> usize {
        self.new
    }

    ///
    /// Gets the original value of the slot as a function pointer, so the hook can call through
    /// to the method it replaced.
    ///
    /// In order to use this function safely, F must match the signature of the original method.
    ///
    pub unsafe fn original<F: Copy>(
        &self
    ) -> F {
        assert!(size_of::<F>() == size_of::<usize>());
        assert!(self.original != 0);
        std::mem::transmute_copy::<usize, F>(&self.original)
    }

    /// Restores the slot, leaving the handle empty.
    pub fn reset(
        &mut self
    ) {
        *self = Self::default();
    }

    /// Writes the original value back, if a slot is owned.
    fn destroy(
        &mut self
    ) {
        if self.slot == 0 {
            return;
        }

        let (slot, original) = (self.slot, self.original);

        // SAFETY: The creator of this handle promised the slot is valid while we are alive.
        let res = unsafe { vmem::use_region(slot, WORD, || vmem::store(slot, original)) };
        if let Err(e) = res {
            tracing::warn!("could not restore slot {:#x} to {:#x}: {}", slot, original, e);
        }

        self.slot = 0;
        self.original = 0;
        self.new = 0;
        self._table = None;
    }
}

impl Drop for VmHook {
    fn drop(
        &mut self
    ) {
        self.destroy();
    }
}

impl std::fmt::Debug for VmHook {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>
    ) -> Result<(), std::fmt::Error> {
        write!(f, "VmHook {{ slot: {:#x}, original: {:#x}, new: {:#x} }}",
            self.slot, self.original, self.new)
    }
}
