//!
//! @file duplicate.rs
//! @author Andrew Spaulding (Kasplat)
//! @brief Per-object hooking through a private copy of a dispatch table.
//! @bug No known bugs.
//!
//! The original table is never written to. Instead, the hook allocates a duplicate of it and
//! points the attached objects at the duplicate, whose slots may then be changed freely. Other
//! objects of the same class keep using the original table.
//!

use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::Arc;

use vmem::{Allocate, Allocation, PageAllocator, WORD};

use crate::{count_methods, Layout, VmHook, VmtHookError};

///
/// A private dispatch table, and the set of objects currently pointed at it.
///
/// Dropping or resetting the hook points every attached object back at its original table,
/// unless that object has since been pointed elsewhere, and then releases the private table.
///
#[derive(Default)]
pub struct VmtHook {
    /// Attached object -> the table it pointed at before attaching.
    objects: HashMap<usize, usize>,
    allocation: Option<Arc<Allocation>>,

    /// Address of method 0 in the private table.
    methods: usize,
    len: usize,
    layout: Layout
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Attaching
////////////////////////////////////////////////////////////////////////////////////////////////////

impl VmtHook {
    ///
    /// Gives the object a private copy of its dispatch table.
    ///
    /// In order to use this function safely, the object must use the default layout and must
    /// outlive its attachment to the hook (or be removed from it first).
    ///
    pub unsafe fn create(
        object: *mut c_void
    ) -> Result<Self, VmtHookError> {
        Self::create_with(object, Layout::default(), PageAllocator::global())
    }

    ///
    /// Gives the object a private copy of its dispatch table, using the given layout and
    /// allocator.
    ///
    /// On failure, the object is left untouched.
    ///
    pub unsafe fn create_with<A: Allocate + ?Sized>(
        object: *mut c_void,
        layout: Layout,
        allocator: &A
    ) -> Result<Self, VmtHookError> {
        let object = object as usize;
        if object == 0 {
            return Err(VmtHookError::BadTable);
        }

        let vptr = layout.vptr(object);
        let original = vmem::load(vptr);
        let len = count_methods(original as *const c_void, &layout)?;

        // The type info words are copied along with the methods.
        let prefix = layout.prefix_size();
        let start = original.checked_sub(prefix).ok_or(VmtHookError::BadTable)?;
        if prefix > 0 && !vmem::is_readable(start, prefix) {
            return Err(VmtHookError::BadTable);
        }

        let size = prefix + len * WORD;
        let allocation = allocator.allocate(size)?;
        std::ptr::copy_nonoverlapping(start as *const u8, allocation.data(), size);

        let methods = allocation.address() + prefix;
        vmem::store(vptr, methods);

        tracing::debug!(
            "object {:#x}: table {:#x} ({} methods) duplicated to {:#x}",
            object, original, len, methods
        );

        let mut hook = Self {
            objects: HashMap::new(),
            allocation: Some(Arc::new(allocation)),
            methods,
            len,
            layout
        };
        hook.objects.insert(object, original);

        Ok(hook)
    }

    ///
    /// Points another object at the private table.
    ///
    /// The object should be of the same class as the one the hook was created from. Applying
    /// an attached object which still uses the private table does nothing. An object which uses
    /// the private table without being attached (one removed while its table pointer was
    /// read only) is rejected, since its original table is no longer known.
    ///
    /// In order to use this function safely, the object must share the layout given at creation
    /// and must outlive its attachment to the hook (or be removed from it first).
    ///
    pub unsafe fn apply(
        &mut self,
        object: *mut c_void
    ) -> Result<(), VmtHookError> {
        if self.allocation.is_none() {
            return Err(VmtHookError::Empty);
        }

        let object = object as usize;
        if object == 0 {
            return Err(VmtHookError::BadTable);
        }

        let vptr = self.layout.vptr(object);
        let current = vmem::load(vptr);
        if current == self.methods {
            if !self.objects.contains_key(&object) {
                tracing::warn!("object {:#x}: uses {:#x} but is not attached", object, self.methods);
                return Err(VmtHookError::Untracked);
            }

            return Ok(());
        }

        // If the object was attached before and has been repointed since, we restore to
        // whatever it uses now.
        self.objects.insert(object, current);
        vmem::store(vptr, self.methods);

        tracing::debug!("object {:#x}: attached to {:#x} (was {:#x})", object, self.methods, current);
        Ok(())
    }

    ///
    /// Detaches the object, pointing it back at its original table.
    ///
    /// If the table pointer can no longer be written, or something else has replaced it since
    /// the object was attached, the pointer is left alone. Either way the object is forgotten.
    ///
    pub fn remove(
        &mut self,
        object: *mut c_void
    ) {
        let object = object as usize;
        if let Some(original) = self.objects.remove(&object) {
            self.restore(object, original);
        }
    }

    /// Detaches every object and releases the private table.
    pub fn reset(
        &mut self
    ) {
        *self = Self::default();
    }

    /// Points the object back at the given table, if it still points at ours.
    fn restore(
        &self,
        object: usize,
        original: usize
    ) -> bool {
        let vptr = self.layout.vptr(object);

        if !vmem::is_writable(vptr, WORD) {
            tracing::warn!("object {:#x}: table pointer is not writable, leaving it", object);
            return false;
        }

        // SAFETY: Attached objects must outlive their attachment, and the word is writable.
        unsafe {
            let current = vmem::load(vptr);
            if current != self.methods {
                tracing::warn!(
                    "object {:#x}: table pointer changed to {:#x} since attaching, leaving it",
                    object, current
                );
                return false;
            }

            vmem::store(vptr, original);
        }

        tracing::debug!("object {:#x}: restored table {:#x}", object, original);
        true
    }

    fn destroy(
        &mut self
    ) {
        for (object, original) in std::mem::take(&mut self.objects) {
            self.restore(object, original);
        }

        self.allocation = None;
        self.methods = 0;
        self.len = 0;
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Private table access
////////////////////////////////////////////////////////////////////////////////////////////////////

impl VmtHook {
    ///
    /// Replaces a method in the private table.
    ///
    /// The returned handle puts the previous method back when dropped, and keeps the private
    /// table alive until then, even if this hook is reset first.
    ///
    /// In order to use this function safely, the new function must be callable wherever the
    /// method it replaces is.
    ///
    pub unsafe fn hook_method(
        &mut self,
        index: usize,
        new: *const c_void
    ) -> Result<VmHook, VmtHookError> {
        let Some(allocation) = &self.allocation else {
            return Err(VmtHookError::Empty);
        };

        if index >= self.len {
            return Err(VmtHookError::BadSlot { index, len: self.len });
        }

        let slot = self.methods + index * WORD;
        let original = vmem::load(slot);
        vmem::store(slot, new as usize);

        tracing::debug!("private table {:#x}: method {} {:#x} -> {:#x}", self.methods, index, original, new as usize);
        Ok(VmHook::new(slot, original, new as usize, Some(allocation.clone())))
    }

    /// Gets a pointer to method 0 of the private table, or null if there is none.
    pub fn methods(
        &self
    ) -> *mut *const c_void {
        self.methods as *mut *const c_void
    }

    /// Gets the number of methods in the private table.
    pub fn method_count(
        &self
    ) -> usize {
        self.len
    }

    /// Checks if the given object is attached to this hook.
    pub fn is_attached(
        &self,
        object: *const c_void
    ) -> bool {
        self.objects.contains_key(&(object as usize))
    }

    /// Gets the number of attached objects.
    pub fn object_count(
        &self
    ) -> usize {
        self.objects.len()
    }

    /// Gets the table the given object used before it was attached.
    pub fn original_table(
        &self,
        object: *const c_void
    ) -> Option<*const c_void> {
        self.objects.get(&(object as usize)).map(|t| *t as *const c_void)
    }
}

impl Drop for VmtHook {
    fn drop(
        &mut self
    ) {
        self.destroy();
    }
}

impl std::fmt::Debug for VmtHook {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>
    ) -> Result<(), std::fmt::Error> {
        write!(f, "VmtHook {{ methods: {:#x}, len: {}, objects: {} }}",
            self.methods, self.len, self.objects.len())
    }
}
