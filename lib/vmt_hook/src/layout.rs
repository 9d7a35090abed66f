//!
//! @file layout.rs
//! @author Andrew Spaulding (Kasplat)
//! @brief Binary layout of objects and dispatch tables, and table length inference.
//! @bug Length inference is a heuristic. Data following the last method which happens to look
//!      like a code address will be counted as a method.
//!

use std::ffi::c_void;

use vmem::WORD;

use crate::VmtHookError;

///
/// Describes where an object keeps its table pointer, and what surrounds the table.
///
/// These are properties of the compiler which built the target, not universal facts, so they are
/// configured here rather than assumed by the hooks.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    /// Byte offset of the table pointer within an object.
    pub vptr_offset: usize,

    /// Number of words before method 0 which belong to the table (type information).
    pub type_info_slots: usize,

    /// Scanning gives up, and the table is rejected, past this many methods.
    pub max_methods: usize,

    /// A verified method count. When set, no scanning is done.
    pub method_count: Option<usize>
}

impl Layout {
    /// Default scan limit. Far larger than any real class hierarchy produces.
    pub const DEFAULT_MAX_METHODS: usize = 4096;

    /// MSVC: the complete object locator sits in the word before method 0.
    pub const fn msvc() -> Self {
        Self {
            vptr_offset: 0,
            type_info_slots: 1,
            max_methods: Self::DEFAULT_MAX_METHODS,
            method_count: None
        }
    }

    /// Itanium C++ ABI: offset-to-top, then the type_info pointer, then method 0.
    pub const fn itanium() -> Self {
        Self {
            type_info_slots: 2,
            ..Self::msvc()
        }
    }

    /// Uses a known method count instead of scanning.
    pub const fn with_method_count(
        self,
        count: usize
    ) -> Self {
        Self {
            method_count: Some(count),
            ..self
        }
    }

    /// Gets the address of the table pointer inside the given object.
    pub fn vptr(
        &self,
        object: usize
    ) -> usize {
        object + self.vptr_offset
    }

    /// Gets the number of bytes the table occupies before method 0.
    pub fn prefix_size(
        &self
    ) -> usize {
        self.type_info_slots * WORD
    }
}

impl Default for Layout {
    fn default() -> Self {
        Self::msvc()
    }
}

///
/// Determines how many methods the given table has.
///
/// Unless the layout carries a verified count, entries are counted from method 0 up to the first
/// one which is not an address of executable memory. Pages are checked for readability before
/// they are read, so the scan stops rather than faulting at the end of a mapping.
///
/// In order to use this function safely, the given address must be a table or unmapped.
///
pub unsafe fn count_methods(
    table: *const c_void,
    layout: &Layout
) -> Result<usize, VmtHookError> {
    let table = table as usize;
    if table == 0 {
        return Err(VmtHookError::BadTable);
    }

    if let Some(count) = layout.method_count {
        let size = count.checked_mul(WORD).ok_or(VmtHookError::BadTable)?;
        if count == 0 || !vmem::is_readable(table, size) {
            return Err(VmtHookError::BadTable);
        }

        return Ok(count);
    }

    let page = vmem::page_size();
    let mut readable_until = table;
    for count in 0..=layout.max_methods {
        let entry = table + count * WORD;

        if entry + WORD > readable_until {
            if !vmem::is_readable(entry, WORD) {
                return if count == 0 { Err(VmtHookError::BadTable) } else { Ok(count) };
            }

            readable_until = (entry + WORD).next_multiple_of(page);
        }

        if !vmem::is_executable(vmem::load(entry)) {
            return if count == 0 { Err(VmtHookError::BadTable) } else { Ok(count) };
        }
    }

    tracing::warn!(
        "table at {:#x} has more than {} methods, refusing to copy it",
        table,
        layout.max_methods
    );
    Err(VmtHookError::BadTable)
}
