//!
//! @file protect.rs
//! @author Andrew Spaulding (Kasplat)
//! @brief Protection queries and scoped write access to process memory.
//! @bug No known bugs.
//!

use std::mem::size_of;

use region::{Protection, Region};
use thiserror::Error;

////////////////////////////////////////////////////////////////////////////////////////////////////
// Protection definitions
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The size of a table slot.
pub const WORD: usize = size_of::<usize>();

/// Returned when a range of memory could not be made writable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("could not make {size:#x} bytes at {addr:#x} writable")]
pub struct ProtectionError {
    pub addr: usize,
    pub size: usize
}

///
/// Grants write access to a range of memory until dropped.
///
/// When the range was already writable no protection is changed, and dropping the guard does
/// nothing.
///
#[must_use]
pub struct ScopedProtection {
    _guard: Option<region::ProtectGuard>
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Queries
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Gets the size of a page on this system.
pub fn page_size() -> usize {
    region::page::size()
}

/// Checks if the given address lies in mapped, executable memory.
pub fn is_executable(
    addr: usize
) -> bool {
    if addr == 0 {
        return false;
    }

    region::query(addr as *const u8).map(|r| r.is_executable()).unwrap_or(false)
}

/// Checks if every byte in the given range is mapped and readable.
pub fn is_readable(
    addr: usize,
    size: usize
) -> bool {
    covered_by(addr, size, Region::is_readable)
}

/// Checks if every byte in the given range is mapped and writable.
pub fn is_writable(
    addr: usize,
    size: usize
) -> bool {
    covered_by(addr, size, Region::is_writable)
}

///
/// Checks that the regions overlapping the given range cover it without gaps, and that each of
/// them passes the given check.
///
fn covered_by(
    addr: usize,
    size: usize,
    check: fn(&Region) -> bool
) -> bool {
    if addr == 0 || size == 0 {
        return false;
    }

    let Some(end) = addr.checked_add(size) else {
        return false;
    };

    let Ok(regions) = region::query_range(addr as *const u8, size) else {
        return false;
    };

    let mut next = addr;
    for r in regions {
        let Ok(r) = r else {
            return false;
        };

        let range = r.as_range();
        if range.end <= next {
            continue;
        }

        if range.start > next || !check(&r) {
            return false;
        }

        next = next.max(range.end);
        if next >= end {
            return true;
        }
    }

    false
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Writing
////////////////////////////////////////////////////////////////////////////////////////////////////

///
/// Makes the given range writable, restoring its previous protection when the returned guard
/// is dropped.
///
/// Any existing access (read, execute) is kept; only write access is added.
///
/// In order to use this function safely, no other code may depend on the protection of the
/// pages containing the range while the guard is alive.
///
pub unsafe fn unprotect(
    addr: usize,
    size: usize
) -> Result<ScopedProtection, ProtectionError> {
    let err = ProtectionError { addr, size };

    if is_writable(addr, size) {
        return Ok(ScopedProtection { _guard: None });
    }

    let regions = region::query_range(addr as *const u8, size).map_err(|_| err)?;
    let mut prot = Protection::READ_WRITE;
    for r in regions {
        prot |= r.map_err(|_| err)?.protection();
    }

    match region::protect_with_handle(addr as *const u8, size, prot) {
        Ok(guard) => Ok(ScopedProtection { _guard: Some(guard) }),
        Err(e) => {
            tracing::debug!("mprotect of {:#x}+{:#x} to {:?} failed: {}", addr, size, prot, e);
            Err(err)
        }
    }
}

///
/// Temporarily marks the given memory region as writable, then calls the given fn.
///
/// The closure is not called if the protection could not be changed.
///
pub unsafe fn use_region<R>(
    addr: usize,
    size: usize,
    func: impl FnOnce() -> R
) -> Result<R, ProtectionError> {
    let _prot = unprotect(addr, size)?;
    Ok(func())
}

///
/// Writes a pointer sized value to the given address.
///
/// The destination may be unaligned, and its natural type may differ from the value.
///
pub unsafe fn store(
    dst: usize,
    value: usize
) {
    std::ptr::write_unaligned(dst as *mut usize, value);
}

/// Reads a pointer sized value from the given address.
pub unsafe fn load(
    src: usize
) -> usize {
    std::ptr::read_unaligned(src as *const usize)
}
