//!
//! @file errors.rs
//! @author Andrew Spaulding (Kasplat)
//! @brief Error types returned by the dispatch table hooks.
//! @bug No known bugs.
//!

use thiserror::Error;

use vmem::{AllocationError, ProtectionError};

/// Reasons a table duplication hook could not be created or used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VmtHookError {
    #[error("failed to allocate the private dispatch table")]
    BadAllocation(#[from] AllocationError),

    #[error("the object does not point at a recognizable dispatch table")]
    BadTable,

    #[error("method {index} is outside of the private table ({len} methods)")]
    BadSlot { index: usize, len: usize },

    #[error("the hook does not own a private table")]
    Empty,

    #[error("the object uses the private table, but its original table is not known")]
    Untracked
}

/// Reasons a shared table hook operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SharedVmtHookError {
    #[error("the address does not point at a recognizable dispatch table")]
    BadTable,

    #[error("the table slot could not be made writable")]
    BadSlot(#[from] ProtectionError),

    #[error("could not allocate a hook entry")]
    OutOfMemory,

    #[error("slot {0} is not hooked")]
    NotFound(usize)
}
