//!
//! @file lib.rs
//! @author Andrew Spaulding (Kasplat)
//! @brief Top level module file for the dispatch table hooks.
//! @bug No known bugs.
//!
//! Three ways of redirecting virtual calls made through a table of function pointers:
//!   - VmHook, which owns a single patched pointer and puts it back when dropped.
//!   - VmtHook, which gives one or more objects a private copy of their table.
//!   - SharedVmtHook, which patches the table every instance of a class shares.
//!
//! Every modification made by a hook is reverted, as far as it is still safe to do so, when the
//! hook is reset or dropped.
//!

mod errors;
mod layout;
mod vm_hook;
mod duplicate;
mod shared;

pub use errors::*;
pub use layout::*;
pub use vm_hook::VmHook;
pub use duplicate::VmtHook;
pub use shared::SharedVmtHook;

pub use vmem::{Allocate, Allocation, AllocationError, PageAllocator, ProtectionError};
