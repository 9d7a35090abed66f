//!
//! @file pages.rs
//! @author Andrew Spaulding (Kasplat)
//! @brief Private page allocations for relocated dispatch tables.
//! @bug No known bugs.
//!

use std::fmt;

use region::Protection;
use thiserror::Error;

/// Describes why an allocation request could not be satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocationError {
    #[error("cannot allocate zero bytes")]
    ZeroSize,

    #[error("the system could not reserve {size:#x} bytes")]
    Exhausted { size: usize }
}

///
/// A private, writable memory region.
///
/// The region is released when this structure is dropped.
///
pub struct Allocation {
    region: region::Allocation,
    size: usize
}

/// Anything which can hand out allocations. Used to inject alternative allocators.
pub trait Allocate {
    /// Allocates a writable region of at least size bytes.
    fn allocate(
        &self,
        size: usize
    ) -> Result<Allocation, AllocationError>;
}

/// Allocates whole read/write pages directly from the OS.
#[derive(Debug, Default, Clone, Copy)]
pub struct PageAllocator;

static GLOBAL: PageAllocator = PageAllocator;

////////////////////////////////////////////////////////////////////////////////////////////////////

impl Allocation {
    /// Gets a pointer to the start of the region.
    pub fn data(
        &self
    ) -> *mut u8 {
        self.region.as_ptr::<u8>() as *mut u8
    }

    /// Gets the address of the start of the region.
    pub fn address(
        &self
    ) -> usize {
        self.data() as usize
    }

    /// Gets the number of bytes which were requested for this region.
    pub fn size(
        &self
    ) -> usize {
        self.size
    }
}

impl fmt::Debug for Allocation {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>
    ) -> Result<(), fmt::Error> {
        write!(f, "Allocation {{ {:#x}+{:#x} }}", self.address(), self.size)
    }
}

// SAFETY: The region is owned exclusively by this structure, and is only ever accessed through
//         raw pointers whose synchronization is the callers responsibility.
unsafe impl Send for Allocation {}
unsafe impl Sync for Allocation {}

impl PageAllocator {
    /// Gets the process wide allocator.
    pub fn global() -> &'static Self {
        &GLOBAL
    }
}

impl Allocate for PageAllocator {
    fn allocate(
        &self,
        size: usize
    ) -> Result<Allocation, AllocationError> {
        if size == 0 {
            return Err(AllocationError::ZeroSize);
        }

        match region::alloc(size, Protection::READ_WRITE) {
            Ok(region) => Ok(Allocation { region, size }),
            Err(e) => {
                tracing::debug!("failed to reserve {:#x} bytes: {}", size, e);
                Err(AllocationError::Exhausted { size })
            }
        }
    }
}
