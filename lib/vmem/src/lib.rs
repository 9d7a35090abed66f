//!
//! @file lib.rs
//! @author Andrew Spaulding (Kasplat)
//! @brief Process memory primitives used by the dispatch table hooks.
//! @bug No known bugs.
//!
//! This crate is a thin layer over the region crate. It answers the only questions the hooks
//! ever ask of the OS (is this address code, can this range be read or written), temporarily
//! grants write access to protected pages, and hands out private read/write pages.
//!

mod protect;
mod pages;

pub use protect::*;
pub use pages::*;
