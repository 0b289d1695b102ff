//! lfx - content-addressed, multi-tier cache for pointer files
//!
//! A pointer names a URL and how to expand what it points at. The loader
//! resolves pointers through a chain of cache tiers, downloading and
//! expanding only what no tier already holds.

pub mod cli;
pub mod config;
pub mod error;
pub mod hash;
pub mod loader;
pub mod pointer;
pub mod progress;
pub mod store;
pub mod tier;
pub mod ui;

pub use error::{LfxError, LfxResult};
