//! Biscuit core: BIDS MEG project management.
//!
//! Parses BIDS folders into a project/subject/session/scan tree, plans and
//! executes incremental merges between project folders, and copies raw data
//! with checksum verification.
//!
//! # Example
//!
//! ```no_run
//! use biscuit_core::bids::BidsTree;
//! use biscuit_core::merge::{merge, MergeOptions};
//! use std::path::Path;
//!
//! # fn main() -> biscuit_core::Result<()> {
//! let tree = BidsTree::open("/data/BIDS/WS001")?;
//! println!("{}", tree);
//!
//! let report = merge(
//!     Path::new("/data/BIDS/WS001"),
//!     Path::new("/archive/BIDS/WS001"),
//!     MergeOptions::default(),
//! )?;
//! println!("{} files copied", report.copied);
//! # Ok(())
//! # }
//! ```

pub mod bids;
pub mod cancel;
pub mod config;
pub mod copy;
pub mod error;
pub mod merge;
pub mod metadata;

pub use error::{BiscuitError, Result};
