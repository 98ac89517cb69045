//! BIDS folder model.
//!
//! - Filename entities and name building
//! - `participants.tsv` / `scans.tsv` tables
//! - The project/subject/session/scan tree
//! - Metadata post-processing

mod entities;
mod naming;
pub mod postprocess;
mod tree;
mod tsv;

pub use entities::{parse_id, BidsParams};
pub use naming::{BidsFile, BidsName};
pub use tree::{
    parse_acq_time, BidsTree, NodeKey, Project, Scan, ScanKey, ScanQuery, Session, SessionKey,
    Subject, SubjectKey,
};
pub use tsv::{merge_participants, merge_scans, TsvTable};

#[cfg(test)]
pub(crate) use tree::tests::write_project;
