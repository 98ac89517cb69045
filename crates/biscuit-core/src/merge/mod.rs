//! Incremental merging of BIDS project folders.
//!
//! - File categories and conflict rules
//! - Whole-project plans and single subject/session plans
//! - Plan execution with verified copies and table merges

mod add;
mod category;
mod executor;
mod plan;

pub use add::{plan_add_session, plan_add_subject};
pub use category::FileCategory;
pub use executor::{
    mark_copied, merge, MergeAction, MergeProgress, MergeProgressCallback, MergeReport, Merger,
};
pub use plan::{plan_merge, FileOperation, MergeOptions, MergePlan, PlannedFile, RowSelection};
