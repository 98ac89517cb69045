//! Running a [`MergePlan`].
//!
//! # Phases
//!
//! 1. **Plan**: list both trees and reject conflicts (see [`plan_merge`])
//! 2. **Transfer**: copy and overwrite files through the verified copier
//! 3. **Tables**: merge `participants.tsv` / `*_scans.tsv` rows
//! 4. **Mark**: optionally rename the source to `<name>_copied`

use crate::bids::{merge_participants, merge_scans, TsvTable};
use crate::cancel::CancellationToken;
use crate::config::{AppConfig, BidsConfig};
use crate::copy::{CopyProgress, CopyStage, VerifiedCopier, WriteTarget};
use crate::merge::category::FileCategory;
use crate::merge::plan::{plan_merge, FileOperation, MergeOptions, MergePlan, PlannedFile, RowSelection};
use crate::{BiscuitError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// What is happening to the current file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeAction {
    Copying,
    Verifying,
    Retrying,
    MergingTable,
    Skipped,
    Done,
}

/// Per-file progress of a running merge.
#[derive(Debug, Clone)]
pub struct MergeProgress {
    /// Zero-based index of the operation in the plan.
    pub index: usize,
    pub total: usize,
    pub relative: String,
    pub action: MergeAction,
    pub bytes_copied: u64,
    pub total_bytes: u64,
}

/// Callback receiving [`MergeProgress`] updates.
pub type MergeProgressCallback = Arc<dyn Fn(MergeProgress) + Send + Sync + 'static>;

/// Result of an executed merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub copied: usize,
    pub overwritten: usize,
    pub tables_merged: usize,
    pub skipped: usize,
    pub bytes_copied: u64,
    /// Files that needed a second copy attempt.
    pub retried: Vec<PathBuf>,
    /// New location of the source folder when it was marked as copied.
    pub marked_copied: Option<PathBuf>,
}

/// Executes merge plans.
#[derive(Clone)]
pub struct Merger {
    options: MergeOptions,
    progress: Option<MergeProgressCallback>,
    cancel: Option<CancellationToken>,
    target: Option<Arc<dyn WriteTarget>>,
}

impl Merger {
    pub fn new(options: MergeOptions) -> Self {
        Self {
            options,
            progress: None,
            cancel: None,
            target: None,
        }
    }

    pub fn with_progress(mut self, progress: MergeProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Replace the filesystem write target of the copier.
    pub fn with_target(mut self, target: Arc<dyn WriteTarget>) -> Self {
        self.target = Some(target);
        self
    }

    pub fn options(&self) -> &MergeOptions {
        &self.options
    }

    /// Plan and execute a merge of project folder `src` into `dst`.
    ///
    /// With `mark_copied` set the source folder is renamed afterwards.
    pub fn merge(&self, src: &Path, dst: &Path) -> Result<MergeReport> {
        let plan = plan_merge(src, dst, &self.options)?;
        let mut report = self.execute(&plan)?;
        if self.options.mark_copied {
            report.marked_copied = mark_copied(src)?;
        }
        Ok(report)
    }

    /// Run every operation of `plan` in order.
    pub fn execute(&self, plan: &MergePlan) -> Result<MergeReport> {
        info!(
            "Merging {} into {} ({} operations)",
            plan.src_root.display(),
            plan.dst_root.display(),
            plan.len()
        );

        let total = plan.len();
        let mut report = MergeReport::default();

        for (index, op) in plan.operations.iter().enumerate() {
            if let Some(cancel) = &self.cancel {
                cancel.check()?;
            }
            let file = op.file();
            match op {
                FileOperation::Copy(_) | FileOperation::Overwrite(_) => {
                    let outcome = self
                        .copier(index, total, &file.relative)
                        .copy(&file.src, &file.dst)?;
                    if outcome.attempts > 1 {
                        report.retried.push(file.src.clone());
                    }
                    report.bytes_copied += outcome.bytes;
                    if matches!(op, FileOperation::Copy(_)) {
                        report.copied += 1;
                    } else {
                        report.overwritten += 1;
                    }
                }
                FileOperation::MergeTable { rows, .. } => {
                    self.report(index, total, file, MergeAction::MergingTable);
                    merge_table(file, rows)?;
                    report.tables_merged += 1;
                }
                FileOperation::Skip(_) => {
                    debug!("Keeping existing {}", file.dst.display());
                    self.report(index, total, file, MergeAction::Skipped);
                    report.skipped += 1;
                    continue;
                }
            }
            self.report(index, total, file, MergeAction::Done);
        }

        info!(
            "Merge complete: {} copied, {} overwritten, {} tables merged, {} skipped",
            report.copied, report.overwritten, report.tables_merged, report.skipped
        );
        Ok(report)
    }

    /// Execute `plan` on the blocking pool, streaming progress over `progress_tx`.
    ///
    /// Any callback set with [`Merger::with_progress`] still runs. Per-file
    /// events wait for channel capacity, so the receiver must be drained
    /// while the merge runs. Chunk-level `Copying` events are dropped when
    /// the channel is full.
    pub async fn execute_with_progress(
        &self,
        plan: MergePlan,
        progress_tx: mpsc::Sender<MergeProgress>,
    ) -> Result<MergeReport> {
        let mut merger = self.clone();
        let inner = self.progress.clone();
        merger.progress = Some(Arc::new(move |progress: MergeProgress| {
            if let Some(inner) = &inner {
                inner(progress.clone());
            }
            match progress.action {
                // Chunk updates may be dropped while the receiver catches up.
                MergeAction::Copying => {
                    let _ = progress_tx.try_send(progress);
                }
                _ => {
                    if progress_tx.blocking_send(progress).is_err() {
                        debug!("Progress receiver closed");
                    }
                }
            }
        }));

        tokio::task::spawn_blocking(move || merger.execute(&plan))
            .await
            .map_err(|e| BiscuitError::Other(format!("Merge task failed: {}", e)))?
    }

    fn copier(&self, index: usize, total: usize, relative: &str) -> VerifiedCopier {
        let mut copier = VerifiedCopier::new()
            .with_algorithm(self.options.algorithm)
            .with_verify(self.options.verify);
        if let Some(target) = &self.target {
            copier = copier.with_target(target.clone());
        }
        if let Some(cancel) = &self.cancel {
            copier = copier.with_cancel(cancel.clone());
        }
        if let Some(progress) = &self.progress {
            let progress = progress.clone();
            let relative = relative.to_string();
            copier = copier.with_progress(Arc::new(move |p: CopyProgress| {
                let action = match p.stage {
                    CopyStage::Copying => MergeAction::Copying,
                    CopyStage::Verifying => MergeAction::Verifying,
                    CopyStage::Retrying => MergeAction::Retrying,
                    // Reported once the operation is finished.
                    CopyStage::Complete => return,
                };
                progress(MergeProgress {
                    index,
                    total,
                    relative: relative.clone(),
                    action,
                    bytes_copied: p.bytes_copied,
                    total_bytes: p.total_bytes,
                });
            }));
        }
        copier
    }

    fn report(&self, index: usize, total: usize, file: &PlannedFile, action: MergeAction) {
        if let Some(progress) = &self.progress {
            progress(MergeProgress {
                index,
                total,
                relative: file.relative.clone(),
                action,
                bytes_copied: file.bytes,
                total_bytes: file.bytes,
            });
        }
    }
}

/// Plan and execute a merge with default progress handling.
pub fn merge(src: &Path, dst: &Path, options: MergeOptions) -> Result<MergeReport> {
    Merger::new(options).merge(src, dst)
}

fn merge_table(file: &PlannedFile, rows: &RowSelection) -> Result<()> {
    let key = match file.category {
        FileCategory::Participants => BidsConfig::PARTICIPANT_ID_COLUMN,
        FileCategory::Scans => BidsConfig::FILENAME_COLUMN,
        other => {
            return Err(BiscuitError::Other(format!(
                "{} files cannot be merged as tables",
                other
            )))
        }
    };

    let mut incoming = TsvTable::read(&file.src)?;
    if let RowSelection::Keys(keys) = rows {
        incoming = incoming.filter_rows(key, |value| keys.iter().any(|k| k == value));
    }
    let existing = if file.dst.is_file() {
        TsvTable::read(&file.dst)?
    } else {
        TsvTable::new(incoming.columns().iter().cloned())
    };

    let merged = match file.category {
        FileCategory::Participants => merge_participants(&existing, &incoming)?,
        _ => merge_scans(&existing, &incoming)?,
    };
    merged.write(&file.dst)?;
    debug!(
        "Merged {} rows into {} ({} rows)",
        incoming.len(),
        file.dst.display(),
        merged.len()
    );
    Ok(())
}

/// Rename `src` to `<name>_copied`. Already-marked folders are left alone.
pub fn mark_copied(src: &Path) -> Result<Option<PathBuf>> {
    let Some(name) = src.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        return Ok(None);
    };
    if name.ends_with(AppConfig::COPIED_SUFFIX) {
        return Ok(None);
    }
    let renamed = src.with_file_name(format!("{}{}", name, AppConfig::COPIED_SUFFIX));
    if renamed.exists() {
        warn!(
            "Not marking {} as copied: {} already exists",
            src.display(),
            renamed.display()
        );
        return Ok(None);
    }
    std::fs::rename(src, &renamed).map_err(|e| BiscuitError::io_with_path(e, src))?;
    info!("Marked {} as copied", src.display());
    Ok(Some(renamed))
}
