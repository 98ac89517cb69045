//! Merge planning.
//!
//! Planning only lists directories. It decides, for every source file, what
//! will happen to it in the destination and rejects the merge up front when
//! files would collide. Nothing is written until a [`MergePlan`] is executed.

use crate::copy::is_same_file;
use crate::copy::ChecksumAlgorithm;
use crate::merge::category::FileCategory;
use crate::{BiscuitError, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Options for planning and executing a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOptions {
    /// Replace conflicting destination files instead of failing.
    pub overwrite: bool,
    /// Verify every copied file by checksum.
    pub verify: bool,
    pub algorithm: ChecksumAlgorithm,
    /// Rename the source folder to `<name>_copied` after a full merge.
    pub mark_copied: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            verify: true,
            algorithm: ChecksumAlgorithm::default(),
            mark_copied: false,
        }
    }
}

/// Which rows of a source table take part in a table merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowSelection {
    All,
    /// Only rows whose key column holds one of these values.
    Keys(Vec<String>),
}

/// A source file and where it lands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedFile {
    /// `/`-separated path relative to both roots.
    pub relative: String,
    pub src: PathBuf,
    pub dst: PathBuf,
    pub category: FileCategory,
    pub bytes: u64,
}

/// One step of a merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FileOperation {
    /// The file does not exist in the destination.
    Copy(PlannedFile),
    /// Replace an existing destination file.
    Overwrite(PlannedFile),
    /// Merge a participants/scans table into the destination's.
    MergeTable {
        file: PlannedFile,
        rows: RowSelection,
    },
    /// Keep the destination's copy.
    Skip(PlannedFile),
}

impl FileOperation {
    pub fn file(&self) -> &PlannedFile {
        match self {
            FileOperation::Copy(file)
            | FileOperation::Overwrite(file)
            | FileOperation::Skip(file)
            | FileOperation::MergeTable { file, .. } => file,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FileOperation::Copy(_) => "copy",
            FileOperation::Overwrite(_) => "overwrite",
            FileOperation::MergeTable { .. } => "merge",
            FileOperation::Skip(_) => "skip",
        }
    }

    /// True when the operation writes file data through the copier.
    pub fn is_transfer(&self) -> bool {
        matches!(self, FileOperation::Copy(_) | FileOperation::Overwrite(_))
    }
}

/// The planned operations of a merge, in relative path order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergePlan {
    pub src_root: PathBuf,
    pub dst_root: PathBuf,
    pub operations: Vec<FileOperation>,
}

impl MergePlan {
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn count(&self, label: &str) -> usize {
        self.operations.iter().filter(|op| op.label() == label).count()
    }

    /// Bytes that will be copied or overwritten.
    pub fn bytes_to_copy(&self) -> u64 {
        self.operations
            .iter()
            .filter(|op| op.is_transfer())
            .map(|op| op.file().bytes)
            .sum()
    }
}

impl fmt::Display for MergePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Merge {} -> {}",
            self.src_root.display(),
            self.dst_root.display()
        )?;
        for op in &self.operations {
            writeln!(f, "  {:<9} {}", op.label(), op.file().relative)?;
        }
        write!(
            f,
            "{} to copy, {} to overwrite, {} tables to merge, {} skipped",
            self.count("copy"),
            self.count("overwrite"),
            self.count("merge"),
            self.count("skip")
        )
    }
}

/// Plan merging the project folder `src` into `dst`.
///
/// `dst` may not exist yet, in which case every file is copied.
pub fn plan_merge(src: &Path, dst: &Path, options: &MergeOptions) -> Result<MergePlan> {
    if !src.is_dir() {
        return Err(BiscuitError::NotADirectory(src.to_path_buf()));
    }
    let mut planner = Planner::new(src, dst, options)?;
    for (relative, (path, bytes)) in list_files(src, src)? {
        planner.add(relative, path, bytes, RowSelection::All);
    }
    planner.finish()
}

/// Accumulates operations and conflicts for one merge.
pub(crate) struct Planner<'a> {
    src_root: PathBuf,
    dst_root: PathBuf,
    dst_files: BTreeSet<String>,
    options: &'a MergeOptions,
    operations: BTreeMap<String, FileOperation>,
    conflicts: Vec<PathBuf>,
}

impl<'a> Planner<'a> {
    pub(crate) fn new(src_root: &Path, dst_root: &Path, options: &'a MergeOptions) -> Result<Self> {
        let dst_files = if dst_root.is_dir() {
            list_files(dst_root, dst_root)?.into_keys().collect()
        } else {
            BTreeSet::new()
        };
        Ok(Self {
            src_root: src_root.to_path_buf(),
            dst_root: dst_root.to_path_buf(),
            dst_files,
            options,
            operations: BTreeMap::new(),
            conflicts: Vec::new(),
        })
    }

    pub(crate) fn src_root(&self) -> &Path {
        &self.src_root
    }

    pub(crate) fn add(&mut self, relative: String, src: PathBuf, bytes: u64, rows: RowSelection) {
        let file_name = relative.rsplit('/').next().unwrap_or(&relative);
        let category = FileCategory::classify(file_name);
        let present = self.dst_files.contains(&relative);
        let file = PlannedFile {
            dst: self.dst_root.join(&relative),
            relative: relative.clone(),
            src,
            category,
            bytes,
        };

        let op = if category.is_table() && (present || rows != RowSelection::All) {
            FileOperation::MergeTable { file, rows }
        } else if !present {
            FileOperation::Copy(file)
        } else if category.is_mergeable() {
            if self.options.overwrite {
                FileOperation::Overwrite(file)
            } else {
                FileOperation::Skip(file)
            }
        } else {
            self.conflicts.push(file.dst.clone());
            FileOperation::Overwrite(file)
        };
        debug!("Planned {} {}", op.label(), relative);
        self.operations.insert(relative, op);
    }

    /// Add a file outside the node being planned only when the destination
    /// lacks it (project description, README).
    pub(crate) fn add_if_missing(&mut self, relative: String, src: PathBuf, bytes: u64) {
        if !self.dst_files.contains(&relative) {
            self.add(relative, src, bytes, RowSelection::All);
        }
    }

    pub(crate) fn finish(self) -> Result<MergePlan> {
        // Every file of a tree collides with itself, tables included.
        if is_same_file(&self.src_root, &self.dst_root) {
            if self.options.overwrite {
                return Err(BiscuitError::SameFile {
                    src: self.src_root,
                    dst: self.dst_root,
                });
            }
            return Err(BiscuitError::MergeConflict {
                conflicts: self
                    .operations
                    .into_values()
                    .map(|op| op.file().src.clone())
                    .collect(),
            });
        }
        if !self.conflicts.is_empty() && !self.options.overwrite {
            info!(
                "Merge of {} into {} blocked by {} conflicting file(s)",
                self.src_root.display(),
                self.dst_root.display(),
                self.conflicts.len()
            );
            return Err(BiscuitError::MergeConflict {
                conflicts: self.conflicts,
            });
        }
        Ok(MergePlan {
            src_root: self.src_root,
            dst_root: self.dst_root,
            operations: self.operations.into_values().collect(),
        })
    }
}

/// Files under `dir`, keyed by their `/`-separated path relative to `root`.
pub(crate) fn list_files(root: &Path, dir: &Path) -> Result<BTreeMap<String, (PathBuf, u64)>> {
    let mut files = BTreeMap::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(dir).to_path_buf();
            match e.into_io_error() {
                Some(io) => BiscuitError::io_with_path(io, path),
                None => BiscuitError::Other(format!("Failed to walk {}", path.display())),
            }
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let bytes = entry
            .metadata()
            .map(|m| m.len())
            .map_err(|e| BiscuitError::Other(format!("{}: {}", entry.path().display(), e)))?;
        if let Some(relative) = relative_key(root, entry.path()) {
            files.insert(relative, (entry.path().to_path_buf(), bytes));
        }
    }
    Ok(files)
}

/// `path` relative to `root`, joined with `/`.
pub(crate) fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bids::write_project;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_plan_into_missing_destination_copies_everything() {
        let temp = TempDir::new().unwrap();
        let src = write_project(temp.path(), "WS001");
        let dst = temp.path().join("archive").join("WS001");

        let plan = plan_merge(&src, &dst, &MergeOptions::default()).unwrap();
        assert!(!plan.is_empty());
        assert_eq!(plan.count("copy"), plan.len());
        assert!(plan.bytes_to_copy() > 0);
        assert!(plan
            .operations
            .iter()
            .any(|op| op.file().relative == "sub-01/ses-1/meg/sub-01_ses-1_task-rest_run-1_meg.con"));
        assert!(!dst.exists());
    }

    #[test]
    fn test_plan_self_merge_conflicts() {
        let temp = TempDir::new().unwrap();
        let src = write_project(temp.path(), "WS001");

        let err = plan_merge(&src, &src, &MergeOptions::default()).unwrap_err();
        match err {
            BiscuitError::MergeConflict { conflicts } => {
                assert!(conflicts.iter().any(|p| p.ends_with("sub-01_ses-1_task-rest_run-1_meg.con")));
                assert!(conflicts.iter().any(|p| p.ends_with("participants.tsv")));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_plan_self_merge_of_tables_only_project_conflicts() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("WS001");
        let ses = src.join("sub-01").join("ses-1");
        fs::create_dir_all(&ses).unwrap();
        let participants = "participant_id\tage\nsub-02\t\nsub-01\t25\n";
        fs::write(src.join("participants.tsv"), participants).unwrap();
        fs::write(ses.join("sub-01_ses-1_scans.tsv"), "filename\tacq_time\n").unwrap();

        let err = plan_merge(&src, &src, &MergeOptions::default()).unwrap_err();
        match err {
            BiscuitError::MergeConflict { conflicts } => assert_eq!(conflicts.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            fs::read_to_string(src.join("participants.tsv")).unwrap(),
            participants
        );
    }

    #[test]
    fn test_plan_self_merge_with_overwrite_is_same_file() {
        let temp = TempDir::new().unwrap();
        let src = write_project(temp.path(), "WS001");
        let options = MergeOptions {
            overwrite: true,
            ..Default::default()
        };
        assert!(matches!(
            plan_merge(&src, &src, &options),
            Err(BiscuitError::SameFile { .. })
        ));
    }

    #[test]
    fn test_plan_incremental_merge() {
        let temp = TempDir::new().unwrap();
        let dst = write_project(temp.path(), "dst");
        let src = write_project(temp.path(), "src");
        // Only sub-02 is new to the destination.
        fs::remove_dir_all(dst.join("sub-02")).unwrap();

        let plan = plan_merge(&src, &dst, &MergeOptions::default());
        // sub-01 files collide.
        assert!(matches!(plan, Err(BiscuitError::MergeConflict { .. })));

        fs::remove_dir_all(src.join("sub-01")).unwrap();
        let plan = plan_merge(&src, &dst, &MergeOptions::default()).unwrap();
        let op_for = |rel: &str| {
            plan.operations
                .iter()
                .find(|op| op.file().relative == rel)
                .unwrap()
                .label()
        };
        assert_eq!(op_for("participants.tsv"), "merge");
        assert_eq!(op_for("dataset_description.json"), "skip");
        assert_eq!(op_for("README.txt"), "skip");
        assert_eq!(op_for("sub-02/ses-1/sub-02_ses-1_scans.tsv"), "copy");
        assert_eq!(plan.count("overwrite"), 0);
    }

    #[test]
    fn test_plan_overwrite_turns_conflicts_into_overwrites() {
        let temp = TempDir::new().unwrap();
        let dst = write_project(temp.path(), "dst");
        let src = write_project(temp.path(), "src");
        let options = MergeOptions {
            overwrite: true,
            ..Default::default()
        };

        let plan = plan_merge(&src, &dst, &options).unwrap();
        assert_eq!(plan.count("copy"), 0);
        assert!(plan.count("overwrite") > 0);
        assert_eq!(plan.count("merge"), 3);
    }

    #[test]
    fn test_missing_source() {
        let temp = TempDir::new().unwrap();
        let err = plan_merge(&temp.path().join("nope"), temp.path(), &MergeOptions::default())
            .unwrap_err();
        assert!(matches!(err, BiscuitError::NotADirectory(_)));
    }

    #[test]
    fn test_relative_key() {
        assert_eq!(
            relative_key(Path::new("/a/b"), Path::new("/a/b/sub-01/x.tsv")).as_deref(),
            Some("sub-01/x.tsv")
        );
        assert_eq!(relative_key(Path::new("/a/b"), Path::new("/a/b")), None);
        assert_eq!(relative_key(Path::new("/a/b"), Path::new("/c")), None);
    }
}
