//! Integration tests for tree parsing and merging through the public API.

use biscuit_core::bids::{BidsTree, SubjectKey, TsvTable};
use biscuit_core::copy::WriteTarget;
use biscuit_core::merge::{merge, plan_add_subject, MergeOptions, Merger};
use biscuit_core::BiscuitError;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tempfile::TempDir;
use walkdir::WalkDir;

/// Create a project with the given subjects, one session and two runs each.
fn create_project(root: &Path, id: &str, subjects: &[(&str, &str)]) -> PathBuf {
    let project = root.join(id);
    fs::create_dir_all(&project).unwrap();

    let mut participants = String::from("participant_id\tage\tsex\n");
    for (sub, age) in subjects {
        participants.push_str(&format!("sub-{sub}\t{age}\tF\n"));
    }
    fs::write(project.join("participants.tsv"), participants).unwrap();
    fs::write(
        project.join("dataset_description.json"),
        "{\n  \"Name\": \"Test\",\n  \"BIDSVersion\": \"1.2.0\"\n}\n",
    )
    .unwrap();
    fs::write(project.join("README.txt"), "Project Title:\t\tTest\n").unwrap();

    for (sub, _) in subjects {
        let ses = project.join(format!("sub-{sub}")).join("ses-1");
        let meg = ses.join("meg");
        fs::create_dir_all(&meg).unwrap();
        let mut scans = String::from("filename\tacq_time\n");
        for run in 1..=2 {
            let prefix = format!("sub-{sub}_ses-1_task-rest_run-{run}");
            scans.push_str(&format!("meg/{prefix}_meg.con\t2020-01-0{run}T09:00:00\n"));
            let raw: Vec<u8> = (0..64 * 1024).map(|i| (i * run) as u8).collect();
            fs::write(meg.join(format!("{prefix}_meg.con")), raw).unwrap();
            fs::write(meg.join(format!("{prefix}_meg.json")), b"{}").unwrap();
            fs::write(meg.join(format!("{prefix}_channels.tsv")), b"name\ttype\n").unwrap();
            fs::write(meg.join(format!("{prefix}_markers.mrk")), b"mrk").unwrap();
        }
        fs::write(meg.join(format!("sub-{sub}_ses-1_coordsystem.json")), b"{}").unwrap();
        fs::write(ses.join(format!("sub-{sub}_ses-1_scans.tsv")), scans).unwrap();
    }
    project
}

/// Relative path -> contents of every file under `root`.
fn snapshot(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let relative = e.path().strip_prefix(root).unwrap().to_path_buf();
            (relative, fs::read(e.path()).unwrap())
        })
        .collect()
}

fn modified_times(root: &Path) -> BTreeMap<PathBuf, SystemTime> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| (e.path().to_path_buf(), e.metadata().unwrap().modified().unwrap()))
        .collect()
}

#[test]
fn test_parse_is_idempotent() {
    let temp = TempDir::new().unwrap();
    create_project(temp.path(), "WS001", &[("01", "25"), ("02", "31")]);
    create_project(temp.path(), "WS002", &[("01", "40")]);

    let first = BidsTree::open(temp.path()).unwrap();
    let second = BidsTree::open(temp.path()).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.scans().count(), 6);
}

#[test]
fn test_merge_into_empty_destination_reproduces_files() {
    let temp = TempDir::new().unwrap();
    let src = create_project(temp.path(), "WS001", &[("01", "25"), ("02", "31")]);
    let dst = temp.path().join("archive").join("WS001");

    let report = merge(&src, &dst, MergeOptions::default()).unwrap();
    assert_eq!(snapshot(&src), snapshot(&dst));
    assert_eq!(report.copied, snapshot(&src).len());

    let copied_tree = BidsTree::open(&dst).unwrap();
    assert_eq!(copied_tree.scans().count(), 4);
}

#[test]
fn test_self_merge_conflicts_without_writes() {
    let temp = TempDir::new().unwrap();
    let src = create_project(temp.path(), "WS001", &[("01", "25")]);
    let before = snapshot(&src);
    let times = modified_times(&src);

    let err = merge(&src, &src, MergeOptions::default()).unwrap_err();
    assert!(matches!(err, BiscuitError::MergeConflict { .. }));
    assert_eq!(snapshot(&src), before);
    assert_eq!(modified_times(&src), times);
}

#[test]
fn test_self_merge_of_tables_only_project_writes_nothing() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("WS001");
    for sub in ["01", "02"] {
        let ses = src.join(format!("sub-{sub}")).join("ses-1");
        fs::create_dir_all(&ses).unwrap();
        fs::write(
            ses.join(format!("sub-{sub}_ses-1_scans.tsv")),
            "filename\tacq_time\n",
        )
        .unwrap();
    }
    fs::write(
        src.join("participants.tsv"),
        "participant_id\tage\nsub-02\t\nsub-01\t25\n",
    )
    .unwrap();
    let before = snapshot(&src);
    let times = modified_times(&src);

    let err = merge(&src, &src, MergeOptions::default()).unwrap_err();
    assert!(matches!(err, BiscuitError::MergeConflict { .. }));
    assert_eq!(snapshot(&src), before);
    assert_eq!(modified_times(&src), times);
}

#[test]
fn test_conflicting_merge_writes_nothing() {
    let temp = TempDir::new().unwrap();
    let src = create_project(temp.path(), "src", &[("01", "26"), ("03", "50")]);
    let dst = create_project(temp.path(), "dst", &[("01", "25")]);
    let before = snapshot(&dst);

    let err = merge(&src, &dst, MergeOptions::default()).unwrap_err();
    assert!(matches!(err, BiscuitError::MergeConflict { .. }));
    assert_eq!(snapshot(&dst), before);
    assert!(!dst.join("sub-03").exists());
}

#[test]
fn test_overwrite_merge_keeps_incoming_participant_rows() {
    let temp = TempDir::new().unwrap();
    let src = create_project(temp.path(), "src", &[("01", "26"), ("03", "50")]);
    let dst = create_project(temp.path(), "dst", &[("01", "25"), ("02", "31")]);

    let options = MergeOptions {
        overwrite: true,
        ..Default::default()
    };
    let report = merge(&src, &dst, options).unwrap();
    assert!(report.overwritten > 0);

    let table = TsvTable::read(&dst.join("participants.tsv")).unwrap();
    assert_eq!(
        table.column_values("participant_id"),
        vec!["sub-01", "sub-02", "sub-03"]
    );
    let row = table.find_row("participant_id", "sub-01").unwrap();
    assert_eq!(table.get(row, "age"), Some("26"));

    let scans = TsvTable::read(&dst.join("sub-01/ses-1/sub-01_ses-1_scans.tsv")).unwrap();
    assert_eq!(scans.len(), 2);
}

#[test]
fn test_add_subject_then_reparse() {
    let temp = TempDir::new().unwrap();
    let src = create_project(temp.path(), "src", &[("01", "25"), ("02", "31")]);
    let dst = create_project(temp.path(), "dst", &[("01", "25")]);

    let tree = BidsTree::open(&src).unwrap();
    let plan = plan_add_subject(
        &tree,
        &SubjectKey::new("src", "02"),
        &dst,
        &MergeOptions::default(),
    )
    .unwrap();
    Merger::new(MergeOptions::default()).execute(&plan).unwrap();

    let merged = BidsTree::open(&dst).unwrap();
    let subject = merged.subject(&SubjectKey::new("dst", "02")).unwrap();
    assert_eq!(subject.age, "31");
    assert_eq!(merged.subjects().count(), 2);
}

/// Damages each of the first `failures` files it opens.
///
/// With `truncate` set, the writer stores only half of every buffer while
/// reporting it as fully written. Otherwise the first byte is altered.
struct CorruptingTarget {
    failures: AtomicU32,
    opens: AtomicU32,
    truncate: bool,
}

impl CorruptingTarget {
    fn new(failures: u32, truncate: bool) -> Arc<Self> {
        Arc::new(Self {
            failures: AtomicU32::new(failures),
            opens: AtomicU32::new(0),
            truncate,
        })
    }
}

struct CorruptingWriter {
    inner: File,
    corrupt: bool,
    truncate: bool,
}

impl Write for CorruptingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.corrupt && self.truncate {
            self.inner.write_all(&buf[..buf.len() / 2])?;
            return Ok(buf.len());
        }
        if self.corrupt && !buf.is_empty() {
            self.corrupt = false;
            let mut bad = buf.to_vec();
            bad[0] = bad[0].wrapping_add(1);
            self.inner.write_all(&bad)?;
            return Ok(buf.len());
        }
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl WriteTarget for CorruptingTarget {
    fn create(&self, path: &Path) -> io::Result<Box<dyn Write + Send>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let corrupt = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        Ok(Box::new(CorruptingWriter {
            inner: File::create(path)?,
            corrupt,
            truncate: self.truncate,
        }))
    }
}

#[test]
fn test_corrupted_copy_retried_once() {
    let temp = TempDir::new().unwrap();
    let src = create_project(temp.path(), "WS001", &[("01", "25")]);
    let dst = temp.path().join("archive");
    let target = CorruptingTarget::new(1, false);

    let report = Merger::new(MergeOptions::default())
        .with_target(target.clone())
        .merge(&src, &dst)
        .unwrap();
    assert_eq!(report.retried.len(), 1);
    assert_eq!(
        target.opens.load(Ordering::SeqCst) as usize,
        report.copied + 1
    );
    assert_eq!(snapshot(&src), snapshot(&dst));
}

#[test]
fn test_persistent_corruption_fails_after_one_retry() {
    let temp = TempDir::new().unwrap();
    let src = create_project(temp.path(), "WS001", &[("01", "25")]);
    let dst = temp.path().join("archive");
    let target = CorruptingTarget::new(u32::MAX, false);

    let err = Merger::new(MergeOptions::default())
        .with_target(target.clone())
        .merge(&src, &dst)
        .unwrap_err();
    assert!(matches!(
        err,
        BiscuitError::CopyVerificationFailed { attempts: 2, .. }
    ));
    assert_eq!(target.opens.load(Ordering::SeqCst), 2);
}

#[test]
fn test_truncated_copy_retried_once() {
    let temp = TempDir::new().unwrap();
    let src = create_project(temp.path(), "WS001", &[("01", "25")]);
    let dst = temp.path().join("archive");
    let target = CorruptingTarget::new(1, true);

    let report = Merger::new(MergeOptions::default())
        .with_target(target.clone())
        .merge(&src, &dst)
        .unwrap();
    assert_eq!(report.retried.len(), 1);
    assert_eq!(
        target.opens.load(Ordering::SeqCst) as usize,
        report.copied + 1
    );
    assert_eq!(snapshot(&src), snapshot(&dst));
}

#[test]
fn test_persistent_truncation_fails_after_one_retry() {
    let temp = TempDir::new().unwrap();
    let src = create_project(temp.path(), "WS001", &[("01", "25")]);
    let dst = temp.path().join("archive");
    let target = CorruptingTarget::new(u32::MAX, true);

    let err = Merger::new(MergeOptions::default())
        .with_target(target.clone())
        .merge(&src, &dst)
        .unwrap_err();
    assert!(matches!(
        err,
        BiscuitError::CopyVerificationFailed { attempts: 2, .. }
    ));
    assert_eq!(target.opens.load(Ordering::SeqCst), 2);
}
