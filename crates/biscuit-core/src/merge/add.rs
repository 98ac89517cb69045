//! Planning the transfer of a single subject or session.
//!
//! Adding a node copies the files under its folder and merges the matching
//! `participants.tsv` row into the destination project. Project-level
//! description and README files are copied only when the destination has
//! none.

use crate::bids::{BidsTree, SessionKey, SubjectKey};
use crate::config::BidsConfig;
use crate::merge::plan::{list_files, relative_key, MergeOptions, MergePlan, Planner, RowSelection};
use crate::{BiscuitError, Result};
use std::path::Path;

/// Plan adding one subject of `tree` to the project folder `dst_project`.
pub fn plan_add_subject(
    tree: &BidsTree,
    subject: &SubjectKey,
    dst_project: &Path,
    options: &MergeOptions,
) -> Result<MergePlan> {
    let record = tree.subject(subject)?;
    let project = tree.project_of(subject)?;

    let mut planner = Planner::new(&project.path, dst_project, options)?;
    add_node_files(&mut planner, &record.path)?;
    add_project_files(&mut planner, &subject.participant_id())?;
    planner.finish()
}

/// Plan adding one session of `tree` to the project folder `dst_project`.
///
/// The subject's participants row is merged too, so the session can be added
/// to a project that doesn't know the subject yet.
pub fn plan_add_session(
    tree: &BidsTree,
    session: &SessionKey,
    dst_project: &Path,
    options: &MergeOptions,
) -> Result<MergePlan> {
    let record = tree.session(session)?;
    let project = tree.project(&session.project)?;

    let mut planner = Planner::new(&project.path, dst_project, options)?;
    add_node_files(&mut planner, &record.path)?;
    add_project_files(&mut planner, &session.subject_key().participant_id())?;
    planner.finish()
}

fn add_node_files(planner: &mut Planner<'_>, node_dir: &Path) -> Result<()> {
    let root = planner.src_root().to_path_buf();
    for (relative, (path, bytes)) in list_files(&root, node_dir)? {
        planner.add(relative, path, bytes, RowSelection::All);
    }
    Ok(())
}

fn add_project_files(planner: &mut Planner<'_>, participant_id: &str) -> Result<()> {
    let root = planner.src_root().to_path_buf();

    let participants = root.join(BidsConfig::PARTICIPANTS_FILENAME);
    let bytes = participants
        .metadata()
        .map_err(|e| BiscuitError::io_with_path(e, &participants))?
        .len();
    planner.add(
        BidsConfig::PARTICIPANTS_FILENAME.to_string(),
        participants,
        bytes,
        RowSelection::Keys(vec![participant_id.to_string()]),
    );

    for entry in std::fs::read_dir(&root).map_err(|e| BiscuitError::io_with_path(e, &root))? {
        let entry = entry.map_err(|e| BiscuitError::io_with_path(e, &root))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_project_file =
            name == BidsConfig::DESCRIPTION_FILENAME || name.starts_with("README");
        if !is_project_file || !entry.path().is_file() {
            continue;
        }
        if let Some(relative) = relative_key(&root, &entry.path()) {
            let bytes = entry
                .metadata()
                .map_err(|e| BiscuitError::io_with_path(e, entry.path()))?
                .len();
            planner.add_if_missing(relative, entry.path(), bytes);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bids::write_project;
    use crate::merge::plan::FileOperation;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_add_subject_to_empty_destination() {
        let temp = TempDir::new().unwrap();
        let src = write_project(temp.path(), "WS001");
        let dst = temp.path().join("archive");
        let tree = BidsTree::open(&src).unwrap();

        let key = SubjectKey::new("WS001", "02");
        let plan = plan_add_subject(&tree, &key, &dst, &MergeOptions::default()).unwrap();

        assert!(plan
            .operations
            .iter()
            .all(|op| !op.file().relative.starts_with("sub-01/")));
        assert!(plan
            .operations
            .iter()
            .any(|op| op.file().relative.starts_with("sub-02/ses-1/meg/")));

        let participants = plan
            .operations
            .iter()
            .find(|op| op.file().relative == "participants.tsv")
            .unwrap();
        assert_eq!(
            participants,
            &FileOperation::MergeTable {
                file: participants.file().clone(),
                rows: RowSelection::Keys(vec!["sub-02".to_string()]),
            }
        );
        assert_eq!(
            plan.operations
                .iter()
                .find(|op| op.file().relative == "dataset_description.json")
                .unwrap()
                .label(),
            "copy"
        );
    }

    #[test]
    fn test_add_existing_subject_conflicts() {
        let temp = TempDir::new().unwrap();
        let src = write_project(temp.path(), "src");
        let dst = write_project(temp.path(), "dst");
        let tree = BidsTree::open(&src).unwrap();

        let err = plan_add_subject(
            &tree,
            &SubjectKey::new("src", "01"),
            &dst,
            &MergeOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, BiscuitError::MergeConflict { .. }));
    }

    #[test]
    fn test_add_session_to_existing_subject() {
        let temp = TempDir::new().unwrap();
        let src = write_project(temp.path(), "src");
        let dst = write_project(temp.path(), "dst");
        fs::rename(
            src.join("sub-01").join("ses-1"),
            src.join("sub-01").join("ses-2"),
        )
        .unwrap();
        let old_scans = src.join("sub-01/ses-2/sub-01_ses-1_scans.tsv");
        fs::rename(&old_scans, src.join("sub-01/ses-2/sub-01_ses-2_scans.tsv")).unwrap();
        let tree = BidsTree::open(&src).unwrap();

        let session = SubjectKey::new("src", "01").session("2");
        let plan = plan_add_session(&tree, &session, &dst, &MergeOptions::default()).unwrap();

        assert!(plan
            .operations
            .iter()
            .filter(|op| op.file().relative.starts_with("sub-01/ses-2/"))
            .all(|op| op.label() == "copy"));
        assert_eq!(plan.count("merge"), 1);
        // Description and README already exist in the destination.
        assert!(!plan
            .operations
            .iter()
            .any(|op| op.file().relative == "README.txt"));
    }

    #[test]
    fn test_add_unknown_subject() {
        let temp = TempDir::new().unwrap();
        let src = write_project(temp.path(), "WS001");
        let tree = BidsTree::open(&src).unwrap();
        let err = plan_add_subject(
            &tree,
            &SubjectKey::new("WS001", "77"),
            temp.path(),
            &MergeOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, BiscuitError::NoSubject { .. }));
    }
}
